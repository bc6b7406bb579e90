use std::{collections::BTreeMap, fmt::Display, net::Ipv4Addr, time::SystemTime};

use serde::{Deserialize, Serialize};

pub const DEVICE_NAME: &str = "Device Name";
pub const DEVICE_VERSION: &str = "Device Version";
pub const CPU_METRICS: &str = "CPU Metrics";
pub const STORAGE_METRICS: &str = "Storage Metrics";
pub const INTERFACE_COUNT: &str = "Number of Interfaces";

/// ifOperStatus (RFC 2863).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperStatus {
    Up,
    Down,
    Testing,
    Unknown,
    Dormant,
    NotPresent,
    LowerLayerDown,
}

impl From<i64> for OperStatus {
    fn from(value: i64) -> Self {
        match value {
            1 => OperStatus::Up,
            2 => OperStatus::Down,
            3 => OperStatus::Testing,
            5 => OperStatus::Dormant,
            6 => OperStatus::NotPresent,
            7 => OperStatus::LowerLayerDown,
            _ => OperStatus::Unknown,
        }
    }
}

impl Display for OperStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperStatus::Up => "up",
            OperStatus::Down => "down",
            OperStatus::Testing => "testing",
            OperStatus::Unknown => "unknown",
            OperStatus::Dormant => "dormant",
            OperStatus::NotPresent => "notPresent",
            OperStatus::LowerLayerDown => "lowerLayerDown",
        };
        f.write_str(s)
    }
}

/// One polled interface. Only a parsed dotted-quad can ever sit in `ip_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSample {
    #[serde(rename = "Index")]
    pub index: u32,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Status")]
    pub status: OperStatus,
    #[serde(rename = "IP Address")]
    pub ip_address: Option<Ipv4Addr>,
}

impl Display for InterfaceSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) {}", self.description, self.index, self.status)?;
        if let Some(ip) = self.ip_address {
            write!(f, " {ip}")?;
        }
        Ok(())
    }
}

/// Result of one SNMP poll of a device.
///
/// `identity` maps labels (`Device Name`, `Device Version`, `CPU Metrics`, ...) to the fetched
/// text, or to the error text when that single fetch failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    pub identity: BTreeMap<String, String>,
    #[serde(rename = "Interfaces")]
    pub interfaces: Vec<InterfaceSample>,
    pub polled_at: SystemTime,
}

impl PollResult {
    pub fn device_name(&self) -> Option<&str> {
        self.identity.get(DEVICE_NAME).map(String::as_str)
    }

    pub fn device_version(&self) -> Option<&str> {
        self.identity.get(DEVICE_VERSION).map(String::as_str)
    }

    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.interfaces.iter().filter_map(|i| i.ip_address)
    }

    /// The identity fields only, as handed back to the UI after SNMP setup.
    pub fn basic_identity(&self) -> BTreeMap<String, String> {
        self.identity
            .iter()
            .filter(|(k, _)| k.as_str() == DEVICE_NAME || k.as_str() == DEVICE_VERSION)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
