use std::{fmt::Display, net::Ipv4Addr, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    network::vendor::{self, VendorProfile},
};

/// Closed set of supported vendor families. Every strategy decision
/// (neighbor table, paging command, bastion hop) hangs off [`VendorKind::profile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    Huawei,
    CiscoIos,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorKind::Huawei => "huawei",
            VendorKind::CiscoIos => "cisco_ios",
        }
    }

    pub fn profile(&self) -> &'static dyn VendorProfile {
        match self {
            VendorKind::Huawei => &vendor::Huawei,
            VendorKind::CiscoIos => &vendor::CiscoIos,
        }
    }
}

impl Display for VendorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "huawei" => Ok(VendorKind::Huawei),
            "cisco_ios" => Ok(VendorKind::CiscoIos),
            other => Err(ValidationError::UnknownVendor(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    #[serde(rename = "ssh_username")]
    pub username: String,
    #[serde(rename = "ssh_password")]
    pub password: String,
    /// Privileged / enable secret.
    #[serde(rename = "ssh_secret", default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl SshCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    /// The secret, treating an empty string the same as no secret.
    pub fn declared_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// SNMPv3 USM material. Protocol names are kept as declared by the operator
/// and only resolved (and rejected) by the poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpCredentials {
    #[serde(rename = "snmp_username", default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "snmp_auth_protocol", default, skip_serializing_if = "Option::is_none")]
    pub auth_protocol: Option<String>,
    #[serde(rename = "snmp_auth_password", default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
    #[serde(rename = "snmp_priv_protocol", default, skip_serializing_if = "Option::is_none")]
    pub priv_protocol: Option<String>,
    #[serde(rename = "snmp_priv_password", default, skip_serializing_if = "Option::is_none")]
    pub priv_password: Option<String>,
}

impl SnmpCredentials {
    pub fn new(
        username: &str,
        auth_protocol: &str,
        auth_password: &str,
        priv_protocol: &str,
        priv_password: &str,
    ) -> Self {
        Self {
            username: Some(username.to_string()),
            auth_protocol: Some(auth_protocol.to_string()),
            auth_password: Some(auth_password.to_string()),
            priv_protocol: Some(priv_protocol.to_string()),
            priv_password: Some(priv_password.to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }
}

fn default_delay_factor() -> u32 {
    2
}

/// Identity and connection material for one network element.
///
/// Field names on the wire follow the collaborator layer (`device_name`, `ip`, `gne`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "device_name")]
    pub name: String,
    #[serde(rename = "device_type")]
    pub vendor: VendorKind,
    #[serde(rename = "ip")]
    pub management_ip: Ipv4Addr,
    /// Management IP of the bastion used to reach this device.
    /// Equal to `management_ip` when the device is reachable directly.
    #[serde(rename = "gne")]
    pub gateway_ip: Ipv4Addr,
    #[serde(default)]
    pub status: DeviceStatus,
    pub network_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default = "default_delay_factor")]
    pub delay_factor: u32,
    #[serde(flatten)]
    pub ssh: SshCredentials,
    #[serde(flatten)]
    pub snmp: SnmpCredentials,
}

impl DeviceRecord {
    /// A directly reachable device (its own gateway).
    pub fn new(
        name: &str,
        vendor: VendorKind,
        management_ip: Ipv4Addr,
        network_name: &str,
        ssh: SshCredentials,
    ) -> Self {
        Self {
            name: canonical_name(name),
            vendor,
            management_ip,
            gateway_ip: management_ip,
            status: DeviceStatus::Unknown,
            network_name: network_name.to_string(),
            site_name: None,
            delay_factor: default_delay_factor(),
            ssh,
            snmp: SnmpCredentials::default(),
        }
    }

    pub fn with_snmp(mut self, snmp: SnmpCredentials) -> Self {
        self.snmp = snmp;
        self
    }

    pub fn with_gateway(mut self, gateway_ip: Ipv4Addr) -> Self {
        self.gateway_ip = gateway_ip;
        self
    }

    pub fn is_directly_reachable(&self) -> bool {
        self.gateway_ip == self.management_ip
    }
}

/// Registry key for a device name: surrounding whitespace never distinguishes two devices.
pub fn canonical_name(name: &str) -> String {
    name.trim().to_string()
}

/// Strict dotted-quad IPv4 check.
pub fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok()
}

pub fn parse_ip(ip: &str) -> Result<Ipv4Addr, ValidationError> {
    ip.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::InvalidIp(ip.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_kind_parse() {
        assert_eq!("huawei".parse::<VendorKind>(), Ok(VendorKind::Huawei));
        assert_eq!(" cisco_ios ".parse::<VendorKind>(), Ok(VendorKind::CiscoIos));
        assert_eq!(
            "juniper".parse::<VendorKind>(),
            Err(ValidationError::UnknownVendor("juniper".to_string()))
        );
    }

    #[test]
    fn test_is_valid_ip() {
        assert!(is_valid_ip("10.0.0.1"));
        assert!(!is_valid_ip("10.0.1"));
        assert!(!is_valid_ip("10.0.0.256"));
        assert!(!is_valid_ip("not-an-ip"));
    }

    #[test]
    fn test_record_wire_names() {
        let record = DeviceRecord::new(
            "  core-1 ",
            VendorKind::Huawei,
            Ipv4Addr::new(10, 0, 0, 1),
            "lab",
            SshCredentials::new("admin", "pw"),
        );
        assert_eq!(record.name, "core-1");
        assert!(record.is_directly_reachable());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["device_name"], "core-1");
        assert_eq!(value["device_type"], "huawei");
        assert_eq!(value["ip"], "10.0.0.1");
        assert_eq!(value["gne"], "10.0.0.1");
        assert_eq!(value["ssh_username"], "admin");
        assert!(value.get("snmp_username").is_none());

        let back: DeviceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
