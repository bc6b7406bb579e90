/*!
Parameter filtering.

Device records carry a mix of identity, SSH and SNMP fields. A session only ever sees the
subset it needs, picked from a fixed allow-list. Prefixed keys (`ssh_username`,
`snmp_auth_protocol`, ...) win over plain ones; every other key is dropped.
*/

use std::{net::Ipv4Addr, path::PathBuf};

use serde_json::{Map, Value};

use crate::{
    error::ValidationError,
    network::{DeviceRecord, VendorKind},
};

pub const SSH_KEYS: [&str; 7] = [
    "device_type",
    "ip",
    "username",
    "password",
    "secret",
    "delay_factor",
    "session_log",
];

pub const SNMP_KEYS: [&str; 6] = [
    "ip",
    "username",
    "auth_protocol",
    "auth_password",
    "priv_protocol",
    "priv_password",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshParams {
    pub device_type: VendorKind,
    pub ip: Ipv4Addr,
    pub username: String,
    pub password: String,
    pub secret: Option<String>,
    pub delay_factor: u32,
    pub session_log: Option<PathBuf>,
}

impl SshParams {
    pub fn declared_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpParams {
    pub ip: Ipv4Addr,
    pub username: String,
    pub auth_protocol: String,
    pub auth_password: String,
    pub priv_protocol: String,
    pub priv_password: String,
}

/// Keep only allow-listed keys. `{prefix}{key}` overrides a plain `{key}`.
fn select(record: &Map<String, Value>, keys: &[&str], prefix: &str) -> Map<String, Value> {
    let mut selected = Map::new();
    for key in keys {
        let prefixed = format!("{prefix}{key}");
        let value = record
            .get(&prefixed)
            .or_else(|| record.get(*key))
            .filter(|v| !v.is_null());
        if let Some(value) = value {
            selected.insert(key.to_string(), value.clone());
        }
    }
    selected
}

fn device_label(record: &Map<String, Value>) -> String {
    record
        .get("device_name")
        .or_else(|| record.get("ip"))
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}

fn required_str(
    selected: &Map<String, Value>,
    key: &'static str,
    device: &str,
) -> Result<String, ValidationError> {
    selected
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ValidationError::MissingCredentials {
            device: device.to_string(),
            field: key,
        })
}

fn required_ip(selected: &Map<String, Value>, device: &str) -> Result<Ipv4Addr, ValidationError> {
    let raw = required_str(selected, "ip", device)?;
    raw.parse()
        .map_err(|_| ValidationError::InvalidIp(raw.to_string()))
}

pub fn filter_ssh_params(record: &Map<String, Value>) -> Result<SshParams, ValidationError> {
    let selected = select(record, &SSH_KEYS, "ssh_");
    let device = device_label(record);

    let device_type = required_str(&selected, "device_type", &device)?.parse()?;
    Ok(SshParams {
        device_type,
        ip: required_ip(&selected, &device)?,
        username: required_str(&selected, "username", &device)?,
        password: required_str(&selected, "password", &device)?,
        secret: selected.get("secret").and_then(Value::as_str).map(str::to_string),
        delay_factor: selected
            .get("delay_factor")
            .and_then(Value::as_u64)
            .and_then(|f| u32::try_from(f).ok())
            .unwrap_or(1),
        session_log: selected
            .get("session_log")
            .and_then(Value::as_str)
            .map(PathBuf::from),
    })
}

pub fn filter_snmp_params(record: &Map<String, Value>) -> Result<SnmpParams, ValidationError> {
    let selected = select(record, &SNMP_KEYS, "snmp_");
    let device = device_label(record);

    Ok(SnmpParams {
        ip: required_ip(&selected, &device)?,
        username: required_str(&selected, "username", &device)?,
        auth_protocol: required_str(&selected, "auth_protocol", &device)?,
        auth_password: required_str(&selected, "auth_password", &device)?,
        priv_protocol: required_str(&selected, "priv_protocol", &device)?,
        priv_password: required_str(&selected, "priv_password", &device)?,
    })
}

fn record_map(device: &DeviceRecord) -> Map<String, Value> {
    match serde_json::to_value(device) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// SSH parameters of a registered device, with an optional transcript path.
pub fn ssh_params_for(
    device: &DeviceRecord,
    session_log: Option<PathBuf>,
) -> Result<SshParams, ValidationError> {
    let mut params = filter_ssh_params(&record_map(device))?;
    params.session_log = session_log;
    Ok(params)
}

pub fn snmp_params_for(device: &DeviceRecord) -> Result<SnmpParams, ValidationError> {
    filter_snmp_params(&record_map(device))
}
