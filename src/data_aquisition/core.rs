use std::{fmt::Display, net::Ipv4Addr, str::FromStr};

use serde::{Deserialize, Serialize};
use snmp2::{Oid, Value};

/// Owned object identifier. `snmp2::Oid` borrows from the response buffer, which makes it
/// awkward to keep around between requests, so walks and decoders work on this instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(Vec<u64>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed OID: {0}")]
pub struct OidParseError(pub String);

impl ObjectId {
    pub fn new(components: Vec<u64>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &ObjectId) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Components following `prefix` (the row index of a table column), if `prefix` matches.
    pub fn suffix_after(&self, prefix: &ObjectId) -> Option<&[u64]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// The last `n` components, or `None` when the OID is shorter than that.
    pub fn last_n(&self, n: usize) -> Option<&[u64]> {
        self.0.len().checked_sub(n).map(|start| &self.0[start..])
    }

    pub fn child(&self, component: u64) -> Self {
        let mut components = self.0.clone();
        components.push(component);
        Self(components)
    }

    pub fn to_snmp(&self) -> Result<Oid<'static>, OidParseError> {
        Oid::from(&self.0).map_err(|_| OidParseError(self.to_string()))
    }

    pub fn from_snmp(oid: &Oid<'_>) -> Option<Self> {
        oid.iter().map(|components| Self(components.collect()))
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = OidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(OidParseError(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| OidParseError(s.to_string()))
    }
}

/// Owned replacement for `snmp2::Value` (which borrows from the response buffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    IpAddress(Ipv4Addr),
    ObjectIdentifier(ObjectId),
    Counter32(u32),
    Counter64(u64),
    Unsigned32(u32),
    Timeticks(u32),
    Boolean(bool),
    Null,
    /// noSuchObject / noSuchInstance / endOfMibView
    NoSuchValue,
    Unknown,
}

impl SnmpValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(i) => Some(*i),
            SnmpValue::Counter32(c) | SnmpValue::Unsigned32(c) | SnmpValue::Timeticks(c) => {
                Some(i64::from(*c))
            }
            SnmpValue::Counter64(c) => i64::try_from(*c).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SnmpValue::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Textual rendering used for identity fields and trap payloads.
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, SnmpValue::NoSuchValue | SnmpValue::Null)
    }
}

impl Display for SnmpValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnmpValue::Integer(i) => write!(f, "{i}"),
            SnmpValue::OctetString(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) if text.chars().all(|c| !c.is_control() || c.is_whitespace()) => {
                    f.write_str(text)
                }
                _ => write!(f, "0x{}", hex::encode(bytes)),
            },
            SnmpValue::IpAddress(ip) => write!(f, "{ip}"),
            SnmpValue::ObjectIdentifier(oid) => write!(f, "{oid}"),
            SnmpValue::Counter32(c) | SnmpValue::Unsigned32(c) | SnmpValue::Timeticks(c) => {
                write!(f, "{c}")
            }
            SnmpValue::Counter64(c) => write!(f, "{c}"),
            SnmpValue::Boolean(b) => write!(f, "{b}"),
            SnmpValue::Null => f.write_str("null"),
            SnmpValue::NoSuchValue => f.write_str("No Such Object currently exists at this OID"),
            SnmpValue::Unknown => f.write_str("unknown"),
        }
    }
}

impl From<&Value<'_>> for SnmpValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Integer(i) => SnmpValue::Integer(*i),
            Value::IpAddress(ip) => SnmpValue::IpAddress(Ipv4Addr::from(*ip)),
            Value::OctetString(s) => SnmpValue::OctetString(s.to_vec()),
            Value::ObjectIdentifier(oid) => ObjectId::from_snmp(oid)
                .map(SnmpValue::ObjectIdentifier)
                .unwrap_or(SnmpValue::Unknown),
            Value::Counter32(c) => SnmpValue::Counter32(*c),
            Value::Counter64(c) => SnmpValue::Counter64(*c),
            Value::Timeticks(t) => SnmpValue::Timeticks(*t),
            Value::Boolean(b) => SnmpValue::Boolean(*b),
            Value::Unsigned32(u) => SnmpValue::Unsigned32(*u),
            Value::Null => SnmpValue::Null,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {
                SnmpValue::NoSuchValue
            }
            _ => SnmpValue::Unknown,
        }
    }
}
