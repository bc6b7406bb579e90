/*!
Error taxonomy for the access & discovery core.

- `ValidationError`: bad or missing input, rejected before any I/O.
- `ProtocolError`: unsupported SNMP auth/privacy protocol, fatal to that call.
- `SessionError`: SSH connect/auth/tunnel failure or an unmatched prompt.

Transient device errors (one OID timing out, one unreadable neighbor row) never get a type
of their own: they are absorbed where they happen and only logged.
*/

use serde::Serialize;
use thiserror::Error;

use crate::data_aquisition::ssh::SshError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),
    #[error("Missing credentials for {device}: {field}")]
    MissingCredentials { device: String, field: &'static str },
    #[error("Device {0} already exists")]
    DuplicateName(String),
    #[error("Unknown vendor kind: {0}")]
    UnknownVendor(String),
    #[error("Device name must not be empty")]
    EmptyName,
    #[error("IP address {ip} is already used by {owner}")]
    DuplicateIp { ip: String, owner: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unsupported authentication protocol: {0}")]
    UnsupportedAuthProtocol(String),
    #[error("Unsupported privacy protocol: {0}")]
    UnsupportedPrivProtocol(String),
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("GNE device not found for IP: {0}")]
    GatewayNotFound(String),
    #[error(transparent)]
    Transport(#[from] SshError),
    #[error("Tunnel to {target} failed: {reason}")]
    Tunnel { target: String, reason: String },
    #[error("Connection was closed by the remote host")]
    ClosedByRemote,
    #[error("Session task failed: {0}")]
    Task(String),
}

/// Unified error for every operation exposed by the core.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("NE {0} not found")]
    DeviceNotFound(String),
    #[error("Network {0} not found")]
    NetworkNotFound(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Tagged result handed to the UI / REST collaborators.
///
/// Serializes as `{"status": "success", ...payload}` or
/// `{"status": "failure", "error": "<message>"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome<T> {
    Success(T),
    Failure { error: String },
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure { error } => Err(error),
        }
    }
}

impl<T> From<CoreResult<T>> for Outcome<T> {
    fn from(result: CoreResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Failure {
                error: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize)]
    struct Payload {
        output: String,
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let ok: Outcome<Payload> = Outcome::Success(Payload {
            output: "done".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "output": "done"})
        );

        let failed: Outcome<Payload> =
            Err(CoreError::DeviceNotFound("r9".to_string())).into();
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"status": "failure", "error": "NE r9 not found"})
        );
    }

    #[test]
    fn test_gateway_not_found_message() {
        let err = CoreError::from(SessionError::GatewayNotFound("10.0.0.9".to_string()));
        assert_eq!(err.to_string(), "GNE device not found for IP: 10.0.0.9");
    }
}
