use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use snmp2::{AsyncSession, v3};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    data_aquisition::{
        core::{ObjectId, SnmpValue},
        credentials::SnmpParams,
    },
    error::ProtocolError,
};

/// Per-operation timeout and retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnmpPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl SnmpPolicy {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self { timeout, retries }
    }
}

impl Default for SnmpPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    Md5,
    Sha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivProtocol {
    Des,
    Aes128,
}

/// USM protocol pair resolved from the names an operator declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsmProtocols {
    pub auth: AuthProtocol,
    pub privacy: PrivProtocol,
}

impl UsmProtocols {
    /// Resolve declared protocol names. Anything outside the supported set is rejected;
    /// there is no fallback to a default protocol.
    pub fn resolve(auth: &str, privacy: &str) -> Result<Self, ProtocolError> {
        let auth = match auth.trim().to_ascii_uppercase().as_str() {
            "SHA" | "SHA1" => AuthProtocol::Sha,
            "MD5" => AuthProtocol::Md5,
            _ => return Err(ProtocolError::UnsupportedAuthProtocol(auth.to_string())),
        };
        let privacy = match privacy.trim().to_ascii_uppercase().as_str() {
            "AES128" | "AES" => PrivProtocol::Aes128,
            "DES" | "DES56" => PrivProtocol::Des,
            _ => return Err(ProtocolError::UnsupportedPrivProtocol(privacy.to_string())),
        };
        Ok(Self { auth, privacy })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnmpClientError {
    #[error("No SNMP response received before timeout")]
    Timeout,
    #[error("Malformed OID: {0}")]
    OidParseError(String),
    #[error("SNMP transport error: {0}")]
    Io(String),
    #[error("SNMP error: {0}")]
    Snmp(String),
    #[error("{status} at {oid}")]
    ErrorStatus { status: String, oid: String },
    #[error("Empty SNMP response")]
    EmptyResponse,
    #[error("OID not increasing: {0}")]
    NotIncreasing(String),
}

/// Everything needed to open an SNMPv3 session to one device.
#[derive(Debug, Clone)]
pub struct SnmpTarget {
    pub params: SnmpParams,
    pub protocols: UsmProtocols,
    pub policy: SnmpPolicy,
    pub port: u16,
}

impl SnmpTarget {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::from((self.params.ip, self.port))
    }
}

/// A session able to issue scalar GET and GETNEXT requests.
#[async_trait]
pub trait SnmpTransport: Send {
    async fn get(&mut self, oid: &ObjectId) -> Result<SnmpValue, SnmpClientError>;
    async fn get_next(&mut self, oid: &ObjectId) -> Result<(ObjectId, SnmpValue), SnmpClientError>;
}

#[async_trait]
pub trait SnmpConnector: Send + Sync {
    async fn open(&self, target: &SnmpTarget) -> Result<Box<dyn SnmpTransport>, SnmpClientError>;
}

/// SNMPv3 client for a single network device, backed by `snmp2`.
pub struct SnmpClient {
    address: SocketAddr,
    security: v3::Security,
    policy: SnmpPolicy,
    session: Option<AsyncSession>,
}

fn to_snmp2_security(params: &SnmpParams, protocols: UsmProtocols) -> v3::Security {
    let auth_protocol = match protocols.auth {
        AuthProtocol::Md5 => v3::AuthProtocol::Md5,
        AuthProtocol::Sha => v3::AuthProtocol::Sha1,
    };
    let cipher = match protocols.privacy {
        PrivProtocol::Des => v3::Cipher::Des,
        PrivProtocol::Aes128 => v3::Cipher::Aes128,
    };
    v3::Security::new(params.username.as_bytes(), params.auth_password.as_bytes())
        .with_auth_protocol(auth_protocol)
        .with_auth(v3::Auth::AuthPriv {
            cipher,
            privacy_password: params.priv_password.as_bytes().to_vec(),
        })
}

impl SnmpClient {
    pub fn new(target: &SnmpTarget) -> Self {
        Self {
            address: target.address(),
            security: to_snmp2_security(&target.params, target.protocols),
            policy: target.policy,
            session: None,
        }
    }

    /// Retrieves the SNMP session, creating it (and running engine discovery) on first use.
    async fn get_session(&mut self) -> Result<&mut AsyncSession, SnmpClientError> {
        if self.session.is_none() {
            let mut session = AsyncSession::new_v3(self.address, 0, self.security.clone())
                .await
                .map_err(|e| SnmpClientError::Io(e.to_string()))?;
            let mut attempt = 0;
            loop {
                match tokio::time::timeout(self.policy.timeout, session.init()).await {
                    Ok(Ok(())) => break,
                    Ok(Err(e)) => return Err(SnmpClientError::Snmp(e.to_string())),
                    Err(_) if attempt < self.policy.retries => attempt += 1,
                    Err(_) => return Err(SnmpClientError::Timeout),
                }
            }
            self.session = Some(session);
        }
        self.session.as_mut().ok_or(SnmpClientError::Timeout)
    }

    async fn request(
        &mut self,
        oid: &ObjectId,
        next: bool,
    ) -> Result<(ObjectId, SnmpValue), SnmpClientError> {
        let snmp_oid = oid
            .to_snmp()
            .map_err(|e| SnmpClientError::OidParseError(e.0))?;
        let policy = self.policy;
        let session = self.get_session().await?;

        let mut attempt = 0;
        loop {
            let response = if next {
                tokio::time::timeout(policy.timeout, session.getnext(&snmp_oid)).await
            } else {
                tokio::time::timeout(policy.timeout, session.get(&snmp_oid)).await
            };
            match response {
                Ok(Ok(pdu)) => {
                    if pdu.error_status != 0 {
                        return Err(SnmpClientError::ErrorStatus {
                            status: error_status_name(pdu.error_status).to_string(),
                            oid: oid.to_string(),
                        });
                    }
                    let mut varbinds = pdu.varbinds;
                    let (resp_oid, value) = varbinds.next().ok_or(SnmpClientError::EmptyResponse)?;
                    let resp_oid = ObjectId::from_snmp(&resp_oid)
                        .ok_or_else(|| SnmpClientError::OidParseError(resp_oid.to_string()))?;
                    return Ok((resp_oid, SnmpValue::from(&value)));
                }
                // engine boots/time resynchronised; the request must be resent
                Ok(Err(snmp2::Error::AuthUpdated)) if attempt < policy.retries => {
                    attempt += 1;
                }
                Ok(Err(e)) => return Err(SnmpClientError::Snmp(e.to_string())),
                Err(_) if attempt < policy.retries => {
                    attempt += 1;
                    debug!("SNMP request for {oid} timed out, retry {attempt}/{}", policy.retries);
                }
                Err(_) => return Err(SnmpClientError::Timeout),
            }
        }
    }
}

fn error_status_name(status: u32) -> &'static str {
    match status {
        1 => "tooBig",
        2 => "noSuchName",
        3 => "badValue",
        4 => "readOnly",
        5 => "genErr",
        6 => "noAccess",
        7 => "wrongType",
        11 => "noCreation",
        16 => "authorizationError",
        17 => "notWritable",
        _ => "error",
    }
}

#[async_trait]
impl SnmpTransport for SnmpClient {
    async fn get(&mut self, oid: &ObjectId) -> Result<SnmpValue, SnmpClientError> {
        self.request(oid, false).await.map(|(_, value)| value)
    }

    async fn get_next(&mut self, oid: &ObjectId) -> Result<(ObjectId, SnmpValue), SnmpClientError> {
        self.request(oid, true).await
    }
}

/// Opens real `snmp2` sessions.
#[derive(Debug, Default, Clone)]
pub struct Snmp2Connector;

#[async_trait]
impl SnmpConnector for Snmp2Connector {
    async fn open(&self, target: &SnmpTarget) -> Result<Box<dyn SnmpTransport>, SnmpClientError> {
        let mut client = SnmpClient::new(target);
        client.get_session().await?;
        Ok(Box::new(client))
    }
}

/// A single step of a lockstep column walk: one cell per requested column.
#[derive(Debug, Clone)]
pub struct SnmpTableRow {
    pub cells: Vec<(ObjectId, SnmpValue)>,
}

impl SnmpTableRow {
    pub fn value(&self, column: usize) -> Option<&SnmpValue> {
        self.cells.get(column).map(|(_, value)| value)
    }

    pub fn oid(&self, column: usize) -> Option<&ObjectId> {
        self.cells.get(column).map(|(oid, _)| oid)
    }
}

/// Rows collected by a walk, plus the error that cut it short, if any.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub rows: Vec<SnmpTableRow>,
    pub error: Option<SnmpClientError>,
}

/// Walk several table columns side by side with GETNEXT, stopping as soon as any column
/// leaves its subtree. A failed request truncates the walk; rows already read are kept.
pub async fn walk_columns(
    transport: &mut dyn SnmpTransport,
    columns: &[ObjectId],
    max_rows: usize,
) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();
    let mut cursors: Vec<ObjectId> = columns.to_vec();

    'walk: while outcome.rows.len() < max_rows {
        let mut cells = Vec::with_capacity(columns.len());
        for (column, cursor) in columns.iter().zip(cursors.iter()) {
            match transport.get_next(cursor).await {
                Ok((oid, value)) => {
                    if !oid.starts_with(column) || value == SnmpValue::NoSuchValue {
                        break 'walk;
                    }
                    if oid <= *cursor {
                        warn!("Agent returned non-increasing OID {oid} after {cursor}");
                        outcome.error = Some(SnmpClientError::NotIncreasing(oid.to_string()));
                        break 'walk;
                    }
                    cells.push((oid, value));
                }
                Err(e) => {
                    warn!("Walk of {column} truncated after {} rows: {e}", outcome.rows.len());
                    outcome.error = Some(e);
                    break 'walk;
                }
            }
        }
        cursors = cells.iter().map(|(oid, _)| oid.clone()).collect();
        outcome.rows.push(SnmpTableRow { cells });
    }

    outcome
}

/// Dotted-quad decoding of a raw 4-octet address value.
pub fn ipv4_from_octets(bytes: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = bytes.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// In-memory agent: a sorted OID -> value map, with optional per-OID failures.
    #[derive(Debug, Clone, Default)]
    pub struct MockAgent {
        pub values: BTreeMap<ObjectId, SnmpValue>,
        pub failing: BTreeMap<ObjectId, SnmpClientError>,
        pub requests: Arc<Mutex<Vec<ObjectId>>>,
    }

    impl MockAgent {
        pub fn with(mut self, oid: &str, value: SnmpValue) -> Self {
            self.values.insert(oid.parse().unwrap(), value);
            self
        }

        pub fn failing(mut self, oid: &str, error: SnmpClientError) -> Self {
            self.failing.insert(oid.parse().unwrap(), error);
            self
        }

        fn check(&self, oid: &ObjectId) -> Result<(), SnmpClientError> {
            self.requests.lock().unwrap().push(oid.clone());
            match self.failing.get(oid) {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl SnmpTransport for MockAgent {
        async fn get(&mut self, oid: &ObjectId) -> Result<SnmpValue, SnmpClientError> {
            self.check(oid)?;
            Ok(self.values.get(oid).cloned().unwrap_or(SnmpValue::NoSuchValue))
        }

        async fn get_next(&mut self, oid: &ObjectId) -> Result<(ObjectId, SnmpValue), SnmpClientError> {
            self.check(oid)?;
            let next = self
                .values
                .range(oid.clone()..)
                .find(|(candidate, _)| *candidate > oid);
            match next {
                Some((next_oid, value)) => {
                    if let Some(e) = self.failing.get(next_oid) {
                        return Err(e.clone());
                    }
                    Ok((next_oid.clone(), value.clone()))
                }
                None => Ok((oid.clone().child(0), SnmpValue::NoSuchValue)),
            }
        }
    }

    /// Hands out clones of a per-IP agent and counts how often a session was opened.
    #[derive(Debug, Clone, Default)]
    pub struct MockConnector {
        pub agents: BTreeMap<Ipv4Addr, MockAgent>,
        pub opened: Arc<Mutex<Vec<Ipv4Addr>>>,
    }

    impl MockConnector {
        pub fn with_agent(mut self, ip: Ipv4Addr, agent: MockAgent) -> Self {
            self.agents.insert(ip, agent);
            self
        }

        pub fn open_count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SnmpConnector for MockConnector {
        async fn open(&self, target: &SnmpTarget) -> Result<Box<dyn SnmpTransport>, SnmpClientError> {
            self.opened.lock().unwrap().push(target.params.ip);
            match self.agents.get(&target.params.ip) {
                Some(agent) => Ok(Box::new(agent.clone())),
                None => Err(SnmpClientError::Timeout),
            }
        }
    }
}
