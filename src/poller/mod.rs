/*!
SNMP poller.

Fetches device identity (sysName, sysDescr, first CPU load, first storage usage, ifNumber)
and the interface table joined with the IP
address table. Results are cached per management IP. A single failing OID never fails a
poll: scalars carry the error text, table walks are truncated and logged. Only
configuration problems (missing credentials, unsupported USM protocols) are errors, and
those are raised before any packet is sent.
*/

pub mod cache;

use std::{
    collections::{BTreeMap, HashMap},
    net::Ipv4Addr,
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{debug, info, warn};

use crate::{
    data_aquisition::{
        core::{ObjectId, SnmpValue},
        credentials::snmp_params_for,
        snmp::{
            SnmpClientError, SnmpConnector, SnmpPolicy, SnmpTableRow, SnmpTarget, SnmpTransport,
            UsmProtocols, WalkOutcome, ipv4_from_octets, walk_columns,
        },
    },
    error::CoreResult,
    network::{
        DeviceRecord, DeviceStatus, InterfaceSample, OperStatus, PollResult,
        interface::{CPU_METRICS, DEVICE_NAME, DEVICE_VERSION, INTERFACE_COUNT, STORAGE_METRICS},
    },
};

use cache::TtlCache;

pub mod oids {
    pub const SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
    pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
    /// hrProcessorLoad of the first processor.
    pub const HR_PROCESSOR_LOAD_1: &str = "1.3.6.1.2.1.25.3.3.1.2.1";
    /// hrStorageUsed of the first storage entry.
    pub const HR_STORAGE_USED_1: &str = "1.3.6.1.2.1.25.2.3.1.6.1";
    pub const IF_NUMBER: &str = "1.3.6.1.2.1.2.1.0";
    pub const IF_INDEX: &str = "1.3.6.1.2.1.2.2.1.1";
    pub const IF_DESCR: &str = "1.3.6.1.2.1.2.2.1.2";
    pub const IF_OPER_STATUS: &str = "1.3.6.1.2.1.2.2.1.8";
    pub const IP_AD_ENT_ADDR: &str = "1.3.6.1.2.1.4.20.1.1";
    pub const IP_AD_ENT_IF_INDEX: &str = "1.3.6.1.2.1.4.20.1.2";
    pub const LLDP_REM_SYS_NAME: &str = "1.0.8802.1.1.2.1.4.1.1.9";
    pub const LLDP_REM_MAN_ADDR: &str = "1.0.8802.1.1.2.1.4.2.1.4";
    pub const CDP_CACHE_ADDRESS: &str = "1.3.6.1.4.1.9.9.23.1.2.1.1.4";
    pub const CDP_CACHE_DEVICE_ID: &str = "1.3.6.1.4.1.9.9.23.1.2.1.1.6";
}

/// Upper bound on rows read from any one table.
pub const MAX_TABLE_ROWS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub port: u16,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub probe_policy: SnmpPolicy,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            port: 161,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 100,
            probe_policy: SnmpPolicy::new(Duration::from_secs(2), 2),
        }
    }
}

pub struct SnmpPoller {
    connector: Arc<dyn SnmpConnector>,
    cache: TtlCache<Ipv4Addr, PollResult>,
    settings: PollerSettings,
}

/// Parse one of the constant OIDs above.
pub(crate) fn oid(text: &str) -> ObjectId {
    text.parse()
        .unwrap_or_else(|_| ObjectId::new(Vec::new()))
}

impl SnmpPoller {
    pub fn new(connector: Arc<dyn SnmpConnector>, settings: PollerSettings) -> Self {
        Self {
            connector,
            cache: TtlCache::new(settings.cache_ttl, settings.cache_capacity),
            settings,
        }
    }

    /// Validate credentials and resolve protocols. Never touches the network.
    fn target(&self, device: &DeviceRecord, policy: SnmpPolicy) -> CoreResult<SnmpTarget> {
        let params = snmp_params_for(device)?;
        let protocols = UsmProtocols::resolve(&params.auth_protocol, &params.priv_protocol)?;
        Ok(SnmpTarget {
            params,
            protocols,
            policy,
            port: self.settings.port,
        })
    }

    pub fn cached(&self, ip: Ipv4Addr) -> Option<PollResult> {
        self.cache.get(&ip)
    }

    pub fn invalidate(&self, ip: Ipv4Addr) {
        if self.cache.invalidate(&ip) {
            debug!("Dropped cached poll for {ip}");
        }
    }

    pub async fn poll(&self, device: &DeviceRecord) -> CoreResult<PollResult> {
        let target = self.target(device, device.vendor.profile().snmp_policy())?;
        let ip = device.management_ip;

        if let Some(cached) = self.cache.get(&ip) {
            debug!("Poll of {} served from cache", device.name);
            return Ok(cached);
        }

        let result = match self.connector.open(&target).await {
            Ok(mut transport) => poll_transport(transport.as_mut()).await,
            Err(e) => {
                warn!("SNMP session to {} ({ip}) failed: {e}", device.name);
                degraded(&e)
            }
        };
        info!(
            "Polled {} ({ip}): {} interfaces",
            device.name,
            result.interfaces.len()
        );
        self.cache.put(ip, result.clone());
        Ok(result)
    }

    /// Column walk used by neighbor discovery. A session failure is reported through
    /// `WalkOutcome::error`, like any other truncated walk.
    pub async fn walk(&self, device: &DeviceRecord, columns: &[ObjectId]) -> CoreResult<WalkOutcome> {
        let target = self.target(device, device.vendor.profile().snmp_policy())?;
        match self.connector.open(&target).await {
            Ok(mut transport) => Ok(walk_columns(transport.as_mut(), columns, MAX_TABLE_ROWS).await),
            Err(e) => {
                warn!("SNMP session to {} failed: {e}", device.name);
                Ok(WalkOutcome {
                    rows: Vec::new(),
                    error: Some(e),
                })
            }
        }
    }

    /// One short GET of sysName. Any answer means online.
    pub async fn probe_status(&self, device: &DeviceRecord) -> CoreResult<DeviceStatus> {
        let target = self.target(device, self.settings.probe_policy)?;
        let probe = async {
            let mut transport = self.connector.open(&target).await?;
            transport.get(&oid(oids::SYS_NAME)).await
        };
        let status = match probe.await {
            Ok(_) => DeviceStatus::Online,
            Err(e) => {
                debug!("Status probe of {} failed: {e}", device.name);
                DeviceStatus::Offline
            }
        };
        Ok(status)
    }
}

/// Identity scalars: (label, OID).
const IDENTITY: [(&str, &str); 5] = [
    (DEVICE_NAME, oids::SYS_NAME),
    (DEVICE_VERSION, oids::SYS_DESCR),
    (CPU_METRICS, oids::HR_PROCESSOR_LOAD_1),
    (STORAGE_METRICS, oids::HR_STORAGE_USED_1),
    (INTERFACE_COUNT, oids::IF_NUMBER),
];

fn degraded(error: &SnmpClientError) -> PollResult {
    let text = error.to_string();
    PollResult {
        identity: IDENTITY
            .iter()
            .map(|(label, _)| (label.to_string(), text.clone()))
            .collect(),
        interfaces: Vec::new(),
        polled_at: SystemTime::now(),
    }
}

async fn get_text(transport: &mut dyn SnmpTransport, oid_text: &str) -> String {
    match transport.get(&oid(oid_text)).await {
        Ok(value) => value.as_text(),
        Err(e) => {
            warn!("GET {oid_text} failed: {e}");
            e.to_string()
        }
    }
}

async fn poll_transport(transport: &mut dyn SnmpTransport) -> PollResult {
    let mut identity = BTreeMap::new();
    for (label, oid_text) in IDENTITY {
        identity.insert(label.to_string(), get_text(transport, oid_text).await);
    }

    let if_columns = [
        oid(oids::IF_INDEX),
        oid(oids::IF_DESCR),
        oid(oids::IF_OPER_STATUS),
    ];
    let interfaces = walk_columns(transport, &if_columns, MAX_TABLE_ROWS).await;

    let ip_columns = [oid(oids::IP_AD_ENT_IF_INDEX), oid(oids::IP_AD_ENT_ADDR)];
    let addresses = walk_columns(transport, &ip_columns, MAX_TABLE_ROWS).await;

    PollResult {
        identity,
        interfaces: join_interfaces(&interfaces, &addresses),
        polled_at: SystemTime::now(),
    }
}

fn address_of(row: &SnmpTableRow) -> Option<Ipv4Addr> {
    match row.value(1) {
        Some(SnmpValue::IpAddress(ip)) => Some(*ip),
        // fall back to the table index, which is the address itself
        _ => {
            let tail = row.oid(0)?.last_n(4)?;
            let octets: Vec<u8> = tail.iter().filter_map(|c| u8::try_from(*c).ok()).collect();
            ipv4_from_octets(&octets)
        }
    }
}

/// Attach an IP to each interface row by matching `ipAdEntIfIndex` with `ifIndex`.
fn join_interfaces(interfaces: &WalkOutcome, addresses: &WalkOutcome) -> Vec<InterfaceSample> {
    let mut by_if_index: HashMap<i64, Ipv4Addr> = HashMap::new();
    for row in &addresses.rows {
        let Some(if_index) = row.value(0).and_then(SnmpValue::as_integer) else {
            continue;
        };
        if let Some(ip) = address_of(row) {
            by_if_index.entry(if_index).or_insert(ip);
        }
    }

    interfaces
        .rows
        .iter()
        .filter_map(|row| {
            let index = row.value(0)?.as_integer()?;
            Some(InterfaceSample {
                index: u32::try_from(index).ok()?,
                description: row.value(1).map(SnmpValue::as_text).unwrap_or_default(),
                status: row
                    .value(2)
                    .and_then(SnmpValue::as_integer)
                    .map(OperStatus::from)
                    .unwrap_or(OperStatus::Unknown),
                ip_address: by_if_index.get(&index).copied(),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::data_aquisition::snmp::mock::MockAgent;
    use crate::network::{SnmpCredentials, SshCredentials, VendorKind};

    pub fn device(name: &str, ip: Ipv4Addr, vendor: VendorKind) -> DeviceRecord {
        DeviceRecord::new(name, vendor, ip, "lab", SshCredentials::new("admin", "pw"))
            .with_snmp(SnmpCredentials::new("mon", "SHA", "authpw", "AES128", "privpw"))
    }

    /// An agent exposing identity plus one interface per address, numbered from 1.
    pub fn agent(name: &str, addresses: &[Ipv4Addr]) -> MockAgent {
        let mut agent = MockAgent::default()
            .with(oids::SYS_NAME, SnmpValue::OctetString(name.as_bytes().to_vec()))
            .with(oids::SYS_DESCR, SnmpValue::OctetString(b"VRP V200R010".to_vec()))
            .with(oids::HR_PROCESSOR_LOAD_1, SnmpValue::Integer(12))
            .with(oids::HR_STORAGE_USED_1, SnmpValue::Integer(2048))
            .with(oids::IF_NUMBER, SnmpValue::Integer(addresses.len() as i64));
        for (i, ip) in addresses.iter().enumerate() {
            let index = i as i64 + 1;
            let row = |column: &str| format!("{column}.{index}");
            let ip_row = |column: &str| format!("{column}.{ip}");
            agent = agent
                .with(&row(oids::IF_INDEX), SnmpValue::Integer(index))
                .with(
                    &row(oids::IF_DESCR),
                    SnmpValue::OctetString(format!("GE0/0/{index}").into_bytes()),
                )
                .with(&row(oids::IF_OPER_STATUS), SnmpValue::Integer(1))
                .with(&ip_row(oids::IP_AD_ENT_ADDR), SnmpValue::IpAddress(*ip))
                .with(&ip_row(oids::IP_AD_ENT_IF_INDEX), SnmpValue::Integer(index));
        }
        agent
    }

    /// What polling `agent(name, addresses)` yields, without the poller.
    pub fn poll_result(name: &str, addresses: &[Ipv4Addr]) -> PollResult {
        PollResult {
            identity: BTreeMap::from([
                (DEVICE_NAME.to_string(), name.to_string()),
                (DEVICE_VERSION.to_string(), "VRP V200R010".to_string()),
            ]),
            interfaces: addresses
                .iter()
                .enumerate()
                .map(|(i, ip)| InterfaceSample {
                    index: i as u32 + 1,
                    description: format!("GE0/0/{}", i + 1),
                    status: OperStatus::Up,
                    ip_address: Some(*ip),
                })
                .collect(),
            polled_at: SystemTime::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{agent, device};
    use super::*;
    use crate::{
        data_aquisition::snmp::mock::MockConnector,
        error::{CoreError, ProtocolError},
        network::{SnmpCredentials, VendorKind},
    };
    use pretty_assertions::assert_eq;

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn poller(connector: MockConnector) -> SnmpPoller {
        SnmpPoller::new(Arc::new(connector), PollerSettings::default())
    }

    #[tokio::test]
    async fn test_poll_joins_interfaces_with_addresses() {
        let connector = MockConnector::default().with_agent(
            A,
            agent("core-1", &[Ipv4Addr::new(10, 1, 1, 1), Ipv4Addr::new(10, 2, 2, 1)]),
        );
        let result = poller(connector)
            .poll(&device("core-1", A, VendorKind::Huawei))
            .await
            .unwrap();

        assert_eq!(result.device_name(), Some("core-1"));
        assert_eq!(result.device_version(), Some("VRP V200R010"));
        assert_eq!(result.interfaces.len(), 2);
        assert_eq!(result.interfaces[0].description, "GE0/0/1");
        assert_eq!(result.interfaces[0].status, OperStatus::Up);
        assert_eq!(result.interfaces[1].ip_address, Some(Ipv4Addr::new(10, 2, 2, 1)));
    }

    #[tokio::test]
    async fn test_scalar_timeout_degrades_to_error_text() {
        let connector = MockConnector::default().with_agent(
            A,
            agent("core-1", &[]).failing(oids::SYS_NAME, SnmpClientError::Timeout),
        );
        let result = poller(connector)
            .poll(&device("core-1", A, VendorKind::CiscoIos))
            .await
            .unwrap();

        assert_eq!(
            result.device_name(),
            Some("No SNMP response received before timeout")
        );
        assert_eq!(result.device_version(), Some("VRP V200R010"));
    }

    #[tokio::test]
    async fn test_poll_reads_load_storage_and_interface_count() {
        let connector = MockConnector::default().with_agent(
            A,
            agent("core-1", &[Ipv4Addr::new(10, 1, 1, 1)])
                .failing(oids::HR_STORAGE_USED_1, SnmpClientError::Timeout),
        );
        let result = poller(connector)
            .poll(&device("core-1", A, VendorKind::Huawei))
            .await
            .unwrap();

        let field = |label: &str| result.identity.get(label).map(String::as_str);
        assert_eq!(field("CPU Metrics"), Some("12"));
        assert_eq!(field("Number of Interfaces"), Some("1"));
        assert_eq!(
            field("Storage Metrics"),
            Some("No SNMP response received before timeout")
        );
        // the setup answer carries the name and version only
        assert_eq!(result.basic_identity().len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_protocol_fails_before_network() {
        let connector = MockConnector::default().with_agent(A, agent("core-1", &[]));
        let poller = poller(connector.clone());
        let record = device("core-1", A, VendorKind::Huawei)
            .with_snmp(SnmpCredentials::new("mon", "SHA", "authpw", "DES3", "privpw"));

        let err = poller.poll(&record).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Protocol(ProtocolError::UnsupportedPrivProtocol(ref name)) if name == "DES3"
        ));
        assert_eq!(connector.open_count(), 0);
    }

    #[tokio::test]
    async fn test_poll_is_cached_until_invalidated() {
        let connector = MockConnector::default().with_agent(A, agent("core-1", &[]));
        let poller = poller(connector.clone());
        let record = device("core-1", A, VendorKind::Huawei);

        poller.poll(&record).await.unwrap();
        poller.poll(&record).await.unwrap();
        assert_eq!(connector.open_count(), 1);

        poller.invalidate(A);
        poller.poll(&record).await.unwrap();
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_device_degrades() {
        let result = poller(MockConnector::default())
            .poll(&device("ghost", A, VendorKind::Huawei))
            .await
            .unwrap();
        assert_eq!(
            result.device_name(),
            Some("No SNMP response received before timeout")
        );
        assert!(result.interfaces.is_empty());
    }

    #[tokio::test]
    async fn test_probe_status() {
        let connector = MockConnector::default().with_agent(A, agent("core-1", &[]));
        let poller = poller(connector);
        assert_eq!(
            poller.probe_status(&device("core-1", A, VendorKind::Huawei)).await.unwrap(),
            DeviceStatus::Online
        );
        assert_eq!(
            poller
                .probe_status(&device("ghost", Ipv4Addr::new(10, 0, 0, 9), VendorKind::Huawei))
                .await
                .unwrap(),
            DeviceStatus::Offline
        );
    }
}
