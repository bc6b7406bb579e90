/*!
Operation facade.

`NetworkManager` owns the shared registry, the poller, the gateway executor and the document
store, and exposes every operator action as one async method returning a tagged
[`Outcome`]. Each action that changes what is known about a network ends by rebuilding that
network's topology snapshot from scratch.
*/

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::Ipv4Addr,
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    data_aquisition::{
        credentials::{SshParams, ssh_params_for},
        snmp::{Snmp2Connector, SnmpConnector, UsmProtocols},
        ssh::ShellConnector,
    },
    discovery::{self, DiscoveryReport},
    error::{CoreError, CoreResult, Outcome, ValidationError},
    gateway::{ExecOutput, GatewayExecutor},
    network::{
        DeviceRecord, DeviceStatus, PollResult, SnmpCredentials, SshCredentials, VendorKind,
        device::{canonical_name, parse_ip},
    },
    persistence::{JsonFileStore, NetworkDocument, NetworkStore},
    poller::SnmpPoller,
    topology::{self, DeviceRegistry, SharedRegistry, TopologySnapshot},
};

/// Operator input for a new device.
#[derive(Debug, Clone, Deserialize)]
pub struct AddDeviceRequest {
    #[serde(rename = "device_name")]
    pub name: String,
    #[serde(rename = "device_type")]
    pub vendor: String,
    pub ip: String,
    pub network_name: String,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(flatten)]
    pub ssh: SshCredentials,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceList {
    pub devices: Vec<DeviceRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub network_name: String,
    pub elements: usize,
}

pub struct NetworkManager {
    registry: SharedRegistry,
    poller: SnmpPoller,
    executor: GatewayExecutor,
    store: Arc<dyn NetworkStore>,
    snapshots: Mutex<HashMap<String, TopologySnapshot>>,
    config: Config,
}

impl NetworkManager {
    pub fn new(
        config: Config,
        snmp: Arc<dyn SnmpConnector>,
        shell: Arc<dyn ShellConnector>,
        store: Arc<dyn NetworkStore>,
    ) -> Self {
        Self {
            registry: DeviceRegistry::new().shared(),
            poller: SnmpPoller::new(snmp, config.poller_settings()),
            executor: GatewayExecutor::new(shell, config.executor_settings()),
            store,
            snapshots: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Real transports and a JSON store under the configured data directory.
    pub fn from_config(config: Config) -> Self {
        let shell = Arc::new(config.ssh_connector());
        let store = Arc::new(JsonFileStore::new(config.data_dir.clone()));
        Self::new(config, Arc::new(Snmp2Connector), shell, store)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Rebuild, remember and return the snapshot of one network.
    async fn refresh(&self, network_name: &str) -> TopologySnapshot {
        let snapshot = topology::build(&*self.registry.lock().await, network_name);
        let mut snapshots = self.snapshots.lock().await;
        if let Some(previous) = snapshots.get(network_name) {
            let diff = snapshot.diff(previous);
            if !diff.is_empty() {
                info!(
                    "Topology of {network_name} changed: +{}/-{} nodes, +{}/-{} edges",
                    diff.added_nodes.len(),
                    diff.removed_nodes.len(),
                    diff.added_edges.len(),
                    diff.removed_edges.len()
                );
            }
        }
        snapshots.insert(network_name.to_string(), snapshot.clone());
        snapshot
    }

    async fn device(&self, name: &str) -> CoreResult<DeviceRecord> {
        Ok(self.registry.lock().await.require(name)?.clone())
    }

    fn ssh_params(&self, device: &DeviceRecord) -> CoreResult<SshParams> {
        Ok(ssh_params_for(device, self.config.session_log_for(&device.name))?)
    }

    pub async fn devices(&self, network_name: Option<&str>) -> Outcome<DeviceList> {
        let registry = self.registry.lock().await;
        let devices = registry
            .devices()
            .filter(|d| network_name.is_none_or(|n| d.network_name == n))
            .cloned()
            .collect();
        Outcome::Success(DeviceList { devices })
    }

    pub async fn add_device(&self, request: AddDeviceRequest) -> Outcome<DeviceRecord> {
        self.try_add_device(request).await.into()
    }

    async fn try_add_device(&self, request: AddDeviceRequest) -> CoreResult<DeviceRecord> {
        let ip = parse_ip(&request.ip)?;
        let vendor: VendorKind = request.vendor.parse()?;
        let name = canonical_name(&request.name);
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.registry.lock().await.get(&name).is_some() {
            return Err(ValidationError::DuplicateName(name).into());
        }

        let mut record = DeviceRecord::new(&name, vendor, ip, &request.network_name, request.ssh);
        record.site_name = request.site_name;
        let params = self.ssh_params(&record)?;
        self.executor.probe_login(params).await?;
        record.status = DeviceStatus::Online;

        self.registry.lock().await.insert(record.clone())?;
        info!("Added {} ({ip}) to {}", record.name, record.network_name);
        self.refresh(&record.network_name).await;
        Ok(record)
    }

    /// Replace a device's SNMP credentials (and optionally its address), poll it afresh
    /// and return its basic identity.
    pub async fn set_snmp(
        &self,
        name: &str,
        snmp: SnmpCredentials,
        new_ip: Option<&str>,
    ) -> Outcome<BTreeMap<String, String>> {
        self.try_set_snmp(name, snmp, new_ip).await.into()
    }

    async fn try_set_snmp(
        &self,
        name: &str,
        snmp: SnmpCredentials,
        new_ip: Option<&str>,
    ) -> CoreResult<BTreeMap<String, String>> {
        let new_ip = new_ip.map(parse_ip).transpose()?;
        UsmProtocols::resolve(
            snmp.auth_protocol.as_deref().unwrap_or_default(),
            snmp.priv_protocol.as_deref().unwrap_or_default(),
        )?;

        let device = {
            let mut registry = self.registry.lock().await;
            self.poller.invalidate(registry.require(name)?.management_ip);
            if let Some(ip) = new_ip {
                let previous = registry.change_ip(name, ip)?;
                if previous != ip {
                    info!("Moved {} from {previous} to {ip}", canonical_name(name));
                }
            }
            let device = registry
                .get_mut(name)
                .ok_or_else(|| CoreError::DeviceNotFound(canonical_name(name)))?;
            device.snmp = snmp;
            device.clone()
        };
        self.poller.invalidate(device.management_ip);

        let result = self.poller.poll(&device).await?;
        let identity = result.basic_identity();
        self.registry.lock().await.record_poll(&device.name, result);
        self.refresh(&device.network_name).await;
        Ok(identity)
    }

    pub async fn poll(&self, name: &str) -> Outcome<PollResult> {
        self.try_poll(name).await.into()
    }

    async fn try_poll(&self, name: &str) -> CoreResult<PollResult> {
        let device = self.device(name).await?;
        let result = self.poller.poll(&device).await?;
        self.registry
            .lock()
            .await
            .record_poll(&device.name, result.clone());
        self.refresh(&device.network_name).await;
        Ok(result)
    }

    pub async fn discover(&self, seed_name: &str) -> Outcome<DiscoveryReport> {
        self.try_discover(seed_name).await.into()
    }

    async fn try_discover(&self, seed_name: &str) -> CoreResult<DiscoveryReport> {
        let report = discovery::discover(&self.registry, &self.poller, seed_name).await?;
        let network_name = self.device(seed_name).await?.network_name;
        self.refresh(&network_name).await;
        Ok(report)
    }

    /// Run `command` on a device, through its gateway.
    pub async fn execute(&self, name: &str, command: &str) -> Outcome<ExecOutput> {
        self.run_on(name, |_| command.to_string(), self.config.read_timeout)
            .await
            .into()
    }

    /// Fetch the running configuration with the vendor's dump command.
    pub async fn query_config(&self, name: &str) -> Outcome<ExecOutput> {
        self.run_on(
            name,
            |device| device.vendor.profile().config_dump_command().to_string(),
            self.config.config_read_timeout,
        )
        .await
        .into()
    }

    async fn run_on(
        &self,
        name: &str,
        command: impl FnOnce(&DeviceRecord) -> String,
        read_timeout: Duration,
    ) -> CoreResult<ExecOutput> {
        let (target, gateway) = {
            let registry = self.registry.lock().await;
            let target = registry.require(name)?.clone();
            let gateway = registry.resolve_gateway(&target)?.clone();
            (target, gateway)
        };
        let command = command(&target);
        debug!("Resolved gateway of {} to {}", target.name, gateway.name);
        let output = self
            .executor
            .execute(
                self.ssh_params(&gateway)?,
                self.ssh_params(&target)?,
                &command,
                read_timeout,
            )
            .await?;
        Ok(output)
    }

    /// Probe every device (optionally of one network) and update statuses in place.
    pub async fn check_statuses(
        &self,
        network_name: Option<&str>,
    ) -> Outcome<BTreeMap<String, DeviceStatus>> {
        let devices: Vec<DeviceRecord> = {
            let registry = self.registry.lock().await;
            registry
                .devices()
                .filter(|d| network_name.is_none_or(|n| d.network_name == n))
                .cloned()
                .collect()
        };

        let mut statuses = BTreeMap::new();
        for device in &devices {
            let status = match self.poller.probe_status(device).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Cannot probe {}: {e}", device.name);
                    DeviceStatus::Offline
                }
            };
            statuses.insert(device.name.clone(), status);
        }

        let mut networks: Vec<&str> = Vec::new();
        {
            let mut registry = self.registry.lock().await;
            for device in &devices {
                if let Some(status) = statuses.get(&device.name) {
                    registry.set_status(&device.name, *status);
                }
                if !networks.contains(&device.network_name.as_str()) {
                    networks.push(&device.network_name);
                }
            }
        }
        for network in networks {
            self.refresh(network).await;
        }
        Outcome::Success(statuses)
    }

    /// Switch the active network: clear the registry and repopulate it from storage.
    pub async fn load_network(&self, network_name: &str) -> Outcome<TopologySnapshot> {
        self.try_load_network(network_name).await.into()
    }

    async fn try_load_network(&self, network_name: &str) -> CoreResult<TopologySnapshot> {
        let store = self.store.clone();
        let name = network_name.to_string();
        let document = tokio::task::spawn_blocking(move || store.load(&name))
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))??
            .ok_or_else(|| CoreError::NetworkNotFound(network_name.to_string()))?;

        let records = document.records();
        let edges = document
            .topo_data
            .iter()
            .flat_map(|snapshot| snapshot.edges.iter())
            .filter(|edge| edge.kind == crate::network::EdgeKind::Discovered)
            .cloned()
            .collect::<Vec<_>>();
        {
            let mut registry = self.registry.lock().await;
            registry.replace_all(records, edges)?;
            for (name, poll) in document.polls() {
                registry.record_poll(name, poll.clone());
            }
            let gateways: HashSet<Ipv4Addr> = registry.devices().map(|d| d.gateway_ip).collect();
            self.executor.retain_gateways(|ip| gateways.contains(&ip));
        }

        let snapshot = match document.topo_data {
            Some(stored) => stored,
            None => topology::build(&*self.registry.lock().await, network_name),
        };
        let mut snapshots = self.snapshots.lock().await;
        snapshots.clear();
        snapshots.insert(network_name.to_string(), snapshot.clone());
        info!(
            "Loaded network {network_name}: {} devices, {} edges",
            snapshot.node_count(),
            snapshot.edge_count()
        );
        Ok(snapshot)
    }

    /// Upsert the network's devices and latest snapshot into storage.
    pub async fn save_network(&self, network_name: &str) -> Outcome<SaveReport> {
        self.try_save_network(network_name).await.into()
    }

    async fn try_save_network(&self, network_name: &str) -> CoreResult<SaveReport> {
        let snapshot = self.current_snapshot(network_name).await;
        let document = {
            let registry = self.registry.lock().await;
            NetworkDocument::from_devices(
                network_name,
                registry.devices_in_network(network_name),
                Some(snapshot),
            )
            .with_polls(|name| registry.poll_result(name))
        };
        let elements = document.elements.len()
            + document.sites.iter().map(|s| s.elements.len()).sum::<usize>();

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.upsert(&document))
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))??;
        Ok(SaveReport {
            network_name: network_name.to_string(),
            elements,
        })
    }

    async fn current_snapshot(&self, network_name: &str) -> TopologySnapshot {
        let known = self.snapshots.lock().await.get(network_name).cloned();
        match known {
            Some(snapshot) => snapshot,
            None => self.refresh(network_name).await,
        }
    }

    /// Latest snapshot of a network, built on first request.
    pub async fn topology(&self, network_name: &str) -> Outcome<TopologySnapshot> {
        Outcome::Success(self.current_snapshot(network_name).await)
    }
}
