/*!
Storage schema and the JSON document store.

A saved network is one document: root-level elements, per-site elements and the last
topology snapshot. Each element also keeps its last SNMP poll, so subnet inference still sees
the interfaces of devices polled in earlier sessions. Elements use the storage field names (`ne_name`, `ne_make`, `ne_ip`, ...)
and a stable `ne_id` derived from the network and device names.
*/

use std::{
    collections::BTreeMap,
    fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::CoreError,
    network::{DeviceRecord, DeviceStatus, PollResult, SnmpCredentials, SshCredentials, VendorKind},
    topology::TopologySnapshot,
};

#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("Malformed network document {path}: {reason}")]
    Format { path: String, reason: String },
}

impl From<PersistenceError> for CoreError {
    fn from(e: PersistenceError) -> Self {
        CoreError::Persistence(e.to_string())
    }
}

/// One device in storage form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredElement {
    pub ne_id: Uuid,
    pub ne_name: String,
    pub ne_make: VendorKind,
    pub ne_ip: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gne: Option<Ipv4Addr>,
    #[serde(flatten)]
    pub ssh: SshCredentials,
    #[serde(flatten)]
    pub snmp: SnmpCredentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<PollResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSite {
    pub site_name: String,
    #[serde(default)]
    pub elements: Vec<StoredElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDocument {
    pub network_id: Uuid,
    pub network_name: String,
    #[serde(default)]
    pub sites: Vec<StoredSite>,
    #[serde(default)]
    pub elements: Vec<StoredElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topo_data: Option<TopologySnapshot>,
}

pub fn element_id(network_name: &str, device_name: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{network_name}/{device_name}").as_bytes(),
    )
}

pub fn network_id(network_name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, network_name.as_bytes())
}

impl StoredElement {
    pub fn from_record(device: &DeviceRecord) -> Self {
        Self {
            ne_id: element_id(&device.network_name, &device.name),
            ne_name: device.name.clone(),
            ne_make: device.vendor,
            ne_ip: device.management_ip,
            gne: Some(device.gateway_ip),
            ssh: device.ssh.clone(),
            snmp: device.snmp.clone(),
            last_poll: None,
        }
    }

    /// Back to a registry record. Liveness is unknown until probed, so loaded devices
    /// start offline.
    pub fn to_record(&self, network_name: &str, site_name: Option<&str>) -> DeviceRecord {
        let mut record = DeviceRecord::new(
            &self.ne_name,
            self.ne_make,
            self.ne_ip,
            network_name,
            self.ssh.clone(),
        )
        .with_snmp(self.snmp.clone())
        .with_gateway(self.gne.unwrap_or(self.ne_ip));
        record.status = DeviceStatus::Offline;
        record.site_name = site_name.map(str::to_string);
        record
    }
}

impl NetworkDocument {
    pub fn empty(network_name: &str) -> Self {
        Self {
            network_id: network_id(network_name),
            network_name: network_name.to_string(),
            sites: Vec::new(),
            elements: Vec::new(),
            topo_data: None,
        }
    }

    /// Flatten device records into a document; devices with a site go under that site.
    pub fn from_devices<'a>(
        network_name: &str,
        devices: impl IntoIterator<Item = &'a DeviceRecord>,
        snapshot: Option<TopologySnapshot>,
    ) -> Self {
        let mut document = Self::empty(network_name);
        let mut sites: BTreeMap<String, Vec<StoredElement>> = BTreeMap::new();
        for device in devices {
            let element = StoredElement::from_record(device);
            match &device.site_name {
                Some(site) => sites.entry(site.clone()).or_default().push(element),
                None => document.elements.push(element),
            }
        }
        document.sites = sites
            .into_iter()
            .map(|(site_name, elements)| StoredSite {
                site_name,
                elements,
            })
            .collect();
        document.topo_data = snapshot;
        document
    }

    fn elements_mut(&mut self) -> impl Iterator<Item = &mut StoredElement> {
        self.sites
            .iter_mut()
            .flat_map(|site| site.elements.iter_mut())
            .chain(self.elements.iter_mut())
    }

    /// Attach each element's last poll, looked up by device name.
    pub fn with_polls<'a>(mut self, lookup: impl Fn(&str) -> Option<&'a PollResult>) -> Self {
        for element in self.elements_mut() {
            element.last_poll = lookup(&element.ne_name).cloned();
        }
        self
    }

    /// (device name, last poll) for every element that has one.
    pub fn polls(&self) -> impl Iterator<Item = (&str, &PollResult)> {
        self.sites
            .iter()
            .flat_map(|site| site.elements.iter())
            .chain(self.elements.iter())
            .filter_map(|e| e.last_poll.as_ref().map(|poll| (e.ne_name.as_str(), poll)))
    }

    /// Every element as a device record, site elements first.
    pub fn records(&self) -> Vec<DeviceRecord> {
        let sited = self.sites.iter().flat_map(|site| {
            site.elements
                .iter()
                .map(|e| e.to_record(&self.network_name, Some(&site.site_name)))
        });
        let root = self
            .elements
            .iter()
            .map(|e| e.to_record(&self.network_name, None));
        sited.chain(root).collect()
    }
}

pub trait NetworkStore: Send + Sync {
    fn load(&self, network_name: &str) -> Result<Option<NetworkDocument>, PersistenceError>;

    /// Insert or replace the document keyed by its network name.
    fn upsert(&self, document: &NetworkDocument) -> Result<(), PersistenceError>;

    fn list(&self) -> Result<Vec<String>, PersistenceError>;
}

/// One pretty-printed JSON file per network under a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, network_name: &str) -> PathBuf {
        let file: String = network_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl NetworkStore for JsonFileStore {
    fn load(&self, network_name: &str) -> Result<Option<NetworkDocument>, PersistenceError> {
        let path = self.path_for(network_name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let document = serde_json::from_str(&text).map_err(|e| PersistenceError::Format {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!("Loaded network document {}", path.display());
        Ok(Some(document))
    }

    fn upsert(&self, document: &NetworkDocument) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let path = self.path_for(&document.network_name);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(document).map_err(|e| PersistenceError::Format {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&tmp, text).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        info!("Saved network {} to {}", document.network_name, path.display());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(document) = fs::read_to_string(&path)
                    .ok()
                    .and_then(|text| serde_json::from_str::<NetworkDocument>(&text).ok())
                {
                    names.push(document.network_name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
