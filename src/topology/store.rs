/*!
This module provides the device registry: the single owner of every known device record,
the discovered adjacencies between them, and the latest poll result of each device.

This module defines:
- `DeviceRegistry`: name-keyed records plus the adjacency and poll maps.
- `SharedRegistry`: the registry behind an async mutex, handed to every component.

Callers lock, copy out what they need, and unlock before any network I/O.
*/

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    net::Ipv4Addr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    error::{CoreError, SessionError, ValidationError},
    network::{
        AdjacencyEdge, DeviceRecord, DeviceStatus, PollResult,
        device::canonical_name,
    },
};

pub type SharedRegistry = Arc<Mutex<DeviceRegistry>>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, DeviceRecord>,
    edges: BTreeSet<AdjacencyEdge>,
    #[serde(skip)]
    polls: HashMap<String, PollResult>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DeviceRecord> {
        self.devices.get(&canonical_name(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(&canonical_name(name))
    }

    pub fn require(&self, name: &str) -> Result<&DeviceRecord, CoreError> {
        self.get(name)
            .ok_or_else(|| CoreError::DeviceNotFound(canonical_name(name)))
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn devices_in_network<'a>(
        &'a self,
        network_name: &'a str,
    ) -> impl Iterator<Item = &'a DeviceRecord> + 'a {
        self.devices
            .values()
            .filter(move |d| d.network_name == network_name)
    }

    pub fn find_by_ip(&self, ip: Ipv4Addr) -> Option<&DeviceRecord> {
        self.devices.values().find(|d| d.management_ip == ip)
    }

    /// The bastion for `device`: the registered device whose management IP is the
    /// record's gateway IP.
    pub fn resolve_gateway(&self, device: &DeviceRecord) -> Result<&DeviceRecord, SessionError> {
        self.find_by_ip(device.gateway_ip)
            .ok_or_else(|| SessionError::GatewayNotFound(device.gateway_ip.to_string()))
    }

    /// Insert a new record. Names are unique after trimming.
    pub fn insert(&mut self, mut record: DeviceRecord) -> Result<(), ValidationError> {
        record.name = canonical_name(&record.name);
        if record.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.devices.contains_key(&record.name) {
            return Err(ValidationError::DuplicateName(record.name));
        }
        self.devices.insert(record.name.clone(), record);
        Ok(())
    }

    /// Insert unless a record already owns the same management IP.
    /// Returns the name of the device owning the IP afterwards.
    pub fn insert_if_new_ip(&mut self, record: DeviceRecord) -> Result<(String, bool), ValidationError> {
        if let Some(existing) = self.find_by_ip(record.management_ip) {
            return Ok((existing.name.clone(), false));
        }
        let name = canonical_name(&record.name);
        self.insert(record)?;
        Ok((name, true))
    }

    /// Move a device to a new management IP. Devices reached through the old address
    /// follow it. Returns the previous address.
    pub fn change_ip(&mut self, name: &str, ip: Ipv4Addr) -> Result<Ipv4Addr, CoreError> {
        let name = canonical_name(name);
        if let Some(owner) = self.find_by_ip(ip).filter(|d| d.name != name) {
            return Err(ValidationError::DuplicateIp {
                ip: ip.to_string(),
                owner: owner.name.clone(),
            }
            .into());
        }
        let device = self
            .devices
            .get_mut(&name)
            .ok_or_else(|| CoreError::DeviceNotFound(name.clone()))?;
        let previous = std::mem::replace(&mut device.management_ip, ip);
        if previous != ip {
            for dependant in self.devices.values_mut().filter(|d| d.gateway_ip == previous) {
                dependant.gateway_ip = ip;
            }
        }
        Ok(previous)
    }

    /// Record a discovered adjacency. Self-loops are ignored.
    pub fn add_edge(&mut self, a: &str, b: &str) -> bool {
        let edge = AdjacencyEdge::discovered(&canonical_name(a), &canonical_name(b));
        if edge.is_loop() {
            return false;
        }
        self.edges.insert(edge)
    }

    pub fn edges(&self) -> impl Iterator<Item = &AdjacencyEdge> {
        self.edges.iter()
    }

    pub fn record_poll(&mut self, name: &str, result: PollResult) {
        self.polls.insert(canonical_name(name), result);
    }

    pub fn poll_result(&self, name: &str) -> Option<&PollResult> {
        self.polls.get(&canonical_name(name))
    }

    pub fn set_status(&mut self, name: &str, status: DeviceStatus) -> bool {
        match self.get_mut(name) {
            Some(device) => {
                device.status = status;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.edges.clear();
        self.polls.clear();
    }

    /// Clear everything, then repopulate. Never merges with the previous contents.
    pub fn replace_all(
        &mut self,
        records: impl IntoIterator<Item = DeviceRecord>,
        edges: impl IntoIterator<Item = AdjacencyEdge>,
    ) -> Result<(), ValidationError> {
        self.clear();
        for record in records {
            self.insert(record)?;
        }
        for edge in edges {
            self.add_edge(&edge.a, &edge.b);
        }
        Ok(())
    }
}
