use std::{
    collections::{BTreeMap, BTreeSet},
    net::Ipv4Addr,
};

use serde::{Deserialize, Serialize};

use crate::network::{AdjacencyEdge, DeviceRecord, DeviceStatus, VendorKind};

/// Per-node attributes carried into the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub ip: Ipv4Addr,
    pub vendor: VendorKind,
    pub status: DeviceStatus,
    pub gne: Ipv4Addr,
}

impl From<&DeviceRecord> for NodeAttributes {
    fn from(device: &DeviceRecord) -> Self {
        Self {
            ip: device.management_ip,
            vendor: device.vendor,
            status: device.status,
            gne: device.gateway_ip,
        }
    }
}

/// Full topology of one logical network. Always rebuilt wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub network_name: String,
    pub nodes: BTreeMap<String, NodeAttributes>,
    pub edges: BTreeSet<AdjacencyEdge>,
}

impl TopologySnapshot {
    pub fn empty(network_name: &str) -> Self {
        Self {
            network_name: network_name.to_string(),
            ..Default::default()
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether `a` and `b` are adjacent, by any kind of edge.
    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        let wanted = AdjacencyEdge::discovered(a, b);
        self.edges.iter().any(|edge| edge.same_pair(&wanted))
    }

    pub fn neighbors<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges.iter().filter_map(move |edge| {
            if edge.a == name {
                Some(edge.b.as_str())
            } else if edge.b == name {
                Some(edge.a.as_str())
            } else {
                None
            }
        })
    }

    /// What changed going from `previous` to `self`.
    pub fn diff(&self, previous: &TopologySnapshot) -> SnapshotDiff {
        let names = |s: &TopologySnapshot| s.nodes.keys().cloned().collect::<BTreeSet<_>>();
        let (now, before) = (names(self), names(previous));
        SnapshotDiff {
            added_nodes: now.difference(&before).cloned().collect(),
            removed_nodes: before.difference(&now).cloned().collect(),
            added_edges: self.edges.difference(&previous.edges).cloned().collect(),
            removed_edges: previous.edges.difference(&self.edges).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub added_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    pub added_edges: Vec<AdjacencyEdge>,
    pub removed_edges: Vec<AdjacencyEdge>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}
