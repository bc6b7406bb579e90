use std::{collections::BTreeMap, net::Ipv4Addr};

use ipnetwork::Ipv4Network;
use petgraph::{
    graph::{NodeIndex, UnGraph},
    visit::EdgeRef,
};
use tracing::debug;

use crate::{
    network::{AdjacencyEdge, DeviceRecord, EdgeKind},
    topology::{
        snapshot::{NodeAttributes, TopologySnapshot},
        store::DeviceRegistry,
    },
};

/// Prefix length assumed for point-to-point links when inferring adjacency.
pub const INFERRED_PREFIX: u8 = 30;

/// Whether two distinct addresses fall in the same /30.
pub fn same_inferred_subnet(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    if a == b {
        return false;
    }
    match (
        Ipv4Network::new(a, INFERRED_PREFIX),
        Ipv4Network::new(b, INFERRED_PREFIX),
    ) {
        (Ok(net_a), Ok(net_b)) => net_a.network() == net_b.network(),
        _ => false,
    }
}

/// Build the full topology of `network_name` from the registry.
///
/// Nodes are the devices of that network. Discovered edges are kept when both ends are
/// present; an inferred edge is added for every device pair with interface addresses in
/// a shared /30, unless the pair is already connected.
pub fn build(registry: &DeviceRegistry, network_name: &str) -> TopologySnapshot {
    let devices: Vec<&DeviceRecord> = registry.devices_in_network(network_name).collect();

    let mut graph: UnGraph<String, EdgeKind> = UnGraph::new_undirected();
    let mut index: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    for device in &devices {
        let idx = graph.add_node(device.name.clone());
        index.insert(device.name.as_str(), idx);
    }

    for edge in registry.edges() {
        if let (Some(&a), Some(&b)) = (index.get(edge.a.as_str()), index.get(edge.b.as_str())) {
            graph.update_edge(a, b, EdgeKind::Discovered);
        }
    }

    let addresses: Vec<Vec<Ipv4Addr>> = devices
        .iter()
        .map(|device| {
            registry
                .poll_result(&device.name)
                .map(|poll| poll.addresses().collect())
                .unwrap_or_default()
        })
        .collect();

    for (i, left) in devices.iter().enumerate() {
        for (j, right) in devices.iter().enumerate().skip(i + 1) {
            let shares_subnet = addresses[i]
                .iter()
                .any(|a| addresses[j].iter().any(|b| same_inferred_subnet(*a, *b)));
            if !shares_subnet {
                continue;
            }
            let (a, b) = (index[left.name.as_str()], index[right.name.as_str()]);
            if graph.find_edge(a, b).is_none() {
                debug!("Inferred link {} -- {}", left.name, right.name);
                graph.add_edge(a, b, EdgeKind::Inferred);
            }
        }
    }

    TopologySnapshot {
        network_name: network_name.to_string(),
        nodes: devices
            .iter()
            .map(|device| (device.name.clone(), NodeAttributes::from(*device)))
            .collect(),
        edges: graph
            .edge_references()
            .map(|e| AdjacencyEdge::new(&graph[e.source()], &graph[e.target()], *e.weight()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::network::{
        InterfaceSample, OperStatus, PollResult, SshCredentials, VendorKind,
    };
    use pretty_assertions::assert_eq;

    fn device(name: &str, last: u8, network: &str) -> DeviceRecord {
        DeviceRecord::new(
            name,
            VendorKind::Huawei,
            Ipv4Addr::new(10, 0, 0, last),
            network,
            SshCredentials::new("admin", "pw"),
        )
    }

    fn poll(addresses: &[Ipv4Addr]) -> PollResult {
        PollResult {
            identity: BTreeMap::new(),
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

    #[test]
    fn test_same_inferred_subnet() {
        assert!(same_inferred_subnet(Ipv4Addr::new(10, 1, 1, 1), Ipv4Addr::new(10, 1, 1, 2)));
        assert!(!same_inferred_subnet(Ipv4Addr::new(10, 1, 1, 2), Ipv4Addr::new(10, 1, 1, 5)));
        assert!(!same_inferred_subnet(Ipv4Addr::new(10, 1, 1, 1), Ipv4Addr::new(10, 1, 1, 1)));
    }

    #[test]
    fn test_inferred_edge_without_discovery() {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("a", 1, "lab")).unwrap();
        registry.insert(device("b", 2, "lab")).unwrap();
        registry.record_poll("a", poll(&[Ipv4Addr::new(10, 1, 1, 1)]));
        registry.record_poll("b", poll(&[Ipv4Addr::new(10, 1, 1, 2)]));

        let snapshot = build(&registry, "lab");
        assert_eq!(snapshot.node_count(), 2);
        assert_eq!(
            snapshot.edges.iter().cloned().collect::<Vec<_>>(),
            vec![AdjacencyEdge::inferred("a", "b")]
        );
    }

    #[test]
    fn test_discovered_edge_wins_over_inferred() {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("a", 1, "lab")).unwrap();
        registry.insert(device("b", 2, "lab")).unwrap();
        registry.add_edge("b", "a");
        registry.record_poll("a", poll(&[Ipv4Addr::new(10, 1, 1, 1)]));
        registry.record_poll("b", poll(&[Ipv4Addr::new(10, 1, 1, 2)]));

        let snapshot = build(&registry, "lab");
        assert_eq!(snapshot.edge_count(), 1);
        assert!(snapshot.edges.contains(&AdjacencyEdge::discovered("a", "b")));
    }

    #[test]
    fn test_filters_by_network() {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("a", 1, "lab")).unwrap();
        registry.insert(device("b", 2, "prod")).unwrap();
        registry.add_edge("a", "b");

        let snapshot = build(&registry, "lab");
        assert_eq!(snapshot.nodes.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(snapshot.edge_count(), 0);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut registry = DeviceRegistry::new();
        for (name, last) in [("a", 1), ("b", 2), ("c", 3)] {
            registry.insert(device(name, last, "lab")).unwrap();
        }
        registry.add_edge("a", "c");
        registry.record_poll("b", poll(&[Ipv4Addr::new(172, 16, 0, 5)]));
        registry.record_poll("c", poll(&[Ipv4Addr::new(172, 16, 0, 6)]));

        assert_eq!(build(&registry, "lab"), build(&registry, "lab"));
    }
}
