/*!
Neighbor discovery.

Walks the seed device's neighbor table (LLDP or CDP, chosen by its vendor profile), turns
each usable row into a device record reachable through the seed, and registers it unless
a device with the same management IP is already known. Discovery is best effort: a bad
row is skipped and a failed walk keeps whatever rows it already read.
*/

pub mod decode;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::CoreResult,
    network::{AdjacencyEdge, DeviceRecord},
    poller::SnmpPoller,
    topology::SharedRegistry,
};

pub use decode::Neighbor;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Records inserted by this run.
    pub added: Vec<DeviceRecord>,
    /// Every adjacency seen from the seed, including ones to already-known devices.
    pub edges: Vec<AdjacencyEdge>,
    pub skipped_rows: usize,
}

/// A new record for a neighbor first seen from `seed`.
fn neighbor_record(seed: &DeviceRecord, neighbor: &Neighbor) -> DeviceRecord {
    let mut record = DeviceRecord::new(
        &neighbor.name,
        seed.vendor,
        neighbor.ip,
        &seed.network_name,
        seed.ssh.clone(),
    )
    .with_gateway(seed.management_ip);
    record.site_name = seed.site_name.clone();
    record.delay_factor = seed.delay_factor;
    record
}

pub async fn discover(
    registry: &SharedRegistry,
    poller: &SnmpPoller,
    seed_name: &str,
) -> CoreResult<DiscoveryReport> {
    let seed = registry.lock().await.require(seed_name)?.clone();
    let protocol = seed.vendor.profile().neighbor_protocol();
    info!("Discovering neighbors of {} via {protocol:?}", seed.name);

    let walk = poller.walk(&seed, &decode::columns(protocol)).await?;
    if let Some(e) = &walk.error {
        warn!("Neighbor walk on {} ended early: {e}", seed.name);
    }
    let neighbors = decode::decode(protocol, &walk.rows);

    let mut report = DiscoveryReport {
        skipped_rows: walk.rows.len() - neighbors.len(),
        ..Default::default()
    };

    let mut registry = registry.lock().await;
    for neighbor in &neighbors {
        if neighbor.ip == seed.management_ip {
            continue;
        }
        let record = neighbor_record(&seed, neighbor);
        let (owner, added) = match registry.insert_if_new_ip(record.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                // name taken by a device at another address
                warn!("Not registering neighbor {} ({}): {e}", neighbor.name, neighbor.ip);
                report.skipped_rows += 1;
                continue;
            }
        };
        if added {
            info!("Registered {} at {} behind {}", owner, neighbor.ip, seed.management_ip);
            report.added.push(record);
        }
        if owner == seed.name {
            continue;
        }
        registry.add_edge(&seed.name, &owner);
        let edge = AdjacencyEdge::discovered(&seed.name, &owner);
        if !report.edges.contains(&edge) {
            report.edges.push(edge);
        }
    }
    drop(registry);

    info!(
        "Discovery from {}: {} new devices, {} adjacencies, {} rows skipped",
        seed.name,
        report.added.len(),
        report.edges.len(),
        report.skipped_rows
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, sync::Arc};

    use super::*;
    use crate::{
        data_aquisition::{
            core::SnmpValue,
            snmp::mock::{MockAgent, MockConnector},
        },
        network::VendorKind,
        poller::{PollerSettings, fixtures::device, oids},
        topology::DeviceRegistry,
    };

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn lldp_agent(neighbors: &[(&str, Ipv4Addr)]) -> MockAgent {
        let mut agent = MockAgent::default();
        for (i, (name, ip)) in neighbors.iter().enumerate() {
            let index = format!("0.{}.1", i + 1);
            agent = agent
                .with(
                    &format!("{}.{index}", oids::LLDP_REM_SYS_NAME),
                    SnmpValue::OctetString(name.as_bytes().to_vec()),
                )
                .with(
                    &format!("{}.{index}.1.4.{ip}", oids::LLDP_REM_MAN_ADDR),
                    SnmpValue::Integer(2),
                );
        }
        agent
    }

    async fn setup(agents: MockConnector) -> (SharedRegistry, SnmpPoller) {
        let mut registry = DeviceRegistry::new();
        registry.insert(device("A", A, VendorKind::Huawei)).unwrap();
        (
            registry.shared(),
            SnmpPoller::new(Arc::new(agents), PollerSettings::default()),
        )
    }

    #[tokio::test]
    async fn test_lldp_neighbor_registered_behind_seed() {
        let connector = MockConnector::default().with_agent(A, lldp_agent(&[("B", B)]));
        let (registry, poller) = setup(connector).await;

        let report = discover(&registry, &poller, "A").await.unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.edges, vec![AdjacencyEdge::discovered("A", "B")]);

        let registry = registry.lock().await;
        let b = registry.get("B").unwrap();
        assert_eq!(b.management_ip, B);
        assert_eq!(b.gateway_ip, A);
        assert_eq!(b.ssh.username, "admin");
        assert_eq!(b.network_name, "lab");
    }

    #[tokio::test]
    async fn test_repeated_discovery_never_duplicates_ip() {
        // B is already known under its configured name; LLDP reports another
        let connector =
            MockConnector::default().with_agent(A, lldp_agent(&[("B-lldp", B), ("A", A)]));
        let (registry, poller) = setup(connector).await;
        registry
            .lock()
            .await
            .insert(device("B", B, VendorKind::Huawei))
            .unwrap();

        let first = discover(&registry, &poller, "A").await.unwrap();
        let second = discover(&registry, &poller, "A").await.unwrap();

        assert!(first.added.is_empty());
        assert!(second.added.is_empty());
        assert_eq!(first.edges, vec![AdjacencyEdge::discovered("A", "B")]);

        let registry = registry.lock().await;
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.edges().count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_seed_yields_empty_report() {
        let (registry, poller) = setup(MockConnector::default()).await;
        let report = discover(&registry, &poller, "A").await.unwrap();
        assert!(report.added.is_empty());
        assert!(report.edges.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_seed() {
        let (registry, poller) = setup(MockConnector::default()).await;
        assert!(discover(&registry, &poller, "Z").await.is_err());
    }
}
