use std::net::Ipv4Addr;

use tracing::{debug, warn};

use crate::{
    data_aquisition::{
        core::{ObjectId, SnmpValue},
        snmp::{SnmpTableRow, ipv4_from_octets},
    },
    network::{
        device::{canonical_name, parse_ip},
        vendor::NeighborProtocol,
    },
    poller::{oid, oids},
};

/// A neighbor row that decoded to a usable name and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub name: String,
    pub ip: Ipv4Addr,
}

/// Columns walked for a neighbor protocol: name first, address second.
pub fn columns(protocol: NeighborProtocol) -> Vec<ObjectId> {
    match protocol {
        NeighborProtocol::Lldp => vec![oid(oids::LLDP_REM_SYS_NAME), oid(oids::LLDP_REM_MAN_ADDR)],
        NeighborProtocol::Cdp => vec![
            oid(oids::CDP_CACHE_DEVICE_ID),
            oid(oids::CDP_CACHE_ADDRESS),
        ],
    }
}

/// lldpRemManAddr carries the address in its index: the last four OID components.
fn lldp_address(row: &SnmpTableRow) -> Option<String> {
    let tail = row.oid(1)?.last_n(4)?;
    Some(
        tail.iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("."),
    )
}

/// cdpCacheAddress is four raw octets.
fn cdp_address(row: &SnmpTableRow) -> Option<String> {
    match row.value(1)? {
        SnmpValue::OctetString(bytes) => ipv4_from_octets(bytes).map(|ip| ip.to_string()),
        SnmpValue::IpAddress(ip) => Some(ip.to_string()),
        _ => None,
    }
}

/// Decode walked rows into neighbors. Rows with a missing name or an address that is
/// not a dotted quad are skipped and logged.
pub fn decode(protocol: NeighborProtocol, rows: &[SnmpTableRow]) -> Vec<Neighbor> {
    let mut neighbors = Vec::new();
    for row in rows {
        let name = row
            .value(0)
            .filter(|v| !v.is_missing())
            .map(|v| canonical_name(&v.as_text()))
            .unwrap_or_default();
        let address = match protocol {
            NeighborProtocol::Lldp => lldp_address(row),
            NeighborProtocol::Cdp => cdp_address(row),
        };
        debug!("Neighbor row: name {name:?}, address {address:?}");

        if name.is_empty() {
            warn!("Skipping neighbor row without a system name");
            continue;
        }
        let Some(ip) = address.as_deref().and_then(|a| parse_ip(a).ok()) else {
            warn!("Invalid or missing IP address for neighbor {name}: {address:?}");
            continue;
        };
        neighbors.push(Neighbor { name, ip });
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name_oid: &str, name: SnmpValue, addr_oid: &str, addr: SnmpValue) -> SnmpTableRow {
        SnmpTableRow {
            cells: vec![
                (name_oid.parse().unwrap(), name),
                (addr_oid.parse().unwrap(), addr),
            ],
        }
    }

    #[test]
    fn test_decode_lldp_takes_address_from_oid_tail() {
        let rows = vec![
            row(
                "1.0.8802.1.1.2.1.4.1.1.9.0.3.1",
                SnmpValue::OctetString(b"edge-2".to_vec()),
                "1.0.8802.1.1.2.1.4.2.1.4.0.3.1.1.4.10.0.0.2",
                SnmpValue::Integer(2),
            ),
            // index component out of octet range
            row(
                "1.0.8802.1.1.2.1.4.1.1.9.0.4.1",
                SnmpValue::OctetString(b"bogus".to_vec()),
                "1.0.8802.1.1.2.1.4.2.1.4.0.4.1.1.4.10.0.0.300",
                SnmpValue::Integer(2),
            ),
        ];
        assert_eq!(
            decode(NeighborProtocol::Lldp, &rows),
            vec![Neighbor {
                name: "edge-2".to_string(),
                ip: Ipv4Addr::new(10, 0, 0, 2),
            }]
        );
    }

    #[test]
    fn test_decode_cdp_raw_octets() {
        let rows = vec![
            row(
                "1.3.6.1.4.1.9.9.23.1.2.1.1.6.1.1",
                SnmpValue::OctetString(b"sw-3.lab".to_vec()),
                "1.3.6.1.4.1.9.9.23.1.2.1.1.4.1.1",
                SnmpValue::OctetString(vec![192, 168, 1, 3]),
            ),
            row(
                "1.3.6.1.4.1.9.9.23.1.2.1.1.6.2.1",
                SnmpValue::OctetString(b"sw-4.lab".to_vec()),
                "1.3.6.1.4.1.9.9.23.1.2.1.1.4.2.1",
                SnmpValue::OctetString(vec![192, 168, 1]),
            ),
            row(
                "1.3.6.1.4.1.9.9.23.1.2.1.1.6.3.1",
                SnmpValue::NoSuchValue,
                "1.3.6.1.4.1.9.9.23.1.2.1.1.4.3.1",
                SnmpValue::OctetString(vec![192, 168, 1, 5]),
            ),
        ];
        assert_eq!(
            decode(NeighborProtocol::Cdp, &rows),
            vec![Neighbor {
                name: "sw-3.lab".to_string(),
                ip: Ipv4Addr::new(192, 168, 1, 3),
            }]
        );
    }
}
