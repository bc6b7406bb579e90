/*!
Topology module

This module owns the device registry and turns its contents into topology snapshots.

Structure:
- `store`: The `DeviceRegistry` (devices, discovered adjacencies, latest poll results)
           and the `SharedRegistry` handle every component locks.
- `builder`: Full recomputation of one network's graph: discovered edges plus
             adjacency inferred from interface addresses sharing a /30.
- `snapshot`: The resulting `TopologySnapshot` and snapshot diffs.
*/

pub mod builder;
pub mod snapshot;
pub mod store;

pub use builder::build;
pub use snapshot::{NodeAttributes, SnapshotDiff, TopologySnapshot};
pub use store::{DeviceRegistry, SharedRegistry};
