/*
 * This module defines the inventory data model shared by polling, discovery,
 * gateway execution and topology building.
 */

pub mod device;
pub mod edge;
pub mod interface;
pub mod vendor;

pub use device::{DeviceRecord, DeviceStatus, SnmpCredentials, SshCredentials, VendorKind};
pub use edge::{AdjacencyEdge, EdgeKind};
pub use interface::{InterfaceSample, OperStatus, PollResult};
