/*!
cruxwatch: network element inventory with SNMP discovery and bastion-hopping command
execution.

Structure:
- `data_aquisition`: SNMPv3 and interactive SSH transports, credential filtering.
- `network`: device records, vendor profiles, interfaces and adjacency edges.
- `poller`: cached SNMP identity/interface polling and status probes.
- `discovery`: LLDP/CDP neighbor discovery.
- `gateway`: command execution through a gateway network element.
- `topology`: the device registry and topology snapshots.
- `persistence`: network documents and the JSON store.
- `traps`: the SNMP trap listener.
- `manager`: every operator action behind one facade.
*/

pub mod config;
pub mod data_aquisition;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod manager;
pub mod network;
pub mod persistence;
pub mod poller;
pub mod topology;
pub mod traps;

pub use config::Config;
pub use error::{CoreError, CoreResult, Outcome};
pub use manager::NetworkManager;
