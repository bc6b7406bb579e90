/*!
Vendor strategies.

Each supported vendor family is a unit struct implementing [`VendorProfile`]; a
[`VendorKind`](crate::network::device::VendorKind) hands out the matching profile so no
caller ever inspects the vendor string itself.
*/

use std::{net::Ipv4Addr, time::Duration};

use crate::{
    data_aquisition::{snmp::SnmpPolicy, ssh::PromptPattern},
    network::device::VendorKind,
};

/// Which SNMP neighbor table a vendor populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborProtocol {
    Lldp,
    Cdp,
}

/// How a session is elevated to privileged mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elevation {
    pub command: &'static str,
    /// Substring that shows the device wants the secret.
    pub password_prompt: &'static str,
    /// Elevate even when no secret is declared (answering an empty line if asked).
    pub always: bool,
}

pub trait VendorProfile: Send + Sync {
    fn kind(&self) -> VendorKind;

    fn neighbor_protocol(&self) -> NeighborProtocol;

    /// Timeout / retry policy for identity and table polling.
    fn snmp_policy(&self) -> SnmpPolicy;

    fn paging_disable_command(&self) -> &'static str;

    fn prompt_pattern(&self) -> PromptPattern {
        PromptPattern::unprivileged_or_privileged()
    }

    /// Command opening a secure nested session to a peer, or `None` when the
    /// family is always reached directly.
    fn tunnel_command(&self, target: Ipv4Addr) -> Option<String>;

    fn elevation(&self) -> Elevation;

    fn config_dump_command(&self) -> &'static str;

    fn exit_command(&self) -> &'static str {
        "quit"
    }

    /// Read timeout for an ordinary command on this family.
    fn command_read_timeout(&self, default: Duration) -> Duration {
        default
    }
}

pub struct Huawei;

impl VendorProfile for Huawei {
    fn kind(&self) -> VendorKind {
        VendorKind::Huawei
    }

    fn neighbor_protocol(&self) -> NeighborProtocol {
        NeighborProtocol::Lldp
    }

    // VRP agents answer slowly under load
    fn snmp_policy(&self) -> SnmpPolicy {
        SnmpPolicy::new(Duration::from_secs(15), 10)
    }

    fn paging_disable_command(&self) -> &'static str {
        "screen-length 0 temporary"
    }

    fn tunnel_command(&self, target: Ipv4Addr) -> Option<String> {
        Some(format!("stelnet {target}"))
    }

    fn elevation(&self) -> Elevation {
        Elevation {
            command: "super",
            password_prompt: "Password",
            always: false,
        }
    }

    fn config_dump_command(&self) -> &'static str {
        "display current-configuration"
    }
}

pub struct CiscoIos;

impl VendorProfile for CiscoIos {
    fn kind(&self) -> VendorKind {
        VendorKind::CiscoIos
    }

    fn neighbor_protocol(&self) -> NeighborProtocol {
        NeighborProtocol::Cdp
    }

    fn snmp_policy(&self) -> SnmpPolicy {
        SnmpPolicy::new(Duration::from_secs(10), 5)
    }

    fn paging_disable_command(&self) -> &'static str {
        "terminal length 0"
    }

    fn tunnel_command(&self, _target: Ipv4Addr) -> Option<String> {
        None
    }

    fn elevation(&self) -> Elevation {
        Elevation {
            command: "enable",
            password_prompt: "Password",
            always: true,
        }
    }

    fn config_dump_command(&self) -> &'static str {
        "show running-config"
    }

    fn exit_command(&self) -> &'static str {
        "exit"
    }

    fn command_read_timeout(&self, default: Duration) -> Duration {
        default.max(Duration::from_secs(60))
    }
}
