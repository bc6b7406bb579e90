use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use tracing::warn;

use crate::{
    data_aquisition::{snmp::SnmpPolicy, ssh::Ssh2Connector},
    gateway::ExecutorSettings,
    poller::PollerSettings,
};

const LOG_LEVEL_KEY: &str = "CRUXWATCH_LOG_LEVEL";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Runtime configuration, read from `CRUXWATCH_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub snmp_port: u16,
    pub trap_bind: SocketAddr,
    pub trap_queue_capacity: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub read_timeout: Duration,
    pub config_read_timeout: Duration,
    pub settle_delay: Duration,
    pub tunnel_deadline: Duration,
    pub probe_timeout: Duration,
    pub probe_retries: u32,
    pub data_dir: PathBuf,
    /// Per-session transcripts are written here when set.
    pub session_log_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snmp_port: 161,
            trap_bind: SocketAddr::from(([0, 0, 0, 0], 162)),
            trap_queue_capacity: 256,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 100,
            read_timeout: Duration::from_secs(20),
            config_read_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_millis(500),
            tunnel_deadline: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            probe_retries: 2,
            data_dir: PathBuf::from("data"),
            session_log_dir: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value {raw:?} for {key}");
            default
        }),
        None => default,
    }
}

fn duration(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    match lookup(key) {
        Some(raw) => humantime::parse_duration(raw.trim()).unwrap_or_else(|e| {
            warn!("Ignoring invalid duration {raw:?} for {key}: {e}");
            default
        }),
        None => default,
    }
}

/// Log filter directive for the crate, read on its own so tracing can be installed before
/// the rest of the configuration is parsed.
pub fn log_directive(lookup: impl Fn(&str) -> Option<String>) -> String {
    let level = lookup(LOG_LEVEL_KEY)
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    format!("cruxwatch={}", level.trim())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable keys fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            snmp_port: parsed(&lookup, "CRUXWATCH_SNMP_PORT", d.snmp_port),
            trap_bind: parsed(&lookup, "CRUXWATCH_TRAP_BIND", d.trap_bind),
            trap_queue_capacity: parsed(&lookup, "CRUXWATCH_TRAP_QUEUE", d.trap_queue_capacity),
            cache_ttl: duration(&lookup, "CRUXWATCH_CACHE_TTL", d.cache_ttl),
            cache_capacity: parsed(&lookup, "CRUXWATCH_CACHE_CAPACITY", d.cache_capacity),
            read_timeout: duration(&lookup, "CRUXWATCH_READ_TIMEOUT", d.read_timeout),
            config_read_timeout: duration(
                &lookup,
                "CRUXWATCH_CONFIG_READ_TIMEOUT",
                d.config_read_timeout,
            ),
            settle_delay: duration(&lookup, "CRUXWATCH_SETTLE_DELAY", d.settle_delay),
            tunnel_deadline: duration(&lookup, "CRUXWATCH_TUNNEL_DEADLINE", d.tunnel_deadline),
            probe_timeout: duration(&lookup, "CRUXWATCH_PROBE_TIMEOUT", d.probe_timeout),
            probe_retries: parsed(&lookup, "CRUXWATCH_PROBE_RETRIES", d.probe_retries),
            data_dir: lookup("CRUXWATCH_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            session_log_dir: lookup("CRUXWATCH_SESSION_LOG_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            log_level: lookup(LOG_LEVEL_KEY).unwrap_or(d.log_level),
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            port: self.snmp_port,
            cache_ttl: self.cache_ttl,
            cache_capacity: self.cache_capacity,
            probe_policy: SnmpPolicy::new(self.probe_timeout, self.probe_retries),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            tunnel_deadline: self.tunnel_deadline,
            ..ExecutorSettings::default()
        }
    }

    pub fn ssh_connector(&self) -> Ssh2Connector {
        Ssh2Connector {
            settle_delay: self.settle_delay,
            ..Ssh2Connector::default()
        }
    }

    /// Transcript path for one session, when session logging is enabled.
    pub fn session_log_for(&self, device_name: &str) -> Option<PathBuf> {
        self.session_log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{device_name}.log")))
    }
}
