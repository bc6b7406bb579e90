/*!
Gateway command executor.

Runs one command on a target device, hopping through its gateway network element (GNE)
when the target has no direct management reachability:

`Disconnected -> AuthenticatedToGateway -> (TunnelingToTarget -> AuthenticatedToTarget)
-> CommandExecuting -> Disconnected`

The whole session runs on the blocking pool. Sessions through the same gateway are
serialized, and the outer connection is closed on every path.
*/

pub mod dialog;

use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    data_aquisition::{
        credentials::SshParams,
        ssh::{InteractiveShell, PromptPattern, ShellConnector, find_prompt},
    },
    error::SessionError,
    network::vendor::{Elevation, VendorProfile},
};

use dialog::{TunnelRequest, open_tunnel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AuthenticatedToGateway,
    TunnelingToTarget,
    AuthenticatedToTarget,
    CommandExecuting,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    /// Upper bound on the whole tunnel sub-dialog.
    pub tunnel_deadline: Duration,
    /// Quiet reads tolerated after the credentials were sent.
    pub max_idle_reads: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            tunnel_deadline: Duration::from_secs(30),
            max_idle_reads: 3,
        }
    }
}

/// Successful command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub output: String,
    /// The device flagged the command with a `^` error marker.
    pub syntax_error: bool,
}

pub struct GatewayExecutor {
    connector: Arc<dyn ShellConnector>,
    settings: ExecutorSettings,
    gateway_locks: Mutex<HashMap<Ipv4Addr, Arc<tokio::sync::Mutex<()>>>>,
}

impl GatewayExecutor {
    pub fn new(connector: Arc<dyn ShellConnector>, settings: ExecutorSettings) -> Self {
        Self {
            connector,
            settings,
            gateway_locks: Mutex::new(HashMap::new()),
        }
    }

    fn gateway_lock(&self, gateway: Ipv4Addr) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .gateway_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(gateway).or_default().clone()
    }

    /// Forget the locks of gateways `keep` rejects. A lock a session still holds stays.
    pub fn retain_gateways(&self, keep: impl Fn(Ipv4Addr) -> bool) {
        let mut locks = self
            .gateway_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = locks.len();
        locks.retain(|ip, lock| keep(*ip) || Arc::strong_count(lock) > 1);
        if locks.len() < before {
            debug!("Dropped {} idle gateway locks", before - locks.len());
        }
    }

    /// Run `command` on `target`, through `gateway` unless both are the same device.
    pub async fn execute(
        &self,
        gateway: SshParams,
        target: SshParams,
        command: &str,
        read_timeout: Duration,
    ) -> Result<ExecOutput, SessionError> {
        let lock = self.gateway_lock(gateway.ip);
        let _serialized = lock.lock().await;

        let connector = self.connector.clone();
        let settings = self.settings;
        let command = command.to_string();
        info!("Executing '{command}' on {} via {}", target.ip, gateway.ip);
        tokio::task::spawn_blocking(move || {
            GatewaySession::new(connector.as_ref(), settings).run(&gateway, &target, &command, read_timeout)
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))?
    }

    /// Log in and immediately disconnect.
    pub async fn probe_login(&self, params: SshParams) -> Result<(), SessionError> {
        let connector = self.connector.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SessionError> {
            let mut shell = connector.open(&params)?;
            if let Err(e) = shell.close() {
                warn!("Closing probe session to {} failed: {e}", params.ip);
            }
            Ok(())
        })
        .await
        .map_err(|e| SessionError::Task(e.to_string()))?
    }
}

struct GatewaySession<'a> {
    connector: &'a dyn ShellConnector,
    settings: ExecutorSettings,
    state: SessionState,
}

impl<'a> GatewaySession<'a> {
    fn new(connector: &'a dyn ShellConnector, settings: ExecutorSettings) -> Self {
        Self {
            connector,
            settings,
            state: SessionState::Disconnected,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state: {:?} -> {next:?}", self.state);
        self.state = next;
    }

    fn run(
        &mut self,
        gateway: &SshParams,
        target: &SshParams,
        command: &str,
        read_timeout: Duration,
    ) -> Result<ExecOutput, SessionError> {
        // a family without a tunnel command is always reached directly
        let hop = if gateway.ip == target.ip {
            None
        } else {
            gateway.device_type.profile().tunnel_command(target.ip)
        };
        if hop.is_none() && gateway.ip != target.ip {
            debug!("{} cannot tunnel, connecting to {} directly", gateway.device_type, target.ip);
        }

        let outer = if hop.is_some() { gateway } else { target };
        let mut shell = self.connector.open(outer)?;
        self.transition(SessionState::AuthenticatedToGateway);

        let result = self.drive(shell.as_mut(), outer, target, hop.as_deref(), command, read_timeout);

        let exit = target.device_type.profile().exit_command();
        if let Err(e) = shell.send_timing(exit) {
            debug!("'{exit}' during teardown failed: {e}");
        }
        if let Err(e) = shell.close() {
            warn!("Disconnect from {} failed: {e}", outer.ip);
        }
        self.transition(SessionState::Disconnected);
        result
    }

    fn drive(
        &mut self,
        shell: &mut dyn InteractiveShell,
        outer: &SshParams,
        target: &SshParams,
        hop: Option<&str>,
        command: &str,
        read_timeout: Duration,
    ) -> Result<ExecOutput, SessionError> {
        let outer_profile = outer.device_type.profile();
        let profile = target.device_type.profile();
        let generic = profile.prompt_pattern();
        let mut output = String::new();

        elevate(shell, outer_profile.elevation(), outer.declared_secret())?;

        if let Some(hop) = hop {
            self.transition(SessionState::TunnelingToTarget);
            let target_label = target.ip.to_string();
            output.push_str(&open_tunnel(
                shell,
                &generic,
                &TunnelRequest {
                    command: hop,
                    target: &target_label,
                    username: &target.username,
                    password: &target.password,
                    deadline: self.settings.tunnel_deadline,
                    max_idle_reads: self.settings.max_idle_reads,
                },
            )?);
            self.transition(SessionState::AuthenticatedToTarget);
        }
        let prompt = find_prompt(shell, &generic)?;

        let read_timeout = profile.command_read_timeout(read_timeout);
        shell.send_expect(profile.paging_disable_command(), &prompt, read_timeout)?;

        self.transition(SessionState::CommandExecuting);
        let raw = shell.send_expect(command, &prompt, read_timeout)?;
        let cleaned = clean_output(&raw, command, &prompt);
        let syntax_error = has_syntax_marker(&cleaned);
        if syntax_error {
            warn!("Command '{command}' rejected by {}: syntax error marker in output", target.ip);
        }
        output.push_str(&cleaned);

        Ok(ExecOutput {
            output,
            syntax_error,
        })
    }
}

/// Enter privileged mode when the device declares a secret, or always for families
/// that require it. An unexpected password prompt without a secret gets an empty line.
fn elevate(
    shell: &mut dyn InteractiveShell,
    elevation: Elevation,
    secret: Option<&str>,
) -> Result<(), SessionError> {
    if secret.is_none() && !elevation.always {
        return Ok(());
    }
    let reply = shell.send_timing(elevation.command)?;
    if reply.contains(elevation.password_prompt) {
        shell.send_timing(secret.unwrap_or_default())?;
    }
    Ok(())
}

/// Drop the echoed command line and the trailing prompt.
fn clean_output(raw: &str, command: &str, prompt: &PromptPattern) -> String {
    let body = prompt.strip_trailing_prompt(raw).to_string();
    let mut lines = body.lines();
    let first = lines.clone().next().unwrap_or_default();
    if first.trim_end().ends_with(command.trim()) {
        lines.next();
        lines.collect::<Vec<_>>().join("\n")
    } else {
        body
    }
}

fn has_syntax_marker(output: &str) -> bool {
    output.lines().any(|line| line.trim_start().starts_with('^'))
}
