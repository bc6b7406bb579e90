use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::{Duration, Instant};

use ssh2::{Channel, Session};
use thiserror::Error;
use tracing::{debug, warn};

use crate::data_aquisition::credentials::SshParams;

#[derive(Debug, Clone, Error)]
pub enum SshError {
    #[error("TCP error: {0}")]
    TcpError(String),
    #[error("SSH error: {0}")]
    SshError(String),
    #[error("SSH authentication error: {0}")]
    SshAuthError(String),
    #[error("Command execution error: {0}")]
    CommandError(String),
    #[error("Async error: {0}")]
    AsyncError(String),
    #[error("Pattern not detected: '{pattern}' in output after {waited:?}")]
    PatternNotFound { pattern: String, waited: Duration },
    #[error("Channel closed by peer")]
    ChannelClosed,
}

/// Recognizes a device prompt at the end of the accumulated output.
///
/// A generic pattern accepts any last non-empty line ending in one of the terminator
/// characters, e.g. `<core-1>`, `[~core-1]#` or `edge-2#`. Command output can end a read on
/// such a line too (Huawei separates configuration sections with a bare `#`), so sessions
/// learn the device's actual prompt once logged in and expect that exact line afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPattern {
    terminators: Vec<char>,
    exact: Option<String>,
}

fn last_line(buffer: &str) -> Option<&str> {
    buffer
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
}

impl PromptPattern {
    pub fn new(terminators: &[char]) -> Self {
        Self {
            terminators: terminators.to_vec(),
            exact: None,
        }
    }

    /// `>` or `#`: both unprivileged and privileged prompts.
    pub fn unprivileged_or_privileged() -> Self {
        Self::new(&['>', '#'])
    }

    /// Only this prompt line.
    pub fn exact(prompt: &str) -> Self {
        let prompt = prompt.trim();
        Self {
            terminators: prompt.chars().last().into_iter().collect(),
            exact: Some(prompt.to_string()),
        }
    }

    pub fn matches(&self, buffer: &str) -> bool {
        let Some(line) = last_line(buffer) else {
            return false;
        };
        match &self.exact {
            Some(prompt) => line == prompt,
            None => line
                .chars()
                .last()
                .is_some_and(|last| self.terminators.contains(&last)),
        }
    }

    /// The exact prompt `buffer` ends with, if it ends with one this pattern accepts.
    pub fn learn(&self, buffer: &str) -> Option<PromptPattern> {
        if !self.matches(buffer) {
            return None;
        }
        last_line(buffer).map(Self::exact)
    }

    /// Drop the trailing prompt line, if the buffer ends with one.
    pub fn strip_trailing_prompt<'a>(&self, buffer: &'a str) -> &'a str {
        let trimmed = buffer.trim_end();
        if !self.matches(trimmed) {
            return trimmed;
        }
        match trimmed.rfind('\n') {
            Some(pos) => trimmed[..pos].trim_end_matches('\r'),
            None => "",
        }
    }
}

impl std::fmt::Display for PromptPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.exact {
            Some(prompt) => write!(f, "{prompt}"),
            None => {
                let set: String = self.terminators.iter().collect();
                write!(f, "[{set}]")
            }
        }
    }
}

/// Send an empty line and learn the prompt the device answers with.
pub fn find_prompt(
    shell: &mut dyn InteractiveShell,
    pattern: &PromptPattern,
) -> Result<PromptPattern, SshError> {
    let reply = shell.send_timing("")?;
    match pattern.learn(&reply) {
        Some(prompt) => {
            debug!("Device prompt is '{prompt}'");
            Ok(prompt)
        }
        None => Err(SshError::PatternNotFound {
            pattern: pattern.to_string(),
            waited: Duration::ZERO,
        }),
    }
}

/// An interactive terminal (pty + shell) on a remote device.
///
/// All calls block; async callers run the whole dialog inside `spawn_blocking`.
pub trait InteractiveShell: Send {
    /// Send a line, wait for the output to settle and return whatever arrived.
    fn send_timing(&mut self, line: &str) -> Result<String, SshError>;

    /// Wait for the output to settle without sending anything.
    fn read_timing(&mut self) -> Result<String, SshError>;

    /// Send a line and read until `prompt` matches or `timeout` elapses.
    fn send_expect(
        &mut self,
        line: &str,
        prompt: &PromptPattern,
        timeout: Duration,
    ) -> Result<String, SshError>;

    fn close(&mut self) -> Result<(), SshError>;
}

pub trait ShellConnector: Send + Sync {
    fn open(&self, params: &SshParams) -> Result<Box<dyn InteractiveShell>, SshError>;
}

/// Opens `ssh2` sessions with password authentication and a pty-backed shell.
#[derive(Debug, Clone)]
pub struct Ssh2Connector {
    pub port: u16,
    pub connect_timeout: Duration,
    /// Base settle delay for timing reads; multiplied by the device's delay factor.
    pub settle_delay: Duration,
}

impl Default for Ssh2Connector {
    fn default() -> Self {
        Self {
            port: 22,
            connect_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
        }
    }
}

fn connect_session(params: &SshParams, port: u16, timeout: Duration) -> Result<Session, SshError> {
    let address = SocketAddr::from((params.ip, port));
    let tcp = TcpStream::connect_timeout(&address, timeout)
        .map_err(|e| SshError::TcpError(e.to_string()))?;
    let mut session = Session::new().map_err(|e| SshError::SshError(e.to_string()))?;
    session.set_tcp_stream(tcp);
    // also bounds the handshake and authentication
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake().map_err(|e| SshError::SshError(e.to_string()))?;
    session
        .userauth_password(&params.username, &params.password)
        .map_err(|e| SshError::SshAuthError(e.to_string()))?;
    if !session.authenticated() {
        return Err(SshError::SshAuthError("Authentication failed".to_string()));
    }
    Ok(session)
}

impl ShellConnector for Ssh2Connector {
    fn open(&self, params: &SshParams) -> Result<Box<dyn InteractiveShell>, SshError> {
        let session = connect_session(params, self.port, self.connect_timeout)?;
        let mut channel = session
            .channel_session()
            .map_err(|e| SshError::SshError(e.to_string()))?;
        channel
            .request_pty("vt100", None, Some((200, 24, 0, 0)))
            .map_err(|e| SshError::SshError(e.to_string()))?;
        channel.shell().map_err(|e| SshError::SshError(e.to_string()))?;

        let transcript = match &params.session_log {
            Some(path) => Some(open_transcript(path)?),
            None => None,
        };

        let mut shell = Ssh2Shell {
            session,
            channel,
            settle: self.settle_delay * params.delay_factor.max(1),
            transcript,
        };
        // login banner and first prompt
        let banner = shell.read_timing()?;
        debug!("Connected to {}, banner {} bytes", params.ip, banner.len());
        Ok(Box::new(shell))
    }
}

fn open_transcript(path: &Path) -> Result<File, SshError> {
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SshError::SshError(format!("session log {}: {e}", path.display())))
}

/// A failed teardown step never fails the session; it is only logged.
fn teardown_step(step: &str, result: Result<(), ssh2::Error>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!("Teardown: {step} failed: {e}");
            false
        }
    }
}

const POLL_INTERVAL_MS: u32 = 100;
const MAX_SETTLE_ROUNDS: usize = 20;

pub struct Ssh2Shell {
    session: Session,
    channel: Channel,
    settle: Duration,
    transcript: Option<File>,
}

impl Ssh2Shell {
    fn log(&mut self, text: &str) {
        if let Some(file) = self.transcript.as_mut() {
            if let Err(e) = file.write_all(text.as_bytes()) {
                warn!("Session log write failed, disabling transcript: {e}");
                self.transcript = None;
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), SshError> {
        let payload = format!("{line}\n");
        self.channel
            .write_all(payload.as_bytes())
            .and_then(|_| self.channel.flush())
            .map_err(|e| SshError::CommandError(e.to_string()))
    }

    /// Everything currently buffered on the channel, without waiting for more.
    fn read_available(&mut self) -> Result<String, SshError> {
        self.session.set_timeout(POLL_INTERVAL_MS);
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.channel.read(&mut buf) {
                Ok(0) => {
                    if collected.is_empty() && self.channel.eof() {
                        return Err(SshError::ChannelClosed);
                    }
                    break;
                }
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => return Err(SshError::CommandError(e.to_string())),
            }
        }
        let text = String::from_utf8_lossy(&collected).into_owned();
        self.log(&text);
        Ok(text)
    }
}

impl InteractiveShell for Ssh2Shell {
    fn send_timing(&mut self, line: &str) -> Result<String, SshError> {
        self.write_line(line)?;
        self.read_timing()
    }

    fn read_timing(&mut self) -> Result<String, SshError> {
        let mut output = String::new();
        for _ in 0..MAX_SETTLE_ROUNDS {
            std::thread::sleep(self.settle);
            let chunk = match self.read_available() {
                Ok(chunk) => chunk,
                // the peer hanging up is reported through the text read so far
                Err(SshError::ChannelClosed) if !output.is_empty() => break,
                Err(e) => return Err(e),
            };
            if chunk.is_empty() {
                break;
            }
            output.push_str(&chunk);
        }
        Ok(output)
    }

    fn send_expect(
        &mut self,
        line: &str,
        prompt: &PromptPattern,
        timeout: Duration,
    ) -> Result<String, SshError> {
        self.write_line(line)?;
        let started = Instant::now();
        let mut output = String::new();
        while started.elapsed() < timeout {
            let chunk = self.read_available()?;
            if chunk.is_empty() {
                std::thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS)));
                continue;
            }
            output.push_str(&chunk);
            if prompt.matches(&output) {
                return Ok(output);
            }
        }
        Err(SshError::PatternNotFound {
            pattern: prompt.to_string(),
            waited: timeout,
        })
    }

    fn close(&mut self) -> Result<(), SshError> {
        teardown_step("send EOF", self.channel.send_eof());
        teardown_step("close channel", self.channel.close());
        self.session
            .disconnect(Some(ssh2::DisconnectCode::ByApplication), "", None)
            .map_err(|e| SshError::SshError(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Everything a scripted shell saw, shared with the test after the shell is dropped.
    #[derive(Debug, Default)]
    pub struct ShellLog {
        /// (host the shell was opened to, line sent)
        pub sent: Vec<(Ipv4Addr, String)>,
        pub opened: Vec<Ipv4Addr>,
        pub closed: Vec<Ipv4Addr>,
    }

    /// A reply rule: the first time `trigger` is sent, answer with `reply`. Any `rest`
    /// chunks arrive on the following reads.
    #[derive(Debug, Clone)]
    pub struct Reply {
        pub trigger: String,
        pub reply: String,
        pub rest: Vec<String>,
    }

    /// Transcript-replay connector: each host gets a banner, a list of reply rules, and
    /// a queue of unsolicited chunks handed out by idle reads.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedConnector {
        pub banners: Vec<(Ipv4Addr, String)>,
        pub replies: Vec<(Ipv4Addr, Reply)>,
        pub idle: Vec<(Ipv4Addr, String)>,
        pub refuse: Vec<Ipv4Addr>,
        pub log: Arc<Mutex<ShellLog>>,
    }

    impl ScriptedConnector {
        pub fn banner(mut self, host: Ipv4Addr, text: &str) -> Self {
            self.banners.push((host, text.to_string()));
            self
        }

        pub fn reply(self, host: Ipv4Addr, trigger: &str, reply: &str) -> Self {
            self.reply_chunks(host, trigger, &[reply])
        }

        pub fn reply_chunks(mut self, host: Ipv4Addr, trigger: &str, chunks: &[&str]) -> Self {
            let mut chunks = chunks.iter().map(|chunk| chunk.to_string());
            self.replies.push((
                host,
                Reply {
                    trigger: trigger.to_string(),
                    reply: chunks.next().unwrap_or_default(),
                    rest: chunks.collect(),
                },
            ));
            self
        }

        pub fn idle(mut self, host: Ipv4Addr, text: &str) -> Self {
            self.idle.push((host, text.to_string()));
            self
        }

        pub fn refuse(mut self, host: Ipv4Addr) -> Self {
            self.refuse.push(host);
            self
        }

        pub fn sent_lines(&self) -> Vec<String> {
            let log = self.log.lock().unwrap();
            log.sent.iter().map(|(_, line)| line.clone()).collect()
        }

        pub fn opened(&self) -> Vec<Ipv4Addr> {
            self.log.lock().unwrap().opened.clone()
        }

        pub fn closed(&self) -> Vec<Ipv4Addr> {
            self.log.lock().unwrap().closed.clone()
        }
    }

    impl ShellConnector for ScriptedConnector {
        fn open(&self, params: &SshParams) -> Result<Box<dyn InteractiveShell>, SshError> {
            if self.refuse.contains(&params.ip) {
                return Err(SshError::TcpError("Connection refused".to_string()));
            }
            self.log.lock().unwrap().opened.push(params.ip);
            let pick = |entries: &[(Ipv4Addr, String)]| -> VecDeque<String> {
                entries
                    .iter()
                    .filter(|(host, _)| *host == params.ip)
                    .map(|(_, text)| text.clone())
                    .collect()
            };
            let mut pending = pick(&self.banners);
            pending.extend(pick(&self.idle));
            Ok(Box::new(ScriptedShell {
                host: params.ip,
                replies: self
                    .replies
                    .iter()
                    .filter(|(host, _)| *host == params.ip)
                    .map(|(_, reply)| reply.clone())
                    .collect(),
                pending,
                log: self.log.clone(),
            }))
        }
    }

    pub struct ScriptedShell {
        host: Ipv4Addr,
        replies: Vec<Reply>,
        pending: VecDeque<String>,
        log: Arc<Mutex<ShellLog>>,
    }

    impl ScriptedShell {
        fn answer(&mut self, line: &str) -> String {
            self.log.lock().unwrap().sent.push((self.host, line.to_string()));
            let mut output = self.pending.pop_front().unwrap_or_default();
            // each rule answers one exact line, once, in script order
            if let Some(i) = self.replies.iter().position(|r| r.trigger == line) {
                let reply = self.replies.remove(i);
                output.push_str(&reply.reply);
                for (n, chunk) in reply.rest.into_iter().enumerate() {
                    self.pending.insert(n, chunk);
                }
            }
            output
        }
    }

    impl InteractiveShell for ScriptedShell {
        fn send_timing(&mut self, line: &str) -> Result<String, SshError> {
            Ok(self.answer(line))
        }

        fn read_timing(&mut self) -> Result<String, SshError> {
            Ok(self.pending.pop_front().unwrap_or_default())
        }

        fn send_expect(
            &mut self,
            line: &str,
            prompt: &PromptPattern,
            timeout: Duration,
        ) -> Result<String, SshError> {
            let mut output = self.answer(line);
            while !prompt.matches(&output) {
                match self.pending.pop_front() {
                    Some(chunk) => output.push_str(&chunk),
                    None => {
                        return Err(SshError::PatternNotFound {
                            pattern: prompt.to_string(),
                            waited: timeout,
                        });
                    }
                }
            }
            Ok(output)
        }

        fn close(&mut self) -> Result<(), SshError> {
            self.log.lock().unwrap().closed.push(self.host);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_matches_last_line() {
        let prompt = PromptPattern::unprivileged_or_privileged();
        assert!(prompt.matches("display version\r\nVRP V200\r\n<core-1>"));
        assert!(prompt.matches("show clock\n12:00\nedge-2#  \n\n"));
        assert!(!prompt.matches("Username:"));
        assert!(!prompt.matches("<core-1>\r\nPassword:"));
        assert!(!prompt.matches(""));
    }

    #[test]
    fn test_strip_trailing_prompt() {
        let prompt = PromptPattern::unprivileged_or_privileged();
        assert_eq!(prompt.strip_trailing_prompt("line 1\r\nline 2\r\n<core-1>"), "line 1\r\nline 2");
        assert_eq!(prompt.strip_trailing_prompt("<core-1>"), "");
        assert_eq!(prompt.strip_trailing_prompt("no prompt here\n"), "no prompt here");
    }

    #[test]
    fn test_teardown_errors_are_absorbed() {
        assert!(teardown_step("send EOF", Ok(())));
        let closed = ssh2::Error::new(ssh2::ErrorCode::Session(-7), "Unable to send channel close");
        assert!(!teardown_step("close channel", Err(closed)));
    }

    #[test]
    fn test_stalled_handshake_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // accepts the connection, then never speaks
        std::thread::spawn(move || {
            let _held = listener.accept();
            std::thread::sleep(Duration::from_secs(10));
        });
        let params = crate::data_aquisition::credentials::SshParams {
            device_type: crate::network::VendorKind::Huawei,
            ip: std::net::Ipv4Addr::LOCALHOST,
            username: "admin".to_string(),
            password: "pw".to_string(),
            secret: None,
            delay_factor: 1,
            session_log: None,
        };

        let started = Instant::now();
        let Err(err) = connect_session(&params, port, Duration::from_millis(300)) else {
            panic!("expected connect_session to fail");
        };
        assert!(matches!(err, SshError::SshError(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_learned_prompt_ignores_config_section_marks() {
        let dump = "display current-configuration\r\n#\r\n sysname core-1\r\n#\r\n";
        let generic = PromptPattern::unprivileged_or_privileged();
        assert!(generic.matches(dump));

        let learned = generic.learn("\r\n<core-1>  ").unwrap();
        assert_eq!(learned, PromptPattern::exact("<core-1>"));
        assert!(!learned.matches(dump));
        assert!(learned.matches(&format!("{dump}return\r\n<core-1>")));
        assert!(!learned.matches("<edge-2>"));
        assert_eq!(generic.learn("Password:"), None);
    }

    #[test]
    fn test_find_prompt_sends_empty_line() {
        let host = std::net::Ipv4Addr::new(10, 0, 0, 1);
        let connector = mock::ScriptedConnector::default()
            .banner(host, "Info: welcome\r\n")
            .reply(host, "", "\r\nedge-2#");
        let mut shell = connector
            .open(&crate::data_aquisition::credentials::SshParams {
                device_type: crate::network::VendorKind::CiscoIos,
                ip: host,
                username: "admin".to_string(),
                password: "pw".to_string(),
                secret: None,
                delay_factor: 1,
                session_log: None,
            })
            .unwrap();

        let prompt = find_prompt(shell.as_mut(), &PromptPattern::unprivileged_or_privileged()).unwrap();
        assert_eq!(prompt.to_string(), "edge-2#");
        assert_eq!(connector.sent_lines(), vec![""]);
        assert!(find_prompt(shell.as_mut(), &PromptPattern::unprivileged_or_privileged()).is_err());
    }
}
