/*!
The nested-session sub-dialog.

After the bastion is asked to open a secure session to a peer, the peer's SSH client asks a
handful of questions whose order and presence vary between firmware releases. The dialog is
a rule table scanned against the part of the accumulated output not yet answered: the
earliest matching rule decides the reply. When output goes quiet before the credentials
were asked for, the credentials are sent anyway (some releases print no username prompt).
*/

use std::time::{Duration, Instant};

use tracing::debug;

use crate::{
    data_aquisition::ssh::{InteractiveShell, PromptPattern},
    error::SessionError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Requested,
    VerifyingHost,
    UsernameSent,
    PasswordSent,
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Affirm,
    Decline,
    Username,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogFailure {
    ClosedByRemote,
    Rejected(String),
    NoPrompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogAction {
    Send(Reply),
    Wait,
    Done,
    Fail(DialogFailure),
}

#[derive(Debug, Clone, Copy)]
enum RuleEffect {
    Answer(Reply),
    Closed,
    Reject,
}

struct Rule {
    /// Lowercase substring looked for in the unanswered output.
    expect: &'static str,
    effect: RuleEffect,
}

const RULES: &[Rule] = &[
    Rule {
        expect: "closed by the remote host",
        effect: RuleEffect::Closed,
    },
    Rule {
        expect: "authentication fail",
        effect: RuleEffect::Reject,
    },
    Rule {
        expect: "error: failed to connect",
        effect: RuleEffect::Reject,
    },
    Rule {
        expect: "the server is not authenticated",
        effect: RuleEffect::Answer(Reply::Affirm),
    },
    Rule {
        expect: "save the server's public key",
        effect: RuleEffect::Answer(Reply::Affirm),
    },
    Rule {
        expect: "change now?",
        effect: RuleEffect::Answer(Reply::Decline),
    },
    Rule {
        expect: "username:",
        effect: RuleEffect::Answer(Reply::Username),
    },
    Rule {
        expect: "password:",
        effect: RuleEffect::Answer(Reply::Password),
    },
];

/// Pure state machine: fed output chunks, tells the caller what to send next.
#[derive(Debug)]
pub struct TunnelDialog {
    state: TunnelState,
    buffer: String,
    consumed: usize,
    prompt: PromptPattern,
    username_sent: bool,
    password_sent: bool,
    idle_reads: usize,
    max_idle_reads: usize,
}

impl TunnelDialog {
    pub fn new(prompt: PromptPattern, max_idle_reads: usize) -> Self {
        Self {
            state: TunnelState::Requested,
            buffer: String::new(),
            consumed: 0,
            prompt,
            username_sent: false,
            password_sent: false,
            idle_reads: 0,
            max_idle_reads,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    fn transition(&mut self, next: TunnelState) {
        if self.state != next {
            debug!("Tunnel dialog: {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    fn fail(&mut self, failure: DialogFailure) -> DialogAction {
        self.transition(TunnelState::Failed);
        DialogAction::Fail(failure)
    }

    /// Earliest rule match in the unanswered output, as (end offset, effect).
    fn next_match(&self) -> Option<(usize, RuleEffect)> {
        // ASCII lowercasing keeps byte offsets aligned with the original text
        let tail = self.buffer[self.consumed..].to_ascii_lowercase();
        RULES
            .iter()
            .filter_map(|rule| tail.find(rule.expect).map(|pos| (pos, rule)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(pos, rule)| (self.consumed + pos + rule.expect.len(), rule.effect))
    }

    fn answer(&mut self, reply: Reply) -> DialogAction {
        match reply {
            Reply::Affirm => self.transition(TunnelState::VerifyingHost),
            Reply::Decline => {}
            Reply::Username => {
                // asked again after the password: the peer rejected the login
                if self.password_sent {
                    return self.fail(DialogFailure::Rejected("username requested again".to_string()));
                }
                self.username_sent = true;
                self.transition(TunnelState::UsernameSent);
            }
            Reply::Password => {
                if self.password_sent {
                    return self.fail(DialogFailure::Rejected("password requested again".to_string()));
                }
                self.password_sent = true;
                self.transition(TunnelState::PasswordSent);
            }
        }
        DialogAction::Send(reply)
    }

    pub fn feed(&mut self, chunk: &str) -> DialogAction {
        if matches!(self.state, TunnelState::Authenticated | TunnelState::Failed) {
            return DialogAction::Done;
        }
        self.buffer.push_str(chunk);

        if let Some((end, effect)) = self.next_match() {
            self.consumed = end;
            self.idle_reads = 0;
            return match effect {
                RuleEffect::Closed => self.fail(DialogFailure::ClosedByRemote),
                RuleEffect::Reject => {
                    let line = self.buffer[..end]
                        .lines()
                        .last()
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    self.fail(DialogFailure::Rejected(line))
                }
                RuleEffect::Answer(reply) => self.answer(reply),
            };
        }

        if self.password_sent && self.prompt.matches(&self.buffer[self.consumed..]) {
            self.transition(TunnelState::Authenticated);
            return DialogAction::Done;
        }

        if !chunk.is_empty() {
            return DialogAction::Wait;
        }

        self.idle_reads += 1;
        if !self.username_sent {
            return self.answer(Reply::Username);
        }
        if !self.password_sent {
            return self.answer(Reply::Password);
        }
        if self.idle_reads > self.max_idle_reads {
            return self.fail(DialogFailure::NoPrompt);
        }
        DialogAction::Wait
    }
}

/// Credentials and limits for one tunnel attempt.
pub struct TunnelRequest<'a> {
    pub command: &'a str,
    pub target: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub deadline: Duration,
    pub max_idle_reads: usize,
}

impl TunnelRequest<'_> {
    fn text(&self, reply: Reply) -> &str {
        match reply {
            Reply::Affirm => "Y",
            Reply::Decline => "N",
            Reply::Username => self.username,
            Reply::Password => self.password,
        }
    }

    fn error(&self, reason: &str) -> SessionError {
        SessionError::Tunnel {
            target: self.target.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Drive the sub-dialog on `shell` until the peer's prompt shows up.
/// Returns the dialog transcript.
pub fn open_tunnel(
    shell: &mut dyn InteractiveShell,
    prompt: &PromptPattern,
    request: &TunnelRequest<'_>,
) -> Result<String, SessionError> {
    let started = Instant::now();
    let mut dialog = TunnelDialog::new(prompt.clone(), request.max_idle_reads);

    let mut transcript = shell.send_timing(request.command)?;
    let mut action = dialog.feed(&transcript);
    loop {
        if started.elapsed() > request.deadline {
            return Err(request.error(&format!(
                "no target prompt within {}",
                humantime::format_duration(request.deadline)
            )));
        }
        let chunk = match action {
            DialogAction::Done => return Ok(transcript),
            DialogAction::Fail(DialogFailure::ClosedByRemote) => {
                return Err(SessionError::ClosedByRemote);
            }
            DialogAction::Fail(DialogFailure::Rejected(reason)) => {
                return Err(request.error(&reason));
            }
            DialogAction::Fail(DialogFailure::NoPrompt) => {
                return Err(request.error("target prompt never appeared"));
            }
            DialogAction::Send(reply) => shell.send_timing(request.text(reply))?,
            DialogAction::Wait => shell.read_timing()?,
        };
        transcript.push_str(&chunk);
        action = dialog.feed(&chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog() -> TunnelDialog {
        TunnelDialog::new(PromptPattern::unprivileged_or_privileged(), 2)
    }

    #[test]
    fn test_full_first_contact_sequence() {
        let mut d = dialog();
        assert_eq!(
            d.feed("Trying 10.0.0.2 ...\r\nThe server is not authenticated. Continue to access it? [Y/N]:"),
            DialogAction::Send(Reply::Affirm)
        );
        assert_eq!(
            d.feed("Y\r\nSave the server's public key? [Y/N]:"),
            DialogAction::Send(Reply::Affirm)
        );
        assert_eq!(d.feed("Y\r\nPlease input the username:"), DialogAction::Send(Reply::Username));
        assert_eq!(d.feed("admin\r\nEnter password:"), DialogAction::Send(Reply::Password));
        assert_eq!(
            d.feed("\r\nThe password needs to be changed. Change now? [Y/N]:"),
            DialogAction::Send(Reply::Decline)
        );
        assert_eq!(d.feed("N\r\n<edge-2>"), DialogAction::Done);
        assert_eq!(d.state(), TunnelState::Authenticated);
    }

    #[test]
    fn test_known_host_skips_optional_steps() {
        let mut d = dialog();
        assert_eq!(d.feed("Username:"), DialogAction::Send(Reply::Username));
        assert_eq!(d.feed("Password:"), DialogAction::Send(Reply::Password));
        assert_eq!(d.feed("\r\nInfo: last login ...\r\n<edge-2>"), DialogAction::Done);
    }

    #[test]
    fn test_silent_prompts_answered_on_idle() {
        let mut d = dialog();
        assert_eq!(d.feed("Trying 10.0.0.2 ..."), DialogAction::Wait);
        assert_eq!(d.feed(""), DialogAction::Send(Reply::Username));
        assert_eq!(d.feed(""), DialogAction::Send(Reply::Password));
        assert_eq!(d.feed("<edge-2>"), DialogAction::Done);
    }

    #[test]
    fn test_gateway_prompt_does_not_complete_dialog() {
        let mut d = dialog();
        // the bastion's own prompt echoes before the peer answers
        assert_eq!(d.feed("<core-1>"), DialogAction::Wait);
        assert_eq!(d.state(), TunnelState::Requested);
    }

    #[test]
    fn test_closed_by_remote() {
        let mut d = dialog();
        assert_eq!(
            d.feed("Error: Connection was closed by the remote host"),
            DialogAction::Fail(DialogFailure::ClosedByRemote)
        );
        assert_eq!(d.state(), TunnelState::Failed);
    }

    #[test]
    fn test_rejected_login_fails() {
        let mut d = dialog();
        assert_eq!(d.feed("Username:"), DialogAction::Send(Reply::Username));
        assert_eq!(d.feed("Password:"), DialogAction::Send(Reply::Password));
        assert!(matches!(
            d.feed("\r\nUsername:"),
            DialogAction::Fail(DialogFailure::Rejected(_))
        ));
    }

    #[test]
    fn test_idle_limit_after_credentials() {
        let mut d = dialog();
        d.feed("Username:");
        d.feed("Password:");
        assert_eq!(d.feed(""), DialogAction::Wait);
        assert_eq!(d.feed(""), DialogAction::Wait);
        assert_eq!(d.feed(""), DialogAction::Fail(DialogFailure::NoPrompt));
    }
}
