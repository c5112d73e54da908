//! SMTP session state machine.
//!
//! The session does no I/O. The server feeds it one line at a time (line
//! terminator included) and acts on the returned [`Step`].

use tracing::{debug, info, warn};

use crate::config::SmtpConfig;
use crate::model::address::parse_path;
use crate::model::mail::Envelope;
use crate::smtp::filter::PeerFilter;

/// Reply sent once a delivered envelope has been handed off.
pub const ACCEPTED_REPLY: &str = "250 OK: message accepted";

/// What the server should do after feeding a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send this reply and keep reading.
    Reply(String),
    /// Send this reply and close the connection.
    Close(String),
    /// A complete message; forward it and send [`ACCEPTED_REPLY`].
    Deliver(Envelope),
    /// Nothing to send (a DATA line was buffered).
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for HELO/EHLO.
    Connected,
    /// Greeted, no transaction open.
    Ready,
    /// MAIL accepted.
    Mail,
    /// At least one RCPT accepted.
    Rcpt,
    /// Collecting message data.
    Data,
}

/// One SMTP conversation with one peer.
pub struct Session {
    peer: String,
    welcome: String,
    hostname: String,
    max_message_size: usize,
    filter: PeerFilter,
    phase: Phase,
    envelope: Envelope,
    oversized: bool,
}

impl Session {
    pub fn new(peer: impl Into<String>, config: &SmtpConfig, filter: PeerFilter) -> Self {
        Self {
            peer: peer.into(),
            welcome: config.welcome.clone(),
            hostname: config.hostname.clone(),
            max_message_size: config.max_message_size,
            filter,
            phase: Phase::Connected,
            envelope: Envelope::default(),
            oversized: false,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The `220` banner sent on connect.
    pub fn greeting(&self) -> String {
        format!("220 {}", self.welcome)
    }

    /// Feed one line from the client.
    pub fn process(&mut self, line: &[u8]) -> Step {
        if self.phase == Phase::Data {
            return self.data_line(line);
        }

        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match text.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (text, ""),
        };
        debug!(peer = %self.peer, command = %text, "SMTP command");

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => self.helo(arg, false),
            "EHLO" => self.helo(arg, true),
            "MAIL" => self.mail(arg),
            "RCPT" => self.rcpt(arg),
            "DATA" => self.data(),
            "RSET" => {
                self.reset_transaction();
                reply("250 OK")
            }
            "NOOP" => reply("250 OK"),
            "VRFY" => reply("252 Cannot VRFY user, but will accept message"),
            "QUIT" => Step::Close(format!("221 {} closing connection", self.hostname)),
            _ => reply("502 Command not implemented"),
        }
    }

    fn helo(&mut self, name: &str, extended: bool) -> Step {
        if name.is_empty() {
            return reply("501 Domain name required");
        }
        if !self.filter.check(&self.peer) {
            self.phase = Phase::Connected;
            return reply("550 Denied");
        }

        self.reset_transaction();
        self.phase = Phase::Ready;
        if extended {
            Step::Reply(format!(
                "250-{} Hello {}\r\n250-SIZE {}\r\n250 8BITMIME",
                self.hostname, name, self.max_message_size
            ))
        } else {
            Step::Reply(format!("250 {} Hello {}", self.hostname, name))
        }
    }

    fn mail(&mut self, arg: &str) -> Step {
        match self.phase {
            Phase::Connected => return reply("503 Send HELO/EHLO first"),
            Phase::Mail | Phase::Rcpt => return reply("503 Nested MAIL command"),
            _ => {}
        }
        let Some(path) = strip_keyword(arg, "FROM:").and_then(parse_path) else {
            return reply("501 Syntax: MAIL FROM:<address>");
        };
        self.envelope = Envelope {
            sender: path,
            ..Default::default()
        };
        self.phase = Phase::Mail;
        reply("250 OK")
    }

    fn rcpt(&mut self, arg: &str) -> Step {
        if !matches!(self.phase, Phase::Mail | Phase::Rcpt) {
            return reply("503 Need MAIL command first");
        }
        match strip_keyword(arg, "TO:").and_then(parse_path) {
            Some(path) if !path.is_empty() => {
                self.envelope.recipients.push(path);
                self.phase = Phase::Rcpt;
                reply("250 OK")
            }
            _ => reply("501 Syntax: RCPT TO:<address>"),
        }
    }

    fn data(&mut self) -> Step {
        if self.phase != Phase::Rcpt {
            return reply("503 Need RCPT command first");
        }
        self.phase = Phase::Data;
        self.oversized = false;
        reply("354 End data with <CR><LF>.<CR><LF>")
    }

    fn data_line(&mut self, line: &[u8]) -> Step {
        let content = trim_line_ending(line);
        if content == b"." {
            return self.finish_data();
        }

        let line = line.strip_prefix(b".").unwrap_or(line);
        if self.oversized {
            return Step::Continue;
        }
        if self.envelope.data.len() + line.len() > self.max_message_size {
            warn!(
                peer = %self.peer,
                limit = self.max_message_size,
                "Message exceeds size limit, discarding"
            );
            self.oversized = true;
            self.envelope.data = Vec::new();
            return Step::Continue;
        }
        self.envelope.data.extend_from_slice(line);
        Step::Continue
    }

    fn finish_data(&mut self) -> Step {
        let oversized = self.oversized;
        let envelope = std::mem::take(&mut self.envelope);
        self.reset_transaction();

        if oversized {
            return reply("552 Message exceeds maximum size");
        }
        info!(
            peer = %self.peer,
            sender = %envelope.sender,
            recipients = envelope.recipients.len(),
            size = envelope.data.len(),
            "Message received"
        );
        Step::Deliver(envelope)
    }

    /// Drop any open transaction, keeping the HELO state.
    fn reset_transaction(&mut self) {
        self.envelope = Envelope::default();
        self.oversized = false;
        if self.phase != Phase::Connected {
            self.phase = Phase::Ready;
        }
    }
}

fn reply(text: &str) -> Step {
    Step::Reply(text.to_string())
}

/// Case-insensitively strip `FROM:` / `TO:` and return the path argument.
fn strip_keyword<'a>(arg: &'a str, keyword: &str) -> Option<&'a str> {
    let head = arg.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| arg[keyword.len()..].trim_start())
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
