//! Blocking TCP listener: one thread per SMTP connection.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::SmtpConfig;
use crate::error::{BridgeError, Result};
use crate::forward::Forwarder;
use crate::smtp::filter::PeerFilter;
use crate::smtp::session::{Session, Step, ACCEPTED_REPLY};

/// Accepts SMTP connections and hands complete messages to a [`Forwarder`].
pub struct SmtpServer {
    config: SmtpConfig,
    filter: PeerFilter,
    forwarder: Arc<Forwarder>,
}

impl SmtpServer {
    pub fn new(config: SmtpConfig, forwarder: Arc<Forwarder>) -> Self {
        let filter = PeerFilter::new(config.allow.clone(), config.deny.clone());
        Self {
            config,
            filter,
            forwarder,
        }
    }

    /// Bind the configured address and serve forever.
    pub fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen)
            .map_err(|e| BridgeError::io(format!("binding {}", self.config.listen), e))?;
        info!(listen = %self.config.listen, "Listening for SMTP connections");
        self.serve(listener)
    }

    /// Serve connections from an already bound listener.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(error = %e, "Connection without peer address, dropping");
                    continue;
                }
            };

            let connection = Connection {
                session: Session::new(peer.to_string(), &self.config, self.filter.clone()),
                forwarder: Arc::clone(&self.forwarder),
                read_timeout: Duration::from_secs(self.config.read_timeout_secs),
                max_line: self.config.max_message_size as u64 + 2,
            };
            let spawned = thread::Builder::new()
                .name(format!("smtp-{peer}"))
                .spawn(move || connection.run(stream, peer));
            if let Err(e) = spawned {
                error!(peer = %peer, error = %e, "Failed to spawn session thread");
            }
        }
        Ok(())
    }
}

struct Connection {
    session: Session,
    forwarder: Arc<Forwarder>,
    read_timeout: Duration,
    max_line: u64,
}

impl Connection {
    fn run(mut self, stream: TcpStream, peer: SocketAddr) {
        debug!(peer = %peer, "Connection opened");
        match self.converse(stream) {
            Ok(()) => debug!(peer = %peer, "Connection closed"),
            Err(e) => warn!(peer = %peer, error = %e, "Session ended with error"),
        }
    }

    fn converse(&mut self, stream: TcpStream) -> Result<()> {
        if !self.read_timeout.is_zero() {
            stream
                .set_read_timeout(Some(self.read_timeout))
                .map_err(|e| BridgeError::io("setting read timeout", e))?;
        }
        let mut writer = stream
            .try_clone()
            .map_err(|e| BridgeError::io("cloning the connection", e))?;
        let mut reader = BufReader::new(stream);

        write_reply(&mut writer, &self.session.greeting())?;

        let mut line = Vec::with_capacity(1024);
        loop {
            line.clear();
            let n = reader
                .by_ref()
                .take(self.max_line)
                .read_until(b'\n', &mut line)
                .map_err(|e| BridgeError::io("reading from client", e))?;
            if n == 0 {
                debug!(peer = %self.session.peer(), "Client disconnected");
                return Ok(());
            }

            match self.session.process(&line) {
                Step::Continue => {}
                Step::Reply(text) => write_reply(&mut writer, &text)?,
                Step::Close(text) => {
                    write_reply(&mut writer, &text)?;
                    return Ok(());
                }
                Step::Deliver(envelope) => {
                    // Accepted regardless; forwarding failures are only logged
                    if let Err(e) = self.forwarder.forward(&envelope) {
                        error!(
                            peer = %self.session.peer(),
                            sender = %envelope.sender,
                            error = %e,
                            "Failed to forward message"
                        );
                    }
                    write_reply(&mut writer, ACCEPTED_REPLY)?;
                }
            }
        }
    }
}

fn write_reply(writer: &mut impl Write, text: &str) -> Result<()> {
    writer
        .write_all(format!("{text}\r\n").as_bytes())
        .and_then(|()| writer.flush())
        .map_err(|e| BridgeError::io("writing reply", e))
}
