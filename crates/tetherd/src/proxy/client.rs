use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use tether_config::SocketEndpoint;
use tether_protocol::{HandshakeAck, HeartbeatAck, Message, parse_message};

use crate::breaker::Ticker;
use crate::identity::ClientIdentity;
use crate::stdio::{LineOutcome, serve_lines};
use crate::transport::{ConnectionStream, LineReader, MessageWriter, connect};

use super::{PROXY_TARGET, ProxyError};

type SharedWriter = Arc<Mutex<MessageWriter<ConnectionStream>>>;

/// Daemon's answer to an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The daemon accepted and will exit within `shutdown_in_ms`.
    Pending {
        /// Upper bound on the time until the daemon exits.
        shutdown_in_ms: u64,
    },
    /// The daemon refused.
    Aborted {
        /// Why the upgrade will not happen.
        reason: String,
    },
}

/// Handshaken connection to the daemon.
///
/// Replies are read on the calling thread; interleaved heartbeat
/// acknowledgements and notifications are skipped while waiting for the
/// reply an operation expects.
#[derive(Debug)]
pub struct ProxyClient {
    identity: ClientIdentity,
    ack: HandshakeAck,
    reader: Mutex<LineReader<ConnectionStream>>,
    writer: SharedWriter,
}

impl ProxyClient {
    /// Connects to `endpoint` and performs the handshake, waiting at most
    /// `timeout` for each step.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Rejected`] when the daemon refuses the client,
    /// and transport or protocol errors otherwise.
    pub fn connect(
        endpoint: &SocketEndpoint,
        identity: ClientIdentity,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let stream = connect(endpoint, timeout)?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(crate::transport::TransportError::from)?;
        let mut writer = MessageWriter::new(
            stream
                .try_clone()
                .map_err(crate::transport::TransportError::from)?,
        );
        writer.send(&identity.handshake())?;

        let mut reader = LineReader::new(stream);
        let ack = match read_message(&mut reader)? {
            Message::HandshakeAck(ack) => ack,
            other => return Err(ProxyError::UnexpectedReply { kind: other.kind() }),
        };
        if !ack.accepted {
            return Err(ProxyError::Rejected {
                reason: ack
                    .error
                    .unwrap_or_else(|| String::from("no reason given")),
            });
        }
        writer
            .get_ref()
            .set_read_timeout(None)
            .map_err(crate::transport::TransportError::from)?;
        info!(
            target: PROXY_TARGET,
            endpoint = %endpoint,
            client_id = %identity.client_id,
            daemon_version = %ack.daemon_version,
            instance_id = %ack.instance_id,
            "connected to daemon"
        );
        Ok(Self {
            identity,
            ack,
            reader: Mutex::new(reader),
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// The daemon's handshake acknowledgement.
    #[must_use]
    pub fn ack(&self) -> &HandshakeAck {
        &self.ack
    }

    /// Identity presented to the daemon.
    #[must_use]
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Sends `payload` as a request and waits for the correlated response.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Daemon`] when the daemon reports an error for
    /// the request, [`ProxyError::ShuttingDown`] when it announces shutdown
    /// first, and [`ProxyError::Disconnected`] when the connection closes.
    pub fn request(&self, payload: Value) -> Result<Value, ProxyError> {
        let request_id = Uuid::new_v4().to_string();
        let mut reader = self.reader();
        self.send(&Message::mcp_request(
            request_id.clone(),
            self.identity.client_id.clone(),
            payload,
        ))?;
        loop {
            match read_message(&mut reader)? {
                Message::McpResponse(response) if response.request_id == request_id => {
                    return Ok(response.payload);
                }
                Message::Error(error)
                    if error
                        .request_id
                        .as_deref()
                        .is_none_or(|id| id == request_id) =>
                {
                    return Err(ProxyError::Daemon {
                        code: error.code,
                        message: error.message,
                    });
                }
                Message::Shutdown(shutdown) => {
                    return Err(ProxyError::ShuttingDown {
                        reason: shutdown.reason,
                    });
                }
                other => skip(&other),
            }
        }
    }

    /// Sends a heartbeat and waits for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::request`].
    pub fn heartbeat(&self) -> Result<HeartbeatAck, ProxyError> {
        let mut reader = self.reader();
        self.send(&Message::heartbeat(self.identity.client_id.clone()))?;
        loop {
            match read_message(&mut reader)? {
                Message::HeartbeatAck(ack) => return Ok(ack),
                Message::Shutdown(shutdown) => {
                    return Err(ProxyError::ShuttingDown {
                        reason: shutdown.reason,
                    });
                }
                other => skip(&other),
            }
        }
    }

    /// Asks the daemon to hand off to `new_version`.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::request`].
    pub fn request_upgrade(&self, new_version: &str) -> Result<UpgradeOutcome, ProxyError> {
        let mut reader = self.reader();
        self.send(&Message::request_upgrade(
            self.identity.client_id.clone(),
            new_version,
        ))?;
        loop {
            match read_message(&mut reader)? {
                Message::UpgradePending(pending) => {
                    return Ok(UpgradeOutcome::Pending {
                        shutdown_in_ms: pending.shutdown_in_ms,
                    });
                }
                Message::UpgradeAbort(abort) => {
                    return Ok(UpgradeOutcome::Aborted {
                        reason: abort.reason,
                    });
                }
                Message::Error(error) if error.request_id.is_none() => {
                    return Err(ProxyError::Daemon {
                        code: error.code,
                        message: error.message,
                    });
                }
                other => skip(&other),
            }
        }
    }

    /// Sends a one-way notification.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn notify(&self, payload: Value) -> Result<(), ProxyError> {
        self.send(&Message::mcp_notification(
            None,
            self.identity.client_id.clone(),
            payload,
        ))
    }

    /// Sends heartbeats every `interval` on a background timer. Replies are
    /// consumed by later operations.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the timer thread cannot be spawned.
    pub fn spawn_heartbeats(&self, interval: Duration) -> io::Result<Ticker> {
        let writer = Arc::clone(&self.writer);
        let client_id = self.identity.client_id.clone();
        Ticker::start("tetherd-heartbeat", interval, move || {
            let result = writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send(&Message::heartbeat(client_id.clone()));
            if let Err(error) = result {
                debug!(target: PROXY_TARGET, error = %error, "heartbeat not sent");
            }
        })
    }

    /// Announces departure and closes the connection.
    ///
    /// # Errors
    ///
    /// Fails when the disconnect cannot be written; the connection is closed
    /// regardless.
    pub fn disconnect(self, reason: Option<String>) -> Result<(), ProxyError> {
        let result = self.send(&Message::disconnect(self.identity.client_id.clone(), reason));
        let _ = self.writer().get_ref().shutdown();
        info!(target: PROXY_TARGET, client_id = %self.identity.client_id, "disconnected from daemon");
        result
    }

    fn send(&self, message: &Message) -> Result<(), ProxyError> {
        self.writer().send(message).map_err(ProxyError::from)
    }

    fn reader(&self) -> MutexGuard<'_, LineReader<ConnectionStream>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer(&self) -> MutexGuard<'_, MessageWriter<ConnectionStream>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards newline-delimited JSON payloads from `input` to the daemon and
/// writes each response to `output`.
///
/// Returns the number of requests answered.
///
/// # Errors
///
/// Stops when the daemon disconnects or announces shutdown, or when the
/// streams fail. Request-level daemon errors are written to `output` and do
/// not stop the loop.
pub fn run_stdio<R: BufRead, W: Write>(
    client: &ProxyClient,
    input: R,
    output: W,
) -> Result<u64, ProxyError> {
    serve_lines(input, output, |payload| match client.request(payload) {
        Ok(response) => Ok(LineOutcome::Reply(response)),
        Err(ProxyError::Daemon { code, message }) => Ok(LineOutcome::Fail { code, message }),
        Err(error) => Err(error),
    })
}

fn read_message(reader: &mut LineReader<ConnectionStream>) -> Result<Message, ProxyError> {
    loop {
        let Some(line) = reader.read_line()? else {
            return Err(ProxyError::Disconnected);
        };
        if line.trim().is_empty() {
            continue;
        }
        return parse_message(&line).map_err(ProxyError::from);
    }
}

fn skip(message: &Message) {
    debug!(target: PROXY_TARGET, kind = %message.kind(), "skipping unsolicited message");
}
