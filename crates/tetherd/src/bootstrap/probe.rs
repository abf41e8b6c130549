use std::time::{Duration, Instant};

use tracing::debug;

use tether_protocol::{HandshakeAck, Message, PROTOCOL_VERSION, Version, parse_message};

use crate::identity::ClientIdentity;
use crate::lock::LockRecord;
use crate::transport::{LineReader, MessageWriter, connect};

use super::BOOTSTRAP_TARGET;

/// What the socket named in a lock record said when asked who it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A handshake acknowledgement arrived in time.
    Responded {
        /// Instance id the responder claims.
        instance_id: String,
        /// Whether the responder admitted the probe.
        accepted: bool,
        /// Rejection reason, when not admitted.
        error: Option<String>,
        /// The refusal came from a daemon that is draining, not from a
        /// protocol or version mismatch.
        draining: bool,
    },
    /// Nothing usable arrived before the deadline.
    NoResponse {
        /// What went wrong.
        reason: String,
    },
}

impl ProbeOutcome {
    fn no_response(reason: impl Into<String>) -> Self {
        Self::NoResponse {
            reason: reason.into(),
        }
    }

    /// Whether the responder is the daemon `record` describes.
    #[must_use]
    pub fn verifies(&self, record: &LockRecord) -> bool {
        matches!(self, Self::Responded { instance_id, .. } if *instance_id == record.instance_id)
    }
}

/// Asks the process behind a lock record to identify itself.
pub trait DaemonProbe: Send + Sync {
    /// Performs the identification exchange, giving up after `timeout`.
    fn probe(&self, record: &LockRecord, timeout: Duration) -> ProbeOutcome;
}

/// Probe that connects to the recorded socket and performs a real handshake.
#[derive(Debug, Clone)]
pub struct HandshakeProbe {
    identity: ClientIdentity,
}

impl HandshakeProbe {
    /// Builds a probe presenting `identity`; each probe uses a fresh client id.
    #[must_use]
    pub fn new(identity: ClientIdentity) -> Self {
        Self { identity }
    }
}

impl HandshakeProbe {
    /// A daemon refuses only on protocol, version or draining grounds. When
    /// the first two are satisfied by what the ack advertises, the daemon is
    /// shutting down.
    fn refused_while_draining(&self, ack: &HandshakeAck) -> bool {
        if ack.accepted || ack.protocol_version != PROTOCOL_VERSION {
            return false;
        }
        let Ok(ours) = self.identity.version.parse::<Version>() else {
            return false;
        };
        ack.min_client_version.as_deref().is_none_or(|minimum| {
            minimum
                .parse::<Version>()
                .is_ok_and(|minimum| ours.satisfies_minimum(&minimum))
        })
    }
}

impl DaemonProbe for HandshakeProbe {
    fn probe(&self, record: &LockRecord, timeout: Duration) -> ProbeOutcome {
        let deadline = Instant::now() + timeout;
        let remaining = || {
            deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
        };
        let endpoint = match record.endpoint() {
            Ok(endpoint) => endpoint,
            Err(error) => return ProbeOutcome::no_response(format!("invalid socket address: {error}")),
        };
        let stream = match connect(&endpoint, timeout) {
            Ok(stream) => stream,
            Err(error) => return ProbeOutcome::no_response(error.to_string()),
        };
        let Some(left) = remaining() else {
            return ProbeOutcome::no_response("timed out connecting");
        };
        if let Err(error) = stream
            .set_read_timeout(Some(left))
            .and_then(|()| stream.set_write_timeout(Some(left)))
        {
            return ProbeOutcome::no_response(error.to_string());
        }
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(error) => return ProbeOutcome::no_response(error.to_string()),
        };
        let mut writer = MessageWriter::new(writer);
        let identity = self.identity.renewed();
        if let Err(error) = writer.send(&identity.handshake()) {
            return ProbeOutcome::no_response(format!("handshake not sent: {error}"));
        }

        let mut reader = LineReader::new(stream);
        let outcome = match reader.read_line() {
            Ok(Some(line)) => match parse_message(&line) {
                Ok(Message::HandshakeAck(ack)) => {
                    let draining = self.refused_while_draining(&ack);
                    ProbeOutcome::Responded {
                        instance_id: ack.instance_id,
                        accepted: ack.accepted,
                        error: ack.error,
                        draining,
                    }
                }
                Ok(other) => ProbeOutcome::no_response(format!("unexpected reply: {}", other.kind())),
                Err(error) => ProbeOutcome::no_response(format!("invalid reply: {error}")),
            },
            Ok(None) => ProbeOutcome::no_response("connection closed without reply"),
            Err(error) if error.is_timeout() => ProbeOutcome::no_response(format!(
                "no handshake reply within {}ms",
                timeout.as_millis()
            )),
            Err(error) => ProbeOutcome::no_response(error.to_string()),
        };

        if matches!(outcome, ProbeOutcome::Responded { accepted: true, .. }) {
            let farewell = Message::disconnect(identity.client_id, Some(String::from("probe")));
            if let Err(error) = writer.send(&farewell) {
                debug!(target: BOOTSTRAP_TARGET, error = %error, "probe disconnect not delivered");
            }
        }
        let _ = writer.get_ref().shutdown();
        debug!(target: BOOTSTRAP_TARGET, pid = record.pid, ?outcome, "daemon probed");
        outcome
    }
}
