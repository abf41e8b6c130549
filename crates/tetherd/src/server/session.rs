use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::json;
use tracing::{debug, info, warn};

use tether_protocol::{
    Handshake, McpRequest, Message, PROTOCOL_VERSION, RequestUpgrade, ValidationError, Version,
    codes, parse_message,
};

use crate::identity::CAPABILITIES;
use crate::transport::{ConnectionStream, LineReader, MessageWriter, TransportError};

use super::registry::lock_writer;
use super::{DaemonServer, SERVER_TARGET, SharedWriter};

/// Whether the session continues after a message.
enum Flow {
    Continue,
    Close,
}

/// A client admitted by handshake.
struct Admitted {
    client_id: String,
    session: u64,
}

/// One client connection, served sequentially.
pub(super) struct Session<'a> {
    server: &'a DaemonServer,
    reader: LineReader<ConnectionStream>,
    writer: SharedWriter,
    client: Option<Admitted>,
}

impl<'a> Session<'a> {
    pub(super) fn open(server: &'a DaemonServer, stream: ConnectionStream) -> io::Result<Self> {
        let writer = Arc::new(Mutex::new(MessageWriter::new(stream.try_clone()?)));
        Ok(Self {
            server,
            reader: LineReader::new(stream),
            writer,
            client: None,
        })
    }

    pub(super) fn run(mut self) {
        loop {
            let line = match self.reader.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(TransportError::LineTooLong { limit }) => {
                    let reply = Message::error(
                        codes::INVALID_MESSAGE,
                        format!("message exceeds {limit} bytes"),
                        None,
                        None,
                    );
                    if self.send(&reply).is_err() {
                        break;
                    }
                    continue;
                }
                Err(error) if error.is_timeout() && self.client.is_none() => {
                    debug!(target: SERVER_TARGET, "connection closed before handshake");
                    break;
                }
                Err(error) => {
                    debug!(target: SERVER_TARGET, error = %error, "client read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let flow = match parse_message(&line) {
                Ok(message) => self.dispatch(message),
                Err(error) => self.reject_invalid(&error),
            };
            if matches!(flow, Flow::Close) {
                break;
            }
        }
        self.finish();
    }

    fn dispatch(&mut self, message: Message) -> Flow {
        let Some(client) = &self.client else {
            return match message {
                Message::Handshake(handshake) => self.admit(handshake),
                other => self.reply_error(
                    codes::NOT_CONNECTED,
                    format!("handshake required before {}", other.kind()),
                    other.request_id().map(ToOwned::to_owned),
                ),
            };
        };
        self.server.registry().touch(&client.client_id, client.session);
        let client_id = client.client_id.clone();

        match message {
            Message::Heartbeat(_) => {
                let registry_len = self.server.registry().len();
                let pending = self.server.coordinator().pending_count();
                self.reply(&Message::heartbeat_ack(
                    self.server.uptime_ms(),
                    u64::try_from(registry_len).unwrap_or(u64::MAX),
                    u64::try_from(pending).unwrap_or(u64::MAX),
                ))
            }
            Message::McpRequest(request) => self.serve_request(&client_id, request),
            Message::McpNotification(notification) => {
                let handler = self.server.handler();
                if catch_unwind(AssertUnwindSafe(|| {
                    handler.handle_notification(notification.payload, &client_id);
                }))
                .is_err()
                {
                    warn!(target: SERVER_TARGET, client_id, "notification handler panicked");
                }
                Flow::Continue
            }
            Message::RequestUpgrade(upgrade) => self.consider_upgrade(&client_id, &upgrade),
            Message::Disconnect(disconnect) => {
                debug!(
                    target: SERVER_TARGET,
                    client_id,
                    reason = disconnect.reason.as_deref().unwrap_or("none"),
                    "client sent disconnect"
                );
                Flow::Close
            }
            other => self.reply_error(
                codes::UNEXPECTED_MESSAGE,
                format!("{} is not accepted from clients", other.kind()),
                other.request_id().map(ToOwned::to_owned),
            ),
        }
    }

    fn admit(&mut self, handshake: Handshake) -> Flow {
        if let Some(reason) = self.admission_failure(&handshake) {
            info!(
                target: SERVER_TARGET,
                client_id = %handshake.client_id,
                client_version = %handshake.client_version,
                reason = %reason,
                "handshake rejected"
            );
            let identity = self.server.identity();
            let _ = self.send(&Message::handshake_rejected(
                identity.version.clone(),
                identity.instance_id.clone(),
                Some(identity.min_client_version.clone()),
                reason,
            ));
            return Flow::Close;
        }

        let identity = self.server.identity();
        let ack = Message::handshake_ack(
            identity.version.clone(),
            identity.instance_id.clone(),
            CAPABILITIES.iter().map(|cap| (*cap).to_owned()).collect(),
            Some(identity.min_client_version.clone()),
        );
        if self.send(&ack).is_err() {
            return Flow::Close;
        }
        if let Err(error) = lock_writer(&self.writer).get_ref().set_read_timeout(None) {
            warn!(target: SERVER_TARGET, error = %error, "failed to clear handshake timeout");
        }
        let session = self.server.registry().register(
            &handshake.client_id,
            &handshake.client_version,
            Arc::clone(&self.writer),
        );
        self.client = Some(Admitted {
            client_id: handshake.client_id,
            session,
        });
        self.server.sync_client_count();
        Flow::Continue
    }

    fn admission_failure(&self, handshake: &Handshake) -> Option<String> {
        if handshake.protocol_version != PROTOCOL_VERSION {
            return Some(format!(
                "protocol version {} is not supported (daemon speaks {PROTOCOL_VERSION})",
                handshake.protocol_version
            ));
        }
        match handshake.client_version.parse::<Version>() {
            Err(error) => return Some(error.to_string()),
            Ok(version) if !version.satisfies_minimum(&self.server.min_client_version()) => {
                return Some(format!(
                    "client version {} is older than minimum {}",
                    handshake.client_version,
                    self.server.identity().min_client_version
                ));
            }
            Ok(_) => {}
        }
        if !self.server.coordinator().can_accept_request() {
            return Some(String::from("daemon is shutting down"));
        }
        None
    }

    fn serve_request(&mut self, client_id: &str, request: McpRequest) -> Flow {
        let server = self.server;
        let coordinator = server.coordinator();
        if let Err(error) = coordinator.track_request(&request.request_id, client_id) {
            return self.reply_error(
                codes::SHUTTING_DOWN,
                error.to_string(),
                Some(request.request_id),
            );
        }

        let handler = server.handler();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.handle(request.payload, client_id)
        }));
        let reply = match outcome {
            Ok(Ok(payload)) => Message::mcp_response(request.request_id.clone(), client_id, payload),
            Ok(Err(error)) => Message::error(
                codes::HANDLER_ERROR,
                error.message(),
                Some(request.request_id.clone()),
                error.details().cloned(),
            ),
            Err(_) => {
                warn!(
                    target: SERVER_TARGET,
                    client_id,
                    request_id = %request.request_id,
                    "request handler panicked"
                );
                Message::error(
                    codes::HANDLER_ERROR,
                    "request handler panicked",
                    Some(request.request_id.clone()),
                    None,
                )
            }
        };
        let flow = self.reply(&reply);
        if let Some(client) = &self.client {
            server.registry().touch(&client.client_id, client.session);
        }
        coordinator.complete_request(&request.request_id);
        flow
    }

    fn consider_upgrade(&mut self, client_id: &str, upgrade: &RequestUpgrade) -> Flow {
        let running = self.server.daemon_version();
        let refusal = match upgrade.new_version.parse::<Version>() {
            Err(error) => Some(error.to_string()),
            Ok(requested) if requested <= running => Some(format!(
                "version {} is not newer than running {running}",
                upgrade.new_version
            )),
            Ok(_) if !self.server.coordinator().can_accept_request() => {
                Some(String::from("shutdown already in progress"))
            }
            Ok(_) => None,
        };
        if let Some(reason) = refusal {
            info!(target: SERVER_TARGET, client_id, reason = %reason, "upgrade refused");
            return self.reply(&Message::upgrade_abort(reason));
        }

        let coordinator = Arc::clone(self.server.coordinator());
        let new_version = upgrade.new_version.clone();
        let initiator = client_id.to_owned();
        let spawned = thread::Builder::new()
            .name(String::from("tetherd-upgrade"))
            .spawn(move || {
                if let Err(error) = coordinator.initiate_upgrade(&new_version, &initiator) {
                    warn!(target: SERVER_TARGET, error = %error, "upgrade not started");
                }
            });
        match spawned {
            Ok(_) => Flow::Continue,
            Err(error) => {
                warn!(target: SERVER_TARGET, error = %error, "failed to spawn upgrade thread");
                self.reply(&Message::upgrade_abort("daemon could not start the hand-off"))
            }
        }
    }

    fn reject_invalid(&mut self, error: &ValidationError) -> Flow {
        let details = error.field().map(|field| json!({ "field": field }));
        self.reply(&Message::error(
            codes::INVALID_MESSAGE,
            error.to_string(),
            None,
            details,
        ))
    }

    fn reply_error(&mut self, code: &str, message: String, request_id: Option<String>) -> Flow {
        self.reply(&Message::error(code, message, request_id, None))
    }

    fn reply(&mut self, message: &Message) -> Flow {
        match self.send(message) {
            Ok(()) => Flow::Continue,
            Err(()) => Flow::Close,
        }
    }

    fn send(&self, message: &Message) -> Result<(), ()> {
        lock_writer(&self.writer).send(message).map_err(|error| {
            debug!(
                target: SERVER_TARGET,
                kind = %message.kind(),
                error = %error,
                "failed to write to client"
            );
        })
    }

    fn finish(self) {
        if let Some(client) = self.client
            && self
                .server
                .registry()
                .unregister(&client.client_id, client.session)
        {
            self.server.sync_client_count();
        }
        let _ = lock_writer(&self.writer).get_ref().shutdown();
    }
}
