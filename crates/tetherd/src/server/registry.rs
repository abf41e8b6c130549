use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tether_protocol::Message;

use crate::shutdown::{ClientNotifier, NotifyError};
use crate::transport::{ConnectionStream, MessageWriter, TransportError};

use super::SERVER_TARGET;

/// Writer half of a client connection, shared between its session and
/// broadcasts.
pub type SharedWriter = Arc<Mutex<MessageWriter<ConnectionStream>>>;

#[derive(Debug)]
struct ClientEntry {
    session: u64,
    version: String,
    writer: SharedWriter,
    last_seen: Instant,
}

/// Connected clients, keyed by client id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, ClientEntry>>,
    next_session: AtomicU64,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client and returns the session token that owns the entry.
    ///
    /// A client id already present is replaced; the earlier session can no
    /// longer unregister it.
    pub fn register(&self, client_id: &str, version: &str, writer: SharedWriter) -> u64 {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.clients().insert(
            client_id.to_owned(),
            ClientEntry {
                session,
                version: version.to_owned(),
                writer,
                last_seen: Instant::now(),
            },
        );
        if previous.is_some() {
            warn!(target: SERVER_TARGET, client_id, "client id reused; replacing session");
        }
        info!(target: SERVER_TARGET, client_id, version, "client connected");
        session
    }

    /// Removes the client if `session` still owns its entry.
    pub fn unregister(&self, client_id: &str, session: u64) -> bool {
        let mut clients = self.clients();
        if clients
            .get(client_id)
            .is_some_and(|entry| entry.session == session)
        {
            clients.remove(client_id);
            info!(target: SERVER_TARGET, client_id, "client disconnected");
            true
        } else {
            false
        }
    }

    /// Records activity from a client.
    pub fn touch(&self, client_id: &str, session: u64) {
        if let Some(entry) = self
            .clients()
            .get_mut(client_id)
            .filter(|entry| entry.session == session)
        {
            entry.last_seen = Instant::now();
        }
    }

    /// Number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients().len()
    }

    /// Whether no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    /// Version a connected client announced.
    #[must_use]
    pub fn client_version(&self, client_id: &str) -> Option<String> {
        self.clients()
            .get(client_id)
            .map(|entry| entry.version.clone())
    }

    /// Sends `message` to one client.
    ///
    /// # Errors
    ///
    /// Fails when the write fails. An unknown client is not an error.
    pub fn send_to(&self, client_id: &str, message: &Message) -> Result<bool, TransportError> {
        let writer = self
            .clients()
            .get(client_id)
            .map(|entry| Arc::clone(&entry.writer));
        writer.map_or(Ok(false), |writer| {
            lock_writer(&writer).send(message).map(|()| true)
        })
    }

    /// Disconnects clients silent for longer than `max_idle` and returns
    /// their ids. Clients for which `is_busy` holds are kept regardless.
    pub fn reap_stale(&self, max_idle: Duration, is_busy: impl Fn(&str) -> bool) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<(String, ClientEntry)> = {
            let mut clients = self.clients();
            let ids: Vec<String> = clients
                .iter()
                .filter(|(id, entry)| {
                    now.duration_since(entry.last_seen) > max_idle && !is_busy(id.as_str())
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| clients.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        for (client_id, entry) in &stale {
            warn!(
                target: SERVER_TARGET,
                client_id,
                idle_ms = now.duration_since(entry.last_seen).as_millis(),
                "reaping idle client"
            );
            close_writer(&entry.writer);
        }
        stale.into_iter().map(|(id, _)| id).collect()
    }

    /// Closes every client connection and empties the registry.
    pub fn close_all(&self) {
        let entries: Vec<ClientEntry> = self.clients().drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            close_writer(&entry.writer);
        }
        if !entries.is_empty() {
            info!(target: SERVER_TARGET, closed = entries.len(), "client connections closed");
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientNotifier for ClientRegistry {
    fn broadcast(&self, message: &Message) -> Result<(), NotifyError> {
        let targets: Vec<(String, SharedWriter)> = self
            .clients()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.writer)))
            .collect();
        let attempted = targets.len();
        let mut failed = 0;
        for (client_id, writer) in targets {
            if let Err(error) = lock_writer(&writer).send(message) {
                failed += 1;
                debug!(
                    target: SERVER_TARGET,
                    client_id,
                    error = %error,
                    "broadcast delivery failed"
                );
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(NotifyError { failed, attempted })
        }
    }
}

pub(super) fn lock_writer(
    writer: &SharedWriter,
) -> MutexGuard<'_, MessageWriter<ConnectionStream>> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn close_writer(writer: &SharedWriter) {
    if let Err(error) = lock_writer(writer).get_ref().shutdown() {
        debug!(target: SERVER_TARGET, error = %error, "client stream already closed");
    }
}
