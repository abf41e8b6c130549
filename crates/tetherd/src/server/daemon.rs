use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use tether_protocol::{Version, VersionParseError};

use crate::lock::LockManager;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{ConnectionHandler, ConnectionStream};

use super::session::Session;
use super::{ClientRegistry, RequestHandler, SERVER_TARGET};

/// Bound on how long a connection may stay silent before its handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on a single write to a client.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Who this daemon is, as announced in handshake acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonIdentity {
    /// Identifier written to the lock record.
    pub instance_id: String,
    /// Daemon build version.
    pub version: String,
    /// Oldest client version admitted.
    pub min_client_version: String,
}

/// Serves client connections for the elected daemon.
pub struct DaemonServer {
    identity: DaemonIdentity,
    daemon_version: Version,
    min_client_version: Version,
    started: Instant,
    registry: Arc<ClientRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    handler: Arc<dyn RequestHandler>,
    lock: Arc<LockManager>,
}

impl std::fmt::Debug for DaemonServer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DaemonServer")
            .field("identity", &self.identity)
            .field("clients", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl DaemonServer {
    /// Builds a server.
    ///
    /// # Errors
    ///
    /// Fails when the daemon or minimum client version is not a valid
    /// version string.
    pub fn new(
        identity: DaemonIdentity,
        registry: Arc<ClientRegistry>,
        coordinator: Arc<ShutdownCoordinator>,
        handler: Arc<dyn RequestHandler>,
        lock: Arc<LockManager>,
    ) -> Result<Self, VersionParseError> {
        let daemon_version = identity.version.parse()?;
        let min_client_version = identity.min_client_version.parse()?;
        Ok(Self {
            identity,
            daemon_version,
            min_client_version,
            started: Instant::now(),
            registry,
            coordinator,
            handler,
            lock,
        })
    }

    /// Identity announced to clients.
    #[must_use]
    pub fn identity(&self) -> &DaemonIdentity {
        &self.identity
    }

    /// Connected clients.
    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Coordinator tracking this server's requests.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    pub(super) fn daemon_version(&self) -> Version {
        self.daemon_version
    }

    pub(super) fn min_client_version(&self) -> Version {
        self.min_client_version
    }

    pub(super) fn handler(&self) -> &dyn RequestHandler {
        self.handler.as_ref()
    }

    pub(super) fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Mirrors the registry size into the lock record.
    pub(super) fn sync_client_count(&self) {
        let count = u64::try_from(self.registry.len()).unwrap_or(u64::MAX);
        match self.lock.update_client_count(count) {
            Ok(true) => {}
            Ok(false) => debug!(
                target: SERVER_TARGET,
                client_count = count,
                "lock record not ours; client count not recorded"
            ),
            Err(error) => warn!(
                target: SERVER_TARGET,
                error = %error,
                "failed to record client count"
            ),
        }
    }
}

impl ConnectionHandler for DaemonServer {
    fn handle(&self, stream: ConnectionStream) {
        if let Err(error) = stream
            .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .and_then(|()| stream.set_write_timeout(Some(WRITE_TIMEOUT)))
        {
            warn!(target: SERVER_TARGET, error = %error, "failed to configure client stream");
            return;
        }
        match Session::open(self, stream) {
            Ok(session) => session.run(),
            Err(error) => {
                warn!(target: SERVER_TARGET, error = %error, "failed to open client session");
            }
        }
    }
}
