use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::breaker::{DelegateError, TimeoutCheck};
use crate::lock::LockManager;
use crate::shutdown::ShutdownCoordinator;

use super::{ClientRegistry, SERVER_TARGET};

/// Periodic daemon housekeeping run behind the circuit breaker.
///
/// Each round confirms the lock record still names this daemon and
/// disconnects clients that stopped sending heartbeats. A client whose
/// request is still being handled cannot read or send heartbeats, so it is
/// never reaped.
#[derive(Debug)]
pub struct DaemonSupervisor {
    lock: Arc<LockManager>,
    registry: Arc<ClientRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    max_idle: Duration,
}

impl DaemonSupervisor {
    /// Clients silent for longer than `max_idle` are reaped.
    #[must_use]
    pub fn new(
        lock: Arc<LockManager>,
        registry: Arc<ClientRegistry>,
        coordinator: Arc<ShutdownCoordinator>,
        max_idle: Duration,
    ) -> Self {
        Self {
            lock,
            registry,
            coordinator,
            max_idle,
        }
    }
}

impl TimeoutCheck for DaemonSupervisor {
    fn run(&self) -> Result<(), DelegateError> {
        let busy = self.coordinator.metrics().pending_by_client;
        let reaped = self
            .registry
            .reap_stale(self.max_idle, |client_id| busy.contains_key(client_id));
        if !reaped.is_empty() {
            let count = u64::try_from(self.registry.len()).unwrap_or(u64::MAX);
            self.lock
                .update_client_count(count)
                .map_err(|error| DelegateError::new(error.to_string()))?;
        }
        if !self.lock.holds_lock() {
            return Err(DelegateError::new(
                "lock record no longer names this daemon",
            ));
        }
        debug!(
            target: SERVER_TARGET,
            reaped = reaped.len(),
            clients = self.registry.len(),
            "supervision round complete"
        );
        Ok(())
    }
}
