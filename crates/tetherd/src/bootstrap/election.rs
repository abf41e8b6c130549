use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::lock::{LockManager, LockRecord};

use super::{
    BOOTSTRAP_TARGET, BootstrapError, DaemonMode, DaemonProbe, DecisionCause, ModeDecision,
    ProbeOutcome,
};

/// Election inputs drawn from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSettings {
    /// Forces standalone mode.
    pub disable_daemon: bool,
    /// Bound on the connect and handshake reply of a probe.
    pub health_check_timeout: Duration,
}

impl From<&tether_config::Config> for BootstrapSettings {
    fn from(config: &tether_config::Config) -> Self {
        Self {
            disable_daemon: config.daemon_disabled(),
            health_check_timeout: config.health_check_timeout(),
        }
    }
}

/// Decides whether this process becomes the daemon, a proxy or standalone.
pub struct Bootstrap {
    lock: Arc<LockManager>,
    settings: BootstrapSettings,
    probe: Arc<dyn DaemonProbe>,
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Bootstrap")
            .field("lock", &self.lock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Bootstrap {
    /// Builds an election over `lock`, verifying daemons with `probe`.
    #[must_use]
    pub fn new(
        lock: Arc<LockManager>,
        settings: BootstrapSettings,
        probe: Arc<dyn DaemonProbe>,
    ) -> Self {
        Self {
            lock,
            settings,
            probe,
        }
    }

    /// Lock manager the election reads and writes.
    #[must_use]
    pub fn lock(&self) -> &Arc<LockManager> {
        &self.lock
    }

    /// Chooses a role from the lock record, process liveness and a live
    /// handshake with the recorded socket.
    #[must_use]
    pub fn determine_mode(&self) -> ModeDecision {
        let decision = self.decide();
        info!(
            target: BOOTSTRAP_TARGET,
            mode = %decision.mode,
            cause = %decision.cause,
            reason = %decision.reason,
            "role decided"
        );
        decision
    }

    fn decide(&self) -> ModeDecision {
        if self.settings.disable_daemon {
            return ModeDecision::new(
                DaemonMode::Standalone,
                DecisionCause::Disabled,
                "Daemon mode disabled",
            );
        }
        let Some(record) = self.lock.read_lock() else {
            return ModeDecision::new(
                DaemonMode::Daemon,
                DecisionCause::NoDaemon,
                "No existing daemon",
            );
        };
        if !LockManager::is_process_alive(record.pid) {
            return ModeDecision::new(
                DaemonMode::Daemon,
                DecisionCause::StaleLock,
                format!("Stale lock (pid {} not running)", record.pid),
            );
        }

        match self.probe.probe(&record, self.settings.health_check_timeout) {
            ProbeOutcome::NoResponse { reason } => ModeDecision::new(
                DaemonMode::Daemon,
                DecisionCause::Unresponsive,
                format!("Daemon not responding (pid {}): {reason}", record.pid),
            ),
            ProbeOutcome::Responded { instance_id, .. } if instance_id != record.instance_id => {
                ModeDecision::new(
                    DaemonMode::Daemon,
                    DecisionCause::InstanceMismatch,
                    format!(
                        "Instance mismatch (lock names {}, socket answered as {instance_id})",
                        record.instance_id
                    ),
                )
            }
            ProbeOutcome::Responded {
                accepted: false,
                draining: true,
                ..
            } => ModeDecision::new(
                DaemonMode::Proxy,
                DecisionCause::Draining,
                format!("Daemon draining (pid {}); awaiting successor", record.pid),
            )
            .with_existing(record),
            ProbeOutcome::Responded {
                accepted: false,
                error,
                ..
            } => ModeDecision::new(
                DaemonMode::Standalone,
                DecisionCause::Rejected,
                format!(
                    "Daemon rejected client: {}",
                    error.as_deref().unwrap_or("no reason given")
                ),
            )
            .with_existing(record),
            ProbeOutcome::Responded { .. } => ModeDecision::new(
                DaemonMode::Proxy,
                DecisionCause::Healthy,
                "Healthy daemon found",
            )
            .with_existing(record),
        }
    }

    /// Writes `record` as the daemon lock unless another contender got there
    /// first.
    ///
    /// Holds the election claim for the duration, and re-verifies any
    /// existing record immediately before writing. Returns `false` when the
    /// claim is held elsewhere or a verified daemon now exists; the caller
    /// should re-run [`Self::determine_mode`].
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Lock`] when the claim or the record cannot
    /// be written at all.
    pub fn acquire_daemon_lock(&self, record: &LockRecord) -> Result<bool, BootstrapError> {
        let Some(_claim) = self.lock.try_claim()? else {
            info!(target: BOOTSTRAP_TARGET, "election claim held by another process");
            return Ok(false);
        };

        if let Some(existing) = self.lock.read_lock()
            && existing.instance_id != record.instance_id
            && LockManager::is_process_alive(existing.pid)
        {
            let outcome = self
                .probe
                .probe(&existing, self.settings.health_check_timeout);
            if outcome.verifies(&existing) {
                info!(
                    target: BOOTSTRAP_TARGET,
                    pid = existing.pid,
                    instance_id = %existing.instance_id,
                    "verified daemon appeared during election"
                );
                return Ok(false);
            }
            debug!(
                target: BOOTSTRAP_TARGET,
                pid = existing.pid,
                ?outcome,
                "existing lock record is not a verified daemon; replacing"
            );
        }

        self.lock.write_lock(record)?;
        Ok(true)
    }
}
