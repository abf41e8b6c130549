use strum::Display;

use crate::lock::LockRecord;

/// Role a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DaemonMode {
    /// Holds the lock and serves clients.
    Daemon,
    /// Forwards requests to the verified daemon.
    Proxy,
    /// Handles requests in-process without a daemon.
    Standalone,
}

/// Which branch of the election produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DecisionCause {
    /// Daemon mode is switched off.
    Disabled,
    /// No lock record exists.
    NoDaemon,
    /// The recorded process is gone.
    StaleLock,
    /// The recorded process is alive but its socket did not answer.
    Unresponsive,
    /// The socket answered with a different instance id.
    InstanceMismatch,
    /// The recorded daemon answered and admitted us.
    Healthy,
    /// The recorded daemon answered and refused us.
    Rejected,
    /// The recorded daemon is draining; its successor should be awaited.
    Draining,
}

/// Outcome of [`super::Bootstrap::determine_mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDecision {
    /// Chosen role.
    pub mode: DaemonMode,
    /// Human-readable explanation.
    pub reason: String,
    /// The verified daemon, when one answered.
    pub existing_daemon: Option<LockRecord>,
    /// Branch that produced the decision.
    pub cause: DecisionCause,
}

impl ModeDecision {
    pub(super) fn new(mode: DaemonMode, cause: DecisionCause, reason: impl Into<String>) -> Self {
        Self {
            mode,
            reason: reason.into(),
            existing_daemon: None,
            cause,
        }
    }

    pub(super) fn with_existing(mut self, record: LockRecord) -> Self {
        self.existing_daemon = Some(record);
        self
    }

    /// Whether a live but unverified process may still hold the socket, so
    /// the new daemon must replace the socket file rather than refuse it.
    #[must_use]
    pub fn requires_takeover(&self) -> bool {
        matches!(
            self.cause,
            DecisionCause::Unresponsive | DecisionCause::InstanceMismatch
        )
    }
}
