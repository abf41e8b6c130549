//! Test double for [`HealthReporter`] that records structured events for
//! assertions.

use std::sync::Mutex;

use tether_protocol::ShutdownReason;

use crate::bootstrap::{DaemonMode, ModeDecision};
use crate::breaker::BreakerMetrics;
use crate::health::HealthReporter;
use crate::lock::LockRecord;
use crate::process::LaunchError;
use crate::shutdown::ShutdownReport;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// A role was chosen.
    ElectionDecided { attempt: u32, mode: DaemonMode },
    /// The lock record now names this process.
    LockAcquired { instance_id: String },
    /// Another contender took the lock first.
    ElectionLost { attempt: u32 },
    /// Draining began.
    ShutdownStarted(ShutdownReason),
    /// Draining finished.
    ShutdownCompleted { reason: ShutdownReason, forced: bool },
    /// The timeout checker's circuit opened.
    CircuitOpened,
    /// The timeout checker's circuit closed.
    CircuitClosed,
    /// The process failed with the given description.
    LaunchFailed(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Modes chosen so far, in election order.
    #[must_use]
    pub fn modes(&self) -> Vec<DaemonMode> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::ElectionDecided { mode, .. } => Some(mode),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn election_decided(&self, attempt: u32, decision: &ModeDecision) {
        self.record(HealthEvent::ElectionDecided {
            attempt,
            mode: decision.mode,
        });
    }

    fn lock_acquired(&self, record: &LockRecord) {
        self.record(HealthEvent::LockAcquired {
            instance_id: record.instance_id.clone(),
        });
    }

    fn election_lost(&self, attempt: u32) {
        self.record(HealthEvent::ElectionLost { attempt });
    }

    fn shutdown_started(&self, reason: ShutdownReason, _pending_requests: usize) {
        self.record(HealthEvent::ShutdownStarted(reason));
    }

    fn shutdown_completed(&self, report: &ShutdownReport) {
        self.record(HealthEvent::ShutdownCompleted {
            reason: report.reason,
            forced: report.forced,
        });
    }

    fn circuit_opened(&self, _metrics: &BreakerMetrics) {
        self.record(HealthEvent::CircuitOpened);
    }

    fn circuit_closed(&self, _metrics: &BreakerMetrics) {
        self.record(HealthEvent::CircuitClosed);
    }

    fn launch_failed(&self, error: &LaunchError) {
        self.record(HealthEvent::LaunchFailed(error.to_string()));
    }
}
