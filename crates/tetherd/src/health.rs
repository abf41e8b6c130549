//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use tether_protocol::ShutdownReason;

use crate::bootstrap::ModeDecision;
use crate::breaker::BreakerMetrics;
use crate::lock::LockRecord;
use crate::process::LaunchError;
use crate::shutdown::ShutdownReport;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked once per election attempt with the chosen role.
    fn election_decided(&self, attempt: u32, decision: &ModeDecision);

    /// Invoked after this process wrote the lock record.
    fn lock_acquired(&self, record: &LockRecord);

    /// Invoked when another contender won the race for the lock.
    fn election_lost(&self, attempt: u32);

    /// Invoked when draining begins.
    fn shutdown_started(&self, reason: ShutdownReason, pending_requests: usize);

    /// Invoked once draining has finished, gracefully or not.
    fn shutdown_completed(&self, report: &ShutdownReport);

    /// Invoked when the timeout checker trips its circuit.
    fn circuit_opened(&self, metrics: &BreakerMetrics);

    /// Invoked when a trial call closes the circuit again.
    fn circuit_closed(&self, metrics: &BreakerMetrics);

    /// Invoked when the process cannot start or run.
    fn launch_failed(&self, error: &LaunchError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn election_decided(&self, attempt: u32, decision: &ModeDecision) {
        (**self).election_decided(attempt, decision);
    }

    fn lock_acquired(&self, record: &LockRecord) {
        (**self).lock_acquired(record);
    }

    fn election_lost(&self, attempt: u32) {
        (**self).election_lost(attempt);
    }

    fn shutdown_started(&self, reason: ShutdownReason, pending_requests: usize) {
        (**self).shutdown_started(reason, pending_requests);
    }

    fn shutdown_completed(&self, report: &ShutdownReport) {
        (**self).shutdown_completed(report);
    }

    fn circuit_opened(&self, metrics: &BreakerMetrics) {
        (**self).circuit_opened(metrics);
    }

    fn circuit_closed(&self, metrics: &BreakerMetrics) {
        (**self).circuit_closed(metrics);
    }

    fn launch_failed(&self, error: &LaunchError) {
        (**self).launch_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn election_decided(&self, attempt: u32, decision: &ModeDecision) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "election_decided",
            attempt,
            mode = %decision.mode,
            reason = %decision.reason,
            existing_pid = decision.existing_daemon.as_ref().map(|record| record.pid),
            "process role decided"
        );
    }

    fn lock_acquired(&self, record: &LockRecord) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "lock_acquired",
            pid = record.pid,
            instance_id = %record.instance_id,
            socket = %record.socket_path,
            "daemon lock acquired"
        );
    }

    fn election_lost(&self, attempt: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "election_lost",
            attempt,
            "another process won the daemon role; re-electing"
        );
    }

    fn shutdown_started(&self, reason: ShutdownReason, pending_requests: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            reason = %reason,
            pending_requests,
            "daemon draining"
        );
    }

    fn shutdown_completed(&self, report: &ShutdownReport) {
        if report.forced {
            tracing::warn!(
                target: HEALTH_TARGET,
                event = "shutdown_completed",
                reason = %report.reason,
                forced = true,
                force_killed = ?report.force_killed_request_ids,
                elapsed_ms = report.elapsed.as_millis(),
                "daemon drain timed out; requests abandoned"
            );
        } else {
            tracing::info!(
                target: HEALTH_TARGET,
                event = "shutdown_completed",
                reason = %report.reason,
                forced = false,
                elapsed_ms = report.elapsed.as_millis(),
                "daemon drained"
            );
        }
    }

    fn circuit_opened(&self, metrics: &BreakerMetrics) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "circuit_opened",
            consecutive_errors = metrics.consecutive_errors,
            total_checks = metrics.total_checks,
            total_errors = metrics.total_errors,
            "timeout checker circuit opened"
        );
    }

    fn circuit_closed(&self, metrics: &BreakerMetrics) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "circuit_closed",
            total_checks = metrics.total_checks,
            total_errors = metrics.total_errors,
            "timeout checker circuit closed"
        );
    }

    fn launch_failed(&self, error: &LaunchError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "launch_failed",
            error = %error,
            "tetherd failed"
        );
    }
}
