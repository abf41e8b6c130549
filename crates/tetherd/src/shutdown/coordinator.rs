use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tether_protocol::{Message, ShutdownReason};

use crate::health::HealthReporter;

use super::{ClientNotifier, SHUTDOWN_TARGET, ShutdownError};

/// Floor applied to the drain poll interval.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Timing for the drain phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSettings {
    max_wait: Duration,
    check_interval: Duration,
}

impl ShutdownSettings {
    /// Builds settings, clamping `check_interval` to at least 10 ms.
    #[must_use]
    pub fn new(max_wait: Duration, check_interval: Duration) -> Self {
        Self {
            max_wait,
            check_interval: check_interval.max(MIN_CHECK_INTERVAL),
        }
    }

    /// Grace period granted to in-flight requests.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Drain poll interval.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    fn max_wait_ms(&self) -> u64 {
        u64::try_from(self.max_wait.as_millis()).unwrap_or(u64::MAX)
    }
}

impl From<&tether_config::Config> for ShutdownSettings {
    fn from(config: &tether_config::Config) -> Self {
        Self::new(config.shutdown_max_wait(), config.shutdown_check_interval())
    }
}

/// A request the daemon has accepted but not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Correlation identifier.
    pub request_id: String,
    /// Client that sent the request.
    pub client_id: String,
    /// When the request was accepted.
    pub start_time: Instant,
}

/// Outcome of a completed shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Why the daemon stopped.
    pub reason: ShutdownReason,
    /// Whether the grace period ran out with requests still pending.
    pub forced: bool,
    /// Requests abandoned when the grace period ran out, sorted.
    pub force_killed_request_ids: Vec<String>,
    /// Requests completed over the daemon's lifetime.
    pub completed_requests: u64,
    /// Time spent draining.
    pub elapsed: Duration,
}

/// Snapshot of the coordinator's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownMetrics {
    /// Requests currently in flight.
    pub pending_requests: usize,
    /// In-flight requests grouped by client.
    pub pending_by_client: BTreeMap<String, usize>,
    /// Requests ever tracked.
    pub total_tracked: u64,
    /// Requests ever completed.
    pub total_completed: u64,
    /// Whether draining has started.
    pub shutting_down: bool,
    /// Whether an upgrade hand-off has been announced.
    pub pending_upgrade: bool,
    /// Whether the drain gave up on pending requests.
    pub force_shutdown_triggered: bool,
    /// Requests abandoned by a forced shutdown.
    pub force_killed_request_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    pending: HashMap<String, RequestInfo>,
    shutting_down: bool,
    pending_upgrade: bool,
    total_tracked: u64,
    total_completed: u64,
    force_shutdown_triggered: bool,
    force_killed_request_ids: Vec<String>,
    report: Option<ShutdownReport>,
}

/// Tracks in-flight requests and drives graceful or forced shutdown.
pub struct ShutdownCoordinator {
    settings: ShutdownSettings,
    notifier: Arc<dyn ClientNotifier>,
    reporter: Option<Arc<dyn HealthReporter>>,
    state: Mutex<CoordinatorState>,
    changed: Condvar,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ShutdownCoordinator")
            .field("settings", &self.settings)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl ShutdownCoordinator {
    /// Creates a coordinator that announces shutdowns through `notifier`.
    #[must_use]
    pub fn new(settings: ShutdownSettings, notifier: Arc<dyn ClientNotifier>) -> Self {
        Self {
            settings,
            notifier,
            reporter: None,
            state: Mutex::new(CoordinatorState::default()),
            changed: Condvar::new(),
        }
    }

    /// Attaches a health reporter for shutdown events.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Drain timing in effect.
    #[must_use]
    pub fn settings(&self) -> ShutdownSettings {
        self.settings
    }

    /// Whether new requests may still be accepted.
    #[must_use]
    pub fn can_accept_request(&self) -> bool {
        let state = self.state();
        !(state.shutting_down || state.pending_upgrade)
    }

    /// Whether draining has started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Whether an upgrade hand-off has been announced.
    #[must_use]
    pub fn is_upgrade_pending(&self) -> bool {
        self.state().pending_upgrade
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Records an accepted request. A duplicate id is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::NotAccepting`] once a shutdown or upgrade has
    /// begun.
    pub fn track_request(&self, request_id: &str, client_id: &str) -> Result<(), ShutdownError> {
        let mut state = self.state();
        if state.shutting_down || state.pending_upgrade {
            return Err(ShutdownError::NotAccepting {
                request_id: request_id.to_owned(),
            });
        }
        if state.pending.contains_key(request_id) {
            warn!(
                target: SHUTDOWN_TARGET,
                request_id,
                client_id,
                "request already tracked; ignoring duplicate"
            );
            return Ok(());
        }
        state.pending.insert(
            request_id.to_owned(),
            RequestInfo {
                request_id: request_id.to_owned(),
                client_id: client_id.to_owned(),
                start_time: Instant::now(),
            },
        );
        state.total_tracked += 1;
        Ok(())
    }

    /// Marks a request finished. Unknown ids are ignored.
    pub fn complete_request(&self, request_id: &str) {
        let mut state = self.state();
        if let Some(info) = state.pending.remove(request_id) {
            state.total_completed += 1;
            debug!(
                target: SHUTDOWN_TARGET,
                request_id,
                client_id = %info.client_id,
                duration_ms = info.start_time.elapsed().as_millis(),
                "request completed"
            );
            self.changed.notify_all();
        }
    }

    /// Stops accepting requests, notifies clients and drains.
    ///
    /// Blocks until every pending request completes or the grace period runs
    /// out, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::AlreadyShuttingDown`] when called twice.
    pub fn initiate_shutdown(&self, reason: ShutdownReason) -> Result<ShutdownReport, ShutdownError> {
        let pending = {
            let mut state = self.state();
            if state.shutting_down {
                return Err(ShutdownError::AlreadyShuttingDown);
            }
            state.shutting_down = true;
            state.pending.len()
        };
        info!(
            target: SHUTDOWN_TARGET,
            reason = %reason,
            pending_requests = pending,
            grace_period_ms = self.settings.max_wait_ms(),
            "shutdown initiated"
        );
        if let Some(reporter) = &self.reporter {
            reporter.shutdown_started(reason, pending);
        }
        self.broadcast(&Message::shutdown(reason, self.settings.max_wait_ms()));

        let report = self.drain(reason);

        self.state().report = Some(report.clone());
        self.changed.notify_all();
        if let Some(reporter) = &self.reporter {
            reporter.shutdown_completed(&report);
        }
        Ok(report)
    }

    /// Announces an upgrade hand-off to `new_version`, then shuts down with
    /// [`ShutdownReason::Upgrade`].
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::UpgradeInProgress`] when a shutdown or
    /// upgrade has already begun.
    pub fn initiate_upgrade(
        &self,
        new_version: &str,
        initiator_client_id: &str,
    ) -> Result<ShutdownReport, ShutdownError> {
        {
            let mut state = self.state();
            if state.shutting_down || state.pending_upgrade {
                return Err(ShutdownError::UpgradeInProgress);
            }
            state.pending_upgrade = true;
        }
        info!(
            target: SHUTDOWN_TARGET,
            new_version,
            initiator = initiator_client_id,
            "upgrade hand-off initiated"
        );
        self.broadcast(&Message::upgrade_pending(
            new_version,
            self.settings.max_wait_ms(),
            initiator_client_id,
        ));
        self.initiate_shutdown(ShutdownReason::Upgrade)
    }

    /// Blocks until a shutdown has completed and returns its report.
    pub fn wait_for_completion(&self) -> ShutdownReport {
        let mut state = self.state();
        loop {
            if let Some(report) = &state.report {
                return report.clone();
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Self::wait_for_completion`] but gives up after `timeout`.
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> Option<ShutdownReport> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if let Some(report) = &state.report {
                return Some(report.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Current counters and pending requests grouped by client.
    #[must_use]
    pub fn metrics(&self) -> ShutdownMetrics {
        let state = self.state();
        let mut pending_by_client = BTreeMap::new();
        for info in state.pending.values() {
            *pending_by_client.entry(info.client_id.clone()).or_insert(0) += 1;
        }
        ShutdownMetrics {
            pending_requests: state.pending.len(),
            pending_by_client,
            total_tracked: state.total_tracked,
            total_completed: state.total_completed,
            shutting_down: state.shutting_down,
            pending_upgrade: state.pending_upgrade,
            force_shutdown_triggered: state.force_shutdown_triggered,
            force_killed_request_ids: state.force_killed_request_ids.clone(),
        }
    }

    fn drain(&self, reason: ShutdownReason) -> ShutdownReport {
        let started = Instant::now();
        let mut state = self.state();
        loop {
            let elapsed = started.elapsed();
            if state.pending.is_empty() {
                return ShutdownReport {
                    reason,
                    forced: false,
                    force_killed_request_ids: Vec::new(),
                    completed_requests: state.total_completed,
                    elapsed,
                };
            }
            if elapsed >= self.settings.max_wait {
                let mut killed: Vec<String> = state.pending.drain().map(|(id, _)| id).collect();
                killed.sort();
                state.force_shutdown_triggered = true;
                state.force_killed_request_ids.clone_from(&killed);
                warn!(
                    target: SHUTDOWN_TARGET,
                    force_killed = ?killed,
                    elapsed_ms = elapsed.as_millis(),
                    "drain timed out; abandoning pending requests"
                );
                return ShutdownReport {
                    reason,
                    forced: true,
                    force_killed_request_ids: killed,
                    completed_requests: state.total_completed,
                    elapsed,
                };
            }
            let remaining = self.settings.max_wait - elapsed;
            debug!(
                target: SHUTDOWN_TARGET,
                pending_requests = state.pending.len(),
                "waiting for requests to drain"
            );
            state = self
                .changed
                .wait_timeout(state, remaining.min(self.settings.check_interval))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn broadcast(&self, message: &Message) {
        if let Err(error) = self.notifier.broadcast(message) {
            warn!(
                target: SHUTDOWN_TARGET,
                kind = %message.kind(),
                error = %error,
                "client notification failed; continuing"
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
