use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::health::HealthReporter;

use super::{
    BREAKER_TARGET, BreakerMetrics, BreakerSettings, CircuitBreaker, TickResult, Ticker,
    Transition,
};

/// Failure reported by a supervised check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DelegateError {
    message: String,
}

impl DelegateError {
    /// Wraps a description of the failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Periodic supervisory work run by the [`TimeoutChecker`].
pub trait TimeoutCheck: Send + Sync {
    /// Performs one round of checks.
    ///
    /// # Errors
    ///
    /// Returns [`DelegateError`] when the round failed; failures count
    /// towards opening the circuit.
    fn run(&self) -> Result<(), DelegateError>;
}

impl<F> TimeoutCheck for F
where
    F: Fn() -> Result<(), DelegateError> + Send + Sync,
{
    fn run(&self) -> Result<(), DelegateError> {
        self()
    }
}

struct CheckerCore {
    breaker: CircuitBreaker,
    check: Arc<dyn TimeoutCheck>,
    reporter: OnceCell<Arc<dyn HealthReporter>>,
}

impl CheckerCore {
    fn check_once(&self) -> TickResult {
        let result = self.breaker.tick(|| self.check.run());
        if let (Some(reporter), Some(transition)) = (self.reporter.get(), result.transition) {
            match transition {
                Transition::Opened => reporter.circuit_opened(&self.breaker.metrics()),
                Transition::Closed => reporter.circuit_closed(&self.breaker.metrics()),
                Transition::HalfOpened => {}
            }
        }
        result
    }
}

/// Drives a [`TimeoutCheck`] on a timer behind a [`CircuitBreaker`].
pub struct TimeoutChecker {
    core: Arc<CheckerCore>,
    interval: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl std::fmt::Debug for TimeoutChecker {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TimeoutChecker")
            .field("interval", &self.interval)
            .field("breaker", &self.core.breaker)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TimeoutChecker {
    /// Builds a stopped checker.
    #[must_use]
    pub fn new(
        check: Arc<dyn TimeoutCheck>,
        interval: Duration,
        settings: BreakerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(CheckerCore {
                breaker: CircuitBreaker::new(settings, clock),
                check,
                reporter: OnceCell::new(),
            }),
            interval,
            ticker: Mutex::new(None),
        }
    }

    /// Attaches a health reporter for circuit transitions.
    #[must_use]
    pub fn with_reporter(self, reporter: Arc<dyn HealthReporter>) -> Self {
        if self.core.reporter.set(reporter).is_err() {
            debug!(target: BREAKER_TARGET, "health reporter already attached");
        }
        self
    }

    /// Starts the timer. Returns `false` when it was already running.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the timer thread cannot be spawned.
    pub fn start(&self) -> io::Result<bool> {
        let mut ticker = self.ticker();
        if ticker.is_some() {
            debug!(target: BREAKER_TARGET, "timeout checker already running");
            return Ok(false);
        }
        let core = Arc::clone(&self.core);
        *ticker = Some(Ticker::start("tetherd-timeouts", self.interval, move || {
            core.check_once();
        })?);
        info!(
            target: BREAKER_TARGET,
            interval_ms = self.interval.as_millis(),
            "timeout checker started"
        );
        Ok(true)
    }

    /// Cancels the timer, waiting for an in-progress check. Safe to call
    /// when stopped.
    pub fn stop(&self) {
        let ticker = self.ticker().take();
        if let Some(ticker) = ticker {
            ticker.stop();
            info!(target: BREAKER_TARGET, "timeout checker stopped");
        }
    }

    /// Whether the timer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ticker().is_some()
    }

    /// Performs one tick immediately.
    pub fn check_once(&self) -> TickResult {
        self.core.check_once()
    }

    /// Breaker counters.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        self.core.breaker.metrics()
    }

    fn ticker(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TimeoutChecker {
    fn drop(&mut self) {
        self.stop();
    }
}
