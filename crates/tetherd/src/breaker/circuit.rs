use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use strum::Display;
use tracing::{debug, info, warn};

use crate::clock::Clock;

use super::BREAKER_TARGET;

/// Position of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    /// Every tick calls the delegate.
    Closed,
    /// Ticks are skipped until the cooldown elapses.
    Open,
    /// The next tick is a trial call.
    HalfOpen,
}

/// Thresholds for tripping and recovering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    max_consecutive_errors: u32,
    cooldown: Duration,
}

impl BreakerSettings {
    /// Builds settings; a threshold of zero is raised to one.
    #[must_use]
    pub fn new(max_consecutive_errors: u32, cooldown: Duration) -> Self {
        Self {
            max_consecutive_errors: max_consecutive_errors.max(1),
            cooldown,
        }
    }

    /// Failures in a row that open the circuit.
    #[must_use]
    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors
    }

    /// Time an open circuit waits before admitting a trial call.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl From<&tether_config::Config> for BreakerSettings {
    fn from(config: &tether_config::Config) -> Self {
        Self::new(config.max_consecutive_errors(), config.circuit_cooldown())
    }
}

/// Snapshot of the breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerMetrics {
    /// Current position.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_errors: u32,
    /// Delegate calls actually attempted.
    pub total_checks: u64,
    /// Delegate calls that failed.
    pub total_errors: u64,
    /// `total_errors / total_checks`, or zero before the first check.
    pub error_rate: f64,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The circuit was open; the delegate was not called.
    Skipped,
    /// The delegate succeeded.
    Succeeded,
    /// The delegate failed.
    Failed,
}

/// State change caused by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The circuit tripped or re-tripped.
    Opened,
    /// The cooldown elapsed and a trial call is being made.
    HalfOpened,
    /// A trial call succeeded.
    Closed,
}

/// Result of [`CircuitBreaker::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickResult {
    /// What happened to the delegate call.
    pub outcome: TickOutcome,
    /// The last state change the tick caused, if any.
    pub transition: Option<Transition>,
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    consecutive_errors: u32,
    total_checks: u64,
    total_errors: u64,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Three-state breaker guarding a fallible call.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker reading time from `clock`.
    #[must_use]
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                consecutive_errors: 0,
                total_checks: 0,
                total_errors: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current position, moving an open circuit to half-open when its
    /// cooldown has elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut state = self.lock_state();
        self.refresh(&mut state);
        state.circuit
    }

    /// Runs `call` unless the circuit is open, then records the outcome.
    ///
    /// The lock is not held while `call` runs. A half-open circuit admits a
    /// single trial call; ticks arriving while it runs are skipped.
    pub fn tick<E>(&self, call: impl FnOnce() -> Result<(), E>) -> TickResult
    where
        E: std::fmt::Display,
    {
        let mut transition = None;
        {
            let mut state = self.lock_state();
            if self.refresh(&mut state) {
                transition = Some(Transition::HalfOpened);
            }
            match state.circuit {
                CircuitState::Open => {
                    debug!(target: BREAKER_TARGET, "circuit open; skipping check");
                    return TickResult {
                        outcome: TickOutcome::Skipped,
                        transition,
                    };
                }
                CircuitState::HalfOpen if state.trial_in_flight => {
                    debug!(target: BREAKER_TARGET, "trial check running; skipping check");
                    return TickResult {
                        outcome: TickOutcome::Skipped,
                        transition,
                    };
                }
                CircuitState::HalfOpen => state.trial_in_flight = true,
                CircuitState::Closed => {}
            }
            state.total_checks += 1;
        }

        let result = call();

        let mut state = self.lock_state();
        state.trial_in_flight = false;
        match result {
            Ok(()) => {
                state.consecutive_errors = 0;
                if state.circuit == CircuitState::HalfOpen {
                    state.circuit = CircuitState::Closed;
                    state.opened_at = None;
                    info!(target: BREAKER_TARGET, "trial check succeeded; circuit closed");
                    transition = Some(Transition::Closed);
                }
                TickResult {
                    outcome: TickOutcome::Succeeded,
                    transition,
                }
            }
            Err(error) => {
                state.total_errors += 1;
                state.consecutive_errors = state.consecutive_errors.saturating_add(1);
                let trips = match state.circuit {
                    CircuitState::HalfOpen => true,
                    CircuitState::Closed => {
                        state.consecutive_errors >= self.settings.max_consecutive_errors
                    }
                    CircuitState::Open => false,
                };
                warn!(
                    target: BREAKER_TARGET,
                    error = %error,
                    consecutive_errors = state.consecutive_errors,
                    "supervised check failed"
                );
                if trips {
                    state.circuit = CircuitState::Open;
                    state.opened_at = Some(self.clock.now());
                    warn!(
                        target: BREAKER_TARGET,
                        cooldown_ms = self.settings.cooldown.as_millis(),
                        "circuit opened"
                    );
                    transition = Some(Transition::Opened);
                }
                TickResult {
                    outcome: TickOutcome::Failed,
                    transition,
                }
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        let state = self.lock_state();
        BreakerMetrics {
            state: state.circuit,
            consecutive_errors: state.consecutive_errors,
            total_checks: state.total_checks,
            total_errors: state.total_errors,
            error_rate: error_rate(state.total_errors, state.total_checks),
        }
    }

    fn refresh(&self, state: &mut BreakerState) -> bool {
        let cooled = state.circuit == CircuitState::Open
            && state
                .opened_at
                .is_none_or(|opened| self.clock.now().duration_since(opened) >= self.settings.cooldown);
        if cooled {
            state.circuit = CircuitState::HalfOpen;
            info!(target: BREAKER_TARGET, "cooldown elapsed; circuit half-open");
        }
        cooled
    }

    fn lock_state(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "check counts stay far below 2^53"
)]
fn error_rate(errors: u64, checks: u64) -> f64 {
    if checks == 0 {
        0.0
    } else {
        errors as f64 / checks as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use rstest::{fixture, rstest};

    const COOLDOWN: Duration = Duration::from_millis(10_000);

    struct BreakerFixture {
        clock: Arc<ManualClock>,
        breaker: CircuitBreaker,
    }

    #[fixture]
    fn breaker() -> BreakerFixture {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::new(
            BreakerSettings::new(5, COOLDOWN),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        BreakerFixture { clock, breaker }
    }

    fn fail() -> Result<(), &'static str> {
        Err("boom")
    }

    fn succeed() -> Result<(), &'static str> {
        Ok(())
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            breaker.tick(fail);
        }
    }

    #[rstest]
    fn five_failures_open_the_circuit(breaker: BreakerFixture) {
        let breaker = &breaker.breaker;
        for call in 1..=4 {
            let result = breaker.tick(fail);
            assert_eq!(result.outcome, TickOutcome::Failed, "call {call}");
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        let result = breaker.tick(fail);
        assert_eq!(result.transition, Some(Transition::Opened));
        assert_eq!(breaker.state(), CircuitState::Open);
        let metrics = breaker.metrics();
        assert_eq!(metrics.consecutive_errors, 5);
        assert_eq!(metrics.total_checks, 5);
        assert!((metrics.error_rate - 1.0).abs() < f64::EPSILON);
    }

    #[rstest]
    fn open_circuit_skips_the_delegate(breaker: BreakerFixture) {
        trip(&breaker.breaker);
        breaker.clock.advance(COOLDOWN - Duration::from_millis(1));
        let mut called = false;
        let result = breaker.breaker.tick(|| {
            called = true;
            succeed()
        });
        assert_eq!(result.outcome, TickOutcome::Skipped);
        assert!(!called);
        let metrics = breaker.breaker.metrics();
        assert_eq!(metrics.total_checks, 5);
        assert_eq!(metrics.consecutive_errors, 5);
    }

    #[rstest]
    fn trial_success_closes_the_circuit(breaker: BreakerFixture) {
        trip(&breaker.breaker);
        breaker.clock.advance(COOLDOWN);
        assert_eq!(breaker.breaker.state(), CircuitState::HalfOpen);
        let result = breaker.breaker.tick(succeed);
        assert_eq!(result.outcome, TickOutcome::Succeeded);
        assert_eq!(result.transition, Some(Transition::Closed));
        let metrics = breaker.breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.consecutive_errors, 0);
        assert_eq!(metrics.total_checks, 6);
        assert_eq!(metrics.total_errors, 5);
    }

    #[rstest]
    fn trial_failure_restarts_the_cooldown(breaker: BreakerFixture) {
        trip(&breaker.breaker);
        breaker.clock.advance(COOLDOWN);
        let result = breaker.breaker.tick(fail);
        assert_eq!(result.transition, Some(Transition::Opened));
        assert_eq!(breaker.breaker.state(), CircuitState::Open);

        breaker.clock.advance(COOLDOWN - Duration::from_millis(1));
        assert_eq!(breaker.breaker.tick(succeed).outcome, TickOutcome::Skipped);
        breaker.clock.advance(Duration::from_millis(1));
        assert_eq!(breaker.breaker.tick(succeed).outcome, TickOutcome::Succeeded);
    }

    #[rstest]
    fn success_resets_consecutive_errors(breaker: BreakerFixture) {
        for _ in 0..4 {
            breaker.breaker.tick(fail);
        }
        breaker.breaker.tick(succeed);
        breaker.breaker.tick(fail);
        let metrics = breaker.breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.consecutive_errors, 1);
        assert_eq!(metrics.total_errors, 5);
    }

    #[rstest]
    fn half_open_admits_a_single_trial(breaker: BreakerFixture) {
        trip(&breaker.breaker);
        breaker.clock.advance(COOLDOWN);
        let mut overlapping = None;
        let result = breaker.breaker.tick(|| {
            overlapping = Some(breaker.breaker.tick(succeed));
            succeed()
        });
        assert_eq!(result.outcome, TickOutcome::Succeeded);
        assert_eq!(
            overlapping.map(|tick| tick.outcome),
            Some(TickOutcome::Skipped)
        );
        let metrics = breaker.breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.total_checks, 6);
    }

    #[test]
    fn error_rate_is_zero_before_any_check() {
        let breaker = CircuitBreaker::new(
            BreakerSettings::new(0, Duration::ZERO),
            Arc::new(ManualClock::new()),
        );
        assert!(breaker.metrics().error_rate.abs() < f64::EPSILON);
        breaker.tick(fail);
        assert_eq!(breaker.state(), CircuitState::HalfOpen, "zero cooldown");
    }
}
