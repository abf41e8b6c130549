//! Circuit-breaker-protected periodic supervision.
//!
//! A [`TimeoutChecker`] calls one [`TimeoutCheck`] delegate on a fixed
//! [`Ticker`]. Consecutive failures trip the [`CircuitBreaker`], after which
//! ticks are skipped until the cooldown elapses and a single trial call
//! decides whether to close the circuit again.

mod circuit;
mod checker;
mod ticker;

pub use self::checker::{DelegateError, TimeoutCheck, TimeoutChecker};
pub use self::circuit::{
    BreakerMetrics, BreakerSettings, CircuitBreaker, CircuitState, TickOutcome, TickResult,
    Transition,
};
pub use self::ticker::Ticker;

const BREAKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::breaker");
