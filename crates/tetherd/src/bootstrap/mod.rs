//! Role election.
//!
//! A starting process reads the lock record, checks whether the recorded
//! process is alive and then asks the socket who is listening. Only a daemon
//! that answers the handshake with the instance id written in the lock
//! record counts as verified; anything else is displaced.

mod decision;
mod election;
mod errors;
mod probe;

pub use self::decision::{DaemonMode, DecisionCause, ModeDecision};
pub use self::election::{Bootstrap, BootstrapSettings};
pub use self::errors::BootstrapError;
pub use self::probe::{DaemonProbe, HandshakeProbe, ProbeOutcome};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");
