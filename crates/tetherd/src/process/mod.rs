//! Process entry point: configuration, telemetry, role election and the
//! lifetime of whichever role this process ends up playing.

mod config;
mod errors;
mod launch;
mod signals;
mod standalone;

pub use self::config::{ConfigLoader, StaticConfigLoader, SystemConfigLoader};
pub use self::errors::LaunchError;
pub use self::launch::{
    LaunchOutcome, LaunchPlan, ProcessControl, ServiceDeps, StdioStreams, run, run_with,
};
pub use self::signals::{ShutdownSignal, SignalError, SystemShutdownSignal};
pub use self::standalone::run_standalone;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Elections in a row that may end without a role before giving up.
pub const MAX_ELECTION_ATTEMPTS: u32 = 5;
