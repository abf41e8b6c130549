//! Lifecycle and IPC substrate for a shared local daemon.
//!
//! Every `tetherd` process starts the same way: it loads configuration,
//! initialises structured telemetry and then elects a role.
//!
//! - **daemon**: no healthy daemon exists, so this process binds the local
//!   socket, writes the lock record and serves clients until a signal or an
//!   upgrade request drains it.
//! - **proxy**: a daemon answered the handshake with the instance id named
//!   in the lock record, so this process forwards its request stream to it.
//! - **standalone**: the daemon is disabled or refused this client, so
//!   requests are served in-process.
//!
//! Election only trusts a daemon that proves its identity over the socket.
//! A live pid alone is not enough, because pids are reused. Losing the race
//! for the lock is not an error; the loser re-elects and usually ends up a
//! proxy.
//!
//! While serving, the daemon tracks in-flight requests in the
//! [`ShutdownCoordinator`], which drains them on shutdown and force-kills
//! whatever is left when the grace period runs out. A
//! [`TimeoutChecker`] periodically confirms the daemon still owns the lock
//! and reaps silent clients, backing off through a circuit breaker when the
//! check keeps failing.

pub mod bootstrap;
pub mod breaker;
pub mod clock;
mod health;
pub mod identity;
pub mod lock;
mod process;
pub mod proxy;
pub mod server;
pub mod shutdown;
pub mod stdio;
mod telemetry;
pub mod transport;

pub use bootstrap::{Bootstrap, BootstrapError, DaemonMode, ModeDecision};
pub use breaker::{CircuitState, TimeoutChecker};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use lock::{LockManager, LockRecord};
pub use process::{
    ConfigLoader, LaunchError, LaunchOutcome, LaunchPlan, MAX_ELECTION_ATTEMPTS, ProcessControl,
    ServiceDeps, ShutdownSignal, SignalError, StaticConfigLoader, StdioStreams,
    SystemConfigLoader, SystemShutdownSignal, run, run_standalone, run_with,
};
pub use server::{DaemonServer, RequestHandler};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{TelemetryError, TelemetryHandle, TelemetrySettings};

#[cfg(test)]
mod tests;
