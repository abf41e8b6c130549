//! Shared doubles and harnesses for the behavioural suites.

mod config_loader;
mod daemon;
mod gate;
mod reporter;
mod signal;
mod wire;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use daemon::{DAEMON_VERSION, DaemonHarness};
pub use gate::GateHandler;
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use signal::TestShutdownSignal;
pub use wire::WireClient;

use std::time::{Duration, Instant};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    condition()
}
