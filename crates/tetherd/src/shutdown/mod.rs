//! Request tracking and graceful shutdown.
//!
//! The [`ShutdownCoordinator`] owns the set of in-flight requests. Once a
//! shutdown or upgrade begins it refuses new requests, tells every client how
//! long the grace period is, then polls until the set drains or the grace
//! period runs out. Requests still pending at that point are recorded as
//! force-killed and abandoned.

mod coordinator;
mod errors;
mod notifier;

pub use self::coordinator::{
    RequestInfo, ShutdownCoordinator, ShutdownMetrics, ShutdownReport, ShutdownSettings,
};
pub use self::errors::ShutdownError;
pub use self::notifier::{ClientNotifier, NotifyError};

const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");
