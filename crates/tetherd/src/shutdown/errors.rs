use thiserror::Error;

/// Errors raised by the shutdown coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// A request arrived after draining began.
    #[error("request {request_id} refused: daemon is shutting down")]
    NotAccepting {
        /// Refused request.
        request_id: String,
    },
    /// `initiate_shutdown` was called twice.
    #[error("shutdown already in progress")]
    AlreadyShuttingDown,
    /// An upgrade was requested while a shutdown or upgrade was under way.
    #[error("an upgrade or shutdown is already in progress")]
    UpgradeInProgress,
}
