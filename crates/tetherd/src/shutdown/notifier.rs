use thiserror::Error;

use tether_protocol::Message;

/// Delivers daemon-initiated messages to every connected client.
pub trait ClientNotifier: Send + Sync {
    /// Sends `message` to all clients.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when at least one client could not be reached.
    /// Delivery to the remaining clients is still attempted.
    fn broadcast(&self, message: &Message) -> Result<(), NotifyError>;
}

/// Partial or total broadcast failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to notify {failed} of {attempted} clients")]
pub struct NotifyError {
    /// Clients that could not be written to.
    pub failed: usize,
    /// Clients a delivery was attempted for.
    pub attempted: usize,
}
