use serde_json::Value;
use thiserror::Error;

/// Failure reported by a [`RequestHandler`]; relayed to the client as a
/// `HANDLER_ERROR`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    details: Option<Value>,
}

impl HandlerError {
    /// Describes a failed request.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    /// Attaches structured context.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured context, if any.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }
}

/// Business logic invoked for each request.
///
/// Implementations are shared across client sessions and may be called
/// concurrently for different clients.
pub trait RequestHandler: Send + Sync {
    /// Produces the response payload for `payload` sent by `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the request cannot be served.
    fn handle(&self, payload: Value, client_id: &str) -> Result<Value, HandlerError>;

    /// Receives a one-way notification. Ignored by default.
    fn handle_notification(&self, payload: Value, client_id: &str) {
        let _ = (payload, client_id);
    }
}

/// Handler that answers every request with its own payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, payload: Value, _client_id: &str) -> Result<Value, HandlerError> {
        Ok(payload)
    }
}
