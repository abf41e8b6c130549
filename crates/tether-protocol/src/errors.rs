//! Error types for message validation and encoding.

use thiserror::Error;

use crate::MessageKind;

/// Reasons a raw line or JSON value was rejected.
///
/// Each variant names the field at fault so the daemon can log and report a
/// precise reason back to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The line was empty or not valid JSON.
    #[error("malformed message: {message}")]
    Malformed {
        /// Parser diagnostic.
        message: String,
    },
    /// The top-level JSON value was not an object.
    #[error("message must be a JSON object")]
    NotAnObject,
    /// The `type` field named a kind outside the closed set.
    #[error("unknown message type '{value}'")]
    UnknownKind {
        /// Offending value.
        value: String,
    },
    /// A required field was absent.
    #[error("missing required field '{field}'")]
    MissingField {
        /// Kind being validated, when already known.
        kind: Option<MessageKind>,
        /// Wire name of the absent field.
        field: &'static str,
    },
    /// A field was present but had the wrong shape.
    #[error("field '{field}' must be {expected}")]
    InvalidField {
        /// Kind being validated, when already known.
        kind: Option<MessageKind>,
        /// Wire name of the offending field.
        field: &'static str,
        /// Human-readable description of the accepted shape.
        expected: &'static str,
    },
    /// A field that the kind does not define was present.
    #[error("unexpected field '{field}' for message type '{kind}'")]
    UnknownField {
        /// Kind being validated.
        kind: MessageKind,
        /// Wire name of the extra field.
        field: String,
    },
}

impl ValidationError {
    /// Returns the wire name of the field at fault, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field, .. } | Self::InvalidField { field, .. } => Some(field),
            Self::UnknownField { field, .. } => Some(field.as_str()),
            Self::UnknownKind { .. } => Some("type"),
            Self::Malformed { .. } | Self::NotAnObject => None,
        }
    }

    /// Returns the message kind the failure relates to, if known.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::MissingField { kind, .. } | Self::InvalidField { kind, .. } => *kind,
            Self::UnknownField { kind, .. } => Some(*kind),
            Self::Malformed { .. } | Self::NotAnObject | Self::UnknownKind { .. } => None,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Failures while encoding a message for the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialising the message to JSON failed.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    /// The encoded line exceeds [`crate::MAX_LINE_BYTES`].
    #[error("encoded message is {size} bytes, above the {max_size} byte limit")]
    TooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Configured limit.
        max_size: usize,
    },
}
