//! Wire protocol shared by the tether daemon and its clients.
//!
//! Messages travel as newline-delimited JSON over a local byte stream. Every
//! line carries a `type` drawn from the closed [`MessageKind`] set plus a
//! millisecond `timestamp`; the remaining fields depend on the kind.
//!
//! Decoding is deliberately strict. [`validate_message`] checks the base
//! envelope first and only then runs the kind-specific checks, rejecting
//! unknown fields as well as missing or mistyped ones. A stale or mismatched
//! peer therefore fails with an error naming the offending field instead of
//! leaking half-understood data into daemon state.
//!
//! ```
//! use tether_protocol::{Message, parse_message, serialize_message};
//!
//! let message = Message::heartbeat("client-1");
//! let line = serialize_message(&message).expect("heartbeat serialises");
//! assert_eq!(parse_message(&line).expect("heartbeat parses"), message);
//! ```
//!
//! The crate performs no I/O; framing onto sockets lives in the daemon.

mod codec;
mod errors;
mod kind;
mod message;
mod validate;
mod version;

pub use codec::{encode_line, parse_message, serialize_message};
pub use errors::{ProtocolError, ValidationError};
pub use kind::{MessageKind, ShutdownReason};
pub use message::{
    Disconnect, ErrorMessage, Handshake, HandshakeAck, Heartbeat, HeartbeatAck, McpNotification,
    McpRequest, McpResponse, Message, RequestUpgrade, Shutdown, UpgradeAbort, UpgradePending,
    now_millis,
};
pub use validate::validate_message;
pub use version::{Version, VersionParseError};

/// Wire format revision. Bumped only for breaking changes to the envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Lowest protocol version a handshake may advertise.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Highest protocol version a handshake may advertise.
pub const MAX_PROTOCOL_VERSION: u32 = 100;

/// Upper bound on a single encoded message line, newline included.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Error codes carried by [`ErrorMessage::code`].
pub mod codes {
    /// The line failed structural validation.
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    /// A request arrived before a successful handshake.
    pub const NOT_CONNECTED: &str = "NOT_CONNECTED";
    /// The daemon no longer admits new requests.
    pub const SHUTTING_DOWN: &str = "SHUTTING_DOWN";
    /// The request handler reported a failure.
    pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
    /// The message kind is valid but not expected in this direction.
    pub const UNEXPECTED_MESSAGE: &str = "UNEXPECTED_MESSAGE";
}

const PROTOCOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::validate");
