use thiserror::Error;

use tether_protocol::{MessageKind, ShutdownReason, ValidationError};

use crate::stdio::StdioError;
use crate::transport::TransportError;

/// Errors raised while talking to the daemon as a proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Dialling or exchanging lines failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The daemon sent a line that failed validation.
    #[error("daemon sent an invalid message: {0}")]
    Invalid(#[from] ValidationError),
    /// The daemon refused the handshake.
    #[error("daemon rejected handshake: {reason}")]
    Rejected {
        /// Reason given by the daemon.
        reason: String,
    },
    /// The daemon answered with a message that does not fit the exchange.
    #[error("unexpected {kind} from daemon")]
    UnexpectedReply {
        /// Kind received.
        kind: MessageKind,
    },
    /// The daemon reported an error for a request.
    #[error("daemon error {code}: {message}")]
    Daemon {
        /// Machine-readable code.
        code: String,
        /// Human-readable description.
        message: String,
    },
    /// The daemon announced it is stopping.
    #[error("daemon is shutting down ({reason})")]
    ShuttingDown {
        /// Why the daemon is stopping.
        reason: ShutdownReason,
    },
    /// The daemon closed the connection.
    #[error("daemon closed the connection")]
    Disconnected,
    /// Standard input or output failed.
    #[error(transparent)]
    Stdio(#[from] StdioError),
}
