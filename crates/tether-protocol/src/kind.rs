//! Closed enumerations that appear on the wire.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Discriminant carried in every message's `type` field.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    /// Client introduces itself to the daemon.
    Handshake,
    /// Daemon accepts or rejects a handshake.
    HandshakeAck,
    /// Client liveness ping.
    Heartbeat,
    /// Daemon reply to a heartbeat.
    HeartbeatAck,
    /// Client leaves the session.
    Disconnect,
    /// Wrapped request destined for the request handler.
    McpRequest,
    /// Wrapped handler response.
    McpResponse,
    /// Wrapped one-way notification.
    McpNotification,
    /// Client asks the daemon to hand off to a newer version.
    RequestUpgrade,
    /// Daemon announces an imminent upgrade hand-off.
    UpgradePending,
    /// Daemon cancels or refuses an upgrade.
    UpgradeAbort,
    /// Daemon announces a shutdown and its grace period.
    Shutdown,
    /// Error report tied to a connection or request.
    Error,
}

impl MessageKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Why the daemon is shutting down.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShutdownReason {
    /// An operator or client asked for the daemon to stop.
    UserRequest,
    /// A newer version is taking over.
    Upgrade,
    /// The process received a termination signal.
    Signal,
    /// The daemon stopped after a period without clients.
    Idle,
    /// An unrecoverable error forced the daemon down.
    Error,
}
