//! Typed message shapes and their constructors.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use crate::{MessageKind, PROTOCOL_VERSION, ShutdownReason};

/// Milliseconds since the Unix epoch, as carried in `timestamp`.
///
/// A clock set before the epoch yields `0.0` rather than failing.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    reason = "epoch milliseconds stay far below 2^53"
)]
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_millis() as f64)
}

/// A single protocol message, keyed on the wire by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// See [`Handshake`].
    Handshake(Handshake),
    /// See [`HandshakeAck`].
    HandshakeAck(HandshakeAck),
    /// See [`Heartbeat`].
    Heartbeat(Heartbeat),
    /// See [`HeartbeatAck`].
    HeartbeatAck(HeartbeatAck),
    /// See [`Disconnect`].
    Disconnect(Disconnect),
    /// See [`McpRequest`].
    McpRequest(McpRequest),
    /// See [`McpResponse`].
    McpResponse(McpResponse),
    /// See [`McpNotification`].
    McpNotification(McpNotification),
    /// See [`RequestUpgrade`].
    RequestUpgrade(RequestUpgrade),
    /// See [`UpgradePending`].
    UpgradePending(UpgradePending),
    /// See [`UpgradeAbort`].
    UpgradeAbort(UpgradeAbort),
    /// See [`Shutdown`].
    Shutdown(Shutdown),
    /// See [`ErrorMessage`].
    Error(ErrorMessage),
}

/// Client introduction sent as the first message on a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Identifier chosen by the client, unique per connection.
    pub client_id: String,
    /// Client build version.
    pub client_version: String,
    /// Wire protocol revision the client speaks.
    pub protocol_version: u32,
    /// Optional features the client supports.
    pub capabilities: Vec<String>,
    /// Client process id.
    pub pid: u32,
}

/// Daemon answer to a [`Handshake`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Whether the session was admitted.
    pub accepted: bool,
    /// Daemon build version.
    pub daemon_version: String,
    /// Wire protocol revision the daemon speaks.
    pub protocol_version: u32,
    /// Identifier of this daemon incarnation.
    pub instance_id: String,
    /// Optional features the daemon supports.
    pub capabilities: Vec<String>,
    /// Oldest client version the daemon admits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_client_version: Option<String>,
    /// Rejection reason when `accepted` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Client liveness ping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Sending client.
    pub client_id: String,
}

/// Daemon reply to a [`Heartbeat`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Time since the daemon started serving.
    pub uptime_ms: u64,
    /// Clients currently connected.
    pub active_clients: u64,
    /// Requests currently in flight across all clients.
    pub pending_requests: u64,
}

/// Client announcement that it is leaving.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Disconnect {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Departing client.
    pub client_id: String,
    /// Free-form reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request wrapper forwarded to the request handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpRequest {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Correlation identifier, unique per client.
    pub request_id: String,
    /// Originating client.
    pub client_id: String,
    /// Opaque request body.
    pub payload: Value,
}

/// Response wrapper correlated to an [`McpRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResponse {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Identifier of the request being answered.
    pub request_id: String,
    /// Client the response is addressed to.
    pub client_id: String,
    /// Opaque response body.
    pub payload: Value,
}

/// One-way notification wrapper.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpNotification {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Request the notification relates to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Client the notification concerns.
    pub client_id: String,
    /// Opaque notification body.
    pub payload: Value,
}

/// Client request that the daemon hand off to a newer build.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUpgrade {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Requesting client.
    pub client_id: String,
    /// Version that will replace the running daemon.
    pub new_version: String,
}

/// Broadcast announcing an upgrade hand-off.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePending {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Version taking over.
    pub new_version: String,
    /// Upper bound on the time until the daemon exits.
    pub shutdown_in_ms: u64,
    /// Client that requested the upgrade.
    pub initiator_client_id: String,
}

/// Notice that an upgrade was refused or cancelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeAbort {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Why the upgrade will not happen.
    pub reason: String,
}

/// Broadcast announcing that the daemon is draining.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shutdown {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Why the daemon is stopping.
    pub reason: ShutdownReason,
    /// Time in-flight requests have before they are force-killed.
    pub grace_period_ms: u64,
}

/// Error report, optionally tied to a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// Machine-readable code, see [`crate::codes`].
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Request the error answers, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Message {
    /// Builds a handshake speaking the current [`PROTOCOL_VERSION`].
    #[must_use]
    pub fn handshake(
        client_id: impl Into<String>,
        client_version: impl Into<String>,
        capabilities: Vec<String>,
        pid: u32,
    ) -> Self {
        Self::Handshake(Handshake {
            timestamp: now_millis(),
            client_id: client_id.into(),
            client_version: client_version.into(),
            protocol_version: PROTOCOL_VERSION,
            capabilities,
            pid,
        })
    }

    /// Builds an accepting handshake acknowledgement.
    #[must_use]
    pub fn handshake_ack(
        daemon_version: impl Into<String>,
        instance_id: impl Into<String>,
        capabilities: Vec<String>,
        min_client_version: Option<String>,
    ) -> Self {
        Self::HandshakeAck(HandshakeAck {
            timestamp: now_millis(),
            accepted: true,
            daemon_version: daemon_version.into(),
            protocol_version: PROTOCOL_VERSION,
            instance_id: instance_id.into(),
            capabilities,
            min_client_version,
            error: None,
        })
    }

    /// Builds a rejecting handshake acknowledgement.
    #[must_use]
    pub fn handshake_rejected(
        daemon_version: impl Into<String>,
        instance_id: impl Into<String>,
        min_client_version: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::HandshakeAck(HandshakeAck {
            timestamp: now_millis(),
            accepted: false,
            daemon_version: daemon_version.into(),
            protocol_version: PROTOCOL_VERSION,
            instance_id: instance_id.into(),
            capabilities: Vec::new(),
            min_client_version,
            error: Some(error.into()),
        })
    }

    /// Builds a heartbeat.
    #[must_use]
    pub fn heartbeat(client_id: impl Into<String>) -> Self {
        Self::Heartbeat(Heartbeat {
            timestamp: now_millis(),
            client_id: client_id.into(),
        })
    }

    /// Builds a heartbeat acknowledgement.
    #[must_use]
    pub fn heartbeat_ack(uptime_ms: u64, active_clients: u64, pending_requests: u64) -> Self {
        Self::HeartbeatAck(HeartbeatAck {
            timestamp: now_millis(),
            uptime_ms,
            active_clients,
            pending_requests,
        })
    }

    /// Builds a disconnect notice.
    #[must_use]
    pub fn disconnect(client_id: impl Into<String>, reason: Option<String>) -> Self {
        Self::Disconnect(Disconnect {
            timestamp: now_millis(),
            client_id: client_id.into(),
            reason,
        })
    }

    /// Builds a request wrapper.
    #[must_use]
    pub fn mcp_request(
        request_id: impl Into<String>,
        client_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::McpRequest(McpRequest {
            timestamp: now_millis(),
            request_id: request_id.into(),
            client_id: client_id.into(),
            payload,
        })
    }

    /// Builds a response wrapper.
    #[must_use]
    pub fn mcp_response(
        request_id: impl Into<String>,
        client_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::McpResponse(McpResponse {
            timestamp: now_millis(),
            request_id: request_id.into(),
            client_id: client_id.into(),
            payload,
        })
    }

    /// Builds a notification wrapper.
    #[must_use]
    pub fn mcp_notification(
        request_id: Option<String>,
        client_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::McpNotification(McpNotification {
            timestamp: now_millis(),
            request_id,
            client_id: client_id.into(),
            payload,
        })
    }

    /// Builds an upgrade request.
    #[must_use]
    pub fn request_upgrade(client_id: impl Into<String>, new_version: impl Into<String>) -> Self {
        Self::RequestUpgrade(RequestUpgrade {
            timestamp: now_millis(),
            client_id: client_id.into(),
            new_version: new_version.into(),
        })
    }

    /// Builds an upgrade announcement.
    #[must_use]
    pub fn upgrade_pending(
        new_version: impl Into<String>,
        shutdown_in_ms: u64,
        initiator_client_id: impl Into<String>,
    ) -> Self {
        Self::UpgradePending(UpgradePending {
            timestamp: now_millis(),
            new_version: new_version.into(),
            shutdown_in_ms,
            initiator_client_id: initiator_client_id.into(),
        })
    }

    /// Builds an upgrade refusal.
    #[must_use]
    pub fn upgrade_abort(reason: impl Into<String>) -> Self {
        Self::UpgradeAbort(UpgradeAbort {
            timestamp: now_millis(),
            reason: reason.into(),
        })
    }

    /// Builds a shutdown announcement.
    #[must_use]
    pub fn shutdown(reason: ShutdownReason, grace_period_ms: u64) -> Self {
        Self::Shutdown(Shutdown {
            timestamp: now_millis(),
            reason,
            grace_period_ms,
        })
    }

    /// Builds an error report.
    #[must_use]
    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
        details: Option<Value>,
    ) -> Self {
        Self::Error(ErrorMessage {
            timestamp: now_millis(),
            code: code.into(),
            message: message.into(),
            request_id,
            details,
        })
    }

    /// Returns the discriminant of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Handshake(_) => MessageKind::Handshake,
            Self::HandshakeAck(_) => MessageKind::HandshakeAck,
            Self::Heartbeat(_) => MessageKind::Heartbeat,
            Self::HeartbeatAck(_) => MessageKind::HeartbeatAck,
            Self::Disconnect(_) => MessageKind::Disconnect,
            Self::McpRequest(_) => MessageKind::McpRequest,
            Self::McpResponse(_) => MessageKind::McpResponse,
            Self::McpNotification(_) => MessageKind::McpNotification,
            Self::RequestUpgrade(_) => MessageKind::RequestUpgrade,
            Self::UpgradePending(_) => MessageKind::UpgradePending,
            Self::UpgradeAbort(_) => MessageKind::UpgradeAbort,
            Self::Shutdown(_) => MessageKind::Shutdown,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Returns the message timestamp in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> f64 {
        match self {
            Self::Handshake(inner) => inner.timestamp,
            Self::HandshakeAck(inner) => inner.timestamp,
            Self::Heartbeat(inner) => inner.timestamp,
            Self::HeartbeatAck(inner) => inner.timestamp,
            Self::Disconnect(inner) => inner.timestamp,
            Self::McpRequest(inner) => inner.timestamp,
            Self::McpResponse(inner) => inner.timestamp,
            Self::McpNotification(inner) => inner.timestamp,
            Self::RequestUpgrade(inner) => inner.timestamp,
            Self::UpgradePending(inner) => inner.timestamp,
            Self::UpgradeAbort(inner) => inner.timestamp,
            Self::Shutdown(inner) => inner.timestamp,
            Self::Error(inner) => inner.timestamp,
        }
    }

    /// Returns the request correlation id carried by this message, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::McpRequest(inner) => Some(&inner.request_id),
            Self::McpResponse(inner) => Some(&inner.request_id),
            Self::McpNotification(inner) => inner.request_id.as_deref(),
            Self::Error(inner) => inner.request_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_uses_current_protocol_version() {
        let Message::Handshake(handshake) = Message::handshake("c1", "0.1.0", Vec::new(), 42)
        else {
            panic!("expected handshake");
        };
        assert_eq!(handshake.protocol_version, PROTOCOL_VERSION);
        assert!(handshake.timestamp > 0.0);
    }

    #[test]
    fn serialises_with_type_tag_and_camel_case_fields() {
        let message = Message::mcp_request("r1", "c1", json!({"method": "ping"}));
        let value = serde_json::to_value(&message).expect("serialise");
        assert_eq!(value["type"], "mcp_request");
        assert_eq!(value["requestId"], "r1");
        assert_eq!(value["clientId"], "c1");
        assert_eq!(value["payload"]["method"], "ping");
    }

    #[test]
    fn absent_optional_fields_are_omitted() {
        let message = Message::error("HANDLER_ERROR", "boom", None, None);
        let value = serde_json::to_value(&message).expect("serialise");
        let object = value.as_object().expect("object");
        assert!(!object.contains_key("requestId"));
        assert!(!object.contains_key("details"));
    }

    #[test]
    fn request_id_is_exposed_for_correlated_kinds() {
        assert_eq!(
            Message::mcp_response("r9", "c1", json!(null)).request_id(),
            Some("r9")
        );
        assert_eq!(Message::heartbeat("c1").request_id(), None);
    }
}
