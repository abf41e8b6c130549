//! Two-phase structural validation of raw JSON messages.
//!
//! Phase one checks the envelope shared by every kind: `type` must name a
//! member of [`MessageKind`] and `timestamp` must be a finite number. Only
//! when the envelope holds does phase two run the checks for that kind. Any
//! field the kind does not define is rejected as well, so the typed
//! [`Message`] produced here is exactly what the peer sent.

use serde_json::{Map, Value};
use tracing::warn;

use crate::message::{
    Disconnect, ErrorMessage, Handshake, HandshakeAck, Heartbeat, HeartbeatAck, McpNotification,
    McpRequest, McpResponse, RequestUpgrade, Shutdown, UpgradeAbort, UpgradePending,
};
use crate::{
    MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION, Message, MessageKind, PROTOCOL_TARGET,
    ShutdownReason, ValidationError,
};

/// Validates a decoded JSON value and converts it into a [`Message`].
///
/// Failures are logged with the offending field and returned; this function
/// never panics on peer input.
///
/// # Errors
///
/// Returns a [`ValidationError`] describing the first field that failed.
pub fn validate_message(raw: &Value) -> Result<Message, ValidationError> {
    let result = validate_value(raw);
    if let Err(error) = &result {
        warn!(
            target: PROTOCOL_TARGET,
            field = error.field().unwrap_or("<message>"),
            kind = error.kind().map(MessageKind::as_str),
            error = %error,
            "rejected invalid message"
        );
    }
    result
}

fn validate_value(raw: &Value) -> Result<Message, ValidationError> {
    let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;
    let (kind, timestamp) = validate_envelope(object)?;
    let mut fields = Fields::new(object, kind);
    let message = match kind {
        MessageKind::Handshake => Message::Handshake(Handshake {
            timestamp,
            client_id: fields.identifier("clientId")?,
            client_version: fields.string("clientVersion")?,
            protocol_version: fields.protocol_version("protocolVersion")?,
            capabilities: fields.strings("capabilities")?,
            pid: fields.pid("pid")?,
        }),
        MessageKind::HandshakeAck => Message::HandshakeAck(HandshakeAck {
            timestamp,
            accepted: fields.boolean("accepted")?,
            daemon_version: fields.string("daemonVersion")?,
            protocol_version: fields.protocol_version("protocolVersion")?,
            instance_id: fields.identifier("instanceId")?,
            capabilities: fields.strings("capabilities")?,
            min_client_version: fields.optional_string("minClientVersion")?,
            error: fields.optional_string("error")?,
        }),
        MessageKind::Heartbeat => Message::Heartbeat(Heartbeat {
            timestamp,
            client_id: fields.identifier("clientId")?,
        }),
        MessageKind::HeartbeatAck => Message::HeartbeatAck(HeartbeatAck {
            timestamp,
            uptime_ms: fields.count("uptimeMs")?,
            active_clients: fields.count("activeClients")?,
            pending_requests: fields.count("pendingRequests")?,
        }),
        MessageKind::Disconnect => Message::Disconnect(Disconnect {
            timestamp,
            client_id: fields.identifier("clientId")?,
            reason: fields.optional_string("reason")?,
        }),
        MessageKind::McpRequest => Message::McpRequest(McpRequest {
            timestamp,
            request_id: fields.identifier("requestId")?,
            client_id: fields.identifier("clientId")?,
            payload: fields.any("payload")?,
        }),
        MessageKind::McpResponse => Message::McpResponse(McpResponse {
            timestamp,
            request_id: fields.identifier("requestId")?,
            client_id: fields.identifier("clientId")?,
            payload: fields.any("payload")?,
        }),
        MessageKind::McpNotification => Message::McpNotification(McpNotification {
            timestamp,
            request_id: fields.optional_identifier("requestId")?,
            client_id: fields.identifier("clientId")?,
            payload: fields.any("payload")?,
        }),
        MessageKind::RequestUpgrade => Message::RequestUpgrade(RequestUpgrade {
            timestamp,
            client_id: fields.identifier("clientId")?,
            new_version: fields.identifier("newVersion")?,
        }),
        MessageKind::UpgradePending => Message::UpgradePending(UpgradePending {
            timestamp,
            new_version: fields.identifier("newVersion")?,
            shutdown_in_ms: fields.count("shutdownInMs")?,
            initiator_client_id: fields.identifier("initiatorClientId")?,
        }),
        MessageKind::UpgradeAbort => Message::UpgradeAbort(UpgradeAbort {
            timestamp,
            reason: fields.string("reason")?,
        }),
        MessageKind::Shutdown => Message::Shutdown(Shutdown {
            timestamp,
            reason: fields.shutdown_reason("reason")?,
            grace_period_ms: fields.count("gracePeriodMs")?,
        }),
        MessageKind::Error => Message::Error(ErrorMessage {
            timestamp,
            code: fields.identifier("code")?,
            message: fields.string("message")?,
            request_id: fields.optional_identifier("requestId")?,
            details: fields.optional_any("details"),
        }),
    };
    fields.finish()?;
    Ok(message)
}

fn validate_envelope(object: &Map<String, Value>) -> Result<(MessageKind, f64), ValidationError> {
    let name = object
        .get("type")
        .ok_or(ValidationError::MissingField {
            kind: None,
            field: "type",
        })?
        .as_str()
        .ok_or(ValidationError::InvalidField {
            kind: None,
            field: "type",
            expected: "a string",
        })?;
    let kind = name
        .parse::<MessageKind>()
        .map_err(|_| ValidationError::UnknownKind {
            value: name.to_owned(),
        })?;
    let timestamp = object
        .get("timestamp")
        .ok_or(ValidationError::MissingField {
            kind: Some(kind),
            field: "timestamp",
        })?
        .as_f64()
        .filter(|value| value.is_finite())
        .ok_or(ValidationError::InvalidField {
            kind: Some(kind),
            field: "timestamp",
            expected: "a finite number",
        })?;
    Ok((kind, timestamp))
}

/// Cursor over an object's fields that remembers which names were consumed.
struct Fields<'a> {
    object: &'a Map<String, Value>,
    kind: MessageKind,
    consumed: Vec<&'static str>,
}

impl<'a> Fields<'a> {
    fn new(object: &'a Map<String, Value>, kind: MessageKind) -> Self {
        Self {
            object,
            kind,
            consumed: vec!["type", "timestamp"],
        }
    }

    fn take(&mut self, field: &'static str) -> Option<&'a Value> {
        self.consumed.push(field);
        self.object.get(field)
    }

    fn require(&mut self, field: &'static str) -> Result<&'a Value, ValidationError> {
        self.take(field).ok_or(ValidationError::MissingField {
            kind: Some(self.kind),
            field,
        })
    }

    fn invalid(&self, field: &'static str, expected: &'static str) -> ValidationError {
        ValidationError::InvalidField {
            kind: Some(self.kind),
            field,
            expected,
        }
    }

    fn string(&mut self, field: &'static str) -> Result<String, ValidationError> {
        let value = self.require(field)?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| self.invalid(field, "a string"))
    }

    fn identifier(&mut self, field: &'static str) -> Result<String, ValidationError> {
        let value = self.string(field)?;
        if value.trim().is_empty() {
            return Err(self.invalid(field, "a non-empty string"));
        }
        Ok(value)
    }

    fn optional_string(&mut self, field: &'static str) -> Result<Option<String>, ValidationError> {
        self.take(field)
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| self.invalid(field, "a string when present"))
            })
            .transpose()
    }

    fn optional_identifier(
        &mut self,
        field: &'static str,
    ) -> Result<Option<String>, ValidationError> {
        match self.optional_string(field)? {
            Some(value) if value.trim().is_empty() => {
                Err(self.invalid(field, "a non-empty string when present"))
            }
            other => Ok(other),
        }
    }

    fn boolean(&mut self, field: &'static str) -> Result<bool, ValidationError> {
        let value = self.require(field)?;
        value
            .as_bool()
            .ok_or_else(|| self.invalid(field, "a boolean"))
    }

    fn count(&mut self, field: &'static str) -> Result<u64, ValidationError> {
        let value = self.require(field)?;
        value
            .as_u64()
            .ok_or_else(|| self.invalid(field, "a non-negative integer"))
    }

    fn protocol_version(&mut self, field: &'static str) -> Result<u32, ValidationError> {
        const EXPECTED: &str = "an integer between 1 and 100";
        let value = self.require(field)?;
        value
            .as_u64()
            .and_then(|version| u32::try_from(version).ok())
            .filter(|version| (MIN_PROTOCOL_VERSION..=MAX_PROTOCOL_VERSION).contains(version))
            .ok_or_else(|| self.invalid(field, EXPECTED))
    }

    fn pid(&mut self, field: &'static str) -> Result<u32, ValidationError> {
        let value = self.require(field)?;
        value
            .as_u64()
            .and_then(|pid| u32::try_from(pid).ok())
            .filter(|pid| *pid > 0)
            .ok_or_else(|| self.invalid(field, "a positive integer"))
    }

    fn strings(&mut self, field: &'static str) -> Result<Vec<String>, ValidationError> {
        let value = self.require(field)?;
        let items = value
            .as_array()
            .ok_or_else(|| self.invalid(field, "an array of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| self.invalid(field, "an array of strings"))
            })
            .collect()
    }

    fn any(&mut self, field: &'static str) -> Result<Value, ValidationError> {
        self.require(field).cloned()
    }

    fn optional_any(&mut self, field: &'static str) -> Option<Value> {
        self.take(field).cloned()
    }

    fn shutdown_reason(&mut self, field: &'static str) -> Result<ShutdownReason, ValidationError> {
        let value = self.require(field)?;
        value
            .as_str()
            .and_then(|text| text.parse::<ShutdownReason>().ok())
            .ok_or_else(|| {
                self.invalid(
                    field,
                    "one of user_request, upgrade, signal, idle, error",
                )
            })
    }

    fn finish(self) -> Result<(), ValidationError> {
        self.object
            .keys()
            .find(|key| !self.consumed.contains(&key.as_str()))
            .map_or(Ok(()), |field| {
                Err(ValidationError::UnknownField {
                    kind: self.kind,
                    field: field.clone(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn handshake_value() -> Value {
        json!({
            "type": "handshake",
            "timestamp": 1_700_000_000_000_u64,
            "clientId": "client-1",
            "clientVersion": "0.1.0",
            "protocolVersion": 1,
            "capabilities": ["tools"],
            "pid": 4242
        })
    }

    fn without(mut value: Value, field: &str) -> Value {
        if let Some(object) = value.as_object_mut() {
            object.remove(field);
        }
        value
    }

    fn with(mut value: Value, field: &str, replacement: Value) -> Value {
        if let Some(object) = value.as_object_mut() {
            object.insert(field.to_owned(), replacement);
        }
        value
    }

    #[test]
    fn accepts_valid_handshake() {
        let message = validate_message(&handshake_value()).expect("valid handshake");
        let Message::Handshake(handshake) = message else {
            panic!("expected handshake, got {message:?}");
        };
        assert_eq!(handshake.client_id, "client-1");
        assert_eq!(handshake.pid, 4242);
        assert_eq!(handshake.capabilities, vec!["tools".to_owned()]);
    }

    #[test]
    fn rejects_non_object() {
        assert_eq!(
            validate_message(&json!(["handshake"])),
            Err(ValidationError::NotAnObject)
        );
    }

    #[test]
    fn envelope_is_checked_before_kind_fields() {
        let value = json!({"type": "handshake", "timestamp": "yesterday"});
        let error = validate_message(&value).expect_err("timestamp must be numeric");
        assert_eq!(error.field(), Some("timestamp"));
    }

    #[test]
    fn rejects_unknown_kind() {
        let value = with(handshake_value(), "type", json!("hello"));
        assert_eq!(
            validate_message(&value),
            Err(ValidationError::UnknownKind {
                value: "hello".to_owned()
            })
        );
    }

    #[rstest]
    #[case("type")]
    #[case("timestamp")]
    #[case("clientId")]
    #[case("clientVersion")]
    #[case("protocolVersion")]
    #[case("capabilities")]
    #[case("pid")]
    fn handshake_requires_every_field(#[case] field: &str) {
        let error = validate_message(&without(handshake_value(), field))
            .expect_err("missing field must be rejected");
        assert_eq!(error.field(), Some(field));
    }

    #[rstest]
    #[case("protocolVersion", json!(0))]
    #[case("protocolVersion", json!(101))]
    #[case("protocolVersion", json!(1.5))]
    #[case("pid", json!(0))]
    #[case("pid", json!(-7))]
    #[case("pid", json!("4242"))]
    #[case("capabilities", json!(["tools", 3]))]
    #[case("capabilities", json!("tools"))]
    #[case("clientId", json!(""))]
    #[case("clientVersion", json!(1))]
    fn handshake_rejects_malformed_fields(#[case] field: &str, #[case] value: Value) {
        let error = validate_message(&with(handshake_value(), field, value))
            .expect_err("malformed field must be rejected");
        assert!(
            matches!(error, ValidationError::InvalidField { .. }),
            "unexpected error {error:?}"
        );
        assert_eq!(error.field(), Some(field));
    }

    #[test]
    fn rejects_unknown_fields() {
        let value = with(handshake_value(), "sessionToken", json!("abc"));
        assert_eq!(
            validate_message(&value),
            Err(ValidationError::UnknownField {
                kind: MessageKind::Handshake,
                field: "sessionToken".to_owned(),
            })
        );
    }

    #[test]
    fn payload_may_be_any_json_including_null() {
        let value = json!({
            "type": "mcp_request",
            "timestamp": 1.0,
            "requestId": "r1",
            "clientId": "c1",
            "payload": null
        });
        let message = validate_message(&value).expect("null payload is allowed");
        assert_eq!(message.request_id(), Some("r1"));
    }

    #[test]
    fn payload_must_be_present() {
        let value = json!({
            "type": "mcp_response",
            "timestamp": 1.0,
            "requestId": "r1",
            "clientId": "c1"
        });
        let error = validate_message(&value).expect_err("payload is required");
        assert_eq!(error.field(), Some("payload"));
    }

    #[test]
    fn optional_fields_distinguish_absent_from_empty() {
        let absent = json!({"type": "disconnect", "timestamp": 1.0, "clientId": "c1"});
        let empty = with(absent.clone(), "reason", json!(""));
        let Ok(Message::Disconnect(absent)) = validate_message(&absent) else {
            panic!("absent reason should validate");
        };
        let Ok(Message::Disconnect(empty)) = validate_message(&empty) else {
            panic!("empty reason should validate");
        };
        assert_eq!(absent.reason, None);
        assert_eq!(empty.reason, Some(String::new()));
    }

    #[test]
    fn optional_fields_reject_null() {
        let value = json!({
            "type": "disconnect",
            "timestamp": 1.0,
            "clientId": "c1",
            "reason": null
        });
        let error = validate_message(&value).expect_err("null reason is not a string");
        assert_eq!(error.field(), Some("reason"));
    }

    #[rstest]
    #[case("user_request", ShutdownReason::UserRequest)]
    #[case("upgrade", ShutdownReason::Upgrade)]
    #[case("signal", ShutdownReason::Signal)]
    fn shutdown_reasons_parse(#[case] wire: &str, #[case] expected: ShutdownReason) {
        let value = json!({
            "type": "shutdown",
            "timestamp": 1.0,
            "reason": wire,
            "gracePeriodMs": 5000
        });
        let Ok(Message::Shutdown(shutdown)) = validate_message(&value) else {
            panic!("shutdown should validate");
        };
        assert_eq!(shutdown.reason, expected);
        assert_eq!(shutdown.grace_period_ms, 5000);
    }

    #[test]
    fn shutdown_rejects_unknown_reason() {
        let value = json!({
            "type": "shutdown",
            "timestamp": 1.0,
            "reason": "bored",
            "gracePeriodMs": 5000
        });
        let error = validate_message(&value).expect_err("unknown reason");
        assert_eq!(error.field(), Some("reason"));
    }

    #[test]
    fn heartbeat_ack_counts_must_be_non_negative() {
        let value = json!({
            "type": "heartbeat_ack",
            "timestamp": 1.0,
            "uptimeMs": 10,
            "activeClients": -1,
            "pendingRequests": 0
        });
        let error = validate_message(&value).expect_err("negative count");
        assert_eq!(error.field(), Some("activeClients"));
    }
}
