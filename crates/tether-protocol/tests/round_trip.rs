//! Encoding then decoding every message kind yields the original message.

use rstest::rstest;
use serde_json::{Value, json};
use strum::IntoEnumIterator;
use tether_protocol::{
    Message, MessageKind, ShutdownReason, ValidationError, codes, encode_line, parse_message,
    serialize_message, validate_message,
};

fn sample(kind: MessageKind) -> Message {
    match kind {
        MessageKind::Handshake => {
            Message::handshake("client-a", "0.3.0", vec!["tools".to_owned()], 77)
        }
        MessageKind::HandshakeAck => {
            Message::handshake_ack("0.3.1", "inst-1", vec![], Some("0.1.0".to_owned()))
        }
        MessageKind::Heartbeat => Message::heartbeat("client-a"),
        MessageKind::HeartbeatAck => Message::heartbeat_ack(1_500, 2, 0),
        MessageKind::Disconnect => Message::disconnect("client-a", Some("bye".to_owned())),
        MessageKind::McpRequest => {
            Message::mcp_request("req-1", "client-a", json!({"method": "tools/list"}))
        }
        MessageKind::McpResponse => {
            Message::mcp_response("req-1", "client-a", json!({"result": [1, 2, 3]}))
        }
        MessageKind::McpNotification => {
            Message::mcp_notification(None, "client-a", json!({"method": "progress"}))
        }
        MessageKind::RequestUpgrade => Message::request_upgrade("client-a", "0.4.0"),
        MessageKind::UpgradePending => Message::upgrade_pending("0.4.0", 30_000, "client-a"),
        MessageKind::UpgradeAbort => Message::upgrade_abort("not newer"),
        MessageKind::Shutdown => Message::shutdown(ShutdownReason::Idle, 5_000),
        MessageKind::Error => Message::error(
            codes::HANDLER_ERROR,
            "boom",
            Some("req-1".to_owned()),
            Some(json!({"retry": false})),
        ),
    }
}

#[test]
fn every_kind_survives_the_wire() {
    for kind in MessageKind::iter() {
        let message = sample(kind);
        let frame = encode_line(&message).expect("encode sample");
        let line = String::from_utf8(frame).expect("utf-8 frame");
        let decoded = parse_message(&line).expect("decode sample");
        assert_eq!(decoded, message, "round trip changed {kind}");
        assert_eq!(decoded.kind(), kind);
    }
}

#[test]
fn dropping_any_required_field_is_rejected_without_panicking() {
    for kind in MessageKind::iter() {
        let line = serialize_message(&sample(kind)).expect("serialise sample");
        let value: Value = serde_json::from_str(&line).expect("sample is JSON");
        let Value::Object(object) = value else {
            panic!("{kind} did not serialise to an object");
        };
        for field in object.keys() {
            let mut stripped = object.clone();
            stripped.remove(field);
            let result = validate_message(&Value::Object(stripped));
            let optional = matches!(
                field.as_str(),
                "minClientVersion" | "error" | "reason" | "requestId" | "details"
            ) && !matches!(
                (kind, field.as_str()),
                (MessageKind::McpRequest | MessageKind::McpResponse, "requestId")
                    | (MessageKind::UpgradeAbort | MessageKind::Shutdown, "reason")
            );
            if optional {
                assert!(result.is_ok(), "{kind}: {field} should be optional");
            } else {
                let error = result.expect_err("required field removed");
                assert_eq!(error.field(), Some(field.as_str()), "{kind}: {error}");
            }
        }
    }
}

#[rstest]
#[case(r#"{"type":"heartbeat","timestamp":1,"clientId":"c","extra":true}"#, "extra")]
#[case(r#"{"type":"mcp_request","timestamp":1,"clientId":"c","payload":{}}"#, "requestId")]
#[case(r#"{"type":"heartbeat","timestamp":null,"clientId":"c"}"#, "timestamp")]
#[case(r#"{"type":7,"timestamp":1}"#, "type")]
fn structural_failures_name_the_field(#[case] line: &str, #[case] field: &str) {
    let error = parse_message(line).expect_err("line must be rejected");
    assert_eq!(error.field(), Some(field));
}

#[test]
fn unknown_type_is_not_a_missing_field() {
    let error = parse_message(r#"{"type":"ping","timestamp":1}"#).expect_err("unknown kind");
    assert!(matches!(error, ValidationError::UnknownKind { value } if value == "ping"));
}
