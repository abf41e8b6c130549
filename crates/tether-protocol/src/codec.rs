//! Newline-delimited JSON framing.

use serde_json::Value;
use tracing::warn;

use crate::{MAX_LINE_BYTES, Message, PROTOCOL_TARGET, ProtocolError, ValidationError, validate_message};

/// Parses one line of text into a validated [`Message`].
///
/// Surrounding whitespace, including the trailing newline, is ignored.
///
/// # Errors
///
/// Returns [`ValidationError::Malformed`] for empty lines or invalid JSON,
/// otherwise whatever [`validate_message`] reports.
pub fn parse_message(line: &str) -> Result<Message, ValidationError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::malformed("empty line"));
    }
    let raw: Value = serde_json::from_str(trimmed).map_err(|error| {
        warn!(
            target: PROTOCOL_TARGET,
            bytes = trimmed.len(),
            error = %error,
            "rejected malformed line"
        );
        ValidationError::malformed(error.to_string())
    })?;
    validate_message(&raw)
}

/// Serialises a message to a single line of JSON without the terminator.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails.
pub fn serialize_message(message: &Message) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Encodes a message as a newline-terminated byte frame ready for writing.
///
/// # Errors
///
/// Returns [`ProtocolError::TooLarge`] when the frame would exceed
/// [`MAX_LINE_BYTES`], or [`ProtocolError::Encode`] if serialisation fails.
pub fn encode_line(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    if bytes.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge {
            size: bytes.len(),
            max_size: MAX_LINE_BYTES,
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("")]
    #[case("   \n")]
    #[case("{not json")]
    #[case("{\"type\":\"heartbeat\",")]
    fn malformed_lines_are_rejected(#[case] line: &str) {
        let error = parse_message(line).expect_err("line must be rejected");
        assert!(matches!(error, ValidationError::Malformed { .. }));
    }

    #[test]
    fn encoded_frames_end_with_a_single_newline() {
        let frame = encode_line(&Message::heartbeat("c1")).expect("encode heartbeat");
        assert_eq!(frame.last(), Some(&b'\n'));
        assert_eq!(frame.iter().filter(|byte| **byte == b'\n').count(), 1);
    }

    #[test]
    fn parse_tolerates_trailing_newline() {
        let frame = encode_line(&Message::heartbeat("c1")).expect("encode heartbeat");
        let line = String::from_utf8(frame).expect("utf-8 frame");
        assert_eq!(
            parse_message(&line).expect("parse heartbeat").kind(),
            crate::MessageKind::Heartbeat
        );
    }

    #[test]
    fn oversized_frames_are_refused() {
        let payload = json!("x".repeat(MAX_LINE_BYTES));
        let message = Message::mcp_request("r1", "c1", payload);
        let error = encode_line(&message).expect_err("frame is too large");
        assert!(matches!(error, ProtocolError::TooLarge { .. }));
    }
}
