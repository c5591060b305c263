//! Line codec: one compact JSON object per `\n`-terminated line.

use crate::message::{json_type_name, Message, RequestId};
use serde_json::{json, Value};
use thiserror::Error;

/// A message could not be turned into wire bytes. Nothing is sent.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("message is not serializable: {0}")]
    Serialize(serde_json::Error),
    #[error("message must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}

/// An inbound line that is not a protocol message.
#[derive(Debug, Clone, Error)]
#[error("malformed message ({cause}): {raw_text}")]
pub struct DecodeError {
    pub raw_text: String,
    pub cause: DecodeCause,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeCause {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Serialize `message` into a single line including its trailing newline.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let mut bytes = serde_json::to_vec(message.fields()).map_err(EncodeError::Serialize)?;
    debug_assert!(!bytes.contains(&b'\n'));
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse one line (terminator already stripped) into a message.
pub fn decode(line: &[u8]) -> Result<Message, DecodeError> {
    let fail = |cause| DecodeError {
        raw_text: String::from_utf8_lossy(line).into_owned(),
        cause,
    };
    let value: Value =
        serde_json::from_slice(line).map_err(|err| fail(DecodeCause::InvalidJson(err.to_string())))?;
    into_message(value).map_err(fail)
}

/// Parse operator-entered text, which may span several lines.
pub fn parse_document(text: &str) -> Result<Message, DecodeError> {
    let fail = |cause| DecodeError {
        raw_text: text.to_string(),
        cause,
    };
    let value: Value =
        serde_json::from_str(text).map_err(|err| fail(DecodeCause::InvalidJson(err.to_string())))?;
    into_message(value).map_err(fail)
}

fn into_message(value: Value) -> Result<Message, DecodeCause> {
    match value {
        Value::Object(fields) => Ok(Message::from_map(fields)),
        other => Err(DecodeCause::NotAnObject(json_type_name(&other))),
    }
}

/// Starter text for a hand-written request.
pub fn request_template(next_id: RequestId) -> String {
    pretty(&json!({"id": next_id, "method": "", "params": ""}))
}

/// Starter text for a hand-written notification.
pub fn notification_template() -> String {
    pretty(&json!({"method": ""}))
}

pub fn empty_template() -> String {
    "{}".to_string()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    #[test]
    fn encode_is_one_terminated_line() {
        let message = Message::request(1, "search", json!("line one\nline two"));
        let bytes = encode(&message).unwrap();

        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "{\"id\":1,\"method\":\"search\",\"params\":\"line one\\nline two\"}\n"
        );
    }

    #[test]
    fn decode_classifies_reply() {
        let message = decode(br#"{"id":1,"result":[{"title":"calc"}]}"#).unwrap();
        assert!(matches!(message.kind(), MessageKind::Reply { id: 1, .. }));
    }

    #[test]
    fn decode_keeps_raw_text_of_garbage() {
        let err = decode(b"not json at all").unwrap_err();
        assert_eq!(err.raw_text, "not json at all");
        assert!(matches!(err.cause, DecodeCause::InvalidJson(_)));
    }

    #[test]
    fn decode_rejects_non_objects() {
        let err = decode(b"42").unwrap_err();
        assert_eq!(err.cause, DecodeCause::NotAnObject("number"));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let err = decode(&[b'{', 0xff, b'}']).unwrap_err();
        assert!(matches!(err.cause, DecodeCause::InvalidJson(_)));
        assert!(err.raw_text.contains('\u{fffd}'));
    }

    #[test]
    fn templates_parse_back() {
        let request = parse_document(&request_template(7)).unwrap();
        assert_eq!(request.id(), Some(7));
        assert_eq!(request.method(), Some(""));

        let note = parse_document(&notification_template()).unwrap();
        assert_eq!(note.kind(), MessageKind::Notification);

        let empty = parse_document(&empty_template()).unwrap();
        assert!(empty.fields().is_empty());
    }
}
