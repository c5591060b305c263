//! Protocol documents exchanged with a plugin.
//!
//! A message is an open JSON object. Its shape (request, notification,
//! reply) is worked out once when the message is built or decoded and kept
//! alongside the fields as a [`MessageKind`].

use crate::codec::EncodeError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Identifier carried by requests and echoed by replies.
pub type RequestId = i64;

/// Structural classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has an integer `id` and a `method`.
    Request { id: RequestId },
    /// Has a `method` and no `id`.
    Notification,
    /// Has an integer `id`, no `method`, and a `result` or `error`.
    Reply { id: RequestId, outcome: ReplyOutcome },
    /// Anything else, e.g. a string `id` or a bare object.
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    fields: Map<String, Value>,
    kind: MessageKind,
}

impl Message {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        let kind = classify(&fields);
        Self { fields, kind }
    }

    /// Build a message from any serializable value that turns into a JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, EncodeError> {
        let value = serde_json::to_value(value).map_err(EncodeError::Serialize)?;
        Self::try_from(value)
    }

    /// `{"id": id, "method": method, "params": params}`
    pub fn request(id: RequestId, method: &str, params: Value) -> Self {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::from(id));
        fields.insert("method".to_string(), Value::from(method));
        fields.insert("params".to_string(), params);
        Self::from_map(fields)
    }

    /// `{"method": method}`, with `params` only when given.
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert("method".to_string(), Value::from(method));
        if let Some(params) = params {
            fields.insert("params".to_string(), params);
        }
        Self::from_map(fields)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The integer `id`, if any. Non-integer ids never take part in correlation.
    pub fn id(&self) -> Option<RequestId> {
        self.fields.get("id").and_then(Value::as_i64)
    }

    pub fn method(&self) -> Option<&str> {
        self.fields.get("method").and_then(Value::as_str)
    }

    pub fn params(&self) -> Option<&Value> {
        self.fields.get("params")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Copy of this message with its integer `id` replaced. Messages without
    /// an integer `id` are returned unchanged.
    pub fn with_id(&self, id: RequestId) -> Self {
        if self.id().is_none() {
            return self.clone();
        }
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::from(id));
        Self::from_map(fields)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for Message {
    type Error = EncodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self::from_map(fields)),
            other => Err(EncodeError::NotAnObject {
                found: json_type_name(&other),
            }),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.fields) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<unprintable message>"),
        }
    }
}

fn classify(fields: &Map<String, Value>) -> MessageKind {
    let id = fields.get("id");
    let int_id = id.and_then(Value::as_i64);
    let has_method = fields.get("method").is_some_and(Value::is_string);

    match (id, int_id, has_method) {
        (None, _, true) => MessageKind::Notification,
        (Some(_), Some(id), true) => MessageKind::Request { id },
        (Some(_), Some(id), false) => {
            let has_error = fields.get("error").is_some_and(|e| !e.is_null());
            if has_error {
                MessageKind::Reply {
                    id,
                    outcome: ReplyOutcome::Failure,
                }
            } else if fields.contains_key("result") {
                MessageKind::Reply {
                    id,
                    outcome: ReplyOutcome::Success,
                }
            } else {
                MessageKind::Unclassified
            }
        }
        _ => MessageKind::Unclassified,
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn message(value: Value) -> Message {
        Message::try_from(value).expect("object")
    }

    #[test]
    fn classifies_shapes() {
        assert_eq!(
            message(json!({"id": 3, "method": "search", "params": "x"})).kind(),
            MessageKind::Request { id: 3 }
        );
        assert_eq!(
            message(json!({"method": "cancel"})).kind(),
            MessageKind::Notification
        );
        assert_eq!(
            message(json!({"id": 3, "result": []})).kind(),
            MessageKind::Reply {
                id: 3,
                outcome: ReplyOutcome::Success
            }
        );
        assert_eq!(
            message(json!({"id": 3, "error": {"code": -1}})).kind(),
            MessageKind::Reply {
                id: 3,
                outcome: ReplyOutcome::Failure
            }
        );
        assert_eq!(
            message(json!({"id": "abc", "method": "search"})).kind(),
            MessageKind::Unclassified
        );
        assert_eq!(message(json!({})).kind(), MessageKind::Unclassified);
    }

    #[test]
    fn null_error_next_to_result_is_success() {
        let reply = message(json!({"jsonrpc": "2.0", "id": 2, "error": null, "result": {}}));
        assert_eq!(
            reply.kind(),
            MessageKind::Reply {
                id: 2,
                outcome: ReplyOutcome::Success
            }
        );
    }

    #[test]
    fn with_id_only_touches_integer_ids() {
        let request = Message::request(1, "search", json!("calc"));
        let renumbered = request.with_id(9);
        assert_eq!(renumbered.id(), Some(9));
        assert_eq!(renumbered.kind(), MessageKind::Request { id: 9 });
        assert_eq!(renumbered.params(), request.params());

        let note = Message::notification("quit", None);
        assert_eq!(note.with_id(9), note);
    }

    #[test]
    fn non_object_values_are_rejected() {
        let err = Message::try_from(json!([1, 2])).unwrap_err();
        assert!(matches!(err, EncodeError::NotAnObject { found: "array" }));
    }

    #[test]
    fn non_string_map_keys_cannot_be_messages() {
        let mut odd = HashMap::new();
        odd.insert(vec![1u8], "value");
        assert!(Message::from_serializable(&odd).is_err());
    }
}
