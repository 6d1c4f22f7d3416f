use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::TransportError;

/// Message types travelling inside packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Host → plugin: invoke a cap.
    CapRequest,
    /// Plugin → host: request received, processing started.
    Ack,
    /// Plugin → host: progress update.
    Progress,
    /// Plugin → host: single complete response (terminal).
    CapResponse,
    /// Plugin → host: one streaming chunk.
    StreamChunk,
    /// Plugin → host: stream complete (terminal).
    StreamEnd,
    /// Plugin → host: ready for the next request.
    Idle,
    /// Either direction: error condition (terminal).
    Error,
}

/// The JSON envelope wrapping all plugin communication.
///
/// `id` correlates every reply with its request. Unknown keys are
/// ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Cap URN being invoked or responded to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Message {
    /// New request with a fresh correlation id.
    #[must_use]
    pub fn cap_request(cap_urn: impl Into<String>, payload: Value) -> Self {
        Self::cap_request_with_id(Uuid::new_v4().to_string(), cap_urn, payload)
    }

    #[must_use]
    pub fn cap_request_with_id(
        id: impl Into<String>,
        cap_urn: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::CapRequest,
            cap: Some(cap_urn.into()),
            payload,
        }
    }

    #[must_use]
    pub fn ack(request_id: impl Into<String>) -> Self {
        Self {
            id: request_id.into(),
            message_type: MessageType::Ack,
            cap: None,
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn progress(
        request_id: impl Into<String>,
        stage: impl Into<String>,
        percent: Option<u8>,
        message: Option<String>,
    ) -> Self {
        let mut payload = serde_json::Map::new();
        payload.insert("stage".to_string(), Value::String(stage.into()));
        if let Some(percent) = percent {
            payload.insert("percent".to_string(), Value::from(percent));
        }
        if let Some(message) = message {
            payload.insert("message".to_string(), Value::String(message));
        }
        Self {
            id: request_id.into(),
            message_type: MessageType::Progress,
            cap: None,
            payload: Value::Object(payload),
        }
    }

    #[must_use]
    pub fn cap_response(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: request_id.into(),
            message_type: MessageType::CapResponse,
            cap: None,
            payload,
        }
    }

    #[must_use]
    pub fn stream_chunk(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: request_id.into(),
            message_type: MessageType::StreamChunk,
            cap: None,
            payload,
        }
    }

    #[must_use]
    pub fn stream_end(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: request_id.into(),
            message_type: MessageType::StreamEnd,
            cap: None,
            payload,
        }
    }

    #[must_use]
    pub fn error(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: request_id.into(),
            message_type: MessageType::Error,
            cap: None,
            payload: ErrorPayload {
                code: code.into(),
                message: message.into(),
                details: None,
            }
            .to_value(),
        }
    }

    /// Plugin readiness marker; carries its own id.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::Idle,
            cap: None,
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn is_request(&self) -> bool {
        self.message_type == MessageType::CapRequest
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::CapResponse | MessageType::StreamChunk | MessageType::StreamEnd
        )
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::StreamChunk | MessageType::StreamEnd
        )
    }

    /// Whether this message ends the conversation for its request.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::CapResponse | MessageType::StreamEnd | MessageType::Error
        )
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.message_type == MessageType::Ack
    }

    #[must_use]
    pub fn is_progress(&self) -> bool {
        self.message_type == MessageType::Progress
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.message_type == MessageType::Idle
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Error payload shape: `{ code, message, details? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("error payload serializes")
    }

    /// Parse from a message payload, tolerating missing fields.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|_| Self {
            code: "unknown".to_string(),
            message: value.to_string(),
            details: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let msg = Message::cap_request_with_id(
            "r1",
            "cap:in=media:;out=media:",
            json!({"args": []}),
        );
        let bytes = msg.to_bytes().unwrap();
        let back = Message::from_bytes(&bytes).unwrap();
        assert_eq!(back, msg);
        assert!(back.is_request());
        assert_eq!(back.cap.as_deref(), Some("cap:in=media:;out=media:"));
    }

    #[test]
    fn test_type_strings() {
        let json = serde_json::to_value(Message::ack("r1")).unwrap();
        assert_eq!(json["type"], "ack");
        let json = serde_json::to_value(Message::cap_request_with_id(
            "r1",
            "cap:in=media:;out=media:",
            json!({}),
        ))
        .unwrap();
        assert_eq!(json["type"], "cap_request");
        let json = serde_json::to_value(Message::stream_end("r1", json!({}))).unwrap();
        assert_eq!(json["type"], "stream_end");
    }

    #[test]
    fn test_correlation_ids_propagate() {
        // P10: every reply constructor carries the request id through.
        let request = Message::cap_request("cap:in=media:;out=media:", json!({}));
        let id = request.id.clone();
        for reply in [
            Message::ack(&id),
            Message::progress(&id, "working", Some(50), None),
            Message::cap_response(&id, json!({"ok": true})),
            Message::stream_chunk(&id, json!({"n": 1})),
            Message::stream_end(&id, json!({})),
            Message::error(&id, "boom", "went wrong"),
        ] {
            assert_eq!(reply.id, id);
        }
    }

    #[test]
    fn test_terminal_classification() {
        assert!(Message::cap_response("r", json!({})).is_terminal());
        assert!(Message::stream_end("r", json!({})).is_terminal());
        assert!(Message::error("r", "c", "m").is_terminal());
        assert!(!Message::ack("r").is_terminal());
        assert!(!Message::progress("r", "s", None, None).is_terminal());
        assert!(!Message::stream_chunk("r", json!({})).is_terminal());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let raw = br#"{"id": "r1", "type": "ack", "future": {"x": 1}}"#;
        let msg = Message::from_bytes(raw).unwrap();
        assert!(msg.is_ack());
        assert_eq!(msg.payload, Value::Null);
    }

    #[test]
    fn test_error_payload() {
        let msg = Message::error("r1", "cap_failed", "thumbnail render failed");
        let payload = ErrorPayload::from_value(&msg.payload);
        assert_eq!(payload.code, "cap_failed");
        assert_eq!(payload.message, "thumbnail render failed");
        assert!(payload.details.is_none());
    }

    #[test]
    fn test_progress_payload_shape() {
        let msg = Message::progress("r1", "render", Some(40), Some("page 2".to_string()));
        assert_eq!(msg.payload["stage"], "render");
        assert_eq!(msg.payload["percent"], 40);
        assert_eq!(msg.payload["message"], "page 2");
    }
}
