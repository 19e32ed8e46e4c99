use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Keys checked, in order, when extracting the human readable text of a message.
const TEXT_KEYS: [&str; 3] = ["message", "response", "text"];

/// Normalized inbound frame.
///
/// Text frames whose first non-whitespace character is `{` or `[` are decoded
/// as JSON. Everything else, including frames that look structured but fail to
/// decode and binary frames, is wrapped as `{"message": <raw text>}`. No frame
/// is ever dropped.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InboundMessage {
    /// Successfully decoded JSON payload
    Structured(Value),
    /// Raw text fallback
    Text {
        /// The frame exactly as received
        message: String,
    },
}

impl InboundMessage {
    /// Apply the decoding policy to a text frame.
    #[must_use]
    pub fn from_text(frame: &str) -> Self {
        if looks_structured(frame)
            && let Ok(value) = serde_json::from_str::<Value>(frame)
        {
            return Self::Structured(value);
        }

        Self::Text {
            message: frame.to_owned(),
        }
    }

    /// Binary frames are never decoded, only wrapped (lossily as UTF-8).
    #[must_use]
    pub fn from_binary(frame: &[u8]) -> Self {
        Self::Text {
            message: String::from_utf8_lossy(frame).into_owned(),
        }
    }

    /// The consumer-visible JSON shape of this message.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Text { message } => json!({ "message": message }),
        }
    }

    #[must_use]
    pub const fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// Look up a top-level field of the normalized shape.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Structured(value) => value.get(key),
            Self::Text { .. } => None,
        }
    }

    /// The `message` field, if it is a string.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Structured(value) => value.get("message").and_then(Value::as_str),
            Self::Text { message } => Some(message.as_str()),
        }
    }

    /// The envelope `type` of a structured message.
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.field("type").and_then(Value::as_str)
    }

    /// Best human readable rendering: the first non-empty string among
    /// `message`, `response` and `text`, else the JSON encoding.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Text { message } => message.clone(),
            Self::Structured(value) => TEXT_KEYS
                .iter()
                .find_map(|key| {
                    value
                        .get(*key)
                        .and_then(Value::as_str)
                        .filter(|text| !text.is_empty())
                })
                .map_or_else(|| value.to_string(), str::to_owned),
        }
    }

    /// Copy of the normalized shape with an extra top-level field.
    ///
    /// Non-object payloads (e.g. JSON arrays) are nested under `data`.
    #[must_use]
    pub fn annotated(&self, key: &str, annotation: Value) -> Value {
        let mut object = match self.to_value() {
            Value::Object(object) => object,
            other => {
                let mut object = Map::new();
                object.insert("data".to_owned(), other);
                object
            }
        };
        object.insert(key.to_owned(), annotation);
        Value::Object(object)
    }
}

fn looks_structured(frame: &str) -> bool {
    let trimmed = frame.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// Details of a closed connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// WebSocket close code
    pub code: u16,
    /// Close reason, possibly empty
    pub reason: String,
}

impl CloseEvent {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Peer closed without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;

    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn abnormal<S: Into<String>>(reason: S) -> Self {
        Self::new(Self::ABNORMAL, reason)
    }

    #[must_use]
    pub const fn is_normal(&self) -> bool {
        self.code == Self::NORMAL
    }
}

impl From<Option<CloseFrame>> for CloseEvent {
    fn from(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::new(u16::from(frame.code), frame.reason.as_str()),
            None => Self::new(Self::NO_STATUS, ""),
        }
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {} (no reason provided)", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}

/// A transport-reported error. Informational only.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub detail: String,
}

impl ErrorEvent {
    #[must_use]
    pub fn new<S: Into<String>>(detail: S) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    #[test]
    fn structured_frames_decode_to_identical_json() {
        let frames = [
            r#"{"type":"answer","message":"Merhaba","sources":[{"title":"TBK 49","tag":"law"}]}"#,
            r#"  {"nested":{"deep":[1,2,{"x":null}]}}"#,
            r#"[{"message":"first"},{"message":"second"}]"#,
            "[]",
        ];

        for frame in frames {
            let expected: Value = serde_json::from_str(frame).unwrap();
            let message = InboundMessage::from_text(frame);

            assert!(message.is_structured(), "{frame} should decode");
            assert_eq!(message.to_value(), expected);
        }
    }

    #[test]
    fn unstructured_or_malformed_frames_keep_original_text() {
        let frames = [
            "Merhaba, size nasıl yardımcı olabilirim?",
            "{not json",
            "[1, 2,",
            "",
            "   ",
            "42",
            "\"quoted\"",
            "🤖 Yanıt hazırlanıyor...",
            "text with { brace later",
        ];

        for frame in frames {
            let message = InboundMessage::from_text(frame);

            assert!(!message.is_structured(), "{frame:?} should not decode");
            assert_eq!(message.message(), Some(frame));
            assert_eq!(message.to_value(), json!({ "message": frame }));
        }
    }

    #[test]
    fn binary_frames_are_wrapped() {
        let message = InboundMessage::from_binary(br#"{"type":"answer"}"#);

        assert_eq!(
            message.to_value(),
            json!({ "message": r#"{"type":"answer"}"# })
        );
    }

    #[test]
    fn serialize_matches_to_value() {
        let text = InboundMessage::from_text("plain");
        let structured = InboundMessage::from_text(r#"{"message":"hi","id":7}"#);

        assert_eq!(serde_json::to_value(&text).unwrap(), text.to_value());
        assert_eq!(
            serde_json::to_value(&structured).unwrap(),
            structured.to_value()
        );
    }

    #[test]
    fn display_text_prefers_message_then_response_then_text() {
        let message = InboundMessage::from_text(r#"{"message":"m","response":"r","text":"t"}"#);
        let response = InboundMessage::from_text(r#"{"message":"","response":"r","text":"t"}"#);
        let text = InboundMessage::from_text(r#"{"text":"t"}"#);
        let other = InboundMessage::from_text(r#"{"type":"status","progress":3}"#);

        assert_eq!(message.display_text(), "m");
        assert_eq!(response.display_text(), "r");
        assert_eq!(text.display_text(), "t");
        assert_eq!(other.display_text(), r#"{"progress":3,"type":"status"}"#);
    }

    #[test]
    fn event_type_reads_envelope_type() {
        let message = InboundMessage::from_text(r#"{"type":"answer","content":"..."}"#);

        assert_eq!(message.event_type(), Some("answer"));
        assert_eq!(InboundMessage::from_text("answer").event_type(), None);
    }

    #[test]
    fn annotated_adds_field_and_wraps_arrays() {
        let text = InboundMessage::from_text("hello");
        let array = InboundMessage::from_text("[1,2]");

        assert_eq!(
            text.annotated("_timestamp", json!(5)),
            json!({ "message": "hello", "_timestamp": 5 })
        );
        assert_eq!(
            array.annotated("_timestamp", json!(6)),
            json!({ "data": [1, 2], "_timestamp": 6 })
        );
    }

    #[test]
    fn close_event_from_frame() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "server restart".into(),
        };

        assert_eq!(
            CloseEvent::from(Some(frame)),
            CloseEvent::new(1001, "server restart")
        );
        assert_eq!(CloseEvent::from(None), CloseEvent::new(1005, ""));
        assert_eq!(
            CloseEvent::abnormal("").to_string(),
            "code 1006 (no reason provided)"
        );
    }
}
