use serde::Serialize;

/// Outbound envelopes understood by the chat backend.
///
/// Serialized as `{"type": "<kind>", ...fields}`.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// A user chat message
    Message {
        /// The text typed by the user
        content: String,
    },
    /// Keepalive ping (only sent with the `heartbeats` feature)
    Ping,
}

impl OutboundMessage {
    /// Create a user chat message envelope.
    #[must_use]
    pub fn message<S: Into<String>>(content: S) -> Self {
        Self::Message {
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn message_envelope_shape() {
        let envelope = OutboundMessage::message("Kira sözleşmesi nasıl feshedilir?");

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({ "type": "message", "content": "Kira sözleşmesi nasıl feshedilir?" })
        );
    }

    #[test]
    fn ping_envelope_shape() {
        assert_eq!(
            serde_json::to_string(&OutboundMessage::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
    }
}
