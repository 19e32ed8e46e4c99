//! Content heuristics for telling assistant replies apart from progress chatter.
//!
//! The chat backend streams status lines ("🤖 Yanıt hazırlanıyor...",
//! "📊 3 belge bulundu") on the same socket as the actual answer. This module
//! sits outside the connection core and only looks at the display text of a
//! message (see [`InboundMessage::display_text`]).

use bon::Builder;

use crate::ws::types::response::InboundMessage;

/// Markers that identify progress and status lines.
pub const DEFAULT_STATUS_MARKERS: [&str; 10] = [
    "⚠️",
    "⏱️",
    "🤖",
    "✅",
    "🔄",
    "⌛",
    "📊",
    "belge bulundu",
    "Yanıt tamamlandı",
    "Yanıt süresi",
];

/// Marker sent once the backend has finished answering.
pub const DEFAULT_COMPLETION_MARKER: &str = "Yanıt tamamlandı";

/// Replies must be longer than this many characters after trimming.
pub const DEFAULT_MIN_REPLY_CHARS: usize = 10;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Assistant answer worth showing
    Reply,
    /// Progress or status line
    Status,
    /// The answer is complete; waiting indicators can be cleared
    Completion,
    /// Too short to be a reply and carries no marker
    Noise,
}

impl MessageClass {
    /// Whether the message should be rendered as an assistant reply.
    #[must_use]
    pub const fn is_reply(self) -> bool {
        matches!(self, Self::Reply)
    }

    /// Whether the answer is done, either by an explicit marker or by a reply arriving.
    #[must_use]
    pub const fn ends_wait(self) -> bool {
        matches!(self, Self::Reply | Self::Completion)
    }
}

#[derive(Debug, Clone, Builder)]
pub struct MessageClassifier {
    #[builder(default = DEFAULT_STATUS_MARKERS.iter().map(|m| (*m).to_owned()).collect())]
    status_markers: Vec<String>,
    #[builder(into, default = DEFAULT_COMPLETION_MARKER.to_owned())]
    completion_marker: String,
    #[builder(default = DEFAULT_MIN_REPLY_CHARS)]
    min_reply_chars: usize,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MessageClassifier {
    #[must_use]
    pub fn classify(&self, message: &InboundMessage) -> MessageClass {
        self.classify_text(&message.display_text())
    }

    #[must_use]
    pub fn classify_text(&self, text: &str) -> MessageClass {
        let trimmed = text.trim();

        if trimmed.contains(self.completion_marker.as_str()) {
            return MessageClass::Completion;
        }
        if self
            .status_markers
            .iter()
            .any(|marker| trimmed.contains(marker.as_str()))
        {
            return MessageClass::Status;
        }
        if trimmed.chars().count() > self.min_reply_chars {
            MessageClass::Reply
        } else {
            MessageClass::Noise
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_answer_is_reply() {
        let classifier = MessageClassifier::default();

        let class = classifier.classify(&InboundMessage::from_text(
            r#"{"type":"answer","response":"Kira sözleşmesi TBK 347 uyarınca feshedilebilir."}"#,
        ));

        assert_eq!(class, MessageClass::Reply);
        assert!(class.ends_wait());
    }

    #[test]
    fn status_markers_are_filtered() {
        let classifier = MessageClassifier::default();

        for text in [
            "🤖 Yanıt hazırlanıyor, lütfen bekleyin",
            "📊 12 belge bulundu",
            "⏱️ Yanıt süresi: 3.2 sn",
            "⚠️ Kaynaklara erişilemedi, tekrar deneniyor",
        ] {
            assert_eq!(classifier.classify_text(text), MessageClass::Status, "{text}");
        }
    }

    #[test]
    fn completion_marker_wins() {
        let classifier = MessageClassifier::default();

        let class = classifier.classify_text("✅ Yanıt tamamlandı");

        assert_eq!(class, MessageClass::Completion);
        assert!(!class.is_reply());
        assert!(class.ends_wait());
    }

    #[test]
    fn short_text_is_noise() {
        let classifier = MessageClassifier::default();

        assert_eq!(classifier.classify_text("   tamam   "), MessageClass::Noise);
        assert_eq!(classifier.classify_text("0123456789"), MessageClass::Noise);
        assert_eq!(classifier.classify_text("01234567890"), MessageClass::Reply);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let classifier = MessageClassifier::default();

        // Ten characters, but more than ten bytes.
        assert_eq!(classifier.classify_text("çğıöşüçğıö"), MessageClass::Noise);
    }

    #[test]
    fn custom_markers() {
        let classifier = MessageClassifier::builder()
            .status_markers(vec!["[progress]".to_owned()])
            .completion_marker("[done]")
            .min_reply_chars(2)
            .build();

        assert_eq!(classifier.classify_text("[progress] 50%"), MessageClass::Status);
        assert_eq!(classifier.classify_text("[done]"), MessageClass::Completion);
        assert_eq!(classifier.classify_text("🤖 ok"), MessageClass::Reply);
    }
}
