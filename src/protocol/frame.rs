//! Wire frames.
//!
//! A [`Frame`] is one self-delimited WebSocket data message. Codecs produce
//! and consume frames; only the transport converts them to and from
//! tungstenite messages.

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Frame
// ============================================================================

/// One data frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Returns the raw bytes of the frame.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns the frame length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the frame carries no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Returns `true` for a text frame.
    #[inline]
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Extracts a frame from a data message.
    ///
    /// Control messages (ping, pong, close, raw frames) yield `None`.
    pub(crate) fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text.as_str().to_owned())),
            Message::Binary(bytes) => Some(Self::Binary(bytes.to_vec())),
            _ => None,
        }
    }

    /// Converts the frame into a data message.
    pub(crate) fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversion_keeps_kind() {
        let text = Frame::Text("{}".into());
        let message = text.clone().into_message();
        assert!(message.is_text());
        assert_eq!(Frame::from_message(message), Some(text));

        let binary = Frame::Binary(vec![1, 2, 3]);
        let message = binary.clone().into_message();
        assert!(message.is_binary());
        assert_eq!(Frame::from_message(message), Some(binary));
    }

    #[test]
    fn test_control_messages_are_not_frames() {
        assert_eq!(Frame::from_message(Message::Ping(Default::default())), None);
        assert_eq!(Frame::from_message(Message::Close(None)), None);
    }

    #[test]
    fn test_len() {
        assert_eq!(Frame::Text("abc".into()).len(), 3);
        assert!(Frame::Binary(Vec::new()).is_empty());
    }
}
