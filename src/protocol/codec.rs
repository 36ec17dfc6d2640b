//! Frame codec abstraction.
//!
//! A codec turns one `(event, payload)` pair into one [`Frame`] and back.
//! Both ends of a deployment must use the same codec.
//!
//! | Codec | Frame | Layout |
//! |-------|-------|--------|
//! | [`TextCodec`] | text | flat JSON object, payload fields merged with the event key |
//! | [`BinaryCodec`] | binary | CBOR record `{event, data}` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::options::{CodecKind, Options};

use super::binary::BinaryCodec;
use super::event::Event;
use super::frame::Frame;
use super::payload::Payload;
use super::text::TextCodec;

// ============================================================================
// Codec
// ============================================================================

/// Encoding strategy for events.
///
/// Implementations are stateless apart from configuration and are shared by
/// every task of a connection.
pub trait Codec: Send + Sync + Debug {
    /// Returns which codec this is.
    fn kind(&self) -> CodecKind;

    /// Encodes one event into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`](crate::Error::Encode) for an empty event
    /// name or a payload the codec cannot represent.
    fn encode(&self, event: &str, payload: &Payload) -> Result<Frame>;

    /// Decodes one frame into an event with a non-empty name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`](crate::Error::Decode) for malformed frames.
    fn decode(&self, frame: &Frame) -> Result<Event>;
}

/// Builds the codec selected by `options`.
#[must_use]
pub fn codec_for(options: &Options) -> Arc<dyn Codec> {
    match options.codec {
        CodecKind::Text => Arc::new(TextCodec::new(options.text_keys.clone())),
        CodecKind::Binary => Arc::new(BinaryCodec::new()),
    }
}

// ============================================================================
// Tests
// ============================================================================
