//! Binary codec: CBOR records.
//!
//! # Format
//!
//! Each binary frame is one CBOR map with two members:
//!
//! ```text
//! { "event": text, "data": any }
//! ```
//!
//! The payload is carried verbatim under `data`, so nested lists and maps
//! round-trip structurally. An empty payload is CBOR `null`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::options::CodecKind;

use super::codec::Codec;
use super::event::Event;
use super::frame::Frame;
use super::payload::Payload;

// ============================================================================
// Envelope
// ============================================================================

/// Outgoing record, borrowing the event name.
#[derive(Serialize)]
struct OutgoingRecord<'a> {
    event: &'a str,
    data: Value,
}

/// Incoming record.
#[derive(Deserialize)]
struct IncomingRecord {
    event: String,
    #[serde(default)]
    data: Value,
}

// ============================================================================
// BinaryCodec
// ============================================================================

/// CBOR `{event, data}` codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Creates a binary codec.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Codec for BinaryCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Binary
    }

    fn encode(&self, event: &str, payload: &Payload) -> Result<Frame> {
        if event.is_empty() {
            return Err(Error::encode("event name must not be empty"));
        }

        let record = OutgoingRecord {
            event,
            data: payload.to_value(),
        };

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&record, &mut bytes)
            .map_err(|e| Error::encode(format!("CBOR serialization failed: {e}")))?;

        trace!(event, len = bytes.len(), "Encoded binary frame");
        Ok(Frame::Binary(bytes))
    }

    fn decode(&self, frame: &Frame) -> Result<Event> {
        let Frame::Binary(bytes) = frame else {
            return Err(Error::decode("binary codec received a text frame"));
        };

        let mut reader = bytes.as_slice();
        let record: IncomingRecord = ciborium::de::from_reader(&mut reader)
            .map_err(|e| Error::decode(format!("invalid CBOR record: {e}")))?;

        if !reader.is_empty() {
            return Err(Error::decode(format!(
                "{} trailing bytes after CBOR record",
                reader.len()
            )));
        }

        if record.event.is_empty() {
            return Err(Error::decode("event name must not be empty"));
        }

        Ok(Event {
            name: record.event,
            payload: Payload::structured(record.data),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
