//! Event framing.
//!
//! This module defines how one named event becomes one WebSocket frame.
//!
//! # Protocol Overview
//!
//! | Type | Purpose |
//! |------|---------|
//! | `Event` | Decoded `(name, payload)` pair |
//! | `Payload` | Tagged event data: empty, scalar string, structured |
//! | `Frame` | One text or binary data message |
//! | `Codec` | Strategy converting between events and frames |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `binary` | CBOR `{event, data}` codec |
//! | `codec` | Codec trait and selection |
//! | `event` | Event type |
//! | `frame` | Frame type |
//! | `payload` | Payload type |
//! | `text` | Flat JSON codec |

// ============================================================================
// Submodules
// ============================================================================

/// CBOR record codec.
pub mod binary;

/// Codec trait and selection.
pub mod codec;

/// Event type.
pub mod event;

/// Wire frame type.
pub mod frame;

/// Event payload.
pub mod payload;

/// Flat JSON object codec.
pub mod text;

// ============================================================================
// Re-exports
// ============================================================================

pub use binary::BinaryCodec;
pub use codec::{Codec, codec_for};
pub use event::Event;
pub use frame::Frame;
pub use payload::Payload;
pub use text::TextCodec;
