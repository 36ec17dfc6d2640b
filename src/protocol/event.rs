//! Decoded event type.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use super::payload::Payload;

// ============================================================================
// Event
// ============================================================================

/// A named application message with its payload.
///
/// Decoders only ever produce events with a non-empty name.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Dispatch key.
    pub name: String,

    /// Event data.
    pub payload: Payload,
}

impl Event {
    /// Creates a new event.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event={} payload={}", self.name, self.payload.to_value())
    }
}

// ============================================================================
// Tests
// ============================================================================
