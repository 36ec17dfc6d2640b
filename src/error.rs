//! Error types for simple-websockets.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use simple_websockets::{Payload, Result};
//!
//! fn notify(connection: &Connection) -> Result<()> {
//!     connection.emit("status", Payload::scalar("ready"))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::WebSocket`], [`Error::Io`] |
//! | Codec | [`Error::Encode`], [`Error::Decode`] |
//! | External | [`Error::Json`] |
//!
//! A caller of `emit` separates the two interesting cases with
//! [`Error::is_connection_error`] (the connection is dead, discard it) and
//! [`Error::is_encode_error`] (the payload was bad, the connection is fine).

// ============================================================================
// Imports
// ============================================================================

use std::error::Error as StdError;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

/// Error returned by an event handler.
///
/// Handler failures are logged by the read loop and never close the
/// connection.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when options or a connect URL are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when a connection cannot be established or written to.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection is closed.
    ///
    /// Returned by `emit` once the writer has stopped, and by a second
    /// `close`.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Codec Errors
    // ========================================================================
    /// Event could not be encoded into a frame.
    ///
    /// The connection is unaffected; the caller may fix the payload and retry.
    #[error("Encode error: {message}")]
    Encode {
        /// Description of the encode failure.
        message: String,
    },

    /// Frame could not be decoded into an event.
    ///
    /// The read loop drops the frame and continues.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON conversion error outside of frame encoding.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an encode error.
    #[inline]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the connection this error came from is unusable.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::Io(_)
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if a payload could not be encoded.
    #[inline]
    #[must_use]
    pub fn is_encode_error(&self) -> bool {
        matches!(self, Self::Encode { .. })
    }

    /// Returns `true` if a frame could not be decoded.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors leave the connection open.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Encode { .. } | Self::Decode { .. } | Self::Json(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("reset by peer");
        assert_eq!(err.to_string(), "Connection failed: reset by peer");
    }

    #[test]
    fn test_encode_error_display() {
        let err = Error::encode("reserved key");
        assert_eq!(err.to_string(), "Encode error: reserved key");
    }

    #[test]
    fn test_emit_errors_are_distinguishable() {
        let closed = Error::ConnectionClosed;
        let bad_payload = Error::encode("collision");

        assert!(closed.is_connection_error());
        assert!(!closed.is_encode_error());
        assert!(bad_payload.is_encode_error());
        assert!(!bad_payload.is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::decode("truncated").is_recoverable());
        assert!(Error::encode("bad").is_recoverable());
        assert!(!Error::ConnectionClosed.is_recoverable());
        assert!(!Error::config("bad url").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
