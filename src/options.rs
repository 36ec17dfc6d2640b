//! Connection and router configuration.
//!
//! Provides a type-safe interface for choosing the wire codec, the reserved
//! keys of the text codec, and the acceptor's upgrade path.
//!
//! # Example
//!
//! ```ignore
//! use simple_websockets::{CodecKind, Options, TextKeys};
//!
//! let options = Options::new()
//!     .with_codec(CodecKind::Text)
//!     .with_text_keys(TextKeys::legacy())
//!     .with_path("/events");
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default upgrade path served by the acceptor.
pub const DEFAULT_PATH: &str = "/ws";

/// Default capacity of the router lifecycle channel.
pub const DEFAULT_LIFECYCLE_CAPACITY: usize = 100;

// ============================================================================
// CodecKind
// ============================================================================

/// Wire codec used by a connection.
///
/// Both ends of a deployment must agree on the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Flat JSON objects in text frames.
    #[default]
    Text,
    /// CBOR `{event, data}` records in binary frames.
    Binary,
}

// ============================================================================
// TextKeys
// ============================================================================

/// Reserved keys of the text codec.
///
/// `event` carries the event name. A wrapped payload is stored under the
/// member named by the value of `type_tag`: `string` for bare strings and
/// `value` for anything that is not an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextKeys {
    /// Key holding the event name.
    pub event: String,
    /// Key naming the member that holds a wrapped payload.
    pub type_tag: String,
    /// Member holding a bare string payload.
    pub string: String,
    /// Member holding a non-object structured payload.
    pub value: String,
}

impl TextKeys {
    /// Keys used by the JavaScript browser client.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            event: "_ws_event".into(),
            type_tag: "_ws_type".into(),
            string: "_ws_msg_type_string".into(),
            value: "_ws_msg_type_json".into(),
        }
    }

    /// Returns `true` if `key` is one of the reserved keys.
    #[inline]
    #[must_use]
    pub fn is_reserved(&self, key: &str) -> bool {
        key == self.event || key == self.type_tag || key == self.string || key == self.value
    }

    /// Checks that the keys are non-empty and distinct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on an empty or duplicated key.
    pub fn validate(&self) -> Result<()> {
        let keys = [&self.event, &self.type_tag, &self.string, &self.value];

        if keys.iter().any(|key| key.is_empty()) {
            return Err(Error::config("text codec keys must not be empty"));
        }

        for (i, a) in keys.iter().enumerate() {
            if keys[i + 1..].contains(a) {
                return Err(Error::config(format!("duplicate text codec key: {a}")));
            }
        }

        Ok(())
    }
}

impl Default for TextKeys {
    fn default() -> Self {
        Self {
            event: "event".into(),
            type_tag: "_type".into(),
            string: "_string".into(),
            value: "_value".into(),
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options shared by routers, acceptors and client connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Wire codec.
    pub codec: CodecKind,

    /// Reserved keys for the text codec.
    pub text_keys: TextKeys,

    /// Upgrade path accepted by the acceptor.
    pub path: String,

    /// Capacity of the router lifecycle channel.
    pub lifecycle_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            codec: CodecKind::default(),
            text_keys: TextKeys::default(),
            path: DEFAULT_PATH.into(),
            lifecycle_capacity: DEFAULT_LIFECYCLE_CAPACITY,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Options {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options using the binary codec.
    #[inline]
    #[must_use]
    pub fn binary() -> Self {
        Self {
            codec: CodecKind::Binary,
            ..Default::default()
        }
    }

    /// Parses options from a JSON document.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Checks the options for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on invalid text keys, a path without a
    /// leading `/`, or a zero lifecycle capacity.
    pub fn validate(&self) -> Result<()> {
        self.text_keys.validate()?;

        if !self.path.starts_with('/') {
            return Err(Error::config(format!(
                "upgrade path must start with '/': {}",
                self.path
            )));
        }

        if self.lifecycle_capacity == 0 {
            return Err(Error::config("lifecycle capacity must be greater than 0"));
        }

        Ok(())
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Options {
    /// Sets the wire codec.
    #[inline]
    #[must_use]
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the text codec's reserved keys.
    #[inline]
    #[must_use]
    pub fn with_text_keys(mut self, keys: TextKeys) -> Self {
        self.text_keys = keys;
        self
    }

    /// Sets the upgrade path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the lifecycle channel capacity.
    #[inline]
    #[must_use]
    pub fn with_lifecycle_capacity(mut self, capacity: usize) -> Self {
        self.lifecycle_capacity = capacity;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
