//! Event payload.
//!
//! A payload is a tagged value decided at the call site: nothing, a bare
//! string, or a structured JSON-like value. Codecs never inspect Rust types
//! at runtime; they only branch on the variant.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Payload
// ============================================================================

/// Data carried by an event.
///
/// # Normal Form
///
/// Decoders always produce the normal form: `null` becomes [`Payload::Empty`]
/// and a bare JSON string becomes [`Payload::Scalar`]. Build structured
/// payloads with [`Payload::structured`] to get the same normalization on
/// the sending side.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// No data.
    #[default]
    Empty,
    /// A bare string.
    Scalar(String),
    /// Any other value (object, array, number, bool).
    Structured(Value),
}

// ============================================================================
// Constructors
// ============================================================================

impl Payload {
    /// Creates a scalar string payload.
    #[inline]
    #[must_use]
    pub fn scalar(text: impl Into<String>) -> Self {
        Self::Scalar(text.into())
    }

    /// Creates a structured payload in normal form.
    #[must_use]
    pub fn structured(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::String(text) => Self::Scalar(text),
            other => Self::Structured(other),
        }
    }

    /// Serializes any `Serialize` value into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the value cannot be represented.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::structured)
            .map_err(|e| Error::encode(format!("payload serialization failed: {e}")))
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Payload {
    /// Returns `true` for [`Payload::Empty`].
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the string of a scalar payload.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the value of a structured payload.
    #[inline]
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    /// Converts the payload into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Scalar(text) => Value::String(text.clone()),
            Self::Structured(value) => value.clone(),
        }
    }

    /// Deserializes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Scalar(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Scalar(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::structured(value)
    }
}

impl From<()> for Payload {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        count: u32,
    }

    #[test]
    fn test_structured_normalizes() {
        assert_eq!(Payload::structured(Value::Null), Payload::Empty);
        assert_eq!(Payload::structured(json!("hi")), Payload::scalar("hi"));
        assert_eq!(
            Payload::structured(json!([1, 2])),
            Payload::Structured(json!([1, 2]))
        );
    }

    #[test]
    fn test_from_serialize_and_back() {
        let payload = Payload::from_serialize(&Counter { count: 3 }).expect("serializable");
        assert_eq!(payload.as_value(), Some(&json!({"count": 3})));

        let counter: Counter = payload.deserialize().expect("deserializable");
        assert_eq!(counter, Counter { count: 3 });
    }

    #[test]
    fn test_deserialize_mismatch() {
        let payload = Payload::scalar("not a counter");
        assert!(payload.deserialize::<Counter>().is_err());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Payload::from("x").as_str(), Some("x"));
        assert!(Payload::from(()).is_empty());
        assert_eq!(Payload::Empty.to_value(), Value::Null);
        assert!(Payload::scalar("x").as_value().is_none());
    }
}
