//! Text codec: flat JSON objects.
//!
//! # Format
//!
//! Object payloads are merged into the top level next to the event key:
//!
//! ```json
//! { "event": "move", "x": 1, "y": 2 }
//! ```
//!
//! Bare strings and non-object values are wrapped, with the type tag naming
//! the member that holds them:
//!
//! ```json
//! { "event": "echo", "_type": "_string", "_string": "hello" }
//! { "event": "nums", "_type": "_value", "_value": [1, 2, 3] }
//! ```
//!
//! An empty payload is the event key alone. Payload fields that collide with
//! a reserved key are rejected at encode time rather than overwritten.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{Error, Result};
use crate::options::{CodecKind, TextKeys};

use super::codec::Codec;
use super::event::Event;
use super::frame::Frame;
use super::payload::Payload;

// ============================================================================
// TextCodec
// ============================================================================

/// Flat JSON object codec.
#[derive(Debug, Clone, Default)]
pub struct TextCodec {
    keys: TextKeys,
}

impl TextCodec {
    /// Creates a text codec with the given reserved keys.
    #[inline]
    #[must_use]
    pub fn new(keys: TextKeys) -> Self {
        Self { keys }
    }

    /// Returns the reserved keys.
    #[inline]
    #[must_use]
    pub fn keys(&self) -> &TextKeys {
        &self.keys
    }

    fn wrap(&self, map: &mut Map<String, Value>, member: &str, value: Value) {
        map.insert(self.keys.type_tag.clone(), Value::String(member.to_owned()));
        map.insert(member.to_owned(), value);
    }
}

impl Codec for TextCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Text
    }

    fn encode(&self, event: &str, payload: &Payload) -> Result<Frame> {
        if event.is_empty() {
            return Err(Error::encode("event name must not be empty"));
        }

        let mut map = Map::new();

        match payload {
            Payload::Empty | Payload::Structured(Value::Null) => {}
            Payload::Scalar(text) => {
                self.wrap(&mut map, &self.keys.string, Value::String(text.clone()));
            }
            Payload::Structured(Value::String(text)) => {
                self.wrap(&mut map, &self.keys.string, Value::String(text.clone()));
            }
            Payload::Structured(Value::Object(fields)) => {
                for (key, value) in fields {
                    if self.keys.is_reserved(key) {
                        return Err(Error::encode(format!(
                            "payload key '{key}' collides with a reserved frame key"
                        )));
                    }
                    map.insert(key.clone(), value.clone());
                }
            }
            Payload::Structured(other) => {
                self.wrap(&mut map, &self.keys.value, other.clone());
            }
        }

        map.insert(self.keys.event.clone(), Value::String(event.to_owned()));

        let text = serde_json::to_string(&Value::Object(map))
            .map_err(|e| Error::encode(format!("JSON serialization failed: {e}")))?;

        trace!(event, len = text.len(), "Encoded text frame");
        Ok(Frame::Text(text))
    }

    fn decode(&self, frame: &Frame) -> Result<Event> {
        let text = match frame {
            Frame::Text(text) => text.as_str(),
            Frame::Binary(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| Error::decode(format!("frame is not UTF-8: {e}")))?,
        };

        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::decode(format!("invalid JSON: {e}")))?;

        let Value::Object(mut map) = value else {
            return Err(Error::decode("frame is not a JSON object"));
        };

        let name = match map.remove(&self.keys.event) {
            Some(Value::String(name)) if !name.is_empty() => name,
            Some(_) => return Err(Error::decode("event name must be a non-empty string")),
            None => {
                return Err(Error::decode(format!(
                    "missing '{}' key",
                    self.keys.event
                )));
            }
        };

        let payload = match map.remove(&self.keys.type_tag) {
            Some(Value::String(member)) => match map.remove(&member) {
                Some(value) => Payload::structured(value),
                None => {
                    return Err(Error::decode(format!(
                        "type tag names missing member '{member}'"
                    )));
                }
            },
            Some(_) => return Err(Error::decode("type tag must be a string")),
            None if map.is_empty() => Payload::Empty,
            None => Payload::Structured(Value::Object(map)),
        };

        Ok(Event { name, payload })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn encode_value(codec: &TextCodec, event: &str, payload: &Payload) -> Value {
        match codec.encode(event, payload).expect("encodable") {
            Frame::Text(text) => serde_json::from_str(&text).expect("valid JSON"),
            Frame::Binary(_) => panic!("text codec produced a binary frame"),
        }
    }

    #[test]
    fn test_object_payload_is_flattened() {
        let codec = TextCodec::default();
        let value = encode_value(&codec, "move", &Payload::structured(json!({"a": 1, "b": 2})));
        assert_eq!(value, json!({"event": "move", "a": 1, "b": 2}));
    }

    #[test]
    fn test_scalar_payload_is_wrapped() {
        let codec = TextCodec::default();
        let value = encode_value(&codec, "echo", &Payload::scalar("hi"));
        assert_eq!(
            value,
            json!({"event": "echo", "_type": "_string", "_string": "hi"})
        );
    }

    #[test]
    fn test_non_object_value_is_wrapped() {
        let codec = TextCodec::default();
        let payload = Payload::structured(json!([1, 2, 3]));
        let value = encode_value(&codec, "nums", &payload);
        assert_eq!(
            value,
            json!({"event": "nums", "_type": "_value", "_value": [1, 2, 3]})
        );

        let event = codec.decode(&codec.encode("nums", &payload).expect("encodable"));
        assert_eq!(event.expect("decodable").payload, payload);
    }

    #[test]
    fn test_numeric_counter_round_trip() {
        let codec = TextCodec::default();
        let payload = Payload::structured(json!(7));
        let frame = codec.encode("pong", &payload).expect("encodable");
        assert_eq!(codec.decode(&frame).expect("decodable").payload, payload);
    }

    #[test]
    fn test_empty_payload_is_event_only() {
        let codec = TextCodec::default();
        let value = encode_value(&codec, "ping", &Payload::Empty);
        assert_eq!(value, json!({"event": "ping"}));
    }

    #[test]
    fn test_reserved_key_collision_is_encode_error() {
        let codec = TextCodec::default();
        let err = codec
            .encode("e", &Payload::structured(json!({"event": "spoof"})))
            .unwrap_err();
        assert!(err.is_encode_error());
    }

    #[test]
    fn test_decode_legacy_browser_frame() {
        let codec = TextCodec::new(TextKeys::legacy());
        let frame = Frame::Text(
            r#"{"_ws_event":"echo","_ws_type":"_ws_msg_type_string","_ws_msg_type_string":"hi"}"#
                .into(),
        );
        let event = codec.decode(&frame).expect("decodable");
        assert_eq!(event.name, "echo");
        assert_eq!(event.payload, Payload::scalar("hi"));
    }

    #[test]
    fn test_decode_accepts_utf8_binary_frame() {
        let codec = TextCodec::default();
        let frame = Frame::Binary(br#"{"event":"e","k":true}"#.to_vec());
        let event = codec.decode(&frame).expect("decodable");
        assert_eq!(event.payload, Payload::structured(json!({"k": true})));
    }

    #[test]
    fn test_decode_errors() {
        let codec = TextCodec::default();
        let cases = [
            r#"{"event":"trunc"#,
            r"[1, 2]",
            r#"{"a": 1}"#,
            r#"{"event": ""}"#,
            r#"{"event": 5}"#,
            r#"{"event": "e", "_type": 1}"#,
            r#"{"event": "e", "_type": "_string", "other": 1}"#,
        ];

        for case in cases {
            let result = codec.decode(&Frame::Text(case.into()));
            assert!(
                matches!(result, Err(Error::Decode { .. })),
                "expected decode error for {case}"
            );
        }
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let codec = TextCodec::default();
        let result = codec.decode(&Frame::Binary(vec![0xff, 0xfe]));
        assert!(matches!(result, Err(Error::Decode { .. })));
    }

    proptest! {
        #[test]
        fn prop_flat_objects_round_trip(
            event in "[a-z]{1,12}",
            fields in prop::collection::btree_map("k_[a-z0-9]{1,6}", any::<i64>(), 1..8),
        ) {
            let codec = TextCodec::default();
            let object: Map<String, Value> =
                fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
            let payload = Payload::Structured(Value::Object(object));

            let frame = codec.encode(&event, &payload).expect("encodable");
            let decoded = codec.decode(&frame).expect("decodable");

            prop_assert_eq!(decoded.name, event);
            prop_assert_eq!(decoded.payload, payload);
        }
    }
}
