//! Notification frames
//!
//! Every message the server pushes down an event stream is one `Frame`,
//! rendered as a single JSON object and transmitted as SSE `data:` lines.
//! The envelope always carries all three fields; `meta` is an explicit
//! `null` rather than being omitted, which existing consumers rely on.
//!
//! # Examples
//!
//! ```rust
//! use cvl_core::{Frame, Operation};
//!
//! let frame = Frame::update("bathymetry");
//! assert_eq!(frame.operation, Operation::Update);
//! assert_eq!(frame.to_json().unwrap(),
//!            r#"{"key":"bathymetry","operation":"update","meta":null}"#);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation discriminant carried by every notification frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Identity assignment, sent once to each newly attached subscriber
    Id,
    /// An object's metadata and/or data changed
    Update,
    /// An object was removed
    Delete,
    /// Out-of-band message from a producer to all subscribers
    Control,
    /// Broadcast state query; subscribers answer via `POST /state`
    Query,
}

/// JSON envelope `{key, operation, meta}` pushed to subscribers
///
/// The `key` field is polymorphic on the wire: a string key for `update`
/// and `delete`, the subscriber sequence number for `id`, and `null` for
/// `control` and `query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Object key, subscriber number, or null depending on `operation`
    pub key: Value,
    /// What happened
    pub operation: Operation,
    /// Payload for `control` frames; null for every other operation
    pub meta: Option<Value>,
}

impl Frame {
    /// Identity frame carrying the subscriber's sequence number
    pub fn id(sequence: u64) -> Self {
        Self {
            key: Value::from(sequence),
            operation: Operation::Id,
            meta: None,
        }
    }

    /// Notification that the object at `key` changed
    pub fn update(key: impl Into<String>) -> Self {
        Self {
            key: Value::String(key.into()),
            operation: Operation::Update,
            meta: None,
        }
    }

    /// Notification that the object at `key` was removed
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: Value::String(key.into()),
            operation: Operation::Delete,
            meta: None,
        }
    }

    /// Control broadcast carrying an arbitrary document
    pub fn control(meta: Value) -> Self {
        Self {
            key: Value::Null,
            operation: Operation::Control,
            meta: Some(meta),
        }
    }

    /// Broadcast state query
    pub fn query() -> Self {
        Self {
            key: Value::Null,
            operation: Operation::Query,
            meta: None,
        }
    }

    /// Encode the frame for transmission
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_frame_wire_shape() {
        let frame = Frame::id(7);
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"key": 7, "operation": "id", "meta": null})
        );
    }

    #[test]
    fn test_update_and_delete_carry_string_keys() {
        assert_eq!(
            serde_json::to_value(Frame::update("foo")).unwrap(),
            json!({"key": "foo", "operation": "update", "meta": null})
        );
        assert_eq!(
            serde_json::to_value(Frame::delete("foo")).unwrap(),
            json!({"key": "foo", "operation": "delete", "meta": null})
        );
    }

    #[test]
    fn test_control_carries_meta() {
        let frame = Frame::control(json!({"cmd": "focus", "target": [1.0, 2.0]}));
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "key": null,
                "operation": "control",
                "meta": {"cmd": "focus", "target": [1.0, 2.0]}
            })
        );
    }

    #[test]
    fn test_query_frame_is_all_null() {
        assert_eq!(
            serde_json::to_value(Frame::query()).unwrap(),
            json!({"key": null, "operation": "query", "meta": null})
        );
    }

    #[test]
    fn test_round_trip() {
        let frame = Frame::control(json!({"layers": ["a", "b"]}));
        let decoded: Frame = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }
}
