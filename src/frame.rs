//! Frame: the universal message type on the chat socket.
//!
//! ARCHITECTURE
//! ============
//! Every WebSocket text message is one JSON frame. Clients send frames named
//! after the event they raise (`message:group`, `typing:start`, ...), the
//! session dispatches on the event prefix, and the server answers with frames
//! named after the server event (`message:received`, `typing:update`, ...).
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Frames caused by a request (errors, `message:sent`) carry `parent_id`.
//! - Inbound frames may omit `id` and `ts`; the server fills them in.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

/// Server event used for every client-visible error.
pub const ERROR_EVENT: &str = "error";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default = "now_ms")]
    pub ts: i64,
    pub event: String,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a frame for the given event.
    pub fn new(event: impl Into<String>, data: Data) -> Self {
        Self { id: Uuid::new_v4(), parent_id: None, ts: now_ms(), event: event.into(), data }
    }

    /// Create a frame whose payload is a serializable value. Objects are
    /// flattened into `data`; anything else lands under `value`.
    pub fn from_value(event: impl Into<String>, value: &impl Serialize) -> Self {
        let data = match serde_json::to_value(value) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            Ok(other) => Data::from([("value".to_string(), other)]),
            Err(_) => Data::new(),
        };
        Self::new(event, data)
    }

    /// Create a structured error frame with code and retryable flag.
    pub fn coded_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        Self::new(ERROR_EVENT, data)
    }

    /// Create a structured error frame answering this request.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::coded_error(err).with_parent(self.id)
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    /// Extract the event prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.event.split_once(':') else {
            return &self.event;
        };
        prefix
    }

    /// Extract the event operation (everything after the first ':').
    #[must_use]
    pub fn op(&self) -> &str {
        self.event.split_once(':').map_or("", |(_, op)| op)
    }

    /// Trimmed, non-empty string field.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Field parsed as a UUID.
    #[must_use]
    pub fn uuid_field(&self, key: &str) -> Option<Uuid> {
        self.str_field(key).and_then(|s| s.parse().ok())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_fields() {
        let frame = Frame::new("message:public", Data::new());
        assert_eq!(frame.event, "message:public");
        assert!(frame.parent_id.is_none());
        assert!(frame.ts > 0);
    }

    #[test]
    fn prefix_and_op_extraction() {
        let frame = Frame::new("typing:start", Data::new());
        assert_eq!(frame.prefix(), "typing");
        assert_eq!(frame.op(), "start");

        let frame = Frame::new("noseparator", Data::new());
        assert_eq!(frame.prefix(), "noseparator");
        assert_eq!(frame.op(), "");
    }

    #[test]
    fn inbound_frame_without_id_or_ts_parses() {
        let frame: Frame =
            serde_json::from_str(r#"{"event":"user:online","data":{"userId":"u1","userName":"Ada"}}"#).unwrap();
        assert_eq!(frame.event, "user:online");
        assert!(frame.ts > 0);
        assert_eq!(frame.str_field("userId"), Some("u1"));
    }

    #[test]
    fn str_field_rejects_blank_values() {
        let frame = Frame::new("message:public", Data::new())
            .with_data("content", "   ")
            .with_data("count", 3);
        assert_eq!(frame.str_field("content"), None);
        assert_eq!(frame.str_field("count"), None);
        assert_eq!(frame.str_field("missing"), None);
    }

    #[test]
    fn error_from_typed() {
        #[derive(Debug, thiserror::Error)]
        #[error("room is gone")]
        struct Gone;

        impl ErrorCode for Gone {
            fn error_code(&self) -> &'static str {
                "gone"
            }
        }

        let req = Frame::new("message:group", Data::new());
        let err = req.error_from(&Gone);

        assert_eq!(err.event, ERROR_EVENT);
        assert_eq!(err.parent_id, Some(req.id));
        assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("gone"));
        assert_eq!(err.data.get("message").and_then(|v| v.as_str()), Some("room is gone"));
        assert_eq!(err.data.get("retryable").and_then(serde_json::Value::as_bool), Some(false));
    }

    #[test]
    fn from_value_flattens_objects_and_wraps_scalars() {
        let frame = Frame::from_value("room:created", &serde_json::json!({"id": "r1", "name": "Lab"}));
        assert_eq!(frame.data.get("name").and_then(|v| v.as_str()), Some("Lab"));

        let frame = Frame::from_value("ai:typing", &true);
        assert_eq!(frame.data.get("value").and_then(serde_json::Value::as_bool), Some(true));
    }
}
