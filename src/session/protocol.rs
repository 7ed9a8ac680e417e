//! Client wire protocol: JSON message decoding and reply shapes.
//!
//! Every incoming message is a single JSON object with an `action` field;
//! every reply carries `status ∈ {"success", "error"}` and usually echoes
//! the action.  Replies are built with `json!` right where the handler
//! knows the answer — there is no reply type zoo.

use serde_json::{Value, json};

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub action: String,
    pub body: Value,
}

/// Why a message could not be turned into a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not parseable as JSON at all.
    InvalidJson,
    /// Valid JSON, but not an object with a string `action`.
    MissingAction,
}

/// Decode one text frame.
pub fn decode_request(text: &str) -> Result<Request, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingAction)?
        .to_owned();
    Ok(Request {
        action,
        body: value,
    })
}

// ───────────────────────────────────────────────────────────────
// Loose field accessors
// ───────────────────────────────────────────────────────────────

/// Read a `car` id field (accepts a number or a numeric string).
pub fn car_id_field(body: &Value, key: &str) -> Option<u32> {
    match body.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a boolean that clients may send as `true` or `"true"`.
pub fn bool_field(body: &Value, key: &str) -> Option<bool> {
    match body.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Read an integer that clients may send as a number or numeric string.
pub fn int_field(body: &Value, key: &str) -> Option<i64> {
    match body.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn str_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

// ───────────────────────────────────────────────────────────────
// Canned replies
// ───────────────────────────────────────────────────────────────

pub fn invalid_json() -> Value {
    json!({
        "status": "error",
        "message": "Invalid JSON format",
    })
}

pub fn unknown_action(action: Option<&str>) -> Value {
    let mut reply = json!({
        "status": "error",
        "message": "Unknown action",
    });
    if let Some(action) = action {
        reply["action"] = json!(action);
    }
    reply
}

pub fn error_reply(action: &str, message: impl AsRef<str>) -> Value {
    json!({
        "status": "error",
        "action": action,
        "message": message.as_ref(),
    })
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
