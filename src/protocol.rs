//! JSON-RPC 2.0 message helpers for the transparent proxy wire format.
//!
//! The proxy does not validate MCP semantics beyond framing (`spec.md` §1
//! Non-goals), so messages are carried as plain `serde_json::Value` rather
//! than a fixed set of typed request/response structs — the proxy must be
//! able to pass through methods it has never heard of.

use std::fmt;

use serde_json::{json, Value};

/// Error code used for every proxy-synthesized transport error: timeout, no
/// server, write failure, extension tool exception.
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC id. Represented separately from `serde_json::Value` because
/// ids must be `Eq + Hash` to key maps/sets (plain JSON numbers are not,
/// since `Value::Number` may hold a float), and JSON-RPC restricts ids to
/// string, number, or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl RequestId {
    /// Extract a `RequestId` from a JSON value, if it has one of the three
    /// shapes JSON-RPC allows.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Null => Some(RequestId::Null),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => Value::from(*n),
            RequestId::String(s) => Value::from(s.clone()),
            RequestId::Null => Value::Null,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

/// `.method`, if `msg` has one and it is a string.
pub fn method_of(msg: &Value) -> Option<&str> {
    msg.get("method").and_then(Value::as_str)
}

/// `.id` as a `RequestId`, if `msg` carries one.
pub fn id_of(msg: &Value) -> Option<RequestId> {
    msg.get("id").and_then(RequestId::from_value)
}

/// True if `msg` carries an `id` field at all (requests and responses do;
/// notifications don't). Used by Pump A step 4 ("`tools/list` and `m.id` is
/// present").
pub fn has_id(msg: &Value) -> bool {
    msg.get("id").is_some()
}

/// Build a JSON-RPC request `{jsonrpc, id, method, params}`.
pub fn build_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a JSON-RPC success response `{jsonrpc, id, result}`.
pub fn build_response(id: RequestId, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id.to_value(),
        "result": result,
    })
}

/// Build a JSON-RPC error response `{jsonrpc, id, error: {code, message, data?}}`.
pub fn build_error_response(id: RequestId, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "id": id.to_value(),
        "error": error,
    })
}

/// Build a JSON-RPC notification `{jsonrpc, method, params}` (no id).
pub fn build_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Serialize `msg` to a single line of newline-terminated JSON, as written
/// to a stdio pipe.
pub fn to_line(msg: &Value) -> String {
    format!("{}\n", msg)
}
