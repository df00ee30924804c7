//! JSON-RPC records exchanged with the hub
//!
//! The hub speaks JSON-RPC 1.1 over plain HTTP. Payload fields the hub may
//! omit are `Option` here so a missing field never fails a whole response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound JSON-RPC request body
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub version: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: &str, params: Value, id: u64) -> Self {
        Self {
            version: "1.1",
            method: method.to_string(),
            params,
            id,
        }
    }
}

/// Inbound JSON-RPC response body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response carrying `result`
    #[must_use]
    pub const fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn err(code: i64, message: &str) -> Self {
        Self {
            result: Value::Null,
            error: Some(RpcError {
                code,
                message: message.to_string(),
            }),
        }
    }
}

/// Error object inside a JSON-RPC response
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Message fragments the hub uses when a session id is unknown or expired
const SESSION_MARKERS: &[&str] = &["session", "not logged in", "nicht angemeldet", "access denied"];

impl RpcError {
    /// Whether this error means the session token is no longer accepted
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        if self.code == -1 {
            return true;
        }
        let lower = self.message.to_lowercase();
        SESSION_MARKERS.iter().any(|m| lower.contains(m))
    }
}

/// `Device.get` result
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceDetails {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
}

/// `Room.get` result
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomDetails {
    #[serde(default)]
    pub name: Option<String>,
    /// Channel ids; the hub sends strings but older firmware sends numbers
    #[serde(default, rename = "channelIds")]
    pub channel_ids: Vec<Value>,
}

impl RoomDetails {
    /// Whether the room lists the given channel id
    #[must_use]
    pub fn contains_channel(&self, channel_id: u64) -> bool {
        self.channel_ids.iter().any(|c| match c {
            Value::String(s) => s.trim().parse::<u64>().ok() == Some(channel_id),
            Value::Number(n) => n.as_u64() == Some(channel_id),
            _ => false,
        })
    }
}

/// Parse a list of string ids as returned by `Device.listAll` and `Room.listAll`
///
/// Numeric ids are accepted and stringified; other entries are dropped.
#[must_use]
pub fn parse_id_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
    )
}

/// Interpret an `Interface.getValue` result as a number
///
/// The hub returns numbers as JSON numbers or as numeric strings depending
/// on firmware; anything else is `None`.
#[must_use]
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
