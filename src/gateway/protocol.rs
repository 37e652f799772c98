//! Gateway wire frames
//!
//! Every message is a JSON object `{op, d, s, t}`. Only the opcodes needed to
//! identify, stay alive, and receive dispatches are modelled.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway opcodes
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Dispatch name marking a completed handshake
pub const READY: &str = "READY";

/// One gateway message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// Opcode
    pub op: u8,

    /// Opcode-specific data
    #[serde(default)]
    pub d: serde_json::Value,

    /// Sequence number (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Dispatch name (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// Heartbeat carrying the last sequence number seen (null before any dispatch)
    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self {
            op: opcode::HEARTBEAT,
            d: serde_json::json!(seq),
            s: None,
            t: None,
        }
    }

    pub fn identify(token: &str, intents: u64) -> Self {
        Self {
            op: opcode::IDENTIFY,
            d: serde_json::json!({
                "token": token,
                "intents": intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "a3s-bridge",
                    "device": "a3s-bridge",
                },
            }),
            s: None,
            t: None,
        }
    }

    pub fn dispatch(name: impl Into<String>, seq: u64, data: serde_json::Value) -> Self {
        Self {
            op: opcode::DISPATCH,
            d: data,
            s: Some(seq),
            t: Some(name.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Heartbeat interval announced by a Hello frame
    pub fn heartbeat_interval(&self) -> Result<Duration> {
        if self.op != opcode::HELLO {
            return Err(Error::Gateway(format!(
                "expected Hello (op {}), got op {}",
                opcode::HELLO,
                self.op
            )));
        }
        self.d
            .get("heartbeat_interval")
            .and_then(serde_json::Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| Error::Gateway("Hello without a usable heartbeat_interval".to_string()))
    }

    pub fn is_ready(&self) -> bool {
        self.op == opcode::DISPATCH && self.t.as_deref() == Some(READY)
    }
}
