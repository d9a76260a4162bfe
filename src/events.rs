//! Typed gateway events.
//!
//! The gateway module turns every raw [`GatewayPayload`] into a
//! [`GatewayEvent`] so the bot loop pattern-matches on typed data instead of
//! `(op, t, serde_json::Value)` tuples.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::{GatewayPayload, Message, ReadyEvent};

/// Gateway opcodes we react to.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// A parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// IDENTIFY succeeded.
    Ready(Box<ReadyEvent>),

    /// A message was created in a channel we can see.
    MessageCreate(Box<Message>),

    /// Op 1: the gateway wants a heartbeat now.
    HeartbeatRequest,

    /// Op 11.
    HeartbeatAck,

    /// Op 7: reconnect and resume.
    Reconnect,

    /// Op 9. `true` when the session can be resumed.
    InvalidSession(bool),

    /// Anything without a typed variant, including dispatches whose payload
    /// failed to parse.
    Unknown { op: u8, event_name: Option<String> },
}

impl GatewayEvent {
    /// Classify a raw payload. Never fails; unrecognised input becomes
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            opcode::DISPATCH => Self::parse_dispatch(payload.t, payload.d),
            opcode::HEARTBEAT => GatewayEvent::HeartbeatRequest,
            opcode::RECONNECT => GatewayEvent::Reconnect,
            opcode::INVALID_SESSION => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            opcode::HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown {
                op,
                event_name: payload.t,
            },
        }
    }

    fn parse_dispatch(name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let unknown = |name: Option<String>| GatewayEvent::Unknown {
            op: opcode::DISPATCH,
            event_name: name,
        };

        let Some(name) = name else {
            return unknown(None);
        };
        let Some(data) = data else {
            return unknown(Some(name));
        };

        let event = match name.as_str() {
            "READY" => typed(&name, data).map(GatewayEvent::Ready),
            "MESSAGE_CREATE" => typed(&name, data).map(GatewayEvent::MessageCreate),
            _ => None,
        };
        event.unwrap_or_else(|| unknown(Some(name)))
    }

    /// Dispatch event name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            GatewayEvent::Ready(_) => Some("READY"),
            GatewayEvent::MessageCreate(_) => Some("MESSAGE_CREATE"),
            GatewayEvent::Unknown { event_name, .. } => event_name.as_deref(),
            _ => None,
        }
    }
}

fn typed<T: DeserializeOwned>(name: &str, data: serde_json::Value) -> Option<Box<T>> {
    match serde_json::from_value::<T>(data) {
        Ok(value) => Some(Box::new(value)),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
