//! Gateway frame format

use super::{HelloPayload, IdentifyPayload, OpCode, ReadyPayload, ResumePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name of the dispatch that completes Identify
pub const READY: &str = "READY";
/// Event name of the dispatch that completes Resume
pub const RESUMED: &str = "RESUMED";

/// Gateway frame
///
/// Every message on the socket, in either direction, has this envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event name (dispatch only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (dispatch only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    fn bare(op: OpCode, d: Option<Value>) -> Self {
        Self { op, t: None, s: None, d }
    }

    // === Client frames ===

    /// Heartbeat (op=1) carrying the last sequence seen, or null
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::bare(OpCode::Heartbeat, Some(last_sequence.map_or(Value::Null, Value::from)))
    }

    /// Identify (op=2)
    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::bare(OpCode::Identify, Some(serde_json::to_value(payload).unwrap_or_default()))
    }

    /// Resume (op=6)
    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self::bare(OpCode::Resume, Some(serde_json::to_value(payload).unwrap_or_default()))
    }

    // === Server frames ===

    /// Dispatch (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Hello (op=10)
    #[must_use]
    pub fn hello(payload: HelloPayload) -> Self {
        Self::bare(OpCode::Hello, Some(serde_json::to_value(payload).unwrap_or_default()))
    }

    /// Heartbeat ACK (op=11)
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::bare(OpCode::HeartbeatAck, None)
    }

    /// Reconnect (op=7)
    #[must_use]
    pub fn reconnect() -> Self {
        Self::bare(OpCode::Reconnect, None)
    }

    /// Invalid Session (op=9); `resumable` goes in `d`
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::bare(OpCode::InvalidSession, Some(Value::Bool(resumable)))
    }

    // === Parsing ===

    fn payload<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.payload()
    }

    /// READY dispatch data
    pub fn as_ready(&self) -> Option<ReadyPayload> {
        if self.op != OpCode::Dispatch || self.t.as_deref() != Some(READY) {
            return None;
        }
        self.payload()
    }

    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        self.payload()
    }

    pub fn as_resume(&self) -> Option<ResumePayload> {
        if self.op != OpCode::Resume {
            return None;
        }
        self.payload()
    }

    /// Whether an Invalid Session frame allows resuming; a missing flag means no
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    /// Try to parse the heartbeat sequence number (op=1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_u64))
    }

    // === Utilities ===

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
