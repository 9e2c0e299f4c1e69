//! Session state

use crate::protocol::{Disposition, ResumePayload};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Opening the socket and waiting for Hello
    Connecting,
    /// Identify sent, waiting for READY
    Identifying,
    /// Resume sent, waiting for RESUMED
    Resuming,
    Connected,
    /// Connection lost, waiting out the backoff
    Reconnecting,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What survives a resumable disconnect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeState {
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    pub resume_url: Option<String>,
}

impl ResumeState {
    /// Accept `sequence` if it moves forward; stale and duplicate values are refused
    pub fn advance(&mut self, sequence: u64) -> bool {
        if self.sequence.is_some_and(|current| sequence <= current) {
            return false;
        }
        self.sequence = Some(sequence);
        true
    }

    pub fn is_resumable(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        Some(ResumePayload {
            token: token.to_string(),
            session_id: self.session_id.clone()?,
            seq: self.sequence?,
        })
    }

    /// URL for the next connection attempt
    pub fn connect_url<'a>(&'a self, default: &'a str) -> &'a str {
        match &self.resume_url {
            Some(url) if self.is_resumable() => url,
            _ => default,
        }
    }

    /// Keep or drop the session after a disconnect
    pub fn apply(&mut self, disposition: Disposition) {
        if disposition != Disposition::Resume {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
