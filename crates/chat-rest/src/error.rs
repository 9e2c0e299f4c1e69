//! REST error types
//!
//! Rate limits and transient 502s never surface here; the dispatcher absorbs
//! them. Callers only observe success, a timeout or a terminal failure.

use crate::http::TransportError;

/// Result type for dispatched requests
pub type RestResult<T> = Result<T, RestError>;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The request's deadline passed before it completed
    #[error("request timed out before completion")]
    Timeout,

    /// The server rejected the request
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Removed from its queue by `Dispatcher::clear`
    #[error("request cancelled")]
    Cancelled,

    /// The dispatcher shut down with the request still queued
    #[error("dispatcher closed")]
    Closed,

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RestError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// HTTP status for server rejections
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Invalid bucket catalog definitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("bucket {0} declares itself as parent")]
    SelfParent(&'static str),

    #[error("parent {parent} of bucket {bucket} is not a global bucket")]
    ParentNotGlobal {
        bucket: &'static str,
        parent: &'static str,
    },

    #[error("bucket {0} has a cyclic parent chain")]
    Cycle(&'static str),
}
