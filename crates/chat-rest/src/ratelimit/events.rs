//! Rate-limit notifications

use super::catalog::BucketKey;
use std::time::Duration;

/// Published whenever the server answers 429
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEvent {
    /// Bucket that was paused
    pub bucket: BucketKey,
    pub retry_after: Duration,
    /// The limit applied to the whole client
    pub global: bool,
    /// `METHOD /path` of the request that was limited
    pub request: String,
}
