//! Rate-limit information reported by the server

use crate::http::HttpResponse;
use serde::Deserialize;
use std::time::Duration;

/// Parsed `x-ratelimit-*` headers of one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    /// The limit hit applies to the whole client
    pub global: bool,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time until the server-side window resets
    pub reset_after: Option<Duration>,
    /// Time to wait before retrying (429 only)
    pub retry_after: Option<Duration>,
    /// Opaque server bucket hash
    pub bucket: Option<String>,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

/// Longest wait taken from a server-reported value
const MAX_REPORTED_WAIT: Duration = Duration::from_secs(60 * 60);

fn from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs.is_sign_negative() {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).map_or(MAX_REPORTED_WAIT, |wait| wait.min(MAX_REPORTED_WAIT)))
}

fn seconds(raw: &str) -> Option<Duration> {
    raw.trim().parse::<f64>().ok().and_then(from_secs)
}

impl RateLimitInfo {
    pub fn from_response(response: &HttpResponse) -> Self {
        let mut info = Self {
            global: response
                .header("x-ratelimit-global")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            limit: response
                .header("x-ratelimit-limit")
                .and_then(|v| v.trim().parse().ok()),
            remaining: response
                .header("x-ratelimit-remaining")
                .and_then(|v| v.trim().parse().ok()),
            reset_after: response.header("x-ratelimit-reset-after").and_then(seconds),
            retry_after: response.header("retry-after").and_then(seconds),
            bucket: response.header("x-ratelimit-bucket").map(str::to_string),
        };

        // 429 bodies carry the same data, sometimes more precisely
        if response.status == 429 {
            if let Ok(body) = serde_json::from_str::<RateLimitBody>(&response.body) {
                if info.retry_after.is_none() {
                    info.retry_after = body.retry_after.and_then(from_secs);
                }
                info.global |= body.global;
            }
        }

        info
    }

    /// Server says the window is exhausted; returns how long to hold off
    #[must_use]
    pub fn exhausted_for(&self) -> Option<Duration> {
        match (self.remaining, self.reset_after) {
            (Some(0), Some(reset)) if !reset.is_zero() => Some(reset),
            _ => None,
        }
    }
}
