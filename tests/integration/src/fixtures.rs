//! Test fixtures and data generators
//!
//! Canned gateway frames, HTTP responses and configurations.

use chat_common::ClientConfig;
use chat_gateway::protocol::HelloPayload;
use chat_gateway::{GatewayMessage, SessionConfig};
use chat_rest::{BucketCatalog, BucketKind, BucketSpec, HttpResponse, Scope};
use serde_json::{json, Value};
use std::time::Duration;

pub const TOKEN: &str = "test-token";
pub const INTENTS: u64 = 513;

/// Heartbeat interval long enough that beats never interfere with a test
pub const QUIET_INTERVAL_MS: u64 = 60_000;

// ============================================================================
// Gateway frames
// ============================================================================

pub fn hello(interval_ms: u64) -> GatewayMessage {
    GatewayMessage::hello(HelloPayload::with_interval(interval_ms))
}

pub fn quiet_hello() -> GatewayMessage {
    hello(QUIET_INTERVAL_MS)
}

pub fn ready(session_id: &str, sequence: u64, resume_url: &str) -> GatewayMessage {
    GatewayMessage::dispatch(
        "READY",
        sequence,
        json!({
            "v": 10,
            "session_id": session_id,
            "resume_gateway_url": resume_url,
            "user": {"id": "1", "username": "bot"},
            "guilds": []
        }),
    )
}

pub fn resumed(sequence: u64) -> GatewayMessage {
    GatewayMessage::dispatch("RESUMED", sequence, Value::Null)
}

/// The same frame with its sequence stripped
pub fn without_sequence(mut frame: GatewayMessage) -> GatewayMessage {
    frame.s = None;
    frame
}

pub fn message_create(sequence: u64, channel_id: u64) -> GatewayMessage {
    GatewayMessage::dispatch(
        "MESSAGE_CREATE",
        sequence,
        json!({
            "id": sequence.to_string(),
            "channel_id": channel_id.to_string(),
            "content": format!("message {sequence}")
        }),
    )
}

pub fn session_config() -> SessionConfig {
    SessionConfig::new(TOKEN, INTENTS)
        .with_hello_timeout(Duration::from_secs(5))
        .with_max_backoff(Duration::from_secs(4))
}

// ============================================================================
// HTTP responses
// ============================================================================

pub fn ok_json(body: &Value) -> HttpResponse {
    HttpResponse::new(200).with_body(body.to_string())
}

/// 429 with `retry_after` seconds in the header and the body
pub fn rate_limited(retry_after: f64, global: bool) -> HttpResponse {
    let mut response = HttpResponse::new(429)
        .with_header("retry-after", retry_after.to_string())
        .with_body(
            json!({
                "message": "You are being rate limited.",
                "retry_after": retry_after,
                "global": global
            })
            .to_string(),
        );
    if global {
        response = response.with_header("x-ratelimit-global", "true");
    }
    response
}

pub fn bad_gateway() -> HttpResponse {
    HttpResponse::new(502).with_body("Bad Gateway")
}

/// Successful response reporting an exhausted server window
pub fn exhausted(reset_after: f64) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("x-ratelimit-limit", "5")
        .with_header("x-ratelimit-remaining", "0")
        .with_header("x-ratelimit-reset-after", reset_after.to_string())
        .with_body("{}")
}

// ============================================================================
// Configuration
// ============================================================================

/// Generous global bucket with one limited per-channel class
pub fn catalog(send_max: u32, send_window: Duration) -> BucketCatalog {
    BucketCatalog::default()
        .with(
            BucketKind::Global,
            BucketSpec::new(Scope::Global, 1000, Duration::from_secs(1)),
        )
        .and_then(|c| {
            c.with(
                BucketKind::SendEditMessage,
                BucketSpec::new(Scope::PerResource, send_max, send_window)
                    .with_parent(BucketKind::Global),
            )
        })
        .expect("valid catalog")
}

pub fn client_config(gateway_url: Option<&str>) -> ClientConfig {
    let mut config = ClientConfig::with_token(TOKEN);
    config.gateway.url = gateway_url.map(str::to_string);
    config.gateway.intents = INTENTS;
    config.gateway.hello_timeout_ms = 5_000;
    config.gateway.max_backoff_ms = 4_000;
    config
}
