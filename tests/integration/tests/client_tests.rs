//! Client facade integration tests
//!
//! REST, gateway and cache wired together over the mock transports.

use chat_client::{ChatClient, ClientError, EntityKey};
use chat_core::Snowflake;
use chat_gateway::{ConnectionState, GatewayMessage, OpCode};
use chat_rest::{HttpResponse, RestError};
use futures::future::join_all;
use integration_tests::*;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const GATEWAY_URL: &str = "wss://gateway.test";

fn new_client(
    gateway_url: Option<&str>,
) -> (Arc<ChatClient>, Arc<MockTransport>, Arc<MockConnector>, MockGateway) {
    let transport = MockTransport::new();
    let (connector, gateway) = MockGateway::new();
    let client = ChatClient::with_transports(
        client_config(gateway_url),
        transport.clone(),
        connector.clone(),
    );
    (Arc::new(client), transport, connector, gateway)
}

/// Connect and bring the session to `Connected`
async fn connected(client: &ChatClient, gateway: &mut MockGateway) -> ServerConnection {
    client.connect().await.expect("Failed to connect");
    let mut conn = gateway.accept().await;
    conn.deliver(quiet_hello()).await;
    assert_eq!(conn.next_command().await.op, OpCode::Identify);
    conn.deliver(ready("session-1", 1, "wss://resume.test")).await;
    assert_eq!(client.gateway().state(), ConnectionState::Connected);
    conn
}

/// Poll `check` until it holds or a second of test time passes
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(1), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition never held");
}

// ============================================================================
// Gateway discovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_gateway_url_is_discovered_over_rest() {
    let (client, transport, _connector, mut gateway) = new_client(None);
    transport.route("/gateway", ok_json(&json!({"url": "wss://discovered.test"})));

    client.connect().await.expect("Failed to connect");
    let conn = gateway.accept().await;

    assert_eq!(conn.url, "wss://discovered.test");
    assert_eq!(transport.paths(), vec!["/gateway"]);
}

#[tokio::test(start_paused = true)]
async fn test_configured_gateway_url_skips_discovery() {
    let (client, transport, _connector, mut gateway) = new_client(Some(GATEWAY_URL));

    client.connect().await.expect("Failed to connect");
    let conn = gateway.accept().await;

    assert_eq!(conn.url, GATEWAY_URL);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_is_reported() {
    let (client, transport, _connector, mut gateway) = new_client(None);
    transport.route("/gateway", HttpResponse::new(401).with_body("Unauthorized"));

    let err = client.connect().await.expect_err("connect must fail");
    assert!(matches!(err, ClientError::Rest(RestError::Http { status: 401, .. })));
    assert!(gateway.try_accept().is_none());
}

// ============================================================================
// Fetch through the cache
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetches_share_one_request() {
    let (client, transport, _connector, _gateway) = new_client(Some(GATEWAY_URL));
    transport.set_latency(Duration::from_millis(50));
    transport.route("/channels/7", ok_json(&json!({"id": "7", "name": "general"})));

    let fetches = (0..5).map(|_| client.channel(Snowflake::new(7)));
    let handles: Vec<_> = join_all(fetches)
        .await
        .into_iter()
        .map(|result| result.expect("Fetch failed"))
        .collect();

    assert_eq!(transport.call_count(), 1);
    assert!(handles.iter().all(|h| h.ptr_eq(&handles[0])));
    assert_eq!(handles[0].field("name"), Some(json!("general")));

    // Cached while held
    let again = client.channel(Snowflake::new(7)).await.expect("Fetch failed");
    assert!(again.ptr_eq(&handles[0]));
    assert_eq!(transport.call_count(), 1);

    // Gone once released
    drop(handles);
    drop(again);
    assert!(!client.cache().contains(&EntityKey::channel(Snowflake::new(7))));
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_is_not_cached() {
    let (client, transport, _connector, _gateway) = new_client(Some(GATEWAY_URL));
    transport.push(HttpResponse::new(404).with_body("Unknown User"));
    transport.push(ok_json(&json!({"id": "9", "username": "ferris"})));

    let err = client.user(Snowflake::new(9)).await.expect_err("404 must fail");
    assert!(matches!(err, ClientError::Rest(RestError::Http { status: 404, .. })));

    let user = client.user(Snowflake::new(9)).await.expect("Retry failed");
    assert_eq!(user.field("username"), Some(json!("ferris")));
    assert_eq!(transport.paths(), vec!["/users/9", "/users/9"]);
}

#[tokio::test(start_paused = true)]
async fn test_member_fetch_uses_guild_scoped_key() {
    let (client, transport, _connector, _gateway) = new_client(Some(GATEWAY_URL));
    transport.route(
        "/guilds/1/members/2",
        ok_json(&json!({"user": {"id": "2"}, "nick": "crab"})),
    );

    let member = client
        .member(Snowflake::new(1), Snowflake::new(2))
        .await
        .expect("Fetch failed");
    assert_eq!(*member.key(), EntityKey::member(Snowflake::new(1), Snowflake::new(2)));
    assert!(client
        .cache()
        .contains(&EntityKey::member(Snowflake::new(1), Snowflake::new(2))));
    assert!(!client.cache().contains(&EntityKey::user(Snowflake::new(2))));
}

// ============================================================================
// Gateway events keep the cache current
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_update_event_refreshes_held_entity() {
    let (client, transport, _connector, mut gateway) = new_client(Some(GATEWAY_URL));
    transport.route("/channels/7", ok_json(&json!({"id": "7", "name": "general"})));
    let mut conn = connected(&client, &mut gateway).await;

    let channel = client.channel(Snowflake::new(7)).await.expect("Fetch failed");
    conn.deliver(GatewayMessage::dispatch(
        "CHANNEL_UPDATE",
        2,
        json!({"id": "7", "name": "lobby"}),
    ))
    .await;

    eventually(|| {
        let channel = &channel;
        async move { channel.field("name") == Some(json!("lobby")) }
    })
    .await;
    assert!(!channel.is_deleted());
}

#[tokio::test(start_paused = true)]
async fn test_delete_event_evicts_entity() {
    let (client, transport, _connector, mut gateway) = new_client(Some(GATEWAY_URL));
    transport.route("/channels/7", ok_json(&json!({"id": "7", "name": "general"})));
    let mut conn = connected(&client, &mut gateway).await;

    let channel = client.channel(Snowflake::new(7)).await.expect("Fetch failed");
    conn.deliver(GatewayMessage::dispatch("CHANNEL_DELETE", 2, json!({"id": "7"})))
        .await;

    eventually(|| {
        let channel = &channel;
        async move { channel.is_deleted() }
    })
    .await;
    assert!(!client.cache().contains(&EntityKey::channel(Snowflake::new(7))));

    // The next lookup goes back to REST
    let _fresh = client.channel(Snowflake::new(7)).await.expect("Fetch failed");
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_gateway_and_rest() {
    let (client, _transport, _connector, mut gateway) = new_client(Some(GATEWAY_URL));
    let conn = connected(&client, &mut gateway).await;

    client.shutdown().await;

    assert_eq!(conn.client_closes(), vec![1000]);
    assert_eq!(client.gateway().state(), ConnectionState::Disconnected);
    let err = client
        .channel(Snowflake::new(7))
        .await
        .expect_err("REST is closed");
    assert!(matches!(err, ClientError::Rest(RestError::Closed)));
}
