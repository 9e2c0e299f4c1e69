//! REST dispatcher integration tests
//!
//! Window limits across the bucket hierarchy, ordering, server pauses,
//! deadlines and bucket teardown, all on paused time.

use chat_core::Snowflake;
use chat_rest::{
    BucketCatalog, BucketKind, BucketSpec, Dispatcher, HttpRequest, HttpResponse, RestError, Route,
    Scope,
};
use futures::future::join_all;
use integration_tests::*;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

const CHANNEL: Snowflake = Snowflake::new(100);
const OTHER_CHANNEL: Snowflake = Snowflake::new(200);

fn get(path: impl Into<String>) -> HttpRequest {
    HttpRequest::get(path)
}

/// No window of `window` length holds more than `max` calls
fn assert_window(times: &[Instant], max: usize, window: Duration) {
    for (i, start) in times.iter().enumerate() {
        if let Some(later) = times.get(i + max) {
            assert!(
                *later - *start >= window,
                "calls {i} and {} are only {:?} apart",
                i + max,
                *later - *start
            );
        }
    }
}

// ============================================================================
// Window limits
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_bucket_never_exceeds_its_window() {
    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let pending: Vec<_> = (0..12)
        .map(|i| dispatcher.submit(Route::send_message(CHANNEL), get(format!("/m/{i}")), None))
        .collect();
    for result in join_all(pending).await {
        result.expect("Request failed");
    }

    let times = transport.times();
    assert_eq!(times.len(), 12);
    assert_window(&times, 5, Duration::from_secs(5));
    // The first window is used in full right away
    assert_eq!(times[4], times[0]);
}

#[tokio::test(start_paused = true)]
async fn test_parent_limit_spans_children() {
    let catalog = BucketCatalog::default()
        .with(
            BucketKind::Global,
            BucketSpec::new(Scope::Global, 3, Duration::from_secs(1)),
        )
        .and_then(|c| {
            c.with(
                BucketKind::SendEditMessage,
                BucketSpec::new(Scope::PerResource, 10, Duration::from_secs(1))
                    .with_parent(BucketKind::Global),
            )
        })
        .expect("valid catalog");
    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone(), catalog);

    let pending: Vec<_> = (0..4)
        .flat_map(|i| {
            [
                dispatcher.submit(Route::send_message(CHANNEL), get(format!("/a/{i}")), None),
                dispatcher.submit(Route::send_message(OTHER_CHANNEL), get(format!("/b/{i}")), None),
            ]
        })
        .collect();
    for result in join_all(pending).await {
        result.expect("Request failed");
    }

    // Each channel is far below its own limit; the shared parent is not
    let times = transport.times();
    assert_eq!(times.len(), 8);
    assert_window(&times, 3, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_requests_keep_submission_order_per_bucket() {
    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone(), catalog(2, Duration::from_secs(1)));

    let pending: Vec<_> = (0..6)
        .map(|i| {
            let channel = if i % 2 == 0 { CHANNEL } else { OTHER_CHANNEL };
            dispatcher.submit(Route::send_message(channel), get(format!("/{channel}/{i}")), None)
        })
        .collect();
    for result in join_all(pending).await {
        result.expect("Request failed");
    }

    let paths = transport.paths();
    let for_channel = |channel: Snowflake| -> Vec<String> {
        paths
            .iter()
            .filter(|p| p.starts_with(&format!("/{channel}/")))
            .cloned()
            .collect()
    };
    assert_eq!(for_channel(CHANNEL), vec!["/100/0", "/100/2", "/100/4"]);
    assert_eq!(for_channel(OTHER_CHANNEL), vec!["/200/1", "/200/3", "/200/5"]);
}

// ============================================================================
// Server rate limits
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_429_pauses_bucket_then_retries() {
    let transport = MockTransport::new();
    transport.push(ok_json(&json!({"id": "0"})));
    transport.push(ok_json(&json!({"id": "1"})));
    transport.push(rate_limited(2.0, false));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));
    let mut limits = dispatcher.rate_limits();

    let pending: Vec<_> = (0..5)
        .map(|i| dispatcher.submit(Route::send_message(CHANNEL), get(format!("/{i}")), None))
        .collect();
    let results = join_all(pending).await;
    assert!(results.iter().all(Result::is_ok));

    // The limited request is retried before anything behind it
    assert_eq!(transport.paths(), vec!["/0", "/1", "/2", "/2", "/3", "/4"]);
    let times = transport.times();
    assert!(times[3] - times[2] >= Duration::from_secs(2));

    let event = limits.recv().await.expect("rate limit event");
    assert_eq!(event.bucket.kind, BucketKind::SendEditMessage);
    assert_eq!(event.retry_after, Duration::from_secs(2));
    assert!(!event.global);
}

#[tokio::test(start_paused = true)]
async fn test_global_429_holds_every_bucket() {
    let transport = MockTransport::new();
    transport.push(rate_limited(3.0, true));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let first = dispatcher.submit(Route::send_message(CHANNEL), get("/a"), None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = dispatcher.submit(Route::send_message(OTHER_CHANNEL), get("/b"), None);
    let third = dispatcher.submit(Route::global(), get("/c"), None);

    let start = transport.times()[0];
    for result in join_all([first, second, third]).await {
        result.expect("Request failed");
    }

    let times = transport.times();
    assert_eq!(times.len(), 4);
    for later in &times[1..] {
        assert!(*later - start >= Duration::from_secs(3));
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_headers_pause_until_reset() {
    let transport = MockTransport::new();
    transport.push(exhausted(3.0));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let pending: Vec<_> = (0..2)
        .map(|i| dispatcher.submit(Route::send_message(CHANNEL), get(format!("/{i}")), None))
        .collect();
    for result in join_all(pending).await {
        result.expect("Request failed");
    }

    let times = transport.times();
    assert!(times[1] - times[0] >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_bad_gateway_is_retried() {
    let transport = MockTransport::new();
    transport.push(bad_gateway());
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let response = dispatcher
        .send(Route::send_message(CHANNEL), get("/flaky"))
        .await
        .expect("Request failed");
    assert_eq!(response.status, 200);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_surface_without_retry() {
    let transport = MockTransport::new();
    transport.route("/channels/1", HttpResponse::new(404).with_body("Unknown Channel"));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let err = dispatcher
        .send(Route::global(), get("/channels/1"))
        .await
        .expect_err("404 must fail");
    assert!(matches!(err, RestError::Http { status: 404, .. }));
    assert_eq!(transport.call_count(), 1);
}

// ============================================================================
// Deadlines and lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deadline_expires_while_paused() {
    let transport = MockTransport::new();
    transport.push(rate_limited(5.0, false));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let blocked = dispatcher.submit(Route::send_message(CHANNEL), get("/a"), None);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let start = Instant::now();
    let result = dispatcher
        .submit(
            Route::send_message(CHANNEL),
            get("/b"),
            Some(start + Duration::from_millis(100)),
        )
        .await;
    let waited = start.elapsed();

    assert!(matches!(result, Err(RestError::Timeout)));
    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_millis(200));

    blocked.await.expect("Paused request failed");
    tokio::time::sleep(Duration::from_secs(1)).await;
    // The expired request never reached the transport
    assert_eq!(transport.paths(), vec!["/a", "/a"]);
}

#[tokio::test(start_paused = true)]
async fn test_default_deadline_applies_to_send() {
    let transport = MockTransport::new();
    transport.push(rate_limited(5.0, false));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)))
        .with_default_deadline(Some(Duration::from_millis(500)));

    let first = dispatcher.send(Route::send_message(CHANNEL), get("/a"));
    assert!(matches!(first.await, Err(RestError::Timeout)));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_does_not_cut_off_request_in_flight() {
    let transport = MockTransport::new();
    transport.set_latency(Duration::from_millis(300));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let start = Instant::now();
    let response = dispatcher
        .submit(
            Route::send_message(CHANNEL),
            get("/slow"),
            Some(start + Duration::from_millis(100)),
        )
        .await
        .expect("Request on the wire completes");

    assert_eq!(response.status, 200);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_passed_in_flight_is_not_retried() {
    let transport = MockTransport::new();
    transport.set_latency(Duration::from_millis(300));
    transport.push(rate_limited(1.0, false));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let result = dispatcher
        .submit(
            Route::send_message(CHANNEL),
            get("/limited"),
            Some(Instant::now() + Duration::from_millis(100)),
        )
        .await;

    assert!(matches!(result, Err(RestError::Timeout)));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_retry_after_is_capped() {
    let transport = MockTransport::new();
    transport.push(rate_limited(1.5e19, false));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let response = dispatcher
        .send(Route::send_message(CHANNEL), get("/a"))
        .await
        .expect("Request failed");
    assert_eq!(response.status, 200);

    let times = transport.times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(60 * 60));
    assert!(times[1] - times[0] < Duration::from_secs(60 * 60 + 1));

    // The worker is still serving its bucket
    dispatcher
        .send(Route::send_message(CHANNEL), get("/b"))
        .await
        .expect("Request failed");
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_idle_resource_bucket_is_destroyed() {
    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    dispatcher
        .send(Route::send_message(CHANNEL), get("/a"))
        .await
        .expect("Request failed");
    assert!(dispatcher.bucket(Route::send_message(CHANNEL)).is_some());
    let live = dispatcher.bucket_count();

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(dispatcher.bucket(Route::send_message(CHANNEL)).is_none());
    assert_eq!(dispatcher.bucket_count(), live - 1);
    // The global bucket lives as long as the dispatcher
    assert!(dispatcher.bucket(Route::global()).is_some());

    // A later request builds a fresh bucket
    dispatcher
        .send(Route::send_message(CHANNEL), get("/b"))
        .await
        .expect("Request failed");
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_pending_requests() {
    let transport = MockTransport::new();
    transport.push(rate_limited(10.0, false));
    let dispatcher = Dispatcher::new(transport.clone(), catalog(5, Duration::from_secs(5)));

    let pending: Vec<_> = (0..3)
        .map(|i| dispatcher.submit(Route::send_message(CHANNEL), get(format!("/{i}")), None))
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    dispatcher.shutdown();
    for result in join_all(pending).await {
        assert!(matches!(result, Err(RestError::Closed)));
    }
    assert_eq!(transport.call_count(), 1);
}
