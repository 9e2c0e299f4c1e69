//! Request dispatcher
//!
//! Entry point for REST calls: resolves the bucket chain for a [`Route`],
//! queues the request and hands back a future of its result.

use crate::error::{RestError, RestResult};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
use crate::ratelimit::{
    Bucket, BucketCatalog, BucketKey, BucketKind, BucketRegistry, PendingRequest, RateLimitEvent,
};
use chat_common::ClientConfig;
use chat_core::Snowflake;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;

/// Rate-limit bucket a request is charged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub kind: BucketKind,
    pub resource: Option<Snowflake>,
}

impl Route {
    /// Charged to the global bucket only
    #[must_use]
    pub const fn global() -> Self {
        Self {
            kind: BucketKind::Global,
            resource: None,
        }
    }

    #[must_use]
    pub const fn new(kind: BucketKind, resource: Snowflake) -> Self {
        Self {
            kind,
            resource: Some(resource),
        }
    }

    #[must_use]
    pub const fn send_message(channel_id: Snowflake) -> Self {
        Self::new(BucketKind::SendEditMessage, channel_id)
    }

    #[must_use]
    pub const fn delete_message(channel_id: Snowflake) -> Self {
        Self::new(BucketKind::DeleteMessage, channel_id)
    }

    #[must_use]
    pub const fn reaction(channel_id: Snowflake) -> Self {
        Self::new(BucketKind::Reaction, channel_id)
    }

    #[must_use]
    pub const fn modify_member(guild_id: Snowflake) -> Self {
        Self::new(BucketKind::ModifyMember, guild_id)
    }
}

/// Rate-limited REST dispatcher
///
/// Cloning is cheap; clones share buckets and workers.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<BucketRegistry>,
    default_deadline: Option<Duration>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>, catalog: BucketCatalog) -> Self {
        Self {
            registry: BucketRegistry::new(transport, catalog),
            default_deadline: None,
        }
    }

    /// Dispatcher over `reqwest`, configured from the client configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(&config.rest, &config.auth)?;
        Ok(Self::new(
            Arc::new(transport),
            BucketCatalog::from(&config.rate_limit),
        )
        .with_default_deadline(config.rest.default_deadline()))
    }

    /// Deadline applied by [`send`](Self::send), relative to the call
    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Queue `request` on the bucket of `route`.
    ///
    /// The request is enqueued before this returns, so submission order is
    /// dispatch order within a bucket. If `deadline` passes while the request
    /// is still queued or waiting out a pause, the future resolves to
    /// [`RestError::Timeout`] and the request leaves the queue. A request
    /// already on the wire runs to completion.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        route: Route,
        request: HttpRequest,
        deadline: Option<Instant>,
    ) -> impl Future<Output = RestResult<HttpResponse>> + Send + 'static {
        let (pending, rx) = PendingRequest::new(request, deadline);
        let bucket = self
            .registry
            .enqueue(route.kind, route.resource, Arc::clone(&pending));

        tracing::trace!(
            bucket = %bucket.key(),
            request_id = pending.id(),
            request = %pending.request(),
            "Request queued"
        );

        await_completion(pending, rx, bucket)
    }

    /// Submit with the default deadline
    pub async fn send(&self, route: Route, request: HttpRequest) -> RestResult<HttpResponse> {
        let deadline = self.default_deadline.map(|d| Instant::now() + d);
        self.submit(route, request, deadline).await
    }

    /// Submit and decode a JSON response body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        route: Route,
        request: HttpRequest,
    ) -> RestResult<T> {
        let response = self.send(route, request).await?;
        Ok(response.json()?)
    }

    /// Stream of server rate-limit notifications
    pub fn rate_limits(&self) -> broadcast::Receiver<RateLimitEvent> {
        self.registry.subscribe()
    }

    /// Complete every queued request with [`RestError::Cancelled`]
    pub fn clear(&self) -> usize {
        self.registry.clear()
    }

    /// Stop all bucket workers; queued requests complete with [`RestError::Closed`]
    pub fn shutdown(&self) {
        self.registry.close();
    }

    pub fn catalog(&self) -> &BucketCatalog {
        self.registry.catalog()
    }

    /// Live bucket serving `route`, if any
    pub fn bucket(&self, route: Route) -> Option<Arc<Bucket>> {
        let key: BucketKey = self.catalog().key(route.kind, route.resource);
        self.registry.get(&key)
    }

    pub fn bucket_count(&self) -> usize {
        self.registry.len()
    }
}

async fn await_completion(
    pending: Arc<PendingRequest>,
    mut rx: oneshot::Receiver<RestResult<HttpResponse>>,
    bucket: Arc<Bucket>,
) -> RestResult<HttpResponse> {
    let Some(deadline) = pending.deadline() else {
        return rx.await.unwrap_or(Err(RestError::Closed));
    };

    tokio::select! {
        result = &mut rx => result.unwrap_or(Err(RestError::Closed)),
        () = tokio::time::sleep_until(deadline) => {
            if pending.expire() {
                bucket.withdraw(&pending);
                tracing::debug!(
                    bucket = %bucket.key(),
                    request_id = pending.id(),
                    "Request deadline expired"
                );
                Err(RestError::Timeout)
            } else {
                // In flight or already completed; the worker delivers
                rx.await.unwrap_or(Err(RestError::Closed))
            }
        }
    }
}
