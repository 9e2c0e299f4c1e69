//! Bucket registry
//!
//! Maps `(kind, resource)` to live buckets, creating them (and their worker)
//! on first use. Per-resource buckets remove themselves once idle.

use super::bucket::{cancel_all, Bucket, PendingRequest};
use super::catalog::{BucketCatalog, BucketKey, BucketKind};
use super::events::RateLimitEvent;
use super::worker::BucketWorker;
use crate::error::RestError;
use crate::http::HttpTransport;
use chat_core::Snowflake;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 64;

pub struct BucketRegistry {
    catalog: BucketCatalog,
    buckets: DashMap<BucketKey, Arc<Bucket>>,
    transport: Arc<dyn HttpTransport>,
    events: broadcast::Sender<RateLimitEvent>,
    /// Workers stop when this changes or is dropped
    shutdown: watch::Sender<()>,
    closed: AtomicBool,
    weak_self: Weak<BucketRegistry>,
}

impl BucketRegistry {
    pub fn new(transport: Arc<dyn HttpTransport>, catalog: BucketCatalog) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(());

        Arc::new_cyclic(|weak_self| Self {
            catalog,
            buckets: DashMap::new(),
            transport,
            events,
            shutdown,
            closed: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    pub fn catalog(&self) -> &BucketCatalog {
        &self.catalog
    }

    /// Must be called from within a Tokio runtime: new buckets spawn their worker.
    fn spawn_bucket(&self, key: BucketKey, parent: Option<Arc<Bucket>>) -> Arc<Bucket> {
        let spec = *self.catalog.spec(key.kind);
        let bucket = Arc::new(Bucket::new(key, spec, parent));

        let worker = BucketWorker {
            bucket: Arc::clone(&bucket),
            transport: Arc::clone(&self.transport),
            registry: self.weak_self.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.subscribe(),
            hold_until: None,
            backoff: None,
        };
        // Subscribed first: a close after this point still reaches the worker
        if self.is_closed() {
            tracing::debug!(bucket = %key, "Bucket created after shutdown, no worker");
            return bucket;
        }
        tokio::spawn(worker.run());

        tracing::debug!(bucket = %key, max = spec.max_count, window_ms = spec.window.as_millis() as u64, "Bucket created");
        bucket
    }

    /// Resolve the parent bucket of `kind`, creating the chain as needed.
    ///
    /// Runs before any map entry is locked, so creation never nests shard locks.
    fn parent_of(&self, kind: BucketKind) -> Option<Arc<Bucket>> {
        let parent = self.catalog.spec(kind).parent?;
        let key = BucketKey::global(parent);
        if let Some(existing) = self.buckets.get(&key) {
            return Some(Arc::clone(existing.value()));
        }

        let grandparent = self.parent_of(parent);
        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| self.spawn_bucket(key, grandparent));
        Some(Arc::clone(entry.value()))
    }

    /// Queue `pending` on its bucket and return that bucket.
    pub(crate) fn enqueue(
        &self,
        kind: BucketKind,
        resource: Option<Snowflake>,
        pending: Arc<PendingRequest>,
    ) -> Arc<Bucket> {
        let key = self.catalog.key(kind, resource);
        let parent = self.parent_of(kind);

        // Pushing under the entry lock orders us against `retire`
        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| self.spawn_bucket(key, parent));
        entry.value().push(Arc::clone(&pending));
        let bucket = Arc::clone(entry.value());
        drop(entry);

        // Workers are gone after `close`; nothing would ever serve it
        if self.is_closed() {
            pending.complete(Err(RestError::Closed));
        }
        bucket
    }

    /// Remove `bucket` from the map if it is idle. Called by its worker.
    pub(crate) fn retire(&self, bucket: &Arc<Bucket>) -> bool {
        let removed = self
            .buckets
            .remove_if(bucket.key(), |_, current| {
                Arc::ptr_eq(current, bucket) && current.try_retire(Instant::now())
            })
            .is_some();

        if removed {
            tracing::debug!(bucket = %bucket.key(), "Idle bucket destroyed");
        }
        removed
    }

    pub fn get(&self, key: &BucketKey) -> Option<Arc<Bucket>> {
        self.buckets.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RateLimitEvent> {
        self.events.subscribe()
    }

    /// Cancel every queued request; in-flight requests are unaffected
    pub fn clear(&self) -> usize {
        let buckets: Vec<Arc<Bucket>> = self
            .buckets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let cancelled: usize = buckets
            .iter()
            .map(|bucket| cancel_all(bucket.drain_queue(), || RestError::Cancelled))
            .sum();

        tracing::info!(cancelled, "Cleared request queues");
        cancelled
    }

    /// Stop every worker; queued requests complete with `Closed`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.send_replace(());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        self.shutdown.receiver_count()
    }
}

impl std::fmt::Debug for BucketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketRegistry")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
