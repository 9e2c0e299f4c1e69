//! Per-bucket drain task
//!
//! Each bucket gets one worker. It takes the queue head, waits until the
//! bucket and every ancestor permit a dispatch, sends it, and classifies the
//! response. The bucket lock is never held across an await.

use super::bucket::{cancel_all, Bucket, PendingRequest};
use super::catalog::Scope;
use super::events::RateLimitEvent;
use super::headers::RateLimitInfo;
use super::registry::BucketRegistry;
use crate::error::RestError;
use crate::http::HttpTransport;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// Used when a 429 carries no retry information
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const UNAVAILABLE_BACKOFF_START: Duration = Duration::from_secs(1);
const UNAVAILABLE_BACKOFF_MAX: Duration = Duration::from_secs(30);

enum Flow {
    Continue,
    Stop,
}

enum Admission {
    Granted(Admitted),
    /// Head completed elsewhere while we waited
    Skip,
    Shutdown,
}

/// Window slots taken by one dispatch across the chain
struct Admitted {
    at: Instant,
    /// Outermost first, this bucket last
    chain: Vec<Arc<Bucket>>,
}

impl Admitted {
    fn refund(&self) {
        for bucket in &self.chain {
            bucket.refund(self.at);
        }
    }

    fn root(&self) -> Option<&Arc<Bucket>> {
        self.chain.first()
    }
}

/// Next delay of the 502 backoff: 1s, doubling, capped at 30s
pub(crate) fn next_backoff(previous: Option<Duration>) -> Duration {
    previous
        .map_or(UNAVAILABLE_BACKOFF_START, |d| d.saturating_mul(2))
        .min(UNAVAILABLE_BACKOFF_MAX)
}

pub(crate) struct BucketWorker {
    pub(crate) bucket: Arc<Bucket>,
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) registry: Weak<BucketRegistry>,
    pub(crate) events: broadcast::Sender<RateLimitEvent>,
    pub(crate) shutdown: watch::Receiver<()>,
    /// Worker-local hold (502 backoff, non-global limits on a global bucket)
    pub(crate) hold_until: Option<Instant>,
    pub(crate) backoff: Option<Duration>,
}

impl BucketWorker {
    pub(crate) async fn run(mut self) {
        tracing::debug!(bucket = %self.bucket.key(), "Bucket worker started");

        loop {
            let Some(head) = self.bucket.front() else {
                match self.idle().await {
                    Flow::Continue => continue,
                    Flow::Stop => break,
                }
            };

            if head.is_done() || head.is_abandoned() {
                head.finish();
                self.bucket.pop_front_if(&head);
                continue;
            }

            match self.admit(&head).await {
                Admission::Granted(admitted) => self.execute(head, admitted).await,
                Admission::Skip => self.bucket.pop_front_if(&head),
                Admission::Shutdown => break,
            }
        }

        let closed = cancel_all(self.bucket.drain_queue(), || RestError::Closed);
        tracing::debug!(bucket = %self.bucket.key(), closed, "Bucket worker stopped");
    }

    /// Sleep until `at`; `false` if the dispatcher shut down first
    async fn sleep_until(&mut self, at: Instant) -> bool {
        tokio::select! {
            () = tokio::time::sleep_until(at) => true,
            _ = self.shutdown.changed() => false,
        }
    }

    /// Empty queue: wait for work, or tear the bucket down once nothing is pending
    async fn idle(&mut self) -> Flow {
        let notified = self.bucket.notify.notified();

        if self.bucket.spec().scope == Scope::Global {
            return tokio::select! {
                () = notified => Flow::Continue,
                _ = self.shutdown.changed() => Flow::Stop,
            };
        }

        match self.bucket.idle_at(Instant::now()) {
            Some(at) => tokio::select! {
                () = notified => Flow::Continue,
                () = tokio::time::sleep_until(at) => Flow::Continue,
                _ = self.shutdown.changed() => Flow::Stop,
            },
            None => {
                let Some(registry) = self.registry.upgrade() else {
                    return Flow::Stop;
                };
                if registry.retire(&self.bucket) {
                    Flow::Stop
                } else {
                    // A request arrived (or the bucket is busy again)
                    Flow::Continue
                }
            }
        }
    }

    async fn admit(&mut self, head: &Arc<PendingRequest>) -> Admission {
        loop {
            // Own constraints first, without holding any ancestor gate
            let now = Instant::now();
            let own = [self.hold_until.filter(|&t| t > now), self.bucket.ready_at(now)]
                .into_iter()
                .flatten()
                .max();
            if let Some(at) = own {
                if !self.sleep_until(at).await {
                    return Admission::Shutdown;
                }
                if head.is_done() {
                    return Admission::Skip;
                }
                continue;
            }

            let mut chain = self.bucket.ancestors();
            chain.push(Arc::clone(&self.bucket));

            let mut guards = Vec::with_capacity(chain.len());
            for bucket in &chain {
                guards.push(bucket.gate.lock().await);
                while let Some(at) = bucket.ready_at(Instant::now()) {
                    if !self.sleep_until(at).await {
                        return Admission::Shutdown;
                    }
                }
            }

            // A global pause may have landed while we waited further down
            let now = Instant::now();
            if chain.iter().any(|b| b.ready_at(now).is_some()) {
                continue;
            }
            if !head.begin() {
                return Admission::Skip;
            }
            for bucket in &chain {
                bucket.record(now);
            }
            drop(guards);

            return Admission::Granted(Admitted { at: now, chain });
        }
    }

    /// Put a refused request back at the head, unless its deadline already passed
    fn retry_later(&self, head: Arc<PendingRequest>) {
        if head.is_past_deadline(Instant::now()) {
            tracing::debug!(bucket = %self.bucket.key(), request_id = head.id(), "Request deadline expired");
            head.complete(Err(RestError::Timeout));
        } else if head.requeue() {
            self.bucket.push_front(head);
        }
    }

    async fn execute(&mut self, head: Arc<PendingRequest>, admitted: Admitted) {
        self.bucket.pop_front_if(&head);
        let request = head.request();

        tracing::trace!(
            bucket = %self.bucket.key(),
            request_id = head.id(),
            %request,
            "Dispatching request"
        );

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(bucket = %self.bucket.key(), %request, error = %err, "Transport error");
                self.backoff = None;
                head.complete(Err(RestError::Transport(err)));
                return;
            }
        };

        match response.status {
            429 => {
                admitted.refund();
                let info = RateLimitInfo::from_response(&response);
                let retry_after = info
                    .retry_after
                    .or(info.reset_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                let until = Instant::now() + retry_after;

                let target = if info.global {
                    admitted.root().map_or_else(|| Arc::clone(&self.bucket), Arc::clone)
                } else {
                    Arc::clone(&self.bucket)
                };
                if info.global || target.spec().scope == Scope::PerResource {
                    target.pause(until);
                } else {
                    // Route-level limit on a shared bucket: hold this queue only
                    self.hold_until = Some(self.hold_until.map_or(until, |t| t.max(until)));
                }

                tracing::warn!(
                    bucket = %target.key(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    global = info.global,
                    %request,
                    "Rate limited by server"
                );
                let _ = self.events.send(RateLimitEvent {
                    bucket: *target.key(),
                    retry_after,
                    global: info.global,
                    request: request.to_string(),
                });

                self.retry_later(head);
            }
            502 => {
                admitted.refund();
                let delay = next_backoff(self.backoff);
                self.backoff = Some(delay);
                self.hold_until = Some(Instant::now() + delay);

                tracing::debug!(
                    bucket = %self.bucket.key(),
                    delay_ms = delay.as_millis() as u64,
                    %request,
                    "Bad gateway, backing off"
                );

                self.retry_later(head);
            }
            status => {
                self.backoff = None;

                if self.bucket.spec().scope == Scope::PerResource {
                    let info = RateLimitInfo::from_response(&response);
                    if let Some(reset) = info.exhausted_for() {
                        self.bucket.pause(Instant::now() + reset);
                        tracing::debug!(
                            bucket = %self.bucket.key(),
                            reset_ms = reset.as_millis() as u64,
                            "Server window exhausted, pausing bucket"
                        );
                    }
                }

                if response.is_success() {
                    head.complete(Ok(response));
                } else {
                    head.complete(Err(RestError::Http {
                        status,
                        body: response.body,
                    }));
                }
            }
        }
    }
}
