//! Rate-limit bucket and queued requests
//!
//! A [`Bucket`] owns one FIFO queue and one window. Its state is only touched
//! under a short synchronous lock; waiting happens in the bucket worker.

use super::catalog::{BucketKey, BucketSpec};
use super::window::Window;
use crate::error::{RestError, RestResult};
use crate::http::{HttpRequest, HttpResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

const QUEUED: u8 = 0;
const IN_FLIGHT: u8 = 1;
const DONE: u8 = 2;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A request waiting in (or being executed by) a bucket
///
/// Completed exactly once: whichever of the worker, the caller's deadline or
/// a queue clear wins the transition to `DONE` delivers the result. A deadline
/// only wins while the request is queued; once on the wire the worker decides.
pub struct PendingRequest {
    id: u64,
    request: HttpRequest,
    deadline: Option<Instant>,
    state: AtomicU8,
    tx: Mutex<Option<oneshot::Sender<RestResult<HttpResponse>>>>,
}

impl PendingRequest {
    pub(crate) fn new(
        request: HttpRequest,
        deadline: Option<Instant>,
    ) -> (Arc<Self>, oneshot::Receiver<RestResult<HttpResponse>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            request,
            deadline,
            state: AtomicU8::new(QUEUED),
            tx: Mutex::new(Some(tx)),
        });
        (pending, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// The caller dropped its future
    pub(crate) fn is_abandoned(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, oneshot::Sender::is_closed)
    }

    /// Queued -> in flight
    pub(crate) fn begin(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// In flight -> queued, for a retry
    pub(crate) fn requeue(&self) -> bool {
        self.state
            .compare_exchange(IN_FLIGHT, QUEUED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queued -> done, for a deadline; fails while the request is in flight
    pub(crate) fn expire(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_past_deadline(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Claim completion; only the first caller gets `true`
    pub(crate) fn finish(&self) -> bool {
        self.state.swap(DONE, Ordering::AcqRel) != DONE
    }

    /// Claim completion and deliver `result`
    pub(crate) fn complete(&self, result: RestResult<HttpResponse>) -> bool {
        if !self.finish() {
            return false;
        }
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(result);
        }
        true
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("request", &self.request.to_string())
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Debug)]
struct BucketState {
    queue: VecDeque<Arc<PendingRequest>>,
    window: Window,
    pause_until: Option<Instant>,
    retired: bool,
}

/// One rate-limited FIFO queue
pub struct Bucket {
    key: BucketKey,
    spec: BucketSpec,
    parent: Option<Arc<Bucket>>,
    state: Mutex<BucketState>,
    /// Serializes admission through this bucket's window, in arrival order
    pub(crate) gate: tokio::sync::Mutex<()>,
    pub(crate) notify: Notify,
}

impl Bucket {
    pub(crate) fn new(key: BucketKey, spec: BucketSpec, parent: Option<Arc<Bucket>>) -> Self {
        Self {
            key,
            spec,
            parent,
            state: Mutex::new(BucketState {
                queue: VecDeque::new(),
                window: Window::new(spec.max_count, spec.window),
                pause_until: None,
                retired: false,
            }),
            gate: tokio::sync::Mutex::new(()),
            notify: Notify::new(),
        }
    }

    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    pub fn spec(&self) -> &BucketSpec {
        &self.spec
    }

    pub fn parent(&self) -> Option<&Arc<Bucket>> {
        self.parent.as_ref()
    }

    /// Parent chain, outermost first
    pub(crate) fn ancestors(&self) -> Vec<Arc<Bucket>> {
        let mut chain = Vec::new();
        let mut current = self.parent.clone();
        while let Some(bucket) = current {
            current = bucket.parent.clone();
            chain.push(bucket);
        }
        chain.reverse();
        chain
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn paused_until(&self) -> Option<Instant> {
        let state = self.state.lock();
        state.pause_until.filter(|&until| until > Instant::now())
    }

    pub(crate) fn push(&self, pending: Arc<PendingRequest>) {
        self.state.lock().queue.push_back(pending);
        self.notify.notify_one();
    }

    pub(crate) fn push_front(&self, pending: Arc<PendingRequest>) {
        self.state.lock().queue.push_front(pending);
    }

    pub(crate) fn front(&self) -> Option<Arc<PendingRequest>> {
        self.state.lock().queue.front().cloned()
    }

    /// Drop `pending` from the head if it is still there
    pub(crate) fn pop_front_if(&self, pending: &Arc<PendingRequest>) {
        let mut state = self.state.lock();
        if state
            .queue
            .front()
            .is_some_and(|head| Arc::ptr_eq(head, pending))
        {
            state.queue.pop_front();
        }
    }

    /// Remove a request that completed outside the worker (deadline)
    pub(crate) fn withdraw(&self, pending: &Arc<PendingRequest>) {
        self.state
            .lock()
            .queue
            .retain(|queued| !Arc::ptr_eq(queued, pending));
        self.notify.notify_one();
    }

    pub(crate) fn drain_queue(&self) -> Vec<Arc<PendingRequest>> {
        self.state.lock().queue.drain(..).collect()
    }

    /// Earliest instant this bucket alone would permit a dispatch, if not now
    pub(crate) fn ready_at(&self, now: Instant) -> Option<Instant> {
        let mut state = self.state.lock();
        match state.pause_until {
            Some(until) if until > now => Some(until),
            _ => state.window.next_free(now),
        }
    }

    pub(crate) fn record(&self, at: Instant) {
        self.state.lock().window.record(at);
    }

    pub(crate) fn refund(&self, at: Instant) {
        self.state.lock().window.refund(at);
    }

    /// Hold dispatch until `until`; an active pause is only ever extended
    pub(crate) fn pause(&self, until: Instant) -> bool {
        let mut state = self.state.lock();
        match state.pause_until {
            Some(current) if current >= until => false,
            _ => {
                state.pause_until = Some(until);
                true
            }
        }
    }

    /// Instant after which an empty bucket has nothing pending, if not already
    pub(crate) fn idle_at(&self, now: Instant) -> Option<Instant> {
        let mut state = self.state.lock();
        let pause = state.pause_until.filter(|&until| until > now);
        let reset = state.window.drained_at(now);
        match (pause, reset) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Mark an idle bucket as destroyed; fails if anything is still pending
    pub(crate) fn try_retire(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        let paused = state.pause_until.is_some_and(|until| until > now);
        if state.retired || !state.queue.is_empty() || paused || state.window.used(now) > 0 {
            return false;
        }
        state.retired = true;
        true
    }

    pub fn is_retired(&self) -> bool {
        self.state.lock().retired
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Bucket")
            .field("key", &self.key)
            .field("queued", &state.queue.len())
            .field("pause_until", &state.pause_until)
            .field("parent", &self.parent.as_ref().map(|p| p.key))
            .finish()
    }
}

/// Complete every request in `pending` with `error()`; returns how many were still open
pub(crate) fn cancel_all(pending: Vec<Arc<PendingRequest>>, error: fn() -> RestError) -> usize {
    pending
        .into_iter()
        .filter(|p| p.complete(Err(error())))
        .count()
}
