//! Self-imposed request window
//!
//! Keeps the dispatch instants of the last `period`. A slot frees up exactly
//! `period` after the dispatch that used it, so no rolling interval of length
//! `period` ever holds more than `max` dispatches.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct Window {
    max: usize,
    period: Duration,
    log: VecDeque<Instant>,
}

impl Window {
    pub(crate) fn new(max: u32, period: Duration) -> Self {
        Self {
            max: max as usize,
            period,
            log: VecDeque::new(),
        }
    }

    fn is_unlimited(&self) -> bool {
        self.max == 0 || self.period.is_zero()
    }

    fn prune(&mut self, now: Instant) {
        while self
            .log
            .front()
            .is_some_and(|&at| at + self.period <= now)
        {
            self.log.pop_front();
        }
    }

    /// `None` if a dispatch is allowed at `now`, else the earliest instant it will be
    pub(crate) fn next_free(&mut self, now: Instant) -> Option<Instant> {
        if self.is_unlimited() {
            return None;
        }
        self.prune(now);
        if self.log.len() < self.max {
            None
        } else {
            self.log.front().map(|&at| at + self.period)
        }
    }

    pub(crate) fn record(&mut self, at: Instant) {
        if !self.is_unlimited() {
            self.log.push_back(at);
        }
    }

    /// Give back the slot recorded at `at`
    pub(crate) fn refund(&mut self, at: Instant) {
        if let Some(pos) = self.log.iter().rposition(|&t| t == at) {
            self.log.remove(pos);
        }
    }

    /// Instant after which the window holds no dispatch
    pub(crate) fn drained_at(&mut self, now: Instant) -> Option<Instant> {
        self.prune(now);
        self.log.back().map(|&at| at + self.period)
    }

    pub(crate) fn used(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.log.len()
    }
}
