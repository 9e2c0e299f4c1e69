//! Heartbeat monitor
//!
//! Pure bookkeeping: the session owns the timer and the socket, this decides
//! what each tick means.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a scheduled tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat now
    Send,
    /// The previous heartbeat was never acknowledged; the connection is dead
    Missed,
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    next_beat: Instant,
    awaiting_ack: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatMonitor {
    /// Monitor whose first beat lands at a random point of the first interval
    pub fn new(interval: Duration, now: Instant) -> Self {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        Self::starting_at(interval, now + interval.mul_f64(jitter))
    }

    pub fn starting_at(interval: Duration, first_beat: Instant) -> Self {
        Self {
            interval,
            next_beat: first_beat,
            awaiting_ack: false,
            last_sent: None,
            latency: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_beat(&self) -> Instant {
        self.next_beat
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// The scheduled beat is due
    pub fn tick(&mut self, now: Instant) -> Beat {
        if self.awaiting_ack {
            return Beat::Missed;
        }
        self.sent(now);
        self.next_beat = now + self.interval;
        Beat::Send
    }

    /// Out-of-schedule heartbeat requested by the server
    pub fn sent(&mut self, now: Instant) {
        self.awaiting_ack = true;
        self.last_sent = Some(now);
    }

    /// Record an acknowledgement; returns the measured latency
    pub fn ack(&mut self, now: Instant) -> Option<Duration> {
        self.awaiting_ack = false;
        let latency = self.last_sent.map(|sent| now.saturating_duration_since(sent));
        if latency.is_some() {
            self.latency = latency;
        }
        latency
    }
}
