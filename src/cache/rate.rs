//! Sliding-window write rate measurement.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Shortest span a rate is computed over, so a single early sample does not
/// report an absurd speed.
const MIN_SPAN: Duration = Duration::from_millis(10);

/// Tracks bytes written over a sliding time window.
#[derive(Debug)]
pub struct RateTracker {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
    bytes_in_window: u64,
    started: Option<Instant>,
    peak: u64,
}

impl RateTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(MIN_SPAN),
            samples: VecDeque::new(),
            bytes_in_window: 0,
            started: None,
            peak: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `bytes` written at `now`.
    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.started.get_or_insert(now);
        self.samples.push_back((now, bytes));
        self.bytes_in_window += bytes;
        let rate = self.rate_at(now);
        self.peak = self.peak.max(rate);
    }

    /// Current rate in bytes per second.
    pub fn rate_at(&mut self, now: Instant) -> u64 {
        self.prune(now);
        let Some(started) = self.started else {
            return 0;
        };
        let span = now
            .saturating_duration_since(started)
            .min(self.window)
            .max(MIN_SPAN);
        (self.bytes_in_window as f64 / span.as_secs_f64()) as u64
    }

    /// Highest rate observed so far.
    pub fn peak(&self) -> u64 {
        self.peak
    }

    /// Bytes recorded within the window ending at `now`.
    pub fn bytes_in_window(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.bytes_in_window
    }

    /// How long a writer must pause at `now` for the rate to fall to `limit`.
    pub fn delay_for(&mut self, limit: u64, now: Instant) -> Option<Duration> {
        if limit == 0 || self.rate_at(now) <= limit {
            return None;
        }
        let started = self.started?;
        let span = now.saturating_duration_since(started).min(self.window);
        let needed = Duration::from_secs_f64(self.bytes_in_window as f64 / limit as f64);
        needed.checked_sub(span).filter(|d| !d.is_zero())
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.bytes_in_window = 0;
        self.started = None;
        self.peak = 0;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.saturating_duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.bytes_in_window -= bytes;
        }
    }
}
