//! Per-consumer observability counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Instant, SystemTime};

/// Counters and gauges exposed to management.
#[derive(Debug)]
pub struct ConsumerMetrics {
    /// Monotonic count of acknowledged messages.
    acks: AtomicU64,
    /// Wall-clock creation time.
    created_at: SystemTime,
    /// State of the rate gauge between samples.
    rate: Mutex<RateWindow>,
}

#[derive(Debug)]
struct RateWindow {
    last_sample: Instant,
    last_acks: u64,
}

impl ConsumerMetrics {
    /// Creates metrics stamped with the current time.
    pub fn new() -> Self {
        Self {
            acks: AtomicU64::new(0),
            created_at: SystemTime::now(),
            rate: Mutex::new(RateWindow {
                last_sample: Instant::now(),
                last_acks: 0,
            }),
        }
    }

    /// Records one acknowledged message.
    pub fn record_ack(&self) {
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    /// Total acknowledged messages.
    pub fn acks(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    /// Wall-clock creation time.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Messages acknowledged per second since the previous sample, rounded
    /// up to two decimals. The first sample measures since creation.
    pub fn message_rate(&self) -> f64 {
        let mut window = self.rate.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let acks = self.acks();
        let elapsed = now.duration_since(window.last_sample).as_secs_f64();
        let delta = acks.saturating_sub(window.last_acks) as f64;
        window.last_sample = now;
        window.last_acks = acks;
        if elapsed <= 0.0 {
            return 0.0;
        }
        round_up_2(delta / elapsed)
    }
}

impl Default for ConsumerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounds up to two decimal places.
fn round_up_2(value: f64) -> f64 {
    (value * 100.0).ceil() / 100.0
}
