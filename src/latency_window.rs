//! Bounded per-endpoint outcome window.
//!
//! Every completed call contributes one sample (latency + success flag).
//! The window is FIFO-bounded by sample count and optionally by age, so
//! health always reflects recent behavior. Percentiles are computed by
//! sorting a snapshot on read; recording stays cheap and lock-held time
//! stays short.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Sample {
    recorded_at: Instant,
    latency: Duration,
    success: bool,
}

#[derive(Debug)]
pub struct LatencyWindow {
    samples: Mutex<VecDeque<Sample>>,
    capacity: usize,
    max_age: Option<Duration>,
}

impl LatencyWindow {
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            max_age,
        }
    }

    /// Record one completed call.
    pub fn record(&self, latency: Duration, success: bool) {
        let now = Instant::now();
        let mut samples = self.samples.lock();
        Self::prune(&mut samples, self.max_age, now);
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(Sample {
            recorded_at: now,
            latency,
            success,
        });
    }

    /// Fraction of successful samples, `None` when the window is empty.
    pub fn success_rate(&self) -> Option<f64> {
        let mut samples = self.samples.lock();
        Self::prune(&mut samples, self.max_age, Instant::now());
        if samples.is_empty() {
            return None;
        }
        let successes = samples.iter().filter(|s| s.success).count();
        Some(successes as f64 / samples.len() as f64)
    }

    /// Latency at the given quantile (`0.0..=1.0`) over all samples,
    /// successes and failures alike. `None` when the window is empty.
    pub fn percentile(&self, quantile: f64) -> Option<Duration> {
        let mut latencies: Vec<Duration> = {
            let mut samples = self.samples.lock();
            Self::prune(&mut samples, self.max_age, Instant::now());
            samples.iter().map(|s| s.latency).collect()
        };
        if latencies.is_empty() {
            return None;
        }
        latencies.sort_unstable();
        let quantile = quantile.clamp(0.0, 1.0);
        let index = ((latencies.len() - 1) as f64 * quantile).round() as usize;
        Some(latencies[index])
    }

    pub fn p50(&self) -> Option<Duration> {
        self.percentile(0.50)
    }

    pub fn p95(&self) -> Option<Duration> {
        self.percentile(0.95)
    }

    pub fn p99(&self) -> Option<Duration> {
        self.percentile(0.99)
    }

    pub fn sample_count(&self) -> usize {
        let mut samples = self.samples.lock();
        Self::prune(&mut samples, self.max_age, Instant::now());
        samples.len()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    fn prune(samples: &mut VecDeque<Sample>, max_age: Option<Duration>, now: Instant) {
        if let Some(max_age) = max_age {
            while let Some(front) = samples.front() {
                if now.duration_since(front.recorded_at) > max_age {
                    samples.pop_front();
                } else {
                    break;
                }
            }
        }
    }
}
