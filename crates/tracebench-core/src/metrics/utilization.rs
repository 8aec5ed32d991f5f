//! Stage utilization tracking.
//!
//! A stage alternates between waiting on its inbound mailbox and processing a
//! message. The timer accumulates idle time and periodically publishes
//! `1 - idle / elapsed`, smoothed with an EWMA, as
//! `tracebench_stage_utilization{stage}`.

use std::time::{Duration, Instant};

use metrics::gauge;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);
const SMOOTHING: f64 = 0.9;

/// Exponentially weighted moving average.
#[derive(Debug)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Fold in a sample and return the new average.
    pub fn observe(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => sample.mul_add(self.alpha, prev * (1.0 - self.alpha)),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Busy/idle timer for one stage worker. Starts idle.
pub struct UtilizationTimer {
    window_start: Instant,
    idle_since: Option<Instant>,
    idle_total: Duration,
    ewma: Ewma,
    gauge: metrics::Gauge,
}

impl UtilizationTimer {
    pub fn new(stage: &str) -> Self {
        let now = Instant::now();
        Self {
            window_start: now,
            idle_since: Some(now),
            idle_total: Duration::ZERO,
            ewma: Ewma::new(SMOOTHING),
            gauge: gauge!("tracebench_stage_utilization", "stage" => stage.to_owned()),
        }
    }

    /// The worker is waiting for a message.
    pub fn idle(&mut self) {
        if self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }

    /// The worker picked up a message.
    pub fn busy(&mut self) {
        if let Some(since) = self.idle_since.take() {
            self.idle_total += since.elapsed();
        }
    }

    /// Publish the gauge if the current window is old enough.
    pub fn maybe_report(&mut self) -> Option<f64> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.window_start);
        if elapsed < REPORT_INTERVAL {
            return None;
        }

        let mut idle = self.idle_total;
        if let Some(since) = self.idle_since {
            idle += now.duration_since(since);
            self.idle_since = Some(now);
        }

        let busy_ratio = (1.0 - idle.as_secs_f64() / elapsed.as_secs_f64()).clamp(0.0, 1.0);
        let smoothed = self.ewma.observe(busy_ratio);
        self.gauge.set((smoothed * 10_000.0).round() / 10_000.0);

        self.window_start = now;
        self.idle_total = Duration::ZERO;
        Some(smoothed)
    }
}
