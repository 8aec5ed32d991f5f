use std::time::{Duration, Instant};

/// Per-stage message counter that reports every `interval` messages.
#[derive(Debug)]
pub struct ThroughputCounter {
    interval: u64,
    total: u64,
    window_count: u64,
    window_start: Instant,
}

/// Throughput over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Messages seen since the stage started.
    pub total: u64,
    /// Messages in this window.
    pub messages: u64,
    pub elapsed: Duration,
}

impl ThroughputReport {
    pub fn per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.messages as f64 / secs
        } else {
            0.0
        }
    }
}

impl ThroughputCounter {
    /// An `interval` of zero disables reporting.
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            total: 0,
            window_count: 0,
            window_start: Instant::now(),
        }
    }

    /// Count one message; returns a report when the window fills.
    pub fn record(&mut self) -> Option<ThroughputReport> {
        self.total += 1;
        self.window_count += 1;
        if self.interval == 0 || self.window_count < self.interval {
            return None;
        }

        let now = Instant::now();
        let report = ThroughputReport {
            total: self.total,
            messages: self.window_count,
            elapsed: now.duration_since(self.window_start),
        };
        self.window_count = 0;
        self.window_start = now;
        Some(report)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_every_interval() {
        let mut counter = ThroughputCounter::new(3);
        assert!(counter.record().is_none());
        assert!(counter.record().is_none());
        let report = counter.record().unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.messages, 3);

        assert!(counter.record().is_none());
        assert!(counter.record().is_none());
        assert_eq!(counter.record().unwrap().total, 6);
    }

    #[test]
    fn test_zero_interval_never_reports() {
        let mut counter = ThroughputCounter::new(0);
        for _ in 0..10 {
            assert!(counter.record().is_none());
        }
        assert_eq!(counter.total(), 10);
    }

    #[test]
    fn test_per_second() {
        let report = ThroughputReport {
            total: 10,
            messages: 10,
            elapsed: Duration::from_secs(2),
        };
        assert!((report.per_second() - 5.0).abs() < f64::EPSILON);
        let instant = ThroughputReport {
            elapsed: Duration::ZERO,
            ..report
        };
        assert_eq!(instant.per_second(), 0.0);
    }
}
