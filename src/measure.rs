use hdrhistogram::Histogram;
use serde::Serialize;

/// Statistics over recorded operation timings, in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingStats {
    pub count: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p99_ms: f64,
}

/// Millisecond-scale timing recorder backed by HdrHistogram.
///
/// Used for encryption, transmission and aggregation timings, which sit
/// in the microseconds-to-seconds range; durations are recorded with
/// microsecond resolution.
pub struct TimingRecorder {
    histogram: Histogram<u64>,
    total_ms: f64,
}

impl TimingRecorder {
    pub fn new() -> Self {
        // 1us to 600s, 3 significant figures.
        let histogram = Histogram::<u64>::new_with_bounds(1, 600_000_000, 3).unwrap();
        Self {
            histogram,
            total_ms: 0.0,
        }
    }

    pub fn record_ms(&mut self, millis: f64) {
        let micros = ((millis * 1000.0) as u64).clamp(1, 600_000_000);
        self.histogram.record(micros).unwrap();
        self.total_ms += millis;
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn total_ms(&self) -> f64 {
        self.total_ms
    }

    pub fn stats(&self) -> TimingStats {
        if self.histogram.is_empty() {
            return TimingStats::default();
        }
        TimingStats {
            count: self.histogram.len(),
            min_ms: self.histogram.min() as f64 / 1000.0,
            max_ms: self.histogram.max() as f64 / 1000.0,
            mean_ms: self.histogram.mean() / 1000.0,
            p99_ms: self.histogram.value_at_quantile(0.99) as f64 / 1000.0,
        }
    }

    pub fn format_stats(&self) -> String {
        let stats = self.stats();
        if stats.count == 0 {
            return "no samples".into();
        }
        format!(
            "n={}, min={:.2}ms, mean={:.2}ms, max={:.2}ms, p99={:.2}ms",
            stats.count, stats.min_ms, stats.mean_ms, stats.max_ms, stats.p99_ms
        )
    }
}

impl Default for TimingRecorder {
    fn default() -> Self {
        Self::new()
    }
}
