use crate::data::{AnalyticsResult, EncryptedBatch, PerformanceMetric};
use crate::provider::Ciphertext;
use fxhash::{FxHashMap, FxHashSet};
use serde::Serialize;

/// One stored batch: ciphertext handle, batch-send timestamp, and the
/// number of readings folded into the ciphertext.
#[derive(Debug, Clone)]
pub struct StoredBatch {
    pub ciphertext: Ciphertext,
    pub timestamp: f64,
    pub count: u32,
}

/// Point-in-time view of every stored ciphertext, flattened in per-meter
/// insertion order. Cloned out under the store lock so aggregation runs
/// outside it. Not a consistent cut across meters: batches still in
/// flight at snapshot time are simply absent.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub batches: Vec<StoredBatch>,
    pub num_meters: usize,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total readings across all snapshotted batches. This is the mean
    /// divisor: readings, never the number of ciphertext objects.
    pub fn total_readings(&self) -> u64 {
        self.batches.iter().map(|b| u64::from(b.count)).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatistics {
    pub active_meters: usize,
    pub total_readings_received: u64,
    pub total_bytes_received: u64,
    pub analytics_results_computed: usize,
    pub performance_metrics_recorded: usize,
}

/// Server-owned storage of received ciphertexts.
///
/// Per-meter sequences preserve insertion order; there is no global
/// order across meters. Mutated only while holding the single coarse
/// lock the server wraps it in, and never pruned for the lifetime of
/// the process.
#[derive(Default)]
pub struct EncryptedStore {
    batches: FxHashMap<u64, Vec<StoredBatch>>,
    active_meters: FxHashSet<u64>,
    total_readings_received: u64,
    total_bytes_received: u64,
    analytics_results: Vec<AnalyticsResult>,
    performance_metrics: Vec<PerformanceMetric>,
}

impl EncryptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one accepted batch. O(1) map insert plus counter bumps;
    /// the lock around the store is held only for this.
    pub fn ingest(&mut self, batch: EncryptedBatch, frame_bytes: usize) {
        self.total_readings_received += u64::from(batch.count);
        self.total_bytes_received += frame_bytes as u64;
        self.active_meters.insert(batch.meter_id);
        self.batches
            .entry(batch.meter_id)
            .or_default()
            .push(StoredBatch {
                ciphertext: batch.ciphertext,
                timestamp: batch.timestamp,
                count: batch.count,
            });
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        // Flatten per meter; map iteration order across meters is
        // arbitrary, which the aggregation contract allows.
        let mut batches = Vec::new();
        for sequence in self.batches.values() {
            batches.extend(sequence.iter().cloned());
        }
        StoreSnapshot {
            batches,
            num_meters: self.active_meters.len(),
        }
    }

    pub fn meter_sequence(&self, meter_id: u64) -> Option<&[StoredBatch]> {
        self.batches.get(&meter_id).map(Vec::as_slice)
    }

    pub fn active_meters(&self) -> usize {
        self.active_meters.len()
    }

    pub fn total_readings_received(&self) -> u64 {
        self.total_readings_received
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.total_bytes_received
    }

    pub fn push_result(&mut self, result: AnalyticsResult) {
        self.analytics_results.push(result);
    }

    pub fn push_metric(&mut self, metric: PerformanceMetric) {
        self.performance_metrics.push(metric);
    }

    pub fn analytics_results(&self) -> &[AnalyticsResult] {
        &self.analytics_results
    }

    pub fn performance_metrics(&self) -> &[PerformanceMetric] {
        &self.performance_metrics
    }

    pub fn statistics(&self) -> ServerStatistics {
        ServerStatistics {
            active_meters: self.active_meters.len(),
            total_readings_received: self.total_readings_received,
            total_bytes_received: self.total_bytes_received,
            analytics_results_computed: self.analytics_results.len(),
            performance_metrics_recorded: self.performance_metrics.len(),
        }
    }
}
