use crate::provider::Ciphertext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Scheme tag carried on every wire frame.
pub const SCHEME_CKKS: &str = "CKKS";

/// Unix seconds as a float, the timestamp representation used on the
/// wire and in persisted output.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One plaintext meter reading. Lives only inside the producing meter;
/// it never crosses a process boundary unencrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub meter_id: u64,
    pub timestamp: f64,
    pub power_watts: f64,
    pub sequence_id: u64,
}

/// A batch of readings encrypted into one ciphertext. This is also the
/// wire message: one newline-terminated JSON object per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBatch {
    pub meter_id: u64,
    pub timestamp: f64,
    pub ciphertext: Ciphertext,
    pub encryption_time_ms: f64,
    pub scheme: String,
    /// Number of readings folded into the ciphertext, always ≥ 1.
    /// Invariant: equals the number of readings drained for this batch.
    #[serde(rename = "encrypted_count")]
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Mean,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateOp::Sum => write!(f, "sum"),
            AggregateOp::Mean => write!(f, "mean"),
        }
    }
}

/// One recorded aggregation outcome. Append-only log owned by the store;
/// the ciphertext result is never decrypted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsResult {
    pub timestamp: f64,
    pub operation: AggregateOp,
    pub encrypted_result: Ciphertext,
    pub computation_time_ms: f64,
    pub num_meters: usize,
    pub num_readings: u64,
}

/// Derived timing/throughput summary. Pure observability sink: appended,
/// persisted at shutdown, consumed by nothing in the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: f64,
    pub num_meters: usize,
    pub num_readings: u64,
    pub total_encryption_time_ms: f64,
    pub avg_encryption_time_ms: f64,
    pub total_communication_time_ms: f64,
    pub total_computation_time_ms: f64,
    pub avg_computation_time_ms: f64,
    pub throughput_readings_per_sec: f64,
}
