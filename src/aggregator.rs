use crate::data::{AggregateOp, AnalyticsResult, unix_now};
use crate::provider::{Ciphertext, HomomorphicProvider, ProviderError};
use crate::store::{EncryptedStore, StoreSnapshot};
use spdlog::info;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("no encrypted data to aggregate")]
    EmptyStore,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Result handle of one aggregation run. The ciphertext is opaque; this
/// layer never decrypts.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub operation: AggregateOp,
    pub ciphertext: Ciphertext,
    pub computation_time_ms: f64,
    pub num_meters: usize,
    pub num_batches: usize,
    pub num_readings: u64,
}

/// Folds stored ciphertexts with the provider's homomorphic algebra.
///
/// Each run takes a snapshot under the store lock, then computes outside
/// it so ingestion is never blocked by aggregation. Headroom for long
/// fold chains is the provider's concern; its exhaustion error aborts
/// only the triggering run and is propagated to the caller.
pub struct EncryptedAggregator {
    store: Arc<Mutex<EncryptedStore>>,
    provider: Arc<dyn HomomorphicProvider>,
}

impl EncryptedAggregator {
    pub fn new(store: Arc<Mutex<EncryptedStore>>, provider: Arc<dyn HomomorphicProvider>) -> Self {
        Self { store, provider }
    }

    /// Homomorphic sum of every stored ciphertext, folded in store order.
    pub fn sum(&self) -> Result<AggregateOutcome, AggregationError> {
        let snapshot = self.store.lock().unwrap().snapshot();
        let start = Instant::now();
        let ciphertext = self.fold_sum(&snapshot)?;
        let outcome = self.finish(AggregateOp::Sum, ciphertext, start, &snapshot);
        info!(
            "[Server] computed encrypted sum of {} readings from {} meters in {:.2}ms",
            outcome.num_readings, outcome.num_meters, outcome.computation_time_ms
        );
        Ok(outcome)
    }

    /// Homomorphic mean: the sum multiplied by the plaintext scalar
    /// `1 / total readings`. The divisor counts readings folded into the
    /// ciphertexts, not ciphertext objects — batches of unequal sizes
    /// divide by the sum of their counts.
    pub fn mean(&self) -> Result<AggregateOutcome, AggregationError> {
        let snapshot = self.store.lock().unwrap().snapshot();
        let start = Instant::now();
        let sum = self.fold_sum(&snapshot)?;
        let scale = 1.0 / snapshot.total_readings() as f64;
        let ciphertext = self.provider.multiply_plain(&sum, scale)?;
        let outcome = self.finish(AggregateOp::Mean, ciphertext, start, &snapshot);
        info!(
            "[Server] computed encrypted mean of {} readings in {:.2}ms",
            outcome.num_readings, outcome.computation_time_ms
        );
        Ok(outcome)
    }

    fn fold_sum(&self, snapshot: &StoreSnapshot) -> Result<Ciphertext, AggregationError> {
        let mut batches = snapshot.batches.iter();
        let first = batches.next().ok_or(AggregationError::EmptyStore)?;
        let mut acc = first.ciphertext.clone();
        for batch in batches {
            acc = self.provider.add(&acc, &batch.ciphertext)?;
        }
        Ok(acc)
    }

    fn finish(
        &self,
        operation: AggregateOp,
        ciphertext: Ciphertext,
        start: Instant,
        snapshot: &StoreSnapshot,
    ) -> AggregateOutcome {
        let outcome = AggregateOutcome {
            operation,
            ciphertext,
            computation_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            num_meters: snapshot.num_meters,
            num_batches: snapshot.batches.len(),
            num_readings: snapshot.total_readings(),
        };
        self.store.lock().unwrap().push_result(AnalyticsResult {
            timestamp: unix_now(),
            operation,
            encrypted_result: outcome.ciphertext.clone(),
            computation_time_ms: outcome.computation_time_ms,
            num_meters: outcome.num_meters,
            num_readings: outcome.num_readings,
        });
        outcome
    }
}
