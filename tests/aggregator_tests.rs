use cryptogrid::aggregator::{AggregationError, EncryptedAggregator};
use cryptogrid::config::ProviderParams;
use cryptogrid::data::{AggregateOp, EncryptedBatch, SCHEME_CKKS, unix_now};
use cryptogrid::generator::PowerProfile;
use cryptogrid::provider::{HomomorphicProvider, ProviderError, SimCkksProvider};
use cryptogrid::store::EncryptedStore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Arc, Mutex};

const TOLERANCE: f64 = 1e-3;

fn setup() -> (Arc<Mutex<EncryptedStore>>, Arc<SimCkksProvider>, EncryptedAggregator) {
    let store = Arc::new(Mutex::new(EncryptedStore::new()));
    let provider = Arc::new(SimCkksProvider::with_seed(ProviderParams::default(), 99));
    let aggregator = EncryptedAggregator::new(store.clone(), provider.clone());
    (store, provider, aggregator)
}

fn ingest_values(
    store: &Mutex<EncryptedStore>,
    provider: &dyn HomomorphicProvider,
    meter_id: u64,
    values: &[f64],
) {
    let (ciphertext, encryption_time_ms) = provider.encrypt(values).unwrap();
    store.lock().unwrap().ingest(
        EncryptedBatch {
            meter_id,
            timestamp: unix_now(),
            ciphertext,
            encryption_time_ms,
            scheme: SCHEME_CKKS.to_string(),
            count: values.len() as u32,
        },
        values.len() * 16,
    );
}

fn slot_sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

#[test]
fn empty_store_yields_typed_error_not_panic() {
    let (_, _, aggregator) = setup();
    assert!(matches!(aggregator.sum(), Err(AggregationError::EmptyStore)));
    assert!(matches!(aggregator.mean(), Err(AggregationError::EmptyStore)));
}

#[test]
fn sum_matches_plaintext_total() {
    let (store, provider, aggregator) = setup();
    ingest_values(&store, provider.as_ref(), 1, &[1.0, 2.0, 3.0]);
    ingest_values(&store, provider.as_ref(), 2, &[10.0, 20.0, 30.0]);

    let outcome = aggregator.sum().unwrap();
    assert_eq!(outcome.num_meters, 2);
    assert_eq!(outcome.num_batches, 2);
    assert_eq!(outcome.num_readings, 6);

    let decrypted = provider.decrypt(&outcome.ciphertext).unwrap();
    assert!((slot_sum(&decrypted) - 66.0).abs() < TOLERANCE);
}

#[test]
fn mean_divides_by_readings_not_batches() {
    let (store, provider, aggregator) = setup();
    // Batches of unequal sizes: 5 + 3 + 2 = 10 readings in 3 batches.
    ingest_values(&store, provider.as_ref(), 1, &[1.0, 2.0, 3.0, 4.0, 5.0]);
    ingest_values(&store, provider.as_ref(), 2, &[10.0, 20.0, 30.0]);
    ingest_values(&store, provider.as_ref(), 3, &[100.0, 200.0]);

    let outcome = aggregator.mean().unwrap();
    assert_eq!(outcome.num_readings, 10);

    // Total is 375; divided by 10 readings, never by 3 batches.
    let decrypted = provider.decrypt(&outcome.ciphertext).unwrap();
    assert!((slot_sum(&decrypted) - 37.5).abs() < TOLERANCE);
}

#[test]
fn fold_order_does_not_change_the_numeric_result() {
    let provider = Arc::new(SimCkksProvider::with_seed(ProviderParams::default(), 41));
    let batches: Vec<Vec<f64>> =
        vec![vec![1.5, 2.5], vec![30.0], vec![400.0, 500.0, 600.0], vec![7.0]];

    let mut totals = Vec::new();
    for order in [[0usize, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
        let store = Arc::new(Mutex::new(EncryptedStore::new()));
        for (slot, &idx) in order.iter().enumerate() {
            ingest_values(&store, provider.as_ref(), slot as u64, &batches[idx]);
        }
        let aggregator = EncryptedAggregator::new(store, provider.clone());
        let outcome = aggregator.sum().unwrap();
        totals.push(slot_sum(&provider.decrypt(&outcome.ciphertext).unwrap()));
    }
    for total in &totals {
        assert!((total - totals[0]).abs() < TOLERANCE, "{totals:?}");
    }
}

#[test]
fn fixed_seed_end_to_end_sum_matches_generated_readings() {
    // K batches of B synthesized readings each; the decrypted
    // homomorphic sum must approximate the plaintext sum of the same
    // K*B generated values.
    const K: usize = 4;
    const B: usize = 5;
    let profile = PowerProfile {
        base_load_watts: 2000.0,
        variance_watts: 500.0,
        periodic_amplitude_watts: 800.0,
    };
    let mut rng = StdRng::seed_from_u64(2024);
    let batches: Vec<Vec<f64>> = (0..K)
        .map(|k| {
            (0..B)
                .map(|i| profile.sample(&mut rng, (k * B + i) as f64))
                .collect()
        })
        .collect();
    let plaintext_total: f64 = batches.iter().flatten().sum();

    let (store, provider, aggregator) = setup();
    for (meter_id, values) in batches.iter().enumerate() {
        ingest_values(&store, provider.as_ref(), meter_id as u64, values);
    }

    let outcome = aggregator.sum().unwrap();
    assert_eq!(outcome.num_readings, (K * B) as u64);
    let decrypted = provider.decrypt(&outcome.ciphertext).unwrap();
    assert!((slot_sum(&decrypted) - plaintext_total).abs() < TOLERANCE);
}

#[test]
fn every_run_appends_an_analytics_result() {
    let (store, provider, aggregator) = setup();
    ingest_values(&store, provider.as_ref(), 1, &[1.0, 2.0]);

    aggregator.sum().unwrap();
    aggregator.mean().unwrap();

    let store = store.lock().unwrap();
    let results = store.analytics_results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].operation, AggregateOp::Sum);
    assert_eq!(results[1].operation, AggregateOp::Mean);
    assert_eq!(results[0].num_readings, 2);
    assert!(results[0].computation_time_ms >= 0.0);
}

#[test]
fn provider_failure_aborts_only_that_run() {
    let (store, provider, aggregator) = setup();
    let foreign = SimCkksProvider::with_seed(ProviderParams::default(), 1234);

    ingest_values(&store, provider.as_ref(), 1, &[1.0]);
    ingest_values(&store, &foreign, 2, &[2.0]);

    assert!(matches!(
        aggregator.sum(),
        Err(AggregationError::Provider(ProviderError::ContextMismatch))
    ));
    // The store is untouched and a later valid run still works.
    store.lock().unwrap().ingest(
        {
            let (ciphertext, encryption_time_ms) = provider.encrypt(&[3.0]).unwrap();
            EncryptedBatch {
                meter_id: 3,
                timestamp: unix_now(),
                ciphertext,
                encryption_time_ms,
                scheme: SCHEME_CKKS.to_string(),
                count: 1,
            }
        },
        32,
    );
    assert_eq!(store.lock().unwrap().snapshot().batches.len(), 3);
}
