use criterion::{Criterion, criterion_group, criterion_main};
use cryptogrid::aggregator::EncryptedAggregator;
use cryptogrid::config::ProviderParams;
use cryptogrid::data::{EncryptedBatch, SCHEME_CKKS};
use cryptogrid::provider::{HomomorphicProvider, SimCkksProvider};
use cryptogrid::store::EncryptedStore;
use std::hint::black_box;
use std::sync::{Arc, Mutex};

fn populated_store(
    provider: &SimCkksProvider,
    num_batches: usize,
    batch_size: usize,
) -> Arc<Mutex<EncryptedStore>> {
    let store = Arc::new(Mutex::new(EncryptedStore::new()));
    for i in 0..num_batches {
        let values: Vec<f64> = (0..batch_size).map(|j| (i * batch_size + j) as f64).collect();
        let (ciphertext, encryption_time_ms) = provider.encrypt(&values).unwrap();
        store.lock().unwrap().ingest(
            EncryptedBatch {
                meter_id: (i % 8) as u64,
                timestamp: i as f64,
                ciphertext,
                encryption_time_ms,
                scheme: SCHEME_CKKS.to_string(),
                count: batch_size as u32,
            },
            batch_size * 16,
        );
    }
    store
}

fn bench_homomorphic_add(c: &mut Criterion) {
    let provider = SimCkksProvider::with_seed(ProviderParams::default(), 1);
    let (a, _) = provider.encrypt(&vec![1.0; 8]).unwrap();
    let (b, _) = provider.encrypt(&vec![2.0; 8]).unwrap();

    c.bench_function("provider_add_8_slots", |bench| {
        bench.iter(|| provider.add(black_box(&a), black_box(&b)).unwrap())
    });
}

fn bench_aggregate_fold(c: &mut Criterion) {
    let provider = Arc::new(SimCkksProvider::with_seed(ProviderParams::default(), 2));

    for num_batches in [16usize, 128] {
        let store = populated_store(&provider, num_batches, 8);
        let aggregator = EncryptedAggregator::new(store, provider.clone());
        c.bench_function(&format!("encrypted_sum_{num_batches}_batches"), |bench| {
            bench.iter(|| black_box(aggregator.sum().unwrap()))
        });
    }

    let store = populated_store(&provider, 64, 8);
    let aggregator = EncryptedAggregator::new(store, provider.clone());
    c.bench_function("encrypted_mean_64_batches", |bench| {
        bench.iter(|| black_box(aggregator.mean().unwrap()))
    });
}

criterion_group!(benches, bench_homomorphic_add, bench_aggregate_fold);
criterion_main!(benches);
