use serde::{Deserialize, Serialize};
use std::time::Duration;

/// CKKS-style scheme parameters, carried as an opaque options bag and
/// handed to the provider at construction time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderParams {
    pub poly_modulus_degree: u32,
    pub coeff_modulus_bits: u32,
    pub scale_bits: u32,
}

impl Default for ProviderParams {
    fn default() -> Self {
        Self {
            poly_modulus_degree: 8192,
            coeff_modulus_bits: 40,
            scale_bits: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sizes the OS listen backlog only; concurrent handler threads are
    /// not bounded by it (documented scalability caveat).
    pub max_connections: u32,
    /// Chunk size for per-connection reads.
    pub buffer_size: usize,
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            max_connections: 20,
            buffer_size: 4096,
            read_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    pub reading_interval: Duration,
    /// Readings accumulated before a batch is encrypted and sent.
    pub batch_size: usize,
    /// Bound on connect, write and ack-wait during one transmission.
    pub send_timeout: Duration,
    /// Bound on joining the read/send threads during stop (best-effort).
    pub stop_timeout: Duration,
    pub base_load_watts: f64,
    pub variance_watts: f64,
    pub periodic_amplitude_watts: f64,
    /// Fixed seed for reading synthesis; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            reading_interval: Duration::from_secs(5),
            batch_size: 5,
            send_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            base_load_watts: 2000.0,
            variance_watts: 500.0,
            periodic_amplitude_watts: 800.0,
            rng_seed: None,
        }
    }
}
