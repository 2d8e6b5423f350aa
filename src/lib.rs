pub mod aggregator;
pub mod config;
pub mod data;
pub mod generator;
pub mod grid;
pub mod measure;
pub mod meter;
pub mod persist;
pub mod provider;
pub mod server;
pub mod store;
pub mod wire;

pub use crate::aggregator::{AggregateOutcome, AggregationError, EncryptedAggregator};
pub use crate::config::{MeterConfig, ProviderParams, ServerConfig};
pub use crate::data::{AggregateOp, AnalyticsResult, EncryptedBatch, PerformanceMetric, Reading};
pub use crate::grid::{GridStatistics, MeterGrid};
pub use crate::meter::{MeterError, MeterState, MeterStatistics, SmartMeter};
pub use crate::provider::{Ciphertext, HomomorphicProvider, ProviderError, SimCkksProvider};
pub use crate::server::{AnalyticsServer, ServerError, ServerState};
pub use crate::store::{EncryptedStore, ServerStatistics, StoreSnapshot, StoredBatch};
