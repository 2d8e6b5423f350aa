use crate::store::EncryptedStore;
use spdlog::info;
use std::fs::File;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Writes the shutdown output: analytics results, performance metrics
/// and a server-statistics snapshot, one pretty-printed JSON document
/// each. Write-only; nothing in the pipeline reads these back.
pub fn save_results(store: &EncryptedStore, output_dir: &Path) -> Result<(), PersistError> {
    std::fs::create_dir_all(output_dir)?;

    let results = File::create(output_dir.join("analytics_results.json"))?;
    serde_json::to_writer_pretty(results, store.analytics_results())?;

    let metrics = File::create(output_dir.join("performance_metrics.json"))?;
    serde_json::to_writer_pretty(metrics, store.performance_metrics())?;

    let stats = File::create(output_dir.join("server_stats.json"))?;
    serde_json::to_writer_pretty(stats, &store.statistics())?;

    info!("[Server] results saved to {}", output_dir.display());
    Ok(())
}
