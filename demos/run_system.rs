use clap::Parser;
use cryptogrid::aggregator::EncryptedAggregator;
use cryptogrid::config::{MeterConfig, ProviderParams, ServerConfig};
use cryptogrid::data::{PerformanceMetric, unix_now};
use cryptogrid::grid::MeterGrid;
use cryptogrid::persist::save_results;
use cryptogrid::provider::SimCkksProvider;
use cryptogrid::server::AnalyticsServer;
use spdlog::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runs the complete system in one process: server, meter grid and a
/// final aggregation pass, with results persisted at shutdown.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value_t = 10)]
    meters: usize,
    #[arg(long, default_value_t = 5000)]
    reading_interval_ms: u64,
    #[arg(long, default_value_t = 5)]
    batch_size: usize,
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let provider = Arc::new(SimCkksProvider::new(ProviderParams::default()));

    let mut server = AnalyticsServer::new(ServerConfig {
        port: 0,
        ..ServerConfig::default()
    });
    server.start()?;
    let addr = server.local_addr().expect("server just started");

    let mut grid = MeterGrid::new(
        args.meters,
        addr,
        MeterConfig {
            reading_interval: Duration::from_millis(args.reading_interval_ms),
            batch_size: args.batch_size,
            ..MeterConfig::default()
        },
        provider.clone(),
    );
    grid.start();

    info!("[System] running for {}s", args.duration_secs);
    std::thread::sleep(Duration::from_secs(args.duration_secs));
    grid.stop();

    let aggregator = EncryptedAggregator::new(server.store_handle(), provider);
    let sum = aggregator.sum();
    let mean = aggregator.mean();

    let grid_stats = grid.statistics();
    let server_stats = server.statistics();
    let computation_ms = [&sum, &mean]
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|o| o.computation_time_ms)
        .sum::<f64>();
    let duration_sec = args.duration_secs as f64;
    {
        let store = server.store_handle();
        let mut store = store.lock().unwrap();
        store.push_metric(PerformanceMetric {
            timestamp: unix_now(),
            num_meters: grid_stats.num_meters,
            num_readings: server_stats.total_readings_received,
            total_encryption_time_ms: grid_stats.avg_encryption_time_ms
                * grid_stats.meters.iter().map(|m| m.batches_sent).sum::<u64>() as f64,
            avg_encryption_time_ms: grid_stats.avg_encryption_time_ms,
            total_communication_time_ms: grid_stats
                .meters
                .iter()
                .map(|m| m.transmission.mean_ms * m.transmission.count as f64)
                .sum(),
            total_computation_time_ms: computation_ms,
            avg_computation_time_ms: computation_ms / 2.0,
            throughput_readings_per_sec: if duration_sec > 0.0 {
                server_stats.total_readings_received as f64 / duration_sec
            } else {
                0.0
            },
        });
    }

    server.stop();
    {
        let store = server.store_handle();
        let store = store.lock().unwrap();
        save_results(&store, &args.output_dir)?;
    }

    println!("=== Grid Statistics ===");
    println!("{}", serde_json::to_string_pretty(&grid_stats)?);
    println!("=== Server Statistics ===");
    println!("{}", serde_json::to_string_pretty(&server.statistics())?);
    Ok(())
}
