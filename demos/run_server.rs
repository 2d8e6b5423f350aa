use clap::Parser;
use cryptogrid::aggregator::EncryptedAggregator;
use cryptogrid::config::{ProviderParams, ServerConfig};
use cryptogrid::persist::save_results;
use cryptogrid::provider::{HomomorphicProvider, SimCkksProvider};
use cryptogrid::server::AnalyticsServer;
use spdlog::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runs a standalone analytics server and writes the shared encryption
/// context to a file so `run_grid` meters can join it.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 5000)]
    port: u16,
    /// Where to write the serialized encryption context.
    #[arg(long, default_value = "context.bin")]
    context_file: PathBuf,
    /// How long to ingest before aggregating, in seconds.
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let provider = Arc::new(SimCkksProvider::new(ProviderParams::default()));
    std::fs::write(&args.context_file, provider.serialize_context())?;
    info!("[Server] encryption context written to {}", args.context_file.display());

    let mut server = AnalyticsServer::new(ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    });
    server.start()?;

    std::thread::sleep(Duration::from_secs(args.duration_secs));

    let aggregator = EncryptedAggregator::new(server.store_handle(), provider);
    for result in [aggregator.sum(), aggregator.mean()] {
        if let Err(e) = result {
            error!("[Server] aggregation failed: {}", e);
        }
    }

    server.stop();
    {
        let store = server.store_handle();
        let store = store.lock().unwrap();
        save_results(&store, &args.output_dir)?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&server.statistics())?
    );
    Ok(())
}
