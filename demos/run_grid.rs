use clap::Parser;
use cryptogrid::config::{MeterConfig, ProviderParams};
use cryptogrid::grid::MeterGrid;
use cryptogrid::provider::SimCkksProvider;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runs a fleet of simulated meters against a running analytics server,
/// joining the encryption context the server wrote to disk.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 5000)]
    port: u16,
    /// Context file produced by `run_server`.
    #[arg(long, default_value = "context.bin")]
    context_file: PathBuf,
    #[arg(long, default_value_t = 10)]
    meters: usize,
    #[arg(long, default_value_t = 5000)]
    reading_interval_ms: u64,
    #[arg(long, default_value_t = 5)]
    batch_size: usize,
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let context = std::fs::read(&args.context_file)?;
    let provider = Arc::new(SimCkksProvider::from_context(
        ProviderParams::default(),
        &context,
    )?);

    let addr = format!("{}:{}", args.host, args.port)
        .to_socket_addrs()?
        .next()
        .ok_or("server address did not resolve")?;

    let mut grid = MeterGrid::new(
        args.meters,
        addr,
        MeterConfig {
            reading_interval: Duration::from_millis(args.reading_interval_ms),
            batch_size: args.batch_size,
            ..MeterConfig::default()
        },
        provider,
    );

    grid.start();
    std::thread::sleep(Duration::from_secs(args.duration_secs));
    grid.stop();

    println!("{}", serde_json::to_string_pretty(&grid.statistics())?);
    Ok(())
}
