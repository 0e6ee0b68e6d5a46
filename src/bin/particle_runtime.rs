//! Particle Runtime - record, replay or simulate the market-state pipeline
//!
//! Usage:
//!   cargo run --release --bin particle_runtime -- --mode synthetic --steps 5000
//!   cargo run --release --bin particle_runtime -- --mode record --venue binance --symbols BTC,ETH
//!   cargo run --release --bin particle_runtime -- --mode replayfile --in data/raw_events.jsonl
//!
//! Environment variables:
//!   PARTICLE_CONFIG_PATH - TOML configuration (default: config/default.toml)
//!   RUST_LOG - log filter (default: info)

use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use log::{error, info};
use particleflow::pipeline::{
    config::PipelineConfig,
    ingestion::run_record,
    jsonl_writer::JsonlWriter,
    normalizer::canonical_symbol,
    runner::{run_replay, run_synthetic},
    snapshot::Snapshot,
    types::NormalizedEvent,
};
use particleflow::streamer_core::{binance, okx, Producer};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Live ingestion with raw and derived logs
    Record,
    /// Deterministic replay of a raw log
    Replayfile,
    /// Internally generated stream, no network
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VenueArg {
    Binance,
    Okx,
}

#[derive(Parser, Debug)]
#[command(name = "particle_runtime")]
#[command(about = "Event-sourced market-state pipeline: features, regimes, field and trajectory cone")]
struct Args {
    #[arg(long, value_enum, env = "PARTICLE_MODE", default_value = "synthetic")]
    mode: Mode,

    /// Venue for record mode
    #[arg(long, value_enum, default_value = "binance")]
    venue: VenueArg,

    /// Comma-separated symbols (BTC, ETH, BTCUSDT, BTC-USDT all accepted)
    #[arg(long, env = "PARTICLE_SYMBOLS", default_value = "BTC", value_delimiter = ',')]
    symbols: Vec<String>,

    /// Raw event log written by record and synthetic modes
    #[arg(long, default_value = "data/raw_events.jsonl")]
    events: PathBuf,

    /// Raw event log read by replayfile mode
    #[arg(long = "in")]
    input: Option<PathBuf>,

    /// Derived snapshot log
    #[arg(long, default_value = "data/snapshots.jsonl")]
    snapshots: PathBuf,

    /// Stop after this many events (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    max_events: u64,

    /// Synthetic stream length in trade prints
    #[arg(long, default_value_t = 5_000)]
    steps: u64,

    /// Overrides the configured run seed
    #[arg(long)]
    seed: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let max_events = (args.max_events > 0).then_some(args.max_events);

    info!("🚀 Particle Runtime");
    info!("   ├─ Mode: {:?}", args.mode);
    info!("   ├─ Seed: {}", config.seed);
    info!("   └─ Snapshots: {}", args.snapshots.display());

    let snapshot_sink: JsonlWriter<Snapshot> = JsonlWriter::new(&args.snapshots)?;

    let result = match args.mode {
        Mode::Replayfile => {
            let Some(input) = args.input.as_ref() else {
                return Err("--in <raw log> is required for replayfile mode".into());
            };
            run_replay(config, input, Box::new(snapshot_sink), max_events)
        }
        Mode::Synthetic => {
            let raw_sink: JsonlWriter<NormalizedEvent> = JsonlWriter::new(&args.events)?;
            info!("📝 Raw events: {}", args.events.display());
            run_synthetic(config, args.steps, Box::new(raw_sink), Box::new(snapshot_sink), max_events)
        }
        Mode::Record => {
            let symbols = args
                .symbols
                .iter()
                .map(|s| canonical_symbol(s))
                .collect::<Result<Vec<_>, _>>()?;
            let producers: Vec<Arc<dyn Producer>> = match args.venue {
                VenueArg::Binance => binance::producers(&symbols, &config.binance, config.book_depth)?,
                VenueArg::Okx => okx::producers(&symbols),
            };
            info!("📡 Recording {:?} from {:?} ({} producers)", symbols, args.venue, producers.len());
            info!("📝 Raw events: {}", args.events.display());

            let raw_sink: JsonlWriter<NormalizedEvent> = JsonlWriter::new(&args.events)?;
            let stop = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("❌ Cannot listen for ctrl-c: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            run_record(config, producers, Box::new(raw_sink), Box::new(snapshot_sink), max_events, stop).await
        }
    };

    match result {
        Ok(stats) => {
            info!("✅ Particle Runtime stopped ({} events, {} snapshots)", stats.events, stats.snapshots);
            Ok(())
        }
        Err(e) => {
            error!("❌ Run failed: {}", e);
            Err(e.into())
        }
    }
}
