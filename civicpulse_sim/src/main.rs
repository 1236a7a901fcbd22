//! CivicPulse Simulator CLI
//!
//! Seeds a reproducible city history and runs the replay and scenario demos
//! against it.

use clap::Parser;
use civicpulse_core::{EngineConfig, MemoryEventStore, ScenarioCatalog, SledEventStore};
use civicpulse_env::EventStore;
use civicpulse_sim::{DemoId, DemoResult, DemoRunner, HistoryConfig, SimError};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// CivicPulse replay and scenario simulator
#[derive(Parser, Debug)]
#[command(name = "civicpulse-sim")]
#[command(about = "Replay a seeded city history and run scenario demos", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Hours of city history to generate
    #[arg(long, default_value = "6")]
    hours: u32,

    /// Demos to run (timeline, snapshot, replay, playback, scenario, all), comma-separated
    #[arg(short, long, default_value = "all")]
    demo: String,

    /// Catalog scenario triggered by the scenario demo
    #[arg(short = 'S', long, default_value = "flood")]
    scenario: String,

    /// Replay and playback speed multiplier (clamped to 0.5..10)
    #[arg(long, default_value = "4.0")]
    speed: f64,

    /// Persist events in a sled database at this path instead of memory
    /// (an existing log with the same history window is reused, not re-seeded)
    #[arg(long)]
    db: Option<String>,

    /// JSON scenario catalog replacing the built-in one
    #[arg(long)]
    catalog: Option<String>,

    /// JSON engine configuration
    #[arg(long)]
    config: Option<String>,

    /// Export playback frames to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Run scenario timers in real time instead of on a paused clock
    #[arg(long)]
    realtime: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let runtime = if args.realtime {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
    };
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(0) => {}
        Ok(failed) => std::process::exit(failed.min(100) as i32),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

/// Runs the selected demos; returns the number that failed.
async fn run(args: Args) -> Result<usize, SimError> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json(&read(path)?)?,
        None => EngineConfig::default(),
    };
    let catalog = match &args.catalog {
        Some(path) => ScenarioCatalog::from_json(&read(path)?)?,
        None => ScenarioCatalog::builtin(),
    };
    let demos = parse_demos(&args.demo)?;

    // Determine seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let store: Arc<dyn EventStore> = match &args.db {
        Some(path) => {
            info!("Using sled event log at {}", path);
            Arc::new(SledEventStore::open(path)?)
        }
        None => Arc::new(MemoryEventStore::new()),
    };

    if !args.json {
        info!("CivicPulse Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let runner = DemoRunner::new(seed)
        .with_history(HistoryConfig::default().with_hours(args.hours.max(1)))
        .with_speed(args.speed)
        .with_scenario(&args.scenario)
        .with_config(config)
        .with_catalog(Arc::new(catalog));
    runner.seed_store(store.as_ref()).await?;

    let mut results: Vec<DemoResult> = Vec::new();
    for demo in demos {
        let result = runner.run(demo, store.clone()).await;

        if !args.json {
            if result.passed {
                info!("✓ {} (seed={}) PASSED in {:.1}s", demo.name(), seed, result.elapsed_secs);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    demo.name(),
                    seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        results.push(result);
    }

    if let Some(path) = &args.export {
        match results.iter().find_map(|r| r.export.as_ref()) {
            Some(export) => match export.write_to_file(path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path),
                Err(e) => error!("Failed to write export: {:?}", e),
            },
            None => error!("--export needs the playback demo to run"),
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "seed": seed,
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "demo": r.demo.name(),
                    "passed": r.passed,
                    "elapsedSecs": r.elapsed_secs,
                    "metrics": r.metrics,
                    "failureReason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("✅ All {} demos passed!", total);
        } else {
            error!("❌ {}/{} demos failed!", failed, total);
        }
    }

    Ok(failed)
}

fn read(path: &str) -> Result<String, SimError> {
    std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))
}

fn parse_demos(raw: &str) -> Result<Vec<DemoId>, SimError> {
    if raw.trim().eq_ignore_ascii_case("all") {
        return Ok(DemoId::all());
    }
    raw.split(',')
        .map(|name| name.trim().parse::<DemoId>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            SimError::Usage(format!(
                "{} (available: timeline, snapshot, replay, playback, scenario, all)",
                e
            ))
        })
}
