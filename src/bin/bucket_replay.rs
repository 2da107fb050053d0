//! Bucket replay tool
//!
//! Replays a newline-delimited JSON file through a single time-series
//! collection and reports how the measurements were bucketed.
//!
//! # Input format
//!
//! One JSON document per line. A line of the form
//! `{"$collMod": {"granularity": "minutes"}}` requests a granularity change
//! at that point in the stream instead of inserting a measurement. Blank
//! lines are skipped.
//!
//! # CLI Commands
//!
//! - `replay <file>` - Insert every document and print the resulting buckets
//! - `check-config` - Validate configuration file
//!
//! # Configuration
//!
//! `--config` points at a TOML file; without it the defaults apply.
//! `KUBA_BUCKETS_*` environment variables and `RUST_LOG` override either.

use clap::{Parser, Subcommand};
use kuba_buckets::{
    config::EngineConfig, metrics, Error, Granularity, TimeseriesDatabase, TimeseriesOptions,
};
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const COLLECTION: &str = "replay";

#[derive(Parser)]
#[command(name = "bucket-replay")]
#[command(version)]
#[command(about = "Replay measurements through time-series bucket assignment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Initial granularity (seconds, minutes, hours)
    #[arg(short, long, global = true)]
    granularity: Option<Granularity>,

    /// Field grouping measurements into separate buckets
    #[arg(short, long, global = true)]
    meta_field: Option<String>,

    /// Time field name (defaults to the configured one)
    #[arg(short, long, global = true)]
    time_field: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert every document of an NDJSON file
    Replay {
        /// Input file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate configuration file
    CheckConfig,
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

fn load_config(cli: &Cli) -> Result<EngineConfig, Error> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file_with_env(&path.to_string_lossy())?,
        None => EngineConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    println!("Configuration is valid!");
    println!();
    println!("Catalog:");
    println!("  Default granularity: {}", config.catalog.default_granularity);
    println!("  Default time field: {}", config.catalog.default_time_field);
    match config.catalog.max_measurements_per_bucket {
        Some(n) => println!("  Max measurements per bucket: {}", n),
        None => println!("  Max measurements per bucket: unlimited"),
    }
    println!();
    println!("Monitoring:");
    println!("  Metrics enabled: {}", config.monitoring.metrics_enabled);
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

/// Extract the requested granularity from a `$collMod` line
fn coll_mod_request(doc: &Value) -> Option<Result<Granularity, Error>> {
    let coll_mod = doc.get("$collMod")?;
    let requested = coll_mod
        .get("granularity")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Settings("$collMod requires a granularity string".to_string()))
        .and_then(|g| g.parse::<Granularity>().map_err(Error::from));
    Some(requested)
}

/// Insert every document of `file` and report the resulting buckets
async fn cmd_replay(
    cli: &Cli,
    config: EngineConfig,
    file: &Path,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = config.timeseries_options(cli.meta_field.clone());
    if let Some(g) = cli.granularity {
        options.granularity = g;
    }
    if let Some(time_field) = &cli.time_field {
        options.time_field = time_field.clone();
    }

    let metrics_enabled = config.monitoring.metrics_enabled;
    let db = TimeseriesDatabase::in_memory(config);
    create(&db, options)?;

    let reader = BufReader::new(std::fs::File::open(file)?);
    let mut inserted = 0u64;
    let mut rejected = 0u64;
    let mut tickets = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Value = serde_json::from_str(&line)
            .map_err(|e| format!("line {}: invalid JSON: {}", line_no + 1, e))?;

        if let Some(requested) = coll_mod_request(&doc) {
            match requested.and_then(|g| db.coll_mod_granularity(COLLECTION, g)) {
                Ok(transition) => info!(line = line_no + 1, ?transition, "Applied collMod"),
                Err(e) => warn!(line = line_no + 1, error = %e, "collMod rejected"),
            }
            continue;
        }

        match db.insert(COLLECTION, &doc) {
            Ok(outcome) => {
                inserted += 1;
                debug!(line = line_no + 1, assignment = %outcome.assignment, "Inserted");
                if let Some(ticket) = outcome.closed {
                    tickets.push(ticket);
                }
            }
            Err(e) => {
                rejected += 1;
                warn!(line = line_no + 1, error = %e, "Document rejected");
            }
        }
    }

    for ticket in tickets {
        ticket.wait().await?;
    }

    let collection = db.collection(COLLECTION)?;
    let open = collection.open_buckets();
    let bucket_count = collection.bucket_count();
    let granularity = collection.granularity();

    if format == "json" {
        let report = serde_json::json!({
            "collection": COLLECTION,
            "granularity": granularity,
            "inserted": inserted,
            "rejected": rejected,
            "bucket_count": bucket_count,
            "open_buckets": open,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Replay Summary");
        println!("==============");
        println!();
        println!("Granularity: {}", granularity);
        println!("Inserted: {}", inserted);
        println!("Rejected: {}", rejected);
        println!("Buckets: {}", bucket_count);
        println!();
        println!("Open buckets:");
        for bucket in &open {
            println!(
                "  {} key={} min={} max={} count={}",
                bucket.id, bucket.key, bucket.min_time, bucket.max_time, bucket.count
            );
        }
    }

    db.shutdown().await;

    if metrics_enabled {
        println!();
        println!("{}", metrics::gather_metrics()?);
    }

    Ok(())
}

fn create(db: &TimeseriesDatabase, options: TimeseriesOptions) -> Result<(), Error> {
    db.create_collection(COLLECTION, options).map(|_| ())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::CheckConfig = &cli.command {
        return cmd_check_config(&cli);
    }

    let config = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if config.monitoring.metrics_enabled {
        metrics::init();
    }

    info!("Starting bucket replay v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Replay { file, format } => cmd_replay(&cli, config, file, format).await,
        Commands::CheckConfig => Ok(()),
    }
}
