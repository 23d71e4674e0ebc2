//! beacon-proxy: score proxied host pairs for C2 beaconing.
//!
//! Reads pair records (one JSON object per line), runs them through a single
//! analysis session and prints the resulting upsert instructions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use beacon_proxy::config::Config;
use beacon_proxy::export::{export_report, OutputFormat, RunReport};
use beacon_proxy::metrics::Metrics;
use beacon_proxy::source::{derive_window, read_pairs};
use beacon_proxy::{AnalysisSession, SessionSettings, TimeWindow};

/// beacon-proxy: beaconing analysis of proxied connections.
#[derive(Parser, Debug)]
#[command(name = "beacon-proxy")]
#[command(version = "0.1.0")]
#[command(about = "Score proxied host pairs for periodic (C2-like) connection timing")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a JSON Lines file of pair records.
    Analyze {
        /// Path to the pair records.
        #[arg(short, long)]
        input: PathBuf,

        /// Start of the observation window (default: earliest timestamp).
        #[arg(long, requires = "ts_max")]
        ts_min: Option<i64>,

        /// End of the observation window (default: latest timestamp).
        #[arg(long, requires = "ts_min")]
        ts_max: Option<i64>,

        /// Chunk id for rolling analysis.
        #[arg(long, default_value = "0")]
        chunk: i32,

        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format: text, json, jsonl (overrides the config file).
        #[arg(short, long)]
        output: Option<OutputFormat>,

        /// Print session metrics in Prometheus format after the report.
        #[arg(long)]
        metrics: bool,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the default configuration file.
    GenerateConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            ts_min,
            ts_max,
            chunk,
            config,
            output,
            metrics,
            verbose,
        } => {
            let config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            config.validate().context("Invalid configuration")?;

            let log_level = if verbose || config.output.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set tracing subscriber")?;

            let window = match (ts_min, ts_max) {
                (Some(min), Some(max)) => {
                    anyhow::ensure!(max >= min, "--ts-max must not be before --ts-min");
                    Some(TimeWindow::new(min, max))
                }
                _ => None,
            };

            let format = output.unwrap_or(config.output.format);
            run_analysis(&input, window, chunk, &config, format, metrics)
        }

        Commands::GenerateConfig => {
            print!("{}", Config::generate_default());
            Ok(())
        }
    }
}

fn run_analysis(
    input: &Path,
    window: Option<TimeWindow>,
    chunk: i32,
    config: &Config,
    format: OutputFormat,
    print_metrics: bool,
) -> Result<()> {
    let (pairs, source) = read_pairs(input)
        .with_context(|| format!("Failed to load pairs from {}", input.display()))?;

    let Some(window) = window.or_else(|| derive_window(&pairs)) else {
        warn!("No scorable pairs in {}", input.display());
        let report = RunReport::new(chunk, Vec::new()).with_source(source);
        println!("{}", export_report(&report, format));
        return Ok(());
    };
    info!("Observation window: {} - {}", window.min, window.max);

    let settings = SessionSettings::new(window)
        .with_chunk(chunk)
        .with_table(config.database.beacon_proxy_table.clone())
        .with_channel_capacity(config.analyzer.channel_capacity);

    let metrics = Arc::new(Metrics::new(config.analyzer.score_threshold));
    metrics.add_skipped(source.records_skipped as u64);
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);

    let session = AnalysisSession::new(
        settings,
        move |changes| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(changes)
        },
        || info!("No more results from the analysis session"),
    )
    .with_metrics(Arc::clone(&metrics));

    let running = session.start().context("Failed to start analysis session")?;
    for pair in pairs {
        running.collect(pair)?;
    }
    let summary = running.close()?;
    info!("{} pairs analyzed", summary.pairs_analyzed);

    let changes = std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner));
    let report = RunReport::new(chunk, changes).with_source(source);
    println!("{}", export_report(&report, format));

    if print_metrics {
        println!();
        print!("{}", metrics.to_prometheus_format());
    }

    Ok(())
}
