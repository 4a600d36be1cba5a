//! CLI for the slidewin windowing engine.
//!
//! Runs synthetic workloads against real windows and validates window
//! settings files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use slidewin::{
    Bucket, BucketSummary, DataType, FixedTumblingConfig, FixedTumblingEvent,
    FixedTumblingPayload, FixedTumblingWindow, InMemoryMetrics, Metrics, OnDemandConfig,
    OnDemandWindow, StrategySettings, TumblingQuery, WindowConfig, WindowSettings,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// slidewin: time-bounded bucketed windows.
#[derive(Parser)]
#[command(name = "slidewin", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Feed synthetic events into a window and print its buckets.
    Simulate {
        /// Windowing strategy.
        #[arg(long, default_value = "fixed")]
        strategy: Strategy,

        /// Retained window length (e.g. "3s", "500ms", "1m").
        #[arg(long, default_value = "3s")]
        length: String,

        /// Bucket length; the rotation period for fixed windows, the query
        /// bucket length for on-demand windows.
        #[arg(long, default_value = "1s")]
        bucket: String,

        /// How long to feed events.
        #[arg(long, default_value = "5s")]
        duration: String,

        /// Events per second.
        #[arg(long, default_value = "20")]
        rate: u32,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Validate a window settings JSON file.
    Validate {
        /// Path to the settings file.
        settings_path: PathBuf,
    },
}

/// Windowing strategy to simulate.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Fixed tumbling window.
    Fixed,
    /// On-demand window.
    OnDemand,
}

/// Output format for bucket listings.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with buckets and metrics.
    Json,
}

/// A synthetic event.
#[derive(Debug, Clone, Serialize)]
struct Event {
    seq: u64,
    value: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            strategy,
            length,
            bucket,
            duration,
            rate,
            format,
        } => cmd_simulate(strategy, &length, &bucket, &duration, rate, format),
        Commands::Validate { settings_path } => cmd_validate(&settings_path),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `slidewin simulate`.
fn cmd_simulate(
    strategy: Strategy,
    length: &str,
    bucket: &str,
    duration: &str,
    rate: u32,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let length = parse_duration(length)?;
    let bucket = parse_duration(bucket)?;
    let duration = parse_duration(duration)?;
    if rate == 0 {
        return Err("--rate must be at least 1".into());
    }

    let backend = Arc::new(InMemoryMetrics::new());
    let name = match strategy {
        Strategy::Fixed => "simulate-fixed",
        Strategy::OnDemand => "simulate-on-demand",
    };
    let window = WindowConfig::new(name, length, vec![DataType::of::<Event>()])?
        .with_metrics(Arc::new(Metrics::new(backend.clone())));

    let buckets = match strategy {
        Strategy::Fixed => simulate_fixed(window, bucket, duration, rate)?,
        Strategy::OnDemand => simulate_on_demand(window, bucket, duration, rate)?,
    };

    match format {
        OutputFormat::Csv => {
            println!("# window={name}, buckets={}", buckets.len());
            println!("start_ns,end_ns,status,events");
            for summary in &buckets {
                let status = summary
                    .status
                    .map_or_else(|| "-".to_string(), |s| s.to_string());
                let events = summary.counts.values().sum::<usize>();
                println!("{},{},{status},{events}", summary.start_ns, summary.end_ns);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "window": name,
                "count": buckets.len(),
                "buckets": buckets,
                "metrics": backend.snapshot(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn simulate_fixed(
    window: WindowConfig,
    bucket: Duration,
    duration: Duration,
    rate: u32,
) -> Result<Vec<BucketSummary>, Box<dyn std::error::Error>> {
    let window = FixedTumblingWindow::new(FixedTumblingConfig::new(window, bucket)?)?;
    window.add_observer(Arc::new(|event: FixedTumblingEvent, payload: &FixedTumblingPayload| {
        if event == FixedTumblingEvent::NonCurrentBucketRemoving {
            for bucket in payload.buckets() {
                debug!(start_ns = bucket.start_ns(), "evicting bucket");
            }
        }
    }));
    window.start()?;

    feed(duration, rate, |event| window.add_data(event))?;

    info!(retained = window.non_current_buckets()?.len(), "simulation finished");
    Ok(window.summaries()?)
}

fn simulate_on_demand(
    window: WindowConfig,
    bucket: Duration,
    duration: Duration,
    rate: u32,
) -> Result<Vec<BucketSummary>, Box<dyn std::error::Error>> {
    let length = window.length();
    let window = OnDemandWindow::new(OnDemandConfig::new(window)?)?;
    window.start()?;

    feed(duration, rate, |event| window.add_data(event))?;

    let report = window.run_maintenance()?;
    info!(evicted = ?report.evicted, retained = ?report.retained, "simulation finished");

    let buckets = window.on_demand_tumbling_buckets(
        TumblingQuery::new().length(length).bucket_length(bucket),
    )?;
    Ok(buckets.iter().map(|b| b.summary()).collect())
}

/// Adds `rate` events per second for `duration`.
fn feed(
    duration: Duration,
    rate: u32,
    mut add: impl FnMut(Event) -> slidewin::Result<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let period = Duration::from_secs(1) / rate;
    let started = Instant::now();
    let mut seq = 0u64;
    while started.elapsed() < duration {
        #[allow(clippy::cast_precision_loss)] // Synthetic values only
        let value = (seq % 100) as f64;
        add(Event { seq, value })?;
        seq += 1;
        std::thread::sleep(period);
    }
    debug!(events = seq, "feed finished");
    Ok(())
}

/// Implements `slidewin validate <settings_path>`.
fn cmd_validate(settings_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(settings_path)?;
    let settings = WindowSettings::from_json(&json)?;
    settings.validate()?;

    let strategy = match settings.strategy {
        StrategySettings::FixedTumbling { bucket_length } => {
            format!("fixed_tumbling, bucket_length={}", format_duration(bucket_length))
        }
        StrategySettings::OnDemand { .. } => format!(
            "on_demand, maintenance_interval={}",
            format_duration(settings.effective_maintenance_interval())
        ),
    };
    println!(
        "OK: \"{}\" length={} ({strategy})",
        settings.name,
        format_duration(settings.length)
    );
    Ok(())
}

/// Parses a human-readable duration string (e.g., "250ms", "3s", "1m", "1h").
fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("Missing duration unit in '{s}'. Use ms, s, m, or h."))?;
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str.parse()?;

    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use ms, s, m, or h.").into()),
    };

    Ok(duration)
}

/// Formats a duration with the largest unit that divides it exactly.
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 || !millis.is_multiple_of(1000) {
        return format!("{millis}ms");
    }
    let secs = millis / 1000;
    if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
