//! Trace driver for the tagheap allocator.
//!
//! Usage:
//!   tagheap-driver traces/*.rep              - Replay the traces and print a table
//!   tagheap-driver --check traces/*.rep      - Also check the heap after every operation
//!   tagheap-driver --json traces/*.rep       - Print the results as JSON
//!   tagheap-driver --config heap.toml ...    - Load the heap configuration from a file

mod config;
mod replay;
mod trace;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::DriverConfig;
use crate::replay::ReplayStats;
use crate::trace::Trace;

#[derive(Parser)]
#[command(name = "tagheap-driver", version)]
#[command(about = "Replay allocation traces against the tagheap allocator")]
struct Cli {
    /// TOML file with the memory limit and the heap configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Check the heap invariants after every operation
    #[arg(long)]
    check: bool,

    /// Print the results as JSON
    #[arg(long)]
    json: bool,

    /// Increase the log level (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Trace files to replay
    #[arg(required = true)]
    traces: Vec<PathBuf>,
}

#[derive(Serialize)]
struct TraceResult {
    trace: String,
    #[serde(flatten)]
    stats: Option<ReplayStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = DriverConfig::load(cli.config.as_deref())?;
    config.check |= cli.check;

    let results: Vec<TraceResult> = cli
        .traces
        .iter()
        .map(|path| {
            let trace = path.display().to_string();
            match run(path, &config) {
                Ok(stats) => TraceResult {
                    trace,
                    stats: Some(stats),
                    error: None,
                },
                Err(err) => {
                    log::error!("{}: {:#}", trace, err);
                    TraceResult {
                        trace,
                        stats: None,
                        error: Some(format!("{:#}", err)),
                    }
                }
            }
        })
        .collect();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_table(&results);
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        bail!("{} of {} traces failed", failed, results.len());
    }

    Ok(())
}

fn run(path: &Path, config: &DriverConfig) -> Result<ReplayStats> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let trace =
        Trace::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

    log::info!(
        "{}: {} ops over {} ids, suggested heap size {}, weight {}",
        path.display(),
        trace.ops.len(),
        trace.num_ids,
        trace.suggested_heap_size,
        trace.weight
    );

    replay::replay(&trace, config)
}

fn print_table(results: &[TraceResult]) {
    println!(
        "{:<32} {:>5} {:>8} {:>12} {:>12} {:>6}",
        "trace", "valid", "ops", "peak", "heap", "util"
    );

    let mut utilization = Vec::new();
    for result in results {
        match &result.stats {
            Some(stats) => {
                println!(
                    "{:<32} {:>5} {:>8} {:>12} {:>12} {:>5.1}%",
                    result.trace,
                    "yes",
                    stats.ops,
                    stats.peak_payload,
                    stats.heap_size,
                    stats.utilization * 100.0
                );
                utilization.push(stats.utilization);
            }
            None => println!("{:<32} {:>5}", result.trace, "no"),
        }
    }

    if !utilization.is_empty() {
        let mean = utilization.iter().sum::<f64>() / utilization.len() as f64;
        println!("{:<32} {:>5} {:>41.1}%", "mean", "", mean * 100.0);
    }
}
