//! Delta-Harvest main entry point
//!
//! This is the command-line interface for the Delta-Harvest collection engine.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Parser;
use delta_harvest::config::{load_config_with_hash, Config};
use delta_harvest::crawler::Orchestrator;
use delta_harvest::output::{load_statistics, print_run_summary, print_statistics};
use delta_harvest::storage::StateStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Delta-Harvest: a differential, rate-limited collection engine
///
/// Fetches a discovered set of resource pages politely, skips anything whose
/// content has not changed since the last run, and hands the rest to a
/// content sink.
#[derive(Parser, Debug)]
#[command(name = "delta-harvest")]
#[command(version)]
#[command(about = "A differential, rate-limited collection engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resolve targets and list them without fetching any target page
    #[arg(long, conflicts_with_all = ["stats", "changed_since"])]
    dry_run: bool,

    /// Show statistics from the state store and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// With --stats, report changes since this RFC 3339 timestamp
    #[arg(long, value_name = "RFC3339", value_parser = parse_timestamp)]
    changed_since: Option<DateTime<Utc>>,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::debug!("Configuration hash: {}", config_hash);

    if cli.stats || cli.changed_since.is_some() {
        handle_stats(&config, cli.changed_since)?;
        return Ok(ExitCode::SUCCESS);
    }

    let orchestrator = Orchestrator::from_config(&config, config_hash)
        .context("Failed to initialize the harvest")?;

    if cli.dry_run {
        handle_dry_run(&orchestrator).await?;
        return Ok(ExitCode::SUCCESS);
    }

    handle_harvest(orchestrator).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("delta_harvest=info,warn"),
            1 => EnvFilter::new("delta_harvest=debug,info"),
            2 => EnvFilter::new("delta_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// --dry-run: resolve the target list and print it
///
/// Discovery still runs if the refresh policy says it is due, since that is
/// how the list is produced.
async fn handle_dry_run(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let targets = orchestrator
        .resolve_targets()
        .await
        .context("Failed to resolve targets")?;

    println!("=== Delta-Harvest Dry Run ===\n");
    println!("Would fetch {} targets:", targets.len());
    for target in &targets {
        println!("  {} [{}]", target, target.kind);
    }
    Ok(())
}

/// --stats / --changed-since: read-only reporting
fn handle_stats(config: &Config, since: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let path = Path::new(&config.output.database_path);
    if !path.exists() {
        bail!("State database {} does not exist yet", path.display());
    }

    println!("Database: {}\n", path.display());
    let store = StateStore::open(path)?;
    let stats = load_statistics(&store, since)?;
    print_statistics(&stats);
    Ok(())
}

async fn handle_harvest(orchestrator: Orchestrator) -> anyhow::Result<ExitCode> {
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight requests");
            stop.stop();
        }
    });

    let summary = orchestrator.run().await.context("Harvest aborted")?;
    print_run_summary(&summary);

    if summary.has_fatal() {
        tracing::warn!("{} targets failed", summary.failed());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
