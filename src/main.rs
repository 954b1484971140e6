//! pedocore - step counting service
//!
//! Counts steps from motion samples, keeps a per-day total for one user and
//! prints step history.
//!
//! # Usage
//!
//! ```bash
//! # Count steps from simulated walking data
//! motion-simulation | pedocore run --stdin
//!
//! # Replay a recorded CSV at 10x speed
//! pedocore run --csv walk.csv --speed 10
//!
//! # No motion input: degraded mode with synthetic steps
//! pedocore run
//!
//! # Last 7 / 30 days
//! pedocore history --window week
//! pedocore history --window month
//!
//! # Set today's count back to 0
//! pedocore reset
//! ```
//!
//! # Environment Variables
//!
//! - `PEDOCORE_CONFIG`: Path to the TOML config (default: ./pedocore.toml)
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe all persistent data on startup (for testing)

use anyhow::{bail, Context, Result};
use clap::Parser;
use pedocore::acquisition::{read_csv_samples, MotionSensor, ReplaySensor, UnavailableSensor};
use pedocore::config::{self, StepConfig, UserConfig};
use pedocore::storage::{DataDirLock, SledStepStore, StepStore};
use pedocore::{
    Clock, DailyStepAggregator, HistoryQuery, HistoryWindow, StepSession, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "pedocore")]
#[command(about = "Motion-derived step counting with daily history")]
#[command(version)]
struct CliArgs {
    /// Reset all persistent step data on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Count steps until the input ends or Ctrl+C
    Run(RunArgs),

    /// Print the daily step series for a trailing window
    History {
        /// Preset window
        #[arg(long, value_enum, default_value = "week")]
        window: WindowArg,
        /// Explicit number of days (overrides --window)
        #[arg(long)]
        days: Option<u32>,
        /// User id (default: from config)
        #[arg(long)]
        user: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Set today's step count to 0
    Reset {
        /// User id (default: from config)
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Read JSON motion samples from stdin (one per line)
    /// Use with simulator: motion-simulation | pedocore run --stdin
    #[arg(long, conflicts_with = "csv")]
    stdin: bool,

    /// Path to CSV file with motion samples (timestamp_ms,x,y,z)
    #[arg(long)]
    csv: Option<PathBuf>,

    /// User id (default: from config)
    #[arg(long)]
    user: Option<String>,

    /// Speed multiplier for CSV replay (1 = realtime, 10 = 10x faster, 0 = no delay)
    #[arg(long, default_value = "1")]
    speed: u64,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum WindowArg {
    Week,
    Month,
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

/// Remove the data directory and all its contents.
fn reset_data_directory(data_path: &Path) -> Result<()> {
    if !data_path.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }

    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    warn!("  RESET_DB DETECTED - WIPING ALL STEP DATA");
    warn!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    warn!("  Removing: {}", data_path.display());

    std::fs::remove_dir_all(data_path).context("Failed to remove data directory")?;

    warn!("  Data directory removed. A fresh database will be created.");
    Ok(())
}

// ============================================================================
// Storage
// ============================================================================

/// Open the step store, holding the data directory lock for its lifetime.
fn open_store(config: &StepConfig) -> Result<(DataDirLock, Arc<SledStepStore>)> {
    let lock = DataDirLock::acquire(&config.storage.data_dir)?;
    let db_path = config.storage.db_path();
    let store = SledStepStore::open(&db_path)
        .with_context(|| format!("Failed to open step store at {}", db_path.display()))?;
    Ok((lock, Arc::new(store)))
}

// ============================================================================
// Commands
// ============================================================================

fn build_sensor(args: &RunArgs, config: &StepConfig) -> Result<Arc<dyn MotionSensor>> {
    if args.stdin {
        info!("📥 Input: stdin (JSON motion samples)");
        return Ok(Arc::new(ReplaySensor::stdin()));
    }

    if let Some(path) = &args.csv {
        info!("📂 Loading motion samples from CSV: {}", path.display());
        let samples = read_csv_samples(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if samples.is_empty() {
            return Err(anyhow::anyhow!("No motion samples loaded from CSV"));
        }

        let base = config.sampling.poll_interval_ms;
        let delay_ms = if args.speed == 0 { 0 } else { base / args.speed };
        info!(
            "⏱️  Speed: {}x ({}ms between samples, {} samples)",
            if args.speed == 0 {
                "max".to_string()
            } else {
                args.speed.to_string()
            },
            delay_ms,
            samples.len()
        );
        return Ok(Arc::new(ReplaySensor::from_samples(
            samples,
            Duration::from_millis(delay_ms),
        )));
    }

    Ok(Arc::new(UnavailableSensor::new("no motion input configured")))
}

/// `--user` override, held to the same rules as `user.id` in the config.
fn resolve_user(cli_user: Option<String>, config: &StepConfig) -> Result<String> {
    let Some(id) = cli_user else {
        return Ok(config.user.id.clone());
    };
    if let Err(e) = UserConfig::check_id(&id) {
        bail!("--user {}", e);
    }
    Ok(id)
}

async fn run_session(args: RunArgs, config: &StepConfig) -> Result<()> {
    let user_id = resolve_user(args.user.clone(), config)?;
    let sensor = build_sensor(&args, config)?;
    let (_lock, store) = open_store(config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (mut session, _handle) =
        StepSession::open(user_id, store.clone(), clock, sensor, config).await;

    if let Some(notice) = session.take_notice() {
        warn!("⚠️  {}", notice);
        eprintln!("{}", notice);
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let summary = session.run(cancel_token).await;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📊 SESSION SUMMARY");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   User:            {}", summary.user_id);
    info!("   Source:          {} ({:?})", summary.source, summary.mode);
    info!("   Today:           {} steps on {}", summary.today.count, summary.today.date);
    if let Some(det) = summary.detector {
        info!("   Samples:         {}", det.samples);
        info!("   Steps detected:  {}", det.steps);
        info!(
            "   Suppressed:      {} below threshold, {} refractory, {} in flight, {} non-finite",
            det.below_threshold, det.refractory, det.in_flight, det.non_finite
        );
    }
    info!(
        "   Flushes:         {} ok, {} failed",
        summary.aggregator.flushes, summary.aggregator.failed_flushes
    );
    if !summary.final_flush_ok {
        warn!("   Final flush failed; the latest steps were not stored");
    }
    info!(
        "   Store:           {} records, {:.1} KB on disk",
        store.count(),
        store.size_bytes() as f64 / 1024.0
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    Ok(())
}

async fn print_history(
    window: HistoryWindow,
    user: Option<String>,
    json: bool,
    config: &StepConfig,
) -> Result<()> {
    let user_id = resolve_user(user, config)?;
    let (_lock, store) = open_store(config)?;

    let query = HistoryQuery::new(store, config.history.max_window_days);
    let series = query.query(&user_id, window, SystemClock.today()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&series)?);
        return Ok(());
    }

    println!("Steps for '{}' ({})", user_id, window);
    for total in &series {
        println!("  {}  {:>8}", total.date, total.count);
    }
    let sum: u64 = series.iter().map(|t| t.count).sum();
    println!("  {:<10}  {:>8}", "total", sum);
    Ok(())
}

async fn reset_today(user: Option<String>, config: &StepConfig) -> Result<()> {
    let user_id = resolve_user(user, config)?;
    let (_lock, store) = open_store(config)?;

    let mut aggregator = DailyStepAggregator::new(
        user_id.clone(),
        store.clone(),
        Arc::new(SystemClock),
        &config.aggregator,
    );
    aggregator
        .reset()
        .await
        .context("Failed to store the reset count")?;
    store.sync().await?;

    info!("✓ Steps for '{}' on {} reset to 0", user_id, aggregator.date());
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    // Load step configuration
    let step_config = StepConfig::load();
    info!(
        "User: {} | Threshold: {} | Refractory: {}ms | Flush every {}s",
        step_config.user.id,
        step_config.detector.threshold,
        step_config.detector.refractory_ms,
        step_config.aggregator.flush_interval_secs
    );
    config::init(step_config);
    let config = config::get();

    // Reset DB check, before any storage initialization
    if should_reset_db(args.reset_db) {
        reset_data_directory(&config.storage.data_dir)?;
    }

    match args.command {
        Some(SubCommand::Run(run)) => run_session(run, config).await?,
        None => run_session(RunArgs::default(), config).await?,
        Some(SubCommand::History {
            window,
            days,
            user,
            json,
        }) => {
            let window = match (days, window) {
                (Some(n), _) => HistoryWindow::Days(n),
                (None, WindowArg::Week) => HistoryWindow::Week,
                (None, WindowArg::Month) => HistoryWindow::Month,
            };
            print_history(window, user, json, config).await?;
        }
        Some(SubCommand::Reset { user }) => reset_today(user, config).await?,
    }

    info!("✓ pedocore shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_csv() {
        let args = CliArgs::try_parse_from(["pedocore", "run", "--csv", "walk.csv", "--speed", "0"])
            .unwrap();
        match args.command {
            Some(SubCommand::Run(run)) => {
                assert_eq!(run.csv, Some(PathBuf::from("walk.csv")));
                assert_eq!(run.speed, 0);
                assert!(!run.stdin);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_stdin_with_csv() {
        assert!(CliArgs::try_parse_from(["pedocore", "run", "--stdin", "--csv", "a.csv"]).is_err());
    }

    #[test]
    fn test_cli_history_days() {
        let args = CliArgs::try_parse_from(["pedocore", "history", "--days", "14"]).unwrap();
        assert!(matches!(
            args.command,
            Some(SubCommand::History { days: Some(14), .. })
        ));
    }

    #[test]
    fn test_resolve_user_falls_back_to_config() {
        let config = StepConfig::default();
        assert_eq!(resolve_user(None, &config).unwrap(), config.user.id);
        assert_eq!(resolve_user(Some("alice".into()), &config).unwrap(), "alice");
    }

    #[test]
    fn test_resolve_user_rejects_key_separator() {
        let config = StepConfig::default();
        let err = resolve_user(Some("a/b".into()), &config).unwrap_err();
        assert!(err.to_string().contains("must not contain '/'"));
        assert!(resolve_user(Some("  ".into()), &config).is_err());
    }

    #[test]
    fn test_default_data_dir_constant() {
        assert_eq!(StepConfig::default().storage.data_dir, PathBuf::from(config::defaults::DATA_DIR));
    }
}
