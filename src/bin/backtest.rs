// =============================================================================
// Backtest CLI — replay recorded bars through the trading core
// =============================================================================
//
//   backtest --data bars.csv                         plain backtest
//   backtest --data bars.csv --folds 5               walk-forward, 5 folds
//   backtest --data bars.csv --config custom.json    explicit parameters
// =============================================================================

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use borealis_bot::backtest::BacktestDriver;
use borealis_bot::config::BotConfig;
use borealis_bot::data::load_bars_csv;
use borealis_bot::walkforward::WalkForwardEvaluator;

#[derive(Debug, Parser)]
#[command(name = "backtest", about = "Replay recorded bars through the Borealis core")]
struct Cli {
    /// CSV bar file: timestamp,open,high,low,close,volume
    #[arg(long)]
    data: PathBuf,

    /// JSON config file; defaults when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of walk-forward folds; 1 runs a single plain backtest.
    #[arg(long, default_value_t = 1)]
    folds: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BotConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            warn!("no config given, using defaults");
            BotConfig::default()
        }
    };

    let bars = load_bars_csv(&cli.data)?;
    info!(
        bars = bars.len(),
        symbol = %config.symbol,
        folds = cli.folds,
        "starting run"
    );

    if cli.folds > 1 {
        let report = WalkForwardEvaluator::new(config, cli.folds)?
            .run(&bars)
            .await?;
        println!("{report}");
    } else {
        let result = BacktestDriver::new(config)?.run(&bars).await?;
        println!("{result}");
    }
    Ok(())
}
