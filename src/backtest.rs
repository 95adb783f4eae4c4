// =============================================================================
// Backtest Driver — deterministic historical replay through the live engine
// =============================================================================
//
// The driver feeds a recorded bar sequence through the exact same Engine,
// SignalGenerator, and RiskGate code paths the live runner uses, against a
// paper broker and an in-memory store. No logic is duplicated, so live and
// simulated behaviour cannot diverge.
//
// Fills happen at bar close (entries, z-exits, duration caps) or at the
// barrier level when a stop/take is inside the bar's range, optionally offset
// by constant slippage. When both barriers are inside one bar the configured
// tie-break applies, StopFirst by default.
//
// Determinism: same bars + same config = identical trade list and metrics.
// =============================================================================

use tracing::info;

use crate::broker::PaperBroker;
use crate::config::{BotConfig, SlippageMode};
use crate::engine::{Engine, EngineError};
use crate::store::Store;
use crate::types::{Bar, Trade};

use std::sync::Arc;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Aggregate outcome of one backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    /// Cumulative P&L (realized + open mark) after each processed bar.
    pub equity_curve: Vec<f64>,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Worst peak-to-trough fall of the equity curve, in P&L units.
    pub max_drawdown: f64,
    /// Mean over standard deviation of per-trade P&L, unannualised.
    pub sharpe: f64,
    pub total_pnl: f64,
    /// Entry signals the risk gate or calendar suppressed.
    pub suppressed_signals: u32,
}

impl BacktestResult {
    pub fn empty() -> Self {
        Self {
            trades: Vec::new(),
            equity_curve: Vec::new(),
            total_trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            sharpe: 0.0,
            total_pnl: 0.0,
            suppressed_signals: 0,
        }
    }

    /// Compute the metric block from a trade list and equity curve.
    pub fn from_parts(trades: Vec<Trade>, equity_curve: Vec<f64>, suppressed: u32) -> Self {
        let total_trades = trades.len() as u32;
        let wins = trades.iter().filter(|t| t.is_win()).count() as u32;
        let losses = total_trades - wins;

        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        let gross_profit: f64 = trades
            .iter()
            .filter(|t| t.is_win())
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: f64 = trades
            .iter()
            .filter(|t| !t.is_win())
            .map(|t| t.realized_pnl.abs())
            .sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        for &equity in &equity_curve {
            if equity > peak {
                peak = equity;
            }
            let drawdown = peak - equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }

        let sharpe = sharpe_over_trades(&trades);
        let total_pnl = trades.iter().map(|t| t.realized_pnl).sum();

        Self {
            trades,
            equity_curve,
            total_trades,
            wins,
            losses,
            win_rate,
            profit_factor,
            max_drawdown,
            sharpe,
            total_pnl,
            suppressed_signals: suppressed,
        }
    }
}

/// Mean over sample standard deviation of per-trade P&L; zero when it is
/// undefined (fewer than two trades, or zero variance).
fn sharpe_over_trades(trades: &[Trade]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }
    let n = trades.len() as f64;
    let mean: f64 = trades.iter().map(|t| t.realized_pnl).sum::<f64>() / n;
    let var: f64 = trades
        .iter()
        .map(|t| (t.realized_pnl - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    if var <= 0.0 {
        return 0.0;
    }
    mean / var.sqrt()
}

impl std::fmt::Display for BacktestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  BOREALIS — BACKTEST REPORT")?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Trades         : {}", self.total_trades)?;
        writeln!(f, "  Wins / Losses  : {} / {}", self.wins, self.losses)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Profit Factor  : {:.3}", self.profit_factor)?;
        writeln!(f, "  Sharpe (trade) : {:.3}", self.sharpe)?;
        writeln!(f, "  Max Drawdown   : ${:.2}", self.max_drawdown)?;
        writeln!(f, "  Total P&L      : ${:.2}", self.total_pnl)?;
        writeln!(f, "  Suppressed     : {}", self.suppressed_signals)?;
        writeln!(f, "════════════════════════════════════════════")
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct BacktestDriver {
    config: BotConfig,
}

impl BacktestDriver {
    pub fn new(config: BotConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Replay `bars` from a cold window.
    pub async fn run(&self, bars: &[Bar]) -> Result<BacktestResult, EngineError> {
        self.run_seeded(&[], bars).await
    }

    /// Replay `bars` with the rolling window pre-seeded from `seed_closes`
    /// (oldest first). Risk state always starts fresh.
    pub async fn run_seeded(
        &self,
        seed_closes: &[f64],
        bars: &[Bar],
    ) -> Result<BacktestResult, EngineError> {
        if bars.is_empty() {
            return Ok(BacktestResult::empty());
        }

        let slippage = match self.config.backtest.slippage_mode {
            SlippageMode::Off => 0.0,
            SlippageMode::Constant => self.config.execution.slippage(),
        };
        let broker = Arc::new(PaperBroker::new(slippage));
        let store = Store::in_memory()?;
        let mut engine = Engine::new(
            self.config.clone(),
            store.clone(),
            broker,
            self.config.calendar.build(),
            Arc::new(crate::alerts::LogAlerts),
        )?;
        engine.start().await?;
        if !seed_closes.is_empty() {
            engine.seed_window(seed_closes)?;
        }

        info!(
            bars = bars.len(),
            seeded = seed_closes.len(),
            slippage,
            "backtest starting"
        );

        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut realized = 0.0_f64;
        let mut suppressed = 0u32;

        for bar in bars {
            let outcome = engine.on_bar(bar.clone()).await?;
            if let Some(trade) = &outcome.closed_trade {
                realized += trade.realized_pnl;
            }
            if outcome.suppressed.is_some() {
                suppressed += 1;
            }
            equity_curve.push(realized + engine.open_mark(bar.close));
        }

        // Flatten anything still open at the last close so every run ends
        // with fully realized P&L.
        engine.shutdown().await?;

        let first_ts = bars[0].timestamp;
        let last_ts = bars[bars.len() - 1].timestamp;
        let trades = store.trades_in_range(first_ts, last_ts)?;

        Ok(BacktestResult::from_parts(trades, equity_curve, suppressed))
    }
}
