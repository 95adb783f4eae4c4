// =============================================================================
// Walk-Forward Evaluator — chronological K-fold evaluation over the driver
// =============================================================================
//
// The bar history is split into K ordered, non-overlapping test windows that
// together cover the full range. Each window is backtested with the shared
// parameter set; the bars immediately preceding a window form its reference
// slice, used only to seed the rolling window (sized so reference:test is
// train_ratio : 1 − train_ratio, 70/30 by default).
//
// Risk state never crosses a fold boundary: every fold runs a fresh engine
// with a fresh RiskGate, so a blown-up fold cannot suppress entries in the
// next one. With K = 1 the single fold has no reference slice and the
// evaluation degenerates to exactly one plain backtest over the whole range.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::info;

use crate::backtest::{BacktestDriver, BacktestResult};
use crate::config::BotConfig;
use crate::engine::EngineError;
use crate::types::Bar;

/// Default fraction of each fold's combined reference + test span that is
/// reference data.
const DEFAULT_TRAIN_RATIO: f64 = 0.70;

/// One fold's slice boundaries and backtest outcome.
#[derive(Debug, Clone)]
pub struct FoldResult {
    pub fold: usize,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub reference_bars: usize,
    pub result: BacktestResult,
}

/// Per-fold results plus the cross-fold aggregate.
#[derive(Debug, Clone)]
pub struct WalkForwardReport {
    pub folds: Vec<FoldResult>,
    pub overall: BacktestResult,
}

impl std::fmt::Display for WalkForwardReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  BOREALIS — WALK-FORWARD REPORT ({} folds)", self.folds.len())?;
        writeln!(f, "════════════════════════════════════════════")?;
        for fold in &self.folds {
            writeln!(
                f,
                "  Fold {:>2}: {} trades, P&L ${:.2}, win rate {:.1}%",
                fold.fold + 1,
                fold.result.total_trades,
                fold.result.total_pnl,
                fold.result.win_rate * 100.0
            )?;
        }
        writeln!(f, "────────────────────────────────────────────")?;
        write!(f, "{}", self.overall)
    }
}

pub struct WalkForwardEvaluator {
    driver: BacktestDriver,
    folds: usize,
    train_ratio: f64,
}

impl WalkForwardEvaluator {
    /// `folds` defaults to 5 via [`WalkForwardEvaluator::with_defaults`].
    pub fn new(config: BotConfig, folds: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(folds >= 1, "walk-forward needs at least one fold");
        Ok(Self {
            driver: BacktestDriver::new(config)?,
            folds,
            train_ratio: DEFAULT_TRAIN_RATIO,
        })
    }

    pub fn with_defaults(config: BotConfig) -> anyhow::Result<Self> {
        Self::new(config, 5)
    }

    /// Override the reference:test proportion (must be in `[0, 1)`).
    pub fn with_train_ratio(mut self, train_ratio: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (0.0..1.0).contains(&train_ratio),
            "train_ratio must be in [0, 1), got {train_ratio}"
        );
        self.train_ratio = train_ratio;
        Ok(self)
    }

    /// Evaluate the full bar history.
    pub async fn run(&self, bars: &[Bar]) -> Result<WalkForwardReport, EngineError> {
        if bars.is_empty() {
            return Ok(WalkForwardReport {
                folds: Vec::new(),
                overall: BacktestResult::empty(),
            });
        }

        let chunk = bars.len().div_ceil(self.folds);
        let reference_per_test = self.train_ratio / (1.0 - self.train_ratio);

        let mut folds = Vec::with_capacity(self.folds);
        let mut all_trades = Vec::new();
        let mut overall_equity = Vec::with_capacity(bars.len());
        let mut suppressed = 0u32;
        let mut carried_pnl = 0.0_f64;

        for fold in 0..self.folds {
            let test_start = fold * chunk;
            if test_start >= bars.len() {
                break;
            }
            let test_end = ((fold + 1) * chunk).min(bars.len());
            let test = &bars[test_start..test_end];

            let reference_len =
                ((test.len() as f64 * reference_per_test).round() as usize).min(test_start);
            let reference = &bars[test_start - reference_len..test_start];
            let seed_closes: Vec<f64> = reference.iter().map(|b| b.close).collect();

            info!(
                fold,
                test_bars = test.len(),
                reference_bars = reference.len(),
                "walk-forward fold starting"
            );
            let result = self.driver.run_seeded(&seed_closes, test).await?;

            all_trades.extend(result.trades.iter().cloned());
            suppressed += result.suppressed_signals;
            // Stitch fold equity onto the cumulative curve.
            overall_equity.extend(result.equity_curve.iter().map(|e| carried_pnl + e));
            carried_pnl += result.total_pnl;

            folds.push(FoldResult {
                fold,
                test_start: test[0].timestamp,
                test_end: test[test.len() - 1].timestamp,
                reference_bars: reference.len(),
                result,
            });
        }

        let overall = BacktestResult::from_parts(all_trades, overall_equity, suppressed);
        Ok(WalkForwardReport { folds, overall })
    }
}
