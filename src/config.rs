// =============================================================================
// Configuration — the full tunable surface of the trading core
// =============================================================================
//
// Every parameter lives here. The file is JSON with a serde default on every
// field, so configs written by older builds keep loading. Persistence uses
// the atomic tmp + rename pattern to survive a crash mid-write.
//
// The SHA-256 fingerprint over the canonical JSON ties persisted engine
// snapshots to the exact configuration that produced them: a snapshot whose
// fingerprint differs from the running config is refused at restart.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::calendar::{AlwaysOpen, FuturesCalendar, FuturesSchedule, TradingCalendar};
use crate::risk::RiskParams;
use crate::signal::SignalParams;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "ESU5".to_string()
}

fn default_bar_timeframe_secs() -> u64 {
    300
}

fn default_lookback() -> usize {
    20
}

fn default_contract_multiplier() -> f64 {
    5.0
}

fn default_order_size() -> u32 {
    1
}

fn default_tick_size() -> f64 {
    0.25
}

fn default_shutdown_flatten_timeout_secs() -> u64 {
    10
}

fn default_broker_fill_timeout_secs() -> u64 {
    5
}

fn default_snapshot_every_bars() -> u64 {
    50
}

// =============================================================================
// Sections
// =============================================================================

/// Rolling-window parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsParams {
    /// Window length in bars; must be at least 2.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
}

impl Default for StatsParams {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
        }
    }
}

/// Execution-side constants shared by live and simulated fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// Contract point value: P&L per point per contract.
    #[serde(default = "default_contract_multiplier")]
    pub contract_multiplier: f64,

    /// Contracts per entry.
    #[serde(default = "default_order_size")]
    pub order_size: u32,

    /// Minimum price increment of the instrument.
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,

    /// Constant slippage in ticks applied against each fill.
    #[serde(default)]
    pub slippage_ticks: u32,

    /// How long shutdown waits for a flattening fill before escalating.
    #[serde(default = "default_shutdown_flatten_timeout_secs")]
    pub shutdown_flatten_timeout_secs: u64,

    /// How long the engine waits for any fill before halting.
    #[serde(default = "default_broker_fill_timeout_secs")]
    pub broker_fill_timeout_secs: u64,

    /// Snapshot cadence in bars, in addition to every state transition.
    #[serde(default = "default_snapshot_every_bars")]
    pub snapshot_every_bars: u64,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            contract_multiplier: default_contract_multiplier(),
            order_size: default_order_size(),
            tick_size: default_tick_size(),
            slippage_ticks: 0,
            shutdown_flatten_timeout_secs: default_shutdown_flatten_timeout_secs(),
            broker_fill_timeout_secs: default_broker_fill_timeout_secs(),
            snapshot_every_bars: default_snapshot_every_bars(),
        }
    }
}

impl ExecutionParams {
    /// Slippage as a price offset.
    pub fn slippage(&self) -> f64 {
        self.slippage_ticks as f64 * self.tick_size
    }
}

/// Which fill wins when a bar's range covers both the stop and the take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StopTakeTieBreak {
    /// Conservative: assume the adverse excursion happened first.
    #[default]
    StopFirst,
    TakeFirst,
}

/// Whether simulated fills pay slippage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SlippageMode {
    #[default]
    Off,
    /// `execution.slippage_ticks` against every fill, both sides.
    Constant,
}

/// Backtest-only knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BacktestParams {
    #[serde(default)]
    pub slippage_mode: SlippageMode,

    #[serde(default)]
    pub stop_take_tiebreak: StopTakeTieBreak,
}

/// Which calendar implementation the engine consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CalendarMode {
    /// No session modelling; every timestamp trades.
    #[default]
    AlwaysOpen,
    /// Near-24×6 futures schedule with maintenance break and holidays.
    Futures,
}

/// Calendar selection plus the futures schedule.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CalendarParams {
    #[serde(default)]
    pub mode: CalendarMode,

    #[serde(default)]
    pub schedule: FuturesSchedule,
}

impl CalendarParams {
    pub fn build(&self) -> Arc<dyn TradingCalendar> {
        match self.mode {
            CalendarMode::AlwaysOpen => Arc::new(AlwaysOpen),
            CalendarMode::Futures => Arc::new(FuturesCalendar::new(self.schedule.clone())),
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Instrument the engine trades.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Bar timeframe in seconds. One timeframe per run; mixing is undefined.
    #[serde(default = "default_bar_timeframe_secs")]
    pub bar_timeframe_secs: u64,

    #[serde(default)]
    pub stats: StatsParams,

    #[serde(default)]
    pub signal: SignalParams,

    #[serde(default)]
    pub risk: RiskParams,

    #[serde(default)]
    pub execution: ExecutionParams,

    #[serde(default)]
    pub backtest: BacktestParams,

    #[serde(default)]
    pub calendar: CalendarParams,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            bar_timeframe_secs: default_bar_timeframe_secs(),
            stats: StatsParams::default(),
            signal: SignalParams::default(),
            risk: RiskParams::default(),
            execution: ExecutionParams::default(),
            backtest: BacktestParams::default(),
            calendar: CalendarParams::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        config.validate()?;
        info!(
            path = %path.display(),
            symbol = %config.symbol,
            "config loaded"
        );
        Ok(config)
    }

    /// Persist to `path` atomically (write `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Hard validation of the parameter surface. Called on every load; the
    /// backtest CLI and live runner refuse to start on failure.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.symbol.is_empty(), "symbol must not be empty");
        ensure!(self.bar_timeframe_secs > 0, "bar_timeframe_secs must be positive");
        ensure!(
            self.stats.lookback >= 2,
            "stats.lookback must be at least 2, got {}",
            self.stats.lookback
        );
        ensure!(
            self.signal.z_entry > 0.0,
            "signal.z_entry must be positive, got {}",
            self.signal.z_entry
        );
        ensure!(
            self.signal.z_exit >= 0.0 && self.signal.z_exit < self.signal.z_entry,
            "signal.z_exit must satisfy 0 <= z_exit < z_entry, got z_exit={} z_entry={}",
            self.signal.z_exit,
            self.signal.z_entry
        );
        ensure!(
            self.risk.max_daily_loss > 0.0,
            "risk.max_daily_loss must be positive"
        );
        ensure!(
            self.risk.max_consecutive_losses >= 1,
            "risk.max_consecutive_losses must be at least 1"
        );
        ensure!(self.risk.cooldown_secs >= 0, "risk.cooldown_secs must not be negative");
        ensure!(
            self.risk.max_daily_trades >= 1,
            "risk.max_daily_trades must be at least 1"
        );
        ensure!(
            self.risk.max_position_duration_secs > 0,
            "risk.max_position_duration_secs must be positive"
        );
        ensure!(
            self.risk.stop_loss_amount > 0.0,
            "risk.stop_loss_amount must be positive"
        );
        ensure!(
            self.risk.take_profit_amount > 0.0,
            "risk.take_profit_amount must be positive"
        );
        ensure!(
            self.execution.contract_multiplier > 0.0,
            "execution.contract_multiplier must be positive"
        );
        ensure!(self.execution.order_size >= 1, "execution.order_size must be at least 1");
        ensure!(self.execution.tick_size > 0.0, "execution.tick_size must be positive");
        Ok(())
    }

    /// SHA-256 over the canonical JSON rendering. Struct field order is
    /// fixed, so equal configs always hash equal.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = BotConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.symbol, "ESU5");
        assert_eq!(cfg.bar_timeframe_secs, 300);
        assert_eq!(cfg.stats.lookback, 20);
        assert_eq!(cfg.signal.z_entry, 2.0);
        assert_eq!(cfg.signal.z_exit, 0.5);
        assert_eq!(cfg.execution.contract_multiplier, 5.0);
        assert_eq!(cfg.backtest.stop_take_tiebreak, StopTakeTieBreak::StopFirst);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: BotConfig = serde_json::from_str("{}").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.risk.max_consecutive_losses, 3);
        assert_eq!(cfg.calendar.mode, CalendarMode::AlwaysOpen);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "NQZ5", "signal": { "z_entry": 2.5, "z_exit": 0.75, "min_volume": 10 } }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "NQZ5");
        assert_eq!(cfg.signal.z_entry, 2.5);
        assert_eq!(cfg.stats.lookback, 20);
    }

    #[test]
    fn invalid_thresholds_rejected() {
        let mut cfg = BotConfig::default();
        cfg.signal.z_exit = 2.5; // above z_entry
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.signal.z_entry = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.stats.lookback = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = BotConfig::default();
        let b = BotConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = BotConfig::default();
        c.stats.lookback = 30;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn slippage_derives_from_ticks() {
        let mut cfg = BotConfig::default();
        cfg.execution.slippage_ticks = 2;
        assert_eq!(cfg.execution.slippage(), 0.5);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = BotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.fingerprint(), cfg2.fingerprint());
    }

    #[test]
    fn calendar_builds_for_both_modes() {
        use chrono::{TimeZone, Utc};
        let ts = Utc.with_ymd_and_hms(2025, 6, 7, 12, 0, 0).unwrap(); // Saturday

        let cfg = BotConfig::default();
        assert!(cfg.calendar.build().is_open(ts));

        let mut cfg = BotConfig::default();
        cfg.calendar.mode = CalendarMode::Futures;
        assert!(!cfg.calendar.build().is_open(ts));
    }
}
