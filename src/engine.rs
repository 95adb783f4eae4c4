// =============================================================================
// Engine — event-driven state machine orchestrating signals, risk, and fills
// =============================================================================
//
// One engine trades one instrument on one timeframe. Per bar:
//
//   validate -> session rollover -> stats update -> mark -> signal ->
//   barrier exits (stop/take > halt > duration > z-exit) ->
//   gated entry -> persist (signal row, trade row, snapshot)
//
// States: Idle -> Entering -> Open -> Exiting -> Idle. Only Idle and Open
// are stable; Entering/Exiting last exactly as long as the round trip to the
// broker, and every fill is resolved before the bar returns, so snapshots
// only ever capture stable states.
//
// Broker events are inputs to this state machine, never direct mutators of
// the ledger or risk gate. A fill that fails to arrive within the configured
// timeout halts the session (`BrokerTimeout`) rather than leaving an intent
// dangling.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::alerts::{AlertKind, Alerts};
use crate::broker::{Broker, BrokerError, Fill, IntentId, OrderAction, OrderIntent};
use crate::calendar::TradingCalendar;
use crate::config::BotConfig;
use crate::ledger::{Ledger, Position};
use crate::risk::{Decision, RiskGate};
use crate::signal::SignalGenerator;
use crate::stats::RollingStats;
use crate::store::{DailySummary, EngineSnapshot, Store, StoreError};
use crate::types::{Bar, CloseReason, CoreError, PositionView, Side, Signal, SignalKind, Trade};

/// Backoff imposed on new entries after a transient broker fault.
const BROKER_BACKOFF_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Entering { side: Side, intent: IntentId },
    Open { side: Side },
    Exiting { side: Side, intent: IntentId },
}

impl EngineState {
    pub fn open_side(&self) -> Option<Side> {
        match self {
            Self::Open { side } => Some(*side),
            _ => None,
        }
    }
}

/// What happened while processing one bar.
#[derive(Debug, Clone, Default)]
pub struct BarOutcome {
    /// The evaluated signal; `None` when the bar was rejected outright.
    pub signal: Option<Signal>,
    /// Why an intent-bearing signal was not acted on, if it wasn't.
    pub suppressed: Option<String>,
    /// A round trip that closed on this bar.
    pub closed_trade: Option<Trade>,
    /// Whether a new position was opened on this bar.
    pub opened: bool,
    /// The bar was invalid or out of order and was dropped.
    pub rejected: bool,
}

impl BarOutcome {
    fn rejected() -> Self {
        Self {
            rejected: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: BotConfig,
    fingerprint: String,
    stats: RollingStats,
    signals: SignalGenerator,
    ledger: Ledger,
    risk: RiskGate,
    state: EngineState,
    last_bar_ts: Option<DateTime<Utc>>,
    last_close: Option<f64>,
    bars_since_snapshot: u64,
    store: Store,
    broker: Arc<dyn Broker>,
    calendar: Arc<dyn TradingCalendar>,
    alerts: Arc<dyn Alerts>,
}

impl Engine {
    pub fn new(
        config: BotConfig,
        store: Store,
        broker: Arc<dyn Broker>,
        calendar: Arc<dyn TradingCalendar>,
        alerts: Arc<dyn Alerts>,
    ) -> Result<Self, EngineError> {
        let fingerprint = config.fingerprint();
        let stats = RollingStats::new(config.stats.lookback)?;
        let signals = SignalGenerator::new(config.signal);
        let ledger = Ledger::new(config.execution.contract_multiplier);
        let risk = RiskGate::new(config.risk.clone());

        Ok(Self {
            config,
            fingerprint,
            stats,
            signals,
            ledger,
            risk,
            state: EngineState::Idle,
            last_bar_ts: None,
            last_close: None,
            bars_since_snapshot: 0,
            store,
            broker,
            calendar,
            alerts,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.ledger.position()
    }

    pub fn session_pnl(&self) -> f64 {
        self.risk.session_pnl()
    }

    pub fn is_halted(&self) -> bool {
        self.risk.is_halted()
    }

    pub fn last_bar_ts(&self) -> Option<DateTime<Utc>> {
        self.last_bar_ts
    }

    /// Unrealized P&L of the open position at `price`; zero when flat.
    pub fn open_mark(&self, price: f64) -> f64 {
        self.ledger.mark(price)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            last_bar_ts: self.last_bar_ts.unwrap_or(DateTime::<Utc>::MIN_UTC),
            position: self.ledger.position().cloned(),
            risk: self.risk.state().clone(),
            window_hash: self.stats.content_hash(),
            config_fingerprint: self.fingerprint.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Startup: restore, reconcile
    // -------------------------------------------------------------------------

    /// Connect the broker, restore persisted state, and reconcile against
    /// broker truth.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        self.broker.connect().await?;

        self.restore_from_store()?;
        self.reconcile_with_broker().await?;

        self.alerts.notify(
            AlertKind::Startup,
            json!({
                "symbol": self.config.symbol,
                "state": format!("{:?}", self.state),
                "window_ready": self.stats.is_ready(),
            }),
        );
        Ok(())
    }

    /// Load the latest compatible snapshot and rebuild the rolling window
    /// from recorded bar history.
    fn restore_from_store(&mut self) -> Result<(), EngineError> {
        // Every processed bar writes a signal row, so the last `lookback`
        // prices reproduce the window regardless of snapshot cadence.
        let prices = self.store.recent_signal_prices(self.config.stats.lookback)?;
        if !prices.is_empty() {
            self.stats.seed(&prices)?;
            info!(
                bars = prices.len(),
                ready = self.stats.is_ready(),
                "rolling window rebuilt from store"
            );
        }

        let snapshot = match self.store.latest_snapshot(&self.fingerprint)? {
            Some(snapshot) => snapshot,
            None => {
                if self.store.signal_count()? > 0 {
                    warn!("no snapshot matches current config fingerprint, starting cold");
                }
                return Ok(());
            }
        };

        let latest_ts = self.last_recorded_bar_ts()?;
        if latest_ts == Some(snapshot.last_bar_ts)
            && self.stats.content_hash() != snapshot.window_hash
        {
            warn!("snapshot window hash mismatch, refusing snapshot and starting cold");
            self.last_bar_ts = latest_ts;
            return Ok(());
        }

        self.last_bar_ts = latest_ts.max(Some(snapshot.last_bar_ts));
        self.risk.restore(snapshot.risk.clone());
        if let Some(position) = snapshot.position.clone() {
            let side = position.side;
            self.ledger.restore(Some(position));
            self.state = EngineState::Open { side };
            self.signals.set_position(match side {
                Side::Long => PositionView::Long,
                Side::Short => PositionView::Short,
            });
        }
        info!(
            last_bar_ts = %snapshot.last_bar_ts,
            position = self.ledger.position().is_some(),
            "engine state restored from snapshot"
        );
        Ok(())
    }

    fn last_recorded_bar_ts(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.last_signal_time()
    }

    /// Compare our position against broker truth and resolve divergence.
    async fn reconcile_with_broker(&mut self) -> Result<(), EngineError> {
        let broker_positions = self.broker.positions().await?;
        let broker_open = broker_positions.first().copied();
        let ours = self.ledger.position().cloned();

        match (ours, broker_open) {
            (None, None) => Ok(()),
            (Some(position), Some(theirs))
                if theirs.side == position.side && theirs.size == position.size =>
            {
                info!(side = %position.side, size = position.size, "broker position matches snapshot, resuming");
                Ok(())
            }
            (Some(position), _) => {
                // Broker is flat (or diverged): accept broker truth and
                // synthesize the close we missed.
                warn!(
                    side = %position.side,
                    "snapshot had an open position the broker does not confirm, synthesizing close"
                );
                let price = self
                    .store
                    .last_signal_price()?
                    .unwrap_or(position.entry_price);
                let time = self.last_bar_ts.unwrap_or(position.entry_time);
                let trade =
                    self.ledger
                        .close(price, time, CloseReason::ForceFlatten, None)?;
                self.risk.record(&trade);
                self.risk.note_close();
                self.store.append_trade(&trade)?;
                self.signals.set_position(PositionView::Flat);
                self.state = EngineState::Idle;
                self.write_snapshot()?;
                self.alerts.notify(
                    AlertKind::TradeExit,
                    json!({ "reason": "ForceFlatten", "price": price, "reconciliation": true }),
                );

                // If the broker still holds something (diverged rather than
                // flat), flatten it without inferring entry details.
                if let Some(theirs) = broker_open {
                    self.flatten_broker_position(theirs, price, time).await?;
                }
                Ok(())
            }
            (None, Some(theirs)) => {
                // We believe flat but the broker holds a position. Safe
                // default: flatten it; never adopt entry details we cannot
                // know.
                warn!(
                    side = %theirs.side,
                    size = theirs.size,
                    "broker holds a position the snapshot does not, flattening"
                );
                let price = self.store.last_signal_price()?.unwrap_or(0.0);
                let time = self.last_bar_ts.unwrap_or_else(Utc::now);
                self.flatten_broker_position(theirs, price, time).await?;
                Ok(())
            }
        }
    }

    async fn flatten_broker_position(
        &mut self,
        theirs: crate::broker::BrokerPosition,
        price_hint: f64,
        time_hint: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let action = match theirs.side {
            Side::Long => OrderAction::Sell,
            Side::Short => OrderAction::Buy,
        };
        let intent = OrderIntent {
            symbol: self.config.symbol.clone(),
            action,
            size: theirs.size,
            price_hint,
            time_hint,
        };
        let id = self.broker.place_market_order(intent).await?;
        let fill = self.await_fill_with_timeout(id).await?;
        info!(price = fill.price, "orphan broker position flattened");
        self.alerts.notify(
            AlertKind::BrokerFault,
            json!({ "event": "orphan_position_flattened", "price": fill.price }),
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Per-bar procedure
    // -------------------------------------------------------------------------

    pub async fn on_bar(&mut self, bar: Bar) -> Result<BarOutcome, EngineError> {
        // 1. Input validation: bad bars are dropped, never fatal.
        if let Err(err) = bar.validate() {
            warn!(error = %err, "rejecting invalid bar");
            return Ok(BarOutcome::rejected());
        }
        if let Some(last) = self.last_bar_ts {
            if bar.timestamp <= last {
                warn!(ts = %bar.timestamp, last = %last, "rejecting out-of-order bar");
                return Ok(BarOutcome::rejected());
            }
        }
        self.last_bar_ts = Some(bar.timestamp);
        self.last_close = Some(bar.close);

        // 2. Session rollover, driven by the calendar's session date.
        let session = self.calendar.session_date(bar.timestamp);
        if self.risk.session_date() != Some(session) {
            self.roll_session(session)?;
        }

        // 3. Stats update. Always runs, even while the market is closed, so
        //    the window stays calibrated across gaps. Numerical faults are
        //    fatal.
        let z = self.stats.update(bar.close)?;

        // 4. Mark the open position and refresh the risk view of it.
        if !self.ledger.is_flat() {
            self.risk.update_mark(self.ledger.mark(bar.close));
        }

        let market_open = self.calendar.is_open(bar.timestamp);

        // 5. Evaluate the signal against the view as of the bar's start, so
        //    a barrier exit on this bar cannot flip into a same-bar re-entry.
        let signal = self.signals.evaluate(&bar, z);

        let mut outcome = BarOutcome {
            signal: Some(signal.clone()),
            ..BarOutcome::default()
        };

        if market_open {
            // 6. Engine-side exits, highest priority first: protective
            //    barriers, then halt flatten, then the duration cap, then
            //    the z-exit carried by the signal.
            if self.state.open_side().is_some() {
                if let Some((reason, level)) = self.barrier_hit(&bar) {
                    outcome.closed_trade = self.flatten(reason, level, bar.timestamp, z).await?;
                } else if self.risk.is_halted() {
                    outcome.closed_trade = self
                        .flatten(CloseReason::RiskHalt, bar.close, bar.timestamp, z)
                        .await?;
                } else if self.risk.check_duration(bar.timestamp) {
                    outcome.closed_trade = self
                        .flatten(CloseReason::DurationCap, bar.close, bar.timestamp, z)
                        .await?;
                } else if signal.kind.is_exit() {
                    outcome.closed_trade = self
                        .flatten(CloseReason::ZExit, bar.close, bar.timestamp, z)
                        .await?;
                }
            }

            // 7. Gated entry.
            if signal.kind.is_entry() && self.state == EngineState::Idle {
                match self.risk.can_trade(bar.timestamp) {
                    Decision::Allow => {
                        outcome.opened = self.enter(&signal, &bar, z).await?;
                    }
                    Decision::Deny(reason) => {
                        debug!(signal = %signal.kind, reason = %reason, "entry suppressed");
                        outcome.suppressed = Some(reason.to_string());
                        self.alerts.notify(
                            AlertKind::CircuitBreaker,
                            json!({ "signal": signal.kind.to_string(), "reason": reason.to_string() }),
                        );
                    }
                }
            }
        } else if signal.kind.is_entry() || signal.kind.is_exit() {
            outcome.suppressed = Some("MarketClosed".to_string());
        }

        // 8. Persist: one signal row per bar, durable before the bar is
        //    acknowledged. Trade rows were appended inside flatten().
        self.store
            .append_signal(&signal, outcome.suppressed.as_deref())?;

        self.bars_since_snapshot += 1;
        let transitioned = outcome.opened || outcome.closed_trade.is_some();
        if transitioned || self.bars_since_snapshot >= self.config.execution.snapshot_every_bars {
            self.write_snapshot()?;
        }

        Ok(outcome)
    }

    /// Stop/take detection against the bar's range. When both levels are
    /// inside the range the configured tie-break decides; the default
    /// assumes the stop traded first.
    fn barrier_hit(&self, bar: &Bar) -> Option<(CloseReason, f64)> {
        let position = self.ledger.position()?;
        let (stop_hit, take_hit) = match position.side {
            Side::Long => (
                bar.low <= position.stop_price,
                bar.high >= position.take_price,
            ),
            Side::Short => (
                bar.high >= position.stop_price,
                bar.low <= position.take_price,
            ),
        };
        use crate::config::StopTakeTieBreak;
        match (stop_hit, take_hit) {
            (true, true) => match self.config.backtest.stop_take_tiebreak {
                StopTakeTieBreak::StopFirst => {
                    Some((CloseReason::StopLoss, position.stop_price))
                }
                StopTakeTieBreak::TakeFirst => {
                    Some((CloseReason::TakeProfit, position.take_price))
                }
            },
            (true, false) => Some((CloseReason::StopLoss, position.stop_price)),
            (false, true) => Some((CloseReason::TakeProfit, position.take_price)),
            (false, false) => None,
        }
    }

    // -------------------------------------------------------------------------
    // Order round trips
    // -------------------------------------------------------------------------

    async fn enter(&mut self, signal: &Signal, bar: &Bar, z: Option<f64>) -> Result<bool, EngineError> {
        let side = match signal.kind {
            SignalKind::EnterLong => Side::Long,
            SignalKind::EnterShort => Side::Short,
            _ => return Ok(false),
        };
        let action = match side {
            Side::Long => OrderAction::Buy,
            Side::Short => OrderAction::Sell,
        };
        let size = self.config.execution.order_size;

        let intent = OrderIntent {
            symbol: self.config.symbol.clone(),
            action,
            size,
            price_hint: bar.close,
            time_hint: bar.timestamp,
        };

        let id = match self.broker.place_market_order(intent).await {
            Ok(id) => id,
            Err(err) => {
                self.handle_broker_fault(&err, bar.timestamp);
                return Ok(false);
            }
        };
        self.state = EngineState::Entering { side, intent: id };

        let fill = match self.await_fill_with_timeout(id).await {
            Ok(fill) => fill,
            Err(err) => {
                // Unresolved entry: cancel the intent and halt the session.
                let _ = self.broker.cancel(id).await;
                self.state = EngineState::Idle;
                self.halt_on_timeout(&err);
                return Ok(false);
            }
        };

        // Barrier levels derive from the fill, not the signal price, so
        // slippage cannot silently widen the protective stop. The configured
        // amounts are currency; dividing by P&L-per-point converts to points.
        let pnl_per_point = self.config.execution.contract_multiplier * size as f64;
        let stop_offset = self.config.risk.stop_loss_amount / pnl_per_point;
        let take_offset = self.config.risk.take_profit_amount / pnl_per_point;
        let (stop_price, take_price) = match side {
            Side::Long => (fill.price - stop_offset, fill.price + take_offset),
            Side::Short => (fill.price + stop_offset, fill.price - take_offset),
        };

        let position = Position {
            side,
            size,
            entry_time: fill.time,
            entry_price: fill.price,
            stop_price,
            take_price,
            max_duration_secs: self.config.risk.max_position_duration_secs,
            z_on_entry: z,
        };
        self.ledger.open(position)?;
        self.risk.note_open(fill.time);
        self.signals.set_position(match side {
            Side::Long => PositionView::Long,
            Side::Short => PositionView::Short,
        });
        self.state = EngineState::Open { side };

        info!(
            side = %side,
            size,
            entry_price = fill.price,
            stop_price,
            take_price,
            z = ?z,
            "entered position"
        );
        self.alerts.notify(
            AlertKind::TradeEntry,
            json!({ "side": side.to_string(), "size": size, "price": fill.price, "z": z }),
        );
        Ok(true)
    }

    async fn flatten(
        &mut self,
        reason: CloseReason,
        price_hint: f64,
        time: DateTime<Utc>,
        z: Option<f64>,
    ) -> Result<Option<Trade>, EngineError> {
        let Some(side) = self.state.open_side() else {
            return Ok(None);
        };
        let Some(position) = self.ledger.position() else {
            return Ok(None);
        };
        let action = match side {
            Side::Long => OrderAction::Sell,
            Side::Short => OrderAction::Buy,
        };
        let size = position.size;

        let intent = OrderIntent {
            symbol: self.config.symbol.clone(),
            action,
            size,
            price_hint,
            time_hint: time,
        };
        let id = match self.broker.place_market_order(intent).await {
            Ok(id) => id,
            Err(err) => {
                // The position survives; retry on the next bar.
                self.handle_broker_fault(&err, time);
                return Ok(None);
            }
        };
        self.state = EngineState::Exiting { side, intent: id };

        let fill = match self.await_fill_with_timeout(id).await {
            Ok(fill) => fill,
            Err(err) => {
                // Position state at the broker is unknown: halt, keep the
                // position on the books, let reconciliation resolve it.
                self.state = EngineState::Open { side };
                self.halt_on_timeout(&err);
                return Ok(None);
            }
        };

        let trade = self.ledger.close(fill.price, fill.time, reason, z)?;
        self.risk.record(&trade);
        self.risk.note_close();
        self.signals.set_position(PositionView::Flat);
        self.state = EngineState::Idle;
        self.store.append_trade(&trade)?;

        self.alerts.notify(
            AlertKind::TradeExit,
            json!({
                "side": trade.side.to_string(),
                "price": trade.exit_price,
                "pnl": trade.realized_pnl,
                "reason": reason.to_string(),
            }),
        );
        Ok(Some(trade))
    }

    async fn await_fill_with_timeout(&self, intent: IntentId) -> Result<Fill, BrokerError> {
        let timeout =
            std::time::Duration::from_secs(self.config.execution.broker_fill_timeout_secs);
        match tokio::time::timeout(timeout, self.broker.await_fill(intent)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout),
        }
    }

    fn halt_on_timeout(&mut self, err: &BrokerError) {
        warn!(error = %err, "fill not resolved, halting session");
        self.risk.halt("BrokerTimeout");
        self.alerts.notify(
            AlertKind::BrokerFault,
            json!({ "event": "fill_timeout", "error": err.to_string() }),
        );
    }

    /// Operator kill switch. Entries stop immediately; an open position is
    /// flattened with reason `RiskHalt` on the next bar. The halt is sticky:
    /// it survives session rollover until `clear_halt`.
    pub fn halt(&mut self, reason: impl Into<String>) {
        self.risk.halt_sticky(reason);
    }

    /// Operator action: lift any halt and resume trading.
    pub fn clear_halt(&mut self) {
        self.risk.clear_halt();
    }

    /// Pre-load the rolling window from historical closes (oldest first)
    /// without generating signals. The walk-forward evaluator seeds each
    /// fold's window from its reference slice this way.
    pub fn seed_window(&mut self, closes: &[f64]) -> Result<(), CoreError> {
        self.stats.seed(closes)
    }

    fn handle_broker_fault(&mut self, err: &BrokerError, now: DateTime<Utc>) {
        if err.is_transient() {
            warn!(error = %err, "transient broker fault, backing off");
            self.risk
                .impose_cooldown(now + Duration::seconds(BROKER_BACKOFF_SECS));
        } else {
            warn!(error = %err, "permanent broker fault, halting until operator intervenes");
            self.risk.halt_sticky("BrokerUnavailable");
        }
        self.alerts.notify(
            AlertKind::BrokerFault,
            json!({ "error": err.to_string(), "transient": err.is_transient() }),
        );
    }

    // -------------------------------------------------------------------------
    // Session rollover
    // -------------------------------------------------------------------------

    fn roll_session(&mut self, session: chrono::NaiveDate) -> Result<(), EngineError> {
        if let Some(prev) = self.risk.session_date() {
            let state = self.risk.state();
            let summary = DailySummary {
                date: prev,
                trades: state.trades,
                wins: state.wins,
                losses: state.losses,
                pnl: state.session_realized_pnl,
                max_drawdown: state.max_drawdown,
            };
            self.store.append_daily_summary(&summary)?;
            self.alerts.notify(
                AlertKind::DailySummary,
                json!({
                    "date": prev.to_string(),
                    "trades": summary.trades,
                    "pnl": summary.pnl,
                }),
            );
        }
        self.risk.reset_daily(session);
        Ok(())
    }

    fn write_snapshot(&mut self) -> Result<(), StoreError> {
        self.store.append_snapshot(&self.snapshot())?;
        self.bars_since_snapshot = 0;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Flatten any open position, persist a final snapshot, and disconnect.
    /// A flatten that cannot confirm within the shutdown timeout escalates
    /// to a session halt recorded in the store.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        if self.state.open_side().is_some() {
            let price = self
                .last_close
                .or_else(|| self.ledger.position().map(|p| p.entry_price))
                .unwrap_or(0.0);
            let time = self.last_bar_ts.unwrap_or_else(Utc::now);

            let timeout = std::time::Duration::from_secs(
                self.config.execution.shutdown_flatten_timeout_secs,
            );
            let flattened = tokio::time::timeout(
                timeout,
                self.flatten(CloseReason::ForceFlatten, price, time, None),
            )
            .await;

            match flattened {
                Ok(Ok(Some(trade))) => {
                    info!(pnl = trade.realized_pnl, "position flattened on shutdown");
                }
                Ok(Ok(None)) | Ok(Err(_)) | Err(_) => {
                    warn!("shutdown flatten did not confirm, escalating");
                    self.risk.halt("ForceFlatten");
                    self.alerts.notify(
                        AlertKind::BrokerFault,
                        json!({ "event": "shutdown_flatten_timeout" }),
                    );
                }
            }
        }

        self.write_snapshot()?;
        self.broker.disconnect().await?;
        self.alerts.notify(
            AlertKind::Shutdown,
            json!({ "symbol": self.config.symbol, "session_pnl": self.risk.session_pnl() }),
        );
        Ok(())
    }
}
