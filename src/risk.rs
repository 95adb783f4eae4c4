// =============================================================================
// Risk Gate — layered circuit breakers protecting capital
// =============================================================================
//
// Breakers, in the order they are consulted:
//   1. Halted             — a halt is in force (risk or broker fault).
//   2. Daily Loss         — session P&L (realized + open mark) breached the
//                           maximum daily loss.
//   3. Cooldown           — an externally imposed pause is still running.
//   4. Daily Trade Cap    — session trade count reached the cap.
//   5. Consecutive Losses — the loss streak triggered its cooldown window.
//   6. Exposure           — a position is already open (one at a time).
//
// A deny is never an error: the engine suppresses the intent, records the
// reason, and carries on. Session halts persist until `reset_daily` rolls
// the session date; sticky halts (broker-permanent, operator kill) survive
// the rollover and stay until an operator clears them.
// =============================================================================

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::Trade;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Risk limits supplied from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    /// Maximum cumulative session loss in P&L currency units (positive).
    pub max_daily_loss: f64,
    /// Loss streak length that triggers the cooldown.
    pub max_consecutive_losses: u32,
    /// Cooldown length in seconds after the loss streak trips.
    pub cooldown_secs: i64,
    /// Maximum closed trades per session.
    pub max_daily_trades: u32,
    /// Maximum holding time for a single position, in seconds.
    pub max_position_duration_secs: i64,
    /// Protective stop distance in P&L currency units per position.
    pub stop_loss_amount: f64,
    /// Profit target distance in P&L currency units per position.
    pub take_profit_amount: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            max_daily_loss: 500.0,
            max_consecutive_losses: 3,
            cooldown_secs: 30 * 60,
            max_daily_trades: 20,
            max_position_duration_secs: 2 * 3600,
            stop_loss_amount: 150.0,
            take_profit_amount: 300.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Why an intent was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    Halted,
    DailyLoss,
    Cooldown,
    DailyTradeCap,
    ConsecutiveLosses,
    /// A position is already open; the core trades one at a time.
    ExposureCap,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Halted => write!(f, "Halted"),
            Self::DailyLoss => write!(f, "DailyLoss"),
            Self::Cooldown => write!(f, "Cooldown"),
            Self::DailyTradeCap => write!(f, "DailyTradeCap"),
            Self::ConsecutiveLosses => write!(f, "ConsecutiveLosses"),
            Self::ExposureCap => write!(f, "ExposureCap"),
        }
    }
}

/// Pre-trade verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Which mechanism armed the active cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CooldownSource {
    /// Set automatically when the loss streak trips.
    LossStreak,
    /// Imposed by the engine (e.g. broker reconnect backoff).
    External,
}

/// An active trading halt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Halt {
    pub reason: String,
    /// Sticky halts survive `reset_daily`; only an operator clears them.
    pub sticky: bool,
}

/// Serialisable risk state, embedded in engine snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub session_date: Option<NaiveDate>,
    /// Realized P&L of closed trades within the session.
    pub session_realized_pnl: f64,
    /// Mark-to-market of the open position, refreshed every bar.
    pub open_position_mark: f64,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub cooldown_source: Option<CooldownSource>,
    pub open_position_entry_time: Option<DateTime<Utc>>,
    pub halted: Option<Halt>,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    /// Running peak of session P&L, for drawdown accounting in P&L units.
    pub peak_session_pnl: f64,
    pub max_drawdown: f64,
}

impl Default for RiskState {
    fn default() -> Self {
        Self {
            session_date: None,
            session_realized_pnl: 0.0,
            open_position_mark: 0.0,
            consecutive_losses: 0,
            cooldown_until: None,
            cooldown_source: None,
            open_position_entry_time: None,
            halted: None,
            trades: 0,
            wins: 0,
            losses: 0,
            peak_session_pnl: 0.0,
            max_drawdown: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk Gate
// ---------------------------------------------------------------------------

/// Pre-trade predicate plus post-trade accounting for one session.
#[derive(Debug, Clone)]
pub struct RiskGate {
    params: RiskParams,
    state: RiskState,
}

impl RiskGate {
    pub fn new(params: RiskParams) -> Self {
        Self {
            params,
            state: RiskState::default(),
        }
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn session_date(&self) -> Option<NaiveDate> {
        self.state.session_date
    }

    /// Session P&L: realized plus the open position's mark.
    pub fn session_pnl(&self) -> f64 {
        self.state.session_realized_pnl + self.state.open_position_mark
    }

    // -------------------------------------------------------------------------
    // Pre-trade gate
    // -------------------------------------------------------------------------

    /// Check whether a new entry may be submitted at `now`.
    ///
    /// Checks run in strict precedence order; the first breached breaker
    /// names the deny reason. The two cooldown flavours sit at different
    /// ranks: an external pause outranks the trade cap, the loss-streak
    /// window ranks below it.
    pub fn can_trade(&self, now: DateTime<Utc>) -> Decision {
        if self.state.halted.is_some() {
            return Decision::Deny(DenyReason::Halted);
        }

        if self.session_pnl() <= -self.params.max_daily_loss {
            return Decision::Deny(DenyReason::DailyLoss);
        }

        let cooldown_active = self
            .state
            .cooldown_until
            .is_some_and(|until| now < until);

        if cooldown_active && self.state.cooldown_source == Some(CooldownSource::External) {
            return Decision::Deny(DenyReason::Cooldown);
        }

        if self.state.trades >= self.params.max_daily_trades {
            return Decision::Deny(DenyReason::DailyTradeCap);
        }

        if cooldown_active {
            return Decision::Deny(DenyReason::ConsecutiveLosses);
        }

        if self.state.open_position_entry_time.is_some() {
            return Decision::Deny(DenyReason::ExposureCap);
        }

        Decision::Allow
    }

    // -------------------------------------------------------------------------
    // Post-trade accounting
    // -------------------------------------------------------------------------

    /// Record a closed trade: session P&L, streak, counters, drawdown.
    /// Arms the loss-streak cooldown when the streak reaches its limit.
    pub fn record(&mut self, trade: &Trade) {
        self.state.session_realized_pnl += trade.realized_pnl;
        self.state.trades += 1;

        if trade.is_win() {
            self.state.wins += 1;
            self.state.consecutive_losses = 0;
        } else {
            self.state.losses += 1;
            self.state.consecutive_losses += 1;

            if self.state.consecutive_losses >= self.params.max_consecutive_losses {
                let until = trade.close_time + Duration::seconds(self.params.cooldown_secs);
                self.state.cooldown_until = Some(until);
                self.state.cooldown_source = Some(CooldownSource::LossStreak);
                warn!(
                    consecutive_losses = self.state.consecutive_losses,
                    cooldown_until = %until,
                    "loss streak tripped, cooldown armed"
                );
            }
        }

        // Drawdown in P&L units over the session equity path.
        if self.state.session_realized_pnl > self.state.peak_session_pnl {
            self.state.peak_session_pnl = self.state.session_realized_pnl;
        }
        let drawdown = self.state.peak_session_pnl - self.state.session_realized_pnl;
        if drawdown > self.state.max_drawdown {
            self.state.max_drawdown = drawdown;
        }

        debug!(
            pnl = trade.realized_pnl,
            session_pnl = self.state.session_realized_pnl,
            consecutive_losses = self.state.consecutive_losses,
            trades = self.state.trades,
            "trade recorded"
        );
    }

    /// Refresh the open position's mark-to-market, so the daily-loss breaker
    /// sees unrealized losses too.
    pub fn update_mark(&mut self, unrealized_pnl: f64) {
        self.state.open_position_mark = unrealized_pnl;
    }

    /// Note that a position was opened at `entry_time`.
    pub fn note_open(&mut self, entry_time: DateTime<Utc>) {
        self.state.open_position_entry_time = Some(entry_time);
    }

    /// Note that the position was closed.
    pub fn note_close(&mut self) {
        self.state.open_position_entry_time = None;
        self.state.open_position_mark = 0.0;
    }

    /// True if the open position has exceeded the maximum holding time.
    pub fn check_duration(&self, now: DateTime<Utc>) -> bool {
        match self.state.open_position_entry_time {
            Some(entry) => {
                now - entry > Duration::seconds(self.params.max_position_duration_secs)
            }
            None => false,
        }
    }

    // -------------------------------------------------------------------------
    // Halts and cooldowns
    // -------------------------------------------------------------------------

    /// Halt trading for the rest of the session. Cleared by `reset_daily`.
    pub fn halt(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "session risk halt engaged");
        self.state.halted = Some(Halt {
            reason,
            sticky: false,
        });
    }

    /// Halt trading until an operator intervenes. Survives `reset_daily`;
    /// used for permanent broker faults and the kill switch.
    pub fn halt_sticky(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "sticky risk halt engaged, operator required");
        self.state.halted = Some(Halt {
            reason,
            sticky: true,
        });
    }

    /// Operator action: lift any halt, sticky or not.
    pub fn clear_halt(&mut self) {
        if let Some(halt) = self.state.halted.take() {
            warn!(reason = %halt.reason, sticky = halt.sticky, "risk halt cleared by operator");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.state.halted.as_ref().map(|h| h.reason.as_str())
    }

    /// Impose a cooldown from outside the loss-streak path (broker backoff).
    pub fn impose_cooldown(&mut self, until: DateTime<Utc>) {
        info!(until = %until, "external cooldown imposed");
        self.state.cooldown_until = Some(until);
        self.state.cooldown_source = Some(CooldownSource::External);
    }

    // -------------------------------------------------------------------------
    // Session rollover
    // -------------------------------------------------------------------------

    /// Roll the session over to `date`: zero counters, clear cooldown and
    /// session halts. The open-position marker survives — a position held
    /// across the boundary is still open — and a sticky halt stays in force
    /// until an operator clears it.
    pub fn reset_daily(&mut self, date: NaiveDate) {
        info!(
            old_date = ?self.state.session_date,
            new_date = %date,
            "session risk counters reset"
        );
        let open_entry = self.state.open_position_entry_time;
        let sticky_halt = self.state.halted.take().filter(|h| h.sticky);
        self.state = RiskState {
            session_date: Some(date),
            open_position_entry_time: open_entry,
            halted: sticky_halt,
            ..RiskState::default()
        };
    }

    /// Restore state from a persisted snapshot.
    pub fn restore(&mut self, state: RiskState) {
        self.state = state;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseReason, Side, Trade};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap()
    }

    fn params() -> RiskParams {
        RiskParams {
            max_daily_loss: 500.0,
            max_consecutive_losses: 3,
            cooldown_secs: 30 * 60,
            max_daily_trades: 10,
            max_position_duration_secs: 2 * 3600,
            stop_loss_amount: 150.0,
            take_profit_amount: 300.0,
        }
    }

    fn trade_with_pnl(pnl: f64, close_time: DateTime<Utc>) -> Trade {
        Trade {
            open_time: close_time - Duration::minutes(10),
            close_time,
            side: Side::Long,
            size: 1,
            entry_price: 6000.0,
            exit_price: 6000.0 + pnl / 5.0,
            realized_pnl: pnl,
            z_on_entry: Some(-2.1),
            z_on_exit: Some(0.0),
            reason: CloseReason::ZExit,
        }
    }

    #[test]
    fn clean_state_allows() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());
        assert_eq!(gate.can_trade(t0()), Decision::Allow);
    }

    #[test]
    fn consecutive_losses_arm_cooldown() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        for i in 0..3 {
            gate.record(&trade_with_pnl(-50.0, t0() + Duration::minutes(i)));
        }

        // Denied for the duration of the cooldown, allowed after. The third
        // loss closed at t0+2m, so the window runs to t0+32m.
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(12)),
            Decision::Deny(DenyReason::ConsecutiveLosses)
        );
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(33)),
            Decision::Allow
        );
    }

    #[test]
    fn win_resets_loss_streak() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.record(&trade_with_pnl(-50.0, t0()));
        gate.record(&trade_with_pnl(-50.0, t0() + Duration::minutes(1)));
        gate.record(&trade_with_pnl(25.0, t0() + Duration::minutes(2)));
        assert_eq!(gate.state().consecutive_losses, 0);

        gate.record(&trade_with_pnl(-50.0, t0() + Duration::minutes(3)));
        assert_eq!(gate.state().consecutive_losses, 1);
        assert_eq!(gate.can_trade(t0() + Duration::minutes(4)), Decision::Allow);
    }

    #[test]
    fn daily_loss_denies_for_session_regardless_of_wins() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.record(&trade_with_pnl(-200.0, t0()));
        gate.record(&trade_with_pnl(-200.0, t0() + Duration::minutes(2)));
        assert_eq!(gate.can_trade(t0() + Duration::minutes(3)), Decision::Allow);

        gate.record(&trade_with_pnl(-200.0, t0() + Duration::minutes(4)));
        assert!(gate.session_pnl() <= -500.0);
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(5)),
            Decision::Deny(DenyReason::DailyLoss)
        );

        // A small win does not lift the deny while the session is still
        // beyond the limit.
        gate.record(&trade_with_pnl(10.0, t0() + Duration::minutes(6)));
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(7)),
            Decision::Deny(DenyReason::DailyLoss)
        );
    }

    #[test]
    fn unrealized_losses_count_toward_daily_loss() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.record(&trade_with_pnl(-300.0, t0()));
        assert_eq!(gate.can_trade(t0() + Duration::minutes(1)), Decision::Allow);

        gate.update_mark(-250.0);
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(2)),
            Decision::Deny(DenyReason::DailyLoss)
        );

        gate.update_mark(0.0);
        assert_eq!(gate.can_trade(t0() + Duration::minutes(3)), Decision::Allow);
    }

    #[test]
    fn trade_cap_denies() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        for i in 0..10 {
            gate.record(&trade_with_pnl(10.0, t0() + Duration::minutes(i)));
        }
        assert_eq!(
            gate.can_trade(t0() + Duration::hours(1)),
            Decision::Deny(DenyReason::DailyTradeCap)
        );
    }

    #[test]
    fn loss_streak_cooldown_ranks_below_trade_cap() {
        let mut gate = RiskGate::new(RiskParams {
            max_daily_trades: 3,
            ..params()
        });
        gate.reset_daily(t0().date_naive());

        // Three losses arm the streak cooldown and exhaust the trade cap
        // at the same time; the cap outranks the streak.
        for i in 0..3 {
            gate.record(&trade_with_pnl(-50.0, t0() + Duration::minutes(i)));
        }
        assert!(gate.state().cooldown_until.is_some());
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(10)),
            Decision::Deny(DenyReason::DailyTradeCap)
        );
        // Once the cooldown lapses the cap still holds.
        assert_eq!(
            gate.can_trade(t0() + Duration::hours(2)),
            Decision::Deny(DenyReason::DailyTradeCap)
        );
    }

    #[test]
    fn external_cooldown_outranks_trade_cap() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        for i in 0..10 {
            gate.record(&trade_with_pnl(10.0, t0() + Duration::minutes(i)));
        }
        gate.impose_cooldown(t0() + Duration::hours(1));

        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(30)),
            Decision::Deny(DenyReason::Cooldown)
        );
        assert_eq!(
            gate.can_trade(t0() + Duration::hours(2)),
            Decision::Deny(DenyReason::DailyTradeCap)
        );
    }

    #[test]
    fn exposure_cap_denies_second_entry() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.note_open(t0());
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(1)),
            Decision::Deny(DenyReason::ExposureCap)
        );
        gate.note_close();
        assert_eq!(gate.can_trade(t0() + Duration::minutes(2)), Decision::Allow);
    }

    #[test]
    fn halt_outranks_everything_and_persists() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.halt("BrokerTimeout");
        gate.record(&trade_with_pnl(-600.0, t0()));
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(1)),
            Decision::Deny(DenyReason::Halted)
        );
        assert_eq!(gate.halt_reason(), Some("BrokerTimeout"));
    }

    #[test]
    fn external_cooldown_reports_cooldown_reason() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.impose_cooldown(t0() + Duration::minutes(5));
        assert_eq!(
            gate.can_trade(t0() + Duration::minutes(1)),
            Decision::Deny(DenyReason::Cooldown)
        );
        assert_eq!(gate.can_trade(t0() + Duration::minutes(6)), Decision::Allow);
    }

    #[test]
    fn duration_cap_predicate() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        assert!(!gate.check_duration(t0() + Duration::hours(5)));
        gate.note_open(t0());
        assert!(!gate.check_duration(t0() + Duration::hours(2)));
        assert!(gate.check_duration(t0() + Duration::hours(2) + Duration::seconds(1)));
    }

    #[test]
    fn reset_daily_restores_clean_state() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        for i in 0..3 {
            gate.record(&trade_with_pnl(-250.0, t0() + Duration::minutes(i)));
        }
        gate.halt("DailyLoss");
        assert!(!gate.can_trade(t0() + Duration::minutes(10)).is_allowed());

        let next = t0().date_naive().succ_opt().unwrap();
        gate.reset_daily(next);
        assert_eq!(gate.session_pnl(), 0.0);
        assert_eq!(gate.state().consecutive_losses, 0);
        assert_eq!(gate.state().cooldown_until, None);
        assert!(!gate.is_halted());
        assert_eq!(gate.can_trade(t0() + Duration::days(1)), Decision::Allow);
    }

    #[test]
    fn sticky_halt_survives_daily_reset() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.halt_sticky("BrokerUnavailable");
        let next = t0().date_naive().succ_opt().unwrap();
        gate.reset_daily(next);

        // Still halted after the rollover; only the operator clears it.
        assert!(gate.is_halted());
        assert_eq!(gate.halt_reason(), Some("BrokerUnavailable"));
        assert_eq!(
            gate.can_trade(t0() + Duration::days(1)),
            Decision::Deny(DenyReason::Halted)
        );

        gate.clear_halt();
        assert!(!gate.is_halted());
        assert_eq!(gate.can_trade(t0() + Duration::days(1)), Decision::Allow);
    }

    #[test]
    fn drawdown_tracked_in_pnl_units() {
        let mut gate = RiskGate::new(params());
        gate.reset_daily(t0().date_naive());

        gate.record(&trade_with_pnl(100.0, t0()));
        gate.record(&trade_with_pnl(-150.0, t0() + Duration::minutes(1)));
        gate.record(&trade_with_pnl(50.0, t0() + Duration::minutes(2)));
        assert_eq!(gate.state().max_drawdown, 150.0);
        assert_eq!(gate.state().wins, 2);
        assert_eq!(gate.state().losses, 1);
    }
}
