// =============================================================================
// Position Ledger — the single open position and its P&L accounting
// =============================================================================
//
// The core trades one instrument with at most one open position. The ledger
// owns that position exclusively: the engine opens it on fill confirmation,
// marks it against each bar close, and destroys it into a `Trade` when the
// closing fill arrives.
//
// P&L is signed by side and scaled by the contract point value:
//
//   realized = direction * (exit - entry) * size * multiplier
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{CloseReason, CoreError, Side, Trade};

/// The one open position, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    /// Contracts, always positive.
    pub size: u32,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    /// Protective stop level in price units.
    pub stop_price: f64,
    /// Profit target level in price units.
    pub take_price: f64,
    /// Maximum holding time in seconds before a forced close.
    pub max_duration_secs: i64,
    /// Z-score that triggered the entry, kept for the closed-trade record.
    pub z_on_entry: Option<f64>,
}

impl Position {
    /// Unrealized P&L of this position marked at `price`.
    pub fn unrealized(&self, price: f64, multiplier: f64) -> f64 {
        self.side.direction() * (price - self.entry_price) * self.size as f64 * multiplier
    }

    /// Time the position has been open as of `now`.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.entry_time
    }

    /// True once the position has outlived its duration cap.
    pub fn duration_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.duration(now) > Duration::seconds(self.max_duration_secs)
    }
}

/// Owns the open position and the contract multiplier.
#[derive(Debug, Clone)]
pub struct Ledger {
    multiplier: f64,
    position: Option<Position>,
}

impl Ledger {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier,
            position: None,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Install a freshly filled position. Errors if one is already open —
    /// the single-position invariant is enforced here as well as in the
    /// risk gate.
    pub fn open(&mut self, position: Position) -> Result<(), CoreError> {
        if self.position.is_some() {
            return Err(CoreError::PositionAlreadyOpen);
        }
        info!(
            side = %position.side,
            size = position.size,
            entry_price = position.entry_price,
            stop_price = position.stop_price,
            take_price = position.take_price,
            "position opened"
        );
        self.position = Some(position);
        Ok(())
    }

    /// Close the open position at `price` and return the finished trade.
    pub fn close(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        reason: CloseReason,
        z_on_exit: Option<f64>,
    ) -> Result<Trade, CoreError> {
        let position = self.position.take().ok_or(CoreError::NoOpenPosition)?;

        let realized_pnl = position.unrealized(price, self.multiplier);
        let trade = Trade {
            open_time: position.entry_time,
            close_time: time,
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            exit_price: price,
            realized_pnl,
            z_on_entry: position.z_on_entry,
            z_on_exit,
            reason,
        };

        info!(
            side = %trade.side,
            entry_price = trade.entry_price,
            exit_price = trade.exit_price,
            realized_pnl = trade.realized_pnl,
            reason = %trade.reason,
            "position closed"
        );
        Ok(trade)
    }

    /// Mark the open position to `price`; zero when flat.
    pub fn mark(&self, price: f64) -> f64 {
        self.position
            .as_ref()
            .map(|p| p.unrealized(price, self.multiplier))
            .unwrap_or(0.0)
    }

    /// Restore a position from a snapshot during restart reconciliation.
    pub fn restore(&mut self, position: Option<Position>) {
        self.position = position;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap()
    }

    fn long_position() -> Position {
        Position {
            side: Side::Long,
            size: 1,
            entry_time: t0(),
            entry_price: 6000.0,
            stop_price: 5990.0,
            take_price: 6015.0,
            max_duration_secs: 7200,
            z_on_entry: Some(-2.4),
        }
    }

    #[test]
    fn long_pnl_is_exit_minus_entry() {
        let mut ledger = Ledger::new(5.0);
        ledger.open(long_position()).unwrap();

        let trade = ledger
            .close(6004.0, t0() + Duration::minutes(10), CloseReason::ZExit, Some(-0.2))
            .unwrap();
        // (6004 - 6000) * 1 * 5.0
        assert_eq!(trade.realized_pnl, 20.0);
        assert_eq!(trade.reason, CloseReason::ZExit);
        assert!(ledger.is_flat());
    }

    #[test]
    fn short_pnl_is_entry_minus_exit() {
        let mut ledger = Ledger::new(5.0);
        let position = Position {
            side: Side::Short,
            size: 2,
            ..long_position()
        };
        ledger.open(position).unwrap();

        let trade = ledger
            .close(5995.0, t0() + Duration::minutes(5), CloseReason::TakeProfit, None)
            .unwrap();
        // (6000 - 5995) * 2 * 5.0
        assert_eq!(trade.realized_pnl, 50.0);
    }

    #[test]
    fn losing_long_produces_negative_pnl() {
        let mut ledger = Ledger::new(5.0);
        ledger.open(long_position()).unwrap();
        let trade = ledger
            .close(5995.0, t0() + Duration::minutes(1), CloseReason::StopLoss, Some(-3.0))
            .unwrap();
        assert_eq!(trade.realized_pnl, -25.0);
        assert!(!trade.is_win());
    }

    #[test]
    fn second_open_rejected() {
        let mut ledger = Ledger::new(5.0);
        ledger.open(long_position()).unwrap();
        assert!(matches!(
            ledger.open(long_position()),
            Err(CoreError::PositionAlreadyOpen)
        ));
    }

    #[test]
    fn close_without_position_rejected() {
        let mut ledger = Ledger::new(5.0);
        assert!(matches!(
            ledger.close(6000.0, t0(), CloseReason::ZExit, None),
            Err(CoreError::NoOpenPosition)
        ));
    }

    #[test]
    fn mark_tracks_unrealized() {
        let mut ledger = Ledger::new(5.0);
        assert_eq!(ledger.mark(6000.0), 0.0);
        ledger.open(long_position()).unwrap();
        assert_eq!(ledger.mark(6002.0), 10.0);
        assert_eq!(ledger.mark(5998.0), -10.0);
    }

    #[test]
    fn duration_cap_detection() {
        let position = long_position();
        assert!(!position.duration_exceeded(t0() + Duration::hours(2)));
        assert!(position.duration_exceeded(t0() + Duration::hours(2) + Duration::seconds(1)));
        assert_eq!(
            position.duration(t0() + Duration::minutes(30)),
            Duration::minutes(30)
        );
    }

    #[test]
    fn trade_carries_entry_and_exit_z() {
        let mut ledger = Ledger::new(5.0);
        ledger.open(long_position()).unwrap();
        let trade = ledger
            .close(6001.0, t0() + Duration::minutes(2), CloseReason::ZExit, Some(0.1))
            .unwrap();
        assert_eq!(trade.z_on_entry, Some(-2.4));
        assert_eq!(trade.z_on_exit, Some(0.1));
    }
}
