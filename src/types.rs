// =============================================================================
// Shared types used across the Borealis trading core
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Bars
// ---------------------------------------------------------------------------

/// A single OHLCV bar on the configured timeframe.
///
/// Timestamps are UTC and refer to the bar close. Within a stream they must
/// be strictly increasing; the engine rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Validate the OHLC invariant and field sanity.
    ///
    /// Rules:
    /// - all four prices finite and strictly positive
    /// - `low <= min(open, close)` and `max(open, close) <= high`
    pub fn validate(&self) -> Result<(), CoreError> {
        for price in [self.open, self.high, self.low, self.close] {
            if !price.is_finite() {
                return Err(CoreError::NonFinitePrice(price));
            }
            if price <= 0.0 {
                return Err(CoreError::InvalidBar(format!(
                    "non-positive price {price} at {}",
                    self.timestamp
                )));
            }
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || self.high < body_high {
            return Err(CoreError::InvalidBar(format!(
                "OHLC ordering violated at {}: o={} h={} l={} c={}",
                self.timestamp, self.open, self.high, self.low, self.close
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sides and position view
// ---------------------------------------------------------------------------

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short. Used in P&L arithmetic.
    pub fn direction(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// The signal generator's view of the engine position. Pushed by the engine
/// on every transition so that the generator never queries broker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionView {
    #[default]
    Flat,
    Long,
    Short,
}

impl std::fmt::Display for PositionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "Flat"),
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// What the signal generator wants the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
    Hold,
}

impl SignalKind {
    pub fn is_entry(self) -> bool {
        matches!(self, Self::EnterLong | Self::EnterShort)
    }

    pub fn is_exit(self) -> bool {
        matches!(self, Self::ExitLong | Self::ExitShort)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnterLong => write!(f, "EnterLong"),
            Self::EnterShort => write!(f, "EnterShort"),
            Self::ExitLong => write!(f, "ExitLong"),
            Self::ExitShort => write!(f, "ExitShort"),
            Self::Hold => write!(f, "Hold"),
        }
    }
}

/// A signal together with the bar context that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub time: DateTime<Utc>,
    pub price: f64,
    /// Post-update Z-score; `None` while the rolling window is warming up.
    pub z: Option<f64>,
    pub volume: u64,
}

impl Signal {
    pub fn hold(time: DateTime<Utc>, price: f64, z: Option<f64>, volume: u64) -> Self {
        Self {
            kind: SignalKind::Hold,
            time,
            price,
            z,
            volume,
        }
    }
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Z-score reverted through the exit threshold.
    ZExit,
    StopLoss,
    TakeProfit,
    /// Position exceeded the maximum holding duration.
    DurationCap,
    /// Flattened outside normal signal flow (shutdown, reconciliation).
    ForceFlatten,
    /// Closed because a risk halt fired while the position was open.
    RiskHalt,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZExit => write!(f, "ZExit"),
            Self::StopLoss => write!(f, "StopLoss"),
            Self::TakeProfit => write!(f, "TakeProfit"),
            Self::DurationCap => write!(f, "DurationCap"),
            Self::ForceFlatten => write!(f, "ForceFlatten"),
            Self::RiskHalt => write!(f, "RiskHalt"),
        }
    }
}

impl std::str::FromStr for CloseReason {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ZExit" => Ok(Self::ZExit),
            "StopLoss" => Ok(Self::StopLoss),
            "TakeProfit" => Ok(Self::TakeProfit),
            "DurationCap" => Ok(Self::DurationCap),
            "ForceFlatten" => Ok(Self::ForceFlatten),
            "RiskHalt" => Ok(Self::RiskHalt),
            other => Err(CoreError::InvalidBar(format!("unknown close reason {other}"))),
        }
    }
}

/// A fully closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub side: Side,
    pub size: u32,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub z_on_entry: Option<f64>,
    pub z_on_exit: Option<f64>,
    pub reason: CloseReason,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.realized_pnl >= 0.0
    }
}

// ---------------------------------------------------------------------------
// Core error taxonomy
// ---------------------------------------------------------------------------

/// Failures raised by the pure core (stats, signal, ledger, risk).
///
/// Input-validation errors are benign: the engine drops the bar and logs.
/// `Numerical` is fatal: the engine halts rather than trade on garbage.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("non-finite price: {0}")]
    NonFinitePrice(f64),

    #[error("invalid bar: {0}")]
    InvalidBar(String),

    #[error("bar out of order: {ts} is not after {last}")]
    OutOfOrderBar {
        ts: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("lookback must be at least 2, got {0}")]
    LookbackTooSmall(usize),

    #[error("a position is already open")]
    PositionAlreadyOpen,

    #[error("no open position")]
    NoOpenPosition,

    #[error("numerical fault: {0}")]
    Numerical(String),
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 100,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(bar(100.0, 101.0, 99.0, 100.5).validate().is_ok());
        // Degenerate but legal: all prices equal.
        assert!(bar(100.0, 100.0, 100.0, 100.0).validate().is_ok());
    }

    #[test]
    fn high_below_body_rejected() {
        let err = bar(100.0, 100.2, 99.0, 100.5).validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidBar(_)));
    }

    #[test]
    fn low_above_body_rejected() {
        assert!(bar(100.0, 101.0, 100.4, 100.2).validate().is_err());
    }

    #[test]
    fn non_finite_price_rejected() {
        let err = bar(f64::NAN, 101.0, 99.0, 100.0).validate().unwrap_err();
        assert!(matches!(err, CoreError::NonFinitePrice(_)));
        assert!(bar(100.0, f64::INFINITY, 99.0, 100.0).validate().is_err());
    }

    #[test]
    fn non_positive_price_rejected() {
        assert!(bar(0.0, 101.0, 99.0, 100.0).validate().is_err());
        assert!(bar(100.0, 101.0, -1.0, 100.0).validate().is_err());
    }

    #[test]
    fn side_direction_and_flip() {
        assert_eq!(Side::Long.direction(), 1.0);
        assert_eq!(Side::Short.direction(), -1.0);
        assert_eq!(Side::Long.flip(), Side::Short);
        assert_eq!(Side::Short.flip(), Side::Long);
    }

    #[test]
    fn signal_kind_classification() {
        assert!(SignalKind::EnterLong.is_entry());
        assert!(SignalKind::EnterShort.is_entry());
        assert!(SignalKind::ExitLong.is_exit());
        assert!(SignalKind::ExitShort.is_exit());
        assert!(!SignalKind::Hold.is_entry());
        assert!(!SignalKind::Hold.is_exit());
    }

    #[test]
    fn close_reason_roundtrips_through_str() {
        for reason in [
            CloseReason::ZExit,
            CloseReason::StopLoss,
            CloseReason::TakeProfit,
            CloseReason::DurationCap,
            CloseReason::ForceFlatten,
            CloseReason::RiskHalt,
        ] {
            let parsed: CloseReason = reason.to_string().parse().unwrap();
            assert_eq!(parsed, reason);
        }
    }
}
