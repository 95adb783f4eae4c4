// =============================================================================
// Signal Generator — hysteresis state machine on the rolling Z-score
// =============================================================================
//
// Entry uses the wide threshold, exit the narrow one, so the signal stream
// cannot oscillate around a single boundary:
//
//   Flat:   z <= -z_entry  -> EnterLong
//           z >= +z_entry  -> EnterShort
//   Long:   z >= -z_exit   -> ExitLong
//   Short:  z <= +z_exit   -> ExitShort
//
// The generator is a pure function of (z, position view, parameters). The
// engine pushes position transitions in via `set_position`; the generator
// never looks at broker or ledger state, which keeps live and backtest
// signal streams bit-identical over the same bars.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Bar, PositionView, Signal, SignalKind};

/// Entry/exit thresholds and the volume floor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalParams {
    /// Absolute Z at which a fresh position is opened. Must be positive.
    pub z_entry: f64,
    /// Absolute Z at which an open position is closed. Must satisfy
    /// `0 <= z_exit < z_entry` for the hysteresis band to exist.
    pub z_exit: f64,
    /// Bars with less volume than this never generate a signal.
    pub min_volume: u64,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            z_entry: 2.0,
            z_exit: 0.5,
            min_volume: 0,
        }
    }
}

/// Stateless except for the engine-provided position view.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    params: SignalParams,
    view: PositionView,
}

impl SignalGenerator {
    pub fn new(params: SignalParams) -> Self {
        Self {
            params,
            view: PositionView::Flat,
        }
    }

    /// Called by the engine on every position transition.
    pub fn set_position(&mut self, view: PositionView) {
        if view != self.view {
            debug!(from = %self.view, to = %view, "signal generator position view updated");
        }
        self.view = view;
    }

    pub fn position(&self) -> PositionView {
        self.view
    }

    pub fn params(&self) -> &SignalParams {
        &self.params
    }

    /// Evaluate one bar against the post-update Z-score.
    ///
    /// `z` is `None` while the rolling window is still warming up, in which
    /// case the result is always `Hold`.
    pub fn evaluate(&self, bar: &Bar, z: Option<f64>) -> Signal {
        let base = Signal::hold(bar.timestamp, bar.close, z, bar.volume);

        let Some(z) = z else {
            return base;
        };

        if bar.volume < self.params.min_volume {
            debug!(
                volume = bar.volume,
                min_volume = self.params.min_volume,
                "volume below floor, holding"
            );
            return base;
        }

        let kind = match self.view {
            PositionView::Flat => {
                if z <= -self.params.z_entry {
                    SignalKind::EnterLong
                } else if z >= self.params.z_entry {
                    SignalKind::EnterShort
                } else {
                    SignalKind::Hold
                }
            }
            PositionView::Long => {
                if z >= -self.params.z_exit {
                    SignalKind::ExitLong
                } else {
                    SignalKind::Hold
                }
            }
            PositionView::Short => {
                if z <= self.params.z_exit {
                    SignalKind::ExitShort
                } else {
                    SignalKind::Hold
                }
            }
        };

        Signal { kind, ..base }
    }
}
