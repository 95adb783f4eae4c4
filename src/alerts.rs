// =============================================================================
// Alerts — fire-and-forget operator notifications
// =============================================================================
//
// The engine notifies on lifecycle events (startup, shutdown), trade entries
// and exits, circuit-breaker activations, and broker faults. Delivery is a
// side effect: a failing or slow channel must never stall the engine, so the
// trait is synchronous, infallible, and implementations swallow their own
// errors.
// =============================================================================

use serde_json::Value;
use tracing::{info, warn};

/// Notification category, stable across channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Startup,
    Shutdown,
    TradeEntry,
    TradeExit,
    CircuitBreaker,
    BrokerFault,
    DailySummary,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "Startup"),
            Self::Shutdown => write!(f, "Shutdown"),
            Self::TradeEntry => write!(f, "TradeEntry"),
            Self::TradeExit => write!(f, "TradeExit"),
            Self::CircuitBreaker => write!(f, "CircuitBreaker"),
            Self::BrokerFault => write!(f, "BrokerFault"),
            Self::DailySummary => write!(f, "DailySummary"),
        }
    }
}

/// Notification collaborator. Implementations must not block or fail the
/// caller.
pub trait Alerts: Send + Sync {
    fn notify(&self, kind: AlertKind, payload: Value);
}

/// Routes alerts into the structured log. The default channel; external
/// deliveries (chat webhooks, e-mail) plug in behind the same trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerts;

impl Alerts for LogAlerts {
    fn notify(&self, kind: AlertKind, payload: Value) {
        match kind {
            AlertKind::CircuitBreaker | AlertKind::BrokerFault => {
                warn!(kind = %kind, payload = %payload, "alert");
            }
            _ => {
                info!(kind = %kind, payload = %payload, "alert");
            }
        }
    }
}
