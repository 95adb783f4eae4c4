// =============================================================================
// Broker — order routing collaborator and the paper implementation
// =============================================================================
//
// The engine talks to exactly one broker through this trait. Intent IDs are
// idempotency keys: a reconnecting adapter must not double-submit an intent
// it already acknowledged. Fills are pulled by the engine (`await_fill`)
// rather than pushed, which keeps the state machine in control of ordering:
// a fill for an outstanding intent is always applied before the next bar.
//
// `PaperBroker` fills market orders immediately at the caller-supplied
// reference price, offset by configured slippage. It backs both the demo
// live runner and the backtest driver, so simulated and replayed runs share
// one fill model.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Bar, Side};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Idempotency key for one order intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntentId(Uuid);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order direction on the wire (distinct from position side: a SELL both
/// opens shorts and flattens longs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A market order intent.
///
/// `price_hint` and `time_hint` drive simulated fills (the level a stop or
/// take should fill at, and the bar time); live adapters ignore both and
/// report exchange truth.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub symbol: String,
    pub action: OrderAction,
    pub size: u32,
    pub price_hint: f64,
    pub time_hint: DateTime<Utc>,
}

/// A fill for a previously submitted intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub intent: IntentId,
    pub price: f64,
    pub time: DateTime<Utc>,
    pub size: u32,
}

/// Broker-side position truth, used only during restart reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerPosition {
    pub side: Side,
    pub size: u32,
}

/// Typed broker failures. Transient variants pause the engine; permanent
/// ones halt it for the operator.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker disconnected")]
    Disconnected,

    #[error("broker timed out")]
    Timeout,

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("unknown intent: {0}")]
    UnknownIntent(IntentId),
}

impl BrokerError {
    /// Transient faults are retried/backed off; permanent ones require an
    /// operator.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Timeout | Self::Rejected(_))
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Order routing collaborator owned by the engine.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;
    fn is_connected(&self) -> bool;

    /// Submit a market order; returns the intent's idempotency key.
    async fn place_market_order(&self, intent: OrderIntent) -> Result<IntentId, BrokerError>;

    /// Cancel an outstanding intent (no-op if already filled).
    async fn cancel(&self, intent: IntentId) -> Result<(), BrokerError>;

    /// Wait for the fill of an outstanding intent. The engine wraps this in
    /// its configured fill timeout.
    async fn await_fill(&self, intent: IntentId) -> Result<Fill, BrokerError>;

    /// Current broker-side positions for the traded symbol.
    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Stream of bars in engine order. The channel closes when the feed ends.
    async fn subscribe_bars(
        &self,
        symbol: &str,
        timeframe_secs: u64,
    ) -> Result<mpsc::Receiver<Bar>, BrokerError>;
}

// ---------------------------------------------------------------------------
// PaperBroker
// ---------------------------------------------------------------------------

/// Immediate-fill simulator with constant slippage.
pub struct PaperBroker {
    /// Price offset applied against the trade: buys fill above the hint,
    /// sells below.
    slippage: f64,
    connected: AtomicBool,
    pending: Mutex<HashMap<IntentId, Fill>>,
    /// Net simulated position (side, size), if any.
    net_position: Mutex<Option<BrokerPosition>>,
    /// Bars replayed by `subscribe_bars` in the demo live runner.
    replay: Mutex<Vec<Bar>>,
    /// Pacing delay between replayed bars; zero replays as fast as possible.
    replay_interval_ms: u64,
}

impl PaperBroker {
    pub fn new(slippage: f64) -> Self {
        Self {
            slippage,
            connected: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            net_position: Mutex::new(None),
            replay: Mutex::new(Vec::new()),
            replay_interval_ms: 0,
        }
    }

    /// Load bars for `subscribe_bars` to replay, paced at `interval_ms`.
    pub fn with_replay(mut self, bars: Vec<Bar>, interval_ms: u64) -> Self {
        self.replay = Mutex::new(bars);
        self.replay_interval_ms = interval_ms;
        self
    }

    /// Install a broker-side position before the engine starts. Lets tests
    /// and demos exercise restart reconciliation.
    pub fn seed_position(&self, position: Option<BrokerPosition>) {
        *self.net_position.lock() = position;
    }

    fn apply_fill_to_net(&self, action: OrderAction, size: u32) {
        let mut net = self.net_position.lock();
        let signed = |p: &BrokerPosition| match p.side {
            Side::Long => p.size as i64,
            Side::Short => -(p.size as i64),
        };
        let current = net.as_ref().map(|p| signed(p)).unwrap_or(0);
        let delta = match action {
            OrderAction::Buy => size as i64,
            OrderAction::Sell => -(size as i64),
        };
        let updated = current + delta;
        *net = match updated.cmp(&0) {
            std::cmp::Ordering::Greater => Some(BrokerPosition {
                side: Side::Long,
                size: updated as u32,
            }),
            std::cmp::Ordering::Less => Some(BrokerPosition {
                side: Side::Short,
                size: (-updated) as u32,
            }),
            std::cmp::Ordering::Equal => None,
        };
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        info!("paper broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        info!("paper broker disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn place_market_order(&self, intent: OrderIntent) -> Result<IntentId, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }

        let id = IntentId::new();
        let fill_price = match intent.action {
            OrderAction::Buy => intent.price_hint + self.slippage,
            OrderAction::Sell => intent.price_hint - self.slippage,
        };
        let fill = Fill {
            intent: id,
            price: fill_price,
            time: intent.time_hint,
            size: intent.size,
        };

        debug!(
            intent = %id,
            action = %intent.action,
            size = intent.size,
            fill_price,
            "paper order filled"
        );
        self.apply_fill_to_net(intent.action, intent.size);
        self.pending.lock().insert(id, fill);
        Ok(id)
    }

    async fn cancel(&self, intent: IntentId) -> Result<(), BrokerError> {
        // Paper fills are instantaneous; cancelling just drops a pending
        // fill that was never awaited.
        self.pending.lock().remove(&intent);
        Ok(())
    }

    async fn await_fill(&self, intent: IntentId) -> Result<Fill, BrokerError> {
        self.pending
            .lock()
            .remove(&intent)
            .ok_or(BrokerError::UnknownIntent(intent))
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.net_position.lock().iter().copied().collect())
    }

    async fn subscribe_bars(
        &self,
        symbol: &str,
        timeframe_secs: u64,
    ) -> Result<mpsc::Receiver<Bar>, BrokerError> {
        let bars: Vec<Bar> = std::mem::take(&mut *self.replay.lock());
        info!(
            symbol,
            timeframe_secs,
            count = bars.len(),
            "paper broker replaying bar history"
        );
        let interval_ms = self.replay_interval_ms;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for bar in bars {
                if tx.send(bar).await.is_err() {
                    break;
                }
                if interval_ms > 0 {
                    tokio::time::sleep(tokio::time::Duration::from_millis(interval_ms)).await;
                }
            }
        });
        Ok(rx)
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

    fn intent(action: OrderAction, size: u32, price: f64) -> OrderIntent {
        OrderIntent {
            symbol: "ESU5".into(),
            action,
            size,
            price_hint: price,
            time_hint: t0(),
        }
    }

    #[tokio::test]
    async fn buy_fills_above_hint_sell_below() {
        let broker = PaperBroker::new(0.25);
        broker.connect().await.unwrap();

        let buy = broker
            .place_market_order(intent(OrderAction::Buy, 1, 6000.0))
            .await
            .unwrap();
        assert_eq!(broker.await_fill(buy).await.unwrap().price, 6000.25);

        let sell = broker
            .place_market_order(intent(OrderAction::Sell, 1, 6000.0))
            .await
            .unwrap();
        assert_eq!(broker.await_fill(sell).await.unwrap().price, 5999.75);
    }

    #[tokio::test]
    async fn submit_while_disconnected_fails() {
        let broker = PaperBroker::new(0.0);
        let err = broker
            .place_market_order(intent(OrderAction::Buy, 1, 6000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Disconnected));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn net_position_tracks_fills() {
        let broker = PaperBroker::new(0.0);
        broker.connect().await.unwrap();

        let id = broker
            .place_market_order(intent(OrderAction::Buy, 2, 6000.0))
            .await
            .unwrap();
        broker.await_fill(id).await.unwrap();
        assert_eq!(
            broker.positions().await.unwrap(),
            vec![BrokerPosition {
                side: Side::Long,
                size: 2
            }]
        );

        let id = broker
            .place_market_order(intent(OrderAction::Sell, 2, 6001.0))
            .await
            .unwrap();
        broker.await_fill(id).await.unwrap();
        assert!(broker.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn await_fill_twice_is_an_error() {
        let broker = PaperBroker::new(0.0);
        broker.connect().await.unwrap();
        let id = broker
            .place_market_order(intent(OrderAction::Buy, 1, 6000.0))
            .await
            .unwrap();
        broker.await_fill(id).await.unwrap();
        assert!(matches!(
            broker.await_fill(id).await,
            Err(BrokerError::UnknownIntent(_))
        ));
    }

    #[tokio::test]
    async fn replay_streams_bars_in_order() {
        let bars: Vec<Bar> = (0..3)
            .map(|i| Bar {
                timestamp: t0() + chrono::Duration::minutes(5 * i),
                open: 6000.0,
                high: 6001.0,
                low: 5999.0,
                close: 6000.0,
                volume: 100,
            })
            .collect();
        let broker = PaperBroker::new(0.0).with_replay(bars.clone(), 0);
        broker.connect().await.unwrap();

        let mut rx = broker.subscribe_bars("ESU5", 300).await.unwrap();
        let mut received = Vec::new();
        while let Some(bar) = rx.recv().await {
            received.push(bar);
        }
        assert_eq!(received, bars);
    }
}
