// =============================================================================
// Store — append-only SQLite log of trades, signals, snapshots, summaries
// =============================================================================
//
// Single-file embedded store. The engine is the only writer; dashboards and
// other read-only consumers may query concurrently through their own handle.
// WAL journaling with `synchronous=FULL` makes every commit durable before
// the call returns, which is what lets the engine acknowledge a bar only
// after its records are on disk.
//
// Rows are never updated or deleted. Restart reconciliation reads the
// latest snapshot whose config fingerprint matches, and rebuilds the rolling
// window from the most recent signal rows (every processed bar writes one,
// so their prices double as close history).
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ledger::Position;
use crate::risk::RiskState;
use crate::types::{CloseReason, Side, Signal, Trade};

const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Point-in-time engine state, persisted at every state transition and at a
/// configured bar cadence. The fingerprint and window hash gate restores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub last_bar_ts: DateTime<Utc>,
    pub position: Option<Position>,
    pub risk: RiskState,
    /// SHA-256 over the rolling window contents at snapshot time.
    pub window_hash: String,
    /// SHA-256 over the canonical configuration JSON.
    pub config_fingerprint: String,
}

/// One session's aggregate results, written at rollover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub pnl: f64,
    pub max_drawdown: f64,
}

/// Typed store failures. Any write failure is fatal for the bar that
/// produced it; the engine stops consuming until the store is healthy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the embedded store. Cheap to clone; clones share one
/// serialized connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory store for tests and backtests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        // FULL sync: a commit is on disk before the engine moves on.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            "#,
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;
        let current: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match current {
            None => {
                conn.execute_batch(
                    r#"
                    CREATE TABLE trades (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        open_time_ms INTEGER NOT NULL,
                        close_time_ms INTEGER NOT NULL,
                        side TEXT NOT NULL,
                        size INTEGER NOT NULL,
                        entry_price REAL NOT NULL,
                        exit_price REAL NOT NULL,
                        realized_pnl REAL NOT NULL,
                        z_entry REAL,
                        z_exit REAL,
                        reason TEXT NOT NULL
                    );
                    CREATE INDEX idx_trades_close_time ON trades(close_time_ms);

                    CREATE TABLE signals (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        time_ms INTEGER NOT NULL,
                        kind TEXT NOT NULL,
                        price REAL NOT NULL,
                        z REAL,
                        volume INTEGER NOT NULL,
                        suppressed_reason TEXT
                    );
                    CREATE INDEX idx_signals_time ON signals(time_ms);

                    CREATE TABLE snapshots (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        last_bar_ms INTEGER NOT NULL,
                        config_fingerprint TEXT NOT NULL,
                        window_hash TEXT NOT NULL,
                        payload TEXT NOT NULL
                    );
                    CREATE INDEX idx_snapshots_fingerprint
                        ON snapshots(config_fingerprint, id DESC);

                    CREATE TABLE daily_summaries (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        date TEXT NOT NULL,
                        trades INTEGER NOT NULL,
                        wins INTEGER NOT NULL,
                        losses INTEGER NOT NULL,
                        pnl REAL NOT NULL,
                        max_drawdown REAL NOT NULL
                    );
                    "#,
                )?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    [SCHEMA_VERSION],
                )?;
                info!(version = SCHEMA_VERSION, "store schema created");
            }
            Some(v) if v == SCHEMA_VERSION => {
                debug!(version = v, "store schema up to date");
            }
            Some(v) => {
                return Err(StoreError::Corrupt(format!(
                    "schema version mismatch: expected {SCHEMA_VERSION}, found {v}"
                )));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Appends
    // -------------------------------------------------------------------------

    pub fn append_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (open_time_ms, close_time_ms, side, size, entry_price,
                                 exit_price, realized_pnl, z_entry, z_exit, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                trade.open_time.timestamp_millis(),
                trade.close_time.timestamp_millis(),
                trade.side.to_string(),
                trade.size,
                trade.entry_price,
                trade.exit_price,
                trade.realized_pnl,
                trade.z_on_entry,
                trade.z_on_exit,
                trade.reason.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn append_signal(
        &self,
        signal: &Signal,
        suppressed_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signals (time_ms, kind, price, z, volume, suppressed_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                signal.time.timestamp_millis(),
                signal.kind.to_string(),
                signal.price,
                signal.z,
                signal.volume,
                suppressed_reason,
            ],
        )?;
        Ok(())
    }

    pub fn append_snapshot(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO snapshots (last_bar_ms, config_fingerprint, window_hash, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                snapshot.last_bar_ts.timestamp_millis(),
                snapshot.config_fingerprint,
                snapshot.window_hash,
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn append_daily_summary(&self, summary: &DailySummary) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO daily_summaries (date, trades, wins, losses, pnl, max_drawdown)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                summary.date.to_string(),
                summary.trades,
                summary.wins,
                summary.losses,
                summary.pnl,
                summary.max_drawdown,
            ],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Most recent `limit` trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<Trade>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT open_time_ms, close_time_ms, side, size, entry_price, exit_price,
                    realized_pnl, z_entry, z_exit, reason
             FROM trades ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], row_to_trade)?;
        collect_rows(rows)
    }

    /// Trades closed within `[from, to]`, oldest first.
    pub fn trades_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT open_time_ms, close_time_ms, side, size, entry_price, exit_price,
                    realized_pnl, z_entry, z_exit, reason
             FROM trades
             WHERE close_time_ms >= ?1 AND close_time_ms <= ?2
             ORDER BY close_time_ms ASC",
        )?;
        let rows = stmt.query_map(
            params![from.timestamp_millis(), to.timestamp_millis()],
            row_to_trade,
        )?;
        collect_rows(rows)
    }

    /// Most recent `limit` daily summaries, newest first.
    pub fn daily_summaries(&self, limit: usize) -> Result<Vec<DailySummary>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, trades, wins, losses, pnl, max_drawdown
             FROM daily_summaries ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (date, trades, wins, losses, pnl, max_drawdown) = row?;
            let date = date
                .parse::<NaiveDate>()
                .map_err(|e| StoreError::Corrupt(format!("bad summary date {date}: {e}")))?;
            out.push(DailySummary {
                date,
                trades,
                wins,
                losses,
                pnl,
                max_drawdown,
            });
        }
        Ok(out)
    }

    /// Latest snapshot whose config fingerprint matches, if any.
    pub fn latest_snapshot(
        &self,
        config_fingerprint: &str,
    ) -> Result<Option<EngineSnapshot>, StoreError> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM snapshots
                 WHERE config_fingerprint = ?1
                 ORDER BY id DESC LIMIT 1",
                [config_fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Prices of the most recent `limit` signal rows, oldest first. Every
    /// processed bar writes a signal row, so this is the close history used
    /// to rebuild the rolling window after a restart.
    pub fn recent_signal_prices(&self, limit: usize) -> Result<Vec<f64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT price FROM signals ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| row.get::<_, f64>(0))?;
        let mut prices: Vec<f64> = Vec::new();
        for row in rows {
            prices.push(row?);
        }
        prices.reverse();
        Ok(prices)
    }

    /// Timestamp of the most recently recorded bar, if any.
    pub fn last_signal_time(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.lock();
        let ms: Option<i64> = conn
            .query_row(
                "SELECT time_ms FROM signals ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match ms {
            Some(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt(format!("bad signal time {ms}"))),
            None => Ok(None),
        }
    }

    /// Close price of the most recently recorded bar, if any.
    pub fn last_signal_price(&self) -> Result<Option<f64>, StoreError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT price FROM signals ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Total signal rows recorded (all bars ever processed).
    pub fn signal_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))?)
    }
}

/// Raw trade columns as stored; converted into a `Trade` after the enum
/// strings parse.
struct TradeRow {
    open_time_ms: i64,
    close_time_ms: i64,
    side: String,
    size: u32,
    entry_price: f64,
    exit_price: f64,
    realized_pnl: f64,
    z_on_entry: Option<f64>,
    z_on_exit: Option<f64>,
    reason: String,
}

fn row_to_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<TradeRow> {
    Ok(TradeRow {
        open_time_ms: row.get(0)?,
        close_time_ms: row.get(1)?,
        side: row.get(2)?,
        size: row.get(3)?,
        entry_price: row.get(4)?,
        exit_price: row.get(5)?,
        realized_pnl: row.get(6)?,
        z_on_entry: row.get(7)?,
        z_on_exit: row.get(8)?,
        reason: row.get(9)?,
    })
}

impl TryFrom<TradeRow> for Trade {
    type Error = StoreError;

    fn try_from(row: TradeRow) -> Result<Self, StoreError> {
        let side = match row.side.as_str() {
            "Long" => Side::Long,
            "Short" => Side::Short,
            other => return Err(StoreError::Corrupt(format!("bad side {other}"))),
        };
        let reason: CloseReason = row
            .reason
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("bad close reason {}", row.reason)))?;
        Ok(Trade {
            open_time: Utc
                .timestamp_millis_opt(row.open_time_ms)
                .single()
                .ok_or_else(|| StoreError::Corrupt(format!("bad open time {}", row.open_time_ms)))?,
            close_time: Utc
                .timestamp_millis_opt(row.close_time_ms)
                .single()
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("bad close time {}", row.close_time_ms))
                })?,
            side,
            size: row.size,
            entry_price: row.entry_price,
            exit_price: row.exit_price,
            realized_pnl: row.realized_pnl,
            z_on_entry: row.z_on_entry,
            z_on_exit: row.z_on_exit,
            reason,
        })
    }
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<TradeRow>>,
) -> Result<Vec<Trade>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(Trade::try_from(row?)?);
    }
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalKind;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap()
    }

    fn trade(pnl: f64, close_time: DateTime<Utc>) -> Trade {
        Trade {
            open_time: close_time - Duration::minutes(15),
            close_time,
            side: Side::Long,
            size: 1,
            entry_price: 6000.0,
            exit_price: 6000.0 + pnl / 5.0,
            realized_pnl: pnl,
            z_on_entry: Some(-2.2),
            z_on_exit: Some(-0.1),
            reason: CloseReason::ZExit,
        }
    }

    fn signal(time: DateTime<Utc>, price: f64) -> Signal {
        Signal {
            kind: SignalKind::Hold,
            time,
            price,
            z: Some(0.3),
            volume: 120,
        }
    }

    #[test]
    fn trades_roundtrip() {
        let store = Store::in_memory().unwrap();
        store.append_trade(&trade(25.0, t0())).unwrap();
        store
            .append_trade(&trade(-10.0, t0() + Duration::minutes(30)))
            .unwrap();

        let recent = store.recent_trades(10).unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].realized_pnl, -10.0);
        assert_eq!(recent[1].realized_pnl, 25.0);
        assert_eq!(recent[1].side, Side::Long);
        assert_eq!(recent[1].reason, CloseReason::ZExit);
        assert_eq!(recent[1].z_on_entry, Some(-2.2));
    }

    #[test]
    fn trades_in_range_filters_and_orders() {
        let store = Store::in_memory().unwrap();
        for i in 0..5 {
            store
                .append_trade(&trade(i as f64, t0() + Duration::hours(i)))
                .unwrap();
        }
        let hits = store
            .trades_in_range(t0() + Duration::hours(1), t0() + Duration::hours(3))
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].realized_pnl, 1.0);
        assert_eq!(hits[2].realized_pnl, 3.0);
    }

    #[test]
    fn signal_prices_rebuild_window_history() {
        let store = Store::in_memory().unwrap();
        for i in 0..6 {
            store
                .append_signal(&signal(t0() + Duration::minutes(5 * i), 6000.0 + i as f64), None)
                .unwrap();
        }
        // Oldest-first, trimmed to the request.
        assert_eq!(
            store.recent_signal_prices(3).unwrap(),
            vec![6003.0, 6004.0, 6005.0]
        );
        assert_eq!(store.last_signal_price().unwrap(), Some(6005.0));
        assert_eq!(store.signal_count().unwrap(), 6);
    }

    #[test]
    fn suppressed_reason_persists() {
        let store = Store::in_memory().unwrap();
        store
            .append_signal(&signal(t0(), 6000.0), Some("DailyLoss"))
            .unwrap();
        let conn = store.conn.lock();
        let reason: Option<String> = conn
            .query_row("SELECT suppressed_reason FROM signals", [], |r| r.get(0))
            .unwrap();
        assert_eq!(reason.as_deref(), Some("DailyLoss"));
    }

    #[test]
    fn snapshot_fingerprint_lookup() {
        let store = Store::in_memory().unwrap();
        let snapshot = EngineSnapshot {
            last_bar_ts: t0(),
            position: None,
            risk: RiskState::default(),
            window_hash: "aa".into(),
            config_fingerprint: "fp-1".into(),
        };
        store.append_snapshot(&snapshot).unwrap();

        let newer = EngineSnapshot {
            last_bar_ts: t0() + Duration::minutes(5),
            window_hash: "bb".into(),
            ..snapshot.clone()
        };
        store.append_snapshot(&newer).unwrap();

        let loaded = store.latest_snapshot("fp-1").unwrap().unwrap();
        assert_eq!(loaded, newer);
        assert!(store.latest_snapshot("fp-other").unwrap().is_none());
    }

    #[test]
    fn daily_summaries_roundtrip() {
        let store = Store::in_memory().unwrap();
        let summary = DailySummary {
            date: t0().date_naive(),
            trades: 4,
            wins: 2,
            losses: 2,
            pnl: -120.0,
            max_drawdown: 180.0,
        };
        store.append_daily_summary(&summary).unwrap();
        assert_eq!(store.daily_summaries(5).unwrap(), vec![summary]);
    }
}
