// =============================================================================
// Historical bar ingest — CSV loading for backtests and paper replay
// =============================================================================
//
// Expected header: timestamp,open,high,low,close,volume
// Timestamps are RFC 3339 ("2025-06-02T14:30:00Z") or epoch seconds. Rows
// must be strictly increasing in time; each bar is validated on load so a
// bad file fails fast instead of poisoning a run.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::info;

use crate::types::Bar;

#[derive(Debug, Deserialize)]
struct BarRecord {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let secs: i64 = raw
        .parse()
        .with_context(|| format!("timestamp {raw} is neither RFC 3339 nor epoch seconds"))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("epoch timestamp {secs} out of range"))
}

/// Load and validate a bar series from a CSV file.
pub fn load_bars_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open bar file {}", path.display()))?;
    let bars = read_bars(&mut reader)?;
    info!(path = %path.display(), bars = bars.len(), "bar history loaded");
    Ok(bars)
}

fn read_bars<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<Vec<Bar>> {
    let mut bars: Vec<Bar> = Vec::new();
    for (line, record) in reader.deserialize::<BarRecord>().enumerate() {
        let record = record.with_context(|| format!("bad CSV row {}", line + 2))?;
        let bar = Bar {
            timestamp: parse_timestamp(&record.timestamp)?,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        };
        bar.validate()
            .with_context(|| format!("invalid bar on row {}", line + 2))?;
        if let Some(last) = bars.last() {
            if bar.timestamp <= last.timestamp {
                bail!(
                    "bars out of order on row {}: {} is not after {}",
                    line + 2,
                    bar.timestamp,
                    last.timestamp
                );
            }
        }
        bars.push(bar);
    }
    Ok(bars)
}
