// =============================================================================
// Borealis Futures Core — live runner entry point
// =============================================================================
//
// Wires the engine to a paper broker. A real exchange adapter plugs in
// behind the same Broker trait; out of the box the runner replays a recorded
// bar file through the paper broker so the full pipeline (signals, risk,
// fills, persistence) runs end to end.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use borealis_bot::alerts::LogAlerts;
use borealis_bot::broker::{Broker, PaperBroker};
use borealis_bot::config::BotConfig;
use borealis_bot::data::load_bars_csv;
use borealis_bot::engine::{Engine, EngineError};
use borealis_bot::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Borealis Futures Core — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("BOREALIS_CONFIG").unwrap_or_else(|_| "borealis_config.json".into());
    let mut config = BotConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        BotConfig::default()
    });

    // Override the instrument from env if available.
    if let Ok(symbol) = std::env::var("BOREALIS_SYMBOL") {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() {
            config.symbol = symbol;
        }
    }
    config.validate()?;

    info!(
        symbol = %config.symbol,
        timeframe_secs = config.bar_timeframe_secs,
        lookback = config.stats.lookback,
        z_entry = config.signal.z_entry,
        z_exit = config.signal.z_exit,
        "configuration active"
    );

    // ── 2. Store ─────────────────────────────────────────────────────────
    let store_path = std::env::var("BOREALIS_DB").unwrap_or_else(|_| "borealis.db".into());
    let store = Store::open(&store_path)
        .with_context(|| format!("failed to open store at {store_path}"))?;
    info!(path = %store_path, "store opened");

    // ── 3. Broker (paper, with optional bar replay) ──────────────────────
    let replay_bars = match std::env::var("BOREALIS_REPLAY") {
        Ok(path) => load_bars_csv(&path)?,
        Err(_) => {
            warn!("BOREALIS_REPLAY not set; no bar source, engine will idle");
            Vec::new()
        }
    };
    let replay_interval_ms: u64 = std::env::var("BOREALIS_REPLAY_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let broker = Arc::new(
        PaperBroker::new(config.execution.slippage()).with_replay(replay_bars, replay_interval_ms),
    );

    // ── 4. Engine ────────────────────────────────────────────────────────
    let calendar = config.calendar.build();
    let mut engine = Engine::new(
        config.clone(),
        store,
        broker.clone(),
        calendar,
        Arc::new(LogAlerts),
    )?;
    engine.start().await?;

    let mut bars = broker
        .subscribe_bars(&config.symbol, config.bar_timeframe_secs)
        .await?;

    info!("engine running. Press Ctrl+C to stop.");

    // ── 5. Bar loop with graceful shutdown ───────────────────────────────
    loop {
        tokio::select! {
            maybe_bar = bars.recv() => {
                match maybe_bar {
                    Some(bar) => {
                        if let Err(err) = engine.on_bar(bar).await {
                            match err {
                                // A failed commit must not be acknowledged:
                                // stop consuming until the operator resolves
                                // the store.
                                EngineError::Store(e) => {
                                    error!(error = %e, "store write failed, stopping bar intake");
                                    break;
                                }
                                other => {
                                    error!(error = %other, "fatal engine error");
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        info!("bar feed ended");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received, stopping gracefully");
                break;
            }
        }
    }

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    engine.shutdown().await?;
    if let Err(e) = config.save(&config_path) {
        warn!(error = %e, "failed to save config on shutdown");
    }
    info!("Borealis shut down complete.");
    Ok(())
}
