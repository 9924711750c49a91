//! TradeBot binary
//!
//! Replays candle files from `bot.data_dir` through the paper or live loop.
//! A real exchange client plugs in behind the same `Exchange` trait.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use tradebot::config::{AppConfig, RunMode};
use tradebot::exchange::{CsvReplayExchange, WhitelistedExchange};
use tradebot::logging;
use tradebot::runner::{LiveRunner, PaperRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let mut cfg = AppConfig::load().context("Failed to load configuration")?;
    logging::init(&cfg.logging);

    info!("TradeBot starting");
    info!(config = %cfg, "Configuration loaded");

    let replay = CsvReplayExchange::from_dir(
        &cfg.bot.data_dir,
        &cfg.bot.symbols_whitelist,
        cfg.warmup_bars() + 1,
        cfg.bot.initial_balance,
    )
    .context("Failed to load replay candles")?;

    // Never ask for more rounds than the data can serve
    let available = replay.remaining_fetches();
    if available < cfg.bot.max_rounds {
        warn!(requested = cfg.bot.max_rounds, available, "Capping rounds to replay length");
        cfg.bot.max_rounds = available;
    }

    let exchange = WhitelistedExchange::new(replay, cfg.bot.symbols_whitelist.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            let _ = stop_tx.send(true);
        }
    });

    match cfg.bot.mode {
        RunMode::Paper => {
            let mut runner = PaperRunner::new(cfg, exchange);
            let report = runner.run(stop_rx).await;
            info!(
                report = %serde_json::to_string(&report).context("Failed to serialize run report")?,
                "Paper run report"
            );
        }
        RunMode::Live => {
            let mut runner = LiveRunner::new(cfg, Arc::new(exchange));
            let report = runner.run(stop_rx).await;
            info!(
                report = %serde_json::to_string(&report).context("Failed to serialize live report")?,
                "Live run report"
            );
            let watchers = runner.finish().await;
            info!(watchers = watchers.len(), "Bracket watchers finished");
        }
    }

    Ok(())
}
