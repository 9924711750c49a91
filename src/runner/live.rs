//! Live trading loop
//!
//! Same gates as the paper loop, but entries become a market buy followed by
//! a take-profit / stop-loss bracket on the exchange. Each bracketed position
//! gets its own [`BracketWatcher`] task. Positions are tracked locally and
//! released once their legs are closed, whether a watcher saw it or the
//! per-round reconcile of unwatched brackets did.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{pause, plan_entry, stop_requested, EntryError, EntryGates, EntryPlan, Rejection, Shutdown};
use crate::bracket_watcher::{BracketWatcher, PollOutcome, WatchExit, WatcherReport};
use crate::config::AppConfig;
use crate::exchange::Exchange;
use crate::risk::DailyLossTracker;
use crate::strategy::generate_signal;
use crate::types::{quote_asset, BracketOrderIds, Candle};

/// An order sent (or, in dry-run, only intended)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveOrder {
    pub symbol: String,
    /// `None` in dry-run
    pub buy_order_id: Option<String>,
    pub legs: Option<BracketOrderIds>,
    pub qty: f64,
    pub reference_price: f64,
    pub stop: f64,
    pub take_profit: f64,
    pub closed_ts: i64,
}

impl LiveOrder {
    fn from_plan(plan: &EntryPlan, buy_order_id: Option<String>, legs: Option<BracketOrderIds>) -> Self {
        Self {
            symbol: plan.symbol.clone(),
            buy_order_id,
            legs,
            qty: plan.qty,
            reference_price: plan.reference_price,
            stop: plan.stop,
            take_profit: plan.take_profit,
            closed_ts: plan.closed_ts,
        }
    }
}

/// A position opened on the exchange by this run
#[derive(Debug)]
pub struct LivePosition {
    /// Expected fill including slippage
    pub entry_price: f64,
    pub qty: f64,
    pub stop: f64,
    pub take_profit: f64,
    pub opened_at: i64,
    pub legs: Option<BracketOrderIds>,
    watcher: Option<JoinHandle<WatcherReport>>,
}

impl LivePosition {
    pub fn notional(&self) -> f64 {
        self.entry_price * self.qty
    }

    pub fn is_watched(&self) -> bool {
        self.watcher.is_some()
    }
}

/// Outcome of a live run
#[derive(Debug, Clone, Serialize)]
pub struct LiveReport {
    pub rounds_completed: usize,
    pub halted: bool,
    pub orders: Vec<LiveOrder>,
    pub dry_run_intents: Vec<LiveOrder>,
    /// Symbols still tracked as open when the report was taken
    pub open_symbols: Vec<String>,
    /// Watchers that finished during the run
    pub watcher_reports: Vec<WatcherReport>,
}

pub struct LiveRunner<E: Exchange + 'static> {
    cfg: AppConfig,
    exchange: Arc<E>,
    dry_run: bool,
    gates: EntryGates,
    losses: DailyLossTracker,
    positions: HashMap<String, LivePosition>,
    candles: HashMap<String, Vec<Candle>>,
    /// Symbols with a dry-run intent; stand in for held positions in the correlation guard
    signaled: BTreeSet<String>,
    halted: bool,
    rounds: usize,
    orders: Vec<LiveOrder>,
    intents: Vec<LiveOrder>,
    watcher_reports: Vec<WatcherReport>,
}

impl<E: Exchange + 'static> LiveRunner<E> {
    pub fn new(cfg: AppConfig, exchange: Arc<E>) -> Self {
        let gates = EntryGates::new(&cfg.risk);
        let dry_run = cfg.bot.dry_run;
        Self {
            cfg,
            exchange,
            dry_run,
            gates,
            losses: DailyLossTracker::new(),
            positions: HashMap::new(),
            candles: HashMap::new(),
            signaled: BTreeSet::new(),
            halted: false,
            rounds: 0,
            orders: Vec::new(),
            intents: Vec::new(),
            watcher_reports: Vec::new(),
        }
    }

    pub fn positions(&self) -> &HashMap<String, LivePosition> {
        &self.positions
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Realized PnL recorded today (UTC)
    pub fn today_pnl(&self) -> f64 {
        self.losses.day_total(Utc::now().timestamp_millis())
    }

    pub async fn run(&mut self, mut shutdown: Shutdown) -> LiveReport {
        info!(config = %self.cfg, dry_run = self.dry_run, "[LIVE] Starting run");

        while self.rounds < self.cfg.bot.max_rounds {
            if stop_requested(&shutdown) {
                info!(round = self.rounds, "[LIVE] Shutdown requested");
                break;
            }
            self.run_round(&shutdown).await;
            pause(self.cfg.bot.poll_interval_secs, &mut shutdown).await;
        }

        self.report()
    }

    pub async fn run_round(&mut self, shutdown: &Shutdown) {
        self.reap_watchers().await;
        self.reconcile_unwatched().await;

        let symbols = self.cfg.bot.symbols_whitelist.clone();
        for symbol in &symbols {
            if stop_requested(shutdown) {
                break;
            }
            match self.step_symbol(symbol, shutdown).await {
                Ok(()) => {}
                Err(EntryError::Rejected(Rejection::Halted)) => {
                    debug!(symbol = %symbol, "[LIVE] Entries halted");
                }
                Err(EntryError::Rejected(reason)) => {
                    info!(symbol = %symbol, %reason, "[LIVE] Entry skipped");
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "[LIVE] Symbol step failed"),
            }
        }
        self.rounds += 1;
    }

    async fn step_symbol(&mut self, symbol: &str, shutdown: &Shutdown) -> Result<(), EntryError> {
        let candles = self
            .exchange
            .fetch_candles(symbol, &self.cfg.bot.timeframe, self.cfg.bot.candle_limit)
            .await?;
        if candles.is_empty() {
            return Ok(());
        }
        self.candles.insert(symbol.to_string(), candles.clone());

        let now = Utc::now().timestamp_millis();
        if !self.halted
            && self
                .losses
                .kill_switch(now, self.cfg.risk.base_equity, self.cfg.risk.max_daily_loss_pct)
        {
            self.halted = true;
            warn!(
                day_pnl = %format!("{:.2}", self.losses.day_total(now)),
                limit = %format!("{:.2}", self.cfg.risk.daily_loss_limit()),
                "[LIVE] Daily loss limit reached, halting new entries"
            );
        }
        if self.halted {
            return Err(Rejection::Halted.into());
        }

        let exposure = self.positions.get(symbol).map(LivePosition::notional).unwrap_or(0.0);
        self.gates.check_capacity(
            &self.cfg.risk,
            symbol,
            self.positions.contains_key(symbol),
            self.positions.len(),
            exposure,
        )?;

        if generate_signal(&candles, &self.cfg.strategy).is_none() {
            return Ok(());
        }
        let closed_ts = candles[candles.len() - 2].timestamp;
        self.gates.check_duplicate(symbol, closed_ts)?;
        info!(symbol = %symbol, closed_ts, "[LIVE] BUY signal");

        let held: Vec<&[Candle]> = self
            .positions
            .keys()
            .chain(self.signaled.iter())
            .filter(|s| s.as_str() != symbol)
            .filter_map(|s| self.candles.get(s))
            .map(Vec::as_slice)
            .collect();
        self.gates.check_correlation(&candles, &held)?;

        let balance = self.exchange.get_balance(quote_asset(symbol)).await?;
        let plan = plan_entry(symbol, &candles, closed_ts, &self.cfg, balance, balance, exposure)?;

        if self.dry_run {
            info!(
                symbol = %symbol,
                qty = plan.qty,
                price = plan.reference_price,
                stop = %format!("{:.4}", plan.stop),
                tp = %format!("{:.4}", plan.take_profit),
                "[LIVE] DRY-RUN market buy and bracket not sent"
            );
            self.signaled.insert(symbol.to_string());
            self.intents.push(LiveOrder::from_plan(&plan, None, None));
            return Ok(());
        }

        let buy_id = self.exchange.create_market_buy(symbol, plan.qty).await?;
        info!(symbol = %symbol, order_id = %buy_id, qty = plan.qty, "[LIVE] Market buy sent");

        let legs = match self
            .exchange
            .place_bracket(symbol, plan.qty, plan.take_profit, plan.stop)
            .await
        {
            Ok(legs) => {
                info!(
                    symbol = %symbol,
                    tp_id = %legs.take_profit_id,
                    sl_id = %legs.stop_loss_id,
                    "[LIVE] Bracket placed"
                );
                Some(legs)
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "[LIVE] Bracket failed, position is unprotected");
                None
            }
        };

        let watcher = match &legs {
            Some(legs) if self.cfg.watcher.enabled => {
                let exchange: Arc<dyn Exchange> = self.exchange.clone();
                let w = BracketWatcher::new(symbol, legs.clone(), &self.cfg.watcher, self.dry_run);
                Some(w.spawn(exchange, shutdown.clone()))
            }
            _ => None,
        };

        self.positions.insert(
            symbol.to_string(),
            LivePosition {
                entry_price: plan.fill_price,
                qty: plan.qty,
                stop: plan.stop,
                take_profit: plan.take_profit,
                opened_at: now,
                legs: legs.clone(),
                watcher,
            },
        );
        self.orders.push(LiveOrder::from_plan(&plan, Some(buy_id), legs));
        Ok(())
    }

    /// Collect finished watchers without waiting on running ones
    async fn reap_watchers(&mut self) {
        let done: Vec<String> = self
            .positions
            .iter()
            .filter(|(_, p)| p.watcher.as_ref().is_some_and(JoinHandle::is_finished))
            .map(|(s, _)| s.clone())
            .collect();
        for symbol in done {
            self.settle_watcher(&symbol).await;
        }
    }

    /// Poll the legs of bracketed positions that no watcher is following.
    ///
    /// Covers watchers that stopped early and positions that never had one.
    async fn reconcile_unwatched(&mut self) {
        let unwatched: Vec<(String, BracketOrderIds)> = self
            .positions
            .iter()
            .filter(|(_, p)| !p.is_watched())
            .filter_map(|(s, p)| p.legs.clone().map(|legs| (s.clone(), legs)))
            .collect();

        for (symbol, legs) in unwatched {
            let mut check = BracketWatcher::new(&symbol, legs, &self.cfg.watcher, self.dry_run);
            if let PollOutcome::Done(WatchExit::LegsClosed) = check.poll_once(&*self.exchange).await {
                debug!(symbol = %symbol, "[LIVE] Unwatched bracket resolved");
                self.apply_report(&symbol, check.into_report(WatchExit::LegsClosed));
            }
        }
    }

    /// Await every running watcher and settle its position
    pub async fn finish(&mut self) -> Vec<WatcherReport> {
        let watched: Vec<String> = self
            .positions
            .iter()
            .filter(|(_, p)| p.is_watched())
            .map(|(s, _)| s.clone())
            .collect();
        for symbol in watched {
            self.settle_watcher(&symbol).await;
        }
        self.watcher_reports.clone()
    }

    async fn settle_watcher(&mut self, symbol: &str) {
        let Some(handle) = self.positions.get_mut(symbol).and_then(|p| p.watcher.take()) else {
            return;
        };
        match handle.await {
            Ok(report) => self.apply_report(symbol, report),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "[LIVE] Watcher task failed, legs will be polled each round");
            }
        }
    }

    fn apply_report(&mut self, symbol: &str, report: WatcherReport) {
        if report.exit == WatchExit::LegsClosed {
            if let Some(pos) = self.positions.remove(symbol) {
                if let Some(leg) = &report.filled_leg {
                    let taker = self.cfg.fees.taker;
                    let pnl = (leg.price - pos.entry_price) * pos.qty
                        - pos.notional() * taker
                        - leg.price * pos.qty * taker;
                    self.losses.record(Utc::now().timestamp_millis(), pnl);
                    info!(
                        symbol = %symbol,
                        exit_price = leg.price,
                        pnl = %format!("{:+.4}", pnl),
                        "[LIVE] Position closed"
                    );
                } else {
                    info!(symbol = %symbol, "[LIVE] Bracket gone without a fill, position released");
                }
            }
        } else {
            warn!(symbol = %symbol, exit = ?report.exit, "[LIVE] Watcher stopped with legs open, legs will be polled each round");
        }
        self.watcher_reports.push(report);
    }

    pub fn report(&self) -> LiveReport {
        let mut open_symbols: Vec<String> = self.positions.keys().cloned().collect();
        open_symbols.sort();
        LiveReport {
            rounds_completed: self.rounds,
            halted: self.halted,
            orders: self.orders.clone(),
            dry_run_intents: self.intents.clone(),
            open_symbols,
            watcher_reports: self.watcher_reports.clone(),
        }
    }
}
