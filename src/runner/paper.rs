//! Paper trading loop
//!
//! Pulls candles through the [`Exchange`] trait and executes on a
//! [`PaperBroker`]. Exits are managed on every fetch, entries only while the
//! daily kill switch is off.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{pause, plan_entry, stop_requested, EntryError, EntryGates, Rejection, Shutdown};
use crate::config::AppConfig;
use crate::exchange::Exchange;
use crate::metrics::PerformanceSummary;
use crate::paper_trading::{ExecutionCosts, PaperBroker};
use crate::risk::DailyLossTracker;
use crate::strategy::generate_signal;
use crate::types::{Candle, Trade};

const MS_PER_YEAR: f64 = 365.25 * 86_400_000.0;

/// Outcome of a paper run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub rounds_completed: usize,
    pub halted: bool,
    pub trade_log: Vec<Trade>,
    pub open_positions: Vec<Trade>,
    /// Mark-to-market equity, starting balance first, then one value per round
    pub equity_curve: Vec<f64>,
    pub final_equity: f64,
    pub summary: PerformanceSummary,
}

/// Multi-symbol paper trading loop
pub struct PaperRunner<E: Exchange> {
    cfg: AppConfig,
    exchange: E,
    broker: PaperBroker,
    gates: EntryGates,
    losses: DailyLossTracker,
    /// Latest fetched window per symbol
    candles: HashMap<String, Vec<Candle>>,
    halted: bool,
    rounds: usize,
    equity_curve: Vec<f64>,
    first_ts: Option<i64>,
    last_ts: Option<i64>,
}

impl<E: Exchange> PaperRunner<E> {
    pub fn new(cfg: AppConfig, exchange: E) -> Self {
        let broker = PaperBroker::new(ExecutionCosts::from_config(&cfg), cfg.bot.initial_balance);
        let gates = EntryGates::new(&cfg.risk);
        let equity_curve = vec![broker.equity()];
        Self {
            cfg,
            exchange,
            broker,
            gates,
            losses: DailyLossTracker::new(),
            candles: HashMap::new(),
            halted: false,
            rounds: 0,
            equity_curve,
            first_ts: None,
            last_ts: None,
        }
    }

    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn rounds_completed(&self) -> usize {
        self.rounds
    }

    /// Run up to `bot.max_rounds` rounds, stopping early on shutdown
    pub async fn run(&mut self, mut shutdown: Shutdown) -> RunReport {
        info!(config = %self.cfg, "[PAPER] Starting run");

        while self.rounds < self.cfg.bot.max_rounds {
            if stop_requested(&shutdown) {
                info!(round = self.rounds, "[PAPER] Shutdown requested");
                break;
            }
            self.run_round(&shutdown).await;
            pause(self.cfg.bot.poll_interval_secs, &mut shutdown).await;
        }

        let report = self.report();
        info!(
            rounds = report.rounds_completed,
            trades = report.summary.n_trades,
            halted = report.halted,
            equity = %format!("{:.2}", report.final_equity),
            "[PAPER] Run finished"
        );
        report
    }

    /// One pass over the whitelist
    pub async fn run_round(&mut self, shutdown: &Shutdown) {
        let symbols = self.cfg.bot.symbols_whitelist.clone();
        for symbol in &symbols {
            if stop_requested(shutdown) {
                break;
            }
            match self.step_symbol(symbol).await {
                Ok(Some(trade)) => debug!(symbol = %symbol, qty = trade.qty, "[PAPER] Entry placed"),
                Ok(None) => {}
                Err(EntryError::Rejected(Rejection::Halted)) => {
                    debug!(symbol = %symbol, "[PAPER] Entries halted");
                }
                Err(EntryError::Rejected(reason)) => {
                    info!(symbol = %symbol, %reason, "[PAPER] Entry skipped");
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "[PAPER] Symbol step failed"),
            }
        }

        self.rounds += 1;
        let equity = self.broker.mark_to_market(&self.marks());
        self.equity_curve.push(equity);
        debug!(round = self.rounds, equity = %format!("{:.2}", equity), "[PAPER] Round complete");
    }

    async fn step_symbol(&mut self, symbol: &str) -> Result<Option<Trade>, EntryError> {
        let candles = self
            .exchange
            .fetch_candles(symbol, &self.cfg.bot.timeframe, self.cfg.bot.candle_limit)
            .await?;
        let Some(latest) = candles.last().cloned() else {
            return Ok(None);
        };
        self.first_ts.get_or_insert(latest.timestamp);
        self.last_ts = Some(self.last_ts.map_or(latest.timestamp, |t| t.max(latest.timestamp)));
        self.candles.insert(symbol.to_string(), candles.clone());

        if let Some(closed) = self.broker.update_prices(symbol, &latest) {
            if let Some(pnl) = closed.pnl {
                self.losses
                    .record(closed.exit_time.unwrap_or(latest.timestamp), pnl);
            }
        }

        if !self.halted
            && self.losses.kill_switch(
                latest.timestamp,
                self.cfg.risk.base_equity,
                self.cfg.risk.max_daily_loss_pct,
            )
        {
            self.halted = true;
            warn!(
                day_pnl = %format!("{:.2}", self.losses.day_total(latest.timestamp)),
                limit = %format!("{:.2}", self.cfg.risk.daily_loss_limit()),
                "[PAPER] Daily loss limit reached, halting new entries"
            );
        }
        if self.halted {
            return Err(Rejection::Halted.into());
        }

        let exposure = self.broker.exposure(symbol);
        self.gates.check_capacity(
            &self.cfg.risk,
            symbol,
            self.broker.has_position(symbol),
            self.broker.open_positions().len(),
            exposure,
        )?;

        if generate_signal(&candles, &self.cfg.strategy).is_none() {
            return Ok(None);
        }
        let closed_ts = candles[candles.len() - 2].timestamp;
        self.gates.check_duplicate(symbol, closed_ts)?;
        info!(symbol = %symbol, closed_ts, price = latest.close, "[PAPER] BUY signal");

        let held: Vec<&[Candle]> = self
            .broker
            .open_positions()
            .keys()
            .filter(|s| s.as_str() != symbol)
            .filter_map(|s| self.candles.get(s))
            .map(Vec::as_slice)
            .collect();
        self.gates.check_correlation(&candles, &held)?;

        let cash = self.broker.equity();
        let plan = plan_entry(symbol, &candles, closed_ts, &self.cfg, cash, cash, exposure)?;
        let trade = self.broker.buy(
            symbol,
            plan.reference_price,
            plan.qty,
            plan.stop,
            plan.take_profit,
            plan.entry_ts,
        )?;
        Ok(Some(trade))
    }

    fn marks(&self) -> HashMap<String, f64> {
        self.candles
            .iter()
            .filter_map(|(s, c)| c.last().map(|bar| (s.clone(), bar.close)))
            .collect()
    }

    pub fn report(&self) -> RunReport {
        let years = match (self.first_ts, self.last_ts) {
            (Some(a), Some(b)) if b > a => (b - a) as f64 / MS_PER_YEAR,
            _ => 0.0,
        };
        let mut open_positions: Vec<Trade> = self.broker.open_positions().values().cloned().collect();
        open_positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let final_equity = self.equity_curve.last().copied().unwrap_or(self.broker.equity());

        RunReport {
            rounds_completed: self.rounds,
            halted: self.halted,
            trade_log: self.broker.trade_log().to_vec(),
            open_positions,
            summary: PerformanceSummary::compute(self.broker.trade_log(), &self.equity_curve, years),
            equity_curve: self.equity_curve.clone(),
            final_equity,
        }
    }
}
