//! Paper Trading Engine
//!
//! Simulated spot ledger for long-only trading:
//! - **Single cash balance**: buys debit notional plus taker fee, sells credit
//!   proceeds minus taker fee
//! - **Slippage**: buys fill above the decided price, sells below it
//! - **Bracket exits**: each update checks the stop before the take-profit, so
//!   a bar that spans both closes at the stop
//! - **One position per symbol**: closed trades move to an append-only log

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::types::{Candle, ExitReason, Side, Trade};

/// Rejected broker calls
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("{0} already has an open position")]
    PositionAlreadyOpen(String),
    #[error("invalid order for {symbol}: price={price} qty={qty}")]
    InvalidOrder { symbol: String, price: f64, qty: f64 },
}

// ─────────────────────────────────────────────────────────────────
// Broker settings
// ─────────────────────────────────────────────────────────────────

/// Execution costs applied to every simulated fill
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCosts {
    /// Slippage in basis points
    pub slippage_bps: f64,
    /// Taker fee as a fraction of notional
    pub taker_fee: f64,
}

impl ExecutionCosts {
    /// Slippage from the strategy section, taker fee from the fee schedule
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            slippage_bps: cfg.strategy.slippage_bps,
            taker_fee: cfg.fees.taker,
        }
    }

    fn slip_factor(&self) -> f64 {
        1.0 + self.slippage_bps / 10_000.0
    }

    /// Fill price for `side` given a decided price
    pub fn fill_price(&self, price: f64, side: Side) -> f64 {
        match side {
            Side::Buy => price * self.slip_factor(),
            Side::Sell => price / self.slip_factor(),
        }
    }

    pub fn taker_fee(&self, notional: f64) -> f64 {
        notional.abs() * self.taker_fee
    }
}

// ─────────────────────────────────────────────────────────────────
// Paper broker
// ─────────────────────────────────────────────────────────────────

/// Simulated broker. Owns every trade it creates.
#[derive(Debug, Clone)]
pub struct PaperBroker {
    costs: ExecutionCosts,
    equity: f64,
    open_positions: HashMap<String, Trade>,
    trade_log: Vec<Trade>,
}

impl PaperBroker {
    pub fn new(costs: ExecutionCosts, equity: f64) -> Self {
        Self {
            costs,
            equity,
            open_positions: HashMap::new(),
            trade_log: Vec::new(),
        }
    }

    pub fn costs(&self) -> ExecutionCosts {
        self.costs
    }

    /// Running cash balance
    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn open_positions(&self) -> &HashMap<String, Trade> {
        &self.open_positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Trade> {
        self.open_positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.open_positions.contains_key(symbol)
    }

    /// Closed trades in the order they were closed
    pub fn trade_log(&self) -> &[Trade] {
        &self.trade_log
    }

    /// Entry notional currently held in `symbol`
    pub fn exposure(&self, symbol: &str) -> f64 {
        self.open_positions
            .get(symbol)
            .map(Trade::notional)
            .unwrap_or(0.0)
    }

    /// Cash plus open positions valued at `marks` (entry price when unmarked)
    pub fn mark_to_market(&self, marks: &HashMap<String, f64>) -> f64 {
        let held: f64 = self
            .open_positions
            .values()
            .map(|t| t.qty * marks.get(&t.symbol).copied().unwrap_or(t.entry_price))
            .sum();
        self.equity + held
    }

    /// Cash needed to buy `qty` at `price`, including slippage and fee
    pub fn entry_cost(&self, price: f64, qty: f64) -> f64 {
        let notional = self.costs.fill_price(price, Side::Buy) * qty;
        notional + self.costs.taker_fee(notional)
    }

    /// Open a long position. Fails if `symbol` is already held.
    pub fn buy(
        &mut self,
        symbol: &str,
        price: f64,
        qty: f64,
        stop: f64,
        take_profit: f64,
        at_ts: i64,
    ) -> Result<Trade, BrokerError> {
        if self.open_positions.contains_key(symbol) {
            return Err(BrokerError::PositionAlreadyOpen(symbol.to_string()));
        }
        if !(price > 0.0 && qty > 0.0) {
            return Err(BrokerError::InvalidOrder {
                symbol: symbol.to_string(),
                price,
                qty,
            });
        }

        let fill = self.costs.fill_price(price, Side::Buy);
        let notional = fill * qty;
        let fee = self.costs.taker_fee(notional);
        self.equity -= notional + fee;

        let trade = Trade {
            symbol: symbol.to_string(),
            side: Side::Buy,
            entry_price: fill,
            stop_price: stop,
            take_profit,
            qty,
            entry_time: at_ts,
            entry_fee: fee,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl: None,
        };

        info!(
            symbol = %symbol,
            price = %format!("{:.4}", fill),
            qty,
            stop = %format!("{:.4}", stop),
            tp = %format!("{:.4}", take_profit),
            equity = %format!("{:.2}", self.equity),
            "[PAPER] BUY filled"
        );

        self.open_positions.insert(symbol.to_string(), trade.clone());
        Ok(trade)
    }

    /// Close the whole position in `symbol` at `price`.
    ///
    /// `qty` must be the open quantity; partial closes are not supported.
    /// Returns `None` and changes nothing when no position is open.
    pub fn sell(&mut self, symbol: &str, price: f64, qty: f64, at_ts: i64) -> Option<Trade> {
        if let Some(open) = self.open_positions.get(symbol) {
            debug_assert!(
                (qty - open.qty).abs() < 1e-9,
                "sell must close the whole position: asked {} of {}",
                qty,
                open.qty
            );
        }
        self.close(symbol, price, at_ts, ExitReason::Manual)
    }

    fn close(&mut self, symbol: &str, price: f64, at_ts: i64, reason: ExitReason) -> Option<Trade> {
        let mut trade = self.open_positions.remove(symbol)?;

        let fill = self.costs.fill_price(price, Side::Sell);
        let proceeds = fill * trade.qty;
        let exit_fee = self.costs.taker_fee(proceeds);
        self.equity += proceeds - exit_fee;

        let entry_fee = self.costs.taker_fee(trade.entry_price * trade.qty);
        let pnl = (fill - trade.entry_price) * trade.qty - entry_fee - exit_fee;

        trade.exit_price = Some(fill);
        trade.exit_time = Some(at_ts);
        trade.exit_reason = Some(reason);
        trade.pnl = Some(pnl);

        info!(
            symbol = %symbol,
            reason = %reason,
            price = %format!("{:.4}", fill),
            pnl = %format!("{:+.4}", pnl),
            equity = %format!("{:.2}", self.equity),
            "[PAPER] Position closed"
        );

        self.trade_log.push(trade.clone());
        Some(trade)
    }

    /// Check the open position in `symbol` against `candle`.
    ///
    /// Closes at the stop when the bar range contains it, otherwise at the
    /// take-profit when the range contains that. At most one exit per call.
    pub fn update_prices(&mut self, symbol: &str, candle: &Candle) -> Option<Trade> {
        let (stop, tp) = {
            let t = self.open_positions.get(symbol)?;
            (t.stop_price, t.take_profit)
        };

        if candle.contains(stop) {
            self.close(symbol, stop, candle.timestamp, ExitReason::StopLoss)
        } else if candle.contains(tp) {
            self.close(symbol, tp, candle.timestamp, ExitReason::TakeProfit)
        } else {
            debug!(symbol = %symbol, low = candle.low, high = candle.high, "[PAPER] No exit");
            None
        }
    }
}
