//! Core types used throughout TradeBot
//!
//! Defines common data structures for candles, signals, trades and orders.

use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candlestick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time of the bar (Unix timestamp in milliseconds)
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume in base currency
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Whether `price` lies within the bar's [low, high] range
    pub fn contains(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Order / trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Entry signal. Only long entries exist; exits come from stops and targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::Manual => write!(f, "MANUAL"),
        }
    }
}

/// A simulated trade, open until the exit fields are populated.
///
/// `exit_price`, `exit_time` and `pnl` are set exactly once, when the
/// position is closed. `pnl.is_some()` iff the trade is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    /// Fill price including slippage
    pub entry_price: f64,
    pub stop_price: f64,
    pub take_profit: f64,
    pub qty: f64,
    /// Unix timestamp in milliseconds
    pub entry_time: i64,
    /// Taker fee paid on entry
    pub entry_fee: f64,
    pub exit_price: Option<f64>,
    pub exit_time: Option<i64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<f64>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.pnl.is_some()
    }

    /// Entry notional (fill price × quantity)
    pub fn notional(&self) -> f64 {
        self.entry_price * self.qty
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Closed,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Filled and closed both mean the order executed
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Closed)
    }
}

/// Read-only view of an exchange order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: String,
    pub side: Side,
    pub price: f64,
    pub status: OrderStatus,
}

/// Order ids of the two legs of a take-profit / stop-loss bracket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BracketOrderIds {
    pub take_profit_id: String,
    pub stop_loss_id: String,
}

impl BracketOrderIds {
    /// The leg paired with `leg_id`, if `leg_id` belongs to this bracket
    pub fn opposite(&self, leg_id: &str) -> Option<&str> {
        if leg_id == self.take_profit_id {
            Some(&self.stop_loss_id)
        } else if leg_id == self.stop_loss_id {
            Some(&self.take_profit_id)
        } else {
            None
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        id == self.take_profit_id || id == self.stop_loss_id
    }
}

/// Quote asset of a `BASE/QUOTE` symbol (e.g. "USDT" for "BTC/USDT")
pub fn quote_asset(symbol: &str) -> &str {
    symbol.rsplit_once('/').map(|(_, q)| q).unwrap_or(symbol)
}
