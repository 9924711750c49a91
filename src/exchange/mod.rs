//! Exchange collaborator
//!
//! The bot only talks to an exchange through the [`Exchange`] trait. Wire
//! clients, retries and precision rules live behind it.
//!
//! Provided implementations:
//! - [`WhitelistedExchange`]: rejects symbol-bound calls outside a whitelist
//! - [`CsvReplayExchange`]: replays candle files bar by bar for simulation

mod replay;
mod whitelist;

pub use replay::CsvReplayExchange;
pub use whitelist::WhitelistedExchange;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{BracketOrderIds, Candle, OrderSnapshot};

/// Exchange call failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("symbol {0} is not whitelisted")]
    SymbolNotWhitelisted(String),
    /// Network or rate-limit failure that outlived the retry policy
    #[error("transient exchange error: {0}")]
    Transient(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("data error: {0}")]
    Data(String),
}

/// Market data and order placement
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Last traded price
    async fn get_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    /// Most recent `limit` candles, oldest first. The last one may still be forming.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Free balance of `asset`
    async fn get_balance(&self, asset: &str) -> Result<f64, ExchangeError>;

    /// Market buy; returns the order id
    async fn create_market_buy(&self, symbol: &str, qty: f64) -> Result<String, ExchangeError>;

    /// Market sell; returns the order id
    async fn create_market_sell(&self, symbol: &str, qty: f64) -> Result<String, ExchangeError>;

    /// Take-profit and stop-loss sell orders for `qty`
    async fn place_bracket(
        &self,
        symbol: &str,
        qty: f64,
        take_profit: f64,
        stop_loss: f64,
    ) -> Result<BracketOrderIds, ExchangeError>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OrderSnapshot>, ExchangeError>;

    async fn fetch_closed_orders(&self, symbol: &str)
        -> Result<Vec<OrderSnapshot>, ExchangeError>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), ExchangeError>;
}
