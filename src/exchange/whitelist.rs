//! Symbol whitelist enforcement

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::warn;

use super::{Exchange, ExchangeError};
use crate::types::{BracketOrderIds, Candle, OrderSnapshot};

/// Wraps an exchange and refuses every symbol outside the whitelist
/// before the inner exchange is reached.
pub struct WhitelistedExchange<E> {
    inner: E,
    whitelist: HashSet<String>,
}

impl<E: Exchange> WhitelistedExchange<E> {
    pub fn new<I, S>(inner: E, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            whitelist: symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, symbol: &str) -> bool {
        self.whitelist.contains(symbol)
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn check(&self, symbol: &str) -> Result<(), ExchangeError> {
        if self.is_allowed(symbol) {
            Ok(())
        } else {
            warn!(symbol = %symbol, "Blocked call for non-whitelisted symbol");
            Err(ExchangeError::SymbolNotWhitelisted(symbol.to_string()))
        }
    }
}

#[async_trait]
impl<E: Exchange> Exchange for WhitelistedExchange<E> {
    async fn get_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.check(symbol)?;
        self.inner.get_price(symbol).await
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.check(symbol)?;
        self.inner.fetch_candles(symbol, timeframe, limit).await
    }

    async fn get_balance(&self, asset: &str) -> Result<f64, ExchangeError> {
        self.inner.get_balance(asset).await
    }

    async fn create_market_buy(&self, symbol: &str, qty: f64) -> Result<String, ExchangeError> {
        self.check(symbol)?;
        self.inner.create_market_buy(symbol, qty).await
    }

    async fn create_market_sell(&self, symbol: &str, qty: f64) -> Result<String, ExchangeError> {
        self.check(symbol)?;
        self.inner.create_market_sell(symbol, qty).await
    }

    async fn place_bracket(
        &self,
        symbol: &str,
        qty: f64,
        take_profit: f64,
        stop_loss: f64,
    ) -> Result<BracketOrderIds, ExchangeError> {
        self.check(symbol)?;
        self.inner
            .place_bracket(symbol, qty, take_profit, stop_loss)
            .await
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OrderSnapshot>, ExchangeError> {
        self.check(symbol)?;
        self.inner.fetch_open_orders(symbol).await
    }

    async fn fetch_closed_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<OrderSnapshot>, ExchangeError> {
        self.check(symbol)?;
        self.inner.fetch_closed_orders(symbol).await
    }

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), ExchangeError> {
        self.check(symbol)?;
        self.inner.cancel_order(id, symbol).await
    }
}
