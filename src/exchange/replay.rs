//! Historical candle replay
//!
//! Serves candles from `<BASE>_<QUOTE>.csv` files (`timestamp,open,high,low,close,volume`).
//! Each `fetch_candles` reveals one more bar, so a runner polling it walks
//! through history the way it would see a live market.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::{Exchange, ExchangeError};
use crate::types::{BracketOrderIds, Candle, OrderSnapshot};

/// File name for a symbol: "BTC/USDT" -> "BTC_USDT.csv"
pub fn csv_file_name(symbol: &str) -> String {
    format!("{}.csv", symbol.replace('/', "_"))
}

struct Series {
    candles: Vec<Candle>,
    /// Number of bars visible on the next fetch
    cursor: usize,
    /// Index of the newest bar served so far
    last_served: Option<usize>,
}

/// Replays stored candles. Order placement is not available.
pub struct CsvReplayExchange {
    series: Mutex<HashMap<String, Series>>,
    balance: f64,
}

impl CsvReplayExchange {
    /// Build from in-memory candles. The first fetch shows `start` bars.
    pub fn from_candles(data: HashMap<String, Vec<Candle>>, start: usize, balance: f64) -> Self {
        let series = data
            .into_iter()
            .map(|(symbol, candles)| {
                let cursor = start.clamp(1, candles.len().max(1));
                (
                    symbol,
                    Series {
                        candles,
                        cursor,
                        last_served: None,
                    },
                )
            })
            .collect();
        Self {
            series: Mutex::new(series),
            balance,
        }
    }

    /// Load one CSV per symbol from `dir`
    pub fn from_dir(
        dir: impl AsRef<Path>,
        symbols: &[String],
        start: usize,
        balance: f64,
    ) -> Result<Self, ExchangeError> {
        let dir = dir.as_ref();
        let mut data = HashMap::new();
        for symbol in symbols {
            let path = dir.join(csv_file_name(symbol));
            let candles = load_csv(&path)?;
            info!(symbol = %symbol, bars = candles.len(), path = %path.display(), "Loaded replay candles");
            data.insert(symbol.clone(), candles);
        }
        Ok(Self::from_candles(data, start, balance))
    }

    /// Fetches left before the shortest series is exhausted
    pub fn remaining_fetches(&self) -> usize {
        self.series
            .lock()
            .map(|s| {
                s.values()
                    .map(|x| (x.candles.len() + 1).saturating_sub(x.cursor))
                    .min()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Series>>, ExchangeError> {
        self.series
            .lock()
            .map_err(|_| ExchangeError::Data("replay state poisoned".to_string()))
    }
}

/// Read candles from a CSV file, sorted by timestamp
pub fn load_csv(path: &Path) -> Result<Vec<Candle>, ExchangeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ExchangeError::Data(format!("{}: {}", path.display(), e)))?;

    let mut candles = Vec::new();
    for record in reader.deserialize::<Candle>() {
        let candle = record.map_err(|e| ExchangeError::Data(format!("{}: {}", path.display(), e)))?;
        candles.push(candle);
    }
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}

#[async_trait]
impl Exchange for CsvReplayExchange {
    async fn get_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let guard = self.lock()?;
        let s = guard
            .get(symbol)
            .ok_or_else(|| ExchangeError::Data(format!("no replay data for {}", symbol)))?;
        let idx = s.last_served.unwrap_or(s.cursor.saturating_sub(1));
        s.candles
            .get(idx)
            .map(|c| c.close)
            .ok_or_else(|| ExchangeError::Data(format!("empty replay series for {}", symbol)))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut guard = self.lock()?;
        let s = guard
            .get_mut(symbol)
            .ok_or_else(|| ExchangeError::Data(format!("no replay data for {}", symbol)))?;

        if s.cursor > s.candles.len() || s.candles.is_empty() {
            return Err(ExchangeError::Data(format!("replay exhausted for {}", symbol)));
        }

        let end = s.cursor;
        let begin = end.saturating_sub(limit);
        let window = s.candles[begin..end].to_vec();
        s.last_served = Some(end - 1);
        s.cursor += 1;
        debug!(symbol = %symbol, end, bars = window.len(), "Replay fetch");
        Ok(window)
    }

    async fn get_balance(&self, _asset: &str) -> Result<f64, ExchangeError> {
        Ok(self.balance)
    }

    async fn create_market_buy(&self, symbol: &str, _qty: f64) -> Result<String, ExchangeError> {
        Err(ExchangeError::Unsupported(format!("market buy on replay ({})", symbol)))
    }

    async fn create_market_sell(&self, symbol: &str, _qty: f64) -> Result<String, ExchangeError> {
        Err(ExchangeError::Unsupported(format!("market sell on replay ({})", symbol)))
    }

    async fn place_bracket(
        &self,
        symbol: &str,
        _qty: f64,
        _take_profit: f64,
        _stop_loss: f64,
    ) -> Result<BracketOrderIds, ExchangeError> {
        Err(ExchangeError::Unsupported(format!("bracket on replay ({})", symbol)))
    }

    async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<OrderSnapshot>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn fetch_closed_orders(
        &self,
        _symbol: &str,
    ) -> Result<Vec<OrderSnapshot>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        Err(ExchangeError::Unsupported(format!("cancel {} on replay", id)))
    }
}
