//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tradebot::config::AppConfig;
use tradebot::exchange::{Exchange, ExchangeError};
use tradebot::types::{BracketOrderIds, Candle, OrderSnapshot, OrderStatus, Side};

/// 2023-11-14 00:00:00 UTC
pub const DAY_START_MS: i64 = 1_699_920_000_000;
pub const HOUR_MS: i64 = 3_600_000;

// ============================================================================
// Candle builders
// ============================================================================

/// One hourly bar per close, high/low one unit around the close
pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle::new(DAY_START_MS + i as i64 * HOUR_MS, c, c + 1.0, c - 1.0, c, 10.0))
        .collect()
}

/// Steady uptrend ending in a one-bar pullback; the forming bar trades at 298.5
pub fn btc_closes() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..200).map(|i| 100.0 + i as f64).collect();
    closes[198] = 296.5;
    closes[199] = 298.5;
    closes
}

/// Same path scaled by two; returns move in lockstep with BTC
pub fn eth_closes() -> Vec<f64> {
    btc_closes().iter().map(|c| c * 2.0).collect()
}

/// Uptrend with an alternating 1.5 offset; weakly correlated with BTC
pub fn bnb_closes() -> Vec<f64> {
    (0..200)
        .map(|i| 100.0 + i as f64 + if i % 2 == 1 { 1.5 } else { 0.0 })
        .collect()
}

/// Noisy half-unit uptrend over 201 bars, ending in a pullback that signals
/// both on the full window and on the first 200 bars
pub fn noisy_trend_closes() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..201)
        .map(|i| 100.0 + 0.5 * i as f64 + ((i * 37) % 11) as f64 * 0.4 - 2.0)
        .collect();
    closes[197] = closes[196] + 1.0;
    closes[198] = closes[197] - 0.2;
    closes[199] = closes[198] - 0.2;
    closes[200] = closes[199] + 0.5;
    closes
}

/// Replace the forming bar's range, keeping its timestamp and close
pub fn with_forming_range(mut candles: Vec<Candle>, low: f64, high: f64) -> Vec<Candle> {
    if let Some(last) = candles.last_mut() {
        last.low = low;
        last.high = high;
    }
    candles
}

/// Small-period config that fires on the fixtures above
pub fn fast_config(symbols: &[&str]) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.bot.symbols_whitelist = symbols.iter().map(|s| s.to_string()).collect();
    cfg.bot.initial_balance = 1000.0;
    cfg.strategy.ema_fast = 3;
    cfg.strategy.ema_slow = 5;
    cfg.strategy.rsi_period = 3;
    cfg.strategy.rsi_buy_min = 0.0;
    cfg.strategy.rsi_buy_max = 100.0;
    cfg.strategy.slippage_bps = 0.0;
    cfg.fees.taker = 0.0;
    cfg.fees.maker = 0.0;
    cfg.risk.risk_per_trade_pct = 0.1;
    cfg.risk.base_equity = 1000.0;
    cfg
}

// ============================================================================
// Scripted exchange
// ============================================================================

/// In-memory exchange. Each `fetch_candles` pops the next scripted window
/// for the symbol; the last window repeats once the script runs out.
pub struct ScriptedExchange {
    windows: Mutex<HashMap<String, VecDeque<Vec<Candle>>>>,
    balance: f64,
    next_id: AtomicU64,
    pub buys: Mutex<Vec<(String, f64)>>,
    pub brackets: Mutex<Vec<(String, f64, f64, f64)>>,
    pub cancels: Mutex<Vec<String>>,
    open_orders: Mutex<Vec<OrderSnapshot>>,
    closed_orders: Mutex<Vec<OrderSnapshot>>,
    fail_brackets: bool,
}

impl ScriptedExchange {
    pub fn new(balance: f64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            balance,
            next_id: AtomicU64::new(1),
            buys: Mutex::new(Vec::new()),
            brackets: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            open_orders: Mutex::new(Vec::new()),
            closed_orders: Mutex::new(Vec::new()),
            fail_brackets: false,
        }
    }

    pub fn failing_brackets(mut self) -> Self {
        self.fail_brackets = true;
        self
    }

    /// Queue candle windows for `symbol`, served in order
    pub fn script(self, symbol: &str, windows: Vec<Vec<Candle>>) -> Self {
        self.windows
            .lock()
            .unwrap()
            .insert(symbol.to_string(), windows.into());
        self
    }

    /// Move an open order to the closed list as filled at `price`
    pub fn fill(&self, id: &str, price: f64) {
        let mut open = self.open_orders.lock().unwrap();
        if let Some(pos) = open.iter().position(|o| o.id == id) {
            let mut order = open.remove(pos);
            order.status = OrderStatus::Filled;
            order.price = price;
            self.closed_orders.lock().unwrap().push(order);
        }
    }

    pub fn buy_count(&self) -> usize {
        self.buys.lock().unwrap().len()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    async fn get_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let windows = self.windows.lock().unwrap();
        windows
            .get(symbol)
            .and_then(|q| q.front())
            .and_then(|w| w.last())
            .map(|c| c.close)
            .ok_or_else(|| ExchangeError::Data(format!("no data for {}", symbol)))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut windows = self.windows.lock().unwrap();
        let queue = windows
            .get_mut(symbol)
            .ok_or_else(|| ExchangeError::Transient(format!("no script for {}", symbol)))?;
        match queue.len() {
            0 => Err(ExchangeError::Data(format!("empty script for {}", symbol))),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.pop_front().unwrap_or_default()),
        }
    }

    async fn get_balance(&self, _asset: &str) -> Result<f64, ExchangeError> {
        Ok(self.balance)
    }

    async fn create_market_buy(&self, symbol: &str, qty: f64) -> Result<String, ExchangeError> {
        self.buys.lock().unwrap().push((symbol.to_string(), qty));
        Ok(self.next_id("buy"))
    }

    async fn create_market_sell(&self, _symbol: &str, _qty: f64) -> Result<String, ExchangeError> {
        Ok(self.next_id("sell"))
    }

    async fn place_bracket(
        &self,
        symbol: &str,
        qty: f64,
        take_profit: f64,
        stop_loss: f64,
    ) -> Result<BracketOrderIds, ExchangeError> {
        if self.fail_brackets {
            return Err(ExchangeError::Rejected("bracket refused".to_string()));
        }
        self.brackets
            .lock()
            .unwrap()
            .push((symbol.to_string(), qty, take_profit, stop_loss));
        let legs = BracketOrderIds {
            take_profit_id: self.next_id("tp"),
            stop_loss_id: self.next_id("sl"),
        };
        let mut open = self.open_orders.lock().unwrap();
        open.push(OrderSnapshot {
            id: legs.take_profit_id.clone(),
            side: Side::Sell,
            price: take_profit,
            status: OrderStatus::Open,
        });
        open.push(OrderSnapshot {
            id: legs.stop_loss_id.clone(),
            side: Side::Sell,
            price: stop_loss,
            status: OrderStatus::Open,
        });
        Ok(legs)
    }

    async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<OrderSnapshot>, ExchangeError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    async fn fetch_closed_orders(
        &self,
        _symbol: &str,
    ) -> Result<Vec<OrderSnapshot>, ExchangeError> {
        Ok(self.closed_orders.lock().unwrap().clone())
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        self.cancels.lock().unwrap().push(id.to_string());
        let mut open = self.open_orders.lock().unwrap();
        if let Some(pos) = open.iter().position(|o| o.id == id) {
            let mut order = open.remove(pos);
            order.status = OrderStatus::Canceled;
            self.closed_orders.lock().unwrap().push(order);
        }
        Ok(())
    }
}
