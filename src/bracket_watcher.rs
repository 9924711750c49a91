//! Bracket Watcher - cancels the unfilled leg of a take-profit / stop-loss pair
//!
//! One watcher task runs per live position. Each poll reads the symbol's open
//! and closed orders; once either leg shows as filled, the opposite leg is
//! canceled exactly once. The task ends when no bracket leg is left open, after
//! too many polls without progress, or on shutdown.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::exchange::Exchange;
use crate::types::BracketOrderIds;

/// The leg that executed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledLeg {
    pub id: String,
    pub price: f64,
}

/// Why a watcher stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchExit {
    /// No bracket leg remains open
    LegsClosed,
    /// Gave up after `max_idle_polls` polls without progress
    IdleLimit,
    Shutdown,
}

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done(WatchExit),
}

/// Final state of a finished watcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherReport {
    pub symbol: String,
    pub legs: BracketOrderIds,
    pub filled_leg: Option<FilledLeg>,
    /// Legs canceled by this watcher, in order
    pub canceled: Vec<String>,
    /// Cancels skipped because of dry-run
    pub dry_run_skipped: Vec<String>,
    pub polls: u32,
    pub exit: WatchExit,
}

pub struct BracketWatcher {
    symbol: String,
    legs: BracketOrderIds,
    poll_interval: Duration,
    max_idle_polls: u32,
    dry_run: bool,
    canceled: HashSet<String>,
    cancel_log: Vec<String>,
    dry_run_skipped: Vec<String>,
    filled: Option<FilledLeg>,
    idle_polls: u32,
    polls: u32,
}

impl BracketWatcher {
    pub fn new(symbol: &str, legs: BracketOrderIds, cfg: &WatcherConfig, dry_run: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            legs,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            max_idle_polls: cfg.max_idle_polls.max(1),
            dry_run,
            canceled: HashSet::new(),
            cancel_log: Vec::new(),
            dry_run_skipped: Vec::new(),
            filled: None,
            idle_polls: 0,
            polls: 0,
        }
    }

    pub fn filled_leg(&self) -> Option<&FilledLeg> {
        self.filled.as_ref()
    }

    /// Whether `id` was handled by a cancel (real or dry-run)
    fn handled(&self, id: &str) -> bool {
        self.canceled.contains(id) || self.dry_run_skipped.iter().any(|s| s == id)
    }

    /// Poll the exchange once and act on what it reports
    pub async fn poll_once(&mut self, exchange: &dyn Exchange) -> PollOutcome {
        self.polls += 1;

        let open = match exchange.fetch_open_orders(&self.symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "[WATCHER] fetch_open_orders failed");
                return self.idle();
            }
        };
        let closed = match exchange.fetch_closed_orders(&self.symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "[WATCHER] fetch_closed_orders failed");
                return self.idle();
            }
        };

        let mut progress = false;

        if self.filled.is_none() {
            if let Some(order) = closed
                .iter()
                .find(|o| o.status.is_filled() && self.legs.contains(&o.id))
            {
                info!(
                    symbol = %self.symbol,
                    leg = %order.id,
                    price = order.price,
                    "[WATCHER] Bracket leg filled"
                );
                self.filled = Some(FilledLeg {
                    id: order.id.clone(),
                    price: order.price,
                });
                progress = true;
            }
        }

        let opposite = self
            .filled
            .as_ref()
            .and_then(|f| self.legs.opposite(&f.id))
            .map(str::to_string);

        if let Some(opposite) = opposite {
            let still_open = open.iter().any(|o| o.id == opposite);
            if still_open && !self.handled(&opposite) {
                if self.dry_run {
                    info!(symbol = %self.symbol, leg = %opposite, "[WATCHER] DRY-RUN would cancel opposite leg");
                    self.dry_run_skipped.push(opposite);
                    progress = true;
                } else {
                    match exchange.cancel_order(&opposite, &self.symbol).await {
                        Ok(()) => {
                            info!(symbol = %self.symbol, leg = %opposite, "[WATCHER] Canceled opposite leg");
                            self.canceled.insert(opposite.clone());
                            self.cancel_log.push(opposite);
                            progress = true;
                        }
                        Err(e) => {
                            warn!(symbol = %self.symbol, leg = %opposite, error = %e, "[WATCHER] Cancel failed, will retry");
                        }
                    }
                }
            }
        }

        let filled_id = self.filled.as_ref().map(|f| f.id.as_str());
        let live_legs = open
            .iter()
            .filter(|o| self.legs.contains(&o.id))
            .filter(|o| Some(o.id.as_str()) != filled_id)
            .filter(|o| !self.handled(&o.id))
            .count();

        if live_legs == 0 {
            debug!(symbol = %self.symbol, polls = self.polls, "[WATCHER] No open legs left");
            return PollOutcome::Done(WatchExit::LegsClosed);
        }

        if progress {
            self.idle_polls = 0;
            PollOutcome::Pending
        } else {
            self.idle()
        }
    }

    fn idle(&mut self) -> PollOutcome {
        self.idle_polls += 1;
        if self.idle_polls >= self.max_idle_polls {
            warn!(symbol = %self.symbol, polls = self.polls, "[WATCHER] Idle poll limit reached");
            PollOutcome::Done(WatchExit::IdleLimit)
        } else {
            PollOutcome::Pending
        }
    }

    /// Poll until done or until `shutdown` flips to true
    pub async fn run(
        mut self,
        exchange: Arc<dyn Exchange>,
        mut shutdown: watch::Receiver<bool>,
    ) -> WatcherReport {
        info!(
            symbol = %self.symbol,
            tp = %self.legs.take_profit_id,
            sl = %self.legs.stop_loss_id,
            dry_run = self.dry_run,
            "[WATCHER] Started"
        );

        let exit = loop {
            if *shutdown.borrow() {
                break WatchExit::Shutdown;
            }
            if let PollOutcome::Done(exit) = self.poll_once(exchange.as_ref()).await {
                break exit;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Stop signal owner is gone
                        break WatchExit::Shutdown;
                    }
                }
            }
        };

        info!(symbol = %self.symbol, exit = ?exit, polls = self.polls, "[WATCHER] Finished");
        self.into_report(exit)
    }

    /// Run on a background task
    pub fn spawn(
        self,
        exchange: Arc<dyn Exchange>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<WatcherReport> {
        tokio::spawn(self.run(exchange, shutdown))
    }

    pub(crate) fn into_report(self, exit: WatchExit) -> WatcherReport {
        WatcherReport {
            symbol: self.symbol,
            legs: self.legs,
            filled_leg: self.filled,
            canceled: self.cancel_log,
            dry_run_skipped: self.dry_run_skipped,
            polls: self.polls,
            exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeError;
    use crate::types::{Candle, OrderSnapshot, OrderStatus, Side};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Two open bracket legs; cancels optionally remove the leg from the book
    struct FakeOrders {
        open: Mutex<Vec<OrderSnapshot>>,
        closed: Vec<OrderSnapshot>,
        canceled: Mutex<Vec<String>>,
        remove_on_cancel: bool,
    }

    impl FakeOrders {
        fn with_filled(filled_id: &str, status: OrderStatus, remove_on_cancel: bool) -> Self {
            let open = vec![
                OrderSnapshot {
                    id: "tp1".to_string(),
                    side: Side::Sell,
                    price: 110.0,
                    status: OrderStatus::Open,
                },
                OrderSnapshot {
                    id: "sl1".to_string(),
                    side: Side::Sell,
                    price: 90.0,
                    status: OrderStatus::Open,
                },
            ];
            let mut filled = open.iter().find(|o| o.id == filled_id).unwrap().clone();
            filled.status = status;
            Self {
                open: Mutex::new(open),
                closed: vec![filled],
                canceled: Mutex::new(Vec::new()),
                remove_on_cancel,
            }
        }

        fn canceled(&self) -> Vec<String> {
            self.canceled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Exchange for FakeOrders {
        async fn get_price(&self, _: &str) -> Result<f64, ExchangeError> {
            Ok(100.0)
        }
        async fn fetch_candles(&self, _: &str, _: &str, _: usize) -> Result<Vec<Candle>, ExchangeError> {
            Ok(Vec::new())
        }
        async fn get_balance(&self, _: &str) -> Result<f64, ExchangeError> {
            Ok(0.0)
        }
        async fn create_market_buy(&self, _: &str, _: f64) -> Result<String, ExchangeError> {
            Err(ExchangeError::Unsupported("buy".into()))
        }
        async fn create_market_sell(&self, _: &str, _: f64) -> Result<String, ExchangeError> {
            Err(ExchangeError::Unsupported("sell".into()))
        }
        async fn place_bracket(&self, _: &str, _: f64, _: f64, _: f64) -> Result<BracketOrderIds, ExchangeError> {
            Err(ExchangeError::Unsupported("bracket".into()))
        }
        async fn fetch_open_orders(&self, _: &str) -> Result<Vec<OrderSnapshot>, ExchangeError> {
            Ok(self.open.lock().unwrap().clone())
        }
        async fn fetch_closed_orders(&self, _: &str) -> Result<Vec<OrderSnapshot>, ExchangeError> {
            Ok(self.closed.clone())
        }
        async fn cancel_order(&self, id: &str, _: &str) -> Result<(), ExchangeError> {
            self.canceled.lock().unwrap().push(id.to_string());
            if self.remove_on_cancel {
                self.open.lock().unwrap().retain(|o| o.id != id);
            }
            Ok(())
        }
    }

    fn legs() -> BracketOrderIds {
        BracketOrderIds {
            take_profit_id: "tp1".to_string(),
            stop_loss_id: "sl1".to_string(),
        }
    }

    fn cfg() -> WatcherConfig {
        WatcherConfig {
            enabled: true,
            poll_interval_ms: 1,
            max_idle_polls: 50,
        }
    }

    #[tokio::test]
    async fn test_cancels_opposite_on_fill() {
        for (filled, expected) in [("tp1", "sl1"), ("sl1", "tp1")] {
            let ex = Arc::new(FakeOrders::with_filled(filled, OrderStatus::Filled, true));
            let (_tx, rx) = watch::channel(false);

            let report = BracketWatcher::new("BTC/USDT", legs(), &cfg(), false)
                .run(ex.clone(), rx)
                .await;

            assert_eq!(ex.canceled(), vec![expected.to_string()]);
            assert_eq!(report.exit, WatchExit::LegsClosed);
            assert_eq!(report.filled_leg.unwrap().id, filled);
        }
    }

    #[tokio::test]
    async fn test_never_cancels_twice() {
        // The exchange keeps listing the canceled leg as open
        let ex = Arc::new(FakeOrders::with_filled("tp1", OrderStatus::Closed, false));
        let mut watcher = BracketWatcher::new("BTC/USDT", legs(), &cfg(), false);

        for _ in 0..5 {
            watcher.poll_once(ex.as_ref()).await;
        }
        assert_eq!(ex.canceled(), vec!["sl1".to_string()]);

        let (_tx, rx) = watch::channel(false);
        let report = watcher.run(ex.clone(), rx).await;
        assert_eq!(report.canceled, vec!["sl1".to_string()]);
        assert_eq!(ex.canceled(), vec!["sl1".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_only_logs() {
        let ex = Arc::new(FakeOrders::with_filled("tp1", OrderStatus::Filled, true));
        let (_tx, rx) = watch::channel(false);

        let report = BracketWatcher::new("BTC/USDT", legs(), &cfg(), true)
            .spawn(ex.clone(), rx)
            .await
            .unwrap();

        assert!(ex.canceled().is_empty());
        assert!(report.canceled.is_empty());
        assert_eq!(report.dry_run_skipped, vec!["sl1".to_string()]);
        assert_eq!(report.exit, WatchExit::LegsClosed);
    }

    #[tokio::test]
    async fn test_gives_up_without_fill() {
        let ex = Arc::new(FakeOrders {
            closed: Vec::new(),
            ..FakeOrders::with_filled("tp1", OrderStatus::Filled, true)
        });
        let (_tx, rx) = watch::channel(false);
        let cfg = WatcherConfig {
            max_idle_polls: 3,
            ..cfg()
        };

        let report = BracketWatcher::new("BTC/USDT", legs(), &cfg, false)
            .run(ex.clone(), rx)
            .await;
        assert_eq!(report.exit, WatchExit::IdleLimit);
        assert_eq!(report.polls, 3);
        assert!(ex.canceled().is_empty());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let ex = Arc::new(FakeOrders {
            closed: Vec::new(),
            ..FakeOrders::with_filled("tp1", OrderStatus::Filled, true)
        });
        let (tx, rx) = watch::channel(false);
        let handle = BracketWatcher::new("BTC/USDT", legs(), &cfg(), false).spawn(ex, rx);

        tx.send(true).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.exit, WatchExit::Shutdown);
    }
}
