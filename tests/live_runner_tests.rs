//! Live runner against a scripted exchange: orders, brackets, watcher hand-off

mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tradebot::bracket_watcher::WatchExit;
    use tradebot::config::{AppConfig, RunMode};
    use tradebot::runner::LiveRunner;
    use tradebot::types::Candle;

    const BTC: &str = "BTC/USDT";

    /// Flat market with a bump and pullback on the last closed bars
    fn pullback_window() -> Vec<Candle> {
        let mut closes = vec![100.0; 60];
        closes[57] = 101.0;
        closes[59] = 102.0;
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let high = if c > 101.0 { c + 1.0 } else { 101.0 };
                Candle::new(DAY_START_MS + i as i64 * HOUR_MS, c, high, 98.0, c, 10.0)
            })
            .collect()
    }

    fn live_config(dry_run: bool) -> AppConfig {
        let mut cfg = fast_config(&[BTC]);
        cfg.bot.mode = RunMode::Live;
        cfg.bot.dry_run = dry_run;
        cfg.bot.max_rounds = 1;
        cfg.strategy.slippage_bps = 100.0;
        cfg.risk.risk_per_trade_pct = 0.01;
        cfg.risk.max_notional_per_trade = 500.0;
        cfg.watcher.poll_interval_ms = 5;
        cfg.watcher.max_idle_polls = 10_000;
        cfg
    }

    #[tokio::test]
    async fn test_buy_bracket_and_watcher_release() {
        let ex = Arc::new(ScriptedExchange::new(1000.0).script(BTC, vec![pullback_window()]));
        let mut runner = LiveRunner::new(live_config(false), ex.clone());
        let (_tx, rx) = watch::channel(false);

        let report = runner.run(rx).await;
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.open_symbols, vec![BTC.to_string()]);
        assert!(report.dry_run_intents.is_empty());

        let buys = ex.buys.lock().unwrap().clone();
        assert_eq!(buys.len(), 1);
        // 1% of 1000 over a 4.5 stop distance
        assert!((buys[0].1 - 2.2222).abs() < 1e-9);

        let brackets = ex.brackets.lock().unwrap().clone();
        let (_, qty, tp, sl) = brackets[0].clone();
        assert_eq!(qty, buys[0].1);
        assert!((sl - 97.5).abs() < 1e-9);
        assert!((tp - 111.0).abs() < 1e-9);
        assert!(runner.positions()[BTC].is_watched());

        let legs = report.orders[0].legs.clone().expect("bracket legs");
        ex.fill(&legs.take_profit_id, 111.0);

        let reports = tokio::time::timeout(Duration::from_secs(5), runner.finish())
            .await
            .expect("watcher finished");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].exit, WatchExit::LegsClosed);
        assert_eq!(*ex.cancels.lock().unwrap(), vec![legs.stop_loss_id.clone()]);
        assert!(runner.positions().is_empty());
        assert!(runner.today_pnl() > 0.0);
    }

    #[tokio::test]
    async fn test_unwatched_bracket_released_on_next_round() {
        let ex = Arc::new(ScriptedExchange::new(1000.0).script(BTC, vec![pullback_window()]));
        let mut cfg = live_config(false);
        cfg.watcher.enabled = false;
        let mut runner = LiveRunner::new(cfg, ex.clone());
        let (_tx, rx) = watch::channel(false);

        let report = runner.run(rx.clone()).await;
        assert!(!runner.positions()[BTC].is_watched());

        let legs = report.orders[0].legs.clone().expect("bracket legs");
        ex.fill(&legs.take_profit_id, 111.0);
        runner.run_round(&rx).await;

        assert!(runner.positions().is_empty());
        assert!(runner.today_pnl() > 0.0);
        assert_eq!(*ex.cancels.lock().unwrap(), vec![legs.stop_loss_id.clone()]);
        // Same closed bar on the next round is not bought again
        assert_eq!(ex.buy_count(), 1);
    }

    #[tokio::test]
    async fn test_idle_watcher_position_released_after_fill() {
        let ex = Arc::new(ScriptedExchange::new(1000.0).script(BTC, vec![pullback_window()]));
        let mut cfg = live_config(false);
        cfg.watcher.max_idle_polls = 3;
        let mut runner = LiveRunner::new(cfg, ex.clone());
        let (_tx, rx) = watch::channel(false);

        let report = runner.run(rx.clone()).await;
        let legs = report.orders[0].legs.clone().expect("bracket legs");

        // Let the watcher give up before anything fills
        tokio::time::sleep(Duration::from_millis(200)).await;
        ex.fill(&legs.take_profit_id, 111.0);

        for _ in 0..3 {
            runner.run_round(&rx).await;
        }

        assert!(runner.positions().is_empty());
        assert!(runner.today_pnl() > 0.0);
        let exits: Vec<WatchExit> = runner.report().watcher_reports.iter().map(|r| r.exit).collect();
        assert_eq!(exits, vec![WatchExit::IdleLimit, WatchExit::LegsClosed]);
        assert_eq!(*ex.cancels.lock().unwrap(), vec![legs.stop_loss_id.clone()]);
    }

    #[tokio::test]
    async fn test_dry_run_sends_no_orders() {
        let ex = Arc::new(ScriptedExchange::new(1000.0).script(BTC, vec![pullback_window()]));
        let mut cfg = live_config(true);
        cfg.bot.max_rounds = 3;
        let mut runner = LiveRunner::new(cfg, ex.clone());
        let (_tx, rx) = watch::channel(false);

        let report = runner.run(rx).await;
        assert_eq!(ex.buy_count(), 0);
        assert!(ex.brackets.lock().unwrap().is_empty());
        assert_eq!(report.dry_run_intents.len(), 1);
        assert!(report.orders.is_empty());
        assert!(runner.positions().is_empty());
    }

    #[tokio::test]
    async fn test_bracket_failure_keeps_position_tracked() {
        let ex = Arc::new(
            ScriptedExchange::new(1000.0)
                .failing_brackets()
                .script(BTC, vec![pullback_window()]),
        );
        let mut cfg = live_config(false);
        cfg.bot.max_rounds = 2;
        let mut runner = LiveRunner::new(cfg, ex.clone());
        let (_tx, rx) = watch::channel(false);

        let report = runner.run(rx).await;
        assert_eq!(ex.buy_count(), 1);
        assert_eq!(report.orders[0].legs, None);
        assert_eq!(report.open_symbols, vec![BTC.to_string()]);
        assert!(!runner.positions()[BTC].is_watched());
    }

    #[tokio::test]
    async fn test_kill_switch_stops_live_entries() {
        let ex = Arc::new(ScriptedExchange::new(1000.0).script(BTC, vec![pullback_window()]));
        let mut cfg = live_config(false);
        cfg.risk.max_daily_loss_pct = 0.0;
        let mut runner = LiveRunner::new(cfg, ex.clone());
        let (_tx, rx) = watch::channel(false);

        let report = runner.run(rx).await;
        assert!(report.halted);
        assert!(runner.is_halted());
        assert_eq!(ex.buy_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_watchers() {
        let ex = Arc::new(ScriptedExchange::new(1000.0).script(BTC, vec![pullback_window()]));
        let mut runner = LiveRunner::new(live_config(false), ex.clone());
        let (tx, rx) = watch::channel(false);

        runner.run(rx).await;
        tx.send(true).unwrap();

        let reports = tokio::time::timeout(Duration::from_secs(5), runner.finish())
            .await
            .expect("watcher stopped");
        assert_eq!(reports[0].exit, WatchExit::Shutdown);
        // Legs still open, so the position stays tracked
        assert_eq!(runner.positions().len(), 1);
        assert!(ex.cancels.lock().unwrap().is_empty());
    }
}
