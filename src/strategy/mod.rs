//! Signal Generator - trend pullback long entries
//!
//! Works on the last CLOSED candle only. The final element of the input is
//! treated as a potentially incomplete bar and never looked at, so the result
//! is the same whatever that bar holds.
//!
//! Entry conditions on the last closed bar:
//! - Trend: fast EMA above slow EMA
//! - Momentum: RSI inside the buy band widened by a fixed tolerance
//! - Pullback: previous closed bar closed higher than the last closed bar
//! - Price confirmation: close plus slippage tolerance at or above fast EMA
//! - Optional ADX strength and volume filters

use crate::config::StrategyConfig;
use crate::indicators::{self, IndicatorRow};
use crate::types::{Candle, Signal};

/// Tolerance added on both sides of the RSI buy band
pub const RSI_MARGIN: f64 = 3.0;

/// Outcome of each entry condition on the last closed bar
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvaluation {
    /// Timestamp of the last closed bar the evaluation refers to
    pub closed_ts: i64,
    pub trend: bool,
    pub momentum: bool,
    pub pullback: bool,
    pub price_confirm: bool,
    /// True when the ADX filter is disabled
    pub adx_ok: bool,
    /// True when the volume filter is disabled
    pub volume_ok: bool,
    /// Indicator row of the last closed bar
    pub row: IndicatorRow,
}

impl SignalEvaluation {
    pub fn is_buy(&self) -> bool {
        self.trend
            && self.momentum
            && self.pullback
            && self.price_confirm
            && self.adx_ok
            && self.volume_ok
    }

    /// Name of the first condition that failed, for logging
    pub fn filter_reason(&self) -> Option<&'static str> {
        if !self.trend {
            Some("trend")
        } else if !self.momentum {
            Some("rsi_band")
        } else if !self.pullback {
            Some("no_pullback")
        } else if !self.price_confirm {
            Some("below_ema_fast")
        } else if !self.adx_ok {
            Some("adx_weak")
        } else if !self.volume_ok {
            Some("low_volume")
        } else {
            None
        }
    }
}

/// Closed bars required before any evaluation happens
pub fn min_closed_bars(cfg: &StrategyConfig) -> usize {
    cfg.ema_slow.max(cfg.rsi_period) + 2
}

/// Evaluate all entry conditions. `None` when there is not enough closed
/// history to decide.
pub fn evaluate(candles: &[Candle], cfg: &StrategyConfig) -> Option<SignalEvaluation> {
    if candles.len() < 2 {
        return None;
    }
    let closed = &candles[..candles.len() - 1];
    if closed.len() < min_closed_bars(cfg) {
        return None;
    }

    let rows = indicators::calculate(closed, cfg);
    let i = rows.len() - 1;
    let last = &rows[i];
    let prev = &rows[i - 1];
    let close = last.candle.close;

    let trend = last.ema_fast > last.ema_slow;

    let momentum = last.rsi.is_some_and(|rsi| {
        rsi >= cfg.rsi_buy_min - RSI_MARGIN && rsi <= cfg.rsi_buy_max + RSI_MARGIN
    });

    let pullback = prev.candle.close > close;

    let tolerance = cfg.slippage_bps / 10_000.0 * close.abs();
    let price_confirm = close + tolerance >= last.ema_fast;

    let adx_ok = !cfg.enable_adx || last.adx.is_some_and(|adx| adx >= cfg.adx_threshold);

    let volume_ok = !cfg.enable_vol_filter
        || last
            .vol_sma
            .is_some_and(|sma| last.candle.volume >= sma * cfg.volume_factor);

    Some(SignalEvaluation {
        closed_ts: last.candle.timestamp,
        trend,
        momentum,
        pullback,
        price_confirm,
        adx_ok,
        volume_ok,
        row: last.clone(),
    })
}

/// `Some(Signal::Buy)` when every entry condition holds on the last closed bar
pub fn generate_signal(candles: &[Candle], cfg: &StrategyConfig) -> Option<Signal> {
    let eval = evaluate(candles, cfg)?;
    if eval.is_buy() {
        Some(Signal::Buy)
    } else {
        tracing::trace!(
            closed_ts = eval.closed_ts,
            reason = eval.filter_reason().unwrap_or("none"),
            "No entry"
        );
        None
    }
}
