//! Risk Guard - stop placement and daily loss controls
//!
//! Implements:
//! - ATR-based stop price (never negative)
//! - Swing-low fallback stop
//! - Take-profit from a reward/risk ratio
//! - Daily loss guard and kill switch
//! - Realized PnL tracking per UTC day

pub mod correlation;
pub mod sizing;

pub use correlation::{aligned_correlation, count_correlated, pearson, timed_returns, CorrelationGuard};
pub use sizing::{position_size, SizingError};

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Invalid stop inputs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StopError {
    #[error("no lows to compute a swing-low stop from")]
    EmptyLows,
    #[error("swing-low stop {0} is not positive")]
    NonPositive(f64),
}

/// Stop price `atr × k` below entry, floored at zero
pub fn compute_stop(entry: f64, atr: f64, k: f64) -> f64 {
    (entry - atr * k).max(0.0)
}

/// Lowest low over the last `min(lookback, len)` values.
///
/// An empty window (no lows, or a zero lookback) is `EmptyLows`.
pub fn swing_low_stop(lows: &[f64], lookback: usize) -> Result<f64, StopError> {
    let window = lookback.min(lows.len());
    if window == 0 {
        return Err(StopError::EmptyLows);
    }
    let start = lows.len() - window;
    let stop = lows[start..].iter().copied().fold(f64::INFINITY, f64::min);
    if stop <= 0.0 {
        return Err(StopError::NonPositive(stop));
    }
    Ok(stop)
}

/// Target `rr` times the stop distance above entry
pub fn take_profit(entry: f64, stop: f64, rr: f64) -> f64 {
    entry + (entry - stop) * rr
}

/// False once the summed PnL reaches the loss limit
pub fn daily_loss_guard(realized_pnl: &[f64], base_equity: f64, max_loss_fraction: f64) -> bool {
    let total: f64 = realized_pnl.iter().sum();
    let limit = base_equity.abs() * max_loss_fraction.abs();
    total > -limit
}

/// True means stop opening new positions now
pub fn kill_switch(realized_pnl: &[f64], base_equity: f64, max_loss_fraction: f64) -> bool {
    !daily_loss_guard(realized_pnl, base_equity, max_loss_fraction)
}

/// Realized PnL bucketed by UTC date of the exit
#[derive(Debug, Clone, Default)]
pub struct DailyLossTracker {
    by_day: BTreeMap<NaiveDate, Vec<f64>>,
}

impl DailyLossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn date_key(ts_ms: i64) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(ts_ms)
            .unwrap_or_default()
            .date_naive()
    }

    /// Record a realized PnL at exit time `ts_ms` (Unix milliseconds)
    pub fn record(&mut self, ts_ms: i64, pnl: f64) {
        self.by_day.entry(Self::date_key(ts_ms)).or_default().push(pnl);
    }

    /// Realized PnL list for the day containing `ts_ms`
    pub fn day_pnl(&self, ts_ms: i64) -> &[f64] {
        self.by_day
            .get(&Self::date_key(ts_ms))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn day_total(&self, ts_ms: i64) -> f64 {
        self.day_pnl(ts_ms).iter().sum()
    }

    /// Kill switch evaluated on the day containing `ts_ms`
    pub fn kill_switch(&self, ts_ms: i64, base_equity: f64, max_loss_fraction: f64) -> bool {
        kill_switch(self.day_pnl(ts_ms), base_equity, max_loss_fraction)
    }
}
