//! Indicator Engine - trend, momentum and filter series over candles
//!
//! Every series is aligned with its input and computed by a forward
//! recursion, so the value at index `i` depends only on bars `0..=i`:
//! - EMA (span smoothing, seeded with the first close)
//! - RSI (Wilder smoothing, α = 1/period)
//! - ATR (Wilder-smoothed true range)
//! - ADX (Wilder-smoothed directional movement)
//! - Volume SMA
//!
//! Undefined values are `None` and never raised as errors.

use crate::config::StrategyConfig;
use crate::types::Candle;

/// A candle plus the indicators derived up to and including it
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub candle: Candle,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: Option<f64>,
    /// Only populated when the ADX filter is enabled
    pub adx: Option<f64>,
    /// Only populated when the volume filter is enabled
    pub vol_sma: Option<f64>,
}

/// Compute the indicator rows for `candles`. Empty input yields an empty vec.
pub fn calculate(candles: &[Candle], cfg: &StrategyConfig) -> Vec<IndicatorRow> {
    if candles.is_empty() {
        return Vec::new();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ema_fast = ema(&closes, cfg.ema_fast);
    let ema_slow = ema(&closes, cfg.ema_slow);
    let rsi = rsi(&closes, cfg.rsi_period);

    let adx = if cfg.enable_adx {
        adx(candles, cfg.adx_period)
    } else {
        vec![None; candles.len()]
    };

    let vol_sma = if cfg.enable_vol_filter {
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        sma(&volumes, cfg.vol_sma_period)
    } else {
        vec![None; candles.len()]
    };

    candles
        .iter()
        .enumerate()
        .map(|(i, c)| IndicatorRow {
            candle: *c,
            ema_fast: ema_fast[i],
            ema_slow: ema_slow[i],
            rsi: rsi[i],
            adx: adx[i],
            vol_sma: vol_sma[i],
        })
        .collect()
}

/// Recursive exponential smoothing: `y = (1 - α)·y + α·x`, seeded with the
/// first defined input. Leading `None` inputs are skipped; a value is
/// reported once `min_periods` inputs have been observed.
pub fn exp_smooth(values: &[Option<f64>], alpha: f64, min_periods: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut state: Option<f64> = None;
    let mut seen = 0usize;

    for v in values {
        if let Some(x) = v {
            state = Some(match state {
                None => *x,
                Some(prev) => (1.0 - alpha) * prev + alpha * x,
            });
            seen += 1;
        }
        out.push(state.filter(|_| seen >= min_periods));
    }
    out
}

/// Exponential moving average with smoothing span `span` (α = 2/(span+1))
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &x in values {
        let y = match prev {
            None => x,
            Some(p) => (1.0 - alpha) * p + alpha * x,
        };
        out.push(y);
        prev = Some(y);
    }
    out
}

fn wilder(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    exp_smooth(values, 1.0 / period.max(1) as f64, period)
}

/// Wilder RSI. Undefined until `period` price changes have been seen.
///
/// A flat window (no gains, no losses) has no defined RSI; a window with
/// gains and no losses is 100.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut up = Vec::with_capacity(closes.len());
    let mut down = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        if i == 0 {
            up.push(None);
            down.push(None);
        } else {
            let delta = closes[i] - closes[i - 1];
            up.push(Some(delta.max(0.0)));
            down.push(Some((-delta).max(0.0)));
        }
    }

    let avg_up = wilder(&up, period);
    let avg_down = wilder(&down, period);

    avg_up
        .into_iter()
        .zip(avg_down)
        .map(|(u, d)| match (u, d) {
            (Some(u), Some(d)) if d > 0.0 => Some(100.0 - 100.0 / (1.0 + u / d)),
            (Some(u), Some(_)) if u > 0.0 => Some(100.0),
            _ => None,
        })
        .collect()
}

/// True range per bar; the first bar has no previous close and uses `high - low`
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let hl = c.high - c.low;
            match i.checked_sub(1).map(|p| candles[p].close) {
                Some(prev_close) => hl
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs()),
                None => hl,
            }
        })
        .collect()
}

/// Average true range, Wilder-smoothed, defined from index `period - 1`
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let tr: Vec<Option<f64>> = true_range(candles).into_iter().map(Some).collect();
    wilder(&tr, period)
}

/// Average directional index.
///
/// +DM keeps the up-move only where it is positive and exceeds the
/// down-move (and symmetrically for -DM). Undefined DX values count as 0.
pub fn adx(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let n = candles.len();
    let atr = atr(candles, period);

    let mut plus_dm = Vec::with_capacity(n);
    let mut minus_dm = Vec::with_capacity(n);
    for i in 0..n {
        if i == 0 {
            plus_dm.push(None);
            minus_dm.push(None);
            continue;
        }
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;
        plus_dm.push(Some(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        }));
        minus_dm.push(Some(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        }));
    }

    let plus_sm = wilder(&plus_dm, period);
    let minus_sm = wilder(&minus_dm, period);

    let dx: Vec<Option<f64>> = (0..n)
        .map(|i| {
            let value = match (plus_sm[i], minus_sm[i], atr[i]) {
                (Some(p), Some(m), Some(a)) if a > 0.0 => {
                    let pdi = 100.0 * p / a;
                    let mdi = 100.0 * m / a;
                    let sum = pdi + mdi;
                    if sum > 0.0 {
                        100.0 * (pdi - mdi).abs() / sum
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };
            Some(value)
        })
        .collect();

    wilder(&dx, period)
}

/// Simple moving average over a full `window`; `None` before that
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= window {
            sum -= values[i - window];
        }
        out.push(if i + 1 >= window {
            Some(sum / window as f64)
        } else {
            None
        });
    }
    out
}
