//! Entry gates shared by the paper and live loops

use std::collections::HashMap;

use super::{EntryError, Rejection};
use crate::config::{AppConfig, RiskConfig};
use crate::indicators;
use crate::paper_trading::ExecutionCosts;
use crate::risk::sizing::floor_to_step;
use crate::risk::{compute_stop, position_size, swing_low_stop, take_profit, CorrelationGuard, StopError};
use crate::types::{Candle, Side};

/// A fully sized entry, ready to execute
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub symbol: String,
    /// Last closed bar the signal fired on
    pub closed_ts: i64,
    /// Timestamp of the forming bar the entry is placed on
    pub entry_ts: i64,
    /// Latest price before slippage
    pub reference_price: f64,
    /// Expected fill after slippage
    pub fill_price: f64,
    pub stop: f64,
    pub take_profit: f64,
    pub qty: f64,
}

impl EntryPlan {
    pub fn notional(&self) -> f64 {
        self.fill_price * self.qty
    }
}

/// Stop, target and quantity for a long entry at the latest price.
///
/// The stop sits `atr_k` ATRs below entry (ATR over closed bars), falling back
/// to the recent swing low when ATR is undefined or the stop would not be
/// positive. Quantity is the smaller of the risk-budget size and what fits
/// under the remaining per-pair notional cap.
pub fn plan_entry(
    symbol: &str,
    candles: &[Candle],
    closed_ts: i64,
    cfg: &AppConfig,
    equity: f64,
    available_cash: f64,
    exposure: f64,
) -> Result<EntryPlan, EntryError> {
    let risk = &cfg.risk;
    let (last, closed) = match candles.split_last() {
        Some((last, closed)) if !closed.is_empty() => (last, closed),
        _ => return Err(StopError::EmptyLows.into()),
    };
    let reference = last.close;

    let atr_stop = indicators::atr(closed, risk.atr_period)
        .last()
        .copied()
        .flatten()
        .map(|atr| compute_stop(reference, atr, risk.atr_k))
        .filter(|stop| *stop > 0.0 && *stop < reference);

    let stop = match atr_stop {
        Some(stop) => stop,
        None => {
            let lows: Vec<f64> = closed.iter().map(|c| c.low).collect();
            swing_low_stop(&lows, risk.swing_lookback)?
        }
    };
    if stop >= reference {
        return Err(EntryError::StopAboveEntry {
            entry: reference,
            stop,
        });
    }
    let tp = take_profit(reference, stop, risk.risk_rr);

    let costs = ExecutionCosts::from_config(cfg);
    let fill = costs.fill_price(reference, Side::Buy);

    let risk_qty = position_size(reference, stop, equity, risk.risk_per_trade_pct, risk.lot_step)?;

    let cap = risk.pair_cap(symbol);
    let room = cap - exposure;
    if room <= 0.0 {
        return Err(Rejection::PairCapReached { exposure, cap }.into());
    }
    let cap_qty = floor_to_step(room / fill, risk.lot_step);
    let qty = risk_qty.min(cap_qty);
    if qty <= 0.0 {
        return Err(Rejection::PairCapReached { exposure, cap }.into());
    }

    let notional = fill * qty;
    let needed = notional + costs.taker_fee(notional);
    if needed > available_cash {
        return Err(Rejection::InsufficientEquity {
            needed,
            available: available_cash,
        }
        .into());
    }

    Ok(EntryPlan {
        symbol: symbol.to_string(),
        closed_ts,
        entry_ts: last.timestamp,
        reference_price: reference,
        fill_price: fill,
        stop,
        take_profit: tp,
        qty,
    })
}

/// Per-run portfolio gates: caps, duplicate suppression and correlation
#[derive(Debug, Clone)]
pub struct EntryGates {
    last_signal_ts: HashMap<String, i64>,
    correlation: CorrelationGuard,
}

impl EntryGates {
    pub fn new(risk: &RiskConfig) -> Self {
        Self {
            last_signal_ts: HashMap::new(),
            correlation: CorrelationGuard {
                threshold: risk.correlation_threshold,
                max_correlated: risk.max_correlated_trades,
                lookback: risk.correlation_lookback,
            },
        }
    }

    /// Already-open, max-open-trades and per-pair exposure checks
    pub fn check_capacity(
        &self,
        risk: &RiskConfig,
        symbol: &str,
        is_open: bool,
        open_count: usize,
        exposure: f64,
    ) -> Result<(), Rejection> {
        if is_open {
            return Err(Rejection::AlreadyOpen);
        }
        if open_count >= risk.max_open_trades {
            return Err(Rejection::MaxOpenTrades {
                open: open_count,
                max: risk.max_open_trades,
            });
        }
        let cap = risk.pair_cap(symbol);
        if exposure >= cap {
            return Err(Rejection::PairCapReached { exposure, cap });
        }
        Ok(())
    }

    /// Accept each closed bar once per symbol; later calls for the same bar are rejected
    pub fn check_duplicate(&mut self, symbol: &str, closed_ts: i64) -> Result<(), Rejection> {
        if self.last_signal_ts.get(symbol) == Some(&closed_ts) {
            return Err(Rejection::DuplicateSignal(closed_ts));
        }
        self.last_signal_ts.insert(symbol.to_string(), closed_ts);
        Ok(())
    }

    pub fn last_signal_ts(&self, symbol: &str) -> Option<i64> {
        self.last_signal_ts.get(symbol).copied()
    }

    /// Reject when too many held symbols move with the candidate
    pub fn check_correlation(&self, candidate: &[Candle], held: &[&[Candle]]) -> Result<(), Rejection> {
        if held.is_empty() {
            return Ok(());
        }
        let count = self.correlation.correlated_count(candidate, held);
        if count >= self.correlation.max_correlated {
            return Err(Rejection::Correlated {
                count,
                max: self.correlation.max_correlated,
            });
        }
        Ok(())
    }
}
