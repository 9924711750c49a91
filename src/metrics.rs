//! Performance metrics over closed trades and equity curves

use serde::{Deserialize, Serialize};

use crate::types::Trade;

const TRADING_DAYS: f64 = 252.0;

fn closed_pnls(trades: &[Trade]) -> impl Iterator<Item = f64> + '_ {
    trades.iter().filter_map(|t| t.pnl)
}

/// Fraction of closed trades with positive PnL, 0 for no trades
pub fn winrate(trades: &[Trade]) -> f64 {
    let (wins, total) = closed_pnls(trades).fold((0usize, 0usize), |(w, n), p| {
        (w + usize::from(p > 0.0), n + 1)
    });
    if total == 0 {
        0.0
    } else {
        wins as f64 / total as f64
    }
}

/// Gross profit over gross loss.
///
/// Infinite when there are profits and no losses, NaN when both are zero.
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let (profit, loss) = closed_pnls(trades).fold((0.0, 0.0), |(p, l), pnl| {
        if pnl > 0.0 {
            (p + pnl, l)
        } else {
            (p, l - pnl)
        }
    });
    if loss > 0.0 {
        profit / loss
    } else if profit > 0.0 {
        f64::INFINITY
    } else {
        f64::NAN
    }
}

/// Mean PnL per closed trade
pub fn expectancy(trades: &[Trade]) -> f64 {
    mean(&closed_pnls(trades).collect::<Vec<_>>())
}

/// Mean absolute PnL per closed trade
pub fn avg_trade(trades: &[Trade]) -> f64 {
    mean(&closed_pnls(trades).map(f64::abs).collect::<Vec<_>>())
}

/// Largest peak-to-trough decline as a positive fraction of the peak
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &eq in equity {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - eq) / peak);
        }
    }
    max_dd
}

/// Annualised Sharpe of per-period returns (population std, zero risk-free rate)
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let var = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / returns.len() as f64;
    let std = var.sqrt();
    if std <= 1e-12 || !std.is_finite() {
        return 0.0;
    }
    m / std * TRADING_DAYS.sqrt()
}

/// Compound annual growth between the first and last equity values
pub fn cagr(equity: &[f64], years: f64) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(&first), Some(&last)) if first > 0.0 && last > 0.0 && years > 0.0 => {
            (last / first).powf(1.0 / years) - 1.0
        }
        _ => 0.0,
    }
}

/// Per-period simple returns of an equity curve
pub fn equity_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Summary row for one simulation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub sharpe: f64,
    pub max_dd: f64,
    pub winrate: f64,
    pub pf: f64,
    pub expectancy: f64,
    pub cagr: f64,
    pub n_trades: usize,
}

impl PerformanceSummary {
    pub fn compute(trades: &[Trade], equity: &[f64], years: f64) -> Self {
        Self {
            sharpe: sharpe(&equity_returns(equity)),
            max_dd: max_drawdown(equity),
            winrate: winrate(trades),
            pf: profit_factor(trades),
            expectancy: expectancy(trades),
            cagr: cagr(equity, years),
            n_trades: trades.iter().filter(|t| t.is_closed()).count(),
        }
    }
}
