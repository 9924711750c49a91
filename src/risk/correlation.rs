//! Cross-symbol correlation guard
//!
//! Limits how many open positions may move together with a new candidate.
//! Correlation is Pearson over percentage returns of the last closed bars,
//! joined on the bar timestamps both symbols share.

use std::cmp::Ordering;

use crate::types::Candle;

/// Percentage returns keyed by the timestamp of the bar each return ends on.
///
/// A step from a zero close has no return; its timestamp is simply absent.
pub fn timed_returns(candles: &[Candle]) -> Vec<(i64, f64)> {
    candles
        .windows(2)
        .filter(|w| w[0].close != 0.0)
        .map(|w| (w[1].timestamp, w[1].close / w[0].close - 1.0))
        .collect()
}

/// Inner join of two timestamp-ordered series on their shared timestamps
pub fn align(a: &[(i64, f64)], b: &[(i64, f64)]) -> (Vec<f64>, Vec<f64>) {
    let (mut i, mut j) = (0, 0);
    let mut xa = Vec::new();
    let mut xb = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                xa.push(a[i].1);
                xb.push(b[j].1);
                i += 1;
                j += 1;
            }
        }
    }
    (xa, xb)
}

/// Pearson correlation of two paired series.
///
/// `None` when the lengths differ, with fewer than 3 points, or for a constant series.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n != b.len() || n < 3 {
        return None;
    }

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(cov / denom)
}

/// Correlation over the timestamps both series share
pub fn aligned_correlation(a: &[(i64, f64)], b: &[(i64, f64)]) -> Option<f64> {
    let (xa, xb) = align(a, b);
    pearson(&xa, &xb)
}

/// Number of series in `others` whose correlation with `candidate` exceeds `threshold`
pub fn count_correlated<'a, I>(candidate: &[(i64, f64)], others: I, threshold: f64) -> usize
where
    I: IntoIterator<Item = &'a [(i64, f64)]>,
{
    others
        .into_iter()
        .filter_map(|other| aligned_correlation(candidate, other))
        .filter(|corr| *corr > threshold)
        .count()
}

/// Correlation guard parameters
#[derive(Debug, Clone, Copy)]
pub struct CorrelationGuard {
    pub threshold: f64,
    pub max_correlated: usize,
    /// Closed bars considered per symbol
    pub lookback: usize,
}

impl CorrelationGuard {
    /// Timed returns of the last `lookback` closed bars (trailing forming bar excluded)
    pub fn closed_returns(&self, candles: &[Candle]) -> Vec<(i64, f64)> {
        let closed = &candles[..candles.len().saturating_sub(1)];
        let start = closed.len().saturating_sub(self.lookback);
        timed_returns(&closed[start..])
    }

    /// Count of held symbols correlated with the candidate.
    ///
    /// Held windows may come from an earlier fetch than the candidate's, so
    /// returns are matched by bar timestamp rather than by position.
    pub fn correlated_count(&self, candidate: &[Candle], held: &[&[Candle]]) -> usize {
        let cand = self.closed_returns(candidate);
        let held_returns: Vec<Vec<(i64, f64)>> = held.iter().map(|c| self.closed_returns(c)).collect();
        count_correlated(&cand, held_returns.iter().map(Vec::as_slice), self.threshold)
    }

    /// True when the candidate should be rejected
    pub fn rejects(&self, candidate: &[Candle], held: &[&[Candle]]) -> bool {
        self.correlated_count(candidate, held) >= self.max_correlated
    }
}
