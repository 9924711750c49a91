//! Position sizing from a fixed fractional risk budget

use thiserror::Error;

/// Rejected sizing inputs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("equity must be positive, got {0}")]
    NonPositiveEquity(f64),
    #[error("risk fraction must be positive, got {0}")]
    NonPositiveRisk(f64),
    #[error("entry and stop are equal ({0})")]
    ZeroStopDistance(f64),
    #[error("risk budget {budget:.6} is below one lot step of {step}")]
    BelowLotStep { budget: f64, step: f64 },
}

/// Guards float noise when dividing by the lot step (4.0 / 0.1 = 39.999...)
const STEP_EPS: f64 = 1e-9;

/// Quantity risking `equity × risk_fraction` between entry and stop,
/// floored to a multiple of `lot_step` when the step is positive.
pub fn position_size(
    entry: f64,
    stop: f64,
    equity: f64,
    risk_fraction: f64,
    lot_step: f64,
) -> Result<f64, SizingError> {
    if equity <= 0.0 {
        return Err(SizingError::NonPositiveEquity(equity));
    }
    if risk_fraction <= 0.0 {
        return Err(SizingError::NonPositiveRisk(risk_fraction));
    }
    let distance = (entry - stop).abs();
    if distance <= 0.0 {
        return Err(SizingError::ZeroStopDistance(entry));
    }

    let budget = equity * risk_fraction;
    let raw = budget / distance;
    let qty = floor_to_step(raw, lot_step);

    if qty <= 0.0 {
        return Err(SizingError::BelowLotStep {
            budget,
            step: lot_step,
        });
    }
    Ok(qty)
}

/// Floor `qty` to a multiple of `step`; a non-positive step leaves it unchanged
pub fn floor_to_step(qty: f64, step: f64) -> f64 {
    if step > 0.0 {
        (qty / step + STEP_EPS).floor() * step
    } else {
        qty
    }
}
