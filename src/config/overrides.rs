//! Parameter overrides for sweep variants
//!
//! A sweep builds each combination as an independent `AppConfig` via
//! [`AppConfig::with_overrides`] instead of patching a shared config.

use super::AppConfig;
use serde::{Deserialize, Serialize};

/// Optional replacements for the tunable strategy and risk parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamOverrides {
    pub ema_fast: Option<usize>,
    pub ema_slow: Option<usize>,
    pub rsi_period: Option<usize>,
    pub rsi_buy_min: Option<f64>,
    pub rsi_buy_max: Option<f64>,
    pub slippage_bps: Option<f64>,
    pub atr_period: Option<usize>,
    pub atr_k: Option<f64>,
    pub risk_rr: Option<f64>,
    pub risk_per_trade_pct: Option<f64>,
    pub max_open_trades: Option<usize>,
    pub max_notional_per_pair: Option<f64>,
    pub max_correlated_trades: Option<usize>,
    pub correlation_threshold: Option<f64>,
}

impl ParamOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AppConfig {
    /// Return a copy of this config with every `Some` override applied
    pub fn with_overrides(&self, o: &ParamOverrides) -> AppConfig {
        let mut cfg = self.clone();
        let s = &mut cfg.strategy;
        let r = &mut cfg.risk;

        if let Some(v) = o.ema_fast {
            s.ema_fast = v;
        }
        if let Some(v) = o.ema_slow {
            s.ema_slow = v;
        }
        if let Some(v) = o.rsi_period {
            s.rsi_period = v;
        }
        if let Some(v) = o.rsi_buy_min {
            s.rsi_buy_min = v;
        }
        if let Some(v) = o.rsi_buy_max {
            s.rsi_buy_max = v;
        }
        if let Some(v) = o.slippage_bps {
            s.slippage_bps = v;
        }
        if let Some(v) = o.atr_period {
            r.atr_period = v;
        }
        if let Some(v) = o.atr_k {
            r.atr_k = v;
        }
        if let Some(v) = o.risk_rr {
            r.risk_rr = v;
        }
        if let Some(v) = o.risk_per_trade_pct {
            r.risk_per_trade_pct = v;
        }
        if let Some(v) = o.max_open_trades {
            r.max_open_trades = v;
        }
        if o.max_notional_per_pair.is_some() {
            r.max_notional_per_pair = o.max_notional_per_pair;
        }
        if let Some(v) = o.max_correlated_trades {
            r.max_correlated_trades = v;
        }
        if let Some(v) = o.correlation_threshold {
            r.correlation_threshold = v;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_leave_base_untouched() {
        let base = AppConfig::default();
        let o = ParamOverrides {
            ema_fast: Some(20),
            atr_k: Some(2.0),
            ..Default::default()
        };

        let variant = base.with_overrides(&o);
        assert_eq!(variant.strategy.ema_fast, 20);
        assert_eq!(variant.risk.atr_k, 2.0);
        assert_eq!(base.strategy.ema_fast, 50);
        assert_eq!(base.risk.atr_k, 1.5);
        // Fields without overrides are carried over
        assert_eq!(variant.strategy.ema_slow, base.strategy.ema_slow);
    }

    #[test]
    fn test_empty_overrides_are_identity() {
        let base = AppConfig::default();
        let o = ParamOverrides::default();
        assert!(o.is_empty());
        assert_eq!(base.with_overrides(&o), base);
    }
}
