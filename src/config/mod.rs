//! Configuration management for TradeBot
//!
//! Loads built-in defaults, then optional YAML/TOML files, then environment
//! variables (`TRADEBOT__RISK__ATR_K=2.0`) with `.env` support.

mod overrides;

pub use overrides::ParamOverrides;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub fees: FeesConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub watcher: WatcherConfig,
    pub logging: LoggingConfig,
}

/// Run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Paper,
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Exchange identifier, informational only
    pub exchange: String,
    pub mode: RunMode,
    /// Log intended live orders without placing them
    pub dry_run: bool,
    /// Symbols the bot may touch, e.g. "BTC/USDT"
    pub symbols_whitelist: Vec<String>,
    /// Candle timeframe (1m, 15m, 1h, ...)
    pub timeframe: String,
    /// Candles requested per fetch
    pub candle_limit: usize,
    /// Rounds per run
    pub max_rounds: usize,
    /// Sleep between rounds (0 = no sleep)
    pub poll_interval_secs: u64,
    /// Directory holding `<BASE>_<QUOTE>.csv` candle files for replay
    pub data_dir: String,
    /// Starting paper balance
    pub initial_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeesConfig {
    /// Maker fee as a fraction of notional
    pub maker: f64,
    /// Taker fee as a fraction of notional
    pub taker: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub rsi_buy_min: f64,
    pub rsi_buy_max: f64,
    /// Simulated slippage in basis points
    pub slippage_bps: f64,
    pub enable_adx: bool,
    pub adx_period: usize,
    pub adx_threshold: f64,
    pub enable_vol_filter: bool,
    pub vol_sma_period: usize,
    pub volume_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Reward-to-risk ratio for the take-profit
    pub risk_rr: f64,
    pub atr_period: usize,
    /// ATR multiplier for the stop distance
    pub atr_k: f64,
    /// Closed bars scanned by the swing-low fallback stop
    pub swing_lookback: usize,
    /// Fraction of equity risked per trade (0.01 = 1%)
    pub risk_per_trade_pct: f64,
    /// Reference equity for the daily loss limit
    pub base_equity: f64,
    /// Daily loss limit as a fraction of `base_equity`
    pub max_daily_loss_pct: f64,
    pub max_open_trades: usize,
    /// Legacy global per-trade notional cap
    pub max_notional_per_trade: f64,
    /// General per-pair notional cap
    #[serde(default)]
    pub max_notional_per_pair: Option<f64>,
    /// Per-symbol notional cap overrides
    #[serde(default)]
    pub pair_caps: HashMap<String, f64>,
    pub max_correlated_trades: usize,
    pub correlation_threshold: f64,
    /// Closed bars used for return correlation
    pub correlation_lookback: usize,
    /// Quantity step; 0 disables flooring
    pub lot_step: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// Polls without any fill or cancel before the watcher gives up
    pub max_idle_polls: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            exchange: "binance".to_string(),
            mode: RunMode::Paper,
            dry_run: true,
            symbols_whitelist: vec!["BTC/USDT".to_string()],
            timeframe: "1h".to_string(),
            candle_limit: 500,
            max_rounds: 100,
            poll_interval_secs: 0,
            data_dir: "./data".to_string(),
            initial_balance: 2000.0,
        }
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            maker: 0.001,
            taker: 0.001,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ema_fast: 50,
            ema_slow: 200,
            rsi_period: 14,
            rsi_buy_min: 45.0,
            rsi_buy_max: 60.0,
            slippage_bps: 5.0,
            enable_adx: false,
            adx_period: 14,
            adx_threshold: 20.0,
            enable_vol_filter: false,
            vol_sma_period: 20,
            volume_factor: 1.0,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_rr: 2.0,
            atr_period: 14,
            atr_k: 1.5,
            swing_lookback: 14,
            risk_per_trade_pct: 0.01,
            base_equity: 2000.0,
            max_daily_loss_pct: 0.03,
            max_open_trades: 1,
            max_notional_per_trade: 200.0,
            max_notional_per_pair: None,
            pair_caps: HashMap::new(),
            max_correlated_trades: 1,
            correlation_threshold: 0.85,
            correlation_lookback: 100,
            lot_step: 0.0001,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 10_000,
            max_idle_polls: 8_640,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot: BotConfig::default(),
            fees: FeesConfig::default(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RiskConfig {
    /// Notional cap for `symbol`: pair override, then general per-pair cap,
    /// then the legacy per-trade cap.
    pub fn pair_cap(&self, symbol: &str) -> f64 {
        self.pair_caps
            .get(symbol)
            .copied()
            .or(self.max_notional_per_pair)
            .unwrap_or(self.max_notional_per_trade)
    }

    /// Absolute daily loss limit in quote currency
    pub fn daily_loss_limit(&self) -> f64 {
        self.base_equity.abs() * self.max_daily_loss_pct.abs()
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration, looking for `default.*` and `local.*` in `dir`
    pub fn load_from(dir: &str) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let defaults = Config::try_from(&AppConfig::default())
            .context("Failed to serialize default configuration")?;

        let config = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name(&format!("{}/default", dir)).required(false))
            .add_source(File::with_name(&format!("{}/local", dir)).required(false))
            // Override with environment variables (TRADEBOT__*)
            .add_source(
                Environment::with_prefix("TRADEBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bot.symbols_whitelist")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject parameter combinations the strategy cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.strategy;
        let r = &self.risk;

        if self.bot.symbols_whitelist.is_empty() {
            bail!("bot.symbols_whitelist must not be empty");
        }
        if self.bot.candle_limit < 2 {
            bail!("bot.candle_limit must be at least 2");
        }
        if s.ema_fast == 0 || s.ema_slow == 0 || s.rsi_period == 0 {
            bail!("strategy periods must be positive");
        }
        if s.ema_fast >= s.ema_slow {
            bail!(
                "strategy.ema_fast ({}) must be below strategy.ema_slow ({})",
                s.ema_fast,
                s.ema_slow
            );
        }
        if s.rsi_buy_min > s.rsi_buy_max {
            bail!(
                "strategy.rsi_buy_min ({}) exceeds strategy.rsi_buy_max ({})",
                s.rsi_buy_min,
                s.rsi_buy_max
            );
        }
        if s.slippage_bps < 0.0 {
            bail!("strategy.slippage_bps must be non-negative");
        }
        if s.enable_adx && s.adx_period == 0 {
            bail!("strategy.adx_period must be positive when ADX is enabled");
        }
        if s.enable_vol_filter && s.vol_sma_period == 0 {
            bail!("strategy.vol_sma_period must be positive when the volume filter is enabled");
        }
        if r.atr_period == 0 {
            bail!("risk.atr_period must be positive");
        }
        if r.swing_lookback == 0 {
            bail!("risk.swing_lookback must be positive");
        }
        if !(r.risk_per_trade_pct > 0.0 && r.risk_per_trade_pct <= 1.0) {
            bail!("risk.risk_per_trade_pct must be in (0, 1]");
        }
        if !(r.max_daily_loss_pct >= 0.0 && r.max_daily_loss_pct <= 1.0) {
            bail!("risk.max_daily_loss_pct must be in [0, 1]");
        }
        if !(-1.0..=1.0).contains(&r.correlation_threshold) {
            bail!("risk.correlation_threshold must be in [-1, 1]");
        }
        if r.lot_step < 0.0 {
            bail!("risk.lot_step must be non-negative");
        }
        if self.fees.maker < 0.0 || self.fees.taker < 0.0 {
            bail!("fees must be non-negative");
        }
        Ok(())
    }

    /// Minimum closed bars before the signal can fire
    pub fn warmup_bars(&self) -> usize {
        self.strategy.ema_slow.max(self.strategy.rsi_period) + 2
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "mode={:?} dry_run={} symbols={:?} tf={} ema={}/{} rsi={}[{}..{}] atr={}x{} rr={} risk={:.3}",
            self.bot.mode,
            self.bot.dry_run,
            self.bot.symbols_whitelist,
            self.bot.timeframe,
            self.strategy.ema_fast,
            self.strategy.ema_slow,
            self.strategy.rsi_period,
            self.strategy.rsi_buy_min,
            self.strategy.rsi_buy_max,
            self.risk.atr_period,
            self.risk.atr_k,
            self.risk.risk_rr,
            self.risk.risk_per_trade_pct,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.warmup_bars(), 202);
    }

    #[test]
    fn test_pair_cap_resolution_order() {
        let mut risk = RiskConfig::default();
        assert_eq!(risk.pair_cap("BTC/USDT"), 200.0);

        risk.max_notional_per_pair = Some(150.0);
        assert_eq!(risk.pair_cap("BTC/USDT"), 150.0);

        risk.pair_caps.insert("BTC/USDT".to_string(), 75.0);
        assert_eq!(risk.pair_cap("BTC/USDT"), 75.0);
        assert_eq!(risk.pair_cap("ETH/USDT"), 150.0);
    }

    #[test]
    fn test_validate_rejects_inverted_ema() {
        let mut cfg = AppConfig::default();
        cfg.strategy.ema_fast = 200;
        cfg.strategy.ema_slow = 50;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_swing_lookback() {
        let mut cfg = AppConfig::default();
        cfg.risk.swing_lookback = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("swing_lookback"));
    }

    #[test]
    fn test_validate_rejects_empty_whitelist() {
        let mut cfg = AppConfig::default();
        cfg.bot.symbols_whitelist.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_rsi_band() {
        let mut cfg = AppConfig::default();
        cfg.strategy.rsi_buy_min = 70.0;
        cfg.strategy.rsi_buy_max = 30.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "risk:\n  atr_k: 2.5\n  max_notional_per_pair: 120.0\nstrategy:\n  ema_fast: 9\n  ema_slow: 21\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.risk.atr_k, 2.5);
        assert_eq!(cfg.strategy.ema_fast, 9);
        assert_eq!(cfg.strategy.ema_slow, 21);
        assert_eq!(cfg.risk.pair_cap("ETH/USDT"), 120.0);
        // Untouched sections keep their defaults
        assert_eq!(cfg.fees.taker, 0.001);
    }
}
