//! TradeBot Library
//!
//! Trend-pullback crypto trading with paper simulation and multi-symbol risk gating

pub mod bracket_watcher;
pub mod config;
pub mod exchange;
pub mod indicators;
pub mod logging;
pub mod metrics;
pub mod paper_trading;
pub mod risk;
pub mod runner;
pub mod strategy;
pub mod types;
