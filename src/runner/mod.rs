//! Portfolio loop - drives signals, risk gates and execution across symbols
//!
//! Each round walks the whitelisted symbols in order. A failure for one
//! symbol is logged and the round moves on to the next one. Capacity
//! rejections (caps, correlation, duplicates) skip the candidate quietly.
//!
//! - [`PaperRunner`]: simulated fills through the [`PaperBroker`](crate::paper_trading::PaperBroker)
//! - [`LiveRunner`]: market buy plus bracket on the exchange, one watcher per position

mod gates;
mod live;
mod paper;

pub use gates::{plan_entry, EntryGates, EntryPlan};
pub use live::{LiveOrder, LivePosition, LiveReport, LiveRunner};
pub use paper::{PaperRunner, RunReport};

use thiserror::Error;
use tokio::sync::watch;

use crate::exchange::ExchangeError;
use crate::paper_trading::BrokerError;
use crate::risk::{SizingError, StopError};

/// Receiver side of the run's stop signal; `true` means stop
pub type Shutdown = watch::Receiver<bool>;

/// Candidate skipped by a capacity or portfolio rule
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("position already open")]
    AlreadyOpen,
    #[error("max open trades reached ({open}/{max})")]
    MaxOpenTrades { open: usize, max: usize },
    #[error("pair notional cap reached ({exposure:.2}/{cap:.2})")]
    PairCapReached { exposure: f64, cap: f64 },
    #[error("signal on closed bar {0} already handled")]
    DuplicateSignal(i64),
    #[error("{count} held symbols correlated (max {max})")]
    Correlated { count: usize, max: usize },
    #[error("insufficient equity: need {needed:.2}, have {available:.2}")]
    InsufficientEquity { needed: f64, available: f64 },
    #[error("kill switch active")]
    Halted,
}

/// Why an entry attempt did not produce a position
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("sizing failed: {0}")]
    Sizing(#[from] SizingError),
    #[error("stop failed: {0}")]
    Stop(#[from] StopError),
    #[error("stop {stop} is not below entry {entry}")]
    StopAboveEntry { entry: f64, stop: f64 },
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// True when the stop signal has been raised
pub(crate) fn stop_requested(shutdown: &Shutdown) -> bool {
    *shutdown.borrow()
}

/// Sleep between rounds, returning early on shutdown
pub(crate) async fn pause(secs: u64, shutdown: &mut Shutdown) {
    if secs == 0 {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {}
        _ = shutdown.changed() => {}
    }
}
