use thiserror::Error;

/// Invalid input is fatal to the invocation, surfaced to the caller; it
/// never crashes the process.
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("backtest needs at least 2 bars, got {0}")]
    NotEnoughBars(usize),
    #[error("close at bar {index} must be positive and finite, got {value}")]
    BadClose { index: usize, value: f64 },
}

pub type Result<T> = std::result::Result<T, Error>;
