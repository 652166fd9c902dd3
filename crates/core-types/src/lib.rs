pub mod error;
pub mod types;

// Re-export the most important types for easy access from other crates.
pub use error::{Result, ValidationError};
pub use types::{Candle, Direction, EquityPoint, IndicatorRow, Signal, Symbol, Timeframe};
