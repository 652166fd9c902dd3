use thiserror::Error;

/// A candle (or a raw exchange row) that failed validation at the boundary.
///
/// Malformed rows are rejected where they enter the system, per row, so a
/// bad row never aborts the batch it arrived in.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("failed to parse field `{field}` from `{value}`")]
    ParseField { field: &'static str, value: String },

    #[error("price field `{field}` must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: String },

    #[error("volume must be non-negative, got {0}")]
    NegativeVolume(String),

    #[error("high {high} is below low {low}")]
    HighBelowLow { high: String, low: String },

    #[error("open_time {open_time} is not a valid millisecond timestamp")]
    BadTimestamp { open_time: i64 },

    #[error("unknown timeframe `{0}`")]
    UnknownTimeframe(String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;
