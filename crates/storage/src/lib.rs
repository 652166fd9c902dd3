use async_trait::async_trait;
use core_types::{Candle, IndicatorRow, Signal, Symbol, Timeframe};

pub mod csv_store;
pub mod error;
pub mod postgres;
pub mod staleness;

// Re-export the most important types for easy access.
pub use csv_store::CsvStore;
pub use error::{Error, Result};
pub use postgres::PgStore;

/// Outcome of a batch insert. Insertion is row-independent: one bad or
/// duplicate row never aborts the rest of the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Rows newly written by this call.
    pub inserted: usize,
    /// Rows already present for the same (symbol, timeframe, open_time) key,
    /// skipped silently. Not an error.
    pub duplicates: usize,
    /// Rows that failed validation and were dropped.
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrder {
    Ascending,
    Descending,
}

/// The candle persistence contract. Candles are append-only and immutable;
/// writes are durable before `put` returns.
#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn put(&self, candles: &[Candle]) -> Result<PutOutcome>;

    async fn latest(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<Option<Candle>>;

    /// Returns candles ordered by `open_time`, optionally bounded to the
    /// inclusive `[start, end]` millisecond range, at most `limit` rows.
    async fn query(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
        order: QueryOrder,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>>;

    /// True when no candle exists, or the newest one is older than `max_age`.
    async fn is_stale(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        max_age: chrono::Duration,
    ) -> Result<bool>;
}

/// Persistence for derived rows (indicators, signals). Only the relational
/// backend implements this; the flat-file backend stores candles only, and
/// the caller decides at startup which capabilities it has.
#[async_trait]
pub trait DerivedStore: Send + Sync {
    /// Inserts indicator rows, skipping (symbol, open_time) duplicates.
    /// Returns the number of rows newly written.
    async fn put_indicators(&self, rows: &[IndicatorRow]) -> Result<u64>;

    /// Inserts signals, skipping (symbol, open_time) duplicates.
    async fn put_signals(&self, signals: &[Signal]) -> Result<u64>;

    /// The newest `limit` signals for a symbol, ascending by open time.
    async fn recent_signals(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Signal>>;
}
