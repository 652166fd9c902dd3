use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use core_types::{Candle, Symbol, Timeframe};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::staleness;
use crate::{CandleStore, PutOutcome, QueryOrder};

/// Flat-file candle store: one CSV per (symbol, timeframe), rows keyed and
/// de-duplicated by `open_time`, kept sorted ascending.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

/// The persisted row format. Column order and names are the exchange's
/// kline columns minus the trailing `ignore` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsvRow {
    open_time: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    close_time: i64,
    quote_asset_volume: Decimal,
    number_of_trades: i64,
    taker_buy_volume: Decimal,
    taker_buy_quote_volume: Decimal,
}

impl CsvRow {
    fn from_candle(candle: &Candle) -> Self {
        Self {
            open_time: candle.open_time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            close_time: candle.close_time,
            quote_asset_volume: candle.quote_asset_volume,
            number_of_trades: candle.number_of_trades,
            taker_buy_volume: candle.taker_buy_volume,
            taker_buy_quote_volume: candle.taker_buy_quote_volume,
        }
    }

    fn into_candle(self, symbol: &Symbol, timeframe: Timeframe) -> Candle {
        Candle {
            symbol: symbol.clone(),
            timeframe,
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            close_time: self.close_time,
            quote_asset_volume: self.quote_asset_volume,
            number_of_trades: self.number_of_trades,
            taker_buy_volume: self.taker_buy_volume,
            taker_buy_quote_volume: self.taker_buy_quote_volume,
        }
    }
}

impl CsvStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    /// Failure here is the startup capability probe failing; the caller
    /// should abort rather than degrade silently.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_path(&self, symbol: &Symbol, timeframe: Timeframe) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", symbol.0, timeframe.as_str()))
    }

    /// Loads the whole series, keyed by open_time. Missing file means an
    /// empty series; a corrupt file is a persistence error.
    fn load(&self, path: &Path) -> Result<BTreeMap<i64, CsvRow>> {
        let mut rows = BTreeMap::new();
        if !path.exists() {
            return Ok(rows);
        }
        let mut reader = csv::Reader::from_path(path)?;
        for record in reader.deserialize() {
            let row: CsvRow = record?;
            rows.insert(row.open_time, row);
        }
        Ok(rows)
    }

    /// Writes the full series to a temp file, then renames it into place so
    /// readers never observe a half-written store.
    fn write_all(&self, path: &Path, rows: &BTreeMap<i64, CsvRow>) -> Result<()> {
        let tmp_path = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp_path)?;
            for row in rows.values() {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[async_trait]
impl CandleStore for CsvStore {
    async fn put(&self, candles: &[Candle]) -> Result<PutOutcome> {
        let mut outcome = PutOutcome::default();
        if candles.is_empty() {
            return Ok(outcome);
        }

        // All candles in one batch share a series; group writes by file so a
        // mixed batch still lands in the right place.
        let mut by_file: BTreeMap<PathBuf, Vec<&Candle>> = BTreeMap::new();
        for candle in candles {
            if let Err(e) = candle.validate() {
                tracing::warn!(error = %e, open_time = candle.open_time, "Rejecting malformed candle.");
                outcome.rejected += 1;
                continue;
            }
            by_file
                .entry(self.file_path(&candle.symbol, candle.timeframe))
                .or_default()
                .push(candle);
        }

        for (path, batch) in by_file {
            let mut rows = self.load(&path)?;
            let mut dirty = false;
            for candle in batch {
                if rows.contains_key(&candle.open_time) {
                    outcome.duplicates += 1;
                } else {
                    rows.insert(candle.open_time, CsvRow::from_candle(candle));
                    outcome.inserted += 1;
                    dirty = true;
                }
            }
            if dirty {
                self.write_all(&path, &rows)?;
            }
        }

        Ok(outcome)
    }

    async fn latest(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<Option<Candle>> {
        let rows = self.load(&self.file_path(symbol, timeframe))?;
        Ok(rows
            .into_iter()
            .next_back()
            .map(|(_, row)| row.into_candle(symbol, timeframe)))
    }

    async fn query(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: usize,
        order: QueryOrder,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let rows = self.load(&self.file_path(symbol, timeframe))?;
        let in_range = rows.into_iter().filter(|(open_time, _)| {
            start.is_none_or(|s| *open_time >= s) && end.is_none_or(|e| *open_time <= e)
        });

        let candles: Vec<Candle> = match order {
            QueryOrder::Ascending => in_range
                .take(limit)
                .map(|(_, row)| row.into_candle(symbol, timeframe))
                .collect(),
            QueryOrder::Descending => in_range
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .take(limit)
                .map(|(_, row)| row.into_candle(symbol, timeframe))
                .collect(),
        };

        Ok(candles)
    }

    async fn is_stale(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        max_age: chrono::Duration,
    ) -> Result<bool> {
        let latest = self.latest(symbol, timeframe).await?;
        Ok(staleness::is_stale_at(
            latest.map(|c| c.open_time),
            Utc::now().timestamp_millis(),
            max_age,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn symbol() -> Symbol {
        Symbol("BTCUSDT".to_string())
    }

    fn candle(open_time: i64, close: i64) -> Candle {
        Candle {
            symbol: symbol(),
            timeframe: Timeframe::M1,
            open_time,
            open: Decimal::from(close),
            high: Decimal::from(close + 1),
            low: Decimal::from(close - 1),
            close: Decimal::from(close),
            volume: Decimal::from(10),
            close_time: open_time + 59_999,
            quote_asset_volume: Decimal::from(1000),
            number_of_trades: 5,
            taker_buy_volume: Decimal::from(4),
            taker_buy_quote_volume: Decimal::from(400),
        }
    }

    #[tokio::test]
    async fn put_then_query_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();

        let batch = vec![candle(60_000, 100), candle(120_000, 101), candle(180_000, 102)];
        let outcome = store.put(&batch).await.unwrap();
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.rejected, 0);

        let got = store
            .query(&symbol(), Timeframe::M1, 10, QueryOrder::Ascending, None, None)
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].open_time, 60_000);
        assert_eq!(got[2].close, Decimal::from(102));
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();

        let batch = vec![candle(60_000, 100), candle(120_000, 101)];
        let first = store.put(&batch).await.unwrap();
        assert_eq!(first.inserted, 2);

        let second = store.put(&batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);

        let got = store
            .query(&symbol(), Timeframe::M1, 10, QueryOrder::Ascending, None, None)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn malformed_row_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();

        let mut bad = candle(120_000, 101);
        bad.close = Decimal::ZERO;
        let batch = vec![candle(60_000, 100), bad, candle(180_000, 102)];

        let outcome = store.put(&batch).await.unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.rejected, 1);

        let got = store
            .query(&symbol(), Timeframe::M1, 10, QueryOrder::Ascending, None, None)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].open_time, 60_000);
        assert_eq!(got[1].open_time, 180_000);
    }

    #[tokio::test]
    async fn out_of_order_writes_come_back_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();

        store.put(&[candle(180_000, 102)]).await.unwrap();
        store.put(&[candle(60_000, 100)]).await.unwrap();
        store.put(&[candle(120_000, 101)]).await.unwrap();

        let got = store
            .query(&symbol(), Timeframe::M1, 10, QueryOrder::Ascending, None, None)
            .await
            .unwrap();
        let times: Vec<i64> = got.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![60_000, 120_000, 180_000]);
    }

    #[tokio::test]
    async fn descending_query_respects_limit_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();

        let batch: Vec<Candle> = (1..=5).map(|i| candle(i * 60_000, 100 + i)).collect();
        store.put(&batch).await.unwrap();

        let got = store
            .query(
                &symbol(),
                Timeframe::M1,
                2,
                QueryOrder::Descending,
                Some(120_000),
                Some(240_000),
            )
            .await
            .unwrap();
        let times: Vec<i64> = got.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![240_000, 180_000]);
    }

    #[tokio::test]
    async fn latest_returns_newest_candle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();

        assert!(store.latest(&symbol(), Timeframe::M1).await.unwrap().is_none());

        store
            .put(&[candle(60_000, 100), candle(180_000, 102)])
            .await
            .unwrap();
        let latest = store.latest(&symbol(), Timeframe::M1).await.unwrap().unwrap();
        assert_eq!(latest.open_time, 180_000);
    }

    #[tokio::test]
    async fn empty_store_reports_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();
        assert!(store
            .is_stale(&symbol(), Timeframe::M1, chrono::Duration::minutes(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn fresh_write_clears_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path()).unwrap();

        let mut recent = candle(60_000, 100);
        recent.open_time = Utc::now().timestamp_millis() - 30_000;
        recent.close_time = recent.open_time + 59_999;
        store.put(&[recent]).await.unwrap();

        assert!(!store
            .is_stale(&symbol(), Timeframe::M1, chrono::Duration::minutes(5))
            .await
            .unwrap());
    }
}
