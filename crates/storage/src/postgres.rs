use async_trait::async_trait;
use chrono::Utc;
use core_types::{Candle, Direction, IndicatorRow, Signal, Symbol, Timeframe};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::error::{Error, Result};
use crate::staleness;
use crate::{CandleStore, DerivedStore, PutOutcome, QueryOrder};

/// A wrapper around the `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Establishes a connection pool to the PostgreSQL database and runs
/// migrations. This doubles as the startup capability probe: if the backend
/// is unreachable the caller gets a clear error now, not a silent
/// degradation mid-run.
pub async fn connect(settings: &app_config::types::DatabaseSettings) -> Result<PgStore> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.url)
        .await?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(Error::from)?;

    Ok(PgStore { pool })
}

const CANDLE_COLUMNS: &str = "symbol, timeframe, open_time, open, high, low, close, volume, \
     close_time, quote_asset_volume, number_of_trades, taker_buy_volume, taker_buy_quote_volume";

#[derive(Debug, FromRow)]
struct CandleRow {
    symbol: String,
    timeframe: String,
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

impl TryFrom<CandleRow> for Candle {
    type Error = Error;

    fn try_from(row: CandleRow) -> Result<Self> {
        let timeframe: Timeframe = row
            .timeframe
            .parse()
            .map_err(|_| Error::CorruptRow(format!("unknown timeframe `{}`", row.timeframe)))?;
        Ok(Candle {
            symbol: Symbol(row.symbol),
            timeframe,
            open_time: row.open_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            close_time: row.close_time,
            quote_asset_volume: row.quote_asset_volume,
            number_of_trades: row.number_of_trades,
            taker_buy_volume: row.taker_buy_volume,
            taker_buy_quote_volume: row.taker_buy_quote_volume,
        })
    }
}

#[async_trait]
impl CandleStore for PgStore {
    async fn put(&self, candles: &[Candle]) -> Result<PutOutcome> {
        let mut outcome = PutOutcome::default();

        // One statement per row, deliberately outside a transaction: a
        // failed row must not roll back rows already written.
        for candle in candles {
            if let Err(e) = candle.validate() {
                tracing::warn!(error = %e, open_time = candle.open_time, "Rejecting malformed candle.");
                outcome.rejected += 1;
                continue;
            }

            let result = sqlx::query(
                r#"
                INSERT INTO candles (symbol, timeframe, open_time, open, high, low, close, volume,
                                     close_time, quote_asset_volume, number_of_trades,
                                     taker_buy_volume, taker_buy_quote_volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (symbol, timeframe, open_time) DO NOTHING
                "#,
            )
            .bind(&candle.symbol.0)
            .bind(candle.timeframe.as_str())
            .bind(candle.open_time)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.close_time)
            .bind(candle.quote_asset_volume)
            .bind(candle.number_of_trades)
            .bind(candle.taker_buy_volume)
            .bind(candle.taker_buy_quote_volume)
            .execute(&self.pool)
            .await
            .map_err(Error::OperationFailed)?;

            if result.rows_affected() == 1 {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }

        Ok(outcome)
    }

    async fn latest(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<Option<Candle>> {
        let sql = format!(
            "SELECT {CANDLE_COLUMNS} FROM candles \
             WHERE symbol = $1 AND timeframe = $2 \
             ORDER BY open_time DESC LIMIT 1"
        );
        let row: Option<CandleRow> = sqlx::query_as(&sql)
            .bind(&symbol.0)
            .bind(timeframe.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::OperationFailed)?;

        row.map(Candle::try_from).transpose()
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
        let mut sql = format!(
            "SELECT {CANDLE_COLUMNS} FROM candles WHERE symbol = $1 AND timeframe = $2"
        );
        let mut next_param = 3;
        if start.is_some() {
            sql.push_str(&format!(" AND open_time >= ${next_param}"));
            next_param += 1;
        }
        if end.is_some() {
            sql.push_str(&format!(" AND open_time <= ${next_param}"));
            next_param += 1;
        }
        sql.push_str(match order {
            QueryOrder::Ascending => " ORDER BY open_time ASC",
            QueryOrder::Descending => " ORDER BY open_time DESC",
        });
        sql.push_str(&format!(" LIMIT ${next_param}"));

        let mut query = sqlx::query_as::<_, CandleRow>(&sql)
            .bind(&symbol.0)
            .bind(timeframe.as_str());
        if let Some(start) = start {
            query = query.bind(start);
        }
        if let Some(end) = end {
            query = query.bind(end);
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(Error::OperationFailed)?;

        rows.into_iter().map(Candle::try_from).collect()
    }

    async fn is_stale(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        max_age: chrono::Duration,
    ) -> Result<bool> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(open_time) FROM candles WHERE symbol = $1 AND timeframe = $2")
                .bind(&symbol.0)
                .bind(timeframe.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::OperationFailed)?;

        Ok(staleness::is_stale_at(
            latest,
            Utc::now().timestamp_millis(),
            max_age,
        ))
    }
}

#[derive(Debug, FromRow)]
struct SignalRow {
    symbol: String,
    open_time: i64,
    direction: String,
    confidence: f64,
    price: Decimal,
}

impl TryFrom<SignalRow> for Signal {
    type Error = Error;

    fn try_from(row: SignalRow) -> Result<Self> {
        let direction = match row.direction.as_str() {
            "BUY" => Direction::Buy,
            "SELL" => Direction::Sell,
            "HOLD" => Direction::Hold,
            other => return Err(Error::CorruptRow(format!("unknown direction `{other}`"))),
        };
        Ok(Signal {
            symbol: Symbol(row.symbol),
            open_time: row.open_time,
            direction,
            confidence: row.confidence,
            price: row.price,
        })
    }
}

#[async_trait]
impl DerivedStore for PgStore {
    async fn put_indicators(&self, rows: &[IndicatorRow]) -> Result<u64> {
        let mut inserted = 0;
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO technical_indicators
                    (symbol, open_time, sma, rsi, macd, macd_signal, bb_upper, bb_lower)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (symbol, open_time) DO NOTHING
                "#,
            )
            .bind(&row.symbol.0)
            .bind(row.open_time)
            .bind(row.sma)
            .bind(row.rsi)
            .bind(row.macd)
            .bind(row.macd_signal)
            .bind(row.bb_upper)
            .bind(row.bb_lower)
            .execute(&self.pool)
            .await
            .map_err(Error::OperationFailed)?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn put_signals(&self, signals: &[Signal]) -> Result<u64> {
        let mut inserted = 0;
        for signal in signals {
            let result = sqlx::query(
                r#"
                INSERT INTO trading_signals (symbol, open_time, direction, confidence, price)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (symbol, open_time) DO NOTHING
                "#,
            )
            .bind(&signal.symbol.0)
            .bind(signal.open_time)
            .bind(signal.direction.as_str())
            .bind(signal.confidence)
            .bind(signal.price)
            .execute(&self.pool)
            .await
            .map_err(Error::OperationFailed)?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn recent_signals(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Signal>> {
        let rows: Vec<SignalRow> = sqlx::query_as(
            "SELECT symbol, open_time, direction, confidence, price FROM trading_signals \
             WHERE symbol = $1 ORDER BY open_time DESC LIMIT $2",
        )
        .bind(&symbol.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::OperationFailed)?;

        let mut signals: Vec<Signal> = rows
            .into_iter()
            .map(Signal::try_from)
            .collect::<Result<_>>()?;
        signals.reverse();
        Ok(signals)
    }
}
