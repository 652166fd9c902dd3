pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use api_client::KlineFetcher;
use chrono::Utc;
use core_types::{IndicatorRow, Symbol, Timeframe};
use indicators::Bar;
use num_traits::cast::ToPrimitive;
use storage::{CandleStore, DerivedStore, QueryOrder};
use strategies::trend_following;

pub use snapshot::{DashboardSnapshot, SharedSnapshot};

/// How many of the newest signals the snapshot keeps for the dashboard.
const RECENT_SIGNALS: usize = 25;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub sma_window: usize,
    pub poll_interval: Duration,
    pub max_age: chrono::Duration,
    pub fetch_limit: u16,
    pub chart_path: PathBuf,
}

impl EngineConfig {
    /// How many stored candles a cycle derives over. Enough history that
    /// the warm-up leaves a usable series even with a small fetch limit.
    fn history_len(&self) -> usize {
        (self.fetch_limit as usize).max(self.sma_window * 4)
    }
}

/// The poll loop is a two-state machine: Idle between ticks, Fetching while
/// a fetch-persist-derive cycle runs. A cycle ends back in Idle whether it
/// succeeded or failed; retry is simply the next tick's staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Fetching,
}

/// A single-symbol polling orchestrator: fetch, persist, derive indicator
/// and signal rows, backtest, render, publish.
pub struct Engine {
    config: EngineConfig,
    fetcher: Arc<dyn KlineFetcher>,
    store: Arc<dyn CandleStore>,
    /// Present only when the storage backend can persist derived rows.
    derived: Option<Arc<dyn DerivedStore>>,
    snapshot: SharedSnapshot,
    state: CycleState,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn KlineFetcher>,
        store: Arc<dyn CandleStore>,
        derived: Option<Arc<dyn DerivedStore>>,
        snapshot: SharedSnapshot,
    ) -> Self {
        tracing::info!(
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            sma_window = config.sma_window,
            "Creating engine instance."
        );
        Self {
            config,
            fetcher,
            store,
            derived,
            snapshot,
            state: CycleState::Idle,
        }
    }

    /// Runs the poll loop forever. One cycle per tick at most, and only
    /// when the store reports the series stale.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let stale = match self
                .store
                .is_stale(&self.config.symbol, self.config.timeframe, self.config.max_age)
                .await
            {
                Ok(stale) => stale,
                Err(e) => {
                    tracing::error!(error = %e, "Staleness check failed; staying idle.");
                    continue;
                }
            };
            if !stale {
                tracing::debug!(symbol = %self.config.symbol, "Data is fresh; staying idle.");
                continue;
            }

            self.state = CycleState::Fetching;
            tracing::debug!(state = ?self.state, symbol = %self.config.symbol, "Cycle starting.");
            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "Poll cycle failed; will retry on a later tick.");
                let mut snap = self.snapshot.write().await;
                snap.last_error = Some(e.to_string());
            }
            self.state = CycleState::Idle;
        }
    }

    /// One fetch-persist-derive cycle. A fetch failure skips the cycle; a
    /// persistence or derivation failure aborts it and surfaces the error.
    async fn run_cycle(&self) -> Result<()> {
        let config = &self.config;

        // Resume from just after the newest stored bar, or bootstrap.
        let start_time = self
            .store
            .latest(&config.symbol, config.timeframe)
            .await?
            .map(|c| c.open_time + 1);

        let fetched = match self
            .fetcher
            .fetch_klines(
                &config.symbol,
                config.timeframe,
                start_time,
                None,
                Some(config.fetch_limit),
            )
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!(error = %e, "Fetch failed; skipping this cycle.");
                return Ok(());
            }
        };

        if !fetched.is_empty() {
            let outcome = self.store.put(&fetched).await?;
            tracing::info!(
                inserted = outcome.inserted,
                duplicates = outcome.duplicates,
                rejected = outcome.rejected,
                "Stored fetched candles."
            );
        }

        let mut candles = self
            .store
            .query(
                &config.symbol,
                config.timeframe,
                config.history_len(),
                QueryOrder::Descending,
                None,
                None,
            )
            .await?;
        candles.reverse();

        let closes: Vec<f64> = candles
            .iter()
            .map(|c| c.close.to_f64().unwrap_or(f64::NAN))
            .collect();
        let averages = indicators::sma(&closes, config.sma_window)?;

        let mut bars = Vec::new();
        let mut indicator_rows = Vec::new();
        let mut signals = Vec::new();
        for ((candle, close), average) in candles.iter().zip(&closes).zip(&averages) {
            let Some(sma) = average else { continue };
            bars.push(Bar {
                open_time: candle.open_time,
                close: *close,
                sma: *sma,
            });
            indicator_rows.push(IndicatorRow {
                symbol: candle.symbol.clone(),
                open_time: candle.open_time,
                sma: *sma,
                rsi: None,
                macd: None,
                macd_signal: None,
                bb_upper: None,
                bb_lower: None,
            });
            signals.push(trend_following::signal_for_candle(candle, *sma));
        }

        if let Some(derived) = &self.derived {
            derived.put_indicators(&indicator_rows).await?;
            derived.put_signals(&signals).await?;
        }

        if bars.len() < 2 {
            tracing::info!(
                bars = bars.len(),
                "Not enough bars past SMA warm-up yet; nothing to backtest."
            );
            let mut snap = self.snapshot.write().await;
            snap.last_candle_time = candles.last().map(|c| c.open_time);
            snap.last_cycle_at = Some(Utc::now());
            snap.last_error = None;
            return Ok(());
        }

        let result = backtester::run(&bars)?;
        chart::render_equity_curve(&result.points, &config.chart_path)?;

        let mut snap = self.snapshot.write().await;
        snap.last_candle_time = candles.last().map(|c| c.open_time);
        snap.last_signal = signals.last().cloned();
        let tail_start = signals.len().saturating_sub(RECENT_SIGNALS);
        snap.recent_signals = signals[tail_start..].to_vec();
        snap.final_cumulative = Some(result.final_cumulative());
        snap.equity_curve = result.points;
        snap.last_cycle_at = Some(Utc::now());
        snap.last_error = None;

        tracing::info!(
            symbol = %config.symbol,
            final_cumulative = snap.final_cumulative,
            "Cycle complete."
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::Candle;
    use rust_decimal::Decimal;
    use storage::CsvStore;

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

    struct StubFetcher {
        candles: Vec<Candle>,
    }

    #[async_trait]
    impl KlineFetcher for StubFetcher {
        async fn fetch_klines(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            start_time: Option<i64>,
            _end_time: Option<i64>,
            _limit: Option<u16>,
        ) -> api_client::Result<Vec<Candle>> {
            let from = start_time.unwrap_or(i64::MIN);
            Ok(self
                .candles
                .iter()
                .filter(|c| c.open_time >= from)
                .cloned()
                .collect())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl KlineFetcher for FailingFetcher {
        async fn fetch_klines(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            _start_time: Option<i64>,
            _end_time: Option<i64>,
            _limit: Option<u16>,
        ) -> api_client::Result<Vec<Candle>> {
            Err(api_client::Error::ApiError {
                code: -1,
                msg: "stubbed outage".to_string(),
            })
        }
    }

    fn config(chart_path: PathBuf) -> EngineConfig {
        EngineConfig {
            symbol: symbol(),
            timeframe: Timeframe::M1,
            sma_window: 3,
            poll_interval: Duration::from_secs(60),
            max_age: chrono::Duration::minutes(5),
            fetch_limit: 100,
            chart_path,
        }
    }

    fn engine_with(fetcher: Arc<dyn KlineFetcher>, dir: &std::path::Path) -> Engine {
        let store = Arc::new(CsvStore::new(dir.join("data")).unwrap());
        let snapshot = snapshot::shared(symbol(), Timeframe::M1);
        Engine::new(
            config(dir.join("equity.png")),
            fetcher,
            store,
            None,
            snapshot,
        )
    }

    #[tokio::test]
    async fn cycle_persists_derives_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let candles: Vec<Candle> = (1..=10).map(|i| candle(i * 60_000, 100 + i)).collect();
        let engine = engine_with(Arc::new(StubFetcher { candles }), dir.path());

        engine.run_cycle().await.unwrap();

        let snap = engine.snapshot.read().await;
        assert_eq!(snap.last_candle_time, Some(600_000));
        // Window 3 over 10 candles leaves 8 defined bars.
        assert_eq!(snap.equity_curve.len(), 8);
        assert_eq!(snap.equity_curve[0].cumulative, 1.0);
        // Rising series: close sits above its trailing mean on every bar.
        assert_eq!(
            snap.last_signal.as_ref().unwrap().direction,
            core_types::Direction::Buy
        );
        assert!(snap.last_error.is_none());
        assert!(dir.path().join("equity.png").exists());

        let stored = engine
            .store
            .query(&symbol(), Timeframe::M1, 100, QueryOrder::Ascending, None, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 10);
    }

    #[tokio::test]
    async fn repeated_cycle_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let candles: Vec<Candle> = (1..=10).map(|i| candle(i * 60_000, 100 + i)).collect();
        let engine = engine_with(Arc::new(StubFetcher { candles }), dir.path());

        engine.run_cycle().await.unwrap();
        engine.run_cycle().await.unwrap();

        let stored = engine
            .store
            .query(&symbol(), Timeframe::M1, 100, QueryOrder::Ascending, None, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 10);
    }

    #[tokio::test]
    async fn fetch_failure_skips_cycle_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(FailingFetcher), dir.path());

        // The cycle is skipped, not failed: Ok(()) and an untouched snapshot.
        engine.run_cycle().await.unwrap();

        let snap = engine.snapshot.read().await;
        assert!(snap.equity_curve.is_empty());
        assert!(snap.last_cycle_at.is_none());
    }

    #[tokio::test]
    async fn short_series_publishes_candles_but_no_curve() {
        let dir = tempfile::tempdir().unwrap();
        // Only 2 candles with window 3: nothing clears warm-up.
        let candles: Vec<Candle> = (1..=2).map(|i| candle(i * 60_000, 100 + i)).collect();
        let engine = engine_with(Arc::new(StubFetcher { candles }), dir.path());

        engine.run_cycle().await.unwrap();

        let snap = engine.snapshot.read().await;
        assert_eq!(snap.last_candle_time, Some(120_000));
        assert!(snap.equity_curve.is_empty());
        assert!(snap.last_cycle_at.is_some());
    }
}
