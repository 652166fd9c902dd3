use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use api_client::ApiClient;
use app_config::{Settings, StorageBackend};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use core_types::{Symbol, Timeframe};
use engine::{Engine, EngineConfig};
use storage::{CandleStore, CsvStore, DerivedStore, QueryOrder};
use tracing_subscriber::prelude::*;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A candle-polling trading bot prototype.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the polling loop and the web dashboard.
    Run,

    /// Backfills historical kline data from Binance into the store.
    Backfill {
        /// The trading symbol to backfill (e.g., "BTCUSDT").
        #[arg(short, long)]
        symbol: String,

        /// The candle interval (e.g., "1m", "1h").
        #[arg(short, long)]
        timeframe: String,

        /// Start date in YYYY-MM-DD format.
        #[arg(long)]
        start_date: String,

        /// Optional end date in YYYY-MM-DD format; defaults to now.
        #[arg(long)]
        end_date: Option<String>,
    },

    /// Runs a one-shot backtest over candles already in the store.
    Backtest {
        /// The trading symbol to backtest (e.g., "BTCUSDT").
        #[arg(short, long)]
        symbol: String,

        /// The candle interval (e.g., "1m", "1h").
        #[arg(short, long)]
        timeframe: String,

        /// How many of the newest stored candles to replay.
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::filter::Targets::new()
            .with_target("sqlx::query", tracing::Level::WARN)
            .with_default(tracing::Level::INFO),
    );
    tracing_subscriber::registry().with(fmt_layer).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_app().await?,
        Commands::Backfill {
            symbol,
            timeframe,
            start_date,
            end_date,
        } => handle_backfill(symbol, timeframe, start_date, end_date).await?,
        Commands::Backtest {
            symbol,
            timeframe,
            limit,
        } => handle_backtest(symbol, timeframe, limit).await?,
    }

    Ok(())
}

/// The chosen storage backend and, when it supports them, the writer for
/// derived rows. Probing happens here, once, at startup: an unreachable
/// backend is a startup error, never a silent fallback to another mode.
struct Backend {
    store: Arc<dyn CandleStore>,
    derived: Option<Arc<dyn DerivedStore>>,
}

async fn open_storage(settings: &Settings) -> Result<Backend> {
    match settings.storage.backend {
        StorageBackend::Postgres => {
            let db_settings = settings
                .database
                .as_ref()
                .context("storage.backend is `postgres` but [database] is not configured")?;
            let pg = Arc::new(storage::postgres::connect(db_settings).await?);
            tracing::info!("Postgres store connected and migrations are up-to-date.");
            Ok(Backend {
                store: pg.clone(),
                derived: Some(pg),
            })
        }
        StorageBackend::Csv => {
            let store = Arc::new(CsvStore::new(&settings.storage.csv_dir)?);
            tracing::info!(dir = %settings.storage.csv_dir, "CSV store opened (candles only).");
            Ok(Backend {
                store,
                derived: None,
            })
        }
    }
}

fn engine_config(settings: &Settings) -> Result<EngineConfig> {
    let timeframe: Timeframe = settings
        .trading
        .timeframe
        .parse()
        .with_context(|| format!("invalid trading.timeframe `{}`", settings.trading.timeframe))?;
    Ok(EngineConfig {
        symbol: Symbol(settings.trading.symbol.clone()),
        timeframe,
        sma_window: settings.trading.sma_window,
        poll_interval: Duration::from_secs(settings.trading.poll_interval_secs),
        max_age: chrono::Duration::seconds(settings.trading.max_staleness_secs as i64),
        fetch_limit: settings.trading.fetch_limit,
        chart_path: PathBuf::from(&settings.trading.chart_path),
    })
}

// --- "Run" Subcommand Logic ---

async fn run_app() -> Result<()> {
    let settings = app_config::load_settings()?;
    tracing::info!("Application settings loaded successfully.");

    let backend = open_storage(&settings).await?;
    let fetcher = Arc::new(ApiClient::new(&settings.binance)?);
    let config = engine_config(&settings)?;

    let snapshot = engine::snapshot::shared(config.symbol.clone(), config.timeframe);
    let app_state = web_server::AppState {
        snapshot: snapshot.clone(),
        chart_path: config.chart_path.clone(),
        signals: backend.derived.clone(),
    };
    let server = tokio::spawn(web_server::run(settings.server.clone(), app_state));

    let engine = Engine::new(config, fetcher, backend.store, backend.derived, snapshot);

    tokio::select! {
        result = engine.run() => result?,
        result = server => result??,
    }

    Ok(())
}

// --- "Backfill" Subcommand Logic ---

fn date_to_millis(date: &str) -> Result<i64> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid date `{date}`, expected YYYY-MM-DD"))?;
    let midnight = parsed
        .and_hms_opt(0, 0, 0)
        .context("date has no midnight representation")?;
    Ok(midnight.and_utc().timestamp_millis())
}

async fn handle_backfill(
    symbol: String,
    timeframe: String,
    start_date: String,
    end_date: Option<String>,
) -> Result<()> {
    let settings = app_config::load_settings()?;
    let backend = open_storage(&settings).await?;
    let client = ApiClient::new(&settings.binance)?;

    let symbol = Symbol(symbol);
    let timeframe: Timeframe = timeframe.parse()?;
    let end_ms = match end_date {
        Some(date) => date_to_millis(&date)?,
        None => Utc::now().timestamp_millis(),
    };
    let mut cursor = date_to_millis(&start_date)?;

    tracing::info!(%symbol, %timeframe, cursor, end_ms, "Starting backfill.");

    let mut total_inserted = 0usize;
    loop {
        let batch = client
            .get_klines(&symbol, timeframe, Some(cursor), Some(end_ms), Some(1000))
            .await?;
        let Some(last) = batch.last() else {
            break;
        };
        let next_cursor = last.open_time + 1;

        let outcome = backend.store.put(&batch).await?;
        total_inserted += outcome.inserted;
        tracing::info!(
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            rejected = outcome.rejected,
            cursor = next_cursor,
            "Backfill page stored."
        );

        if next_cursor > end_ms {
            break;
        }
        cursor = next_cursor;
    }

    tracing::info!(total_inserted, "Backfill complete.");
    Ok(())
}

// --- "Backtest" Subcommand Logic ---

async fn handle_backtest(symbol: String, timeframe: String, limit: usize) -> Result<()> {
    let settings = app_config::load_settings()?;
    let backend = open_storage(&settings).await?;

    let symbol = Symbol(symbol);
    let timeframe: Timeframe = timeframe.parse()?;

    let mut candles = backend
        .store
        .query(&symbol, timeframe, limit, QueryOrder::Descending, None, None)
        .await?;
    candles.reverse();

    if candles.is_empty() {
        anyhow::bail!("no stored candles for {symbol} {timeframe}; run `backfill` first");
    }
    tracing::info!(candles = candles.len(), "Loaded candles from the store.");

    let bars = indicators::indicator_bars(&candles, settings.trading.sma_window)?;
    let result = backtester::run(&bars)?;
    backtester::print_summary(&result);

    let chart_path = Path::new(&settings.trading.chart_path);
    chart::render_equity_curve(&result.points, chart_path)?;
    tracing::info!(chart = %chart_path.display(), "Equity curve written.");

    Ok(())
}
