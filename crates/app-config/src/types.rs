use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// Settings for the Binance REST API.
    pub binance: BinanceSettings,
    /// Which candle store backend to use, and where.
    pub storage: StorageSettings,
    /// Settings for the database connection. Required when the storage
    /// backend is `postgres`; ignored otherwise.
    pub database: Option<DatabaseSettings>,
    pub server: ServerSettings,
    pub trading: TradingSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BinanceSettings {
    /// The REST API base URL for Binance.
    pub rest_base_url: String,
    /// Timeout applied to every klines request. The poll loop runs on a
    /// single thread, so an unbounded request would stall every later tick.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Csv,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Directory for the flat-file backend, one file per symbol/timeframe.
    #[serde(default = "default_csv_dir")]
    pub csv_dir: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseSettings {
    /// The connection URL for the PostgreSQL database.
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TradingSettings {
    /// The trading pair to poll, e.g. "BTCUSDT".
    pub symbol: String,
    /// Candle interval, e.g. "1m".
    pub timeframe: String,
    #[serde(default = "default_sma_window")]
    pub sma_window: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How old the newest stored candle may be before a cycle re-fetches.
    #[serde(default = "default_max_staleness_secs")]
    pub max_staleness_secs: u64,
    /// Number of klines requested per fetch (Binance caps this at 1500).
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u16,
    #[serde(default = "default_chart_path")]
    pub chart_path: String,
}

// Helper functions for serde defaults
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_csv_dir() -> String {
    "data".to_string()
}
fn default_sma_window() -> usize {
    20
}
fn default_poll_interval_secs() -> u64 {
    60
}
fn default_max_staleness_secs() -> u64 {
    300
}
fn default_fetch_limit() -> u16 {
    500
}
fn default_chart_path() -> String {
    "data/equity.png".to_string()
}
