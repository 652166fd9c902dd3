use chrono::{DateTime, Utc};
use core_types::{Signal, Symbol, Timeframe};
use serde::{Deserialize, Serialize};

/// Summary line the dashboard polls. On a failed cycle this still carries
/// the last good values; `last_error` is the only hint something is wrong.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub last_candle_time: Option<i64>,
    pub last_signal: Option<Signal>,
    pub final_cumulative: Option<f64>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    10
}
