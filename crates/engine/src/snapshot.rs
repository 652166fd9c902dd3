use std::sync::Arc;

use chrono::{DateTime, Utc};
use core_types::{EquityPoint, Signal, Symbol, Timeframe};
use serde::Serialize;
use tokio::sync::RwLock;

/// The last good cycle's results, shared with the web layer. When a cycle
/// fails only `last_error` changes: the dashboard keeps showing stale data
/// rather than an error page.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub last_candle_time: Option<i64>,
    pub last_signal: Option<Signal>,
    pub recent_signals: Vec<Signal>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_cumulative: Option<f64>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DashboardSnapshot {
    pub fn new(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            timeframe,
            last_candle_time: None,
            last_signal: None,
            recent_signals: Vec::new(),
            equity_curve: Vec::new(),
            final_cumulative: None,
            last_cycle_at: None,
            last_error: None,
        }
    }
}

pub type SharedSnapshot = Arc<RwLock<DashboardSnapshot>>;

pub fn shared(symbol: Symbol, timeframe: Timeframe) -> SharedSnapshot {
    Arc::new(RwLock::new(DashboardSnapshot::new(symbol, timeframe)))
}
