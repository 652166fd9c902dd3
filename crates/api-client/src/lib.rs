use std::time::Duration;

use app_config::types::BinanceSettings;
use async_trait::async_trait;
use core_types::{Candle, Symbol, Timeframe};
use serde_json::Value;

pub mod error;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use types::RawKline;

/// The interface the orchestrator fetches candles through. There is one
/// concrete implementation, chosen at build time; tests substitute stubs.
#[async_trait]
pub trait KlineFetcher: Send + Sync {
    /// Fetches klines in ascending time order, possibly with gaps. Rows the
    /// exchange returns malformed are dropped here, not surfaced as errors.
    async fn fetch_klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u16>,
    ) -> Result<Vec<Candle>>;
}

/// A thin client over the public Binance klines endpoint.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Constructs a new ApiClient from BinanceSettings.
    ///
    /// The request timeout is applied at the client level so a hung fetch
    /// cannot delay the poll loop past its own duration.
    pub fn new(settings: &BinanceSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;

        Ok(ApiClient {
            http_client,
            base_url: settings.rest_base_url.clone(),
        })
    }

    /// Fetches historical kline (candlestick) data.
    ///
    /// This corresponds to the `GET /api/v3/klines` endpoint.
    pub async fn get_klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u16>,
    ) -> Result<Vec<Candle>> {
        let mut params = format!("symbol={}&interval={}", symbol.0, timeframe.as_str());

        if let Some(st) = start_time {
            params.push_str(&format!("&startTime={}", st));
        }
        if let Some(et) = end_time {
            params.push_str(&format!("&endTime={}", et));
        }
        if let Some(l) = limit {
            params.push_str(&format!("&limit={}", l));
        }

        let url = format!("{}/api/v3/klines?{}", self.base_url, params);

        let response_body = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(Error::from)?
            .text()
            .await
            .map_err(Error::from)?;

        // Deserialize the raw response into a vector of RawKline.
        let raw_klines: Vec<RawKline> = serde_json::from_str(&response_body).map_err(|e| {
            // If deserialization fails, it might be a Binance error object.
            if let Ok(value) = serde_json::from_str::<Value>(&response_body) {
                if let Some(code) = value.get("code").and_then(Value::as_i64) {
                    let msg = value
                        .get("msg")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    return Error::ApiError { code, msg };
                }
            }
            Error::DeserializationFailed(e)
        })?;

        // Convert the raw rows into validated candles, dropping anything
        // malformed. A bad row never aborts the batch it arrived in.
        let mut candles = Vec::with_capacity(raw_klines.len());
        for raw in raw_klines {
            match raw.into_candle(symbol, timeframe) {
                Ok(candle) => candles.push(candle),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Dropping malformed kline row.");
                }
            }
        }

        Ok(candles)
    }
}

#[async_trait]
impl KlineFetcher for ApiClient {
    async fn fetch_klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u16>,
    ) -> Result<Vec<Candle>> {
        self.get_klines(symbol, timeframe, start_time, end_time, limit)
            .await
    }
}
