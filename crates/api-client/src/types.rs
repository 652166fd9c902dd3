use core_types::{Candle, Symbol, Timeframe, ValidationError};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// One kline exactly as Binance returns it: a positional JSON array of
/// `[open_time, open, high, low, close, volume, close_time,
/// quote_asset_volume, number_of_trades, taker_buy_volume,
/// taker_buy_quote_volume, ignore]`, prices as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKline(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub i64,
    pub String,
    pub String,
    pub Value,
);

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, ValidationError> {
    value.parse().map_err(|_| ValidationError::ParseField {
        field,
        value: value.to_string(),
    })
}

impl RawKline {
    /// Converts the raw exchange row into a validated `Candle`.
    ///
    /// Parse failures and out-of-range values are rejected here, at the
    /// boundary, so nothing downstream ever sees a malformed bar.
    pub fn into_candle(
        self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Candle, ValidationError> {
        let candle = Candle {
            symbol: symbol.clone(),
            timeframe,
            open_time: self.0,
            open: parse_decimal("open", &self.1)?,
            high: parse_decimal("high", &self.2)?,
            low: parse_decimal("low", &self.3)?,
            close: parse_decimal("close", &self.4)?,
            volume: parse_decimal("volume", &self.5)?,
            close_time: self.6,
            quote_asset_volume: parse_decimal("quote_asset_volume", &self.7)?,
            number_of_trades: self.8,
            taker_buy_volume: parse_decimal("taker_buy_volume", &self.9)?,
            taker_buy_quote_volume: parse_decimal("taker_buy_quote_volume", &self.10)?,
        };
        candle.validate()?;
        Ok(candle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(open_time: i64, close: &str) -> RawKline {
        RawKline(
            open_time,
            "100.0".to_string(),
            "110.0".to_string(),
            "95.0".to_string(),
            close.to_string(),
            "12.5".to_string(),
            open_time + 59_999,
            "1260.0".to_string(),
            42,
            "6.0".to_string(),
            "630.0".to_string(),
            Value::String("0".to_string()),
        )
    }

    #[test]
    fn raw_kline_converts_to_candle() {
        let symbol = Symbol("BTCUSDT".to_string());
        let candle = raw(1_700_000_000_000, "105.0")
            .into_candle(&symbol, Timeframe::M1)
            .unwrap();
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert_eq!(candle.close, "105.0".parse().unwrap());
        assert_eq!(candle.number_of_trades, 42);
    }

    #[test]
    fn unparseable_close_is_rejected() {
        let symbol = Symbol("BTCUSDT".to_string());
        let err = raw(1_700_000_000_000, "NaN")
            .into_candle(&symbol, Timeframe::M1)
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ParseField { field: "close", .. }
        ));
    }

    #[test]
    fn non_positive_close_is_rejected() {
        let symbol = Symbol("BTCUSDT".to_string());
        let err = raw(1_700_000_000_000, "0")
            .into_candle(&symbol, Timeframe::M1)
            .unwrap_err();
        assert!(matches!(err, ValidationError::NonPositivePrice { .. }));
    }

    #[test]
    fn positional_array_deserializes() {
        let json = r#"[1700000000000,"100.0","110.0","95.0","105.0","12.5",1700000059999,"1260.0",42,"6.0","630.0","0"]"#;
        let kline: RawKline = serde_json::from_str(json).unwrap();
        assert_eq!(kline.0, 1_700_000_000_000);
        assert_eq!(kline.8, 42);
    }
}
