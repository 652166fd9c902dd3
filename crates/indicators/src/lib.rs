use core_types::Candle;
use num_traits::cast::ToPrimitive;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("SMA window must be a positive integer")]
    ZeroWindow,
}

pub type Result<T> = std::result::Result<T, Error>;

/// One bar with its indicator value, ready for signal generation and the
/// backtest. Only bars past the SMA warm-up exist in this form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub open_time: i64,
    pub close: f64,
    pub sma: f64,
}

/// Simple moving average over a fixed trailing window.
///
/// Element `i` is the arithmetic mean of `closes[i + 1 - window ..= i]` and
/// is `None` until at least `window` closes exist. A non-finite input
/// poisons exactly the windows it falls in; it is never coerced to zero.
pub fn sma(closes: &[f64], window: usize) -> Result<Vec<Option<f64>>> {
    if window == 0 {
        return Err(Error::ZeroWindow);
    }

    let values = closes
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                return None;
            }
            let trailing = &closes[i + 1 - window..=i];
            if trailing.iter().any(|v| !v.is_finite()) {
                return None;
            }
            Some(trailing.iter().sum::<f64>() / window as f64)
        })
        .collect();

    Ok(values)
}

/// Pairs candles with their SMA and drops the undefined warm-up rows,
/// producing the bar sequence the backtest runs on.
pub fn indicator_bars(candles: &[Candle], window: usize) -> Result<Vec<Bar>> {
    let closes: Vec<f64> = candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(f64::NAN))
        .collect();
    let averages = sma(&closes, window)?;

    let bars = candles
        .iter()
        .zip(closes.iter())
        .zip(averages.iter())
        .filter_map(|((candle, close), average)| {
            average.map(|sma| Bar {
                open_time: candle.open_time,
                close: *close,
                sma,
            })
        })
        .collect();

    Ok(bars)
}
