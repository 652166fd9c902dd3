//! The moving-average crossover rule: compare each bar's close against its
//! SMA. A pure per-bar function with no hysteresis and no minimum hold.

use core_types::{Candle, Direction, Signal};
use indicators::Bar;
use num_traits::cast::ToPrimitive;

/// Close above the SMA is Buy, below is Sell. Exact equality is Hold, never
/// Buy.
pub fn crossover_direction(close: f64, sma: f64) -> Direction {
    if close > sma {
        Direction::Buy
    } else if close < sma {
        Direction::Sell
    } else {
        Direction::Hold
    }
}

/// The direction decided at a bar's close, per `crossover_direction`.
pub fn direction_for_bar(bar: &Bar) -> Direction {
    crossover_direction(bar.close, bar.sma)
}

/// Builds the persisted signal record for one candle. The rule is
/// deterministic, so confidence is always 1.0.
pub fn signal_for_candle(candle: &Candle, sma: f64) -> Signal {
    let close = candle.close.to_f64().unwrap_or(f64::NAN);
    Signal {
        symbol: candle.symbol.clone(),
        open_time: candle.open_time,
        direction: crossover_direction(close, sma),
        confidence: 1.0,
        price: candle.close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_above_sma_is_buy() {
        assert_eq!(crossover_direction(103.0, 102.0), Direction::Buy);
    }

    #[test]
    fn close_below_sma_is_sell() {
        assert_eq!(crossover_direction(101.0, 102.0), Direction::Sell);
    }

    #[test]
    fn exact_equality_is_hold() {
        // Equality is not treated as "above".
        assert_eq!(crossover_direction(102.0, 102.0), Direction::Hold);
    }
}
