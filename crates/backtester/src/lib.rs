pub mod error;

use chrono::{TimeZone, Utc};
use core_types::EquityPoint;
use indicators::Bar;
use strategies::{position, trend_following};

pub use error::{Error, Result};

/// The cumulative-performance series of replaying the crossover rule over a
/// candle series, normalized so the first bar is 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub points: Vec<EquityPoint>,
}

impl BacktestResult {
    /// The compounded return at the end of the series.
    pub fn final_cumulative(&self) -> f64 {
        self.points.last().map(|p| p.cumulative).unwrap_or(1.0)
    }
}

/// Replays the crossover signal against historical returns.
///
/// The strategy return realized over bar `t` uses the decision made at bar
/// `t - 1`: decide at the close of one bar, realize the return over the
/// next. Using bar `t`'s own signal would be a look-ahead bug.
///
/// Callers must drop SMA warm-up bars before calling; every input bar is
/// expected to carry a defined SMA.
pub fn run(bars: &[Bar]) -> Result<BacktestResult> {
    if bars.len() < 2 {
        return Err(Error::NotEnoughBars(bars.len()));
    }
    for (index, bar) in bars.iter().enumerate() {
        if !bar.close.is_finite() || bar.close <= 0.0 {
            return Err(Error::BadClose {
                index,
                value: bar.close,
            });
        }
    }

    let mut points = Vec::with_capacity(bars.len());
    points.push(EquityPoint {
        open_time: bars[0].open_time,
        cumulative: 1.0,
    });

    let mut cumulative = 1.0;
    for t in 1..bars.len() {
        let period_return = bars[t].close / bars[t - 1].close - 1.0;
        let held = position(trend_following::direction_for_bar(&bars[t - 1]));
        cumulative *= 1.0 + period_return * held;
        points.push(EquityPoint {
            open_time: bars[t].open_time,
            cumulative,
        });
    }

    Ok(BacktestResult { points })
}

/// Prints a short human-readable summary of a finished run.
pub fn print_summary(result: &BacktestResult) {
    let first = result.points.first();
    let last = result.points.last();
    println!("\n--- Backtest Summary ---");
    println!("Bars:              {}", result.points.len());
    if let (Some(first), Some(last)) = (first, last) {
        let fmt = |ms: i64| {
            Utc.timestamp_millis_opt(ms)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| ms.to_string())
        };
        println!("From:              {}", fmt(first.open_time));
        println!("To:                {}", fmt(last.open_time));
    }
    println!(
        "Final cumulative:  {:.4} ({:+.2}%)",
        result.final_cumulative(),
        (result.final_cumulative() - 1.0) * 100.0
    );
    println!("------------------------");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time: i64, close: f64, sma: f64) -> Bar {
        Bar {
            open_time,
            close,
            sma,
        }
    }

    #[test]
    fn first_point_is_normalized_to_one() {
        let bars = vec![bar(0, 100.0, 99.0), bar(1, 110.0, 100.0)];
        let result = run(&bars).unwrap();
        assert_eq!(result.points[0].cumulative, 1.0);
        assert_eq!(result.points.len(), bars.len());
    }

    #[test]
    fn lags_the_signal_by_one_bar() {
        // Directions per bar: Buy (100 > 99), Sell (110 < 120), Buy.
        // Bar 1's return (+10%) is realized under bar 0's Buy; bar 2's
        // return is realized under bar 1's Sell, i.e. flat. Applying bar
        // t's own signal would instead give 0.90 at bar 1.
        let bars = vec![
            bar(0, 100.0, 99.0),
            bar(1, 110.0, 120.0),
            bar(2, 100.0, 99.0),
        ];
        let result = run(&bars).unwrap();
        assert!((result.points[1].cumulative - 1.10).abs() < 1e-12);
        assert!((result.points[2].cumulative - 1.10).abs() < 1e-12);
    }

    #[test]
    fn all_hold_stays_at_one() {
        // close == sma on every bar, so every position is flat.
        let bars = vec![
            bar(0, 100.0, 100.0),
            bar(1, 150.0, 150.0),
            bar(2, 80.0, 80.0),
            bar(3, 120.0, 120.0),
        ];
        let result = run(&bars).unwrap();
        for point in &result.points {
            assert_eq!(point.cumulative, 1.0);
        }
    }

    #[test]
    fn always_long_compounds_period_returns() {
        let bars = vec![
            bar(0, 100.0, 50.0),
            bar(1, 110.0, 50.0),
            bar(2, 121.0, 50.0),
        ];
        let result = run(&bars).unwrap();
        assert!((result.points[2].cumulative - 1.21).abs() < 1e-12);
        assert!((result.final_cumulative() - 1.21).abs() < 1e-12);
    }

    #[test]
    fn fewer_than_two_bars_is_invalid() {
        assert_eq!(run(&[]).unwrap_err(), Error::NotEnoughBars(0));
        assert_eq!(
            run(&[bar(0, 100.0, 99.0)]).unwrap_err(),
            Error::NotEnoughBars(1)
        );
    }

    #[test]
    fn non_positive_close_is_invalid() {
        let bars = vec![bar(0, 100.0, 99.0), bar(1, 0.0, 99.0)];
        assert_eq!(
            run(&bars).unwrap_err(),
            Error::BadClose {
                index: 1,
                value: 0.0
            }
        );
    }
}
