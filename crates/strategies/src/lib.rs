use core_types::Direction;

pub mod trend_following;

pub use trend_following::{crossover_direction, signal_for_candle};

/// Maps a decision to the position held over the following bar.
///
/// Sell means flat, not short: +1.0 for Buy, 0.0 for Sell and Hold.
pub fn position(direction: Direction) -> f64 {
    match direction {
        Direction::Buy => 1.0,
        Direction::Sell | Direction::Hold => 0.0,
    }
}
