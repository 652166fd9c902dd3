//! The staleness predicate, kept pure so tests can pin the clock.

/// True when there is no stored candle, or the newest one's open time is
/// more than `max_age` behind `now_ms`.
///
/// For a fixed `max_age` this is monotone in `now_ms`: once stale, it stays
/// stale until a newer candle is written.
pub fn is_stale_at(latest_open_time: Option<i64>, now_ms: i64, max_age: chrono::Duration) -> bool {
    match latest_open_time {
        None => true,
        Some(open_time) => now_ms - open_time > max_age.num_milliseconds(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: i64 = 60_000;

    #[test]
    fn empty_store_is_stale() {
        assert!(is_stale_at(None, 0, chrono::Duration::minutes(5)));
    }

    #[test]
    fn fresh_candle_is_not_stale() {
        let latest = 1_700_000_000_000;
        let now = latest + 2 * MINUTE_MS;
        assert!(!is_stale_at(Some(latest), now, chrono::Duration::minutes(5)));
    }

    #[test]
    fn exactly_at_max_age_is_not_stale() {
        let latest = 1_700_000_000_000;
        let now = latest + 5 * MINUTE_MS;
        assert!(!is_stale_at(Some(latest), now, chrono::Duration::minutes(5)));
    }

    #[test]
    fn transitions_once_and_never_flips_back() {
        let latest = 1_700_000_000_000;
        let max_age = chrono::Duration::minutes(5);
        let mut seen_stale = false;
        // Advance the clock a minute at a time past the threshold. Once the
        // predicate turns true it must stay true for every later instant.
        for step in 0..12 {
            let now = latest + step * MINUTE_MS;
            let stale = is_stale_at(Some(latest), now, max_age);
            if seen_stale {
                assert!(stale, "staleness flipped back at step {step}");
            }
            seen_stale = stale;
        }
        assert!(seen_stale);
    }
}
