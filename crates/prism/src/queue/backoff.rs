use std::time::Duration;

/// Delay before the next attempt: `min(base × 2^(attempts − 1), max)`,
/// where `attempts` counts attempts already made.
pub fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_capped() {
        let base = Duration::from_secs(2);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(1, base, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, base, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, base, max), Duration::from_secs(8));
        assert_eq!(backoff_delay(6, base, max), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_attempt_counts_saturate() {
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(u32::MAX, Duration::from_secs(1), max), max);
        assert_eq!(backoff_delay(0, Duration::from_millis(5), max), Duration::from_millis(5));
    }
}
