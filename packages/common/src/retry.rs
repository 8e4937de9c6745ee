use std::time::Duration;

use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    let total_delay = delay_ms.saturating_add(jitter).min(max_ms);
    Duration::from_millis(total_delay)
}

/// Apply a randomized +-12.5% jitter to a TTL so that entries written
/// together do not all expire together.
pub fn jittered_ttl(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let delta = base_ms / 8;
    let jittered = rand::rng().random_range(base_ms.saturating_sub(delta)..=base_ms + delta);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let d1 = calculate_backoff(1, 1000, 60000);
        assert!(d1.as_millis() >= 1000 && d1.as_millis() <= 1250);

        let d2 = calculate_backoff(2, 1000, 60000);
        assert!(d2.as_millis() >= 2000 && d2.as_millis() <= 2500);

        let d3 = calculate_backoff(3, 1000, 60000);
        assert!(d3.as_millis() >= 4000 && d3.as_millis() <= 5000);
    }

    #[test]
    fn backoff_respects_max() {
        let d = calculate_backoff(10, 10000, 60000);
        assert!(d.as_millis() <= 60000);
    }

    #[test]
    fn backoff_zero_attempt() {
        assert_eq!(calculate_backoff(0, 1000, 60000), Duration::ZERO);
    }

    #[test]
    fn jittered_ttl_stays_within_bounds() {
        let base = Duration::from_secs(1600);
        for _ in 0..100 {
            let ttl = jittered_ttl(base);
            assert!(ttl >= Duration::from_millis(1_400_000));
            assert!(ttl <= Duration::from_millis(1_800_000));
        }
    }

    #[test]
    fn jittered_ttl_zero_base() {
        assert_eq!(jittered_ttl(Duration::ZERO), Duration::ZERO);
    }
}
