use std::time::Duration;

use crate::config::PipelineConfig;
use crate::errors::AppError;

/// Attempts a permanent error gets: the first try plus one confirmation
/// retry to rule out flakiness.
const PERMANENT_MAX_ATTEMPTS: u32 = 2;

/// Decide whether a failed attempt should be retried and after how long.
///
/// Transient errors back off exponentially from the base delay up to the cap
/// and the configured attempt budget; permanent errors get exactly one extra
/// attempt with the base delay.
pub fn retry_delay(error: &AppError, attempt: u32, config: &PipelineConfig) -> Option<Duration> {
    let max_attempts = if error.is_transient() {
        config.max_retry_attempts.max(1)
    } else {
        PERMANENT_MAX_ATTEMPTS
    };

    if attempt >= max_attempts {
        return None;
    }

    Some(backoff_delay(
        attempt,
        config.retry_base_delay_ms,
        config.retry_max_delay_ms,
    ))
}

/// base * 2^(attempt-1), capped.
pub fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << exp);
    Duration::from_millis(delay.min(cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1, 500, 30_000), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, 500, 30_000), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(3, 500, 30_000), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(10, 500, 30_000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_transient_retries_until_budget() {
        let cfg = config();
        let err = AppError::RateLimited;

        assert!(retry_delay(&err, 1, &cfg).is_some());
        assert!(retry_delay(&err, 2, &cfg).is_some());
        assert!(retry_delay(&err, 3, &cfg).is_none());
    }

    #[test]
    fn test_permanent_gets_exactly_one_confirmation_retry() {
        let cfg = config();
        let err = AppError::Validation("malformed".to_string());

        assert!(retry_delay(&err, 1, &cfg).is_some());
        assert!(retry_delay(&err, 2, &cfg).is_none());
    }

    #[test]
    fn test_delays_increase_between_transient_attempts() {
        let cfg = config();
        let err = AppError::External("connection timed out".to_string());

        let first = retry_delay(&err, 1, &cfg).unwrap();
        let second = retry_delay(&err, 2, &cfg).unwrap();
        assert!(second > first);
    }
}
