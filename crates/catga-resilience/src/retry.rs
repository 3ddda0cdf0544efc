//! Exponential backoff with jitter (spec §4.F "Retry": "exponential
//! backoff with jitter; retries only on classified-transient errors").

use std::time::Duration;

use catga_core::ErrorCode;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(50), max_delay: Duration::from_secs(5), jitter: true }
    }
}

/// spec §7 transient classification: `Timeout`, `TransportFailed`,
/// `PersistenceFailed`, `Overloaded` (unless queue-overflow, which is
/// indistinguishable from any other `Overloaded` at this layer so it
/// is treated as transient here — the bulkhead stage is what actually
/// produces `Overloaded` and sits *inside* retry, so a caller that
/// wants to suppress retrying overflow should not classify it
/// transient for that category), `ConcurrencyConflict` (flow engine
/// only; flow callers pass a narrower classifier, see
/// `catga-flow`).
pub fn is_transient(code: ErrorCode) -> bool {
    matches!(code, ErrorCode::Timeout | ErrorCode::TransportFailed | ErrorCode::PersistenceFailed | ErrorCode::Overloaded)
}

pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay.saturating_mul(1 << attempt.min(20));
    let capped = exp.min(config.max_delay);
    if !config.jitter {
        return capped;
    }
    let millis = capped.as_millis().max(1) as u64;
    let jittered = rand::thread_rng().gen_range(0..=millis);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = RetryConfig { jitter: false, ..RetryConfig::default() };
        let d0 = backoff_delay(&config, 0);
        let d1 = backoff_delay(&config, 1);
        let d2 = backoff_delay(&config, 10);
        assert!(d1 >= d0);
        assert_eq!(d2, config.max_delay);
    }

    #[test]
    fn transient_classification_matches_spec_set() {
        assert!(is_transient(ErrorCode::Timeout));
        assert!(is_transient(ErrorCode::TransportFailed));
        assert!(is_transient(ErrorCode::PersistenceFailed));
        assert!(is_transient(ErrorCode::Overloaded));
        assert!(!is_transient(ErrorCode::ValidationFailed));
        assert!(!is_transient(ErrorCode::HandlerNotFound));
        assert!(!is_transient(ErrorCode::CircuitOpen));
        assert!(!is_transient(ErrorCode::Cancelled));
    }
}
