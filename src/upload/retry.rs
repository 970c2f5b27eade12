//! Retry classification and backoff

use std::hash::{Hash, Hasher};
use std::time::Duration;

use reqwest::StatusCode;

use crate::config::UploadConfig;

/// How a failed request should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Worth another attempt after a backoff
    Transient,
    /// The server refused our credential
    Unauthorized,
    /// Retrying will not help
    Permanent,
}

/// Classify an HTTP status that did not succeed
pub fn classify_status(status: StatusCode) -> Disposition {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Disposition::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Disposition::Transient,
        s if s.is_server_error() => Disposition::Transient,
        _ => Disposition::Permanent,
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_retry_delay(),
            max_delay: config.max_retry_delay(),
        }
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Delay before retrying after the `attempt`-th consecutive failure
    pub fn delay_for(&self, key: &str, attempt: u32) -> Duration {
        self.backoff_for_attempt(attempt)
            .mul_f64(jitter_multiplier(key, attempt))
            .min(self.max_delay)
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Deterministic jitter in [0.8, 1.2)
fn jitter_multiplier(key: &str, attempt: u32) -> f64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let bucket = (hasher.finish() % 400) as f64;
    0.8 + (bucket / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_secs(10));
        assert_eq!(policy.backoff_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_in_band() {
        for attempt in 1..50 {
            let m = jitter_multiplier("artifact", attempt);
            assert!((0.8..1.2).contains(&m), "{}", m);
        }
        assert_eq!(jitter_multiplier("a", 3), jitter_multiplier("a", 3));

        let delay = policy().delay_for("artifact", 2);
        assert!(delay >= Duration::from_millis(1600) && delay < Duration::from_millis(2400));
    }

    #[test]
    fn attempt_cap_is_consecutive_failures() {
        let policy = policy();
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), Disposition::Transient);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Disposition::Transient);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), Disposition::Transient);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), Disposition::Unauthorized);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), Disposition::Unauthorized);
        assert_eq!(classify_status(StatusCode::UNPROCESSABLE_ENTITY), Disposition::Permanent);
    }
}
