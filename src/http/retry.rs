//! Retry and backoff settings.
//!
//! `RetryConfig` drives both REST retries (`TradeHttp`) and the backoff
//! variant of stream reconnection (`ReconnectPolicy::Backoff`).

use std::time::Duration;

/// Retry policy for one REST request.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    /// Single attempt.
    #[default]
    None,
    /// Retry transport failures, timeouts, 429 and 502/503/504.
    /// Used for every history and replay GET.
    Idempotent,
    Custom(RetryConfig),
}

impl RetryPolicy {
    /// The config to run with, or `None` for a single attempt.
    pub fn config(&self) -> Option<RetryConfig> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Idempotent => Some(RetryConfig::idempotent()),
            RetryPolicy::Custom(config) => Some(config.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Spread each delay by up to ±25%.
    pub jitter: bool,
    /// HTTP statuses that are retried. Unused for stream reconnects.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: true,
            retryable_statuses: vec![502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// GET requests: the default plus 429.
    pub fn idempotent() -> Self {
        Self {
            retryable_statuses: vec![429, 502, 503, 504],
            ..Self::default()
        }
    }

    /// Stream reconnects: 1s doubling up to 30s.
    ///
    /// `max_retries` is not consulted here; the stream's own
    /// `reconnect_attempts` caps the number of attempts.
    pub fn reconnect() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retryable_statuses: Vec::new(),
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay before retry `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let final_ms = if self.jitter {
            let spread = capped * 0.25;
            let offset = (rand::random::<f64>() - 0.5) * 2.0 * spread;
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_config() {
        assert!(RetryPolicy::default().config().is_none());
        let idempotent = RetryPolicy::Idempotent.config().unwrap();
        assert!(idempotent.is_retryable_status(429));
        assert!(idempotent.is_retryable_status(503));
        assert!(!idempotent.is_retryable_status(500));

        let custom = RetryConfig {
            max_retries: 7,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::Custom(custom.clone()).config(), Some(custom));
    }

    #[test]
    fn test_delay_doubles_without_jitter() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_reconnect_delay_caps_at_thirty_seconds() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::reconnect()
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::reconnect();
        for _ in 0..50 {
            let ms = config.delay_for_attempt(2).as_millis();
            assert!((3000..=5000).contains(&ms), "{ms}");
        }
    }
}
