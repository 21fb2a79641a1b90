//! Exponential backoff curves.
//!
//! One [`BackoffConfig`] drives two loops: transport retries around a
//! provider call (429/5xx, connection errors) and the delay attached to
//! `retry` recovery strategies. Local providers want [`BackoffConfig::none`];
//! hosted APIs want [`BackoffConfig::standard`].

use std::time::Duration;

/// Delay curve and retry budget for transient failures.
///
/// ```
/// use loadtest_parser::backend::BackoffConfig;
///
/// assert_eq!(BackoffConfig::none().max_retries, 0);
/// assert_eq!(BackoffConfig::standard().max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Transport retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    pub jitter: JitterStrategy,
    /// HTTP statuses worth retrying.
    pub retryable_statuses: Vec<u16>,
    /// Prefer the provider's `Retry-After` over the computed delay.
    pub respect_retry_after: bool,
}

/// How randomness is mixed into a computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Exactly the computed delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay / 2` plus uniform in `[0, delay / 2]`.
    Equal,
}

impl BackoffConfig {
    /// No transport retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// Hosted APIs: 3 retries, 1s doubling to at most 60s, full jitter.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }

    /// A caller is waiting: 2 retries, 500ms growing 1.5x to at most 10s.
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            ..Self::standard()
        }
    }

    /// Deterministic curve for `retry` recovery strategies: 1s, 2s, 4s ...
    /// capped at 10s.
    pub fn recovery() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: JitterStrategy::None,
            retryable_statuses: Vec::new(),
            respect_retry_after: false,
        }
    }

    /// `initial_delay * multiplier^attempt`, capped, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry number `attempt` (0-indexed), jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt).as_secs_f64();
        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };
        Duration::from_secs_f64(jittered)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(max_delay: Duration) -> BackoffConfig {
        BackoffConfig {
            max_delay,
            jitter: JitterStrategy::None,
            ..BackoffConfig::standard()
        }
    }

    #[test]
    fn test_delay_doubles() {
        let config = exact(Duration::from_secs(60));
        let delays: Vec<_> = (0..4).map(|a| config.delay_for_attempt(a)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_delay_capped() {
        let config = exact(Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = BackoffConfig::standard();
        for _ in 0..100 {
            assert!(config.delay_for_attempt(1) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_equal_jitter_lower_bound() {
        let config = BackoffConfig {
            jitter: JitterStrategy::Equal,
            ..BackoffConfig::standard()
        };
        for _ in 0..100 {
            let d = config.delay_for_attempt(1);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2), "{:?}", d);
        }
    }

    #[test]
    fn test_presets() {
        assert_eq!(BackoffConfig::default().max_retries, 0);
        let interactive = BackoffConfig::interactive();
        assert_eq!(interactive.max_retries, 2);
        assert!(interactive.retryable_statuses.contains(&429));

        let recovery = BackoffConfig::recovery();
        assert_eq!(recovery.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(recovery.delay_for_attempt(5), Duration::from_secs(10));
    }
}
