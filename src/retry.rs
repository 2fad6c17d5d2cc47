//! Retry delay calculation for transient backend failures.
//!
//! Classification lives on [`MuninnError::is_transient`](crate::MuninnError::is_transient);
//! this module only decides *when* the next attempt runs. The attempt
//! loop itself is in the router, which resubmits each attempt through
//! the admission gate so retries compete for slots like any other work.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule for transient errors.
///
/// Exponential backoff with an optional jitter component and a hard cap
/// on both delay and attempt count.
///
/// ```rust
/// # use muninn::retry::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter(true);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays. Default: true.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the deterministic delay for a given attempt (0-indexed).
    ///
    /// Uses exponential backoff: `initial_delay * 2^attempt`, capped at
    /// `max_delay`. Does NOT include jitter — see
    /// [`effective_delay()`](Self::effective_delay) for the full
    /// calculation.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Calculate the effective delay, respecting backend `retry_after` hints.
    ///
    /// A `retry_after` hint (from a busy backend) takes precedence over
    /// the calculated backoff. With jitter enabled, the computed delay is
    /// spread over `[delay/2, delay]` so coalesced services retrying at
    /// once don't re-converge on the backend in lockstep.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay.as_millis() as u64 / 2;
        let jittered = half + rand::thread_rng().gen_range(0..=half.max(1));
        Duration::from_millis(jittered.min(delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_hint_takes_precedence() {
        let config = RetryConfig::new().jitter(true);
        let hint = Duration::from_millis(1234);
        assert_eq!(config.effective_delay(0, Some(hint)), hint);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .jitter(true);
        for attempt in 0..4 {
            let base = config.delay_for_attempt(attempt);
            for _ in 0..50 {
                let d = config.effective_delay(attempt, None);
                assert!(d >= base / 2, "jittered delay below half of base");
                assert!(d <= base, "jittered delay above base");
            }
        }
    }

    #[test]
    fn no_jitter_is_deterministic() {
        let config = RetryConfig::new()
            .initial_delay(Duration::from_millis(100))
            .jitter(false);
        assert_eq!(
            config.effective_delay(2, None),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn disabled_means_single_attempt() {
        assert_eq!(RetryConfig::disabled().max_attempts, 1);
    }
}
