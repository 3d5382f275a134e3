//! Retry policy with bounded exponential backoff and optional jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter strategy applied on top of the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the computed delay as is.
    #[default]
    None,
    /// Random from 0 to the delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Per-node retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay before a retry.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,
    /// Double the delay for every attempt already made.
    #[serde(default = "default_exponential")]
    pub exponential_backoff: bool,
    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_exponential() -> bool {
    true
}

fn default_max_delay() -> f64 {
    300.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_seconds: default_retry_delay(),
            exponential_backoff: default_exponential(),
            max_delay_seconds: default_max_delay(),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay in seconds.
    #[must_use]
    pub fn with_delay_seconds(mut self, seconds: f64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }

    /// Enables or disables exponential backoff.
    #[must_use]
    pub fn with_exponential_backoff(mut self, exponential: bool) -> Self {
        self.exponential_backoff = exponential;
        self
    }

    /// Sets the delay cap in seconds.
    #[must_use]
    pub fn with_max_delay_seconds(mut self, seconds: f64) -> Self {
        self.max_delay_seconds = seconds;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns a description of the first invalid field, if any.
    pub(crate) fn problem(&self) -> Option<String> {
        if self.max_attempts == 0 {
            return Some("max_attempts must be at least 1".to_string());
        }
        if !(self.retry_delay_seconds.is_finite() && self.retry_delay_seconds >= 0.0) {
            return Some(format!(
                "retry_delay_seconds must be a non-negative number, got {}",
                self.retry_delay_seconds
            ));
        }
        if !(self.max_delay_seconds.is_finite() && self.max_delay_seconds >= 0.0) {
            return Some(format!(
                "max_delay_seconds must be a non-negative number, got {}",
                self.max_delay_seconds
            ));
        }
        None
    }

    /// Returns true if another attempt is allowed after `attempts_made`.
    #[must_use]
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Computes the delay before the next attempt.
    ///
    /// `attempts_made` is the number of attempts already run, so the first
    /// retry of an exponential policy waits `retry_delay * 2`.
    #[must_use]
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let base = self.retry_delay_seconds.max(0.0);
        let cap = self.max_delay_seconds.max(0.0);
        let factor = if self.exponential_backoff {
            2f64.powi(i32::try_from(attempts_made.min(62)).unwrap_or(62))
        } else {
            1.0
        };
        let delay = (base * factor).min(cap);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay <= 0.0 {
                    0.0
                } else {
                    rand::thread_rng().gen_range(0.0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2.0;
                if half <= 0.0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0.0..=half)
                }
            }
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!((policy.retry_delay_seconds - 1.0).abs() < f64::EPSILON);
        assert!(policy.exponential_backoff);
        assert_eq!(policy.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_allows_retry_is_bounded() {
        let policy = RetryPolicy::default().with_max_attempts(2);
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
        assert!(!RetryPolicy::no_retry().allows_retry(1));
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::default().with_delay_seconds(0.5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_constant_delay_and_cap() {
        let policy = RetryPolicy::default()
            .with_delay_seconds(2.0)
            .with_exponential_backoff(false);
        assert_eq!(policy.delay_for(5), Duration::from_secs(2));

        let capped = RetryPolicy::default()
            .with_delay_seconds(10.0)
            .with_max_delay_seconds(15.0);
        assert_eq!(capped.delay_for(4), Duration::from_secs(15));
        assert_eq!(capped.delay_for(1000), Duration::from_secs(15));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let full = RetryPolicy::default().with_jitter(JitterStrategy::Full);
        let equal = RetryPolicy::default().with_jitter(JitterStrategy::Equal);
        for _ in 0..50 {
            assert!(full.delay_for(1) <= Duration::from_secs(2));
            let d = equal.delay_for(1);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_problem_detection() {
        assert!(RetryPolicy::default().problem().is_none());
        assert!(RetryPolicy::default().with_max_attempts(0).problem().is_some());
        assert!(RetryPolicy::default().with_delay_seconds(-1.0).problem().is_some());
    }

    #[test]
    fn test_deserialize_partial() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 2, "jitter": "equal"}"#).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.jitter, JitterStrategy::Equal);
        assert!((policy.max_delay_seconds - 300.0).abs() < f64::EPSILON);
    }
}
