//! Retry policy: exponential backoff with jitter between completion attempts.

use banter_config::ResilienceConfig;
use banter_core::error::ProviderError;
use rand::Rng;
use std::time::Duration;

/// How often and how patiently a completion is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (must be >= 1).
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Growth factor applied to the wait after each retry.
    pub multiplier: f64,
    /// Upper bound on any single wait.
    pub max_backoff: Duration,
    /// Fraction of each wait randomized, ± (0.0–1.0).
    pub jitter: f64,
    /// Bound on one attempt when the caller has no deadline.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: config.initial_backoff(),
            multiplier: config.backoff_multiplier,
            max_backoff: config.max_backoff(),
            jitter: config.jitter,
            attempt_timeout: config.attempt_timeout(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1".into());
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err("backoff multiplier must be >= 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0".into());
        }
        if self.initial_backoff > self.max_backoff {
            return Err("initial backoff must not exceed max backoff".into());
        }
        Ok(())
    }

    /// Un-jittered wait before retry number `retry` (1-indexed).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        (1..retry).fold(self.initial_backoff.min(self.max_backoff), |d, _| {
            self.grow(d)
        })
    }

    /// The wait that follows `current`, capped.
    pub fn grow(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.multiplier;
        Duration::try_from_secs_f64(next.min(self.max_backoff.as_secs_f64()))
            .unwrap_or(self.max_backoff)
    }

    /// Spread `base` by ±`jitter`, never beyond `max_backoff`.
    pub fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let offset = rand::rng().random_range(-self.jitter..=self.jitter);
        let secs = base.as_secs_f64() * (1.0 + offset);
        Duration::try_from_secs_f64(secs.min(self.max_backoff.as_secs_f64())).unwrap_or(base)
    }
}

/// Per-invocation retry bookkeeping. Created per call, dropped after.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<ProviderError>,
    pub next_backoff: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            last_error: None,
            next_backoff: policy.initial_backoff.min(policy.max_backoff),
        }
    }

    pub fn has_attempts_left(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.max_attempts
    }

    /// Record a transient failure and return how long to wait before the next attempt.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: ProviderError) -> Duration {
        let delay = policy.jittered(self.next_backoff);
        self.next_backoff = policy.grow(self.next_backoff);
        self.last_error = Some(error);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(1_000))
            .with_jitter(0.0)
    }

    #[test]
    fn exponential_backoff_grows() {
        let p = policy();
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn respects_max_backoff() {
        let p = policy();
        assert_eq!(p.backoff_for(10), Duration::from_millis(1_000));
        assert_eq!(p.grow(Duration::from_millis(900)), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy().with_jitter(0.25);
        for _ in 0..200 {
            let d = p.jittered(Duration::from_millis(400));
            assert!(d >= Duration::from_millis(300), "{d:?}");
            assert!(d <= Duration::from_millis(500), "{d:?}");
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let p = policy().with_jitter(1.0);
        for _ in 0..200 {
            assert!(p.jittered(Duration::from_millis(1_000)) <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn zero_attempts_invalid() {
        assert!(policy().with_max_attempts(0).validate().is_err());
        assert!(policy().with_max_attempts(1).validate().is_ok());
    }

    #[test]
    fn nan_multiplier_invalid() {
        let p = RetryPolicy {
            multiplier: f64::NAN,
            ..policy()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn state_tracks_attempts_and_backoff() {
        let p = policy().with_max_attempts(2);
        let mut state = RetryState::new(&p);
        assert!(state.has_attempts_left(&p));
        state.attempt += 1;
        let d1 = state.record_failure(&p, ProviderError::Network("x".into()));
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(state.next_backoff, Duration::from_millis(200));
        assert!(state.last_error.is_some());
        state.attempt += 1;
        assert!(!state.has_attempts_left(&p));
    }
}
