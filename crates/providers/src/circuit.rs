//! Circuit breaker for the completion backend.
//!
//! # States
//! - Closed: normal operation, every failure bumps a consecutive counter
//! - Open: backend assumed down, calls fail fast without network I/O
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      consecutive_failures >= failure_threshold
//! Open      → Half-Open: reset_timeout elapsed (checked on the next call)
//! Half-Open → Closed:    success_threshold trial successes
//! Half-Open → Open:      any trial failure
//! ```
//!
//! One breaker guards one logical endpoint and is shared by every concurrent
//! invocation against it. State lives behind a `std::sync::Mutex` that is
//! only held for the read-modify-write itself, never across an `.await`.

use banter_config::ResilienceConfig;
use banter_core::error::InvokeError;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

impl CircuitBreakerConfig {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            half_open_max_calls: config.half_open_max_calls.max(1),
            success_threshold: config.success_threshold.max(1),
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`].
///
/// Hand it back through exactly one of `record_success`, `record_failure`,
/// or `release`. Only a permit issued as a half-open trial holds a trial
/// slot, and only while the breaker is still in the open episode that
/// issued it.
#[derive(Debug)]
#[must_use = "a permit must be returned to the breaker"]
pub struct Permit {
    trial: Option<u64>,
}

impl Permit {
    /// True when this call was admitted as a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    trial_successes: u32,
    trials_in_flight: u32,
    opened_at: Option<Instant>,
    /// Bumped on every trip; trial permits from earlier episodes are stale.
    generation: u64,
}

impl Inner {
    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_successes = 0;
        self.trials_in_flight = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// True when `permit` holds a slot in the current half-open episode.
    fn holds_slot(&self, permit: &Permit) -> bool {
        self.state == CircuitState::HalfOpen && permit.trial == Some(self.generation)
    }

    fn give_back(&mut self, permit: &Permit) -> bool {
        if self.holds_slot(permit) {
            self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
            true
        } else {
            false
        }
    }
}

type Transition = (CircuitState, CircuitState);

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trial_successes: 0,
                trials_in_flight: 0,
                opened_at: None,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit one call, or refuse it with [`InvokeError::CircuitOpen`].
    pub fn try_acquire(&self) -> Result<Permit, InvokeError> {
        let (permit, transition) = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => (Some(Permit { trial: None }), None),
                CircuitState::Open => {
                    let cooled = inner
                        .opened_at
                        .is_none_or(|at| at.elapsed() >= self.config.reset_timeout);
                    if cooled {
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_successes = 0;
                        inner.trials_in_flight = 1;
                        (
                            Some(Permit {
                                trial: Some(inner.generation),
                            }),
                            Some((CircuitState::Open, CircuitState::HalfOpen)),
                        )
                    } else {
                        (None, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trials_in_flight < self.config.half_open_max_calls {
                        inner.trials_in_flight += 1;
                        (
                            Some(Permit {
                                trial: Some(inner.generation),
                            }),
                            None,
                        )
                    } else {
                        (None, None)
                    }
                }
            }
        };

        self.log_transition(transition);
        permit.ok_or_else(|| InvokeError::CircuitOpen {
            endpoint: self.name.clone(),
        })
    }

    /// Report a successful call.
    ///
    /// Only trial permits from the current half-open episode move the
    /// breaker towards Closed.
    pub fn record_success(&self, permit: Permit) {
        let transition = {
            let mut inner = self.lock();
            inner.consecutive_failures = 0;
            if inner.give_back(&permit) {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                    inner.trial_successes = 0;
                    inner.trials_in_flight = 0;
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            } else {
                None
            }
        };
        self.log_transition(transition);
    }

    /// Report a failed call (transient or permanent).
    pub fn record_failure(&self, permit: Permit) {
        let transition = {
            let mut inner = self.lock();
            inner.give_back(&permit);
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            match inner.state {
                CircuitState::Closed
                    if inner.consecutive_failures >= self.config.failure_threshold =>
                {
                    inner.trip(Instant::now());
                    Some((CircuitState::Closed, CircuitState::Open))
                }
                CircuitState::HalfOpen => {
                    inner.trip(Instant::now());
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Closed | CircuitState::Open => None,
            }
        };
        self.log_transition(transition);
    }

    /// Return the permit of a call abandoned before it finished. A trial
    /// slot is freed only if this permit still holds one.
    pub fn release(&self, permit: Permit) {
        self.lock().give_back(&permit);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }

    fn log_transition(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            CircuitState::Open => warn!(
                endpoint = %self.name,
                from = %from,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit opened"
            ),
            _ => info!(endpoint = %self.name, from = %from, to = %to, "Circuit state changed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
                success_threshold: 1,
            },
        )
    }

    /// Admit a call and report it failed.
    fn fail(cb: &CircuitBreaker) {
        let permit = cb.try_acquire().unwrap();
        cb.record_failure(permit);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_allows_calls() {
        let cb = breaker(3);
        let permit = cb.try_acquire().unwrap();
        assert!(!permit.is_trial());
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_success(permit);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_on_threshold() {
        let cb = breaker(3);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(
            cb.try_acquire(),
            Err(InvokeError::CircuitOpen { endpoint }) if endpoint == "test"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counter() {
        let cb = breaker(3);
        fail(&cb);
        fail(&cb);
        cb.record_success(cb.try_acquire().unwrap());
        assert_eq!(cb.consecutive_failures(), 0);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_reset_timeout() {
        let cb = breaker(1);
        fail(&cb);
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_bounds_trial_calls() {
        let cb = breaker(1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err(), "only one trial call at a time");

        cb.release(trial);
        assert!(cb.try_acquire().is_ok(), "released slot can be reused");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_permit_does_not_free_trial_slot() {
        let cb = breaker(1);
        // Admitted while closed, still in flight when the circuit trips.
        let early = cb.try_acquire().unwrap();
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = cb.try_acquire().unwrap();
        cb.release(early);
        assert!(
            cb.try_acquire().is_err(),
            "the trial slot is still held by the trial call"
        );

        cb.record_success(trial);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_success_does_not_close_circuit() {
        let cb = breaker(1);
        let early = cb.try_acquire().unwrap();
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;

        let _trial = cb.try_acquire().unwrap();
        cb.record_success(early);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn trial_permit_from_earlier_episode_is_stale() {
        let cb = breaker(1);
        let early = cb.try_acquire().unwrap();
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        let first = cb.try_acquire().unwrap();

        // A late failure reopens the circuit while the first trial is in flight.
        cb.record_failure(early);
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = cb.try_acquire().unwrap();

        cb.release(first);
        assert!(cb.try_acquire().is_err());
        cb.record_success(second);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes() {
        let cb = breaker(1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = cb.try_acquire().unwrap();
        cb.record_success(trial);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.snapshot().opened_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let cb = breaker(1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // The cool-down restarts from the reopen.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn success_threshold_requires_several_trials() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(1),
                half_open_max_calls: 2,
                success_threshold: 2,
            },
        );
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;
        let a = cb.try_acquire().unwrap();
        let b = cb.try_acquire().unwrap();
        cb.record_success(a);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success(b);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_all_counted() {
        let cb = Arc::new(breaker(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        let permit = cb.try_acquire().unwrap();
                        cb.record_failure(permit);
                    }
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cb.consecutive_failures(), 800);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
