//! Circuit breaker for the remote backend
//!
//! Consecutive failures are counted. Once the threshold is reached the remote
//! backend is suspended for a fixed backoff; when it elapses the counter resets
//! and calls resume. Local and passthrough backends are never gated.
//! Time is passed in explicitly so tests can step it.

use std::time::{Duration, Instant};

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    backoff: Duration,
    failures: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    /// # Arguments
    /// * `threshold` - Consecutive failures that open the breaker (min 1)
    /// * `backoff` - How long remote calls stay suspended
    pub fn new(threshold: u32, backoff: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            backoff,
            failures: 0,
            open_until: None,
        }
    }

    /// Whether a remote call may be made at `now`
    ///
    /// Closes the breaker and resets the counter once the backoff has elapsed.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.open_until {
            Some(until) if now < until => false,
            Some(_) => {
                self.open_until = None;
                self.failures = 0;
                true
            }
            None => true,
        }
    }

    /// Count a failure; returns `true` if this one opened the breaker
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.failures = self.failures.saturating_add(1);
        if self.open_until.is_none() && self.failures >= self.threshold {
            self.open_until = Some(now + self.backoff);
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.open_until = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn is_open(&self, now: Instant) -> bool {
        matches!(self.open_until, Some(until) if now < until)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.record_success();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_BACKOFF)
    }
}
