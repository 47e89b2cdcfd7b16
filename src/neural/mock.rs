//! Mock transform backends for testing
//!
//! These don't do any real processing. They simulate the behaviours the cycle
//! has to cope with (success, hard failure, slowness, empty output) and count
//! their calls so tests can assert on backend selection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::backend::{TransformBackend, TransformParams};
use crate::error::{ResonatorError, Result};

/// Scriptable backend
///
/// Returns `input * gain` unless told to fail, stall, or return nothing.
pub struct MockBackend {
    name: String,
    gain: f32,
    latency: Duration,
    empty: bool,
    constant: Option<f32>,
    failing: AtomicBool,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gain: 1.0,
            latency: Duration::ZERO,
            empty: false,
            constant: None,
            failing: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Scale the returned audio
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Block the calling thread for `latency` on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Always return an empty buffer
    pub fn with_empty_output(mut self) -> Self {
        self.empty = true;
        self
    }

    /// Ignore the input and return `value` for every sample
    pub fn with_constant_output(mut self, value: f32) -> Self {
        self.constant = Some(value);
        self
    }

    /// Fail every call until switched back
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::Relaxed);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Fail the next `count` calls, then recover
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::Relaxed);
    }

    /// Number of `infer` calls so far, including failed ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl TransformBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&self, samples: &[f32], _sample_rate: u32, _params: &TransformParams) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let scripted_failure = self
            .fail_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure || self.failing.load(Ordering::Relaxed) {
            return Err(ResonatorError::BackendFailure {
                backend: self.name.clone(),
                reason: "mock failure".to_string(),
            });
        }

        if self.empty {
            return Ok(Vec::new());
        }
        if let Some(value) = self.constant {
            return Ok(vec![value; samples.len()]);
        }
        Ok(samples.iter().map(|s| s * self.gain).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_scales_and_counts() {
        let backend = MockBackend::new("mock").with_gain(0.5);
        let out = backend.infer(&[1.0, -1.0], 48000, &TransformParams::default()).unwrap();
        assert_eq!(out, vec![0.5, -0.5]);
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_fail_next_recovers() {
        let backend = MockBackend::new("mock");
        backend.fail_next(2);
        let params = TransformParams::default();
        assert!(backend.infer(&[0.1], 48000, &params).is_err());
        assert!(backend.infer(&[0.1], 48000, &params).is_err());
        assert!(backend.infer(&[0.1], 48000, &params).is_ok());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn test_failing_toggle() {
        let backend = MockBackend::new("mock").failing();
        let params = TransformParams::default();
        let err = backend.infer(&[0.1], 48000, &params).unwrap_err();
        assert!(err.is_backend_failure());
        backend.set_failing(false);
        assert!(backend.infer(&[0.1], 48000, &params).is_ok());
    }

    #[test]
    fn test_empty_output() {
        let backend = MockBackend::new("mock").with_empty_output();
        let out = backend.infer(&[0.1, 0.2], 48000, &TransformParams::default()).unwrap();
        assert!(out.is_empty());
    }
}
