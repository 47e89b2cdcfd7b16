//! One-pole parameter smoothing
//!
//! Continuous parameters glide toward their target instead of jumping, which
//! keeps knob moves from clicking. Smoothing is applied once per block.

/// Default smoothing time constant in seconds
pub const DEFAULT_SMOOTHING_SECONDS: f32 = 0.05;

/// One-pole smoother advanced per block
#[derive(Debug, Clone)]
pub struct Smoothed {
    current: f32,
    time_constant: f32,
    initialized: bool,
}

impl Smoothed {
    /// # Arguments
    /// * `time_constant` - Seconds to reach ~63% of a step
    pub fn new(time_constant: f32) -> Self {
        Self {
            current: 0.0,
            time_constant: time_constant.max(0.0),
            initialized: false,
        }
    }

    /// Advance toward `target` by one block of `block_len` samples
    ///
    /// The first call snaps to the target so a fresh chain starts on its
    /// configured values.
    #[inline]
    pub fn next(&mut self, target: f32, block_len: usize, sample_rate: f32) -> f32 {
        if !self.initialized || self.time_constant <= 0.0 || !self.current.is_finite() {
            self.current = target;
            self.initialized = true;
            return target;
        }
        let block_seconds = block_len as f32 / sample_rate.max(1.0);
        let coeff = 1.0 - (-block_seconds / self.time_constant).exp();
        self.current += coeff * (target - self.current);
        if (self.current - target).abs() < 1e-6 {
            self.current = target;
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    /// Forget the current value; the next call snaps again
    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

impl Default for Smoothed {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_SECONDS)
    }
}
