//! Feedback delay line
//!
//! Mono delay run after the spectral chain on every channel. The circular
//! buffer is sized for the maximum delay time up front so changing the time
//! never reallocates on the render thread. The feedback path is damped by a
//! one-pole lowpass.

use std::f32::consts::PI;

/// Longest delay time in milliseconds
pub const MAX_DELAY_MS: f32 = 2000.0;

/// Shortest delay time in milliseconds
pub const MIN_DELAY_MS: f32 = 1.0;

/// Feedback ceiling (never 1.0, which would sustain forever)
pub const MAX_FEEDBACK: f32 = 0.95;

/// Cutoff of the damping filter on the feedback path
const DAMPING_HZ: f32 = 8000.0;

/// Mono feedback delay with damped repeats
#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    buffer: Vec<f32>,
    write_pos: usize,
    sample_rate: f32,
    filter_state: f32,
    filter_coeff: f32,
}

impl FeedbackDelay {
    /// Create a delay able to hold [`MAX_DELAY_MS`] at `sample_rate`
    pub fn new(sample_rate: f32) -> Self {
        let sample_rate = sample_rate.max(1.0);
        let size = ((MAX_DELAY_MS + 10.0) * sample_rate / 1000.0) as usize;
        Self {
            buffer: vec![0.0; size.max(2)],
            write_pos: 0,
            sample_rate,
            filter_state: 0.0,
            filter_coeff: 1.0 - (-2.0 * PI * DAMPING_HZ / sample_rate).exp(),
        }
    }

    /// Calculate delay in samples
    fn delay_samples(&self, time_ms: f32) -> usize {
        let ms = time_ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS);
        ((ms * self.sample_rate / 1000.0) as usize).clamp(1, self.buffer.len() - 1)
    }

    /// Read from circular buffer with wrapping
    #[inline]
    fn read_buffer(&self, delay_samples: usize) -> f32 {
        let size = self.buffer.len();
        self.buffer[(self.write_pos + size - delay_samples) % size]
    }

    /// Process a block in place
    ///
    /// # Arguments
    /// * `time_ms` - Delay time (clamped to 1-2000 ms)
    /// * `feedback` - Repeat amount (clamped to 0-0.95)
    /// * `mix` - Dry/wet; 0 outputs the dry signal exactly
    pub fn process(&mut self, buffer: &mut [f32], time_ms: f32, feedback: f32, mix: f32) {
        let delay_samples = self.delay_samples(time_ms);
        let feedback = feedback.clamp(0.0, MAX_FEEDBACK);
        let mix = mix.clamp(0.0, 1.0);
        let size = self.buffer.len();

        for sample in buffer.iter_mut() {
            let input = if sample.is_finite() { *sample } else { 0.0 };
            let delayed = self.read_buffer(delay_samples);

            self.filter_state += self.filter_coeff * (delayed * feedback - self.filter_state);
            let written = input + self.filter_state;
            self.buffer[self.write_pos] = if written.is_finite() {
                written
            } else {
                self.filter_state = 0.0;
                0.0
            };

            *sample = input * (1.0 - mix) + delayed * mix;
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        self.filter_state = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_mix_is_dry() {
        let mut delay = FeedbackDelay::new(48000.0);
        let input = vec![0.3, -0.2, 0.1];
        let mut buffer = input.clone();
        delay.process(&mut buffer, 100.0, 0.5, 0.0);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_impulse_arrives_after_delay_time() {
        let mut delay = FeedbackDelay::new(48000.0);
        let mut buffer = vec![0.0; 1000];
        buffer[0] = 1.0;
        // 10 ms = 480 samples
        delay.process(&mut buffer, 10.0, 0.0, 1.0);
        assert_relative_eq!(buffer[0], 0.0);
        assert_relative_eq!(buffer[480], 1.0);
        assert_relative_eq!(buffer[960], 0.0);
    }

    #[test]
    fn test_feedback_repeats_decay() {
        let mut delay = FeedbackDelay::new(48000.0);
        let mut buffer = vec![0.0; 48000];
        buffer[0] = 1.0;
        delay.process(&mut buffer, 10.0, 0.8, 1.0);
        let first: f32 = buffer[470..500].iter().map(|x| x.abs()).sum();
        let second: f32 = buffer[950..990].iter().map(|x| x.abs()).sum();
        assert!(second > 0.0);
        assert!(second < first);
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut delay = FeedbackDelay::new(48000.0);
        let mut buffer = vec![1.0; 100];
        delay.process(&mut buffer, 1.0, 0.9, 1.0);
        delay.reset();
        let mut silent = vec![0.0; 200];
        delay.process(&mut silent, 1.0, 0.9, 1.0);
        assert!(silent.iter().all(|&x| x == 0.0));
    }
}
