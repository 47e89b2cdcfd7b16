//! Comb filters
//!
//! - `CombBank`: parallel feedback combs at prime multiples of a base delay,
//!   giving inharmonic resonances.
//! - `Resonator`: single tunable feedback comb at a pitch, fractional delay.
//!
//! Delay lines are allocated once in `new`; every write is sanitized so a
//! NaN can never circulate.

/// Prime multipliers of the comb bank base delay
pub const COMB_PRIMES: [usize; 6] = [2, 3, 5, 7, 11, 13];

/// Base delay of the comb bank in seconds
pub const COMB_BASE_SECONDS: f32 = 0.0011;

/// Comb feedback at guidance 20
const MAX_COMB_FEEDBACK: f32 = 0.85;

/// Resonator pitch range in Hz
pub const RESONATOR_MIN_HZ: f32 = 20.0;
pub const RESONATOR_MAX_HZ: f32 = 5000.0;

const MAX_RESONATOR_FEEDBACK: f32 = 0.98;

#[inline]
fn sanitize(x: f32) -> f32 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Fixed-length circular delay line
#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(2)],
            write_pos: 0,
        }
    }

    /// Sample written `delay` samples ago (integer delay, >= 1)
    #[inline]
    fn read(&self, delay: usize) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1, len - 1);
        self.buffer[(self.write_pos + len - delay) % len]
    }

    /// Linearly interpolated read at a fractional delay
    #[inline]
    fn read_frac(&self, delay: f32) -> f32 {
        let max = (self.buffer.len() - 2) as f32;
        let delay = delay.clamp(1.0, max);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let a = self.read(whole);
        let b = self.read(whole + 1);
        a + (b - a) * frac
    }

    #[inline]
    fn write(&mut self, value: f32) {
        self.buffer[self.write_pos] = sanitize(value);
        self.write_pos += 1;
        if self.write_pos == self.buffer.len() {
            self.write_pos = 0;
        }
    }

    fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

// ============================================================================
// Comb bank
// ============================================================================

/// Parallel comb bank at prime-multiple delays
#[derive(Debug, Clone)]
pub struct CombBank {
    lines: Vec<DelayLine>,
    delays: [usize; 6],
}

impl CombBank {
    pub fn new(sample_rate: f32) -> Self {
        let base = (COMB_BASE_SECONDS * sample_rate).round().max(1.0) as usize;
        let delays = COMB_PRIMES.map(|p| p * base);
        Self {
            lines: delays.iter().map(|&d| DelayLine::new(d + 1)).collect(),
            delays,
        }
    }

    /// Feedback coefficient for a guidance value in [1, 20]
    #[inline]
    pub fn feedback_for_guidance(guidance: f32) -> f32 {
        (guidance / 20.0).clamp(0.0, 1.0) * MAX_COMB_FEEDBACK
    }

    /// Process in place; `mix` 0 skips the bank entirely
    pub fn process(&mut self, buffer: &mut [f32], guidance: f32, mix: f32) {
        let mix = mix.clamp(0.0, 1.0);
        if mix < f32::EPSILON {
            return;
        }
        let feedback = Self::feedback_for_guidance(guidance);
        // Unity gain at the comb peaks, averaged over the bank
        let norm = (1.0 - feedback) / self.lines.len() as f32;

        for sample in buffer.iter_mut() {
            let dry = sanitize(*sample);
            let mut wet = 0.0;
            for (line, &delay) in self.lines.iter_mut().zip(self.delays.iter()) {
                let y = dry + feedback * line.read(delay);
                line.write(y);
                wet += y;
            }
            *sample = dry * (1.0 - mix) + wet * norm * mix;
        }
    }

    pub fn delays(&self) -> &[usize; 6] {
        &self.delays
    }

    pub fn reset(&mut self) {
        self.lines.iter_mut().for_each(DelayLine::clear);
    }
}

// ============================================================================
// Resonator
// ============================================================================

/// Tunable single-tap resonant comb
#[derive(Debug, Clone)]
pub struct Resonator {
    line: DelayLine,
    sample_rate: f32,
}

impl Resonator {
    pub fn new(sample_rate: f32) -> Self {
        let max_delay = (sample_rate / RESONATOR_MIN_HZ).ceil() as usize + 4;
        Self {
            line: DelayLine::new(max_delay),
            sample_rate,
        }
    }

    /// Delay in samples for a pitch
    #[inline]
    pub fn delay_for_pitch(&self, pitch_hz: f32) -> f32 {
        self.sample_rate / pitch_hz.clamp(RESONATOR_MIN_HZ, RESONATOR_MAX_HZ)
    }

    /// Process in place
    ///
    /// # Arguments
    /// * `pitch_hz` - Resonant frequency
    /// * `decay` - 0..1, used as the feedback coefficient; the wet share rises with it
    pub fn process(&mut self, buffer: &mut [f32], pitch_hz: f32, decay: f32) {
        let feedback = decay.clamp(0.0, MAX_RESONATOR_FEEDBACK);
        let wet_share = 0.3 + 0.6 * decay.clamp(0.0, 1.0);
        let delay = self.delay_for_pitch(pitch_hz);
        let norm = 1.0 - feedback;

        for sample in buffer.iter_mut() {
            let dry = sanitize(*sample);
            let y = dry + feedback * self.line.read_frac(delay);
            self.line.write(y);
            *sample = dry * (1.0 - wet_share) + y * norm * wet_share;
        }
    }

    pub fn reset(&mut self) {
        self.line.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_prime_delays() {
        let bank = CombBank::new(48000.0);
        let base = bank.delays()[0] / 2;
        for (delay, prime) in bank.delays().iter().zip(COMB_PRIMES.iter()) {
            assert_eq!(*delay, base * prime);
        }
    }

    #[test]
    fn test_zero_mix_is_neutral() {
        let mut bank = CombBank::new(48000.0);
        let input = vec![0.5, -0.25, 0.125];
        let mut buffer = input.clone();
        bank.process(&mut buffer, 20.0, 0.0);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_comb_impulse_echoes_at_shortest_delay() {
        let mut bank = CombBank::new(48000.0);
        let first = bank.delays()[0];
        let mut buffer = vec![0.0; first * 2];
        buffer[0] = 1.0;
        bank.process(&mut buffer, 10.0, 1.0);
        assert!(buffer[first].abs() > 0.0);
        assert_relative_eq!(buffer[first - 1], 0.0);
    }

    #[test]
    fn test_nan_never_enters_lines() {
        let mut bank = CombBank::new(48000.0);
        let mut buffer = vec![f32::NAN; 64];
        bank.process(&mut buffer, 20.0, 1.0);
        assert!(buffer.iter().all(|x| x.is_finite()));
        let mut resonator = Resonator::new(48000.0);
        let mut buffer = vec![f32::INFINITY; 64];
        resonator.process(&mut buffer, 440.0, 0.9);
        assert!(buffer.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_resonator_rings_at_pitch() {
        let mut resonator = Resonator::new(48000.0);
        let delay = resonator.delay_for_pitch(480.0);
        assert_relative_eq!(delay, 100.0);

        let mut buffer = vec![0.0; 400];
        buffer[0] = 1.0;
        resonator.process(&mut buffer, 480.0, 0.9);
        assert!(buffer[100].abs() > buffer[50].abs());
        assert!(buffer[200].abs() > 0.0);
    }
}
