//! 4-pole ladder filter
//!
//! Topology-preserving-transform (zero-delay feedback) ladder: four one-pole
//! TPT stages with global feedback solved implicitly, `tanh` on the stage
//! input. Stage coefficient `G = g / (1 + g)` stays below 1 for every cutoff,
//! so the linear core cannot blow up; resonance maps to `k = 4 * res`, where 4
//! is the self-oscillation point.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Lowest cutoff the filter accepts
pub const MIN_CUTOFF_HZ: f32 = 20.0;

/// Cutoff ceiling as a fraction of the sample rate
const MAX_CUTOFF_RATIO: f32 = 0.45;

const DENORMAL_THRESHOLD: f32 = 1e-20;

/// Ladder response
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Input passes untouched and filter state is left alone
    #[default]
    Bypass,
    LowPass,
    HighPass,
    BandPass,
}

impl FilterMode {
    pub const ALL: [FilterMode; 4] = [
        FilterMode::Bypass,
        FilterMode::LowPass,
        FilterMode::HighPass,
        FilterMode::BandPass,
    ];

    /// Parse filter mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bypass" | "off" => Some(FilterMode::Bypass),
            "lp" | "lowpass" | "low_pass" => Some(FilterMode::LowPass),
            "hp" | "highpass" | "high_pass" => Some(FilterMode::HighPass),
            "bp" | "bandpass" | "band_pass" => Some(FilterMode::BandPass),
            _ => None,
        }
    }
}

/// TPT ladder filter with persistent per-channel state
#[derive(Debug, Clone)]
pub struct LadderFilter {
    stages: [f32; 4],
    sample_rate: f32,
}

impl LadderFilter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            stages: [0.0; 4],
            sample_rate: sample_rate.max(1.0),
        }
    }

    /// Filter `buffer` in place
    ///
    /// # Arguments
    /// * `cutoff_hz` - Clamped to [20 Hz, 0.45 * sample rate]
    /// * `resonance` - 0..1, where 1 is the self-oscillation edge
    pub fn process(&mut self, buffer: &mut [f32], mode: FilterMode, cutoff_hz: f32, resonance: f32) {
        if mode == FilterMode::Bypass {
            return;
        }

        let cutoff = cutoff_hz.clamp(MIN_CUTOFF_HZ, self.sample_rate * MAX_CUTOFF_RATIO);
        let g = (PI * cutoff / self.sample_rate).tan();
        let big_g = g / (1.0 + g);
        let k = 4.0 * resonance.clamp(0.0, 1.0);
        let g2 = big_g * big_g;
        let g3 = g2 * big_g;
        let g4 = g3 * big_g;

        for sample in buffer.iter_mut() {
            let x = if sample.is_finite() { *sample } else { 0.0 };

            // Stage states seen through the remaining stages' forward gain
            let s = &self.stages;
            let sigma = (g3 * s[0] + g2 * s[1] + big_g * s[2] + s[3]) / (1.0 + g);
            let y4_estimate = (g4 * x + sigma) / (1.0 + k * g4);
            let u = (x - k * y4_estimate).tanh();

            let mut input = u;
            let mut outputs = [0.0f32; 4];
            for (stage, out) in self.stages.iter_mut().zip(outputs.iter_mut()) {
                let v = (input - *stage) * big_g;
                let y = v + *stage;
                *stage = y + v;
                *out = y;
                input = y;
            }

            let [y1, y2, y3, y4] = outputs;
            let y = match mode {
                FilterMode::LowPass => y4,
                FilterMode::HighPass => u - 4.0 * y1 + 6.0 * y2 - 4.0 * y3 + y4,
                FilterMode::BandPass => 4.0 * y2 - 8.0 * y3 + 4.0 * y4,
                FilterMode::Bypass => x,
            };

            if y.is_finite() && self.stages.iter().all(|s| s.is_finite()) {
                *sample = y;
            } else {
                self.reset();
                *sample = 0.0;
            }
        }

        for stage in self.stages.iter_mut() {
            if stage.abs() < DENORMAL_THRESHOLD {
                *stage = 0.0;
            }
        }
    }

    pub fn reset(&mut self) {
        self.stages = [0.0; 4];
    }

    pub fn state(&self) -> [f32; 4] {
        self.stages
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::rng::NoiseRng;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / 48000.0).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_bypass_leaves_signal() {
        let mut filter = LadderFilter::new(48000.0);
        let input = sine(1000.0, 256);
        let mut buffer = input.clone();
        filter.process(&mut buffer, FilterMode::Bypass, 200.0, 0.9);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let mut filter = LadderFilter::new(48000.0);
        let mut low = sine(100.0, 9600);
        filter.process(&mut low, FilterMode::LowPass, 500.0, 0.0);
        filter.reset();
        let mut high = sine(8000.0, 9600);
        filter.process(&mut high, FilterMode::LowPass, 500.0, 0.0);

        assert!(rms(&low[4800..]) > 10.0 * rms(&high[4800..]));
    }

    #[test]
    fn test_highpass_attenuates_lows() {
        let mut filter = LadderFilter::new(48000.0);
        let mut low = sine(50.0, 9600);
        filter.process(&mut low, FilterMode::HighPass, 4000.0, 0.0);
        filter.reset();
        let mut high = sine(12000.0, 9600);
        filter.process(&mut high, FilterMode::HighPass, 4000.0, 0.0);

        assert!(rms(&high[4800..]) > 5.0 * rms(&low[4800..]));
    }

    #[test]
    fn test_non_finite_input_resets_state() {
        let mut filter = LadderFilter::new(48000.0);
        let mut buffer = vec![0.5, f32::NAN, f32::INFINITY, 0.5];
        filter.process(&mut buffer, FilterMode::LowPass, 1000.0, 0.5);
        assert!(buffer.iter().all(|x| x.is_finite()));
        assert!(filter.state().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_high_resonance_noise_stays_finite() {
        let mut filter = LadderFilter::new(48000.0);
        let mut rng = NoiseRng::new(3);
        let mut buffer: Vec<f32> = (0..48000).map(|_| rng.bipolar()).collect();
        filter.process(&mut buffer, FilterMode::BandPass, 20.0, 1.0);
        assert!(buffer.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(FilterMode::parse("LP"), Some(FilterMode::LowPass));
        assert_eq!(FilterMode::parse("bandpass"), Some(FilterMode::BandPass));
        assert_eq!(FilterMode::parse("comb"), None);
    }
}
