//! Excitation sources
//!
//! What gets injected into a channel's loop each block, on top of the fed-back
//! signal: a Euclidean click pattern, white noise, a PolyBLEP sawtooth, the
//! live host input, or nothing.

use serde::{Deserialize, Serialize};

use crate::dsp::rng::NoiseRng;

/// Length of one Euclidean click envelope in seconds
const CLICK_SECONDS: f32 = 0.004;

/// Excitation source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExcitationMode {
    /// Rhythmic noise clicks on a Euclidean pattern
    Euclidean,
    /// Broadband white noise
    Noise,
    /// Band-limited sawtooth
    Oscillator,
    /// Host input passed through
    LiveInput,
    #[default]
    Silence,
}

impl ExcitationMode {
    /// Parse excitation mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "euclidean" | "pulse" => Some(ExcitationMode::Euclidean),
            "noise" => Some(ExcitationMode::Noise),
            "oscillator" | "osc" | "saw" => Some(ExcitationMode::Oscillator),
            "live" | "live_input" | "input" => Some(ExcitationMode::LiveInput),
            "silence" | "none" => Some(ExcitationMode::Silence),
            _ => None,
        }
    }
}

/// Excitation settings, read from the channel parameter snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExcitationSettings {
    pub mode: ExcitationMode,
    /// Output level 0..1
    pub level: f32,
    /// Hits per pattern
    pub pulses: u32,
    /// Sixteenth-note steps per pattern
    pub steps: u32,
    pub bpm: f32,
    pub osc_freq_hz: f32,
}

impl Default for ExcitationSettings {
    fn default() -> Self {
        Self {
            mode: ExcitationMode::Silence,
            level: 0.5,
            pulses: 3,
            steps: 8,
            bpm: 120.0,
            osc_freq_hz: 110.0,
        }
    }
}

/// Whether step `step` of a `pulses`-in-`steps` Euclidean pattern is a hit
#[inline]
pub fn euclidean_hit(step: u32, pulses: u32, steps: u32) -> bool {
    if steps == 0 || pulses == 0 {
        return false;
    }
    let pulses = pulses.min(steps);
    ((step % steps) * pulses) % steps < pulses
}

/// PolyBLEP residual for a discontinuity at phase 0
#[inline]
fn poly_blep(phase: f32, dt: f32) -> f32 {
    if phase < dt {
        let t = phase / dt;
        t + t - t * t - 1.0
    } else if phase > 1.0 - dt {
        let t = (phase - 1.0) / dt;
        t * t + t + t + 1.0
    } else {
        0.0
    }
}

/// Stateful excitation generator, one per channel
#[derive(Debug, Clone)]
pub struct ExcitationGenerator {
    sample_rate: f32,
    rng: NoiseRng,
    osc_phase: f32,
    step_counter: f32,
    step_index: u32,
    click_env: f32,
    click_decay: f32,
}

impl ExcitationGenerator {
    pub fn new(sample_rate: f32, seed: u64) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            sample_rate,
            rng: NoiseRng::new(seed),
            osc_phase: 0.0,
            step_counter: 0.0,
            step_index: 0,
            click_env: 0.0,
            click_decay: (-1.0 / (CLICK_SECONDS * sample_rate / 5.0)).exp(),
        }
    }

    /// Fill `out` with one block of excitation
    ///
    /// # Arguments
    /// * `input` - Host input for `LiveInput`; shorter input is zero-padded
    pub fn fill(&mut self, out: &mut [f32], input: &[f32], settings: &ExcitationSettings) {
        let level = settings.level.clamp(0.0, 1.0);
        match settings.mode {
            ExcitationMode::Silence => out.iter_mut().for_each(|s| *s = 0.0),
            ExcitationMode::LiveInput => {
                for (i, sample) in out.iter_mut().enumerate() {
                    let x = input.get(i).copied().unwrap_or(0.0);
                    *sample = if x.is_finite() { x * level } else { 0.0 };
                }
            }
            ExcitationMode::Noise => {
                for sample in out.iter_mut() {
                    *sample = self.rng.bipolar() * level;
                }
            }
            ExcitationMode::Oscillator => {
                let freq = settings.osc_freq_hz.clamp(1.0, self.sample_rate * 0.45);
                let dt = freq / self.sample_rate;
                for sample in out.iter_mut() {
                    let naive = 2.0 * self.osc_phase - 1.0;
                    *sample = (naive - poly_blep(self.osc_phase, dt)) * level;
                    self.osc_phase += dt;
                    if self.osc_phase >= 1.0 {
                        self.osc_phase -= 1.0;
                    }
                }
            }
            ExcitationMode::Euclidean => {
                let steps = settings.steps.clamp(1, 64);
                let bpm = settings.bpm.clamp(20.0, 400.0);
                let samples_per_step = self.sample_rate * 60.0 / bpm / 4.0;
                for sample in out.iter_mut() {
                    if self.step_counter <= 0.0 {
                        if euclidean_hit(self.step_index, settings.pulses, steps) {
                            self.click_env = 1.0;
                        }
                        self.step_index = (self.step_index + 1) % steps;
                        self.step_counter += samples_per_step;
                    }
                    self.step_counter -= 1.0;
                    *sample = self.click_env * self.rng.bipolar() * level;
                    self.click_env *= self.click_decay;
                    if self.click_env < 1e-6 {
                        self.click_env = 0.0;
                    }
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.osc_phase = 0.0;
        self.step_counter = 0.0;
        self.step_index = 0;
        self.click_env = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: ExcitationMode) -> ExcitationSettings {
        ExcitationSettings {
            mode,
            level: 1.0,
            ..ExcitationSettings::default()
        }
    }

    #[test]
    fn test_euclidean_pattern() {
        let pattern: Vec<bool> = (0..8).map(|i| euclidean_hit(i, 3, 8)).collect();
        assert_eq!(pattern.iter().filter(|&&hit| hit).count(), 3);
        assert!(pattern[0]);
        assert!(!euclidean_hit(0, 0, 8));
        assert_eq!((0..4).filter(|&i| euclidean_hit(i, 9, 4)).count(), 4);
    }

    #[test]
    fn test_silence_is_silent() {
        let mut gen = ExcitationGenerator::new(48000.0, 1);
        let mut out = vec![1.0; 256];
        gen.fill(&mut out, &[], &settings(ExcitationMode::Silence));
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_live_input_passthrough_pads() {
        let mut gen = ExcitationGenerator::new(48000.0, 1);
        let mut out = vec![9.0; 4];
        gen.fill(&mut out, &[0.5, -0.5], &settings(ExcitationMode::LiveInput));
        assert_eq!(out, vec![0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_noise_is_bounded_and_nonzero() {
        let mut gen = ExcitationGenerator::new(48000.0, 9);
        let mut out = vec![0.0; 1024];
        gen.fill(&mut out, &[], &settings(ExcitationMode::Noise));
        assert!(out.iter().all(|x| x.abs() <= 1.0));
        assert!(out.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_oscillator_is_bounded() {
        let mut gen = ExcitationGenerator::new(48000.0, 1);
        let mut out = vec![0.0; 4800];
        let mut s = settings(ExcitationMode::Oscillator);
        s.osc_freq_hz = 1000.0;
        gen.fill(&mut out, &[], &s);
        assert!(out.iter().all(|x| x.is_finite() && x.abs() <= 1.1));
        assert!(out.iter().any(|&x| x > 0.5));
        assert!(out.iter().any(|&x| x < -0.5));
    }

    #[test]
    fn test_euclidean_clicks_then_decays() {
        let mut gen = ExcitationGenerator::new(48000.0, 5);
        let mut s = settings(ExcitationMode::Euclidean);
        s.pulses = 1;
        s.steps = 16;
        // one step = 6000 samples at 120 bpm
        let mut out = vec![0.0; 6000];
        gen.fill(&mut out, &[], &s);
        let head: f32 = out[..100].iter().map(|x| x.abs()).sum();
        let tail: f32 = out[3000..].iter().map(|x| x.abs()).sum();
        assert!(head > 0.0);
        assert_eq!(tail, 0.0);
    }
}
