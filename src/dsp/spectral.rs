//! Spectral Chain
//!
//! Streaming short-time Fourier processor followed by time-domain colouring.
//!
//! # Frame pipeline
//! Frames of N samples (512/1024/2048) with a hop of N/2, periodic Hann
//! analysis window and plain overlap-add resynthesis (the window sums to 1 at
//! 50% overlap). Per frame:
//! 1. Window + forward real FFT
//! 2. 4-band semantic gain
//! 3. Optional per-band soft saturation
//! 4. Coloured Gaussian noise (relative to the frame's mean magnitude)
//! 5. Spectral memory blend
//! 6. Granular bin dropout
//! 7. Freeze blend
//! 8. Feature extraction (centroid, flatness, flux)
//! 9. Inverse FFT into the overlap-add accumulator
//!
//! # Block stages
//! Run once per block on the resynthesized signal: ladder filter, comb bank,
//! resonator, bit crusher, waveshaper.
//!
//! Output lags input by exactly N samples. All buffers are sized by
//! [`SpectralChain::new`] / [`SpectralChain::reconfigure`]; `process` never
//! allocates.

use std::f32::consts::{FRAC_1_SQRT_2, PI};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::dsp::comb::{CombBank, Resonator};
use crate::dsp::crusher;
use crate::dsp::ladder::{FilterMode, LadderFilter};
use crate::dsp::rng::NoiseRng;
use crate::dsp::semantic::{band_for_bin, SemanticProfile};
use crate::dsp::shaper::{self, ShaperMode};
use crate::dsp::smoothing::Smoothed;
use crate::engine::shared::AtomicF32;
use crate::error::{ResonatorError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Frame sizes the chain can be configured with
pub const SUPPORTED_FRAME_SIZES: [usize; 3] = [512, 1024, 2048];

/// Noise amplitude at entropy 1, relative to the mean frame magnitude
const NOISE_SCALE: f32 = 1.5;

/// Knob values below this count as "off"
const BYPASS_EPSILON: f32 = 0.001;

/// Fraction of the granularity knob used as the per-bin drop probability
const GRANULAR_DROP_SCALE: f32 = 0.7;

/// Share of the frozen magnitude in each frame while frozen
const FREEZE_HOLD: f32 = 0.92;

const MEMORY_GAIN_MIN: f32 = 0.1;
const MEMORY_GAIN_MAX: f32 = 4.0;

const MAGNITUDE_FLOOR: f32 = 1e-12;

/// Check a frame size against [`SUPPORTED_FRAME_SIZES`]
pub fn validate_frame_size(size: usize) -> Result<()> {
    if SUPPORTED_FRAME_SIZES.contains(&size) {
        Ok(())
    } else {
        Err(ResonatorError::InvalidFrameSize { size })
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Settings for one `process` call
///
/// `Default` is the neutral chain: every stage off or at its identity setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralParams {
    pub profile: SemanticProfile,
    /// 1..20, drives band saturation, comb feedback and the waveshaper
    pub guidance: f32,
    pub band_saturation: bool,
    /// 0..1, noise amount (quadratic)
    pub entropy: f32,
    /// 0..1, spectral memory amount
    pub memory: f32,
    /// 0..1, granular dropout amount
    pub granularity: f32,
    pub freeze: bool,
    pub filter_mode: FilterMode,
    pub cutoff_hz: f32,
    /// 0..1
    pub resonance: f32,
    /// 0..1, 0 skips the comb bank
    pub comb_mix: f32,
    pub resonator_enabled: bool,
    pub resonator_pitch_hz: f32,
    pub resonator_decay: f32,
    pub crush_enabled: bool,
    pub crush_depth: f32,
    pub shaper_mode: ShaperMode,
    pub shaper_morph: f32,
    /// 0..1, 0 skips the waveshaper
    pub shaper_mix: f32,
}

impl Default for SpectralParams {
    fn default() -> Self {
        Self {
            profile: SemanticProfile::FLAT,
            guidance: 10.0,
            band_saturation: false,
            entropy: 0.0,
            memory: 0.0,
            granularity: 0.0,
            freeze: false,
            filter_mode: FilterMode::Bypass,
            cutoff_hz: 2000.0,
            resonance: 0.0,
            comb_mix: 0.0,
            resonator_enabled: false,
            resonator_pitch_hz: 220.0,
            resonator_decay: 0.5,
            crush_enabled: false,
            crush_depth: 0.0,
            shaper_mode: ShaperMode::Clean,
            shaper_morph: 0.0,
            shaper_mix: 0.0,
        }
    }
}

// ============================================================================
// Features
// ============================================================================

/// Spectral descriptors of the most recent frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    /// Magnitude-weighted mean bin, normalized to 0..1
    pub centroid: f32,
    /// Geometric / arithmetic mean magnitude, 0..1
    pub flatness: f32,
    /// L2 norm of the frame-to-frame magnitude change
    pub flux: f32,
    /// Flux relative to the two frames' norms, 0..1
    pub normalized_flux: f32,
    /// Largest non-DC magnitude
    pub peak_magnitude: f32,
    pub peak_bin: usize,
    /// Frames analysed since the last reset
    pub frames: u64,
}

/// Lock-free publication point for [`SpectralFeatures`]
///
/// Written by the chain on the render thread, read at control rate.
#[derive(Debug, Default)]
pub struct FeatureProbe {
    centroid: AtomicF32,
    flatness: AtomicF32,
    flux: AtomicF32,
    normalized_flux: AtomicF32,
    peak_magnitude: AtomicF32,
    peak_bin: AtomicUsize,
    frames: AtomicU64,
}

impl FeatureProbe {
    fn publish(&self, features: &SpectralFeatures) {
        self.centroid.store(features.centroid);
        self.flatness.store(features.flatness);
        self.flux.store(features.flux);
        self.normalized_flux.store(features.normalized_flux);
        self.peak_magnitude.store(features.peak_magnitude);
        self.peak_bin.store(features.peak_bin, Ordering::Relaxed);
        self.frames.store(features.frames, Ordering::Release);
    }

    pub fn snapshot(&self) -> SpectralFeatures {
        SpectralFeatures {
            frames: self.frames.load(Ordering::Acquire),
            centroid: self.centroid.load(),
            flatness: self.flatness.load(),
            flux: self.flux.load(),
            normalized_flux: self.normalized_flux.load(),
            peak_magnitude: self.peak_magnitude.load(),
            peak_bin: self.peak_bin.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        self.publish(&SpectralFeatures::default());
    }
}

// ============================================================================
// Smoothing
// ============================================================================

#[derive(Debug, Clone, Default)]
struct SmoothedControls {
    guidance: Smoothed,
    entropy: Smoothed,
    memory: Smoothed,
    granularity: Smoothed,
    cutoff: Smoothed,
    resonance: Smoothed,
    comb_mix: Smoothed,
    resonator_pitch: Smoothed,
    resonator_decay: Smoothed,
    crush_depth: Smoothed,
    shaper_morph: Smoothed,
    shaper_mix: Smoothed,
}

impl SmoothedControls {
    /// Advance every control by one block and return the smoothed settings
    fn advance(&mut self, target: &SpectralParams, block_len: usize, sample_rate: f32) -> SpectralParams {
        let next = |s: &mut Smoothed, value: f32| s.next(value, block_len, sample_rate);
        SpectralParams {
            guidance: next(&mut self.guidance, target.guidance.clamp(1.0, 20.0)),
            entropy: next(&mut self.entropy, target.entropy.clamp(0.0, 1.0)),
            memory: next(&mut self.memory, target.memory.clamp(0.0, 1.0)),
            granularity: next(&mut self.granularity, target.granularity.clamp(0.0, 1.0)),
            cutoff_hz: next(&mut self.cutoff, target.cutoff_hz),
            resonance: next(&mut self.resonance, target.resonance.clamp(0.0, 1.0)),
            comb_mix: next(&mut self.comb_mix, target.comb_mix.clamp(0.0, 1.0)),
            resonator_pitch_hz: next(&mut self.resonator_pitch, target.resonator_pitch_hz),
            resonator_decay: next(&mut self.resonator_decay, target.resonator_decay.clamp(0.0, 1.0)),
            crush_depth: next(&mut self.crush_depth, target.crush_depth.clamp(0.0, 1.0)),
            shaper_morph: next(&mut self.shaper_morph, target.shaper_morph.clamp(0.0, 1.0)),
            shaper_mix: next(&mut self.shaper_mix, target.shaper_mix.clamp(0.0, 1.0)),
            ..*target
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Spectral Chain
// ============================================================================

/// Per-channel spectral + time-domain processor
pub struct SpectralChain {
    sample_rate: f32,
    frame_size: usize,
    hop: usize,
    window: Vec<f32>,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    fft_in: Vec<f32>,
    fft_out: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch_fwd: Vec<Complex32>,
    scratch_inv: Vec<Complex32>,

    // Streaming overlap-add state
    input_fifo: Vec<f32>,
    output_fifo: Vec<f32>,
    output_accum: Vec<f32>,
    fill: usize,

    // Per-bin state
    bin_bands: Vec<usize>,
    magnitudes: Vec<f32>,
    memory: Vec<f32>,
    prev_magnitudes: Vec<f32>,
    frozen: Vec<f32>,
    frozen_valid: bool,
    frames: u64,

    rng: NoiseRng,
    smoothing: SmoothedControls,
    ladder: LadderFilter,
    combs: CombBank,
    resonator: Resonator,
    features: Arc<FeatureProbe>,
}

impl std::fmt::Debug for SpectralChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralChain")
            .field("sample_rate", &self.sample_rate)
            .field("frame_size", &self.frame_size)
            .field("frames", &self.frames)
            .field("frozen", &self.frozen_valid)
            .finish()
    }
}

impl SpectralChain {
    /// Create a chain
    ///
    /// # Arguments
    /// * `frame_size` - 512, 1024 or 2048
    /// * `sample_rate` - Processing rate in Hz
    pub fn new(frame_size: usize, sample_rate: f32) -> Result<Self> {
        validate_frame_size(frame_size)?;
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(frame_size);
        let c2r = planner.plan_fft_inverse(frame_size);

        let mut chain = Self {
            sample_rate,
            frame_size,
            hop: frame_size / 2,
            window: Vec::new(),
            fft_in: r2c.make_input_vec(),
            fft_out: c2r.make_output_vec(),
            spectrum: r2c.make_output_vec(),
            scratch_fwd: r2c.make_scratch_vec(),
            scratch_inv: c2r.make_scratch_vec(),
            r2c,
            c2r,
            input_fifo: Vec::new(),
            output_fifo: Vec::new(),
            output_accum: Vec::new(),
            fill: 0,
            bin_bands: Vec::new(),
            magnitudes: Vec::new(),
            memory: Vec::new(),
            prev_magnitudes: Vec::new(),
            frozen: Vec::new(),
            frozen_valid: false,
            frames: 0,
            rng: NoiseRng::default(),
            smoothing: SmoothedControls::default(),
            ladder: LadderFilter::new(sample_rate),
            combs: CombBank::new(sample_rate),
            resonator: Resonator::new(sample_rate),
            features: Arc::new(FeatureProbe::default()),
        };
        chain.size_frame_buffers();
        Ok(chain)
    }

    /// Reseed the noise / dropout generator
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.set_seed(seed);
        self
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = NoiseRng::new(seed);
    }

    /// Publish features through an existing probe (e.g. one owned by a channel)
    pub fn with_probe(mut self, probe: Arc<FeatureProbe>) -> Self {
        probe.clear();
        self.features = probe;
        self
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Input-to-output delay in samples
    pub fn latency(&self) -> usize {
        self.frame_size
    }

    /// Shared handle to the published features
    pub fn feature_probe(&self) -> Arc<FeatureProbe> {
        Arc::clone(&self.features)
    }

    pub fn features(&self) -> SpectralFeatures {
        self.features.snapshot()
    }

    /// Change the frame size, rebuilding every frame-size-dependent buffer
    ///
    /// Only call while the owning channel is not rendering.
    pub fn reconfigure(&mut self, frame_size: usize) -> Result<()> {
        validate_frame_size(frame_size)?;
        if frame_size != self.frame_size {
            let mut planner = RealFftPlanner::<f32>::new();
            self.r2c = planner.plan_fft_forward(frame_size);
            self.c2r = planner.plan_fft_inverse(frame_size);
            self.fft_in = self.r2c.make_input_vec();
            self.fft_out = self.c2r.make_output_vec();
            self.spectrum = self.r2c.make_output_vec();
            self.scratch_fwd = self.r2c.make_scratch_vec();
            self.scratch_inv = self.c2r.make_scratch_vec();
            self.frame_size = frame_size;
            self.hop = frame_size / 2;
            self.size_frame_buffers();
        }
        self.reset();
        Ok(())
    }

    fn size_frame_buffers(&mut self) {
        let n = self.frame_size;
        let bins = n / 2 + 1;
        // Periodic Hann: overlaps to exactly 1 at 50% hop
        self.window = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
            .collect();
        self.input_fifo = vec![0.0; n];
        self.output_fifo = vec![0.0; self.hop];
        self.output_accum = vec![0.0; n];
        self.fill = 0;
        self.bin_bands = (0..bins)
            .map(|k| band_for_bin(k, n, self.sample_rate))
            .collect();
        self.magnitudes = vec![0.0; bins];
        self.memory = vec![0.0; bins];
        self.prev_magnitudes = vec![0.0; bins];
        self.frozen = vec![0.0; bins];
        self.frozen_valid = false;
    }

    /// Clear all signal state without resizing anything
    pub fn reset(&mut self) {
        self.input_fifo.iter_mut().for_each(|s| *s = 0.0);
        self.output_fifo.iter_mut().for_each(|s| *s = 0.0);
        self.output_accum.iter_mut().for_each(|s| *s = 0.0);
        self.fill = 0;
        self.memory.iter_mut().for_each(|m| *m = 0.0);
        self.prev_magnitudes.iter_mut().for_each(|m| *m = 0.0);
        self.frozen.iter_mut().for_each(|m| *m = 0.0);
        self.frozen_valid = false;
        self.frames = 0;
        self.smoothing.reset();
        self.ladder.reset();
        self.combs.reset();
        self.resonator.reset();
        self.features.clear();
    }

    /// Process a block in place
    ///
    /// Same length out as in; never allocates and never fails. Non-finite
    /// input samples are treated as silence.
    pub fn process(&mut self, buffer: &mut [f32], params: &SpectralParams) {
        if buffer.is_empty() {
            return;
        }
        let settings = self
            .smoothing
            .advance(params, buffer.len(), self.sample_rate);

        let offset = self.frame_size - self.hop;
        for sample in buffer.iter_mut() {
            let x = if sample.is_finite() { *sample } else { 0.0 };
            self.input_fifo[offset + self.fill] = x;
            *sample = self.output_fifo[self.fill];
            self.fill += 1;

            if self.fill == self.hop {
                self.process_frame(&settings);
                let hop = self.hop;
                self.output_fifo.copy_from_slice(&self.output_accum[..hop]);
                self.output_accum.copy_within(hop.., 0);
                let n = self.output_accum.len();
                self.output_accum[n - hop..].iter_mut().for_each(|s| *s = 0.0);
                self.input_fifo.copy_within(hop.., 0);
                self.fill = 0;
            }
        }

        self.process_time_domain(buffer, &settings);
    }

    fn process_time_domain(&mut self, buffer: &mut [f32], s: &SpectralParams) {
        self.ladder
            .process(buffer, s.filter_mode, s.cutoff_hz, s.resonance);
        self.combs.process(buffer, s.guidance, s.comb_mix);
        if s.resonator_enabled {
            self.resonator
                .process(buffer, s.resonator_pitch_hz, s.resonator_decay);
        }
        if s.crush_enabled {
            crusher::crush(buffer, s.crush_depth);
        }
        shaper::shape(buffer, s.shaper_mode, s.shaper_morph, s.guidance, s.shaper_mix);

        for sample in buffer.iter_mut() {
            if !sample.is_finite() {
                *sample = 0.0;
            }
        }
    }

    // ========================================================================
    // Frame pipeline
    // ========================================================================

    fn process_frame(&mut self, s: &SpectralParams) {
        for ((dst, &x), &w) in self
            .fft_in
            .iter_mut()
            .zip(self.input_fifo.iter())
            .zip(self.window.iter())
        {
            *dst = x * w;
        }

        if self
            .r2c
            .process_with_scratch(&mut self.fft_in, &mut self.spectrum, &mut self.scratch_fwd)
            .is_err()
        {
            // Degrade to a silent frame
            return;
        }

        self.apply_semantic_gain(&s.profile);
        if s.band_saturation {
            self.apply_band_saturation(&s.profile, s.guidance);
        }
        if s.entropy > BYPASS_EPSILON {
            self.inject_noise(&s.profile, s.entropy);
        }
        if s.memory > BYPASS_EPSILON {
            self.blend_memory(s.memory);
        }
        if s.granularity > BYPASS_EPSILON {
            self.drop_bins(s.granularity);
        }
        self.apply_freeze(s.freeze);
        self.extract_features();
        self.resynthesize();
    }

    fn apply_semantic_gain(&mut self, profile: &SemanticProfile) {
        if profile.is_flat() {
            return;
        }
        for (bin, &band) in self.spectrum.iter_mut().zip(self.bin_bands.iter()) {
            *bin *= profile.gain(band);
        }
    }

    /// Soft-saturate each bin's magnitude relative to the frame peak
    fn apply_band_saturation(&mut self, profile: &SemanticProfile, guidance: f32) {
        let peak = self
            .spectrum
            .iter()
            .map(|c| c.norm())
            .fold(0.0f32, f32::max);
        if peak < MAGNITUDE_FLOOR {
            return;
        }
        let intensity = guidance / 20.0;
        for (bin, &band) in self.spectrum.iter_mut().zip(self.bin_bands.iter()) {
            let mag = bin.norm();
            if mag < MAGNITUDE_FLOOR {
                continue;
            }
            let drive = 1.0 + 4.0 * intensity * profile.gain(band);
            let shaped = (mag / peak * drive).tanh() / drive.tanh() * peak;
            *bin *= shaped / mag;
        }
    }

    fn inject_noise(&mut self, profile: &SemanticProfile, entropy: f32) {
        let bins = self.spectrum.len();
        let mean = self.spectrum.iter().map(|c| c.norm()).sum::<f32>() / bins as f32;
        let amplitude = entropy * entropy * NOISE_SCALE * mean * FRAC_1_SQRT_2;
        if amplitude < MAGNITUDE_FLOOR {
            return;
        }
        // DC stays untouched
        for k in 1..bins {
            let scale = amplitude * profile.gain(self.bin_bands[k]);
            let re = self.rng.gaussian() * scale;
            let im = self.rng.gaussian() * scale;
            self.spectrum[k] += Complex32::new(re, im);
        }
    }

    fn blend_memory(&mut self, amount: f32) {
        let alpha = 0.6 + 0.35 * amount;
        for (bin, memory) in self.spectrum.iter_mut().zip(self.memory.iter_mut()) {
            let mag = bin.norm();
            *memory = alpha * *memory + (1.0 - alpha) * mag;
            if mag > MAGNITUDE_FLOOR {
                let gain = (1.0 + amount * (*memory / mag - 1.0)).clamp(MEMORY_GAIN_MIN, MEMORY_GAIN_MAX);
                *bin *= gain;
            }
        }
    }

    fn drop_bins(&mut self, granularity: f32) {
        let probability = granularity * GRANULAR_DROP_SCALE;
        for bin in self.spectrum.iter_mut().skip(1) {
            if self.rng.next_f32() < probability {
                *bin = Complex32::new(0.0, 0.0);
            }
        }
    }

    fn apply_freeze(&mut self, freeze: bool) {
        if !freeze {
            self.frozen_valid = false;
            return;
        }
        if !self.frozen_valid {
            for (frozen, bin) in self.frozen.iter_mut().zip(self.spectrum.iter()) {
                *frozen = bin.norm();
            }
            self.frozen_valid = true;
            return;
        }
        for (bin, &frozen) in self.spectrum.iter_mut().zip(self.frozen.iter()) {
            let mag = bin.norm();
            let target = FREEZE_HOLD * frozen + (1.0 - FREEZE_HOLD) * mag;
            *bin = if mag > MAGNITUDE_FLOOR {
                *bin * (target / mag)
            } else {
                // No live phase to keep
                Complex32::from_polar(target, self.rng.next_f32() * 2.0 * PI)
            };
        }
    }

    fn extract_features(&mut self) {
        let bins = self.spectrum.len();
        let mut sum = 0.0f32;
        let mut weighted = 0.0f32;
        let mut log_sum = 0.0f32;
        let mut flux_sq = 0.0f32;
        let mut norm_cur = 0.0f32;
        let mut norm_prev = 0.0f32;
        let mut peak_magnitude = 0.0f32;
        let mut peak_bin = 0usize;

        for k in 0..bins {
            let mag = self.spectrum[k].norm();
            let mag = if mag.is_finite() { mag } else { 0.0 };
            self.magnitudes[k] = mag;
            sum += mag;
            weighted += k as f32 * mag;
            log_sum += (mag + MAGNITUDE_FLOOR).ln();
            let prev = self.prev_magnitudes[k];
            flux_sq += (mag - prev) * (mag - prev);
            norm_cur += mag * mag;
            norm_prev += prev * prev;
            if k > 0 && mag > peak_magnitude {
                peak_magnitude = mag;
                peak_bin = k;
            }
        }
        self.prev_magnitudes.copy_from_slice(&self.magnitudes);
        self.frames += 1;

        let mean = sum / bins as f32;
        let (centroid, flatness) = if sum > MAGNITUDE_FLOOR * bins as f32 {
            let geometric = (log_sum / bins as f32).exp();
            (
                (weighted / sum / (bins - 1) as f32).clamp(0.0, 1.0),
                (geometric / mean).clamp(0.0, 1.0),
            )
        } else {
            (0.0, 0.0)
        };
        let flux = flux_sq.sqrt();
        let denominator = norm_cur.sqrt() + norm_prev.sqrt();
        let normalized_flux = if denominator > MAGNITUDE_FLOOR {
            (flux / denominator).clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.features.publish(&SpectralFeatures {
            centroid,
            flatness,
            flux,
            normalized_flux,
            peak_magnitude,
            peak_bin,
            frames: self.frames,
        });
    }

    fn resynthesize(&mut self) {
        // DC and Nyquist must be purely real for the inverse transform
        if let Some(dc) = self.spectrum.first_mut() {
            dc.im = 0.0;
        }
        if let Some(nyquist) = self.spectrum.last_mut() {
            nyquist.im = 0.0;
        }
        for bin in self.spectrum.iter_mut() {
            if !bin.re.is_finite() || !bin.im.is_finite() {
                *bin = Complex32::new(0.0, 0.0);
            }
        }

        if self
            .c2r
            .process_with_scratch(&mut self.spectrum, &mut self.fft_out, &mut self.scratch_inv)
            .is_err()
        {
            return;
        }

        let scale = 1.0 / self.frame_size as f32;
        for (acc, &y) in self.output_accum.iter_mut().zip(self.fft_out.iter()) {
            *acc += y * scale;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
