//! Local spectral backend
//!
//! A DSP stand-in for the neural transform: each call runs the captured cycle
//! through a private [`SpectralChain`] whose spectral memory persists between
//! calls, so the channel keeps evolving while the remote bridge is absent or
//! suspended. One instance per channel; never share it across channels.
//!
//! Consecutive captures are contiguous, so the backend streams: its output
//! lags its input by one frame, and the dry path is delayed to match.

use parking_lot::Mutex;

use crate::dsp::ladder::FilterMode;
use crate::dsp::semantic::SemanticProfile;
use crate::dsp::shaper::ShaperMode;
use crate::dsp::spectral::{SpectralChain, SpectralParams};
use crate::error::Result;
use crate::neural::backend::{InferMethod, TransformBackend, TransformParams};

/// Channel-scoped spectral transform
pub struct LocalSpectralBackend {
    chain: Mutex<SpectralChain>,
    /// Last `latency` dry samples, the head of the next call's dry path
    dry_history: Mutex<Vec<f32>>,
}

impl LocalSpectralBackend {
    /// # Arguments
    /// * `frame_size` - 512, 1024 or 2048
    /// * `sample_rate` - Rate the owning channel runs at
    pub fn new(frame_size: usize, sample_rate: f32) -> Result<Self> {
        let chain = SpectralChain::new(frame_size, sample_rate)?;
        Ok(Self {
            chain: Mutex::new(chain),
            dry_history: Mutex::new(vec![0.0; frame_size]),
        })
    }

    /// Map transform knobs onto chain settings
    pub fn spectral_params(params: &TransformParams) -> SpectralParams {
        let guidance = params.guidance.clamp(1.0, 20.0);
        let entropy = match params.method {
            InferMethod::Ode => params.entropy,
            InferMethod::Sde => params.entropy * 1.5,
        };
        SpectralParams {
            profile: SemanticProfile::from_prompt(&params.prompt),
            guidance,
            band_saturation: guidance > 10.0,
            entropy: entropy.clamp(0.0, 1.0),
            memory: (params.denoise * 0.8).clamp(0.0, 1.0),
            granularity: (params.granularity * 0.5).clamp(0.0, 1.0),
            filter_mode: FilterMode::Bypass,
            comb_mix: (params.shift / 10.0 * 0.3).clamp(0.0, 0.3),
            shaper_mode: ShaperMode::Warm,
            shaper_mix: (guidance / 20.0 * 0.5).clamp(0.0, 0.5),
            ..SpectralParams::default()
        }
    }
}

impl TransformBackend for LocalSpectralBackend {
    fn name(&self) -> &str {
        "local-spectral"
    }

    fn infer(&self, samples: &[f32], _sample_rate: u32, params: &TransformParams) -> Result<Vec<f32>> {
        let mut chain = self.chain.lock();
        let mut history = self.dry_history.lock();

        if params.seed >= 0 {
            chain.set_seed(params.seed as u64);
        }
        let spectral = Self::spectral_params(params);

        let mut wet = samples.to_vec();
        chain.process(&mut wet, &spectral);

        let mut dry = Vec::with_capacity(history.len() + samples.len());
        dry.extend_from_slice(&history);
        dry.extend_from_slice(samples);
        let keep = history.len();
        history.copy_from_slice(&dry[dry.len() - keep..]);

        let dry_share = params.input_strength.clamp(0.0, 1.0);
        Ok(dry
            .iter()
            .zip(wet.iter())
            .map(|(&dry, &wet)| dry * dry_share + wet * (1.0 - dry_share))
            .collect())
    }

    /// Clear the private chain's memory and delay lines
    fn reset(&self) {
        self.chain.lock().reset();
        self.dry_history.lock().iter_mut().for_each(|s| *s = 0.0);
    }
}
