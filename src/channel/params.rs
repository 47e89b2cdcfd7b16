//! Channel parameters
//!
//! Every performable parameter is a plain named field with a closed range.
//! Controllers write whatever they like; values are clamped where they are
//! used. [`SharedParams`] carries the set across threads: the control side and
//! the async cycle lock it briefly, the render thread only ever `try_lock`s it
//! and keeps its previous copy if the lock is contended.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::dsp::excitation::ExcitationSettings;
use crate::dsp::ladder::FilterMode;
use crate::dsp::semantic::SemanticProfile;
use crate::dsp::shaper::ShaperMode;
use crate::dsp::spectral::SpectralParams;
use crate::error::{ResonatorError, Result};
use crate::neural::backend::{InferMethod, TaskType, TransformParams};

/// Continuous parameters addressable by name, with their closed ranges
pub const PARAM_RANGES: &[(&str, f32, f32)] = &[
    ("feedback_amount", 0.0, 1.0),
    ("return_gain", 0.0, 1.5),
    ("guidance", 1.0, 20.0),
    ("entropy", 0.0, 1.0),
    ("granularity", 0.0, 1.0),
    ("input_strength", 0.0, 1.0),
    ("shift", 1.0, 10.0),
    ("denoise", 0.0, 1.0),
    ("cutoff_hz", 20.0, 20000.0),
    ("resonance", 0.0, 1.0),
    ("comb_mix", 0.0, 1.0),
    ("resonator_pitch_hz", 20.0, 5000.0),
    ("resonator_decay", 0.0, 0.98),
    ("crush_depth", 0.0, 1.0),
    ("shaper_morph", 0.0, 1.0),
    ("shaper_mix", 0.0, 1.0),
    ("delay_time_ms", 1.0, 2000.0),
    ("delay_feedback", 0.0, 0.95),
    ("delay_mix", 0.0, 1.0),
    ("excitation_level", 0.0, 1.0),
    ("bpm", 20.0, 300.0),
    ("osc_freq_hz", 20.0, 5000.0),
];

/// Closed range of a named continuous parameter
pub fn param_range(name: &str) -> Option<(f32, f32)> {
    PARAM_RANGES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, lo, hi)| (lo, hi))
}

fn clamp_named(name: &str, value: f32) -> f32 {
    match param_range(name) {
        Some((lo, hi)) if value.is_finite() => value.clamp(lo, hi),
        Some((lo, _)) => lo,
        None => value,
    }
}

/// Auto-drift destinations; `None` leaves a parameter alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftTargets {
    pub feedback_amount: Option<f32>,
    pub guidance: Option<f32>,
    pub entropy: Option<f32>,
    pub granularity: Option<f32>,
    pub input_strength: Option<f32>,
    pub cutoff_hz: Option<f32>,
}

impl DriftTargets {
    /// `(name, target)` for every set target
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
        [
            ("feedback_amount", self.feedback_amount),
            ("guidance", self.guidance),
            ("entropy", self.entropy),
            ("granularity", self.granularity),
            ("input_strength", self.input_strength),
            ("cutoff_hz", self.cutoff_hz),
        ]
        .into_iter()
        .filter_map(|(name, target)| target.map(|t| (name, t)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// All mutable parameters of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelParams {
    /// Spectral memory amount
    pub feedback_amount: f32,
    /// Gain applied to returning feedback before it meets the excitation
    pub return_gain: f32,
    pub guidance: f32,
    pub entropy: f32,
    pub granularity: f32,
    pub input_strength: f32,
    pub steps: u32,
    pub seed: i64,
    pub shift: f32,
    pub denoise: f32,
    pub task_type: TaskType,
    pub method: InferMethod,

    pub band_saturation: bool,
    pub freeze: bool,
    pub filter_mode: FilterMode,
    pub cutoff_hz: f32,
    pub resonance: f32,
    pub comb_mix: f32,
    pub resonator_enabled: bool,
    pub resonator_pitch_hz: f32,
    pub resonator_decay: f32,
    pub crush_enabled: bool,
    pub crush_depth: f32,
    pub shaper_mode: ShaperMode,
    pub shaper_morph: f32,
    pub shaper_mix: f32,

    pub delay_time_ms: f32,
    pub delay_feedback: f32,
    pub delay_mix: f32,

    pub excitation: ExcitationSettings,

    pub auto_drift: bool,
    pub drift: DriftTargets,

    /// Derived from the prompt by [`SharedParams::set_prompt`]
    #[serde(skip)]
    pub profile: SemanticProfile,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            feedback_amount: 0.5,
            return_gain: 0.9,
            guidance: 10.0,
            entropy: 0.25,
            granularity: 0.0,
            input_strength: 0.6,
            steps: 20,
            seed: -1,
            shift: 5.0,
            denoise: 1.0,
            task_type: TaskType::Cover,
            method: InferMethod::Ode,
            band_saturation: false,
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
            shaper_mix: 0.25,
            delay_time_ms: 375.0,
            delay_feedback: 0.3,
            delay_mix: 0.2,
            excitation: ExcitationSettings::default(),
            auto_drift: false,
            drift: DriftTargets::default(),
            profile: SemanticProfile::FLAT,
        }
    }
}

impl ChannelParams {
    /// Mutable access to a named continuous parameter
    pub fn field_mut(&mut self, name: &str) -> Option<&mut f32> {
        let field = match name {
            "feedback_amount" => &mut self.feedback_amount,
            "return_gain" => &mut self.return_gain,
            "guidance" => &mut self.guidance,
            "entropy" => &mut self.entropy,
            "granularity" => &mut self.granularity,
            "input_strength" => &mut self.input_strength,
            "shift" => &mut self.shift,
            "denoise" => &mut self.denoise,
            "cutoff_hz" => &mut self.cutoff_hz,
            "resonance" => &mut self.resonance,
            "comb_mix" => &mut self.comb_mix,
            "resonator_pitch_hz" => &mut self.resonator_pitch_hz,
            "resonator_decay" => &mut self.resonator_decay,
            "crush_depth" => &mut self.crush_depth,
            "shaper_morph" => &mut self.shaper_morph,
            "shaper_mix" => &mut self.shaper_mix,
            "delay_time_ms" => &mut self.delay_time_ms,
            "delay_feedback" => &mut self.delay_feedback,
            "delay_mix" => &mut self.delay_mix,
            "excitation_level" => &mut self.excitation.level,
            "bpm" => &mut self.excitation.bpm,
            "osc_freq_hz" => &mut self.excitation.osc_freq_hz,
            _ => return None,
        };
        Some(field)
    }

    /// Read a named continuous parameter
    pub fn get_named(&self, name: &str) -> Option<f32> {
        let mut copy = *self;
        copy.field_mut(name).map(|v| *v)
    }

    /// Set a named continuous parameter (stored as given, clamped on use)
    pub fn set_named(&mut self, name: &str, value: f32) -> Result<()> {
        let expected = match param_range(name) {
            Some((lo, hi)) => format!("{}..{}", lo, hi),
            None => "a known parameter name".to_string(),
        };
        match self.field_mut(name) {
            Some(field) if value.is_finite() => {
                *field = value;
                Ok(())
            }
            _ => Err(ResonatorError::InvalidParameter {
                param: name.to_string(),
                value: value.to_string(),
                expected,
            }),
        }
    }

    /// Copy with every continuous field pulled into its range
    pub fn clamped(&self) -> Self {
        let mut out = *self;
        for &(name, _, _) in PARAM_RANGES {
            if let Some(field) = out.field_mut(name) {
                *field = clamp_named(name, *field);
            }
        }
        out.steps = out.steps.clamp(1, 200);
        out.excitation.steps = out.excitation.steps.clamp(1, 32);
        out.excitation.pulses = out.excitation.pulses.min(out.excitation.steps);
        out
    }

    /// Settings for the render-path spectral chain
    pub fn spectral(&self) -> SpectralParams {
        let p = self.clamped();
        SpectralParams {
            profile: p.profile,
            guidance: p.guidance,
            band_saturation: p.band_saturation,
            entropy: p.entropy,
            memory: p.feedback_amount,
            granularity: p.granularity,
            freeze: p.freeze,
            filter_mode: p.filter_mode,
            cutoff_hz: p.cutoff_hz,
            resonance: p.resonance,
            comb_mix: p.comb_mix,
            resonator_enabled: p.resonator_enabled,
            resonator_pitch_hz: p.resonator_pitch_hz,
            resonator_decay: p.resonator_decay,
            crush_enabled: p.crush_enabled,
            crush_depth: p.crush_depth,
            shaper_mode: p.shaper_mode,
            shaper_morph: p.shaper_morph,
            shaper_mix: p.shaper_mix,
        }
    }

    /// Parameters for one backend call
    pub fn transform(&self, prompt: &str) -> TransformParams {
        let p = self.clamped();
        TransformParams {
            prompt: prompt.to_string(),
            guidance: p.guidance,
            steps: p.steps,
            seed: p.seed,
            input_strength: p.input_strength,
            entropy: p.entropy,
            granularity: p.granularity,
            task_type: p.task_type,
            shift: p.shift,
            method: p.method,
            denoise: p.denoise,
        }
    }

    pub fn excitation(&self) -> ExcitationSettings {
        self.clamped().excitation
    }
}

/// Consistent snapshot taken by the async cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSnapshot {
    pub params: ChannelParams,
    pub prompt: String,
    pub version: u64,
}

struct ParamSlot {
    params: ChannelParams,
    prompt: String,
}

/// Parameter set shared between control, render and async sides
pub struct SharedParams {
    slot: Mutex<ParamSlot>,
    version: AtomicU64,
}

impl SharedParams {
    pub fn new(params: ChannelParams, prompt: &str) -> Self {
        let params = ChannelParams {
            profile: SemanticProfile::from_prompt(prompt),
            ..params
        };
        Self {
            slot: Mutex::new(ParamSlot {
                params,
                prompt: prompt.to_string(),
            }),
            version: AtomicU64::new(1),
        }
    }

    /// Bumped on every write
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Mutate the parameter set in place
    pub fn update<F: FnOnce(&mut ChannelParams)>(&self, f: F) {
        let mut slot = self.slot.lock();
        let profile = slot.params.profile;
        f(&mut slot.params);
        slot.params.profile = profile;
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Replace every parameter, keeping the prompt-derived profile
    pub fn replace(&self, params: ChannelParams) {
        self.update(|p| *p = params);
    }

    pub fn set_named(&self, name: &str, value: f32) -> Result<()> {
        let mut result = Ok(());
        self.update(|p| result = p.set_named(name, value));
        result
    }

    /// Change the prompt and the semantic profile derived from it
    pub fn set_prompt(&self, prompt: &str) {
        let mut slot = self.slot.lock();
        slot.prompt = prompt.to_string();
        slot.params.profile = SemanticProfile::from_prompt(prompt);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn prompt(&self) -> String {
        self.slot.lock().prompt.clone()
    }

    pub fn get(&self) -> ChannelParams {
        self.slot.lock().params
    }

    /// Full snapshot (async side; allocates for the prompt)
    pub fn snapshot(&self) -> ParamSnapshot {
        let slot = self.slot.lock();
        ParamSnapshot {
            params: slot.params,
            prompt: slot.prompt.clone(),
            version: self.version(),
        }
    }

    /// Render-side refresh: copy the parameters if they changed and the lock
    /// is free right now. Never blocks, never allocates.
    ///
    /// Returns `true` when `cached` was updated.
    pub fn try_refresh(&self, cached: &mut ChannelParams, seen_version: &mut u64) -> bool {
        let version = self.version();
        if version == *seen_version {
            return false;
        }
        match self.slot.try_lock() {
            Some(slot) => {
                *cached = slot.params;
                *seen_version = version;
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SharedParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedParams")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
