//! Transform backend interface
//!
//! A backend turns one captured cycle of audio into the next cycle's feedback
//! material. Backends are invoked from the async cycle only (inside a
//! blocking task), never from the render thread.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// ACE-Step processing modes, forwarded to the bridge as `task_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Generate from the prompt, input as loose conditioning
    Transform,
    /// Restyle the input, keep its structure
    #[default]
    Cover,
    /// Regenerate regions of the input
    Repaint,
    /// Source separation
    Extract,
    /// Add or remove layers
    Layer,
    /// Add accompaniment
    Complete,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Cover => "cover",
            Self::Repaint => "repaint",
            Self::Extract => "extract",
            Self::Layer => "layer",
            Self::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "transform" | "text2music" => Some(Self::Transform),
            "cover" | "audio2audio" => Some(Self::Cover),
            "repaint" => Some(Self::Repaint),
            "extract" | "separation" => Some(Self::Extract),
            "layer" | "lego" => Some(Self::Layer),
            "complete" | "accompaniment" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Diffusion sampler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferMethod {
    /// Deterministic
    #[default]
    Ode,
    /// Stochastic per-step noise
    Sde,
}

impl InferMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ode => "ode",
            Self::Sde => "sde",
        }
    }
}

/// Per-call transform parameters, snapshotted at cycle start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformParams {
    pub prompt: String,
    /// Classifier-free guidance, 1..20
    pub guidance: f32,
    /// Diffusion steps
    pub steps: u32,
    /// -1 for random
    pub seed: i64,
    /// How much of the input survives, 0..1
    pub input_strength: f32,
    /// 0..1
    pub entropy: f32,
    /// 0..1
    pub granularity: f32,
    pub task_type: TaskType,
    /// Structure/texture balance, 1..10
    pub shift: f32,
    pub method: InferMethod,
    /// 0 means "return the input unchanged"
    pub denoise: f32,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            guidance: 15.0,
            steps: 20,
            seed: -1,
            input_strength: 0.6,
            entropy: 0.25,
            granularity: 0.45,
            task_type: TaskType::Cover,
            shift: 5.0,
            method: InferMethod::Ode,
            denoise: 1.0,
        }
    }
}

/// Pluggable audio transform
///
/// Implementations must tolerate concurrent calls from several channels and
/// any input length. The returned audio may have any length; callers re-block
/// it. An empty result is treated as a failure to produce anything.
pub trait TransformBackend: Send + Sync {
    /// Short identifier used in logs and status
    fn name(&self) -> &str;

    /// Cheap readiness check (no network round trip)
    fn is_available(&self) -> bool {
        true
    }

    /// Transform one cycle of mono audio
    ///
    /// # Arguments
    /// * `samples` - Mono audio at `sample_rate`
    /// * `sample_rate` - Rate of `samples` and of the returned audio
    /// * `params` - Snapshot of the channel's transform parameters
    fn infer(&self, samples: &[f32], sample_rate: u32, params: &TransformParams) -> Result<Vec<f32>>;

    /// Drop any recursive state (channel reset); stateless backends ignore it
    fn reset(&self) {}
}

/// Identity transform, the last resort of every channel
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughBackend;

impl TransformBackend for PassthroughBackend {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn infer(&self, samples: &[f32], _sample_rate: u32, _params: &TransformParams) -> Result<Vec<f32>> {
        Ok(samples.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_conversion() {
        assert_eq!(TaskType::parse("cover"), Some(TaskType::Cover));
        assert_eq!(TaskType::parse("lego"), Some(TaskType::Layer));
        assert_eq!(TaskType::parse("text2music"), Some(TaskType::Transform));
        assert_eq!(TaskType::parse("invalid"), None);
        assert_eq!(TaskType::Repaint.as_str(), "repaint");
    }

    #[test]
    fn test_default_params_match_bridge_defaults() {
        let params = TransformParams::default();
        assert_eq!(params.guidance, 15.0);
        assert_eq!(params.steps, 20);
        assert_eq!(params.seed, -1);
        assert_eq!(params.method, InferMethod::Ode);
        assert_eq!(params.denoise, 1.0);
    }

    #[test]
    fn test_params_deserialize_partial() {
        let params: TransformParams =
            serde_json::from_str(r#"{"prompt": "metallic drone", "method": "sde"}"#).unwrap();
        assert_eq!(params.prompt, "metallic drone");
        assert_eq!(params.method, InferMethod::Sde);
        assert_eq!(params.steps, 20);
    }

    #[test]
    fn test_passthrough_is_identity() {
        let backend = PassthroughBackend;
        let out = backend
            .infer(&[0.1, 0.2], 48000, &TransformParams::default())
            .unwrap();
        assert_eq!(out, vec![0.1, 0.2]);
        assert!(backend.is_available());
    }
}
