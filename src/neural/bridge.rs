//! ACE-Step bridge backend
//!
//! Talks to the ACE-Step bridge server over HTTP:
//! - `GET /health` for readiness
//! - `POST /infer` with a base64 WAV (float32 mono) plus every transform knob
//!
//! The wire codec is always compiled; the HTTP client only with the
//! `acestep` feature. Without it the backend reports itself unavailable and
//! every call fails with [`ResonatorError::BridgeUnavailable`].

use std::env;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::engine::io::{decode_wav_at, encode_wav};
use crate::error::{ResonatorError, Result};
use crate::neural::backend::{TransformBackend, TransformParams};

/// Port the bridge server listens on by default
pub const DEFAULT_BRIDGE_PORT: u16 = 8976;

/// Default bounded wait for one inference call
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Bounded wait for a health probe
pub const HEALTH_TIMEOUT_MS: u64 = 5_000;

/// `POST /infer` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferRequest {
    /// Base64 WAV, IEEE float 32-bit mono
    pub audio: String,
    pub prompt: String,
    pub guidance_scale: f32,
    pub num_steps: u32,
    pub seed: i64,
    pub input_strength: f32,
    pub shift: f32,
    pub infer_method: String,
    pub entropy: f32,
    pub granularity: f32,
    pub denoise_strength: f32,
    pub task_type: String,
    /// Seconds of audio in `audio`
    pub audio_duration: f32,
}

/// `POST /infer` success body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResponse {
    pub audio: String,
    pub sample_rate: u32,
    #[serde(default)]
    pub num_samples: usize,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub model_used: bool,
    #[serde(default)]
    pub model_type: String,
}

/// Error body returned with a non-2xx status
#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// `GET /health` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub model_type: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub inference_count: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Build the `/infer` body for one cycle
pub fn build_request(samples: &[f32], sample_rate: u32, params: &TransformParams) -> Result<InferRequest> {
    let wav = encode_wav(samples, sample_rate)?;
    Ok(InferRequest {
        audio: BASE64.encode(wav),
        prompt: params.prompt.clone(),
        guidance_scale: params.guidance.clamp(1.0, 20.0),
        num_steps: params.steps.max(1),
        seed: params.seed,
        input_strength: params.input_strength.clamp(0.0, 1.0),
        shift: params.shift.clamp(1.0, 10.0),
        infer_method: params.method.as_str().to_string(),
        entropy: params.entropy.clamp(0.0, 1.0),
        granularity: params.granularity.clamp(0.0, 1.0),
        denoise_strength: params.denoise.clamp(0.0, 1.0),
        task_type: params.task_type.as_str().to_string(),
        audio_duration: samples.len() as f32 / sample_rate.max(1) as f32,
    })
}

/// Decode an `/infer` body to mono samples at `target_rate`
pub fn decode_response(response: &InferResponse, target_rate: u32) -> Result<Vec<f32>> {
    let wav = BASE64
        .decode(response.audio.as_bytes())
        .map_err(|e| ResonatorError::InvalidAudio {
            reason: format!("Invalid base64 audio from bridge: {}", e),
            source: Some(Box::new(e)),
        })?;
    decode_wav_at(&wav, target_rate)
}

// ============================================================================
// Backend
// ============================================================================

/// Remote ACE-Step bridge, shared by every channel
#[derive(Debug, Clone)]
pub struct BridgeBackend {
    base_url: String,
    timeout_ms: u64,
}

impl BridgeBackend {
    /// # Arguments
    /// * `base_url` - e.g. `http://127.0.0.1:8976` (a trailing `/` is dropped)
    /// * `timeout_ms` - Bounded wait per `/infer` call
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms: timeout_ms.max(1),
        }
    }

    /// Configure from `RESONATOR_BRIDGE_URL` / `RESONATOR_BRIDGE_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let url = env::var("RESONATOR_BRIDGE_URL")
            .unwrap_or_else(|_| format!("http://127.0.0.1:{}", DEFAULT_BRIDGE_PORT));
        let timeout_ms = env::var("RESONATOR_BRIDGE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Self::new(url, timeout_ms)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Probe `GET /health`
    #[cfg(feature = "acestep")]
    pub fn health(&self) -> Result<HealthResponse> {
        let client = self.client(HEALTH_TIMEOUT_MS)?;
        let response = client
            .get(self.endpoint("health"))
            .send()
            .map_err(|e| self.map_transport_error(e, HEALTH_TIMEOUT_MS))?;
        if !response.status().is_success() {
            return Err(ResonatorError::BridgeUnavailable {
                reason: format!("Bridge health returned {}", response.status()),
            });
        }
        response.json::<HealthResponse>().map_err(|e| ResonatorError::BridgeConnection {
            message: format!("Invalid health response from bridge: {}", e),
        })
    }

    #[cfg(not(feature = "acestep"))]
    pub fn health(&self) -> Result<HealthResponse> {
        Err(Self::not_compiled())
    }

    #[cfg(feature = "acestep")]
    fn client(&self, timeout_ms: u64) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ResonatorError::BridgeConnection {
                message: e.to_string(),
            })
    }

    #[cfg(feature = "acestep")]
    fn map_transport_error(&self, e: reqwest::Error, timeout_ms: u64) -> ResonatorError {
        if e.is_timeout() {
            ResonatorError::BackendTimeout {
                backend: self.name().to_string(),
                timeout_ms,
            }
        } else if e.is_connect() {
            ResonatorError::BridgeUnavailable {
                reason: format!("Cannot connect to bridge at {}: {}", self.base_url, e),
            }
        } else {
            ResonatorError::BridgeConnection {
                message: e.to_string(),
            }
        }
    }

    /// Send request to the bridge
    #[cfg(feature = "acestep")]
    fn send_request(&self, request: &InferRequest) -> Result<InferResponse> {
        let client = self.client(self.timeout_ms)?;
        let response = client
            .post(self.endpoint("infer"))
            .json(request)
            .send()
            .map_err(|e| self.map_transport_error(e, self.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .json::<ErrorResponse>()
                .map(|body| body.error)
                .unwrap_or_else(|_| format!("Bridge returned {}", status));
            return Err(ResonatorError::BackendFailure {
                backend: self.name().to_string(),
                reason,
            });
        }

        response.json::<InferResponse>().map_err(|e| ResonatorError::BridgeConnection {
            message: format!("Invalid response from bridge: {}", e),
        })
    }

    #[cfg(not(feature = "acestep"))]
    fn send_request(&self, _request: &InferRequest) -> Result<InferResponse> {
        Err(Self::not_compiled())
    }

    #[cfg(not(feature = "acestep"))]
    fn not_compiled() -> ResonatorError {
        ResonatorError::BridgeUnavailable {
            reason: "ACE-Step support not compiled. Build with --features acestep".to_string(),
        }
    }
}

impl Default for BridgeBackend {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TransformBackend for BridgeBackend {
    fn name(&self) -> &str {
        "ace-step"
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "acestep")
    }

    fn infer(&self, samples: &[f32], sample_rate: u32, params: &TransformParams) -> Result<Vec<f32>> {
        let request = build_request(samples, sample_rate, params)?;
        let response = self.send_request(&request)?;
        tracing::debug!(
            backend = self.name(),
            model_type = %response.model_type,
            model_used = response.model_used,
            num_samples = response.num_samples,
            duration_ms = response.duration_ms,
            "bridge inference complete"
        );
        decode_response(&response, sample_rate)
    }
}

/// Parse a bridge error body, if it is one
pub fn parse_error_body(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorResponse>(body).ok().map(|e| e.error)
}
