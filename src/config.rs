//! Engine configuration
//!
//! JSON on disk, every field optional (serde defaults), with a small set of
//! environment overrides applied on top:
//!
//! - `RESONATOR_BRIDGE_URL` - remote bridge base URL
//! - `RESONATOR_BRIDGE_TIMEOUT_MS` - bounded wait per backend call
//! - `RESONATOR_MAX_CHANNELS` - channel pool size

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::archive::DEFAULT_ARCHIVE_CAPACITY;
use crate::channel::breaker::DEFAULT_MAX_CONSECUTIVE_FAILURES;
use crate::channel::params::ChannelParams;
use crate::dsp::spectral::validate_frame_size;
use crate::error::{ResonatorError, Result};

/// Remote / local / passthrough backend policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Bridge base URL, e.g. `http://127.0.0.1:8976`
    pub remote_url: Option<String>,
    /// Bounded wait per backend call
    pub timeout_ms: u64,
    /// Run a channel-scoped spectral backend when the remote is absent or suspended
    pub local_enabled: bool,
    /// Fall back to identity when every other backend fails
    pub allow_passthrough: bool,
    pub max_consecutive_failures: u32,
    /// Remote suspension after the breaker opens
    pub backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            timeout_ms: 30_000,
            local_enabled: true,
            allow_passthrough: true,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            backoff_ms: 30_000,
        }
    }
}

impl BackendConfig {
    /// Whether any backend could serve a cycle
    pub fn has_backend(&self) -> bool {
        self.remote_url.is_some() || self.local_enabled || self.allow_passthrough
    }
}

/// Per-channel settings applied on activation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// 512, 1024 or 2048
    pub frame_size: usize,
    /// Capture ring length (rounded up to a power of two in samples)
    pub capture_seconds: f32,
    /// Feedback ring length
    pub feedback_seconds: f32,
    /// Most audio handed to one backend call; also the sustain/recall length
    pub cycle_seconds: f32,
    pub archive_capacity: usize,
    /// Cooperative yield between cycles
    pub cycle_yield_ms: u64,
    pub volume: f32,
    pub prompt: String,
    pub params: ChannelParams,
    /// Noise seed; `None` draws one per channel
    pub seed: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            capture_seconds: 8.0,
            feedback_seconds: 8.0,
            cycle_seconds: 4.0,
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
            cycle_yield_ms: 50,
            volume: 0.8,
            prompt: String::new(),
            params: ChannelParams::default(),
            seed: None,
        }
    }
}

impl ChannelConfig {
    fn seconds_to_samples(seconds: f32, sample_rate: u32) -> usize {
        (seconds.max(0.0) * sample_rate as f32).round() as usize
    }

    pub fn capture_capacity(&self, sample_rate: u32) -> usize {
        Self::seconds_to_samples(self.capture_seconds, sample_rate)
    }

    pub fn feedback_capacity(&self, sample_rate: u32) -> usize {
        Self::seconds_to_samples(self.feedback_seconds, sample_rate)
    }

    pub fn cycle_samples(&self, sample_rate: u32) -> usize {
        Self::seconds_to_samples(self.cycle_seconds, sample_rate)
    }

    pub fn validate(&self, sample_rate: u32, block_size: usize) -> Result<()> {
        validate_frame_size(self.frame_size)?;
        if self.cycle_samples(sample_rate) < block_size {
            return Err(ResonatorError::Config {
                reason: format!("cycle_seconds {} is shorter than one block", self.cycle_seconds),
            });
        }
        if self.capture_capacity(sample_rate) < self.cycle_samples(sample_rate) {
            return Err(ResonatorError::Config {
                reason: "capture buffer must hold at least one cycle".to_string(),
            });
        }
        if self.feedback_capacity(sample_rate) < block_size {
            return Err(ResonatorError::Config {
                reason: "feedback buffer must hold at least one block".to_string(),
            });
        }
        if self.archive_capacity == 0 {
            return Err(ResonatorError::Config {
                reason: "archive_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Largest block the host renders at once
    pub block_size: usize,
    /// Channel pool size, fixed for the engine's lifetime
    pub max_channels: usize,
    pub master_volume: f32,
    pub channel: ChannelConfig,
    pub backend: BackendConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 512,
            max_channels: 8,
            master_volume: 1.0,
            channel: ChannelConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply `RESONATOR_*` environment overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = env::var("RESONATOR_BRIDGE_URL") {
            if !url.trim().is_empty() {
                self.backend.remote_url = Some(url.trim().to_string());
            }
        }
        if let Ok(value) = env::var("RESONATOR_BRIDGE_TIMEOUT_MS") {
            self.backend.timeout_ms = parse_env("RESONATOR_BRIDGE_TIMEOUT_MS", &value)?;
        }
        if let Ok(value) = env::var("RESONATOR_MAX_CHANNELS") {
            self.max_channels = parse_env("RESONATOR_MAX_CHANNELS", &value)?;
        }
        Ok(self)
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ResonatorError::Config {
                reason: "sample_rate must be positive".to_string(),
            });
        }
        if self.block_size == 0 {
            return Err(ResonatorError::Config {
                reason: "block_size must be positive".to_string(),
            });
        }
        if self.max_channels == 0 {
            return Err(ResonatorError::Config {
                reason: "max_channels must be at least 1".to_string(),
            });
        }
        if self.backend.timeout_ms == 0 {
            return Err(ResonatorError::Config {
                reason: "backend timeout_ms must be positive".to_string(),
            });
        }
        if !self.backend.has_backend() {
            return Err(ResonatorError::MissingBackend {
                reason: "no remote URL, local backend disabled and passthrough disallowed"
                    .to_string(),
            });
        }
        self.channel.validate(self.sample_rate, self.block_size)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ResonatorError::InvalidParameter {
        param: name.to_string(),
        value: value.to_string(),
        expected: "a positive integer".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel.archive_capacity, 16);
        assert_eq!(config.backend.max_consecutive_failures, 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_channels": 4, "channel": {"frame_size": 2048, "prompt": "dark drone"}}"#,
        )
        .unwrap();
        assert_eq!(config.max_channels, 4);
        assert_eq!(config.channel.frame_size, 2048);
        assert_eq!(config.channel.prompt, "dark drone");
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resonator.json");
        let mut config = EngineConfig::default();
        config.backend.remote_url = Some("http://127.0.0.1:8976".to_string());
        config.channel.params.entropy = 0.7;
        config.save(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_bad_frame_size() {
        let mut config = EngineConfig::default();
        config.channel.frame_size = 1000;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_FRAME_SIZE");
    }

    #[test]
    fn test_rejects_missing_backend() {
        let mut config = EngineConfig::default();
        config.backend.local_enabled = false;
        config.backend.allow_passthrough = false;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "MISSING_BACKEND");

        config.backend.remote_url = Some("http://localhost:8976".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = EngineConfig::default();
        config.block_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.max_channels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capacities() {
        let channel = ChannelConfig::default();
        assert_eq!(channel.cycle_samples(48_000), 192_000);
        assert_eq!(channel.capture_capacity(48_000), 384_000);
    }

    #[test]
    fn test_parse_env_value() {
        assert_eq!(parse_env::<usize>("RESONATOR_MAX_CHANNELS", " 12 ").unwrap(), 12);
        assert!(parse_env::<usize>("RESONATOR_MAX_CHANNELS", "many").is_err());
    }
}
