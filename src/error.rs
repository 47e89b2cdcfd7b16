//! Error handling for the resonator engine
//!
//! Only configuration, lifecycle and backend paths produce errors. The render
//! path never returns one: it degrades to silence, passthrough or replay.

use thiserror::Error;

/// Result type alias for resonator operations
pub type Result<T> = std::result::Result<T, ResonatorError>;

/// Main error type for resonator operations
#[derive(Error, Debug)]
pub enum ResonatorError {
    // Configuration Errors
    #[error("Invalid frame size: {size} (expected 512, 1024 or 2048)")]
    InvalidFrameSize { size: usize },

    #[error("Invalid parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("No transform backend available: {reason}")]
    MissingBackend { reason: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // Lifecycle Errors
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidState { from: String, to: String },

    #[error("Channel {slot} is busy: {reason}")]
    ChannelBusy { slot: usize, reason: String },

    #[error("Slot {slot} out of range (pool size {pool_size})")]
    SlotOutOfRange { slot: usize, pool_size: usize },

    #[error("No free channel slot (pool size {pool_size})")]
    NoFreeSlot { pool_size: usize },

    // Backend Errors
    #[error("Transform backend '{backend}' failed: {reason}")]
    BackendFailure { backend: String, reason: String },

    #[error("Transform backend '{backend}' timed out after {timeout_ms}ms")]
    BackendTimeout { backend: String, timeout_ms: u64 },

    #[error("Bridge unavailable: {reason}")]
    BridgeUnavailable { reason: String },

    #[error("Bridge connection error: {message}")]
    BridgeConnection { message: String },

    // Audio Errors
    #[error("Invalid audio: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResonatorError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ResonatorError::InvalidFrameSize { .. } => "INVALID_FRAME_SIZE",
            ResonatorError::InvalidParameter { .. } => "INVALID_PARAMETER",
            ResonatorError::MissingBackend { .. } => "MISSING_BACKEND",
            ResonatorError::Config { .. } => "CONFIG_ERROR",
            ResonatorError::InvalidState { .. } => "INVALID_STATE",
            ResonatorError::ChannelBusy { .. } => "CHANNEL_BUSY",
            ResonatorError::SlotOutOfRange { .. } => "SLOT_OUT_OF_RANGE",
            ResonatorError::NoFreeSlot { .. } => "NO_FREE_SLOT",
            ResonatorError::BackendFailure { .. } => "BACKEND_FAILURE",
            ResonatorError::BackendTimeout { .. } => "BACKEND_TIMEOUT",
            ResonatorError::BridgeUnavailable { .. } => "BRIDGE_UNAVAILABLE",
            ResonatorError::BridgeConnection { .. } => "BRIDGE_CONNECTION_ERROR",
            ResonatorError::InvalidAudio { .. } => "INVALID_AUDIO",
            ResonatorError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            ResonatorError::Io(_) => "IO_ERROR",
            ResonatorError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Errors the circuit breaker counts as a failed backend call
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            ResonatorError::BackendFailure { .. }
                | ResonatorError::BackendTimeout { .. }
                | ResonatorError::BridgeUnavailable { .. }
                | ResonatorError::BridgeConnection { .. }
                | ResonatorError::InvalidAudio { .. }
        )
    }

    /// Check if this error is recoverable without reconfiguring the engine
    pub fn is_recoverable(&self) -> bool {
        match self {
            ResonatorError::BackendFailure { .. } => true,
            ResonatorError::BackendTimeout { .. } => true,
            ResonatorError::BridgeUnavailable { .. } => true,
            ResonatorError::BridgeConnection { .. } => true,
            ResonatorError::ChannelBusy { .. } => true,
            ResonatorError::NoFreeSlot { .. } => true,
            ResonatorError::InvalidAudio { .. } => true,
            _ => false,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ResonatorError::InvalidFrameSize { .. } => {
                vec!["Use a frame size of 512, 1024 or 2048 samples"]
            }
            ResonatorError::MissingBackend { .. } => vec![
                "Set a bridge URL (RESONATOR_BRIDGE_URL)",
                "Enable the local spectral backend",
                "Allow identity passthrough in the backend config",
            ],
            ResonatorError::BackendTimeout { .. } => vec![
                "Raise the backend timeout",
                "Reduce the number of diffusion steps",
            ],
            ResonatorError::BridgeUnavailable { .. } | ResonatorError::BridgeConnection { .. } => {
                vec![
                    "Check the bridge server is running",
                    "Local DSP keeps serving while the bridge is down",
                ]
            }
            ResonatorError::ChannelBusy { .. } => {
                vec!["Stop the channel before reconfiguring or resetting it"]
            }
            ResonatorError::NoFreeSlot { .. } => {
                vec!["Deactivate a channel or raise max_channels"]
            }
            _ => vec![],
        }
    }
}
