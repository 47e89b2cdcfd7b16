//! Transform backends
//!
//! This module provides:
//! - `TransformBackend` trait every backend implements
//! - `BridgeBackend` for the external ACE-Step HTTP bridge
//! - `LocalSpectralBackend`, the per-channel DSP fallback
//! - Mock implementations for testing

pub mod backend;
pub mod bridge;
pub mod local;
pub mod mock;

pub use backend::{InferMethod, PassthroughBackend, TaskType, TransformBackend, TransformParams};
pub use bridge::{BridgeBackend, HealthResponse, InferRequest, InferResponse, DEFAULT_BRIDGE_PORT};
pub use local::LocalSpectralBackend;
pub use mock::MockBackend;
