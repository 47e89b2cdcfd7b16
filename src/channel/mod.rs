//! Recursive feedback channels
//!
//! This module provides:
//! - `FeedbackChannel` / `ChannelRenderer`, the control and audio halves of a channel
//! - The async inference cycle with its circuit breaker, archive and auto-drift
//! - `ChannelParams`, the performable parameter set

pub mod archive;
pub mod breaker;
#[allow(clippy::module_inception)]
pub mod channel;
pub mod cycle;
pub mod drift;
pub mod params;
pub mod phase;

pub use archive::{ArchiveEntry, IterationArchive};
pub use breaker::CircuitBreaker;
pub use channel::{
    BackendStatus, ChannelRenderer, ChannelSettings, ChannelShared, ChannelStatus, FeedbackChannel,
};
pub use cycle::{perturb, ChannelBackends};
pub use drift::AutoDrift;
pub use params::{param_range, ChannelParams, DriftTargets, ParamSnapshot, SharedParams};
pub use phase::detect_phase;
