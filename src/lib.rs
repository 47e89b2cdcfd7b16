//! Latent Resonator - Real-time Recursive Audio Feedback
//!
//! Live audio is perturbed and fed back into itself at buffer rate while an
//! asynchronous transform (neural bridge or local DSP) slowly re-colours the
//! feedback over multi-second cycles.
//!
//! # Architecture
//!
//! Each channel runs on two timing regimes that only meet through lock-free
//! SPSC ring buffers:
//! - Render path: excitation + feedback → spectral chain → delay → output,
//!   per audio block, never allocating, blocking or failing
//! - Inference cycle: capture → perturb → transform backend → feedback and
//!   sustain buffers, seconds per pass, on a tokio task
//!
//! Channels live in a fixed pool inside a [`graph::ChannelGraph`]; adding and
//! removing channels only changes gains.

pub mod channel;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod graph;
pub mod neural;

pub use channel::{ChannelParams, ChannelStatus, FeedbackChannel};
pub use config::{BackendConfig, ChannelConfig, EngineConfig};
pub use error::{ResonatorError, Result};
pub use graph::{ChannelGraph, GraphRenderer};
