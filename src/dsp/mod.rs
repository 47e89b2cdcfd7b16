//! DSP Library
//!
//! Everything on the real-time path of a channel. Nothing in here allocates
//! after construction or returns an error from a processing call.
//!
//! Block order inside a channel:
//! excitation → feedback mix → spectral chain (frames, then ladder → combs →
//! resonator → crusher → shaper) → feedback delay

pub mod comb;
pub mod crusher;
pub mod delay;
pub mod excitation;
pub mod ladder;
pub mod rng;
pub mod semantic;
pub mod shaper;
pub mod smoothing;
pub mod spectral;

pub use comb::{CombBank, Resonator};
pub use delay::FeedbackDelay;
pub use excitation::{ExcitationGenerator, ExcitationMode, ExcitationSettings};
pub use ladder::{FilterMode, LadderFilter};
pub use rng::NoiseRng;
pub use semantic::SemanticProfile;
pub use shaper::ShaperMode;
pub use smoothing::Smoothed;
pub use spectral::{
    validate_frame_size, FeatureProbe, SpectralChain, SpectralFeatures, SpectralParams,
    SUPPORTED_FRAME_SIZES,
};
