//! Three-level phase estimate from spectral features
//!
//! Phase 1 is tonal and settled, phase 2 evolving, phase 3 noisy or chaotic.

use crate::dsp::spectral::SpectralFeatures;

/// Cycles reported as phase 1 regardless of features
pub const WARMUP_CYCLES: u64 = 2;

const PHASE_2_THRESHOLD: f32 = 0.3;
const PHASE_3_THRESHOLD: f32 = 0.55;

/// Weighted activity score in 0..1
pub fn activity(features: &SpectralFeatures) -> f32 {
    let score = 0.4 * features.flatness + 0.4 * features.normalized_flux + 0.2 * features.centroid;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Phase for a cycle
///
/// # Arguments
/// * `iteration` - 1-based count of completed cycles
/// * `features` - Latest render-path features
pub fn detect_phase(iteration: u64, features: &SpectralFeatures) -> u8 {
    if iteration <= WARMUP_CYCLES || features.frames == 0 {
        return 1;
    }
    let score = activity(features);
    if score >= PHASE_3_THRESHOLD {
        3
    } else if score >= PHASE_2_THRESHOLD {
        2
    } else {
        1
    }
}
