//! Waveshaper
//!
//! Four transfer curves with a continuous morph toward the next curve in a
//! fixed cyclic order (Clean -> Warm -> Hard -> Clip -> Clean), so sweeping the
//! morph never switches curves abruptly.

use serde::{Deserialize, Serialize};

// ============================================================================
// Shaper Mode
// ============================================================================

/// Waveshaping curves
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShaperMode {
    /// Unity `tanh`
    #[default]
    Clean,
    /// Asymmetric soft clip, lifts even harmonics
    Warm,
    /// Harder `tanh` with odd-harmonic emphasis
    Hard,
    /// Asymmetric hard clip
    Clip,
}

impl ShaperMode {
    pub const ALL: [ShaperMode; 4] = [
        ShaperMode::Clean,
        ShaperMode::Warm,
        ShaperMode::Hard,
        ShaperMode::Clip,
    ];

    /// Next mode in the morph cycle
    pub fn next(self) -> Self {
        match self {
            ShaperMode::Clean => ShaperMode::Warm,
            ShaperMode::Warm => ShaperMode::Hard,
            ShaperMode::Hard => ShaperMode::Clip,
            ShaperMode::Clip => ShaperMode::Clean,
        }
    }

    /// Parse shaper mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "clean" => Some(ShaperMode::Clean),
            "warm" => Some(ShaperMode::Warm),
            "hard" => Some(ShaperMode::Hard),
            "clip" => Some(ShaperMode::Clip),
            _ => None,
        }
    }

    /// Apply the transfer curve to an already gained sample
    #[inline]
    pub fn shape(self, x: f32) -> f32 {
        match self {
            ShaperMode::Clean => x.tanh(),
            ShaperMode::Warm => {
                const BIAS: f32 = 0.2;
                let offset = BIAS.tanh();
                ((x + BIAS).tanh() - offset) / (1.0 + offset)
            }
            ShaperMode::Hard => {
                let t = x.tanh();
                1.5 * t - 0.5 * t * t * t
            }
            ShaperMode::Clip => x.clamp(-0.8, 1.0),
        }
    }
}

// ============================================================================
// Waveshaping
// ============================================================================

/// Drive gain for a guidance value: `(guidance / 10)^1.5`
#[inline]
pub fn drive_gain(guidance: f32) -> f32 {
    (guidance.max(0.0) / 10.0).powf(1.5)
}

/// Shape `buffer` in place
///
/// # Arguments
/// * `mode` - Base curve
/// * `morph` - 0..1 blend toward `mode.next()`
/// * `guidance` - Drive source, see [`drive_gain`]
/// * `mix` - Dry/wet; 0 leaves the buffer untouched
pub fn shape(buffer: &mut [f32], mode: ShaperMode, morph: f32, guidance: f32, mix: f32) {
    let mix = mix.clamp(0.0, 1.0);
    if mix < f32::EPSILON {
        return;
    }
    let morph = morph.clamp(0.0, 1.0);
    let gain = drive_gain(guidance);
    let next = mode.next();

    for sample in buffer.iter_mut() {
        let dry = if sample.is_finite() { *sample } else { 0.0 };
        let driven = dry * gain;
        let wet = if morph > 0.0 {
            mode.shape(driven) * (1.0 - morph) + next.shape(driven) * morph
        } else {
            mode.shape(driven)
        };
        *sample = dry * (1.0 - mix) + wet * mix;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_drive_gain_at_ten_is_unity() {
        assert_relative_eq!(drive_gain(10.0), 1.0);
        assert_relative_eq!(drive_gain(20.0), 2.0f32.powf(1.5));
    }

    #[test]
    fn test_zero_mix_is_neutral() {
        let input = vec![0.9, -0.9, 0.3];
        let mut buffer = input.clone();
        shape(&mut buffer, ShaperMode::Hard, 0.5, 20.0, 0.0);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_curves_are_bounded() {
        for mode in ShaperMode::ALL {
            for x in [-100.0, -1.0, 0.0, 1.0, 100.0] {
                let y = mode.shape(x);
                assert!(y.is_finite());
                assert!(y.abs() <= 1.01, "{:?}({}) = {}", mode, x, y);
            }
        }
    }

    #[test]
    fn test_warm_passes_zero() {
        assert_relative_eq!(ShaperMode::Warm.shape(0.0), 0.0);
    }

    #[test]
    fn test_clip_is_asymmetric() {
        assert_relative_eq!(ShaperMode::Clip.shape(5.0), 1.0);
        assert_relative_eq!(ShaperMode::Clip.shape(-5.0), -0.8);
    }

    #[test]
    fn test_full_morph_equals_next_mode() {
        let mut morphed = vec![0.5];
        shape(&mut morphed, ShaperMode::Clean, 1.0, 10.0, 1.0);
        assert_relative_eq!(morphed[0], ShaperMode::Warm.shape(0.5), epsilon = 1e-6);
    }

    #[test]
    fn test_next_cycles() {
        assert_eq!(ShaperMode::Clip.next(), ShaperMode::Clean);
        let mut mode = ShaperMode::Clean;
        for _ in 0..4 {
            mode = mode.next();
        }
        assert_eq!(mode, ShaperMode::Clean);
    }
}
