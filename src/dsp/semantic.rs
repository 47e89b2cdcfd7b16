//! Semantic tag profiles
//!
//! A prompt is scanned for known character words ("metallic", "warm", ...).
//! Each word maps to a fixed gain per band; the distinct words found average,
//! and a prompt with no known word is flat.

use serde::{Deserialize, Serialize};

/// Upper edges of the lower three bands in Hz; the fourth band is open-ended
pub const BAND_EDGES_HZ: [f32; 3] = [250.0, 2000.0, 6000.0];

/// Number of spectral bands a profile covers
pub const NUM_BANDS: usize = 4;

/// Per-band gain vector: sub, low-mid, high-mid, air
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticProfile(pub [f32; NUM_BANDS]);

impl SemanticProfile {
    pub const FLAT: SemanticProfile = SemanticProfile([1.0; NUM_BANDS]);

    /// Build a profile from the tags found in `prompt`
    ///
    /// Repeating a tag does not weight it further.
    pub fn from_prompt(prompt: &str) -> Self {
        let mut seen = [false; TAGS.len()];
        for word in prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            if let Some(index) = tag_index(&word.to_lowercase()) {
                seen[index] = true;
            }
        }

        let mut sum = [0.0f32; NUM_BANDS];
        let mut count = 0usize;
        for ((_, gains), hit) in TAGS.iter().zip(seen) {
            if !hit {
                continue;
            }
            for (acc, g) in sum.iter_mut().zip(gains.iter()) {
                *acc += g;
            }
            count += 1;
        }

        if count == 0 {
            return Self::FLAT;
        }
        Self(sum.map(|s| s / count as f32))
    }

    #[inline]
    pub fn gain(&self, band: usize) -> f32 {
        self.0[band.min(NUM_BANDS - 1)]
    }

    pub fn is_flat(&self) -> bool {
        self.0.iter().all(|&g| (g - 1.0).abs() < 1e-6)
    }
}

impl Default for SemanticProfile {
    fn default() -> Self {
        Self::FLAT
    }
}

/// Known tags and their band gains
pub const TAGS: [(&str, [f32; NUM_BANDS]); 13] = [
    ("metallic", [0.6, 0.9, 1.6, 1.4]),
    ("warm", [1.3, 1.2, 0.8, 0.6]),
    ("dark", [1.4, 1.0, 0.6, 0.4]),
    ("bright", [0.8, 0.9, 1.3, 1.6]),
    ("harsh", [0.7, 1.2, 1.7, 1.3]),
    ("drone", [1.5, 1.2, 0.7, 0.5]),
    ("glitch", [0.8, 1.0, 1.4, 1.5]),
    ("noise", [0.9, 1.0, 1.2, 1.4]),
    ("sub", [1.8, 0.8, 0.5, 0.4]),
    ("airy", [0.6, 0.8, 1.2, 1.8]),
    ("hollow", [1.1, 0.5, 1.1, 1.0]),
    ("resonant", [1.0, 1.5, 1.3, 0.8]),
    ("industrial", [1.2, 1.3, 1.5, 0.9]),
];

fn tag_index(tag: &str) -> Option<usize> {
    TAGS.iter().position(|(name, _)| *name == tag)
}

/// Gain vector for a single tag, if it is known
pub fn tag_gains(tag: &str) -> Option<[f32; NUM_BANDS]> {
    tag_index(tag).map(|index| TAGS[index].1)
}

/// Band index of an FFT bin
#[inline]
pub fn band_for_bin(bin: usize, frame_size: usize, sample_rate: f32) -> usize {
    let freq = bin as f32 * sample_rate / frame_size.max(1) as f32;
    BAND_EDGES_HZ
        .iter()
        .position(|&edge| freq < edge)
        .unwrap_or(NUM_BANDS - 1)
}
