//! Bit-depth reducer

/// Bits at depth 0
pub const MAX_BITS: f32 = 16.0;

/// Bits at depth 1
pub const MIN_BITS: f32 = 2.0;

/// Effective bit depth for a normalized depth knob
///
/// Exponential: `16 * (2/16)^depth`, so 0 -> 16 bits and 1 -> 2 bits.
#[inline]
pub fn effective_bits(depth: f32) -> f32 {
    let depth = depth.clamp(0.0, 1.0);
    (MAX_BITS * (MIN_BITS / MAX_BITS).powf(depth)).clamp(MIN_BITS, MAX_BITS)
}

/// Quantize `buffer` in place to the nearest level at the given depth
pub fn crush(buffer: &mut [f32], depth: f32) {
    let levels = 2.0f32.powf(effective_bits(depth) - 1.0);
    for sample in buffer.iter_mut() {
        let x = if sample.is_finite() { *sample } else { 0.0 };
        *sample = (x * levels).round() / levels;
    }
}
