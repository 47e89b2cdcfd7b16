//! Lock-free values shared between the render thread and the inference cycle

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Lock-free atomic f32 for cross-thread parameter and feature updates.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Create a new AtomicF32 with the given initial value
    #[inline]
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// Load the current value
    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store a new value
    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Atomically swap the value and return the old one
    #[inline]
    pub fn swap(&self, value: f32) -> f32 {
        f32::from_bits(self.0.swap(value.to_bits(), Ordering::Relaxed))
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for AtomicF32 {
    fn clone(&self) -> Self {
        Self::new(self.load())
    }
}

/// Fixed-capacity sample block written by one side and replayed by the other
///
/// Used for the sustain buffer (last good transform output) and the archive
/// recall slot. The writer replaces the content wholesale; the reader loops
/// over it with its own read position. A read racing a write may mix old and
/// new samples for one block, which is audible at worst and never unsafe.
#[derive(Debug)]
pub struct SharedBlock {
    samples: Box<[AtomicF32]>,
    len: AtomicUsize,
    generation: AtomicU64,
}

impl SharedBlock {
    /// Allocate a block able to hold `capacity` samples (allocation happens here only)
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: (0..capacity.max(1)).map(|_| AtomicF32::new(0.0)).collect(),
            len: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of valid samples (0 = nothing to replay)
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped on every store so readers can restart replay from the top
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the content with the tail of `source` that fits
    pub fn store(&self, source: &[f32]) {
        let count = source.len().min(self.samples.len());
        let tail = &source[source.len() - count..];
        for (slot, &value) in self.samples.iter().zip(tail) {
            slot.store(if value.is_finite() { value } else { 0.0 });
        }
        self.len.store(count, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop the content; readers fall through to the next fallback
    pub fn clear(&self) {
        self.len.store(0, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Copy samples into `out` circularly, advancing the caller-owned `position`
    ///
    /// Returns `false` (leaving `out` untouched) when the block is empty.
    pub fn read_circular(&self, position: &mut usize, out: &mut [f32]) -> bool {
        let len = self.len();
        if len == 0 {
            return false;
        }
        let mut pos = *position % len;
        for sample in out.iter_mut() {
            *sample = self.samples[pos].load();
            pos += 1;
            if pos == len {
                pos = 0;
            }
        }
        *position = pos;
        true
    }

    /// Copy the current content out (async side only; allocates)
    pub fn to_vec(&self) -> Vec<f32> {
        self.samples[..self.len()].iter().map(AtomicF32::load).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_atomic_f32_roundtrip() {
        let value = AtomicF32::new(0.25);
        assert_relative_eq!(value.load(), 0.25);
        assert_relative_eq!(value.swap(-1.5), 0.25);
        assert_relative_eq!(value.load(), -1.5);
    }

    #[test]
    fn test_shared_block_empty_read_leaves_output() {
        let block = SharedBlock::new(8);
        let mut out = [3.0; 4];
        let mut pos = 0;
        assert!(!block.read_circular(&mut pos, &mut out));
        assert_eq!(out, [3.0; 4]);
    }

    #[test]
    fn test_shared_block_circular_replay() {
        let block = SharedBlock::new(8);
        block.store(&[1.0, 2.0, 3.0]);

        let mut out = [0.0; 7];
        let mut pos = 0;
        assert!(block.read_circular(&mut pos, &mut out));
        assert_eq!(out, [1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert_eq!(pos, 1);
    }

    #[test]
    fn test_shared_block_keeps_tail_and_sanitizes() {
        let block = SharedBlock::new(3);
        block.store(&[9.0, 8.0, f32::NAN, 1.0, 2.0]);
        assert_eq!(block.to_vec(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_shared_block_clear_bumps_generation() {
        let block = SharedBlock::new(4);
        block.store(&[1.0]);
        let generation = block.generation();
        block.clear();
        assert!(block.is_empty());
        assert!(block.generation() > generation);
    }
}
