//! Lock-free single-producer/single-consumer ring buffer
//!
//! Transports samples between the render thread and the inference cycle.
//! Capacity is rounded up to a power of two so wraparound is a bitmask, and
//! one slot is always kept free to tell "full" from "empty":
//!
//! `available_to_read() + available_to_write() == capacity() - 1`
//!
//! Cursors increase monotonically (wrapping) and are published with
//! release/acquire ordering. Each side only ever stores its own cursor, and the
//! bulk copy happens before that store, so neither side ever blocks. The
//! consumer resets the ring with [`Consumer::reset`].

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    write: AtomicUsize,
    read: AtomicUsize,
}

// Slots in [read, write) are owned by the consumer and slots outside it by the
// producer; the cursor protocol guarantees the two never touch the same slot.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn available_to_read(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    #[inline]
    fn available_to_write(&self) -> usize {
        self.capacity() - 1 - self.available_to_read()
    }
}

/// Constructor namespace for a producer/consumer pair
pub struct RingBuffer<T> {
    _marker: std::marker::PhantomData<T>,
}

impl<T: Copy + Default + Send> RingBuffer<T> {
    /// Create a ring buffer and split it into its two ends
    ///
    /// # Arguments
    /// * `capacity` - Requested slot count, rounded up to the next power of two
    ///   (minimum 2). One slot stays reserved, so `capacity - 1` items fit.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (Producer<T>, Consumer<T>) {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let shared = Arc::new(Shared {
            slots,
            mask: capacity - 1,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        });

        (
            Producer {
                shared: Arc::clone(&shared),
            },
            Consumer { shared },
        )
    }
}

/// Writing end. Only the owner of this handle advances the write cursor.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Producer<T> {
    /// Write as many samples as fit; the excess is dropped
    ///
    /// Never blocks and never allocates. Returns the number written.
    pub fn write(&mut self, samples: &[T]) -> usize {
        let write = self.shared.write.load(Ordering::Relaxed);
        let count = samples.len().min(self.shared.available_to_write());

        for (offset, &sample) in samples[..count].iter().enumerate() {
            let index = write.wrapping_add(offset) & self.shared.mask;
            // SAFETY: slot is outside [read, write) so the consumer cannot see it
            // until the cursor store below.
            unsafe {
                *self.shared.slots[index].get() = sample;
            }
        }

        self.shared
            .write
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    pub fn available_to_read(&self) -> usize {
        self.shared.available_to_read()
    }

    pub fn available_to_write(&self) -> usize {
        self.shared.available_to_write()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.available_to_write() == 0
    }
}

/// Reading end. Only the owner of this handle advances the read cursor.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Consumer<T> {
    /// Read up to `count` samples into `into`
    ///
    /// Never blocks. On underrun fewer samples are returned and the rest of
    /// `into` is left untouched for the caller to substitute.
    pub fn read(&mut self, into: &mut [T], count: usize) -> usize {
        let read = self.shared.read.load(Ordering::Relaxed);
        let count = count
            .min(into.len())
            .min(self.shared.available_to_read());

        for (offset, slot) in into[..count].iter_mut().enumerate() {
            let index = read.wrapping_add(offset) & self.shared.mask;
            // SAFETY: slot is inside [read, write), published by the producer.
            *slot = unsafe { *self.shared.slots[index].get() };
        }

        self.shared
            .read
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }

    /// Reset the ring to empty, discarding everything currently readable
    ///
    /// The read cursor jumps to the write cursor; slot contents are untouched.
    /// Only the consumer's own cursor moves, so this is valid while the
    /// producer is live.
    pub fn reset(&mut self) {
        let write = self.shared.write.load(Ordering::Acquire);
        self.shared.read.store(write, Ordering::Release);
    }

    pub fn available_to_read(&self) -> usize {
        self.shared.available_to_read()
    }

    pub fn available_to_write(&self) -> usize {
        self.shared.available_to_write()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.available_to_read() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn assert_invariant<T: Copy>(producer: &Producer<T>) {
        assert_eq!(
            producer.available_to_read() + producer.available_to_write(),
            producer.capacity() - 1
        );
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let (producer, consumer) = RingBuffer::<f32>::new(100);
        assert_eq!(producer.capacity(), 128);
        assert_eq!(consumer.capacity(), 128);
        assert_eq!(producer.available_to_write(), 127);
    }

    #[test]
    fn test_write_then_partial_read() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        assert_eq!(producer.write(&[1.0, 2.0, 3.0, 4.0, 5.0]), 5);

        let mut out = [0.0; 3];
        assert_eq!(consumer.read(&mut out, 3), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(consumer.available_to_read(), 2);
        assert_invariant(&producer);
    }

    #[test]
    fn test_overflow_writes_only_free_space() {
        let (mut producer, _consumer) = RingBuffer::<f32>::new(8);
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();

        let free = producer.available_to_write();
        assert_eq!(producer.write(&samples), free);
        assert_eq!(producer.write(&samples), 0);
        assert!(producer.is_full());
        assert_invariant(&producer);
    }

    #[test]
    fn test_read_from_empty_returns_zero() {
        let (_producer, mut consumer) = RingBuffer::<f32>::new(16);
        let mut out = [7.0; 4];
        assert_eq!(consumer.read(&mut out, 4), 0);
        assert_eq!(out, [7.0; 4]);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        let mut out = [0.0; 8];
        let mut next = 0.0;
        let mut expected = 0.0;

        for _ in 0..10 {
            let chunk = [next, next + 1.0, next + 2.0, next + 3.0, next + 4.0];
            assert_eq!(producer.write(&chunk), 5);
            next += 5.0;
            assert_eq!(consumer.read(&mut out, 5), 5);
            for &value in &out[..5] {
                assert_eq!(value, expected);
                expected += 1.0;
            }
            assert_invariant(&producer);
        }
    }

    #[test]
    fn test_read_count_limited_by_slice() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(16);
        producer.write(&[1.0; 10]);
        let mut out = [0.0; 4];
        assert_eq!(consumer.read(&mut out, 10), 4);
        assert_eq!(consumer.available_to_read(), 6);
    }

    #[test]
    fn test_reset_discards_unread() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        producer.write(&[1.0, 2.0, 3.0]);
        consumer.reset();
        assert!(consumer.is_empty());
        assert_invariant(&producer);
    }

    #[test]
    fn test_concurrent_transport_keeps_order_and_invariant() {
        const TOTAL: usize = 200_000;
        let (mut producer, mut consumer) = RingBuffer::<u32>::new(256);

        let writer = thread::spawn(move || {
            let mut next = 0u32;
            let mut chunk = [0u32; 37];
            while (next as usize) < TOTAL {
                let len = chunk.len().min(TOTAL - next as usize);
                for (i, slot) in chunk[..len].iter_mut().enumerate() {
                    *slot = next + i as u32;
                }
                let written = producer.write(&chunk[..len]);
                next += written as u32;
                let total = producer.available_to_read() + producer.available_to_write();
                assert!(total <= producer.capacity() - 1);
                if written == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0u32;
        let mut out = [0u32; 53];
        while (expected as usize) < TOTAL {
            let got = consumer.read(&mut out, 53);
            for &value in &out[..got] {
                assert_eq!(value, expected);
                expected += 1;
            }
            if got == 0 {
                thread::yield_now();
            }
        }

        writer.join().unwrap();
        assert!(consumer.is_empty());
    }
}
