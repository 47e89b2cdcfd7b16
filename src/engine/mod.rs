//! Audio Engine Module
//!
//! Real-time plumbing shared by every channel:
//! - Lock-free SPSC ring buffer
//! - Atomic floats and shared replay blocks
//! - Channel lifecycle state machine
//! - WAV interchange

pub mod io;
pub mod ring_buffer;
pub mod shared;
pub mod state;

pub use io::{decode_wav, decode_wav_at, encode_wav, read_wav_file, write_wav_file, DecodedAudio};
pub use ring_buffer::{Consumer, Producer, RingBuffer};
pub use shared::{AtomicF32, SharedBlock};
pub use state::{ChannelState, StateCell};
