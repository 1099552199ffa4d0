//! Live audio output
//!
//! A ring buffer decouples rendering from the audio callback: the main
//! thread renders the stream and writes with backpressure, the cpal
//! callback drains the buffer and zero-fills underruns.

pub mod device;
pub mod ring_buffer;

pub use device::AudioOutput;
pub use ring_buffer::RingBuffer;

/// Ring buffer capacity in samples (~190 ms of stereo at 44.1 kHz).
pub const RING_BUFFER_SAMPLES: usize = 16384;

/// Backoff while the ring buffer is full.
pub const BUFFER_BACKOFF_MICROS: u64 = 500;
