//! Ring buffer between the render thread and the audio callback
//!
//! The producer pushes interleaved stereo floats, the cpal callback pops
//! them. Mutex-protected storage with atomic positions; capacity rounds up
//! to a power of two.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Error type for ring buffer operations
#[derive(Debug, Clone)]
pub struct RingBufferError(pub String);

impl std::fmt::Display for RingBufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RingBufferError {}

/// Fixed-capacity sample queue shared between two threads.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Mutex<Vec<f32>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// 64 MB of f32 samples; anything larger is a configuration mistake.
    const MAX_CAPACITY: usize = 64 * 1024 * 1024 / std::mem::size_of::<f32>();

    /// Create a buffer; capacity rounds up to the next power of two.
    pub fn new(requested_capacity: usize) -> Result<Self, RingBufferError> {
        if requested_capacity == 0 {
            return Err(RingBufferError(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }
        let capacity = requested_capacity.next_power_of_two();
        if capacity > Self::MAX_CAPACITY {
            return Err(RingBufferError(format!(
                "ring buffer capacity {} exceeds maximum safe size {}",
                capacity,
                Self::MAX_CAPACITY
            )));
        }
        Ok(RingBuffer {
            buffer: Mutex::new(vec![0.0; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            mask: capacity - 1,
            capacity,
        })
    }

    /// Samples available to read without blocking.
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Write samples; returns how many fit (0 when full).
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut buf = self.buffer.lock();
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let available = self.capacity - write_pos.wrapping_sub(read_pos) - 1;
        let to_write = samples.len().min(available);
        if to_write == 0 {
            return 0;
        }

        let write_idx = write_pos & self.mask;
        if write_idx + to_write <= self.capacity {
            buf[write_idx..write_idx + to_write].copy_from_slice(&samples[..to_write]);
        } else {
            let first = self.capacity - write_idx;
            buf[write_idx..].copy_from_slice(&samples[..first]);
            buf[..to_write - first].copy_from_slice(&samples[first..to_write]);
        }
        drop(buf);

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read samples; returns how many were available.
    pub fn read(&self, dest: &mut [f32]) -> usize {
        let buf = self.buffer.lock();
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let available = write_pos.wrapping_sub(read_pos);
        let to_read = dest.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let read_idx = read_pos & self.mask;
        if read_idx + to_read <= self.capacity {
            dest[..to_read].copy_from_slice(&buf[read_idx..read_idx + to_read]);
        } else {
            let first = self.capacity - read_idx;
            dest[..first].copy_from_slice(&buf[read_idx..]);
            dest[first..to_read].copy_from_slice(&buf[..to_read - first]);
        }
        drop(buf);

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_samples() {
        let rb = RingBuffer::new(16).unwrap();
        let samples = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(rb.write(&samples), 4);
        assert_eq!(rb.available_read(), 4);

        let mut dest = [0.0; 4];
        assert_eq!(rb.read(&mut dest), 4);
        assert_eq!(dest, samples);
        assert_eq!(rb.available_read(), 0);
    }

    #[test]
    fn test_wraps_around() {
        let rb = RingBuffer::new(8).unwrap();
        assert_eq!(rb.write(&[1.0; 6]), 6);
        let mut dest = [0.0; 5];
        assert_eq!(rb.read(&mut dest), 5);
        // The next write straddles the end of the storage.
        assert_eq!(rb.write(&[2.0; 6]), 6);
        let mut dest = [0.0; 7];
        assert_eq!(rb.read(&mut dest), 7);
        assert_eq!(&dest[..1], &[1.0]);
        assert_eq!(&dest[1..], &[2.0; 6]);
    }

    #[test]
    fn test_full_buffer_rejects_writes() {
        let rb = RingBuffer::new(8).unwrap();
        // One slot stays free to distinguish full from empty.
        assert_eq!(rb.write(&[1.0; 16]), 7);
        assert_eq!(rb.write(&[2.0; 4]), 0);
    }

    #[test]
    fn test_zero_capacity_is_error() {
        assert!(RingBuffer::new(0).is_err());
    }
}
