//! cpal output device wiring

use super::{RingBuffer, BUFFER_BACKOFF_MICROS, RING_BUFFER_SAMPLES};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;

/// An open stereo output stream fed through a ring buffer.
pub struct AudioOutput {
    buffer: Arc<RingBuffer>,
    // Held so the stream keeps playing; dropped on close.
    _stream: cpal::Stream,
}

impl AudioOutput {
    /// Open the default output device at `sample_rate`.
    pub fn open(sample_rate: u32) -> Result<Self, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no audio output device available".to_string())?;
        let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::new(
            RingBuffer::new(RING_BUFFER_SAMPLES).map_err(|e| e.to_string())?,
        );
        let callback_buffer = buffer.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let got = callback_buffer.read(out);
                    // Underrun: pad with silence rather than stale samples.
                    for sample in &mut out[got..] {
                        *sample = 0.0;
                    }
                },
                |err| eprintln!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| format!("failed to open audio stream on {}: {}", name, e))?;
        stream
            .play()
            .map_err(|e| format!("failed to start audio stream: {}", e))?;

        println!("Playing through {} at {} Hz", name, sample_rate);
        Ok(AudioOutput {
            buffer,
            _stream: stream,
        })
    }

    /// Write samples, blocking with backpressure until they all fit.
    pub fn write_blocking(&self, samples: &[f32]) {
        let mut remaining = samples;
        while !remaining.is_empty() {
            let written = self.buffer.write(remaining);
            if written == 0 {
                std::thread::sleep(std::time::Duration::from_micros(BUFFER_BACKOFF_MICROS));
                continue;
            }
            remaining = &remaining[written..];
        }
    }

    /// Block until the callback has drained everything queued.
    pub fn drain(&self) {
        while self.buffer.available_read() > 0 {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}
