//! WAV export
//!
//! Streams the rendered audio into a RIFF WAVE file in 4 KiB chunks:
//! stereo, 16-bit integer PCM or 32-bit float per the CLI flag.

use ncsf_replayer::NcsfStream;
use std::io::Read;
use std::path::Path;

/// Bytes pulled from the stream per write iteration.
const CHUNK_BYTES: usize = 4096;

/// Render `stream` to completion into a WAV file.
///
/// `bits` selects the sample format: 16 (integer PCM) or 32 (float).
pub fn export_to_wav(
    stream: &mut NcsfStream,
    output_path: &Path,
    bits: u16,
) -> Result<(), String> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: stream.sample_rate(),
        bits_per_sample: bits,
        sample_format: if bits == 32 {
            hound::SampleFormat::Float
        } else {
            hound::SampleFormat::Int
        },
    };

    let mut writer = hound::WavWriter::create(output_path, spec)
        .map_err(|e| format!("Failed to create WAV file: {}", e))?;

    let mut chunk = [0u8; CHUNK_BYTES];
    let mut total_frames = 0u64;
    loop {
        let got = stream
            .read(&mut chunk)
            .map_err(|e| format!("Failed to render samples: {}", e))?;
        if got == 0 {
            break;
        }
        for sample in chunk[..got].chunks_exact(4) {
            let value = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
            if bits == 32 {
                writer
                    .write_sample(value)
                    .map_err(|e| format!("Failed to write sample: {}", e))?;
            } else {
                let value = (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(value)
                    .map_err(|e| format!("Failed to write sample: {}", e))?;
            }
        }
        total_frames += (got / 8) as u64;
    }

    writer
        .finalize()
        .map_err(|e| format!("Failed to finalize WAV file: {}", e))?;

    println!(
        "Wrote {} frames ({:.1}s) to {}",
        total_frames,
        total_frames as f64 / stream.sample_rate() as f64,
        output_path.display()
    );
    Ok(())
}
