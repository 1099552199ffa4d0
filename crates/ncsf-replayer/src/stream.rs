//! Pull-based playback stream
//!
//! `NcsfStream` is a blocking byte source: `Read` fills the buffer with
//! interleaved little-endian 32-bit-float stereo and synchronously drives
//! the player underneath. Three post-processing concerns live here:
//! leading-silence skipping, gain (tag volume / ReplayGain with peak
//! clamping) with hard clipping, and the length+fade envelope with end
//! detection.
//!
//! Seeking is byte-addressed: forward seeks read into a discard buffer,
//! backward seeks restart the player from scratch.

use crate::error::{ReplayerError, Result};
use crate::generator::SampleGenerator;
use crate::options::{PeakType, StreamOptions, VolumeType};
use crate::player::Player;
use sdat_core::{Sdat, TagCollection};
use std::io;
use std::sync::Arc;

/// Fixed-point offset folded into the silence detector's sample terms.
const SILENCE_BIAS: i32 = 0x1000;

/// Silence threshold in 16-bit sample units (~0.000213623 full scale).
const SILENCE_LEVEL: i32 = 7;

/// Bytes per stereo float frame.
const FRAME_BYTES: usize = 8;

/// Chunk size for forward-seek discards.
const SEEK_CHUNK: usize = 4096;

/// A playable NCSF sequence exposed as a byte stream.
pub struct NcsfStream {
    sdat: Arc<Sdat>,
    sequence: usize,
    options: StreamOptions,

    player: Player,
    generator: SampleGenerator,

    volume_modification: f32,
    length_sample: u64,
    fade_sample: u64,
    current_sample: u64,
    position: u64,

    skip_frames_left: u64,
    prev_left: i32,
    prev_right: i32,

    leftover: [u8; FRAME_BYTES],
    leftover_len: usize,
    leftover_pos: usize,
    eof: bool,
}

impl NcsfStream {
    /// Open a stream over sequence `sequence` of a parsed SDAT, with the
    /// tag set steering length, fade and gain.
    pub fn new(
        sdat: Arc<Sdat>,
        sequence: usize,
        tags: &TagCollection,
        options: StreamOptions,
    ) -> Result<Self> {
        if options.sample_rate == 0 {
            return Err(ReplayerError::ConfigError(
                "sample rate must be positive".into(),
            ));
        }

        let rate = options.sample_rate as u64;
        let length_ms = tags.length_ms().unwrap_or(options.default_length_ms).max(0) as u64;
        let fade_ms = tags.fade_ms().unwrap_or(options.default_fade_ms).max(0) as u64;
        let length_sample = length_ms * rate / 1000;
        let fade_sample = fade_ms * rate / 1000;

        let volume_modification = compute_volume(tags, &options);

        let mut player = Player::new(&sdat, sequence)?;
        player.set_track_mutes(options.track_mutes);
        let generator = SampleGenerator::new(
            options.sample_rate,
            options.interpolation,
            options.channel_mutes,
        );

        let skip_frames_left = options.skip_silence_on_start_sec as u64 * rate;

        Ok(NcsfStream {
            sdat,
            sequence,
            options,
            player,
            generator,
            volume_modification,
            length_sample,
            fade_sample,
            current_sample: 0,
            position: 0,
            skip_frames_left,
            prev_left: SILENCE_BIAS,
            prev_right: SILENCE_BIAS,
            leftover: [0; FRAME_BYTES],
            leftover_len: 0,
            leftover_pos: 0,
            eof: false,
        })
    }

    /// The effective gain applied to every sample.
    pub fn volume_modification(&self) -> f32 {
        self.volume_modification
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.options.sample_rate
    }

    /// Total stream length in frames (length plus fade), when bounded.
    pub fn total_frames(&self) -> Option<u64> {
        if self.options.play_forever {
            None
        } else {
            Some(self.length_sample + self.fade_sample)
        }
    }

    /// Restart playback from the very beginning.
    pub fn restart(&mut self) -> Result<()> {
        let mut player = Player::new(&self.sdat, self.sequence)?;
        player.set_track_mutes(self.options.track_mutes);
        self.player = player;
        self.generator = SampleGenerator::new(
            self.options.sample_rate,
            self.options.interpolation,
            self.options.channel_mutes,
        );
        self.current_sample = 0;
        self.position = 0;
        self.skip_frames_left =
            self.options.skip_silence_on_start_sec as u64 * self.options.sample_rate as u64;
        self.prev_left = SILENCE_BIAS;
        self.prev_right = SILENCE_BIAS;
        self.leftover_len = 0;
        self.leftover_pos = 0;
        self.eof = false;
        Ok(())
    }

    fn is_silent(&mut self, left: f32, right: f32) -> bool {
        let cur_left = (left * 32768.0) as i32 + SILENCE_BIAS;
        let cur_right = (right * 32768.0) as i32 + SILENCE_BIAS;
        let silent = (cur_left - self.prev_left).abs() <= 2 * SILENCE_LEVEL
            && (cur_right - self.prev_right).abs() <= 2 * SILENCE_LEVEL;
        self.prev_left = cur_left;
        self.prev_right = cur_right;
        silent
    }

    /// Produce the next post-processed frame, or `None` at end of stream.
    fn produce_frame(&mut self) -> Option<(f32, f32)> {
        // Leading-silence skip: silent frames are discarded until either a
        // non-silent frame shows up or the budget runs out. The first
        // non-silent frame is always emitted untouched by the skipper.
        let (mut left, mut right) = loop {
            let frame = self.generator.next_frame(&mut self.player);
            if self.skip_frames_left == 0 {
                break frame;
            }
            if self.is_silent(frame.0, frame.1) {
                self.skip_frames_left -= 1;
                continue;
            }
            self.skip_frames_left = 0;
            break frame;
        };

        left = (left * self.volume_modification).clamp(-1.0, 1.0);
        right = (right * self.volume_modification).clamp(-1.0, 1.0);

        if !self.options.play_forever {
            let i = self.current_sample;
            let end = self.length_sample + self.fade_sample;
            if i >= end || (self.fade_sample == 0 && i >= self.length_sample) {
                return None;
            }
            if i >= self.length_sample {
                let scale = (end - i) * 65536 / self.fade_sample;
                let factor = scale as f32 * (1.0 / 65536.0);
                left *= factor;
                right *= factor;
            }
        }

        self.current_sample += 1;
        Some((left, right))
    }

    /// Total stream size in bytes, when bounded.
    fn total_bytes(&self) -> Option<u64> {
        self.total_frames().map(|f| f * FRAME_BYTES as u64)
    }

    fn seek_to_byte(&mut self, target: u64) -> io::Result<u64> {
        let target = match self.total_bytes() {
            Some(total) => target.min(total),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "seeking is disabled while playing forever",
                ))
            }
        };

        if target < self.position {
            self.restart()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }

        // Forward: generate into a scratch buffer and throw it away.
        let mut scratch = [0u8; SEEK_CHUNK];
        while self.position < target {
            let want = ((target - self.position) as usize).min(SEEK_CHUNK);
            let got = io::Read::read(self, &mut scratch[..want])?;
            if got == 0 {
                break;
            }
        }
        Ok(self.position)
    }
}

impl io::Read for NcsfStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.leftover_pos >= self.leftover_len {
                if self.eof {
                    break;
                }
                match self.produce_frame() {
                    Some((left, right)) => {
                        self.leftover[..4].copy_from_slice(&left.to_le_bytes());
                        self.leftover[4..].copy_from_slice(&right.to_le_bytes());
                        self.leftover_len = FRAME_BYTES;
                        self.leftover_pos = 0;
                    }
                    None => {
                        self.eof = true;
                        break;
                    }
                }
            }
            let available = self.leftover_len - self.leftover_pos;
            let take = available.min(buf.len() - written);
            buf[written..written + take]
                .copy_from_slice(&self.leftover[self.leftover_pos..self.leftover_pos + take]);
            self.leftover_pos += take;
            written += take;
        }
        self.position += written as u64;
        Ok(written)
    }
}

impl io::Seek for NcsfStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::Current(delta) => self.position as i64 + delta,
            io::SeekFrom::End(delta) => match self.total_bytes() {
                Some(total) => total as i64 + delta,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "seeking is disabled while playing forever",
                    ))
                }
            },
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.seek_to_byte(target as u64)
    }
}

/// Resolve the stream gain from the tag set and options.
fn compute_volume(tags: &TagCollection, options: &StreamOptions) -> f32 {
    let mut gain: f64 = if options.ignore_volume {
        1.0
    } else {
        match options.volume_type {
            VolumeType::None => 1.0,
            VolumeType::Volume => tags.volume().unwrap_or(1.0),
            VolumeType::ReplayGainTrack => tags
                .replaygain_gain_db(false)
                .or_else(|| tags.replaygain_gain_db(true))
                .map(db_to_linear)
                .unwrap_or(1.0),
            VolumeType::ReplayGainAlbum => tags
                .replaygain_gain_db(true)
                .or_else(|| tags.replaygain_gain_db(false))
                .map(db_to_linear)
                .unwrap_or(1.0),
        }
    };

    let peak = match options.peak_type {
        PeakType::None => None,
        PeakType::ReplayGainTrack => tags.replaygain_peak(false),
        PeakType::ReplayGainAlbum => tags.replaygain_peak(true),
    };
    if let Some(peak) = peak {
        if peak > 0.0 && peak != 1.0 {
            gain = gain.min(1.0 / peak);
        }
    }

    (gain * options.volume_multiplier as f64) as f32
}

fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}
