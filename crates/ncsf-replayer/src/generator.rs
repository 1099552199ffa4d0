//! Per-sample synthesis: format dispatch, mixing and clock pacing
//!
//! The generator pulls one stereo frame at a time out of the sixteen
//! channels. PCM channels interpolate their decoded wave, PSG channels
//! read the duty table, noise channels clock the 15-bit LFSR. Volume is a
//! 7-bit multiply plus a shift divisor; pan splits the sample with the
//! same 7-bit multiply. Sample positions advance even for muted channels,
//! and the generator decides when enough output has elapsed to run the
//! player's next sequencer cycle.

use crate::channel::{ChannelType, CHANNEL_COUNT};
use crate::interp::{Interpolation, Interpolator};
use crate::player::Player;
use crate::tables::{divisor_factor, muldiv7, ARM7_CLOCK, PSG_DUTY_TABLE, SECONDS_PER_CLOCK_CYCLE};

/// Stereo frame generator driving a [`Player`].
pub struct SampleGenerator {
    sample_rate: u32,
    interp: Interpolator,
    /// Bit per hardware channel; muted channels advance but stay silent.
    pub channel_mutes: u16,
    seconds_per_sample: f64,
    cycle_accumulator: f64,
}

impl SampleGenerator {
    /// Create a generator for `sample_rate` output.
    pub fn new(sample_rate: u32, interpolation: Interpolation, channel_mutes: u16) -> Self {
        SampleGenerator {
            sample_rate,
            interp: Interpolator::new(interpolation),
            channel_mutes,
            seconds_per_sample: 1.0 / sample_rate as f64,
            // Prime the accumulator so the sequencer runs before the very
            // first frame.
            cycle_accumulator: SECONDS_PER_CLOCK_CYCLE,
        }
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Generate one stereo frame, stepping the sequencer as needed.
    pub fn next_frame(&mut self, player: &mut Player) -> (f32, f32) {
        while self.cycle_accumulator >= SECONDS_PER_CLOCK_CYCLE {
            self.cycle_accumulator -= SECONDS_PER_CLOCK_CYCLE;
            player.sequence_main();
        }
        self.cycle_accumulator += self.seconds_per_sample;

        let mut left = 0.0f32;
        let mut right = 0.0f32;
        let mut dead: [bool; CHANNEL_COUNT] = [false; CHANNEL_COUNT];

        for i in 0..CHANNEL_COUNT {
            let muted = self.channel_mutes & (1 << i) != 0;
            let chan = &mut player.channels[i];
            if !chan.reg.enabled {
                continue;
            }

            // The timer gives the playback rate: half the ARM7 clock
            // divided by the period.
            let timer = chan.reg.timer.max(1) as f64;
            chan.reg.sample_increase = ARM7_CLOCK / (2.0 * self.sample_rate as f64) / timer;

            if !muted && chan.reg.sample_position >= 0.0 {
                let raw = match chan.typ {
                    ChannelType::Pcm => match chan.reg.source.as_deref() {
                        Some(wave) => self.interp.sample(
                            wave,
                            chan.reg.sample_position,
                            chan.reg.sample_increase,
                        ),
                        None => 0.0,
                    },
                    ChannelType::Psg => {
                        let phase = (chan.reg.sample_position as usize) & 0x7;
                        PSG_DUTY_TABLE[(chan.reg.wave_duty & 0x7) as usize][phase]
                    }
                    ChannelType::Noise => {
                        let lfsr = chan.reg.psg_counter;
                        if lfsr & 1 != 0 {
                            chan.reg.psg_counter = (lfsr >> 1) ^ 0x6000;
                            -1.0
                        } else {
                            chan.reg.psg_counter = lfsr >> 1;
                            1.0
                        }
                    }
                };

                let scaled = muldiv7(raw, chan.reg.volume_mul)
                    * divisor_factor(chan.reg.volume_div);
                left += muldiv7(scaled, 127 - chan.reg.pan);
                right += muldiv7(scaled, chan.reg.pan);
            }

            // Position advances regardless of muting.
            chan.reg.sample_position += chan.reg.sample_increase;

            if chan.typ == ChannelType::Pcm {
                if let Some(wave) = chan.reg.source.as_deref() {
                    let len = wave.len as f64;
                    if chan.reg.sample_position >= len {
                        if chan.reg.repeat_mode == 1 && wave.loop_length() > 0 {
                            let loop_len = wave.loop_length() as f64;
                            while chan.reg.sample_position >= len {
                                chan.reg.sample_position -= loop_len;
                            }
                        } else {
                            dead[i] = true;
                        }
                    }
                }
            }
        }

        for (i, &gone) in dead.iter().enumerate() {
            if gone {
                player.kill_channel(i);
                player.channels[i].reg.enabled = false;
            }
        }

        (left, right)
    }

    /// Fill an interleaved stereo buffer.
    pub fn generate_into(&mut self, player: &mut Player, out: &mut [f32]) {
        for frame in out.chunks_exact_mut(2) {
            let (l, r) = self.next_frame(player);
            frame[0] = l;
            frame[1] = r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random;
    use sdat_core::sbnk::{InstrumentDefinition, InstrumentEntry};
    use sdat_core::{Sbnk, Sseq, Swar, Swav};
    use std::sync::Arc;

    fn constant_swav() -> Swav {
        // Looping wave pinned at +0.5.
        let mut blob = vec![1u8, 1];
        blob.extend_from_slice(&22050u16.to_le_bytes());
        blob.extend_from_slice(&0x0400u16.to_le_bytes());
        blob.extend_from_slice(&0u16.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        for _ in 0..2 {
            blob.extend_from_slice(&0x4000i16.to_le_bytes());
        }
        Swav::parse(&blob).unwrap()
    }

    fn player_with(seq: Vec<u8>, pan: u8) -> Player {
        let bank = Arc::new(Sbnk {
            instruments: vec![InstrumentEntry::Single(InstrumentDefinition {
                record: 1,
                swav: 0,
                swar: 0,
                note: 60,
                attack: 127,
                decay: 127,
                sustain: 127,
                release: 120,
                pan,
            })],
        });
        let swar = Arc::new(Swar {
            waves: vec![Some(constant_swav())],
        });
        Player::from_parts(
            Arc::new(Sseq { data: seq }),
            bank,
            [Some(swar), None, None, None],
            0xFFFF,
            127,
        )
    }

    #[test]
    fn test_note_produces_audio_then_silence() {
        let _guard = random::TEST_LOCK.lock().unwrap();
        // Note 60 for 2 ticks, then End: audio during the note, silence
        // after the release dies out.
        let mut player = player_with(vec![0x3C, 0x7F, 0x02, 0xFF], 64);
        let mut generator = SampleGenerator::new(44100, Interpolation::Linear, 0);

        let mut buffer = vec![0.0f32; 2 * 4096];
        generator.generate_into(&mut player, &mut buffer);
        let peak_during = buffer.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(peak_during > 0.01, "no audio produced: peak {}", peak_during);

        // Run well past the release tail.
        for _ in 0..40 {
            generator.generate_into(&mut player, &mut buffer);
        }
        let peak_after = buffer.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(peak_after == 0.0, "expected silence, peak {}", peak_after);
        assert!(player.finished());
    }

    #[test]
    fn test_pan_splits_stereo() {
        let _guard = random::TEST_LOCK.lock().unwrap();
        // Instrument panned hard right.
        let mut player = player_with(vec![0x3C, 0x7F, 0x30, 0xFF], 127);
        let mut generator = SampleGenerator::new(44100, Interpolation::Linear, 0);
        let mut left_energy = 0.0f64;
        let mut right_energy = 0.0f64;
        for _ in 0..8192 {
            let (l, r) = generator.next_frame(&mut player);
            left_energy += (l as f64) * (l as f64);
            right_energy += (r as f64) * (r as f64);
        }
        assert!(right_energy > 0.0);
        assert!(
            left_energy < right_energy / 100.0,
            "left {} right {}",
            left_energy,
            right_energy
        );
    }

    #[test]
    fn test_channel_mute_keeps_position_moving() {
        let _guard = random::TEST_LOCK.lock().unwrap();
        let mut player = player_with(vec![0x3C, 0x7F, 0x30, 0xFF], 64);
        let mut generator = SampleGenerator::new(44100, Interpolation::Linear, 0xFFFF);
        let mut all_zero = true;
        for _ in 0..4096 {
            let (l, r) = generator.next_frame(&mut player);
            all_zero &= l == 0.0 && r == 0.0;
        }
        assert!(all_zero, "muted channels leaked audio");
        // The playing channel still advanced its read position.
        let moving = player
            .channels
            .iter()
            .any(|c| c.reg.enabled && c.reg.sample_position > 0.0);
        assert!(moving, "muted channel never advanced");
    }

    #[test]
    fn test_one_shot_sample_kills_channel() {
        let _guard = random::TEST_LOCK.lock().unwrap();
        // Non-looping wave: 4 samples then the channel dies.
        let mut blob = vec![1u8, 0];
        blob.extend_from_slice(&22050u16.to_le_bytes());
        blob.extend_from_slice(&0x0400u16.to_le_bytes());
        blob.extend_from_slice(&0u16.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        for _ in 0..2 {
            blob.extend_from_slice(&0x4000i16.to_le_bytes());
        }
        let bank = Arc::new(Sbnk {
            instruments: vec![InstrumentEntry::Single(InstrumentDefinition {
                record: 1,
                swav: 0,
                swar: 0,
                note: 60,
                attack: 127,
                decay: 127,
                sustain: 127,
                release: 0xFF,
                pan: 64,
            })],
        });
        let swar = Arc::new(Swar {
            waves: vec![Some(Swav::parse(&blob).unwrap())],
        });
        let mut player = Player::from_parts(
            Arc::new(Sseq {
                data: vec![0x3C, 0x7F, 0x00, 0xFF],
            }),
            bank,
            [Some(swar), None, None, None],
            0xFFFF,
            127,
        );
        let mut generator = SampleGenerator::new(44100, Interpolation::None, 0);
        for _ in 0..65536 {
            generator.next_frame(&mut player);
        }
        assert!(!player.channels_active(), "one-shot channel survived");
    }
}
