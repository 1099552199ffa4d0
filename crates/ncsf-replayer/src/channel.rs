//! Hardware channel model
//!
//! Sixteen channels, each a register bank driven by an ADSR envelope, an
//! LFO and a pitch sweep. Every clock cycle `main_tick` recomputes the
//! final volume, timer and pan from the envelope plus the track-supplied
//! user state and writes changed values into the registers.
//!
//! Channel types are position-locked like the hardware: PSG squares only on
//! channels 8..=13, noise only on 14..=15.

use crate::interp::PaddedWave;
use crate::tables::{
    calc_timer, calc_volume, convert_attack, convert_fall, convert_sustain, lfo_sine, PSG_TIMER,
};
use sdat_core::WaveType;
use std::sync::Arc;

/// Number of hardware channels.
pub const CHANNEL_COUNT: usize = 16;

/// Envelope attenuation at note start: -723 dB-deci in <<7 fixed point.
pub const ATTACK_START_ATTENUATION: i32 = -92544;

/// Attenuation floor (dB-deci) below which a releasing channel dies.
pub const DEATH_THRESHOLD: i32 = -723;

/// Sound source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelType {
    /// Sampled wave playback.
    #[default]
    Pcm,
    /// Square wave with a programmable duty cycle.
    Psg,
    /// LFSR white noise.
    Noise,
}

/// ADSR phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeState {
    /// Rising from silence toward full level.
    #[default]
    Attack,
    /// Falling toward the sustain target.
    Decay,
    /// Holding the sustain target.
    Sustain,
    /// Falling until the channel dies.
    Release,
}

/// What the LFO modulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LfoTarget {
    /// Vibrato.
    #[default]
    Pitch,
    /// Tremolo.
    Volume,
    /// Auto-pan.
    Pan,
}

impl LfoTarget {
    /// Decode the modulation-type byte (unknown values fall back to pitch).
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LfoTarget::Volume,
            2 => LfoTarget::Pan,
            _ => LfoTarget::Pitch,
        }
    }
}

/// Low-frequency oscillator state.
#[derive(Debug, Clone, Default)]
pub struct Lfo {
    /// Modulation target.
    pub target: LfoTarget,
    /// Phase advance per tick (in 1/64 table steps).
    pub speed: u8,
    /// Modulation depth.
    pub depth: u8,
    /// Depth multiplier.
    pub range: u8,
    /// Ticks to wait before the LFO starts.
    pub delay: u16,
    delay_counter: u16,
    /// Phase in 8.8 fixed point; the high byte indexes the sine table.
    counter: u16,
}

impl Lfo {
    /// Reset phase and delay for a fresh note.
    pub fn start(&mut self) {
        self.delay_counter = 0;
        self.counter = 0;
    }

    /// Current contribution, already scaled for the target.
    pub fn value(&self) -> i32 {
        if self.depth == 0 || self.delay_counter < self.delay {
            return 0;
        }
        let mut factor = lfo_sine(self.counter >> 8) as i64;
        factor *= self.depth as i64;
        factor *= self.range as i64;
        if factor != 0 {
            match self.target {
                LfoTarget::Pitch | LfoTarget::Pan => factor <<= 6,
                LfoTarget::Volume => factor *= 60,
            }
            factor >>= 14;
        }
        factor as i32
    }

    /// Advance delay, then phase (wrapping the table index modulo 0x80).
    pub fn tick(&mut self) {
        if self.delay_counter < self.delay {
            self.delay_counter += 1;
        } else {
            let step = (self.speed as u32) << 6;
            let mut index = (self.counter as u32 + step) >> 8;
            while index >= 0x80 {
                index -= 0x80;
            }
            self.counter = (((self.counter as u32 + step) & 0xFF) | (index << 8)) as u16;
        }
    }
}

/// The per-channel register bank read by the sample generator.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegisters {
    /// Whether the channel is producing samples.
    pub enabled: bool,
    /// 7-bit volume multiplier.
    pub volume_mul: u8,
    /// 2-bit volume divisor (0: x1, 1: x1/2, 2: x1/4, 3: x1/16).
    pub volume_div: u8,
    /// Pan 0..=127, 64 center.
    pub pan: u8,
    /// PSG duty cycle 0..=7.
    pub wave_duty: u8,
    /// 0 manual, 1 loop, 2 one-shot.
    pub repeat_mode: u8,
    /// Source wave for PCM channels.
    pub source: Option<Arc<PaddedWave>>,
    /// Timer period driving the playback rate.
    pub timer: u16,
    /// Fractional read position into the decoded wave.
    pub sample_position: f64,
    /// Read-position step per output sample (set by the generator).
    pub sample_increase: f64,
    /// PSG noise LFSR state.
    pub psg_counter: u16,
}

/// One hardware channel.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    /// Channel index 0..=15.
    pub id: u8,
    /// Allocated to a note.
    pub active: bool,
    /// Pending start on the next register sync.
    pub start: bool,
    /// Pending stop on the next register sync.
    pub stop: bool,
    /// Sweep advances itself inside `main_tick`.
    pub auto_sweep: bool,
    /// Source kind.
    pub typ: ChannelType,

    /// Envelope phase.
    pub state: EnvelopeState,
    /// Envelope attenuation, dB-deci << 7.
    pub attenuation: i32,
    pub(crate) attack_coeff: u8,
    pub(crate) decay_coeff: u16,
    pub(crate) sustain_level: u8,
    pub(crate) release_coeff: u16,

    /// Eviction priority.
    pub priority: u8,
    /// Played MIDI key.
    pub midi_key: u8,
    /// Instrument root key.
    pub root_key: u8,
    /// Note-on velocity.
    pub velocity: u8,

    /// Track volume contribution in dB-deci (volume, expression, master).
    pub ext_ampl: i32,
    /// Sequence-level dB offset (INFO volume).
    pub ext_ampl2: i32,
    /// Track pitch contribution in 1/64 semitones (pitch bend etc.).
    pub ext_tune: i32,
    /// Track pan contribution.
    pub ext_pan: i32,
    /// Pan scaling range (127 = full).
    pub pan_range: u8,
    /// Instrument pan, already centered (-64..=63).
    pub initial_pan: i8,

    /// Modulation state.
    pub lfo: Lfo,

    /// Sweep distance in 1/64 semitones.
    pub sweep_pitch: i32,
    /// Sweep duration in ticks.
    pub sweep_length: i32,
    /// Ticks of sweep already elapsed.
    pub sweep_counter: i32,

    /// Note ticks remaining, -1 for untimed notes.
    pub length: i32,
    /// Owning track slot, if linked.
    pub track: Option<u8>,
    /// Base timer of the source wave (or the PSG constant).
    pub base_timer: u16,
    /// Start position priming the decoder (-3 PCM, -11 ADPCM, -1 PSG/noise).
    pub(crate) primer: f64,

    /// Register bank.
    pub reg: ChannelRegisters,
}

impl Channel {
    /// Reset envelope and counters for a fresh note of `length` ticks.
    pub fn init_note(&mut self, length: i32) {
        self.attenuation = ATTACK_START_ATTENUATION;
        self.state = EnvelopeState::Attack;
        self.length = length;
        self.lfo.start();
        self.active = true;
        self.start = true;
        self.stop = false;
    }

    /// Configure a PCM source. Returns false when the wave is unplayable.
    pub fn start_pcm(&mut self, wave: Arc<PaddedWave>, timer: u16, encoding: WaveType) -> bool {
        if wave.len == 0 {
            return false;
        }
        self.typ = ChannelType::Pcm;
        self.base_timer = timer;
        self.primer = if encoding == WaveType::AdpcmIma {
            -11.0
        } else {
            -3.0
        };
        self.reg.repeat_mode = if wave.looping { 1 } else { 2 };
        self.reg.source = Some(wave);
        true
    }

    /// Configure a PSG square. Only channels 8..=13 can play one.
    pub fn start_psg(&mut self, duty: u8) -> bool {
        if !(8..=13).contains(&self.id) {
            return false;
        }
        self.typ = ChannelType::Psg;
        self.base_timer = PSG_TIMER;
        self.primer = -1.0;
        self.reg.wave_duty = duty & 0x7;
        self.reg.source = None;
        true
    }

    /// Configure the noise generator. Only channels 14..=15 can play it.
    pub fn start_noise(&mut self) -> bool {
        if !(14..=15).contains(&self.id) {
            return false;
        }
        self.typ = ChannelType::Noise;
        self.base_timer = PSG_TIMER;
        self.primer = -1.0;
        self.reg.source = None;
        true
    }

    /// Set the ADSR coefficients from raw instrument/track bytes.
    pub fn set_attack(&mut self, rate: u8) {
        self.attack_coeff = convert_attack(rate);
    }

    /// Set the decay coefficient.
    pub fn set_decay(&mut self, rate: u8) {
        self.decay_coeff = convert_fall(rate);
    }

    /// Set the sustain level byte.
    pub fn set_sustain(&mut self, level: u8) {
        self.sustain_level = level;
    }

    /// Set the release coefficient.
    pub fn set_release(&mut self, rate: u8) {
        self.release_coeff = convert_fall(rate);
    }

    /// Move the envelope into its release phase.
    pub fn release(&mut self) {
        self.state = EnvelopeState::Release;
    }

    /// Apply pending start/stop to the register bank (the "sync" step that
    /// runs first in every clock cycle).
    pub fn sync_registers(&mut self) {
        if self.stop {
            self.reg.enabled = false;
            self.stop = false;
        }
        if self.start {
            self.start = false;
            self.reg.enabled = true;
            self.reg.sample_increase = 0.0;
            if self.typ == ChannelType::Noise {
                self.reg.psg_counter = 0x7FFF;
            }
            self.reg.sample_position = self.primer;
        }
    }

    /// Kill the channel immediately.
    pub fn kill(&mut self) {
        self.active = false;
        self.start = false;
        self.stop = true;
        self.priority = 0;
        self.track = None;
        self.reg.volume_mul = 0;
        self.reg.volume_div = 0;
    }

    /// Advance the envelope (when `update`) and return its attenuation in
    /// dB-deci.
    pub fn envelope_tick(&mut self, update: bool) -> i32 {
        if update {
            match self.state {
                EnvelopeState::Attack => {
                    self.attenuation = -((-self.attenuation * self.attack_coeff as i32) >> 8);
                    if self.attenuation == 0 {
                        self.state = EnvelopeState::Decay;
                    }
                }
                EnvelopeState::Decay => {
                    self.attenuation -= self.decay_coeff as i32;
                    let target = (convert_sustain(self.sustain_level) as i32) << 7;
                    if self.attenuation <= target {
                        self.attenuation = target;
                        self.state = EnvelopeState::Sustain;
                    }
                }
                EnvelopeState::Sustain => {}
                EnvelopeState::Release => {
                    self.attenuation -= self.release_coeff as i32;
                }
            }
        }
        self.attenuation >> 7
    }

    /// Current sweep contribution; advances when `update` and the sweep is
    /// automatic.
    pub fn sweep_value(&mut self, update: bool) -> i32 {
        if self.sweep_pitch == 0 || self.sweep_counter >= self.sweep_length {
            return 0;
        }
        let remaining = (self.sweep_length - self.sweep_counter) as i64;
        let value = self.sweep_pitch as i64 * remaining / self.sweep_length as i64;
        if update && self.auto_sweep {
            self.sweep_counter += 1;
        }
        value as i32
    }

    /// Recompute volume, timer and pan and write the register bank.
    /// Returns false when the channel died this tick.
    pub fn main_tick(&mut self, update: bool) -> bool {
        if !self.active {
            return true;
        }

        let mut vol = convert_sustain(self.velocity) as i32;
        vol += self.envelope_tick(update);
        vol += self.ext_ampl;
        vol += self.ext_ampl2;

        let mut pitch = ((self.midi_key as i32 - self.root_key as i32) << 6) + self.ext_tune;
        pitch += self.sweep_value(update);

        let mut pan = self.initial_pan as i32;
        let lfo_value = self.lfo.value();
        if update {
            self.lfo.tick();
        }
        match self.lfo.target {
            LfoTarget::Pitch => pitch += lfo_value,
            LfoTarget::Volume => {
                if vol > -0x8000 {
                    vol += lfo_value;
                }
            }
            LfoTarget::Pan => pan += lfo_value,
        }

        if self.state == EnvelopeState::Release && (self.attenuation >> 7) <= DEATH_THRESHOLD {
            self.kill();
            return false;
        }

        if self.pan_range != 0x7F {
            pan = (pan * self.pan_range as i32 + 64) >> 7;
        }
        pan += self.ext_pan;
        let pan = (pan + 0x40).clamp(0, 127) as u8;

        let packed = calc_volume(vol);
        self.reg.volume_mul = (packed & 0x7F) as u8;
        self.reg.volume_div = (packed >> 8) as u8;

        let mut timer = calc_timer(self.base_timer, pitch);
        if self.typ == ChannelType::Psg {
            timer &= 0xFFFC;
        }
        self.reg.timer = timer;
        self.reg.pan = pan;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_channel() -> Channel {
        let mut chan = Channel {
            id: 0,
            velocity: 127,
            root_key: 60,
            midi_key: 60,
            pan_range: 127,
            base_timer: 0x4000,
            ..Default::default()
        };
        chan.set_attack(127);
        chan.set_decay(127);
        chan.set_sustain(127);
        chan.set_release(127);
        chan.init_note(-1);
        chan
    }

    #[test]
    fn test_attack_monotonic_toward_zero() {
        let mut chan = note_channel();
        chan.set_attack(100);
        let mut last = ATTACK_START_ATTENUATION;
        for _ in 0..1000 {
            chan.envelope_tick(true);
            assert!(chan.attenuation >= last, "attack went backwards");
            last = chan.attenuation;
            if chan.state != EnvelopeState::Attack {
                break;
            }
        }
        assert_ne!(chan.state, EnvelopeState::Attack, "attack never finished");
    }

    #[test]
    fn test_instant_attack_reaches_decay() {
        let mut chan = note_channel();
        chan.envelope_tick(true);
        // Rate 127 converts to coefficient 0: one tick to full level.
        assert_eq!(chan.attenuation, 0);
        assert_eq!(chan.state, EnvelopeState::Decay);
    }

    #[test]
    fn test_decay_stops_at_sustain_target() {
        let mut chan = note_channel();
        chan.set_sustain(64);
        chan.envelope_tick(true); // finish attack
        let target = (convert_sustain(64) as i32) << 7;
        let mut last = chan.attenuation;
        for _ in 0..100000 {
            chan.envelope_tick(true);
            assert!(chan.attenuation <= last);
            last = chan.attenuation;
            if chan.state == EnvelopeState::Sustain {
                break;
            }
        }
        assert_eq!(chan.state, EnvelopeState::Sustain);
        assert_eq!(chan.attenuation, target);
    }

    #[test]
    fn test_release_kills_channel() {
        let mut chan = note_channel();
        chan.envelope_tick(true);
        chan.set_release(120);
        chan.release();
        let mut died = false;
        for _ in 0..100000 {
            if !chan.main_tick(true) {
                died = true;
                break;
            }
        }
        assert!(died, "releasing channel never died");
        assert!(!chan.active);
    }

    #[test]
    fn test_sweep_is_linear_and_finishes() {
        let mut chan = note_channel();
        chan.sweep_pitch = 768;
        chan.sweep_length = 4;
        chan.sweep_counter = 0;
        chan.auto_sweep = true;
        assert_eq!(chan.sweep_value(true), 768);
        assert_eq!(chan.sweep_value(true), 768 * 3 / 4);
        assert_eq!(chan.sweep_value(true), 768 / 2);
        assert_eq!(chan.sweep_value(true), 768 / 4);
        assert_eq!(chan.sweep_value(true), 0);
    }

    #[test]
    fn test_lfo_delay_then_oscillation() {
        let mut lfo = Lfo {
            target: LfoTarget::Pitch,
            speed: 32,
            depth: 16,
            range: 1,
            delay: 3,
            ..Default::default()
        };
        lfo.start();
        // During the delay the LFO is silent.
        for _ in 0..3 {
            assert_eq!(lfo.value(), 0);
            lfo.tick();
        }
        let mut saw_positive = false;
        let mut saw_negative = false;
        for _ in 0..64 {
            let v = lfo.value();
            saw_positive |= v > 0;
            saw_negative |= v < 0;
            lfo.tick();
        }
        assert!(saw_positive && saw_negative, "LFO never oscillated");
    }

    #[test]
    fn test_psg_position_restrictions() {
        let mut chan = note_channel();
        chan.id = 0;
        assert!(!chan.start_psg(3));
        chan.id = 8;
        assert!(chan.start_psg(3));
        assert_eq!(chan.base_timer, PSG_TIMER);

        chan.id = 13;
        assert!(!chan.start_noise());
        chan.id = 14;
        assert!(chan.start_noise());
    }

    #[test]
    fn test_psg_timer_masked() {
        let mut chan = note_channel();
        chan.id = 8;
        chan.init_note(-1);
        assert!(chan.start_psg(0));
        chan.main_tick(true);
        assert_eq!(chan.reg.timer & 0x3, 0);
    }

    #[test]
    fn test_noise_start_seeds_lfsr() {
        let mut chan = note_channel();
        chan.id = 14;
        chan.init_note(-1);
        assert!(chan.start_noise());
        chan.sync_registers();
        assert_eq!(chan.reg.psg_counter, 0x7FFF);
        assert_eq!(chan.reg.sample_position, -1.0);
        assert!(chan.reg.enabled);
    }

    #[test]
    fn test_pan_clamps() {
        let mut chan = note_channel();
        chan.envelope_tick(true);
        chan.ext_pan = 1000;
        chan.main_tick(true);
        assert_eq!(chan.reg.pan, 127);
        chan.ext_pan = -1000;
        chan.main_tick(true);
        assert_eq!(chan.reg.pan, 0);
    }
}
