//! Command-line argument parsing for the NCSF replayer CLI.
//!
//! This module handles parsing and validation of CLI arguments including:
//! - File path and sequence selection
//! - Output mode (live playback or WAV export)
//! - Stream options (rate, interpolation, length/fade, volume handling)
//! - Help text generation

use ncsf_replayer::{Interpolation, PeakType, VolumeType};
use std::env;

/// Parsed command-line arguments.
#[derive(Debug)]
pub struct CliArgs {
    /// NCSF file to play
    pub file_path: Option<String>,
    /// Override the sequence number from the reserved block
    pub sequence: Option<usize>,
    /// WAV output path (None = live playback)
    pub output: Option<String>,
    /// WAV bit depth: 16 (integer) or 32 (float)
    pub bits: u16,
    /// Output sample rate
    pub sample_rate: u32,
    /// Interpolation kernel
    pub interpolation: Interpolation,
    /// Length override (e.g. "1:30" or "90")
    pub length: Option<String>,
    /// Fade override
    pub fade: Option<String>,
    /// Seconds of leading silence to skip
    pub skip_silence: u32,
    /// Base gain source
    pub volume_type: VolumeType,
    /// Peak clamp source
    pub peak_type: PeakType,
    /// Outer volume multiplier
    pub volume: f32,
    /// Loop forever instead of honoring length/fade
    pub play_forever: bool,
    /// Muted sequence tracks (bitmask)
    pub track_mutes: u16,
    /// Muted hardware channels (bitmask)
    pub channel_mutes: u16,
    /// Print file information instead of playing
    pub show_info: bool,
    /// Analyze loudness and print suggested ReplayGain tags
    pub replaygain: bool,
    /// Whether help was requested
    pub show_help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            file_path: None,
            sequence: None,
            output: None,
            bits: 16,
            sample_rate: 44100,
            interpolation: Interpolation::Linear,
            length: None,
            fade: None,
            skip_silence: 0,
            volume_type: VolumeType::Volume,
            peak_type: PeakType::None,
            volume: 1.0,
            play_forever: false,
            track_mutes: 0,
            channel_mutes: 0,
            show_info: false,
            replaygain: false,
            show_help: false,
        }
    }
}

impl CliArgs {
    /// Parse arguments from the command line. Errors are printed to stderr
    /// and flip `show_help` on.
    pub fn parse() -> Self {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl Iterator<Item = String>) -> Self {
        let mut parsed = Self::default();
        let mut iter = args;

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => parsed.show_help = true,
                "--info" | "-i" => parsed.show_info = true,
                "--replaygain" => parsed.replaygain = true,
                "--play-forever" => parsed.play_forever = true,
                "--output" | "-o" => parsed.take_value(&mut iter, "--output", |args, value| {
                    args.output = Some(value.to_string());
                    Ok(())
                }),
                "--sequence" | "-s" => {
                    parsed.take_value(&mut iter, "--sequence", |args, value| {
                        match value.parse() {
                            Ok(n) => args.sequence = Some(n),
                            Err(_) => return Err(format!("bad sequence number: {}", value)),
                        }
                        Ok(())
                    })
                }
                "--bits" | "-b" => parsed.take_value(&mut iter, "--bits", |args, value| {
                    match value.parse() {
                        Ok(bits @ (16 | 32)) => args.bits = bits,
                        _ => return Err(format!("bit depth must be 16 or 32, got {}", value)),
                    }
                    Ok(())
                }),
                "--rate" | "-r" => parsed.take_value(&mut iter, "--rate", |args, value| {
                    match value.parse() {
                        Ok(rate) if rate > 0 => args.sample_rate = rate,
                        _ => return Err(format!("bad sample rate: {}", value)),
                    }
                    Ok(())
                }),
                "--interpolation" => {
                    parsed.take_value(&mut iter, "--interpolation", |args, value| {
                        match Interpolation::from_name(value) {
                            Some(mode) => args.interpolation = mode,
                            None => return Err(format!("unknown interpolation: {}", value)),
                        }
                        Ok(())
                    })
                }
                "--length" => parsed.take_value(&mut iter, "--length", |args, value| {
                    args.length = Some(value.to_string());
                    Ok(())
                }),
                "--fade" => parsed.take_value(&mut iter, "--fade", |args, value| {
                    args.fade = Some(value.to_string());
                    Ok(())
                }),
                "--skip-silence" => {
                    parsed.take_value(&mut iter, "--skip-silence", |args, value| {
                        match value.parse() {
                            Ok(seconds) => args.skip_silence = seconds,
                            Err(_) => return Err(format!("bad second count: {}", value)),
                        }
                        Ok(())
                    })
                }
                "--volume-type" => {
                    parsed.take_value(&mut iter, "--volume-type", |args, value| {
                        match VolumeType::from_name(value) {
                            Some(vt) => args.volume_type = vt,
                            None => return Err(format!("unknown volume type: {}", value)),
                        }
                        Ok(())
                    })
                }
                "--peak-type" => parsed.take_value(&mut iter, "--peak-type", |args, value| {
                    match PeakType::from_name(value) {
                        Some(pt) => args.peak_type = pt,
                        None => return Err(format!("unknown peak type: {}", value)),
                    }
                    Ok(())
                }),
                "--volume" | "-v" => parsed.take_value(&mut iter, "--volume", |args, value| {
                    match value.parse() {
                        Ok(volume) if volume >= 0.0 => args.volume = volume,
                        _ => return Err(format!("bad volume multiplier: {}", value)),
                    }
                    Ok(())
                }),
                "--mute-tracks" => {
                    parsed.take_value(&mut iter, "--mute-tracks", |args, value| {
                        args.track_mutes = parse_mute_list(value, "track")?;
                        Ok(())
                    })
                }
                "--mute-channels" => {
                    parsed.take_value(&mut iter, "--mute-channels", |args, value| {
                        args.channel_mutes = parse_mute_list(value, "channel")?;
                        Ok(())
                    })
                }
                _ if arg.starts_with('-') => {
                    eprintln!("Unknown flag: {}", arg);
                    parsed.show_help = true;
                }
                _ => parsed.file_path = Some(arg),
            }
        }

        parsed
    }

    fn take_value(
        &mut self,
        iter: &mut impl Iterator<Item = String>,
        flag: &str,
        apply: impl FnOnce(&mut Self, &str) -> Result<(), String>,
    ) {
        match iter.next() {
            Some(value) => {
                if let Err(message) = apply(self, &value) {
                    eprintln!("{}", message);
                    self.show_help = true;
                }
            }
            None => {
                eprintln!("{} requires an argument", flag);
                self.show_help = true;
            }
        }
    }

    /// Print help text to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage:\n  ncsf-replayer [flags] <file.ncsf>\n\n\
             Flags:\n\
             \x20 -o, --output <file.wav>   Render to a WAV file instead of playing\n\
             \x20 -b, --bits <16|32>        WAV bit depth (16-bit int or 32-bit float)\n\
             \x20 -r, --rate <hz>           Output sample rate (default 44100)\n\
             \x20 -s, --sequence <n>        Play sequence n (default: from the file)\n\
             \x20 -i, --info                Print tags, sequences and length, then exit\n\
             \x20     --replaygain          Analyze loudness, print ReplayGain tags, exit\n\
             \x20     --interpolation <m>   none | linear | lagrange4 | lagrange6 |\n\
             \x20                           sinc | simple-sinc | lanczos\n\
             \x20     --length <time>       Override length (H:MM:SS.fff, M:SS or seconds)\n\
             \x20     --fade <time>         Override fade\n\
             \x20     --skip-silence <sec>  Skip up to <sec> seconds of leading silence\n\
             \x20     --volume-type <t>     none | volume | track | album\n\
             \x20     --peak-type <t>       none | track | album\n\
             \x20 -v, --volume <mult>       Outer volume multiplier (default 1.0)\n\
             \x20     --play-forever        Ignore length/fade and loop forever\n\
             \x20     --mute-tracks <list>  Mute sequence tracks, e.g. 1,2,10\n\
             \x20     --mute-channels <l>   Mute hardware channels, e.g. 15,16\n\
             \x20 -h, --help                Show this help\n\n\
             Examples:\n\
             \x20 ncsf-replayer song.ncsf                 # Play through the audio device\n\
             \x20 ncsf-replayer -o out.wav -b 32 song.ncsf # Render to 32-bit float WAV\n"
        );
    }
}

/// Parse "1,2,16"-style 1-based index lists into a bitmask.
fn parse_mute_list(value: &str, what: &str) -> Result<u16, String> {
    let mut mask = 0u16;
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let index: u16 = part
            .parse()
            .map_err(|_| format!("bad {} index: {}", what, part))?;
        if !(1..=16).contains(&index) {
            return Err(format!("{} index {} out of range 1..16", what, index));
        }
        mask |= 1 << (index - 1);
    }
    Ok(mask)
}
