//! Stream configuration
//!
//! Options controlling one playback stream: output rate, interpolation,
//! length/fade defaults, silence skipping, volume handling and mute masks.

use crate::interp::Interpolation;

/// Where the base playback gain comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeType {
    /// Unity gain.
    None,
    /// The `volume` tag (else unity).
    #[default]
    Volume,
    /// `10^(gain/20)` from the track ReplayGain tag, album as fallback.
    ReplayGainTrack,
    /// `10^(gain/20)` from the album ReplayGain tag, track as fallback.
    ReplayGainAlbum,
}

impl VolumeType {
    /// Parse a CLI spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(VolumeType::None),
            "volume" => Some(VolumeType::Volume),
            "replaygain-track" | "track" => Some(VolumeType::ReplayGainTrack),
            "replaygain-album" | "album" => Some(VolumeType::ReplayGainAlbum),
            _ => None,
        }
    }
}

/// Which ReplayGain peak clamps the gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakType {
    /// No clamping.
    #[default]
    None,
    /// Clamp by the track peak.
    ReplayGainTrack,
    /// Clamp by the album peak.
    ReplayGainAlbum,
}

impl PeakType {
    /// Parse a CLI spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(PeakType::None),
            "replaygain-track" | "track" => Some(PeakType::ReplayGainTrack),
            "replaygain-album" | "album" => Some(PeakType::ReplayGainAlbum),
            _ => None,
        }
    }
}

/// Options for one playback stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Output sample rate in Hz (must be > 0).
    pub sample_rate: u32,
    /// Interpolation kernel.
    pub interpolation: Interpolation,
    /// Whole seconds of leading silence to drop (0 disables).
    pub skip_silence_on_start_sec: u32,
    /// Length when the tags don't provide one, in milliseconds.
    pub default_length_ms: i32,
    /// Fade when the tags don't provide one, in milliseconds.
    pub default_fade_ms: i32,
    /// Base gain source.
    pub volume_type: VolumeType,
    /// Peak clamp source.
    pub peak_type: PeakType,
    /// Ignore length/fade and keep playing (disables seeking).
    pub play_forever: bool,
    /// Outer gain always applied on top.
    pub volume_multiplier: f32,
    /// Bit per hardware channel to silence.
    pub channel_mutes: u16,
    /// Bit per sequence track to silence.
    pub track_mutes: u16,
    /// Force the base gain to unity regardless of tags.
    pub ignore_volume: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            sample_rate: 44100,
            interpolation: Interpolation::default(),
            skip_silence_on_start_sec: 0,
            default_length_ms: 60_000,
            default_fade_ms: 10_000,
            volume_type: VolumeType::default(),
            peak_type: PeakType::default(),
            play_forever: false,
            volume_multiplier: 1.0,
            channel_mutes: 0,
            track_mutes: 0,
            ignore_volume: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StreamOptions::default();
        assert_eq!(options.sample_rate, 44100);
        assert_eq!(options.volume_type, VolumeType::Volume);
        assert_eq!(options.peak_type, PeakType::None);
        assert!(!options.play_forever);
        assert_eq!(options.volume_multiplier, 1.0);
    }

    #[test]
    fn test_name_parsing() {
        assert_eq!(VolumeType::from_name("none"), Some(VolumeType::None));
        assert_eq!(
            VolumeType::from_name("replaygain-album"),
            Some(VolumeType::ReplayGainAlbum)
        );
        assert_eq!(VolumeType::from_name("loudness"), None);
        assert_eq!(
            PeakType::from_name("track"),
            Some(PeakType::ReplayGainTrack)
        );
    }
}
