//! Nintendo DS sequenced-music playback engine for NCSF files
//!
//! This crate turns a parsed SDAT (see `sdat-core`) into audio: it
//! interprets the byte-coded SSEQ script across up to 16 tracks, emulates
//! the DS's 16 hardware channels (PCM, PSG square, noise) with their ADSR
//! envelopes, LFO and pitch sweeps, resamples through a selectable
//! interpolation kernel and mixes to stereo float.
//!
//! # Quick start
//! ```no_run
//! use ncsf_replayer::{NcsfStream, StreamOptions};
//! use sdat_core::{Ncsf, Sdat};
//! use std::io::Read;
//! use std::sync::Arc;
//!
//! let bytes = std::fs::read("song.ncsf").unwrap();
//! let ncsf = Ncsf::parse(&bytes).unwrap();
//! let sdat = Arc::new(Sdat::parse(&ncsf.program).unwrap());
//! let sequence = ncsf.sequence_number().unwrap_or(0) as usize;
//!
//! let mut stream =
//!     NcsfStream::new(sdat, sequence, &ncsf.tags, StreamOptions::default()).unwrap();
//! let mut buffer = vec![0u8; 4096];
//! while stream.read(&mut buffer).unwrap() > 0 {
//!     // feed interleaved LE f32 stereo to a sink
//! }
//! ```
//!
//! Besides the audible stream there is a timing variant
//! ([`timing::song_length`]) that measures song length without rendering,
//! and a [`replaygain::GainAnalyzer`] for loudness normalization.

#![warn(missing_docs)]

mod error;

pub mod channel;
pub mod generator;
pub mod interp;
pub mod options;
pub mod player;
pub mod random;
pub mod replaygain;
pub mod stream;
pub mod tables;
pub mod timing;
pub mod track;

pub use channel::{Channel, ChannelType, EnvelopeState};
pub use error::{ReplayerError, Result};
pub use generator::SampleGenerator;
pub use interp::Interpolation;
pub use options::{PeakType, StreamOptions, VolumeType};
pub use player::{Player, TrackEvent, TrackEventKind};
pub use replaygain::GainAnalyzer;
pub use stream::NcsfStream;
pub use timing::{song_length, LengthKind, SongLength, TimingOptions};
