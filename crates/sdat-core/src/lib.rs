//! NCSF container and Nintendo DS SDAT sound-data parsing
//!
//! This crate handles everything on disk: the PSF-style NCSF wrapper with
//! its zlib-compressed program block and tag footer, `_lib` chain overlays,
//! and the SDAT archive inside — SYMB/INFO/FAT/FILE sections and the nested
//! SSEQ (sequence), SBNK (instrument bank), SWAR/SWAV (wave archive)
//! sub-files, with all three DS wave encodings decoded to floats.
//!
//! # Quick start
//! ```no_run
//! use sdat_core::{Ncsf, Sdat};
//!
//! let bytes = std::fs::read("song.ncsf").unwrap();
//! let ncsf = Ncsf::parse(&bytes).unwrap();
//! let sdat = Sdat::parse(&ncsf.program).unwrap();
//! let seq = ncsf.sequence_number().unwrap_or(0);
//! println!("sequence {} of {}", seq, sdat.sequences.len());
//! ```
//!
//! Everything is immutable after parse; banks, archives and sequences are
//! shared through `Arc` so several players can read them concurrently.

#![warn(missing_docs)]

mod error;

pub mod bytes;
pub mod info;
pub mod ncsf;
pub mod sbnk;
pub mod sdat;
pub mod sseq;
mod subfile;
pub mod swar;
pub mod swav;
pub mod tags;

pub use error::{Result, SdatError};
pub use info::{BankInfo, PlayerInfo, SequenceInfo, SymbolTable, WaveArchiveInfo};
pub use ncsf::{Ncsf, NCSF_VERSION};
pub use sbnk::{InstrumentDefinition, InstrumentEntry, Sbnk};
pub use sdat::Sdat;
pub use sseq::Sseq;
pub use swar::Swar;
pub use swav::{decode_adpcm, decode_pcm16, decode_pcm8, Swav, WaveType};
pub use tags::TagCollection;
