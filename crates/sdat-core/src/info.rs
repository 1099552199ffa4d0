//! INFO-section entry records and the SYMB name table
//!
//! The INFO section carries four parallel record lists addressed by index:
//! sequences, banks, wave archives and players. Each entry stores a file-id
//! (resolved through the FAT) plus type-specific fields. The optional SYMB
//! section mirrors the same layout with NUL-terminated names.

use crate::sbnk::Sbnk;
use crate::sseq::Sseq;
use crate::swar::Swar;
use std::sync::Arc;

/// Record slot indices inside the 8-slot SYMB/INFO layout.
pub(crate) const RECORD_SEQ: usize = 0;
pub(crate) const RECORD_BANK: usize = 2;
pub(crate) const RECORD_WAVEARC: usize = 3;
pub(crate) const RECORD_PLAYER: usize = 4;

/// A sequence entry: which SSEQ to play and how.
#[derive(Debug, Clone)]
pub struct SequenceInfo {
    /// FAT file-id of the SSEQ.
    pub file_id: u16,
    /// Bank index into the bank record list.
    pub bank: u16,
    /// Initial sequence volume (0..127).
    pub volume: u8,
    /// Channel priority (unused during playback, kept for round-trip).
    pub channel_priority: u8,
    /// Player priority (unused during playback, kept for round-trip).
    pub player_priority: u8,
    /// Player index into the player record list.
    pub player_number: u8,
    /// The materialized sequence, shared read-only.
    pub sseq: Arc<Sseq>,
}

/// A bank entry: which SBNK plus up to four wave archives.
#[derive(Debug, Clone)]
pub struct BankInfo {
    /// FAT file-id of the SBNK.
    pub file_id: u16,
    /// Wave-archive indices; `0xFFFF` marks an unused slot.
    pub wave_archives: [u16; 4],
    /// The materialized bank, shared read-only.
    pub sbnk: Arc<Sbnk>,
}

/// A wave-archive entry.
#[derive(Debug, Clone)]
pub struct WaveArchiveInfo {
    /// FAT file-id of the SWAR.
    pub file_id: u16,
    /// The materialized archive, shared read-only.
    pub swar: Arc<Swar>,
}

/// A player entry. Only the channel mask matters for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    /// Maximum simultaneous sequences on this player.
    pub max_sequences: u8,
    /// Bitmask of hardware channels the player may allocate.
    pub channel_mask: u16,
    /// Driver heap size hint (kept for round-trip).
    pub heap_size: u32,
}

impl PlayerInfo {
    /// Effective allocation mask: an all-zero mask means "no restriction".
    pub fn effective_channel_mask(&self) -> u16 {
        if self.channel_mask == 0 {
            0xFFFF
        } else {
            self.channel_mask
        }
    }
}

/// Names from the optional SYMB section, parallel to the INFO lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    /// Sequence names by sequence index.
    pub sequences: Vec<Option<String>>,
    /// Bank names by bank index.
    pub banks: Vec<Option<String>>,
    /// Wave-archive names by archive index.
    pub wave_archives: Vec<Option<String>>,
    /// Player names by player index.
    pub players: Vec<Option<String>>,
}

impl SymbolTable {
    /// Name of a sequence, when the SYMB section provides one.
    pub fn sequence_name(&self, index: usize) -> Option<&str> {
        self.sequences.get(index).and_then(|n| n.as_deref())
    }
}
