//! SBNK instrument banks
//!
//! A bank is an ordered list of instrument entries. Entry headers pack a
//! record type and a payload offset into one u32 (type in the low byte,
//! offset from the file start in the upper 24 bits). Records 1/2/3/5 carry
//! a single 10-byte definition; record 16 is a drum table covering a
//! contiguous key range; record 17 is a key split with up to eight
//! ascending high-key boundaries, terminated by the first zero.

use crate::bytes::{pad_to, put_u16, put_u32, Reader};
use crate::subfile::{check_header, write_subfile};
use crate::{Result, SdatError};

/// Instrument record types as stored in entry headers.
pub const RECORD_EMPTY: u8 = 0;
/// Sampled PCM instrument.
pub const RECORD_PCM: u8 = 1;
/// PSG square-wave instrument.
pub const RECORD_PSG: u8 = 2;
/// White-noise instrument.
pub const RECORD_NOISE: u8 = 3;
/// Placeholder record; notes played on it are dropped.
pub const RECORD_DUMMY: u8 = 5;
/// Per-key drum table.
pub const RECORD_DRUM_TABLE: u8 = 16;
/// Key-split region table.
pub const RECORD_KEY_SPLIT: u8 = 17;

/// One playable instrument definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentDefinition {
    /// Record type (1 PCM, 2 PSG, 3 noise; others drop the note).
    pub record: u16,
    /// SWAV index (PCM) or PSG duty cycle.
    pub swav: u16,
    /// SWAR slot index (PCM).
    pub swar: u16,
    /// Root MIDI key the sample was recorded at.
    pub note: u8,
    /// Attack rate byte.
    pub attack: u8,
    /// Decay rate byte.
    pub decay: u8,
    /// Sustain level byte.
    pub sustain: u8,
    /// Release rate byte.
    pub release: u8,
    /// Pan byte (64 = center).
    pub pan: u8,
}

/// One entry of the bank's instrument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentEntry {
    /// Unused slot.
    Empty,
    /// Records 1/2/3/5: one definition for the whole key range.
    Single(InstrumentDefinition),
    /// Record 16: one definition per key in `low..=high`.
    DrumTable {
        /// Lowest covered MIDI key.
        low: u8,
        /// Highest covered MIDI key.
        high: u8,
        /// `high - low + 1` definitions.
        defs: Vec<InstrumentDefinition>,
    },
    /// Record 17: ascending boundary keys, one definition per region.
    KeySplit {
        /// Ascending high-key boundaries (1..=8 of them).
        regions: Vec<u8>,
        /// One definition per boundary.
        defs: Vec<InstrumentDefinition>,
    },
}

/// A parsed sound bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sbnk {
    /// Instrument entries addressed by program number.
    pub instruments: Vec<InstrumentEntry>,
}

impl Sbnk {
    /// Parse an SBNK file.
    pub fn parse(file: &[u8]) -> Result<Self> {
        let (payload_start, _payload_end) = check_header(file, b"SBNK", "SBNK")?;
        let mut r = Reader::new(file, "SBNK");
        r.seek(payload_start)?;
        r.bytes(32)?; // reserved
        let count = r.u32()? as usize;
        if count > 0x10000 {
            return Err(SdatError::MalformedSdat(format!(
                "SBNK instrument count {} is implausible",
                count
            )));
        }

        let mut headers = Vec::with_capacity(count);
        for _ in 0..count {
            let packed = r.u32()?;
            headers.push((packed as u8, (packed >> 8) as usize));
        }

        let mut instruments = Vec::with_capacity(count);
        for (record, offset) in headers {
            instruments.push(Self::parse_entry(file, record, offset)?);
        }
        Ok(Sbnk { instruments })
    }

    fn parse_entry(file: &[u8], record: u8, offset: usize) -> Result<InstrumentEntry> {
        if record == RECORD_EMPTY || offset == 0 {
            return Ok(InstrumentEntry::Empty);
        }
        let mut r = Reader::new(file, "SBNK");
        r.seek(offset)?;
        match record {
            RECORD_PCM | RECORD_PSG | RECORD_NOISE | RECORD_DUMMY | 4 => {
                Ok(InstrumentEntry::Single(Self::parse_definition(
                    &mut r,
                    record as u16,
                )?))
            }
            RECORD_DRUM_TABLE => {
                let low = r.u8()?;
                let high = r.u8()?;
                if high < low {
                    return Err(SdatError::MalformedSdat(format!(
                        "SBNK drum table range {}..{} is inverted",
                        low, high
                    )));
                }
                let mut defs = Vec::with_capacity((high - low) as usize + 1);
                for _ in low..=high {
                    let rec = r.u16()?;
                    defs.push(Self::parse_definition(&mut r, rec)?);
                }
                Ok(InstrumentEntry::DrumTable { low, high, defs })
            }
            RECORD_KEY_SPLIT => {
                let raw_regions = r.bytes(8)?;
                let used = raw_regions
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(raw_regions.len());
                let regions = raw_regions[..used].to_vec();
                let mut defs = Vec::with_capacity(used);
                for _ in 0..used {
                    let rec = r.u16()?;
                    defs.push(Self::parse_definition(&mut r, rec)?);
                }
                Ok(InstrumentEntry::KeySplit { regions, defs })
            }
            other => Err(SdatError::MalformedSdat(format!(
                "SBNK unknown instrument record {}",
                other
            ))),
        }
    }

    fn parse_definition(r: &mut Reader, record: u16) -> Result<InstrumentDefinition> {
        Ok(InstrumentDefinition {
            record,
            swav: r.u16()?,
            swar: r.u16()?,
            note: r.u8()?,
            attack: r.u8()?,
            decay: r.u8()?,
            sustain: r.u8()?,
            release: r.u8()?,
            pan: r.u8()?,
        })
    }

    /// Resolve a program number and MIDI key to a definition.
    ///
    /// Drum tables miss when the key is outside `low..=high`; key splits
    /// miss when the key is above every boundary. A miss drops the note.
    pub fn instrument_for(&self, program: usize, key: u8) -> Option<&InstrumentDefinition> {
        match self.instruments.get(program)? {
            InstrumentEntry::Empty => None,
            InstrumentEntry::Single(def) => Some(def),
            InstrumentEntry::DrumTable { low, high, defs } => {
                if key < *low || key > *high {
                    return None;
                }
                defs.get((key - low) as usize)
            }
            InstrumentEntry::KeySplit { regions, defs } => {
                let idx = regions.iter().position(|&limit| key <= limit)?;
                defs.get(idx)
            }
        }
    }

    /// Serialize into a complete SBNK file.
    pub fn write(&self) -> Vec<u8> {
        // Entry table first, payloads after; offsets are absolute from the
        // file start (header 0x10 + block header 0x8 + payload position).
        let table_len = 32 + 4 + self.instruments.len() * 4;
        let mut payloads = Vec::new();
        let mut headers = Vec::with_capacity(self.instruments.len());
        for entry in &self.instruments {
            let offset = 0x18 + table_len + payloads.len();
            match entry {
                InstrumentEntry::Empty => headers.push(0u32),
                InstrumentEntry::Single(def) => {
                    headers.push(def.record as u32 | (offset as u32) << 8);
                    Self::write_definition(&mut payloads, def, false);
                }
                InstrumentEntry::DrumTable { low, high, defs } => {
                    headers.push(RECORD_DRUM_TABLE as u32 | (offset as u32) << 8);
                    payloads.push(*low);
                    payloads.push(*high);
                    for def in defs {
                        Self::write_definition(&mut payloads, def, true);
                    }
                }
                InstrumentEntry::KeySplit { regions, defs } => {
                    headers.push(RECORD_KEY_SPLIT as u32 | (offset as u32) << 8);
                    let mut raw = [0u8; 8];
                    raw[..regions.len()].copy_from_slice(regions);
                    payloads.extend_from_slice(&raw);
                    for def in defs {
                        Self::write_definition(&mut payloads, def, true);
                    }
                }
            }
        }

        let mut payload = Vec::with_capacity(table_len + payloads.len());
        payload.extend_from_slice(&[0u8; 32]);
        put_u32(&mut payload, self.instruments.len() as u32);
        for header in headers {
            put_u32(&mut payload, header);
        }
        payload.extend_from_slice(&payloads);
        pad_to(&mut payload, 4);
        write_subfile(b"SBNK", &payload)
    }

    fn write_definition(out: &mut Vec<u8>, def: &InstrumentDefinition, with_record: bool) {
        if with_record {
            put_u16(out, def.record);
        }
        put_u16(out, def.swav);
        put_u16(out, def.swar);
        out.push(def.note);
        out.push(def.attack);
        out.push(def.decay);
        out.push(def.sustain);
        out.push(def.release);
        out.push(def.pan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(record: u16, swav: u16, note: u8) -> InstrumentDefinition {
        InstrumentDefinition {
            record,
            swav,
            swar: 0,
            note,
            attack: 127,
            decay: 127,
            sustain: 127,
            release: 127,
            pan: 64,
        }
    }

    fn sample_bank() -> Sbnk {
        Sbnk {
            instruments: vec![
                InstrumentEntry::Single(def(RECORD_PCM as u16, 0, 60)),
                InstrumentEntry::Empty,
                InstrumentEntry::DrumTable {
                    low: 36,
                    high: 38,
                    defs: vec![
                        def(RECORD_PCM as u16, 1, 36),
                        def(RECORD_PCM as u16, 2, 37),
                        def(RECORD_NOISE as u16, 0, 38),
                    ],
                },
                InstrumentEntry::KeySplit {
                    regions: vec![60, 90, 127],
                    defs: vec![
                        def(RECORD_PCM as u16, 3, 48),
                        def(RECORD_PCM as u16, 4, 72),
                        def(RECORD_PSG as u16, 2, 96),
                    ],
                },
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let bank = sample_bank();
        let file = bank.write();
        let parsed = Sbnk::parse(&file).unwrap();
        assert_eq!(parsed, bank);
        // Normal form is stable
        assert_eq!(parsed.write(), file);
    }

    #[test]
    fn test_single_lookup_ignores_key() {
        let bank = sample_bank();
        assert_eq!(bank.instrument_for(0, 0).unwrap().swav, 0);
        assert_eq!(bank.instrument_for(0, 127).unwrap().swav, 0);
    }

    #[test]
    fn test_empty_and_out_of_range_program() {
        let bank = sample_bank();
        assert!(bank.instrument_for(1, 60).is_none());
        assert!(bank.instrument_for(99, 60).is_none());
    }

    #[test]
    fn test_drum_table_lookup() {
        let bank = sample_bank();
        assert_eq!(bank.instrument_for(2, 36).unwrap().swav, 1);
        assert_eq!(bank.instrument_for(2, 37).unwrap().swav, 2);
        assert_eq!(
            bank.instrument_for(2, 38).unwrap().record,
            RECORD_NOISE as u16
        );
        assert!(bank.instrument_for(2, 35).is_none());
        assert!(bank.instrument_for(2, 39).is_none());
    }

    #[test]
    fn test_key_split_lookup() {
        let bank = sample_bank();
        assert_eq!(bank.instrument_for(3, 0).unwrap().swav, 3);
        assert_eq!(bank.instrument_for(3, 60).unwrap().swav, 3);
        assert_eq!(bank.instrument_for(3, 61).unwrap().swav, 4);
        assert_eq!(bank.instrument_for(3, 127).unwrap().record, RECORD_PSG as u16);
    }

    #[test]
    fn test_key_split_zero_terminated() {
        let bank = Sbnk {
            instruments: vec![InstrumentEntry::KeySplit {
                regions: vec![64],
                defs: vec![def(RECORD_PCM as u16, 9, 64)],
            }],
        };
        let parsed = Sbnk::parse(&bank.write()).unwrap();
        assert_eq!(parsed, bank);
        assert!(parsed.instrument_for(0, 65).is_none());
    }

    #[test]
    fn test_inverted_drum_range_rejected() {
        let bank = Sbnk {
            instruments: vec![InstrumentEntry::DrumTable {
                low: 50,
                high: 40,
                defs: Vec::new(),
            }],
        };
        // Hand-corrupt: the writer would loop 50..=40 (empty), producing a
        // table the parser rejects on range check.
        assert!(Sbnk::parse(&bank.write()).is_err());
    }
}
