//! SWAR wave archives
//!
//! A SWAR is a sparse table of SWAVs: after the shared header and 32
//! reserved bytes, a count and that many u32 offsets (absolute from the
//! file start, zero for an empty slot) point at the embedded waveforms.

use crate::bytes::{pad_to, put_u32, Reader};
use crate::subfile::{check_header, write_subfile};
use crate::swav::Swav;
use crate::{Result, SdatError};

/// A parsed wave archive.
#[derive(Debug, Clone)]
pub struct Swar {
    /// Waveforms by slot; `None` for empty slots.
    pub waves: Vec<Option<Swav>>,
}

impl Swar {
    /// Parse a SWAR file, decoding every embedded SWAV.
    pub fn parse(file: &[u8]) -> Result<Self> {
        let (payload_start, _payload_end) = check_header(file, b"SWAR", "SWAR")?;
        let mut r = Reader::new(file, "SWAR");
        r.seek(payload_start)?;
        r.bytes(32)?; // reserved
        let count = r.u32()? as usize;
        if count > 0x10000 {
            return Err(SdatError::MalformedSdat(format!(
                "SWAR wave count {} is implausible",
                count
            )));
        }
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(r.u32()? as usize);
        }

        let mut waves = Vec::with_capacity(count);
        for offset in offsets {
            if offset == 0 {
                waves.push(None);
                continue;
            }
            if offset >= file.len() {
                return Err(SdatError::MalformedSdat(format!(
                    "SWAR wave offset {:#x} beyond file end",
                    offset
                )));
            }
            waves.push(Some(Swav::parse(&file[offset..])?));
        }
        Ok(Swar { waves })
    }

    /// Waveform at `slot`, when present.
    pub fn wave(&self, slot: usize) -> Option<&Swav> {
        self.waves.get(slot).and_then(|w| w.as_ref())
    }

    /// Serialize into a complete SWAR file.
    pub fn write(&self) -> Vec<u8> {
        let table_len = 32 + 4 + self.waves.len() * 4;
        let mut blobs = Vec::new();
        let mut offsets = Vec::with_capacity(self.waves.len());
        for wave in &self.waves {
            match wave {
                None => offsets.push(0u32),
                Some(swav) => {
                    offsets.push((0x18 + table_len + blobs.len()) as u32);
                    blobs.extend_from_slice(&swav.write());
                }
            }
        }

        let mut payload = Vec::with_capacity(table_len + blobs.len());
        payload.extend_from_slice(&[0u8; 32]);
        put_u32(&mut payload, self.waves.len() as u32);
        for offset in offsets {
            put_u32(&mut payload, offset);
        }
        payload.extend_from_slice(&blobs);
        pad_to(&mut payload, 4);
        write_subfile(b"SWAR", &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swav::WaveType;

    fn pcm16_swav(samples: &[i16], loop_words: u16) -> Swav {
        let mut raw = Vec::new();
        for s in samples {
            raw.extend_from_slice(&s.to_le_bytes());
        }
        let total_words = (raw.len() / 4) as u32;
        let blob = {
            let mut b = vec![1u8, 1];
            b.extend_from_slice(&22050u16.to_le_bytes());
            b.extend_from_slice(&0x03C0u16.to_le_bytes());
            b.extend_from_slice(&loop_words.to_le_bytes());
            b.extend_from_slice(&(total_words - loop_words as u32).to_le_bytes());
            b.extend_from_slice(&raw);
            b
        };
        Swav::parse(&blob).unwrap()
    }

    #[test]
    fn test_round_trip_with_empty_slot() {
        let swar = Swar {
            waves: vec![
                Some(pcm16_swav(&[0, 0x4000, 0, -0x4000], 0)),
                None,
                Some(pcm16_swav(&[100, 200, 300, 400, 500, 600], 1)),
            ],
        };
        let file = swar.write();
        let parsed = Swar::parse(&file).unwrap();
        assert_eq!(parsed.waves.len(), 3);
        assert!(parsed.wave(1).is_none());
        assert_eq!(parsed.wave(0).unwrap().samples.len(), 4);
        assert_eq!(parsed.wave(2).unwrap().wave_type, WaveType::Pcm16);
        assert_eq!(parsed.wave(2).unwrap().loop_start, 2);
        assert_eq!(parsed.write(), file);
    }

    #[test]
    fn test_offset_out_of_range() {
        let swar = Swar {
            waves: vec![Some(pcm16_swav(&[1, 2], 0))],
        };
        let mut file = swar.write();
        // Point slot 0 beyond the end of the file.
        let table_at = 0x18 + 32 + 4;
        file[table_at..table_at + 4].copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
        assert!(Swar::parse(&file).is_err());
    }
}
