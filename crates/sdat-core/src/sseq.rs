//! SSEQ sequence files
//!
//! An SSEQ wraps the byte-coded sequence script: after the shared sub-file
//! header, the DATA block holds a u32 pointing at the first opcode
//! (absolute from the file start, normally 0x1C) followed by the opcode
//! stream. Positions inside the stream are relative to that first opcode.

use crate::bytes::put_u32;
use crate::subfile::{check_header, write_subfile};
use crate::{Result, SdatError};

/// A materialized sequence: the raw opcode stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sseq {
    /// Opcode bytes; jump targets index into this slice.
    pub data: Vec<u8>,
}

impl Sseq {
    /// Parse an SSEQ file.
    pub fn parse(file: &[u8]) -> Result<Self> {
        let (payload_start, payload_end) = check_header(file, b"SSEQ", "SSEQ")?;
        if payload_end - payload_start < 4 {
            return Err(SdatError::MalformedSdat("SSEQ DATA block too small".into()));
        }
        let data_offset = u32::from_le_bytes([
            file[payload_start],
            file[payload_start + 1],
            file[payload_start + 2],
            file[payload_start + 3],
        ]) as usize;
        if data_offset < payload_start + 4 || data_offset > payload_end {
            return Err(SdatError::MalformedSdat(format!(
                "SSEQ data offset {:#x} outside DATA block",
                data_offset
            )));
        }
        Ok(Sseq {
            data: file[data_offset..payload_end].to_vec(),
        })
    }

    /// Serialize into a complete SSEQ file.
    pub fn write(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.data.len());
        // Opcodes directly follow the offset word: header (0x10) + block
        // header (0x8) + offset word (0x4) = 0x1C.
        put_u32(&mut payload, 0x1C);
        payload.extend_from_slice(&self.data);
        write_subfile(b"SSEQ", &payload)
    }
}
