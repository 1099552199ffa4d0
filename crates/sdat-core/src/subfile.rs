//! Shared NDS sound sub-file framing
//!
//! SSEQ, SBNK and SWAR all start with the same 16-byte header (magic,
//! 0xFEFF byte-order mark, version 0x0100, file size, header size 0x10,
//! block count 1) followed by a single DATA block.

use crate::bytes::{pad_to, put_u16, put_u32, Reader};
use crate::{Result, SdatError};

/// Byte-order mark shared by all DS sound files.
pub(crate) const BOM: u16 = 0xFEFF;

/// File format version shared by all DS sound files.
pub(crate) const VERSION: u16 = 0x0100;

/// Validate the sub-file header and DATA block.
///
/// Returns `(payload_start, payload_end)` — the DATA block body offsets
/// within `data`. Offsets stored inside the payload are absolute from the
/// start of the file, so callers keep indexing the full slice.
pub(crate) fn check_header(data: &[u8], magic: &[u8; 4], what: &'static str) -> Result<(usize, usize)> {
    let mut r = Reader::new(data, what);
    r.magic(magic)?;
    let bom = r.u16()?;
    if bom != BOM {
        return Err(SdatError::MalformedSdat(format!(
            "{} bad byte-order mark {:#06x}",
            what, bom
        )));
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(SdatError::MalformedSdat(format!(
            "{} unsupported version {:#06x}",
            what, version
        )));
    }
    let file_size = r.u32()? as usize;
    if file_size > data.len() {
        return Err(SdatError::MalformedSdat(format!(
            "{} declares {} bytes but only {} are present",
            what,
            file_size,
            data.len()
        )));
    }
    let header_size = r.u16()? as usize;
    let _blocks = r.u16()?;
    if header_size < 16 || header_size >= file_size {
        return Err(SdatError::MalformedSdat(format!(
            "{} bad header size {:#x}",
            what, header_size
        )));
    }

    r.seek(header_size)?;
    r.magic(b"DATA")?;
    let block_size = r.u32()? as usize;
    let payload_start = header_size + 8;
    let payload_end = header_size
        .checked_add(block_size)
        .ok_or_else(|| SdatError::MalformedSdat(format!("{} DATA size overflow", what)))?;
    if block_size < 8 || payload_end > file_size {
        return Err(SdatError::MalformedSdat(format!(
            "{} DATA block escapes the file ({} bytes at {:#x})",
            what, block_size, header_size
        )));
    }
    Ok((payload_start, payload_end))
}

/// Frame a DATA payload into a complete sub-file, padded to 4 bytes.
pub(crate) fn write_subfile(magic: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut block = payload.to_vec();
    pad_to(&mut block, 4);
    let block_size = 8 + block.len();
    let file_size = 16 + block_size;

    let mut out = Vec::with_capacity(file_size);
    out.extend_from_slice(magic);
    put_u16(&mut out, BOM);
    put_u16(&mut out, VERSION);
    put_u32(&mut out, file_size as u32);
    put_u16(&mut out, 16);
    put_u16(&mut out, 1);
    out.extend_from_slice(b"DATA");
    put_u32(&mut out, block_size as u32);
    out.extend_from_slice(&block);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_and_check() {
        let file = write_subfile(b"SSEQ", &[1, 2, 3, 4, 5]);
        let (start, end) = check_header(&file, b"SSEQ", "SSEQ").unwrap();
        assert_eq!(&file[start..start + 5], &[1, 2, 3, 4, 5]);
        // Padded to a 4-byte boundary
        assert_eq!((end - start) % 4, 0);
    }

    #[test]
    fn test_wrong_magic() {
        let file = write_subfile(b"SSEQ", &[0; 4]);
        assert!(check_header(&file, b"SBNK", "SBNK").is_err());
    }

    #[test]
    fn test_truncated() {
        let file = write_subfile(b"SWAR", &[0; 16]);
        assert!(check_header(&file[..20], b"SWAR", "SWAR").is_err());
    }
}
