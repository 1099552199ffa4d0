//! NCSF container codec
//!
//! An NCSF file is a PSF-style wrapper: `"PSF"` magic, a version byte
//! (0x25), a reserved block (for NCSF a single little-endian u32 selecting
//! the sequence to play), a zlib-compressed program block holding a
//! complete SDAT, and an optional `[TAG]` footer.
//!
//! The CRC32 field is written on output but never verified on input.
//! Decompression is a single streaming pass with a hard size limit to guard
//! against decompression bombs.

use crate::tags::{TagCollection, TAG_MARKER};
use crate::{Result, SdatError};
use std::io::Read;

/// PSF magic prefix shared by the whole xSF family.
pub const PSF_MAGIC: &[u8; 3] = b"PSF";

/// Version byte identifying an NCSF.
pub const NCSF_VERSION: u8 = 0x25;

/// Version byte identifying a 2SF (recognized, not played).
pub const TWOSF_VERSION: u8 = 0x24;

/// Maximum decompressed program size: 256 MB. Real SDATs are a few MB at
/// most; the limit guards against corrupt or hostile size fields.
const MAX_PROGRAM_SIZE: usize = 256 * 1024 * 1024;

/// Maximum `_lib` recursion depth.
const MAX_LIB_DEPTH: u32 = 10;

/// A parsed NCSF file.
#[derive(Debug, Clone)]
pub struct Ncsf {
    /// Version byte from the header (0x25 for NCSF).
    pub version: u8,
    /// Raw reserved block. For NCSF this is 4 bytes: the sequence number.
    pub reserved: Vec<u8>,
    /// Decompressed program block (an SDAT image starting at offset 0).
    pub program: Vec<u8>,
    /// Tag footer, empty when absent.
    pub tags: TagCollection,
}

impl Ncsf {
    /// Parse an NCSF (or `.ncsflib`) file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(SdatError::MalformedNcsf(format!(
                "file too short ({} bytes)",
                data.len()
            )));
        }
        if &data[0..3] != PSF_MAGIC {
            return Err(SdatError::MalformedNcsf("bad PSF magic".into()));
        }
        let version = data[3];
        if version != NCSF_VERSION {
            return Err(SdatError::MalformedNcsf(format!(
                "unexpected version byte {:#04x} (NCSF is {:#04x})",
                version, NCSF_VERSION
            )));
        }

        let reserved_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let compressed_size = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        // data[12..16] is the CRC32 of the compressed program. Present but
        // not trusted; nothing checks it.

        let reserved_end = 16usize
            .checked_add(reserved_size)
            .ok_or_else(|| SdatError::MalformedNcsf("reserved size overflow".into()))?;
        if reserved_end > data.len() {
            return Err(SdatError::MalformedNcsf("truncated reserved block".into()));
        }
        let program_end = reserved_end
            .checked_add(compressed_size)
            .ok_or_else(|| SdatError::MalformedNcsf("program size overflow".into()))?;
        if program_end > data.len() {
            return Err(SdatError::MalformedNcsf("truncated program block".into()));
        }

        let reserved = data[16..reserved_end].to_vec();
        let program = decompress_program(&data[reserved_end..program_end])?;

        let tags = parse_footer(&data[program_end..])?;

        Ok(Ncsf {
            version,
            reserved,
            program,
            tags,
        })
    }

    /// Serialize back into NCSF bytes (recompresses the program block and
    /// recomputes the CRC32).
    pub fn write(&self) -> Result<Vec<u8>> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(&self.program)
            .and_then(|_| encoder.finish())
            .map_err(|e| SdatError::DecompressionError(format!("zlib compression failed: {}", e)))
            .map(|compressed| {
                let mut crc = flate2::Crc::new();
                crc.update(&compressed);

                let mut out = Vec::with_capacity(16 + self.reserved.len() + compressed.len());
                out.extend_from_slice(PSF_MAGIC);
                out.push(self.version);
                out.extend_from_slice(&(self.reserved.len() as u32).to_le_bytes());
                out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
                out.extend_from_slice(&crc.sum().to_le_bytes());
                out.extend_from_slice(&self.reserved);
                out.extend_from_slice(&compressed);
                if !self.tags.is_empty() {
                    out.extend_from_slice(&self.tags.write());
                }
                out
            })
    }

    /// Sequence number from the reserved block (little-endian u32), when
    /// the block is large enough to carry one.
    pub fn sequence_number(&self) -> Option<u32> {
        if self.reserved.len() >= 4 {
            Some(u32::from_le_bytes([
                self.reserved[0],
                self.reserved[1],
                self.reserved[2],
                self.reserved[3],
            ]))
        } else {
            None
        }
    }

    /// Build the effective SDAT image by overlaying `_lib` chains.
    ///
    /// `load` maps a library file name (the tag value) to that sibling
    /// file's raw bytes. Overlay order: `_lib` (recursively, depth-first,
    /// at most 10 levels), then `_lib2`, `_lib3`, … ascending, then this
    /// file's own program; later writes overwrite earlier bytes.
    ///
    /// With `missing_ok`, libraries that fail to load are skipped instead
    /// of aborting (used when reading partial sets for tag propagation).
    pub fn resolve_program<F>(&self, load: &mut F, missing_ok: bool) -> Result<Vec<u8>>
    where
        F: FnMut(&str) -> Result<Vec<u8>>,
    {
        let mut image = Vec::new();
        self.overlay_into(&mut image, load, missing_ok, 0)?;
        Ok(image)
    }

    fn overlay_into<F>(
        &self,
        image: &mut Vec<u8>,
        load: &mut F,
        missing_ok: bool,
        depth: u32,
    ) -> Result<()>
    where
        F: FnMut(&str) -> Result<Vec<u8>>,
    {
        if depth >= MAX_LIB_DEPTH {
            return Err(SdatError::MalformedNcsf(format!(
                "_lib chain deeper than {} levels",
                MAX_LIB_DEPTH
            )));
        }
        for name in self.tags.lib_chain() {
            let bytes = match load(&name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    if missing_ok {
                        continue;
                    }
                    return Err(SdatError::MissingFile(format!("{}: {}", name, e)));
                }
            };
            let lib = Ncsf::parse(&bytes)?;
            lib.overlay_into(image, load, missing_ok, depth + 1)?;
        }
        overlay(image, &self.program);
        Ok(())
    }
}

/// Overwrite `image` with `src` starting at offset 0, growing as needed.
fn overlay(image: &mut Vec<u8>, src: &[u8]) {
    if image.len() < src.len() {
        image.resize(src.len(), 0);
    }
    image[..src.len()].copy_from_slice(src);
}

fn decompress_program(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    let mut program = Vec::new();
    decoder
        .by_ref()
        .take(MAX_PROGRAM_SIZE as u64)
        .read_to_end(&mut program)
        .map_err(|e| SdatError::DecompressionError(format!("zlib inflate failed: {}", e)))?;
    if program.len() >= MAX_PROGRAM_SIZE {
        return Err(SdatError::DecompressionError(
            "decompressed program exceeds the 256MB safety limit".into(),
        ));
    }
    Ok(program)
}

fn parse_footer(rest: &[u8]) -> Result<TagCollection> {
    if rest.len() >= TAG_MARKER.len() && &rest[..TAG_MARKER.len()] == TAG_MARKER {
        TagCollection::parse(&rest[TAG_MARKER.len()..])
    } else {
        Ok(TagCollection::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ncsf() -> Ncsf {
        let mut tags = TagCollection::new();
        tags.set("title", "Hi");
        tags.set("length", "1:30");
        Ncsf {
            version: NCSF_VERSION,
            reserved: 7u32.to_le_bytes().to_vec(),
            program: b"SDAT-shaped payload for round trip".to_vec(),
            tags,
        }
    }

    #[test]
    fn test_round_trip() {
        let original = sample_ncsf();
        let bytes = original.write().unwrap();
        let parsed = Ncsf::parse(&bytes).unwrap();
        assert_eq!(parsed.reserved, original.reserved);
        assert_eq!(parsed.program, original.program);
        assert_eq!(parsed.tags, original.tags);
        assert_eq!(parsed.sequence_number(), Some(7));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = sample_ncsf().write().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            Ncsf::parse(&bytes),
            Err(SdatError::MalformedNcsf(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut bytes = sample_ncsf().write().unwrap();
        bytes[3] = TWOSF_VERSION;
        assert!(Ncsf::parse(&bytes).is_err());
    }

    #[test]
    fn test_rejects_truncated_program() {
        let bytes = sample_ncsf().write().unwrap();
        assert!(Ncsf::parse(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_short_file() {
        assert!(Ncsf::parse(b"PSF").is_err());
    }

    #[test]
    fn test_crc_is_not_verified() {
        let mut bytes = sample_ncsf().write().unwrap();
        // Corrupt the CRC field; parsing must not care.
        bytes[12] ^= 0xFF;
        assert!(Ncsf::parse(&bytes).is_ok());
    }

    #[test]
    fn test_lib_overlay() {
        // Library B carries the full program; A overlays nothing of its own
        // beyond a short prefix.
        let lib = Ncsf {
            version: NCSF_VERSION,
            reserved: Vec::new(),
            program: b"LIBRARY-PROGRAM-BYTES".to_vec(),
            tags: TagCollection::new(),
        };
        let lib_bytes = lib.write().unwrap();

        let mut tags = TagCollection::new();
        tags.set("_lib", "b.ncsflib");
        let a = Ncsf {
            version: NCSF_VERSION,
            reserved: 7u32.to_le_bytes().to_vec(),
            program: b"AA".to_vec(),
            tags,
        };

        let resolved = a
            .resolve_program(
                &mut |name: &str| {
                    assert_eq!(name, "b.ncsflib");
                    Ok(lib_bytes.clone())
                },
                false,
            )
            .unwrap();
        // A's own 2 bytes overwrite the head of the library image.
        assert_eq!(&resolved[..2], b"AA");
        assert_eq!(&resolved[2..], &b"LIBRARY-PROGRAM-BYTES"[2..]);
    }

    #[test]
    fn test_missing_lib_skip_or_fail() {
        let mut tags = TagCollection::new();
        tags.set("_lib", "gone.ncsflib");
        let a = Ncsf {
            version: NCSF_VERSION,
            reserved: Vec::new(),
            program: b"OWN".to_vec(),
            tags,
        };
        let mut fail_load = |_: &str| -> Result<Vec<u8>> { Err("not found".into()) };
        assert!(a.resolve_program(&mut fail_load, false).is_err());
        let resolved = a.resolve_program(&mut fail_load, true).unwrap();
        assert_eq!(resolved, b"OWN");
    }
}
