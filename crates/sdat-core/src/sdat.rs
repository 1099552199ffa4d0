//! SDAT archive parsing and writing
//!
//! Layout: a 0x40-byte header with four `(offset, size)` pairs pointing at
//! the optional SYMB section, INFO, FAT and FILE. SYMB and INFO share the
//! same 8-slot record layout; only the sequence, bank, wave-archive and
//! player slots are materialized. Every file-id referenced from INFO must
//! resolve to a FAT record whose extent lies inside the FILE region.
//!
//! Parsing is eager: each referenced SSEQ/SBNK/SWAR is decoded up front and
//! shared immutably, so a parsed `Sdat` never changes during playback.

use crate::bytes::{pad_to, put_u16, put_u32, Reader};
use crate::info::{
    BankInfo, PlayerInfo, SequenceInfo, SymbolTable, WaveArchiveInfo, RECORD_BANK, RECORD_PLAYER,
    RECORD_SEQ, RECORD_WAVEARC,
};
use crate::sbnk::Sbnk;
use crate::sseq::Sseq;
use crate::swar::Swar;
use crate::{Result, SdatError};
use std::collections::HashMap;
use std::sync::Arc;

const SDAT_MAGIC: &[u8; 4] = b"SDAT";
const HEADER_SIZE: usize = 0x40;

/// A parsed SDAT archive.
#[derive(Debug, Clone, Default)]
pub struct Sdat {
    /// Names from the optional SYMB section.
    pub symbols: Option<SymbolTable>,
    /// Sequence entries by sequence number; `None` for null slots.
    pub sequences: Vec<Option<SequenceInfo>>,
    /// Bank entries by bank index.
    pub banks: Vec<Option<BankInfo>>,
    /// Wave-archive entries by archive index.
    pub wave_archives: Vec<Option<WaveArchiveInfo>>,
    /// Player entries by player index.
    pub players: Vec<Option<PlayerInfo>>,
    /// Raw FAT file blobs by file-id, kept for byte-exact re-serialization.
    pub files: Vec<Vec<u8>>,
}

impl Sdat {
    /// Parse an SDAT image (e.g. a decompressed NCSF program section).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "SDAT");
        r.magic(SDAT_MAGIC)?;
        let bom = r.u16()?;
        let version = r.u16()?;
        if bom != 0xFEFF || version != 0x0100 {
            return Err(SdatError::MalformedSdat(format!(
                "bad byte-order/version words {:#06x}/{:#06x}",
                bom, version
            )));
        }
        let declared_size = r.u32()? as usize;
        if declared_size > data.len() {
            return Err(SdatError::MalformedSdat(format!(
                "declares {} bytes but only {} are present",
                declared_size,
                data.len()
            )));
        }
        let header_size = r.u16()? as usize;
        let blocks = r.u16()?;
        if header_size != HEADER_SIZE || !(3..=4).contains(&blocks) {
            return Err(SdatError::MalformedSdat(format!(
                "unexpected header size {:#x} / block count {}",
                header_size, blocks
            )));
        }

        let mut sections = [(0usize, 0usize); 4];
        for section in &mut sections {
            let offset = r.u32()? as usize;
            let size = r.u32()? as usize;
            let end = offset
                .checked_add(size)
                .ok_or_else(|| SdatError::MalformedSdat("section extent overflow".into()))?;
            if end > data.len() {
                return Err(SdatError::MalformedSdat(format!(
                    "section {:#x}+{:#x} escapes the file",
                    offset, size
                )));
            }
            *section = (offset, size);
        }
        let [symb, info, fat, file] = sections;
        if info.1 == 0 || fat.1 == 0 || file.1 == 0 {
            return Err(SdatError::MalformedSdat(
                "INFO, FAT and FILE sections are mandatory".into(),
            ));
        }

        let files = parse_fat(data, fat, file)?;
        let mut sdat = Sdat {
            symbols: None,
            sequences: Vec::new(),
            banks: Vec::new(),
            wave_archives: Vec::new(),
            players: Vec::new(),
            files,
        };
        parse_info(data, info, &mut sdat)?;
        if symb.0 != 0 && symb.1 != 0 {
            sdat.symbols = Some(parse_symb(data, symb)?);
        }
        Ok(sdat)
    }

    /// Sequence entry by sequence number.
    pub fn sequence(&self, index: usize) -> Option<&SequenceInfo> {
        self.sequences.get(index).and_then(|s| s.as_ref())
    }

    /// Bank entry by bank index.
    pub fn bank(&self, index: usize) -> Option<&BankInfo> {
        self.banks.get(index).and_then(|b| b.as_ref())
    }

    /// Wave-archive entry by archive index.
    pub fn wave_archive(&self, index: usize) -> Option<&WaveArchiveInfo> {
        self.wave_archives.get(index).and_then(|w| w.as_ref())
    }

    /// Player entry by player index.
    pub fn player(&self, index: usize) -> Option<&PlayerInfo> {
        self.players.get(index).and_then(|p| p.as_ref())
    }

    /// Serialize into a normalized SDAT image.
    ///
    /// Offsets and sizes are recomputed from scratch and every section is
    /// padded to a 4-byte boundary, so `write(parse(x))` is byte-stable.
    pub fn write(&self) -> Vec<u8> {
        let symb = self.symbols.as_ref().map(write_symb);
        let info = write_info(self);

        // FAT needs absolute file offsets, which depend on every earlier
        // section's size; lay the sections out first.
        let symb_len = symb.as_ref().map_or(0, |s| s.len());
        let info_offset = HEADER_SIZE + symb_len;
        let fat_len = 12 + self.files.len() * 16;
        let file_offset = info_offset + info.len() + fat_len;

        let mut file_section = Vec::new();
        file_section.extend_from_slice(b"FILE");
        put_u32(&mut file_section, 0); // patched below
        put_u32(&mut file_section, self.files.len() as u32);
        put_u32(&mut file_section, 0);
        let mut fat_records = Vec::with_capacity(self.files.len());
        for blob in &self.files {
            pad_to(&mut file_section, 4);
            fat_records.push((file_offset + file_section.len(), blob.len()));
            file_section.extend_from_slice(blob);
        }
        pad_to(&mut file_section, 4);
        let file_size = file_section.len() as u32;
        file_section[4..8].copy_from_slice(&file_size.to_le_bytes());

        let mut fat = Vec::with_capacity(fat_len);
        fat.extend_from_slice(b"FAT ");
        put_u32(&mut fat, fat_len as u32);
        put_u32(&mut fat, self.files.len() as u32);
        for (offset, size) in fat_records {
            put_u32(&mut fat, offset as u32);
            put_u32(&mut fat, size as u32);
            fat.extend_from_slice(&[0u8; 8]);
        }

        let total = file_offset + file_section.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(SDAT_MAGIC);
        put_u16(&mut out, 0xFEFF);
        put_u16(&mut out, 0x0100);
        put_u32(&mut out, total as u32);
        put_u16(&mut out, HEADER_SIZE as u16);
        put_u16(&mut out, if symb.is_some() { 4 } else { 3 });
        match &symb {
            Some(s) => {
                put_u32(&mut out, HEADER_SIZE as u32);
                put_u32(&mut out, s.len() as u32);
            }
            None => {
                put_u32(&mut out, 0);
                put_u32(&mut out, 0);
            }
        }
        put_u32(&mut out, info_offset as u32);
        put_u32(&mut out, info.len() as u32);
        put_u32(&mut out, (info_offset + info.len()) as u32);
        put_u32(&mut out, fat_len as u32);
        put_u32(&mut out, file_offset as u32);
        put_u32(&mut out, file_section.len() as u32);
        while out.len() < HEADER_SIZE {
            out.push(0);
        }
        if let Some(s) = symb {
            out.extend_from_slice(&s);
        }
        out.extend_from_slice(&info);
        out.extend_from_slice(&fat);
        out.extend_from_slice(&file_section);
        out
    }
}

fn parse_fat(data: &[u8], fat: (usize, usize), file: (usize, usize)) -> Result<Vec<Vec<u8>>> {
    let section = &data[fat.0..fat.0 + fat.1];
    let mut r = Reader::new(section, "FAT");
    r.magic(b"FAT ")?;
    let declared = r.u32()? as usize;
    if declared > fat.1 {
        return Err(SdatError::MalformedSdat("FAT size exceeds its section".into()));
    }
    let count = r.u32()? as usize;
    if count > 0x10000 {
        return Err(SdatError::MalformedSdat(format!(
            "FAT count {} is implausible",
            count
        )));
    }
    let mut files = Vec::with_capacity(count);
    for id in 0..count {
        let offset = r.u32()? as usize;
        let size = r.u32()? as usize;
        r.bytes(8)?; // reserved
        let end = offset
            .checked_add(size)
            .ok_or_else(|| SdatError::MalformedSdat("FAT extent overflow".into()))?;
        // Every file must live inside the FILE region.
        if offset < file.0 || end > file.0 + file.1 {
            return Err(SdatError::MalformedSdat(format!(
                "file {} at {:#x}+{:#x} escapes the FILE region",
                id, offset, size
            )));
        }
        files.push(data[offset..end].to_vec());
    }
    Ok(files)
}

/// Read the 8-slot record offset table shared by SYMB and INFO.
fn record_offsets(section: &[u8], what: &'static str) -> Result<[usize; 8]> {
    let mut r = Reader::new(section, what);
    r.magic(if what == "SYMB" { b"SYMB" } else { b"INFO" })?;
    let declared = r.u32()? as usize;
    if declared > section.len() {
        return Err(SdatError::MalformedSdat(format!(
            "{} size exceeds its section",
            what
        )));
    }
    let mut offsets = [0usize; 8];
    for slot in &mut offsets {
        *slot = r.u32()? as usize;
    }
    Ok(offsets)
}

/// Read a record's entry-offset list (`count` then `count` u32s).
fn entry_offsets(section: &[u8], record_offset: usize, what: &'static str) -> Result<Vec<usize>> {
    if record_offset == 0 {
        return Ok(Vec::new());
    }
    let mut r = Reader::new(section, what);
    r.seek(record_offset)?;
    let count = r.u32()? as usize;
    if count > 0x10000 {
        return Err(SdatError::MalformedSdat(format!(
            "{} record count {} is implausible",
            what, count
        )));
    }
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(r.u32()? as usize);
    }
    Ok(offsets)
}

/// Resolve a file-id against the materialized FAT blobs.
fn file_blob(files: &[Vec<u8>], id: u16) -> Result<&[u8]> {
    files.get(id as usize).map(|f| f.as_slice()).ok_or_else(|| {
        SdatError::MalformedSdat(format!("file-id {} not present in the FAT", id))
    })
}

fn parse_info(data: &[u8], info: (usize, usize), sdat: &mut Sdat) -> Result<()> {
    let section = &data[info.0..info.0 + info.1];
    let offsets = record_offsets(section, "INFO")?;

    // Parse leaves first so sequences can assume their bank exists.
    let mut swar_cache: HashMap<u16, Arc<Swar>> = HashMap::new();
    for entry in entry_offsets(section, offsets[RECORD_WAVEARC], "INFO")? {
        if entry == 0 {
            sdat.wave_archives.push(None);
            continue;
        }
        let mut r = Reader::new(section, "INFO");
        r.seek(entry)?;
        let file_id = r.u16()?;
        let _unknown = r.u16()?;
        let swar = match swar_cache.get(&file_id) {
            Some(shared) => shared.clone(),
            None => {
                let parsed = Arc::new(Swar::parse(file_blob(&sdat.files, file_id)?)?);
                swar_cache.insert(file_id, parsed.clone());
                parsed
            }
        };
        sdat.wave_archives
            .push(Some(WaveArchiveInfo { file_id, swar }));
    }

    let mut sbnk_cache: HashMap<u16, Arc<Sbnk>> = HashMap::new();
    for entry in entry_offsets(section, offsets[RECORD_BANK], "INFO")? {
        if entry == 0 {
            sdat.banks.push(None);
            continue;
        }
        let mut r = Reader::new(section, "INFO");
        r.seek(entry)?;
        let file_id = r.u16()?;
        let _unknown = r.u16()?;
        let wave_archives = [r.u16()?, r.u16()?, r.u16()?, r.u16()?];
        let sbnk = match sbnk_cache.get(&file_id) {
            Some(shared) => shared.clone(),
            None => {
                let parsed = Arc::new(Sbnk::parse(file_blob(&sdat.files, file_id)?)?);
                sbnk_cache.insert(file_id, parsed.clone());
                parsed
            }
        };
        sdat.banks.push(Some(BankInfo {
            file_id,
            wave_archives,
            sbnk,
        }));
    }

    let mut sseq_cache: HashMap<u16, Arc<Sseq>> = HashMap::new();
    for entry in entry_offsets(section, offsets[RECORD_SEQ], "INFO")? {
        if entry == 0 {
            sdat.sequences.push(None);
            continue;
        }
        let mut r = Reader::new(section, "INFO");
        r.seek(entry)?;
        let file_id = r.u16()?;
        let _unknown = r.u16()?;
        let bank = r.u16()?;
        let volume = r.u8()?;
        let channel_priority = r.u8()?;
        let player_priority = r.u8()?;
        let player_number = r.u8()?;
        let sseq = match sseq_cache.get(&file_id) {
            Some(shared) => shared.clone(),
            None => {
                let parsed = Arc::new(Sseq::parse(file_blob(&sdat.files, file_id)?)?);
                sseq_cache.insert(file_id, parsed.clone());
                parsed
            }
        };
        sdat.sequences.push(Some(SequenceInfo {
            file_id,
            bank,
            volume,
            channel_priority,
            player_priority,
            player_number,
            sseq,
        }));
    }

    for entry in entry_offsets(section, offsets[RECORD_PLAYER], "INFO")? {
        if entry == 0 {
            sdat.players.push(None);
            continue;
        }
        let mut r = Reader::new(section, "INFO");
        r.seek(entry)?;
        let max_sequences = r.u8()?;
        let _padding = r.u8()?;
        let channel_mask = r.u16()?;
        let heap_size = r.u32()?;
        sdat.players.push(Some(PlayerInfo {
            max_sequences,
            channel_mask,
            heap_size,
        }));
    }
    Ok(())
}

fn parse_symb(data: &[u8], symb: (usize, usize)) -> Result<SymbolTable> {
    let section = &data[symb.0..symb.0 + symb.1];
    let offsets = record_offsets(section, "SYMB")?;

    let names = |slot: usize| -> Result<Vec<Option<String>>> {
        let mut out = Vec::new();
        for entry in entry_offsets(section, offsets[slot], "SYMB")? {
            if entry == 0 {
                out.push(None);
                continue;
            }
            let mut r = Reader::new(section, "SYMB");
            r.seek(entry)?;
            out.push(Some(r.cstring()?));
        }
        Ok(out)
    };

    Ok(SymbolTable {
        sequences: names(RECORD_SEQ)?,
        banks: names(RECORD_BANK)?,
        wave_archives: names(RECORD_WAVEARC)?,
        players: names(RECORD_PLAYER)?,
    })
}

fn write_symb(symbols: &SymbolTable) -> Vec<u8> {
    let lists = [
        (RECORD_SEQ, &symbols.sequences),
        (RECORD_BANK, &symbols.banks),
        (RECORD_WAVEARC, &symbols.wave_archives),
        (RECORD_PLAYER, &symbols.players),
    ];

    // Fixed prefix: magic + size + 8 slot offsets.
    let mut record_area = Vec::new();
    let mut string_area = Vec::new();
    let mut slot_offsets = [0u32; 8];

    // Records first, strings after; string offsets need the total record
    // length, so sizes are computed in a first pass.
    let records_base = 8 + 32;
    let mut records_len = 0usize;
    for (_, names) in &lists {
        records_len += 4 + names.len() * 4;
    }
    let strings_base = records_base + records_len;

    for (slot, names) in &lists {
        slot_offsets[*slot] = (records_base + record_area.len()) as u32;
        put_u32(&mut record_area, names.len() as u32);
        for name in names.iter() {
            match name {
                None => put_u32(&mut record_area, 0),
                Some(name) => {
                    put_u32(&mut record_area, (strings_base + string_area.len()) as u32);
                    string_area.extend_from_slice(name.as_bytes());
                    string_area.push(0);
                }
            }
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"SYMB");
    put_u32(&mut out, 0); // patched below
    for offset in slot_offsets {
        put_u32(&mut out, offset);
    }
    out.extend_from_slice(&record_area);
    out.extend_from_slice(&string_area);
    pad_to(&mut out, 4);
    let size = out.len() as u32;
    out[4..8].copy_from_slice(&size.to_le_bytes());
    out
}

fn write_info(sdat: &Sdat) -> Vec<u8> {
    let records_base = 8 + 32;
    let mut record_area = Vec::new();
    let mut entry_area = Vec::new();
    let mut slot_offsets = [0u32; 8];

    // Entry blobs live after all four count+offset tables.
    let entries_base = {
        let mut len = 0;
        len += 4 + sdat.sequences.len() * 4;
        len += 4 + sdat.banks.len() * 4;
        len += 4 + sdat.wave_archives.len() * 4;
        len += 4 + sdat.players.len() * 4;
        records_base + len
    };

    {
        slot_offsets[RECORD_SEQ] = (records_base + record_area.len()) as u32;
        put_u32(&mut record_area, sdat.sequences.len() as u32);
        for entry in &sdat.sequences {
            match entry {
                None => put_u32(&mut record_area, 0),
                Some(seq) => {
                    put_u32(&mut record_area, (entries_base + entry_area.len()) as u32);
                    put_u16(&mut entry_area, seq.file_id);
                    put_u16(&mut entry_area, 0);
                    put_u16(&mut entry_area, seq.bank);
                    entry_area.push(seq.volume);
                    entry_area.push(seq.channel_priority);
                    entry_area.push(seq.player_priority);
                    entry_area.push(seq.player_number);
                    put_u16(&mut entry_area, 0);
                }
            }
        }
    }
    {
        slot_offsets[RECORD_BANK] = (records_base + record_area.len()) as u32;
        put_u32(&mut record_area, sdat.banks.len() as u32);
        for entry in &sdat.banks {
            match entry {
                None => put_u32(&mut record_area, 0),
                Some(bank) => {
                    put_u32(&mut record_area, (entries_base + entry_area.len()) as u32);
                    put_u16(&mut entry_area, bank.file_id);
                    put_u16(&mut entry_area, 0);
                    for archive in bank.wave_archives {
                        put_u16(&mut entry_area, archive);
                    }
                }
            }
        }
    }
    {
        slot_offsets[RECORD_WAVEARC] = (records_base + record_area.len()) as u32;
        put_u32(&mut record_area, sdat.wave_archives.len() as u32);
        for entry in &sdat.wave_archives {
            match entry {
                None => put_u32(&mut record_area, 0),
                Some(archive) => {
                    put_u32(&mut record_area, (entries_base + entry_area.len()) as u32);
                    put_u16(&mut entry_area, archive.file_id);
                    put_u16(&mut entry_area, 0);
                }
            }
        }
    }
    {
        slot_offsets[RECORD_PLAYER] = (records_base + record_area.len()) as u32;
        put_u32(&mut record_area, sdat.players.len() as u32);
        for entry in &sdat.players {
            match entry {
                None => put_u32(&mut record_area, 0),
                Some(player) => {
                    put_u32(&mut record_area, (entries_base + entry_area.len()) as u32);
                    entry_area.push(player.max_sequences);
                    entry_area.push(0);
                    put_u16(&mut entry_area, player.channel_mask);
                    put_u32(&mut entry_area, player.heap_size);
                }
            }
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"INFO");
    put_u32(&mut out, 0); // patched below
    for offset in slot_offsets {
        put_u32(&mut out, offset);
    }
    out.extend_from_slice(&record_area);
    out.extend_from_slice(&entry_area);
    pad_to(&mut out, 4);
    let size = out.len() as u32;
    out[4..8].copy_from_slice(&size.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbnk::{InstrumentDefinition, InstrumentEntry};
    use crate::swav::Swav;

    fn tiny_swar() -> Vec<u8> {
        let mut blob = vec![1u8, 1];
        blob.extend_from_slice(&22050u16.to_le_bytes());
        blob.extend_from_slice(&0x03C0u16.to_le_bytes());
        blob.extend_from_slice(&0u16.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        for v in [0x4000i16, 0x4000] {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        let swav = Swav::parse(&blob).unwrap();
        Swar {
            waves: vec![Some(swav)],
        }
        .write()
    }

    fn tiny_sbnk() -> Vec<u8> {
        Sbnk {
            instruments: vec![InstrumentEntry::Single(InstrumentDefinition {
                record: 1,
                swav: 0,
                swar: 0,
                note: 60,
                attack: 127,
                decay: 127,
                sustain: 127,
                release: 127,
                pan: 64,
            })],
        }
        .write()
    }

    fn tiny_sseq() -> Vec<u8> {
        Sseq {
            data: vec![0x81, 0x00, 0x3C, 0x64, 0x00, 0xFF, 0x00, 0x00],
        }
        .write()
    }

    pub(crate) fn build_sample_sdat() -> Sdat {
        let files = vec![tiny_sseq(), tiny_sbnk(), tiny_swar()];
        let mut sdat = Sdat {
            files,
            ..Default::default()
        };
        sdat.wave_archives.push(Some(WaveArchiveInfo {
            file_id: 2,
            swar: Arc::new(Swar::parse(&sdat.files[2]).unwrap()),
        }));
        sdat.banks.push(Some(BankInfo {
            file_id: 1,
            wave_archives: [0, 0xFFFF, 0xFFFF, 0xFFFF],
            sbnk: Arc::new(Sbnk::parse(&sdat.files[1]).unwrap()),
        }));
        sdat.sequences.push(Some(SequenceInfo {
            file_id: 0,
            bank: 0,
            volume: 127,
            channel_priority: 64,
            player_priority: 64,
            player_number: 0,
            sseq: Arc::new(Sseq::parse(&sdat.files[0]).unwrap()),
        }));
        sdat.players.push(Some(PlayerInfo {
            max_sequences: 1,
            channel_mask: 0xFFFF,
            heap_size: 0,
        }));
        sdat.symbols = Some(SymbolTable {
            sequences: vec![Some("SEQ_TEST".into())],
            banks: vec![Some("BANK_TEST".into())],
            wave_archives: vec![Some("WAVE_TEST".into())],
            players: vec![None],
        });
        sdat
    }

    #[test]
    fn test_write_parse_round_trip() {
        let sdat = build_sample_sdat();
        let image = sdat.write();
        let parsed = Sdat::parse(&image).unwrap();

        assert_eq!(parsed.files, sdat.files);
        let seq = parsed.sequence(0).unwrap();
        assert_eq!(seq.bank, 0);
        assert_eq!(seq.volume, 127);
        assert_eq!(&seq.sseq.data[..6], &[0x81, 0x00, 0x3C, 0x64, 0x00, 0xFF]);
        let bank = parsed.bank(0).unwrap();
        assert_eq!(bank.wave_archives[0], 0);
        assert!(bank.sbnk.instrument_for(0, 60).is_some());
        assert_eq!(parsed.wave_archive(0).unwrap().swar.wave(0).unwrap().samples.len(), 4);
        assert_eq!(parsed.player(0).unwrap().channel_mask, 0xFFFF);
        assert_eq!(
            parsed.symbols.as_ref().unwrap().sequence_name(0),
            Some("SEQ_TEST")
        );

        // Byte-exact after normalization.
        assert_eq!(parsed.write(), image);
    }

    #[test]
    fn test_shared_file_ids_share_storage() {
        let mut sdat = build_sample_sdat();
        // Two sequence entries pointing at the same file.
        let first = sdat.sequences[0].clone().unwrap();
        sdat.sequences.push(Some(first));
        let parsed = Sdat::parse(&sdat.write()).unwrap();
        let a = parsed.sequence(0).unwrap();
        let b = parsed.sequence(1).unwrap();
        assert!(Arc::ptr_eq(&a.sseq, &b.sseq));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut image = build_sample_sdat().write();
        image[0] = b'X';
        assert!(Sdat::parse(&image).is_err());
    }

    #[test]
    fn test_rejects_file_escaping_file_region() {
        let sdat = build_sample_sdat();
        let mut image = sdat.write();
        // FAT starts after header + SYMB + INFO; find it by magic scan and
        // point the first file at the header.
        let fat_pos = image
            .windows(4)
            .position(|w| w == b"FAT ")
            .expect("FAT section present");
        image[fat_pos + 12..fat_pos + 16].copy_from_slice(&0u32.to_le_bytes());
        assert!(Sdat::parse(&image).is_err());
    }

    #[test]
    fn test_rejects_unknown_file_id() {
        let mut sdat = build_sample_sdat();
        sdat.sequences[0].as_mut().unwrap().file_id = 200;
        assert!(Sdat::parse(&sdat.write()).is_err());
    }

    #[test]
    fn test_missing_symb_is_fine() {
        let mut sdat = build_sample_sdat();
        sdat.symbols = None;
        let image = sdat.write();
        let parsed = Sdat::parse(&image).unwrap();
        assert!(parsed.symbols.is_none());
        assert_eq!(parsed.write(), image);
    }
}
