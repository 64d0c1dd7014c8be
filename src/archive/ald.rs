//! ALD volumes
//!
//! ```text
//! [pointer table]  u24 sector numbers, zero terminated, padded to a sector
//!                  ptr[0]   first sector of the index block
//!                  ptr[1+i] first sector of file i
//!                  ptr[n+1] end of the last file
//! [index block]    present when ptr[0] < ptr[1]
//! [file i]         u32 header_len, u32 size, u64 FILETIME,
//!                  Shift-JIS name NUL-padded to header_len, payload,
//!                  padding to the next sector
//! [footer]         "NL\x01\0", u32 0x10, u8 letter, 7 zero bytes
//! ```

use crate::archive::format::{
    align_up, decode_name, encode_name, read_u24_at, read_u32_at, read_u64_at, sectors_for,
    write_padding, MAX_LETTER, SECTOR_SIZE,
};
use crate::archive::volume::{read_range, Decoded, Placement, Volume};
use crate::entry::Entry;
use crate::error::{AldError, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const FOOTER_MAGIC: &[u8; 4] = b"NL\x01\x00";
const FOOTER_SIZE: usize = 16;
const FILE_HEADER_FIXED: u64 = 16;
const POINTER_SIZE: usize = 3;
const MAX_SECTOR: u64 = 0xFF_FFFF;

pub(crate) fn read<R: Read + Seek>(reader: &mut R, path: &Path, file_len: u64) -> Result<Decoded> {
    let first = read_range(reader, 0, POINTER_SIZE, "ALD pointer table")?;
    let table_sectors = read_u24_at(&first, 0)? as u64;
    if table_sectors == 0 || table_sectors * SECTOR_SIZE > file_len {
        return Err(AldError::InvalidFormat(
            "ALD pointer table length is out of range".to_string(),
        ));
    }

    let table = read_range(
        reader,
        0,
        (table_sectors * SECTOR_SIZE) as usize,
        "ALD pointer table",
    )?;
    let pointers: Vec<u64> = table
        .chunks_exact(POINTER_SIZE)
        .map(|p| u32::from_le_bytes([p[0], p[1], p[2], 0]) as u64)
        .take_while(|&sector| sector != 0)
        .collect();

    if pointers.len() < 2 {
        return Err(AldError::InvalidFormat(
            "ALD pointer table has no end pointer".to_string(),
        ));
    }
    if pointers.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(AldError::InvalidFormat(
            "ALD pointers are not in ascending order".to_string(),
        ));
    }
    let end = pointers[pointers.len() - 1];
    if end * SECTOR_SIZE > file_len {
        return Err(AldError::truncated("ALD volume"));
    }

    let index_block = if pointers[1] > pointers[0] {
        Some(read_range(
            reader,
            pointers[0] * SECTOR_SIZE,
            ((pointers[1] - pointers[0]) * SECTOR_SIZE) as usize,
            "ALD index block",
        )?)
    } else {
        None
    };

    let mut entries = Vec::with_capacity(pointers.len() - 2);
    for (position, span) in pointers[1..].windows(2).enumerate() {
        let start = span[0] * SECTOR_SIZE;
        let span_len = (span[1] - span[0]) * SECTOR_SIZE;
        if span_len < FILE_HEADER_FIXED {
            return Err(AldError::InvalidFormat(format!(
                "ALD file {} has no room for a header",
                position
            )));
        }

        let fixed = read_range(reader, start, FILE_HEADER_FIXED as usize, "ALD file header")?;
        let header_len = read_u32_at(&fixed, 0)? as u64;
        let size = read_u32_at(&fixed, 4)? as u64;
        let timestamp = read_u64_at(&fixed, 8)?;
        if header_len < FILE_HEADER_FIXED || header_len + size > span_len {
            return Err(AldError::InvalidFormat(format!(
                "ALD file {} overruns its sectors",
                position
            )));
        }

        let name_bytes = read_range(
            reader,
            start + FILE_HEADER_FIXED,
            (header_len - FILE_HEADER_FIXED) as usize,
            "ALD file name",
        )?;
        entries.push(Entry::stored(
            decode_name(&name_bytes),
            0,
            path,
            start + header_len,
            size,
            timestamp,
        ));
    }

    let letter = read_footer(reader, end * SECTOR_SIZE, file_len)?;

    Ok(Decoded {
        entries,
        index_block,
        letter,
        version: 0,
    })
}

fn read_footer<R: Read + Seek>(reader: &mut R, at: u64, file_len: u64) -> Result<Option<u8>> {
    if at + FOOTER_SIZE as u64 > file_len {
        return Ok(None);
    }
    let footer = read_range(reader, at, FOOTER_SIZE, "ALD footer")?;
    if &footer[..4] != FOOTER_MAGIC {
        return Ok(None);
    }
    let letter = footer[8];
    Ok((1..=MAX_LETTER).contains(&letter).then_some(letter))
}

pub(crate) fn write<W: Write + Seek>(volume: &Volume, out: &mut W) -> Result<Vec<Placement>> {
    let count = volume.entries.len();
    let table_sectors = sectors_for(((count + 3) * POINTER_SIZE) as u64).max(1);

    // Placeholder pointer table, filled in once every file is placed
    write_padding(&mut *out, 0, table_sectors * SECTOR_SIZE)?;
    let mut sector = table_sectors;
    let mut pointers = Vec::with_capacity(count + 2);
    pointers.push(sector);

    if let Some(block) = volume.index_block() {
        out.write_all(block)?;
        let padded = align_up(block.len() as u64, SECTOR_SIZE);
        write_padding(&mut *out, block.len() as u64, padded)?;
        sector += padded / SECTOR_SIZE;
    }

    let mut placements = Vec::with_capacity(count);
    for entry in &volume.entries {
        pointers.push(sector);

        let payload = entry.payload()?;
        let size = u32::try_from(payload.len()).map_err(|_| {
            AldError::ArgumentInvalid(format!("{} is too large for an ALD volume", entry.name))
        })?;
        let name = encode_name(&entry.name)?;
        let header_len = align_up(FILE_HEADER_FIXED + name.len() as u64 + 1, 16);

        out.write_all(&(header_len as u32).to_le_bytes())?;
        out.write_all(&size.to_le_bytes())?;
        out.write_all(&entry.timestamp.to_le_bytes())?;
        out.write_all(&name)?;
        write_padding(&mut *out, FILE_HEADER_FIXED + name.len() as u64, header_len)?;
        out.write_all(&payload)?;

        let written = header_len + payload.len() as u64;
        let padded = align_up(written, SECTOR_SIZE);
        write_padding(&mut *out, written, padded)?;

        placements.push(Placement {
            offset: sector * SECTOR_SIZE + header_len,
            size: payload.len() as u64,
        });
        sector += padded / SECTOR_SIZE;
    }
    pointers.push(sector);

    if sector > MAX_SECTOR {
        return Err(AldError::ArgumentInvalid(format!(
            "{} exceeds the largest ALD volume size",
            volume.path.display()
        )));
    }

    out.write_all(FOOTER_MAGIC)?;
    out.write_all(&0x10u32.to_le_bytes())?;
    out.write_all(&[volume.letter])?;
    out.write_all(&[0u8; 7])?;

    out.seek(SeekFrom::Start(0))?;
    for pointer in &pointers {
        out.write_all(&(*pointer as u32).to_le_bytes()[..POINTER_SIZE])?;
    }
    out.flush()?;

    Ok(placements)
}
