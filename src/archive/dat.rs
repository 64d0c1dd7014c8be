//! DAT volumes
//!
//! ```text
//! [pointer table]  u16 1-based sector numbers, zero terminated, padded to a sector
//!                  ptr[0]   first sector of the index block
//!                  ptr[1+i] first sector of file i
//!                  ptr[n+1] one past the last sector
//! [index block]
//! [file i]         raw payload padded to a sector
//! ```
//!
//! Files carry no header, so names are synthesized and sizes are whole sectors.

use crate::archive::format::{align_up, read_u16_at, sectors_for, write_padding, SECTOR_SIZE};
use crate::archive::volume::{read_range, synthesized_name, Decoded, Placement, Volume};
use crate::entry::Entry;
use crate::error::{AldError, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const POINTER_SIZE: usize = 2;

/// Byte offset of a 1-based sector number
fn sector_offset(sector: u64) -> u64 {
    (sector - 1) * SECTOR_SIZE
}

pub(crate) fn read<R: Read + Seek>(reader: &mut R, path: &Path, file_len: u64) -> Result<Decoded> {
    let first = read_range(reader, 0, POINTER_SIZE, "DAT pointer table")?;
    let index_sector = read_u16_at(&first, 0)? as u64;
    if index_sector < 2 || sector_offset(index_sector) > file_len {
        return Err(AldError::InvalidFormat(
            "DAT pointer table length is out of range".to_string(),
        ));
    }

    let table = read_range(
        reader,
        0,
        sector_offset(index_sector) as usize,
        "DAT pointer table",
    )?;
    let pointers: Vec<u64> = table
        .chunks_exact(POINTER_SIZE)
        .map(|p| u16::from_le_bytes([p[0], p[1]]) as u64)
        .take_while(|&sector| sector != 0)
        .collect();

    if pointers.len() < 2 {
        return Err(AldError::InvalidFormat(
            "DAT pointer table has no end pointer".to_string(),
        ));
    }
    if pointers.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(AldError::InvalidFormat(
            "DAT pointers are not in ascending order".to_string(),
        ));
    }
    let end = pointers[pointers.len() - 1];
    if sector_offset(end) > file_len {
        return Err(AldError::truncated("DAT volume"));
    }

    let index_block = if pointers[1] > pointers[0] {
        Some(read_range(
            reader,
            sector_offset(pointers[0]),
            ((pointers[1] - pointers[0]) * SECTOR_SIZE) as usize,
            "DAT index block",
        )?)
    } else {
        None
    };

    let entries = pointers[1..]
        .windows(2)
        .enumerate()
        .map(|(position, span)| {
            Entry::stored(
                synthesized_name(path, position),
                0,
                path,
                sector_offset(span[0]),
                (span[1] - span[0]) * SECTOR_SIZE,
                0,
            )
        })
        .collect();

    Ok(Decoded {
        entries,
        index_block,
        letter: None,
        version: 0,
    })
}

pub(crate) fn write<W: Write + Seek>(volume: &Volume, out: &mut W) -> Result<Vec<Placement>> {
    let count = volume.entries.len();
    let table_sectors = sectors_for(((count + 3) * POINTER_SIZE) as u64).max(1);

    write_padding(&mut *out, 0, table_sectors * SECTOR_SIZE)?;
    let mut sector = table_sectors + 1;
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
        out.write_all(&payload)?;
        let padded = align_up(payload.len() as u64, SECTOR_SIZE);
        write_padding(&mut *out, payload.len() as u64, padded)?;
        placements.push(Placement {
            offset: sector_offset(sector),
            size: padded,
        });
        sector += padded / SECTOR_SIZE;
    }
    pointers.push(sector);

    if sector > u16::MAX as u64 {
        return Err(AldError::ArgumentInvalid(format!(
            "{} exceeds the largest DAT volume size",
            volume.path.display()
        )));
    }

    out.seek(SeekFrom::Start(0))?;
    for pointer in &pointers {
        out.write_all(&(*pointer as u16).to_le_bytes())?;
    }
    out.flush()?;

    Ok(placements)
}
