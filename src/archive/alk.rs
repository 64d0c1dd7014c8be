//! ALK volumes: `"ALK0"`, u32 count, `count` pairs of (u32 offset, u32 size),
//! then raw payloads. Offsets are absolute; nothing else is stored.

use crate::archive::format::{read_u32_at, write_padding};
use crate::archive::volume::{read_range, synthesized_name, Decoded, Placement, Volume};
use crate::entry::Entry;
use crate::error::{AldError, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"ALK0";
const HEADER_SIZE: u64 = 8;
const RECORD_SIZE: u64 = 8;

pub(crate) fn read<R: Read + Seek>(reader: &mut R, path: &Path, file_len: u64) -> Result<Decoded> {
    let header = read_range(reader, 0, HEADER_SIZE as usize, "ALK header")?;
    if &header[..4] != MAGIC {
        return Err(AldError::InvalidFormat("missing ALK0 signature".to_string()));
    }
    let count = read_u32_at(&header, 4)? as u64;
    let table_len = count * RECORD_SIZE;
    if HEADER_SIZE + table_len > file_len {
        return Err(AldError::truncated("ALK table"));
    }

    let table = read_range(reader, HEADER_SIZE, table_len as usize, "ALK table")?;
    let mut entries = Vec::with_capacity(count as usize);
    for (position, record) in table.chunks_exact(RECORD_SIZE as usize).enumerate() {
        let offset = read_u32_at(record, 0)? as u64;
        let size = read_u32_at(record, 4)? as u64;
        if offset + size > file_len {
            return Err(AldError::InvalidFormat(format!(
                "ALK entry {} points past the end",
                position
            )));
        }
        let mut entry = Entry::stored(synthesized_name(path, position), 0, path, offset, size, 0);
        entry.number = position as u32 + 1;
        entries.push(entry);
    }

    Ok(Decoded {
        entries,
        index_block: None,
        letter: None,
        version: 0,
    })
}

pub(crate) fn write<W: Write + Seek>(volume: &Volume, out: &mut W) -> Result<Vec<Placement>> {
    let count = volume.entries.len() as u64;
    let data_start = HEADER_SIZE + count * RECORD_SIZE;
    write_padding(&mut *out, 0, data_start)?;

    let mut placements = Vec::with_capacity(volume.entries.len());
    let mut offset = data_start;
    for entry in &volume.entries {
        let payload = entry.payload()?;
        out.write_all(&payload)?;
        placements.push(Placement {
            offset,
            size: payload.len() as u64,
        });
        offset += payload.len() as u64;
    }
    if offset > u32::MAX as u64 {
        return Err(AldError::ArgumentInvalid(format!(
            "{} exceeds the largest ALK volume size",
            volume.path.display()
        )));
    }

    out.seek(SeekFrom::Start(0))?;
    out.write_all(MAGIC)?;
    out.write_all(&(count as u32).to_le_bytes())?;
    for placement in &placements {
        out.write_all(&(placement.offset as u32).to_le_bytes())?;
        out.write_all(&(placement.size as u32).to_le_bytes())?;
    }
    out.flush()?;

    Ok(placements)
}
