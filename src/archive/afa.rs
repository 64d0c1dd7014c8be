//! AFA volumes
//!
//! ```text
//! "AFAH" u32 0x1C "AlicArch" u32 version u32 1 u32 data_start
//! "INFO" u32 chunk_len u32 toc_len u32 count  zlib(toc)
//! ...padding to data_start
//! "DATA" u32 chunk_len  payloads
//! ```
//!
//! Each table-of-contents record:
//!
//! ```text
//! u32 name_len  u32 padded_len  name (Shift-JIS, NUL padded to a multiple of 4)
//! u32 time_lo   u32 time_hi     [u32 0 in version 1]
//! u32 offset    u32 size        offset relative to the DATA payloads
//! ```

use crate::archive::format::{
    align_up, decode_name, encode_name, read_u32_at, write_padding,
};
use crate::archive::volume::{read_range, Decoded, Placement, Volume};
use crate::entry::Entry;
use crate::error::{AldError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"AFAH";
const ALIC_ARCH: &[u8; 8] = b"AlicArch";
const INFO: &[u8; 4] = b"INFO";
const DATA: &[u8; 4] = b"DATA";
const HEADER_SIZE: u64 = 0x1C;
const INFO_HEADER_SIZE: u64 = 16;
const CHUNK_HEADER_SIZE: u64 = 8;

/// Version written for newly created volumes
pub const DEFAULT_VERSION: u32 = 2;

pub(crate) fn read<R: Read + Seek>(reader: &mut R, path: &Path, file_len: u64) -> Result<Decoded> {
    let header = read_range(reader, 0, (HEADER_SIZE + INFO_HEADER_SIZE) as usize, "AFA header")?;
    if &header[0..4] != MAGIC || &header[8..16] != ALIC_ARCH {
        return Err(AldError::InvalidFormat("missing AFAH signature".to_string()));
    }
    let version = read_u32_at(&header, 16)?;
    if version != 1 && version != 2 {
        return Err(AldError::InvalidFormat(format!("unknown AFA version {}", version)));
    }
    let data_start = read_u32_at(&header, 24)? as u64;

    let info = &header[HEADER_SIZE as usize..];
    if &info[0..4] != INFO {
        return Err(AldError::InvalidFormat("missing AFA INFO chunk".to_string()));
    }
    let chunk_len = read_u32_at(info, 4)? as u64;
    let toc_len = read_u32_at(info, 8)? as u64;
    let count = read_u32_at(info, 12)? as usize;
    if chunk_len < INFO_HEADER_SIZE || HEADER_SIZE + chunk_len > file_len || data_start > file_len {
        return Err(AldError::truncated("AFA table of contents"));
    }

    let compressed = read_range(
        reader,
        HEADER_SIZE + INFO_HEADER_SIZE,
        (chunk_len - INFO_HEADER_SIZE) as usize,
        "AFA table of contents",
    )?;
    let mut toc = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(toc_len)
        .read_to_end(&mut toc)
        .map_err(|err| AldError::InvalidFormat(format!("AFA table of contents: {}", err)))?;
    if toc.len() as u64 != toc_len {
        return Err(AldError::truncated("AFA table of contents"));
    }

    let payload_base = data_start + CHUNK_HEADER_SIZE;
    let mut entries = Vec::with_capacity(count.min(toc.len() / 16));
    let mut at = 0usize;
    for position in 0..count {
        let name_len = read_u32_at(&toc, at)? as usize;
        let padded_len = read_u32_at(&toc, at + 4)? as usize;
        at += 8;
        let name_bytes = toc
            .get(at..at + name_len.min(padded_len))
            .ok_or_else(|| AldError::truncated("AFA entry name"))?;
        let name = decode_name(name_bytes);
        at += padded_len;

        let time_lo = read_u32_at(&toc, at)? as u64;
        let time_hi = read_u32_at(&toc, at + 4)? as u64;
        at += 8;
        if version == 1 {
            at += 4;
        }
        let offset = read_u32_at(&toc, at)? as u64;
        let size = read_u32_at(&toc, at + 4)? as u64;
        at += 8;

        if payload_base + offset + size > file_len {
            return Err(AldError::InvalidFormat(format!("AFA entry {} points past the end", name)));
        }
        let mut entry = Entry::stored(
            name,
            0,
            path,
            payload_base + offset,
            size,
            time_lo | time_hi << 32,
        );
        entry.number = position as u32 + 1;
        entries.push(entry);
    }

    Ok(Decoded {
        entries,
        index_block: None,
        letter: None,
        version,
    })
}

pub(crate) fn write<W: Write + Seek>(volume: &Volume, out: &mut W) -> Result<Vec<Placement>> {
    let version = if volume.version == 1 { 1 } else { DEFAULT_VERSION };

    // Payloads are spooled first; the table of contents precedes them
    let mut spool = tempfile::tempfile()?;
    let mut toc = Vec::new();
    let mut relative = Vec::with_capacity(volume.entries.len());
    let mut data_len = 0u64;

    for entry in &volume.entries {
        let payload = entry.payload()?;
        spool.write_all(&payload)?;
        let name = encode_name(&entry.name)?;
        let padded_len = align_up(name.len() as u64 + 1, 4) as usize;
        let size = to_u32(payload.len() as u64, &entry.name)?;
        let offset = to_u32(data_len, &entry.name)?;

        toc.extend_from_slice(&(name.len() as u32).to_le_bytes());
        toc.extend_from_slice(&(padded_len as u32).to_le_bytes());
        toc.extend_from_slice(&name);
        toc.resize(toc.len() + padded_len - name.len(), 0);
        toc.extend_from_slice(&(entry.timestamp as u32).to_le_bytes());
        toc.extend_from_slice(&((entry.timestamp >> 32) as u32).to_le_bytes());
        if version == 1 {
            toc.extend_from_slice(&0u32.to_le_bytes());
        }
        toc.extend_from_slice(&offset.to_le_bytes());
        toc.extend_from_slice(&size.to_le_bytes());

        relative.push((data_len, payload.len() as u64));
        data_len += payload.len() as u64;
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&toc)?;
    let compressed = encoder.finish()?;

    let chunk_len = INFO_HEADER_SIZE + compressed.len() as u64;
    let info_end = HEADER_SIZE + chunk_len;
    let data_start = align_up(info_end, 16);

    out.write_all(MAGIC)?;
    out.write_all(&(HEADER_SIZE as u32).to_le_bytes())?;
    out.write_all(ALIC_ARCH)?;
    out.write_all(&version.to_le_bytes())?;
    out.write_all(&1u32.to_le_bytes())?;
    out.write_all(&to_u32(data_start, "AFA header")?.to_le_bytes())?;

    out.write_all(INFO)?;
    out.write_all(&to_u32(chunk_len, "AFA table of contents")?.to_le_bytes())?;
    out.write_all(&(toc.len() as u32).to_le_bytes())?;
    out.write_all(&(volume.entries.len() as u32).to_le_bytes())?;
    out.write_all(&compressed)?;
    write_padding(&mut *out, info_end, data_start)?;

    out.write_all(DATA)?;
    out.write_all(&to_u32(data_len + CHUNK_HEADER_SIZE, "AFA data chunk")?.to_le_bytes())?;
    spool.seek(SeekFrom::Start(0))?;
    io::copy(&mut spool, out)?;
    out.flush()?;

    let payload_base = data_start + CHUNK_HEADER_SIZE;
    Ok(relative
        .into_iter()
        .map(|(offset, size)| Placement {
            offset: payload_base + offset,
            size,
        })
        .collect())
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| AldError::ArgumentInvalid(format!("{} is too large for an AFA volume", what)))
}
