use crate::archive::index_block::RecordLayout;
use crate::error::{AldError, Result};
use encoding_rs::SHIFT_JIS;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sector size used by the lettered formats (ALD and DAT)
pub const SECTOR_SIZE: u64 = 256;

/// Highest volume letter ('Z')
pub const MAX_LETTER: u8 = 26;

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01
const FILETIME_UNIX_OFFSET: u64 = 11_644_473_600;

/// Archive kinds, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// Lettered volumes with a 3-byte-record index block
    Ald,
    /// Lettered volumes with a 2-byte-record index block in every volume
    Dat,
    /// Single volume with a compressed table of contents
    Afa,
    /// Single volume with an offset/size table and no names
    Alk,
}

impl ArchiveKind {
    /// Determine the archive kind from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "ald" => Some(Self::Ald),
            "dat" => Some(Self::Dat),
            "afa" => Some(Self::Afa),
            "alk" => Some(Self::Alk),
            _ => None,
        }
    }

    /// Same as [`from_path`](Self::from_path), as an error when unknown
    pub fn require(path: &Path) -> Result<Self> {
        Self::from_path(path).ok_or_else(|| {
            AldError::UnsupportedKind(format!("{} has no known archive extension", path.display()))
        })
    }

    /// Whether the logical archive is split across lettered volumes
    pub fn is_lettered(self) -> bool {
        matches!(self, Self::Ald | Self::Dat)
    }

    /// Record layout of the index block, if this kind carries one
    pub fn index_layout(self) -> Option<RecordLayout> {
        match self {
            Self::Ald => Some(RecordLayout::Wide),
            Self::Dat => Some(RecordLayout::Narrow),
            Self::Afa | Self::Alk => None,
        }
    }

    /// DAT readers look up the index block in whichever volume they open,
    /// so every volume gets a full copy
    pub fn index_in_every_volume(self) -> bool {
        self == Self::Dat
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ald => "ALD",
            Self::Dat => "DAT",
            Self::Afa => "AFA",
            Self::Alk => "ALK",
        }
    }
}

/// 'A' => 1 ... 'Z' => 26
pub fn letter_from_char(c: char) -> Option<u8> {
    let upper = c.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Some(upper as u8 - b'A' + 1)
    } else {
        None
    }
}

/// 1 => 'A' ... 26 => 'Z'
pub fn letter_to_char(letter: u8) -> Option<char> {
    if (1..=MAX_LETTER).contains(&letter) {
        Some((b'A' + letter - 1) as char)
    } else {
        None
    }
}

pub fn validate_letter(letter: u8) -> Result<()> {
    if (1..=MAX_LETTER).contains(&letter) {
        Ok(())
    } else {
        Err(AldError::ArgumentInvalid(format!(
            "volume letter {} is outside 1..={}",
            letter, MAX_LETTER
        )))
    }
}

/// Decode a Shift-JIS name, stopping at the first NUL
pub fn decode_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let (name, _) = SHIFT_JIS.decode_without_bom_handling(&bytes[..end]);
    name.into_owned()
}

/// Encode a name as Shift-JIS
pub fn encode_name(name: &str) -> Result<Vec<u8>> {
    let (bytes, _, had_errors) = SHIFT_JIS.encode(name);
    if had_errors {
        return Err(AldError::ArgumentInvalid(format!(
            "name {:?} cannot be represented in Shift-JIS",
            name
        )));
    }
    Ok(bytes.into_owned())
}

/// Current time as a Windows FILETIME (100ns ticks since 1601)
pub fn filetime_now() -> u64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (secs + FILETIME_UNIX_OFFSET) * 10_000_000
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

pub fn sectors_for(len: u64) -> u64 {
    len.div_ceil(SECTOR_SIZE)
}

/// Write zeros until `written` reaches `target`
pub fn write_padding<W: Write>(mut writer: W, written: u64, target: u64) -> Result<()> {
    if target > written {
        let zeros = vec![0u8; (target - written) as usize];
        writer.write_all(&zeros)?;
    }
    Ok(())
}

// Helper functions for reading primitive types from slices

pub fn read_u16_at(bytes: &[u8], offset: usize) -> Result<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| AldError::truncated("u16 field"))
}

pub fn read_u24_at(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 3)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
        .ok_or_else(|| AldError::truncated("u24 field"))
}

pub fn read_u32_at(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| AldError::truncated("u32 field"))
}

pub fn read_u64_at(bytes: &[u8], offset: usize) -> Result<u64> {
    let lo = read_u32_at(bytes, offset)? as u64;
    let hi = read_u32_at(bytes, offset + 4)? as u64;
    Ok(lo | (hi << 32))
}

/// Read exactly `len` bytes from a reader
pub fn read_exact_vec<R: Read>(mut reader: R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
