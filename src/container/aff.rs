//! AFF: a SWF movie behind a 16-byte header, with the first 64 bytes of the
//! movie XOR-scrambled.
//!
//! ```text
//! "AFF\0"  u32 version  u32 movie length  u32 reserved
//! scrambled movie
//! ```
//!
//! Enumeration and replacement go through the SWF codec on the unscrambled
//! movie; the header is carried over with the length updated.
//!
//! The scramble key is a stand-in, not the key used by shipped games. AFF
//! files written by this crate read back, but AFF files from real games are
//! not expected to decode: their movies will not parse and they surface as
//! containers with no sub-resources.

use crate::container::{swf, Node};
use crate::error::{AldError, Result};

const MAGIC: &[u8; 4] = b"AFF\0";
const HEADER_SIZE: usize = 16;

/// Stand-in scramble key; see the module docs
const KEY: [u8; 64] = [
    0xC8, 0xBB, 0x8F, 0xB7, 0xED, 0x43, 0x99, 0x4A, 0xA2, 0x7E, 0x5B, 0xB0, 0x68, 0x18, 0xF8, 0x88,
    0x53, 0x30, 0x1A, 0x14, 0x0E, 0x2B, 0x47, 0xF6, 0x91, 0x3D, 0x6C, 0x05, 0x7A, 0xE4, 0x22, 0xD9,
    0x3F, 0x8A, 0x61, 0x0B, 0xB5, 0x4E, 0x97, 0x26, 0xCD, 0x73, 0x18, 0xAF, 0x5C, 0x02, 0xE1, 0x6D,
    0x84, 0x39, 0xF2, 0x1E, 0xA7, 0x50, 0x0C, 0xDB, 0x66, 0x2F, 0x94, 0x7B, 0xC1, 0x08, 0x35, 0xEE,
];

fn scramble(bytes: &mut [u8]) {
    for (byte, key) in bytes.iter_mut().zip(KEY.iter()) {
        *byte ^= key;
    }
}

/// Unscrambled SWF movie inside an AFF file
pub(super) fn to_swf(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
        return Err(AldError::InvalidFormat("missing AFF header".to_string()));
    }
    let mut movie = bytes[HEADER_SIZE..].to_vec();
    scramble(&mut movie);
    Ok(movie)
}

/// AFF file wrapping `movie`, reusing the header fields of `original`
pub(super) fn from_swf(original: &[u8], movie: &[u8]) -> Result<Vec<u8>> {
    let header = original
        .get(..HEADER_SIZE)
        .ok_or_else(|| AldError::truncated("AFF header"))?;
    let len = u32::try_from(movie.len())
        .map_err(|_| AldError::Container("AFF movie is too large".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + movie.len());
    out.extend_from_slice(header);
    out[8..12].copy_from_slice(&len.to_le_bytes());
    let body_start = out.len();
    out.extend_from_slice(movie);
    scramble(&mut out[body_start..]);
    Ok(out)
}

pub(super) fn enumerate(bytes: &[u8]) -> Result<Vec<Node>> {
    swf::enumerate(&to_swf(bytes)?)
}

pub(super) fn replace(bytes: &[u8], nodes: &[Node]) -> Result<Vec<u8>> {
    let movie = swf::replace(&to_swf(bytes)?, nodes)?;
    from_swf(bytes, &movie)
}
