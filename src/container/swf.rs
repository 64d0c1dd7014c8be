//! SWF tag streams
//!
//! ```text
//! "FWS"|"CWS"  u8 version  u32 uncompressed length
//! RECT (5-bit field width + 4 fields)  u16 frame rate  u16 frame count
//! tags: u16 (code << 6 | len), u32 len when len == 0x3F, body
//! ```
//!
//! `CWS` movies are zlib-compressed after the first 8 bytes. Bitmap definition
//! tags become nodes; their body after the character id is the node content.

use crate::container::{node_bytes, Node, NodeKey};
use crate::error::{AldError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::ops::Range;

const HEADER_SIZE: usize = 8;
const LONG_LENGTH: usize = 0x3F;
const TAG_END: u16 = 0;

/// Bitmap-defining tag codes and the extension their nodes get
fn image_extension(code: u16) -> Option<&'static str> {
    match code {
        // DefineBits, DefineBitsJPEG2
        6 | 21 => Some("jpg"),
        // DefineBitsJPEG3, DefineBitsJPEG4 (JPEG plus alpha plane)
        35 | 90 => Some("jpga"),
        // DefineBitsLossless, DefineBitsLossless2
        20 | 36 => Some("zlib"),
        _ => None,
    }
}

struct Tag {
    code: u16,
    start: usize,
    long: bool,
    body: Range<usize>,
}

struct Movie {
    compressed: bool,
    /// Whole movie with the body inflated; the header is kept as read
    data: Vec<u8>,
    tags_start: usize,
    tags_end: usize,
    tags: Vec<Tag>,
}

fn parse(bytes: &[u8]) -> Result<Movie> {
    if bytes.len() < HEADER_SIZE {
        return Err(AldError::truncated("SWF header"));
    }
    let compressed = match &bytes[..3] {
        b"CWS" => true,
        b"FWS" => false,
        _ => return Err(AldError::InvalidFormat("missing SWF signature".to_string())),
    };
    let declared_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if declared_len < HEADER_SIZE {
        return Err(AldError::InvalidFormat("SWF length is smaller than its header".to_string()));
    }

    let data = if compressed {
        let mut data = bytes[..HEADER_SIZE].to_vec();
        ZlibDecoder::new(&bytes[HEADER_SIZE..])
            .take((declared_len - HEADER_SIZE) as u64)
            .read_to_end(&mut data)
            .map_err(|err| AldError::InvalidFormat(format!("SWF body: {}", err)))?;
        data
    } else {
        bytes[..declared_len.min(bytes.len())].to_vec()
    };

    let rect_bits = data
        .get(HEADER_SIZE)
        .map(|b| 5 + 4 * (b >> 3) as usize)
        .ok_or_else(|| AldError::truncated("SWF frame rectangle"))?;
    let tags_start = HEADER_SIZE + rect_bits.div_ceil(8) + 4;

    let mut tags = Vec::new();
    let mut at = tags_start;
    while at + 2 <= data.len() {
        let start = at;
        let code_and_len = u16::from_le_bytes([data[at], data[at + 1]]);
        at += 2;
        let code = code_and_len >> 6;
        let mut len = (code_and_len & 0x3F) as usize;
        let long = len == LONG_LENGTH;
        if long {
            let raw = data
                .get(at..at + 4)
                .ok_or_else(|| AldError::truncated("SWF tag length"))?;
            len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
            at += 4;
        }
        if at + len > data.len() {
            return Err(AldError::truncated("SWF tag body"));
        }
        tags.push(Tag {
            code,
            start,
            long,
            body: at..at + len,
        });
        at += len;
        if code == TAG_END {
            break;
        }
    }
    if tags.is_empty() || at > data.len() {
        return Err(AldError::InvalidFormat("SWF has no tags".to_string()));
    }

    Ok(Movie {
        compressed,
        data,
        tags_start,
        tags_end: at,
        tags,
    })
}

pub(super) fn enumerate(bytes: &[u8]) -> Result<Vec<Node>> {
    let movie = parse(bytes)?;
    let mut nodes = Vec::new();

    for (ordinal, tag) in movie.tags.iter().enumerate() {
        let Some(ext) = image_extension(tag.code) else {
            continue;
        };
        let body = &movie.data[tag.body.clone()];
        if body.len() < 2 {
            continue;
        }
        let character_id = u16::from_le_bytes([body[0], body[1]]);
        nodes.push(Node {
            name: format!("{:04}.{}", character_id, ext),
            offset: (tag.body.start + 2) as u64,
            size: (body.len() - 2) as u64,
            bytes: Some(body[2..].to_vec()),
            key: NodeKey::Tag(ordinal),
        });
    }

    Ok(nodes)
}

pub(super) fn replace(bytes: &[u8], nodes: &[Node]) -> Result<Vec<u8>> {
    let movie = parse(bytes)?;
    let by_ordinal: HashMap<usize, &Node> = nodes
        .iter()
        .filter_map(|node| match node.key {
            NodeKey::Tag(ordinal) => Some((ordinal, node)),
            _ => None,
        })
        .collect();

    let mut out = movie.data[..movie.tags_start].to_vec();
    for (ordinal, tag) in movie.tags.iter().enumerate() {
        let node = by_ordinal
            .get(&ordinal)
            .filter(|_| image_extension(tag.code).is_some() && tag.body.len() >= 2);
        match node {
            Some(node) => {
                let mut body = movie.data[tag.body.start..tag.body.start + 2].to_vec();
                body.extend_from_slice(node_bytes(node, &movie.data)?);
                write_tag(&mut out, tag.code, &body, tag.long)?;
            }
            None => out.extend_from_slice(&movie.data[tag.start..tag.body.end]),
        }
    }
    out.extend_from_slice(&movie.data[movie.tags_end..]);

    let total = u32::try_from(out.len())
        .map_err(|_| AldError::Container("SWF grew past 4 GiB".to_string()))?;
    out[4..8].copy_from_slice(&total.to_le_bytes());

    if !movie.compressed {
        return Ok(out);
    }
    let mut encoder = ZlibEncoder::new(out[..HEADER_SIZE].to_vec(), Compression::default());
    encoder.write_all(&out[HEADER_SIZE..])?;
    Ok(encoder.finish()?)
}

fn write_tag(out: &mut Vec<u8>, code: u16, body: &[u8], long: bool) -> Result<()> {
    if !long && body.len() < LONG_LENGTH {
        out.extend_from_slice(&(code << 6 | body.len() as u16).to_le_bytes());
    } else {
        let len = u32::try_from(body.len())
            .map_err(|_| AldError::Container("SWF tag body is too large".to_string()))?;
        out.extend_from_slice(&(code << 6 | LONG_LENGTH as u16).to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
    }
    out.extend_from_slice(body);
    Ok(())
}
