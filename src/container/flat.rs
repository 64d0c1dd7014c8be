//! FLAT scenes
//!
//! A sequence of chunks, each a 4-byte tag and a u32 length, optionally after
//! an 8-byte `ELNA` preamble. Two chunks hold images:
//!
//! - `TMNL`: the scene thumbnail, raw image bytes.
//! - `LIBL`: the asset library, `u32 count` then per element
//!   `u32 name_len, name (padded to 4), u32 type, u32 data_len, data (padded to 4)`.
//!   Elements of type 2 are images.

use crate::archive::format::{align_up, decode_name, read_u32_at};
use crate::container::{node_bytes, sniff_image_extension, Node, NodeKey};
use crate::error::{AldError, Result};
use std::collections::HashMap;
use std::ops::Range;

const PREAMBLE: &[u8; 4] = b"ELNA";
const PREAMBLE_SIZE: usize = 8;
const CHUNK_HEADER_SIZE: usize = 8;
const THUMBNAIL: &[u8; 4] = b"TMNL";
const LIBRARY: &[u8; 4] = b"LIBL";
const IMAGE_ELEMENT: u32 = 2;

struct Chunk {
    tag: [u8; 4],
    start: usize,
    data: Range<usize>,
}

struct Element {
    name: String,
    kind: u32,
    start: usize,
    end: usize,
    data: Range<usize>,
}

fn chunks(bytes: &[u8]) -> Result<(usize, Vec<Chunk>)> {
    let preamble = if bytes.starts_with(PREAMBLE) { PREAMBLE_SIZE } else { 0 };
    let mut chunks = Vec::new();
    let mut at = preamble;
    while at < bytes.len() {
        let header = bytes
            .get(at..at + CHUNK_HEADER_SIZE)
            .ok_or_else(|| AldError::truncated("FLAT chunk header"))?;
        let tag = [header[0], header[1], header[2], header[3]];
        let len = read_u32_at(header, 4)? as usize;
        let data = at + CHUNK_HEADER_SIZE..at + CHUNK_HEADER_SIZE + len;
        if data.end > bytes.len() {
            return Err(AldError::truncated("FLAT chunk"));
        }
        at = data.end;
        chunks.push(Chunk { tag, start: data.start - CHUNK_HEADER_SIZE, data });
    }
    Ok((preamble, chunks))
}

fn elements(bytes: &[u8], chunk: &Range<usize>) -> Result<Vec<Element>> {
    let library = &bytes[chunk.clone()];
    let count = read_u32_at(library, 0)? as usize;
    let mut elements = Vec::with_capacity(count.min(library.len() / 16));
    let mut at = 4;

    for _ in 0..count {
        let start = at;
        let name_len = read_u32_at(library, at)? as usize;
        at += 4;
        let name_bytes = library
            .get(at..at + name_len)
            .ok_or_else(|| AldError::truncated("FLAT library name"))?;
        let name = decode_name(name_bytes);
        at += align_up(name_len as u64, 4) as usize;

        let kind = read_u32_at(library, at)?;
        let data_len = read_u32_at(library, at + 4)? as usize;
        at += 8;
        if at + data_len > library.len() {
            return Err(AldError::truncated("FLAT library element"));
        }
        let data = chunk.start + at..chunk.start + at + data_len;
        at = (at + align_up(data_len as u64, 4) as usize).min(library.len());

        elements.push(Element {
            name,
            kind,
            start: chunk.start + start,
            end: chunk.start + at,
            data,
        });
    }

    Ok(elements)
}

pub(super) fn enumerate(bytes: &[u8]) -> Result<Vec<Node>> {
    let (_, chunks) = chunks(bytes)?;
    let mut nodes = Vec::new();

    for chunk in &chunks {
        if &chunk.tag == THUMBNAIL && !chunk.data.is_empty() {
            let image = &bytes[chunk.data.clone()];
            nodes.push(Node {
                name: format!("thumbnail.{}", sniff_image_extension(image)),
                offset: chunk.data.start as u64,
                size: chunk.data.len() as u64,
                bytes: None,
                key: NodeKey::Thumbnail,
            });
        } else if &chunk.tag == LIBRARY {
            for (i, element) in elements(bytes, &chunk.data)?.into_iter().enumerate() {
                if element.kind != IMAGE_ELEMENT {
                    continue;
                }
                let name = if element.name.contains('.') {
                    element.name
                } else {
                    format!("{}.{}", element.name, sniff_image_extension(&bytes[element.data.clone()]))
                };
                nodes.push(Node {
                    name,
                    offset: element.data.start as u64,
                    size: element.data.len() as u64,
                    bytes: None,
                    key: NodeKey::Library(i),
                });
            }
        }
    }

    Ok(nodes)
}

pub(super) fn replace(bytes: &[u8], nodes: &[Node]) -> Result<Vec<u8>> {
    let (preamble, chunks) = chunks(bytes)?;
    let thumbnail = nodes.iter().find(|node| node.key == NodeKey::Thumbnail);
    let library: HashMap<usize, &Node> = nodes
        .iter()
        .filter_map(|node| match node.key {
            NodeKey::Library(i) => Some((i, node)),
            _ => None,
        })
        .collect();

    let mut out = bytes[..preamble].to_vec();
    for chunk in &chunks {
        match thumbnail {
            Some(node) if &chunk.tag == THUMBNAIL => {
                write_chunk(&mut out, &chunk.tag, node_bytes(node, bytes)?)?;
                continue;
            }
            _ => {}
        }
        if &chunk.tag == LIBRARY && !library.is_empty() {
            let body = rebuild_library(bytes, &chunk.data, &library)?;
            write_chunk(&mut out, &chunk.tag, &body)?;
            continue;
        }
        out.extend_from_slice(&bytes[chunk.start..chunk.data.end]);
    }

    Ok(out)
}

fn rebuild_library(bytes: &[u8], chunk: &Range<usize>, nodes: &HashMap<usize, &Node>) -> Result<Vec<u8>> {
    let elements = elements(bytes, chunk)?;
    let mut body = (elements.len() as u32).to_le_bytes().to_vec();
    let mut consumed = chunk.start + 4;

    for (i, element) in elements.iter().enumerate() {
        consumed = element.end;
        let Some(node) = nodes.get(&i).filter(|_| element.kind == IMAGE_ELEMENT) else {
            body.extend_from_slice(&bytes[element.start..element.end]);
            continue;
        };
        let data = node_bytes(node, bytes)?;
        let data_len = u32::try_from(data.len())
            .map_err(|_| AldError::Container(format!("{} is too large", node.name)))?;
        // Name, padding and type are kept as stored
        body.extend_from_slice(&bytes[element.start..element.data.start - 4]);
        body.extend_from_slice(&data_len.to_le_bytes());
        body.extend_from_slice(data);
        body.resize(body.len() + (align_up(data.len() as u64, 4) as usize - data.len()), 0);
    }
    body.extend_from_slice(&bytes[consumed..chunk.end]);

    Ok(body)
}

fn write_chunk(out: &mut Vec<u8>, tag: &[u8; 4], data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| AldError::Container("FLAT chunk is too large".to_string()))?;
    out.extend_from_slice(tag);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_chunk(&mut out, tag, data).unwrap();
        out
    }

    fn element(name: &str, kind: u32, data: &[u8]) -> Vec<u8> {
        let mut out = (name.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(name.as_bytes());
        out.resize(4 + align_up(name.len() as u64, 4) as usize, 0);
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out.resize(out.len() + (align_up(data.len() as u64, 4) as usize - data.len()), 0);
        out
    }

    fn sample_flat(preamble: bool) -> Vec<u8> {
        let mut library = 3u32.to_le_bytes().to_vec();
        library.extend(element("bg", 2, b"\x89PNG-background"));
        library.extend(element("script", 5, b"code"));
        library.extend(element("chara.qnt", 2, b"QNT\0pixels"));

        let mut out = Vec::new();
        if preamble {
            out.extend_from_slice(b"ELNA\0\0\0\0");
        }
        out.extend(chunk(b"FLAT", &[1, 0, 0, 0]));
        out.extend(chunk(b"TMNL", b"\xFF\xD8thumb"));
        out.extend(chunk(b"LIBL", &library));
        out
    }

    #[test]
    fn test_enumerate_thumbnail_and_library_images() {
        let flat = sample_flat(false);
        let nodes = enumerate(&flat).unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["thumbnail.jpg", "bg.png", "chara.qnt"]);
        assert_eq!(nodes[2].key, NodeKey::Library(2));

        let thumb = &nodes[0];
        let start = thumb.offset as usize;
        assert_eq!(&flat[start..start + thumb.size as usize], b"\xFF\xD8thumb");
    }

    #[test]
    fn test_replace_unchanged_is_identity() {
        let flat = sample_flat(true);
        let nodes = enumerate(&flat).unwrap();
        assert_eq!(replace(&flat, &nodes).unwrap(), flat);
    }

    #[test]
    fn test_replace_library_image() {
        let flat = sample_flat(true);
        let mut nodes = enumerate(&flat).unwrap();
        nodes[1].bytes = Some(b"\x89PNG-a much longer background".to_vec());

        let rebuilt = replace(&flat, &nodes).unwrap();
        assert!(rebuilt.starts_with(b"ELNA"));

        let again = enumerate(&rebuilt).unwrap();
        assert_eq!(again.len(), 3);
        let bg = &again[1];
        let start = bg.offset as usize;
        assert_eq!(
            &rebuilt[start..start + bg.size as usize],
            b"\x89PNG-a much longer background"
        );
        // Untouched element still there
        let chara = &again[2];
        let start = chara.offset as usize;
        assert_eq!(&rebuilt[start..start + chara.size as usize], b"QNT\0pixels");
    }

    #[test]
    fn test_truncated_chunk_is_an_error() {
        let mut flat = sample_flat(false);
        flat.truncate(flat.len() - 3);
        assert!(enumerate(&flat).is_err());
    }
}
