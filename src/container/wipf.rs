//! WIPF image stacks (`.wip`, `.msk`)
//!
//! ```text
//! "WIPF" u16 count u16 bits_per_pixel
//! count x { u32 width, u32 height, u32 x, u32 y, u32 z, u32 data_len }
//! count x { [1024-byte palette when 8 bpp] data }
//! ```
//!
//! Each image is exposed as a standalone single-image WIPF, so it can be
//! exported and replaced with any tool that handles the format.

use crate::archive::format::{read_u16_at, read_u32_at};
use crate::container::{node_bytes, Node, NodeKey};
use crate::error::{AldError, Result};
use std::collections::HashMap;
use std::ops::Range;

const MAGIC: &[u8; 4] = b"WIPF";
const HEADER_SIZE: usize = 8;
const IMAGE_HEADER_SIZE: usize = 24;
const PALETTE_SIZE: usize = 1024;

struct Image {
    header: Range<usize>,
    body: Range<usize>,
}

struct Stack {
    bpp: u16,
    images: Vec<Image>,
    end: usize,
}

fn parse(bytes: &[u8]) -> Result<Stack> {
    if !bytes.starts_with(MAGIC) {
        return Err(AldError::InvalidFormat("missing WIPF signature".to_string()));
    }
    let count = read_u16_at(bytes, 4)? as usize;
    let bpp = read_u16_at(bytes, 6)?;
    let palette = if bpp == 8 { PALETTE_SIZE } else { 0 };

    let mut images = Vec::with_capacity(count);
    let mut body_at = HEADER_SIZE + count * IMAGE_HEADER_SIZE;
    for i in 0..count {
        let header_at = HEADER_SIZE + i * IMAGE_HEADER_SIZE;
        let data_len = read_u32_at(bytes, header_at + 20)? as usize;
        let body = body_at..body_at + palette + data_len;
        if body.end > bytes.len() {
            return Err(AldError::truncated("WIPF image"));
        }
        body_at = body.end;
        images.push(Image {
            header: header_at..header_at + IMAGE_HEADER_SIZE,
            body,
        });
    }

    Ok(Stack {
        bpp,
        images,
        end: body_at,
    })
}

fn standalone(bytes: &[u8], bpp: u16, image: &Image) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + IMAGE_HEADER_SIZE + image.body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&bpp.to_le_bytes());
    out.extend_from_slice(&bytes[image.header.clone()]);
    out.extend_from_slice(&bytes[image.body.clone()]);
    out
}

pub(super) fn enumerate(bytes: &[u8]) -> Result<Vec<Node>> {
    let stack = parse(bytes)?;
    Ok(stack
        .images
        .iter()
        .enumerate()
        .map(|(i, image)| Node {
            name: format!("{:03}.wip", i),
            offset: image.body.start as u64,
            size: image.body.len() as u64,
            bytes: Some(standalone(bytes, stack.bpp, image)),
            key: NodeKey::Image(i),
        })
        .collect())
}

pub(super) fn replace(bytes: &[u8], nodes: &[Node]) -> Result<Vec<u8>> {
    let stack = parse(bytes)?;
    let by_index: HashMap<usize, &Node> = nodes
        .iter()
        .filter_map(|node| match node.key {
            NodeKey::Image(i) => Some((i, node)),
            _ => None,
        })
        .collect();

    let mut headers = Vec::with_capacity(stack.images.len() * IMAGE_HEADER_SIZE);
    let mut bodies = Vec::new();
    for (i, image) in stack.images.iter().enumerate() {
        let Some(node) = by_index.get(&i) else {
            headers.extend_from_slice(&bytes[image.header.clone()]);
            bodies.extend_from_slice(&bytes[image.body.clone()]);
            continue;
        };

        let single = node_bytes(node, bytes)?;
        let parsed = parse(single)
            .map_err(|err| AldError::Container(format!("{}: {}", node.name, err)))?;
        if parsed.images.len() != 1 || parsed.bpp != stack.bpp {
            return Err(AldError::Container(format!(
                "{} must be a single {}-bit WIPF image",
                node.name, stack.bpp
            )));
        }
        let replacement = &parsed.images[0];
        headers.extend_from_slice(&single[replacement.header.clone()]);
        bodies.extend_from_slice(&single[replacement.body.clone()]);
    }

    let mut out = bytes[..HEADER_SIZE].to_vec();
    out.extend(headers);
    out.extend(bodies);
    out.extend_from_slice(&bytes[stack.end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_header(width: u32, height: u32, data_len: usize) -> Vec<u8> {
        [width, height, 0, 0, 0, data_len as u32]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    fn sample_stack(bpp: u16, images: &[&[u8]]) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&(images.len() as u16).to_le_bytes());
        out.extend_from_slice(&bpp.to_le_bytes());
        for data in images {
            out.extend(image_header(4, 4, data.len()));
        }
        for data in images {
            if bpp == 8 {
                out.extend_from_slice(&[0x11; PALETTE_SIZE]);
            }
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_enumerate_standalone_images() {
        let stack = sample_stack(24, &[&b"first"[..], &b"second!"[..]]);
        let nodes = enumerate(&stack).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].name, "001.wip");
        let single = nodes[1].bytes.as_ref().unwrap();
        assert_eq!(single, &sample_stack(24, &[&b"second!"[..]]));
    }

    #[test]
    fn test_palette_is_part_of_the_image() {
        let stack = sample_stack(8, &[&b"px"[..]]);
        let nodes = enumerate(&stack).unwrap();
        assert_eq!(nodes[0].size, (PALETTE_SIZE + 2) as u64);
    }

    #[test]
    fn test_replace_one_image() {
        let stack = sample_stack(24, &[&b"first"[..], &b"second"[..]]);
        let mut nodes = enumerate(&stack).unwrap();
        nodes[0].bytes = Some(sample_stack(24, &[&b"a replacement"[..]]));

        let rebuilt = replace(&stack, &nodes).unwrap();
        assert_eq!(rebuilt, sample_stack(24, &[&b"a replacement"[..], &b"second"[..]]));
    }

    #[test]
    fn test_replace_rejects_mismatched_depth() {
        let stack = sample_stack(24, &[&b"first"[..]]);
        let mut nodes = enumerate(&stack).unwrap();
        nodes[0].bytes = Some(sample_stack(8, &[&b"x"[..]]));
        assert!(replace(&stack, &nodes).is_err());
    }

    #[test]
    fn test_truncated_stack() {
        let mut stack = sample_stack(24, &[&b"first"[..]]);
        stack.truncate(stack.len() - 1);
        assert!(enumerate(&stack).is_err());
    }
}
