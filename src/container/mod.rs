//! Container introspection
//!
//! Some entry payloads are themselves containers of named images: Flash movies
//! (SWF, and the AFF wrapper around them), FLAT scenes, and WIPF image stacks.
//! [`discover`] sniffs the signature and enumerates the nodes inside;
//! [`rebuild`] produces new container bytes with updated node contents while
//! leaving everything else as it was.

mod aff;
mod flat;
mod swf;
mod wipf;

use crate::error::{AldError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Sub-formats whose support can be switched off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubFormat {
    /// `.swf` and `.aff`
    Swf,
    /// `.flat`
    Flat,
    /// `.wip` and `.msk`
    Wipf,
}

/// Answers whether this build handles a given sub-format
pub trait FormatSupport {
    fn supports(&self, format: SubFormat) -> bool;
}

/// Per-format switches, loaded from the `[formats]` config table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub swf: bool,
    pub flat: bool,
    pub wipf: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            swf: true,
            flat: true,
            wipf: true,
        }
    }
}

impl FormatSupport for Capabilities {
    fn supports(&self, format: SubFormat) -> bool {
        match format {
            SubFormat::Swf => self.swf,
            SubFormat::Flat => self.flat,
            SubFormat::Wipf => self.wipf,
        }
    }
}

/// Sub-format implied by a lowercase file extension
pub fn sub_format_for_extension(ext: &str) -> Option<SubFormat> {
    match ext {
        "swf" | "aff" => Some(SubFormat::Swf),
        "flat" => Some(SubFormat::Flat),
        "wip" | "msk" => Some(SubFormat::Wipf),
        _ => None,
    }
}

/// Identifies a node's slot within its container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// Ordinal of an image tag in a SWF tag stream
    Tag(usize),
    /// The thumbnail chunk of a FLAT file
    Thumbnail,
    /// Element of a FLAT library
    Library(usize),
    /// Image of a WIPF stack
    Image(usize),
}

/// A named resource inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    /// Byte offset within the container
    pub offset: u64,
    /// Byte length within the container
    pub size: u64,
    /// Node bytes, when they differ from the raw range at `offset`. WIPF
    /// nodes wrap their range in a single-image header, so these can be
    /// longer than `size`.
    pub bytes: Option<Vec<u8>>,
    pub key: NodeKey,
}

impl Node {
    /// Length of the node's bytes
    pub fn len(&self) -> u64 {
        match &self.bytes {
            Some(bytes) => bytes.len() as u64,
            None => self.size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Container formats, chosen by signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Flat,
    Aff,
    Swf,
    Wipf,
}

impl ContainerKind {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes.get(..3)? {
            b"FLA" => return Some(Self::Flat),
            b"AFF" => return Some(Self::Aff),
            b"FWS" | b"CWS" => return Some(Self::Swf),
            _ => {}
        }
        match bytes.get(..4)? {
            b"WIPF" => Some(Self::Wipf),
            b"ELNA" => Some(Self::Flat),
            _ => None,
        }
    }

    pub fn enumerate(self, bytes: &[u8]) -> Result<Vec<Node>> {
        match self {
            Self::Flat => flat::enumerate(bytes),
            Self::Aff => aff::enumerate(bytes),
            Self::Swf => swf::enumerate(bytes),
            Self::Wipf => wipf::enumerate(bytes),
        }
    }

    /// New container bytes with each node's slot holding the node's bytes.
    ///
    /// Data not covered by a node is carried over from `bytes` unchanged.
    pub fn replace(self, bytes: &[u8], nodes: &[Node]) -> Result<Vec<u8>> {
        match self {
            Self::Flat => flat::replace(bytes, nodes),
            Self::Aff => aff::replace(bytes, nodes),
            Self::Swf => swf::replace(bytes, nodes),
            Self::Wipf => wipf::replace(bytes, nodes),
        }
    }
}

/// Nodes inside a container payload.
///
/// Unknown signatures and malformed containers both yield `None`; a broken
/// container is written through untouched rather than failing the caller.
pub fn discover(bytes: &[u8]) -> Option<Vec<Node>> {
    let kind = ContainerKind::sniff(bytes)?;
    match kind.enumerate(bytes) {
        Ok(nodes) if nodes.is_empty() => None,
        Ok(nodes) => Some(nodes),
        Err(err) => {
            warn!("{:?} container could not be enumerated: {}", kind, err);
            None
        }
    }
}

/// Re-encode a container with updated nodes
pub fn rebuild(bytes: &[u8], nodes: &[Node]) -> Result<Vec<u8>> {
    let kind = ContainerKind::sniff(bytes)
        .ok_or_else(|| AldError::Container("unrecognized container signature".to_string()))?;
    kind.replace(bytes, nodes)
}

/// Extension for an image payload, judged by its leading bytes
pub(crate) fn sniff_image_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "jpg"
    } else if bytes.starts_with(b"QNT\0") {
        "qnt"
    } else if bytes.starts_with(b"AJP\0") {
        "ajp"
    } else if bytes.starts_with(b"DCF\x20") {
        "dcf"
    } else if bytes.starts_with(b"BM") {
        "bmp"
    } else {
        "bin"
    }
}

/// Node bytes, or the raw range they occupy in `container`
pub(crate) fn node_bytes<'a>(node: &'a Node, container: &'a [u8]) -> Result<&'a [u8]> {
    if let Some(bytes) = &node.bytes {
        return Ok(bytes);
    }
    let start = node.offset as usize;
    container
        .get(start..start + node.size as usize)
        .ok_or_else(|| AldError::Container(format!("node {} lies outside the container", node.name)))
}
