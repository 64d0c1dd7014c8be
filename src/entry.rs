//! Archive entries
//!
//! An [`Entry`] describes one logical file: its name, its stable file number,
//! the volume letter it belongs to, and where its bytes live. Payloads are read
//! lazily from the owning volume file; a pending [`Replacement`] shadows the
//! stored bytes until the next save.
//!
//! Entries whose extension names a container format can expose named
//! sub-resources. Discovery runs once and is cached in [`SubResources`].

use crate::archive::format::read_exact_vec;
use crate::archive::index_block::MAX_FILE_NUMBER;
use crate::container::{self, FormatSupport, Node, SubFormat};
use crate::error::Result;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Externally supplied payload that shadows an entry's stored bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Read from this file at save time
    File(PathBuf),
    /// Use these bytes
    Bytes(Vec<u8>),
}

impl Replacement {
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Replacement::File(path) => Ok(fs::read(path)?),
            Replacement::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Byte range of an entry's stored payload inside a volume file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataSource {
    pub path: PathBuf,
    pub offset: u64,
    pub size: u64,
}

impl DataSource {
    fn read(&self) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        read_exact_vec(file, self.size as usize)
    }
}

/// Cached result of sub-resource discovery
#[derive(Debug, Clone, Default)]
pub enum SubResources {
    /// Discovery has not run
    #[default]
    Unprobed,
    /// Discovery ran and found nothing
    Empty,
    /// Discovery ran and found these synthetic entries
    Found(Vec<Entry>),
}

/// Link from a synthetic sub-entry back to the container it came from.
///
/// The parent is named, not owned; resolve it through the collection.
#[derive(Debug, Clone)]
pub struct NodeOrigin {
    parent: String,
    node: Node,
}

impl NodeOrigin {
    /// Name of the container entry
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn node(&self) -> &Node {
        &self.node
    }
}

/// One logical file record
#[derive(Debug, Clone)]
pub struct Entry {
    /// Name used as the lookup key (unique, case-insensitive)
    pub name: String,
    /// Stable file number; 0 means unassigned
    pub number: u32,
    /// Volume this entry should belong to
    pub letter: u8,
    /// Payload offset within the volume file
    pub offset: u64,
    /// Payload length
    pub size: u64,
    /// Position within the owning volume; `None` for synthetic sub-entries
    pub index: Option<usize>,
    /// FILETIME stamp kept by formats that store one
    pub timestamp: u64,
    replacement: Option<Replacement>,
    source: Option<DataSource>,
    sub_resources: SubResources,
    origin: Option<NodeOrigin>,
}

impl Entry {
    /// New entry with no stored data
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: 0,
            letter: 1,
            offset: 0,
            size: 0,
            index: None,
            timestamp: 0,
            replacement: None,
            source: None,
            sub_resources: SubResources::Unprobed,
            origin: None,
        }
    }

    pub fn with_number(mut self, number: u32) -> Self {
        self.number = number;
        self
    }

    pub fn with_letter(mut self, letter: u8) -> Self {
        self.letter = letter;
        self
    }

    pub fn with_replacement(mut self, replacement: Replacement) -> Self {
        self.set_replacement(replacement);
        self
    }

    /// Entry backed by a byte range of a volume file
    pub(crate) fn stored(
        name: String,
        letter: u8,
        path: &Path,
        offset: u64,
        size: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            name,
            letter,
            offset,
            size,
            timestamp,
            source: Some(DataSource {
                path: path.to_path_buf(),
                offset,
                size,
            }),
            ..Self::new(String::new())
        }
    }

    pub fn has_pending_replacement(&self) -> bool {
        self.replacement.is_some()
    }

    pub fn replacement(&self) -> Option<&Replacement> {
        self.replacement.as_ref()
    }

    /// Shadow the stored payload.
    ///
    /// Replacing a container discards its discovered sub-resources, since
    /// their offsets refer to the old bytes.
    pub fn set_replacement(&mut self, replacement: Replacement) {
        self.replacement = Some(replacement);
        if self.origin.is_none() {
            self.sub_resources = SubResources::Unprobed;
        }
    }

    pub fn clear_replacement(&mut self) {
        self.replacement = None;
    }

    /// Any already-discovered sub-resource has a pending replacement
    pub fn has_dirty_sub_resources(&self) -> bool {
        match &self.sub_resources {
            SubResources::Found(children) => children.iter().any(Entry::has_pending_replacement),
            _ => false,
        }
    }

    /// The entry would serialize differently from what is on disk
    pub fn is_modified(&self) -> bool {
        self.has_pending_replacement() || self.has_dirty_sub_resources()
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin.is_some()
    }

    pub fn origin(&self) -> Option<&NodeOrigin> {
        self.origin.as_ref()
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.origin.as_ref().map(NodeOrigin::parent)
    }

    /// Lowercase extension without the dot
    pub fn extension(&self) -> String {
        let base = self.name.rsplit(['\\', '/']).next().unwrap_or(&self.name);
        match base.rfind('.') {
            Some(dot) => base[dot + 1..].to_ascii_lowercase(),
            None => String::new(),
        }
    }

    /// Container sub-format implied by the extension
    pub fn sub_format(&self) -> Option<SubFormat> {
        container::sub_format_for_extension(&self.extension())
    }

    /// Whether this entry may hold sub-resources.
    ///
    /// Synthetic sub-entries never do; containers nest one level only.
    pub fn is_container(&self, support: &dyn FormatSupport) -> bool {
        if self.origin.is_some() {
            return false;
        }
        self.sub_format().is_some_and(|format| support.supports(format))
    }

    pub fn probe_state(&self) -> &SubResources {
        &self.sub_resources
    }

    /// Sub-resources, discovering them on first use.
    ///
    /// Returns `None` for entries that are not containers, or containers in
    /// which nothing was found. Both outcomes are cached.
    pub fn sub_resources(&mut self, support: &dyn FormatSupport) -> Result<Option<&[Entry]>> {
        if !self.is_container(support) {
            return Ok(None);
        }

        if matches!(self.sub_resources, SubResources::Unprobed) {
            let bytes = self.current_bytes()?;
            self.sub_resources = match container::discover(&bytes) {
                Some(nodes) => {
                    debug!("{}: discovered {} sub-resources", self.name, nodes.len());
                    let children = nodes
                        .into_iter()
                        .map(|node| self.materialize(node, &bytes))
                        .collect();
                    SubResources::Found(children)
                }
                None => SubResources::Empty,
            };
        }

        Ok(self.discovered_sub_resources())
    }

    /// Sub-resources already discovered, without probing
    pub fn discovered_sub_resources(&self) -> Option<&[Entry]> {
        match &self.sub_resources {
            SubResources::Found(children) => Some(children),
            _ => None,
        }
    }

    pub fn sub_resources_mut(&mut self) -> Option<&mut [Entry]> {
        match &mut self.sub_resources {
            SubResources::Found(children) => Some(children),
            _ => None,
        }
    }

    /// Forget discovered sub-resources and any edits made to them
    pub fn clear_sub_resources(&mut self) {
        self.sub_resources = SubResources::Unprobed;
    }

    /// Synthetic entry for a node. Its offset and size span the node's
    /// stored range in the volume, even when the node's bytes are a
    /// re-wrapped copy of that range.
    fn materialize(&self, mut node: Node, container: &[u8]) -> Entry {
        let size = node.size;
        // Nodes of unsaved bytes cannot be re-read from a volume file later
        if node.bytes.is_none() && (self.replacement.is_some() || self.source.is_none()) {
            let start = node.offset as usize;
            node.bytes = container.get(start..start + size as usize).map(<[u8]>::to_vec);
        }
        let source = match (&node.bytes, &self.source) {
            (None, Some(source)) => Some(DataSource {
                path: source.path.clone(),
                offset: source.offset + node.offset,
                size,
            }),
            _ => None,
        };
        Entry {
            name: node.name.clone(),
            letter: self.letter,
            offset: self.offset + node.offset,
            size,
            index: None,
            timestamp: self.timestamp,
            source,
            origin: Some(NodeOrigin {
                parent: self.name.clone(),
                node,
            }),
            ..Entry::new(String::new())
        }
    }

    /// Bytes as stored, ignoring any replacement
    pub fn original_bytes(&self) -> Result<Vec<u8>> {
        if let Some(bytes) = self.origin.as_ref().and_then(|o| o.node.bytes.as_ref()) {
            return Ok(bytes.clone());
        }
        match &self.source {
            Some(source) => source.read(),
            None => Ok(Vec::new()),
        }
    }

    /// Replacement bytes if present, otherwise the stored bytes
    pub fn current_bytes(&self) -> Result<Vec<u8>> {
        match &self.replacement {
            Some(replacement) => replacement.read(),
            None => self.original_bytes(),
        }
    }

    /// Bytes to serialize for this entry.
    ///
    /// A container is re-encoded only when one of its discovered
    /// sub-resources carries a replacement; otherwise its bytes are written
    /// through unchanged.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let base = self.current_bytes()?;
        let SubResources::Found(children) = &self.sub_resources else {
            return Ok(base);
        };
        if !children.iter().any(Entry::has_pending_replacement) {
            return Ok(base);
        }

        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            let Some(origin) = &child.origin else { continue };
            let mut node = origin.node.clone();
            node.bytes = Some(child.child_bytes(&base)?);
            nodes.push(node);
        }
        debug!("{}: re-encoding container with {} nodes", self.name, nodes.len());
        container::rebuild(&base, &nodes)
    }

    /// Bytes of a synthetic sub-entry, slicing the container when the node
    /// did not capture its own bytes
    fn child_bytes(&self, container: &[u8]) -> Result<Vec<u8>> {
        if let Some(replacement) = &self.replacement {
            return replacement.read();
        }
        let Some(origin) = &self.origin else {
            return self.original_bytes();
        };
        if let Some(bytes) = &origin.node.bytes {
            return Ok(bytes.clone());
        }
        let start = origin.node.offset as usize;
        let end = start + origin.node.size as usize;
        match container.get(start..end) {
            Some(slice) => Ok(slice.to_vec()),
            None => self.original_bytes(),
        }
    }

    /// Point the entry at its freshly committed location
    pub(crate) fn mark_committed(&mut self, path: &Path, offset: u64, size: u64) {
        self.offset = offset;
        self.size = size;
        self.source = Some(DataSource {
            path: path.to_path_buf(),
            offset,
            size,
        });
        self.replacement = None;
        self.sub_resources = SubResources::Unprobed;
    }

    /// Follow a volume file that was renamed on disk
    pub(crate) fn relocate(&mut self, from: &Path, to: &Path) {
        if let Some(source) = &mut self.source {
            if source.path == from {
                source.path = to.to_path_buf();
            }
        }
        if let SubResources::Found(children) = &mut self.sub_resources {
            for child in children {
                child.relocate(from, to);
            }
        }
    }

    /// Copy destined for another volume
    pub(crate) fn clone_for_letter(&self, letter: u8) -> Entry {
        let mut copy = self.clone();
        copy.letter = letter;
        copy
    }

    /// Stored payload range, when the entry has been read from or written
    /// to a volume
    pub(crate) fn stored_range(&self) -> Option<&DataSource> {
        self.source.as_ref()
    }

    /// Path of the file backing this entry's stored bytes
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_ref().map(|s| s.path.as_path())
    }
}

/// File number implied by a name: the longest run of ASCII digits.
///
/// The first run wins ties. Names without digits, or with a run past
/// [`MAX_FILE_NUMBER`], yield 0.
pub fn number_from_name(name: &str) -> u32 {
    let mut best: &str = "";
    let mut run_start: Option<usize> = None;

    for (i, c) in name.char_indices().chain(std::iter::once((name.len(), ' '))) {
        if c.is_ascii_digit() {
            run_start.get_or_insert(i);
        } else if let Some(start) = run_start.take() {
            if i - start > best.len() {
                best = &name[start..i];
            }
        }
    }

    best.parse()
        .ok()
        .filter(|&number| number <= MAX_FILE_NUMBER)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Capabilities;

    #[test]
    fn test_number_from_name() {
        assert_eq!(number_from_name("CG00123.qnt"), 123);
        assert_eq!(number_from_name("bg12_00045.qnt"), 45);
        assert_eq!(number_from_name("a1b2"), 1);
        assert_eq!(number_from_name("readme.txt"), 0);
        assert_eq!(number_from_name("99999999999.bin"), 0);
        assert_eq!(number_from_name("7"), 7);
        // Timestamps are not file numbers
        assert_eq!(number_from_name("IMG_1700000000.png"), 0);
        assert_eq!(number_from_name("CG16777215.qnt"), 16_777_215);
    }

    #[test]
    fn test_extension() {
        assert_eq!(Entry::new("cg\\Title.SWF").extension(), "swf");
        assert_eq!(Entry::new("dir.v2/noext").extension(), "");
        assert_eq!(Entry::new("movie.aff").sub_format(), Some(SubFormat::Swf));
        assert_eq!(Entry::new("mask.msk").sub_format(), Some(SubFormat::Wipf));
    }

    #[test]
    fn test_container_detection_respects_capabilities() {
        let entry = Entry::new("scene.flat");
        assert!(entry.is_container(&Capabilities::default()));

        let no_flat = Capabilities {
            flat: false,
            ..Capabilities::default()
        };
        assert!(!entry.is_container(&no_flat));
        assert!(!Entry::new("image.qnt").is_container(&Capabilities::default()));
    }

    #[test]
    fn test_replacement_shadows_payload() {
        let mut entry = Entry::new("a.bin");
        assert!(entry.payload().unwrap().is_empty());
        assert!(!entry.is_modified());

        entry.set_replacement(Replacement::Bytes(b"new".to_vec()));
        assert!(entry.has_pending_replacement());
        assert_eq!(entry.payload().unwrap(), b"new");
    }

    #[test]
    fn test_unrecognized_container_is_cached_as_empty() {
        let mut entry = Entry::new("broken.swf")
            .with_replacement(Replacement::Bytes(b"not a movie".to_vec()));
        let caps = Capabilities::default();
        assert!(entry.sub_resources(&caps).unwrap().is_none());
        assert!(matches!(entry.probe_state(), SubResources::Empty));
    }
}
