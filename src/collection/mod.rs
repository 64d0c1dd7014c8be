//! The logical archive
//!
//! A [`Collection`] owns every volume of one archive, keeps them sorted by
//! letter, and maintains the global views over their entries: the flattened
//! entry sequence and the by-number and by-name lookups. Structural changes go
//! through [`Collection::refresh`], which moves entries whose letter no longer
//! matches their volume and then rebuilds every lookup from scratch.

mod patch;

pub use patch::{merge_patch_entries, PatchReport};

use crate::archive::format::validate_letter;
use crate::archive::index_block::{self, IndexRecord};
use crate::archive::naming::{find_siblings, letter_of, volume_path};
use crate::archive::{ArchiveKind, StagedWrite, Volume};
use crate::container::{Capabilities, FormatSupport};
use crate::entry::{Entry, Replacement};
use crate::error::{AldError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Position of an entry: volume slot within the collection, then position
/// within that volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryLocation {
    pub volume: usize,
    pub index: usize,
}

/// What `add_entries` does with a name that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Add the new entry alongside the existing one
    Append,
    /// Hand the new payload to the existing entry as its replacement
    Merge,
}

/// All volumes of one logical archive
pub struct Collection {
    volumes: Vec<Volume>,
    entries: Vec<EntryLocation>,
    by_number: HashMap<u32, EntryLocation>,
    by_name: HashMap<String, EntryLocation>,
    known_path: PathBuf,
    support: Box<dyn FormatSupport + Send + Sync>,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// Empty collection with every container format enabled
    pub fn new() -> Self {
        Self {
            volumes: Vec::new(),
            entries: Vec::new(),
            by_number: HashMap::new(),
            by_name: HashMap::new(),
            known_path: PathBuf::new(),
            support: Box::new(Capabilities::default()),
        }
    }

    /// Use `support` to decide which entries are containers
    pub fn with_format_support(mut self, support: impl FormatSupport + Send + Sync + 'static) -> Self {
        self.support = Box::new(support);
        self
    }

    pub fn format_support(&self) -> &dyn FormatSupport {
        &*self.support
    }

    /// New archive with a single empty volume, not yet written
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let kind = ArchiveKind::require(path)?;
        let letter = if kind.is_lettered() {
            letter_of(kind, path).unwrap_or(1)
        } else {
            1
        };

        let mut collection = Self::new();
        collection.known_path = path.to_path_buf();
        collection.volumes.push(Volume::new(kind, letter, path));
        collection.refresh();
        Ok(collection)
    }

    /// Read an archive starting from any one of its volume files
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut collection = Self::new();
        collection.read(path.as_ref())?;
        Ok(collection)
    }

    /// Replace the contents of this collection with the archive at `path`.
    ///
    /// Lettered kinds load every sibling volume; a missing archive is
    /// `NotFound`. Single-volume kinds load exactly one file.
    pub fn read(&mut self, path: &Path) -> Result<()> {
        let kind = ArchiveKind::require(path)?;
        self.known_path = path.to_path_buf();
        self.volumes.clear();

        if kind.is_lettered() {
            let siblings = find_siblings(path)?;
            if siblings.is_empty() {
                return Err(AldError::NotFound(path.to_path_buf()));
            }
            for sibling in &siblings {
                self.volumes.push(Volume::read(sibling)?);
            }
            self.volumes.sort_by_key(|volume| volume.letter);

            let block = self
                .volumes
                .iter()
                .find_map(|volume| volume.index_block())
                .map(<[u8]>::to_vec);
            if let Some(block) = block {
                self.apply_index_block(&block);
            }
        } else {
            self.volumes.push(Volume::read(path)?);
        }

        self.refresh();
        info!(
            "Opened {} archive {} ({} volumes, {} entries)",
            kind.name(),
            path.display(),
            self.volumes.len(),
            self.entries.len()
        );
        Ok(())
    }

    /// Assign file numbers from an index block.
    ///
    /// Every number is cleared first. Records naming a letter without a
    /// volume, or a position past the end of one, are skipped.
    pub fn apply_index_block(&mut self, bytes: &[u8]) {
        let Some(layout) = self.kind().and_then(ArchiveKind::index_layout) else {
            return;
        };

        for entry in self.volumes.iter_mut().flat_map(|v| v.entries.iter_mut()) {
            entry.number = 0;
        }

        let mut assigned = 0usize;
        for record in index_block::decode(bytes, layout) {
            let Some(volume) = self.volumes.iter_mut().find(|v| v.letter == record.letter) else {
                continue;
            };
            if let Some(entry) = volume.entries.get_mut(record.position) {
                entry.number = record.number;
                assigned += 1;
            }
        }
        debug!("Index block assigned {} file numbers", assigned);
        self.rebuild_indexes();
    }

    /// Index block for the current numbering, or `None` for kinds without one
    pub fn encode_index_block(&self) -> Result<Option<Vec<u8>>> {
        let Some(layout) = self.kind().and_then(ArchiveKind::index_layout) else {
            return Ok(None);
        };
        let records = index_records(self.volumes.iter().map(|v| (v.letter, v.entries.as_slice())));
        Ok(Some(index_block::encode(&records, layout)?))
    }

    /// Move entries into the volume their letter names, then rebuild every
    /// lookup
    pub fn refresh(&mut self) {
        let Some(kind) = self.kind() else {
            self.rebuild_indexes();
            return;
        };

        let mut moving = Vec::new();
        for volume in &mut self.volumes {
            let letter = volume.letter;
            if !kind.is_lettered() {
                for entry in &mut volume.entries {
                    entry.letter = letter;
                }
                continue;
            }
            let (stay, leave): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut volume.entries)
                .into_iter()
                .partition(|entry| entry.letter == letter);
            volume.entries = stay;
            moving.extend(leave.into_iter().map(|entry| (letter, entry)));
        }

        for (from, mut entry) in moving {
            if validate_letter(entry.letter).is_err() {
                warn!(
                    "{} names volume {} which does not exist; leaving it in volume {}",
                    entry.name, entry.letter, from
                );
                entry.letter = from;
            }
            debug!("Moving {} from volume {} to {}", entry.name, from, entry.letter);
            let slot = self.volume_slot(kind, entry.letter);
            self.volumes[slot].entries.push(entry);
        }

        self.rebuild_indexes();
    }

    /// Discard and rebuild the flattened sequence and both lookups.
    ///
    /// Every entry's `index` is reset to its position in its volume.
    pub fn rebuild_indexes(&mut self) {
        self.entries.clear();
        self.by_number.clear();
        self.by_name.clear();

        for (v, volume) in self.volumes.iter_mut().enumerate() {
            for (i, entry) in volume.entries.iter_mut().enumerate() {
                entry.index = Some(i);
                let location = EntryLocation { volume: v, index: i };
                if entry.number != 0 && self.by_number.insert(entry.number, location).is_some() {
                    debug!("File number {} appears more than once; {} wins", entry.number, entry.name);
                }
                self.by_name.insert(entry.name.to_lowercase(), location);
                self.entries.push(location);
            }
        }
    }

    /// Slot of the volume carrying `letter`, creating an empty one if needed
    fn volume_slot(&mut self, kind: ArchiveKind, letter: u8) -> usize {
        if let Some(slot) = self.volumes.iter().position(|v| v.letter == letter) {
            return slot;
        }
        let path = volume_path(kind, &self.base_path(), letter);
        debug!("Creating volume {} at {}", letter, path.display());
        let slot = self.volumes.partition_point(|v| v.letter < letter);
        self.volumes.insert(slot, Volume::new(kind, letter, path));
        slot
    }

    /// Path other volume names are derived from
    fn base_path(&self) -> PathBuf {
        self.volumes
            .first()
            .map(|v| v.path.clone())
            .unwrap_or_else(|| self.known_path.clone())
    }

    // Lookups

    pub fn kind(&self) -> Option<ArchiveKind> {
        self.volumes
            .first()
            .map(|v| v.kind)
            .or_else(|| ArchiveKind::from_path(&self.known_path))
    }

    /// File name of the archive: the first volume's, or the name it was
    /// opened or created with
    pub fn path(&self) -> PathBuf {
        self.base_path()
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn volume_by_letter(&self, letter: u8) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.letter == letter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Locations of every entry, volume by volume
    pub fn locations(&self) -> &[EntryLocation] {
        &self.entries
    }

    /// Every entry, volume by volume
    pub fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.entries.iter().filter_map(|location| self.entry_at(*location))
    }

    pub fn entry_at(&self, location: EntryLocation) -> Option<&Entry> {
        self.volumes.get(location.volume)?.entries.get(location.index)
    }

    pub fn entry_at_mut(&mut self, location: EntryLocation) -> Option<&mut Entry> {
        self.volumes.get_mut(location.volume)?.entries.get_mut(location.index)
    }

    pub fn locate_number(&self, number: u32) -> Option<EntryLocation> {
        self.by_number.get(&number).copied()
    }

    /// Case-insensitive
    pub fn locate_name(&self, name: &str) -> Option<EntryLocation> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn by_number(&self, number: u32) -> Option<&Entry> {
        self.entry_at(self.locate_number(number)?)
    }

    pub fn by_name(&self, name: &str) -> Option<&Entry> {
        self.entry_at(self.locate_name(name)?)
    }

    /// Entries that would be written differently from what is on disk
    pub fn modified_entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.entries().filter(|entry| entry.is_modified())
    }

    fn require_name(&self, name: &str) -> Result<EntryLocation> {
        self.locate_name(name)
            .ok_or_else(|| AldError::EntryNotFound(name.to_string()))
    }

    // Sub-resources

    /// Sub-resources of the entry at `location`, discovering them if needed
    pub fn sub_resources_at_mut(&mut self, location: EntryLocation) -> Result<Option<&mut [Entry]>> {
        let support = &*self.support;
        let entry = self
            .volumes
            .get_mut(location.volume)
            .and_then(|v| v.entries.get_mut(location.index))
            .ok_or_else(|| AldError::EntryNotFound(format!("{:?}", location)))?;
        if entry.sub_resources(support)?.is_none() {
            return Ok(None);
        }
        Ok(entry.sub_resources_mut())
    }

    /// Sub-resources of the named entry, discovering them if needed
    pub fn sub_resources(&mut self, name: &str) -> Result<Option<&[Entry]>> {
        let location = self.require_name(name)?;
        Ok(self.sub_resources_at_mut(location)?.map(|children| &*children))
    }

    // Mutation

    /// Give the named entry a pending replacement
    pub fn replace(&mut self, name: &str, replacement: Replacement) -> Result<()> {
        let location = self.require_name(name)?;
        if let Some(entry) = self.entry_at_mut(location) {
            entry.set_replacement(replacement);
        }
        self.refresh();
        Ok(())
    }

    /// Give one sub-resource of a container entry a pending replacement
    pub fn replace_sub_resource(&mut self, parent: &str, child: &str, replacement: Replacement) -> Result<()> {
        let location = self.require_name(parent)?;
        let children = self
            .sub_resources_at_mut(location)?
            .ok_or_else(|| AldError::EntryNotFound(format!("{} has no sub-resources", parent)))?;
        let target = children
            .iter_mut()
            .find(|entry| entry.name.eq_ignore_ascii_case(child))
            .ok_or_else(|| AldError::EntryNotFound(format!("{} in {}", child, parent)))?;
        target.set_replacement(replacement);
        self.refresh();
        Ok(())
    }

    /// Add entries to the volume at `letter`.
    ///
    /// Returns the number of entries added; merged duplicates are not
    /// counted.
    pub fn add_entries(&mut self, letter: u8, entries: Vec<Entry>, policy: DuplicatePolicy) -> Result<usize> {
        let kind = self
            .kind()
            .ok_or_else(|| AldError::ArgumentInvalid("no archive to add entries to".to_string()))?;
        let letter = if kind.is_lettered() {
            validate_letter(letter)?;
            letter
        } else {
            self.volumes.first().map(|v| v.letter).unwrap_or(1)
        };

        // Keyed by (letter, position): volume slots shift when a volume is
        // created mid-batch, letters do not
        let mut names: HashMap<String, (u8, usize)> = HashMap::new();
        if policy == DuplicatePolicy::Merge {
            for volume in &self.volumes {
                for (position, entry) in volume.entries.iter().enumerate() {
                    names.insert(entry.name.to_lowercase(), (volume.letter, position));
                }
            }
        }

        let mut added = 0;
        for mut entry in entries {
            if entry.name.is_empty() {
                return Err(AldError::ArgumentInvalid("entry name is empty".to_string()));
            }
            let key = entry.name.to_lowercase();
            if policy == DuplicatePolicy::Merge {
                if let Some(&(existing_letter, position)) = names.get(&key) {
                    let target = self
                        .volumes
                        .iter_mut()
                        .find(|v| v.letter == existing_letter)
                        .and_then(|v| v.entries.get_mut(position));
                    if let (Some(replacement), Some(target)) = (entry.replacement().cloned(), target) {
                        debug!("{} already exists; replacing its payload", target.name);
                        target.set_replacement(replacement);
                    }
                    continue;
                }
            }
            entry.letter = letter;
            let slot = self.volume_slot(kind, letter);
            let volume = &mut self.volumes[slot];
            volume.entries.push(entry);
            if policy == DuplicatePolicy::Merge {
                names.insert(key, (letter, volume.entries.len() - 1));
            }
            added += 1;
        }

        self.refresh();
        Ok(added)
    }

    /// Remove the entries at `locations`
    pub fn delete(&mut self, locations: &[EntryLocation]) -> Result<usize> {
        let mut doomed = locations.to_vec();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        doomed.dedup();

        if let Some(missing) = doomed.iter().find(|l| self.entry_at(**l).is_none()) {
            return Err(AldError::EntryNotFound(format!("{:?}", missing)));
        }
        for location in &doomed {
            let removed = self.volumes[location.volume].entries.remove(location.index);
            debug!("Deleted {}", removed.name);
        }

        self.refresh();
        Ok(doomed.len())
    }

    /// Remove entries by name
    pub fn delete_by_name(&mut self, names: &[&str]) -> Result<usize> {
        let locations = names
            .iter()
            .map(|name| self.require_name(name))
            .collect::<Result<Vec<_>>>()?;
        self.delete(&locations)
    }

    // Saving

    /// Write every volume under names derived from `path`.
    ///
    /// All volumes are staged to temp files first; nothing is committed unless
    /// every volume staged cleanly.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let kind = self
            .kind()
            .ok_or_else(|| AldError::ArgumentInvalid("no archive to save".to_string()))?;

        if kind.is_lettered() {
            self.volume_slot(kind, 1);
        }
        for volume in &mut self.volumes {
            volume.rebuild_headers();
        }
        self.rebuild_indexes();

        if let Some(block) = self.encode_index_block()? {
            for volume in &mut self.volumes {
                if volume.letter == 1 || kind.index_in_every_volume() {
                    volume.set_index_block(Some(block.clone()));
                }
            }
        }

        let targets: Vec<PathBuf> = self
            .volumes
            .iter()
            .map(|volume| volume_path(kind, path, volume.letter))
            .collect();

        let mut staged = Vec::with_capacity(self.volumes.len());
        for (volume, target) in self.volumes.iter().zip(&targets) {
            match volume.write_temp(target) {
                Ok(write) => staged.push(write),
                Err(err) => {
                    discard_all(staged);
                    return Err(err);
                }
            }
        }

        let mut pending = staged.into_iter();
        for volume in &mut self.volumes {
            let Some(write) = pending.next() else { break };
            if let Err(err) = volume.commit(write) {
                discard_all(pending);
                return Err(err);
            }
        }

        self.known_path = path.to_path_buf();
        self.refresh();
        info!(
            "Saved {} ({} volumes, {} entries)",
            path.display(),
            self.volumes.len(),
            self.entries.len()
        );
        Ok(())
    }
}

/// Index records for volumes given as `(letter, entries)`, in order.
///
/// Later volumes win when a number repeats.
pub(crate) fn index_records<'a>(volumes: impl IntoIterator<Item = (u8, &'a [Entry])>) -> Vec<IndexRecord> {
    volumes
        .into_iter()
        .flat_map(|(letter, entries)| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.number != 0)
                .map(move |(position, entry)| IndexRecord {
                    number: entry.number,
                    letter,
                    position,
                })
        })
        .collect()
}

fn discard_all(staged: impl IntoIterator<Item = StagedWrite>) {
    for write in staged {
        write.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(data: &[u8]) -> Replacement {
        Replacement::Bytes(data.to_vec())
    }

    fn two_volume_dat() -> Collection {
        let mut collection = Collection::create("ACG.DAT").unwrap();
        let entries = vec![
            Entry::new("a0").with_replacement(bytes(b"a0")),
            Entry::new("a1").with_replacement(bytes(b"a1")),
        ];
        collection.add_entries(1, entries, DuplicatePolicy::Append).unwrap();
        collection
            .add_entries(2, vec![Entry::new("b0").with_replacement(bytes(b"b0"))], DuplicatePolicy::Append)
            .unwrap();
        collection
    }

    #[test]
    fn test_decode_two_volume_scenario() {
        let mut collection = two_volume_dat();
        collection.apply_index_block(&[1, 1, 2, 1, 1, 2]);

        assert_eq!(collection.by_name("a0").unwrap().number, 1);
        assert_eq!(collection.by_name("b0").unwrap().number, 2);
        assert_eq!(collection.by_name("a1").unwrap().number, 3);
        assert_eq!(collection.by_number(3).unwrap().name, "a1");
    }

    #[test]
    fn test_decode_skips_missing_volume_and_position() {
        let mut collection = two_volume_dat();
        // Letter 5 has no volume; position 9 is past the end of volume 1
        collection.apply_index_block(&[5, 1, 1, 9, 1, 1]);
        assert_eq!(collection.by_name("a0").unwrap().number, 3);
        assert_eq!(collection.by_name("a1").unwrap().number, 0);
        assert!(collection.by_number(1).is_none());
    }

    #[test]
    fn test_encode_reproduces_decoded_block() {
        let mut collection = two_volume_dat();
        let block = [1u8, 1, 2, 1, 1, 2];
        collection.apply_index_block(&block);
        assert_eq!(collection.encode_index_block().unwrap().unwrap(), block);
    }

    #[test]
    fn test_refresh_migrates_by_letter() {
        let mut collection = two_volume_dat();
        let location = collection.locate_name("a0").unwrap();
        collection.entry_at_mut(location).unwrap().letter = 2;
        collection.refresh();

        let a = collection.volume_by_letter(1).unwrap();
        let b = collection.volume_by_letter(2).unwrap();
        assert_eq!(a.entries.len(), 1);
        assert_eq!(a.entries[0].name, "a1");
        assert_eq!(a.entries[0].index, Some(0));
        assert_eq!(b.entries.iter().filter(|e| e.name == "a0").count(), 1);
        assert_eq!(collection.entries().filter(|e| e.name == "a0").count(), 1);
    }

    #[test]
    fn test_refresh_creates_missing_volume() {
        let mut collection = two_volume_dat();
        let location = collection.locate_name("b0").unwrap();
        collection.entry_at_mut(location).unwrap().letter = 4;
        collection.refresh();

        let letters: Vec<u8> = collection.volumes().iter().map(|v| v.letter).collect();
        assert_eq!(letters, vec![1, 2, 4]);
        assert_eq!(collection.volume_by_letter(4).unwrap().path, PathBuf::from("DCG.DAT"));
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let mut collection = two_volume_dat();
        collection.apply_index_block(&[1, 1, 2, 1, 1, 2]);
        collection.refresh();
        let first: Vec<(String, u32, Option<usize>)> =
            collection.entries().map(|e| (e.name.clone(), e.number, e.index)).collect();
        let locations = collection.locations().to_vec();
        collection.refresh();
        let second: Vec<(String, u32, Option<usize>)> =
            collection.entries().map(|e| (e.name.clone(), e.number, e.index)).collect();
        assert_eq!(first, second);
        assert_eq!(locations, collection.locations());
    }

    #[test]
    fn test_lookup_by_name_is_case_insensitive() {
        let collection = two_volume_dat();
        assert!(collection.by_name("A0").is_some());
        assert!(collection.by_name("missing").is_none());
    }

    #[test]
    fn test_merge_policy_replaces_existing() {
        let mut collection = two_volume_dat();
        let added = collection
            .add_entries(1, vec![Entry::new("A1").with_replacement(bytes(b"new"))], DuplicatePolicy::Merge)
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(collection.len(), 3);
        assert_eq!(collection.by_name("a1").unwrap().payload().unwrap(), b"new");
    }

    #[test]
    fn test_merge_policy_folds_names_within_one_batch() {
        let mut collection = two_volume_dat();
        let added = collection
            .add_entries(
                3,
                vec![
                    Entry::new("x.bin").with_replacement(bytes(b"first")),
                    Entry::new("X.BIN").with_replacement(bytes(b"second")),
                    Entry::new("b0").with_replacement(bytes(b"merged")),
                ],
                DuplicatePolicy::Merge,
            )
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(collection.len(), 4);
        let named: Vec<&str> = collection
            .entries()
            .filter(|e| e.name.eq_ignore_ascii_case("x.bin"))
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(named, vec!["x.bin"]);
        assert_eq!(collection.by_name("X.bin").unwrap().payload().unwrap(), b"second");
        assert_eq!(collection.by_name("b0").unwrap().payload().unwrap(), b"merged");
    }

    #[test]
    fn test_add_rejects_bad_letter() {
        let mut collection = two_volume_dat();
        let err = collection
            .add_entries(0, vec![Entry::new("x")], DuplicatePolicy::Append)
            .unwrap_err();
        assert!(matches!(err, AldError::ArgumentInvalid(_)));
    }

    #[test]
    fn test_delete_renumbers_positions() {
        let mut collection = two_volume_dat();
        let removed = collection.delete_by_name(&["a0"]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(collection.by_name("a1").unwrap().index, Some(0));
        assert!(collection.delete_by_name(&["a0"]).is_err());
    }

    #[test]
    fn test_non_lettered_entries_stay_in_their_volume() {
        let mut collection = Collection::create("voice.alk").unwrap();
        collection
            .add_entries(9, vec![Entry::new("x").with_letter(9)], DuplicatePolicy::Append)
            .unwrap();
        assert_eq!(collection.volumes().len(), 1);
        assert_eq!(collection.by_name("x").unwrap().letter, 1);
    }
}
