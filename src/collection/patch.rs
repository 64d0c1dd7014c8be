//! Patch archives
//!
//! Single-volume kinds get a plain delta file holding only the modified
//! entries. Lettered kinds use the relabel scheme: the original letter-1
//! volume is renamed to a spare letter, modified entries are written to a
//! patch volume, and a small new letter-1 volume carries an index block that
//! points readers at both.

use super::{index_records, Collection};
use crate::archive::format::validate_letter;
use crate::archive::index_block::{self, IndexRecord};
use crate::archive::naming::volume_path;
use crate::archive::Volume;
use crate::entry::Entry;
use crate::error::{AldError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a patch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    /// Files written, in commit order
    pub written: Vec<PathBuf>,
    /// Entries carried by the patch volume
    pub entry_count: usize,
    /// Original letter-1 file and the name it was moved to
    pub renamed: Option<(PathBuf, PathBuf)>,
}

/// Entries of a patch volume at `letter` after merging in `dirty`.
///
/// Existing entries with a file number are kept unless a dirty entry has the
/// same number, in which case the dirty entry wins. Dirty entries without a
/// number cannot be addressed by an index block and are dropped. The result
/// is ordered by file number.
pub fn merge_patch_entries<'a>(
    existing: &[Entry],
    dirty: impl IntoIterator<Item = &'a Entry>,
    letter: u8,
) -> Vec<Entry> {
    let mut merged: BTreeMap<u32, Entry> = existing
        .iter()
        .filter(|entry| entry.number > 0)
        .map(|entry| (entry.number, entry.clone()))
        .collect();

    for entry in dirty {
        if entry.number == 0 {
            warn!("{} has no file number and cannot be patched", entry.name);
            continue;
        }
        merged.insert(entry.number, entry.clone_for_letter(letter));
    }

    merged.into_values().collect()
}

impl Collection {
    /// Write the modified entries of a single-volume archive to `output`.
    ///
    /// An entry qualifies when it has a pending replacement, or when it is a
    /// container whose already-discovered sub-resources include one.
    pub fn create_patch<P: AsRef<Path>>(&self, output: P) -> Result<PatchReport> {
        let output = output.as_ref();
        let source = self
            .volumes
            .first()
            .ok_or_else(|| AldError::PatchPrecondition("the archive has no volumes".to_string()))?;
        if source.kind.is_lettered() {
            return Err(AldError::PatchPrecondition(format!(
                "{} archives are patched with create_patch_lettered",
                source.kind.name()
            )));
        }
        if same_file(output, &source.path) {
            return Err(AldError::PatchPrecondition(
                "cannot replace the original file with a patch".to_string(),
            ));
        }

        let mut patch = Volume::new(source.kind, source.letter, output);
        patch.version = source.version;
        patch.entries = source
            .entries
            .iter()
            .filter(|entry| entry.is_modified())
            .cloned()
            .collect();
        if patch.entries.is_empty() {
            return Err(AldError::PatchPrecondition("no entries have been modified".to_string()));
        }

        patch.rebuild_headers();
        let staged = patch.write_temp(output)?;
        patch.commit(staged)?;

        info!("Wrote patch {} with {} entries", output.display(), patch.entries.len());
        Ok(PatchReport {
            written: vec![output.to_path_buf()],
            entry_count: patch.entries.len(),
            renamed: None,
        })
    }

    /// Patch a lettered archive by relabeling.
    ///
    /// The letter-1 volume moves to `renamed` (unless a volume already holds
    /// that letter), every modified entry is merged into the volume at
    /// `patch`, and a new letter-1 volume is written whose index block maps
    /// each file number to its current home.
    ///
    /// Every file is staged before anything on disk changes, and the
    /// in-memory collection is only updated once all commits succeed.
    pub fn create_patch_lettered(&mut self, renamed: u8, patch: u8) -> Result<PatchReport> {
        let kind = self
            .kind()
            .ok_or_else(|| AldError::PatchPrecondition("the archive has no volumes".to_string()))?;
        if !kind.is_lettered() {
            return Err(AldError::PatchPrecondition(format!(
                "{} archives have no lettered volumes",
                kind.name()
            )));
        }
        validate_letter(renamed)?;
        validate_letter(patch)?;
        if renamed == 1 || patch == 1 || renamed == patch {
            return Err(AldError::ArgumentInvalid(format!(
                "patch letters {} and {} must differ from each other and from 1",
                renamed, patch
            )));
        }

        let base = self.base_path();
        let a_slot = self.volumes.iter().position(|v| v.letter == 1);
        let m_exists = self.volumes.iter().any(|v| v.letter == renamed);
        let z_slot = self.volumes.iter().position(|v| v.letter == patch);
        let relabel = a_slot.filter(|_| !m_exists);

        // Volumes other than the patch volume and a cloned letter 1 stay on
        // disk as they are, and memory can disagree with them after deletes
        // and moves. Numbered entries still at a stored position keep it;
        // the rest are copied into the patch volume.
        let mut kept: Vec<IndexRecord> = Vec::new();
        let mut strays: Vec<(usize, usize)> = Vec::new();
        for (slot, volume) in self.volumes.iter().enumerate() {
            if Some(slot) == z_slot || (Some(slot) == a_slot && relabel.is_none()) {
                continue;
            }
            let letter = if Some(slot) == relabel { renamed } else { volume.letter };
            let positions = stored_positions(volume)?;
            for (index, entry) in volume.entries.iter().enumerate() {
                if entry.number == 0 || entry.is_modified() {
                    continue;
                }
                let stored = entry
                    .stored_range()
                    .filter(|range| range.path == volume.path)
                    .and_then(|range| positions.get(&(range.offset, range.size)));
                match stored {
                    Some(&position) => kept.push(IndexRecord {
                        number: entry.number,
                        letter,
                        position,
                    }),
                    None => strays.push((slot, index)),
                }
            }
        }
        if !strays.is_empty() {
            debug!("{} entries are no longer where their volume files hold them", strays.len());
        }

        // Plan the patch volume
        let dirty: Vec<&Entry> = self.entries().filter(|entry| entry.is_modified()).collect();
        let merged_numbers: Vec<u32> = dirty.iter().map(|e| e.number).filter(|&n| n > 0).collect();
        let existing_z: &[Entry] = z_slot.map(|s| self.volumes[s].entries.as_slice()).unwrap_or(&[]);
        let mut z_volume = match z_slot {
            Some(slot) => self.volumes[slot].clone(),
            None => Volume::new(kind, patch, volume_path(kind, &base, patch)),
        };
        if merged_numbers.is_empty() {
            return Err(AldError::PatchPrecondition(
                "no numbered entries have been modified".to_string(),
            ));
        }
        let moved = strays.iter().map(|&(slot, index)| &self.volumes[slot].entries[index]);
        z_volume.entries = merge_patch_entries(existing_z, moved.chain(dirty), patch);
        z_volume.rebuild_headers();

        // Plan the stub
        let a_path = match a_slot {
            Some(slot) => volume_path(kind, &self.volumes[slot].path, 1),
            None => volume_path(kind, &base, 1),
        };
        let mut stub = match (a_slot, relabel) {
            (Some(slot), None) => self.volumes[slot].clone(),
            _ => Volume::new(kind, 1, a_path.clone()),
        };
        stub.rebuild_headers();

        // Index block over the planned layout; the patch volume goes last so
        // its entries win
        kept.sort_by_key(|record| record.letter);
        let mut records = index_records([(1, stub.entries.as_slice())]);
        records.extend(kept);
        records.extend(index_records([(patch, z_volume.entries.as_slice())]));

        if let Some(layout_kind) = kind.index_layout() {
            let block = index_block::encode(&records, layout_kind)?;
            if kind.index_in_every_volume() {
                z_volume.set_index_block(Some(block.clone()));
            }
            stub.set_index_block(Some(block));
        }

        let z_path = z_volume.path.clone();
        let m_path = relabel.map(|slot| volume_path(kind, &self.volumes[slot].path, renamed));

        // Stage both files before touching anything
        let z_staged = z_volume.write_temp(&z_path)?;
        let stub_staged = match stub.write_temp(&a_path) {
            Ok(staged) => staged,
            Err(err) => {
                z_staged.discard();
                return Err(err);
            }
        };

        // Commit: patch volume, then move the original aside, then the stub
        if let Err(err) = z_volume.commit(z_staged) {
            stub_staged.discard();
            return Err(err);
        }
        let mut renamed_files = None;
        if let (Some(slot), Some(m_path)) = (relabel, &m_path) {
            let original = self.volumes[slot].path.clone();
            if let Err(err) = fs::rename(&original, m_path) {
                stub_staged.discard();
                return Err(err.into());
            }
            debug!("Moved {} to {}", original.display(), m_path.display());
            renamed_files = Some((original, m_path.clone()));
        }
        stub.commit(stub_staged)?;

        // Apply the plan in memory
        let report = PatchReport {
            written: vec![z_path, a_path],
            entry_count: z_volume.entries.len(),
            renamed: renamed_files,
        };
        self.install_patch(PatchPlan {
            relabel: relabel.zip(m_path),
            renamed,
            z_slot,
            z_volume,
            stub,
            merged_numbers,
            strays,
        });

        info!(
            "Patched {}: {} entries in volume {}{}",
            self.path().display(),
            report.entry_count,
            patch,
            match &report.renamed {
                Some((_, to)) => format!(", original moved to {}", to.display()),
                None => String::new(),
            }
        );
        Ok(report)
    }

    fn install_patch(&mut self, plan: PatchPlan) {
        // Copied entries now live in the patch volume only
        for &(slot, index) in plan.strays.iter().rev() {
            self.volumes[slot].entries.remove(index);
        }

        // Merged replacements now live in the patch volume
        for volume in &mut self.volumes {
            for entry in &mut volume.entries {
                if entry.number > 0 && plan.merged_numbers.contains(&entry.number) && entry.is_modified() {
                    entry.clear_replacement();
                    entry.clear_sub_resources();
                }
            }
        }

        if let Some((slot, m_path)) = plan.relabel {
            let volume = &mut self.volumes[slot];
            volume.relabel(plan.renamed);
            volume.relocate(&m_path);
        }

        match plan.z_slot {
            Some(slot) => self.volumes[slot] = plan.z_volume,
            None => self.volumes.push(plan.z_volume),
        }
        match self.volumes.iter().position(|v| v.letter == 1) {
            Some(slot) => self.volumes[slot] = plan.stub,
            None => self.volumes.push(plan.stub),
        }

        self.volumes.sort_by_key(|volume| volume.letter);
        self.refresh();
    }
}

/// Committed lettered patch, waiting to be applied to the collection
struct PatchPlan {
    /// Slot of the relabeled letter-1 volume and its new path
    relabel: Option<(usize, PathBuf)>,
    renamed: u8,
    z_slot: Option<usize>,
    z_volume: Volume,
    stub: Volume,
    merged_numbers: Vec<u32>,
    /// (slot, index) of entries copied into the patch volume, ascending
    strays: Vec<(usize, usize)>,
}

/// Position of every stored payload range in a volume's file.
///
/// A volume that has never been saved has none.
fn stored_positions(volume: &Volume) -> Result<HashMap<(u64, u64), usize>> {
    if !volume.path.exists() {
        return Ok(HashMap::new());
    }
    let on_disk = Volume::read(&volume.path)?;
    Ok(on_disk
        .entries
        .iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            entry
                .stored_range()
                .map(|range| ((range.offset, range.size), position))
        })
        .collect())
}

/// Whether two paths name the same file, comparing canonical forms when both
/// exist
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
