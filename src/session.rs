//! Editing sessions
//!
//! A [`Session`] pairs an open [`Collection`] with a [`Config`] and provides
//! the file-system level operations of an archive editor: bulk import from a
//! patch directory, adding new files, exporting, and the save variants.

use crate::archive::format::letter_to_char;
use crate::collection::{Collection, DuplicatePolicy, EntryLocation, PatchReport};
use crate::config::Config;
use crate::entry::{number_from_name, Entry, Replacement};
use crate::error::{AldError, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix of the directory holding a container's sub-resources on disk
pub const SUB_RESOURCE_DIR_SUFFIX: &str = "_files";

/// One row of an archive listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingRow {
    pub name: String,
    pub number: u32,
    pub volume: String,
    pub size: u64,
    pub modified: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_resources: Vec<String>,
}

/// An open archive plus the settings that drive imports and exports
pub struct Session {
    collection: Collection,
    config: Config,
}

impl Session {
    /// Open an existing archive
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let mut collection = Collection::new().with_format_support(config.formats);
        collection.read(path.as_ref())?;
        info!(
            "Opened {} ({} entries in {} volumes)",
            path.as_ref().display(),
            collection.len(),
            collection.volumes().len()
        );
        Ok(Self { collection, config })
    }

    /// Start a new, empty archive; nothing is written until a save
    pub fn create<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let collection = Collection::create(path)?.with_format_support(config.formats);
        Ok(Self { collection, config })
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_mut(&mut self) -> &mut Collection {
        &mut self.collection
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Listing of every entry, optionally probing containers
    pub fn listing(&mut self, with_sub_resources: bool) -> Result<Vec<ListingRow>> {
        let mut rows = Vec::with_capacity(self.collection.len());
        for location in self.collection.locations().to_vec() {
            let sub_resources = if with_sub_resources {
                self.collection
                    .sub_resources_at_mut(location)?
                    .map(|children| children.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            let Some(entry) = self.collection.entry_at(location) else {
                continue;
            };
            rows.push(ListingRow {
                name: entry.name.clone(),
                number: entry.number,
                volume: letter_to_char(entry.letter)
                    .map(String::from)
                    .unwrap_or_else(|| entry.letter.to_string()),
                size: entry.size,
                modified: entry.is_modified(),
                sub_resources,
            });
        }
        Ok(rows)
    }

    // Importing

    /// Take replacements for existing entries from `dir`.
    ///
    /// Each entry is looked up first under its full name, then under its
    /// base name. Sub-resources of containers are looked up in
    /// `<name>_files/`. Returns the number of files taken.
    pub fn import_all<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let locations = self.collection.locations().to_vec();
        let count = self.import_locations(dir, &locations)?;
        self.collection.refresh();
        info!("Imported {} files from {}", count, dir.display());
        Ok(count)
    }

    /// Take `path` as the replacement for the entry with the same base name,
    /// whatever either extension is.
    ///
    /// Returns false when no entry matches.
    pub fn import_file<P: AsRef<Path>>(&mut self, path: P) -> Result<bool> {
        let path = path.as_ref();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(false);
        };

        let target = self
            .collection
            .locations()
            .iter()
            .copied()
            .find(|location| {
                self.collection
                    .entry_at(*location)
                    .is_some_and(|entry| entry_stem(&entry.name).eq_ignore_ascii_case(stem))
            });
        let Some(location) = target else {
            debug!("No entry matches {}", path.display());
            return Ok(false);
        };

        if !is_recent_enough(path, self.config.session.min_modified_unix) {
            debug!("Skipping {}: older than the import cutoff", path.display());
            return Ok(false);
        }
        if let Some(entry) = self.collection.entry_at_mut(location) {
            debug!("{} <- {}", entry.name, path.display());
            entry.set_replacement(Replacement::File(path.to_path_buf()));
        }
        self.collection.refresh();
        Ok(true)
    }

    fn import_locations(&mut self, dir: &Path, locations: &[EntryLocation]) -> Result<usize> {
        let min_modified = self.config.session.min_modified_unix;
        let mut count = 0;

        for &location in locations {
            let Some(name) = self.collection.entry_at(location).map(|e| e.name.clone()) else {
                continue;
            };
            let base = base_name(&name);

            let found = [entry_path(dir, &name), dir.join(base)]
                .into_iter()
                .find(|candidate| candidate.is_file());
            if let Some(file) = found {
                if is_recent_enough(&file, min_modified) {
                    if let Some(entry) = self.collection.entry_at_mut(location) {
                        debug!("{} <- {}", entry.name, file.display());
                        entry.set_replacement(Replacement::File(file));
                        count += 1;
                    }
                }
            }

            let sub_dirs = [
                entry_path(dir, &format!("{}{}", name, SUB_RESOURCE_DIR_SUFFIX)),
                dir.join(format!("{}{}", base, SUB_RESOURCE_DIR_SUFFIX)),
            ];
            let Some(sub_dir) = sub_dirs.into_iter().find(|d| d.is_dir()) else {
                continue;
            };
            let Some(children) = self.collection.sub_resources_at_mut(location)? else {
                continue;
            };
            count += import_children(&sub_dir, children, min_modified);
        }

        Ok(count)
    }

    /// Add files as new entries of the volume at `letter`.
    ///
    /// Names are the configured prefix plus either the file name or, when
    /// directory names are kept and `base_dir` is given, the path relative to
    /// `base_dir`. File numbers come from the digits in the name.
    pub fn import_new_files(&mut self, files: &[PathBuf], base_dir: Option<&Path>, letter: u8) -> Result<usize> {
        let session = &self.config.session;
        let mut entries = Vec::with_capacity(files.len());

        for file in files {
            let relative = match base_dir {
                Some(base) if session.keep_directory_names_when_importing => {
                    relative_name(base, file)
                }
                _ => None,
            };
            let file_name = match relative {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| AldError::ArgumentInvalid(format!("{} has no file name", file.display())))?,
            };
            if !is_recent_enough(file, session.min_modified_unix) {
                debug!("Skipping {}: older than the import cutoff", file.display());
                continue;
            }

            let name = format!("{}{}", session.import_prefix, file_name);
            let size = fs::metadata(file)?.len();
            let number = number_from_name(&name);
            let mut entry = Entry::new(name)
                .with_number(number)
                .with_letter(letter)
                .with_replacement(Replacement::File(file.clone()));
            entry.size = size;
            entries.push(entry);
        }
        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        let policy = if session.duplicate_names_allowed {
            DuplicatePolicy::Append
        } else {
            DuplicatePolicy::Merge
        };
        let count = entries.len();
        let added = self.collection.add_entries(letter, entries, policy)?;
        info!("Imported {} new files ({} added, {} merged)", count, added, count - added);
        Ok(count)
    }

    /// Files under `dir` matching the configured import filter.
    ///
    /// When directory names are not kept and the same file name occurs in
    /// several directories, only the most recently modified copy is returned.
    /// The result is ordered by file name.
    pub fn collect_import_files<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let filter = build_filter(&self.config.session.import_filter)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() && filter.is_match(entry.file_name()) {
                files.push(entry.into_path());
            }
        }

        if !self.config.session.keep_directory_names_when_importing {
            files = only_newest(files);
        }
        files.sort_by_key(|path| path.file_name().map(|n| n.to_ascii_lowercase()));
        Ok(files)
    }

    // Exporting

    /// Write entries to `dir`.
    ///
    /// A filter of the form `*.ext` selects entries by extension; anything
    /// else exports everything. Returns the number of files written.
    pub fn export_all<P: AsRef<Path>>(&mut self, dir: P, filter: Option<&str>) -> Result<usize> {
        let dir = dir.as_ref();
        let wanted = filter
            .and_then(|f| f.strip_prefix("*."))
            .filter(|ext| !ext.is_empty() && *ext != "*")
            .map(str::to_ascii_lowercase);

        let mut count = 0;
        for location in self.collection.locations().to_vec() {
            let selected = match (&wanted, self.collection.entry_at(location)) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(ext), Some(entry)) => entry.extension() == *ext,
            };
            if selected {
                count += self.export_location(location, dir)?;
            }
        }

        info!("Exported {} files to {}", count, dir.display());
        Ok(count)
    }

    /// Write the named entry, and its sub-resources if it is a container
    pub fn export_entry<P: AsRef<Path>>(&mut self, name: &str, dir: P) -> Result<usize> {
        let location = self
            .collection
            .locate_name(name)
            .ok_or_else(|| AldError::EntryNotFound(name.to_string()))?;
        self.export_location(location, dir.as_ref())
    }

    fn export_location(&mut self, location: EntryLocation, dir: &Path) -> Result<usize> {
        let keep_dirs = self.config.session.include_directories_when_exporting;
        let entry = self
            .collection
            .entry_at(location)
            .ok_or_else(|| AldError::EntryNotFound(format!("{:?}", location)))?;
        let name = if keep_dirs {
            entry.name.clone()
        } else {
            base_name(&entry.name).to_string()
        };
        let bytes = entry.payload()?;

        let target = entry_path(dir, &name);
        write_file(&target, &bytes)?;
        let mut count = 1;

        if let Some(children) = self.collection.sub_resources_at_mut(location)? {
            let sub_dir = entry_path(dir, &format!("{}{}", name, SUB_RESOURCE_DIR_SUFFIX));
            for child in children.iter() {
                write_file(&entry_path(&sub_dir, &child.name), &child.current_bytes()?)?;
                count += 1;
            }
        }

        Ok(count)
    }

    // Saving

    /// Save in place
    pub fn save(&mut self) -> Result<()> {
        let path = self.collection.path();
        self.collection.save(path)
    }

    /// Save under a new name; the session follows the new files
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.collection.save(path)
    }

    /// Write pending changes as a patch.
    ///
    /// Lettered archives are patched in place with the configured letters and
    /// ignore `output`. Other kinds write a delta file to `output`, which must
    /// differ from the archive itself.
    pub fn save_patch(&mut self, output: Option<&Path>) -> Result<PatchReport> {
        let kind = self
            .collection
            .kind()
            .ok_or_else(|| AldError::PatchPrecondition("no archive is open".to_string()))?;

        if kind.is_lettered() {
            if output.is_some() {
                warn!("{} patches are written next to the archive; ignoring the output path", kind.name());
            }
            let patch = self.config.patch;
            return self
                .collection
                .create_patch_lettered(patch.renamed_letter, patch.patch_letter);
        }

        let output = output
            .ok_or_else(|| AldError::ArgumentInvalid("a patch output path is required".to_string()))?;
        self.collection.create_patch(output)
    }
}

impl ListingRow {
    pub fn to_json(rows: &[ListingRow]) -> Result<String> {
        serde_json::to_string_pretty(rows).map_err(AldError::from)
    }
}

fn import_children(dir: &Path, children: &mut [Entry], min_modified: Option<u64>) -> usize {
    let mut count = 0;
    for child in children {
        let file = entry_path(dir, &child.name);
        if file.is_file() && is_recent_enough(&file, min_modified) {
            debug!("{} <- {}", child.name, file.display());
            child.set_replacement(Replacement::File(file));
            count += 1;
        }
    }
    count
}

/// Last path component of an entry name; archives use `\` as separator
fn base_name(name: &str) -> &str {
    name.rsplit(['\\', '/']).next().unwrap_or(name)
}

fn entry_stem(name: &str) -> &str {
    let base = base_name(name);
    match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    }
}

/// Host path for an entry name under `dir`, dropping components that would
/// escape it
fn entry_path(dir: &Path, name: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for part in name.split(['\\', '/']) {
        match part {
            "" | "." | ".." => continue,
            part => path.push(part),
        }
    }
    path
}

/// `file` relative to `base`, joined with `\` the way archives store names
fn relative_name(base: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("\\"))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

fn modified_unix(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn is_recent_enough(path: &Path, min_modified: Option<u64>) -> bool {
    match min_modified {
        Some(cutoff) => modified_unix(path).is_some_and(|time| time >= cutoff),
        None => true,
    }
}

/// Matcher for a `;`-separated list of wildcards, compared case-insensitively
/// against file names
fn build_filter(filters: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in filters.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        // "*.*" also matches names without an extension
        let pattern = if pattern == "*.*" { "*" } else { pattern };
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|err| AldError::ArgumentInvalid(format!("import filter {:?}: {}", pattern, err)))?;
        builder.add(glob);
    }
    if filters.trim().is_empty() {
        builder.add(
            GlobBuilder::new("*")
                .build()
                .map_err(|err| AldError::ArgumentInvalid(err.to_string()))?,
        );
    }
    builder
        .build()
        .map_err(|err| AldError::ArgumentInvalid(format!("import filter: {}", err)))
}

/// Keep one file per case-insensitive file name: the most recently modified
fn only_newest(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut newest: HashMap<String, (Option<SystemTime>, PathBuf)> = HashMap::new();
    for file in files {
        let key = file
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let modified = fs::metadata(&file).and_then(|m| m.modified()).ok();
        match newest.get(&key) {
            Some((seen, _)) if *seen >= modified => {}
            _ => {
                newest.insert(key, (modified, file));
            }
        }
    }
    newest.into_values().map(|(_, path)| path).collect()
}
