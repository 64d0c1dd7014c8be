use crate::archive::format::{filetime_now, ArchiveKind};
use crate::archive::naming::{self, letter_of};
use crate::archive::{afa, ald, alk, dat};
use crate::entry::Entry;
use crate::error::{AldError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where an entry's payload landed in a freshly written volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub offset: u64,
    pub size: u64,
}

/// A volume written to its temporary path but not yet committed
#[derive(Debug)]
#[must_use = "a staged write must be committed or discarded"]
pub struct StagedWrite {
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    placements: Vec<Placement>,
}

impl StagedWrite {
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Remove the temporary file without committing it
    pub fn discard(self) {
        if let Err(err) = fs::remove_file(&self.temp_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!("could not remove {}: {}", self.temp_path.display(), err);
            }
        }
    }
}

/// Decoded contents of one volume file
#[derive(Debug, Default)]
pub(crate) struct Decoded {
    pub entries: Vec<Entry>,
    pub index_block: Option<Vec<u8>>,
    /// Letter recorded inside the file, when the format keeps one
    pub letter: Option<u8>,
    pub version: u32,
}

/// One physical file of a logical archive
#[derive(Debug, Clone)]
pub struct Volume {
    /// 1..=26 for lettered kinds; 1 for single-volume kinds
    pub letter: u8,
    pub kind: ArchiveKind,
    pub path: PathBuf,
    pub entries: Vec<Entry>,
    /// Format revision (AFA only)
    pub version: u32,
    index_block: Option<Vec<u8>>,
}

impl Volume {
    /// New empty volume
    pub fn new(kind: ArchiveKind, letter: u8, path: impl Into<PathBuf>) -> Self {
        Self {
            letter,
            kind,
            path: path.into(),
            entries: Vec::new(),
            version: match kind {
                ArchiveKind::Afa => afa::DEFAULT_VERSION,
                _ => 0,
            },
            index_block: None,
        }
    }

    /// Read and decode a volume file.
    ///
    /// A missing file surfaces as an `Io` error of kind `NotFound`; bytes that
    /// do not parse surface as `InvalidFormat`.
    pub fn read(path: &Path) -> Result<Self> {
        let kind = ArchiveKind::require(path)?;
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let decoded = match kind {
            ArchiveKind::Ald => ald::read(&mut reader, path, file_len)?,
            ArchiveKind::Dat => dat::read(&mut reader, path, file_len)?,
            ArchiveKind::Afa => afa::read(&mut reader, path, file_len)?,
            ArchiveKind::Alk => alk::read(&mut reader, path, file_len)?,
        };

        let letter = if kind.is_lettered() {
            // The file name wins: patching renames volumes without rewriting them
            letter_of(kind, path).or(decoded.letter).unwrap_or(1)
        } else {
            1
        };

        let mut entries = decoded.entries;
        for (position, entry) in entries.iter_mut().enumerate() {
            entry.letter = letter;
            entry.index = Some(position);
        }

        debug!(
            "Read {} volume {} (letter {}, {} entries)",
            kind.name(),
            path.display(),
            letter,
            entries.len()
        );

        Ok(Self {
            letter,
            kind,
            path: path.to_path_buf(),
            entries,
            version: decoded.version,
            index_block: decoded.index_block,
        })
    }

    pub fn index_block(&self) -> Option<&[u8]> {
        self.index_block.as_deref()
    }

    pub fn set_index_block(&mut self, block: Option<Vec<u8>>) {
        self.index_block = block;
    }

    /// Bring per-entry header fields in line with the entry list
    pub fn rebuild_headers(&mut self) {
        let stamps_time = matches!(self.kind, ArchiveKind::Ald | ArchiveKind::Afa);
        let now = filetime_now();
        for (position, entry) in self.entries.iter_mut().enumerate() {
            entry.index = Some(position);
            entry.letter = self.letter;
            if stamps_time && entry.timestamp == 0 {
                entry.timestamp = now;
            }
        }
    }

    /// Serialize to the temporary path for `final_path`.
    ///
    /// Entry payloads are read from their current sources while the temp file
    /// is written, so the files they live in must stay in place until commit.
    /// On failure the partial temp file is removed.
    pub fn write_temp(&self, final_path: &Path) -> Result<StagedWrite> {
        let temp_path = naming::temp_path(final_path);
        match self.write_file(&temp_path) {
            Ok(placements) => {
                debug!(
                    "Staged {} ({} entries) at {}",
                    final_path.display(),
                    self.entries.len(),
                    temp_path.display()
                );
                Ok(StagedWrite {
                    temp_path,
                    final_path: final_path.to_path_buf(),
                    placements,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                Err(err)
            }
        }
    }

    fn write_file(&self, temp_path: &Path) -> Result<Vec<Placement>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        let mut writer = BufWriter::new(file);

        let placements = match self.kind {
            ArchiveKind::Ald => ald::write(self, &mut writer)?,
            ArchiveKind::Dat => dat::write(self, &mut writer)?,
            ArchiveKind::Afa => afa::write(self, &mut writer)?,
            ArchiveKind::Alk => alk::write(self, &mut writer)?,
        };

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        Ok(placements)
    }

    /// Move a staged temp file over its final path and re-point every entry
    /// at its committed location
    pub fn commit(&mut self, staged: StagedWrite) -> Result<()> {
        if staged.placements.len() != self.entries.len() {
            let message = format!(
                "staged write for {} holds {} entries but the volume has {}",
                staged.final_path.display(),
                staged.placements.len(),
                self.entries.len()
            );
            staged.discard();
            return Err(AldError::ArgumentInvalid(message));
        }

        fs::rename(&staged.temp_path, &staged.final_path)?;
        self.path = staged.final_path;
        for (entry, placement) in self.entries.iter_mut().zip(&staged.placements) {
            entry.mark_committed(&self.path, placement.offset, placement.size);
        }
        debug!("Committed {}", self.path.display());
        Ok(())
    }

    /// Change the volume letter, carrying every entry along
    pub fn relabel(&mut self, letter: u8) {
        self.letter = letter;
        for entry in &mut self.entries {
            entry.letter = letter;
        }
    }

    /// Re-point entries after the file was moved on disk
    pub(crate) fn relocate(&mut self, to: &Path) {
        let from = std::mem::replace(&mut self.path, to.to_path_buf());
        for entry in &mut self.entries {
            entry.relocate(&from, to);
        }
    }
}

/// Read `len` bytes at `offset`, reporting a short read as truncation
pub(crate) fn read_range<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    len: usize,
    what: &str,
) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            AldError::truncated(what)
        } else {
            AldError::Io(err)
        }
    })?;
    Ok(buf)
}

/// Synthesized entry name for formats that store none
pub(crate) fn synthesized_name(path: &Path, position: usize) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{:04}.bin", stem, position + 1)
}
