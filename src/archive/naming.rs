//! Lettered volume naming and sibling discovery
//!
//! ALD volumes carry their letter as the last character of the file stem
//! (`GAMEGA.ALD`, `GAMEGB.ALD`, ...). DAT volumes carry it as the first
//! character of the file name (`ACG.DAT`, `BCG.DAT`, ...). Single-volume
//! kinds have no letter in their name.

use crate::archive::format::{letter_from_char, letter_to_char, ArchiveKind};
use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix appended to a final path while its contents are being staged
pub const TEMP_SUFFIX: &str = ".tmp";

/// Character position of the letter within a file name
fn letter_slot(kind: ArchiveKind, file_name: &str) -> Option<usize> {
    match kind {
        ArchiveKind::Ald => {
            let dot = file_name.rfind('.')?;
            file_name[..dot].chars().count().checked_sub(1)
        }
        ArchiveKind::Dat => (!file_name.is_empty()).then_some(0),
        ArchiveKind::Afa | ArchiveKind::Alk => None,
    }
}

/// Letter encoded in a volume's file name
pub fn letter_of(kind: ArchiveKind, path: &Path) -> Option<u8> {
    let file_name = path.file_name()?.to_str()?;
    let slot = letter_slot(kind, file_name)?;
    letter_from_char(file_name.chars().nth(slot)?)
}

/// Path of the volume carrying `letter`, derived from any sibling's path.
///
/// The case of the replaced character is preserved. Kinds without lettered
/// names return the path unchanged.
pub fn volume_path(kind: ArchiveKind, path: &Path, letter: u8) -> PathBuf {
    let (Some(file_name), Some(letter_char)) =
        (path.file_name().and_then(|n| n.to_str()), letter_to_char(letter))
    else {
        return path.to_path_buf();
    };
    let Some(slot) = letter_slot(kind, file_name) else {
        return path.to_path_buf();
    };

    let renamed: String = file_name
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i != slot {
                c
            } else if c.is_ascii_lowercase() {
                letter_char.to_ascii_lowercase()
            } else {
                letter_char
            }
        })
        .collect();
    path.with_file_name(renamed)
}

/// Staging path used while a volume is written
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Every volume on disk that belongs to the same logical archive as `path`.
///
/// Results are sorted by letter. Single-volume kinds, or a missing directory,
/// yield an empty list.
pub fn find_siblings(path: &Path) -> Result<Vec<PathBuf>> {
    let Some(kind) = ArchiveKind::from_path(path) else {
        return Ok(Vec::new());
    };
    if !kind.is_lettered() {
        return Ok(Vec::new());
    }
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let Some(slot) = letter_slot(kind, file_name) else {
        return Ok(Vec::new());
    };
    let pattern = family_key(file_name, slot);

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let listing = match fs::read_dir(&dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut found = Vec::new();
    for item in listing {
        let item = item?;
        if !item.file_type()?.is_file() {
            continue;
        }
        let candidate = item.path();
        let Some(name) = candidate.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.chars().count() != file_name.chars().count() {
            continue;
        }
        if letter_slot(kind, name) != Some(slot) || family_key(name, slot) != pattern {
            continue;
        }
        if let Some(letter) = letter_of(kind, &candidate) {
            found.push((letter, candidate));
        }
    }

    found.sort_by_key(|(letter, _)| *letter);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// File name with the letter slot blanked, uppercased for comparison
fn family_key(file_name: &str, slot: usize) -> String {
    file_name
        .chars()
        .enumerate()
        .map(|(i, c)| if i == slot { '?' } else { c.to_ascii_uppercase() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_ald_letters() {
        let path = Path::new("/games/rance/RanceGA.ald");
        assert_eq!(letter_of(ArchiveKind::Ald, path), Some(1));
        assert_eq!(
            volume_path(ArchiveKind::Ald, path, 13),
            PathBuf::from("/games/rance/RanceGM.ald")
        );
        let lower = Path::new("rancega.ald");
        assert_eq!(volume_path(ArchiveKind::Ald, lower, 26), PathBuf::from("rancegz.ald"));
    }

    #[test]
    fn test_dat_letters() {
        let path = Path::new("ACG.DAT");
        assert_eq!(letter_of(ArchiveKind::Dat, path), Some(1));
        assert_eq!(volume_path(ArchiveKind::Dat, path, 2), PathBuf::from("BCG.DAT"));
    }

    #[test]
    fn test_single_volume_names_unchanged() {
        let path = Path::new("flat.afa");
        assert_eq!(volume_path(ArchiveKind::Afa, path, 5), path.to_path_buf());
        assert_eq!(letter_of(ArchiveKind::Afa, path), None);
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(temp_path(Path::new("x/GAMEGA.ALD")), PathBuf::from("x/GAMEGA.ALD.tmp"));
    }

    #[test]
    fn test_find_siblings_sorted_by_letter() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["GAMEGB.ALD", "GAMEGA.ald", "GAMEGZ.ALD", "OTHERA.ALD", "GAMEGA.DAT"] {
            File::create(dir.path().join(name)).unwrap();
        }

        let siblings = find_siblings(&dir.path().join("GAMEGB.ALD")).unwrap();
        let names: Vec<String> = siblings
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["GAMEGA.ald", "GAMEGB.ALD", "GAMEGZ.ALD"]);
    }

    #[test]
    fn test_find_siblings_missing_directory() {
        let siblings = find_siblings(Path::new("/definitely/not/here/GA.ALD")).unwrap();
        assert!(siblings.is_empty());
    }
}
