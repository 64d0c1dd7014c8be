//! Patch synthesis
//!
//! Lettered archives are patched by relabeling: the original first volume is
//! moved aside, changed entries go to a patch volume, and a new first volume
//! carries the index block. Single-volume archives get a delta file.

use ald_rs::{AldError, Collection, DuplicatePolicy, Entry, Replacement, Volume};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn entry(name: &str, number: u32, data: &[u8]) -> Entry {
    Entry::new(name)
        .with_number(number)
        .with_replacement(Replacement::Bytes(data.to_vec()))
}

fn bytes(data: &[u8]) -> Replacement {
    Replacement::Bytes(data.to_vec())
}

/// Helper: GAMEGA.ALD with numbers 1, 3 and GAMEGB.ALD with numbers 2, 4
fn create_game(dir: &Path) -> PathBuf {
    let path = dir.join("GAMEGA.ALD");
    let mut archive = Collection::create(&path).unwrap();
    archive
        .add_entries(
            1,
            vec![entry("CG0001.QNT", 1, b"cg one"), entry("CG0003.QNT", 3, b"cg three")],
            DuplicatePolicy::Append,
        )
        .unwrap();
    archive
        .add_entries(
            2,
            vec![entry("CG0002.QNT", 2, b"cg two"), entry("CG0004.QNT", 4, b"cg four")],
            DuplicatePolicy::Append,
        )
        .unwrap();
    archive.save(&path).unwrap();
    path
}

#[test]
fn test_lettered_patch_relabels_first_volume() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());
    let volume_b_before = fs::read(dir.path().join("GAMEGB.ALD")).unwrap();

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("CG0003.QNT", bytes(b"patched three")).unwrap();
    archive.replace("CG0002.QNT", bytes(b"patched two")).unwrap();

    let report = archive.create_patch_lettered(13, 26).unwrap();

    let a = dir.path().join("GAMEGA.ALD");
    let m = dir.path().join("GAMEGM.ALD");
    let z = dir.path().join("GAMEGZ.ALD");
    assert_eq!(report.entry_count, 2);
    assert_eq!(report.written, vec![z.clone(), a.clone()]);
    assert_eq!(report.renamed, Some((a.clone(), m.clone())));

    // Untouched volume is untouched
    assert_eq!(fs::read(dir.path().join("GAMEGB.ALD")).unwrap(), volume_b_before);

    // The new first volume only carries the index block
    let stub = Volume::read(&a).unwrap();
    assert!(stub.entries.is_empty());
    assert!(stub.index_block().is_some());

    // The moved volume still holds the original bytes
    let moved = Volume::read(&m).unwrap();
    assert_eq!(moved.letter, 13);
    assert_eq!(moved.entries.len(), 2);
    assert_eq!(moved.entries[1].payload().unwrap(), b"cg three");

    let patch = Volume::read(&z).unwrap();
    let names: Vec<&str> = patch.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["CG0002.QNT", "CG0003.QNT"]);

    println!("✓ Lettered patch wrote A, M and Z");
}

#[test]
fn test_lettered_patch_resolves_after_reopen() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("CG0003.QNT", bytes(b"patched three")).unwrap();
    archive.create_patch_lettered(13, 26).unwrap();

    for collection in [archive, Collection::open(&path).unwrap()] {
        let three = collection.by_number(3).unwrap();
        assert_eq!(three.letter, 26);
        assert_eq!(three.payload().unwrap(), b"patched three");

        let one = collection.by_number(1).unwrap();
        assert_eq!(one.payload().unwrap(), b"cg one");
        assert_eq!(collection.by_number(4).unwrap().letter, 2);
        assert_eq!(collection.modified_entries().count(), 0);
    }

    println!("✓ Patched numbers resolve to Z, others to their old homes");
}

#[test]
fn test_reopened_volumes_take_letters_from_names() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("CG0001.QNT", bytes(b"patched one")).unwrap();
    archive.create_patch_lettered(13, 26).unwrap();

    let reopened = Collection::open(&path).unwrap();
    let letters: Vec<u8> = reopened.volumes().iter().map(|v| v.letter).collect();
    assert_eq!(letters, vec![1, 2, 13, 26]);
    assert_eq!(reopened.by_number(1).unwrap().letter, 26);
    assert_eq!(reopened.by_number(3).unwrap().payload().unwrap(), b"cg three");

    println!("✓ Reopened patched archive keeps every volume");
}

#[test]
fn test_second_lettered_patch_merges_into_z() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("CG0003.QNT", bytes(b"first patch")).unwrap();
    archive.create_patch_lettered(13, 26).unwrap();
    let moved_before = fs::read(dir.path().join("GAMEGM.ALD")).unwrap();

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("CG0004.QNT", bytes(b"second patch")).unwrap();
    let report = archive.create_patch_lettered(13, 26).unwrap();

    // M already exists, so nothing is renamed and M is left alone
    assert!(report.renamed.is_none());
    assert_eq!(report.entry_count, 2);
    assert_eq!(fs::read(dir.path().join("GAMEGM.ALD")).unwrap(), moved_before);

    let reopened = Collection::open(&path).unwrap();
    assert_eq!(reopened.by_number(3).unwrap().payload().unwrap(), b"first patch");
    assert_eq!(reopened.by_number(4).unwrap().payload().unwrap(), b"second patch");
    assert_eq!(reopened.by_number(4).unwrap().letter, 26);
    assert_eq!(reopened.by_number(2).unwrap().payload().unwrap(), b"cg two");

    println!("✓ Second patch merged into the existing Z volume");
}

#[test]
fn test_patch_after_delete_in_relabeled_volume() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());

    let mut archive = Collection::open(&path).unwrap();
    archive.delete_by_name(&["CG0001.QNT"]).unwrap();
    archive.replace("CG0002.QNT", bytes(b"patched two")).unwrap();
    archive.create_patch_lettered(13, 26).unwrap();

    // GAMEGM.ALD still holds CG0001 first on disk
    assert_eq!(Volume::read(&dir.path().join("GAMEGM.ALD")).unwrap().entries.len(), 2);

    for collection in [archive, Collection::open(&path).unwrap()] {
        let three = collection.by_number(3).unwrap();
        assert_eq!(three.name, "CG0003.QNT");
        assert_eq!(three.payload().unwrap(), b"cg three");
        assert!(collection.by_number(1).is_none());
        assert_eq!(collection.by_number(2).unwrap().payload().unwrap(), b"patched two");
        assert_eq!(collection.by_number(4).unwrap().payload().unwrap(), b"cg four");
    }

    println!("✓ Deleted entries drop out of the index, the rest keep their stored positions");
}

#[test]
fn test_patch_after_delete_in_untouched_volume() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());
    let volume_b_before = fs::read(dir.path().join("GAMEGB.ALD")).unwrap();

    let mut archive = Collection::open(&path).unwrap();
    archive.delete_by_name(&["CG0002.QNT"]).unwrap();
    archive.replace("CG0003.QNT", bytes(b"patched three")).unwrap();
    archive.create_patch_lettered(13, 26).unwrap();
    assert_eq!(fs::read(dir.path().join("GAMEGB.ALD")).unwrap(), volume_b_before);

    let reopened = Collection::open(&path).unwrap();
    let four = reopened.by_number(4).unwrap();
    assert_eq!(four.name, "CG0004.QNT");
    assert_eq!(four.letter, 2);
    assert_eq!(four.payload().unwrap(), b"cg four");
    assert!(reopened.by_number(2).is_none());
    assert_eq!(reopened.by_number(3).unwrap().payload().unwrap(), b"patched three");

    println!("✓ Delete in an untouched volume keeps its index positions");
}

#[test]
fn test_patch_copies_moved_entries_into_z() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());

    let mut archive = Collection::open(&path).unwrap();
    // Move CG0004 from B into A without saving
    let location = archive.locate_name("CG0004.QNT").unwrap();
    archive.entry_at_mut(location).unwrap().letter = 1;
    archive.refresh();
    archive.replace("CG0001.QNT", bytes(b"patched one")).unwrap();

    let report = archive.create_patch_lettered(13, 26).unwrap();
    assert_eq!(report.entry_count, 2);

    for collection in [archive, Collection::open(&path).unwrap()] {
        let four = collection.by_number(4).unwrap();
        assert_eq!(four.letter, 26);
        assert_eq!(four.payload().unwrap(), b"cg four");
        assert_eq!(collection.by_number(1).unwrap().payload().unwrap(), b"patched one");
        assert_eq!(collection.by_number(3).unwrap().payload().unwrap(), b"cg three");
        assert_eq!(collection.by_number(2).unwrap().payload().unwrap(), b"cg two");
    }

    println!("✓ Entries moved between volumes are carried by the patch volume");
}

#[test]
fn test_lettered_patch_needs_changes() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());
    let before = fs::read(&path).unwrap();

    let mut archive = Collection::open(&path).unwrap();
    let err = archive.create_patch_lettered(13, 26).unwrap_err();
    assert!(matches!(err, AldError::PatchPrecondition(_)));

    assert_eq!(fs::read(&path).unwrap(), before);
    assert!(!dir.path().join("GAMEGM.ALD").exists());
    assert!(!dir.path().join("GAMEGZ.ALD").exists());

    println!("✓ Nothing to patch leaves the archive alone");
}

#[test]
fn test_lettered_patch_rejects_bad_letters() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("CG0001.QNT", bytes(b"x")).unwrap();

    for (renamed, patch) in [(13, 13), (1, 26), (13, 27), (0, 26)] {
        let err = archive.create_patch_lettered(renamed, patch).unwrap_err();
        assert!(matches!(err, AldError::ArgumentInvalid(_)), "{} {}", renamed, patch);
    }

    println!("✓ Invalid patch letters rejected");
}

#[test]
fn test_dat_patch_writes_index_into_z() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ACG.DAT");
    let mut archive = Collection::create(&path).unwrap();
    archive
        .add_entries(1, vec![entry("a", 1, b"one"), entry("b", 2, b"two")], DuplicatePolicy::Append)
        .unwrap();
    archive.save(&path).unwrap();

    let mut archive = Collection::open(&path).unwrap();
    let name = archive.by_number(2).unwrap().name.clone();
    archive.replace(&name, bytes(b"TWO")).unwrap();
    archive.create_patch_lettered(13, 26).unwrap();

    let z = Volume::read(&dir.path().join("ZCG.DAT")).unwrap();
    let a = Volume::read(&path).unwrap();
    assert!(z.index_block().is_some());
    assert_eq!(z.index_block(), a.index_block());

    let reopened = Collection::open(&path).unwrap();
    assert!(reopened.by_number(2).unwrap().payload().unwrap().starts_with(b"TWO"));
    assert!(reopened.by_number(1).unwrap().payload().unwrap().starts_with(b"one"));

    println!("✓ DAT patch volume carries the index block too");
}

#[test]
fn test_single_volume_patch() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.afa");
    let mut archive = Collection::create(&path).unwrap();
    archive
        .add_entries(
            1,
            vec![entry("a.txt", 0, b"alpha"), entry("b.txt", 0, b"beta"), entry("c.txt", 0, b"gamma")],
            DuplicatePolicy::Append,
        )
        .unwrap();
    archive.save(&path).unwrap();

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("b.txt", bytes(b"BETA")).unwrap();

    let patch_path = dir.path().join("patch.afa");
    let report = archive.create_patch(&patch_path).unwrap();
    assert_eq!(report.entry_count, 1);
    assert_eq!(report.written, vec![patch_path.clone()]);

    let patch = Collection::open(&patch_path).unwrap();
    assert_eq!(patch.len(), 1);
    assert_eq!(patch.by_name("b.txt").unwrap().payload().unwrap(), b"BETA");

    // The source archive is untouched and still has the pending change
    assert_eq!(Collection::open(&path).unwrap().len(), 3);
    assert_eq!(archive.modified_entries().count(), 1);

    println!("✓ Single-volume patch holds only the changed entry");
}

#[test]
fn test_single_volume_patch_preconditions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.alk");
    let mut archive = Collection::create(&path).unwrap();
    archive
        .add_entries(1, vec![entry("x", 0, b"x")], DuplicatePolicy::Append)
        .unwrap();
    archive.save(&path).unwrap();

    let mut archive = Collection::open(&path).unwrap();
    let err = archive.create_patch(dir.path().join("patch.alk")).unwrap_err();
    assert!(matches!(err, AldError::PatchPrecondition(_)));

    let name = archive.by_number(1).unwrap().name.clone();
    archive.replace(&name, bytes(b"y")).unwrap();
    let err = archive.create_patch(&path).unwrap_err();
    assert!(matches!(err, AldError::PatchPrecondition(_)));

    let err = archive.create_patch_lettered(13, 26).unwrap_err();
    assert!(matches!(err, AldError::PatchPrecondition(_)));

    println!("✓ Single-volume patch preconditions enforced");
}

#[test]
fn test_generic_patch_rejects_lettered_archive() {
    let dir = tempdir().unwrap();
    let path = create_game(dir.path());

    let mut archive = Collection::open(&path).unwrap();
    archive.replace("CG0001.QNT", bytes(b"x")).unwrap();
    let err = archive.create_patch(dir.path().join("PATCHA.ALD")).unwrap_err();
    assert!(matches!(err, AldError::PatchPrecondition(_)));

    println!("✓ Lettered archives must use the relabel patch");
}
