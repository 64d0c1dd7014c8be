//! Large Archive Stress Tests
//!
//! Many entries spread over many volumes.
//!
//! Run with: cargo test --test stress_large_archives_test -- --ignored --nocapture

use ald_rs::{Collection, DuplicatePolicy, Entry, Replacement};
use std::time::Instant;
use tempfile::tempdir;

fn payload(number: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| (number as usize + i) as u8).collect()
}

#[test]
fn test_many_entries_across_volumes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("STRESSA.ALD");

    let mut archive = Collection::create(&path).unwrap();
    for letter in 1..=5u8 {
        let entries = (0..200u32)
            .map(|i| {
                let number = i * 5 + u32::from(letter);
                Entry::new(format!("F{:05}.BIN", number))
                    .with_number(number)
                    .with_replacement(Replacement::Bytes(payload(number, (number % 700) as usize)))
            })
            .collect();
        archive.add_entries(letter, entries, DuplicatePolicy::Append).unwrap();
    }
    archive.save(&path).unwrap();

    let reopened = Collection::open(dir.path().join("STRESSC.ALD")).unwrap();
    assert_eq!(reopened.volumes().len(), 5);
    assert_eq!(reopened.len(), 1000);
    for number in [1u32, 2, 499, 500, 999, 1000] {
        let entry = reopened.by_number(number).unwrap();
        assert_eq!(entry.name, format!("F{:05}.BIN", number));
        assert_eq!(entry.payload().unwrap(), payload(number, (number % 700) as usize));
    }

    println!("✓ 1000 entries over five volumes");
}

#[test]
#[ignore] // Run manually: cargo test test_all_26_volumes -- --ignored
fn test_all_26_volumes() {
    println!("\n🚀 Creating 26 volumes × 40 files × 256 KB...");
    let start = Instant::now();

    let dir = tempdir().unwrap();
    let path = dir.path().join("BIGA.ALD");
    let mut archive = Collection::create(&path).unwrap();
    for letter in 1..=26u8 {
        let entries = (0..40u32)
            .map(|i| {
                let number = u32::from(letter - 1) * 40 + i + 1;
                Entry::new(format!("BIG{:04}.BIN", number))
                    .with_number(number)
                    .with_replacement(Replacement::Bytes(vec![letter; 256 * 1024]))
            })
            .collect();
        archive.add_entries(letter, entries, DuplicatePolicy::Append).unwrap();
    }
    archive.save(&path).unwrap();
    println!("  ✓ Saved in {:?}", start.elapsed());

    let start = Instant::now();
    let reopened = Collection::open(dir.path().join("BIGZ.ALD")).unwrap();
    assert_eq!(reopened.volumes().len(), 26);
    assert_eq!(reopened.len(), 1040);
    assert_eq!(reopened.by_number(1040).unwrap().letter, 26);
    assert!(reopened.by_number(521).unwrap().payload().unwrap().iter().all(|&b| b == 14));
    println!("  ✓ Reopened in {:?}", start.elapsed());
}
