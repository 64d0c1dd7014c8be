#![no_main]

use ald_rs::Volume;
use libfuzzer_sys::fuzz_target;
use std::fs;
use tempfile::tempdir;

// One file name per volume kind
const NAMES: [&str; 4] = ["FUZZA.ALD", "AFUZ.DAT", "fuzz.afa", "fuzz.alk"];

fuzz_target!(|data: &[u8]| {
    let Ok(dir) = tempdir() else { return };

    for name in NAMES {
        let path = dir.path().join(name);
        if fs::write(&path, data).is_err() {
            return;
        }

        // Decoding must fail cleanly, never panic
        let Ok(volume) = Volume::read(&path) else {
            continue;
        };

        for entry in &volume.entries {
            let _ = entry.payload();
        }
        let _ = volume.index_block();
    }
});
