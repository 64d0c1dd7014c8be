#![no_main]

use ald_rs::container::{discover, rebuild, ContainerKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = ContainerKind::sniff(data);

    let Some(nodes) = discover(data) else {
        return;
    };

    // Rebuilding with nothing replaced must not panic
    let _ = rebuild(data, &nodes);
});
