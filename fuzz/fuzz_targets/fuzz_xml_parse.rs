#![no_main]
use domoxide::native::live_counts;
use domoxide::Document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let before = live_counts();
    // Parsing must never panic, and a failed parse must not leak its partial tree.
    if let Ok(mut doc) = Document::parse_bytes(data, &Default::default()) {
        doc.free();
    }
    assert_eq!(live_counts(), before);
});
