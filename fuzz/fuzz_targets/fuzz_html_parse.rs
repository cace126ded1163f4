#![no_main]
use domoxide::Document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The HTML parser recovers from anything short of exhausting its depth limit.
    if let Ok(doc) = Document::parse_html_bytes(data, &Default::default()) {
        let _ = doc.outline();
    }
});
