#![no_main]
use domoxide::Document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Whatever parses must serialize to markup that parses to the same output.
        if let Ok(doc) = Document::parse(s) {
            let first = doc.serialize(0, false).unwrap_or_default();
            let again = Document::parse(&first).map(|d| d.serialize(0, false));
            if let Ok(Ok(second)) = again {
                assert_eq!(first, second);
            }
        }
    }
});
