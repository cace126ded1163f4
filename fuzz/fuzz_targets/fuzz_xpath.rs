#![no_main]
use domoxide::Document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(expr) = std::str::from_utf8(data) {
        if let Ok(doc) = Document::parse("<root><child attr=\"val\">text</child><!--c--></root>") {
            // Evaluation should never panic on any expression.
            let _ = doc.find(expr);
        }
    }
});
