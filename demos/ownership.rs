//! Lifetime modes, explicit freeing, and the document pool.
//!
//! Run with: `RUST_LOG=domoxide=debug cargo run --example ownership`
#![allow(clippy::expect_used)]

use domoxide::native::live_counts;
use domoxide::{Document, DocumentPool, PoolConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Explicit: the owner frees. A second free is a no-op.
    let mut doc = Document::parse("<r><a/></r>").expect("failed to parse XML");
    println!("explicit document: {:?}", doc.state());
    doc.free();
    doc.free();
    println!("after free:        {:?}", doc.state());

    // Mortal: dropping the document releases it.
    {
        let doc = Document::parse("<r/>").expect("failed to parse XML");
        doc.make_mortal();
        println!("mortal document:   {:?}", doc.state());
    }

    // Explicit but dropped: released anyway, with a warning in the log.
    drop(Document::parse("<forgotten/>").expect("failed to parse XML"));

    // Pooled shells are reset before they are handed out again.
    let pool = DocumentPool::new(PoolConfig::default().capacity(4));
    for i in 0..3 {
        let doc = pool.parse(&format!("<doc n='{i}'/>")).expect("failed to parse XML");
        let root = doc.document_element().expect("freed").expect("no root");
        println!("pooled parse {i}: {root}");
        pool.recycle(doc);
    }
    println!("idle shells: {}", pool.len());
    println!("live native allocations: {:?}", live_counts());
}
