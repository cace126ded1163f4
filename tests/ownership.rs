//! Leak accounting and lifetime-mode tests.
//!
//! Live counts are per thread and every test runs on its own thread, so
//! each test compares against the counts it saw when it started.

#![allow(clippy::unwrap_used, unsafe_code)]

use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

use domoxide::native::live_counts;
use domoxide::{Document, DocumentPool, DocumentState, Lifetime, PoolConfig};

const PAGE: &str =
    r#"<html><head></head><body><a href="https://www.google.com"></a></body></html>"#;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn parse_query_free(iterations: usize) {
    for _ in 0..iterations {
        let mut doc = Document::parse_html(PAGE).unwrap();
        {
            let links = doc.find_nodes("//a").unwrap();
            assert_eq!(links.len(), 1);
            assert_eq!(
                links[0].as_element().unwrap().attribute_value("href").as_deref(),
                Some("https://www.google.com")
            );
        }
        doc.free();
    }
}

#[test]
fn test_parse_query_free_loop_leaves_nothing_live() {
    init_logging();
    let before = live_counts();
    parse_query_free(500);
    assert_eq!(live_counts(), before);
}

#[test]
fn test_live_counts_track_an_open_document() {
    let before = live_counts();
    let mut doc = Document::parse("<r><a/><b/></r>").unwrap();
    let open = live_counts();
    assert_eq!(open.documents, before.documents + 1);
    // Document node, two elements, root.
    assert_eq!(open.nodes, before.nodes + 4);
    assert_eq!(open.xpath_contexts, before.xpath_contexts);
    assert_eq!(open.xpath_objects, before.xpath_objects);
    doc.free();
    assert_eq!(live_counts(), before);
}

#[test]
fn test_drop_releases_mortal_and_explicit_documents() {
    init_logging();
    let before = live_counts();
    {
        let doc = Document::parse_html(PAGE).unwrap();
        doc.make_mortal();
        assert_eq!(doc.state(), DocumentState::Mortal);
    }
    {
        let doc = Document::parse_html(PAGE).unwrap();
        assert_eq!(doc.lifetime(), Lifetime::Explicit);
    }
    assert_eq!(live_counts(), before);
}

#[test]
fn test_pool_reuse_does_not_leak_or_alias() {
    init_logging();
    let before = live_counts();
    let pool = DocumentPool::new(PoolConfig::default().capacity(2));
    for i in 0..50 {
        let markup = format!("<r><n{i}/></r>");
        let doc = pool.parse(&markup).unwrap();
        let name = doc.document_element().unwrap().unwrap().first_child().unwrap().node_name();
        assert_eq!(name, format!("n{i}"));
        assert_eq!(doc.state(), DocumentState::Explicit);
        doc.make_mortal();
        pool.recycle(doc);
    }
    assert_eq!(pool.len(), 1);
    assert_eq!(live_counts(), before);
}

#[test]
fn test_raw_hand_off_keeps_tree_alive() {
    let before = live_counts();
    let doc = Document::parse("<r/>").unwrap();
    let raw = doc.into_raw();
    assert_eq!(live_counts().documents, before.documents + 1);
    let mut doc = unsafe { Document::from_raw(raw) };
    doc.free();
    assert_eq!(live_counts(), before);
}
