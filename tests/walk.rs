//! Tree walking tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::ops::ControlFlow;

use pretty_assertions::assert_eq;

use domoxide::{walk, Document, Node, NodeType};

const PAGE: &str = "<html><head><title>T</title></head><body>\
                    <div id='a'><p>one<b>two</b></p><!--note--><p>three</p></div>\
                    <div id='b'><ul><li>x</li><li>y</li></ul></div></body></html>";

fn collect<'d>(root: Node<'d>) -> Vec<Node<'d>> {
    let mut seen = Vec::new();
    let flow = walk(root, |n| {
        seen.push(n);
        ControlFlow::Continue(())
    });
    assert_eq!(flow, ControlFlow::Continue(()));
    seen
}

#[test]
fn test_walk_visits_every_node_once_in_document_order() {
    let doc = Document::parse_html(PAGE).unwrap();
    let root = doc.document_element().unwrap().unwrap();
    let walked = collect(root.into());

    let unique: HashSet<_> = walked.iter().copied().collect();
    assert_eq!(unique.len(), walked.len());

    let expected = root.find_nodes("descendant-or-self::node()").unwrap();
    assert_eq!(walked, expected);
}

#[test]
fn test_walk_from_document_node_covers_everything() {
    let doc = Document::parse("<!DOCTYPE r><r><a/><?pi x?></r>").unwrap();
    let top = doc.document_node().unwrap();
    let types: Vec<NodeType> = collect(top.into()).iter().map(|n| n.node_type()).collect();
    assert_eq!(
        types,
        [
            NodeType::Document,
            NodeType::Dtd,
            NodeType::Element,
            NodeType::Element,
            NodeType::ProcessingInstruction
        ]
    );
}

#[test]
fn test_walk_is_shared_by_every_variant() {
    let doc = Document::parse_html(PAGE).unwrap();
    let comment = doc.find_nodes("//comment()").unwrap()[0];
    assert!(matches!(comment, Node::Comment(_)));
    let mut count = 0;
    let _ = comment.walk(|_| {
        count += 1;
        ControlFlow::Continue(())
    });
    assert_eq!(count, 1);

    let second_div = doc.find_nodes("//div[@id='b']").unwrap()[0];
    let names: Vec<String> = collect(second_div)
        .iter()
        .map(|n| n.node_name())
        .collect();
    assert_eq!(names, ["div", "ul", "li", "text", "li", "text"]);
}

#[test]
fn test_stop_aborts_remaining_siblings_and_subtrees() {
    let doc = Document::parse_html(PAGE).unwrap();
    let body = doc.find_nodes("//body").unwrap()[0];
    let mut seen = Vec::new();
    let flow = body.walk(|n| {
        seen.push(n.node_name());
        if n.node_name() == "b" {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });
    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(seen, ["body", "div", "p", "text", "b"]);
}

#[test]
fn test_walk_skips_attributes() {
    let doc = Document::parse(r#"<r a="1"><s b="2"/></r>"#).unwrap();
    let root = doc.document_element().unwrap().unwrap();
    assert!(collect(root.into())
        .iter()
        .all(|n| n.node_type() != NodeType::Attribute));
}
