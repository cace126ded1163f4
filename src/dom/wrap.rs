//! The wrapper factory: raw node pointer in, typed [`Node`] out.

#![allow(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use tracing::trace;

use super::document::Document;
use super::node::NodeRef;
use super::node_type::NodeType;
use super::variants::{
    Attribute, CDataSection, Comment, DocumentNode, Element, ProcessingInstruction, Text,
};
use crate::native::XmlNode;

/// A node of any type.
///
/// Every variant dereferences to [`NodeRef`], so navigation, search, naming,
/// serialization and walking work the same whatever the variant. Tags with
/// no dedicated variant land in [`Node::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node<'d> {
    /// An element.
    Element(Element<'d>),
    /// An attribute.
    Attribute(Attribute<'d>),
    /// A text node.
    Text(Text<'d>),
    /// A CDATA section.
    CDataSection(CDataSection<'d>),
    /// A comment.
    Comment(Comment<'d>),
    /// A processing instruction.
    ProcessingInstruction(ProcessingInstruction<'d>),
    /// The document node.
    DocumentNode(DocumentNode<'d>),
    /// Any other tag (DTD, entity reference, unknown...).
    Other(NodeRef<'d>),
}

impl<'d> Node<'d> {
    /// The shared node view.
    #[must_use]
    pub const fn as_node_ref(&self) -> &NodeRef<'d> {
        match self {
            Self::Element(n) => n.as_node_ref(),
            Self::Attribute(n) => n.as_node_ref(),
            Self::Text(n) => n.as_node_ref(),
            Self::CDataSection(n) => n.as_node_ref(),
            Self::Comment(n) => n.as_node_ref(),
            Self::ProcessingInstruction(n) => n.as_node_ref(),
            Self::DocumentNode(n) => n.as_node_ref(),
            Self::Other(n) => n,
        }
    }

    /// Returns the element variant, if this is one.
    #[must_use]
    pub const fn as_element(&self) -> Option<Element<'d>> {
        match self {
            Self::Element(e) => Some(*e),
            _ => None,
        }
    }
}

impl<'d> Deref for Node<'d> {
    type Target = NodeRef<'d>;

    fn deref(&self) -> &NodeRef<'d> {
        self.as_node_ref()
    }
}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_node_ref(), f)
    }
}

/// The signature of a wrapper factory.
///
/// [`XPathEvaluator`](crate::xpath::XPathEvaluator) takes one of these so a
/// caller can substitute its own dispatch.
pub type WrapFn = for<'d> unsafe fn(&'d Document, NonNull<XmlNode>) -> Node<'d>;

/// Wraps a raw node in the variant matching its type tag.
///
/// Unknown tags fall back to [`Node::Other`].
///
/// # Safety
///
/// `ptr` must be a live node owned by `doc`'s native tree.
pub unsafe fn wrap_node<'d>(doc: &'d Document, ptr: NonNull<XmlNode>) -> Node<'d> {
    // SAFETY: forwarded from the caller.
    let node = unsafe { NodeRef::from_raw(doc, ptr) };
    let node_type = node.node_type();
    trace!(%node_type, "wrapping node");
    match node_type {
        NodeType::Element => Node::Element(Element::new(node)),
        NodeType::Attribute => Node::Attribute(Attribute::new(node)),
        NodeType::Text => Node::Text(Text::new(node)),
        NodeType::CDataSection => Node::CDataSection(CDataSection::new(node)),
        NodeType::Comment => Node::Comment(Comment::new(node)),
        NodeType::ProcessingInstruction => {
            Node::ProcessingInstruction(ProcessingInstruction::new(node))
        }
        NodeType::Document | NodeType::HtmlDocument | NodeType::DocbDocument => {
            Node::DocumentNode(DocumentNode::new(node))
        }
        _ => Node::Other(node),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::native;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dispatch_by_tag() {
        let doc = Document::parse("<!DOCTYPE r><r a='1'>t<![CDATA[c]]><!--x--><?p d?></r>").unwrap();
        let root = doc.document_element().unwrap().unwrap();
        let kinds: Vec<&str> = root
            .child_nodes()
            .iter()
            .map(|n| match n {
                Node::Text(_) => "text",
                Node::CDataSection(_) => "cdata",
                Node::Comment(_) => "comment",
                Node::ProcessingInstruction(_) => "pi",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["text", "cdata", "comment", "pi"]);
        assert!(matches!(root.parent_node().unwrap(), Node::DocumentNode(_)));
        let doctype = doc.document_node().unwrap().first_child().unwrap();
        assert!(matches!(doctype, Node::Other(_)));
    }

    #[test]
    fn test_unknown_tag_falls_back_to_other() {
        let doc = Document::new("1.0");
        let raw = doc.native().unwrap();
        let node = unsafe { native::new_node(raw.as_ptr(), 99, "odd", "") };
        let wrapped = unsafe { wrap_node(&doc, NonNull::new(node).unwrap()) };
        assert!(matches!(wrapped, Node::Other(_)));
        assert_eq!(wrapped.node_type(), NodeType::Unknown(99));
        assert_eq!(wrapped.node_type().to_string(), "XmlNodeType(99)");
    }
}
