//! Typed node variants.
//!
//! Each variant is a thin newtype over [`NodeRef`] and dereferences to it, so
//! the shared capability set is available on every variant; the methods
//! defined here are the variant-specific extras.

#![allow(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use super::document::Document;
use super::node::NodeRef;
use super::wrap::Node;
use crate::error::{Error, Result};
use crate::native;

macro_rules! node_variant {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name<'d>(NodeRef<'d>);

        impl<'d> $name<'d> {
            pub(crate) const fn new(node: NodeRef<'d>) -> Self {
                Self(node)
            }

            /// The shared node view.
            #[must_use]
            pub const fn as_node_ref(&self) -> &NodeRef<'d> {
                &self.0
            }
        }

        impl<'d> Deref for $name<'d> {
            type Target = NodeRef<'d>;

            fn deref(&self) -> &NodeRef<'d> {
                &self.0
            }
        }

        impl fmt::Display for $name<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl<'d> From<$name<'d>> for Node<'d> {
            fn from(value: $name<'d>) -> Self {
                Node::$name(value)
            }
        }

        impl<'d> TryFrom<Node<'d>> for $name<'d> {
            type Error = Error;

            fn try_from(node: Node<'d>) -> Result<Self> {
                match node {
                    Node::$name(inner) => Ok(inner),
                    other => Err(Error::InvalidArgument(format!(
                        "expected {}, found {}",
                        stringify!($name),
                        other.node_type()
                    ))),
                }
            }
        }
    };
}

node_variant!(
    /// An element node.
    Element
);
node_variant!(
    /// An attribute node. Its parent is the element carrying it.
    Attribute
);
node_variant!(
    /// A text node.
    Text
);
node_variant!(
    /// A CDATA section.
    CDataSection
);
node_variant!(
    /// A comment.
    Comment
);
node_variant!(
    /// A processing instruction.
    ProcessingInstruction
);
node_variant!(
    /// The document node at the top of the tree (XML or HTML).
    DocumentNode
);

impl<'d> Element<'d> {
    fn wrap_attribute(&self, raw: native::XmlNodePtr) -> Option<Attribute<'d>> {
        // SAFETY: attribute pointers read from a live element are live nodes
        // of the same document.
        NonNull::new(raw)
            .map(|p| Attribute::new(unsafe { NodeRef::from_raw(self.owner_document(), p) }))
    }

    /// Returns the attribute called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] if the element has no such attribute.
    pub fn get_attribute(&self, name: &str) -> Result<Attribute<'d>> {
        // SAFETY: the element is live.
        let raw = unsafe { native::get_prop(self.as_ptr(), name) };
        self.wrap_attribute(raw).ok_or(Error::NodeNotFound)
    }

    /// Returns the value of the attribute called `name`, if present.
    #[must_use]
    pub fn attribute_value(&self, name: &str) -> Option<String> {
        self.get_attribute(name).ok().map(|attr| attr.value())
    }

    /// Returns `true` if the element carries an attribute called `name`.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_ok()
    }

    /// Sets the attribute `name` to `value`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` is empty.
    pub fn set_attribute(&self, name: &str, value: &str) -> Result<Attribute<'d>> {
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "attribute name must not be empty".into(),
            ));
        }
        // SAFETY: the element is live and no reference into it is held.
        let raw = unsafe { native::set_prop(self.as_ptr(), name, value) };
        self.wrap_attribute(raw).ok_or(Error::NodeNotFound)
    }

    /// All attributes in document order.
    #[must_use]
    pub fn attributes(&self) -> Vec<Attribute<'d>> {
        let mut out = Vec::new();
        // SAFETY: the element and its attribute list are live.
        let mut raw = unsafe { (*self.as_ptr()).properties };
        while let Some(attr) = self.wrap_attribute(raw) {
            // SAFETY: as above.
            raw = unsafe { (*attr.as_ptr()).next };
            out.push(attr);
        }
        out
    }
}

impl<'d> Attribute<'d> {
    /// The attribute value.
    #[must_use]
    pub fn value(&self) -> String {
        self.text_content()
    }

    /// The element carrying this attribute.
    #[must_use]
    pub fn owner_element(&self) -> Option<Element<'d>> {
        self.parent_node().and_then(|p| Element::try_from(p).ok())
    }
}

impl Text<'_> {
    /// The literal text.
    #[must_use]
    pub fn data(&self) -> String {
        self.text_content()
    }
}

impl CDataSection<'_> {
    /// The literal section content, without the `<![CDATA[` markers.
    #[must_use]
    pub fn literal(&self) -> String {
        self.text_content()
    }
}

impl Comment<'_> {
    /// The comment text, without the `<!--`/`-->` markers.
    #[must_use]
    pub fn data(&self) -> String {
        self.text_content()
    }
}

impl ProcessingInstruction<'_> {
    /// The PI target.
    #[must_use]
    pub fn target(&self) -> String {
        self.node_name()
    }

    /// Everything after the target.
    #[must_use]
    pub fn data(&self) -> String {
        self.text_content()
    }
}

impl<'d> DocumentNode<'d> {
    /// The owning document.
    #[must_use]
    pub fn document(&self) -> &'d Document {
        self.owner_document()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_element_attributes() {
        let doc = Document::parse(r#"<r a="1" b="2"/>"#).unwrap();
        let root = doc.document_element().unwrap().unwrap();
        assert_eq!(root.attribute_value("a").as_deref(), Some("1"));
        assert!(root.has_attribute("b"));
        assert!(!root.has_attribute("c"));
        assert_eq!(root.get_attribute("c"), Err(Error::NodeNotFound));

        let names: Vec<String> = root.attributes().iter().map(|a| a.node_name()).collect();
        assert_eq!(names, ["a", "b"]);

        root.set_attribute("a", "changed").unwrap();
        let c = root.set_attribute("c", "3").unwrap();
        assert_eq!(c.owner_element().unwrap(), root);
        assert_eq!(root.to_string(), r#"<r a="changed" b="2" c="3"/>"#);
        assert!(root.set_attribute("", "x").is_err());
    }

    #[test]
    fn test_leaf_accessors() {
        let doc = Document::parse("<r>hi<![CDATA[<raw>]]><!-- note --><?app go now?></r>").unwrap();
        let kids = doc.document_element().unwrap().unwrap().child_nodes();
        let text = Text::try_from(kids[0]).unwrap();
        assert_eq!(text.data(), "hi");
        let cdata = CDataSection::try_from(kids[1]).unwrap();
        assert_eq!(cdata.literal(), "<raw>");
        let comment = Comment::try_from(kids[2]).unwrap();
        assert_eq!(comment.data(), " note ");
        let pi = ProcessingInstruction::try_from(kids[3]).unwrap();
        assert_eq!(pi.target(), "app");
        assert_eq!(pi.data(), "go now");
    }

    #[test]
    fn test_try_from_rejects_other_variants() {
        let doc = Document::parse("<r>t</r>").unwrap();
        let text = doc.document_element().unwrap().unwrap().first_child().unwrap();
        let err = Element::try_from(text).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidArgument("expected Element, found TextNode".into())
        );
    }

    #[test]
    fn test_document_node_round_trips_to_document() {
        let doc = Document::parse("<r/>").unwrap();
        let node = doc.document_node().unwrap();
        assert!(std::ptr::eq(node.document(), &doc));
        assert_eq!(node.node_name(), "#document");
    }
}
