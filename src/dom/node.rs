//! The capability set shared by every node variant.

#![allow(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::ControlFlow;
use std::ptr::{self, NonNull};

use tracing::trace;

use super::document::{Document, IndentGuard};
use super::node_type::NodeType;
use super::walk;
use super::wrap::{wrap_node, Node};
use crate::error::{Error, Result};
use crate::native::{self, serial, XmlNode, XmlNodePtr};
use crate::xpath::XPathResult;

/// A non-owning view of one node inside a [`Document`].
///
/// The view borrows the document, so it cannot outlive it and the document
/// cannot be freed while the view exists. Two views are equal exactly when
/// they point at the same native node.
#[derive(Clone, Copy)]
pub struct NodeRef<'d> {
    doc: &'d Document,
    ptr: NonNull<XmlNode>,
}

impl<'d> NodeRef<'d> {
    /// Creates a view of `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live node owned by `doc`'s native tree.
    #[must_use]
    pub unsafe fn from_raw(doc: &'d Document, ptr: NonNull<XmlNode>) -> Self {
        Self { doc, ptr }
    }

    /// Reads the native node.
    fn get<T>(&self, read: impl FnOnce(&XmlNode) -> T) -> T {
        // SAFETY: the node belongs to `self.doc`, which cannot be freed
        // while this borrow of it is alive.
        read(unsafe { self.ptr.as_ref() })
    }

    /// Wraps a pointer read from this node's links.
    fn wrap(&self, raw: XmlNodePtr) -> Option<Node<'d>> {
        // SAFETY: links of a live node point at live nodes of the same tree.
        NonNull::new(raw).map(|p| unsafe { wrap_node(self.doc, p) })
    }

    /// Returns this view as its typed variant.
    #[must_use]
    pub fn to_node(&self) -> Node<'d> {
        // SAFETY: `self.ptr` is a live node of `self.doc`.
        unsafe { wrap_node(self.doc, self.ptr) }
    }

    /// The native address, which is the node's identity.
    #[must_use]
    pub fn as_ptr(&self) -> XmlNodePtr {
        self.ptr.as_ptr()
    }

    /// The document that owns this node.
    #[must_use]
    pub fn owner_document(&self) -> &'d Document {
        self.doc
    }

    /// The node's type tag.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        NodeType::from_tag(self.get(|n| n.typ))
    }

    /// The node's name. Text nodes are named `text`, comments `comment`,
    /// the document node `#document`.
    #[must_use]
    pub fn node_name(&self) -> String {
        self.get(|n| n.name.clone())
    }

    /// Renames the node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` is empty.
    pub fn set_node_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("node name must not be empty".into()));
        }
        // SAFETY: the node is live; no reference into it is held across the call.
        unsafe { native::node_set_name(self.as_ptr(), name) };
        Ok(())
    }

    /// The parent node; for an attribute, its element.
    #[must_use]
    pub fn parent_node(&self) -> Option<Node<'d>> {
        self.wrap(self.get(|n| n.parent))
    }

    /// The first child.
    #[must_use]
    pub fn first_child(&self) -> Option<Node<'d>> {
        self.wrap(self.get(|n| n.children))
    }

    /// The last child.
    #[must_use]
    pub fn last_child(&self) -> Option<Node<'d>> {
        self.wrap(self.get(|n| n.last))
    }

    /// The next sibling.
    #[must_use]
    pub fn next_sibling(&self) -> Option<Node<'d>> {
        self.wrap(self.get(|n| n.next))
    }

    /// The previous sibling.
    #[must_use]
    pub fn previous_sibling(&self) -> Option<Node<'d>> {
        self.wrap(self.get(|n| n.prev))
    }

    /// All children in sibling order. Attributes are not children.
    #[must_use]
    pub fn child_nodes(&self) -> Vec<Node<'d>> {
        let mut out = Vec::new();
        let mut child = self.first_child();
        while let Some(node) = child {
            child = node.next_sibling();
            out.push(node);
        }
        out
    }

    /// Evaluates `xpath` with this node as the context node and returns the
    /// matched nodes in document order.
    ///
    /// # Errors
    ///
    /// See [`XPathEvaluator::find_nodes`](crate::xpath::XPathEvaluator::find_nodes).
    pub fn find_nodes(&self, xpath: &str) -> Result<Vec<Node<'d>>> {
        self.doc.evaluator().find_nodes(*self, xpath)
    }

    /// Evaluates `xpath` with this node as the context node.
    ///
    /// # Errors
    ///
    /// See [`XPathEvaluator::evaluate`](crate::xpath::XPathEvaluator::evaluate).
    pub fn find(&self, xpath: &str) -> Result<XPathResult<'d>> {
        self.doc.evaluator().evaluate(*self, xpath)
    }

    /// Returns `true` if both views point at the same native node.
    #[must_use]
    pub fn is_same_node(&self, other: &NodeRef<'_>) -> bool {
        self.ptr == other.ptr
    }

    /// The XPath string-value: concatenated descendant text for elements
    /// and documents, the node's own content otherwise.
    #[must_use]
    pub fn text_content(&self) -> String {
        // SAFETY: the node is live.
        unsafe { native::node_string_value(self.as_ptr()) }
    }

    /// Serializes the subtree rooted at this node.
    ///
    /// `format > 0` indents element-only content; `use_doc_encoding` writes
    /// characters the document's declared encoding cannot hold as
    /// character references.
    #[must_use]
    pub fn to_string_with(&self, format: i32, use_doc_encoding: bool) -> String {
        let encoding = if use_doc_encoding {
            self.doc.declared_encoding()
        } else {
            None
        };
        let _indent = (format > 0).then(IndentGuard::acquire);
        // SAFETY: the node is live and the tree is not mutated during the dump.
        unsafe { serial::node_dump(self.as_ptr(), format > 0, encoding.as_deref()) }
    }

    /// Visits this node and its descendants in pre-order.
    ///
    /// Returns [`ControlFlow::Break`] if `visit` stopped the walk.
    pub fn walk<F>(&self, visit: F) -> ControlFlow<()>
    where
        F: FnMut(Node<'d>) -> ControlFlow<()>,
    {
        walk::walk(self.to_node(), visit)
    }

    /// Appends `child` as the last child of this node, moving it if it is
    /// already attached somewhere.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `child` belongs to another
    /// document, is a document or attribute node, is this node or one of
    /// its ancestors, or if this node cannot have children.
    pub fn add_child(&self, child: &NodeRef<'_>) -> Result<()> {
        if !ptr::eq(self.doc, child.doc) {
            return Err(Error::InvalidArgument(
                "node belongs to another document".into(),
            ));
        }
        let child_type = child.node_type();
        if child_type.is_document() || child_type == NodeType::Attribute {
            return Err(Error::InvalidArgument(format!(
                "a {child_type} cannot be added as a child"
            )));
        }
        let parent_type = self.node_type();
        if !(parent_type == NodeType::Element
            || parent_type == NodeType::DocumentFragment
            || parent_type.is_document())
        {
            return Err(Error::InvalidArgument(format!(
                "a {parent_type} cannot have children"
            )));
        }
        // SAFETY: both nodes are live members of the same tree.
        unsafe {
            if native::is_ancestor_or_self(child.as_ptr(), self.as_ptr()) {
                return Err(Error::InvalidArgument(
                    "adding the node would create a cycle".into(),
                ));
            }
            native::add_child(self.as_ptr(), child.as_ptr());
        }
        trace!(parent = %self.node_name(), child = %child.node_name(), "added child");
        Ok(())
    }

    /// Same as [`add_child`](Self::add_child).
    ///
    /// # Errors
    ///
    /// See [`add_child`](Self::add_child).
    pub fn append_child(&self, child: &NodeRef<'_>) -> Result<()> {
        self.add_child(child)
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for NodeRef<'_> {}

impl Hash for NodeRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("type", &self.node_type())
            .field("name", &self.node_name())
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl fmt::Display for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(0, false))
    }
}
