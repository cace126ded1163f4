//! The owning document handle.
//!
//! A [`Document`] owns one native tree and is the only way to reach it.
//! Node views borrow the document, so the borrow checker keeps them from
//! outliving it; [`Document::free`] takes `&mut self` for the same reason.
//!
//! The native pointer lives in an `AtomicPtr` and is released with a swap,
//! which makes freeing idempotent no matter which path gets there first
//! (explicit [`free`](Document::free), [`Drop`], or a pool recycling the
//! shell). Every operation on a freed document fails with
//! [`Error::UseAfterFree`].

#![allow(unsafe_code)]

use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::ops::ControlFlow;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{MutexGuard, PoisonError};

use tracing::debug;

use super::node::NodeRef;
use super::ownership::Lifetime;
use super::variants::{DocumentNode, Element};
use super::wrap::Node;
use crate::error::{Error, Result};
use crate::native::html::{self, HtmlParseOptions};
use crate::native::input::{is_name_char, is_name_start_char};
use crate::native::parser::{self, ParseOptions};
use crate::native::{self, serial, XmlDoc, XmlDocPtr, ELEMENT_NODE};
use crate::xpath::{XPathEvaluator, XPathResult};

/// An XML or HTML document backed by a native tree.
pub struct Document {
    raw: AtomicPtr<XmlDoc>,
    pub(crate) lifetime: Cell<Lifetime>,
    evaluator: XPathEvaluator,
}

impl Document {
    pub(crate) fn from_native(raw: XmlDocPtr) -> Self {
        Self {
            raw: AtomicPtr::new(raw),
            lifetime: Cell::new(Lifetime::default()),
            evaluator: XPathEvaluator::default(),
        }
    }

    /// A document in the freed state, ready to receive a tree.
    pub(crate) fn shell() -> Self {
        Self::from_native(ptr::null_mut())
    }

    /// Hands a freshly parsed tree to a freed shell.
    pub(crate) fn install(&self, raw: XmlDocPtr) {
        let previous = self.raw.swap(raw, Ordering::AcqRel);
        assert!(previous.is_null(), "installing a tree into a live document");
    }

    /// Returns a freed document to its just-constructed state.
    pub(crate) fn reset(&mut self) {
        assert!(self.is_freed(), "resetting a live document");
        self.lifetime.set(Lifetime::default());
        self.evaluator = XPathEvaluator::default();
    }

    /// The native document pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterFree`] once the document has been freed.
    pub(crate) fn native(&self) -> Result<NonNull<XmlDoc>> {
        NonNull::new(self.raw.load(Ordering::Acquire)).ok_or(Error::UseAfterFree)
    }

    /// Returns `true` once the native tree has been released.
    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.raw.load(Ordering::Acquire).is_null()
    }

    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    /// Creates an empty XML document with the given version.
    #[must_use]
    pub fn new(version: &str) -> Self {
        let version = (!version.is_empty()).then_some(version);
        Self::from_native(native::new_doc(version, false))
    }

    /// Parses an XML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the markup is not well-formed.
    pub fn parse(markup: &str) -> Result<Self> {
        Self::parse_with_options(markup, &ParseOptions::default())
    }

    /// Parses an XML document with explicit parser options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the markup is not well-formed.
    pub fn parse_with_options(markup: &str, options: &ParseOptions) -> Result<Self> {
        let raw = parser::parse_str_with_options(markup, options)?;
        debug!(bytes = markup.len(), "parsed XML document");
        Ok(Self::from_native(raw))
    }

    /// Parses an XML document from bytes, detecting the encoding from the
    /// BOM or the XML declaration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the bytes cannot be decoded or are not
    /// well-formed.
    pub fn parse_bytes(bytes: &[u8], options: &ParseOptions) -> Result<Self> {
        let raw = parser::parse_bytes(bytes, options)?;
        debug!(bytes = bytes.len(), "parsed XML document from bytes");
        Ok(Self::from_native(raw))
    }

    /// Parses an HTML document. The parser recovers from malformed markup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] only for input the parser cannot recover from.
    pub fn parse_html(markup: &str) -> Result<Self> {
        Self::parse_html_with_options(markup, &HtmlParseOptions::default())
    }

    /// Parses an HTML document with explicit parser options.
    ///
    /// # Errors
    ///
    /// See [`parse_html`](Self::parse_html).
    pub fn parse_html_with_options(markup: &str, options: &HtmlParseOptions) -> Result<Self> {
        let raw = html::parse_html_with_options(markup, options)?;
        debug!(bytes = markup.len(), "parsed HTML document");
        Ok(Self::from_native(raw))
    }

    /// Parses an HTML document from bytes, honoring a BOM or `<meta charset>`.
    ///
    /// # Errors
    ///
    /// See [`parse_html`](Self::parse_html).
    pub fn parse_html_bytes(bytes: &[u8], options: &HtmlParseOptions) -> Result<Self> {
        let raw = html::parse_html_bytes(bytes, options)?;
        debug!(bytes = bytes.len(), "parsed HTML document from bytes");
        Ok(Self::from_native(raw))
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// The root element, or `None` for a document without one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterFree`] once the document has been freed.
    pub fn document_element(&self) -> Result<Option<Element<'_>>> {
        let raw = self.native()?;
        // SAFETY: the document is live.
        let root = unsafe { native::doc_get_root_element(raw.as_ptr()) };
        // SAFETY: the root element belongs to this document.
        Ok(NonNull::new(root).map(|p| Element::new(unsafe { NodeRef::from_raw(self, p) })))
    }

    /// The document node at the top of the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterFree`] once the document has been freed.
    pub fn document_node(&self) -> Result<DocumentNode<'_>> {
        let raw = self.native()?;
        // SAFETY: every live document has a document node.
        let node = unsafe { (*raw.as_ptr()).node };
        let node = NonNull::new(node).ok_or(Error::UseAfterFree)?;
        // SAFETY: the document node belongs to this document.
        Ok(DocumentNode::new(unsafe { NodeRef::from_raw(self, node) }))
    }

    /// Evaluates `xpath` with the root element as context node and returns
    /// the matched nodes in document order. No match is an empty vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] if there is no root element,
    /// [`Error::InvalidArgument`] for a malformed expression, and
    /// [`Error::Eval`] if evaluation fails or does not yield a node set.
    pub fn find_nodes(&self, xpath: &str) -> Result<Vec<Node<'_>>> {
        let root = self.document_element()?.ok_or(Error::NodeNotFound)?;
        root.find_nodes(xpath)
    }

    /// Evaluates `xpath` with the root element as context node.
    ///
    /// # Errors
    ///
    /// As [`find_nodes`](Self::find_nodes), except that any result type is
    /// accepted.
    pub fn find(&self, xpath: &str) -> Result<XPathResult<'_>> {
        let root = self.document_element()?.ok_or(Error::NodeNotFound)?;
        root.find(xpath)
    }

    /// Visits the root element and its descendants in pre-order. Nodes
    /// outside the root element, such as a DTD, are not visited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] if there is no root element.
    pub fn walk<'d, F>(&'d self, visit: F) -> Result<ControlFlow<()>>
    where
        F: FnMut(Node<'d>) -> ControlFlow<()>,
    {
        let root = self.document_element()?.ok_or(Error::NodeNotFound)?;
        Ok(root.walk(visit))
    }

    /// The declared encoding, or an empty string when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterFree`] once the document has been freed.
    pub fn encoding(&self) -> Result<String> {
        self.native()?;
        Ok(self.declared_encoding().unwrap_or_default())
    }

    pub(crate) fn declared_encoding(&self) -> Option<String> {
        let raw = self.native().ok()?;
        // SAFETY: the document is live.
        unsafe { (*raw.as_ptr()).encoding.clone() }
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    /// Creates a detached element owned by this document.
    ///
    /// The element is reachable only once attached with
    /// [`add_child`](NodeRef::add_child) or
    /// [`set_document_element`](Self::set_document_element); until then it
    /// stays allocated and is released with the document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` is not an XML name, and
    /// [`Error::UseAfterFree`] once the document has been freed.
    pub fn create_element(&self, name: &str) -> Result<Element<'_>> {
        let raw = self.native()?;
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char);
        if !valid {
            return Err(Error::InvalidArgument(format!(
                "invalid element name: {name:?}"
            )));
        }
        // SAFETY: the document is live.
        let node = unsafe { native::new_node(raw.as_ptr(), ELEMENT_NODE, name, "") };
        let node = NonNull::new(node).ok_or(Error::UseAfterFree)?;
        // SAFETY: the new node belongs to this document.
        Ok(Element::new(unsafe { NodeRef::from_raw(self, node) }))
    }

    /// Makes `element` the root element. A displaced root stays owned by the
    /// document as a detached subtree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `element` belongs to another
    /// document, and [`Error::UseAfterFree`] once this one has been freed.
    pub fn set_document_element(&self, element: &Element<'_>) -> Result<()> {
        if !ptr::eq(element.owner_document(), self) {
            return Err(Error::InvalidArgument(
                "element belongs to another document".into(),
            ));
        }
        let raw = self.native()?;
        // SAFETY: the document and the element are live and the element is
        // an element node of this document.
        unsafe { native::doc_set_root_element(raw.as_ptr(), element.as_ptr()) };
        debug!(root = %element.node_name(), "set document element");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Output
    // ---------------------------------------------------------------------

    /// Serializes the whole document.
    ///
    /// `format <= 0` writes the tree compactly; `format > 0` indents
    /// element-only content. The process-wide indent flag is switched on
    /// for the duration of the call and restored afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterFree`] once the document has been freed.
    pub fn serialize(&self, format: i32, use_doc_encoding: bool) -> Result<String> {
        let raw = self.native()?;
        let _indent = (format > 0).then(IndentGuard::acquire);
        // SAFETY: the document is live and not mutated during the dump.
        Ok(unsafe { serial::doc_dump(raw.as_ptr(), format > 0, use_doc_encoding) })
    }

    /// Serializes the document encoded in its declared encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the declared encoding is not
    /// supported, and [`Error::UseAfterFree`] once the document has been freed.
    pub fn to_bytes(&self, format: i32) -> Result<Vec<u8>> {
        let raw = self.native()?;
        let _indent = (format > 0).then(IndentGuard::acquire);
        // SAFETY: the document is live.
        unsafe { serial::doc_dump_bytes(raw.as_ptr(), format > 0) }.map_err(Error::InvalidArgument)
    }

    /// Renders one line per node: depth indentation, type, and name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterFree`] once the document has been freed.
    pub fn outline(&self) -> Result<String> {
        let mut out = String::new();
        let mut pending = vec![(self.document_node()?.to_node(), 0)];
        while let Some((node, depth)) = pending.pop() {
            let _ = writeln!(
                out,
                "{:indent$}{} {}",
                "",
                node.node_type(),
                node.node_name(),
                indent = depth * 2
            );
            pending.extend(node.child_nodes().into_iter().rev().map(|c| (c, depth + 1)));
        }
        Ok(out)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Releases the native tree. Calling it again is a no-op.
    pub fn free(&mut self) {
        self.release();
    }

    /// Frees the tree if it is still live. Returns `true` if this call did.
    pub(crate) fn release(&self) -> bool {
        let raw = self.raw.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            return false;
        }
        // SAFETY: the swap made this the only holder of `raw`, and no node
        // view can be alive because releasing needs the document unborrowed
        // or being dropped.
        unsafe { native::free_doc(raw) };
        debug!("freed document");
        true
    }

    /// Gives up ownership of the native tree without freeing it.
    ///
    /// Returns null if the document was already freed.
    #[must_use]
    pub fn into_raw(self) -> XmlDocPtr {
        self.raw.swap(ptr::null_mut(), Ordering::AcqRel)
    }

    /// Takes ownership of a native tree.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a live document from this crate's native
    /// engine that nothing else will free.
    #[must_use]
    pub unsafe fn from_raw(raw: XmlDocPtr) -> Self {
        Self::from_native(raw)
    }

    /// The evaluator used by [`find_nodes`](Self::find_nodes) and by every
    /// node view of this document.
    #[must_use]
    pub const fn evaluator(&self) -> &XPathEvaluator {
        &self.evaluator
    }

    /// Replaces the evaluator, e.g. to install a custom wrapper factory.
    pub fn set_evaluator(&mut self, evaluator: XPathEvaluator) {
        self.evaluator = evaluator;
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("raw", &self.raw.load(Ordering::Acquire))
            .field("lifetime", &self.lifetime.get())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.serialize(0, false) {
            Ok(text) => f.write_str(&text),
            Err(_) => Ok(()),
        }
    }
}

/// Holds the indent flag on for as long as it lives.
///
/// Acquiring takes the engine's indent lock, so concurrent formatted dumps
/// run one at a time and each one restores the flag it found.
pub(crate) struct IndentGuard {
    previous: bool,
    _lock: MutexGuard<'static, ()>,
}

impl IndentGuard {
    pub(crate) fn acquire() -> Self {
        let lock = serial::INDENT_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = serial::set_indent_tree_output(true);
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for IndentGuard {
    fn drop(&mut self) {
        serial::set_indent_tree_output(self.previous);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dom::NodeType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new("1.0");
        assert_eq!(doc.document_element().unwrap(), None);
        assert_eq!(doc.find_nodes("//a").unwrap_err(), Error::NodeNotFound);
        assert_eq!(doc.to_string(), "<?xml version=\"1.0\"?>\n");
    }

    #[test]
    fn test_create_element_and_set_root() {
        let doc = Document::new("1.0");
        let div = doc.create_element("div").unwrap();
        doc.set_document_element(&div).unwrap();
        let root = doc.document_element().unwrap().unwrap();
        assert_eq!(root.node_name(), "div");
        assert_eq!(root, div);

        let span = doc.create_element("span").unwrap();
        doc.set_document_element(&span).unwrap();
        assert_eq!(doc.to_string(), "<?xml version=\"1.0\"?>\n<span/>\n");
    }

    #[test]
    fn test_create_element_after_free_is_use_after_free() {
        let mut doc = Document::new("1.0");
        doc.free();
        assert_eq!(doc.create_element("div"), Err(Error::UseAfterFree));
        assert_eq!(doc.create_element("1 bad"), Err(Error::UseAfterFree));
    }

    #[test]
    fn test_walk_starts_at_root_element() {
        let doc = Document::parse("<!DOCTYPE r><r><a/><!--c--></r>").unwrap();
        let mut seen = Vec::new();
        let flow = doc
            .walk(|node| {
                seen.push(node.node_name());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(seen, ["r", "a", "comment"]);
        assert_eq!(
            Document::new("1.0").walk(|_| ControlFlow::Continue(())),
            Err(Error::NodeNotFound)
        );
    }

    #[test]
    fn test_outline_of_deep_tree() {
        let doc = Document::new("1.0");
        let mut top = doc.create_element("d").unwrap();
        for _ in 0..2_000 {
            let parent = doc.create_element("d").unwrap();
            parent.add_child(&top).unwrap();
            top = parent;
        }
        doc.set_document_element(&top).unwrap();
        let outline = doc.outline().unwrap();
        assert_eq!(outline.lines().count(), 2_002);
        assert_eq!(
            outline.lines().last().unwrap(),
            format!("{}ElementNode d", " ".repeat(2 * 2_001))
        );
    }

    #[test]
    fn test_create_element_rejects_bad_names() {
        let doc = Document::new("1.0");
        for name in ["", "1abc", "a b", "<x>"] {
            assert!(matches!(
                doc.create_element(name),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_set_document_element_rejects_foreign_element() {
        let doc = Document::new("1.0");
        let other = Document::new("1.0");
        let foreign = other.create_element("x").unwrap();
        assert!(matches!(
            doc.set_document_element(&foreign),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encoding() {
        let doc = Document::parse("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r/>").unwrap();
        assert_eq!(doc.encoding().unwrap(), "ISO-8859-1");
        let doc = Document::parse("<r/>").unwrap();
        assert_eq!(doc.encoding().unwrap(), "");
    }

    fn indent_flag() -> bool {
        let _lock = serial::INDENT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        serial::indent_tree_output()
    }

    fn set_indent_flag(on: bool) {
        let _lock = serial::INDENT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        serial::set_indent_tree_output(on);
    }

    // The only test in this binary that changes or asserts the flag, so no
    // other test can observe the `false` it installs.
    #[test]
    fn test_formatted_output_restores_indent_flag() {
        let doc = Document::parse("<r><a><b/></a></r>").unwrap();
        let root = doc.document_element().unwrap().unwrap();
        set_indent_flag(false);

        let pretty = doc.serialize(1, false).unwrap();
        assert_eq!(pretty, "<?xml version=\"1.0\"?>\n<r>\n  <a>\n    <b/>\n  </a>\n</r>\n");
        assert!(!indent_flag());

        assert_eq!(root.to_string_with(1, false), "<r>\n  <a>\n    <b/>\n  </a>\n</r>");
        assert!(!indent_flag());

        let compact = doc.serialize(0, false).unwrap();
        assert_eq!(compact, "<?xml version=\"1.0\"?>\n<r><a><b/></a></r>\n");
        assert!(!indent_flag());

        // The error path restores the flag too.
        let raw = doc.native().unwrap();
        unsafe { (*raw.as_ptr()).encoding = Some("x-no-such-encoding".into()) };
        assert!(matches!(doc.to_bytes(1), Err(Error::InvalidArgument(_))));
        assert!(!indent_flag());

        set_indent_flag(true);
        assert!(doc.to_bytes(1).is_err());
        assert!(indent_flag());
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut doc = Document::parse("<r/>").unwrap();
        doc.free();
        assert!(doc.is_freed());
        doc.free();
        assert_eq!(doc.document_element(), Err(Error::UseAfterFree));
        assert_eq!(doc.serialize(0, false), Err(Error::UseAfterFree));
        assert_eq!(doc.encoding(), Err(Error::UseAfterFree));
        assert_eq!(doc.to_string(), "");
    }

    #[test]
    fn test_raw_hand_off() {
        let doc = Document::parse("<r/>").unwrap();
        let raw = doc.into_raw();
        assert!(!raw.is_null());
        let doc = unsafe { Document::from_raw(raw) };
        assert_eq!(doc.document_element().unwrap().unwrap().node_name(), "r");
    }

    #[test]
    fn test_outline() {
        let doc = Document::parse("<r><a>t</a><!--c--></r>").unwrap();
        assert_eq!(
            doc.outline().unwrap(),
            "DocumentNode #document\n  ElementNode r\n    ElementNode a\n      TextNode text\n    CommentNode comment\n"
        );
        assert_eq!(
            doc.document_node().unwrap().node_type(),
            NodeType::Document
        );
    }
}
