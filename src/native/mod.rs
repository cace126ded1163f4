//! The native tree engine.
//!
//! This is the manually managed side of the crate: a libxml2-shaped tree of
//! heap nodes linked by raw pointers. Nodes are allocated with
//! `Box::into_raw` and stay alive until [`free_doc`] releases the whole
//! document they belong to. Nothing here tracks borrows or lifetimes; the
//! [`dom`](crate::dom) layer is responsible for handing out views that cannot
//! outlive the tree.
//!
//! The engine surface mirrors the handful of libxml2 calls a wrapper needs:
//! parse ([`parser`], [`html`]), free ([`free_doc`]), dump ([`serial`]),
//! XPath contexts and result objects ([`xpath`]), and a few structural
//! primitives ([`add_child`], [`doc_set_root_element`], [`set_prop`], ...).
//!
//! # Detached nodes
//!
//! A node created with [`new_node`] or displaced by [`doc_set_root_element`]
//! is not reachable from the document node, yet it still belongs to the
//! document. Each `XmlDoc` keeps a list of such detached subtree roots so
//! that [`free_doc`] can release them too. A node is on that list exactly
//! when it has no parent and is not the document node.
//!
//! # Leak accounting
//!
//! Every allocation and release of a document, node, XPath context, or
//! XPath object is counted per thread; see [`live_counts`].

// Raw pointer plumbing is the whole point of this module.
#![allow(unsafe_code, clippy::missing_safety_doc)]

pub mod encoding;
pub mod html;
pub(crate) mod input;
pub mod parser;
pub mod serial;
pub mod xpath;

use std::cell::Cell;
use std::ptr;

use crate::dom::NodeType;

/// Raw pointer to a native node.
pub type XmlNodePtr = *mut XmlNode;

/// Raw pointer to a native document.
pub type XmlDocPtr = *mut XmlDoc;

pub(crate) const ELEMENT_NODE: i32 = NodeType::Element.tag();
pub(crate) const ATTRIBUTE_NODE: i32 = NodeType::Attribute.tag();
pub(crate) const TEXT_NODE: i32 = NodeType::Text.tag();
pub(crate) const CDATA_SECTION_NODE: i32 = NodeType::CDataSection.tag();
pub(crate) const ENTITY_REF_NODE: i32 = NodeType::EntityRef.tag();
pub(crate) const PI_NODE: i32 = NodeType::ProcessingInstruction.tag();
pub(crate) const COMMENT_NODE: i32 = NodeType::Comment.tag();
pub(crate) const DOCUMENT_NODE: i32 = NodeType::Document.tag();
pub(crate) const HTML_DOCUMENT_NODE: i32 = NodeType::HtmlDocument.tag();
pub(crate) const DTD_NODE: i32 = NodeType::Dtd.tag();

/// A native tree node.
///
/// The layout follows libxml2's `xmlNode`: a type tag, a name, textual
/// content, five navigation links, an attribute list, and a back pointer to
/// the owning document. Attributes are themselves `XmlNode`s tagged
/// [`NodeType::Attribute`], chained through `next`/`prev` from the element's
/// `properties` and holding their value in `content`.
#[derive(Debug)]
pub struct XmlNode {
    pub(crate) typ: i32,
    pub(crate) name: String,
    pub(crate) content: String,
    pub(crate) children: XmlNodePtr,
    pub(crate) last: XmlNodePtr,
    pub(crate) parent: XmlNodePtr,
    pub(crate) next: XmlNodePtr,
    pub(crate) prev: XmlNodePtr,
    pub(crate) properties: XmlNodePtr,
    pub(crate) doc: XmlDocPtr,
}

/// A native document.
///
/// `node` is the document node (tag [`NodeType::Document`] or
/// [`NodeType::HtmlDocument`]) whose children form the tree.
#[derive(Debug)]
pub struct XmlDoc {
    pub(crate) node: XmlNodePtr,
    pub(crate) version: Option<String>,
    pub(crate) encoding: Option<String>,
    pub(crate) standalone: Option<bool>,
    pub(crate) orphans: Vec<XmlNodePtr>,
}

impl XmlDoc {
    /// Returns `true` if this document came out of the HTML parser.
    pub(crate) fn is_html(&self) -> bool {
        // SAFETY: `node` is allocated together with the document and freed with it.
        unsafe { (*self.node).typ == HTML_DOCUMENT_NODE }
    }
}

// -------------------------------------------------------------------------
// Leak accounting
// -------------------------------------------------------------------------

/// Live native allocations on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveCounts {
    /// Documents allocated and not yet freed.
    pub documents: i64,
    /// Nodes (including attribute and document nodes) not yet freed.
    pub nodes: i64,
    /// XPath evaluation contexts not yet freed.
    pub xpath_contexts: i64,
    /// XPath result objects not yet freed.
    pub xpath_objects: i64,
}

thread_local! {
    static LIVE: Cell<LiveCounts> = const {
        Cell::new(LiveCounts {
            documents: 0,
            nodes: 0,
            xpath_contexts: 0,
            xpath_objects: 0,
        })
    };
}

/// Returns the native allocations currently live on this thread.
///
/// Counts are per thread: a document freed on a different thread than the
/// one that parsed it shows up as a negative count on the freeing thread.
#[must_use]
pub fn live_counts() -> LiveCounts {
    LIVE.with(Cell::get)
}

pub(crate) fn track(update: impl FnOnce(&mut LiveCounts)) {
    LIVE.with(|cell| {
        let mut counts = cell.get();
        update(&mut counts);
        cell.set(counts);
    });
}

// -------------------------------------------------------------------------
// Allocation
// -------------------------------------------------------------------------

/// Allocates a new, empty document with its document node.
///
/// The returned pointer must be released with [`free_doc`].
#[must_use]
pub fn new_doc(version: Option<&str>, html: bool) -> XmlDocPtr {
    let doc = Box::into_raw(Box::new(XmlDoc {
        node: ptr::null_mut(),
        version: version.map(str::to_owned),
        encoding: None,
        standalone: None,
        orphans: Vec::new(),
    }));
    let typ = if html { HTML_DOCUMENT_NODE } else { DOCUMENT_NODE };
    let node = alloc_node(doc, typ, "#document", "");
    // SAFETY: `doc` was just allocated above and is exclusively ours.
    unsafe { (*doc).node = node };
    track(|c| c.documents += 1);
    doc
}

/// Allocates a node without registering it anywhere.
///
/// Parsers use this and link the node immediately; everything else goes
/// through [`new_node`].
pub(crate) fn alloc_node(doc: XmlDocPtr, typ: i32, name: &str, content: &str) -> XmlNodePtr {
    track(|c| c.nodes += 1);
    Box::into_raw(Box::new(XmlNode {
        typ,
        name: name.to_owned(),
        content: content.to_owned(),
        children: ptr::null_mut(),
        last: ptr::null_mut(),
        parent: ptr::null_mut(),
        next: ptr::null_mut(),
        prev: ptr::null_mut(),
        properties: ptr::null_mut(),
        doc,
    }))
}

/// Creates a detached node owned by `doc` (libxml2's `xmlNewDocNode`).
///
/// The node is released by [`free_doc`] whether or not it is ever attached.
///
/// # Safety
///
/// `doc` must be a live document pointer.
pub unsafe fn new_node(doc: XmlDocPtr, typ: i32, name: &str, content: &str) -> XmlNodePtr {
    let node = alloc_node(doc, typ, name, content);
    // SAFETY: caller guarantees `doc` is live.
    unsafe { (*doc).orphans.push(node) };
    node
}

// -------------------------------------------------------------------------
// Linking
// -------------------------------------------------------------------------

/// Appends `child` as the last child of `parent` without any bookkeeping.
///
/// # Safety
///
/// Both pointers must be live and `child` must be unlinked.
pub(crate) unsafe fn link_last(parent: XmlNodePtr, child: XmlNodePtr) {
    unsafe {
        (*child).parent = parent;
        (*child).next = ptr::null_mut();
        (*child).prev = (*parent).last;
        if (*parent).last.is_null() {
            (*parent).children = child;
        } else {
            (*(*parent).last).next = child;
        }
        (*parent).last = child;
    }
}

/// Links `node` as the previous sibling of `next` without any bookkeeping.
///
/// # Safety
///
/// Both pointers must be live, `next` must have a parent, and `node` must be
/// unlinked.
pub(crate) unsafe fn link_before(next: XmlNodePtr, node: XmlNodePtr) {
    unsafe {
        let parent = (*next).parent;
        (*node).parent = parent;
        (*node).next = next;
        (*node).prev = (*next).prev;
        if (*next).prev.is_null() {
            (*parent).children = node;
        } else {
            (*(*next).prev).next = node;
        }
        (*next).prev = node;
    }
}

/// Appends `attr` to the attribute list of `elem` without any bookkeeping.
///
/// # Safety
///
/// Both pointers must be live and `attr` must be unlinked.
pub(crate) unsafe fn link_attr(elem: XmlNodePtr, attr: XmlNodePtr) {
    unsafe {
        (*attr).parent = elem;
        (*attr).next = ptr::null_mut();
        let mut cur = (*elem).properties;
        if cur.is_null() {
            (*attr).prev = ptr::null_mut();
            (*elem).properties = attr;
            return;
        }
        while !(*cur).next.is_null() {
            cur = (*cur).next;
        }
        (*cur).next = attr;
        (*attr).prev = cur;
    }
}

/// Removes `node` from its parent's child (or attribute) list.
unsafe fn detach(node: XmlNodePtr) {
    unsafe {
        let parent = (*node).parent;
        if parent.is_null() {
            return;
        }
        let prev = (*node).prev;
        let next = (*node).next;
        if (*node).typ == ATTRIBUTE_NODE {
            if prev.is_null() {
                (*parent).properties = next;
            } else {
                (*prev).next = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }
        } else {
            if prev.is_null() {
                (*parent).children = next;
            } else {
                (*prev).next = next;
            }
            if next.is_null() {
                (*parent).last = prev;
            } else {
                (*next).prev = prev;
            }
        }
        (*node).parent = ptr::null_mut();
        (*node).next = ptr::null_mut();
        (*node).prev = ptr::null_mut();
    }
}

unsafe fn register_orphan(node: XmlNodePtr) {
    unsafe {
        let doc = (*node).doc;
        if doc.is_null() || (*doc).node == node {
            return;
        }
        if !(*doc).orphans.contains(&node) {
            (*doc).orphans.push(node);
        }
    }
}

unsafe fn forget_orphan(node: XmlNodePtr) {
    unsafe {
        let doc = (*node).doc;
        if !doc.is_null() {
            (*doc).orphans.retain(|&p| p != node);
        }
    }
}

/// Points every node of the subtree rooted at `node` at `doc`.
unsafe fn set_tree_doc(node: XmlNodePtr, doc: XmlDocPtr) {
    let mut stack = vec![node];
    while let Some(cur) = stack.pop() {
        unsafe {
            (*cur).doc = doc;
            let mut child = (*cur).children;
            while !child.is_null() {
                stack.push(child);
                child = (*child).next;
            }
            let mut attr = (*cur).properties;
            while !attr.is_null() {
                stack.push(attr);
                attr = (*attr).next;
            }
        }
    }
}

/// Returns `true` if `candidate` is `node` or one of its ancestors.
///
/// # Safety
///
/// Both pointers must be live.
pub unsafe fn is_ancestor_or_self(candidate: XmlNodePtr, node: XmlNodePtr) -> bool {
    let mut cur = node;
    while !cur.is_null() {
        if cur == candidate {
            return true;
        }
        cur = unsafe { (*cur).parent };
    }
    false
}

/// Moves `child` to the end of `parent`'s children (libxml2's `xmlAddChild`).
///
/// `child` is first unlinked from wherever it currently lives and adopted
/// into `parent`'s document. Attribute nodes are appended to the attribute
/// list instead. Adjacent text nodes are *not* merged: no node is ever freed
/// behind a caller's back.
///
/// # Safety
///
/// Both pointers must be live, and `child` must not be `parent` or one of its
/// ancestors.
pub unsafe fn add_child(parent: XmlNodePtr, child: XmlNodePtr) -> XmlNodePtr {
    unsafe {
        detach(child);
        forget_orphan(child);
        if (*child).doc != (*parent).doc {
            set_tree_doc(child, (*parent).doc);
        }
        if (*child).typ == ATTRIBUTE_NODE {
            link_attr(parent, child);
        } else {
            link_last(parent, child);
        }
    }
    child
}

/// Unlinks `node` from the tree; it stays owned by its document.
///
/// # Safety
///
/// `node` must be live.
pub unsafe fn unlink_node(node: XmlNodePtr) {
    unsafe {
        detach(node);
        register_orphan(node);
    }
}

// -------------------------------------------------------------------------
// Document-level accessors
// -------------------------------------------------------------------------

/// Returns the first element child of the document node, or null.
///
/// # Safety
///
/// `doc` must be a live document pointer.
pub unsafe fn doc_get_root_element(doc: XmlDocPtr) -> XmlNodePtr {
    unsafe {
        let mut cur = (*(*doc).node).children;
        while !cur.is_null() {
            if (*cur).typ == ELEMENT_NODE {
                return cur;
            }
            cur = (*cur).next;
        }
    }
    ptr::null_mut()
}

/// Replaces the root element of `doc` with `root` (libxml2's
/// `xmlDocSetRootElement`).
///
/// The new root takes the old root's place among the document node's
/// children (or is appended when there was none). The displaced root is
/// returned; it stays owned by `doc` as a detached subtree.
///
/// # Safety
///
/// `doc` and `root` must be live, and `root` must not be the document node.
pub unsafe fn doc_set_root_element(doc: XmlDocPtr, root: XmlNodePtr) -> XmlNodePtr {
    unsafe {
        let old = doc_get_root_element(doc);
        if old == root {
            return ptr::null_mut();
        }
        detach(root);
        forget_orphan(root);
        if (*root).doc != doc {
            set_tree_doc(root, doc);
        }
        let doc_node = (*doc).node;
        if old.is_null() {
            link_last(doc_node, root);
            return ptr::null_mut();
        }
        // Splice `root` into the slot `old` occupies.
        (*root).parent = doc_node;
        (*root).prev = (*old).prev;
        (*root).next = (*old).next;
        if (*old).prev.is_null() {
            (*doc_node).children = root;
        } else {
            (*(*old).prev).next = root;
        }
        if (*old).next.is_null() {
            (*doc_node).last = root;
        } else {
            (*(*old).next).prev = root;
        }
        (*old).parent = ptr::null_mut();
        (*old).next = ptr::null_mut();
        (*old).prev = ptr::null_mut();
        register_orphan(old);
        old
    }
}

/// Renames `node`.
///
/// # Safety
///
/// `node` must be live.
pub unsafe fn node_set_name(node: XmlNodePtr, name: &str) {
    unsafe { name.clone_into(&mut (*node).name) };
}

/// Replaces the textual content of a leaf node.
///
/// # Safety
///
/// `node` must be live.
pub unsafe fn node_set_content(node: XmlNodePtr, content: &str) {
    unsafe { content.clone_into(&mut (*node).content) };
}

// -------------------------------------------------------------------------
// Attributes
// -------------------------------------------------------------------------

/// Finds the attribute node called `name` on `elem`, or null.
///
/// # Safety
///
/// `elem` must be live.
pub unsafe fn get_prop(elem: XmlNodePtr, name: &str) -> XmlNodePtr {
    unsafe {
        let mut attr = (*elem).properties;
        while !attr.is_null() {
            if (*attr).name == name {
                return attr;
            }
            attr = (*attr).next;
        }
    }
    ptr::null_mut()
}

/// Sets (or creates) the attribute `name` on `elem` and returns it.
///
/// # Safety
///
/// `elem` must be live.
pub unsafe fn set_prop(elem: XmlNodePtr, name: &str, value: &str) -> XmlNodePtr {
    unsafe {
        let existing = get_prop(elem, name);
        if !existing.is_null() {
            value.clone_into(&mut (*existing).content);
            return existing;
        }
        let attr = alloc_node((*elem).doc, ATTRIBUTE_NODE, name, value);
        link_attr(elem, attr);
        attr
    }
}

// -------------------------------------------------------------------------
// Content
// -------------------------------------------------------------------------

/// Returns the XPath string-value of `node` (libxml2's
/// `xmlXPathCastNodeToString`): the concatenated descendant text for
/// elements and documents, the literal content for everything else.
///
/// # Safety
///
/// `node` must be live.
pub unsafe fn node_string_value(node: XmlNodePtr) -> String {
    unsafe {
        match (*node).typ {
            ELEMENT_NODE | DOCUMENT_NODE | HTML_DOCUMENT_NODE => {
                let mut out = String::new();
                collect_text(node, &mut out);
                out
            }
            _ => (*node).content.clone(),
        }
    }
}

/// Appends the text below `node` in document order. Each stack entry is the
/// next sibling still to visit at one level of the descent.
unsafe fn collect_text(node: XmlNodePtr, out: &mut String) {
    let mut pending = vec![unsafe { (*node).children }];
    while let Some(child) = pending.pop() {
        if child.is_null() {
            continue;
        }
        unsafe {
            pending.push((*child).next);
            match (*child).typ {
                TEXT_NODE | CDATA_SECTION_NODE => out.push_str(&(*child).content),
                ELEMENT_NODE => pending.push((*child).children),
                _ => {}
            }
        }
    }
}

// -------------------------------------------------------------------------
// Release
// -------------------------------------------------------------------------

/// Frees every node of the subtree rooted at `node`, attributes included.
unsafe fn free_subtree(node: XmlNodePtr) {
    let mut stack = vec![node];
    while let Some(cur) = stack.pop() {
        unsafe {
            let mut child = (*cur).children;
            while !child.is_null() {
                stack.push(child);
                child = (*child).next;
            }
            let mut attr = (*cur).properties;
            while !attr.is_null() {
                stack.push(attr);
                attr = (*attr).next;
            }
            drop(Box::from_raw(cur));
        }
        track(|c| c.nodes -= 1);
    }
}

/// Releases a document, its whole tree, and every detached node it owns
/// (libxml2's `xmlFreeDoc`). Passing null is a no-op.
///
/// # Safety
///
/// `doc` must be null or a pointer obtained from [`new_doc`] or a parser that
/// has not been freed yet. All node pointers into the document dangle
/// afterwards.
pub unsafe fn free_doc(doc: XmlDocPtr) {
    if doc.is_null() {
        return;
    }
    // SAFETY: caller guarantees `doc` is live and uniquely released here.
    let doc = unsafe { Box::from_raw(doc) };
    unsafe {
        free_subtree(doc.node);
        for &orphan in &doc.orphans {
            free_subtree(orphan);
        }
    }
    track(|c| c.documents -= 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(doc: XmlDocPtr, name: &str) -> XmlNodePtr {
        unsafe { new_node(doc, ELEMENT_NODE, name, "") }
    }

    #[test]
    fn test_new_and_free_doc_balances_counts() {
        let before = live_counts();
        let doc = new_doc(Some("1.0"), false);
        let after_alloc = live_counts();
        assert_eq!(after_alloc.documents, before.documents + 1);
        assert_eq!(after_alloc.nodes, before.nodes + 1);
        unsafe { free_doc(doc) };
        assert_eq!(live_counts(), before);
    }

    #[test]
    fn test_detached_nodes_are_freed_with_doc() {
        let before = live_counts();
        let doc = new_doc(None, false);
        let a = element(doc, "a");
        let b = element(doc, "b");
        unsafe {
            add_child(a, b);
            set_prop(a, "id", "1");
            assert_eq!((*doc).orphans, vec![a]);
            free_doc(doc);
        }
        assert_eq!(live_counts(), before);
    }

    #[test]
    fn test_set_root_element_orphans_old_root() {
        let doc = new_doc(None, false);
        unsafe {
            let first = element(doc, "first");
            assert!(doc_set_root_element(doc, first).is_null());
            assert_eq!(doc_get_root_element(doc), first);
            assert!((*doc).orphans.is_empty());

            let second = element(doc, "second");
            let old = doc_set_root_element(doc, second);
            assert_eq!(old, first);
            assert_eq!(doc_get_root_element(doc), second);
            assert_eq!((*doc).orphans, vec![first]);
            assert!((*first).parent.is_null());
            free_doc(doc);
        }
    }

    #[test]
    fn test_add_child_moves_between_parents() {
        let doc = new_doc(None, false);
        unsafe {
            let root = element(doc, "root");
            doc_set_root_element(doc, root);
            let a = element(doc, "a");
            let b = element(doc, "b");
            let c = element(doc, "c");
            add_child(root, a);
            add_child(root, b);
            add_child(a, c);
            add_child(b, c);
            assert!((*a).children.is_null());
            assert_eq!((*b).children, c);
            assert_eq!((*c).parent, b);
            assert!((*doc).orphans.is_empty());
            free_doc(doc);
        }
    }

    #[test]
    fn test_unlink_node_registers_once() {
        let doc = new_doc(None, false);
        unsafe {
            let root = element(doc, "root");
            doc_set_root_element(doc, root);
            let a = element(doc, "a");
            add_child(root, a);
            unlink_node(a);
            unlink_node(a);
            assert_eq!((*doc).orphans, vec![a]);
            assert!((*root).children.is_null());
            assert!((*root).last.is_null());
            free_doc(doc);
        }
    }

    #[test]
    fn test_set_prop_replaces_value() {
        let doc = new_doc(None, false);
        unsafe {
            let root = element(doc, "root");
            let first = set_prop(root, "href", "a");
            let second = set_prop(root, "href", "b");
            assert_eq!(first, second);
            assert_eq!((*get_prop(root, "href")).content, "b");
            assert!(get_prop(root, "missing").is_null());
            free_doc(doc);
        }
    }

    #[test]
    fn test_string_value_concatenates_descendant_text() {
        let doc = new_doc(None, false);
        unsafe {
            let root = element(doc, "root");
            let inner = element(doc, "b");
            add_child(root, alloc_node(doc, TEXT_NODE, "#text", "Hello "));
            add_child(root, inner);
            add_child(inner, alloc_node(doc, TEXT_NODE, "#text", "world"));
            add_child(root, alloc_node(doc, COMMENT_NODE, "#comment", "skip"));
            assert_eq!(node_string_value(root), "Hello world");
            free_doc(doc);
        }
    }

    #[test]
    fn test_string_value_of_deep_chain() {
        let doc = new_doc(None, false);
        unsafe {
            let mut top = new_node(doc, TEXT_NODE, "#text", "deep");
            for _ in 0..100_000 {
                let parent = element(doc, "d");
                add_child(parent, top);
                top = parent;
            }
            doc_set_root_element(doc, top);
            assert_eq!(node_string_value(top), "deep");
            assert_eq!(node_string_value((*doc).node), "deep");
            free_doc(doc);
        }
    }

    #[test]
    fn test_free_null_doc_is_noop() {
        unsafe { free_doc(ptr::null_mut()) };
    }
}
