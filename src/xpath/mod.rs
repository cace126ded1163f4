//! XPath queries over DOM views.
//!
//! [`XPathEvaluator`] runs an expression through the native engine and maps
//! the resulting raw node pointers back into [`Node`] views with an injected
//! wrapper function. Each call allocates its own engine context and result
//! object and releases both before returning, whether evaluation succeeded
//! or not.
//!
//! ```
//! use domoxide::Document;
//! use domoxide::xpath::XPathResult;
//!
//! let doc = Document::parse("<r><a/><a/></r>").unwrap();
//! assert!(matches!(doc.find("count(a)").unwrap(), XPathResult::Number(n) if n == 2.0));
//! let mut iter = doc.find("a").unwrap().node_iter();
//! assert_eq!(iter.len(), 2);
//! assert!(iter.next().is_some());
//! ```

#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;

use tracing::trace;

use crate::dom::{wrap_node, Node, NodeRef, WrapFn};
use crate::error::{Error, Result};
use crate::native::xpath::{self as engine, format_number, XPathContext, XPathObject};

/// Evaluates XPath expressions against a context node.
#[derive(Clone, Copy)]
pub struct XPathEvaluator {
    wrap: WrapFn,
}

impl Default for XPathEvaluator {
    fn default() -> Self {
        Self::new(wrap_node)
    }
}

impl fmt::Debug for XPathEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XPathEvaluator").finish_non_exhaustive()
    }
}

/// Frees the engine context on every exit path.
struct ContextGuard(*mut XPathContext);

impl Drop for ContextGuard {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `new_context` and is released only here.
        unsafe { engine::free_context(self.0) };
    }
}

/// Frees the engine result object on every exit path.
struct ObjectGuard(*mut XPathObject);

impl Drop for ObjectGuard {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `eval_expression` and is released only here.
        unsafe { engine::free_object(self.0) };
    }
}

impl XPathEvaluator {
    /// Creates an evaluator that builds result views with `wrap`.
    #[must_use]
    pub const fn new(wrap: WrapFn) -> Self {
        Self { wrap }
    }

    /// Evaluates `expr` with `context` as the context node.
    ///
    /// Node sets come back in document order, one fresh view per node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty or malformed
    /// expression, [`Error::Eval`] when evaluation fails, and
    /// [`Error::UseAfterFree`] if the owning document has been freed.
    pub fn evaluate<'d>(&self, context: NodeRef<'d>, expr: &str) -> Result<XPathResult<'d>> {
        if expr.trim().is_empty() {
            return Err(Error::InvalidArgument("empty xpath expression".into()));
        }
        let doc = context.owner_document();
        let raw_doc = doc.native()?;
        trace!(expr, "evaluating xpath");

        let ctx = ContextGuard(engine::new_context(raw_doc.as_ptr()));
        // SAFETY: the context is live and the context node belongs to its document.
        let obj = unsafe { engine::eval_expression(ctx.0, context.as_ptr(), expr) }.map_err(
            |err| {
                if err.is_syntax() {
                    Error::InvalidArgument(err.to_string())
                } else {
                    Error::Eval(err.to_string())
                }
            },
        )?;
        let obj = ObjectGuard(obj);

        // SAFETY: the object stays live until `obj` drops at the end of this scope.
        let result = match unsafe { &*obj.0 } {
            XPathObject::NodeSet(raw) => XPathResult::NodeSet(
                raw.iter()
                    .filter_map(|&p| NonNull::new(p))
                    // SAFETY: every node in the set is a live node of `doc`.
                    .map(|p| unsafe { (self.wrap)(doc, p) })
                    .collect(),
            ),
            XPathObject::Boolean(b) => XPathResult::Boolean(*b),
            XPathObject::Number(n) => XPathResult::Number(*n),
            XPathObject::String(s) => XPathResult::String(s.clone()),
        };
        trace!(expr, result = %result, "xpath evaluated");
        Ok(result)
    }

    /// Evaluates `expr` and returns the matched nodes.
    ///
    /// An expression that matches nothing yields an empty vector.
    ///
    /// # Errors
    ///
    /// As [`evaluate`](Self::evaluate), plus [`Error::Eval`] when the
    /// expression does not produce a node set.
    pub fn find_nodes<'d>(&self, context: NodeRef<'d>, expr: &str) -> Result<Vec<Node<'d>>> {
        self.evaluate(context, expr)?.into_nodes()
    }
}

/// The value of an XPath expression.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathResult<'d> {
    /// Matched nodes in document order.
    NodeSet(Vec<Node<'d>>),
    /// A boolean.
    Boolean(bool),
    /// A number.
    Number(f64),
    /// A string.
    String(String),
}

impl<'d> XPathResult<'d> {
    /// Returns `true` for node sets.
    #[must_use]
    pub const fn is_node_set(&self) -> bool {
        matches!(self, Self::NodeSet(_))
    }

    /// Takes the node set out of the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Eval`] if the result is not a node set.
    pub fn into_nodes(self) -> Result<Vec<Node<'d>>> {
        match self {
            Self::NodeSet(nodes) => Ok(nodes),
            other => Err(Error::Eval(format!(
                "expression yields {other}, not a node set"
            ))),
        }
    }

    /// Iterates over the node set. Results of other types yield nothing.
    #[must_use]
    pub fn node_iter(self) -> NodeIter<'d> {
        let nodes = match self {
            Self::NodeSet(nodes) => nodes,
            _ => Vec::new(),
        };
        NodeIter {
            inner: nodes.into_iter(),
        }
    }
}

impl fmt::Display for XPathResult<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeSet(nodes) => write!(f, "node-set({})", nodes.len()),
            Self::Boolean(b) => write!(f, "boolean {b}"),
            Self::Number(n) => write!(f, "number {}", format_number(*n)),
            Self::String(s) => write!(f, "string {s:?}"),
        }
    }
}

/// Iterator over the nodes of an [`XPathResult`].
#[derive(Debug)]
pub struct NodeIter<'d> {
    inner: std::vec::IntoIter<Node<'d>>,
}

impl<'d> Iterator for NodeIter<'d> {
    type Item = Node<'d>;

    fn next(&mut self) -> Option<Node<'d>> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for NodeIter<'_> {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dom::{Document, Element};
    use crate::native::live_counts;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_typed_results() {
        let doc = Document::parse("<r><a>x</a><a>y</a></r>").unwrap();
        assert_eq!(doc.find("count(a)").unwrap(), XPathResult::Number(2.0));
        assert_eq!(doc.find("a = 'y'").unwrap(), XPathResult::Boolean(true));
        assert_eq!(doc.find("string(a[2])").unwrap(), XPathResult::String("y".into()));
        assert!(doc.find("a").unwrap().is_node_set());
    }

    #[test]
    fn test_non_node_set_rejected_by_find_nodes() {
        let doc = Document::parse("<r/>").unwrap();
        assert!(matches!(doc.find_nodes("1 + 1"), Err(Error::Eval(_))));
    }

    #[test]
    fn test_error_mapping() {
        let doc = Document::parse("<r/>").unwrap();
        assert!(matches!(doc.find_nodes("//["), Err(Error::InvalidArgument(_))));
        assert!(matches!(doc.find_nodes("   "), Err(Error::InvalidArgument(_))));
        assert!(matches!(doc.find_nodes("nope()"), Err(Error::Eval(_))));
        assert!(matches!(doc.find_nodes("$v"), Err(Error::Eval(_))));
    }

    #[test]
    fn test_engine_objects_released_on_every_path() {
        let doc = Document::parse("<r><a/></r>").unwrap();
        let before = live_counts();
        let _ = doc.find_nodes("//a").unwrap();
        let _ = doc.find_nodes("//[");
        let _ = doc.find_nodes("count(//a)");
        let after = live_counts();
        assert_eq!(after.xpath_contexts, before.xpath_contexts);
        assert_eq!(after.xpath_objects, before.xpath_objects);
    }

    #[test]
    fn test_node_iter() {
        let doc = Document::parse("<r><a/><b/></r>").unwrap();
        let names: Vec<String> = doc.find("*").unwrap().node_iter().map(|n| n.node_name()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(doc.find("true()").unwrap().node_iter().len(), 0);
    }

    unsafe fn elements_only<'d>(doc: &'d Document, ptr: NonNull<crate::native::XmlNode>) -> Node<'d> {
        match unsafe { wrap_node(doc, ptr) } {
            Node::Element(e) => Node::Element(e),
            other => Node::Other(*other.as_node_ref()),
        }
    }

    #[test]
    fn test_injected_wrapper() {
        let mut doc = Document::parse("<r>t<a/></r>").unwrap();
        doc.set_evaluator(XPathEvaluator::new(elements_only));
        let nodes = doc.find_nodes("node()").unwrap();
        assert!(matches!(nodes[0], Node::Other(_)));
        assert!(Element::try_from(nodes[1]).is_ok());
    }
}
