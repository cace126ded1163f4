//! XPath 1.0 engine over the native tree.
//!
//! The public surface follows libxml2's shape: a heap-allocated evaluation
//! context bound to a document ([`new_context`] / [`free_context`]), an
//! evaluation call that returns a heap-allocated result object
//! ([`eval_expression`]), and an explicit release for that object
//! ([`free_object`]). Every context and object is counted in
//! [`live_counts`](super::live_counts) so callers can prove they release
//! what they evaluate.
//!
//! Node sets in results are in document order without duplicates.

pub mod ast;
mod eval;
pub mod lexer;
pub mod parser;

use std::collections::HashMap;
use std::fmt;

use super::{track, XmlDocPtr, XmlNodePtr};

pub use eval::format_number;

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XPathError {
    /// The expression text is not valid XPath 1.0.
    #[error("invalid expression at offset {position}: {message}")]
    Syntax {
        /// What was wrong.
        message: String,
        /// Byte offset into the expression.
        position: usize,
    },
    /// A `$name` with no binding in the context.
    #[error("undefined variable: ${0}")]
    UndefinedVariable(String),
    /// A call to a function outside the core library.
    #[error("unknown function: {0}()")]
    UnknownFunction(String),
    /// A core function called with the wrong number of arguments.
    #[error("{function}() called with {found} argument(s)")]
    ArgumentCount {
        /// The function name.
        function: String,
        /// How many arguments were passed.
        found: usize,
    },
    /// An operand had the wrong type, e.g. a predicate applied to a string.
    #[error("type error: expected {expected}, found {found}")]
    Type {
        /// The type the operator needed.
        expected: &'static str,
        /// The type it got.
        found: &'static str,
    },
    /// The context node is null or belongs to another document.
    #[error("invalid context node")]
    InvalidContext,
}

impl XPathError {
    /// Returns `true` for errors in the expression text itself, as opposed
    /// to failures while evaluating a well-formed expression.
    #[must_use]
    pub const fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}

/// The result of an evaluation (libxml2's `xmlXPathObject`).
#[derive(Debug, Clone, PartialEq)]
pub enum XPathObject {
    /// Nodes in document order.
    NodeSet(Vec<XmlNodePtr>),
    /// A boolean.
    Boolean(bool),
    /// An IEEE double.
    Number(f64),
    /// A string.
    String(String),
}

impl XPathObject {
    /// The XPath name of this value's type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::NodeSet(_) => "node-set",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for XPathObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeSet(nodes) => write!(f, "node-set({})", nodes.len()),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// An evaluation context bound to one document (libxml2's
/// `xmlXPathContext`).
#[derive(Debug)]
pub struct XPathContext {
    pub(crate) doc: XmlDocPtr,
    pub(crate) variables: HashMap<String, XPathObject>,
}

/// Allocates an evaluation context for `doc`.
///
/// The returned pointer must be released with [`free_context`].
#[must_use]
pub fn new_context(doc: XmlDocPtr) -> *mut XPathContext {
    track(|c| c.xpath_contexts += 1);
    Box::into_raw(Box::new(XPathContext {
        doc,
        variables: HashMap::new(),
    }))
}

/// Releases a context. Passing null is a no-op.
///
/// # Safety
///
/// `ctx` must be null or a live pointer from [`new_context`].
pub unsafe fn free_context(ctx: *mut XPathContext) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: caller guarantees `ctx` came from `new_context` and is released once.
    drop(unsafe { Box::from_raw(ctx) });
    track(|c| c.xpath_contexts -= 1);
}

/// Binds `$name` to `value` for later evaluations in `ctx`.
///
/// # Safety
///
/// `ctx` must be a live pointer from [`new_context`].
pub unsafe fn register_variable(ctx: *mut XPathContext, name: &str, value: XPathObject) {
    // SAFETY: caller guarantees `ctx` is live.
    unsafe { (*ctx).variables.insert(name.to_owned(), value) };
}

/// Compiles and evaluates `expr` with `node` as the context node.
///
/// On success the result is a heap object that must be released with
/// [`free_object`]. Nothing is allocated on failure.
///
/// # Errors
///
/// Returns [`XPathError::Syntax`] for malformed expressions,
/// [`XPathError::InvalidContext`] when `node` is null or belongs to another
/// document, and the remaining variants for evaluation failures.
///
/// # Safety
///
/// `ctx` must be live, and `node` must be null or a live node.
pub unsafe fn eval_expression(
    ctx: *mut XPathContext,
    node: XmlNodePtr,
    expr: &str,
) -> Result<*mut XPathObject, XPathError> {
    let compiled = parser::parse(expr)?;
    // SAFETY: caller guarantees `ctx` is live.
    let ctx = unsafe { &*ctx };
    // SAFETY: a non-null `node` is live per the caller's contract.
    if node.is_null() || unsafe { (*node).doc } != ctx.doc {
        return Err(XPathError::InvalidContext);
    }
    // SAFETY: `node` is a live node of `ctx.doc`.
    let value = unsafe { eval::Evaluator::new(ctx, node).evaluate(&compiled)? };
    track(|c| c.xpath_objects += 1);
    Ok(Box::into_raw(Box::new(value)))
}

/// Releases a result object. Passing null is a no-op.
///
/// # Safety
///
/// `obj` must be null or a live pointer from [`eval_expression`].
pub unsafe fn free_object(obj: *mut XPathObject) {
    if obj.is_null() {
        return;
    }
    // SAFETY: caller guarantees `obj` came from `eval_expression` and is released once.
    drop(unsafe { Box::from_raw(obj) });
    track(|c| c.xpath_objects -= 1);
}
