//! Lifetime modes, the drop-time release policy, and shell pooling.
//!
//! A [`Document`] is either *explicit*, where the owner is expected to call
//! [`Document::free`], or *mortal*, where dropping it is the intended way to
//! release the tree. Either way `Drop` frees a tree that is still live, at
//! most once; for explicit documents that release is logged as a leak that
//! was caught late.
//!
//! [`DocumentPool`] keeps freed document shells around and reissues them
//! for new parses. A shell is reset before it goes back into the pool, so a
//! reissued document never carries state from its previous tree.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace, warn};

use super::document::Document;
use crate::error::Result;
use crate::native::html::{self, HtmlParseOptions};
use crate::native::parser::{self, ParseOptions};

/// How a document expects to be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Dropping the document releases it.
    Mortal,
    /// The owner calls [`Document::free`]; dropping a live document still
    /// releases it, with a warning.
    #[default]
    Explicit,
}

/// Where a document is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Live, released on drop.
    Mortal,
    /// Live, released by the owner.
    Explicit,
    /// The tree has been released. Terminal unless the shell is pooled.
    Freed,
}

impl Document {
    /// Marks the document as released by drop.
    pub fn make_mortal(&self) {
        self.lifetime.set(Lifetime::Mortal);
    }

    /// Marks the document as released by an explicit [`free`](Self::free).
    pub fn make_explicit(&self) {
        self.lifetime.set(Lifetime::Explicit);
    }

    /// Returns `true` for mortal documents.
    #[must_use]
    pub fn is_mortal(&self) -> bool {
        self.lifetime.get() == Lifetime::Mortal
    }

    /// The current lifetime mode.
    #[must_use]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime.get()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DocumentState {
        if self.is_freed() {
            return DocumentState::Freed;
        }
        match self.lifetime.get() {
            Lifetime::Mortal => DocumentState::Mortal,
            Lifetime::Explicit => DocumentState::Explicit,
        }
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        if self.is_freed() {
            return;
        }
        match self.lifetime.get() {
            Lifetime::Mortal => trace!("releasing mortal document on drop"),
            Lifetime::Explicit => warn!("explicit document dropped without free; releasing it"),
        }
        self.release();
    }
}

/// Default number of shells a pool retains.
const DEFAULT_CAPACITY: usize = 16;

/// Options for a [`DocumentPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle shells kept for reuse.
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Sets the maximum number of idle shells.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// A recycling pool of freed document shells.
///
/// ```
/// use domoxide::DocumentPool;
///
/// let pool = DocumentPool::default();
/// let doc = pool.parse("<a/>").unwrap();
/// pool.recycle(doc);
/// assert_eq!(pool.len(), 1);
/// let again = pool.parse("<b/>").unwrap();
/// assert_eq!(again.document_element().unwrap().unwrap().node_name(), "b");
/// assert!(pool.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct DocumentPool {
    config: PoolConfig,
    shells: Mutex<Vec<Document>>,
}

impl DocumentPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            shells: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Document {
        let reused = self
            .shells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match reused {
            Some(shell) => {
                debug!("reusing pooled document shell");
                shell
            }
            None => Document::shell(),
        }
    }

    /// Frees `doc` and keeps its shell for a later parse.
    ///
    /// The shell is dropped instead when the pool is full.
    pub fn recycle(&self, mut doc: Document) {
        doc.free();
        doc.reset();
        let mut shells = self.shells.lock().unwrap_or_else(PoisonError::into_inner);
        if shells.len() < self.config.capacity {
            shells.push(doc);
            debug!(pooled = shells.len(), "recycled document shell");
        }
    }

    /// Parses XML into a pooled shell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`](crate::Error::Parse) if the markup is not
    /// well-formed.
    pub fn parse(&self, markup: &str) -> Result<Document> {
        self.parse_with_options(markup, &ParseOptions::default())
    }

    /// Parses XML into a pooled shell with explicit parser options.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn parse_with_options(&self, markup: &str, options: &ParseOptions) -> Result<Document> {
        let raw = parser::parse_str_with_options(markup, options)?;
        let doc = self.take();
        doc.install(raw);
        Ok(doc)
    }

    /// Parses HTML into a pooled shell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`](crate::Error::Parse) only for input the
    /// HTML parser cannot recover from.
    pub fn parse_html(&self, markup: &str) -> Result<Document> {
        let raw = html::parse_html_with_options(markup, &HtmlParseOptions::default())?;
        let doc = self.take();
        doc.install(raw);
        Ok(doc)
    }

    /// Number of idle shells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shells.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no shell is idle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::native::live_counts;
    use crate::xpath::XPathEvaluator;

    #[test]
    fn test_state_transitions() {
        let mut doc = Document::parse("<r/>").unwrap();
        assert_eq!(doc.lifetime(), Lifetime::Explicit);
        assert_eq!(doc.state(), DocumentState::Explicit);
        doc.make_mortal();
        assert!(doc.is_mortal());
        assert_eq!(doc.state(), DocumentState::Mortal);
        doc.make_explicit();
        assert!(!doc.is_mortal());
        doc.free();
        assert_eq!(doc.state(), DocumentState::Freed);
    }

    #[test]
    fn test_drop_releases_live_tree_once() {
        let before = live_counts();
        {
            let doc = Document::parse("<r><a/></r>").unwrap();
            doc.make_mortal();
        }
        {
            let _explicit = Document::parse("<r><a/></r>").unwrap();
        }
        {
            let mut freed = Document::parse("<r/>").unwrap();
            freed.free();
        }
        assert_eq!(live_counts(), before);
    }

    #[test]
    fn test_recycled_shell_is_reset() {
        let pool = DocumentPool::new(PoolConfig::default().capacity(1));
        let mut doc = pool.parse("<old/>").unwrap();
        doc.make_mortal();
        doc.set_evaluator(XPathEvaluator::default());
        pool.recycle(doc);
        assert_eq!(pool.len(), 1);

        let doc = pool.parse("<new/>").unwrap();
        assert!(pool.is_empty());
        assert_eq!(doc.lifetime(), Lifetime::Explicit);
        assert_eq!(doc.document_element().unwrap().unwrap().node_name(), "new");
        assert_eq!(doc.find_nodes("//old").unwrap().len(), 0);
    }

    #[test]
    fn test_pool_respects_capacity() {
        let pool = DocumentPool::new(PoolConfig::default().capacity(1));
        let a = pool.parse("<a/>").unwrap();
        let b = pool.parse("<b/>").unwrap();
        pool.recycle(a);
        pool.recycle(b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_failed_parse_does_not_consume_shell() {
        let pool = DocumentPool::default();
        pool.recycle(Document::parse("<a/>").unwrap());
        assert!(pool.parse("<unclosed>").is_err());
        assert_eq!(pool.len(), 1);
        let html = pool.parse_html("<p>hi").unwrap();
        assert!(html.find_nodes("//p").unwrap().len() == 1);
    }
}
