//! # domoxide
//!
//! Typed DOM and XPath views over a manually managed XML/HTML tree.
//!
//! The crate has two halves. [`native`] is a libxml2-shaped engine: parsers
//! that build a tree of raw heap nodes, a serializer, an XPath 1.0 engine,
//! and an explicit `free_doc`. [`dom`] and [`xpath`] are the safe layer on
//! top: a [`Document`] owns one native tree and hands out borrowed node
//! views that cannot outlive it.
//!
//! ## Quick Start
//!
//! ```
//! use domoxide::Document;
//!
//! let html = r#"<html><head></head><body><a href="https://www.google.com"></a></body></html>"#;
//! let mut doc = Document::parse_html(html).unwrap();
//! let links = doc.find_nodes("//a").unwrap();
//! assert_eq!(links.len(), 1);
//! let link = links[0].as_element().unwrap();
//! assert_eq!(link.attribute_value("href").as_deref(), Some("https://www.google.com"));
//! drop(links);
//! doc.free();
//! ```
//!
//! ## Releasing documents
//!
//! [`Document::free`] releases the native tree and is safe to call more
//! than once. A document dropped while still live is released by `Drop`;
//! see [`Lifetime`] for how that path is treated.

pub mod dom;
pub mod error;
pub mod native;
pub mod xpath;

// Re-export primary types at the crate root for convenience.
pub use dom::{
    walk, Attribute, CDataSection, Comment, Document, DocumentNode, DocumentPool, DocumentState,
    Element, Lifetime, Node, NodeRef, NodeType, PoolConfig, ProcessingInstruction, Text,
};
pub use error::{Error, ParseError, Result, SourceLocation};
pub use native::html::HtmlParseOptions;
pub use native::parser::ParseOptions;
pub use xpath::{XPathEvaluator, XPathResult};
