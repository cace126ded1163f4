//! The safe DOM layer over the native tree.
//!
//! [`Document`] owns a native tree. Everything reachable from it is handed
//! out as a borrowed view: [`Node`] for a node of any type, or one of the
//! typed variants ([`Element`], [`Text`], ...). All views dereference to
//! [`NodeRef`], which carries the capabilities every node shares
//! (navigation, naming, XPath search, serialization, walking).
//!
//! ```
//! use domoxide::{Document, Node};
//!
//! let doc = Document::parse("<list><item>a</item><item>b</item></list>").unwrap();
//! let items = doc.find_nodes("//item").unwrap();
//! assert_eq!(items.len(), 2);
//! if let Node::Element(item) = items[1] {
//!     assert_eq!(item.text_content(), "b");
//! }
//! ```

mod document;
mod node;
mod node_type;
mod ownership;
mod variants;
mod walk;
mod wrap;

pub use document::Document;
pub use node::NodeRef;
pub use node_type::NodeType;
pub use ownership::{DocumentPool, DocumentState, Lifetime, PoolConfig};
pub use variants::{
    Attribute, CDataSection, Comment, DocumentNode, Element, ProcessingInstruction, Text,
};
pub use walk::walk;
pub use wrap::{wrap_node, Node, WrapFn};
