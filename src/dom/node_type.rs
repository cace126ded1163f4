//! The node type tag table.
//!
//! Every raw node carries an integer tag using libxml2's `xmlElementType`
//! numbering. [`NodeType`] is the typed view of that tag; the wrapper factory
//! dispatches on it to pick a [`Node`](super::Node) variant.

use std::fmt;

/// The type of a node, as recorded in its raw tag.
///
/// Tags outside the libxml2 table are preserved as [`NodeType::Unknown`]
/// rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// `<name>` element.
    Element,
    /// `name="value"` attribute.
    Attribute,
    /// Character data.
    Text,
    /// `<![CDATA[...]]>` section.
    CDataSection,
    /// Unexpanded entity reference.
    EntityRef,
    /// Entity declaration payload.
    Entity,
    /// `<?target data?>` processing instruction.
    ProcessingInstruction,
    /// `<!-- ... -->` comment.
    Comment,
    /// An XML document node.
    Document,
    /// A document type node.
    DocumentType,
    /// A document fragment.
    DocumentFragment,
    /// A notation declaration.
    Notation,
    /// An HTML document node.
    HtmlDocument,
    /// A DTD node (`<!DOCTYPE ...>` as it appears in the tree).
    Dtd,
    /// An element declaration in a DTD.
    ElementDecl,
    /// An attribute list declaration in a DTD.
    AttributeDecl,
    /// An entity declaration in a DTD.
    EntityDecl,
    /// A namespace declaration.
    NamespaceDecl,
    /// XInclude start marker.
    XIncludeStart,
    /// XInclude end marker.
    XIncludeEnd,
    /// A DocBook SGML document node.
    DocbDocument,
    /// A tag outside the known table.
    Unknown(i32),
}

const NAMES: [&str; 21] = [
    "ElementNode",
    "AttributeNode",
    "TextNode",
    "CDataSectionNode",
    "EntityRefNode",
    "EntityNode",
    "PiNode",
    "CommentNode",
    "DocumentNode",
    "DocumentTypeNode",
    "DocumentFragNode",
    "NotationNode",
    "HTMLDocumentNode",
    "DTDNode",
    "ElementDecl",
    "AttributeDecl",
    "EntityDecl",
    "NamespaceDecl",
    "XIncludeStart",
    "XIncludeEnd",
    "DocbDocumentNode",
];

impl NodeType {
    /// Decodes a raw tag.
    #[must_use]
    pub const fn from_tag(tag: i32) -> Self {
        match tag {
            1 => Self::Element,
            2 => Self::Attribute,
            3 => Self::Text,
            4 => Self::CDataSection,
            5 => Self::EntityRef,
            6 => Self::Entity,
            7 => Self::ProcessingInstruction,
            8 => Self::Comment,
            9 => Self::Document,
            10 => Self::DocumentType,
            11 => Self::DocumentFragment,
            12 => Self::Notation,
            13 => Self::HtmlDocument,
            14 => Self::Dtd,
            15 => Self::ElementDecl,
            16 => Self::AttributeDecl,
            17 => Self::EntityDecl,
            18 => Self::NamespaceDecl,
            19 => Self::XIncludeStart,
            20 => Self::XIncludeEnd,
            21 => Self::DocbDocument,
            other => Self::Unknown(other),
        }
    }

    /// Encodes this type back into its raw tag.
    #[must_use]
    pub const fn tag(self) -> i32 {
        match self {
            Self::Element => 1,
            Self::Attribute => 2,
            Self::Text => 3,
            Self::CDataSection => 4,
            Self::EntityRef => 5,
            Self::Entity => 6,
            Self::ProcessingInstruction => 7,
            Self::Comment => 8,
            Self::Document => 9,
            Self::DocumentType => 10,
            Self::DocumentFragment => 11,
            Self::Notation => 12,
            Self::HtmlDocument => 13,
            Self::Dtd => 14,
            Self::ElementDecl => 15,
            Self::AttributeDecl => 16,
            Self::EntityDecl => 17,
            Self::NamespaceDecl => 18,
            Self::XIncludeStart => 19,
            Self::XIncludeEnd => 20,
            Self::DocbDocument => 21,
            Self::Unknown(tag) => tag,
        }
    }

    /// Returns `true` for the three document-node tags.
    #[must_use]
    pub const fn is_document(self) -> bool {
        matches!(self, Self::Document | Self::HtmlDocument | Self::DocbDocument)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Unknown(tag) => write!(f, "XmlNodeType({tag})"),
            known => {
                #[allow(clippy::cast_sign_loss)]
                let index = (known.tag() - 1) as usize;
                f.write_str(NAMES[index])
            }
        }
    }
}
