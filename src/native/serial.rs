//! Markup serializer for native trees.
//!
//! [`node_dump`] and [`doc_dump`] follow libxml2's `xmlNodeDump` and
//! `xmlDocDumpFormatMemory`: with `format` on, element-only content is
//! broken onto separate lines, and indented when the process-wide
//! [`indent_tree_output`] flag is set (the `xmlIndentTreeOutput` global).
//! Any element holding a text child is written verbatim, so formatting never
//! alters text content.
//!
//! HTML documents are written with HTML rules: no XML declaration, void
//! elements without an end tag, and raw `script`/`style` content.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::html::is_void_element;
use super::{
    encoding, XmlDocPtr, XmlNodePtr, ATTRIBUTE_NODE, CDATA_SECTION_NODE, COMMENT_NODE,
    DOCUMENT_NODE, DTD_NODE, ELEMENT_NODE, ENTITY_REF_NODE, HTML_DOCUMENT_NODE, PI_NODE,
    TEXT_NODE,
};

/// Indentation unit used when the indent flag is set.
const INDENT: &str = "  ";

static INDENT_TREE_OUTPUT: AtomicBool = AtomicBool::new(true);

/// Serializes every toggle-dump-restore sequence on the indent flag.
pub(crate) static INDENT_LOCK: Mutex<()> = Mutex::new(());

/// Returns the process-wide indent flag.
#[must_use]
pub fn indent_tree_output() -> bool {
    INDENT_TREE_OUTPUT.load(Ordering::SeqCst)
}

/// Sets the process-wide indent flag and returns its previous value.
pub fn set_indent_tree_output(on: bool) -> bool {
    INDENT_TREE_OUTPUT.swap(on, Ordering::SeqCst)
}

/// Work left on the serializer's explicit stack.
enum Pending {
    Visit {
        node: XmlNodePtr,
        level: usize,
        pretty: bool,
    },
    Close {
        node: XmlNodePtr,
        level: usize,
        pretty: bool,
        inner: bool,
    },
}

struct Dumper {
    out: String,
    format: bool,
    indent: bool,
    html: bool,
    /// Write non-ASCII characters as character references.
    reencode: bool,
}

/// Serializes `node` and its subtree.
///
/// `encoding` names the target encoding; when it is not UTF-8, characters
/// outside ASCII are written as character references. A document node is
/// dumped with [`doc_dump`] semantics.
///
/// # Safety
///
/// `node` must be live.
pub unsafe fn node_dump(node: XmlNodePtr, format: bool, encoding: Option<&str>) -> String {
    unsafe {
        if matches!((*node).typ, DOCUMENT_NODE | HTML_DOCUMENT_NODE) {
            return dump_document((*node).doc, format, encoding);
        }
        let doc = (*node).doc;
        let mut dumper = Dumper::new(format, !doc.is_null() && (*doc).is_html(), encoding);
        dumper.node(node, 0, false);
        dumper.out
    }
}

/// Serializes a whole document, declaration included for XML.
///
/// With `use_doc_encoding`, the declaration names the document's encoding
/// and the text is made representable in it.
///
/// # Safety
///
/// `doc` must be live.
pub unsafe fn doc_dump(doc: XmlDocPtr, format: bool, use_doc_encoding: bool) -> String {
    unsafe {
        let encoding = if use_doc_encoding {
            (*doc).encoding.as_deref()
        } else {
            None
        };
        dump_document(doc, format, encoding)
    }
}

/// Serializes a whole document and encodes it into its declared encoding.
///
/// # Safety
///
/// `doc` must be live.
///
/// # Errors
///
/// Returns a message if the declared encoding is unknown.
pub unsafe fn doc_dump_bytes(doc: XmlDocPtr, format: bool) -> Result<Vec<u8>, String> {
    unsafe {
        let text = doc_dump(doc, format, true);
        match (*doc).encoding.as_deref() {
            Some(label) if !encoding::is_utf8_label(Some(label)) => {
                encoding::encode_from_utf8(&text, label)
            }
            _ => Ok(text.into_bytes()),
        }
    }
}

unsafe fn dump_document(doc: XmlDocPtr, format: bool, encoding: Option<&str>) -> String {
    unsafe {
        let html = (*doc).is_html();
        let mut dumper = Dumper::new(format, html, encoding);
        if !html {
            let version = (*doc).version.as_deref().unwrap_or("1.0");
            let _ = write!(dumper.out, "<?xml version=\"{version}\"");
            if let Some(enc) = encoding {
                let _ = write!(dumper.out, " encoding=\"{enc}\"");
            }
            if let Some(standalone) = (*doc).standalone {
                let _ = write!(
                    dumper.out,
                    " standalone=\"{}\"",
                    if standalone { "yes" } else { "no" }
                );
            }
            dumper.out.push_str("?>\n");
        }
        let mut child = (*(*doc).node).children;
        while !child.is_null() {
            dumper.node(child, 0, false);
            dumper.out.push('\n');
            child = (*child).next;
        }
        dumper.out
    }
}

/// Returns `true` if `node` has element children and no text children,
/// the only case where formatting may insert whitespace.
unsafe fn is_element_only(node: XmlNodePtr) -> bool {
    let mut has_element = false;
    let mut child = unsafe { (*node).children };
    while !child.is_null() {
        match unsafe { (*child).typ } {
            TEXT_NODE | CDATA_SECTION_NODE | ENTITY_REF_NODE => return false,
            ELEMENT_NODE => has_element = true,
            _ => {}
        }
        child = unsafe { (*child).next };
    }
    has_element
}

impl Dumper {
    fn new(format: bool, html: bool, encoding: Option<&str>) -> Self {
        Self {
            out: String::new(),
            format,
            indent: indent_tree_output(),
            html,
            reencode: !encoding::is_utf8_label(encoding),
        }
    }

    fn pad(&mut self, level: usize) {
        if self.indent {
            for _ in 0..level {
                self.out.push_str(INDENT);
            }
        }
    }

    /// Writes `root` and its subtree. `pretty` is set when the parent is
    /// element-only and formatting is on, so the node sits on its own line.
    unsafe fn node(&mut self, root: XmlNodePtr, level: usize, pretty: bool) {
        let mut pending = vec![Pending::Visit {
            node: root,
            level,
            pretty,
        }];
        while let Some(next) = pending.pop() {
            match next {
                Pending::Visit {
                    node,
                    level,
                    pretty,
                } => unsafe {
                    if pretty {
                        self.pad(level);
                    }
                    if (*node).typ == ELEMENT_NODE {
                        if let Some(inner) = self.open_element(node) {
                            pending.push(Pending::Close {
                                node,
                                level,
                                pretty,
                                inner,
                            });
                            let mut children = Vec::new();
                            let mut child = (*node).children;
                            while !child.is_null() {
                                children.push(child);
                                child = (*child).next;
                            }
                            pending.extend(children.into_iter().rev().map(|child| {
                                Pending::Visit {
                                    node: child,
                                    level: level + 1,
                                    pretty: inner,
                                }
                            }));
                            continue;
                        }
                    } else {
                        self.leaf(node);
                    }
                    if pretty {
                        self.out.push('\n');
                    }
                },
                Pending::Close {
                    node,
                    level,
                    pretty,
                    inner,
                } => {
                    if inner {
                        self.pad(level);
                    }
                    // SAFETY: `node` is an element of the live subtree.
                    let _ = write!(self.out, "</{}>", unsafe { &(*node).name });
                    if pretty {
                        self.out.push('\n');
                    }
                }
            }
        }
    }

    /// Writes everything but elements.
    unsafe fn leaf(&mut self, node: XmlNodePtr) {
        unsafe {
            let n = &*node;
            match n.typ {
                ATTRIBUTE_NODE => {
                    self.out.push_str(&n.name);
                    self.out.push_str("=\"");
                    self.attr_value(&n.content);
                    self.out.push('"');
                }
                TEXT_NODE => {
                    let raw = self.html
                        && !n.parent.is_null()
                        && matches!((*n.parent).name.as_str(), "script" | "style");
                    if raw {
                        self.out.push_str(&n.content);
                    } else {
                        self.text(&n.content);
                    }
                }
                CDATA_SECTION_NODE => {
                    let _ = write!(self.out, "<![CDATA[{}]]>", n.content);
                }
                COMMENT_NODE => {
                    let _ = write!(self.out, "<!--{}-->", n.content);
                }
                PI_NODE => {
                    self.out.push_str("<?");
                    self.out.push_str(&n.name);
                    if !n.content.is_empty() {
                        self.out.push(' ');
                        self.out.push_str(&n.content);
                    }
                    self.out.push_str(if self.html { ">" } else { "?>" });
                }
                ENTITY_REF_NODE => {
                    let _ = write!(self.out, "&{};", n.name);
                }
                DTD_NODE => {
                    let _ = write!(self.out, "<!DOCTYPE {}>", n.content);
                }
                // Anything else has no markup of its own.
                _ => {}
            }
        }
    }

    /// Writes the start tag of `node`. An empty element is closed on the
    /// spot and `None` is returned; otherwise the result says whether the
    /// children go on lines of their own.
    unsafe fn open_element(&mut self, node: XmlNodePtr) -> Option<bool> {
        unsafe {
            let n = &*node;
            self.out.push('<');
            self.out.push_str(&n.name);
            let mut attr = n.properties;
            while !attr.is_null() {
                self.out.push(' ');
                self.out.push_str(&(*attr).name);
                self.out.push_str("=\"");
                self.attr_value(&(*attr).content);
                self.out.push('"');
                attr = (*attr).next;
            }

            if n.children.is_null() {
                if !self.html {
                    self.out.push_str("/>");
                } else if is_void_element(&n.name) {
                    self.out.push('>');
                } else {
                    let _ = write!(self.out, "></{}>", n.name);
                }
                return None;
            }

            self.out.push('>');
            let inner = self.format && is_element_only(node);
            if inner {
                self.out.push('\n');
            }
            Some(inner)
        }
    }

    fn char_ref(&mut self, ch: char) {
        let _ = write!(self.out, "&#x{:X};", ch as u32);
    }

    fn text(&mut self, text: &str) {
        for ch in text.chars() {
            match ch {
                '&' => self.out.push_str("&amp;"),
                '<' => self.out.push_str("&lt;"),
                '>' => self.out.push_str("&gt;"),
                '\r' => self.out.push_str("&#13;"),
                '\t' | '\n' => self.out.push(ch),
                c if (c as u32) < 0x20 => self.char_ref(c),
                c if self.reencode && !c.is_ascii() => self.char_ref(c),
                c => self.out.push(c),
            }
        }
    }

    fn attr_value(&mut self, value: &str) {
        for ch in value.chars() {
            match ch {
                '&' => self.out.push_str("&amp;"),
                '<' => self.out.push_str("&lt;"),
                '>' => self.out.push_str("&gt;"),
                '"' => self.out.push_str("&quot;"),
                '\t' => self.out.push_str("&#9;"),
                '\n' => self.out.push_str("&#10;"),
                '\r' => self.out.push_str("&#13;"),
                c if (c as u32) < 0x20 => self.char_ref(c),
                c if self.reencode && !c.is_ascii() => self.char_ref(c),
                c => self.out.push(c),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::html::parse_html;
    use super::super::parser::parse_str;
    use super::super::{
        add_child, doc_get_root_element, doc_set_root_element, free_doc, new_doc, new_node,
    };
    use super::*;

    fn dump(input: &str, format: bool) -> String {
        let doc = parse_str(input).unwrap();
        let out = unsafe { doc_dump(doc, format, true) };
        unsafe { free_doc(doc) };
        out
    }

    #[test]
    fn test_compact_document() {
        assert_eq!(
            dump("<root><a x=\"1\">t</a><b/></root>", false),
            "<?xml version=\"1.0\"?>\n<root><a x=\"1\">t</a><b/></root>\n"
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(
            dump("<r a=\"&lt;&quot;&amp;\">&lt;&amp;&gt;</r>", false),
            "<?xml version=\"1.0\"?>\n<r a=\"&lt;&quot;&amp;\">&lt;&amp;&gt;</r>\n"
        );
    }

    #[test]
    fn test_misc_nodes() {
        assert_eq!(
            dump("<!DOCTYPE r><r><![CDATA[<x>]]><!--c--><?pi d?></r>", false),
            "<?xml version=\"1.0\"?>\n<!DOCTYPE r>\n<r><![CDATA[<x>]]><!--c--><?pi d?></r>\n"
        );
    }

    #[test]
    fn test_declared_encoding_reencodes_non_ascii() {
        let input = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r>é</r>";
        assert_eq!(
            dump(input, false),
            "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<r>&#xE9;</r>\n"
        );
        let doc = parse_str(input).unwrap();
        unsafe {
            assert_eq!(doc_dump(doc, false, false), "<?xml version=\"1.0\"?>\n<r>é</r>\n");
            let bytes = doc_dump_bytes(doc, false).unwrap();
            assert!(bytes.ends_with(b"<r>&#xE9;</r>\n"));
            free_doc(doc);
        }
    }

    #[test]
    fn test_format_only_touches_element_only_content() {
        let doc = parse_str("<r><a><b/></a><c>text <d/></c></r>").unwrap();
        let _lock = INDENT_LOCK.lock();
        let previous = set_indent_tree_output(true);
        let out = unsafe { node_dump(doc_get_root_element(doc), true, None) };
        set_indent_tree_output(previous);
        assert_eq!(out, "<r>\n  <a>\n    <b/>\n  </a>\n  <c>text <d/></c>\n</r>");
        unsafe { free_doc(doc) };
    }

    #[test]
    fn test_deep_nesting_dumps_without_recursion() {
        let depth = 100_000;
        let doc = new_doc(None, false);
        unsafe {
            let mut top = new_node(doc, TEXT_NODE, "#text", "x");
            for _ in 0..depth {
                let parent = new_node(doc, ELEMENT_NODE, "d", "");
                add_child(parent, top);
                top = parent;
            }
            doc_set_root_element(doc, top);
            let expected = format!("{}x{}", "<d>".repeat(depth), "</d>".repeat(depth));
            assert_eq!(node_dump(top, true, None), expected);
            free_doc(doc);
        }
    }

    #[test]
    fn test_html_rules() {
        let doc = parse_html(
            "<html><body><p>a<br>b</p><script>x && y</script><div></div></body></html>",
        )
        .unwrap();
        let out = unsafe { doc_dump(doc, false, false) };
        assert_eq!(
            out,
            "<html><body><p>a<br>b</p><script>x && y</script><div></div></body></html>\n"
        );
        unsafe { free_doc(doc) };
    }
}
