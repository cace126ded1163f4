//! XML 1.0 parser producing a native tree.
//!
//! A recursive descent parser over [`ParserInput`] that links nodes straight
//! into a freshly allocated [`XmlDoc`](super::XmlDoc). The tree under
//! construction is owned by a [`TreeBuilder`], so a parse error releases
//! everything allocated so far.
//!
//! Supported: the XML declaration, a byte order mark, comments, processing
//! instructions, CDATA sections, a `<!DOCTYPE>` (kept verbatim, not
//! interpreted), the predefined entities, and character references.
//! Namespace prefixes are kept as part of qualified names.

use super::encoding;
use super::input::{parse_xml_decl, ParserInput, DEFAULT_MAX_DEPTH};
use super::{
    alloc_node, free_doc, link_attr, link_last, new_doc, XmlDocPtr, XmlNodePtr, ATTRIBUTE_NODE,
    CDATA_SECTION_NODE, COMMENT_NODE, DTD_NODE, ELEMENT_NODE, PI_NODE, TEXT_NODE,
};
use crate::error::{ParseError, SourceLocation};

/// Options controlling the XML parser.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// If true, drop whitespace-only text nodes.
    pub no_blanks: bool,
    /// Maximum element nesting depth (default: 256).
    pub max_depth: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            no_blanks: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ParseOptions {
    /// Enables or disables stripping of blank text nodes.
    #[must_use]
    pub fn no_blanks(mut self, yes: bool) -> Self {
        self.no_blanks = yes;
        self
    }

    /// Sets the maximum element nesting depth.
    #[must_use]
    pub fn max_depth(mut self, max: u32) -> Self {
        self.max_depth = max;
        self
    }
}

/// Owns a document while a parser is still building it.
///
/// Dropping the builder frees the partial tree; [`finish`](Self::finish)
/// hands the document over instead.
pub(crate) struct TreeBuilder {
    doc: XmlDocPtr,
}

impl TreeBuilder {
    pub fn new(html: bool) -> Self {
        let version = if html { None } else { Some("1.0") };
        Self {
            doc: new_doc(version, html),
        }
    }

    pub fn doc(&self) -> XmlDocPtr {
        self.doc
    }

    /// The document node.
    pub fn root(&self) -> XmlNodePtr {
        // SAFETY: `doc` stays live until `finish` or `drop`.
        unsafe { (*self.doc).node }
    }

    /// Allocates a node and links it as the last child of `parent`.
    pub fn append(&mut self, parent: XmlNodePtr, typ: i32, name: &str, content: &str) -> XmlNodePtr {
        let node = alloc_node(self.doc, typ, name, content);
        // SAFETY: `parent` belongs to this builder's document and `node` is fresh.
        unsafe { link_last(parent, node) };
        node
    }

    /// Allocates an attribute node on `elem`.
    pub fn attribute(&mut self, elem: XmlNodePtr, name: &str, value: &str) -> XmlNodePtr {
        let attr = alloc_node(self.doc, ATTRIBUTE_NODE, name, value);
        // SAFETY: as in `append`.
        unsafe { link_attr(elem, attr) };
        attr
    }

    pub fn finish(mut self) -> XmlDocPtr {
        std::mem::replace(&mut self.doc, std::ptr::null_mut())
    }
}

impl Drop for TreeBuilder {
    fn drop(&mut self) {
        // SAFETY: `doc` is either null (finished) or exclusively ours.
        unsafe { free_doc(self.doc) };
    }
}

/// Parses an XML string with default options.
///
/// # Errors
///
/// Returns [`ParseError`] if the document is not well-formed.
pub fn parse_str(input: &str) -> Result<XmlDocPtr, ParseError> {
    parse_str_with_options(input, &ParseOptions::default())
}

/// Parses an XML string. The returned document must be released with
/// [`free_doc`](super::free_doc).
///
/// # Errors
///
/// Returns [`ParseError`] if the document is not well-formed.
pub fn parse_str_with_options(input: &str, options: &ParseOptions) -> Result<XmlDocPtr, ParseError> {
    let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
    let mut parser = XmlParser::new(input, options);
    parser.parse_document()?;
    Ok(parser.builder.finish())
}

/// Parses raw XML bytes, detecting the encoding from the BOM or the XML
/// declaration.
///
/// # Errors
///
/// Returns [`ParseError`] if the bytes cannot be decoded or the document is
/// not well-formed.
pub fn parse_bytes(bytes: &[u8], options: &ParseOptions) -> Result<XmlDocPtr, ParseError> {
    let (text, label) = encoding::decode_to_utf8(bytes, false)
        .map_err(|msg| ParseError::new(msg, SourceLocation::default()))?;
    let doc = parse_str_with_options(&text, options)?;
    // SAFETY: just parsed, exclusively ours.
    unsafe {
        if (*doc).encoding.is_none() {
            (*doc).encoding = label;
        }
    }
    Ok(doc)
}

struct XmlParser<'a, 'o> {
    input: ParserInput<'a>,
    builder: TreeBuilder,
    options: &'o ParseOptions,
}

impl<'a, 'o> XmlParser<'a, 'o> {
    fn new(text: &'a str, options: &'o ParseOptions) -> Self {
        let mut input = ParserInput::new(text);
        input.set_max_depth(options.max_depth);
        Self {
            input,
            builder: TreeBuilder::new(false),
            options,
        }
    }

    fn parse_document(&mut self) -> Result<(), ParseError> {
        if self.input.looking_at(b"<?xml")
            && matches!(self.input.peek_at(5), Some(b' ' | b'\t' | b'\r' | b'\n'))
        {
            let decl = parse_xml_decl(&mut self.input)?;
            // SAFETY: the builder's document is live.
            unsafe {
                let doc = self.builder.doc();
                (*doc).version = Some(decl.version);
                (*doc).encoding = decl.encoding;
                (*doc).standalone = decl.standalone;
            }
        }

        let top = self.builder.root();
        let mut seen_root = false;
        loop {
            self.input.skip_whitespace();
            if self.input.at_end() {
                break;
            }
            if self.input.looking_at(b"<!--") {
                self.parse_comment(top)?;
            } else if self.input.looking_at(b"<?") {
                self.parse_pi(top)?;
            } else if self.input.looking_at(b"<!DOCTYPE") {
                if seen_root {
                    return Err(self.input.fatal("DOCTYPE after the root element"));
                }
                self.parse_doctype(top)?;
            } else if self.input.peek() == Some(b'<') {
                if seen_root {
                    return Err(self.input.fatal("extra content at the end of the document"));
                }
                self.parse_element(top)?;
                seen_root = true;
            } else {
                return Err(self.input.fatal("content outside the root element"));
            }
        }
        if !seen_root {
            return Err(self.input.fatal("document has no root element"));
        }
        Ok(())
    }

    fn parse_doctype(&mut self, parent: XmlNodePtr) -> Result<(), ParseError> {
        self.input.expect_str(b"<!DOCTYPE")?;
        self.input.skip_whitespace_required()?;
        let name = self.input.parse_name()?;
        let body = scan_doctype_body(&mut self.input)?;
        let content = format!("{name}{body}");
        self.builder.append(parent, DTD_NODE, &name, content.trim_end());
        Ok(())
    }

    fn parse_element(&mut self, parent: XmlNodePtr) -> Result<(), ParseError> {
        self.input.increment_depth()?;
        self.input.expect_byte(b'<')?;
        let name = self.input.parse_name()?;
        let elem = self.builder.append(parent, ELEMENT_NODE, &name, "");

        let mut seen: Vec<String> = Vec::new();
        loop {
            let had_ws = self.input.skip_whitespace();
            if self.input.peek() == Some(b'>') || self.input.looking_at(b"/>") {
                break;
            }
            if !had_ws {
                return Err(self.input.fatal("whitespace required between attributes"));
            }
            let attr_name = self.input.parse_name()?;
            self.input.skip_whitespace();
            self.input.expect_byte(b'=')?;
            self.input.skip_whitespace();
            let value = self.input.parse_attribute_value()?;
            if seen.contains(&attr_name) {
                return Err(self
                    .input
                    .fatal(format!("duplicate attribute: '{attr_name}'")));
            }
            self.builder.attribute(elem, &attr_name, &value);
            seen.push(attr_name);
        }

        if self.input.looking_at(b"/>") {
            self.input.advance(2);
            self.input.decrement_depth();
            return Ok(());
        }
        self.input.expect_byte(b'>')?;
        self.parse_content(elem)?;

        self.input.expect_str(b"</")?;
        let end_name = self.input.parse_name()?;
        if end_name != name {
            return Err(self.input.fatal(format!(
                "mismatched end tag: expected </{name}>, found </{end_name}>"
            )));
        }
        self.input.skip_whitespace();
        self.input.expect_byte(b'>')?;
        self.input.decrement_depth();
        Ok(())
    }

    fn parse_content(&mut self, parent: XmlNodePtr) -> Result<(), ParseError> {
        loop {
            if self.input.at_end() {
                return Err(self.input.fatal("unexpected end of input in element content"));
            }
            if self.input.looking_at(b"</") {
                return Ok(());
            }
            if self.input.looking_at(b"<![CDATA[") {
                self.input.advance(9);
                let (text, closed) = self.input.take_until(b"]]>");
                if !closed {
                    return Err(self.input.fatal("unterminated CDATA section"));
                }
                self.input.advance(3);
                self.builder.append(parent, CDATA_SECTION_NODE, "#cdata-section", &text);
            } else if self.input.looking_at(b"<!--") {
                self.parse_comment(parent)?;
            } else if self.input.looking_at(b"<?") {
                self.parse_pi(parent)?;
            } else if self.input.peek() == Some(b'<') {
                self.parse_element(parent)?;
            } else {
                self.parse_char_data(parent)?;
            }
        }
    }

    fn parse_char_data(&mut self, parent: XmlNodePtr) -> Result<(), ParseError> {
        let mut text = String::new();
        while let Some(b) = self.input.peek() {
            match b {
                b'<' => break,
                b'&' => text.push(self.input.parse_reference()?),
                b']' if self.input.looking_at(b"]]>") => {
                    return Err(self.input.fatal("']]>' not allowed in character data"));
                }
                _ => text.push(self.input.next_char()?),
            }
        }
        if self.options.no_blanks && text.chars().all(char::is_whitespace) {
            return Ok(());
        }
        self.builder.append(parent, TEXT_NODE, "text", &text);
        Ok(())
    }

    fn parse_comment(&mut self, parent: XmlNodePtr) -> Result<(), ParseError> {
        self.input.expect_str(b"<!--")?;
        let (text, closed) = self.input.take_until(b"-->");
        if !closed {
            return Err(self.input.fatal("unterminated comment"));
        }
        if text.contains("--") {
            return Err(self.input.fatal("'--' not allowed inside comments"));
        }
        self.input.advance(3);
        self.builder.append(parent, COMMENT_NODE, "comment", &text);
        Ok(())
    }

    fn parse_pi(&mut self, parent: XmlNodePtr) -> Result<(), ParseError> {
        self.input.expect_str(b"<?")?;
        let target = self.input.parse_name()?;
        if target.eq_ignore_ascii_case("xml") {
            return Err(self.input.fatal("PI target 'xml' is reserved"));
        }
        self.input.skip_whitespace();
        let (data, closed) = self.input.take_until(b"?>");
        if !closed {
            return Err(self.input.fatal("unterminated processing instruction"));
        }
        self.input.advance(2);
        self.builder.append(parent, PI_NODE, &target, &data);
        Ok(())
    }
}

/// Consumes the rest of a `<!DOCTYPE name ...>` declaration, including any
/// internal subset, and returns the text between the name and the closing
/// `>`.
pub(crate) fn scan_doctype_body(input: &mut ParserInput<'_>) -> Result<String, ParseError> {
    let mut body = String::new();
    let mut depth = 0u32;
    let mut quote: Option<char> = None;
    loop {
        let ch = input
            .peek_char()
            .ok_or_else(|| input.fatal("unexpected end of input in DOCTYPE"))?;
        input.advance(ch.len_utf8());
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '>') if depth == 0 => return Ok(body),
            _ => {}
        }
        body.push(ch);
    }
}
