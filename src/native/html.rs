//! Error-tolerant HTML parser producing a native tree.
//!
//! Modeled on libxml2's `HTMLparser.c`, this parser accepts the markup real
//! pages contain and never fails on malformed input:
//!
//! - tag and attribute names are case-insensitive (normalized to lowercase)
//! - void elements (`<br>`, `<img>`, ...) never take content
//! - `<p>`, `<li>`, `<td>`, `<option>` and friends are closed implicitly
//! - unquoted and boolean attributes are accepted
//! - `script` and `style` content is raw text
//! - named character references are resolved; unknown ones stay literal
//! - missing `html`, `head` and `body` elements are implied
//!
//! The only error it reports is exceeding the nesting depth limit.

use super::encoding;
use super::input::{is_xml_char, ParserInput, DEFAULT_MAX_DEPTH};
use super::parser::TreeBuilder;
use super::{
    alloc_node, get_prop, link_before, XmlDocPtr, XmlNodePtr, COMMENT_NODE, DTD_NODE,
    ELEMENT_NODE, PI_NODE, TEXT_NODE,
};
use crate::error::{ParseError, SourceLocation};

/// Options controlling the HTML parser.
#[derive(Debug, Clone, Default)]
pub struct HtmlParseOptions {
    /// If true, drop whitespace-only text nodes.
    pub no_blanks: bool,
    /// If true, do not add implied `html`, `head`, and `body` elements.
    pub no_implied: bool,
}

impl HtmlParseOptions {
    /// Enables or disables stripping of blank text nodes.
    #[must_use]
    pub fn no_blanks(mut self, yes: bool) -> Self {
        self.no_blanks = yes;
        self
    }

    /// Enables or disables generation of implied elements.
    #[must_use]
    pub fn no_implied(mut self, yes: bool) -> Self {
        self.no_implied = yes;
        self
    }
}

/// Returns true for elements that never have content.
pub(crate) fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "basefont"
            | "br"
            | "col"
            | "embed"
            | "frame"
            | "hr"
            | "img"
            | "input"
            | "isindex"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

/// Returns true if opening `tag` implicitly closes an open `open_tag`.
fn auto_closes(open_tag: &str, tag: &str) -> bool {
    match open_tag {
        "p" => matches!(
            tag,
            "p" | "div"
                | "ul"
                | "ol"
                | "dl"
                | "pre"
                | "table"
                | "blockquote"
                | "address"
                | "h1"
                | "h2"
                | "h3"
                | "h4"
                | "h5"
                | "h6"
                | "hr"
                | "form"
                | "section"
                | "article"
                | "header"
                | "footer"
                | "nav"
        ),
        "li" => tag == "li",
        "dt" | "dd" => matches!(tag, "dt" | "dd"),
        "tr" => tag == "tr",
        "td" | "th" => matches!(tag, "td" | "th" | "tr"),
        "thead" | "tbody" => matches!(tag, "tbody" | "tfoot"),
        "option" => matches!(tag, "option" | "optgroup"),
        "head" => tag == "body",
        _ => false,
    }
}

fn is_raw_text_element(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

fn is_head_content_element(tag: &str) -> bool {
    matches!(
        tag,
        "title" | "meta" | "link" | "base" | "style" | "script" | "noscript"
    )
}

/// Resolves an HTML named character reference.
fn html_entity(name: &str) -> Option<char> {
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{A0}',
        "iexcl" => '\u{A1}',
        "cent" => '\u{A2}',
        "pound" => '\u{A3}',
        "yen" => '\u{A5}',
        "sect" => '\u{A7}',
        "copy" => '\u{A9}',
        "laquo" => '\u{AB}',
        "reg" => '\u{AE}',
        "deg" => '\u{B0}',
        "plusmn" => '\u{B1}',
        "para" => '\u{B6}',
        "middot" => '\u{B7}',
        "raquo" => '\u{BB}',
        "iquest" => '\u{BF}',
        "agrave" => '\u{E0}',
        "aacute" => '\u{E1}',
        "auml" => '\u{E4}',
        "ccedil" => '\u{E7}',
        "egrave" => '\u{E8}',
        "eacute" => '\u{E9}',
        "ouml" => '\u{F6}',
        "uuml" => '\u{FC}',
        "szlig" => '\u{DF}',
        "times" => '\u{D7}',
        "divide" => '\u{F7}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "bull" => '\u{2022}',
        "hellip" => '\u{2026}',
        "euro" => '\u{20AC}',
        "trade" => '\u{2122}',
        _ => return None,
    };
    Some(ch)
}

/// Parses an HTML string with default options.
///
/// # Errors
///
/// Returns [`ParseError`] only if the nesting depth limit is exceeded.
pub fn parse_html(input: &str) -> Result<XmlDocPtr, ParseError> {
    parse_html_with_options(input, &HtmlParseOptions::default())
}

/// Parses an HTML string. The returned document must be released with
/// [`free_doc`](super::free_doc).
///
/// # Errors
///
/// Returns [`ParseError`] only if the nesting depth limit is exceeded.
pub fn parse_html_with_options(
    input: &str,
    options: &HtmlParseOptions,
) -> Result<XmlDocPtr, ParseError> {
    let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
    HtmlParser::new(input, options).parse()
}

/// Parses raw HTML bytes, honoring a BOM or `<meta charset>` declaration.
///
/// # Errors
///
/// Returns [`ParseError`] if the bytes cannot be decoded.
pub fn parse_html_bytes(bytes: &[u8], options: &HtmlParseOptions) -> Result<XmlDocPtr, ParseError> {
    let (text, label) = encoding::decode_to_utf8(bytes, true)
        .map_err(|msg| ParseError::new(msg, SourceLocation::default()))?;
    let doc = parse_html_with_options(&text, options)?;
    // SAFETY: just parsed, exclusively ours.
    unsafe { (*doc).encoding = label };
    Ok(doc)
}

struct HtmlParser<'a> {
    input: ParserInput<'a>,
    builder: TreeBuilder,
    options: HtmlParseOptions,
    /// Open elements and their lowercase names, innermost last.
    open: Vec<(XmlNodePtr, String)>,
}

impl<'a> HtmlParser<'a> {
    fn new(text: &'a str, options: &HtmlParseOptions) -> Self {
        Self {
            input: ParserInput::new(text),
            builder: TreeBuilder::new(true),
            options: options.clone(),
            open: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<XmlDocPtr, ParseError> {
        self.input.skip_whitespace();
        if self.input.looking_at_ci(b"<!doctype") {
            self.parse_doctype();
        }
        while !self.input.at_end() {
            if self.input.looking_at(b"<!--") {
                self.parse_comment();
            } else if self.input.looking_at(b"</") {
                self.parse_end_tag();
            } else if self.input.peek() == Some(b'<')
                && self.input.peek_at(1).is_some_and(|b| b.is_ascii_alphabetic())
            {
                self.parse_start_tag()?;
            } else if self.input.looking_at(b"<?") {
                self.parse_pi();
            } else if self.input.looking_at(b"<!") {
                self.skip_to_gt();
            } else {
                self.parse_text();
            }
        }
        Ok(self.builder.finish())
    }

    fn current_parent(&self) -> XmlNodePtr {
        self.open
            .last()
            .map_or_else(|| self.builder.root(), |&(node, _)| node)
    }

    fn is_open(&self, tag: &str) -> bool {
        self.open.iter().any(|(_, t)| t == tag)
    }

    fn push_open(&mut self, node: XmlNodePtr, tag: &str) -> Result<(), ParseError> {
        if self.open.len() >= DEFAULT_MAX_DEPTH as usize {
            return Err(self.input.fatal(format!(
                "maximum nesting depth exceeded ({DEFAULT_MAX_DEPTH})"
            )));
        }
        self.open.push((node, tag.to_owned()));
        Ok(())
    }

    // --- Implied structure ---

    fn ensure_html(&mut self) -> XmlNodePtr {
        let top = self.builder.root();
        if let Some(html) = find_child(top, "html") {
            return html;
        }
        let html = self.builder.append(top, ELEMENT_NODE, "html", "");
        self.open.insert(0, (html, "html".to_owned()));
        html
    }

    fn ensure_head(&mut self) -> XmlNodePtr {
        let html = self.ensure_html();
        if let Some(head) = find_child(html, "head") {
            return head;
        }
        if let Some(body) = find_child(html, "body") {
            let head = alloc_node(self.builder.doc(), ELEMENT_NODE, "head", "");
            // SAFETY: `body` is linked under `html` and `head` is fresh.
            unsafe { link_before(body, head) };
            return head;
        }
        self.builder.append(html, ELEMENT_NODE, "head", "")
    }

    fn ensure_body(&mut self) -> XmlNodePtr {
        let html = self.ensure_html();
        if let Some(body) = find_child(html, "body") {
            return body;
        }
        self.close_head_if_open();
        let body = self.builder.append(html, ELEMENT_NODE, "body", "");
        self.open.push((body, "body".to_owned()));
        body
    }

    fn close_head_if_open(&mut self) {
        if self.open.last().is_some_and(|(_, t)| t == "head") {
            self.open.pop();
        }
    }

    // --- Markup ---

    fn parse_doctype(&mut self) {
        self.input.advance("<!doctype".len());
        self.input.skip_whitespace();
        let name = self.parse_tag_name();
        let mut rest = String::new();
        while let Some(ch) = self.input.peek_char() {
            self.input.advance(ch.len_utf8());
            if ch == '>' {
                break;
            }
            rest.push(ch);
        }
        let content = format!("{name}{}", rest.trim_end());
        let top = self.builder.root();
        self.builder.append(top, DTD_NODE, &name, &content);
    }

    fn parse_start_tag(&mut self) -> Result<(), ParseError> {
        self.input.advance(1);
        let tag = self.parse_tag_name();
        let attributes = self.parse_attributes();
        self.input.skip_whitespace();
        let self_closing = self.input.peek() == Some(b'/');
        if self_closing {
            self.input.advance(1);
        }
        self.skip_to_gt();

        if !self.options.no_implied {
            let structural = match tag.as_str() {
                "html" => Some(self.ensure_html()),
                "head" => {
                    let head = self.ensure_head();
                    if !self.is_open("head") && !self.is_open("body") {
                        self.push_open(head, "head")?;
                    }
                    Some(head)
                }
                "body" => {
                    self.close_head_if_open();
                    Some(self.ensure_body())
                }
                _ => None,
            };
            if let Some(elem) = structural {
                self.merge_attributes(elem, &attributes);
                return Ok(());
            }
        }

        while self
            .open
            .last()
            .is_some_and(|(_, open_tag)| auto_closes(open_tag, &tag))
        {
            self.open.pop();
        }

        if !self.options.no_implied {
            if is_head_content_element(&tag) && !self.is_open("body") {
                let head = self.ensure_head();
                if !self.is_open("head") {
                    self.push_open(head, "head")?;
                }
            } else {
                self.close_head_if_open();
                self.ensure_body();
            }
        }

        let parent = self.current_parent();
        let elem = self.builder.append(parent, ELEMENT_NODE, &tag, "");
        self.merge_attributes(elem, &attributes);

        if is_void_element(&tag) || self_closing {
            return Ok(());
        }
        if is_raw_text_element(&tag) {
            self.parse_raw_text(elem, &tag);
            return Ok(());
        }
        self.push_open(elem, &tag)
    }

    fn merge_attributes(&mut self, elem: XmlNodePtr, attributes: &[(String, String)]) {
        for (name, value) in attributes {
            // SAFETY: `elem` belongs to the builder's live document.
            if unsafe { get_prop(elem, name) }.is_null() {
                self.builder.attribute(elem, name, value);
            }
        }
    }

    fn parse_end_tag(&mut self) {
        self.input.advance(2);
        let tag = self.parse_tag_name();
        self.skip_to_gt();
        if tag.is_empty() || is_void_element(&tag) {
            return;
        }
        if let Some(idx) = self.open.iter().rposition(|(_, t)| *t == tag) {
            self.open.truncate(idx);
        }
    }

    fn parse_attributes(&mut self) -> Vec<(String, String)> {
        let mut attributes = Vec::new();
        loop {
            self.input.skip_whitespace();
            match self.input.peek() {
                None | Some(b'>') => break,
                Some(b'/') if self.input.peek_at(1) == Some(b'>') => break,
                _ => {}
            }
            let name = self
                .input
                .take_while(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'=' | b'>' | b'/' | b'<' | b'"' | b'\''))
                .to_ascii_lowercase();
            if name.is_empty() {
                self.input.advance(1);
                continue;
            }
            self.input.skip_whitespace();
            let value = if self.input.peek() == Some(b'=') {
                self.input.advance(1);
                self.input.skip_whitespace();
                self.parse_attr_value()
            } else {
                name.clone()
            };
            attributes.push((name, value));
        }
        attributes
    }

    fn parse_attr_value(&mut self) -> String {
        let quote = match self.input.peek() {
            Some(q @ (b'"' | b'\'')) => {
                self.input.advance(1);
                Some(q)
            }
            _ => None,
        };
        let mut value = String::new();
        while let Some(b) = self.input.peek() {
            match quote {
                Some(q) if b == q => {
                    self.input.advance(1);
                    break;
                }
                None if matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'<') => break,
                _ => {}
            }
            if b == b'&' {
                value.push_str(&self.parse_reference());
            } else {
                value.push(self.next_char());
            }
        }
        value
    }

    fn parse_text(&mut self) {
        let mut text = String::new();
        // A `<` that starts no markup is literal text.
        if self.input.peek() == Some(b'<') {
            self.input.advance(1);
            text.push('<');
        }
        while let Some(b) = self.input.peek() {
            match b {
                b'<' => break,
                b'&' => text.push_str(&self.parse_reference()),
                _ => text.push(self.next_char()),
            }
        }
        let blank = text.chars().all(char::is_whitespace);
        if self.options.no_blanks && blank {
            return;
        }
        if !self.options.no_implied && self.open.is_empty() {
            if blank {
                return;
            }
            self.ensure_body();
        }
        let parent = self.current_parent();
        self.builder.append(parent, TEXT_NODE, "text", &text);
    }

    fn parse_raw_text(&mut self, elem: XmlNodePtr, tag: &str) {
        let end_tag = format!("</{tag}");
        let mut content = String::new();
        while !self.input.at_end() && !self.input.looking_at_ci(end_tag.as_bytes()) {
            content.push(self.next_char());
        }
        if !content.is_empty() {
            self.builder.append(elem, TEXT_NODE, "text", &content);
        }
        if !self.input.at_end() {
            self.input.advance(end_tag.len());
            self.skip_to_gt();
        }
    }

    fn parse_comment(&mut self) {
        self.input.advance(4);
        let (text, closed) = self.input.take_until(b"-->");
        if closed {
            self.input.advance(3);
        }
        let parent = self.current_parent();
        self.builder.append(parent, COMMENT_NODE, "comment", &text);
    }

    fn parse_pi(&mut self) {
        self.input.advance(2);
        let target = self.parse_tag_name();
        self.input.skip_whitespace();
        let (data, closed) = self.input.take_until(b">");
        if closed {
            self.input.advance(1);
        }
        if target.is_empty() {
            return;
        }
        let data = data.strip_suffix('?').unwrap_or(&data).trim_end();
        let parent = self.current_parent();
        self.builder.append(parent, PI_NODE, &target, data);
    }

    // --- Lexical helpers ---

    fn parse_tag_name(&mut self) -> String {
        self.input
            .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.'))
            .to_ascii_lowercase()
    }

    /// Resolves a character reference. Anything unrecognized is returned
    /// verbatim.
    fn parse_reference(&mut self) -> String {
        self.input.advance(1);
        if self.input.peek() == Some(b'#') {
            let hex = matches!(self.input.peek_at(1), Some(b'x' | b'X'));
            self.input.advance(if hex { 2 } else { 1 });
            let digits = self.input.take_while(|b| {
                if hex {
                    b.is_ascii_hexdigit()
                } else {
                    b.is_ascii_digit()
                }
            });
            let resolved = u32::from_str_radix(&digits, if hex { 16 } else { 10 })
                .ok()
                .and_then(char::from_u32)
                .filter(|&c| is_xml_char(c));
            let Some(ch) = resolved else {
                return format!("&#{}{digits}", if hex { "x" } else { "" });
            };
            if self.input.peek() == Some(b';') {
                self.input.advance(1);
            }
            return ch.to_string();
        }
        let name = self.input.take_while(|b| b.is_ascii_alphanumeric());
        if self.input.peek() == Some(b';') {
            if let Some(ch) = html_entity(&name) {
                self.input.advance(1);
                return ch.to_string();
            }
        }
        format!("&{name}")
    }

    fn next_char(&mut self) -> char {
        // The input is a `&str`, so a character is always available here.
        self.input.next_char().unwrap_or('\u{FFFD}')
    }

    fn skip_to_gt(&mut self) {
        while let Some(b) = self.input.peek() {
            self.input.advance(1);
            if b == b'>' {
                break;
            }
        }
    }
}

fn find_child(parent: XmlNodePtr, name: &str) -> Option<XmlNodePtr> {
    // SAFETY: callers pass nodes of the document under construction.
    unsafe {
        let mut cur = (*parent).children;
        while !cur.is_null() {
            if (*cur).typ == ELEMENT_NODE && (*cur).name == name {
                return Some(cur);
            }
            cur = (*cur).next;
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::{doc_get_root_element, free_doc, live_counts, node_string_value, XmlNode};
    use super::*;

    fn children(node: XmlNodePtr) -> Vec<XmlNodePtr> {
        let mut out = Vec::new();
        unsafe {
            let mut cur = (*node).children;
            while !cur.is_null() {
                out.push(cur);
                cur = (*cur).next;
            }
        }
        out
    }

    fn names(node: XmlNodePtr) -> Vec<String> {
        children(node)
            .into_iter()
            .map(|c| unsafe { (*c).name.clone() })
            .collect()
    }

    fn node<'a>(ptr: XmlNodePtr) -> &'a XmlNode {
        unsafe { &*ptr }
    }

    fn with_html(input: &str, check: impl FnOnce(XmlDocPtr)) {
        let doc = parse_html(input).unwrap();
        check(doc);
        unsafe { free_doc(doc) };
    }

    #[test]
    fn test_explicit_structure() {
        with_html(
            "<html><head></head><body><a href=\"https://www.google.com\"></a></body></html>",
            |doc| unsafe {
                let html = doc_get_root_element(doc);
                assert_eq!(names(html), vec!["head", "body"]);
                let body = children(html)[1];
                let a = (*body).children;
                assert_eq!(node(a).name, "a");
                assert_eq!(node(get_prop(a, "href")).content, "https://www.google.com");
            },
        );
    }

    #[test]
    fn test_implied_structure() {
        with_html("<title>T</title><p>Hello <b>world</b>", |doc| unsafe {
            let html = doc_get_root_element(doc);
            assert_eq!(node(html).name, "html");
            assert_eq!(names(html), vec!["head", "body"]);
            let head = children(html)[0];
            assert_eq!(names(head), vec!["title"]);
            let body = children(html)[1];
            assert_eq!(node_string_value(body), "Hello world");
            assert!((*(*doc).node).typ == super::super::HTML_DOCUMENT_NODE);
        });
    }

    #[test]
    fn test_no_implied() {
        let doc =
            parse_html_with_options("<p>Hi</p>", &HtmlParseOptions::default().no_implied(true))
                .unwrap();
        unsafe {
            assert_eq!(node(doc_get_root_element(doc)).name, "p");
            free_doc(doc);
        }
    }

    #[test]
    fn test_void_and_auto_closed_elements() {
        with_html("<body><ul><li>a<li>b</ul><p>x<br>y<p>z</body>", |doc| unsafe {
            let body = children(doc_get_root_element(doc))[0];
            assert_eq!(names(body), vec!["ul", "p", "p"]);
            assert_eq!(names(children(body)[0]), vec!["li", "li"]);
            assert_eq!(names(children(body)[1]), vec!["text", "br", "text"]);
        });
    }

    #[test]
    fn test_case_and_attribute_forms() {
        with_html("<DIV Class=main hidden data-x='1'>t</Div>", |doc| unsafe {
            let body = children(doc_get_root_element(doc))[0];
            let div = (*body).children;
            assert_eq!(node(div).name, "div");
            assert_eq!(node(get_prop(div, "class")).content, "main");
            assert_eq!(node(get_prop(div, "hidden")).content, "hidden");
            assert_eq!(node(get_prop(div, "data-x")).content, "1");
        });
    }

    #[test]
    fn test_entities_and_raw_text() {
        with_html(
            "<p>a&amp;b&nbsp;&copy;&#65;&bogus; & c</p><script>if (a < b && c) {}</script>",
            |doc| unsafe {
                let body = children(doc_get_root_element(doc))[0];
                let p = (*body).children;
                assert_eq!(node_string_value(p), "a&b\u{A0}\u{A9}A&bogus; & c");
                let script = (*p).next;
                assert_eq!(node_string_value(script), "if (a < b && c) {}");
            },
        );
    }

    #[test]
    fn test_doctype_and_comments() {
        with_html("<!DOCTYPE html><!-- hi --><html><body></body></html>", |doc| unsafe {
            let first = (*(*doc).node).children;
            assert_eq!(node(first).typ, DTD_NODE);
            assert_eq!(node(first).content, "html");
            assert_eq!(node((*first).next).typ, COMMENT_NODE);
        });
    }

    #[test]
    fn test_stray_end_tags_are_ignored() {
        with_html("<body></span><div>x</div></body>", |doc| unsafe {
            let body = children(doc_get_root_element(doc))[0];
            assert_eq!(names(body), vec!["div"]);
        });
    }

    #[test]
    fn test_depth_limit_fails_cleanly() {
        let before = live_counts();
        let deep = "<div>".repeat(DEFAULT_MAX_DEPTH as usize + 10);
        assert!(parse_html(&deep).is_err());
        assert_eq!(live_counts(), before);
    }

    #[test]
    fn test_meta_charset_bytes() {
        let bytes = b"<html><head><meta charset=\"iso-8859-1\"></head><body>\xE9</body></html>";
        let doc = parse_html_bytes(bytes, &HtmlParseOptions::default()).unwrap();
        unsafe {
            assert_eq!((*doc).encoding.as_deref(), Some("iso-8859-1"));
            assert!(node_string_value((*doc).node).ends_with('é'));
            free_doc(doc);
        }
    }
}
