//! The character cursor shared by the XML and HTML parsers.
//!
//! [`ParserInput`] owns position tracking (line, column, byte offset) and the
//! primitives both parsers are built from: peeking, advancing, names,
//! references, quoted values. It also enforces the nesting depth limit.
//!
//! No external entity is ever loaded.

use crate::error::{ParseError, SourceLocation};

/// Default maximum element nesting depth.
pub(crate) const DEFAULT_MAX_DEPTH: u32 = 256;

/// Maximum length (in bytes) accepted for a single name.
const MAX_NAME_LENGTH: usize = 50_000;

/// Returns `true` if `c` is an XML 1.0 `Char`.
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c as u32,
        0x09 | 0x0A | 0x0D | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x0001_0000..=0x0010_FFFF
    )
}

/// Returns `true` if `c` may start an XML name.
pub(crate) fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z' |
        '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' |
        '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' |
        '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}' |
        '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' |
        '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' |
        '\u{10000}'..='\u{EFFFF}'
    )
}

/// Returns `true` if `c` may continue an XML name.
pub(crate) fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' |
            '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

/// Resolves one of the five predefined XML entities.
pub(crate) fn predefined_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Byte cursor over a UTF-8 document.
pub(crate) struct ParserInput<'a> {
    input: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    depth: u32,
    max_depth: u32,
}

impl<'a> ParserInput<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn set_max_depth(&mut self, max: u32) {
        self.max_depth = max;
    }

    // -- Depth tracking --

    /// Enters one element level, failing once the limit is exceeded.
    pub fn increment_depth(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.fatal(format!(
                "maximum nesting depth exceeded ({})",
                self.max_depth
            )));
        }
        Ok(())
    }

    pub fn decrement_depth(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // -- Position --

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
            byte_offset: self.pos,
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    // -- Peek --

    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    pub fn peek_char(&self) -> Option<char> {
        let rest = self.input.get(self.pos..)?;
        // Only decode as far as the longest UTF-8 sequence.
        let end = rest.len().min(4);
        let head = match std::str::from_utf8(&rest[..end]) {
            Ok(s) => s,
            Err(e) => std::str::from_utf8(&rest[..e.valid_up_to()]).ok()?,
        };
        head.chars().next()
    }

    // -- Advance --

    /// Advances by `count` bytes, keeping line and column current.
    pub fn advance(&mut self, count: usize) {
        for _ in 0..count {
            let Some(&b) = self.input.get(self.pos) else {
                return;
            };
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if b & 0xC0 != 0x80 {
                self.column += 1;
            }
            self.pos += 1;
        }
    }

    /// Consumes one character, normalizing `\r\n` and bare `\r` to `\n`.
    pub fn next_char(&mut self) -> Result<char, ParseError> {
        let ch = self
            .peek_char()
            .ok_or_else(|| self.fatal("unexpected end of input"))?;
        self.advance(ch.len_utf8());
        if ch == '\r' {
            if self.peek() == Some(b'\n') {
                self.advance(1);
            }
            return Ok('\n');
        }
        Ok(ch)
    }

    pub fn expect_byte(&mut self, expected: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.advance(1);
                Ok(())
            }
            Some(b) => Err(self.fatal(format!(
                "expected '{}', found '{}'",
                expected as char, b as char
            ))),
            None => Err(self.fatal(format!(
                "expected '{}', found end of input",
                expected as char
            ))),
        }
    }

    pub fn expect_str(&mut self, expected: &[u8]) -> Result<(), ParseError> {
        for &b in expected {
            self.expect_byte(b)?;
        }
        Ok(())
    }

    // -- Lookahead --

    pub fn looking_at(&self, s: &[u8]) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    /// ASCII case-insensitive [`looking_at`](Self::looking_at).
    pub fn looking_at_ci(&self, s: &[u8]) -> bool {
        self.input
            .get(self.pos..self.pos + s.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(s))
    }

    // -- Whitespace --

    /// Skips whitespace. Returns `true` if any was consumed.
    pub fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.advance(1);
        }
        self.pos > start
    }

    pub fn skip_whitespace_required(&mut self) -> Result<(), ParseError> {
        if !self.skip_whitespace() {
            return Err(self.fatal("whitespace required"));
        }
        Ok(())
    }

    /// Consumes bytes while `pred` holds and returns them as a string.
    pub fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.advance(1);
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    /// Consumes everything up to (not including) `terminator`, or to the end
    /// of input when it never appears. The flag reports whether it was found.
    pub fn take_until(&mut self, terminator: &[u8]) -> (String, bool) {
        let start = self.pos;
        let found = self.input[start..]
            .windows(terminator.len())
            .position(|w| w == terminator);
        let end = found.map_or(self.input.len(), |off| start + off);
        let text = String::from_utf8_lossy(&self.input[start..end]).into_owned();
        self.advance(end - start);
        (text, found.is_some())
    }

    // -- Names and references --

    /// Parses an XML `Name`.
    pub fn parse_name(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let first = self
            .peek_char()
            .ok_or_else(|| self.fatal("expected name, found end of input"))?;
        if !is_name_start_char(first) {
            return Err(self.fatal(format!("invalid name start character: '{first}'")));
        }
        self.advance(first.len_utf8());
        while let Some(ch) = self.peek_char() {
            if !is_name_char(ch) {
                break;
            }
            self.advance(ch.len_utf8());
        }
        if self.pos - start > MAX_NAME_LENGTH {
            return Err(self.fatal("name too long"));
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    /// Parses a character reference body after `&#` and the closing `;`.
    pub fn parse_char_ref(&mut self) -> Result<char, ParseError> {
        let value = if self.peek() == Some(b'x') {
            self.advance(1);
            let hex = self.take_while(|b| b.is_ascii_hexdigit());
            u32::from_str_radix(&hex, 16)
                .map_err(|_| self.fatal("invalid hex character reference"))?
        } else {
            let dec = self.take_while(|b| b.is_ascii_digit());
            dec.parse::<u32>()
                .map_err(|_| self.fatal("invalid decimal character reference"))?
        };
        self.expect_byte(b';')?;
        char::from_u32(value)
            .filter(|&c| is_xml_char(c))
            .ok_or_else(|| self.fatal(format!("invalid character reference: U+{value:04X}")))
    }

    /// Parses `&name;` or `&#...;` in XML content.
    pub fn parse_reference(&mut self) -> Result<char, ParseError> {
        self.expect_byte(b'&')?;
        if self.peek() == Some(b'#') {
            self.advance(1);
            return self.parse_char_ref();
        }
        let name = self.parse_name()?;
        self.expect_byte(b';')?;
        predefined_entity(&name)
            .ok_or_else(|| self.fatal(format!("unknown entity reference: &{name};")))
    }

    /// Parses a quoted attribute value, resolving references and
    /// normalizing whitespace characters to spaces.
    pub fn parse_attribute_value(&mut self) -> Result<String, ParseError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.fatal("attribute value must be quoted")),
        };
        self.advance(1);
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.fatal("unexpected end of input in attribute value")),
                Some(b) if b == quote => {
                    self.advance(1);
                    return Ok(value);
                }
                Some(b'&') => value.push(self.parse_reference()?),
                Some(b'<') => return Err(self.fatal("'<' not allowed in attribute values")),
                Some(_) => match self.next_char()? {
                    '\n' | '\t' => value.push(' '),
                    ch => value.push(ch),
                },
            }
        }
    }

    /// Parses a quoted value with no reference resolution.
    pub fn parse_quoted_value(&mut self) -> Result<String, ParseError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.fatal("expected quoted value")),
        };
        self.advance(1);
        let (value, closed) = self.take_until(&[quote]);
        if !closed {
            return Err(self.fatal("unterminated quoted value"));
        }
        self.advance(1);
        Ok(value)
    }

    /// Builds a fatal error at the current location.
    pub fn fatal(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.location())
    }
}

/// Parsed `<?xml ...?>` declaration.
#[derive(Debug, Clone)]
pub(crate) struct XmlDeclaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// Parses the XML declaration. The caller has checked for `<?xml`.
pub(crate) fn parse_xml_decl(input: &mut ParserInput<'_>) -> Result<XmlDeclaration, ParseError> {
    input.expect_str(b"<?xml")?;
    input.skip_whitespace_required()?;

    input.expect_str(b"version")?;
    input.skip_whitespace();
    input.expect_byte(b'=')?;
    input.skip_whitespace();
    let version = input.parse_quoted_value()?;
    let valid_version = version
        .strip_prefix("1.")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()));
    if !valid_version {
        return Err(input.fatal(format!("invalid version number: '{version}'")));
    }

    input.skip_whitespace();
    let encoding = if input.looking_at(b"encoding") {
        input.expect_str(b"encoding")?;
        input.skip_whitespace();
        input.expect_byte(b'=')?;
        input.skip_whitespace();
        Some(input.parse_quoted_value()?)
    } else {
        None
    };

    input.skip_whitespace();
    let standalone = if input.looking_at(b"standalone") {
        input.expect_str(b"standalone")?;
        input.skip_whitespace();
        input.expect_byte(b'=')?;
        input.skip_whitespace();
        match input.parse_quoted_value()?.as_str() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => return Err(input.fatal("standalone must be 'yes' or 'no'")),
        }
    } else {
        None
    };

    input.skip_whitespace();
    input.expect_str(b"?>")?;
    Ok(XmlDeclaration {
        version,
        encoding,
        standalone,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column_tracking() {
        let mut input = ParserInput::new("ab\ncd");
        input.advance(2);
        assert_eq!(input.location().column, 3);
        input.advance(1);
        assert_eq!(input.location().line, 2);
        assert_eq!(input.location().column, 1);
        assert_eq!(input.location().byte_offset, 3);
    }

    #[test]
    fn test_columns_count_characters() {
        let mut input = ParserInput::new("é!");
        input.advance(2);
        assert_eq!(input.location().column, 2);
        assert_eq!(input.peek_char(), Some('!'));
    }

    #[test]
    fn test_next_char_normalizes_cr() {
        let mut input = ParserInput::new("a\r\nb\rc");
        let chars: Vec<char> = (0..5).map(|_| input.next_char().unwrap()).collect();
        assert_eq!(chars, vec!['a', '\n', 'b', '\n', 'c']);
    }

    #[test]
    fn test_parse_name() {
        let mut input = ParserInput::new("foo:bar-1 rest");
        assert_eq!(input.parse_name().unwrap(), "foo:bar-1");
        assert!(ParserInput::new("1abc").parse_name().is_err());
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(ParserInput::new("&amp;").parse_reference().unwrap(), '&');
        assert_eq!(ParserInput::new("&#65;").parse_reference().unwrap(), 'A');
        assert_eq!(ParserInput::new("&#x41;").parse_reference().unwrap(), 'A');
        assert!(ParserInput::new("&bogus;").parse_reference().is_err());
        assert!(ParserInput::new("&#0;").parse_reference().is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut input = ParserInput::new("");
        input.set_max_depth(2);
        assert!(input.increment_depth().is_ok());
        assert!(input.increment_depth().is_ok());
        let err = input.increment_depth().unwrap_err();
        assert!(err.message.contains("nesting depth"));
    }

    #[test]
    fn test_parse_attribute_value() {
        let mut input = ParserInput::new("\"a &amp;\tb\"");
        assert_eq!(input.parse_attribute_value().unwrap(), "a & b");
        assert!(ParserInput::new("\"a<b\"").parse_attribute_value().is_err());
    }

    #[test]
    fn test_take_until() {
        let mut input = ParserInput::new("abc-->rest");
        assert_eq!(input.take_until(b"-->"), ("abc".to_string(), true));
        assert!(input.looking_at(b"-->"));

        let mut input = ParserInput::new("never closed");
        assert_eq!(input.take_until(b"]]>"), ("never closed".to_string(), false));
        assert!(input.at_end());
    }

    #[test]
    fn test_parse_xml_decl() {
        let mut input =
            ParserInput::new("<?xml version=\"1.0\" encoding='ISO-8859-1' standalone=\"yes\"?>");
        let decl = parse_xml_decl(&mut input).unwrap();
        assert_eq!(decl.version, "1.0");
        assert_eq!(decl.encoding.as_deref(), Some("ISO-8859-1"));
        assert_eq!(decl.standalone, Some(true));
        assert!(parse_xml_decl(&mut ParserInput::new("<?xml version=\"2\"?>")).is_err());
    }
}
