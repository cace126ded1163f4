//! XPath 1.0 tokenizer.
//!
//! Disambiguation (XPath 1.0 §3.7) happens while scanning, using the
//! previous token: after an operand, `*` and the names `and`, `or`, `mod`,
//! `div` are operators. Otherwise a name followed by `(` is a function or
//! node type, a name followed by `::` is an axis, and anything else is a
//! name test.

use super::ast::BinaryOp;
use super::XPathError;
use crate::native::input::{is_name_char, is_name_start_char};

const NODE_TYPES: [&str; 4] = ["comment", "text", "processing-instruction", "node"];

/// A token with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Byte offset into the expression.
    pub position: usize,
}

/// XPath tokens after disambiguation.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `.`
    Dot,
    /// `..`
    DotDot,
    /// `@`
    At,
    /// `,`
    Comma,
    /// `::`
    ColonColon,
    /// `/`
    Slash,
    /// `//`
    DoubleSlash,
    /// `|`
    Pipe,
    /// `-`, binary or unary depending on position.
    Minus,
    /// Any other binary operator, including `*` in operator position.
    Operator(BinaryOp),
    /// Numeric literal.
    Number(f64),
    /// Quoted string literal.
    Literal(String),
    /// `$name`, without the dollar sign.
    Variable(String),
    /// A name test: `name`, `prefix:name`, `*` or `prefix:*`.
    NameTest(String),
    /// A name followed by `(` that is not a node type.
    FunctionName(String),
    /// `node`, `text`, `comment` or `processing-instruction` before `(`.
    NodeType(String),
    /// A name followed by `::`.
    AxisName(String),
}

impl Token {
    /// Whether this token can end an operand, which makes a following `*`
    /// or operator name an operator.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Self::RightParen
                | Self::RightBracket
                | Self::Dot
                | Self::DotDot
                | Self::Number(_)
                | Self::Literal(_)
                | Self::Variable(_)
                | Self::NameTest(_)
        )
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeftParen => f.write_str("("),
            Self::RightParen => f.write_str(")"),
            Self::LeftBracket => f.write_str("["),
            Self::RightBracket => f.write_str("]"),
            Self::Dot => f.write_str("."),
            Self::DotDot => f.write_str(".."),
            Self::At => f.write_str("@"),
            Self::Comma => f.write_str(","),
            Self::ColonColon => f.write_str("::"),
            Self::Slash => f.write_str("/"),
            Self::DoubleSlash => f.write_str("//"),
            Self::Pipe => f.write_str("|"),
            Self::Minus => f.write_str("-"),
            Self::Operator(op) => write!(f, "{op}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Literal(s) => write!(f, "'{s}'"),
            Self::Variable(name) => write!(f, "${name}"),
            Self::NameTest(name)
            | Self::FunctionName(name)
            | Self::NodeType(name)
            | Self::AxisName(name) => f.write_str(name),
        }
    }
}

fn is_ncname_start(c: char) -> bool {
    c != ':' && is_name_start_char(c)
}

fn is_ncname_char(c: char) -> bool {
    c != ':' && is_name_char(c)
}

/// Splits `expr` into tokens.
///
/// # Errors
///
/// Returns [`XPathError::Syntax`] on unterminated literals, stray
/// characters, or a lone `!` or `:`.
pub fn tokenize(expr: &str) -> Result<Vec<Spanned>, XPathError> {
    let mut lexer = Lexer {
        src: expr,
        pos: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    tokens: Vec<Spanned>,
}

impl Lexer<'_> {
    fn run(&mut self) -> Result<(), XPathError> {
        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(c) = self.peek() else {
                return Ok(());
            };
            let token = match c {
                '(' => self.single(Token::LeftParen),
                ')' => self.single(Token::RightParen),
                '[' => self.single(Token::LeftBracket),
                ']' => self.single(Token::RightBracket),
                '@' => self.single(Token::At),
                ',' => self.single(Token::Comma),
                '|' => self.single(Token::Pipe),
                '+' => self.single(Token::Operator(BinaryOp::Add)),
                '-' => self.single(Token::Minus),
                '=' => self.single(Token::Operator(BinaryOp::Eq)),
                '*' => {
                    self.pos += 1;
                    if self.after_operand() {
                        Token::Operator(BinaryOp::Mul)
                    } else {
                        Token::NameTest("*".to_owned())
                    }
                }
                '/' => {
                    if self.eat_str("//") {
                        Token::DoubleSlash
                    } else {
                        self.single(Token::Slash)
                    }
                }
                '.' => {
                    if self.eat_str("..") {
                        Token::DotDot
                    } else if self.peek_nth(1).is_some_and(|d| d.is_ascii_digit()) {
                        self.number()?
                    } else {
                        self.single(Token::Dot)
                    }
                }
                ':' => {
                    if self.eat_str("::") {
                        Token::ColonColon
                    } else {
                        return Err(self.error(start, "unexpected ':'"));
                    }
                }
                '!' => {
                    if self.eat_str("!=") {
                        Token::Operator(BinaryOp::Neq)
                    } else {
                        return Err(self.error(start, "expected '=' after '!'"));
                    }
                }
                '<' => {
                    if self.eat_str("<=") {
                        Token::Operator(BinaryOp::Lte)
                    } else {
                        self.single(Token::Operator(BinaryOp::Lt))
                    }
                }
                '>' => {
                    if self.eat_str(">=") {
                        Token::Operator(BinaryOp::Gte)
                    } else {
                        self.single(Token::Operator(BinaryOp::Gt))
                    }
                }
                '"' | '\'' => self.literal(c)?,
                '$' => {
                    self.pos += 1;
                    let name = self.qname();
                    if name.is_empty() {
                        return Err(self.error(start, "expected a name after '$'"));
                    }
                    Token::Variable(name)
                }
                '0'..='9' => self.number()?,
                c if is_ncname_start(c) => self.name_token(),
                other => {
                    return Err(self.error(start, format!("unexpected character '{other}'")));
                }
            };
            self.tokens.push(Spanned {
                token,
                position: start,
            });
        }
    }

    fn name_token(&mut self) -> Token {
        let name = self.qname();
        if self.after_operand() {
            let op = match name.as_str() {
                "and" => Some(BinaryOp::And),
                "or" => Some(BinaryOp::Or),
                "mod" => Some(BinaryOp::Mod),
                "div" => Some(BinaryOp::Div),
                _ => None,
            };
            if let Some(op) = op {
                return Token::Operator(op);
            }
        }
        // `prefix:*`
        if self.peek() == Some(':') && self.peek_nth(1) == Some('*') {
            self.pos += 2;
            return Token::NameTest(format!("{name}:*"));
        }
        let rest = self.src[self.pos..].trim_start();
        if rest.starts_with("::") {
            Token::AxisName(name)
        } else if rest.starts_with('(') {
            if NODE_TYPES.contains(&name.as_str()) {
                Token::NodeType(name)
            } else {
                Token::FunctionName(name)
            }
        } else {
            Token::NameTest(name)
        }
    }

    /// Reads an NCName, or a QName when a `:` is followed by a name start.
    fn qname(&mut self) -> String {
        let start = self.pos;
        self.take_ncname();
        if self.pos > start
            && self.peek() == Some(':')
            && self.peek_nth(1).is_some_and(is_ncname_start)
        {
            self.pos += 1;
            self.take_ncname();
        }
        self.src[start..self.pos].to_owned()
    }

    fn take_ncname(&mut self) {
        if let Some(c) = self.peek().filter(|&c| is_ncname_start(c)) {
            self.pos += c.len_utf8();
            while let Some(c) = self.peek().filter(|&c| is_ncname_char(c)) {
                self.pos += c.len_utf8();
            }
        }
    }

    fn number(&mut self) -> Result<Token, XPathError> {
        let start = self.pos;
        let digits = |s: &str| s.bytes().take_while(u8::is_ascii_digit).count();
        self.pos += digits(&self.src[self.pos..]);
        if self.peek() == Some('.') {
            self.pos += 1;
            self.pos += digits(&self.src[self.pos..]);
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(start, format!("invalid number '{text}'")))
    }

    fn literal(&mut self, quote: char) -> Result<Token, XPathError> {
        let start = self.pos;
        self.pos += 1;
        match self.src[self.pos..].find(quote) {
            Some(len) => {
                let value = self.src[self.pos..self.pos + len].to_owned();
                self.pos += len + 1;
                Ok(Token::Literal(value))
            }
            None => Err(self.error(start, "unterminated string literal")),
        }
    }

    fn after_operand(&self) -> bool {
        self.tokens.last().is_some_and(|t| t.token.ends_operand())
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.src[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start_matches([' ', '\t', '\r', '\n']).len();
    }

    #[allow(clippy::unused_self)]
    fn error(&self, position: usize, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            message: message.into(),
            position,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(expr: &str) -> Vec<Token> {
        tokenize(expr).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_star_is_name_test_or_multiply() {
        assert_eq!(
            kinds("* * 2"),
            vec![
                Token::NameTest("*".into()),
                Token::Operator(BinaryOp::Mul),
                Token::Number(2.0),
            ]
        );
    }

    #[test]
    fn test_operator_names_after_operand() {
        assert_eq!(
            kinds("div div div"),
            vec![
                Token::NameTest("div".into()),
                Token::Operator(BinaryOp::Div),
                Token::NameTest("div".into()),
            ]
        );
    }

    #[test]
    fn test_function_axis_and_node_type() {
        assert_eq!(
            kinds("child::text() | count (x)"),
            vec![
                Token::AxisName("child".into()),
                Token::ColonColon,
                Token::NodeType("text".into()),
                Token::LeftParen,
                Token::RightParen,
                Token::Pipe,
                Token::FunctionName("count".into()),
                Token::LeftParen,
                Token::NameTest("x".into()),
                Token::RightParen,
            ]
        );
    }

    #[test]
    fn test_qnames_and_prefix_wildcard() {
        assert_eq!(
            kinds("svg:rect/svg:*"),
            vec![
                Token::NameTest("svg:rect".into()),
                Token::Slash,
                Token::NameTest("svg:*".into()),
            ]
        );
    }

    #[test]
    fn test_numbers_and_literals() {
        assert_eq!(
            kinds(".5 + 12.25 = \"a'b\""),
            vec![
                Token::Number(0.5),
                Token::Operator(BinaryOp::Add),
                Token::Number(12.25),
                Token::Operator(BinaryOp::Eq),
                Token::Literal("a'b".into()),
            ]
        );
    }

    #[test]
    fn test_positions_are_byte_offsets() {
        let spans = tokenize("a  //b").unwrap();
        assert_eq!(spans[1].position, 3);
        assert_eq!(spans[2].position, 5);
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("'open").unwrap_err().is_syntax());
        assert!(tokenize("a ! b").is_err());
        assert!(tokenize("#").is_err());
        assert!(tokenize("$").is_err());
    }
}
