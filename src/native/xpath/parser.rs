//! Recursive descent parser for XPath 1.0.
//!
//! Precedence, lowest first: `or`, `and`, equality, relational, additive,
//! multiplicative, unary minus, union, path.

use super::ast::{Axis, BinaryOp, Expr, NodeTest, Step};
use super::lexer::{tokenize, Spanned, Token};
use super::XPathError;

/// Deepest expression nesting accepted. Parentheses, predicates, function
/// arguments, operator chains and negations each add a level.
pub const MAX_DEPTH: usize = 256;

/// Parses an expression string into an [`Expr`].
///
/// # Errors
///
/// Returns [`XPathError::Syntax`] if `input` is empty or is not a
/// well-formed XPath 1.0 expression, or nests deeper than [`MAX_DEPTH`].
pub fn parse(input: &str) -> Result<Expr, XPathError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(XPathError::Syntax {
            message: "empty expression".to_owned(),
            position: 0,
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
    };
    let expr = parser.or_expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(parser.error(format!("unexpected '{token}' after expression"))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), XPathError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{token}', found {}", self.describe())))
        }
    }

    fn eat_operator(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Operator(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            Some(Token::Minus) if ops.contains(&BinaryOp::Sub) => {
                self.pos += 1;
                Some(BinaryOp::Sub)
            }
            _ => None,
        }
    }

    fn describe(&self) -> String {
        self.peek()
            .map_or_else(|| "end of expression".to_owned(), |t| format!("'{t}'"))
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            message: message.into(),
            position: self.tokens.get(self.pos).map_or(self.end, |s| s.position),
        }
    }

    fn descend(&mut self) -> Result<(), XPathError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!(
                "expression nested deeper than {MAX_DEPTH} levels"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Parses one left-associative precedence level.
    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expr, XPathError>,
    ) -> Result<Expr, XPathError> {
        let depth = self.depth;
        let mut lhs = next(self)?;
        while let Some(op) = self.eat_operator(ops) {
            self.descend()?;
            let rhs = next(self)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn or_expr(&mut self) -> Result<Expr, XPathError> {
        self.descend()?;
        let expr = self.binary_level(&[BinaryOp::Or], Self::and_expr)?;
        self.depth -= 1;
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(&[BinaryOp::And], Self::equality_expr)
    }

    fn equality_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(&[BinaryOp::Eq, BinaryOp::Neq], Self::relational_expr)
    }

    fn relational_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(
            &[BinaryOp::Lt, BinaryOp::Lte, BinaryOp::Gt, BinaryOp::Gte],
            Self::additive_expr,
        )
    }

    fn additive_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(&[BinaryOp::Add, BinaryOp::Sub], Self::multiplicative_expr)
    }

    fn multiplicative_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(
            &[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Mod],
            Self::unary_expr,
        )
    }

    fn unary_expr(&mut self) -> Result<Expr, XPathError> {
        let depth = self.depth;
        let mut negations = 0;
        while self.eat(&Token::Minus) {
            self.descend()?;
            negations += 1;
        }
        let mut expr = self.union_expr()?;
        for _ in 0..negations {
            expr = Expr::Negate(Box::new(expr));
        }
        self.depth = depth;
        Ok(expr)
    }

    fn union_expr(&mut self) -> Result<Expr, XPathError> {
        let depth = self.depth;
        let mut lhs = self.path_expr()?;
        while self.eat(&Token::Pipe) {
            self.descend()?;
            let rhs = self.path_expr()?;
            lhs = Expr::Union(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn path_expr(&mut self) -> Result<Expr, XPathError> {
        match self.peek() {
            Some(
                Token::Variable(_)
                | Token::Literal(_)
                | Token::Number(_)
                | Token::LeftParen
                | Token::FunctionName(_),
            ) => self.filter_expr(),
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.at_step_start() {
                    self.relative_path(Vec::new())?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let steps = self.relative_path(vec![descendant_or_self()])?;
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            _ if self.at_step_start() => Ok(Expr::Path {
                absolute: false,
                steps: self.relative_path(Vec::new())?,
            }),
            _ => Err(self.error(format!("expected expression, found {}", self.describe()))),
        }
    }

    fn filter_expr(&mut self) -> Result<Expr, XPathError> {
        let primary = self.primary_expr()?;
        let predicates = self.predicates()?;
        let steps = if self.eat(&Token::Slash) {
            self.relative_path(Vec::new())?
        } else if self.eat(&Token::DoubleSlash) {
            self.relative_path(vec![descendant_or_self()])?
        } else {
            Vec::new()
        };
        if predicates.is_empty() && steps.is_empty() {
            Ok(primary)
        } else {
            Ok(Expr::Filter {
                primary: Box::new(primary),
                predicates,
                steps,
            })
        }
    }

    fn primary_expr(&mut self) -> Result<Expr, XPathError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;
        match token {
            Token::Variable(name) => Ok(Expr::Variable(name)),
            Token::Literal(value) => Ok(Expr::Literal(value)),
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::LeftParen => {
                let inner = self.or_expr()?;
                self.expect(&Token::RightParen)?;
                Ok(inner)
            }
            Token::FunctionName(name) => {
                self.expect(&Token::LeftParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RightParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::RightParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Call { name, args })
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected '{other}'")))
            }
        }
    }

    fn at_step_start(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Dot
                    | Token::DotDot
                    | Token::At
                    | Token::NameTest(_)
                    | Token::NodeType(_)
                    | Token::AxisName(_)
            )
        )
    }

    fn relative_path(&mut self, mut steps: Vec<Step>) -> Result<Vec<Step>, XPathError> {
        steps.push(self.step()?);
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(descendant_or_self());
                steps.push(self.step()?);
            } else {
                return Ok(steps);
            }
        }
    }

    fn step(&mut self) -> Result<Step, XPathError> {
        if self.eat(&Token::Dot) {
            return Ok(Step::bare(Axis::SelfAxis, NodeTest::Node));
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step::bare(Axis::Parent, NodeTest::Node));
        }
        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let Some(Token::AxisName(name)) = self.peek().cloned() {
            let axis = Axis::from_name(&name)
                .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
            self.pos += 1;
            self.expect(&Token::ColonColon)?;
            axis
        } else {
            Axis::Child
        };
        let test = self.node_test()?;
        let predicates = self.predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn node_test(&mut self) -> Result<NodeTest, XPathError> {
        match self.peek().cloned() {
            Some(Token::NameTest(name)) => {
                self.pos += 1;
                Ok(if name == "*" {
                    NodeTest::Any
                } else if let Some(prefix) = name.strip_suffix(":*") {
                    NodeTest::AnyInPrefix(prefix.to_owned())
                } else {
                    NodeTest::Name(name)
                })
            }
            Some(Token::NodeType(kind)) => {
                self.pos += 1;
                self.expect(&Token::LeftParen)?;
                let test = match kind.as_str() {
                    "node" => NodeTest::Node,
                    "text" => NodeTest::Text,
                    "comment" => NodeTest::Comment,
                    _ => match self.peek().cloned() {
                        Some(Token::Literal(target)) => {
                            self.pos += 1;
                            NodeTest::ProcessingInstruction(Some(target))
                        }
                        _ => NodeTest::ProcessingInstruction(None),
                    },
                };
                self.expect(&Token::RightParen)?;
                Ok(test)
            }
            _ => Err(self.error(format!("expected a node test, found {}", self.describe()))),
        }
    }

    fn predicates(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LeftBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&Token::RightBracket)?;
        }
        Ok(predicates)
    }
}

fn descendant_or_self() -> Step {
    Step::bare(Axis::DescendantOrSelf, NodeTest::Node)
}
