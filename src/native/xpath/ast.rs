//! Abstract syntax tree for XPath 1.0 expressions.
//!
//! Produced by [`super::parser::parse`] and walked by the evaluator. Location
//! paths are kept as flat step lists; abbreviations (`//`, `.`, `..`, `@`)
//! are expanded by the parser so the evaluator only sees full axis steps.

use std::fmt;

/// A parsed XPath expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal.
    Number(f64),
    /// String literal.
    Literal(String),
    /// `$name` reference.
    Variable(String),
    /// Binary operator application.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Unary minus.
    Negate(Box<Expr>),
    /// `name(args...)`.
    Call {
        /// Function name as written.
        name: String,
        /// Argument expressions.
        args: Vec<Expr>,
    },
    /// A location path, absolute (starting at the root of the context
    /// node's tree) or relative to the context node.
    Path {
        /// `true` for paths starting with `/` or `//`.
        absolute: bool,
        /// The steps, applied left to right.
        steps: Vec<Step>,
    },
    /// A primary expression with predicates and an optional trailing path,
    /// as in `(//a)[1]/@href` or `id('x')//b`.
    Filter {
        /// The filtered expression; must evaluate to a node set when
        /// predicates or steps are present.
        primary: Box<Expr>,
        /// Predicates applied in document order.
        predicates: Vec<Expr>,
        /// Steps applied to the filtered set.
        steps: Vec<Step>,
    },
    /// `lhs | rhs`.
    Union(Box<Expr>, Box<Expr>),
}

/// Binary operators, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `or`
    Or,
    /// `and`
    And,
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `div`
    Div,
    /// `mod`
    Mod,
}

impl BinaryOp {
    /// Returns the operator as it is written in an expression.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "div",
            Self::Mod => "mod",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One step of a location path: `axis::test[pred]...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Direction of travel from each context node.
    pub axis: Axis,
    /// Filter on name or node kind.
    pub test: NodeTest,
    /// Predicates, evaluated in axis order.
    pub predicates: Vec<Expr>,
}

impl Step {
    /// A step with no predicates.
    #[must_use]
    pub const fn bare(axis: Axis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: Vec::new(),
        }
    }
}

/// The thirteen XPath axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// `child`
    Child,
    /// `descendant`
    Descendant,
    /// `parent`
    Parent,
    /// `ancestor`
    Ancestor,
    /// `following-sibling`
    FollowingSibling,
    /// `preceding-sibling`
    PrecedingSibling,
    /// `following`
    Following,
    /// `preceding`
    Preceding,
    /// `attribute`
    Attribute,
    /// `namespace`
    Namespace,
    /// `self`
    SelfAxis,
    /// `descendant-or-self`
    DescendantOrSelf,
    /// `ancestor-or-self`
    AncestorOrSelf,
}

impl Axis {
    const ALL: [Self; 13] = [
        Self::Child,
        Self::Descendant,
        Self::Parent,
        Self::Ancestor,
        Self::FollowingSibling,
        Self::PrecedingSibling,
        Self::Following,
        Self::Preceding,
        Self::Attribute,
        Self::Namespace,
        Self::SelfAxis,
        Self::DescendantOrSelf,
        Self::AncestorOrSelf,
    ];

    /// The axis name as written before `::`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Descendant => "descendant",
            Self::Parent => "parent",
            Self::Ancestor => "ancestor",
            Self::FollowingSibling => "following-sibling",
            Self::PrecedingSibling => "preceding-sibling",
            Self::Following => "following",
            Self::Preceding => "preceding",
            Self::Attribute => "attribute",
            Self::Namespace => "namespace",
            Self::SelfAxis => "self",
            Self::DescendantOrSelf => "descendant-or-self",
            Self::AncestorOrSelf => "ancestor-or-self",
        }
    }

    /// Looks an axis up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|axis| axis.name() == name)
    }

    /// Reverse axes number their nodes nearest-first for predicates.
    #[must_use]
    pub const fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::Parent
                | Self::Ancestor
                | Self::AncestorOrSelf
                | Self::Preceding
                | Self::PrecedingSibling
        )
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Node tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A (possibly prefixed) name, compared literally.
    Name(String),
    /// `*`
    Any,
    /// `prefix:*`
    AnyInPrefix(String),
    /// `node()`
    Node,
    /// `text()`, which also matches CDATA sections.
    Text,
    /// `comment()`
    Comment,
    /// `processing-instruction()` with an optional target literal.
    ProcessingInstruction(Option<String>),
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Any => f.write_str("*"),
            Self::AnyInPrefix(prefix) => write!(f, "{prefix}:*"),
            Self::Node => f.write_str("node()"),
            Self::Text => f.write_str("text()"),
            Self::Comment => f.write_str("comment()"),
            Self::ProcessingInstruction(None) => f.write_str("processing-instruction()"),
            Self::ProcessingInstruction(Some(target)) => {
                write!(f, "processing-instruction('{target}')")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_names_resolve() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_name(axis.name()), Some(axis));
        }
        assert_eq!(Axis::from_name("children"), None);
    }

    #[test]
    fn test_reverse_axes() {
        assert!(Axis::Ancestor.is_reverse());
        assert!(Axis::PrecedingSibling.is_reverse());
        assert!(!Axis::Descendant.is_reverse());
        assert!(!Axis::Attribute.is_reverse());
    }

    #[test]
    fn test_node_test_display() {
        assert_eq!(NodeTest::AnyInPrefix("svg".into()).to_string(), "svg:*");
        assert_eq!(
            NodeTest::ProcessingInstruction(Some("style".into())).to_string(),
            "processing-instruction('style')"
        );
        assert_eq!(BinaryOp::Neq.to_string(), "!=");
    }
}
