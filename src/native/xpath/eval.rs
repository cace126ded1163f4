//! Expression evaluation over the raw tree.
//!
//! Location steps are applied per context node: the axis is expanded in
//! axis order (nearest first for reverse axes), the node test filters it,
//! predicates see positions in that order, and the union over all context
//! nodes is put back into document order.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::ast::{Axis, BinaryOp, Expr, NodeTest, Step};
use super::{XPathContext, XPathError, XPathObject};
use crate::native::{
    node_string_value, XmlNode, XmlNodePtr, ATTRIBUTE_NODE, CDATA_SECTION_NODE, COMMENT_NODE,
    DOCUMENT_NODE, ELEMENT_NODE, HTML_DOCUMENT_NODE, PI_NODE, TEXT_NODE,
};

type Result<T> = std::result::Result<T, XPathError>;

// -------------------------------------------------------------------------
// Raw node access
// -------------------------------------------------------------------------

/// Reads a field of `node`.
///
/// Only nodes of the evaluator's document ever reach this function, and that
/// document stays alive for the whole evaluation (see [`Evaluator::new`]).
fn with<T>(node: XmlNodePtr, read: impl FnOnce(&XmlNode) -> T) -> T {
    // SAFETY: see above.
    read(unsafe { &*node })
}

fn kind(node: XmlNodePtr) -> i32 {
    with(node, |n| n.typ)
}

fn parent(node: XmlNodePtr) -> XmlNodePtr {
    with(node, |n| n.parent)
}

fn next(node: XmlNodePtr) -> XmlNodePtr {
    with(node, |n| n.next)
}

fn prev(node: XmlNodePtr) -> XmlNodePtr {
    with(node, |n| n.prev)
}

fn name(node: XmlNodePtr) -> String {
    with(node, |n| n.name.clone())
}

fn string_value(node: XmlNodePtr) -> String {
    // SAFETY: see `with`.
    unsafe { node_string_value(node) }
}

/// Nodes of the XPath data model. DTDs, entity references and declarations
/// are skipped by every axis.
fn is_model_node(node: XmlNodePtr) -> bool {
    matches!(
        kind(node),
        ELEMENT_NODE
            | ATTRIBUTE_NODE
            | TEXT_NODE
            | CDATA_SECTION_NODE
            | PI_NODE
            | COMMENT_NODE
            | DOCUMENT_NODE
            | HTML_DOCUMENT_NODE
    )
}

fn children(node: XmlNodePtr) -> Vec<XmlNodePtr> {
    let mut out = Vec::new();
    let mut child = with(node, |n| n.children);
    while !child.is_null() {
        if is_model_node(child) {
            out.push(child);
        }
        child = next(child);
    }
    out
}

fn attributes(node: XmlNodePtr) -> Vec<XmlNodePtr> {
    let mut out = Vec::new();
    if kind(node) == ELEMENT_NODE {
        let mut attr = with(node, |n| n.properties);
        while !attr.is_null() {
            out.push(attr);
            attr = next(attr);
        }
    }
    out
}

/// Appends the descendants of `node` in document order.
fn push_descendants(node: XmlNodePtr, out: &mut Vec<XmlNodePtr>) {
    let mut pending: Vec<XmlNodePtr> = children(node).into_iter().rev().collect();
    while let Some(next) = pending.pop() {
        out.push(next);
        pending.extend(children(next).into_iter().rev());
    }
}

fn ancestors(node: XmlNodePtr, out: &mut Vec<XmlNodePtr>) {
    let mut cur = parent(node);
    while !cur.is_null() {
        out.push(cur);
        cur = parent(cur);
    }
}

fn siblings(node: XmlNodePtr, step: fn(XmlNodePtr) -> XmlNodePtr, out: &mut Vec<XmlNodePtr>) {
    if kind(node) == ATTRIBUTE_NODE {
        return;
    }
    let mut cur = step(node);
    while !cur.is_null() {
        if is_model_node(cur) {
            out.push(cur);
        }
        cur = step(cur);
    }
}

/// Expands `axis` from `node`, in axis order.
fn axis_nodes(node: XmlNodePtr, axis: Axis) -> Vec<XmlNodePtr> {
    let mut out = Vec::new();
    match axis {
        Axis::Child => out = children(node),
        Axis::Descendant => push_descendants(node, &mut out),
        Axis::DescendantOrSelf => {
            out.push(node);
            push_descendants(node, &mut out);
        }
        Axis::Parent => {
            let p = parent(node);
            if !p.is_null() {
                out.push(p);
            }
        }
        Axis::Ancestor => ancestors(node, &mut out),
        Axis::AncestorOrSelf => {
            out.push(node);
            ancestors(node, &mut out);
        }
        Axis::FollowingSibling => siblings(node, next, &mut out),
        Axis::PrecedingSibling => siblings(node, prev, &mut out),
        Axis::Following => {
            let mut cur = node;
            if kind(node) == ATTRIBUTE_NODE {
                cur = parent(node);
                push_descendants(cur, &mut out);
            }
            while !cur.is_null() {
                let mut later = Vec::new();
                siblings(cur, next, &mut later);
                for sibling in later {
                    out.push(sibling);
                    push_descendants(sibling, &mut out);
                }
                cur = parent(cur);
            }
        }
        Axis::Preceding => {
            let mut cur = if kind(node) == ATTRIBUTE_NODE {
                parent(node)
            } else {
                node
            };
            while !cur.is_null() {
                let mut earlier = Vec::new();
                siblings(cur, prev, &mut earlier);
                for sibling in earlier {
                    let mut subtree = vec![sibling];
                    push_descendants(sibling, &mut subtree);
                    out.extend(subtree.into_iter().rev());
                }
                cur = parent(cur);
            }
        }
        Axis::Attribute => out = attributes(node),
        Axis::Namespace => {}
        Axis::SelfAxis => out.push(node),
    }
    out
}

fn matches_test(node: XmlNodePtr, test: &NodeTest, axis: Axis) -> bool {
    let principal = if axis == Axis::Attribute {
        ATTRIBUTE_NODE
    } else {
        ELEMENT_NODE
    };
    let typ = kind(node);
    match test {
        NodeTest::Node => true,
        NodeTest::Any => typ == principal,
        NodeTest::Name(wanted) => typ == principal && with(node, |n| n.name == *wanted),
        NodeTest::AnyInPrefix(prefix) => {
            typ == principal
                && with(node, |n| {
                    n.name
                        .split_once(':')
                        .is_some_and(|(p, _)| p == prefix)
                })
        }
        NodeTest::Text => matches!(typ, TEXT_NODE | CDATA_SECTION_NODE),
        NodeTest::Comment => typ == COMMENT_NODE,
        NodeTest::ProcessingInstruction(target) => {
            typ == PI_NODE
                && target
                    .as_ref()
                    .map_or(true, |t| with(node, |n| n.name == *t))
        }
    }
}

// -------------------------------------------------------------------------
// Document order
// -------------------------------------------------------------------------

/// Preorder ranks, filled lazily once per evaluation: an element ranks
/// before its attributes, attributes before children. The document tree is
/// ranked first; a detached subtree is ranked after it, when one of its
/// nodes first needs sorting.
struct DocumentOrder {
    top: XmlNodePtr,
    rank: HashMap<XmlNodePtr, usize>,
}

impl DocumentOrder {
    fn new(top: XmlNodePtr) -> Self {
        Self {
            top,
            rank: HashMap::new(),
        }
    }

    fn rank_tree(&mut self, top: XmlNodePtr) {
        let mut pending = vec![top];
        while let Some(node) = pending.pop() {
            let next = self.rank.len();
            self.rank.insert(node, next);
            for attr in attributes(node) {
                let next = self.rank.len();
                self.rank.insert(attr, next);
            }
            pending.extend(children(node).into_iter().rev());
        }
    }

    fn rank(&mut self, node: XmlNodePtr) -> usize {
        if self.rank.is_empty() && !self.top.is_null() {
            self.rank_tree(self.top);
        }
        if let Some(&rank) = self.rank.get(&node) {
            return rank;
        }
        let mut top = node;
        while !parent(top).is_null() {
            top = parent(top);
        }
        self.rank_tree(top);
        self.rank.get(&node).copied().unwrap_or(usize::MAX)
    }

    /// Removes duplicates and sorts into document order.
    fn sort(&mut self, nodes: &mut Vec<XmlNodePtr>) {
        let mut seen = HashSet::with_capacity(nodes.len());
        nodes.retain(|&n| seen.insert(n));
        if nodes.len() > 1 {
            nodes.sort_by_cached_key(|&n| self.rank(n));
        }
    }
}

// -------------------------------------------------------------------------
// Conversions (XPath 1.0 §4)
// -------------------------------------------------------------------------

fn boolean_of(value: &XPathObject) -> bool {
    match value {
        XPathObject::NodeSet(nodes) => !nodes.is_empty(),
        XPathObject::Boolean(b) => *b,
        XPathObject::Number(n) => *n != 0.0 && !n.is_nan(),
        XPathObject::String(s) => !s.is_empty(),
    }
}

fn number_of(value: &XPathObject) -> f64 {
    match value {
        XPathObject::Boolean(b) => f64::from(u8::from(*b)),
        XPathObject::Number(n) => *n,
        _ => parse_number(&string_of(value)),
    }
}

fn string_of(value: &XPathObject) -> String {
    match value {
        XPathObject::NodeSet(nodes) => nodes.first().map_or_else(String::new, |&n| string_value(n)),
        XPathObject::Boolean(b) => b.to_string(),
        XPathObject::Number(n) => format_number(*n),
        XPathObject::String(s) => s.clone(),
    }
}

fn is_xpath_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Parses the XPath `Number` production, surrounded by optional whitespace.
/// Anything else (exponents, a leading `+`, `Infinity`) is NaN.
fn parse_number(text: &str) -> f64 {
    let text = text.trim_matches(is_xpath_space);
    let digits = text.strip_prefix('-').unwrap_or(text);
    let well_formed = digits.bytes().any(|b| b.is_ascii_digit())
        && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && digits.bytes().filter(|&b| b == b'.').count() <= 1;
    if well_formed {
        text.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

/// Formats a number the way `string()` does: integers without a fraction,
/// `NaN`, `Infinity`, `-Infinity`, and never `-0` or an exponent.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n == 0.0 {
        "0".to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e18 {
        #[allow(clippy::cast_possible_truncation)]
        let whole = n as i64;
        whole.to_string()
    } else {
        format!("{n}")
    }
}

fn round_half_up(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() || n.fract() == 0.0 {
        n
    } else if (-0.5..0.0).contains(&n) {
        -0.0
    } else {
        (n + 0.5).floor()
    }
}

fn flipped(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Lte => BinaryOp::Gte,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Gte => BinaryOp::Lte,
        other => other,
    }
}

#[allow(clippy::float_cmp)]
fn compare_numbers(op: BinaryOp, a: f64, b: f64) -> bool {
    match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Neq => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::Lte => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Gte => a >= b,
        _ => unreachable!("{op} is not a comparison"),
    }
}

/// Compares two non-node-set values.
fn compare_atoms(op: BinaryOp, lhs: &XPathObject, rhs: &XPathObject) -> bool {
    use XPathObject::{Boolean, Number};
    if !matches!(op, BinaryOp::Eq | BinaryOp::Neq) {
        return compare_numbers(op, number_of(lhs), number_of(rhs));
    }
    let equal = match (lhs, rhs) {
        (Boolean(_), _) | (_, Boolean(_)) => boolean_of(lhs) == boolean_of(rhs),
        (Number(_), _) | (_, Number(_)) => {
            return compare_numbers(op, number_of(lhs), number_of(rhs));
        }
        _ => string_of(lhs) == string_of(rhs),
    };
    equal == (op == BinaryOp::Eq)
}

fn compare_node_set(op: BinaryOp, nodes: &[XmlNodePtr], other: &XPathObject) -> bool {
    if let XPathObject::Boolean(_) = other {
        return compare_atoms(op, &XPathObject::Boolean(!nodes.is_empty()), other);
    }
    nodes
        .iter()
        .any(|&n| compare_atoms(op, &XPathObject::String(string_value(n)), other))
}

fn compare(op: BinaryOp, lhs: &XPathObject, rhs: &XPathObject) -> bool {
    match (lhs, rhs) {
        (XPathObject::NodeSet(left), XPathObject::NodeSet(right)) => {
            let right: Vec<XPathObject> = right
                .iter()
                .map(|&n| XPathObject::String(string_value(n)))
                .collect();
            left.iter().any(|&n| {
                let value = XPathObject::String(string_value(n));
                right.iter().any(|r| compare_atoms(op, &value, r))
            })
        }
        (XPathObject::NodeSet(nodes), other) => compare_node_set(op, nodes, other),
        (other, XPathObject::NodeSet(nodes)) => compare_node_set(flipped(op), nodes, other),
        _ => compare_atoms(op, lhs, rhs),
    }
}

fn into_node_set(value: XPathObject) -> Result<Vec<XmlNodePtr>> {
    match value {
        XPathObject::NodeSet(nodes) => Ok(nodes),
        other => Err(XPathError::Type {
            expected: "node-set",
            found: other.type_name(),
        }),
    }
}

fn check_arity(name: &str, args: &[Expr], min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&args.len()) {
        Ok(())
    } else {
        Err(XPathError::ArgumentCount {
            function: name.to_owned(),
            found: args.len(),
        })
    }
}

// -------------------------------------------------------------------------
// Evaluator
// -------------------------------------------------------------------------

/// Evaluation state: the context plus the focus (node, position, size).
pub(super) struct Evaluator<'c> {
    ctx: &'c XPathContext,
    node: XmlNodePtr,
    position: usize,
    size: usize,
    order: Rc<RefCell<DocumentOrder>>,
}

impl<'c> Evaluator<'c> {
    /// Creates an evaluator focused on `node`.
    ///
    /// # Safety
    ///
    /// `ctx.doc` and `node` must be live, `node` must belong to `ctx.doc`,
    /// and the tree must not change while the evaluator exists.
    pub(super) unsafe fn new(ctx: &'c XPathContext, node: XmlNodePtr) -> Self {
        // SAFETY: forwarded from the caller.
        let top = unsafe { (*ctx.doc).node };
        Self {
            ctx,
            node,
            position: 1,
            size: 1,
            order: Rc::new(RefCell::new(DocumentOrder::new(top))),
        }
    }

    fn focus(&self, node: XmlNodePtr, position: usize, size: usize) -> Self {
        Self {
            ctx: self.ctx,
            node,
            position,
            size,
            order: Rc::clone(&self.order),
        }
    }

    fn sort_document_order(&self, nodes: &mut Vec<XmlNodePtr>) {
        self.order.borrow_mut().sort(nodes);
    }

    pub(super) fn evaluate(&self, expr: &Expr) -> Result<XPathObject> {
        match expr {
            Expr::Number(n) => Ok(XPathObject::Number(*n)),
            Expr::Literal(s) => Ok(XPathObject::String(s.clone())),
            Expr::Variable(name) => self
                .ctx
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| XPathError::UndefinedVariable(name.clone())),
            Expr::Negate(inner) => Ok(XPathObject::Number(-number_of(&self.evaluate(inner)?))),
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expr::Call { name, args } => self.call(name, args),
            Expr::Path { absolute, steps } => {
                let start = if *absolute {
                    // SAFETY: the context document is live for the evaluation.
                    unsafe { (*self.ctx.doc).node }
                } else {
                    self.node
                };
                Ok(XPathObject::NodeSet(self.apply_steps(vec![start], steps)?))
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut nodes = into_node_set(self.evaluate(primary)?)?;
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate)?;
                }
                Ok(XPathObject::NodeSet(self.apply_steps(nodes, steps)?))
            }
            Expr::Union(lhs, rhs) => {
                let mut nodes = into_node_set(self.evaluate(lhs)?)?;
                nodes.extend(into_node_set(self.evaluate(rhs)?)?);
                self.sort_document_order(&mut nodes);
                Ok(XPathObject::NodeSet(nodes))
            }
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<XPathObject> {
        match op {
            BinaryOp::Or => Ok(XPathObject::Boolean(
                boolean_of(&self.evaluate(lhs)?) || boolean_of(&self.evaluate(rhs)?),
            )),
            BinaryOp::And => Ok(XPathObject::Boolean(
                boolean_of(&self.evaluate(lhs)?) && boolean_of(&self.evaluate(rhs)?),
            )),
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::Gt
            | BinaryOp::Gte => Ok(XPathObject::Boolean(compare(
                op,
                &self.evaluate(lhs)?,
                &self.evaluate(rhs)?,
            ))),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let a = number_of(&self.evaluate(lhs)?);
                let b = number_of(&self.evaluate(rhs)?);
                Ok(XPathObject::Number(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                }))
            }
        }
    }

    fn apply_steps(&self, mut nodes: Vec<XmlNodePtr>, steps: &[Step]) -> Result<Vec<XmlNodePtr>> {
        for step in steps {
            let mut selected = Vec::new();
            for &node in &nodes {
                let mut candidates: Vec<XmlNodePtr> = axis_nodes(node, step.axis)
                    .into_iter()
                    .filter(|&n| matches_test(n, &step.test, step.axis))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.filter(candidates, predicate)?;
                }
                selected.extend(candidates);
            }
            // One context node yields each axis in axis order, without
            // duplicates.
            if nodes.len() == 1 {
                if step.axis.is_reverse() {
                    selected.reverse();
                }
            } else {
                self.sort_document_order(&mut selected);
            }
            nodes = selected;
        }
        Ok(nodes)
    }

    /// Keeps the nodes for which `predicate` holds. A numeric predicate
    /// selects by position.
    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    fn filter(&self, nodes: Vec<XmlNodePtr>, predicate: &Expr) -> Result<Vec<XmlNodePtr>> {
        let size = nodes.len();
        let mut kept = Vec::new();
        for (index, node) in nodes.into_iter().enumerate() {
            let value = self.focus(node, index + 1, size).evaluate(predicate)?;
            let keep = match value {
                XPathObject::Number(n) => n == (index + 1) as f64,
                other => boolean_of(&other),
            };
            if keep {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    /// Evaluates the optional node-set argument of `name()` and friends,
    /// defaulting to the context node.
    fn first_node_arg(&self, args: &[Expr]) -> Result<Option<XmlNodePtr>> {
        match args.first() {
            Some(arg) => Ok(into_node_set(self.evaluate(arg)?)?.first().copied()),
            None => Ok(Some(self.node)),
        }
    }

    fn string_arg(&self, args: &[Expr], index: usize) -> Result<String> {
        match args.get(index) {
            Some(arg) => Ok(string_of(&self.evaluate(arg)?)),
            None => Ok(string_value(self.node)),
        }
    }

    fn number_arg(&self, args: &[Expr], index: usize) -> Result<f64> {
        match args.get(index) {
            Some(arg) => Ok(number_of(&self.evaluate(arg)?)),
            None => Ok(parse_number(&string_value(self.node))),
        }
    }

    #[allow(clippy::too_many_lines, clippy::cast_precision_loss)]
    fn call(&self, name: &str, args: &[Expr]) -> Result<XPathObject> {
        use XPathObject::{Boolean, Number, String as Str};
        let value = match name {
            "last" => {
                check_arity(name, args, 0, 0)?;
                Number(self.size as f64)
            }
            "position" => {
                check_arity(name, args, 0, 0)?;
                Number(self.position as f64)
            }
            "count" => {
                check_arity(name, args, 1, 1)?;
                Number(into_node_set(self.evaluate(&args[0])?)?.len() as f64)
            }
            "id" => {
                check_arity(name, args, 1, 1)?;
                let wanted: Vec<String> = match self.evaluate(&args[0])? {
                    XPathObject::NodeSet(nodes) => nodes.into_iter().map(string_value).collect(),
                    other => vec![string_of(&other)],
                };
                let ids: HashSet<&str> = wanted
                    .iter()
                    .flat_map(|s| s.split(is_xpath_space))
                    .filter(|s| !s.is_empty())
                    .collect();
                XPathObject::NodeSet(self.elements_with_id(&ids))
            }
            "local-name" | "name" | "namespace-uri" => {
                check_arity(name, args, 0, 1)?;
                let node = self.first_node_arg(args)?;
                let qname = node
                    .filter(|&n| matches!(kind(n), ELEMENT_NODE | ATTRIBUTE_NODE | PI_NODE))
                    .map(self::name)
                    .unwrap_or_default();
                Str(match name {
                    "name" => qname,
                    "local-name" => match qname.split_once(':') {
                        Some((_, local)) => local.to_owned(),
                        None => qname,
                    },
                    _ => String::new(),
                })
            }
            "string" => {
                check_arity(name, args, 0, 1)?;
                Str(self.string_arg(args, 0)?)
            }
            "concat" => {
                check_arity(name, args, 2, usize::MAX)?;
                let mut out = String::new();
                for arg in args {
                    out.push_str(&string_of(&self.evaluate(arg)?));
                }
                Str(out)
            }
            "starts-with" | "contains" | "substring-before" | "substring-after" => {
                check_arity(name, args, 2, 2)?;
                let haystack = self.string_arg(args, 0)?;
                let needle = self.string_arg(args, 1)?;
                match name {
                    "starts-with" => Boolean(haystack.starts_with(&needle)),
                    "contains" => Boolean(haystack.contains(&needle)),
                    "substring-before" => Str(haystack
                        .find(&needle)
                        .map_or_else(String::new, |at| haystack[..at].to_owned())),
                    _ => Str(haystack
                        .find(&needle)
                        .map_or_else(String::new, |at| haystack[at + needle.len()..].to_owned())),
                }
            }
            "substring" => {
                check_arity(name, args, 2, 3)?;
                let text = self.string_arg(args, 0)?;
                let start = round_half_up(self.number_arg(args, 1)?);
                let end = match args.get(2) {
                    Some(_) => start + round_half_up(self.number_arg(args, 2)?),
                    None => f64::INFINITY,
                };
                Str(text
                    .chars()
                    .enumerate()
                    .filter(|&(i, _)| {
                        let p = (i + 1) as f64;
                        p >= start && p < end
                    })
                    .map(|(_, c)| c)
                    .collect())
            }
            "string-length" => {
                check_arity(name, args, 0, 1)?;
                Number(self.string_arg(args, 0)?.chars().count() as f64)
            }
            "normalize-space" => {
                check_arity(name, args, 0, 1)?;
                let text = self.string_arg(args, 0)?;
                let words: Vec<&str> = text.split(is_xpath_space).filter(|w| !w.is_empty()).collect();
                Str(words.join(" "))
            }
            "translate" => {
                check_arity(name, args, 3, 3)?;
                let text = self.string_arg(args, 0)?;
                let from: Vec<char> = self.string_arg(args, 1)?.chars().collect();
                let to: Vec<char> = self.string_arg(args, 2)?.chars().collect();
                Str(text
                    .chars()
                    .filter_map(|c| match from.iter().position(|&f| f == c) {
                        Some(i) => to.get(i).copied(),
                        None => Some(c),
                    })
                    .collect())
            }
            "boolean" => {
                check_arity(name, args, 1, 1)?;
                Boolean(boolean_of(&self.evaluate(&args[0])?))
            }
            "not" => {
                check_arity(name, args, 1, 1)?;
                Boolean(!boolean_of(&self.evaluate(&args[0])?))
            }
            "true" | "false" => {
                check_arity(name, args, 0, 0)?;
                Boolean(name == "true")
            }
            "lang" => {
                check_arity(name, args, 1, 1)?;
                let wanted = self.string_arg(args, 0)?.to_ascii_lowercase();
                Boolean(self.language().is_some_and(|lang| {
                    let lang = lang.to_ascii_lowercase();
                    lang == wanted
                        || lang
                            .strip_prefix(wanted.as_str())
                            .is_some_and(|rest| rest.starts_with('-'))
                }))
            }
            "number" => {
                check_arity(name, args, 0, 1)?;
                Number(self.number_arg(args, 0)?)
            }
            "sum" => {
                check_arity(name, args, 1, 1)?;
                let nodes = into_node_set(self.evaluate(&args[0])?)?;
                Number(nodes.into_iter().map(|n| parse_number(&string_value(n))).sum())
            }
            "floor" | "ceiling" | "round" => {
                check_arity(name, args, 1, 1)?;
                let n = self.number_arg(args, 0)?;
                Number(match name {
                    "floor" => n.floor(),
                    "ceiling" => n.ceil(),
                    _ => round_half_up(n),
                })
            }
            _ => return Err(XPathError::UnknownFunction(name.to_owned())),
        };
        Ok(value)
    }

    /// The nearest `xml:lang` on the context node or an ancestor; HTML
    /// documents also honor plain `lang`.
    fn language(&self) -> Option<String> {
        // SAFETY: the context document is live for the evaluation.
        let html = unsafe { (*self.ctx.doc).is_html() };
        let mut cur = self.node;
        while !cur.is_null() {
            for attr in attributes(cur) {
                let attr_name = name(attr);
                if attr_name == "xml:lang" || (html && attr_name == "lang") {
                    return Some(with(attr, |a| a.content.clone()));
                }
            }
            cur = parent(cur);
        }
        None
    }

    fn elements_with_id(&self, ids: &HashSet<&str>) -> Vec<XmlNodePtr> {
        if ids.is_empty() {
            return Vec::new();
        }
        let mut all = Vec::new();
        // SAFETY: the context document is live for the evaluation.
        push_descendants(unsafe { (*self.ctx.doc).node }, &mut all);
        all.into_iter()
            .filter(|&n| {
                attributes(n).into_iter().any(|attr| {
                    matches!(name(attr).as_str(), "id" | "xml:id")
                        && with(attr, |a| ids.contains(a.content.as_str()))
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::native::xpath::{eval_expression, free_context, free_object, new_context};
    use crate::native::{
        add_child, doc_set_root_element, free_doc, live_counts, new_doc, new_node, parser::parse_str,
    };
    use pretty_assertions::assert_eq;

    /// Evaluates `expr` at the document node and renders node sets as
    /// `name=string-value` pairs so nothing outlives the document.
    fn eval(xml: &str, expr: &str) -> std::result::Result<String, XPathError> {
        let doc = parse_str(xml).unwrap();
        let ctx = new_context(doc);
        let rendered = unsafe {
            eval_expression(ctx, (*doc).node, expr).map(|obj| {
                let out = match &*obj {
                    XPathObject::NodeSet(nodes) => nodes
                        .iter()
                        .map(|&n| format!("{}={}", name(n), string_value(n)))
                        .collect::<Vec<_>>()
                        .join(" "),
                    other => other.to_string(),
                };
                free_object(obj);
                out
            })
        };
        unsafe {
            free_context(ctx);
            free_doc(doc);
        }
        rendered
    }

    fn ok(xml: &str, expr: &str) -> String {
        eval(xml, expr).unwrap()
    }

    const BOOKS: &str = "<lib><book id='b1' price='10'><t>A</t></book>\
        <book id='b2' price='25'><t>B</t></book><book id='b3' price='7'><t>C</t></book></lib>";

    #[test]
    fn test_arithmetic_and_numbers() {
        assert_eq!(ok("<r/>", "1 + 2 * 3"), "7");
        assert_eq!(ok("<r/>", "7 mod 3"), "1");
        assert_eq!(ok("<r/>", "1 div 0"), "Infinity");
        assert_eq!(ok("<r/>", "0 div 0"), "NaN");
        assert_eq!(ok("<r/>", "-(3)"), "-3");
        assert_eq!(ok("<r/>", "0.5 + 0.25"), "0.75");
        assert_eq!(ok("<r/>", "number(' 12 ')"), "12");
        assert_eq!(ok("<r/>", "number('1e3')"), "NaN");
    }

    #[test]
    fn test_paths_in_document_order() {
        assert_eq!(ok(BOOKS, "//t"), "t=A t=B t=C");
        assert_eq!(ok(BOOKS, "/lib/book[2]/t"), "t=B");
        assert_eq!(ok(BOOKS, "//book[last()]/@id"), "id=b3");
        assert_eq!(ok(BOOKS, "//book[@price > 9]/@id"), "id=b1 id=b2");
        assert_eq!(ok(BOOKS, "//t | //book[1]"), "book=A t=A t=B t=C");
    }

    #[test]
    fn test_empty_match_is_empty_node_set() {
        assert_eq!(ok(BOOKS, "//missing"), "");
        assert_eq!(ok(BOOKS, "count(//missing)"), "0");
    }

    #[test]
    fn test_reverse_axis_positions() {
        let xml = "<a><b><c><d/></c></b></a>";
        assert_eq!(ok(xml, "//d/ancestor::*[1]"), "c=");
        assert_eq!(ok(xml, "//d/ancestor::*[last()]"), "a=");
        assert_eq!(ok(xml, "count(//d/ancestor-or-self::node())"), "5");
        let xml = "<r><x>1</x><x>2</x><x>3</x></r>";
        assert_eq!(ok(xml, "//x[3]/preceding-sibling::x[1]"), "x=2");
        assert_eq!(ok(xml, "//x[1]/following-sibling::x"), "x=2 x=3");
    }

    #[test]
    fn test_following_and_preceding() {
        let xml = "<r><a><b/></a><c><d/></c><e/></r>";
        assert_eq!(ok(xml, "//b/following::*"), "c= d= e=");
        assert_eq!(ok(xml, "//d/preceding::*"), "a= b=");
        assert_eq!(ok(xml, "//d/preceding::*[1]"), "b=");
    }

    #[test]
    fn test_attribute_axis() {
        let xml = "<r a='1' b='2'><x a='3'/></r>";
        assert_eq!(ok(xml, "/r/@*"), "a=1 b=2");
        assert_eq!(ok(xml, "//@a"), "a=1 a=3");
        assert_eq!(ok(xml, "count(//@a/..)"), "2");
        assert_eq!(ok(xml, "name(/r/@b)"), "b");
    }

    #[test]
    fn test_node_type_tests() {
        let xml = "<r>t<!--c--><?pi data?><![CDATA[x]]></r>";
        assert_eq!(ok(xml, "count(/r/node())"), "4");
        assert_eq!(ok(xml, "count(/r/text())"), "2");
        assert_eq!(ok(xml, "string(/r/comment())"), "c");
        assert_eq!(ok(xml, "string(/r/processing-instruction('pi'))"), "data");
        assert_eq!(ok(xml, "count(/r/processing-instruction('other'))"), "0");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(ok(BOOKS, "//book/@id = 'b2'"), "true");
        assert_eq!(ok(BOOKS, "//book/@id != 'b2'"), "true");
        assert_eq!(ok(BOOKS, "//book/@price > 20"), "true");
        assert_eq!(ok(BOOKS, "30 < //book/@price"), "false");
        assert_eq!(ok(BOOKS, "//missing = false()"), "true");
        assert_eq!(ok("<r/>", "'1' = 1.0"), "true");
        assert_eq!(ok("<r/>", "true() = 'x'"), "true");
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(ok("<r/>", "concat('a', 'b', 1)"), "ab1");
        assert_eq!(ok("<r/>", "substring('12345', 2, 3)"), "234");
        assert_eq!(ok("<r/>", "substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(ok("<r/>", "substring('12345', 0 div 0, 3)"), "");
        assert_eq!(ok("<r/>", "substring('12345', -42, 1 div 0)"), "12345");
        assert_eq!(ok("<r/>", "substring-before('1999/04/01', '/')"), "1999");
        assert_eq!(ok("<r/>", "substring-after('1999/04/01', '/')"), "04/01");
        assert_eq!(ok("<r/>", "normalize-space('  a \n b  ')"), "a b");
        assert_eq!(ok("<r/>", "translate('--aaa--', 'abc-', 'ABC')"), "AAA");
        assert_eq!(ok("<r/>", "string-length('héllo')"), "5");
        assert_eq!(ok(BOOKS, "string(//book[2])"), "B");
    }

    #[test]
    fn test_number_functions() {
        assert_eq!(ok(BOOKS, "sum(//@price)"), "42");
        assert_eq!(ok("<r/>", "round(2.5)"), "3");
        assert_eq!(ok("<r/>", "round(-2.5)"), "-2");
        assert_eq!(ok("<r/>", "floor(-1.5)"), "-2");
        assert_eq!(ok("<r/>", "ceiling(1.1)"), "2");
    }

    #[test]
    fn test_id_and_lang() {
        assert_eq!(ok(BOOKS, "id('b3 b1')/t"), "t=A t=C");
        let xml = "<r xml:lang='en-GB'><p/><q xml:lang='de'/></r>";
        assert_eq!(ok(xml, "count(//p[lang('en')])"), "1");
        assert_eq!(ok(xml, "count(//q[lang('en')])"), "0");
    }

    #[test]
    fn test_local_name_of_prefixed_element() {
        let xml = "<svg:svg xmlns:svg='urn:svg'><svg:rect/></svg:svg>";
        assert_eq!(ok(xml, "local-name(//svg:rect)"), "rect");
        assert_eq!(ok(xml, "count(/svg:svg/svg:*)"), "1");
    }

    #[test]
    fn test_evaluation_errors() {
        assert_eq!(
            eval("<r/>", "nope()").unwrap_err(),
            XPathError::UnknownFunction("nope".into())
        );
        assert!(matches!(
            eval("<r/>", "count(1)").unwrap_err(),
            XPathError::Type { .. }
        ));
        assert!(matches!(
            eval("<r/>", "concat('a')").unwrap_err(),
            XPathError::ArgumentCount { .. }
        ));
        assert!(matches!(
            eval("<r/>", "'a' | //r").unwrap_err(),
            XPathError::Type { .. }
        ));
    }

    #[test]
    fn test_no_leaks_after_many_evaluations() {
        let before = live_counts();
        for _ in 0..10 {
            ok(BOOKS, "//book[@price < 20]/t");
            let _ = eval(BOOKS, "bad(");
        }
        assert_eq!(live_counts(), before);
    }

    #[test]
    fn test_wide_and_deep_trees() {
        let wide = format!("<r>{}</r>", "<a/>".repeat(20_000));
        assert_eq!(ok(&wide, "count(//a)"), "20000");
        assert_eq!(ok(&wide, "count(/r/a[position() > 19990] | /r/a[3])"), "11");
        assert_eq!(ok(&wide, "count(//a[last()]/preceding-sibling::a)"), "19999");

        let doc = new_doc(None, false);
        let ctx = new_context(doc);
        unsafe {
            let mut top = new_node(doc, TEXT_NODE, "#text", "leaf");
            for _ in 0..100_000 {
                let parent = new_node(doc, ELEMENT_NODE, "d", "");
                add_child(parent, top);
                top = parent;
            }
            doc_set_root_element(doc, top);
            let obj = eval_expression(ctx, top, "count(//d) + string-length(//text())").unwrap();
            assert_eq!(*obj, XPathObject::Number(100_004.0));
            free_object(obj);
            free_context(ctx);
            free_doc(doc);
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(parse_number("-.5"), -0.5);
        assert!(parse_number("+1").is_nan());
        assert!(parse_number(".").is_nan());
    }
}
