//! Abstract syntax tree for sable expressions.
//!
//! A [`Node`] is a tagged tree node carrying its [`Location`] and, once the
//! checker has run, its inferred [`Type`]. Structural equality (`==`) ignores
//! both, so two trees parsed from differently formatted text compare equal.

use std::fmt;

use crate::source::{Location, Source};
use crate::ty::Type;

/// A node in the syntax tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub location: Location,
    /// Inferred type, filled in by the checker
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // Literals
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),

    // Names
    Identifier(String),
    /// Closure parameter reference: `#` (empty name), `#index`, `#acc`.
    Pointer(String),
    /// A value prepared by the optimizer and stored in the constant pool.
    Constant(Constant),
    /// `let name = value; expr`
    VariableDeclarator {
        name: String,
        value: Box<Node>,
        expr: Box<Node>,
    },

    // Structured
    Array(Vec<Node>),
    /// Map literal; every element is a `Pair`.
    Map(Vec<Node>),
    Pair {
        key: Box<Node>,
        value: Box<Node>,
    },

    // Access
    Member {
        receiver: Box<Node>,
        property: Box<Node>,
        optional: bool,
        method: bool,
    },
    Slice {
        receiver: Box<Node>,
        from: Option<Box<Node>>,
        to: Option<Box<Node>>,
    },
    /// Root of an optional chain; a nil receiver anywhere inside short-circuits here.
    Chain(Box<Node>),

    // Operations
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Conditional {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },

    // Calls
    Call {
        callee: Box<Node>,
        arguments: Vec<Node>,
    },
    Builtin {
        name: String,
        arguments: Vec<Node>,
    },
    /// Single-parameter lambda; the parameter is always `#`.
    Closure(Box<Node>),
}

/// Optimizer-built constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Literal members of an `in` right-hand side.
    Set(Vec<Node>),
    /// A `matches` pattern that compiled at check time.
    Regex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logic
    And,
    Or,
    Coalesce,
    // Membership and string predicates
    In,
    NotIn,
    Matches,
    Contains,
    StartsWith,
    EndsWith,
    Range,
}

impl UnaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "-" => Some(UnaryOp::Neg),
            "+" => Some(UnaryOp::Plus),
            "!" | "not" => Some(UnaryOp::Not),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
        }
    }
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Mod,
            "**" | "^" => BinaryOp::Pow,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "&&" | "and" => BinaryOp::And,
            "||" | "or" => BinaryOp::Or,
            "??" => BinaryOp::Coalesce,
            "in" => BinaryOp::In,
            "not in" => BinaryOp::NotIn,
            "matches" => BinaryOp::Matches,
            "contains" => BinaryOp::Contains,
            "startsWith" => BinaryOp::StartsWith,
            "endsWith" => BinaryOp::EndsWith,
            ".." => BinaryOp::Range,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Matches => "matches",
            BinaryOp::Contains => "contains",
            BinaryOp::StartsWith => "startsWith",
            BinaryOp::EndsWith => "endsWith",
            BinaryOp::Range => "..",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow
        )
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }
}

impl Node {
    pub fn new(kind: NodeKind, location: Location) -> Self {
        Self {
            kind,
            location,
            ty: None,
        }
    }

    pub fn typed(kind: NodeKind, location: Location, ty: Type) -> Self {
        Self {
            kind,
            location,
            ty: Some(ty),
        }
    }

    /// The inferred type, `Unknown` before checking.
    pub fn ty(&self) -> Type {
        self.ty.clone().unwrap_or(Type::Unknown)
    }

    pub fn set_type(&mut self, ty: Type) {
        self.ty = Some(ty);
    }

    /// Replace this node, keeping the original location.
    pub fn patch(&mut self, mut replacement: Node) {
        replacement.location = self.location;
        *self = replacement;
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Nil
                | NodeKind::Bool(_)
                | NodeKind::Integer(_)
                | NodeKind::Float(_)
                | NodeKind::String(_)
        )
    }

    /// Literal string value of a property or key node.
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Nil
            | NodeKind::Bool(_)
            | NodeKind::Integer(_)
            | NodeKind::Float(_)
            | NodeKind::String(_)
            | NodeKind::Identifier(_)
            | NodeKind::Pointer(_) => Vec::new(),
            NodeKind::Constant(Constant::Set(items)) => items.iter().collect(),
            NodeKind::Constant(Constant::Regex(_)) => Vec::new(),
            NodeKind::VariableDeclarator { value, expr, .. } => vec![value, expr],
            NodeKind::Array(items) | NodeKind::Map(items) => items.iter().collect(),
            NodeKind::Pair { key, value } => vec![key, value],
            NodeKind::Member {
                receiver, property, ..
            } => vec![receiver, property],
            NodeKind::Slice { receiver, from, to } => {
                let mut children = vec![receiver.as_ref()];
                children.extend(from.as_deref());
                children.extend(to.as_deref());
                children
            }
            NodeKind::Chain(inner) | NodeKind::Closure(inner) => vec![inner],
            NodeKind::Unary { operand, .. } => vec![operand],
            NodeKind::Binary { left, right, .. } => vec![left, right],
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            NodeKind::Call { callee, arguments } => {
                let mut children = vec![callee.as_ref()];
                children.extend(arguments.iter());
                children
            }
            NodeKind::Builtin { arguments, .. } => arguments.iter().collect(),
        }
    }

    /// Mutable direct children in evaluation order.
    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        match &mut self.kind {
            NodeKind::Nil
            | NodeKind::Bool(_)
            | NodeKind::Integer(_)
            | NodeKind::Float(_)
            | NodeKind::String(_)
            | NodeKind::Identifier(_)
            | NodeKind::Pointer(_) => Vec::new(),
            NodeKind::Constant(Constant::Set(items)) => items.iter_mut().collect(),
            NodeKind::Constant(Constant::Regex(_)) => Vec::new(),
            NodeKind::VariableDeclarator { value, expr, .. } => vec![value, expr],
            NodeKind::Array(items) | NodeKind::Map(items) => items.iter_mut().collect(),
            NodeKind::Pair { key, value } => vec![key, value],
            NodeKind::Member {
                receiver, property, ..
            } => vec![receiver, property],
            NodeKind::Slice { receiver, from, to } => {
                let mut children = vec![receiver.as_mut()];
                children.extend(from.as_deref_mut());
                children.extend(to.as_deref_mut());
                children
            }
            NodeKind::Chain(inner) | NodeKind::Closure(inner) => vec![inner],
            NodeKind::Unary { operand, .. } => vec![operand],
            NodeKind::Binary { left, right, .. } => vec![left, right],
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => vec![cond, then, otherwise],
            NodeKind::Call { callee, arguments } => {
                let mut children = vec![callee.as_mut()];
                children.extend(arguments.iter_mut());
                children
            }
            NodeKind::Builtin { arguments, .. } => arguments.iter_mut().collect(),
        }
    }

    /// Visit every node, children before parents.
    pub fn walk(&self, f: &mut impl FnMut(&Node)) {
        for child in self.children() {
            child.walk(f);
        }
        f(self);
    }
}

/// Structural equality: locations and types are ignored.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

/// A parsed expression together with its source.
#[derive(Debug, Clone)]
pub struct Tree {
    pub node: Node,
    pub source: Source,
}

// =============================================================================
// Dump
// =============================================================================
//
// `Display` prints an expression that parses back to a structurally equal
// tree. Every operator application is parenthesized.

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Nil => write!(f, "nil"),
            NodeKind::Bool(b) => write!(f, "{}", b),
            NodeKind::Integer(i) => write!(f, "{}", i),
            NodeKind::Float(x) => write!(f, "{:?}", x),
            NodeKind::String(s) => write!(f, "{}", quote(s)),
            NodeKind::Identifier(name) => write!(f, "{}", name),
            NodeKind::Pointer(name) => write!(f, "#{}", name),
            NodeKind::Constant(Constant::Set(items)) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            NodeKind::Constant(Constant::Regex(pattern)) => write!(f, "{}", quote(pattern)),
            NodeKind::VariableDeclarator { name, value, expr } => {
                write!(f, "(let {} = {}; {})", name, value, expr)
            }
            NodeKind::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            NodeKind::Map(pairs) => {
                write!(f, "{{")?;
                write_list(f, pairs)?;
                write!(f, "}}")
            }
            NodeKind::Pair { key, value } => match &key.kind {
                NodeKind::String(_) | NodeKind::Integer(_) | NodeKind::Float(_) => {
                    write!(f, "{}: {}", key, value)
                }
                _ => write!(f, "({}): {}", key, value),
            },
            NodeKind::Member {
                receiver,
                property,
                optional,
                ..
            } => {
                match &receiver.kind {
                    NodeKind::Pointer(name) if name.is_empty() => write!(f, "#")?,
                    _ => write!(f, "{}", receiver)?,
                }
                match (&property.kind, optional) {
                    (NodeKind::String(name), false) if is_identifier(name) => write!(f, ".{}", name),
                    (NodeKind::String(name), true) if is_identifier(name) => write!(f, "?.{}", name),
                    (_, false) => write!(f, "[{}]", property),
                    (_, true) => write!(f, "?.[{}]", property),
                }
            }
            NodeKind::Slice { receiver, from, to } => {
                write!(f, "{}[", receiver)?;
                if let Some(from) = from {
                    write!(f, "{}", from)?;
                }
                write!(f, ":")?;
                if let Some(to) = to {
                    write!(f, "{}", to)?;
                }
                write!(f, "]")
            }
            NodeKind::Chain(inner) => write!(f, "{}", inner),
            NodeKind::Unary { op, operand } => write!(f, "({}{})", op.symbol(), operand),
            NodeKind::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", cond, then, otherwise),
            NodeKind::Call { callee, arguments } => {
                write!(f, "{}(", callee)?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            NodeKind::Builtin { name, arguments } => {
                write!(f, "{}(", name)?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            NodeKind::Closure(body) => write!(f, "{{{}}}", body),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", node)?;
    }
    Ok(())
}

/// Double-quote a string so the lexer reads back the same value.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, Location::default())
    }

    #[test]
    fn test_equality_ignores_location() {
        let a = Node::new(NodeKind::Integer(1), Location::span(0, 1));
        let b = Node::new(NodeKind::Integer(1), Location::span(4, 5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_patch_keeps_location() {
        let mut a = Node::new(NodeKind::Integer(1), Location::span(3, 4));
        a.patch(node(NodeKind::String("x".into())));
        assert_eq!(a.location, Location::span(3, 4));
        assert_eq!(a.kind, NodeKind::String("x".into()));
    }

    #[test]
    fn test_dump_member_and_binary() {
        let member = node(NodeKind::Member {
            receiver: Box::new(node(NodeKind::Identifier("user".into()))),
            property: Box::new(node(NodeKind::String("name".into()))),
            optional: true,
            method: false,
        });
        let tree = node(NodeKind::Binary {
            op: BinaryOp::Coalesce,
            left: Box::new(node(NodeKind::Chain(Box::new(member)))),
            right: Box::new(node(NodeKind::String("x".into()))),
        });
        assert_eq!(tree.to_string(), "(user?.name ?? \"x\")");
    }
}
