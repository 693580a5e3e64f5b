//! Constant folding and local rewrites.
//!
//! Rules are applied bottom-up until a pass changes nothing:
//! 1. Fold unary and binary operators over literals
//! 2. `x in [literals]` uses a prebuilt set
//! 3. Comprehension idioms (`len(filter(..))` -> `count(..)`, ...)
//! 4. Conditionals with a literal condition collapse to one branch
//! 5. Nested chains are fused
//!
//! Folding never changes what a program computes: an operation that would
//! fail or produce a non-finite float at run time is left in place.

use sable_syntax::ast::{BinaryOp, Constant, Node, NodeKind, UnaryOp};

/// Upper bound on passes; every rule shrinks the tree, so this is never hit
/// in practice.
const MAX_PASSES: usize = 1000;

pub fn optimize(node: &mut Node) {
    for _ in 0..MAX_PASSES {
        let mut changed = false;
        pass(node, &mut changed);
        if !changed {
            break;
        }
    }
}

fn pass(node: &mut Node, changed: &mut bool) {
    for child in node.children_mut() {
        pass(child, changed);
    }
    if let Some(replacement) = rewrite(node) {
        node.patch(replacement);
        *changed = true;
    }
}

fn rewrite(node: &mut Node) -> Option<Node> {
    let location = node.location;
    match &mut node.kind {
        NodeKind::Unary { op, operand } => fold_unary(*op, operand).map(|kind| Node::new(kind, location)),

        NodeKind::Binary { op, left, right } => {
            if let Some(kind) = fold_binary(*op, left, right) {
                return Some(Node::new(kind, location));
            }
            match op {
                BinaryOp::In | BinaryOp::NotIn => {
                    if let NodeKind::Array(items) = &right.kind {
                        if items.iter().all(Node::is_literal) {
                            let set = Node::new(
                                NodeKind::Constant(Constant::Set(items.clone())),
                                right.location,
                            );
                            right.patch(set);
                            return None;
                        }
                    }
                    None
                }
                BinaryOp::Gt | BinaryOp::Eq => {
                    let zero = matches!(right.kind, NodeKind::Integer(0));
                    let NodeKind::Builtin { name, arguments } = &left.kind else {
                        return None;
                    };
                    if name != "count" || !zero || arguments.len() != 2 {
                        return None;
                    }
                    let name = if *op == BinaryOp::Gt { "any" } else { "none" };
                    Some(Node::new(
                        NodeKind::Builtin {
                            name: name.to_string(),
                            arguments: arguments.clone(),
                        },
                        location,
                    ))
                }
                _ => None,
            }
        }

        NodeKind::Builtin { name, arguments } if arguments.len() == 1 => {
            let outer = name.as_str();
            let NodeKind::Builtin {
                name: inner,
                arguments: inner_arguments,
            } = &arguments[0].kind
            else {
                return None;
            };
            let name = match (outer, inner.as_str()) {
                ("len", "filter") => "count",
                ("sum", "map") => "sum",
                _ => return None,
            };
            Some(Node::new(
                NodeKind::Builtin {
                    name: name.to_string(),
                    arguments: inner_arguments.clone(),
                },
                location,
            ))
        }

        NodeKind::Conditional {
            cond,
            then,
            otherwise,
        } => match cond.kind {
            NodeKind::Bool(true) => Some((**then).clone()),
            NodeKind::Bool(false) => Some((**otherwise).clone()),
            _ => None,
        },

        NodeKind::Chain(inner) => match &inner.kind {
            NodeKind::Chain(innermost) => Some(Node::new(NodeKind::Chain(innermost.clone()), location)),
            _ => None,
        },

        _ => None,
    }
}

fn fold_unary(op: UnaryOp, operand: &Node) -> Option<NodeKind> {
    match (op, &operand.kind) {
        (UnaryOp::Neg, NodeKind::Integer(i)) => Some(NodeKind::Integer(i.wrapping_neg())),
        (UnaryOp::Neg, NodeKind::Float(x)) => Some(NodeKind::Float(-x)),
        (UnaryOp::Plus, NodeKind::Integer(i)) => Some(NodeKind::Integer(*i)),
        (UnaryOp::Plus, NodeKind::Float(x)) => Some(NodeKind::Float(*x)),
        (UnaryOp::Not, NodeKind::Bool(b)) => Some(NodeKind::Bool(!b)),
        _ => None,
    }
}

fn float(kind: &NodeKind) -> Option<f64> {
    match kind {
        NodeKind::Integer(i) => Some(*i as f64),
        NodeKind::Float(x) => Some(*x),
        _ => None,
    }
}

fn finite(x: f64) -> Option<NodeKind> {
    x.is_finite().then_some(NodeKind::Float(x))
}

fn fold_binary(op: BinaryOp, left: &Node, right: &Node) -> Option<NodeKind> {
    use NodeKind::*;

    match (&left.kind, &right.kind) {
        (Integer(a), Integer(b)) => {
            let (a, b) = (*a, *b);
            return match op {
                BinaryOp::Add => Some(Integer(a.wrapping_add(b))),
                BinaryOp::Sub => Some(Integer(a.wrapping_sub(b))),
                BinaryOp::Mul => Some(Integer(a.wrapping_mul(b))),
                BinaryOp::Div if b != 0 => finite(a as f64 / b as f64),
                BinaryOp::Mod if b != 0 => Some(Integer(a.wrapping_rem(b))),
                BinaryOp::Pow => finite((a as f64).powf(b as f64)),
                BinaryOp::Eq => Some(Bool(a == b)),
                BinaryOp::Ne => Some(Bool(a != b)),
                BinaryOp::Lt => Some(Bool(a < b)),
                BinaryOp::Le => Some(Bool(a <= b)),
                BinaryOp::Gt => Some(Bool(a > b)),
                BinaryOp::Ge => Some(Bool(a >= b)),
                _ => None,
            };
        }
        (Integer(_) | Float(_), Integer(_) | Float(_)) => {
            let (a, b) = (float(&left.kind)?, float(&right.kind)?);
            return match op {
                BinaryOp::Add => finite(a + b),
                BinaryOp::Sub => finite(a - b),
                BinaryOp::Mul => finite(a * b),
                BinaryOp::Div if b != 0.0 => finite(a / b),
                BinaryOp::Pow => finite(a.powf(b)),
                BinaryOp::Eq => Some(Bool(a == b)),
                BinaryOp::Ne => Some(Bool(a != b)),
                BinaryOp::Lt => Some(Bool(a < b)),
                BinaryOp::Le => Some(Bool(a <= b)),
                BinaryOp::Gt => Some(Bool(a > b)),
                BinaryOp::Ge => Some(Bool(a >= b)),
                _ => None,
            };
        }
        (String(a), String(b)) => {
            return match op {
                BinaryOp::Add => Some(String(format!("{}{}", a, b))),
                BinaryOp::Eq => Some(Bool(a == b)),
                BinaryOp::Ne => Some(Bool(a != b)),
                BinaryOp::Contains => Some(Bool(a.contains(b.as_str()))),
                BinaryOp::StartsWith => Some(Bool(a.starts_with(b.as_str()))),
                BinaryOp::EndsWith => Some(Bool(a.ends_with(b.as_str()))),
                _ => None,
            };
        }
        (Bool(a), Bool(b)) => {
            return match op {
                BinaryOp::And => Some(Bool(*a && *b)),
                BinaryOp::Or => Some(Bool(*a || *b)),
                BinaryOp::Eq => Some(Bool(a == b)),
                BinaryOp::Ne => Some(Bool(a != b)),
                _ => None,
            };
        }
        _ => {}
    }

    match op {
        BinaryOp::Coalesce if left.is_literal() => match left.kind {
            Nil => Some(right.kind.clone()),
            _ => Some(left.kind.clone()),
        },
        _ => None,
    }
}
