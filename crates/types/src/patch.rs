//! AST visitors.
//!
//! A [`Visitor`] sees every node after its children and may replace it with
//! [`Node::patch`], which keeps the original location. Two patchers are
//! built in: context injection for functions declared to take the
//! environment's context value, and the valuer adapter for opaque host
//! scalars.

use sable_syntax::ast::{Node, NodeKind};
use sable_syntax::builtins::VALUE_GET;
use sable_syntax::Type;

pub trait Visitor {
    fn visit(&mut self, node: &mut Node);
}

impl<F: FnMut(&mut Node)> Visitor for F {
    fn visit(&mut self, node: &mut Node) {
        self(node)
    }
}

/// Post-order walk.
pub fn walk(node: &mut Node, visitor: &mut dyn Visitor) {
    for child in node.children_mut() {
        walk(child, visitor);
    }
    visitor.visit(node);
}

/// Passes the environment's context entry as the first argument to every
/// call whose signature asks for it, including nested calls.
#[derive(Debug, Clone)]
pub struct ContextPatcher {
    pub name: String,
}

impl ContextPatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Visitor for ContextPatcher {
    fn visit(&mut self, node: &mut Node) {
        let NodeKind::Call { callee, arguments } = &mut node.kind else {
            return;
        };
        let Some(Type::Func(signature)) = &callee.ty else {
            return;
        };
        if !signature.context || arguments.len() + 1 != signature.params.len() {
            return;
        }
        let context = Node::new(NodeKind::Identifier(self.name.clone()), callee.location);
        arguments.insert(0, context);
    }
}

/// Wraps every use of an opaque host value in `$value_get(...)` so it
/// takes part in expressions as its scalar type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuerPatcher;

impl Visitor for ValuerPatcher {
    fn visit(&mut self, node: &mut Node) {
        let Some(Type::Opaque { scalar, .. }) = &node.ty else {
            return;
        };
        let scalar = (**scalar).clone();
        let location = node.location;
        let inner = node.clone();
        node.patch(Node::typed(
            NodeKind::Builtin {
                name: VALUE_GET.to_string(),
                arguments: vec![inner],
            },
            location,
            scalar,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_syntax::parse_expr;

    #[test]
    fn test_closure_visitor_sees_children_first() {
        let mut tree = parse_expr("a + b * c").unwrap();
        let mut seen = Vec::new();
        let mut collect = |node: &mut Node| {
            if let NodeKind::Identifier(name) = &node.kind {
                seen.push(name.clone());
            }
        };
        walk(&mut tree.node, &mut collect);
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_valuer_wraps_opaque_nodes() {
        let mut tree = parse_expr("balance").unwrap();
        tree.node.set_type(Type::opaque("Money", Type::Int));
        walk(&mut tree.node, &mut ValuerPatcher);
        let NodeKind::Builtin { name, arguments } = &tree.node.kind else {
            panic!("expected builtin");
        };
        assert_eq!(name, VALUE_GET);
        assert_eq!(arguments.len(), 1);
        assert_eq!(tree.node.ty, Some(Type::Int));
    }
}
