//! Type checking for sable.
//!
//! The checker walks the tree once, annotating every node with its inferred
//! type. Errors are collected and the first one wins. A few rewrites happen
//! during checking:
//! 1. Calls to builtin functions become `Builtin` nodes
//! 2. Constant `matches` patterns are compiled and stored as `Constant::Regex`

use regex::Regex;

use sable_syntax::ast::{BinaryOp, Constant, Node, NodeKind, Tree, UnaryOp};
use sable_syntax::builtins::{self as catalog, VALUE_GET};
use sable_syntax::{FunctionType, Location, Type};

use crate::builtins;
use crate::{Config, LocatedTypeError, TypeError};

/// Type the whole tree; returns the type of the root or the first error.
pub fn check(tree: &mut Tree, config: &Config) -> Result<Type, LocatedTypeError> {
    let (ty, mut errors) = check_node(&mut tree.node, config);
    if errors.is_empty() {
        Ok(ty)
    } else {
        Err(errors.remove(0))
    }
}

/// Type a node and report every error found.
pub fn check_node(node: &mut Node, config: &Config) -> (Type, Vec<LocatedTypeError>) {
    let mut checker = Checker::new(config);
    let ty = checker.visit(node);

    if let Some(expect) = &config.expect {
        if !ty.is_assignable_to(expect) {
            checker.error(
                node.location,
                TypeError::UnexpectedResult {
                    expected: expect.to_string(),
                    found: ty.to_string(),
                },
            );
        }
    }

    (ty, checker.errors)
}

/// The element and accumulator a closure body sees as `#` and `#acc`.
#[derive(Debug, Clone)]
struct PredicateScope {
    elem: Type,
    acc: Option<Type>,
}

pub struct Checker<'a> {
    config: &'a Config,
    /// `let` bindings, innermost last
    variables: Vec<(String, Type)>,
    predicates: Vec<PredicateScope>,
    /// Depth of enclosing `Chain` nodes
    chains: usize,
    errors: Vec<LocatedTypeError>,
}

impl<'a> Checker<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            variables: Vec::new(),
            predicates: Vec::new(),
            chains: 0,
            errors: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// Record an error; the offending node types as `unknown` so one mistake
    /// does not cascade.
    pub fn error(&mut self, location: Location, error: TypeError) -> Type {
        self.errors.push(LocatedTypeError::new(error, location));
        Type::Unknown
    }

    pub fn visit(&mut self, node: &mut Node) -> Type {
        let ty = self.infer(node);
        node.set_type(ty.clone());
        ty
    }

    /// Check a closure argument with `#` bound to `elem`.
    pub fn visit_closure(&mut self, node: &mut Node, elem: Type, acc: Option<Type>) -> Type {
        let NodeKind::Closure(body) = &mut node.kind else {
            return self.visit(node);
        };
        self.predicates.push(PredicateScope { elem, acc });
        let ty = self.visit(body);
        self.predicates.pop();
        node.set_type(ty.clone());
        ty
    }

    fn infer(&mut self, node: &mut Node) -> Type {
        let location = node.location;
        match &mut node.kind {
            NodeKind::Nil => Type::Nil,
            NodeKind::Bool(_) => Type::Bool,
            NodeKind::Integer(_) => Type::Int,
            NodeKind::Float(_) => Type::Float,
            NodeKind::String(_) => Type::String,

            NodeKind::Constant(Constant::Set(items)) => {
                let types: Vec<Type> = items.iter_mut().map(|item| self.visit(item)).collect();
                Type::array(common_type(types))
            }
            NodeKind::Constant(Constant::Regex(_)) => Type::String,

            NodeKind::Identifier(name) => {
                let name = name.clone();
                self.identifier(&name, location)
            }

            NodeKind::Pointer(name) => {
                let name = name.clone();
                self.pointer(&name, location)
            }

            NodeKind::VariableDeclarator { name, value, expr } => {
                let name = name.clone();
                if catalog::is_builtin(&name) || self.config.functions.contains_key(&name) {
                    self.error(location, TypeError::ShadowsBuiltin(name.clone()));
                } else if self.variables.iter().any(|(existing, _)| *existing == name) {
                    self.error(location, TypeError::Redeclared(name.clone()));
                }
                let value_ty = self.visit(value);
                self.variables.push((name, value_ty));
                let ty = self.visit(expr);
                self.variables.pop();
                ty
            }

            NodeKind::Array(items) => {
                let types: Vec<Type> = items.iter_mut().map(|item| self.visit(item)).collect();
                Type::array(common_type(types))
            }

            NodeKind::Map(pairs) => {
                let mut keys = Vec::new();
                let mut values = Vec::new();
                for pair in pairs.iter_mut() {
                    if let NodeKind::Pair { key, value } = &mut pair.kind {
                        keys.push(self.visit(key));
                        let value_ty = self.visit(value);
                        values.push(value_ty.clone());
                        pair.set_type(value_ty);
                    } else {
                        self.visit(pair);
                    }
                }
                if keys.is_empty() {
                    return Type::map(Type::String, Type::Any);
                }
                Type::map(common_type(keys), common_type(values))
            }

            NodeKind::Pair { key, value } => {
                self.visit(key);
                self.visit(value)
            }

            NodeKind::Member {
                receiver,
                property,
                optional,
                ..
            } => {
                let optional = *optional;
                let receiver_ty = self.visit(receiver);
                let ty = self.member(&receiver_ty, property, optional);
                if optional {
                    Type::union([ty, Type::Nil])
                } else {
                    ty
                }
            }

            NodeKind::Slice { receiver, from, to } => {
                let receiver_ty = self.visit(receiver);
                for bound in [from, to].into_iter().flatten() {
                    let bound_ty = self.visit(bound);
                    if !is_loose(&bound_ty) && !bound_ty.is_integer() {
                        self.error(
                            bound.location,
                            TypeError::NotIndexable {
                                ty: receiver_ty.to_string(),
                                index: bound_ty.to_string(),
                            },
                        );
                    }
                }
                let base = receiver_ty.without_nil();
                match base.base() {
                    Type::Array(_) | Type::String => base.clone(),
                    ty if is_loose(ty) => Type::Any,
                    _ => self.error(
                        location,
                        TypeError::NotIndexable {
                            ty: receiver_ty.to_string(),
                            index: "slice".to_string(),
                        },
                    ),
                }
            }

            NodeKind::Chain(inner) => {
                self.chains += 1;
                let ty = self.visit(inner);
                self.chains -= 1;
                Type::union([ty, Type::Nil])
            }

            NodeKind::Unary { op, operand } => {
                let op = *op;
                let ty = self.visit(operand);
                self.unary(op, ty, location)
            }

            NodeKind::Binary { op, left, right } => {
                let op = *op;
                let left_ty = self.visit(left);
                let right_ty = self.visit(right);
                if op == BinaryOp::Matches {
                    self.compile_pattern(right);
                }
                match binary_type(op, &left_ty, &right_ty) {
                    Ok(ty) => ty,
                    Err(err) => self.error(location, err),
                }
            }

            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let cond_ty = self.visit(cond);
                if !is_loose(&cond_ty) && !cond_ty.is_bool() {
                    self.error(cond.location, TypeError::NonBoolCondition(cond_ty.to_string()));
                }
                let then_ty = self.visit(then);
                let otherwise_ty = self.visit(otherwise);
                Type::union([then_ty, otherwise_ty])
            }

            NodeKind::Call { callee, arguments } => {
                if let NodeKind::Identifier(name) = &callee.kind {
                    if self.resolves_to_builtin(name) {
                        let name = name.clone();
                        let arguments = std::mem::take(arguments);
                        node.kind = NodeKind::Builtin { name, arguments };
                        return self.infer(node);
                    }
                }

                let callee_ty = self.visit(callee);
                let name = callee_name(callee);
                match callee_ty.base().clone() {
                    Type::Func(signature) => {
                        self.arguments(&name, &signature, arguments, location);
                        (*signature.result).clone()
                    }
                    ty if is_loose(&ty) => {
                        for argument in arguments.iter_mut() {
                            self.visit(argument);
                        }
                        Type::Any
                    }
                    ty => self.error(location, TypeError::NotCallable(format!("{} ({})", name, ty))),
                }
            }

            NodeKind::Builtin { name, arguments } => {
                let name = name.clone();
                builtins::check_builtin(self, &name, arguments, location)
            }

            NodeKind::Closure(body) => {
                self.visit(body);
                self.error(
                    location,
                    TypeError::Custom("closure is only allowed as a predicate argument".into()),
                )
            }
        }
    }

    // =========================================================================
    // Names
    // =========================================================================

    fn identifier(&mut self, name: &str, location: Location) -> Type {
        if let Some((_, ty)) = self.variables.iter().rev().find(|(var, _)| var == name) {
            return ty.clone();
        }
        if name == "$env" {
            return self.config.env.clone();
        }
        if let Some(signature) = self.config.functions.get(name) {
            return Type::Func(signature.clone());
        }

        let config = self.config;
        match config.env.base() {
            Type::Record(record) => {
                if let Some(field) = record.lookup(name) {
                    if !field.exported {
                        return self.error(location, TypeError::Unexported(name.to_string()));
                    }
                    return field.ty.clone();
                }
                if let Some(signature) = record.lookup_method(name) {
                    return Type::Func(signature.clone());
                }
            }
            Type::Map(_, value) => return (**value).clone(),
            ty if ty.is_any() => return Type::Any,
            _ => {}
        }

        if self.config.allow_undefined {
            return Type::Any;
        }
        self.error(location, TypeError::UnknownName(name.to_string()))
    }

    fn pointer(&mut self, name: &str, location: Location) -> Type {
        let Some(scope) = self.predicates.last() else {
            return self.error(location, TypeError::InvalidPointer(name.to_string()));
        };
        match name {
            "" => scope.elem.clone(),
            "index" => Type::Int,
            "acc" => match &scope.acc {
                Some(acc) => acc.clone(),
                None => self.error(location, TypeError::InvalidPointer(name.to_string())),
            },
            _ => self.error(location, TypeError::InvalidPointer(name.to_string())),
        }
    }

    /// A call by bare name that nothing user-visible claims is a builtin call.
    fn resolves_to_builtin(&self, name: &str) -> bool {
        if !catalog::is_builtin(name) || name == VALUE_GET || self.config.is_disabled(name) {
            return false;
        }
        if self.config.functions.contains_key(name)
            || self.variables.iter().any(|(var, _)| var == name)
        {
            return false;
        }
        match self.config.env.base() {
            Type::Record(record) => {
                record.lookup(name).is_none() && record.lookup_method(name).is_none()
            }
            _ => true,
        }
    }

    // =========================================================================
    // Member access
    // =========================================================================

    fn member(&mut self, receiver_ty: &Type, property: &mut Node, optional: bool) -> Type {
        let base = receiver_ty.without_nil();
        let location = property.location;

        // A receiver that can only be nil short-circuits the chain
        if matches!(base.base(), Type::Nil) && (optional || self.chains > 0) {
            let chains = std::mem::take(&mut self.chains);
            self.visit(property);
            self.chains = chains;
            return Type::Nil;
        }

        // `.name` or ["name"]; sequences take the index path below
        let sequence = matches!(base.base(), Type::Array(_) | Type::String);
        if let (false, NodeKind::String(name)) = (sequence, &property.kind) {
            let name = name.clone();
            property.set_type(Type::String);
            match base.base() {
                Type::Record(record) => {
                    if let Some(field) = record.lookup(&name) {
                        if !field.exported {
                            return self.error(location, TypeError::Unexported(name));
                        }
                        return field.ty.clone();
                    }
                    if let Some(signature) = record.lookup_method(&name) {
                        return Type::Func(signature.clone());
                    }
                    return self.error(
                        location,
                        TypeError::NoSuchField {
                            ty: receiver_ty.to_string(),
                            field: name,
                        },
                    );
                }
                Type::Map(key, value) => {
                    if !is_loose(key) && !key.is_string() {
                        return self.error(
                            location,
                            TypeError::NotIndexable {
                                ty: receiver_ty.to_string(),
                                index: name,
                            },
                        );
                    }
                    return (**value).clone();
                }
                ty if is_loose(ty) => return Type::Any,
                _ => {
                    return self.error(
                        location,
                        TypeError::NoSuchField {
                            ty: receiver_ty.to_string(),
                            field: name,
                        },
                    )
                }
            }
        }

        let chains = std::mem::take(&mut self.chains);
        let index_ty = self.visit(property);
        self.chains = chains;
        let index_ok = |expected: &Type| {
            is_loose(&index_ty) || index_ty.is_assignable_to(expected)
        };
        match base.base() {
            Type::Array(elem) if index_ok(&Type::Int) && !index_ty.is_float() => (**elem).clone(),
            Type::String if index_ok(&Type::Int) && !index_ty.is_float() => Type::String,
            Type::Map(key, value) if index_ok(key.as_ref()) => (**value).clone(),
            Type::Record(_) if index_ok(&Type::String) => Type::Any,
            ty if is_loose(ty) => Type::Any,
            _ => self.error(
                location,
                TypeError::NotIndexable {
                    ty: receiver_ty.to_string(),
                    index: index_ty.to_string(),
                },
            ),
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn unary(&mut self, op: UnaryOp, ty: Type, location: Location) -> Type {
        match op {
            UnaryOp::Neg | UnaryOp::Plus => {
                if is_loose(&ty) {
                    Type::Any
                } else if ty.is_numeric() || matches!(ty.base(), Type::Duration) {
                    ty.base().clone()
                } else {
                    self.error(
                        location,
                        TypeError::InvalidUnary {
                            op: op.symbol().to_string(),
                            ty: ty.to_string(),
                        },
                    )
                }
            }
            UnaryOp::Not => {
                if is_loose(&ty) || ty.is_bool() {
                    Type::Bool
                } else {
                    self.error(
                        location,
                        TypeError::InvalidUnary {
                            op: op.symbol().to_string(),
                            ty: ty.to_string(),
                        },
                    )
                }
            }
        }
    }

    /// A literal pattern on the right of `matches` is compiled now, so a bad
    /// pattern is a type error and the program reuses the compiled regex.
    fn compile_pattern(&mut self, pattern: &mut Node) {
        let NodeKind::String(source) = &pattern.kind else {
            return;
        };
        match Regex::new(source) {
            Ok(_) => {
                let source = source.clone();
                pattern.patch(Node::typed(
                    NodeKind::Constant(Constant::Regex(source)),
                    pattern.location,
                    Type::String,
                ));
            }
            Err(err) => {
                let message = err.to_string();
                self.error(pattern.location, TypeError::InvalidRegex(message));
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Check call arguments against a signature. A context-taking function
    /// may be called without its first argument; the context patcher adds it.
    pub fn arguments(
        &mut self,
        name: &str,
        signature: &FunctionType,
        arguments: &mut [Node],
        location: Location,
    ) {
        let offset = usize::from(
            signature.context
                && !signature.params.is_empty()
                && arguments.len() + 1 == signature.params.len(),
        );
        let params = &signature.params[offset..];
        let count = arguments.len();

        let fixed = if signature.variadic {
            params.len().saturating_sub(1)
        } else {
            params.len()
        };
        let arity_ok = if signature.variadic {
            count >= fixed
        } else {
            count == fixed
        };
        if !arity_ok {
            let expected = if signature.variadic {
                format!("at least {}", fixed)
            } else {
                fixed.to_string()
            };
            self.error(
                location,
                TypeError::ArityMismatch {
                    name: name.to_string(),
                    expected,
                    found: count,
                },
            );
        }

        for (index, argument) in arguments.iter_mut().enumerate() {
            let ty = self.visit(argument);
            let Some(expected) = signature.param(index + offset) else {
                continue;
            };
            if !is_loose(&ty) && !ty.is_assignable_to(expected) {
                self.error(
                    argument.location,
                    TypeError::ArgumentMismatch {
                        name: name.to_string(),
                        expected: expected.to_string(),
                        found: ty.to_string(),
                    },
                );
            }
        }
    }
}

fn callee_name(callee: &Node) -> String {
    match &callee.kind {
        NodeKind::Identifier(name) => name.clone(),
        NodeKind::Member { property, .. } => property
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| callee.to_string()),
        _ => callee.to_string(),
    }
}

/// Types that defer checking to run time.
pub fn is_loose(ty: &Type) -> bool {
    ty.is_any() || matches!(ty, Type::Union(_))
}

/// Shared element type of a literal collection.
fn common_type(types: Vec<Type>) -> Type {
    let mut iter = types.into_iter();
    let Some(first) = iter.next() else {
        return Type::Any;
    };
    if iter.all(|ty| ty == first) {
        first
    } else {
        Type::Any
    }
}

/// Result type of a binary operator.
pub fn binary_type(op: BinaryOp, left: &Type, right: &Type) -> Result<Type, TypeError> {
    let mismatch = || TypeError::InvalidOperation {
        op: op.symbol().to_string(),
        left: left.to_string(),
        right: right.to_string(),
    };
    let loose = is_loose(left) || is_loose(right);
    let (l, r) = (left.base(), right.base());

    match op {
        BinaryOp::Add => match (l, r) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            _ if left.is_numeric() && right.is_numeric() => Ok(Type::Float),
            (Type::String, Type::String) => Ok(Type::String),
            (Type::Time, Type::Duration) | (Type::Duration, Type::Time) => Ok(Type::Time),
            (Type::Duration, Type::Duration) => Ok(Type::Duration),
            (Type::Array(a), Type::Array(b)) => {
                Ok(Type::array(if a == b { (**a).clone() } else { Type::Any }))
            }
            _ if loose => Ok(Type::Any),
            _ => Err(mismatch()),
        },
        BinaryOp::Sub => match (l, r) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            _ if left.is_numeric() && right.is_numeric() => Ok(Type::Float),
            (Type::Time, Type::Time) => Ok(Type::Duration),
            (Type::Time, Type::Duration) => Ok(Type::Time),
            (Type::Duration, Type::Duration) => Ok(Type::Duration),
            _ if loose => Ok(Type::Any),
            _ => Err(mismatch()),
        },
        BinaryOp::Mul => match (l, r) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            _ if left.is_numeric() && right.is_numeric() => Ok(Type::Float),
            (Type::Duration, Type::Int) | (Type::Int, Type::Duration) => Ok(Type::Duration),
            _ if loose => Ok(Type::Any),
            _ => Err(mismatch()),
        },
        BinaryOp::Div | BinaryOp::Pow => {
            if left.is_numeric() && right.is_numeric() {
                Ok(Type::Float)
            } else if loose {
                Ok(Type::Any)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Mod => match (l, r) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            _ if loose => Ok(Type::Any),
            _ => Err(mismatch()),
        },

        BinaryOp::Eq | BinaryOp::Ne => {
            if comparable(left, right) {
                Ok(Type::Bool)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordered = (left.is_numeric() && right.is_numeric())
                || matches!(
                    (l, r),
                    (Type::String, Type::String)
                        | (Type::Time, Type::Time)
                        | (Type::Duration, Type::Duration)
                );
            if ordered || loose {
                Ok(Type::Bool)
            } else {
                Err(mismatch())
            }
        }

        BinaryOp::And | BinaryOp::Or => {
            let ok = |ty: &Type| is_loose(ty) || ty.is_bool();
            if ok(left) && ok(right) {
                Ok(Type::Bool)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Coalesce => {
            if *left == Type::Nil {
                Ok(right.clone())
            } else {
                Ok(Type::union([left.without_nil(), right.clone()]))
            }
        }

        BinaryOp::In | BinaryOp::NotIn => {
            let ok = match r {
                Type::Array(elem) => is_loose(left) || is_loose(elem) || comparable(left, elem),
                Type::Map(key, _) => is_loose(left) || is_loose(key) || comparable(left, key),
                Type::Record(_) | Type::String => is_loose(left) || left.is_string(),
                _ => loose,
            };
            if ok {
                Ok(Type::Bool)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Matches | BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
            let ok = |ty: &Type| is_loose(ty) || ty.is_string();
            if ok(left) && ok(right) {
                Ok(Type::Bool)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Range => {
            let ok = |ty: &Type| is_loose(ty) || ty.is_integer();
            if ok(left) && ok(right) {
                Ok(Type::array(Type::Int))
            } else {
                Err(mismatch())
            }
        }
    }
}

/// Whether `==` may compare two types. Aliases only compare with the same alias.
fn comparable(left: &Type, right: &Type) -> bool {
    if is_loose(left) || is_loose(right) {
        return true;
    }
    if *left == Type::Nil || *right == Type::Nil {
        return true;
    }
    match (left, right) {
        (Type::Named { name: a, .. }, Type::Named { name: b, .. }) => a == b,
        (Type::Named { .. }, _) | (_, Type::Named { .. }) => false,
        _ if left.is_numeric() && right.is_numeric() => true,
        (Type::Array(_), Type::Array(_)) | (Type::Map(..), Type::Map(..)) => true,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_promotion() {
        assert_eq!(binary_type(BinaryOp::Add, &Type::Int, &Type::Int), Ok(Type::Int));
        assert_eq!(binary_type(BinaryOp::Add, &Type::Int, &Type::Float), Ok(Type::Float));
        assert_eq!(binary_type(BinaryOp::Div, &Type::Int, &Type::Int), Ok(Type::Float));
        assert_eq!(binary_type(BinaryOp::Pow, &Type::Int, &Type::Int), Ok(Type::Float));
        assert_eq!(binary_type(BinaryOp::Sub, &Type::Time, &Type::Time), Ok(Type::Duration));
        assert!(binary_type(BinaryOp::Mod, &Type::Float, &Type::Int).is_err());
    }

    #[test]
    fn test_alias_comparison() {
        let status = Type::named("Status", Type::String);
        assert!(binary_type(BinaryOp::Eq, &status, &Type::String).is_err());
        assert!(binary_type(BinaryOp::Eq, &status, &status).is_ok());
        assert!(binary_type(BinaryOp::Eq, &Type::Nil, &Type::Int).is_ok());
    }

    #[test]
    fn test_common_type() {
        assert_eq!(common_type(vec![Type::Int, Type::Int]), Type::Int);
        assert_eq!(common_type(vec![Type::Int, Type::String]), Type::Any);
        assert_eq!(common_type(vec![]), Type::Any);
    }
}
