//! Typing rules for builtin calls.
//!
//! Comprehensions type their closure argument with `#` bound to the element
//! type of the sequence; plain builtins have fixed signatures, checked here
//! rather than through `FunctionType` because many are generic over their
//! argument.

use sable_syntax::ast::{Node, NodeKind};
use sable_syntax::builtins::VALUE_GET;
use sable_syntax::{Location, Type};

use crate::check::{is_loose, Checker};
use crate::TypeError;

/// Allowed argument counts of a plain builtin; `None` means unbounded.
pub fn arity(name: &str) -> Option<(usize, Option<usize>)> {
    let bounds = match name {
        "now" => (0, Some(0)),
        "len" | "abs" | "ceil" | "floor" | "int" | "float" | "string" | "type" | "upper"
        | "lower" | "keys" | "values" | "first" | "last" | "reverse" | "uniq" | "flatten"
        | "duration" => (1, Some(1)),
        "round" | "trim" | "join" | "date" => (1, Some(2)),
        "split" | "get" => (2, Some(2)),
        "concat" | "min" | "max" | "mean" | "median" => (1, None),
        "sum" | "count" => (1, Some(2)),
        name if name == VALUE_GET => (1, Some(1)),
        _ => return None,
    };
    Some(bounds)
}

/// Type a `Builtin` node.
pub fn check_builtin(
    checker: &mut Checker<'_>,
    name: &str,
    arguments: &mut [Node],
    location: Location,
) -> Type {
    if let Some((min, max)) = arity(name) {
        let count = arguments.len();
        if count < min || max.is_some_and(|max| count > max) {
            let expected = match max {
                Some(max) if max == min => min.to_string(),
                Some(max) => format!("{} to {}", min, max),
                None => format!("at least {}", min),
            };
            for argument in arguments.iter_mut() {
                checker.visit(argument);
            }
            return checker.error(
                location,
                TypeError::ArityMismatch {
                    name: name.to_string(),
                    expected,
                    found: count,
                },
            );
        }
    }

    match name {
        "all" | "any" | "one" | "none" | "filter" | "count" | "find" | "findLast"
        | "findIndex" | "findLastIndex" | "map" | "groupBy" | "sortBy" | "reduce" | "sum"
            if has_closure(arguments) =>
        {
            predicate(checker, name, arguments, location)
        }
        _ => function(checker, name, arguments, location),
    }
}

fn has_closure(arguments: &[Node]) -> bool {
    matches!(arguments.get(1).map(|a| &a.kind), Some(NodeKind::Closure(_)))
}

fn sequence_elem(checker: &mut Checker<'_>, name: &str, sequence: &mut Node) -> Type {
    let ty = checker.visit(sequence);
    match ty.elem() {
        Some(elem) => elem,
        None if is_loose(&ty) => Type::Any,
        None => checker.error(
            sequence.location,
            TypeError::NotIterable {
                name: name.to_string(),
                ty: ty.to_string(),
            },
        ),
    }
}

fn expect_bool(checker: &mut Checker<'_>, body: &Node, ty: &Type) {
    if !is_loose(ty) && !ty.is_bool() {
        checker.error(
            body.location,
            TypeError::PredicateResult {
                expected: "bool".to_string(),
                found: ty.to_string(),
            },
        );
    }
}

fn predicate(
    checker: &mut Checker<'_>,
    name: &str,
    arguments: &mut [Node],
    location: Location,
) -> Type {
    let (sequence, rest) = match arguments.split_first_mut() {
        Some(split) => split,
        None => return Type::Unknown,
    };
    let elem = sequence_elem(checker, name, sequence);
    let Some((closure, extra)) = rest.split_first_mut() else {
        return Type::Unknown;
    };

    match name {
        "all" | "any" | "one" | "none" => {
            let ty = checker.visit_closure(closure, elem, None);
            expect_bool(checker, closure, &ty);
            Type::Bool
        }
        "filter" => {
            let ty = checker.visit_closure(closure, elem.clone(), None);
            expect_bool(checker, closure, &ty);
            Type::array(elem)
        }
        "count" => {
            let ty = checker.visit_closure(closure, elem, None);
            expect_bool(checker, closure, &ty);
            Type::Int
        }
        "find" | "findLast" => {
            let ty = checker.visit_closure(closure, elem.clone(), None);
            expect_bool(checker, closure, &ty);
            Type::union([elem, Type::Nil])
        }
        "findIndex" | "findLastIndex" => {
            let ty = checker.visit_closure(closure, elem, None);
            expect_bool(checker, closure, &ty);
            Type::Int
        }
        "map" => Type::array(checker.visit_closure(closure, elem, None)),
        "groupBy" => {
            let key = checker.visit_closure(closure, elem.clone(), None);
            let key = if is_loose(&key) { Type::Any } else { key };
            Type::map(key, Type::array(elem))
        }
        "sortBy" => {
            checker.visit_closure(closure, elem.clone(), None);
            if let Some(order) = extra.first_mut() {
                let ty = checker.visit(order);
                if !is_loose(&ty) && !ty.is_string() {
                    checker.error(
                        order.location,
                        TypeError::ArgumentMismatch {
                            name: name.to_string(),
                            expected: "string".to_string(),
                            found: ty.to_string(),
                        },
                    );
                }
            }
            Type::array(elem)
        }
        "reduce" => {
            let acc = match extra.first_mut() {
                Some(initial) => checker.visit(initial),
                None => elem.clone(),
            };
            checker.visit_closure(closure, elem, Some(acc))
        }
        "sum" => {
            let ty = checker.visit_closure(closure, elem, None);
            numeric_result(checker, name, closure, &ty)
        }
        _ => checker.error(location, TypeError::UnknownName(name.to_string())),
    }
}

/// `Int` for integer inputs, `Float` for floats, `any` when unknown.
fn numeric_result(checker: &mut Checker<'_>, name: &str, node: &Node, ty: &Type) -> Type {
    if ty.is_integer() {
        Type::Int
    } else if ty.is_float() {
        Type::Float
    } else if is_loose(ty) {
        Type::Any
    } else {
        checker.error(
            node.location,
            TypeError::ArgumentMismatch {
                name: name.to_string(),
                expected: "number".to_string(),
                found: ty.to_string(),
            },
        )
    }
}

fn function(
    checker: &mut Checker<'_>,
    name: &str,
    arguments: &mut [Node],
    location: Location,
) -> Type {
    let types: Vec<Type> = arguments.iter_mut().map(|a| checker.visit(a)).collect();
    let first = types.first().cloned().unwrap_or(Type::Any);
    let mismatch = |checker: &mut Checker<'_>, index: usize, expected: &str| {
        let found = types.get(index).map(|t| t.to_string()).unwrap_or_default();
        let location = arguments
            .get(index)
            .map(|a| a.location)
            .unwrap_or(location);
        checker.error(
            location,
            TypeError::ArgumentMismatch {
                name: name.to_string(),
                expected: expected.to_string(),
                found,
            },
        )
    };
    let is = |index: usize, test: fn(&Type) -> bool| {
        types.get(index).map_or(true, |ty| is_loose(ty) || test(ty))
    };

    match name {
        "len" => match first.without_nil().base() {
            Type::Array(_) | Type::Map(..) | Type::String => Type::Int,
            ty if is_loose(ty) => Type::Int,
            _ => mismatch(checker, 0, "array, map or string"),
        },
        "abs" => {
            if !is(0, Type::is_numeric) {
                return mismatch(checker, 0, "number");
            }
            if is_loose(&first) {
                Type::Any
            } else {
                first.base().clone()
            }
        }
        "ceil" | "floor" | "round" => {
            if !is(0, Type::is_numeric) {
                return mismatch(checker, 0, "number");
            }
            if !is(1, Type::is_integer) {
                return mismatch(checker, 1, "int");
            }
            Type::Float
        }
        "int" => Type::Int,
        "float" => Type::Float,
        "string" | "type" => Type::String,
        "upper" | "lower" | "trim" => {
            if !is(0, Type::is_string) {
                return mismatch(checker, 0, "string");
            }
            if !is(1, Type::is_string) {
                return mismatch(checker, 1, "string");
            }
            Type::String
        }
        "split" => {
            if !is(0, Type::is_string) {
                return mismatch(checker, 0, "string");
            }
            if !is(1, Type::is_string) {
                return mismatch(checker, 1, "string");
            }
            Type::array(Type::String)
        }
        "join" => {
            if first.elem().is_none() {
                return mismatch(checker, 0, "array");
            }
            if !is(1, Type::is_string) {
                return mismatch(checker, 1, "string");
            }
            Type::String
        }
        "keys" | "values" => match first.without_nil().base() {
            Type::Map(key, value) => {
                Type::array(if name == "keys" { (**key).clone() } else { (**value).clone() })
            }
            Type::Record(_) => Type::array(if name == "keys" { Type::String } else { Type::Any }),
            ty if is_loose(ty) => Type::array(Type::Any),
            _ => mismatch(checker, 0, "map"),
        },
        "first" | "last" => match first.elem() {
            Some(elem) => Type::union([elem, Type::Nil]),
            None => mismatch(checker, 0, "array"),
        },
        "reverse" | "uniq" => match first.elem() {
            Some(_) if is_loose(&first) => Type::array(Type::Any),
            Some(_) => first.without_nil(),
            None => mismatch(checker, 0, "array"),
        },
        "flatten" => match first.elem() {
            Some(_) => Type::array(Type::Any),
            None => mismatch(checker, 0, "array"),
        },
        "concat" => {
            let mut elems = Vec::new();
            for (index, ty) in types.iter().enumerate() {
                match ty.elem() {
                    Some(elem) => elems.push(elem),
                    None => return mismatch(checker, index, "array"),
                }
            }
            let first_elem = elems.first().cloned().unwrap_or(Type::Any);
            if elems.iter().all(|elem| *elem == first_elem) {
                Type::array(first_elem)
            } else {
                Type::array(Type::Any)
            }
        }
        "get" => match first.without_nil().base() {
            Type::Array(elem) => Type::union([(**elem).clone(), Type::Nil]),
            Type::Map(_, value) => Type::union([(**value).clone(), Type::Nil]),
            _ => Type::Any,
        },
        "min" | "max" | "mean" | "median" | "sum" => {
            let numbers: Vec<Type> = if types.len() == 1 {
                match first.elem() {
                    Some(elem) => vec![elem],
                    None => types.clone(),
                }
            } else {
                types.clone()
            };
            for (index, ty) in numbers.iter().enumerate() {
                if !is_loose(ty) && !ty.is_numeric() {
                    return mismatch(checker, index.min(types.len().saturating_sub(1)), "number");
                }
            }
            if matches!(name, "mean" | "median") {
                Type::Float
            } else if numbers.iter().all(|ty| ty.is_integer()) {
                Type::Int
            } else if numbers.iter().any(is_loose) {
                Type::Any
            } else {
                Type::Float
            }
        }
        "count" => match first.elem() {
            Some(elem) if is_loose(&elem) || elem.is_bool() => Type::Int,
            Some(_) => mismatch(checker, 0, "array of bool"),
            None => mismatch(checker, 0, "array"),
        },
        "now" => Type::Time,
        "date" => {
            if !is(0, Type::is_string) {
                return mismatch(checker, 0, "string");
            }
            if !is(1, Type::is_string) {
                return mismatch(checker, 1, "string");
            }
            Type::Time
        }
        "duration" => {
            if !is(0, Type::is_string) {
                return mismatch(checker, 0, "string");
            }
            Type::Duration
        }
        name if name == VALUE_GET => match first.base() {
            Type::Opaque { scalar, .. } => (**scalar).clone(),
            _ => first,
        },
        _ => checker.error(location, TypeError::UnknownName(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_table() {
        assert_eq!(arity("now"), Some((0, Some(0))));
        assert_eq!(arity("max"), Some((1, None)));
        assert_eq!(arity("$value_get"), Some((1, Some(1))));
        assert_eq!(arity("all"), None);
    }
}
