//! Names of the engine's builtin functions.
//!
//! The parser needs to know which calls are comprehensions (their second
//! argument is a closure); the checker and compiler need the full list.

/// A comprehension builtin and the argument counts it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predicate {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
}

const fn predicate(name: &'static str, min_args: usize, max_args: usize) -> Predicate {
    Predicate {
        name,
        min_args,
        max_args,
    }
}

/// Builtins whose argument at index 1 is a closure over the elements of
/// argument 0. `count` and `sum` may omit the closure.
pub const PREDICATES: &[Predicate] = &[
    predicate("all", 2, 2),
    predicate("any", 2, 2),
    predicate("one", 2, 2),
    predicate("none", 2, 2),
    predicate("filter", 2, 2),
    predicate("map", 2, 2),
    predicate("count", 1, 2),
    predicate("find", 2, 2),
    predicate("findIndex", 2, 2),
    predicate("findLast", 2, 2),
    predicate("findLastIndex", 2, 2),
    predicate("groupBy", 2, 2),
    predicate("sortBy", 2, 3),
    predicate("reduce", 2, 3),
    predicate("sum", 1, 2),
];

/// Plain builtins evaluated by the runtime library.
pub const FUNCTIONS: &[&str] = &[
    "len", "abs", "ceil", "floor", "round", "int", "float", "string", "type", "upper", "lower",
    "trim", "split", "join", "keys", "values", "first", "last", "reverse", "uniq", "flatten",
    "concat", "get", "min", "max", "mean", "median", "now", "date", "duration",
];

/// Internal adapter inserted around opaque host values.
pub const VALUE_GET: &str = "$value_get";

pub fn predicate_named(name: &str) -> Option<&'static Predicate> {
    PREDICATES.iter().find(|p| p.name == name)
}

pub fn is_builtin(name: &str) -> bool {
    name == VALUE_GET || predicate_named(name).is_some() || FUNCTIONS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        assert!(is_builtin("filter"));
        assert!(is_builtin("len"));
        assert!(is_builtin("sum"));
        assert!(!is_builtin("foo"));
        assert_eq!(predicate_named("reduce").map(|p| p.max_args), Some(3));
    }
}
