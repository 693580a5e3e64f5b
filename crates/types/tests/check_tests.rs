//! Type checking tests.
//!
//! Test categories:
//! 1. Literals and operators
//! 2. Environment lookups (records, maps, unexported fields)
//! 3. Member access and optional chaining
//! 4. Builtins and comprehensions
//! 5. Host functions, let bindings and configuration
//! 6. Visitors and patches
//! 7. Optimization after checking

use sable_syntax::ast::{Constant, Node, NodeKind};
use sable_syntax::{parse_expr, Tree};
use sable_types::*;

// ============================================================================
// Test Infrastructure
// ============================================================================

fn user() -> Type {
    Type::Record(
        RecordType::new("User")
            .with_field(FieldType::new("Name", Type::String).expose("name"))
            .field("age", Type::Int)
            .with_field(FieldType::new("secret", Type::String).unexported())
            .method("greeting", FunctionType::new(vec![Type::String], Type::String)),
    )
}

fn env() -> Type {
    Type::Record(
        RecordType::new("Env")
            .field("user", user())
            .field("maybe", Type::union([user(), Type::Nil]))
            .field("tags", Type::array(Type::String))
            .field("scores", Type::map(Type::String, Type::Int))
            .field("status", Type::named("Status", Type::String))
            .field("balance", Type::opaque("Money", Type::Int))
            .field("ctx", Type::Record(RecordType::new("Ctx").field("tenant", Type::String)))
            .field("started", Type::Time)
            .field("missing", Type::Nil)
            .field("nested", Type::Record(RecordType::new("Nested").field("bar", Type::Nil))),
    )
}

fn config() -> Config {
    Config::new(env())
}

fn parsed(source: &str) -> Tree {
    parse_expr(source).unwrap_or_else(|err| panic!("parse of {:?} failed: {}", source, err))
}

fn check_with(source: &str, config: &Config) -> Result<Type, LocatedTypeError> {
    check(&mut parsed(source), config)
}

fn check_ok(source: &str) -> Type {
    check_with(source, &config()).unwrap_or_else(|err| panic!("{:?} failed: {}", source, err))
}

fn check_err(source: &str) -> String {
    match check_with(source, &config()) {
        Ok(ty) => panic!("{:?} should fail, got {}", source, ty),
        Err(err) => err.error.to_string(),
    }
}

// ============================================================================
// 1. LITERALS AND OPERATORS
// ============================================================================

mod operators {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(check_ok("1"), Type::Int);
        assert_eq!(check_ok("1.5"), Type::Float);
        assert_eq!(check_ok("\"a\""), Type::String);
        assert_eq!(check_ok("nil"), Type::Nil);
        assert_eq!(check_ok("[1, 2]"), Type::array(Type::Int));
        assert_eq!(check_ok("[1, \"a\"]"), Type::array(Type::Any));
        assert_eq!(check_ok("{\"a\": 1}"), Type::map(Type::String, Type::Int));
    }

    #[test]
    fn arithmetic_promotion() {
        assert_eq!(check_ok("1 + 2"), Type::Int);
        assert_eq!(check_ok("1 + 2.5"), Type::Float);
        assert_eq!(check_ok("10 / 2"), Type::Float);
        assert_eq!(check_ok("2 ** 3"), Type::Float);
        assert_eq!(check_ok("7 % 2"), Type::Int);
        assert_eq!(check_ok("\"a\" + \"b\""), Type::String);
    }

    #[test]
    fn mismatched_operands() {
        assert_eq!(
            check_err("\"a\" + 1"),
            "invalid operation: + (mismatched types string and int)"
        );
        assert_eq!(
            check_err("1.5 % 2"),
            "invalid operation: % (mismatched types float and int)"
        );
    }

    #[test]
    fn time_arithmetic() {
        assert_eq!(check_ok("now() - started"), Type::Duration);
        assert_eq!(check_ok("started + duration(\"1h\")"), Type::Time);
        assert_eq!(check_ok("started < now()"), Type::Bool);
    }

    #[test]
    fn alias_compares_only_with_itself() {
        assert_eq!(check_ok("status == status"), Type::Bool);
        assert_eq!(
            check_err("status == \"active\""),
            "invalid operation: == (mismatched types Status and string)"
        );
    }

    #[test]
    fn condition_must_be_bool() {
        assert_eq!(
            check_err("1 ? 2 : 3"),
            "non-bool expression (type int) used as condition"
        );
        assert_eq!(check_ok("true ? 1 : 2"), Type::Int);
        assert_eq!(
            check_ok("true ? 1 : \"a\""),
            Type::union([Type::Int, Type::String])
        );
    }

    #[test]
    fn membership_and_range() {
        assert_eq!(check_ok("\"a\" in tags"), Type::Bool);
        assert_eq!(check_ok("\"a\" in scores"), Type::Bool);
        assert_eq!(check_ok("1 .. 3"), Type::array(Type::Int));
        assert!(check_err("1 in tags").starts_with("invalid operation: in"));
    }

    #[test]
    fn literal_pattern_is_compiled() {
        let mut tree = parsed("user.name matches \"^a+$\"");
        assert_eq!(check(&mut tree, &config()).unwrap(), Type::Bool);
        let NodeKind::Binary { right, .. } = &tree.node.kind else {
            panic!("expected binary");
        };
        assert!(matches!(right.kind, NodeKind::Constant(Constant::Regex(_))));
    }

    #[test]
    fn invalid_pattern() {
        assert!(check_err("\"abc\" matches \"[a-\"")
            .starts_with("invalid regular expression (regex crate syntax)"));
    }
}

// ============================================================================
// 2. ENVIRONMENT LOOKUPS
// ============================================================================

mod environment {
    use super::*;

    #[test]
    fn record_fields() {
        assert_eq!(check_ok("tags"), Type::array(Type::String));
        assert_eq!(check_ok("started"), Type::Time);
    }

    #[test]
    fn unknown_name() {
        assert_eq!(check_err("missing"), "unknown name missing");
    }

    #[test]
    fn allow_undefined() {
        let mut config = config();
        config.allow_undefined = true;
        assert_eq!(check_with("missing + 1", &config).unwrap(), Type::Any);
    }

    #[test]
    fn any_environment_accepts_every_name() {
        assert_eq!(check_with("a.b.c", &Config::default()).unwrap(), Type::Any);
    }

    #[test]
    fn map_environment() {
        let config = Config::new(Type::map(Type::String, Type::Int));
        assert_eq!(check_with("a + b", &config).unwrap(), Type::Int);
    }

    #[test]
    fn env_builtin_variable() {
        assert_eq!(check_ok("$env"), env());
    }
}

// ============================================================================
// 3. MEMBER ACCESS
// ============================================================================

mod members {
    use super::*;

    #[test]
    fn exposed_name() {
        assert_eq!(check_ok("user.name"), Type::String);
        assert_eq!(check_err("user.Name"), "type User has no field Name");
    }

    #[test]
    fn unexported_field() {
        assert_eq!(check_err("user.secret"), "cannot fetch secret");
    }

    #[test]
    fn method_call() {
        assert_eq!(check_ok("user.greeting(\"hi\")"), Type::String);
        assert_eq!(
            check_err("user.greeting(1)"),
            "cannot use int as argument (type string) to call greeting"
        );
    }

    #[test]
    fn optional_chain_adds_nil() {
        assert_eq!(
            check_ok("maybe?.age"),
            Type::union([Type::Int, Type::Nil])
        );
        assert_eq!(check_ok("maybe?.age ?? 0"), Type::Int);
    }

    #[test]
    fn optional_chain_on_nil_entry() {
        assert_eq!(check_ok("missing?.bar"), Type::Nil);
        assert_eq!(check_ok("missing?.bar.baz"), Type::Nil);
        assert_eq!(check_ok("nested.bar?.baz"), Type::Nil);
        assert_eq!(check_ok("missing?.[0]"), Type::Nil);
        assert_eq!(check_err("missing.bar"), "type nil has no field bar");
        assert_eq!(check_err("missing?.[tags.x]"), "cannot fetch string from []string");
    }

    #[test]
    fn indexing() {
        assert_eq!(check_ok("tags[0]"), Type::String);
        assert_eq!(check_ok("scores[\"a\"]"), Type::Int);
        assert_eq!(check_ok("scores.a"), Type::Int);
        assert_eq!(check_ok("tags[1:]"), Type::array(Type::String));
        assert_eq!(check_err("tags[\"x\"]"), "cannot fetch string from []string");
        assert_eq!(check_err("\"abc\"[\"x\"]"), "cannot fetch string from string");
        assert_eq!(check_err("started.x"), "type time has no field x");
    }
}

// ============================================================================
// 4. BUILTINS
// ============================================================================

mod builtins {
    use super::*;

    #[test]
    fn comprehensions() {
        assert_eq!(check_ok("filter(tags, len(#) > 1)"), Type::array(Type::String));
        assert_eq!(check_ok("map(tags, len(#))"), Type::array(Type::Int));
        assert_eq!(check_ok("count(tags, len(#) > 0)"), Type::Int);
        assert_eq!(check_ok("all(tags, # != \"\")"), Type::Bool);
        assert_eq!(
            check_ok("find(tags, # == \"x\")"),
            Type::union([Type::String, Type::Nil])
        );
        assert_eq!(
            check_ok("groupBy(tags, len(#))"),
            Type::map(Type::Int, Type::array(Type::String))
        );
        assert_eq!(check_ok("reduce([1, 2, 3], #acc + #, 0)"), Type::Int);
        assert_eq!(check_ok("sum([1, 2], # * 2)"), Type::Int);
        assert_eq!(check_ok("map(tags, #index)"), Type::array(Type::Int));
    }

    #[test]
    fn predicate_must_return_bool() {
        assert_eq!(check_err("all(tags, len(#))"), "predicate should return bool (got int)");
    }

    #[test]
    fn comprehension_over_non_array() {
        assert_eq!(check_err("map(1, #)"), "builtin map takes only array (got int)");
    }

    #[test]
    fn acc_outside_reduce() {
        assert_eq!(check_err("map(tags, #acc)"), "cannot use #acc here");
    }

    #[test]
    fn plain_builtins() {
        assert_eq!(check_ok("len(tags)"), Type::Int);
        assert_eq!(check_ok("upper(user.name)"), Type::String);
        assert_eq!(check_ok("split(\"a,b\", \",\")"), Type::array(Type::String));
        assert_eq!(check_ok("max(1, 2, 3)"), Type::Int);
        assert_eq!(check_ok("max(1, 2.5)"), Type::Float);
        assert_eq!(check_ok("mean([1, 2])"), Type::Float);
        assert_eq!(check_ok("keys(scores)"), Type::array(Type::String));
        assert_eq!(check_ok("first(tags)"), Type::union([Type::String, Type::Nil]));
        assert_eq!(check_ok("date(\"2024-01-01\")"), Type::Time);
    }

    #[test]
    fn builtin_argument_errors() {
        assert_eq!(
            check_err("len(1)"),
            "cannot use int as argument (type array, map or string) to call len"
        );
        assert_eq!(
            check_err("abs()"),
            "invalid number of arguments to abs (expected 1, got 0)"
        );
    }

    #[test]
    fn disabled_builtin_is_unknown() {
        let mut config = config();
        config.disabled.insert("upper".to_string());
        assert_eq!(
            check_with("upper(\"a\")", &config).unwrap_err().error.to_string(),
            "unknown name upper"
        );
    }
}

// ============================================================================
// 5. FUNCTIONS, BINDINGS, CONFIGURATION
// ============================================================================

mod functions {
    use super::*;

    fn with_greet() -> Config {
        let mut config = config();
        config.functions.insert(
            "greet".to_string(),
            FunctionType::new(vec![Type::String], Type::String),
        );
        config.functions.insert(
            "sumAll".to_string(),
            FunctionType::new(vec![Type::Int], Type::Int).variadic(),
        );
        config
    }

    #[test]
    fn host_function() {
        let config = with_greet();
        assert_eq!(check_with("greet(\"a\")", &config).unwrap(), Type::String);
        assert_eq!(
            check_with("greet(1)", &config).unwrap_err().error.to_string(),
            "cannot use int as argument (type string) to call greet"
        );
        assert_eq!(
            check_with("greet()", &config).unwrap_err().error.to_string(),
            "invalid number of arguments to greet (expected 1, got 0)"
        );
    }

    #[test]
    fn variadic_function() {
        let config = with_greet();
        assert_eq!(check_with("sumAll()", &config).unwrap(), Type::Int);
        assert_eq!(check_with("sumAll(1, 2, 3)", &config).unwrap(), Type::Int);
        assert!(check_with("sumAll(1, \"a\")", &config).is_err());
    }

    #[test]
    fn host_function_overrides_builtin() {
        let mut config = config();
        config.functions.insert(
            "len".to_string(),
            FunctionType::new(vec![Type::Int], Type::String),
        );
        assert_eq!(check_with("len(1)", &config).unwrap(), Type::String);
    }

    #[test]
    fn let_bindings() {
        assert_eq!(check_ok("let x = 1; x + 1"), Type::Int);
        assert_eq!(check_ok("let x = tags; let y = len(x); y"), Type::Int);
        assert_eq!(check_err("let len = 1; len"), "cannot redeclare builtin len");
        assert_eq!(check_err("let x = 1; let x = 2; x"), "cannot redeclare x");
    }

    #[test]
    fn expected_result() {
        let mut config = config();
        config.expect = Some(Type::Bool);
        assert_eq!(
            check_with("1 + 1", &config).unwrap_err().error.to_string(),
            "expected bool, but got int"
        );

        config.expect = Some(Type::Float);
        assert_eq!(check_with("1 + 1", &config).unwrap(), Type::Int);
    }

    #[test]
    fn error_location_points_at_operand() {
        let err = check_with("1 +\n  missing", &config()).unwrap_err();
        assert_eq!(err.location.line, 2);
        assert_eq!(err.location.column, 2);
    }
}

// ============================================================================
// 6. VISITORS AND PATCHES
// ============================================================================

mod patches {
    use super::*;

    #[test]
    fn context_is_injected() {
        let mut config = config();
        config.functions.insert(
            "tenantOf".to_string(),
            FunctionType::new(
                vec![Type::Record(RecordType::new("Ctx")), Type::String],
                Type::String,
            )
            .with_context(),
        );
        config.context = Some("ctx".to_string());

        let mut tree = parsed("tenantOf(\"x\")");
        let ty = check_with_visitors(&mut tree, &config, &mut []).unwrap();
        assert_eq!(ty, Type::String);
        assert_eq!(tree.node.to_string(), "tenantOf(ctx, \"x\")");
    }

    #[test]
    fn context_reaches_nested_calls() {
        let mut config = config();
        config.functions.insert(
            "tenantOf".to_string(),
            FunctionType::new(
                vec![Type::Record(RecordType::new("Ctx")), Type::String],
                Type::String,
            )
            .with_context(),
        );
        config.context = Some("ctx".to_string());

        let mut tree = parsed("tenantOf(tenantOf(\"x\"))");
        check_with_visitors(&mut tree, &config, &mut []).unwrap();
        assert_eq!(tree.node.to_string(), "tenantOf(ctx, tenantOf(ctx, \"x\"))");
    }

    #[test]
    fn opaque_values_need_the_valuer() {
        assert_eq!(
            check_err("balance + 1"),
            "invalid operation: + (mismatched types Money and int)"
        );

        let mut tree = parsed("balance + 1");
        assert_eq!(
            check_with_visitors(&mut tree, &config(), &mut []).unwrap(),
            Type::Int
        );
        assert_eq!(tree.node.to_string(), "($value_get(balance) + 1)");
    }

    #[test]
    fn user_visitor_runs_before_checking() {
        let mut visitors: Vec<Box<dyn Visitor>> = vec![Box::new(|node: &mut Node| {
            if let NodeKind::Identifier(name) = &node.kind {
                if name == "two" {
                    node.patch(Node::new(NodeKind::Integer(2), node.location));
                }
            }
        })];

        let mut tree = parsed("two * 3");
        let ty = check_with_visitors(&mut tree, &config(), &mut visitors).unwrap();
        assert_eq!(ty, Type::Int);
        assert_eq!(tree.node.to_string(), "(2 * 3)");
    }
}

// ============================================================================
// 7. OPTIMIZATION
// ============================================================================

mod optimization {
    use super::*;

    fn analyzed(source: &str) -> (Type, String) {
        let mut tree = parsed(source);
        let ty = analyze(&mut tree, &config(), &mut [], true).unwrap();
        (ty, tree.node.to_string())
    }

    #[test]
    fn folds_after_checking() {
        assert_eq!(analyzed("1 + 2 * 3"), (Type::Int, "7".to_string()));
        assert_eq!(analyzed("\"a\" + \"b\""), (Type::String, "\"ab\"".to_string()));
    }

    #[test]
    fn idioms() {
        assert_eq!(
            analyzed("len(filter(tags, len(#) > 1)) > 0"),
            (Type::Bool, "any(tags, {(len(#) > 1)})".to_string())
        );
        assert_eq!(
            analyzed("sum(map([1, 2], # * 2))"),
            (Type::Int, "sum([1, 2], {(# * 2)})".to_string())
        );
    }

    #[test]
    fn rewritten_nodes_are_typed() {
        let mut tree = parsed("user.age in [1, 2, 3]");
        analyze(&mut tree, &config(), &mut [], true).unwrap();
        let NodeKind::Binary { right, .. } = &tree.node.kind else {
            panic!("expected binary");
        };
        assert!(matches!(right.kind, NodeKind::Constant(Constant::Set(_))));
        assert_eq!(right.ty(), Type::array(Type::Int));
    }

    #[test]
    fn errors_are_kept_without_folding() {
        let mut tree = parsed("1 / 0");
        assert_eq!(analyze(&mut tree, &config(), &mut [], false).unwrap(), Type::Float);
        assert_eq!(tree.node.to_string(), "(1 / 0)");
    }
}
