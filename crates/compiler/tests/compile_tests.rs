//! Compiler tests: checked trees are lowered and run on the VM.
//!
//! Test categories:
//! 1. Instruction selection and the constant pool
//! 2. Jumps: short-circuit operators, ternaries, optional chains
//! 3. Comprehension lowering
//! 4. Names, let bindings, host functions and methods

use std::sync::Arc;

use sable_compiler::*;
use sable_syntax::{parse_expr, FunctionType, Type};
use sable_types::{check, optimize, Config};
use sable_vm::program::OpCode;
use sable_vm::{Function, Program, RecordValue, RuntimeError, Value};

// ============================================================================
// Test Infrastructure
// ============================================================================

fn env() -> Value {
    let greeting = Function::new(
        "greeting",
        FunctionType::new(vec![Type::String], Type::String),
        |args| Ok(Value::string(format!("{} there", args[0]))),
    );
    let user = RecordValue::new("User")
        .field("name", "ann")
        .field("age", 30i64)
        .method(greeting);
    Value::record(
        RecordValue::new("Env")
            .field("nums", Value::from(vec![Value::Int64(3), Value::Int64(1), Value::Int64(2), Value::Int64(4)]))
            .field("user", user)
            .field("maybe", Value::Nil)
            .field("ok", true)
            .field("no", false)
            .field("ratio", 0.5f64),
    )
}

fn functions() -> Vec<Arc<Function>> {
    vec![
        Arc::new(Function::new(
            "double",
            FunctionType::new(vec![Type::Int], Type::Int),
            |args| Ok(Value::Int64(args[0].as_int().unwrap_or(0) * 2)),
        )),
        Arc::new(Function::new(
            "total",
            FunctionType::new(vec![Type::Int], Type::Int).variadic(),
            |args| {
                let items = args[0].as_array().unwrap_or(&[]);
                Ok(Value::Int64(items.iter().filter_map(Value::as_int).sum()))
            },
        )),
    ]
}

fn schema() -> Type {
    let mut ty = env().schema();
    // `maybe` is nil in the sample; widen it to an optional user.
    if let Type::Record(record) = &mut ty {
        let user = record.lookup("user").map(|f| f.ty.clone()).unwrap_or(Type::Any);
        for field in record.fields.iter_mut() {
            if field.name == "maybe" {
                field.ty = Type::union([user.clone(), Type::Nil]);
            }
        }
    }
    ty
}

fn compiled_with(source: &str, fold: bool) -> Program {
    let mut tree = parse_expr(source).unwrap_or_else(|err| panic!("parse of {:?} failed: {}", source, err));
    let mut config = Config::new(schema());
    for function in functions() {
        config.functions.insert(function.name.clone(), function.signature.clone());
    }
    check(&mut tree, &config).unwrap_or_else(|err| panic!("{:?} failed: {}", source, err));
    if fold {
        optimize(&mut tree.node);
        check(&mut tree, &config).unwrap_or_else(|err| panic!("{:?} failed: {}", source, err));
    }
    compile(&tree, &CompilerConfig::new(functions()))
        .unwrap_or_else(|err| panic!("compile of {:?} failed: {}", source, err))
}

fn compiled(source: &str) -> Program {
    compiled_with(source, false)
}

fn eval_program(program: &Program, env: &Value) -> Value {
    sable_vm::run(program, env).unwrap_or_else(|err| panic!("run failed: {}", err))
}

fn eval(source: &str) -> Value {
    eval_program(&compiled(source), &env())
}

fn ops(program: &Program) -> Vec<OpCode> {
    program.code.iter().map(|i| i.op).collect()
}

fn ints(items: &[i64]) -> Value {
    Value::from(items.iter().map(|&i| Value::Int64(i)).collect::<Vec<_>>())
}

// ============================================================================
// 1. Instruction selection and the constant pool
// ============================================================================

#[test]
fn test_small_and_large_integers() {
    let program = compiled("1 + 2147483648");
    assert_eq!(ops(&program), vec![OpCode::PushInt, OpCode::Push, OpCode::AddInt]);
    assert_eq!(program.constants, vec![Value::Int64(2147483648)]);
    assert_eq!(eval("1 + 2147483648"), Value::Int64(2147483649));
}

#[test]
fn test_constants_are_deduplicated() {
    let program = compiled("\"a\" + \"a\" + \"b\"");
    assert_eq!(program.constants, vec![Value::string("a"), Value::string("b")]);
    assert_eq!(eval("\"a\" + \"a\" + \"b\""), Value::string("aab"));
}

#[test]
fn test_typed_fast_paths() {
    assert_eq!(ops(&compiled("1 < 2")).last(), Some(&OpCode::LtInt));
    assert_eq!(ops(&compiled("1.5 * 2.0")).last(), Some(&OpCode::MulFloat));
    assert_eq!(ops(&compiled("1 + 2.5")).last(), Some(&OpCode::Add));
    assert_eq!(ops(&compiled("ratio > 0.25")).last(), Some(&OpCode::GtFloat));
    assert_eq!(ops(&compiled("[1] + [2]")).last(), Some(&OpCode::Concat));
    assert_eq!(eval("1 + 2.5"), Value::Float64(3.5));
    assert_eq!(eval("7 % 4 == 3"), Value::Bool(true));
}

#[test]
fn test_unary_plus_emits_nothing() {
    assert_eq!(ops(&compiled("+1")), vec![OpCode::PushInt]);
    assert_eq!(ops(&compiled("-user.age")), vec![OpCode::LoadFast, OpCode::FetchField, OpCode::Neg]);
}

#[test]
fn test_in_with_literal_set() {
    let program = compiled_with("user.age in [10, 20, 30]", true);
    assert!(ops(&program).contains(&OpCode::InConst));
    assert_eq!(eval_program(&program, &env()), Value::Bool(true));

    let program = compiled_with("user.age not in [10, 20]", true);
    assert_eq!(ops(&program).last(), Some(&OpCode::Not));
    assert_eq!(eval_program(&program, &env()), Value::Bool(true));

    // Without folding the array is built at run time
    assert!(ops(&compiled("2 in nums")).contains(&OpCode::In));
    assert_eq!(eval("5 in nums"), Value::Bool(false));
}

#[test]
fn test_literal_pattern_is_precompiled() {
    let program = compiled("user.name matches \"^a.n$\"");
    assert_eq!(ops(&program).last(), Some(&OpCode::MatchesConst));
    assert!(matches!(program.constants.last(), Some(Value::Regex(_))));
    assert_eq!(eval_program(&program, &env()), Value::Bool(true));

    let program = compiled("user.name matches user.name");
    assert_eq!(ops(&program).last(), Some(&OpCode::Matches));
}

#[test]
fn test_map_and_array_literals() {
    let program = compiled("{\"a\": 1, \"b\": [1, 2]}");
    assert_eq!(program.code.last().map(|i| (i.op, i.arg)), Some((OpCode::Map, 2)));
    assert_eq!(
        eval("{\"a\": 1, \"b\": [1, 2]}").to_string(),
        "{\"a\": 1, \"b\": [1, 2]}"
    );
}

// ============================================================================
// 2. Jumps
// ============================================================================

#[test]
fn test_and_disassembly() {
    assert_eq!(
        compiled("ok && no").disassemble(),
        "0\tOpLoadFast\t0\t(\"ok\")\n\
         1\tOpJumpIfFalse\t2\t(4)\n\
         2\tOpPop\t0\n\
         3\tOpLoadFast\t1\t(\"no\")\n"
    );
}

#[test]
fn test_short_circuit_skips_errors() {
    // The right side would fail at run time
    assert_eq!(eval("no && nums[10] > 0"), Value::Bool(false));
    assert_eq!(eval("ok || nums[10] > 0"), Value::Bool(true));
    assert_eq!(eval("user.name ?? nums[10]"), Value::string("ann"));
    assert_eq!(eval("maybe ?? 7"), Value::Int64(7));
}

#[test]
fn test_conditional() {
    assert_eq!(eval("user.age > 18 ? \"adult\" : \"minor\""), Value::string("adult"));
    assert_eq!(eval("no ? 1 : 2"), Value::Int64(2));
}

#[test]
fn test_optional_chain() {
    assert_eq!(eval("maybe?.name"), Value::Nil);
    assert_eq!(eval("maybe?.name ?? \"nobody\""), Value::string("nobody"));
    assert_eq!(eval("user?.name"), Value::string("ann"));

    let program = compiled("maybe?.name");
    assert_eq!(
        ops(&program),
        vec![OpCode::LoadFast, OpCode::JumpIfNil, OpCode::FetchField]
    );
}

#[test]
fn test_slice_bounds() {
    assert_eq!(eval("nums[1:3]"), ints(&[1, 2]));
    assert_eq!(eval("nums[:2]"), ints(&[3, 1]));
    assert_eq!(eval("nums[2:]"), ints(&[2, 4]));
}

#[test]
fn test_runtime_error_location() {
    let program = compiled("1 + nums[10]");
    let err = sable_vm::run(&program, &env()).unwrap_err();
    assert!(matches!(err.error, RuntimeError::IndexOutOfRange { index: 10, length: 4 }));
    assert_eq!(program.code[err.ip].op, OpCode::Fetch);
    assert_eq!(err.location, program.location(err.ip));
}

// ============================================================================
// 3. Comprehensions
// ============================================================================

#[test]
fn test_quantifiers() {
    assert_eq!(eval("all(nums, {# > 0})"), Value::Bool(true));
    assert_eq!(eval("all(nums, {# > 1})"), Value::Bool(false));
    assert_eq!(eval("any(nums, {# > 3})"), Value::Bool(true));
    assert_eq!(eval("any(nums, {# > 4})"), Value::Bool(false));
    assert_eq!(eval("none(nums, {# > 4})"), Value::Bool(true));
    assert_eq!(eval("none(nums, {# == 1})"), Value::Bool(false));
    assert_eq!(eval("one(nums, {# > 3})"), Value::Bool(true));
    assert_eq!(eval("one(nums, {# > 2})"), Value::Bool(false));
}

#[test]
fn test_quantifiers_on_empty() {
    assert_eq!(eval("all([], {# > 0})"), Value::Bool(true));
    assert_eq!(eval("any([], {# > 0})"), Value::Bool(false));
    assert_eq!(eval("count([], {# > 0})"), Value::Int64(0));
}

#[test]
fn test_filter_map_count() {
    assert_eq!(eval("filter(nums, {# > 2})"), ints(&[3, 4]));
    assert_eq!(eval("map(nums, {# * 10})"), ints(&[30, 10, 20, 40]));
    assert_eq!(eval("map(nums, {#index})"), ints(&[0, 1, 2, 3]));
    assert_eq!(eval("count(nums, {# > 1})"), Value::Int64(3));
    assert_eq!(eval("count([true, false, true])"), Value::Int64(2));
}

#[test]
fn test_find_family() {
    assert_eq!(eval("find(nums, {# > 2})"), Value::Int64(3));
    assert_eq!(eval("findLast(nums, {# > 2})"), Value::Int64(4));
    assert_eq!(eval("findIndex(nums, {# > 2})"), Value::Int64(0));
    assert_eq!(eval("findLastIndex(nums, {# < 3})"), Value::Int64(2));
    assert_eq!(eval("find(nums, {# > 9})"), Value::Nil);
    assert_eq!(eval("findIndex(nums, {# > 9})"), Value::Int64(-1));

    let program = compiled("findLast(nums, {# > 2})");
    let begin = program.code.iter().find(|i| i.op == OpCode::Begin).map(|i| i.arg);
    assert_eq!(begin, Some(1));
}

#[test]
fn test_group_and_sort() {
    assert_eq!(
        eval("groupBy(nums, {# % 2})").to_string(),
        "{1: [3, 1], 0: [2, 4]}"
    );
    assert_eq!(eval("sortBy(nums, {#})"), ints(&[1, 2, 3, 4]));
    assert_eq!(eval("sortBy(nums, {#}, \"desc\")"), ints(&[4, 3, 2, 1]));
    assert_eq!(eval("sortBy(nums, {-#})"), ints(&[4, 3, 2, 1]));
}

#[test]
fn test_reduce_and_sum() {
    assert_eq!(eval("reduce(nums, {#acc + #})"), Value::Int64(10));
    assert_eq!(eval("reduce(nums, {#acc + #}, 10)"), Value::Int64(20));
    assert_eq!(eval("sum(nums)"), Value::Int64(10));
    assert_eq!(eval("sum(nums, {# * 2})"), Value::Int64(20));
    assert_eq!(eval("sum([], {# * 2})"), Value::Int64(0));
}

#[test]
fn test_nested_comprehensions() {
    assert_eq!(eval("count(nums, {all(nums, {# > 0})})"), Value::Int64(4));
    assert_eq!(
        eval("map(nums, {filter(nums, {# > 3})})").to_string(),
        "[[4], [4], [4], [4]]"
    );
}

// ============================================================================
// 4. Names and calls
// ============================================================================

#[test]
fn test_let_slots() {
    let program = compiled("let x = 2; let y = x * 3; y + x");
    assert_eq!(program.variables, 2);
    assert!(ops(&program).contains(&OpCode::StoreVar));
    assert_eq!(eval_program(&program, &env()), Value::Int64(8));
}

#[test]
fn test_env_identifier() {
    assert_eq!(eval("$env.user.age"), Value::Int64(30));
    assert_eq!(ops(&compiled("$env"))[0], OpCode::LoadEnv);
}

#[test]
fn test_typed_host_call() {
    let program = compiled("double(21)");
    assert_eq!(ops(&program), vec![OpCode::PushInt, OpCode::CallTyped]);
    assert_eq!(program.functions.len(), 1);
    assert_eq!(eval_program(&program, &env()), Value::Int64(42));
}

#[test]
fn test_coercing_host_call() {
    // Environment ints are not known to be 64-bit at compile time
    let program = compiled("double(user.age)");
    assert_eq!(ops(&program)[0], OpCode::LoadFunc);
    assert_eq!(ops(&program).last(), Some(&OpCode::Call));
    assert_eq!(eval_program(&program, &env()), Value::Int64(60));

    let program = compiled("total(1, 2, 3)");
    assert_eq!(ops(&program).last(), Some(&OpCode::Call));
    assert_eq!(eval_program(&program, &env()), Value::Int64(6));
}

#[test]
fn test_functions_table_holds_used_functions() {
    let program = compiled("double(1) + double(2)");
    assert_eq!(program.functions.len(), 1);
    assert_eq!(program.functions[0].name, "double");
}

#[test]
fn test_method_call() {
    let program = compiled("user.greeting(\"hi\")");
    assert_eq!(ops(&program).last(), Some(&OpCode::Method));
    assert_eq!(eval_program(&program, &env()), Value::string("hi there"));
}

#[test]
fn test_plain_builtins() {
    let program = compiled("len(nums)");
    assert_eq!(ops(&program).last(), Some(&OpCode::CallBuiltin));
    assert!(program.disassemble().contains("(len/1)"));
    assert_eq!(eval_program(&program, &env()), Value::Int64(4));
    assert_eq!(eval("upper(user.name)"), Value::string("ANN"));
}

#[test]
fn test_serialized_program_runs() {
    let program = compiled("double(21) + sum(nums)");
    let bytes = program.serialize().unwrap();
    let loaded = Program::deserialize(&bytes, &functions()).unwrap();
    assert_eq!(eval_program(&loaded, &env()), Value::Int64(52));
}
