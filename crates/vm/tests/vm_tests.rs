//! Integration tests for the VM on hand-assembled programs.
//!
//! These cover what the dispatch loop does with host values:
//! 1. Record fields, methods and unexported fields
//! 2. Host function calls with coercion and variadic tails
//! 3. Comprehension scopes (reverse, accumulators, grouping)
//! 4. Debug stepping and serialization round-trips

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use sable_syntax::{FunctionType, Location, Type};
use sable_vm::program::{pack, BEGIN_ACC_FIRST, BEGIN_REVERSE};
use sable_vm::runtime;
use sable_vm::*;

fn assemble(constants: Vec<Value>, code: &[(OpCode, u32)]) -> Program {
    let mut program = Program::new("test");
    program.constants = constants;
    for (i, (op, arg)) in code.iter().enumerate() {
        let at = Location {
            line: 1,
            column: i,
            from: i,
            to: i + 1,
        };
        program.emit(*op, *arg, at);
    }
    program
}

fn user() -> Value {
    let greet = Function::new(
        "greet",
        FunctionType::new(vec![Type::String], Type::String),
        |args| Ok(Value::string(format!("hello {}", args[0]))),
    );
    Value::record(
        RecordValue::new("User")
            .exposed("Name", "name", "Ann")
            .field("age", 30i64)
            .hidden("secret", "x")
            .method(greet),
    )
}

fn env() -> Value {
    Value::record(RecordValue::new("Env").field("user", user()))
}

// ============================================================================
// Records and methods
// ============================================================================

#[test]
fn test_fetch_exposed_field() {
    let p = assemble(
        vec![Value::string("user"), Value::string("name")],
        &[(OpCode::LoadFast, 0), (OpCode::FetchField, 1)],
    );
    assert_eq!(run(&p, &env()).unwrap(), Value::string("Ann"));
}

#[test]
fn test_unexported_field_error() {
    let p = assemble(
        vec![Value::string("user"), Value::string("secret")],
        &[(OpCode::LoadFast, 0), (OpCode::FetchField, 1)],
    );
    let err = run(&p, &env()).unwrap_err();
    assert_eq!(err.error.to_string(), "cannot fetch secret");
    assert_eq!(err.ip, 1);
    assert_eq!(err.location.column, 1);
}

#[test]
fn test_fetch_from_nil() {
    let p = assemble(
        vec![Value::string("name")],
        &[(OpCode::PushNil, 0), (OpCode::FetchField, 0)],
    );
    assert_eq!(
        run(&p, &Value::Nil).unwrap_err().error.to_string(),
        "cannot fetch name from nil"
    );
}

#[test]
fn test_method_call() {
    let p = assemble(
        vec![Value::string("user"), Value::string("greet"), Value::string("Bob")],
        &[
            (OpCode::LoadFast, 0),
            (OpCode::Push, 2),
            (OpCode::Method, pack(1, 1).unwrap()),
        ],
    );
    assert_eq!(run(&p, &env()).unwrap(), Value::string("hello Bob"));
}

#[test]
fn test_missing_method() {
    let p = assemble(
        vec![Value::string("user"), Value::string("age")],
        &[(OpCode::LoadFast, 0), (OpCode::Method, pack(1, 0).unwrap())],
    );
    assert!(matches!(
        run(&p, &env()).unwrap_err().error,
        RuntimeError::NoSuchMethod { .. }
    ));
}

// ============================================================================
// Host functions
// ============================================================================

fn sum_all() -> Arc<Function> {
    Arc::new(Function::new(
        "sumAll",
        FunctionType::new(vec![Type::Int], Type::Int).variadic(),
        |args| {
            let items = args[0].as_array().ok_or("expected array")?;
            Ok(Value::Int64(items.iter().filter_map(Value::as_int).sum()))
        },
    ))
}

#[test]
fn test_variadic_call_collects_tail() {
    let mut p = assemble(
        vec![],
        &[
            (OpCode::LoadFunc, 0),
            (OpCode::PushInt, 1),
            (OpCode::PushInt, 2),
            (OpCode::PushInt, 3),
            (OpCode::Call, 3),
        ],
    );
    p.functions.push(sum_all());
    assert_eq!(run(&p, &Value::Nil).unwrap(), Value::Int64(6));
}

#[test]
fn test_call_coerces_narrow_ints() {
    let double = Arc::new(Function::new(
        "double",
        FunctionType::new(vec![Type::Float], Type::Float),
        |args| match &args[0] {
            Value::Float64(x) => Ok(Value::Float64(x * 2.0)),
            other => Err(format!("got {:?}", other)),
        },
    ));
    let mut p = assemble(
        vec![Value::Int8(4)],
        &[(OpCode::LoadFunc, 0), (OpCode::Push, 0), (OpCode::Call, 1)],
    );
    p.functions.push(double);
    assert_eq!(run(&p, &Value::Nil).unwrap(), Value::Float64(8.0));
}

#[test]
fn test_host_error_names_function() {
    let failing = Arc::new(Function::new(
        "explode",
        FunctionType::new(vec![], Type::Nil),
        |_| Err("boom".to_string()),
    ));
    let mut p = assemble(vec![], &[(OpCode::CallTyped, pack(0, 0).unwrap())]);
    p.functions.push(failing);
    assert_eq!(
        run(&p, &Value::Nil).unwrap_err().error.to_string(),
        "explode: boom"
    );
}

#[test]
fn test_call_non_function() {
    let p = assemble(vec![], &[(OpCode::PushInt, 1), (OpCode::Call, 0)]);
    assert_eq!(
        run(&p, &Value::Nil).unwrap_err().error,
        RuntimeError::NotCallable("int".to_string())
    );
}

// ============================================================================
// Comprehension scopes
// ============================================================================

fn numbers(items: &[i64]) -> Value {
    Value::array(items.iter().map(|i| Value::Int64(*i)))
}

#[test]
fn test_find_last_index_walks_backwards() {
    // findLastIndex([1, 5, 2, 7], # > 3)
    let p = assemble(
        vec![numbers(&[1, 5, 2, 7])],
        &[
            (OpCode::Push, 0),
            (OpCode::Begin, BEGIN_REVERSE),
            (OpCode::JumpIfEnd, 7),
            (OpCode::Pointer, 0),
            (OpCode::PushInt, 3),
            (OpCode::Gt, 0),
            (OpCode::JumpIfTrue, 5),
            (OpCode::Pop, 0),
            (OpCode::Next, 0),
            (OpCode::JumpBackward, 8),
            (OpCode::PushInt, -1i32 as u32),
            (OpCode::Jump, 2),
            (OpCode::Pop, 0),
            (OpCode::GetIndex, 0),
            (OpCode::End, 0),
        ],
    );
    assert_eq!(run(&p, &Value::Nil).unwrap(), Value::Int64(3));
}

#[test]
fn test_reduce_without_initial_value() {
    // reduce([1, 2, 3], #acc + #)
    let p = assemble(
        vec![numbers(&[1, 2, 3])],
        &[
            (OpCode::Push, 0),
            (OpCode::Begin, BEGIN_ACC_FIRST),
            (OpCode::JumpIfEnd, 6),
            (OpCode::GetAcc, 0),
            (OpCode::Pointer, 0),
            (OpCode::Add, 0),
            (OpCode::SetAcc, 0),
            (OpCode::Next, 0),
            (OpCode::JumpBackward, 7),
            (OpCode::GetAcc, 0),
            (OpCode::End, 0),
        ],
    );
    assert_eq!(run(&p, &Value::Nil).unwrap(), Value::Int64(6));

    let mut empty = p.clone();
    empty.constants[0] = numbers(&[]);
    assert_eq!(
        run(&empty, &Value::Nil).unwrap_err().error.to_string(),
        "reduce of empty array"
    );
}

#[test]
fn test_group_by() {
    // groupBy([1, 2, 3, 4], # % 2)
    let p = assemble(
        vec![numbers(&[1, 2, 3, 4])],
        &[
            (OpCode::Push, 0),
            (OpCode::Begin, 0),
            (OpCode::JumpIfEnd, 6),
            (OpCode::Pointer, 0),
            (OpCode::PushInt, 2),
            (OpCode::Mod, 0),
            (OpCode::SetGroupBy, 0),
            (OpCode::Next, 0),
            (OpCode::JumpBackward, 7),
            (OpCode::GetGroupBy, 0),
            (OpCode::End, 0),
        ],
    );
    let result = run(&p, &Value::Nil).unwrap();
    assert_eq!(result.to_string(), "{1: [1, 3], 0: [2, 4]}");
}

#[test]
fn test_depth_limit() {
    let p = assemble(
        vec![numbers(&[1])],
        &[
            (OpCode::Push, 0),
            (OpCode::Begin, 0),
            (OpCode::Push, 0),
            (OpCode::Begin, 0),
        ],
    );
    let vm = Vm::new().with_limits(Limits {
        max_stack: 100,
        max_depth: 1,
    });
    assert_eq!(
        vm.run(&p, &Value::Nil).unwrap_err().error,
        RuntimeError::DepthExceeded(1)
    );
}

// ============================================================================
// Debugging and serialization
// ============================================================================

#[test]
fn test_debugger_publishes_every_position() {
    let p = assemble(
        vec![],
        &[(OpCode::PushInt, 1), (OpCode::PushInt, 2), (OpCode::Add, 0)],
    );
    let (debugger, handle) = debugger();
    let vm = Vm::new().with_debugger(debugger);

    let runner = thread::spawn(move || vm.run(&p, &Value::Nil));
    let mut positions = Vec::new();
    while let Some(ip) = handle.next() {
        positions.push(ip);
        handle.step();
    }
    assert_eq!(positions, vec![1, 2, 3]);
    assert_eq!(runner.join().unwrap().unwrap(), Value::Int64(3));
}

#[test]
fn test_dropped_debug_handle_detaches() {
    let p = assemble(vec![], &[(OpCode::PushInt, 1), (OpCode::PushInt, 2), (OpCode::Add, 0)]);
    let (debugger, handle) = debugger();
    drop(handle);
    let vm = Vm::new().with_debugger(debugger);
    assert_eq!(vm.run(&p, &Value::Nil).unwrap(), Value::Int64(3));
}

#[test]
fn test_serialized_program_runs_identically() {
    let mut p = assemble(
        vec![Value::string("user"), Value::string("age")],
        &[
            (OpCode::LoadFunc, 0),
            (OpCode::LoadFast, 0),
            (OpCode::FetchField, 1),
            (OpCode::PushInt, 2),
            (OpCode::Call, 2),
        ],
    );
    p.functions.push(sum_all());
    let bytes = p.serialize().unwrap();
    let restored = Program::deserialize(&bytes, &[sum_all()]).unwrap();

    assert_eq!(restored.disassemble(), p.disassemble());
    assert_eq!(restored.locations, p.locations);
    assert_eq!(run(&restored, &env()).unwrap(), run(&p, &env()).unwrap());
}

// ============================================================================
// Numeric promotion
// ============================================================================

fn any_int() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i8>().prop_map(Value::Int8),
        any::<i16>().prop_map(Value::Int16),
        any::<i32>().prop_map(Value::Int32),
        any::<i64>().prop_map(Value::Int64),
        any::<u8>().prop_map(Value::UInt8),
        any::<u32>().prop_map(Value::UInt32),
    ]
}

proptest! {
    #[test]
    fn prop_int_ops_match_i64(a in any_int(), b in any_int()) {
        let (x, y) = (a.as_int().unwrap(), b.as_int().unwrap());
        prop_assert_eq!(runtime::add(&a, &b).unwrap(), Value::Int64(x.wrapping_add(y)));
        prop_assert_eq!(runtime::sub(&a, &b).unwrap(), Value::Int64(x.wrapping_sub(y)));
        prop_assert_eq!(runtime::mul(&a, &b).unwrap(), Value::Int64(x.wrapping_mul(y)));
        prop_assert_eq!(runtime::less(&a, &b).unwrap(), x < y);
        prop_assert!(runtime::equal(&a, &b) == (x == y));
    }

    #[test]
    fn prop_mixed_ops_promote_to_float(a in any_int(), y in -1.0e6f64..1.0e6) {
        let x = a.as_int().unwrap() as f64;
        let b = Value::Float64(y);
        prop_assert_eq!(runtime::add(&a, &b).unwrap(), Value::Float64(x + y));
        prop_assert_eq!(runtime::mul(&b, &a).unwrap(), Value::Float64(y * x));
    }
}
