//! sable - an embeddable expression engine.
//!
//! Expressions are compiled once against a host environment schema and
//! then evaluated many times, from any number of threads:
//!
//! ```ignore
//! let env = Value::map([("age", Value::Int64(21))]);
//! let program = sable::compile("age >= 18", Options::new().env_value(&env))?;
//! assert_eq!(sable::run(&program, &env)?, Value::Bool(true));
//! ```
//!
//! Pipeline crates:
//! - `sable-syntax`: lexer, parser, syntax tree and the type model
//! - `sable-types`: checker, visitor patches and optimizer
//! - `sable-compiler`: bytecode generation
//! - `sable-vm`: values, programs and the virtual machine

pub mod engine;
pub mod options;

pub use engine::{compile, eval, eval_with, run, run_with};
pub use options::{env_schema, Options};

pub use sable_syntax::{
    ErrorKind, FieldType, FunctionType, Location, Node, NodeKind, RecordType, Source, SourceError,
    Type,
};
pub use sable_types::Visitor;
pub use sable_vm::{
    debugger, DebugHandle, Debugger, FieldValue, Function, Limits, MapKey, Program, RecordValue,
    Valuer, Value, Vm,
};
