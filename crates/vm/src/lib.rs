//! sable virtual machine
//!
//! A stack VM for compiled expressions:
//! - Runtime values and host integration (value module)
//! - Programs, opcodes and the disassembler (program module)
//! - The dispatch loop, limits and cancellation (vm module)
//! - Operator semantics over every numeric width (runtime module)
//! - The builtin function library (library module)
//! - Program serialization (cache module)
//! - Single-step debugging (debug module)

use std::fmt;

use thiserror::Error;

use sable_syntax::{Location, SourceError};

pub mod cache;
pub mod debug;
pub mod library;
pub mod program;
pub mod runtime;
pub mod value;
pub mod vm;

pub use cache::CacheError;
pub use debug::{debugger, DebugHandle, Debugger};
pub use program::{Instruction, OpCode, Program};
pub use value::{FieldValue, Function, MapKey, RecordValue, Valuer, Value};
pub use vm::{run, Limits, Vm};

/// Runtime errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("integer divide by zero")]
    DivisionByZero,

    #[error("invalid operation: {left} {op} {right}")]
    InvalidOperation {
        op: String,
        left: String,
        right: String,
    },

    #[error("invalid operation: {op}{ty}")]
    InvalidUnary { op: String, ty: String },

    #[error("non-bool value (type {0}) used as condition")]
    NotBool(String),

    #[error("index out of range: {index} (array length {length})")]
    IndexOutOfRange { index: i64, length: usize },

    #[error("cannot fetch {index} from {ty}")]
    CannotFetch { ty: String, index: String },

    #[error("cannot fetch {0}")]
    Unexported(String),

    #[error("type {ty} has no field {field}")]
    NoSuchField { ty: String, field: String },

    #[error("unknown name {0}")]
    UnknownName(String),

    #[error("type {ty} has no method {method}")]
    NoSuchMethod { ty: String, method: String },

    #[error("{0} is not callable")]
    NotCallable(String),

    #[error("cannot iterate over {0}")]
    NotIterable(String),

    #[error("invalid number of arguments to {name} (expected {expected}, got {found})")]
    ArgumentCount {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("cannot use {found} as argument (type {expected}) to call {name}")]
    Coercion {
        name: String,
        expected: String,
        found: String,
    },

    #[error("invalid regular expression (regex crate syntax): {0}")]
    InvalidRegex(String),

    #[error("cannot use {0} as map key")]
    InvalidKey(String),

    #[error("{0} of empty array")]
    EmptyInput(String),

    #[error("range {from}..{to} is too large")]
    RangeTooLarge { from: i64, to: i64 },

    #[error("{name}: {message}")]
    Call { name: String, message: String },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("stack overflow (limit {0})")]
    StackOverflow(usize),

    #[error("nesting too deep (limit {0})")]
    DepthExceeded(usize),

    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

impl RuntimeError {
    pub fn invalid_operation(op: &str, left: &Value, right: &Value) -> Self {
        RuntimeError::InvalidOperation {
            op: op.to_string(),
            left: left.type_name(),
            right: right.type_name(),
        }
    }

    /// Error raised inside a builtin, attributed to it by name.
    pub fn call(name: &str, message: impl Into<String>) -> Self {
        RuntimeError::Call {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// A runtime error at a program position.
#[derive(Debug, Clone, PartialEq)]
pub struct VmError {
    pub error: RuntimeError,
    pub location: Location,
    pub ip: usize,
}

impl VmError {
    pub fn to_source_error(&self) -> SourceError {
        SourceError::runtime(self.error.to_string(), self.location)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.location)
    }
}

impl std::error::Error for VmError {}

impl From<VmError> for SourceError {
    fn from(err: VmError) -> Self {
        err.to_source_error()
    }
}
