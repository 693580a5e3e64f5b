//! Type checking for the sable expression language.
//!
//! This crate provides:
//! - Type checking against a host environment schema (check module)
//! - Typing rules for the builtin library (builtins module)
//! - AST visitors and the patches the engine installs (patch module)
//! - The constant-folding optimizer (optimize module)
//! - Type errors (TypeError)

use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use sable_syntax::{Location, SourceError, Tree};

pub mod builtins;
pub mod check;
pub mod optimize;
pub mod patch;

pub use check::{check, check_node, Checker};
pub use optimize::optimize;
pub use patch::{walk, ContextPatcher, ValuerPatcher, Visitor};
pub use sable_syntax::{FieldType, FunctionType, RecordType, Type};

/// Checker configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Schema of the environment expressions are evaluated against
    pub env: Type,
    /// Required type of the whole expression
    pub expect: Option<Type>,
    /// Host functions: name -> signature
    pub functions: IndexMap<String, FunctionType>,
    /// Builtins that are not available
    pub disabled: HashSet<String>,
    /// Unknown names type as `any` instead of failing
    pub allow_undefined: bool,
    /// Name of the environment entry passed to context-taking functions
    pub context: Option<String>,
}

impl Config {
    pub fn new(env: Type) -> Self {
        Self {
            env,
            ..Self::default()
        }
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
    }
}

/// Type checking errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown name {0}")]
    UnknownName(String),

    #[error("type {ty} has no field {field}")]
    NoSuchField { ty: String, field: String },

    #[error("type {ty} has no method {method}")]
    NoSuchMethod { ty: String, method: String },

    #[error("cannot fetch {0}")]
    Unexported(String),

    #[error("cannot fetch {index} from {ty}")]
    NotIndexable { ty: String, index: String },

    #[error("{0} is not callable")]
    NotCallable(String),

    #[error("invalid number of arguments to {name} (expected {expected}, got {found})")]
    ArityMismatch {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("cannot use {found} as argument (type {expected}) to call {name}")]
    ArgumentMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("invalid operation: {op} (mismatched types {left} and {right})")]
    InvalidOperation {
        op: String,
        left: String,
        right: String,
    },

    #[error("invalid operation: {op} (mismatched type {ty})")]
    InvalidUnary { op: String, ty: String },

    #[error("non-bool expression (type {0}) used as condition")]
    NonBoolCondition(String),

    #[error("invalid regular expression (regex crate syntax): {0}")]
    InvalidRegex(String),

    #[error("expected {expected}, but got {found}")]
    UnexpectedResult { expected: String, found: String },

    #[error("cannot redeclare {0}")]
    Redeclared(String),

    #[error("cannot redeclare builtin {0}")]
    ShadowsBuiltin(String),

    #[error("cannot use #{0} here")]
    InvalidPointer(String),

    #[error("builtin {name} takes only array (got {ty})")]
    NotIterable { name: String, ty: String },

    #[error("predicate should return {expected} (got {found})")]
    PredicateResult { expected: String, found: String },

    #[error("{0}")]
    Custom(String),
}

/// A type error with the location of the offending node.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedTypeError {
    pub error: TypeError,
    pub location: Location,
}

impl LocatedTypeError {
    pub fn new(error: TypeError, location: Location) -> Self {
        Self { error, location }
    }

    pub fn to_source_error(&self) -> SourceError {
        SourceError::type_error(self.error.to_string(), self.location)
    }
}

impl fmt::Display for LocatedTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.location)
    }
}

impl std::error::Error for LocatedTypeError {}

impl From<LocatedTypeError> for SourceError {
    fn from(err: LocatedTypeError) -> Self {
        err.to_source_error()
    }
}

/// Check a tree, run the visitors over it and check it again.
///
/// Every visitor sees a freshly typed tree: user visitors run first, then the
/// context patcher (when a context name is configured), then the valuer
/// patcher. Errors from the intermediate passes are discarded; the final
/// check decides.
pub fn check_with_visitors(
    tree: &mut Tree,
    config: &Config,
    visitors: &mut [Box<dyn Visitor>],
) -> Result<Type, LocatedTypeError> {
    let mut context = config.context.clone().map(ContextPatcher::new);
    let mut valuer = ValuerPatcher;

    let mut passes: Vec<&mut dyn Visitor> = visitors
        .iter_mut()
        .map(|visitor| visitor.as_mut() as &mut dyn Visitor)
        .collect();
    if let Some(context) = context.as_mut() {
        passes.push(context);
    }
    passes.push(&mut valuer);

    for visitor in passes {
        let _ = check(tree, config);
        walk(&mut tree.node, visitor);
    }
    check(tree, config)
}

/// The full analysis: checking, patches and, when enabled, optimization
/// followed by a re-check so rewritten nodes carry types.
pub fn analyze(
    tree: &mut Tree,
    config: &Config,
    visitors: &mut [Box<dyn Visitor>],
    fold: bool,
) -> Result<Type, LocatedTypeError> {
    let ty = check_with_visitors(tree, config, visitors)?;
    if !fold {
        return Ok(ty);
    }
    optimize(&mut tree.node);
    check(tree, config)
}
