//! Compile options.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use sable_syntax::{FieldType, FunctionType, ParseConfig, RecordType, Type};
use sable_types::{Config, Visitor};
use sable_vm::{Function, Limits, Value};

/// Everything `compile` needs besides the source text.
///
/// Built with chained methods:
///
/// ```ignore
/// let options = Options::new()
///     .env(schema)
///     .expect(Type::Bool)
///     .function(Function::new("double", signature, |args| ...));
/// ```
pub struct Options {
    /// Environment schema; `Any` when not given
    pub env: Option<Type>,
    /// Required result type
    pub expect: Option<Type>,
    pub functions: Vec<Arc<Function>>,
    /// User patches, run before the built-in ones
    pub visitors: Vec<Box<dyn Visitor>>,
    /// Constant folding and idiom rewrites (on by default)
    pub optimize: bool,
    /// Builtins hidden from expressions
    pub disabled: HashSet<String>,
    /// Environment entry passed to context-taking functions
    pub context: Option<String>,
    /// Unknown names type as `any` and read as nil
    pub allow_undefined: bool,
    pub limits: Limits,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: None,
            expect: None,
            functions: Vec::new(),
            visitors: Vec::new(),
            optimize: true,
            disabled: HashSet::new(),
            context: None,
            allow_undefined: false,
            limits: Limits::default(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env(mut self, schema: Type) -> Self {
        self.env = Some(schema);
        self
    }

    /// Derive the environment schema from a sample value.
    pub fn env_value(mut self, sample: &Value) -> Self {
        self.env = Some(env_schema(sample));
        self
    }

    pub fn expect(mut self, ty: Type) -> Self {
        self.expect = Some(ty);
        self
    }

    /// Make a host function callable by name. A later function with the
    /// same name replaces the earlier one.
    pub fn function(mut self, function: Function) -> Self {
        self.functions.retain(|f| f.name != function.name);
        self.functions.push(Arc::new(function));
        self
    }

    pub fn visitor(mut self, visitor: impl Visitor + 'static) -> Self {
        self.visitors.push(Box::new(visitor));
        self
    }

    pub fn optimize(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    pub fn disable(mut self, builtin: impl Into<String>) -> Self {
        self.disabled.insert(builtin.into());
        self
    }

    pub fn context(mut self, name: impl Into<String>) -> Self {
        self.context = Some(name.into());
        self
    }

    pub fn allow_undefined(mut self) -> Self {
        self.allow_undefined = true;
        self
    }

    pub fn max_stack(mut self, max_stack: usize) -> Self {
        self.limits.max_stack = max_stack;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.limits.max_depth = max_depth;
        self
    }

    pub(crate) fn parse_config(&self) -> ParseConfig {
        ParseConfig {
            disabled: self.disabled.clone(),
            functions: self.functions.iter().map(|f| f.name.clone()).collect(),
        }
    }

    pub(crate) fn check_config(&self) -> Config {
        let functions: IndexMap<String, FunctionType> = self
            .functions
            .iter()
            .map(|f| (f.name.clone(), f.signature.clone()))
            .collect();
        Config {
            env: self.env.clone().unwrap_or(Type::Any),
            expect: self.expect.clone(),
            functions,
            disabled: self.disabled.clone(),
            allow_undefined: self.allow_undefined,
            context: self.context.clone(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("env", &self.env)
            .field("expect", &self.expect)
            .field("functions", &self.functions)
            .field("visitors", &self.visitors.len())
            .field("optimize", &self.optimize)
            .field("disabled", &self.disabled)
            .field("context", &self.context)
            .field("allow_undefined", &self.allow_undefined)
            .field("limits", &self.limits)
            .finish()
    }
}

/// Schema of a sample environment. A map keyed by strings is treated as a
/// record so its entries resolve as names with their own types.
pub fn env_schema(sample: &Value) -> Type {
    let Value::Map(entries) = sample.deref() else {
        return sample.schema();
    };
    let mut record = RecordType::new("env");
    for (key, value) in entries.iter() {
        let Some(name) = key.to_value().as_str().map(str::to_string) else {
            return sample.schema();
        };
        record = record.with_field(FieldType::new(name, value.schema()));
    }
    Type::Record(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_schema_from_map() {
        let sample = Value::map([("a", Value::Int64(1)), ("b", Value::string("x"))]);
        let Type::Record(record) = env_schema(&sample) else {
            panic!("expected a record schema");
        };
        assert_eq!(record.lookup("a").map(|f| f.ty.clone()), Some(Type::Int));
        assert_eq!(record.lookup("b").map(|f| f.ty.clone()), Some(Type::String));
    }

    #[test]
    fn test_env_schema_keeps_other_values() {
        let sample = Value::from(vec![Value::Int64(1)]);
        assert_eq!(env_schema(&sample), Type::array(Type::Int));
    }

    #[test]
    fn test_function_replaces_same_name() {
        let signature = FunctionType::new(vec![], Type::Int);
        let options = Options::new()
            .function(Function::new("f", signature.clone(), |_| Ok(Value::Int64(1))))
            .function(Function::new("f", signature, |_| Ok(Value::Int64(2))));
        assert_eq!(options.functions.len(), 1);
        assert_eq!(options.functions[0].call(&[]), Ok(Value::Int64(2)));
    }

    #[test]
    fn test_check_config() {
        let config = Options::new().disable("map").context("ctx").check_config();
        assert!(config.is_disabled("map"));
        assert_eq!(config.context.as_deref(), Some("ctx"));
        assert_eq!(config.env, Type::Any);
    }
}
