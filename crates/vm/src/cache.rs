//! Program serialization.
//!
//! A compiled program is written out as a bincode image of mirror structs:
//! constants become [`CachedValue`]s and host functions are stored by name,
//! to be re-bound against a function table when the image is loaded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sable_syntax::Location;

use crate::program::{Instruction, Program};
use crate::value::{Function, Value};

/// Image format version; bumped whenever the layout or opcode set changes.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot encode program: {0}")]
    Encode(#[from] bincode::Error),

    #[error("constant of type {0} cannot be serialized")]
    UnsupportedConstant(String),

    #[error("function {0} is not in the function table")]
    MissingFunction(String),

    #[error("program image version {found} does not match {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("invalid constant: {0}")]
    InvalidConstant(String),
}

// ============================================================================
// Mirror types
// ============================================================================

/// Serializable form of the values that can appear in a constant pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CachedValue {
    Nil,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// RFC 3339 text
    Time(String),
    /// Nanoseconds
    Duration(i64),
    Array(Vec<CachedValue>),
    Map(Vec<(CachedValue, CachedValue)>),
    Regex(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedLocation {
    pub line: usize,
    pub column: usize,
    pub from: usize,
    pub to: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedProgram {
    pub version: u32,
    pub source: String,
    pub code: Vec<Instruction>,
    pub locations: Vec<CachedLocation>,
    pub constants: Vec<CachedValue>,
    /// Host functions by name, in function-table order
    pub functions: Vec<String>,
    pub variables: usize,
}

impl CachedValue {
    pub fn from_value(value: &Value) -> Result<Self, CacheError> {
        Ok(match value {
            Value::Nil => CachedValue::Nil,
            Value::Bool(b) => CachedValue::Bool(*b),
            Value::Int8(i) => CachedValue::Int8(*i),
            Value::Int16(i) => CachedValue::Int16(*i),
            Value::Int32(i) => CachedValue::Int32(*i),
            Value::Int64(i) => CachedValue::Int64(*i),
            Value::UInt8(u) => CachedValue::UInt8(*u),
            Value::UInt16(u) => CachedValue::UInt16(*u),
            Value::UInt32(u) => CachedValue::UInt32(*u),
            Value::UInt64(u) => CachedValue::UInt64(*u),
            Value::Float32(x) => CachedValue::Float32(*x),
            Value::Float64(x) => CachedValue::Float64(*x),
            Value::String(s) => CachedValue::String(s.to_string()),
            Value::Time(t) => CachedValue::Time(t.to_rfc3339()),
            Value::Duration(d) => CachedValue::Duration(
                d.num_nanoseconds()
                    .ok_or_else(|| CacheError::UnsupportedConstant("duration".to_string()))?,
            ),
            Value::Array(items) => CachedValue::Array(
                items
                    .iter()
                    .map(CachedValue::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => CachedValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((CachedValue::from_value(&k.to_value())?, CachedValue::from_value(v)?)))
                    .collect::<Result<_, CacheError>>()?,
            ),
            Value::Regex(regex) => CachedValue::Regex(regex.as_str().to_string()),
            Value::Pointer(inner) => CachedValue::from_value(inner)?,
            other => return Err(CacheError::UnsupportedConstant(other.type_name())),
        })
    }

    pub fn to_value(&self) -> Result<Value, CacheError> {
        Ok(match self {
            CachedValue::Nil => Value::Nil,
            CachedValue::Bool(b) => Value::Bool(*b),
            CachedValue::Int8(i) => Value::Int8(*i),
            CachedValue::Int16(i) => Value::Int16(*i),
            CachedValue::Int32(i) => Value::Int32(*i),
            CachedValue::Int64(i) => Value::Int64(*i),
            CachedValue::UInt8(u) => Value::UInt8(*u),
            CachedValue::UInt16(u) => Value::UInt16(*u),
            CachedValue::UInt32(u) => Value::UInt32(*u),
            CachedValue::UInt64(u) => Value::UInt64(*u),
            CachedValue::Float32(x) => Value::Float32(*x),
            CachedValue::Float64(x) => Value::Float64(*x),
            CachedValue::String(s) => Value::string(s.as_str()),
            CachedValue::Time(text) => Value::Time(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|e| CacheError::InvalidConstant(e.to_string()))?
                    .with_timezone(&Utc),
            ),
            CachedValue::Duration(nanos) => Value::Duration(chrono::Duration::nanoseconds(*nanos)),
            CachedValue::Array(items) => Value::from(
                items
                    .iter()
                    .map(CachedValue::to_value)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            CachedValue::Map(pairs) => {
                let mut entries = IndexMap::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = key.to_value()?;
                    let key = key
                        .to_map_key()
                        .ok_or_else(|| CacheError::InvalidConstant(key.type_name()))?;
                    entries.insert(key, value.to_value()?);
                }
                Value::Map(Arc::new(entries))
            }
            CachedValue::Regex(pattern) => Value::Regex(Arc::new(
                Regex::new(pattern).map_err(|e| CacheError::InvalidConstant(e.to_string()))?,
            )),
        })
    }
}

impl From<Location> for CachedLocation {
    fn from(l: Location) -> Self {
        Self {
            line: l.line,
            column: l.column,
            from: l.from,
            to: l.to,
        }
    }
}

impl From<CachedLocation> for Location {
    fn from(l: CachedLocation) -> Self {
        Location {
            line: l.line,
            column: l.column,
            from: l.from,
            to: l.to,
        }
    }
}

// ============================================================================
// Program images
// ============================================================================

impl CachedProgram {
    pub fn from_program(program: &Program) -> Result<Self, CacheError> {
        Ok(Self {
            version: CACHE_VERSION,
            source: program.source.clone(),
            code: program.code.clone(),
            locations: program.locations.iter().copied().map(CachedLocation::from).collect(),
            constants: program
                .constants
                .iter()
                .map(CachedValue::from_value)
                .collect::<Result<_, _>>()?,
            functions: program.functions.iter().map(|f| f.name.clone()).collect(),
            variables: program.variables,
        })
    }

    /// Rebuild the program, binding function names against `functions`.
    pub fn to_program(&self, functions: &[Arc<Function>]) -> Result<Program, CacheError> {
        if self.version != CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                found: self.version,
                expected: CACHE_VERSION,
            });
        }
        let bound = self
            .functions
            .iter()
            .map(|name| {
                functions
                    .iter()
                    .find(|f| &f.name == name)
                    .cloned()
                    .ok_or_else(|| CacheError::MissingFunction(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        Ok(Program {
            source: self.source.clone(),
            code: self.code.clone(),
            locations: self.locations.iter().copied().map(Location::from).collect(),
            constants: self
                .constants
                .iter()
                .map(CachedValue::to_value)
                .collect::<Result<_, _>>()?,
            functions: bound,
            variables: self.variables,
        })
    }
}

impl Program {
    pub fn serialize(&self) -> Result<Vec<u8>, CacheError> {
        Ok(bincode::serialize(&CachedProgram::from_program(self)?)?)
    }

    pub fn deserialize(bytes: &[u8], functions: &[Arc<Function>]) -> Result<Program, CacheError> {
        let cached: CachedProgram = bincode::deserialize(bytes)?;
        cached.to_program(functions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::OpCode;

    #[test]
    fn test_cached_value_roundtrip() {
        let set = Value::Map(Arc::new(
            [(Value::Int64(1), Value::Bool(true)), (Value::string("a"), Value::Bool(true))]
                .into_iter()
                .filter_map(|(k, v)| Some((k.to_map_key()?, v)))
                .collect(),
        ));
        let cached = CachedValue::from_value(&set).unwrap();
        assert_eq!(cached.to_value().unwrap(), set);
    }

    #[test]
    fn test_unsupported_constant() {
        let record = Value::record(crate::value::RecordValue::new("User"));
        assert!(matches!(
            CachedValue::from_value(&record),
            Err(CacheError::UnsupportedConstant(name)) if name == "User"
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut program = Program::new("1");
        program.emit(OpCode::PushInt, 1, Location::default());
        let mut cached = CachedProgram::from_program(&program).unwrap();
        cached.version += 1;
        assert!(matches!(
            cached.to_program(&[]),
            Err(CacheError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_function() {
        let mut program = Program::new("f()");
        program.functions.push(Arc::new(Function::new(
            "f",
            sable_syntax::FunctionType::new(vec![], sable_syntax::Type::Int),
            |_| Ok(Value::Int64(1)),
        )));
        let bytes = program.serialize().unwrap();
        assert!(matches!(
            Program::deserialize(&bytes, &[]),
            Err(CacheError::MissingFunction(name)) if name == "f"
        ));
    }
}
