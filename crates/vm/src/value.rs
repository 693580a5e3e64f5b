//! Runtime values.
//!
//! A tagged enum covering the scalars hosts hand to expressions (every
//! integer width, both float widths, time and duration), ordered
//! collections, host records, callables and opaque host scalars.
//! Collections are behind `Arc`, so cloning a value never copies its
//! contents.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;

use sable_syntax::ast::quote;
use sable_syntax::{FieldType, FunctionType, RecordType, Type};

use crate::RuntimeError;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),

    // === Signed integers ===
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),

    // === Unsigned integers ===
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),

    // === Floating point ===
    Float32(f32),
    Float64(f64),

    String(Arc<String>),
    Time(DateTime<Utc>),
    Duration(chrono::Duration),

    // === Collections ===
    Array(Arc<Vec<Value>>),
    Map(Arc<IndexMap<MapKey, Value>>),
    Record(Arc<RecordValue>),

    // === Host values ===
    Function(Arc<Function>),
    /// A host value standing for a scalar, read through `$value_get`
    Opaque(Arc<dyn Valuer>),
    /// A host reference; dereferenced before use
    Pointer(Arc<Value>),

    /// Compiled pattern; only found in constant pools
    Regex(Arc<Regex>),
}

/// Hashable form of the values that can key a map.
///
/// Integers of every width share one key space, and integral floats key
/// like the integer they equal, so `m[1]` finds an entry stored under
/// `1.0` or a host `u8` 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    /// Unsigned values above `i64::MAX`
    UInt(u64),
    /// Non-integral floats by bit pattern
    Float(u64),
    String(Arc<String>),
}

/// A host structured value.
#[derive(Debug, Clone, Default)]
pub struct RecordValue {
    pub type_name: String,
    pub fields: Vec<FieldValue>,
    pub methods: IndexMap<String, Arc<Function>>,
}

#[derive(Debug, Clone)]
pub struct FieldValue {
    /// Native field name
    pub name: String,
    /// Name expressions see, when renamed by the host
    pub expose: Option<String>,
    pub exported: bool,
    pub value: Value,
}

/// Signature of host callables.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A host function with its declared signature.
pub struct Function {
    pub name: String,
    pub signature: FunctionType,
    func: Box<NativeFn>,
}

/// An opaque host value that yields a scalar.
pub trait Valuer: Send + Sync {
    /// Name the checker and error messages use for this value's type.
    fn type_name(&self) -> &str;

    /// Type of the scalar [`Valuer::value`] returns.
    fn scalar_type(&self) -> Type;

    fn value(&self) -> Value;
}

// ============================================================================
// Functions and records
// ============================================================================

impl Function {
    pub fn new<F>(name: impl Into<String>, signature: FunctionType, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            func: Box::new(func),
        }
    }

    /// Invoke the host function. Host failures become runtime errors
    /// naming the function.
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        (self.func)(args).map_err(|message| RuntimeError::Call {
            name: self.name.clone(),
            message,
        })
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<func {} {}>", self.name, self.signature)
    }
}

impl RecordValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(FieldValue {
            name: name.into(),
            expose: None,
            exported: true,
            value: value.into(),
        });
        self
    }

    /// A field visible to expressions under another name.
    pub fn exposed(
        mut self,
        name: impl Into<String>,
        expose: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.fields.push(FieldValue {
            name: name.into(),
            expose: Some(expose.into()),
            exported: true,
            value: value.into(),
        });
        self
    }

    /// A field that exists on the host type but cannot be read.
    pub fn hidden(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(FieldValue {
            name: name.into(),
            expose: None,
            exported: false,
            value: value.into(),
        });
        self
    }

    pub fn method(mut self, function: Function) -> Self {
        self.methods.insert(function.name.clone(), Arc::new(function));
        self
    }

    pub fn lookup(&self, visible: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.visible_name() == visible)
    }

    /// Exported fields in declaration order.
    pub fn visible(&self) -> impl Iterator<Item = &FieldValue> {
        self.fields.iter().filter(|f| f.exported)
    }
}

impl FieldValue {
    pub fn visible_name(&self) -> &str {
        self.expose.as_deref().unwrap_or(&self.name)
    }
}

// ============================================================================
// Map keys
// ============================================================================

impl MapKey {
    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Nil => Value::Nil,
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Int(i) => Value::Int64(*i),
            MapKey::UInt(u) => Value::UInt64(*u),
            MapKey::Float(bits) => Value::Float64(f64::from_bits(*bits)),
            MapKey::String(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::String(Arc::new(s.to_string()))
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value().repr())
    }
}

// ============================================================================
// Value implementations
// ============================================================================

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Arc::new(s.into()))
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Array(Arc::new(items.into_iter().collect()))
    }

    /// A map with string keys.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Map(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (MapKey::String(Arc::new(k.into())), v))
                .collect(),
        ))
    }

    pub fn record(record: RecordValue) -> Value {
        Value::Record(Arc::new(record))
    }

    pub fn function(function: Function) -> Value {
        Value::Function(Arc::new(function))
    }

    pub fn opaque(valuer: impl Valuer + 'static) -> Value {
        Value::Opaque(Arc::new(valuer))
    }

    pub fn pointer(value: Value) -> Value {
        Value::Pointer(Arc::new(value))
    }

    /// Follow host references down to the value they point at.
    pub fn deref(&self) -> &Value {
        let mut value = self;
        while let Value::Pointer(inner) = value {
            value = inner;
        }
        value
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.deref(), Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.deref() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer width as `i64`; unsigned values above `i64::MAX` wrap.
    pub fn as_int(&self) -> Option<i64> {
        Some(match self.deref() {
            Value::Int8(i) => *i as i64,
            Value::Int16(i) => *i as i64,
            Value::Int32(i) => *i as i64,
            Value::Int64(i) => *i,
            Value::UInt8(u) => *u as i64,
            Value::UInt16(u) => *u as i64,
            Value::UInt32(u) => *u as i64,
            Value::UInt64(u) => *u as i64,
            _ => return None,
        })
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.deref() {
            Value::Float32(x) => Some(*x as f64),
            Value::Float64(x) => Some(*x),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn is_integer(&self) -> bool {
        self.as_int().is_some()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.deref() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self.deref() {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Type name as expressions see it.
    pub fn type_name(&self) -> String {
        match self.deref() {
            Value::Nil => "nil".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int8(_) => "int8".to_string(),
            Value::Int16(_) => "int16".to_string(),
            Value::Int32(_) => "int32".to_string(),
            Value::Int64(_) => "int".to_string(),
            Value::UInt8(_) => "uint8".to_string(),
            Value::UInt16(_) => "uint16".to_string(),
            Value::UInt32(_) => "uint32".to_string(),
            Value::UInt64(_) => "uint64".to_string(),
            Value::Float32(_) => "float32".to_string(),
            Value::Float64(_) => "float".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Time(_) => "time".to_string(),
            Value::Duration(_) => "duration".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::Map(_) => "map".to_string(),
            Value::Record(record) => record.type_name.clone(),
            Value::Function(_) => "func".to_string(),
            Value::Opaque(valuer) => valuer.type_name().to_string(),
            Value::Regex(_) => "regexp".to_string(),
            Value::Pointer(_) => "nil".to_string(),
        }
    }

    pub fn to_map_key(&self) -> Option<MapKey> {
        Some(match self.deref() {
            Value::Nil => MapKey::Nil,
            Value::Bool(b) => MapKey::Bool(*b),
            Value::UInt64(u) if *u > i64::MAX as u64 => MapKey::UInt(*u),
            Value::Float32(_) | Value::Float64(_) => {
                let x = self.as_float()?;
                if x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 {
                    MapKey::Int(x as i64)
                } else {
                    MapKey::Float(x.to_bits())
                }
            }
            Value::String(s) => MapKey::String(s.clone()),
            other => MapKey::Int(other.as_int()?),
        })
    }

    /// Structural type of this value, used to derive an environment schema
    /// from a sample.
    pub fn schema(&self) -> Type {
        match self.deref() {
            Value::Nil => Type::Nil,
            Value::Bool(_) => Type::Bool,
            Value::Float32(_) | Value::Float64(_) => Type::Float,
            Value::String(_) => Type::String,
            Value::Time(_) => Type::Time,
            Value::Duration(_) => Type::Duration,
            Value::Array(items) => Type::array(common(items.iter().map(Value::schema))),
            Value::Map(entries) => Type::map(
                common(entries.keys().map(|k| k.to_value().schema())),
                common(entries.values().map(Value::schema)),
            ),
            Value::Record(record) => Type::Record(record.schema()),
            Value::Function(function) => Type::Func(function.signature.clone()),
            Value::Opaque(valuer) => Type::opaque(valuer.type_name(), valuer.scalar_type()),
            Value::Regex(_) | Value::Pointer(_) => Type::Any,
            other if other.is_integer() => Type::Int,
            _ => Type::Any,
        }
    }

    /// Quoted form used inside collections and by `string()` on them.
    pub fn repr(&self) -> String {
        match self.deref() {
            Value::String(s) => quote(s),
            other => other.to_string(),
        }
    }
}

impl RecordValue {
    pub fn schema(&self) -> RecordType {
        let mut record = RecordType::new(self.type_name.clone());
        for field in &self.fields {
            let mut ty = FieldType::new(field.name.clone(), field.value.schema());
            ty.expose = field.expose.clone();
            ty.exported = field.exported;
            record = record.with_field(ty);
        }
        for (name, method) in &self.methods {
            record = record.method(name.clone(), method.signature.clone());
        }
        record
    }
}

/// One shared type, or `any` when members disagree.
fn common(types: impl Iterator<Item = Type>) -> Type {
    let mut result: Option<Type> = None;
    for ty in types {
        match &result {
            None => result = Some(ty),
            Some(existing) if *existing == ty => {}
            Some(_) => return Type::Any,
        }
    }
    result.unwrap_or(Type::Any)
}

// ============================================================================
// Conversions
// ============================================================================

macro_rules! from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

from_scalar! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    DateTime<Utc> => Time,
    chrono::Duration => Duration,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }
}

impl From<RecordValue> for Value {
    fn from(record: RecordValue) -> Self {
        Value::record(record)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

// ============================================================================
// Formatting and equality
// ============================================================================

/// Go-style duration text: `1h2m3.5s`, `150ms`, `0s`.
pub fn format_duration(d: &chrono::Duration) -> String {
    let Some(total) = d.num_nanoseconds() else {
        return format!("{}s", d.num_seconds());
    };
    if total == 0 {
        return "0s".to_string();
    }
    let sign = if total < 0 { "-" } else { "" };
    let nanos = total.unsigned_abs();

    if nanos < 1_000 {
        return format!("{}{}ns", sign, nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}{}µs", sign, trim_fraction(nanos as f64 / 1e3));
    }
    if nanos < 1_000_000_000 {
        return format!("{}{}ms", sign, trim_fraction(nanos as f64 / 1e6));
    }

    let hours = nanos / 3_600_000_000_000;
    let minutes = (nanos / 60_000_000_000) % 60;
    let seconds = (nanos % 60_000_000_000) as f64 / 1e9;
    let mut out = sign.to_string();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", trim_fraction(seconds)));
    out
}

fn trim_fraction(x: f64) -> String {
    let text = format!("{:.9}", x);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    text.to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int8(i) => write!(f, "{}", i),
            Value::Int16(i) => write!(f, "{}", i),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::UInt8(u) => write!(f, "{}", u),
            Value::UInt16(u) => write!(f, "{}", u),
            Value::UInt32(u) => write!(f, "{}", u),
            Value::UInt64(u) => write!(f, "{}", u),
            Value::Float32(x) => write!(f, "{}", x),
            Value::Float64(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Duration(d) => write!(f, "{}", format_duration(d)),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value.repr())?;
                }
                write!(f, "}}")
            }
            Value::Record(record) => {
                write!(f, "{}{{", record.type_name)?;
                for (i, field) in record.visible().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.visible_name(), field.value.repr())?;
                }
                write!(f, "}}")
            }
            Value::Function(function) => write!(f, "<func {}>", function.name),
            Value::Opaque(valuer) => write!(f, "{}", valuer.value()),
            Value::Pointer(inner) => write!(f, "{}", inner),
            Value::Regex(regex) => write!(f, "{}", regex.as_str()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int8(i) => write!(f, "{}i8", i),
            Value::Int16(i) => write!(f, "{}i16", i),
            Value::Int32(i) => write!(f, "{}i32", i),
            Value::UInt8(u) => write!(f, "{}u8", u),
            Value::UInt16(u) => write!(f, "{}u16", u),
            Value::UInt32(u) => write!(f, "{}u32", u),
            Value::UInt64(u) => write!(f, "{}u64", u),
            Value::Float32(x) => write!(f, "{}f32", x),
            Value::Float64(x) => write!(f, "{:?}", x),
            Value::Opaque(valuer) => write!(f, "<{} {:?}>", valuer.type_name(), valuer.value()),
            Value::Pointer(inner) => write!(f, "&{:?}", inner),
            other => write!(f, "{}", other.repr()),
        }
    }
}

/// Structural equality of the same variant; cross-width numeric equality is
/// the runtime's job (`runtime::equal`).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int8(a), Value::Int8(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt8(a), Value::UInt8(b)) => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => {
                a.type_name == b.type_name
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|(x, y)| {
                        x.name == y.name && x.value == y.value
                    })
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => a.value() == b.value(),
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}
