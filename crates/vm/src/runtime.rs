//! Operator semantics.
//!
//! Every value-consuming helper dereferences host pointers first. Numbers
//! of any width meet on a common type: integers become `i64`, any float
//! makes the result `f64` unless both sides are `f32`. Integer `+ - *`
//! wrap; division always yields a float; modulo is integer-only.

use std::cmp::Ordering;
use std::sync::Arc;

use regex::Regex;

use sable_syntax::Type;

use crate::value::{Function, MapKey, Value};
use crate::RuntimeError;

/// Upper bound on the length of a `..` range.
pub const MAX_RANGE: i64 = 1 << 24;

// ============================================================================
// Numbers
// ============================================================================

/// Two operands promoted to a common representation.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Numbers {
    Int(i64, i64),
    F32(f32, f32),
    F64(f64, f64),
}

fn numbers(left: &Value, right: &Value) -> Option<Numbers> {
    match (left, right) {
        (Value::Float32(a), Value::Float32(b)) => Some(Numbers::F32(*a, *b)),
        (Value::Float32(_) | Value::Float64(_), _) | (_, Value::Float32(_) | Value::Float64(_)) => {
            Some(Numbers::F64(left.as_float()?, right.as_float()?))
        }
        _ => Some(Numbers::Int(left.as_int()?, right.as_int()?)),
    }
}

fn duration_nanos(d: &chrono::Duration, op: &str) -> Result<i64, RuntimeError> {
    d.num_nanoseconds()
        .ok_or_else(|| RuntimeError::call(op, "duration overflow"))
}

fn overflow(op: &str) -> RuntimeError {
    RuntimeError::call(op, "time overflow")
}

pub fn add(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (left.deref(), right.deref());
    if let Some(pair) = numbers(a, b) {
        return Ok(match pair {
            Numbers::Int(x, y) => Value::Int64(x.wrapping_add(y)),
            Numbers::F32(x, y) => Value::Float32(x + y),
            Numbers::F64(x, y) => Value::Float64(x + y),
        });
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::string(s))
        }
        (Value::Time(t), Value::Duration(d)) | (Value::Duration(d), Value::Time(t)) => t
            .checked_add_signed(*d)
            .map(Value::Time)
            .ok_or_else(|| overflow("+")),
        (Value::Duration(x), Value::Duration(y)) => x
            .checked_add(y)
            .map(Value::Duration)
            .ok_or_else(|| overflow("+")),
        (Value::Array(_), Value::Array(_)) => concat(a, b),
        _ => Err(RuntimeError::invalid_operation("+", a, b)),
    }
}

pub fn sub(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (left.deref(), right.deref());
    if let Some(pair) = numbers(a, b) {
        return Ok(match pair {
            Numbers::Int(x, y) => Value::Int64(x.wrapping_sub(y)),
            Numbers::F32(x, y) => Value::Float32(x - y),
            Numbers::F64(x, y) => Value::Float64(x - y),
        });
    }
    match (a, b) {
        (Value::Time(x), Value::Time(y)) => Ok(Value::Duration(x.signed_duration_since(*y))),
        (Value::Time(t), Value::Duration(d)) => t
            .checked_sub_signed(*d)
            .map(Value::Time)
            .ok_or_else(|| overflow("-")),
        (Value::Duration(x), Value::Duration(y)) => x
            .checked_sub(y)
            .map(Value::Duration)
            .ok_or_else(|| overflow("-")),
        _ => Err(RuntimeError::invalid_operation("-", a, b)),
    }
}

pub fn mul(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (left.deref(), right.deref());
    if let Some(pair) = numbers(a, b) {
        return Ok(match pair {
            Numbers::Int(x, y) => Value::Int64(x.wrapping_mul(y)),
            Numbers::F32(x, y) => Value::Float32(x * y),
            Numbers::F64(x, y) => Value::Float64(x * y),
        });
    }
    let scale = |d: &chrono::Duration, n: i64| {
        duration_nanos(d, "*")?
            .checked_mul(n)
            .map(|nanos| Value::Duration(chrono::Duration::nanoseconds(nanos)))
            .ok_or_else(|| overflow("*"))
    };
    match (a, b) {
        (Value::Duration(d), n) | (n, Value::Duration(d)) if n.is_integer() => {
            scale(d, n.as_int().unwrap_or_default())
        }
        _ => Err(RuntimeError::invalid_operation("*", a, b)),
    }
}

pub fn div(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (left.deref(), right.deref());
    match numbers(a, b) {
        Some(Numbers::Int(_, 0)) => Err(RuntimeError::DivisionByZero),
        Some(Numbers::Int(x, y)) => Ok(Value::Float64(x as f64 / y as f64)),
        Some(Numbers::F32(x, y)) => Ok(Value::Float64(x as f64 / y as f64)),
        Some(Numbers::F64(x, y)) => Ok(Value::Float64(x / y)),
        None => Err(RuntimeError::invalid_operation("/", a, b)),
    }
}

pub fn modulo(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (left.deref(), right.deref());
    match numbers(a, b) {
        Some(Numbers::Int(_, 0)) => Err(RuntimeError::DivisionByZero),
        Some(Numbers::Int(x, y)) => Ok(Value::Int64(x.wrapping_rem(y))),
        _ => Err(RuntimeError::invalid_operation("%", a, b)),
    }
}

pub fn pow(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (left.deref(), right.deref());
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => Ok(Value::Float64(x.powf(y))),
        _ => Err(RuntimeError::invalid_operation("**", a, b)),
    }
}

pub fn negate(value: &Value) -> Result<Value, RuntimeError> {
    match value.deref() {
        Value::Float32(x) => Ok(Value::Float32(-x)),
        Value::Float64(x) => Ok(Value::Float64(-x)),
        Value::Duration(d) => Ok(Value::Duration(-*d)),
        v => match v.as_int() {
            Some(i) => Ok(Value::Int64(i.wrapping_neg())),
            None => Err(RuntimeError::InvalidUnary {
                op: "-".to_string(),
                ty: v.type_name(),
            }),
        },
    }
}

pub fn not(value: &Value) -> Result<Value, RuntimeError> {
    match value.deref() {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        v => Err(RuntimeError::InvalidUnary {
            op: "!".to_string(),
            ty: v.type_name(),
        }),
    }
}

pub fn concat(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left.deref(), right.deref()) {
        (Value::Array(x), Value::Array(y)) => {
            let mut items = Vec::with_capacity(x.len() + y.len());
            items.extend(x.iter().cloned());
            items.extend(y.iter().cloned());
            Ok(Value::from(items))
        }
        (a, b) => Err(RuntimeError::invalid_operation("+", a, b)),
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Ordering of two comparable values; `None` when unordered (NaN).
fn ordering(op: &str, left: &Value, right: &Value) -> Result<Option<Ordering>, RuntimeError> {
    let (a, b) = (left.deref(), right.deref());
    if let Some(pair) = numbers(a, b) {
        return Ok(match pair {
            Numbers::Int(x, y) => Some(x.cmp(&y)),
            Numbers::F32(x, y) => x.partial_cmp(&y),
            Numbers::F64(x, y) => x.partial_cmp(&y),
        });
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(Some(x.cmp(y))),
        (Value::Time(x), Value::Time(y)) => Ok(Some(x.cmp(y))),
        (Value::Duration(x), Value::Duration(y)) => Ok(Some(x.cmp(y))),
        _ => Err(RuntimeError::invalid_operation(op, a, b)),
    }
}

pub fn less(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    Ok(ordering("<", left, right)? == Some(Ordering::Less))
}

pub fn less_equal(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    Ok(matches!(
        ordering("<=", left, right)?,
        Some(Ordering::Less | Ordering::Equal)
    ))
}

pub fn greater(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    Ok(ordering(">", left, right)? == Some(Ordering::Greater))
}

pub fn greater_equal(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    Ok(matches!(
        ordering(">=", left, right)?,
        Some(Ordering::Greater | Ordering::Equal)
    ))
}

/// Total order used by `sortBy`, `min` and `max`.
pub fn compare(left: &Value, right: &Value) -> Result<Ordering, RuntimeError> {
    Ok(ordering("<", left, right)?.unwrap_or(Ordering::Equal))
}

/// Equality across numeric widths and through pointers and valuers.
/// Values of unrelated types are unequal, never an error.
pub fn equal(left: &Value, right: &Value) -> bool {
    let (a, b) = (left.deref(), right.deref());
    if let Some(pair) = numbers(a, b) {
        return match pair {
            Numbers::Int(x, y) => x == y,
            Numbers::F32(x, y) => x == y,
            Numbers::F64(x, y) => x == y,
        };
    }
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Time(x), Value::Time(y)) => x == y,
        (Value::Duration(x), Value::Duration(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| equal(p, q))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| equal(value, other)))
        }
        (Value::Record(x), Value::Record(y)) => {
            x.type_name == y.type_name
                && x.fields.len() == y.fields.len()
                && x.fields
                    .iter()
                    .zip(&y.fields)
                    .all(|(p, q)| p.name == q.name && equal(&p.value, &q.value))
        }
        (Value::Function(x), Value::Function(y)) => Arc::ptr_eq(x, y),
        (Value::Opaque(x), _) => equal(&x.value(), b),
        (_, Value::Opaque(y)) => equal(a, &y.value()),
        _ => false,
    }
}

/// Boolean required by jumps and logical operators.
pub fn as_condition(value: &Value) -> Result<bool, RuntimeError> {
    value
        .as_bool()
        .ok_or_else(|| RuntimeError::NotBool(value.type_name()))
}

// ============================================================================
// Membership and strings
// ============================================================================

/// `needle in haystack`.
pub fn contains_value(needle: &Value, haystack: &Value) -> Result<bool, RuntimeError> {
    match haystack.deref() {
        Value::Array(items) => Ok(items.iter().any(|item| equal(needle, item))),
        Value::Map(entries) => Ok(needle
            .to_map_key()
            .is_some_and(|key| entries.contains_key(&key))),
        Value::Record(record) => match needle.as_str() {
            Some(name) => Ok(record
                .lookup(name)
                .is_some_and(|field| field.exported)),
            None => Err(RuntimeError::invalid_operation("in", needle.deref(), haystack)),
        },
        Value::String(s) => match needle.as_str() {
            Some(sub) => Ok(s.contains(sub)),
            None => Err(RuntimeError::invalid_operation("in", needle.deref(), haystack)),
        },
        Value::Nil => Ok(false),
        other => Err(RuntimeError::invalid_operation("in", needle.deref(), other)),
    }
}

/// Membership in a prepared set (a map whose keys are the members).
pub fn in_set(needle: &Value, set: &Value) -> Result<bool, RuntimeError> {
    match set {
        Value::Map(entries) => Ok(needle
            .to_map_key()
            .is_some_and(|key| entries.contains_key(&key))),
        other => contains_value(needle, other),
    }
}

fn strings<'a>(
    op: &str,
    left: &'a Value,
    right: &'a Value,
) -> Result<(&'a str, &'a str), RuntimeError> {
    match (left.as_str(), right.as_str()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RuntimeError::invalid_operation(op, left.deref(), right.deref())),
    }
}

pub fn matches(text: &Value, pattern: &Value) -> Result<bool, RuntimeError> {
    let (text, pattern) = strings("matches", text, pattern)?;
    let regex = Regex::new(pattern).map_err(|err| RuntimeError::InvalidRegex(err.to_string()))?;
    Ok(regex.is_match(text))
}

pub fn matches_regex(text: &Value, regex: &Value) -> Result<bool, RuntimeError> {
    match regex {
        Value::Regex(compiled) => match text.as_str() {
            Some(text) => Ok(compiled.is_match(text)),
            None => Err(RuntimeError::invalid_operation("matches", text.deref(), regex)),
        },
        pattern => matches(text, pattern),
    }
}

pub fn contains(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    let (a, b) = strings("contains", left, right)?;
    Ok(a.contains(b))
}

pub fn starts_with(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    let (a, b) = strings("startsWith", left, right)?;
    Ok(a.starts_with(b))
}

pub fn ends_with(left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    let (a, b) = strings("endsWith", left, right)?;
    Ok(a.ends_with(b))
}

/// `from..to`, inclusive; empty when `from > to`.
pub fn range(from: &Value, to: &Value) -> Result<Value, RuntimeError> {
    let (Some(a), Some(b)) = (from.as_int(), to.as_int()) else {
        return Err(RuntimeError::invalid_operation("..", from.deref(), to.deref()));
    };
    if b < a {
        return Ok(Value::array([]));
    }
    if b.saturating_sub(a) >= MAX_RANGE {
        return Err(RuntimeError::RangeTooLarge { from: a, to: b });
    }
    Ok(Value::array((a..=b).map(Value::Int64)))
}

// ============================================================================
// Access
// ============================================================================

/// Resolve a possibly negative index against a length.
fn normalize(index: i64, length: usize) -> Option<usize> {
    let resolved = if index < 0 {
        index + length as i64
    } else {
        index
    };
    (resolved >= 0 && (resolved as usize) < length).then_some(resolved as usize)
}

/// `receiver[index]`.
pub fn fetch(receiver: &Value, index: &Value) -> Result<Value, RuntimeError> {
    let receiver = receiver.deref();
    let cannot = || RuntimeError::CannotFetch {
        ty: receiver.type_name(),
        index: index.repr(),
    };
    match receiver {
        Value::Array(items) => {
            let i = index.as_int().ok_or_else(cannot)?;
            normalize(i, items.len())
                .map(|i| items[i].clone())
                .ok_or(RuntimeError::IndexOutOfRange {
                    index: i,
                    length: items.len(),
                })
        }
        Value::String(s) => {
            let i = index.as_int().ok_or_else(cannot)?;
            let length = s.chars().count();
            normalize(i, length)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::string(c.to_string()))
                .ok_or(RuntimeError::IndexOutOfRange { index: i, length })
        }
        Value::Map(entries) => {
            let key = index
                .to_map_key()
                .ok_or_else(|| RuntimeError::InvalidKey(index.type_name()))?;
            Ok(entries.get(&key).cloned().unwrap_or(Value::Nil))
        }
        Value::Record(_) => match index.as_str() {
            Some(name) => fetch_field(receiver, name),
            None => Err(cannot()),
        },
        _ => Err(cannot()),
    }
}

/// `receiver.name`. Maps yield nil for missing keys; records reject
/// unknown and unexported fields.
pub fn fetch_field(receiver: &Value, name: &str) -> Result<Value, RuntimeError> {
    match receiver.deref() {
        Value::Map(entries) => Ok(entries
            .get(&MapKey::from(name))
            .cloned()
            .unwrap_or(Value::Nil)),
        Value::Record(record) => {
            if let Some(field) = record.lookup(name) {
                if !field.exported {
                    return Err(RuntimeError::Unexported(name.to_string()));
                }
                return Ok(field.value.clone());
            }
            match record.methods.get(name) {
                Some(method) => Ok(Value::Function(method.clone())),
                None => Err(RuntimeError::NoSuchField {
                    ty: record.type_name.clone(),
                    field: name.to_string(),
                }),
            }
        }
        other => Err(RuntimeError::CannotFetch {
            ty: other.type_name(),
            index: name.to_string(),
        }),
    }
}

/// Look a name up in the environment.
pub fn lookup_env(env: &Value, name: &str) -> Result<Value, RuntimeError> {
    match env.deref() {
        Value::Record(_) => fetch_field(env, name).map_err(|err| match err {
            RuntimeError::NoSuchField { .. } => RuntimeError::UnknownName(name.to_string()),
            other => other,
        }),
        Value::Map(_) => fetch_field(env, name),
        Value::Nil => Ok(Value::Nil),
        _ => Err(RuntimeError::UnknownName(name.to_string())),
    }
}

/// `receiver[from:to]` with Python-style clamping.
pub fn slice(receiver: &Value, from: &Value, to: &Value) -> Result<Value, RuntimeError> {
    let receiver = receiver.deref();
    let length = match receiver {
        Value::Array(items) => items.len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(RuntimeError::CannotFetch {
                ty: other.type_name(),
                index: "slice".to_string(),
            })
        }
    };
    let bound = |value: &Value, default: usize| -> Result<usize, RuntimeError> {
        if value.is_nil() {
            return Ok(default);
        }
        let i = value.as_int().ok_or_else(|| RuntimeError::CannotFetch {
            ty: receiver.type_name(),
            index: value.repr(),
        })?;
        let resolved = if i < 0 { i + length as i64 } else { i };
        Ok(resolved.clamp(0, length as i64) as usize)
    };
    let start = bound(from, 0)?;
    let end = bound(to, length)?.max(start);

    Ok(match receiver {
        Value::Array(items) => Value::from(items[start..end].to_vec()),
        Value::String(s) => Value::string(s.chars().skip(start).take(end - start).collect::<String>()),
        _ => Value::Nil,
    })
}

// ============================================================================
// Calls
// ============================================================================

/// Convert an argument to a declared parameter type: integers widen to
/// `int`, numbers widen to `float`, pointers are followed.
pub fn coerce(value: &Value, expected: &Type) -> Option<Value> {
    let value = value.deref();
    let ok = match expected.base() {
        Type::Any | Type::Unknown | Type::Union(_) => true,
        Type::Int => return value.as_int().map(Value::Int64),
        Type::Float => {
            return match value {
                Value::Float32(_) | Value::Float64(_) => value.as_float().map(Value::Float64),
                other => other.as_int().map(|i| Value::Float64(i as f64)),
            }
        }
        Type::Nil => value.is_nil(),
        Type::Bool => matches!(value, Value::Bool(_)),
        Type::String => matches!(value, Value::String(_)),
        Type::Time => matches!(value, Value::Time(_)),
        Type::Duration => matches!(value, Value::Duration(_)),
        Type::Array(_) => matches!(value, Value::Array(_) | Value::Nil),
        Type::Map(..) => matches!(value, Value::Map(_) | Value::Nil),
        Type::Record(record) => match value {
            Value::Record(r) => r.type_name == record.name,
            Value::Map(_) | Value::Nil => true,
            _ => false,
        },
        Type::Func(_) => matches!(value, Value::Function(_) | Value::Nil),
        Type::Opaque { .. } => matches!(value, Value::Opaque(_)),
        Type::Named { .. } => true,
    };
    ok.then(|| value.clone())
}

/// Generic call: arity check, per-parameter coercion, variadic tail
/// collected into one array argument.
pub fn call_function(function: &Function, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
    let signature = &function.signature;
    let fixed = signature.min_args();
    let arity_ok = if signature.variadic {
        args.len() >= fixed
    } else {
        args.len() == fixed
    };
    if !arity_ok {
        return Err(RuntimeError::ArgumentCount {
            name: function.name.clone(),
            expected: if signature.variadic {
                format!("at least {}", fixed)
            } else {
                fixed.to_string()
            },
            found: args.len(),
        });
    }

    for (index, arg) in args.iter_mut().enumerate() {
        let Some(expected) = signature.param(index) else {
            continue;
        };
        *arg = coerce(arg, expected).ok_or_else(|| RuntimeError::Coercion {
            name: function.name.clone(),
            expected: expected.to_string(),
            found: arg.type_name(),
        })?;
    }

    if signature.variadic {
        let tail = args.split_off(fixed);
        args.push(Value::from(tail));
    }
    function.call(&args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int64(i)
    }

    #[test]
    fn test_promotion() {
        assert_eq!(add(&Value::Int8(1), &Value::UInt32(2)).unwrap(), int(3));
        assert_eq!(
            add(&Value::Float32(1.5), &Value::Float32(1.0)).unwrap(),
            Value::Float32(2.5)
        );
        assert_eq!(
            add(&Value::Float32(1.5), &int(1)).unwrap(),
            Value::Float64(2.5)
        );
        assert_eq!(div(&int(7), &int(2)).unwrap(), Value::Float64(3.5));
        assert_eq!(modulo(&int(7), &Value::Int16(4)).unwrap(), int(3));
    }

    #[test]
    fn test_integer_overflow_wraps() {
        assert_eq!(add(&int(i64::MAX), &int(1)).unwrap(), int(i64::MIN));
        assert_eq!(mul(&int(i64::MAX), &int(2)).unwrap(), int(-2));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(div(&int(1), &int(0)), Err(RuntimeError::DivisionByZero));
        assert_eq!(modulo(&int(1), &int(0)), Err(RuntimeError::DivisionByZero));
        assert_eq!(
            div(&Value::Float64(1.0), &int(0)).unwrap(),
            Value::Float64(f64::INFINITY)
        );
    }

    #[test]
    fn test_equality_across_widths() {
        assert!(equal(&Value::UInt8(1), &Value::Float64(1.0)));
        assert!(equal(&Value::Nil, &Value::pointer(Value::Nil)));
        assert!(!equal(&int(1), &Value::string("1")));
        assert!(equal(
            &Value::array([int(1), Value::string("a")]),
            &Value::array([Value::Int32(1), Value::string("a")])
        ));
    }

    #[test]
    fn test_time_arithmetic() {
        let t = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let day = chrono::Duration::hours(24);
        let later = add(&Value::Time(t), &Value::Duration(day)).unwrap();
        assert_eq!(sub(&later, &Value::Time(t)).unwrap(), Value::Duration(day));
        assert!(less(&Value::Time(t), &later).unwrap());
        assert_eq!(
            mul(&Value::Duration(day), &int(2)).unwrap(),
            Value::Duration(chrono::Duration::hours(48))
        );
    }

    #[test]
    fn test_mismatch_message() {
        assert_eq!(
            add(&int(1), &Value::string("a")).unwrap_err().to_string(),
            "invalid operation: int + string"
        );
    }

    #[test]
    fn test_matches_compiled_regex() {
        let regex = Value::Regex(Arc::new(Regex::new("^a+$").unwrap()));
        assert_eq!(matches_regex(&Value::string("aaa"), &regex), Ok(true));
        assert_eq!(matches_regex(&Value::string("ab"), &regex), Ok(false));
        assert!(matches!(
            matches_regex(&int(1), &regex),
            Err(RuntimeError::InvalidOperation { .. })
        ));
        assert_eq!(
            matches_regex(&Value::string("b"), &Value::string("^b$")),
            Ok(true)
        );
    }

    #[test]
    fn test_fetch() {
        let items = Value::array([int(1), int(2), int(3)]);
        assert_eq!(fetch(&items, &int(-1)).unwrap(), int(3));
        assert_eq!(
            fetch(&items, &int(3)),
            Err(RuntimeError::IndexOutOfRange { index: 3, length: 3 })
        );
        assert_eq!(fetch(&Value::string("héllo"), &int(1)).unwrap(), Value::string("é"));
        let map = Value::map([("a", int(1))]);
        assert_eq!(fetch(&map, &Value::string("b")).unwrap(), Value::Nil);
    }

    #[test]
    fn test_slice_clamps() {
        let items = Value::array([int(1), int(2), int(3)]);
        assert_eq!(
            slice(&items, &int(1), &Value::Nil).unwrap(),
            Value::array([int(2), int(3)])
        );
        assert_eq!(
            slice(&items, &int(-10), &int(10)).unwrap(),
            items
        );
        assert_eq!(slice(&items, &int(2), &int(1)).unwrap(), Value::array([]));
        assert_eq!(
            slice(&Value::string("héllo"), &int(1), &int(3)).unwrap(),
            Value::string("él")
        );
    }

    #[test]
    fn test_range() {
        assert_eq!(range(&int(1), &int(3)).unwrap(), Value::array([int(1), int(2), int(3)]));
        assert_eq!(range(&int(3), &int(1)).unwrap(), Value::array([]));
        assert!(range(&int(0), &int(i64::MAX)).is_err());
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(&Value::Int8(3), &Type::Int), Some(int(3)));
        assert_eq!(coerce(&Value::Int8(3), &Type::Float), Some(Value::Float64(3.0)));
        assert_eq!(coerce(&Value::Float64(3.5), &Type::Int), None);
        assert_eq!(coerce(&Value::string("a"), &Type::Bool), None);
    }
}
