//! The builtin function library.
//!
//! Plain builtins are looked up by index from `CallBuiltin`. Comprehensions
//! are compiled inline and never reach this table, except for the helpers
//! they lower to (`sortBy` over precomputed keys, one-argument `sum` and
//! `count`).

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::runtime;
use crate::value::{MapKey, Value};
use crate::RuntimeError;

pub type BuiltinFn = fn(&[Value]) -> Result<Value, RuntimeError>;

/// A library entry.
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

const fn builtin(name: &'static str, func: BuiltinFn) -> Builtin {
    Builtin { name, func }
}

pub static BUILTINS: &[Builtin] = &[
    builtin("len", len),
    builtin("abs", abs),
    builtin("ceil", ceil),
    builtin("floor", floor),
    builtin("round", round),
    builtin("int", int),
    builtin("float", float),
    builtin("string", string),
    builtin("type", type_of),
    builtin("upper", upper),
    builtin("lower", lower),
    builtin("trim", trim),
    builtin("split", split),
    builtin("join", join),
    builtin("keys", keys),
    builtin("values", values),
    builtin("first", first),
    builtin("last", last),
    builtin("reverse", reverse),
    builtin("uniq", uniq),
    builtin("flatten", flatten),
    builtin("concat", concat),
    builtin("get", get),
    builtin("min", min),
    builtin("max", max),
    builtin("mean", mean),
    builtin("median", median),
    builtin("sum", sum),
    builtin("count", count),
    builtin("now", now),
    builtin("date", date),
    builtin("duration", duration),
    builtin("sortBy", sort_by),
    builtin("$value_get", value_get),
];

pub fn builtin_id(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|b| b.name == name)
}

pub fn name(index: usize) -> Option<&'static str> {
    BUILTINS.get(index).map(|b| b.name)
}

pub fn call(index: usize, args: &[Value]) -> Result<Value, RuntimeError> {
    match BUILTINS.get(index) {
        Some(builtin) => (builtin.func)(args),
        None => Err(RuntimeError::InvalidProgram(format!(
            "unknown builtin {}",
            index
        ))),
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn nth<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a Value, RuntimeError> {
    args.get(index)
        .map(Value::deref)
        .ok_or_else(|| RuntimeError::ArgumentCount {
            name: name.to_string(),
            expected: format!("at least {}", index + 1),
            found: args.len(),
        })
}

fn mismatch(name: &str, expected: &str, found: &Value) -> RuntimeError {
    RuntimeError::Coercion {
        name: name.to_string(),
        expected: expected.to_string(),
        found: found.type_name(),
    }
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, RuntimeError> {
    let value = nth(name, args, index)?;
    value.as_str().ok_or_else(|| mismatch(name, "string", value))
}

fn array_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a [Value], RuntimeError> {
    let value = nth(name, args, index)?;
    match value {
        Value::Nil => Ok(&[]),
        other => other.as_array().ok_or_else(|| mismatch(name, "array", other)),
    }
}

fn number_arg(name: &str, args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    let value = nth(name, args, index)?;
    value.as_float().ok_or_else(|| mismatch(name, "number", value))
}

/// The numbers an aggregate works on: the elements of a single array
/// argument, or the arguments themselves.
fn numbers<'a>(name: &str, args: &'a [Value]) -> Result<&'a [Value], RuntimeError> {
    let items = match args {
        [single] => match single.deref() {
            Value::Array(items) => items.as_slice(),
            _ => args,
        },
        _ => args,
    };
    if let Some(bad) = items.iter().find(|v| v.as_float().is_none()) {
        return Err(mismatch(name, "number", bad));
    }
    Ok(items)
}

// ============================================================================
// Numbers
// ============================================================================

fn len(args: &[Value]) -> Result<Value, RuntimeError> {
    let length = match nth("len", args, 0)? {
        Value::Array(items) => items.len(),
        Value::Map(entries) => entries.len(),
        Value::String(s) => s.chars().count(),
        Value::Record(record) => record.visible().count(),
        Value::Nil => 0,
        other => return Err(mismatch("len", "array, map or string", other)),
    };
    Ok(Value::Int64(length as i64))
}

fn abs(args: &[Value]) -> Result<Value, RuntimeError> {
    match nth("abs", args, 0)? {
        Value::Float32(x) => Ok(Value::Float32(x.abs())),
        Value::Float64(x) => Ok(Value::Float64(x.abs())),
        other => other
            .as_int()
            .map(|i| Value::Int64(i.wrapping_abs()))
            .ok_or_else(|| mismatch("abs", "number", other)),
    }
}

fn ceil(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float64(number_arg("ceil", args, 0)?.ceil()))
}

fn floor(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Float64(number_arg("floor", args, 0)?.floor()))
}

/// `round(x)` or `round(x, digits)`; halves round away from zero.
fn round(args: &[Value]) -> Result<Value, RuntimeError> {
    let x = number_arg("round", args, 0)?;
    let digits = match args.get(1) {
        Some(value) => value
            .as_int()
            .ok_or_else(|| mismatch("round", "int", value))?,
        None => 0,
    };
    if digits == 0 {
        return Ok(Value::Float64(x.round()));
    }
    let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
    Ok(Value::Float64((x * scale).round() / scale))
}

fn int(args: &[Value]) -> Result<Value, RuntimeError> {
    let value = nth("int", args, 0)?;
    match value {
        Value::Float32(_) | Value::Float64(_) => {
            let x = value.as_float().unwrap_or_default();
            Ok(Value::Int64(x.trunc() as i64))
        }
        Value::String(s) => {
            let text = s.trim();
            text.parse::<i64>()
                .map(Value::Int64)
                .or_else(|_| text.parse::<f64>().map(|x| Value::Int64(x.trunc() as i64)))
                .map_err(|_| RuntimeError::call("int", format!("cannot parse {}", quote(s))))
        }
        Value::Duration(d) => Ok(Value::Int64(d.num_nanoseconds().unwrap_or(i64::MAX))),
        other => other
            .as_int()
            .map(Value::Int64)
            .ok_or_else(|| mismatch("int", "number or string", other)),
    }
}

fn float(args: &[Value]) -> Result<Value, RuntimeError> {
    let value = nth("float", args, 0)?;
    match value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| RuntimeError::call("float", format!("cannot parse {}", quote(s)))),
        other => other
            .as_float()
            .map(Value::Float64)
            .ok_or_else(|| mismatch("float", "number or string", other)),
    }
}

fn mean(args: &[Value]) -> Result<Value, RuntimeError> {
    let items = numbers("mean", args)?;
    if items.is_empty() {
        return Err(RuntimeError::EmptyInput("mean".to_string()));
    }
    let total: f64 = items.iter().filter_map(Value::as_float).sum();
    Ok(Value::Float64(total / items.len() as f64))
}

fn median(args: &[Value]) -> Result<Value, RuntimeError> {
    let mut sorted: Vec<f64> = numbers("median", args)?
        .iter()
        .filter_map(Value::as_float)
        .collect();
    if sorted.is_empty() {
        return Err(RuntimeError::EmptyInput("median".to_string()));
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    Ok(Value::Float64(median))
}

fn extreme(name: &str, args: &[Value], wanted: Ordering) -> Result<Value, RuntimeError> {
    let items = numbers(name, args)?;
    let mut best: Option<&Value> = None;
    for item in items {
        best = match best {
            Some(current) if runtime::compare(item, current)? != wanted => Some(current),
            _ => Some(item),
        };
    }
    best.map(|v| v.deref().clone())
        .ok_or_else(|| RuntimeError::EmptyInput(name.to_string()))
}

fn min(args: &[Value]) -> Result<Value, RuntimeError> {
    extreme("min", args, Ordering::Less)
}

fn max(args: &[Value]) -> Result<Value, RuntimeError> {
    extreme("max", args, Ordering::Greater)
}

/// Sum of an array; `0` when empty.
fn sum(args: &[Value]) -> Result<Value, RuntimeError> {
    array_arg("sum", args, 0)?
        .iter()
        .try_fold(Value::Int64(0), |total, item| runtime::add(&total, item))
}

/// Number of `true` elements.
fn count(args: &[Value]) -> Result<Value, RuntimeError> {
    let mut total = 0i64;
    for item in array_arg("count", args, 0)? {
        if runtime::as_condition(item)? {
            total += 1;
        }
    }
    Ok(Value::Int64(total))
}

// ============================================================================
// Strings
// ============================================================================

fn quote(s: &str) -> String {
    sable_syntax::ast::quote(s)
}

fn string(args: &[Value]) -> Result<Value, RuntimeError> {
    match nth("string", args, 0)? {
        Value::String(s) => Ok(Value::String(s.clone())),
        other => Ok(Value::string(other.to_string())),
    }
}

fn type_of(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::string(nth("type", args, 0)?.type_name()))
}

fn upper(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::string(string_arg("upper", args, 0)?.to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::string(string_arg("lower", args, 0)?.to_lowercase()))
}

/// `trim(s)` strips whitespace, `trim(s, chars)` strips any of `chars`.
fn trim(args: &[Value]) -> Result<Value, RuntimeError> {
    let text = string_arg("trim", args, 0)?;
    let trimmed = if args.len() > 1 {
        let chars = string_arg("trim", args, 1)?;
        text.trim_matches(|c: char| chars.contains(c))
    } else {
        text.trim()
    };
    Ok(Value::string(trimmed))
}

fn split(args: &[Value]) -> Result<Value, RuntimeError> {
    let text = string_arg("split", args, 0)?;
    let separator = string_arg("split", args, 1)?;
    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|c| Value::string(c.to_string())).collect()
    } else {
        text.split(separator).map(Value::string).collect()
    };
    Ok(Value::from(parts))
}

fn join(args: &[Value]) -> Result<Value, RuntimeError> {
    let items = array_arg("join", args, 0)?;
    let separator = if args.len() > 1 {
        string_arg("join", args, 1)?
    } else {
        ""
    };
    let parts: Vec<String> = items.iter().map(|item| item.deref().to_string()).collect();
    Ok(Value::string(parts.join(separator)))
}

// ============================================================================
// Collections
// ============================================================================

fn keys(args: &[Value]) -> Result<Value, RuntimeError> {
    match nth("keys", args, 0)? {
        Value::Map(entries) => Ok(Value::array(entries.keys().map(MapKey::to_value))),
        Value::Record(record) => Ok(Value::array(
            record.visible().map(|f| Value::string(f.visible_name())),
        )),
        Value::Nil => Ok(Value::array([])),
        other => Err(mismatch("keys", "map", other)),
    }
}

fn values(args: &[Value]) -> Result<Value, RuntimeError> {
    match nth("values", args, 0)? {
        Value::Map(entries) => Ok(Value::array(entries.values().cloned())),
        Value::Record(record) => Ok(Value::array(record.visible().map(|f| f.value.clone()))),
        Value::Nil => Ok(Value::array([])),
        other => Err(mismatch("values", "map", other)),
    }
}

fn first(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(array_arg("first", args, 0)?
        .first()
        .cloned()
        .unwrap_or(Value::Nil))
}

fn last(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(array_arg("last", args, 0)?
        .last()
        .cloned()
        .unwrap_or(Value::Nil))
}

fn reverse(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::array(
        array_arg("reverse", args, 0)?.iter().rev().cloned(),
    ))
}

/// Distinct elements in first-seen order.
fn uniq(args: &[Value]) -> Result<Value, RuntimeError> {
    let mut seen: Vec<Value> = Vec::new();
    for item in array_arg("uniq", args, 0)? {
        if !seen.iter().any(|s| runtime::equal(s, item)) {
            seen.push(item.clone());
        }
    }
    Ok(Value::from(seen))
}

fn flatten(args: &[Value]) -> Result<Value, RuntimeError> {
    fn walk(items: &[Value], out: &mut Vec<Value>) {
        for item in items {
            match item.deref() {
                Value::Array(inner) => walk(inner, out),
                other => out.push(other.clone()),
            }
        }
    }
    let mut out = Vec::new();
    walk(array_arg("flatten", args, 0)?, &mut out);
    Ok(Value::from(out))
}

fn concat(args: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = Vec::new();
    for index in 0..args.len() {
        out.extend(array_arg("concat", args, index)?.iter().cloned());
    }
    Ok(Value::from(out))
}

/// Like indexing, but nil instead of an error.
fn get(args: &[Value]) -> Result<Value, RuntimeError> {
    let receiver = nth("get", args, 0)?;
    let key = nth("get", args, 1)?;
    Ok(runtime::fetch(receiver, key).unwrap_or(Value::Nil))
}

/// Stable sort of `array` by the precomputed `keys`.
fn sort_by(args: &[Value]) -> Result<Value, RuntimeError> {
    let items = array_arg("sortBy", args, 0)?;
    let keys = array_arg("sortBy", args, 1)?;
    let descending = match args.get(2).and_then(Value::as_str).unwrap_or("asc") {
        "asc" => false,
        "desc" => true,
        other => {
            return Err(RuntimeError::call(
                "sortBy",
                format!("unknown order {}", quote(other)),
            ))
        }
    };
    if items.len() != keys.len() {
        return Err(RuntimeError::InvalidProgram(
            "sortBy keys do not match the array".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        match runtime::compare(&keys[a], &keys[b]) {
            Ok(ordering) if descending => ordering.reverse(),
            Ok(ordering) => ordering,
            Err(err) => {
                failure.get_or_insert(err);
                Ordering::Equal
            }
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(Value::array(order.into_iter().map(|i| items[i].clone())))
}

fn value_get(args: &[Value]) -> Result<Value, RuntimeError> {
    match nth("$value_get", args, 0)? {
        Value::Opaque(valuer) => Ok(valuer.value()),
        other => Ok(other.clone()),
    }
}

// ============================================================================
// Time
// ============================================================================

fn now(_args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Time(Utc::now()))
}

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// `date(text)` accepts RFC 3339 and a few common layouts;
/// `date(text, layout)` parses with a strftime layout.
fn date(args: &[Value]) -> Result<Value, RuntimeError> {
    let text = string_arg("date", args, 0)?;
    let parsed = if args.len() > 1 {
        parse_with_layout(text, string_arg("date", args, 1)?)
    } else {
        parse_date(text)
    };
    parsed
        .map(Value::Time)
        .ok_or_else(|| RuntimeError::call("date", format!("cannot parse {}", quote(text))))
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    DATE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn parse_with_layout(text: &str, layout: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_str(text, layout) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, layout)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, layout)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn duration(args: &[Value]) -> Result<Value, RuntimeError> {
    let text = string_arg("duration", args, 0)?;
    parse_duration(text)
        .map(|nanos| Value::Duration(chrono::Duration::nanoseconds(nanos)))
        .ok_or_else(|| {
            RuntimeError::call("duration", format!("invalid duration {}", quote(text)))
        })
}

fn unit_nanos(unit: &str) -> Option<i128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60_000_000_000,
        "h" => 3_600_000_000_000,
        _ => return None,
    })
}

/// Parse durations like `1h30m`, `1.5s`, `-250ms` to nanoseconds.
pub fn parse_duration(text: &str) -> Option<i64> {
    let (negative, mut rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if rest == "0" {
        return Some(0);
    }
    if rest.is_empty() {
        return None;
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(digits);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit = unit_nanos(unit)?;

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut part = whole.checked_mul(unit)?;
        if !fraction.is_empty() {
            let digits = fraction.len().min(18);
            let value: i128 = fraction[..digits].parse().ok()?;
            part += value * unit / 10i128.pow(digits as u32);
        }
        total = total.checked_add(part)?;
        rest = tail;
    }

    let total = if negative { -total } else { total };
    i64::try_from(total).ok()
}
