//! The dispatch loop.
//!
//! A `Vm` holds configuration only: limits, an optional cancellation flag
//! and an optional debugger. Each run builds fresh state (operand stack,
//! comprehension scopes, `let` slots), so one `Vm` and one `Program` can
//! serve many threads at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::debug::Debugger;
use crate::library;
use crate::program::{Instruction, OpCode, Program, BEGIN_ACC, BEGIN_ACC_FIRST, BEGIN_REVERSE};
use crate::runtime;
use crate::value::{MapKey, Value};
use crate::{RuntimeError, VmError};

/// Resource limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum operand stack length
    pub max_stack: usize,
    /// Maximum nesting of comprehension scopes
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_stack: 10_000,
            max_depth: 256,
        }
    }
}

/// Virtual machine configuration.
#[derive(Debug, Clone, Default)]
pub struct Vm {
    limits: Limits,
    cancel: Option<Arc<AtomicBool>>,
    debugger: Option<Debugger>,
}

/// Run a program with default limits.
pub fn run(program: &Program, env: &Value) -> Result<Value, VmError> {
    Vm::new().run(program, env)
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Abort runs with [`RuntimeError::Cancelled`] once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_debugger(mut self, debugger: Debugger) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn run(&self, program: &Program, env: &Value) -> Result<Value, VmError> {
        let mut machine = Machine {
            vm: self,
            program,
            env,
            stack: Vec::with_capacity(16),
            scopes: Vec::new(),
            variables: vec![Value::Nil; program.variables],
            ip: 0,
            current: 0,
            debugger: self.debugger.as_ref(),
        };
        let result = machine.execute();
        if let Some(debugger) = machine.debugger {
            debugger.finish();
        }
        result.map_err(|error| VmError {
            error,
            location: program.location(machine.current),
            ip: machine.current,
        })
    }
}

// ============================================================================
// Run state
// ============================================================================

/// One active comprehension.
struct Scope {
    items: Arc<Vec<Value>>,
    /// Iteration counter; the element position depends on `reverse`
    index: usize,
    reverse: bool,
    count: i64,
    acc: Value,
    collected: Vec<Value>,
    groups: IndexMap<MapKey, Vec<Value>>,
}

impl Scope {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_done(&self) -> bool {
        self.index >= self.len()
    }

    /// Position of the current element in the sequence.
    fn position(&self) -> usize {
        if self.reverse {
            self.len().saturating_sub(self.index + 1)
        } else {
            self.index
        }
    }

    fn current(&self) -> Option<&Value> {
        if self.is_done() {
            None
        } else {
            self.items.get(self.position())
        }
    }
}

struct Machine<'a> {
    vm: &'a Vm,
    program: &'a Program,
    env: &'a Value,
    stack: Vec<Value>,
    scopes: Vec<Scope>,
    variables: Vec<Value>,
    /// Next instruction
    ip: usize,
    /// Instruction being executed, for error locations
    current: usize,
    debugger: Option<&'a Debugger>,
}

fn invalid(message: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidProgram(message.into())
}

fn equal_value(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(runtime::equal(left, right)))
}

// Slow paths of the typed comparison opcodes.
macro_rules! comparison {
    ($($name:ident => $f:path),* $(,)?) => {
        $(
            fn $name(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
                $f(left, right).map(Value::Bool)
            }
        )*
    };
}

comparison! {
    less_value => runtime::less,
    less_equal_value => runtime::less_equal,
    greater_value => runtime::greater,
    greater_equal_value => runtime::greater_equal,
}

impl<'a> Machine<'a> {
    fn execute(&mut self) -> Result<Value, RuntimeError> {
        while self.ip < self.program.code.len() {
            self.current = self.ip;
            let instruction = self.program.code[self.ip];
            self.ip += 1;
            self.step(instruction)?;

            if let Some(debugger) = self.debugger {
                if !debugger.pause(self.ip) {
                    self.debugger = None;
                }
            }
        }
        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }

    fn check_cancelled(&self) -> Result<(), RuntimeError> {
        match &self.vm.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(RuntimeError::Cancelled),
            _ => Ok(()),
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.vm.limits.max_stack {
            return Err(RuntimeError::StackOverflow(self.vm.limits.max_stack));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| invalid("stack underflow"))
    }

    fn peek(&self) -> Result<&Value, RuntimeError> {
        self.stack.last().ok_or_else(|| invalid("stack underflow"))
    }

    /// Pop `count` values, returned in push order.
    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        if count > self.stack.len() {
            return Err(invalid("stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn constant(&self, index: u32) -> Result<&'a Value, RuntimeError> {
        self.program
            .constants
            .get(index as usize)
            .ok_or_else(|| invalid(format!("constant {} out of range", index)))
    }

    fn name(&self, index: u32) -> Result<&'a str, RuntimeError> {
        self.constant(index)?
            .as_str()
            .ok_or_else(|| invalid(format!("constant {} is not a name", index)))
    }

    fn scope(&mut self) -> Result<&mut Scope, RuntimeError> {
        self.scopes.last_mut().ok_or_else(|| invalid("no active scope"))
    }

    fn jump_to(&mut self, target: usize) -> Result<(), RuntimeError> {
        if target > self.program.code.len() {
            return Err(invalid(format!("jump to {} out of range", target)));
        }
        self.ip = target;
        Ok(())
    }

    fn begin(&mut self, flags: u32) -> Result<(), RuntimeError> {
        self.check_cancelled()?;
        if self.scopes.len() >= self.vm.limits.max_depth {
            return Err(RuntimeError::DepthExceeded(self.vm.limits.max_depth));
        }
        let mut acc = if flags & BEGIN_ACC != 0 {
            self.pop()?
        } else {
            Value::Nil
        };
        let items = match self.pop()?.deref() {
            Value::Array(items) => items.clone(),
            Value::Nil => Arc::new(Vec::new()),
            other => return Err(RuntimeError::NotIterable(other.type_name())),
        };
        let mut index = 0;
        if flags & BEGIN_ACC_FIRST != 0 {
            acc = items
                .first()
                .cloned()
                .ok_or_else(|| RuntimeError::EmptyInput("reduce".to_string()))?;
            index = 1;
        }
        self.scopes.push(Scope {
            items,
            index,
            reverse: flags & BEGIN_REVERSE != 0,
            count: 0,
            acc,
            collected: Vec::new(),
            groups: IndexMap::new(),
        });
        Ok(())
    }

    fn step(&mut self, instruction: Instruction) -> Result<(), RuntimeError> {
        let arg = instruction.arg;

        macro_rules! binary {
            ($f:expr) => {{
                let right = self.pop()?;
                let left = self.pop()?;
                let value = $f(&left, &right)?;
                self.push(value)?;
            }};
        }

        macro_rules! predicate {
            ($f:expr) => {{
                let right = self.pop()?;
                let left = self.pop()?;
                let value = $f(&left, &right)?;
                self.push(Value::Bool(value))?;
            }};
        }

        macro_rules! int_fast {
            ($fast:expr, $slow:expr) => {{
                let right = self.pop()?;
                let left = self.pop()?;
                let value = match (&left, &right) {
                    (Value::Int64(a), Value::Int64(b)) => $fast(*a, *b),
                    _ => $slow(&left, &right)?,
                };
                self.push(value)?;
            }};
        }

        macro_rules! float_fast {
            ($fast:expr, $slow:expr) => {{
                let right = self.pop()?;
                let left = self.pop()?;
                let value = match (&left, &right) {
                    (Value::Float64(a), Value::Float64(b)) => $fast(*a, *b),
                    _ => $slow(&left, &right)?,
                };
                self.push(value)?;
            }};
        }

        match instruction.op {
            // === Stack ===
            OpCode::Push | OpCode::LoadConst => {
                let value = self.constant(arg)?.clone();
                self.push(value)?;
            }
            OpCode::PushNil => self.push(Value::Nil)?,
            OpCode::PushTrue => self.push(Value::Bool(true))?,
            OpCode::PushFalse => self.push(Value::Bool(false))?,
            OpCode::PushInt => self.push(Value::Int64(arg as i32 as i64))?,
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let value = self.peek()?.clone();
                self.push(value)?;
            }

            // === Names ===
            OpCode::LoadVar => {
                let value = self
                    .variables
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| invalid(format!("variable {} out of range", arg)))?;
                self.push(value)?;
            }
            OpCode::StoreVar => {
                let value = self.pop()?;
                let slot = self
                    .variables
                    .get_mut(arg as usize)
                    .ok_or_else(|| invalid(format!("variable {} out of range", arg)))?;
                *slot = value;
            }
            OpCode::LoadFast => {
                let name = self.name(arg)?;
                let value = runtime::lookup_env(self.env, name)?;
                self.push(value)?;
            }
            OpCode::LoadEnv => {
                let env = self.env.clone();
                self.push(env)?;
            }
            OpCode::LoadFunc => {
                let function = self
                    .program
                    .functions
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| invalid(format!("function {} out of range", arg)))?;
                self.push(Value::Function(function))?;
            }

            // === Access ===
            OpCode::Fetch => binary!(runtime::fetch),
            OpCode::FetchField => {
                let name = self.name(arg)?;
                let receiver = self.pop()?;
                let value = runtime::fetch_field(&receiver, name)?;
                self.push(value)?;
            }
            OpCode::Slice => {
                let to = self.pop()?;
                let from = self.pop()?;
                let receiver = self.pop()?;
                let value = runtime::slice(&receiver, &from, &to)?;
                self.push(value)?;
            }
            OpCode::Call => {
                let args = self.pop_n(arg as usize)?;
                let callee = self.pop()?;
                let value = match callee.deref() {
                    Value::Function(function) => runtime::call_function(function, args)?,
                    other => return Err(RuntimeError::NotCallable(other.type_name())),
                };
                self.push(value)?;
            }
            OpCode::CallTyped => {
                let (index, count) = instruction.unpack();
                let function = self
                    .program
                    .functions
                    .get(index)
                    .ok_or_else(|| invalid(format!("function {} out of range", index)))?;
                let args = self.pop_n(count)?;
                let value = function.call(&args)?;
                self.push(value)?;
            }
            OpCode::CallBuiltin => {
                let (index, count) = instruction.unpack();
                let args = self.pop_n(count)?;
                let value = library::call(index, &args)?;
                self.push(value)?;
            }
            OpCode::Method => {
                let (index, count) = instruction.unpack();
                let name = self.name(index as u32)?;
                let args = self.pop_n(count)?;
                let receiver = self.pop()?;
                let method = match receiver.deref() {
                    Value::Record(record) => record.methods.get(name).cloned(),
                    _ => None,
                };
                let method = match method {
                    Some(method) => method,
                    None => match runtime::fetch_field(&receiver, name)? {
                        Value::Function(function) => function,
                        _ => {
                            return Err(RuntimeError::NoSuchMethod {
                                ty: receiver.type_name(),
                                method: name.to_string(),
                            })
                        }
                    },
                };
                let value = runtime::call_function(&method, args)?;
                self.push(value)?;
            }

            // === Arithmetic ===
            OpCode::Add => binary!(runtime::add),
            OpCode::Sub => binary!(runtime::sub),
            OpCode::Mul => binary!(runtime::mul),
            OpCode::Div => binary!(runtime::div),
            OpCode::Mod => binary!(runtime::modulo),
            OpCode::Pow => binary!(runtime::pow),
            OpCode::Concat => binary!(runtime::concat),
            OpCode::Neg => {
                let value = self.pop()?;
                self.push(runtime::negate(&value)?)?;
            }
            OpCode::Not => {
                let value = self.pop()?;
                self.push(runtime::not(&value)?)?;
            }
            OpCode::AddInt => int_fast!(|a: i64, b| Value::Int64(a.wrapping_add(b)), runtime::add),
            OpCode::SubInt => int_fast!(|a: i64, b| Value::Int64(a.wrapping_sub(b)), runtime::sub),
            OpCode::MulInt => int_fast!(|a: i64, b| Value::Int64(a.wrapping_mul(b)), runtime::mul),
            OpCode::AddFloat => float_fast!(|a: f64, b| Value::Float64(a + b), runtime::add),
            OpCode::SubFloat => float_fast!(|a: f64, b| Value::Float64(a - b), runtime::sub),
            OpCode::MulFloat => float_fast!(|a: f64, b| Value::Float64(a * b), runtime::mul),

            // === Comparison ===
            OpCode::Eq => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(Value::Bool(runtime::equal(&left, &right)))?;
            }
            OpCode::Ne => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.push(Value::Bool(!runtime::equal(&left, &right)))?;
            }
            OpCode::Lt => predicate!(runtime::less),
            OpCode::Le => predicate!(runtime::less_equal),
            OpCode::Gt => predicate!(runtime::greater),
            OpCode::Ge => predicate!(runtime::greater_equal),
            OpCode::EqInt => int_fast!(|a: i64, b| Value::Bool(a == b), equal_value),
            OpCode::LtInt => int_fast!(|a: i64, b| Value::Bool(a < b), less_value),
            OpCode::LeInt => int_fast!(|a: i64, b| Value::Bool(a <= b), less_equal_value),
            OpCode::GtInt => int_fast!(|a: i64, b| Value::Bool(a > b), greater_value),
            OpCode::GeInt => int_fast!(|a: i64, b| Value::Bool(a >= b), greater_equal_value),
            OpCode::LtFloat => float_fast!(|a: f64, b| Value::Bool(a < b), less_value),
            OpCode::LeFloat => float_fast!(|a: f64, b| Value::Bool(a <= b), less_equal_value),
            OpCode::GtFloat => float_fast!(|a: f64, b| Value::Bool(a > b), greater_value),
            OpCode::GeFloat => float_fast!(|a: f64, b| Value::Bool(a >= b), greater_equal_value),

            // === Sequences and strings ===
            OpCode::In => predicate!(runtime::contains_value),
            OpCode::InConst => {
                let set = self.constant(arg)?;
                let needle = self.pop()?;
                self.push(Value::Bool(runtime::in_set(&needle, set)?))?;
            }
            OpCode::Matches => predicate!(runtime::matches),
            OpCode::MatchesConst => {
                let regex = self.constant(arg)?;
                let text = self.pop()?;
                self.push(Value::Bool(runtime::matches_regex(&text, regex)?))?;
            }
            OpCode::Contains => predicate!(runtime::contains),
            OpCode::StartsWith => predicate!(runtime::starts_with),
            OpCode::EndsWith => predicate!(runtime::ends_with),
            OpCode::Range => binary!(runtime::range),
            OpCode::Array => {
                let items = self.pop_n(arg as usize)?;
                self.push(Value::from(items))?;
            }
            OpCode::Map => {
                let flat = self.pop_n(arg as usize * 2)?;
                let mut entries = IndexMap::with_capacity(arg as usize);
                let mut pairs = flat.into_iter();
                while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                    let key = key
                        .to_map_key()
                        .ok_or_else(|| RuntimeError::InvalidKey(key.type_name()))?;
                    entries.insert(key, value);
                }
                self.push(Value::Map(Arc::new(entries)))?;
            }

            // === Control ===
            OpCode::Jump => self.jump_to(self.ip + arg as usize)?,
            OpCode::JumpBackward => {
                self.check_cancelled()?;
                let target = self
                    .ip
                    .checked_sub(arg as usize)
                    .ok_or_else(|| invalid("jump before start"))?;
                self.jump_to(target)?;
            }
            OpCode::JumpIfTrue => {
                if runtime::as_condition(self.peek()?)? {
                    self.jump_to(self.ip + arg as usize)?;
                }
            }
            OpCode::JumpIfFalse => {
                if !runtime::as_condition(self.peek()?)? {
                    self.jump_to(self.ip + arg as usize)?;
                }
            }
            OpCode::JumpIfNil => {
                if self.peek()?.is_nil() {
                    self.jump_to(self.ip + arg as usize)?;
                }
            }
            OpCode::JumpIfNotNil => {
                if !self.peek()?.is_nil() {
                    self.jump_to(self.ip + arg as usize)?;
                }
            }
            OpCode::JumpIfEnd => {
                if self.scope()?.is_done() {
                    self.jump_to(self.ip + arg as usize)?;
                }
            }

            // === Comprehension scopes ===
            OpCode::Begin => self.begin(arg)?,
            OpCode::End => {
                self.scopes.pop().ok_or_else(|| invalid("no active scope"))?;
            }
            OpCode::Next => {
                self.check_cancelled()?;
                self.scope()?.index += 1;
            }
            OpCode::Pointer => {
                let value = self
                    .scope()?
                    .current()
                    .cloned()
                    .ok_or_else(|| invalid("no current element"))?;
                self.push(value)?;
            }
            OpCode::GetIndex => {
                let index = self.scope()?.position() as i64;
                self.push(Value::Int64(index))?;
            }
            OpCode::GetLen => {
                let len = self.scope()?.len() as i64;
                self.push(Value::Int64(len))?;
            }
            OpCode::GetCount => {
                let count = self.scope()?.count;
                self.push(Value::Int64(count))?;
            }
            OpCode::IncrementCount => self.scope()?.count += 1,
            OpCode::GetAcc => {
                let acc = self.scope()?.acc.clone();
                self.push(acc)?;
            }
            OpCode::SetAcc => {
                let value = self.pop()?;
                self.scope()?.acc = value;
            }
            OpCode::Collect => {
                let value = self.pop()?;
                self.scope()?.collected.push(value);
            }
            OpCode::GetCollected => {
                let collected = std::mem::take(&mut self.scope()?.collected);
                self.push(Value::from(collected))?;
            }
            OpCode::SetGroupBy => {
                let key = self.pop()?;
                let key = key
                    .to_map_key()
                    .ok_or_else(|| RuntimeError::InvalidKey(key.type_name()))?;
                let scope = self.scope()?;
                let element = scope
                    .current()
                    .cloned()
                    .ok_or_else(|| invalid("no current element"))?;
                scope.groups.entry(key).or_default().push(element);
            }
            OpCode::GetGroupBy => {
                let groups = std::mem::take(&mut self.scope()?.groups);
                let entries: IndexMap<MapKey, Value> = groups
                    .into_iter()
                    .map(|(key, items)| (key, Value::from(items)))
                    .collect();
                self.push(Value::Map(Arc::new(entries)))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_syntax::Location;

    fn program(code: &[(OpCode, u32)]) -> Program {
        let mut program = Program::new("test");
        for (op, arg) in code {
            program.emit(*op, *arg, Location::default());
        }
        program
    }

    #[test]
    fn test_arithmetic() {
        let p = program(&[
            (OpCode::PushInt, 2),
            (OpCode::PushInt, 3),
            (OpCode::AddInt, 0),
            (OpCode::PushInt, 4),
            (OpCode::Mul, 0),
        ]);
        assert_eq!(run(&p, &Value::Nil).unwrap(), Value::Int64(20));
    }

    #[test]
    fn test_peeking_jump() {
        // true ? 1 : 2
        let p = program(&[
            (OpCode::PushTrue, 0),
            (OpCode::JumpIfFalse, 3),
            (OpCode::Pop, 0),
            (OpCode::PushInt, 1),
            (OpCode::Jump, 2),
            (OpCode::Pop, 0),
            (OpCode::PushInt, 2),
        ]);
        assert_eq!(run(&p, &Value::Nil).unwrap(), Value::Int64(1));
    }

    #[test]
    fn test_count_loop() {
        // count([1, 2, 3], # > 1)
        let p = program(&[
            (OpCode::PushInt, 1),
            (OpCode::PushInt, 2),
            (OpCode::PushInt, 3),
            (OpCode::Array, 3),
            (OpCode::Begin, 0),
            (OpCode::JumpIfEnd, 8),
            (OpCode::Pointer, 0),
            (OpCode::PushInt, 1),
            (OpCode::Gt, 0),
            (OpCode::JumpIfFalse, 1),
            (OpCode::IncrementCount, 0),
            (OpCode::Pop, 0),
            (OpCode::Next, 0),
            (OpCode::JumpBackward, 9),
            (OpCode::GetCount, 0),
            (OpCode::End, 0),
        ]);
        assert_eq!(run(&p, &Value::Nil).unwrap(), Value::Int64(2));
    }

    #[test]
    fn test_stack_limit() {
        let p = program(&[(OpCode::PushInt, 1), (OpCode::PushInt, 2), (OpCode::PushInt, 3)]);
        let vm = Vm::new().with_limits(Limits {
            max_stack: 2,
            max_depth: 4,
        });
        let err = vm.run(&p, &Value::Nil).unwrap_err();
        assert_eq!(err.error, RuntimeError::StackOverflow(2));
        assert_eq!(err.ip, 2);
    }

    #[test]
    fn test_malformed_program() {
        let p = program(&[(OpCode::Pop, 0)]);
        assert!(matches!(
            run(&p, &Value::Nil).unwrap_err().error,
            RuntimeError::InvalidProgram(_)
        ));
        let p = program(&[(OpCode::Jump, 10)]);
        assert!(run(&p, &Value::Nil).is_err());
    }

    #[test]
    fn test_cancelled() {
        // An infinite loop stops once the flag is set.
        let p = program(&[(OpCode::JumpBackward, 1)]);
        let flag = Arc::new(AtomicBool::new(true));
        let vm = Vm::new().with_cancellation(flag);
        assert_eq!(vm.run(&p, &Value::Nil).unwrap_err().error, RuntimeError::Cancelled);
    }
}
