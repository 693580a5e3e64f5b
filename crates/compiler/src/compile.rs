//! Syntax tree to bytecode compiler.
//!
//! Features:
//! - Type-directed instruction selection (int and float fast paths)
//! - Constant pool deduplication
//! - Comprehension lowering into scope loops
//! - Optional chains and short-circuit operators as peeking jumps

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use sable_syntax::builtins::{self as catalog, VALUE_GET};
use sable_syntax::*;
use sable_vm::library;
use sable_vm::program::{pack, OpCode, Program, BEGIN_ACC, BEGIN_ACC_FIRST, BEGIN_REVERSE};
use sable_vm::{Function, Value};

/// Compilation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("program too large: jump over {0} instructions")]
    ProgramTooLarge(usize),

    #[error("too many arguments to {name} ({count})")]
    TooManyArguments { name: String, count: usize },

    #[error("too many constants")]
    TooManyConstants,

    #[error("unknown builtin {0}")]
    UnknownBuiltin(String),

    #[error("cannot compile {0}")]
    Unsupported(String),
}

/// A compile error with the location of the node being lowered.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedCompileError {
    pub error: CompileError,
    pub location: Location,
}

impl LocatedCompileError {
    pub fn to_source_error(&self) -> SourceError {
        SourceError::compile(self.error.to_string(), self.location)
    }
}

impl std::fmt::Display for LocatedCompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.error, self.location)
    }
}

impl std::error::Error for LocatedCompileError {}

impl From<LocatedCompileError> for SourceError {
    fn from(err: LocatedCompileError) -> Self {
        err.to_source_error()
    }
}

type CompileResult<T = ()> = Result<T, LocatedCompileError>;

/// Host functions the program may bind to. Names must match the checker's
/// function table.
#[derive(Clone, Default)]
pub struct CompilerConfig {
    pub functions: Vec<Arc<Function>>,
}

impl CompilerConfig {
    pub fn new(functions: Vec<Arc<Function>>) -> Self {
        Self { functions }
    }

    fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Constant pool key. Floats are keyed by bit pattern so `0.0` and `-0.0`
/// stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Int(i64),
    Float(u64),
    String(String),
    Regex(String),
    /// Prepared sets are never shared
    Set(usize),
}

/// Compile a checked tree.
pub fn compile(tree: &Tree, config: &CompilerConfig) -> Result<Program, LocatedCompileError> {
    let mut compiler = Compiler::new(tree.source.as_str(), config);
    compiler.compile_node(&tree.node)?;
    Ok(compiler.finish())
}

/// Compilation context.
pub struct Compiler<'a> {
    program: Program,
    config: &'a CompilerConfig,
    /// Constant key -> pool index
    constants: IndexMap<ConstantKey, usize>,
    /// Host function name -> function table index
    functions: IndexMap<String, usize>,
    /// `let` names in scope with their slots, innermost last
    variables: Vec<(String, usize)>,
    /// Pending nil jumps of the enclosing optional chains
    chains: Vec<Vec<usize>>,
}

impl<'a> Compiler<'a> {
    pub fn new(source: &str, config: &'a CompilerConfig) -> Self {
        Self {
            program: Program::new(source),
            config,
            constants: IndexMap::new(),
            functions: IndexMap::new(),
            variables: Vec::new(),
            chains: Vec::new(),
        }
    }

    pub fn finish(self) -> Program {
        self.program
    }

    // =========================================================================
    // Emission helpers
    // =========================================================================

    fn emit(&mut self, op: OpCode, arg: u32, location: Location) -> usize {
        self.program.emit(op, arg, location)
    }

    fn position(&self) -> usize {
        self.program.code.len()
    }

    /// Emit a forward jump to be patched later.
    fn emit_jump(&mut self, op: OpCode, location: Location) -> usize {
        self.emit(op, 0, location)
    }

    /// Point the jump at `at` to the next instruction to be emitted.
    fn patch_jump(&mut self, at: usize, location: Location) -> CompileResult {
        let offset = self.position() - (at + 1);
        let arg = u32::try_from(offset).map_err(|_| located(CompileError::ProgramTooLarge(offset), location))?;
        self.program.code[at].arg = arg;
        Ok(())
    }

    fn emit_backward(&mut self, target: usize, location: Location) -> CompileResult {
        let offset = self.position() + 1 - target;
        let arg = u32::try_from(offset).map_err(|_| located(CompileError::ProgramTooLarge(offset), location))?;
        self.emit(OpCode::JumpBackward, arg, location);
        Ok(())
    }

    fn constant(&mut self, key: ConstantKey, value: Value, location: Location) -> CompileResult<u32> {
        if let Some(&index) = self.constants.get(&key) {
            return Ok(index as u32);
        }
        let index = self.program.constants.len();
        if pack(index, 0).is_none() {
            return Err(located(CompileError::TooManyConstants, location));
        }
        self.program.constants.push(value);
        self.constants.insert(key, index);
        Ok(index as u32)
    }

    fn string_constant(&mut self, s: &str, location: Location) -> CompileResult<u32> {
        self.constant(ConstantKey::String(s.to_string()), Value::string(s), location)
    }

    fn packed(&self, name: &str, index: usize, count: usize, location: Location) -> CompileResult<u32> {
        pack(index, count).ok_or_else(|| {
            located(
                CompileError::TooManyArguments {
                    name: name.to_string(),
                    count,
                },
                location,
            )
        })
    }

    /// Index of a host function in the program's table, adding it on first use.
    fn function_index(&mut self, function: &Arc<Function>) -> usize {
        if let Some(&index) = self.functions.get(&function.name) {
            return index;
        }
        let index = self.program.functions.len();
        self.program.functions.push(Arc::clone(function));
        self.functions.insert(function.name.clone(), index);
        index
    }

    fn variable(&self, name: &str) -> Option<usize> {
        self.variables
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, slot)| *slot)
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub fn compile_node(&mut self, node: &Node) -> CompileResult {
        let location = node.location;
        match &node.kind {
            NodeKind::Nil => {
                self.emit(OpCode::PushNil, 0, location);
            }
            NodeKind::Bool(true) => {
                self.emit(OpCode::PushTrue, 0, location);
            }
            NodeKind::Bool(false) => {
                self.emit(OpCode::PushFalse, 0, location);
            }
            NodeKind::Integer(i) => self.compile_integer(*i, location)?,
            NodeKind::Float(x) => {
                let index = self.constant(ConstantKey::Float(x.to_bits()), Value::Float64(*x), location)?;
                self.emit(OpCode::Push, index, location);
            }
            NodeKind::String(s) => {
                let index = self.string_constant(s, location)?;
                self.emit(OpCode::Push, index, location);
            }

            NodeKind::Identifier(name) => self.compile_identifier(name, location)?,
            NodeKind::Pointer(name) => {
                let op = match name.as_str() {
                    "" => OpCode::Pointer,
                    "index" => OpCode::GetIndex,
                    "acc" => OpCode::GetAcc,
                    other => {
                        return Err(located(CompileError::Unsupported(format!("#{}", other)), location))
                    }
                };
                self.emit(op, 0, location);
            }
            NodeKind::Constant(Constant::Set(items)) => {
                match set_value(items) {
                    Some(set) => {
                        let key = ConstantKey::Set(self.program.constants.len());
                        let index = self.constant(key, set, location)?;
                        self.emit(OpCode::LoadConst, index, location);
                    }
                    None => self.compile_array(items, location)?,
                }
            }
            NodeKind::Constant(Constant::Regex(pattern)) => {
                let index = self.string_constant(pattern, location)?;
                self.emit(OpCode::Push, index, location);
            }
            NodeKind::VariableDeclarator { name, value, expr } => {
                self.compile_node(value)?;
                let slot = self.program.variables;
                self.program.variables += 1;
                self.emit(OpCode::StoreVar, slot as u32, location);
                self.variables.push((name.clone(), slot));
                let result = self.compile_node(expr);
                self.variables.pop();
                result?;
            }

            NodeKind::Array(items) => self.compile_array(items, location)?,
            NodeKind::Map(pairs) => {
                for pair in pairs {
                    match &pair.kind {
                        NodeKind::Pair { key, value } => {
                            self.compile_node(key)?;
                            self.compile_node(value)?;
                        }
                        _ => {
                            return Err(located(
                                CompileError::Unsupported("map element".to_string()),
                                pair.location,
                            ))
                        }
                    }
                }
                let count = u32::try_from(pairs.len())
                    .map_err(|_| located(CompileError::ProgramTooLarge(pairs.len()), location))?;
                self.emit(OpCode::Map, count, location);
            }
            NodeKind::Pair { .. } => {
                return Err(located(CompileError::Unsupported("pair outside map".to_string()), location))
            }

            NodeKind::Member {
                receiver,
                property,
                optional,
                ..
            } => {
                self.compile_node(receiver)?;
                let skip = self.optional_jump(*optional, location);
                match property.as_str() {
                    Some(name) => {
                        let index = self.string_constant(name, property.location)?;
                        self.emit(OpCode::FetchField, index, location);
                    }
                    None => {
                        self.compile_node(property)?;
                        self.emit(OpCode::Fetch, 0, location);
                    }
                }
                if let Some(skip) = skip {
                    self.patch_jump(skip, location)?;
                }
            }
            NodeKind::Slice { receiver, from, to } => {
                self.compile_node(receiver)?;
                for bound in [from, to] {
                    match bound {
                        Some(bound) => self.compile_node(bound)?,
                        None => {
                            self.emit(OpCode::PushNil, 0, location);
                        }
                    }
                }
                self.emit(OpCode::Slice, 0, location);
            }
            NodeKind::Chain(inner) => {
                self.chains.push(Vec::new());
                let result = self.compile_node(inner);
                let jumps = self.chains.pop().unwrap_or_default();
                result?;
                for jump in jumps {
                    self.patch_jump(jump, location)?;
                }
            }

            NodeKind::Unary { op, operand } => {
                self.compile_node(operand)?;
                match op {
                    UnaryOp::Neg => {
                        self.emit(OpCode::Neg, 0, location);
                    }
                    UnaryOp::Not => {
                        self.emit(OpCode::Not, 0, location);
                    }
                    UnaryOp::Plus => {}
                }
            }
            NodeKind::Binary { op, left, right } => self.compile_binary(*op, left, right, location)?,
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.compile_node(cond)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse, location);
                self.emit(OpCode::Pop, 0, location);
                self.compile_node(then)?;
                let end_jump = self.emit_jump(OpCode::Jump, location);
                self.patch_jump(else_jump, location)?;
                self.emit(OpCode::Pop, 0, location);
                self.compile_node(otherwise)?;
                self.patch_jump(end_jump, location)?;
            }

            NodeKind::Call { callee, arguments } => self.compile_call(callee, arguments, location)?,
            NodeKind::Builtin { name, arguments } => self.compile_builtin(name, arguments, location)?,
            NodeKind::Closure(_) => {
                return Err(located(
                    CompileError::Unsupported("closure outside a predicate".to_string()),
                    location,
                ))
            }
        }
        Ok(())
    }

    fn compile_integer(&mut self, i: i64, location: Location) -> CompileResult {
        match i32::try_from(i) {
            Ok(small) => {
                self.emit(OpCode::PushInt, small as u32, location);
            }
            Err(_) => {
                let index = self.constant(ConstantKey::Int(i), Value::Int64(i), location)?;
                self.emit(OpCode::Push, index, location);
            }
        }
        Ok(())
    }

    fn compile_array(&mut self, items: &[Node], location: Location) -> CompileResult {
        for item in items {
            self.compile_node(item)?;
        }
        let count = u32::try_from(items.len())
            .map_err(|_| located(CompileError::ProgramTooLarge(items.len()), location))?;
        self.emit(OpCode::Array, count, location);
        Ok(())
    }

    fn compile_identifier(&mut self, name: &str, location: Location) -> CompileResult {
        if let Some(slot) = self.variable(name) {
            self.emit(OpCode::LoadVar, slot as u32, location);
        } else if name == "$env" {
            self.emit(OpCode::LoadEnv, 0, location);
        } else if let Some(function) = self.config.function(name).cloned() {
            let index = self.function_index(&function);
            self.emit(OpCode::LoadFunc, index as u32, location);
        } else {
            let index = self.string_constant(name, location)?;
            self.emit(OpCode::LoadFast, index, location);
        }
        Ok(())
    }

    /// For `?.`, jump to the end of the enclosing chain when the receiver is
    /// nil. Outside a chain the returned jump skips just this access.
    fn optional_jump(&mut self, optional: bool, location: Location) -> Option<usize> {
        if !optional {
            return None;
        }
        let jump = self.emit_jump(OpCode::JumpIfNil, location);
        match self.chains.last_mut() {
            Some(chain) => {
                chain.push(jump);
                None
            }
            None => Some(jump),
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn compile_binary(&mut self, op: BinaryOp, left: &Node, right: &Node, location: Location) -> CompileResult {
        match op {
            BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => {
                self.compile_node(left)?;
                let jump_op = match op {
                    BinaryOp::And => OpCode::JumpIfFalse,
                    BinaryOp::Or => OpCode::JumpIfTrue,
                    _ => OpCode::JumpIfNotNil,
                };
                let end = self.emit_jump(jump_op, location);
                self.emit(OpCode::Pop, 0, location);
                self.compile_node(right)?;
                return self.patch_jump(end, location);
            }
            BinaryOp::In | BinaryOp::NotIn => {
                self.compile_node(left)?;
                let prepared = match &right.kind {
                    NodeKind::Constant(Constant::Set(items)) => set_value(items),
                    _ => None,
                };
                match prepared {
                    Some(set) => {
                        let key = ConstantKey::Set(self.program.constants.len());
                        let index = self.constant(key, set, right.location)?;
                        self.emit(OpCode::InConst, index, location);
                    }
                    None => {
                        self.compile_node(right)?;
                        self.emit(OpCode::In, 0, location);
                    }
                }
                if op == BinaryOp::NotIn {
                    self.emit(OpCode::Not, 0, location);
                }
                return Ok(());
            }
            BinaryOp::Matches => {
                self.compile_node(left)?;
                if let NodeKind::Constant(Constant::Regex(pattern)) = &right.kind {
                    let regex = regex::Regex::new(pattern).map_err(|err| {
                        located(CompileError::Unsupported(err.to_string()), right.location)
                    })?;
                    let index = self.constant(
                        ConstantKey::Regex(pattern.clone()),
                        Value::Regex(Arc::new(regex)),
                        right.location,
                    )?;
                    self.emit(OpCode::MatchesConst, index, location);
                } else {
                    self.compile_node(right)?;
                    self.emit(OpCode::Matches, 0, location);
                }
                return Ok(());
            }
            _ => {}
        }

        self.compile_node(left)?;
        self.compile_node(right)?;
        let (lt, rt) = (left.ty(), right.ty());
        let ints = lt.is_integer() && rt.is_integer();
        let floats = lt.is_float() && rt.is_float();
        let arrays = matches!(lt.base(), Type::Array(_)) && matches!(rt.base(), Type::Array(_));
        let code = match op {
            BinaryOp::Add if ints => OpCode::AddInt,
            BinaryOp::Add if floats => OpCode::AddFloat,
            BinaryOp::Add if arrays => OpCode::Concat,
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub if ints => OpCode::SubInt,
            BinaryOp::Sub if floats => OpCode::SubFloat,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul if ints => OpCode::MulInt,
            BinaryOp::Mul if floats => OpCode::MulFloat,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Mod => OpCode::Mod,
            BinaryOp::Pow => OpCode::Pow,
            BinaryOp::Eq if ints => OpCode::EqInt,
            BinaryOp::Eq => OpCode::Eq,
            BinaryOp::Ne => OpCode::Ne,
            BinaryOp::Lt if ints => OpCode::LtInt,
            BinaryOp::Lt if floats => OpCode::LtFloat,
            BinaryOp::Lt => OpCode::Lt,
            BinaryOp::Le if ints => OpCode::LeInt,
            BinaryOp::Le if floats => OpCode::LeFloat,
            BinaryOp::Le => OpCode::Le,
            BinaryOp::Gt if ints => OpCode::GtInt,
            BinaryOp::Gt if floats => OpCode::GtFloat,
            BinaryOp::Gt => OpCode::Gt,
            BinaryOp::Ge if ints => OpCode::GeInt,
            BinaryOp::Ge if floats => OpCode::GeFloat,
            BinaryOp::Ge => OpCode::Ge,
            BinaryOp::Contains => OpCode::Contains,
            BinaryOp::StartsWith => OpCode::StartsWith,
            BinaryOp::EndsWith => OpCode::EndsWith,
            BinaryOp::Range => OpCode::Range,
            BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Coalesce
            | BinaryOp::In
            | BinaryOp::NotIn
            | BinaryOp::Matches => {
                return Err(located(CompileError::Unsupported(op.symbol().to_string()), location))
            }
        };
        self.emit(code, 0, location);
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn compile_call(&mut self, callee: &Node, arguments: &[Node], location: Location) -> CompileResult {
        let count = arguments.len();

        // Host function by name with exactly matching argument types
        if let NodeKind::Identifier(name) = &callee.kind {
            if self.variable(name).is_none() {
                if let Some(function) = self.config.function(name).cloned() {
                    if is_exact_call(&function.signature, arguments) {
                        for argument in arguments {
                            self.compile_node(argument)?;
                        }
                        let index = self.function_index(&function);
                        let arg = self.packed(name, index, count, location)?;
                        self.emit(OpCode::CallTyped, arg, location);
                        return Ok(());
                    }
                }
            }
        }

        // Method call on a receiver
        if let NodeKind::Member {
            receiver,
            property,
            optional,
            method: true,
        } = &callee.kind
        {
            if let Some(name) = property.as_str() {
                self.compile_node(receiver)?;
                let skip = self.optional_jump(*optional, location);
                for argument in arguments {
                    self.compile_node(argument)?;
                }
                let index = self.string_constant(name, property.location)?;
                let arg = self.packed(name, index as usize, count, location)?;
                self.emit(OpCode::Method, arg, location);
                if let Some(skip) = skip {
                    self.patch_jump(skip, location)?;
                }
                return Ok(());
            }
        }

        self.compile_node(callee)?;
        for argument in arguments {
            self.compile_node(argument)?;
        }
        let count = u32::try_from(count).map_err(|_| {
            located(
                CompileError::TooManyArguments {
                    name: callee.to_string(),
                    count,
                },
                location,
            )
        })?;
        self.emit(OpCode::Call, count, location);
        Ok(())
    }

    fn compile_builtin(&mut self, name: &str, arguments: &[Node], location: Location) -> CompileResult {
        let has_closure = matches!(arguments.get(1).map(|a| &a.kind), Some(NodeKind::Closure(_)));
        if catalog::predicate_named(name).is_some() && has_closure {
            return self.compile_predicate(name, arguments, location);
        }
        if name != VALUE_GET && !catalog::is_builtin(name) {
            return Err(located(CompileError::UnknownBuiltin(name.to_string()), location));
        }
        for argument in arguments {
            self.compile_node(argument)?;
        }
        self.call_builtin(name, arguments.len(), location)
    }

    fn call_builtin(&mut self, name: &str, count: usize, location: Location) -> CompileResult {
        let index = library::builtin_id(name)
            .ok_or_else(|| located(CompileError::UnknownBuiltin(name.to_string()), location))?;
        let arg = self.packed(name, index, count, location)?;
        self.emit(OpCode::CallBuiltin, arg, location);
        Ok(())
    }

    // =========================================================================
    // Comprehensions
    // =========================================================================

    /// Lower a predicate builtin. Every form opens a scope over the
    /// sequence and loops as `L: JumpIfEnd E; body; Next; JumpBackward L`.
    fn compile_predicate(&mut self, name: &str, arguments: &[Node], location: Location) -> CompileResult {
        let (sequence, closure) = (&arguments[0], closure_body(&arguments[1]));
        match name {
            "all" | "any" | "none" => {
                self.compile_node(sequence)?;
                self.emit(OpCode::Begin, 0, location);
                let exit_op = if name == "all" { OpCode::JumpIfFalse } else { OpCode::JumpIfTrue };
                let mut exit = 0;
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    exit = c.emit_jump(exit_op, location);
                    c.emit(OpCode::Pop, 0, location);
                    Ok(())
                })?;
                // Exhausted without an early exit
                let exhausted = if name == "any" { OpCode::PushFalse } else { OpCode::PushTrue };
                self.emit(exhausted, 0, location);
                let done = self.emit_jump(OpCode::Jump, location);
                self.patch_jump(exit, location)?;
                if name == "none" {
                    self.emit(OpCode::Pop, 0, location);
                    self.emit(OpCode::PushFalse, 0, location);
                }
                self.patch_jump(done, location)?;
                self.emit(OpCode::End, 0, location);
            }
            "one" | "count" => {
                self.compile_node(sequence)?;
                self.emit(OpCode::Begin, 0, location);
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    let skip = c.emit_jump(OpCode::JumpIfFalse, location);
                    c.emit(OpCode::IncrementCount, 0, location);
                    c.patch_jump(skip, location)?;
                    c.emit(OpCode::Pop, 0, location);
                    Ok(())
                })?;
                self.emit(OpCode::GetCount, 0, location);
                if name == "one" {
                    self.emit(OpCode::PushInt, 1, location);
                    self.emit(OpCode::EqInt, 0, location);
                }
                self.emit(OpCode::End, 0, location);
            }
            "filter" => {
                self.compile_node(sequence)?;
                self.emit(OpCode::Begin, 0, location);
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    let skip = c.emit_jump(OpCode::JumpIfFalse, location);
                    c.emit(OpCode::Pointer, 0, location);
                    c.emit(OpCode::Collect, 0, location);
                    c.patch_jump(skip, location)?;
                    c.emit(OpCode::Pop, 0, location);
                    Ok(())
                })?;
                self.emit(OpCode::GetCollected, 0, location);
                self.emit(OpCode::End, 0, location);
            }
            "map" => {
                self.compile_node(sequence)?;
                self.emit(OpCode::Begin, 0, location);
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    c.emit(OpCode::Collect, 0, location);
                    Ok(())
                })?;
                self.emit(OpCode::GetCollected, 0, location);
                self.emit(OpCode::End, 0, location);
            }
            "find" | "findIndex" | "findLast" | "findLastIndex" => {
                let reverse = name.starts_with("findLast");
                let index = name.ends_with("Index");
                self.compile_node(sequence)?;
                self.emit(OpCode::Begin, if reverse { BEGIN_REVERSE } else { 0 }, location);
                let mut found = 0;
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    found = c.emit_jump(OpCode::JumpIfTrue, location);
                    c.emit(OpCode::Pop, 0, location);
                    Ok(())
                })?;
                if index {
                    self.emit(OpCode::PushInt, (-1i32) as u32, location);
                } else {
                    self.emit(OpCode::PushNil, 0, location);
                }
                let done = self.emit_jump(OpCode::Jump, location);
                self.patch_jump(found, location)?;
                self.emit(OpCode::Pop, 0, location);
                let current = if index { OpCode::GetIndex } else { OpCode::Pointer };
                self.emit(current, 0, location);
                self.patch_jump(done, location)?;
                self.emit(OpCode::End, 0, location);
            }
            "groupBy" => {
                self.compile_node(sequence)?;
                self.emit(OpCode::Begin, 0, location);
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    c.emit(OpCode::SetGroupBy, 0, location);
                    Ok(())
                })?;
                self.emit(OpCode::GetGroupBy, 0, location);
                self.emit(OpCode::End, 0, location);
            }
            "sortBy" => {
                // sortBy(sequence, keys, order) with the keys collected in a loop
                self.compile_node(sequence)?;
                self.emit(OpCode::Dup, 0, location);
                self.emit(OpCode::Begin, 0, location);
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    c.emit(OpCode::Collect, 0, location);
                    Ok(())
                })?;
                self.emit(OpCode::GetCollected, 0, location);
                self.emit(OpCode::End, 0, location);
                match arguments.get(2) {
                    Some(order) => self.compile_node(order)?,
                    None => {
                        let index = self.string_constant("asc", location)?;
                        self.emit(OpCode::Push, index, location);
                    }
                }
                self.call_builtin("sortBy", 3, location)?;
            }
            "reduce" => {
                self.compile_node(sequence)?;
                let flags = match arguments.get(2) {
                    Some(initial) => {
                        self.compile_node(initial)?;
                        BEGIN_ACC
                    }
                    None => BEGIN_ACC_FIRST,
                };
                self.emit(OpCode::Begin, flags, location);
                self.compile_loop(location, |c| {
                    c.compile_node(closure)?;
                    c.emit(OpCode::SetAcc, 0, location);
                    Ok(())
                })?;
                self.emit(OpCode::GetAcc, 0, location);
                self.emit(OpCode::End, 0, location);
            }
            "sum" => {
                self.compile_node(sequence)?;
                self.emit(OpCode::PushInt, 0, location);
                self.emit(OpCode::Begin, BEGIN_ACC, location);
                self.compile_loop(location, |c| {
                    c.emit(OpCode::GetAcc, 0, location);
                    c.compile_node(closure)?;
                    c.emit(OpCode::Add, 0, location);
                    c.emit(OpCode::SetAcc, 0, location);
                    Ok(())
                })?;
                self.emit(OpCode::GetAcc, 0, location);
                self.emit(OpCode::End, 0, location);
            }
            other => return Err(located(CompileError::UnknownBuiltin(other.to_string()), location)),
        }
        Ok(())
    }

    /// Emit the loop skeleton around `body`; the scope must already be open.
    fn compile_loop(
        &mut self,
        location: Location,
        body: impl FnOnce(&mut Self) -> CompileResult,
    ) -> CompileResult {
        let start = self.position();
        let end = self.emit_jump(OpCode::JumpIfEnd, location);
        body(self)?;
        self.emit(OpCode::Next, 0, location);
        self.emit_backward(start, location)?;
        self.patch_jump(end, location)
    }
}

fn located(error: CompileError, location: Location) -> LocatedCompileError {
    LocatedCompileError { error, location }
}

fn closure_body(node: &Node) -> &Node {
    match &node.kind {
        NodeKind::Closure(body) => body,
        _ => node,
    }
}

/// The members of an `in` right-hand side as a lookup map, when every
/// member is a hashable literal.
fn set_value(items: &[Node]) -> Option<Value> {
    let mut entries = IndexMap::with_capacity(items.len());
    for item in items {
        let value = match &item.kind {
            NodeKind::Nil => Value::Nil,
            NodeKind::Bool(b) => Value::Bool(*b),
            NodeKind::Integer(i) => Value::Int64(*i),
            NodeKind::Float(x) => Value::Float64(*x),
            NodeKind::String(s) => Value::string(s.as_str()),
            _ => return None,
        };
        entries.insert(value.to_map_key()?, Value::Bool(true));
    }
    Some(Value::Map(Arc::new(entries)))
}

/// A call can skip coercion when it is not variadic and every argument is
/// already the runtime representation its parameter expects.
fn is_exact_call(signature: &FunctionType, arguments: &[Node]) -> bool {
    if signature.variadic || signature.params.len() != arguments.len() {
        return false;
    }
    signature
        .params
        .iter()
        .zip(arguments)
        .all(|(param, argument)| {
            if argument.ty() != *param {
                return false;
            }
            match param {
                Type::Bool | Type::String | Type::Time | Type::Duration => true,
                Type::Int | Type::Float => produces_canonical_number(argument),
                _ => false,
            }
        })
}

/// Nodes whose numeric result is always a 64-bit int or float.
fn produces_canonical_number(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Integer(_) | NodeKind::Float(_) => true,
        NodeKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => produces_canonical_number(operand),
        NodeKind::Binary { op, .. } => op.is_arithmetic(),
        NodeKind::Builtin { name, .. } => matches!(
            name.as_str(),
            "len" | "int" | "float" | "count" | "findIndex" | "findLastIndex" | "mean" | "median"
        ),
        _ => false,
    }
}
