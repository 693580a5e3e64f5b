//! Compiled programs.
//!
//! A program is a flat instruction list plus the tables it indexes: the
//! constant pool, the host function table and a parallel list of source
//! locations. Programs are immutable once built and may be shared across
//! threads; every run gets its own transient VM state.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sable_syntax::{Location, Source};

use crate::library;
use crate::value::{Function, Value};

/// Operation codes. The meaning of an instruction's `arg` is given per
/// variant; "packed" arguments carry an index in the high 24 bits and an
/// argument count in the low 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // === Stack ===
    /// Push constants[arg]
    Push,
    PushNil,
    PushTrue,
    PushFalse,
    /// Push arg reinterpreted as i32
    PushInt,
    Pop,
    Dup,

    // === Names ===
    /// Push let-bound slot arg
    LoadVar,
    /// Pop into let-bound slot arg
    StoreVar,
    /// Push the environment entry named constants[arg]
    LoadFast,
    /// Push the whole environment
    LoadEnv,
    /// Push a prepared constant (set or regex) constants[arg]
    LoadConst,
    /// Push host function functions[arg] as a value
    LoadFunc,

    // === Access ===
    /// Pop index, pop receiver, push receiver[index]
    Fetch,
    /// Pop receiver, push receiver.<constants[arg]>
    FetchField,
    /// Pop to, pop from, pop receiver (nil bounds are open)
    Slice,
    /// Pop arg arguments and a callee value, call it
    Call,
    /// Packed: functions[index] called with count arguments, no coercion
    CallTyped,
    /// Packed: library builtin index called with count arguments
    CallBuiltin,
    /// Packed: method constants[index] on the receiver below count arguments
    Method,

    // === Arithmetic ===
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Not,
    /// Array concatenation
    Concat,
    AddInt,
    SubInt,
    MulInt,
    AddFloat,
    SubFloat,
    MulFloat,

    // === Comparison ===
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    EqInt,
    LtInt,
    LeInt,
    GtInt,
    GeInt,
    LtFloat,
    LeFloat,
    GtFloat,
    GeFloat,

    // === Sequences and strings ===
    In,
    /// Membership in the prepared set constants[arg]
    InConst,
    /// Pattern compiled at run time
    Matches,
    /// Pattern precompiled into constants[arg]
    MatchesConst,
    Contains,
    StartsWith,
    EndsWith,
    Range,
    /// Pop arg values, push an array
    Array,
    /// Pop arg key/value pairs, push a map
    Map,

    // === Control (offsets are relative to the next instruction) ===
    Jump,
    JumpBackward,
    /// Jump when the top is true; the top stays
    JumpIfTrue,
    JumpIfFalse,
    JumpIfNil,
    JumpIfNotNil,
    /// Jump when the innermost scope is exhausted
    JumpIfEnd,

    // === Comprehension scopes ===
    /// Pop a sequence and open a scope. Flags: 1 reverse, 2 pop an
    /// initial accumulator first, 4 seed the accumulator from the first
    /// element.
    Begin,
    End,
    /// Advance the innermost scope
    Next,
    /// Push the current element (`#`)
    Pointer,
    GetIndex,
    GetLen,
    GetCount,
    IncrementCount,
    GetAcc,
    SetAcc,
    /// Pop a value into the scope's result list
    Collect,
    /// Push the result list as an array
    GetCollected,
    /// Pop a key; group the current element under it
    SetGroupBy,
    GetGroupBy,
}

impl OpCode {
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Push => "OpPush",
            OpCode::PushNil => "OpNil",
            OpCode::PushTrue => "OpTrue",
            OpCode::PushFalse => "OpFalse",
            OpCode::PushInt => "OpInt",
            OpCode::Pop => "OpPop",
            OpCode::Dup => "OpDup",
            OpCode::LoadVar => "OpLoadVar",
            OpCode::StoreVar => "OpStoreVar",
            OpCode::LoadFast => "OpLoadFast",
            OpCode::LoadEnv => "OpLoadEnv",
            OpCode::LoadConst => "OpLoadConst",
            OpCode::LoadFunc => "OpLoadFunc",
            OpCode::Fetch => "OpFetch",
            OpCode::FetchField => "OpFetchField",
            OpCode::Slice => "OpSlice",
            OpCode::Call => "OpCall",
            OpCode::CallTyped => "OpCallTyped",
            OpCode::CallBuiltin => "OpCallBuiltin",
            OpCode::Method => "OpMethod",
            OpCode::Add => "OpAdd",
            OpCode::Sub => "OpSub",
            OpCode::Mul => "OpMul",
            OpCode::Div => "OpDiv",
            OpCode::Mod => "OpMod",
            OpCode::Pow => "OpPow",
            OpCode::Neg => "OpNeg",
            OpCode::Not => "OpNot",
            OpCode::Concat => "OpConcat",
            OpCode::AddInt => "OpAddInt",
            OpCode::SubInt => "OpSubInt",
            OpCode::MulInt => "OpMulInt",
            OpCode::AddFloat => "OpAddFloat",
            OpCode::SubFloat => "OpSubFloat",
            OpCode::MulFloat => "OpMulFloat",
            OpCode::Eq => "OpEqual",
            OpCode::Ne => "OpNotEqual",
            OpCode::Lt => "OpLess",
            OpCode::Le => "OpLessOrEqual",
            OpCode::Gt => "OpMore",
            OpCode::Ge => "OpMoreOrEqual",
            OpCode::EqInt => "OpEqualInt",
            OpCode::LtInt => "OpLessInt",
            OpCode::LeInt => "OpLessOrEqualInt",
            OpCode::GtInt => "OpMoreInt",
            OpCode::GeInt => "OpMoreOrEqualInt",
            OpCode::LtFloat => "OpLessFloat",
            OpCode::LeFloat => "OpLessOrEqualFloat",
            OpCode::GtFloat => "OpMoreFloat",
            OpCode::GeFloat => "OpMoreOrEqualFloat",
            OpCode::In => "OpIn",
            OpCode::InConst => "OpInConst",
            OpCode::Matches => "OpMatches",
            OpCode::MatchesConst => "OpMatchesConst",
            OpCode::Contains => "OpContains",
            OpCode::StartsWith => "OpStartsWith",
            OpCode::EndsWith => "OpEndsWith",
            OpCode::Range => "OpRange",
            OpCode::Array => "OpArray",
            OpCode::Map => "OpMap",
            OpCode::Jump => "OpJump",
            OpCode::JumpBackward => "OpJumpBackward",
            OpCode::JumpIfTrue => "OpJumpIfTrue",
            OpCode::JumpIfFalse => "OpJumpIfFalse",
            OpCode::JumpIfNil => "OpJumpIfNil",
            OpCode::JumpIfNotNil => "OpJumpIfNotNil",
            OpCode::JumpIfEnd => "OpJumpIfEnd",
            OpCode::Begin => "OpBegin",
            OpCode::End => "OpEnd",
            OpCode::Next => "OpNext",
            OpCode::Pointer => "OpPointer",
            OpCode::GetIndex => "OpGetIndex",
            OpCode::GetLen => "OpGetLen",
            OpCode::GetCount => "OpGetCount",
            OpCode::IncrementCount => "OpIncrementCount",
            OpCode::GetAcc => "OpGetAcc",
            OpCode::SetAcc => "OpSetAcc",
            OpCode::Collect => "OpCollect",
            OpCode::GetCollected => "OpGetCollected",
            OpCode::SetGroupBy => "OpSetGroupBy",
            OpCode::GetGroupBy => "OpGetGroupBy",
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            OpCode::Jump
                | OpCode::JumpIfTrue
                | OpCode::JumpIfFalse
                | OpCode::JumpIfNil
                | OpCode::JumpIfNotNil
                | OpCode::JumpIfEnd
        )
    }
}

/// One instruction: an opcode and its 32-bit payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    pub arg: u32,
}

impl Instruction {
    pub fn new(op: OpCode, arg: u32) -> Self {
        Self { op, arg }
    }

    /// Split a packed argument into (index, count).
    pub fn unpack(&self) -> (usize, usize) {
        ((self.arg >> 8) as usize, (self.arg & 0xff) as usize)
    }
}

/// Pack an index and an argument count into one payload.
pub fn pack(index: usize, count: usize) -> Option<u32> {
    if index >= 1 << 24 || count > 0xff {
        return None;
    }
    Some(((index as u32) << 8) | count as u32)
}

/// A compiled expression.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Source text, kept for rendering errors
    pub source: String,
    pub code: Vec<Instruction>,
    /// Location of the node each instruction came from
    pub locations: Vec<Location>,
    pub constants: Vec<Value>,
    pub functions: Vec<Arc<Function>>,
    /// Number of `let` slots
    pub variables: usize,
}

impl Program {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Append an instruction and return its position.
    pub fn emit(&mut self, op: OpCode, arg: u32, location: Location) -> usize {
        self.code.push(Instruction::new(op, arg));
        self.locations.push(location);
        self.code.len() - 1
    }

    pub fn location(&self, ip: usize) -> Location {
        self.locations.get(ip).copied().unwrap_or_default()
    }

    pub fn source(&self) -> Source {
        Source::new(&self.source)
    }

    /// One line per instruction: `IP<TAB>OPNAME<TAB>ARG<TAB>(resolved)`.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (ip, instruction) in self.code.iter().enumerate() {
            let resolved = self.resolve(ip, instruction);
            let line = if resolved.is_empty() {
                format!("{}\t{}\t{}", ip, instruction.op.name(), instruction.arg)
            } else {
                format!(
                    "{}\t{}\t{}\t({})",
                    ip,
                    instruction.op.name(),
                    instruction.arg,
                    resolved
                )
            };
            writeln!(out, "{}", line).expect("writing to String should not fail");
        }
        out
    }

    fn resolve(&self, ip: usize, instruction: &Instruction) -> String {
        let arg = instruction.arg as usize;
        let constant = |index: usize| {
            self.constants
                .get(index)
                .map(|c| format!("{:?}", c))
                .unwrap_or_else(|| "?".to_string())
        };
        match instruction.op {
            OpCode::Push
            | OpCode::LoadFast
            | OpCode::LoadConst
            | OpCode::FetchField
            | OpCode::InConst
            | OpCode::MatchesConst => constant(arg),
            OpCode::PushInt => (instruction.arg as i32).to_string(),
            OpCode::LoadFunc => self
                .functions
                .get(arg)
                .map(|f| f.name.clone())
                .unwrap_or_default(),
            OpCode::CallTyped => {
                let (index, count) = instruction.unpack();
                let name = self
                    .functions
                    .get(index)
                    .map(|f| f.name.as_str())
                    .unwrap_or("?");
                format!("{}/{}", name, count)
            }
            OpCode::CallBuiltin => {
                let (index, count) = instruction.unpack();
                format!("{}/{}", library::name(index).unwrap_or("?"), count)
            }
            OpCode::Method => {
                let (index, count) = instruction.unpack();
                format!("{}/{}", constant(index), count)
            }
            op if op.is_jump() => (ip + 1 + arg).to_string(),
            OpCode::JumpBackward => (ip + 1).saturating_sub(arg).to_string(),
            OpCode::Begin if instruction.arg != 0 => {
                let bits = instruction.arg;
                let mut flags = Vec::new();
                if bits & BEGIN_REVERSE != 0 {
                    flags.push("reverse");
                }
                if bits & BEGIN_ACC != 0 {
                    flags.push("acc");
                }
                if bits & BEGIN_ACC_FIRST != 0 {
                    flags.push("acc=first");
                }
                flags.join(",")
            }
            _ => String::new(),
        }
    }
}

/// `Begin` flag: iterate from the last element.
pub const BEGIN_REVERSE: u32 = 1;
/// `Begin` flag: pop the initial accumulator before the sequence.
pub const BEGIN_ACC: u32 = 2;
/// `Begin` flag: the first element seeds the accumulator.
pub const BEGIN_ACC_FIRST: u32 = 4;
