//! Sable syntax crate - lexing, parsing and the type model.
//!
//! This crate turns expression text into a [`Tree`]: a located [`Node`]
//! tree that later stages type-check, optimize and compile.

pub mod ast;
pub mod builtins;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod source;
pub mod ty;

pub use ast::*;
pub use errors::{ErrorKind, SourceError};
pub use lexer::{lex, Kind, Lexeme, Token};
pub use parser::{parse, parse_expr, parse_expr_with, parse_with, ParseConfig};
pub use source::{Location, Source};
pub use ty::{FieldType, FunctionType, RecordType, Type};
