//! Sable compiler - lowers checked syntax trees to VM programs.
//!
//! The input tree must have been checked (and optionally optimized) by
//! `sable-types`: instruction selection reads the types the checker left
//! on every node.

pub mod compile;

pub use compile::{compile, CompileError, Compiler, CompilerConfig, LocatedCompileError};
