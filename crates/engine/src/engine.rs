//! The compile and run pipeline.
//!
//! `compile` parses, checks (running visitor patches and the optimizer)
//! and lowers a source string. Every stage reports a [`SourceError`] with
//! its line and column resolved against the source.

use sable_compiler::CompilerConfig;
use sable_syntax::{parse_expr_with, Source, SourceError};
use sable_types::analyze;
use sable_vm::{Program, Value, Vm};

use crate::options::Options;

/// Compile `source` into a reusable program.
pub fn compile(source: &str, mut options: Options) -> Result<Program, SourceError> {
    let text = Source::new(source);
    let mut tree =
        parse_expr_with(source, &options.parse_config()).map_err(|err| err.resolve(&text))?;

    let config = options.check_config();
    analyze(&mut tree, &config, &mut options.visitors, options.optimize)
        .map_err(|err| err.to_source_error().resolve(&text))?;

    sable_compiler::compile(&tree, &CompilerConfig::new(options.functions))
        .map_err(|err| err.to_source_error().resolve(&text))
}

/// Run a compiled program with default limits.
pub fn run(program: &Program, env: &Value) -> Result<Value, SourceError> {
    run_with(&Vm::new(), program, env)
}

/// Run a compiled program on a configured VM.
pub fn run_with(vm: &Vm, program: &Program, env: &Value) -> Result<Value, SourceError> {
    vm.run(program, env)
        .map_err(|err| err.to_source_error().resolve(&program.source()))
}

/// Compile against the schema of `env` and run once.
pub fn eval(source: &str, env: &Value) -> Result<Value, SourceError> {
    eval_with(source, env, Options::new())
}

/// Compile with `options`, deriving the schema from `env` when none is set,
/// and run with the options' limits.
pub fn eval_with(source: &str, env: &Value, mut options: Options) -> Result<Value, SourceError> {
    if options.env.is_none() {
        options = options.env_value(env);
    }
    let vm = Vm::new().with_limits(options.limits);
    let program = compile(source, options)?;
    run_with(&vm, &program, env)
}
