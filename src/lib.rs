//! A Lua 5.1-compatible interpreter core: a register-based bytecode
//! compiler over a caller-supplied AST, the VM that executes the
//! resulting prototypes, and the incremental tri-color GC backing both.
//!
//! This crate does not parse source text (spec Non-goals: no lexer/
//! parser, no standard library) — callers build an `ast::Block` however
//! they like and hand it to [`vm::LuaVM::run`].

pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod gc;
pub mod value;
pub mod vm;

pub use ast::Block;
pub use config::{CompilerOptions, GcParams};
pub use error::{LuaError, LuaFullError, LuaResult, RaisedError};
pub use value::Value;
pub use vm::state::LuaState;
pub use vm::LuaVM;

/// Compile and run `block` to completion with default settings, equivalent
/// to `LuaVM::new().run(...)` for one-shot callers.
pub fn execute(block: &Block, chunk_name: &str) -> LuaResult<Vec<Value>> {
    let mut vm = LuaVM::new();
    vm.run(block, chunk_name, &[])
}
