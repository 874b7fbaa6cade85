//! The execution engine (spec §4.4): register-based dispatch loop, call
//! protocol, metamethod-aware operators, and the per-interpreter state
//! they all share.

pub mod arithmetic;
pub mod call;
pub mod call_info;
pub mod closure_ops;
pub mod dispatch;
pub mod metamethod;
pub mod opcode;
pub mod state;
pub mod table_ops;

use crate::ast::Block;
use crate::compiler::errors::CompileError;
use crate::config::{CompilerOptions, GcParams};
use crate::error::LuaResult;
use crate::value::{ClosureKind, Prototype, Value};
use state::LuaState;
use std::rc::Rc;

/// A ready-to-run interpreter: one `LuaState` plus the compiler settings
/// new chunks are compiled with.
pub struct LuaVM {
    pub state: LuaState,
    pub compiler_opts: CompilerOptions,
}

impl LuaVM {
    pub fn new() -> Self {
        Self::with_params(GcParams::default(), CompilerOptions::default())
    }

    pub fn with_params(gc_params: GcParams, compiler_opts: CompilerOptions) -> Self {
        LuaVM { state: LuaState::new(gc_params), compiler_opts }
    }

    pub fn compile(&mut self, block: &Block, chunk_name: &str) -> Result<Rc<Prototype>, CompileError> {
        crate::compiler::compile_main(block, chunk_name, &mut self.state.gc, &self.compiler_opts)
    }

    /// Wrap a compiled prototype in a fresh closure with no upvalues (a
    /// top-level chunk captures nothing, spec §4.3.4 "the main chunk is a
    /// vararg function with zero upvalues").
    pub fn load(&mut self, proto: Rc<Prototype>) -> Value {
        self.state.gc_step();
        let white = self.state.gc.current_white;
        let (id, charge) = self.state.gc.allocator.create_closure(white, ClosureKind::Lua(proto), Vec::new());
        self.state.gc.charge(charge);
        Value::Function(id)
    }

    /// Compile, load, and run a chunk to completion, returning whatever
    /// it returns (spec §4.4.2, top-level chunk execution).
    pub fn run(&mut self, block: &Block, chunk_name: &str, args: &[Value]) -> LuaResult<Vec<Value>> {
        let proto = self.compile(block, chunk_name).map_err(|e| {
            self.state.runtime_error(crate::error::LuaError::CompileError, e.to_string())
        })?;
        let closure = self.load(proto);
        call::call_values(&mut self.state, closure, args, -1)
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        Self::new()
    }
}
