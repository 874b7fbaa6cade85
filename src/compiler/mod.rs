//! Single-pass, register-based compiler (spec §4.3). Consumes an
//! `ast::Block`, produces a `Prototype`. Touches the GC only to intern
//! string constants and allocate prototypes — no execution state.

pub mod code;
pub mod errors;
pub mod expr;
pub mod func_state;
pub mod resolve;
pub mod stmt;

use crate::ast;
use crate::config::CompilerOptions;
use crate::gc::GC;
use crate::value::{Prototype, StringId};
use errors::CompileError;
use func_state::FuncState;
use std::rc::Rc;

pub struct Compiler<'a> {
    pub gc: &'a mut GC,
    pub opts: &'a CompilerOptions,
    pub funcs: Vec<FuncState>,
}

impl<'a> Compiler<'a> {
    fn new(gc: &'a mut GC, opts: &'a CompilerOptions) -> Self {
        Compiler { gc, opts, funcs: Vec::new() }
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        let white = self.gc.current_white;
        let (id, charge) = self.gc.allocator.create_string(white, s);
        self.gc.charge(charge);
        id
    }

    fn current(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("no active function")
    }

    fn push_function(&mut self, source_name: Rc<str>) -> Result<(), CompileError> {
        let depth = self.funcs.len() as u32;
        if depth >= self.opts.max_function_nesting {
            return Err(CompileError::FunctionNestingOverflow { line: 0 });
        }
        self.funcs.push(FuncState::new(source_name, depth));
        Ok(())
    }

    /// Pop the current function, turning its accumulated state into an
    /// immutable `Prototype`.
    fn pop_function(&mut self) -> Rc<Prototype> {
        let fs = self.funcs.pop().expect("function stack underflow");
        Rc::new(Prototype {
            instructions: fs.code.instructions,
            constants: fs.constants,
            children: fs.children,
            upvalue_descs: fs.upvalues,
            num_params: fs.num_params,
            max_stack_size: fs.max_stack_size,
            is_vararg: fs.is_vararg,
            source_name: fs.source_name,
            line_info: fs.code.lines,
        })
    }
}

/// Compile a top-level chunk: an implicit vararg function with no
/// parameters (spec.md doesn't separately model a "main" chunk; it is a
/// `Prototype` like any other, per the teacher's `compiler/mod.rs` entry
/// point).
pub fn compile_main(
    block: &ast::Block,
    source_name: &str,
    gc: &mut GC,
    opts: &CompilerOptions,
) -> Result<Rc<Prototype>, CompileError> {
    let mut c = Compiler::new(gc, opts);
    c.push_function(source_name.into())?;
    c.current().is_vararg = true;
    c.compile_block_new_scope(block)?;
    stmt::emit_implicit_return(&mut c);
    Ok(c.pop_function())
}
