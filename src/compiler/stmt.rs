//! Statement compilation: locals, assignment, control flow, function
//! declaration sugar (spec §4.3.4).

use super::errors::CompileError;
use super::resolve::NameRef;
use super::Compiler;
use crate::ast::{self, Expr, FuncBody, IfArm, Stmt};
use crate::value::Value;
use crate::vm::opcode::{rk_from_constant, rk_from_register, Instruction, OpCode};

/// Where an assignment target's store instruction writes to, resolved
/// (and, for table targets, its object/key registers reserved) before
/// the right-hand side is compiled — matching the teacher's two-phase
/// "resolve, then evaluate, then store" assignment shape.
enum AssignTarget {
    Local(u8),
    Upvalue(u8),
    Global(u16),
    Table { obj_reg: u8, key_rk: u16 },
}

impl Compiler<'_> {
    /// Compile a block in a fresh lexical scope, restoring the register
    /// stack to its pre-block level on exit. `is_loop` marks the scope as
    /// a `break` target; returns its pending break-jump list.
    fn compile_block_in_scope(&mut self, block: &ast::Block, is_loop: bool) -> Result<Vec<usize>, CompileError> {
        let save_reg = self.current().free_reg;
        self.current().enter_scope(is_loop);
        for (stmt, line) in block {
            self.compile_stmt(stmt, *line)?;
        }
        let breaks = self.current().leave_scope();
        self.current().free_regs_to(save_reg);
        Ok(breaks)
    }

    pub fn compile_block_new_scope(&mut self, block: &ast::Block) -> Result<(), CompileError> {
        self.compile_block_in_scope(block, false)?;
        Ok(())
    }

    pub fn compile_stmt(&mut self, stmt: &Stmt, line: u32) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(e) => self.compile_expr_stmt(e, line),
            Stmt::Block(b) => self.compile_block_new_scope(b),
            Stmt::Local { names, attribs: _, exprs } => self.compile_local(names, exprs, line),
            Stmt::Assign { targets, exprs } => self.compile_assign(targets, exprs, line),
            Stmt::If { arms, else_ } => self.compile_if(arms, else_, line),
            Stmt::While { cond, body } => self.compile_while(cond, body, line),
            Stmt::Repeat { body, cond } => self.compile_repeat(body, cond, line),
            Stmt::NumericFor { var, start, stop, step, body } => self.compile_numeric_for(var, start, stop, step.as_ref(), body, line),
            Stmt::GenericFor { names, exprs, body } => self.compile_generic_for(names, exprs, body, line),
            Stmt::Return(exprs) => self.compile_return(exprs, line),
            Stmt::Break => self.compile_break(line),
            Stmt::FunctionDecl { target, is_method, body } => self.compile_function_decl(target, *is_method, body, line),
            Stmt::LocalFunction { name, body } => self.compile_local_function(name, body, line),
            Stmt::Do(b) => self.compile_block_new_scope(b),
        }
    }

    fn compile_expr_stmt(&mut self, e: &Expr, line: u32) -> Result<(), CompileError> {
        let save = self.current().free_reg;
        self.compile_expr_to_new_reg(e, line)?;
        self.current().free_regs_to(save);
        Ok(())
    }

    /// New locals become visible only after their initializers are
    /// compiled (spec §4.3.4 "a local isn't visible in its own
    /// initializer list").
    fn compile_local(&mut self, names: &[String], exprs: &[Expr], line: u32) -> Result<(), CompileError> {
        let base = self.current().free_reg;
        self.compile_fixed_exprlist(exprs, base, names.len(), line)?;
        for (i, name) in names.iter().enumerate() {
            self.current().declare_local(name, base + i as u8);
        }
        Ok(())
    }

    fn resolve_assign_target(&mut self, target: &Expr, line: u32) -> Result<AssignTarget, CompileError> {
        match target {
            Expr::Var(name) => match self.resolve_name(name, line)? {
                NameRef::Local(r) => Ok(AssignTarget::Local(r)),
                NameRef::Upvalue(u) => Ok(AssignTarget::Upvalue(u)),
                NameRef::Global(k) => Ok(AssignTarget::Global(k)),
            },
            Expr::Index { obj, key } => {
                let obj_reg = self.compile_expr_to_new_reg(obj, line)?;
                let key_rk = self.compile_expr_rk(key, line)?;
                Ok(AssignTarget::Table { obj_reg, key_rk })
            }
            Expr::Member { obj, name } => {
                let obj_reg = self.compile_expr_to_new_reg(obj, line)?;
                let k = self.intern_constant(name, line)?;
                Ok(AssignTarget::Table { obj_reg, key_rk: rk_from_constant(k as u8) })
            }
            _ => Err(CompileError::MalformedAst { message: "invalid assignment target".into(), line }),
        }
    }

    fn store_assign_target(&mut self, target: &AssignTarget, value_reg: u8, line: u32) {
        match *target {
            AssignTarget::Local(r) => {
                if r != value_reg {
                    self.emit(Instruction::encode_abc(OpCode::Move, r, value_reg as u16, 0), line);
                }
            }
            AssignTarget::Upvalue(u) => {
                self.emit(Instruction::encode_abc(OpCode::SetUpval, value_reg, u as u16, 0), line);
            }
            AssignTarget::Global(k) => {
                self.emit(Instruction::encode_abx(OpCode::SetGlobal, value_reg, k as u32), line);
            }
            AssignTarget::Table { obj_reg, key_rk } => {
                self.emit(Instruction::encode_abc(OpCode::SetTable, obj_reg, key_rk, rk_from_register(value_reg)), line);
            }
        }
    }

    /// Target addresses (table/key registers) are resolved before the
    /// right-hand side is compiled, then stores happen after every value
    /// is in hand (spec §4.3.4 "multiple assignment").
    fn compile_assign(&mut self, targets: &[Expr], exprs: &[Expr], line: u32) -> Result<(), CompileError> {
        let save_reg = self.current().free_reg;
        let mut resolved = Vec::with_capacity(targets.len());
        for t in targets {
            resolved.push(self.resolve_assign_target(t, line)?);
        }
        let val_base = self.current().free_reg;
        self.compile_fixed_exprlist(exprs, val_base, targets.len(), line)?;
        for (i, t) in resolved.iter().enumerate() {
            self.store_assign_target(t, val_base + i as u8, line);
        }
        self.current().free_regs_to(save_reg);
        Ok(())
    }

    /// Compile `cond` and emit a `TEST`/`JMP` pair: the returned jump is
    /// taken when `cond` is falsy, left unpatched for the caller to wire
    /// to the appropriate "condition failed" target.
    fn compile_cond_skip_jump(&mut self, cond: &Expr, line: u32) -> Result<usize, CompileError> {
        let save = self.current().free_reg;
        let reg = self.compile_expr_to_new_reg(cond, line)?;
        self.emit(Instruction::encode_abc(OpCode::Test, reg, 0, 0), line);
        let jmp = self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line);
        self.current().free_regs_to(save);
        Ok(jmp)
    }

    fn compile_if(&mut self, arms: &[IfArm], else_: &Option<ast::Block>, line: u32) -> Result<(), CompileError> {
        let mut end_jumps = Vec::new();
        let mut pending_false_jump: Option<usize> = None;
        for arm in arms {
            if let Some(j) = pending_false_jump.take() {
                let target = self.current().code.pc();
                self.current().code.patch_jump(j, target, line)?;
            }
            let false_jump = self.compile_cond_skip_jump(&arm.cond, line)?;
            self.compile_block_new_scope(&arm.body)?;
            end_jumps.push(self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line));
            pending_false_jump = Some(false_jump);
        }
        if let Some(j) = pending_false_jump.take() {
            let target = self.current().code.pc();
            self.current().code.patch_jump(j, target, line)?;
        }
        if let Some(block) = else_ {
            self.compile_block_new_scope(block)?;
        }
        let end_pc = self.current().code.pc();
        self.current().code.patch_list(&end_jumps, end_pc, line)?;
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &ast::Block, line: u32) -> Result<(), CompileError> {
        let loop_start = self.current().code.pc();
        let false_jump = self.compile_cond_skip_jump(cond, line)?;
        let breaks = self.compile_block_in_scope(body, true)?;
        let back_jump = self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line);
        self.current().code.patch_jump(back_jump, loop_start, line)?;
        let end_pc = self.current().code.pc();
        self.current().code.patch_jump(false_jump, end_pc, line)?;
        self.current().code.patch_list(&breaks, end_pc, line)?;
        Ok(())
    }

    /// `until`'s condition is compiled inside the body's scope, since its
    /// locals are still live there (spec §4.3.4 "repeat ... until").
    fn compile_repeat(&mut self, body: &ast::Block, cond: &Expr, line: u32) -> Result<(), CompileError> {
        let loop_start = self.current().code.pc();
        let save_reg = self.current().free_reg;
        self.current().enter_scope(true);
        for (stmt, l) in body {
            self.compile_stmt(stmt, *l)?;
        }
        let false_jump = self.compile_cond_skip_jump(cond, line)?;
        self.current().code.patch_jump(false_jump, loop_start, line)?;
        let end_pc = self.current().code.pc();
        let breaks = self.current().leave_scope();
        self.current().code.patch_list(&breaks, end_pc, line)?;
        self.current().free_regs_to(save_reg);
        Ok(())
    }

    /// `FORPREP`/`FORLOOP` over three hidden control registers (index,
    /// limit, step) followed by the visible loop variable (spec §4.3.4
    /// "numeric for").
    fn compile_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &ast::Block,
        line: u32,
    ) -> Result<(), CompileError> {
        let base = self.current().free_reg;
        self.ensure_reg_at_least(base + 3, line)?;
        self.compile_expr_to_reg(start, base, line)?;
        self.compile_expr_to_reg(stop, base + 1, line)?;
        match step {
            Some(e) => self.compile_expr_to_reg(e, base + 2, line)?,
            None => {
                let k = self.current().add_constant(Value::Number(1.0), line, self.opts.max_constants)?;
                self.emit(Instruction::encode_abx(OpCode::LoadK, base + 2, k as u32), line);
            }
        }
        self.bump_free_reg(base + 4);

        let forprep_pc = self.emit(Instruction::encode_asbx(OpCode::ForPrep, base, 0), line);
        let loop_start = self.current().code.pc();
        self.current().enter_scope(true);
        self.current().declare_local(var, base + 3);
        for (stmt, l) in body {
            self.compile_stmt(stmt, *l)?;
        }
        let breaks = self.current().leave_scope();
        let forloop_pc = self.emit(Instruction::encode_asbx(OpCode::ForLoop, base, 0), line);
        self.current().code.patch_jump(forprep_pc, forloop_pc, line)?;
        self.current().code.patch_jump(forloop_pc, loop_start, line)?;
        let end_pc = self.current().code.pc();
        self.current().code.patch_list(&breaks, end_pc, line)?;
        self.current().free_regs_to(base);
        Ok(())
    }

    /// `TFORLOOP` driving an iterator triple `(f, s, var)` (spec §4.3.4
    /// "generic for").
    fn compile_generic_for(&mut self, names: &[String], exprs: &[Expr], body: &ast::Block, line: u32) -> Result<(), CompileError> {
        let base = self.current().free_reg;
        self.compile_fixed_exprlist(exprs, base, 3, line)?;
        let nvars = names.len() as u8;
        self.ensure_reg_at_least(base + 2 + nvars, line)?;
        self.bump_free_reg(base + 3 + nvars);

        let jmp_to_check = self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line);
        let loop_start = self.current().code.pc();
        self.current().enter_scope(true);
        for (i, name) in names.iter().enumerate() {
            self.current().declare_local(name, base + 3 + i as u8);
        }
        for (stmt, l) in body {
            self.compile_stmt(stmt, *l)?;
        }
        let breaks = self.current().leave_scope();

        let check_pc = self.current().code.pc();
        self.current().code.patch_jump(jmp_to_check, check_pc, line)?;
        self.emit(Instruction::encode_abc(OpCode::TForLoop, base, 0, nvars as u16), line);
        let back_jump = self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line);
        self.current().code.patch_jump(back_jump, loop_start, line)?;
        let end_pc = self.current().code.pc();
        self.current().code.patch_list(&breaks, end_pc, line)?;
        self.current().free_regs_to(base);
        Ok(())
    }

    fn compile_return(&mut self, exprs: &[Expr], line: u32) -> Result<(), CompileError> {
        if exprs.is_empty() {
            self.emit(Instruction::encode_abc(OpCode::Return, 0, 1, 0), line);
            return Ok(());
        }
        let base = self.current().free_reg;
        let n = self.compile_arglist(exprs, base, line)?;
        let b: u16 = if n < 0 { 0 } else { n as u16 + 1 };
        self.emit(Instruction::encode_abc(OpCode::Return, base, b, 0), line);
        Ok(())
    }

    fn compile_break(&mut self, line: u32) -> Result<(), CompileError> {
        let jmp = self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line);
        match self.current().innermost_loop_mut() {
            Some(scope) => {
                scope.break_jumps.push(jmp);
                Ok(())
            }
            None => Err(CompileError::MalformedAst { message: "break outside a loop".into(), line }),
        }
    }

    /// `function t.a.b:c(...) body end` desugars to assigning a closure
    /// (with an implicit leading `self` parameter for the method form)
    /// to the dotted target (spec §4.3.4 "function declaration sugar").
    fn compile_function_decl(&mut self, target: &Expr, is_method: bool, body: &FuncBody, line: u32) -> Result<(), CompileError> {
        let save_reg = self.current().free_reg;
        let t = self.resolve_assign_target(target, line)?;
        let val_reg = self.current().free_reg;
        self.ensure_reg_at_least(val_reg, line)?;
        if is_method {
            let mut with_self = body.clone();
            with_self.params.insert(0, "self".to_string());
            self.compile_function_expr(&with_self, val_reg, line)?;
        } else {
            self.compile_function_expr(body, val_reg, line)?;
        }
        self.store_assign_target(&t, val_reg, line);
        self.current().free_regs_to(save_reg);
        Ok(())
    }

    /// `local function f(...) ... end`: `f` is declared before its body
    /// is compiled so recursive calls resolve to the local itself rather
    /// than a global (spec §4.3.4 "local function").
    fn compile_local_function(&mut self, name: &str, body: &FuncBody, line: u32) -> Result<(), CompileError> {
        let reg = self.current().reserve_regs(1, line, self.opts.max_registers)?;
        self.current().declare_local(name, reg);
        self.compile_function_expr(body, reg, line)?;
        Ok(())
    }
}

/// Every prototype ends in a `RETURN` even when the source falls off the
/// end of its block without an explicit `return` (spec §4.3.1).
pub fn emit_implicit_return(c: &mut Compiler) {
    let line = c.current().code.lines.last().copied().unwrap_or(0);
    c.emit(Instruction::encode_abc(OpCode::Return, 0, 1, 0), line);
}
