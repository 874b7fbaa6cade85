//! Expression compilation: literals, variables, operators, calls, table
//! constructors (spec §4.3.3).

use super::errors::CompileError;
use super::func_state::FuncState;
use super::resolve::NameRef;
use super::Compiler;
use crate::ast::{BinOp, Expr, TableField, UnOp};
use crate::value::Value;
use crate::vm::opcode::{rk_from_constant, rk_from_register, Instruction, OpCode};

impl FuncState {
    fn set_free_reg(&mut self, n: u8) {
        self.free_reg = n;
        if n + 1 > self.max_stack_size {
            self.max_stack_size = n + 1;
        }
    }
}

impl Compiler<'_> {
    pub(super) fn emit(&mut self, instr: Instruction, line: u32) -> usize {
        self.current().code.emit(instr, line)
    }

    pub(super) fn ensure_reg_at_least(&mut self, reg: u8, line: u32) -> Result<(), CompileError> {
        let fs = self.current();
        if fs.free_reg <= reg {
            let n = reg - fs.free_reg + 1;
            fs.reserve_regs(n, line, self.opts.max_registers)?;
        }
        Ok(())
    }

    pub(super) fn bump_free_reg(&mut self, n: u8) {
        self.current().set_free_reg(n);
    }

    pub(super) fn emit_loadnil(&mut self, base: u8, count: u8, line: u32) {
        if count == 0 {
            return;
        }
        self.emit(Instruction::encode_abc(OpCode::LoadNil, base, (base + count - 1) as u16, 0), line);
    }

    pub(super) fn intern_constant(&mut self, name: &str, line: u32) -> Result<u16, CompileError> {
        let s = self.intern(name);
        self.current().add_constant(Value::String(s), line, self.opts.max_constants)
    }

    /// Compile `e` so its value ends up in exactly `reg` (always a single
    /// value — multi-return expressions are truncated here).
    pub fn compile_expr_to_reg(&mut self, e: &Expr, reg: u8, line: u32) -> Result<(), CompileError> {
        match e {
            Expr::Nil => {
                self.emit(Instruction::encode_abc(OpCode::LoadNil, reg, reg as u16, 0), line);
            }
            Expr::True => {
                self.emit(Instruction::encode_abc(OpCode::LoadBool, reg, 1, 0), line);
            }
            Expr::False => {
                self.emit(Instruction::encode_abc(OpCode::LoadBool, reg, 0, 0), line);
            }
            Expr::Number(n) => {
                let k = self.current().add_constant(Value::Number(*n), line, self.opts.max_constants)?;
                self.emit(Instruction::encode_abx(OpCode::LoadK, reg, k as u32), line);
            }
            Expr::Int(i) => {
                let k = self.current().add_constant(Value::Number(*i as f64), line, self.opts.max_constants)?;
                self.emit(Instruction::encode_abx(OpCode::LoadK, reg, k as u32), line);
            }
            Expr::Str(s) => {
                let sid = self.intern(s);
                let k = self.current().add_constant(Value::String(sid), line, self.opts.max_constants)?;
                self.emit(Instruction::encode_abx(OpCode::LoadK, reg, k as u32), line);
            }
            Expr::Vararg => {
                self.emit(Instruction::encode_abc(OpCode::Vararg, reg, 2, 0), line);
            }
            Expr::Var(name) => self.compile_var_to_reg(name, reg, line)?,
            Expr::Paren(inner) => self.compile_expr_to_reg(inner, reg, line)?,
            Expr::Unop { op, e } => self.compile_unop(*op, e, reg, line)?,
            Expr::Binop { op, lhs, rhs } => self.compile_binop(*op, lhs, rhs, reg, line)?,
            Expr::Index { obj, key } => {
                let save = self.current().free_reg;
                let obj_rk = self.compile_expr_rk(obj, line)?;
                let key_rk = self.compile_expr_rk(key, line)?;
                self.ensure_reg_at_least(reg, line)?;
                self.emit(Instruction::encode_abc(OpCode::GetTable, reg, obj_rk, key_rk), line);
                self.bump_free_reg(save.max(reg + 1));
            }
            Expr::Member { obj, name } => {
                let save = self.current().free_reg;
                let obj_rk = self.compile_expr_rk(obj, line)?;
                let k = self.intern_constant(name, line)?;
                self.ensure_reg_at_least(reg, line)?;
                self.emit(Instruction::encode_abc(OpCode::GetTable, reg, obj_rk, rk_from_constant(k as u8)), line);
                self.bump_free_reg(save.max(reg + 1));
            }
            Expr::Call { callee, args, is_method, method_name } => {
                self.ensure_reg_at_least(reg, line)?;
                self.compile_call_into(callee, args, *is_method, method_name.as_deref(), reg, 1, line)?;
            }
            Expr::Function(body) => {
                self.compile_function_expr(body, reg, line)?;
            }
            Expr::Table(fields) => {
                self.compile_table_ctor(fields, reg, line)?;
            }
        }
        Ok(())
    }

    fn compile_var_to_reg(&mut self, name: &str, reg: u8, line: u32) -> Result<(), CompileError> {
        match self.resolve_name(name, line)? {
            NameRef::Local(src) => {
                if src != reg {
                    self.emit(Instruction::encode_abc(OpCode::Move, reg, src as u16, 0), line);
                }
            }
            NameRef::Upvalue(idx) => {
                self.emit(Instruction::encode_abc(OpCode::GetUpval, reg, idx as u16, 0), line);
            }
            NameRef::Global(k) => {
                self.emit(Instruction::encode_abx(OpCode::GetGlobal, reg, k as u32), line);
            }
        }
        Ok(())
    }

    fn compile_unop(&mut self, op: UnOp, e: &Expr, reg: u8, line: u32) -> Result<(), CompileError> {
        let save = self.current().free_reg;
        let src = self.compile_expr_to_new_reg(e, line)?;
        self.ensure_reg_at_least(reg, line)?;
        let opcode = match op {
            UnOp::Neg => OpCode::Unm,
            UnOp::Not => OpCode::Not,
            UnOp::Len => OpCode::Len,
        };
        self.emit(Instruction::encode_abc(opcode, reg, src as u16, 0), line);
        self.bump_free_reg(save.max(reg + 1));
        Ok(())
    }

    fn compile_binop(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, reg: u8, line: u32) -> Result<(), CompileError> {
        match op {
            BinOp::And | BinOp::Or => return self.compile_logical(op, lhs, rhs, reg, line),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                return self.compile_compare(op, lhs, rhs, reg, line)
            }
            BinOp::Concat => return self.compile_concat(lhs, rhs, reg, line),
            _ => {}
        }
        let save = self.current().free_reg;
        let l = self.compile_expr_rk(lhs, line)?;
        let r = self.compile_expr_rk(rhs, line)?;
        self.ensure_reg_at_least(reg, line)?;
        let opcode = match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::Mod => OpCode::Mod,
            BinOp::Pow => OpCode::Pow,
            _ => unreachable!(),
        };
        self.emit(Instruction::encode_abc(opcode, reg, l, r), line);
        self.bump_free_reg(save.max(reg + 1));
        Ok(())
    }

    /// `and`/`or` compile to a `TEST`/`TESTSET` + `JMP` pair with a
    /// pending jump list carrying the unresolved "skip right operand"
    /// branch until the right side is compiled (spec §4.3.3).
    fn compile_logical(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, reg: u8, line: u32) -> Result<(), CompileError> {
        self.compile_expr_to_reg(lhs, reg, line)?;
        // `and`: skip rhs (keep lhs) when lhs is falsy -> TESTSET sense 0
        // `or`:  skip rhs (keep lhs) when lhs is truthy -> TESTSET sense 1
        let sense: u16 = if op == BinOp::And { 0 } else { 1 };
        self.emit(Instruction::encode_abc(OpCode::Test, reg, 0, sense), line);
        let skip = self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line);
        self.compile_expr_to_reg(rhs, reg, line)?;
        let target = self.current().code.pc();
        self.current().code.patch_jump(skip, target, line)?;
        Ok(())
    }

    /// Comparisons are "test" instructions immediately followed by a
    /// `JMP`; the reader of the result (here, a value-producing context)
    /// wraps the pair in a `LOADBOOL`/`LOADBOOL` diamond (spec §4.3.3 and
    /// the teacher's `expr.rs` "relational op produces a boolean value"
    /// helper, generalized from its test-only use in conditions).
    fn compile_compare(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, reg: u8, line: u32) -> Result<(), CompileError> {
        let (opcode, swap, sense) = compare_opcode(op);
        let save = self.current().free_reg;
        // Operands are always evaluated left-to-right; only the
        // instruction's operand *positions* swap for `>`/`>=`, which
        // Lua has no opcode for and instead encodes as `<`/`<=` with
        // the arguments reversed.
        let l = self.compile_expr_rk(lhs, line)?;
        let r = self.compile_expr_rk(rhs, line)?;
        let (op_a, op_b) = if swap { (r, l) } else { (l, r) };
        self.ensure_reg_at_least(reg, line)?;
        self.emit(Instruction::encode_abc(opcode, sense as u8, op_a, op_b), line);
        let jmp_true = self.emit(Instruction::encode_asbx(OpCode::Jmp, 0, 0), line);
        // False case skips the next (true-case) instruction via its own
        // C=1 "skip next" rather than a second JMP — the true case, once
        // reached, falls straight through to here.
        self.emit(Instruction::encode_abc(OpCode::LoadBool, reg, 0, 1), line);
        let true_pc = self.current().code.pc();
        self.current().code.patch_jump(jmp_true, true_pc, line)?;
        self.emit(Instruction::encode_abc(OpCode::LoadBool, reg, 1, 0), line);
        self.bump_free_reg(save.max(reg + 1));
        Ok(())
    }

    /// `..` over a contiguous register range (spec §4.3.3).
    fn compile_concat(&mut self, lhs: &Expr, rhs: &Expr, reg: u8, line: u32) -> Result<(), CompileError> {
        let base = self.current().free_reg;
        self.compile_expr_to_new_reg(lhs, line)?;
        self.compile_expr_to_new_reg(rhs, line)?;
        self.ensure_reg_at_least(reg, line)?;
        self.emit(Instruction::encode_abc(OpCode::Concat, reg, base as u16, (base + 1) as u16), line);
        self.bump_free_reg(base.max(reg + 1));
        Ok(())
    }

    pub fn compile_expr_to_new_reg(&mut self, e: &Expr, line: u32) -> Result<u8, CompileError> {
        let reg = self.current().reserve_regs(1, line, self.opts.max_registers)?;
        self.compile_expr_to_reg(e, reg, line)?;
        Ok(reg)
    }

    /// Compile `e` into a 9-bit RK operand: a register (possibly a fresh
    /// temporary) or, for literal constants, a direct constant-pool
    /// reference with no register consumed at all.
    pub fn compile_expr_rk(&mut self, e: &Expr, line: u32) -> Result<u16, CompileError> {
        match e {
            Expr::Number(n) => {
                let k = self.current().add_constant(Value::Number(*n), line, self.opts.max_constants)?;
                return Ok(rk_from_constant(k as u8));
            }
            Expr::Int(i) => {
                let k = self.current().add_constant(Value::Number(*i as f64), line, self.opts.max_constants)?;
                return Ok(rk_from_constant(k as u8));
            }
            Expr::Str(s) => {
                let sid = self.intern(s);
                let k = self.current().add_constant(Value::String(sid), line, self.opts.max_constants)?;
                return Ok(rk_from_constant(k as u8));
            }
            _ => {}
        }
        let reg = self.compile_expr_to_new_reg(e, line)?;
        Ok(rk_from_register(reg))
    }

    fn compile_table_ctor(&mut self, fields: &[TableField], reg: u8, line: u32) -> Result<(), CompileError> {
        let n_array_hint = fields.iter().filter(|f| matches!(f, TableField::Positional(_))).count();
        let n_hash_hint = fields.len() - n_array_hint;
        self.ensure_reg_at_least(reg, line)?;
        self.emit(
            Instruction::encode_abc(OpCode::NewTable, reg, size_hint_code(n_array_hint), size_hint_code(n_hash_hint)),
            line,
        );
        self.bump_free_reg(reg + 1);

        const FLUSH: usize = 50;
        let mut pending = 0usize;
        let mut flush_count: u16 = 0;
        let array_base = self.current().free_reg;

        for field in fields {
            match field {
                TableField::Positional(e) => {
                    self.compile_expr_to_new_reg(e, line)?;
                    pending += 1;
                    if pending == FLUSH {
                        flush_count += 1;
                        self.flush_setlist(reg, pending, flush_count, line);
                        pending = 0;
                        self.bump_free_reg(array_base);
                    }
                }
                TableField::Named(name, e) => {
                    let save = self.current().free_reg;
                    let k = self.intern_constant(name, line)?;
                    let v = self.compile_expr_rk(e, line)?;
                    self.current().free_reg = save;
                    self.emit(Instruction::encode_abc(OpCode::SetTable, reg, rk_from_constant(k as u8), v), line);
                }
                TableField::Indexed(key, e) => {
                    let save = self.current().free_reg;
                    let k = self.compile_expr_rk(key, line)?;
                    let v = self.compile_expr_rk(e, line)?;
                    self.current().free_reg = save;
                    self.emit(Instruction::encode_abc(OpCode::SetTable, reg, k, v), line);
                }
            }
        }
        if pending > 0 {
            flush_count += 1;
            self.flush_setlist(reg, pending, flush_count, line);
        }
        self.bump_free_reg(reg + 1);
        Ok(())
    }

    /// `SETLIST A B C`: store `B` array values starting at `R[A+1]` into
    /// the table at `R[A]`, beginning at index `(C-1)*50 + 1`.
    fn flush_setlist(&mut self, table_reg: u8, count: usize, block: u16, line: u32) {
        self.emit(Instruction::encode_abc(OpCode::SetList, table_reg, count as u16, block), line);
    }

    pub(super) fn compile_function_expr(&mut self, body: &crate::ast::FuncBody, reg: u8, line: u32) -> Result<(), CompileError> {
        let child = self.compile_child_function(body)?;
        let idx = self.current().children.len();
        self.current().children.push(child.clone());
        self.ensure_reg_at_least(reg, line)?;
        self.emit(Instruction::encode_abx(OpCode::Closure, reg, idx as u32), line);
        self.bump_free_reg(reg + 1);
        Ok(())
    }

    pub fn compile_child_function(&mut self, body: &crate::ast::FuncBody) -> Result<std::rc::Rc<crate::value::Prototype>, CompileError> {
        let source_name = self.current().source_name.clone();
        self.push_function(source_name)?;
        {
            let fs = self.current();
            fs.is_vararg = body.is_vararg;
            fs.num_params = body.params.len() as u8;
        }
        for p in &body.params {
            let reg = self.current().reserve_regs(1, body.line, self.opts.max_registers)?;
            self.current().declare_local(p, reg);
        }
        self.compile_block_new_scope(&body.body)?;
        super::stmt::emit_implicit_return(self);
        Ok(self.pop_function())
    }

    /// Compile `callee(args)` / `callee:name(args)` so the function (and,
    /// for a method call, the implicit `self`) land starting at
    /// `func_reg`, emitting `CALL func_reg B C` with `C = want + 1`
    /// (`want < 0` requests "all results", i.e. `C = 0`).
    pub fn compile_call_into(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        is_method: bool,
        method_name: Option<&str>,
        func_reg: u8,
        want: i32,
        line: u32,
    ) -> Result<(), CompileError> {
        self.ensure_reg_at_least(func_reg, line)?;
        self.compile_expr_to_reg(callee, func_reg, line)?;
        self.bump_free_reg(func_reg + 1);
        let args_base = if is_method {
            let name = method_name.expect("method call without a name");
            let k = self.intern_constant(name, line)?;
            self.ensure_reg_at_least(func_reg + 1, line)?;
            self.emit(Instruction::encode_abc(OpCode::Self_, func_reg, func_reg as u16, rk_from_constant(k as u8)), line);
            self.bump_free_reg(func_reg + 2);
            func_reg + 2
        } else {
            func_reg + 1
        };
        let nargs = self.compile_arglist(args, args_base, line)?;
        let b: u16 = if nargs < 0 { 0 } else { (args_base - func_reg - 1) as u16 + nargs as u16 + 1 };
        let c: u16 = if want < 0 { 0 } else { want as u16 + 1 };
        self.emit(Instruction::encode_abc(OpCode::Call, func_reg, b, c), line);
        let result_top = if want <= 0 { func_reg + 1 } else { func_reg + want as u8 };
        self.bump_free_reg(result_top);
        Ok(())
    }

    /// Compile an argument/return-value list, forwarding the trailing
    /// expression's multiple results when it is a call or `...`.
    /// Returns the fixed count placed, or `-1` if the tail is open-ended.
    pub fn compile_arglist(&mut self, exprs: &[Expr], base: u8, line: u32) -> Result<i32, CompileError> {
        if exprs.is_empty() {
            self.bump_free_reg(base);
            return Ok(0);
        }
        let n = exprs.len();
        for (i, e) in exprs[..n - 1].iter().enumerate() {
            let reg = base + i as u8;
            self.ensure_reg_at_least(reg, line)?;
            self.compile_expr_to_reg(e, reg, line)?;
            self.bump_free_reg(reg + 1);
        }
        let last = &exprs[n - 1];
        let last_reg = base + (n - 1) as u8;
        self.ensure_reg_at_least(last_reg, line)?;
        match last {
            Expr::Call { callee, args, is_method, method_name } => {
                self.compile_call_into(callee, args, *is_method, method_name.as_deref(), last_reg, -1, line)?;
                Ok(-1)
            }
            Expr::Vararg => {
                self.emit(Instruction::encode_abc(OpCode::Vararg, last_reg, 0, 0), line);
                self.bump_free_reg(last_reg + 1);
                Ok(-1)
            }
            _ => {
                self.compile_expr_to_reg(last, last_reg, line)?;
                self.bump_free_reg(last_reg + 1);
                Ok(n as i32)
            }
        }
    }
}

impl Compiler<'_> {
    /// Compile an expression list into exactly `want` consecutive
    /// registers starting at `base`: padded with `nil` when short, with
    /// the last expression's multiple results absorbed to fill the gap
    /// (spec §4.3.4 "local declaration"); extra expressions beyond `want`
    /// are still evaluated, for their side effects, then discarded.
    pub fn compile_fixed_exprlist(&mut self, exprs: &[Expr], base: u8, want: usize, line: u32) -> Result<(), CompileError> {
        if exprs.is_empty() {
            if want > 0 {
                self.ensure_reg_at_least(base + want as u8 - 1, line)?;
                self.emit_loadnil(base, want as u8, line);
                self.bump_free_reg(base + want as u8);
            }
            return Ok(());
        }
        let n = exprs.len();
        if n >= want {
            for i in 0..want.saturating_sub(1) {
                let reg = base + i as u8;
                self.ensure_reg_at_least(reg, line)?;
                self.compile_expr_to_reg(&exprs[i], reg, line)?;
                self.bump_free_reg(reg + 1);
            }
            if want > 0 {
                let reg = base + (want - 1) as u8;
                self.ensure_reg_at_least(reg, line)?;
                self.compile_expr_to_reg(&exprs[want - 1], reg, line)?;
                self.bump_free_reg(reg + 1);
            }
            for e in &exprs[want.min(n)..] {
                let save = self.current().free_reg;
                self.compile_expr_to_new_reg(e, line)?;
                self.current().free_reg = save;
            }
        } else {
            for i in 0..n - 1 {
                let reg = base + i as u8;
                self.ensure_reg_at_least(reg, line)?;
                self.compile_expr_to_reg(&exprs[i], reg, line)?;
                self.bump_free_reg(reg + 1);
            }
            let last_reg = base + (n - 1) as u8;
            self.ensure_reg_at_least(last_reg, line)?;
            let need = want - (n - 1);
            match &exprs[n - 1] {
                Expr::Call { callee, args, is_method, method_name } if need > 1 => {
                    self.compile_call_into(callee, args, *is_method, method_name.as_deref(), last_reg, need as i32, line)?;
                }
                Expr::Vararg if need > 1 => {
                    self.emit(Instruction::encode_abc(OpCode::Vararg, last_reg, need as u16 + 1, 0), line);
                    self.bump_free_reg(last_reg + need as u8);
                }
                e => {
                    self.compile_expr_to_reg(e, last_reg, line)?;
                    self.bump_free_reg(last_reg + 1);
                    if need > 1 {
                        let pad_base = last_reg + 1;
                        self.emit_loadnil(pad_base, (need - 1) as u8, line);
                        self.bump_free_reg(pad_base + (need - 1) as u8);
                    }
                }
            }
        }
        Ok(())
    }
}

fn compare_opcode(op: BinOp) -> (OpCode, bool, bool) {
    // (opcode, swap-operands, sense): Lua encodes `a > b` as `b < a` and
    // `~=` as `==` with an inverted sense.
    match op {
        BinOp::Eq => (OpCode::Eq, false, true),
        BinOp::Ne => (OpCode::Eq, false, false),
        BinOp::Lt => (OpCode::Lt, false, true),
        BinOp::Le => (OpCode::Le, false, true),
        BinOp::Gt => (OpCode::Lt, true, true),
        BinOp::Ge => (OpCode::Le, true, true),
        _ => unreachable!(),
    }
}

fn size_hint_code(n: usize) -> u16 {
    n.min(0x1ff) as u16
}
