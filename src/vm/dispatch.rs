//! The bytecode dispatch loop (spec §4.4 "Execution engine"). `run`
//! drives the current thread's top frame forward non-recursively: a
//! Lua-to-Lua `CALL`/`TAILCALL` chain never grows the Rust stack, since
//! pushing or replacing a `CallInfo` just means the same loop keeps
//! stepping, now over a different frame. Only a native function calling
//! back into Lua (a metamethod, `pcall`, an iterator, the entry point)
//! recurses into `run`, bounded by `MAX_C_CALLS` (spec §4.4.2).

use crate::error::LuaResult;
use crate::value::{ClosureKind, Prototype, Value};
use crate::vm::arithmetic;
use crate::vm::call;
use crate::vm::closure_ops;
use crate::vm::opcode::{rk_index, rk_is_constant, Instruction, OpCode};
use crate::vm::state::LuaState;
use crate::vm::table_ops;
use std::rc::Rc;

/// Run until the current thread's call stack depth returns to `floor`
/// (inclusive) — i.e. until the frame that was on top when `run` was
/// entered, and everything it calls, has returned.
pub fn run(state: &mut LuaState, floor: usize) -> LuaResult<()> {
    loop {
        if state.thread().call_infos.len() <= floor {
            return Ok(());
        }
        step(state)?;
    }
}

fn bump_pc(state: &mut LuaState, delta: i32) {
    let frame = state.thread_mut().call_infos.last_mut().expect("bump_pc with no active frame");
    frame.saved_pc = (frame.saved_pc as i64 + delta as i64) as usize;
}

fn current_proto(state: &LuaState) -> Rc<Prototype> {
    let fid = state.thread().call_infos.last().expect("no active frame").func;
    let closure = state.gc.allocator.closures.get(fid.0).expect("dangling closure id");
    match &closure.kind {
        ClosureKind::Lua(p) => p.clone(),
        ClosureKind::Native { .. } => unreachable!("dispatch stepped onto a native frame"),
    }
}

/// Execute exactly one instruction in the current top frame.
fn step(state: &mut LuaState) -> LuaResult<()> {
    let proto = current_proto(state);
    let base = state.thread().call_infos.last().unwrap().base;
    let pc = state.thread().call_infos.last().unwrap().saved_pc;
    let instr: Instruction = proto.instructions[pc];
    state.thread_mut().call_infos.last_mut().unwrap().saved_pc = pc + 1;

    let r = |state: &LuaState, i: u8| state.get_reg(base, i);
    let rk = |state: &LuaState, raw: u16| -> Value {
        if rk_is_constant(raw) {
            proto.constants[rk_index(raw) as usize]
        } else {
            state.get_reg(base, rk_index(raw))
        }
    };

    match instr.opcode() {
        OpCode::Move => {
            let (_, a, b, _) = instr.decode_abc();
            let v = r(state, b as u8);
            state.set_reg(base, a, v);
        }
        OpCode::LoadK => {
            let (_, a, bx) = instr.decode_abx();
            let v = proto.constants[bx as usize];
            state.set_reg(base, a, v);
        }
        OpCode::LoadBool => {
            let (_, a, b, c) = instr.decode_abc();
            state.set_reg(base, a, Value::Boolean(b != 0));
            if c != 0 {
                bump_pc(state, 1);
            }
        }
        OpCode::LoadNil => {
            let (_, a, b, _) = instr.decode_abc();
            for i in a..=(b as u8) {
                state.set_reg(base, i, Value::Nil);
            }
        }
        OpCode::GetUpval => {
            let (_, a, b, _) = instr.decode_abc();
            let fid = state.thread().call_infos.last().unwrap().func;
            let uv = closure_ops::closure_upvalue_id(state, fid, b as u8);
            let v = closure_ops::read_upvalue(state, uv);
            state.set_reg(base, a, v);
        }
        OpCode::SetUpval => {
            let (_, a, b, _) = instr.decode_abc();
            let fid = state.thread().call_infos.last().unwrap().func;
            let uv = closure_ops::closure_upvalue_id(state, fid, b as u8);
            let v = r(state, a);
            closure_ops::write_upvalue(state, uv, v);
        }
        OpCode::GetGlobal => {
            let (_, a, bx) = instr.decode_abx();
            let key = proto.constants[bx as usize];
            let globals = Value::Table(state.globals);
            let v = table_ops::index(state, globals, key)?;
            state.set_reg(base, a, v);
        }
        OpCode::SetGlobal => {
            let (_, a, bx) = instr.decode_abx();
            let key = proto.constants[bx as usize];
            let v = r(state, a);
            let globals = Value::Table(state.globals);
            table_ops::newindex(state, globals, key, v)?;
        }
        OpCode::NewTable => {
            let (_, a, b, c) = instr.decode_abc();
            state.gc_step();
            let white = state.gc.current_white;
            let (id, charge) = state.gc.allocator.create_table(white, b as usize, c as usize);
            state.gc.charge(charge);
            state.set_reg(base, a, Value::Table(id));
        }
        OpCode::GetTable => {
            let (_, a, b, c) = instr.decode_abc();
            let obj = r(state, b as u8);
            let key = rk(state, c);
            let v = table_ops::index(state, obj, key)?;
            state.set_reg(base, a, v);
        }
        OpCode::SetTable => {
            let (_, a, b, c) = instr.decode_abc();
            let obj = r(state, a);
            let key = rk(state, b);
            let v = rk(state, c);
            table_ops::newindex(state, obj, key, v)?;
        }
        OpCode::SetList => {
            let (_, a, b, c) = instr.decode_abc();
            let table_val = r(state, a);
            let t = table_val.as_table().expect("SETLIST target is not a table");
            let start = (c as usize - 1) * 50;
            for i in 0..b {
                let v = r(state, a + 1 + i as u8);
                let table = state.gc.allocator.tables.get_mut(t.0).expect("dangling table id");
                table.raw_seti((start + i as usize + 1) as i64, v);
                if let Some(gr) = v.as_gc_ref() {
                    state.gc.barrier_forward(crate::value::GcRef::Table(t), gr);
                }
            }
        }
        OpCode::Self_ => {
            let (_, a, b, c) = instr.decode_abc();
            let obj = r(state, b as u8);
            let key = rk(state, c);
            let method = table_ops::index(state, obj, key)?;
            state.set_reg(base, a + 1, obj);
            state.set_reg(base, a, method);
        }
        OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
            let (op, a, b, c) = instr.decode_abc();
            let x = rk(state, b);
            let y = rk(state, c);
            let v = arithmetic::binary_arith(state, op, x, y)?;
            state.set_reg(base, a, v);
        }
        OpCode::Unm => {
            let (_, a, b, _) = instr.decode_abc();
            let x = r(state, b as u8);
            let v = arithmetic::unary_minus(state, x)?;
            state.set_reg(base, a, v);
        }
        OpCode::Not => {
            let (_, a, b, _) = instr.decode_abc();
            let x = r(state, b as u8);
            state.set_reg(base, a, Value::Boolean(!x.is_truthy()));
        }
        OpCode::Len => {
            let (_, a, b, _) = instr.decode_abc();
            let x = r(state, b as u8);
            let v = arithmetic::length(state, x)?;
            state.set_reg(base, a, v);
        }
        OpCode::Concat => {
            let (_, a, b, c) = instr.decode_abc();
            let values: Vec<Value> = (b..=(c as u8)).map(|i| r(state, i)).collect();
            let v = arithmetic::concat(state, &values)?;
            state.set_reg(base, a, v);
        }
        OpCode::Jmp => {
            let (_, _, sbx) = instr.decode_asbx();
            bump_pc(state, sbx);
        }
        OpCode::Eq | OpCode::Lt | OpCode::Le => {
            let (op, a, b, c) = instr.decode_abc();
            let x = rk(state, b);
            let y = rk(state, c);
            let result = match op {
                OpCode::Eq => arithmetic::equals(state, x, y)?,
                OpCode::Lt => arithmetic::less_than(state, x, y)?,
                OpCode::Le => arithmetic::less_equal(state, x, y)?,
                _ => unreachable!(),
            };
            if result != (a != 0) {
                bump_pc(state, 1);
            }
        }
        OpCode::Test => {
            let (_, a, _b, c) = instr.decode_abc();
            let v = r(state, a);
            if v.is_truthy() != (c != 0) {
                bump_pc(state, 1);
            }
        }
        OpCode::TestSet => {
            let (_, a, b, c) = instr.decode_abc();
            let v = r(state, b as u8);
            if v.is_truthy() == (c != 0) {
                state.set_reg(base, a, v);
            } else {
                bump_pc(state, 1);
            }
        }
        OpCode::Call => {
            let (_, a, b, c) = instr.decode_abc();
            let func_abs = base + a as usize;
            let nargs = if b == 0 { state.thread().top - func_abs - 1 } else { (b - 1) as usize };
            let expected = if c == 0 { -1 } else { (c - 1) as i32 };
            call::do_call(state, func_abs, nargs, expected)?;
        }
        OpCode::TailCall => {
            let (_, a, b, _) = instr.decode_abc();
            let func_abs = base + a as usize;
            let nargs = if b == 0 { state.thread().top - func_abs - 1 } else { (b - 1) as usize };
            call::do_tailcall(state, func_abs, nargs)?;
        }
        OpCode::Return => {
            let (_, a, b, _) = instr.decode_abc();
            let start = base + a as usize;
            let count = if b == 0 { -1 } else { (b - 1) as i32 };
            call::do_return(state, start, count)?;
        }
        OpCode::ForPrep => {
            let (_, a, sbx) = instr.decode_asbx();
            let init = arithmetic::as_for_number(state, r(state, a), "initial value")?;
            let limit = arithmetic::as_for_number(state, r(state, a + 1), "limit")?;
            let step = arithmetic::as_for_number(state, r(state, a + 2), "step")?;
            // FORLOOP unconditionally adds `step` before its first test, so
            // the stored index is pre-biased back by one step here.
            state.set_reg(base, a, Value::Number(init - step));
            state.set_reg(base, a + 1, Value::Number(limit));
            state.set_reg(base, a + 2, Value::Number(step));
            bump_pc(state, sbx);
        }
        OpCode::ForLoop => {
            let (_, a, sbx) = instr.decode_asbx();
            let index = r(state, a).as_number().expect("FORLOOP index register corrupted");
            let limit = r(state, a + 1).as_number().expect("FORLOOP limit register corrupted");
            let step = r(state, a + 2).as_number().expect("FORLOOP step register corrupted");
            let next = index + step;
            let continue_loop = if step > 0.0 { next <= limit } else { next >= limit };
            if continue_loop {
                state.set_reg(base, a, Value::Number(next));
                state.set_reg(base, a + 3, Value::Number(next));
                bump_pc(state, sbx);
            }
        }
        OpCode::TForLoop => {
            let (_, a, _b, c) = instr.decode_abc();
            let f = r(state, a);
            let s = r(state, a + 1);
            let ctrl = r(state, a + 2);
            let results = call::call_values(state, f, &[s, ctrl], c as i32)?;
            let first = results.first().copied().unwrap_or(Value::Nil);
            for i in 0..c {
                let v = results.get(i as usize).copied().unwrap_or(Value::Nil);
                state.set_reg(base, a + 3 + i as u8, v);
            }
            if first.is_nil() {
                bump_pc(state, 1);
            } else {
                state.set_reg(base, a + 2, first);
            }
        }
        OpCode::Closure => {
            let (_, a, bx) = instr.decode_abx();
            let child = proto.children[bx as usize].clone();
            let frame = state.thread().call_infos.last().unwrap().clone();
            let v = closure_ops::make_closure(state, &frame, child)?;
            state.set_reg(base, a, v);
        }
        OpCode::Close => {
            let (_, a, _, _) = instr.decode_abc();
            closure_ops::close_upvalues_from(state, base + a as usize);
        }
        OpCode::Vararg => {
            let (_, a, b, _) = instr.decode_abc();
            let frame = state.thread().call_infos.last().unwrap();
            let varargs = frame.varargs.clone();
            if b == 0 {
                let needed = base + a as usize + varargs.len();
                state.thread_mut().ensure_stack(needed).map_err(|e| state.runtime_error(e, e.to_string()))?;
                for (i, v) in varargs.iter().enumerate() {
                    state.set_reg(base, a + i as u8, *v);
                }
                state.thread_mut().top = base + a as usize + varargs.len();
            } else {
                let want = (b - 1) as usize;
                for i in 0..want {
                    let v = varargs.get(i).copied().unwrap_or(Value::Nil);
                    state.set_reg(base, a + i as u8, v);
                }
            }
        }
    }

    state.gc_step();
    Ok(())
}
