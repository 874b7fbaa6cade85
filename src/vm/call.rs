//! Call protocol (spec §4.4.2 "Calls, returns, and tail calls"). Ordinary
//! calls push a frame onto the current thread; tail calls reuse the
//! current frame in place so an unbounded tail-recursive chain runs in
//! O(1) Rust stack depth (spec §4.4.2 "a proper tail call must not grow
//! any stack proportional to call depth"). Only a call into a native
//! function that itself calls back into Lua recurses through Rust —
//! bounded by `MAX_C_CALLS`.

use crate::error::{LuaError, LuaResult};
use crate::value::{CallInfo, ClosureKind, FunctionId, Value, MAX_C_CALLS};
use crate::vm::closure_ops;
use crate::vm::dispatch;
use crate::vm::state::LuaState;

enum Callee {
    Lua(FunctionId),
    Native(FunctionId),
}

fn resolve_callee(state: &LuaState, v: Value) -> Option<Callee> {
    match v {
        Value::Function(fid) => {
            let closure = state.gc.allocator.closures.get(fid.0).expect("dangling closure id");
            match &closure.kind {
                ClosureKind::Lua(_) => Some(Callee::Lua(fid)),
                ClosureKind::Native { .. } => Some(Callee::Native(fid)),
            }
        }
        _ => None,
    }
}

/// Write the `n` values from `results` into the caller's registers at
/// `funcbase.. `, truncating or nil-padding to `frame.expected_results`
/// (spec §4.4.2 "excess results are discarded, missing ones are nil").
fn finish_call(state: &mut LuaState, frame: &CallInfo, results: &[Value]) {
    let funcbase = frame.base - 1;
    let nwant = if frame.expected_results < 0 { results.len() } else { frame.expected_results as usize };
    let needed = funcbase + nwant;
    if state.thread().stack.len() < needed {
        let _ = state.thread_mut().ensure_stack(needed);
    }
    for i in 0..nwant {
        let v = results.get(i).copied().unwrap_or(Value::Nil);
        state.thread_mut().stack[funcbase + i] = v;
    }
    state.thread_mut().top = funcbase + nwant;
}

/// Set up a brand-new frame for a Lua function at `func_abs` with `nargs`
/// fixed arguments already sitting at `func_abs+1..`. Extra arguments
/// beyond the prototype's declared parameters are captured into
/// `CallInfo::varargs`; missing ones are nil-padded (spec §4.3.1 "...").
fn setup_lua_frame(state: &mut LuaState, fid: FunctionId, func_abs: usize, nargs: usize, expected_results: i32) -> LuaResult<()> {
    let proto = {
        let closure = state.gc.allocator.closures.get(fid.0).expect("dangling closure id");
        match &closure.kind {
            ClosureKind::Lua(p) => p.clone(),
            ClosureKind::Native { .. } => unreachable!("setup_lua_frame called with a native closure"),
        }
    };
    let base = func_abs + 1;
    let nparams = proto.num_params as usize;

    let varargs = if proto.is_vararg && nargs > nparams {
        (0..nargs - nparams).map(|i| state.get_reg_abs(base + nparams + i)).collect()
    } else {
        Vec::new()
    };

    let needed = base + (proto.max_stack_size as usize).max(nparams);
    state.thread_mut().ensure_stack(needed).map_err(|e| state.runtime_error(e, e.to_string()))?;
    if nargs < nparams {
        for i in nargs..nparams {
            state.thread_mut().stack[base + i] = Value::Nil;
        }
    }

    let top = base + proto.max_stack_size as usize;
    let mut frame = CallInfo::new(fid, base, top, expected_results);
    frame.varargs = varargs;
    state.thread_mut().call_infos.push(frame);
    state.thread_mut().top = top;
    Ok(())
}

fn call_native(state: &mut LuaState, fid: FunctionId, func_abs: usize, nargs: usize, expected_results: i32) -> LuaResult<()> {
    if state.thread().c_call_depth >= MAX_C_CALLS {
        tracing::debug!(target: "lua_core::vm", depth = state.thread().c_call_depth, "C call depth exceeded");
        return Err(state.runtime_error(LuaError::StackOverflow, "C stack overflow"));
    }
    let native_fn = {
        let closure = state.gc.allocator.closures.get(fid.0).expect("dangling closure id");
        match &closure.kind {
            ClosureKind::Native { func, .. } => *func,
            ClosureKind::Lua(_) => unreachable!("call_native called with a Lua closure"),
        }
    };
    let top = func_abs + 1 + nargs;
    state.thread_mut().ensure_stack(top).map_err(|e| state.runtime_error(e, e.to_string()))?;
    let frame = CallInfo::new(fid, func_abs + 1, top, expected_results);
    state.thread_mut().call_infos.push(frame);
    state.thread_mut().top = top;
    state.thread_mut().c_call_depth += 1;

    let outcome = native_fn(state);

    state.thread_mut().c_call_depth -= 1;
    let nret = match outcome {
        Ok(n) => n,
        Err(e) => {
            state.thread_mut().call_infos.pop();
            return Err(e);
        }
    };
    let frame = state.thread_mut().call_infos.pop().expect("native call frame vanished");
    let results: Vec<Value> = (0..nret).map(|i| state.get_reg_abs(frame.base + i)).collect();
    finish_call(state, &frame, &results);
    Ok(())
}

/// `CALL` (spec §4.4.2): push a frame for `func_abs`, running it to
/// completion before returning if it's native, or leaving it on top of
/// `call_infos` for the dispatch loop to continue into if it's Lua.
pub fn do_call(state: &mut LuaState, func_abs: usize, nargs: usize, expected_results: i32) -> LuaResult<()> {
    let callee_value = state.get_reg_abs(func_abs);
    match resolve_callee(state, callee_value) {
        Some(Callee::Lua(fid)) => setup_lua_frame(state, fid, func_abs, nargs, expected_results),
        Some(Callee::Native(fid)) => call_native(state, fid, func_abs, nargs, expected_results),
        None => Err(state.runtime_error(LuaError::CallNonCallable, format!("attempt to call a {} value", callee_value.type_name()))),
    }
}

/// `TAILCALL` (spec §4.4.2): replace the current Lua frame in place
/// rather than pushing a new one, so tail-recursive chains don't grow
/// `call_infos`.
pub fn do_tailcall(state: &mut LuaState, func_abs: usize, nargs: usize) -> LuaResult<()> {
    let frame = state.thread().call_infos.last().expect("tailcall with no active frame").clone();
    closure_ops::close_upvalues_from(state, frame.base);

    let callee_value = state.get_reg_abs(func_abs);
    match resolve_callee(state, callee_value) {
        Some(Callee::Lua(fid)) => {
            let funcbase = frame.base - 1;
            for i in 0..=nargs {
                let v = state.get_reg_abs(func_abs + i);
                state.thread_mut().stack[funcbase + i] = v;
            }
            state.thread_mut().call_infos.pop();
            setup_lua_frame(state, fid, funcbase, nargs, frame.expected_results)?;
            state.thread_mut().call_infos.last_mut().unwrap().tail_call_count = frame.tail_call_count + 1;
            Ok(())
        }
        Some(Callee::Native(fid)) => {
            state.thread_mut().call_infos.pop();
            call_native(state, fid, func_abs, nargs, frame.expected_results)
        }
        None => Err(state.runtime_error(LuaError::CallNonCallable, format!("attempt to call a {} value", callee_value.type_name()))),
    }
}

/// `RETURN` (spec §4.4.2): gather `count` results (`-1` means "up to the
/// thread's logical top", the multret convention) starting at `start`,
/// pop the current frame, and deliver them to the caller.
pub fn do_return(state: &mut LuaState, start: usize, count: i32) -> LuaResult<()> {
    let frame = state.thread().call_infos.last().expect("return with no active frame").clone();
    let n = if count < 0 { state.thread().top.saturating_sub(start) } else { count as usize };
    let results: Vec<Value> = (0..n).map(|i| state.get_reg_abs(start + i)).collect();
    closure_ops::close_upvalues_from(state, frame.base);
    state.thread_mut().call_infos.pop();
    finish_call(state, &frame, &results);
    Ok(())
}

/// Synchronous call used by metamethods, `pcall`-style natives, and
/// top-level chunk execution: push (or run) the call and block until it
/// completes, recursing into `dispatch::run` for a Lua callee (spec §5
/// "a metamethod invocation is itself subject to the normal call
/// protocol").
pub fn call_values(state: &mut LuaState, callee: Value, args: &[Value], nresults: i32) -> LuaResult<Vec<Value>> {
    let func_abs = state.thread().top;
    let needed = func_abs + 1 + args.len();
    state.thread_mut().ensure_stack(needed).map_err(|e| state.runtime_error(e, e.to_string()))?;
    state.thread_mut().stack[func_abs] = callee;
    for (i, &a) in args.iter().enumerate() {
        state.thread_mut().stack[func_abs + 1 + i] = a;
    }
    state.thread_mut().top = func_abs + 1 + args.len();

    let floor = state.thread().call_infos.len();
    match resolve_callee(state, callee) {
        Some(Callee::Lua(fid)) => {
            setup_lua_frame(state, fid, func_abs, args.len(), nresults)?;
            dispatch::run(state, floor)?;
        }
        Some(Callee::Native(fid)) => {
            call_native(state, fid, func_abs, args.len(), nresults)?;
        }
        None => return Err(state.runtime_error(LuaError::CallNonCallable, format!("attempt to call a {} value", callee.type_name()))),
    }

    let funcbase = func_abs;
    let n = if nresults < 0 { state.thread().top.saturating_sub(funcbase) } else { nresults as usize };
    let results = (0..n).map(|i| state.get_reg_abs(funcbase + i)).collect();
    state.thread_mut().top = func_abs;
    Ok(results)
}

pub fn call_for_value(state: &mut LuaState, callee: Value, args: &[Value]) -> LuaResult<Value> {
    let mut results = call_values(state, callee, args, 1)?;
    Ok(results.pop().unwrap_or(Value::Nil))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcParams;
    use crate::value::ClosureKind;

    fn state() -> LuaState {
        LuaState::new(GcParams::default())
    }

    fn make_native(state: &mut LuaState, f: crate::value::NativeFn) -> Value {
        let white = state.gc.current_white;
        let (id, charge) = state.gc.allocator.create_closure(white, ClosureKind::Native { func: f, name: "test".into() }, Vec::new());
        state.gc.charge(charge);
        Value::Function(id)
    }

    fn identity(state: &mut LuaState) -> LuaResult<usize> {
        let base = state.thread().current_frame().unwrap().base;
        let v = state.get_reg_abs(base);
        state.thread_mut().stack[base] = v;
        Ok(1)
    }

    fn always_errors(state: &mut LuaState) -> LuaResult<usize> {
        Err(state.runtime_error(LuaError::RuntimeError, "boom"))
    }

    #[test]
    fn call_values_round_trips_a_native_function() {
        let mut st = state();
        let f = make_native(&mut st, identity);
        let results = call_values(&mut st, f, &[Value::Number(5.0)], 1).unwrap();
        assert_eq!(results, vec![Value::Number(5.0)]);
    }

    #[test]
    fn call_for_value_unwraps_a_single_result() {
        let mut st = state();
        let f = make_native(&mut st, identity);
        let v = call_for_value(&mut st, f, &[Value::Number(9.0)]).unwrap();
        assert_eq!(v, Value::Number(9.0));
    }

    #[test]
    fn calling_a_non_callable_value_is_an_error() {
        let mut st = state();
        let err = call_values(&mut st, Value::Number(1.0), &[], 1);
        assert!(err.is_err());
    }

    #[test]
    fn a_native_function_error_propagates_to_the_caller() {
        let mut st = state();
        let f = make_native(&mut st, always_errors);
        let err = call_values(&mut st, f, &[], 0);
        assert!(err.is_err());
    }

    #[test]
    fn missing_results_are_nil_padded_to_the_expected_count() {
        let mut st = state();
        let f = make_native(&mut st, identity);
        let results = call_values(&mut st, f, &[Value::Number(3.0)], 2).unwrap();
        assert_eq!(results, vec![Value::Number(3.0), Value::Nil]);
    }
}
