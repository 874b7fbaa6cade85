//! Closure construction and upvalue lifecycle (spec §4.3.3 "Upvalues").
//! An upvalue starts open (aliasing a stack slot) and is closed exactly
//! once, either when its frame returns or when `CLOSE` runs past it.

use crate::error::LuaResult;
use crate::value::{CallInfo, FunctionId, GcRef, Prototype, UpvalueId, Value};
use crate::vm::state::LuaState;
use std::rc::Rc;

/// Find the existing open upvalue aliasing `stack_index`, or create one.
/// `open_upvalues` is kept sorted descending by `stack_index`, so lookup
/// and insertion are linear scans — simple, and bounded in practice by
/// how many enclosing locals a closure actually captures.
pub fn find_or_create_upvalue(state: &mut LuaState, stack_index: usize) -> UpvalueId {
    let thread_id = state.current_thread;
    let indices: Vec<(UpvalueId, usize)> = {
        let thread = state.thread();
        thread
            .open_upvalues
            .iter()
            .map(|&id| {
                let uv = state.gc.allocator.upvalues.get(id.0).expect("dangling upvalue id");
                (id, uv.stack_index().expect("open_upvalues holds a closed upvalue"))
            })
            .collect()
    };

    if let Some(&(id, _)) = indices.iter().find(|&&(_, idx)| idx == stack_index) {
        return id;
    }

    state.gc_step();
    let white = state.gc.current_white;
    let (id, charge) = state.gc.allocator.create_upvalue_open(white, stack_index);
    state.gc.charge(charge);

    let insert_at = indices.iter().position(|&(_, idx)| idx < stack_index).unwrap_or(indices.len());
    let thread = state.gc.allocator.threads.get_mut(thread_id.0).expect("current thread missing");
    thread.open_upvalues.insert(insert_at, id);
    id
}

/// Close every open upvalue aliasing a stack slot at or above `from`
/// (spec §4.3.3 "closing copies the stack value into the upvalue and
/// severs the alias"), used both by `CLOSE` and when a frame returns.
pub fn close_upvalues_from(state: &mut LuaState, from: usize) {
    let thread_id = state.current_thread;
    let to_close: Vec<UpvalueId> = {
        let thread = state.thread();
        thread
            .open_upvalues
            .iter()
            .copied()
            .filter(|&id| {
                let uv = state.gc.allocator.upvalues.get(id.0).expect("dangling upvalue id");
                uv.stack_index().map(|idx| idx >= from).unwrap_or(false)
            })
            .collect()
    };
    for id in &to_close {
        let value = state.gc.allocator.upvalues.get(id.0).and_then(|uv| uv.stack_index()).map(|idx| state.thread().stack[idx]);
        if let Some(value) = value {
            state.gc.allocator.close_upvalue(*id, value);
            if let Some(r) = value.as_gc_ref() {
                state.gc.barrier_forward(GcRef::Upvalue(*id), r);
            }
        }
    }
    let thread = state.gc.allocator.threads.get_mut(thread_id.0).expect("current thread missing");
    thread.open_upvalues.retain(|id| !to_close.contains(id));
}

/// Build a closure for `CLOSURE child_idx`: each upvalue descriptor
/// either captures a still-open local from the *creating* frame (sharing
/// or creating an open upvalue pointing at `base + index`) or forwards an
/// already-resolved upvalue from the creating closure itself (spec
/// §4.3.3 "nested functions close over their enclosing function's
/// upvalues, not just its locals").
pub fn make_closure(state: &mut LuaState, frame: &CallInfo, child_proto: Rc<Prototype>) -> LuaResult<Value> {
    let parent_closure = frame.func;
    let mut upvalues = Vec::with_capacity(child_proto.upvalue_descs.len());
    for desc in &child_proto.upvalue_descs {
        let uv = if desc.is_local {
            find_or_create_upvalue(state, frame.base + desc.index as usize)
        } else {
            let parent = state.gc.allocator.closures.get(parent_closure.0).expect("dangling closure id");
            parent.upvalues[desc.index as usize]
        };
        upvalues.push(uv);
    }

    state.gc_step();
    let white = state.gc.current_white;
    let (id, charge) = state.gc.allocator.create_closure(white, crate::value::ClosureKind::Lua(child_proto), upvalues.clone());
    state.gc.charge(charge);
    for uv in upvalues {
        state.gc.barrier_forward(GcRef::Function(id), GcRef::Upvalue(uv));
    }
    Ok(Value::Function(id))
}

pub fn closure_upvalue_id(state: &LuaState, closure: FunctionId, index: u8) -> UpvalueId {
    state.gc.allocator.closures.get(closure.0).expect("dangling closure id").upvalues[index as usize]
}

pub fn read_upvalue(state: &LuaState, id: UpvalueId) -> Value {
    let uv = state.gc.allocator.upvalues.get(id.0).expect("dangling upvalue id");
    match &uv.state {
        crate::value::UpvalueState::Open { stack_index } => state.thread().stack[*stack_index],
        crate::value::UpvalueState::Closed(v) => *v,
    }
}

pub fn write_upvalue(state: &mut LuaState, id: UpvalueId, value: Value) {
    let stack_index = {
        let uv = state.gc.allocator.upvalues.get(id.0).expect("dangling upvalue id");
        match &uv.state {
            crate::value::UpvalueState::Open { stack_index } => Some(*stack_index),
            crate::value::UpvalueState::Closed(_) => None,
        }
    };
    match stack_index {
        Some(idx) => {
            let thread = state.thread_mut();
            thread.stack[idx] = value;
        }
        None => {
            let uv = state.gc.allocator.upvalues.get_mut(id.0).expect("dangling upvalue id");
            uv.state = crate::value::UpvalueState::Closed(value);
        }
    }
    if let Some(r) = value.as_gc_ref() {
        state.gc.barrier_forward(GcRef::Upvalue(id), r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcParams;
    use crate::value::UpvalueState;

    fn state() -> LuaState {
        LuaState::new(GcParams::default())
    }

    #[test]
    fn same_slot_returns_the_same_open_upvalue() {
        let mut st = state();
        let a = find_or_create_upvalue(&mut st, 3);
        let b = find_or_create_upvalue(&mut st, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn different_slots_get_different_upvalues() {
        let mut st = state();
        let a = find_or_create_upvalue(&mut st, 1);
        let b = find_or_create_upvalue(&mut st, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn closing_copies_the_stack_value_and_severs_the_alias() {
        let mut st = state();
        st.thread_mut().stack[5] = Value::Number(7.0);
        let id = find_or_create_upvalue(&mut st, 5);
        close_upvalues_from(&mut st, 5);
        assert!(!st.thread().open_upvalues.contains(&id));
        assert_eq!(read_upvalue(&st, id), Value::Number(7.0));
        let uv = st.gc.allocator.upvalues.get(id.0).unwrap();
        assert!(matches!(uv.state, UpvalueState::Closed(_)));
    }

    #[test]
    fn close_from_leaves_slots_below_the_boundary_open() {
        let mut st = state();
        let below = find_or_create_upvalue(&mut st, 2);
        let at_or_above = find_or_create_upvalue(&mut st, 5);
        close_upvalues_from(&mut st, 5);
        assert!(st.thread().open_upvalues.contains(&below));
        assert!(!st.thread().open_upvalues.contains(&at_or_above));
    }

    #[test]
    fn write_upvalue_updates_the_aliased_stack_slot_while_open() {
        let mut st = state();
        let id = find_or_create_upvalue(&mut st, 4);
        write_upvalue(&mut st, id, Value::Number(9.0));
        assert_eq!(st.thread().stack[4], Value::Number(9.0));
        assert_eq!(read_upvalue(&st, id), Value::Number(9.0));
    }

    #[test]
    fn write_upvalue_updates_the_closed_cell_once_closed() {
        let mut st = state();
        let id = find_or_create_upvalue(&mut st, 4);
        close_upvalues_from(&mut st, 4);
        write_upvalue(&mut st, id, Value::Number(11.0));
        assert_eq!(read_upvalue(&st, id), Value::Number(11.0));
    }
}
