//! Indexing semantics: `GETTABLE`/`SETTABLE` plus the `__index`/
//! `__newindex` metamethod chains they can trigger (spec §5 "Indexing a
//! table with a missing key, or a non-table value, consults
//! `__index`/`__newindex`").

use crate::error::{LuaError, LuaResult};
use crate::value::Value;
use crate::vm::call;
use crate::vm::state::LuaState;

/// Bound on `__index`/`__newindex` chain length, guarding against a
/// metatable cycle (`mt.__index == mt`) looping forever (spec §5
/// "Implementations must bound metamethod chain length").
pub const MAX_META_CHAIN: u32 = 100;

pub fn index(state: &mut LuaState, obj: Value, key: Value) -> LuaResult<Value> {
    let mut cur = obj;
    for _ in 0..MAX_META_CHAIN {
        if let Value::Table(t) = cur {
            let raw = state.gc.allocator.tables.get(t.0).expect("dangling table id").raw_get(&key);
            if let Some(v) = raw {
                return Ok(v);
            }
            match crate::vm::metamethod::get_metamethod(state, cur, state.meta.index) {
                None => return Ok(Value::Nil),
                Some(Value::Function(f)) => return call::call_for_value(state, Value::Function(f), &[cur, key]),
                Some(next) => {
                    cur = next;
                    continue;
                }
            }
        } else {
            match crate::vm::metamethod::get_metamethod(state, cur, state.meta.index) {
                None => {
                    return Err(state.runtime_error(LuaError::IndexNil, format!("attempt to index a {} value", cur.type_name())));
                }
                Some(Value::Function(f)) => return call::call_for_value(state, Value::Function(f), &[cur, key]),
                Some(next) => {
                    cur = next;
                    continue;
                }
            }
        }
    }
    Err(state.runtime_error(LuaError::RuntimeError, "'__index' chain too long; possible loop"))
}

pub fn newindex(state: &mut LuaState, obj: Value, key: Value, value: Value) -> LuaResult<()> {
    let mut cur = obj;
    for _ in 0..MAX_META_CHAIN {
        if let Value::Table(t) = cur {
            let has_raw = {
                let table = state.gc.allocator.tables.get(t.0).expect("dangling table id");
                table.raw_get(&key).is_some()
            };
            if has_raw {
                return raw_set_checked(state, t, key, value);
            }
            match crate::vm::metamethod::get_metamethod(state, cur, state.meta.newindex) {
                None => return raw_set_checked(state, t, key, value),
                Some(Value::Function(f)) => {
                    call::call_for_value(state, Value::Function(f), &[cur, key, value])?;
                    return Ok(());
                }
                Some(next) => {
                    cur = next;
                    continue;
                }
            }
        } else {
            match crate::vm::metamethod::get_metamethod(state, cur, state.meta.newindex) {
                None => {
                    return Err(state.runtime_error(LuaError::IndexNil, format!("attempt to index a {} value", cur.type_name())));
                }
                Some(Value::Function(f)) => {
                    call::call_for_value(state, Value::Function(f), &[cur, key, value])?;
                    return Ok(());
                }
                Some(next) => {
                    cur = next;
                    continue;
                }
            }
        }
    }
    Err(state.runtime_error(LuaError::RuntimeError, "'__newindex' chain too long; possible loop"))
}

fn raw_set_checked(state: &mut LuaState, t: crate::value::TableId, key: Value, value: Value) -> LuaResult<()> {
    if key.is_nil() {
        return Err(state.runtime_error(LuaError::IndexNil, "table index is nil"));
    }
    if let Value::Number(n) = key {
        if n.is_nan() {
            return Err(state.runtime_error(LuaError::IndexNil, "table index is NaN"));
        }
    }
    let is_weak = {
        let table = state.gc.allocator.tables.get(t.0).expect("dangling table id");
        table.is_weak_key() || table.is_weak_value()
    };
    let table = state.gc.allocator.tables.get_mut(t.0).expect("dangling table id");
    table.raw_set(&key, value);
    if let Some(r) = value.as_gc_ref() {
        state.gc.barrier_forward(crate::value::GcRef::Table(t), r);
    }
    if is_weak {
        state.gc.barrier_back(t);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcParams;
    use crate::value::TableId;

    fn state() -> LuaState {
        LuaState::new(GcParams::default())
    }

    fn new_table(state: &mut LuaState) -> TableId {
        let white = state.gc.current_white;
        let (id, charge) = state.gc.allocator.create_table(white, 0, 4);
        state.gc.charge(charge);
        id
    }

    #[test]
    fn raw_hit_never_consults_index_metamethod() {
        let mut st = state();
        let t = new_table(&mut st);
        let key = st.intern_value("k");
        raw_set_checked(&mut st, t, key, Value::Number(5.0)).unwrap();
        let v = index(&mut st, Value::Table(t), key).unwrap();
        assert_eq!(v, Value::Number(5.0));
    }

    #[test]
    fn missing_key_with_no_metatable_reads_as_nil() {
        let mut st = state();
        let t = new_table(&mut st);
        let key = st.intern_value("missing");
        let v = index(&mut st, Value::Table(t), key).unwrap();
        assert_eq!(v, Value::Nil);
    }

    #[test]
    fn index_follows_a_table_shaped_index_metamethod_chain() {
        let mut st = state();
        let parent = new_table(&mut st);
        let child = new_table(&mut st);
        let key = st.intern_value("k");
        raw_set_checked(&mut st, parent, key, Value::Number(42.0)).unwrap();

        let meta = new_table(&mut st);
        let index_name = st.meta.index;
        raw_set_checked(&mut st, meta, Value::String(index_name), Value::Table(parent)).unwrap();
        st.gc.allocator.tables.get_mut(child.0).unwrap().metatable = Some(meta);

        let v = index(&mut st, Value::Table(child), key).unwrap();
        assert_eq!(v, Value::Number(42.0));
    }

    #[test]
    fn newindex_with_no_metatable_writes_raw() {
        let mut st = state();
        let t = new_table(&mut st);
        let key = st.intern_value("k");
        newindex(&mut st, Value::Table(t), key, Value::Number(9.0)).unwrap();
        let v = st.gc.allocator.tables.get(t.0).unwrap().raw_get(&key);
        assert_eq!(v, Some(Value::Number(9.0)));
    }

    #[test]
    fn existing_raw_key_bypasses_newindex_metamethod() {
        let mut st = state();
        let t = new_table(&mut st);
        let side_table = new_table(&mut st);
        let key = st.intern_value("k");
        raw_set_checked(&mut st, t, key, Value::Number(1.0)).unwrap();

        let meta = new_table(&mut st);
        let newindex_name = st.meta.newindex;
        raw_set_checked(&mut st, meta, Value::String(newindex_name), Value::Table(side_table)).unwrap();
        st.gc.allocator.tables.get_mut(t.0).unwrap().metatable = Some(meta);

        newindex(&mut st, Value::Table(t), key, Value::Number(2.0)).unwrap();
        assert_eq!(st.gc.allocator.tables.get(t.0).unwrap().raw_get(&key), Some(Value::Number(2.0)));
        assert_eq!(st.gc.allocator.tables.get(side_table.0).unwrap().raw_get(&key), None);
    }

    #[test]
    fn newindex_redirects_a_missing_key_through_a_table_shaped_newindex() {
        let mut st = state();
        let t = new_table(&mut st);
        let side_table = new_table(&mut st);
        let key = st.intern_value("k");

        let meta = new_table(&mut st);
        let newindex_name = st.meta.newindex;
        raw_set_checked(&mut st, meta, Value::String(newindex_name), Value::Table(side_table)).unwrap();
        st.gc.allocator.tables.get_mut(t.0).unwrap().metatable = Some(meta);

        newindex(&mut st, Value::Table(t), key, Value::Number(7.0)).unwrap();
        assert_eq!(st.gc.allocator.tables.get(t.0).unwrap().raw_get(&key), None);
        assert_eq!(st.gc.allocator.tables.get(side_table.0).unwrap().raw_get(&key), Some(Value::Number(7.0)));
    }

    #[test]
    fn setting_a_nil_key_is_an_error() {
        let mut st = state();
        let t = new_table(&mut st);
        assert!(raw_set_checked(&mut st, t, Value::Nil, Value::Number(1.0)).is_err());
    }

    #[test]
    fn indexing_a_non_table_with_no_metamethod_is_an_error() {
        let mut st = state();
        let key = st.intern_value("k");
        assert!(index(&mut st, Value::Number(1.0), key).is_err());
    }
}
