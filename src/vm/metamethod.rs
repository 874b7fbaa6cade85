//! Metamethod name table and lookup (spec §5 "Metatables and
//! metamethods"). Only the event names the spec actually lists are
//! recognized; there is no `__call`, `__tostring`, or weak-table `__mode`
//! handling here since those belong to a standard library this crate
//! doesn't carry (spec Non-goals).

use crate::gc::GC;
use crate::value::{StringId, TableId, Value};
use crate::vm::state::LuaState;

pub struct MetaNames {
    pub add: StringId,
    pub sub: StringId,
    pub mul: StringId,
    pub div: StringId,
    pub modulo: StringId,
    pub pow: StringId,
    pub unm: StringId,
    pub len: StringId,
    pub concat: StringId,
    pub index: StringId,
    pub newindex: StringId,
    pub eq: StringId,
    pub lt: StringId,
    pub le: StringId,
}

impl MetaNames {
    /// Event-name strings live for the interpreter's whole lifetime and
    /// are never reachable from a root, so each is marked `fixed` (spec
    /// §4.2 "some interned strings are never freed") — otherwise the
    /// collector reclaims them as unreachable after one full cycle and
    /// every metamethod lookup starts missing.
    pub fn new(gc: &mut GC) -> Self {
        let white = gc.current_white;
        let mut intern = |s: &str| {
            let (id, charge) = gc.allocator.create_string(white, s);
            gc.charge(charge);
            gc.header_mut(crate::value::GcRef::String(id)).fixed = true;
            id
        };
        MetaNames {
            add: intern("__add"),
            sub: intern("__sub"),
            mul: intern("__mul"),
            div: intern("__div"),
            modulo: intern("__mod"),
            pow: intern("__pow"),
            unm: intern("__unm"),
            len: intern("__len"),
            concat: intern("__concat"),
            index: intern("__index"),
            newindex: intern("__newindex"),
            eq: intern("__eq"),
            lt: intern("__lt"),
            le: intern("__le"),
        }
    }
}

/// The metatable governing `v`, if any. Tables and userdata carry
/// metatables in this crate; every other type is metatable-less.
pub fn metatable_of(state: &LuaState, v: Value) -> Option<TableId> {
    match v {
        Value::Table(t) => state.gc.allocator.tables.get(t.0).and_then(|t| t.metatable),
        Value::Userdata(u) => state.gc.allocator.userdata.get(u.0).and_then(|u| u.metatable),
        _ => None,
    }
}

/// Look up event `name` on `v`'s metatable, raw (no recursive metamethod
/// dispatch on the lookup itself).
pub fn get_metamethod(state: &LuaState, v: Value, name: StringId) -> Option<Value> {
    let mt = metatable_of(state, v)?;
    let table = state.gc.allocator.tables.get(mt.0)?;
    table.raw_get(&Value::String(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcParams;

    fn state() -> LuaState {
        LuaState::new(GcParams::default())
    }

    #[test]
    fn non_table_values_have_no_metatable() {
        let st = state();
        assert_eq!(metatable_of(&st, Value::Number(1.0)), None);
        assert_eq!(metatable_of(&st, Value::Nil), None);
    }

    #[test]
    fn a_table_with_no_metatable_has_no_metamethods() {
        let mut st = state();
        let white = st.gc.current_white;
        let (t, charge) = st.gc.allocator.create_table(white, 0, 0);
        st.gc.charge(charge);
        assert_eq!(get_metamethod(&st, Value::Table(t), st.meta.add), None);
    }

    #[test]
    fn get_metamethod_reads_the_event_straight_off_the_metatable() {
        let mut st = state();
        let white = st.gc.current_white;
        let (t, c1) = st.gc.allocator.create_table(white, 0, 0);
        st.gc.charge(c1);
        let (mt, c2) = st.gc.allocator.create_table(white, 0, 1);
        st.gc.charge(c2);
        let add_name = st.meta.add;
        st.gc.allocator.tables.get_mut(mt.0).unwrap().raw_set(&Value::String(add_name), Value::Number(1.0));
        st.gc.allocator.tables.get_mut(t.0).unwrap().metatable = Some(mt);

        assert_eq!(get_metamethod(&st, Value::Table(t), add_name), Some(Value::Number(1.0)));
    }
}
