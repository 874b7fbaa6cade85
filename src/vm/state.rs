//! Per-interpreter execution state (spec §4.4.1, §9 "GlobalState"): the
//! handle threaded through every execution-engine module and every
//! native function. Owns the collector, the globals table, and every
//! thread (coroutine) this interpreter has created.
//!
//! There is no process-global mutable state: embedding two interpreters
//! side by side just means constructing two `LuaState`s (spec §9 "pass a
//! state handle explicitly").

use super::metamethod::MetaNames;
use crate::config::GcParams;
use crate::error::{LuaError, RaisedError};
use crate::gc::GC;
use crate::value::{LuaThread, StringId, TableId, ThreadId, Value};

pub struct LuaState {
    pub gc: GC,
    pub globals: TableId,
    pub main_thread: ThreadId,
    pub current_thread: ThreadId,
    pub meta: MetaNames,
}

impl LuaState {
    pub fn new(params: GcParams) -> Self {
        let mut gc = GC::new(params);
        let white = gc.current_white;

        let (globals, c1) = gc.allocator.create_table(white, 0, 32);
        gc.charge(c1);

        let (main_thread, c2) = gc.allocator.create_thread(white, true);
        gc.charge(c2);
        gc.header_mut(crate::value::GcRef::Thread(main_thread)).fixed = true;

        let meta = MetaNames::new(&mut gc);

        LuaState { gc, globals, main_thread, current_thread: main_thread, meta }
    }

    /// Top-level GC roots: the globals table and every thread this state
    /// is currently running on. A suspended coroutine is reachable only
    /// through the value that references it (a thread object stored in a
    /// table, upvalue, etc.) — it is not scanned as a root.
    pub fn roots(&self) -> [Value; 3] {
        [Value::Table(self.globals), Value::Thread(self.main_thread), Value::Thread(self.current_thread)]
    }

    pub fn gc_step(&mut self) {
        let roots = self.roots();
        self.gc.maybe_step(&roots);
    }

    pub fn full_gc(&mut self) {
        let roots = self.roots();
        self.gc.full_gc(&roots);
    }

    pub fn thread(&self) -> &LuaThread {
        self.gc.allocator.threads.get(self.current_thread.0).expect("current thread missing from arena")
    }

    pub fn thread_mut(&mut self) -> &mut LuaThread {
        self.gc.allocator.threads.get_mut(self.current_thread.0).expect("current thread missing from arena")
    }

    #[inline]
    pub fn get_reg(&self, base: usize, i: u8) -> Value {
        self.thread().stack[base + i as usize]
    }

    #[inline]
    pub fn set_reg(&mut self, base: usize, i: u8, v: Value) {
        let idx = base + i as usize;
        self.thread_mut().stack[idx] = v;
    }

    #[inline]
    pub fn get_reg_abs(&self, idx: usize) -> Value {
        self.thread().stack[idx]
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        self.gc_step();
        let white = self.gc.current_white;
        let (id, charge) = self.gc.allocator.create_string(white, s);
        self.gc.charge(charge);
        id
    }

    pub fn intern_value(&mut self, s: &str) -> Value {
        Value::String(self.intern(s))
    }

    /// Build a `RaisedError` carrying `msg` as an interned Lua string, the
    /// shape every runtime error (as opposed to an internal GC invariant
    /// violation, which panics) takes (spec §7).
    pub fn runtime_error(&mut self, kind: LuaError, msg: impl Into<String>) -> RaisedError {
        let v = self.intern_value(&msg.into());
        RaisedError::new(kind, v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_content_twice_yields_the_same_id() {
        let mut state = LuaState::new(GcParams::default());
        let a = state.intern("hello");
        let b = state.intern("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn interning_different_content_yields_different_ids() {
        let mut state = LuaState::new(GcParams::default());
        let a = state.intern("hello");
        let b = state.intern("goodbye");
        assert_ne!(a, b);
    }

    #[test]
    fn roots_include_the_globals_table_and_the_current_thread() {
        let state = LuaState::new(GcParams::default());
        let roots = state.roots();
        assert!(roots.contains(&Value::Table(state.globals)));
        assert!(roots.contains(&Value::Thread(state.current_thread)));
    }

    #[test]
    fn a_fresh_state_starts_with_an_empty_globals_table() {
        let state = LuaState::new(GcParams::default());
        let globals = state.gc.allocator.tables.get(state.globals.0).unwrap();
        assert_eq!(globals.array_len(), 0);
    }
}
