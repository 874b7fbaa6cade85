//! Coroutine state (spec §3 "Thread (coroutine)", §4.4.1 "Stack and
//! frames"). A thread owns its value stack, call-info stack, open-upvalue
//! list, and status; the global state owns the main thread and every
//! other thread created by `coroutine.create`.

use super::{FunctionId, UpvalueId, Value};
use crate::gc::header::GcHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ok,
    Suspended,
    Running,
    Normal,
    Error,
}

/// One call frame (spec §4.4.1). `base` is the first register visible to
/// the callee; `R[i]` means `stack[base + i]`.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub func: FunctionId,
    pub base: usize,
    /// Logical top of the callee's visible stack window.
    pub top: usize,
    /// Number of results the caller's `CALL`/top-level invocation expects;
    /// `-1` means "all of them" (multi-return forwarding).
    pub expected_results: i32,
    pub saved_pc: usize,
    /// Accumulated `TAILCALL`s reused into this frame (spec §4.4.2).
    pub tail_call_count: u32,
    /// `pcall`/`xpcall` boundary depth this frame is protected by, if any.
    pub is_protected_boundary: bool,
    /// Extra arguments beyond a vararg function's declared parameters,
    /// captured at call setup so `VARARG` doesn't need a below-base stack
    /// layout (spec §4.3.1 "..." / §4.4.2 varargs).
    pub varargs: Vec<Value>,
}

impl CallInfo {
    pub fn new(func: FunctionId, base: usize, top: usize, expected_results: i32) -> Self {
        CallInfo {
            func,
            base,
            top,
            expected_results,
            saved_pc: 0,
            tail_call_count: 0,
            is_protected_boundary: false,
            varargs: Vec::new(),
        }
    }
}

pub struct LuaThread {
    pub header: GcHeader,
    pub stack: Vec<Value>,
    /// Logical top: the highest occupied stack slot + 1. Slots at or above
    /// this index may hold stale values and are never GC roots.
    pub top: usize,
    pub call_infos: Vec<CallInfo>,
    /// Open upvalues, kept sorted by `stack_index` descending so sharing
    /// an existing open upvalue for a slot is a linear scan from the head.
    pub open_upvalues: Vec<UpvalueId>,
    pub status: ThreadStatus,
    /// Index into `call_infos` of the nearest `pcall`/`xpcall` boundary, if
    /// any currently protects this thread.
    pub error_handler_depth: Option<usize>,
    pub c_call_depth: u32,
    pub is_main: bool,
}

pub const MAX_STACK: usize = 1_000_000;
pub const MAX_C_CALLS: u32 = 200;

impl LuaThread {
    pub fn new(is_main: bool, header: GcHeader) -> Self {
        LuaThread {
            header,
            stack: vec![Value::Nil; 32],
            top: 0,
            call_infos: Vec::with_capacity(8),
            open_upvalues: Vec::new(),
            status: ThreadStatus::Ok,
            error_handler_depth: None,
            c_call_depth: 0,
            is_main,
        }
    }

    /// Grow the stack, doubling capacity up to `MAX_STACK`. Every cached
    /// index (frame bases, open-upvalue slots) stays valid across this
    /// because they're plain `usize` offsets, not raw pointers into the
    /// backing `Vec` (spec §4.4.1: "no operation may cache a raw stack
    /// pointer across a point where ... the stack could grow").
    pub fn ensure_stack(&mut self, needed: usize) -> Result<(), crate::error::LuaError> {
        if needed <= self.stack.len() {
            return Ok(());
        }
        if needed > MAX_STACK {
            return Err(crate::error::LuaError::StackOverflow);
        }
        let mut new_len = self.stack.len().max(32);
        while new_len < needed {
            new_len = (new_len * 2).min(MAX_STACK);
        }
        self.stack.resize(new_len, Value::Nil);
        Ok(())
    }

    pub fn current_frame(&self) -> Option<&CallInfo> {
        self.call_infos.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut CallInfo> {
        self.call_infos.last_mut()
    }
}
