//! Error kinds and the rich error type surfaced at embedding boundaries.
//!
//! Mirrors the split the teacher's `lua_vm::lua_error` uses: a cheap
//! `Copy` tag threaded through `Result` in the hot paths, plus a richer
//! type assembled once an error actually needs to be reported.

use crate::value::Value;
use std::fmt;

/// Stable error-kind vocabulary (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    TypeError,
    ArithError,
    ConcatError,
    IndexNil,
    CallNonCallable,
    StackOverflow,
    AllocationFailure,
    CompileError,
    SyntaxError,
    RuntimeError,
    CoroutineError,
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LuaError::TypeError => "type error",
            LuaError::ArithError => "arithmetic error",
            LuaError::ConcatError => "concat error",
            LuaError::IndexNil => "attempt to index a nil value",
            LuaError::CallNonCallable => "attempt to call a non-callable value",
            LuaError::StackOverflow => "stack overflow",
            LuaError::AllocationFailure => "allocation failure",
            LuaError::CompileError => "compile error",
            LuaError::SyntaxError => "syntax error",
            LuaError::RuntimeError => "runtime error",
            LuaError::CoroutineError => "coroutine error",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for LuaError {}

/// Error payload carried through a protected-call unwind: the kind plus
/// whatever Lua value was raised (usually a string, but `error()` accepts
/// any value).
#[derive(Debug, Clone, Copy)]
pub struct RaisedError {
    pub kind: LuaError,
    pub value: Value,
}

impl RaisedError {
    pub fn new(kind: LuaError, value: Value) -> Self {
        Self { kind, value }
    }
}

pub type LuaResult<T> = Result<T, RaisedError>;

/// Fully-resolved error for callers outside the VM: implements
/// `std::error::Error` + `Display` so it composes with `anyhow`/`?`.
#[derive(Debug, Clone)]
pub struct LuaFullError {
    pub kind: LuaError,
    pub message: String,
    pub traceback: String,
}

impl fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.traceback.is_empty() {
            write!(f, "{}: {}", self.kind, self.message)
        } else {
            write!(f, "{}: {}\n{}", self.kind, self.message, self.traceback)
        }
    }
}

impl std::error::Error for LuaFullError {}

/// A GC-internal invariant violation is a programmer error in the core
/// itself (bug in the collector, not in user code): it aborts rather than
/// propagating through the ordinary Lua error mechanism (spec §4.2, §7).
#[track_caller]
pub fn gc_invariant_violation(msg: &str) -> ! {
    tracing::error!(target: "lua_core::gc", "GC invariant violation: {msg}");
    panic!("GC invariant violation: {msg}");
}
