//! Runtime-tunable parameters (spec §6): GC pacing and compiler limits.
//!
//! Kept as plain structs rather than hard-coded constants so tests can
//! exercise pathological pacing/limit combinations without recompiling,
//! mirroring the `PAUSE`/`STEPMUL`/`STEPSIZE` indices in the teacher's
//! `src/gc.rs`.

/// GC pacing knobs. Defaults match the documented Lua 5.1 defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcParams {
    /// Percent: next cycle's byte threshold = `total_bytes * pause / 100`.
    pub pause: u32,
    /// Percent: each step's work quantum = `stepmul * step_size / 100`.
    pub stepmul: u32,
    /// Unit of step work (objects/bytes scanned per quantum).
    pub stepsize: u32,
}

impl Default for GcParams {
    fn default() -> Self {
        GcParams {
            pause: 200,
            stepmul: 200,
            stepsize: 1024,
        }
    }
}

/// Compiler-side limits (spec §4.3.6). Kept overridable for negative tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Max simultaneously-live registers per function (ISA: A is 8 bits).
    pub max_registers: u32,
    /// Max constant-pool entries addressable via the 8-bit RK index.
    pub max_constants: u32,
    /// Max upvalues per function (ISA: upvalue index stored in one byte).
    pub max_upvalues: u32,
    /// Max |sBx| jump offset (18-bit signed field, bias 131071).
    pub max_jump_offset: i32,
    /// Max nested function depth the compiler will recurse into.
    pub max_function_nesting: u32,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            max_registers: 255,
            max_constants: 256,
            max_upvalues: 255,
            max_jump_offset: (1 << 17) - 1,
            max_function_nesting: 200,
        }
    }
}
