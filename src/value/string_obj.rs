//! Immutable interned byte strings (spec §3 "String").

use crate::gc::header::GcHeader;
use smol_str::SmolStr;

/// A short string (the common case: identifiers, table keys, small
/// literals) is stored inline via `SmolStr` to avoid a second heap
/// allocation per intern; longer strings fall back to an owned `String`.
/// Either way the bytes plus a precomputed hash live behind one GC object,
/// matching the teacher's short/long string split (`LUA_VSHRSTR`/`VLNGSTR`).
#[derive(Debug, Clone)]
enum Bytes {
    Short(SmolStr),
    Long(Box<str>),
}

impl Bytes {
    fn as_str(&self) -> &str {
        match self {
            Bytes::Short(s) => s.as_str(),
            Bytes::Long(s) => s,
        }
    }
}

pub struct LuaString {
    pub header: GcHeader,
    bytes: Bytes,
    pub hash: u64,
}

/// Strings longer than this go on the heap unconditionally rather than
/// through the inliner; matches Lua's `LUAI_MAXSHORTLEN` boundary in spirit.
const SHORT_STRING_MAX: usize = 40;

impl LuaString {
    pub fn new(s: &str, hash: u64, header: GcHeader) -> Self {
        let bytes = if s.len() <= SHORT_STRING_MAX {
            Bytes::Short(SmolStr::new(s))
        } else {
            Bytes::Long(s.into())
        };
        LuaString { header, bytes, hash }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.bytes.as_str()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.as_str().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FNV-1a, matching the hash the string interner keys on. Kept independent
/// of `ahash`'s (randomized, process-specific) hasher so two interpreter
/// instances agree on the same string's hash.
pub fn hash_bytes(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}
