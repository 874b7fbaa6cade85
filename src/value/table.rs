//! Tables: a dense array part plus a hash part (spec §3 "Table").

use super::{FunctionId, StringId, TableId, ThreadId, UserdataId, Value};
use crate::gc::header::GcHeader;
use ahash::AHashMap;

/// A hashable projection of `Value`, used as the hash-part key. `nil` and
/// `NaN` never reach here (the caller must reject them first — Lua itself
/// raises `"table index is nil"` / `"table index is NaN"`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum TableKey {
    Boolean(bool),
    Number(u64),
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Userdata(UserdataId),
    Thread(ThreadId),
}

impl TableKey {
    fn from_value(v: Value) -> Option<TableKey> {
        match v {
            Value::Nil => None,
            Value::Boolean(b) => Some(TableKey::Boolean(b)),
            Value::Number(n) => {
                if n.is_nan() {
                    None
                } else {
                    // Normalize -0.0 to 0.0 so `t[-0.0]` and `t[0.0]` collide,
                    // matching Lua's raw-equality-by-value semantics.
                    let n = if n == 0.0 { 0.0 } else { n };
                    Some(TableKey::Number(n.to_bits()))
                }
            }
            Value::String(s) => Some(TableKey::String(s)),
            Value::Table(t) => Some(TableKey::Table(t)),
            Value::Function(f) => Some(TableKey::Function(f)),
            Value::Userdata(u) => Some(TableKey::Userdata(u)),
            Value::Thread(t) => Some(TableKey::Thread(t)),
        }
    }

    fn to_value(self) -> Value {
        match self {
            TableKey::Boolean(b) => Value::Boolean(b),
            TableKey::Number(bits) => Value::Number(f64::from_bits(bits)),
            TableKey::String(s) => Value::String(s),
            TableKey::Table(t) => Value::Table(t),
            TableKey::Function(f) => Value::Function(f),
            TableKey::Userdata(u) => Value::Userdata(u),
            TableKey::Thread(t) => Value::Thread(t),
        }
    }

    /// The integer this key represents, if it is an integral float in
    /// 1-based array range.
    fn as_array_index(self) -> Option<i64> {
        if let TableKey::Number(bits) = self {
            let n = f64::from_bits(bits);
            if n.fract() == 0.0 && n >= 1.0 && n <= i64::MAX as f64 {
                return Some(n as i64);
            }
        }
        None
    }
}

pub struct LuaTable {
    pub header: GcHeader,
    /// 1-based dense integer keys; `array[i]` holds the value for key `i+1`.
    array: Vec<Value>,
    hash: AHashMap<TableKey, Value>,
    pub metatable: Option<TableId>,
}

impl LuaTable {
    pub fn new(array_hint: usize, hash_hint: usize, header: GcHeader) -> Self {
        LuaTable {
            header,
            array: Vec::with_capacity(array_hint),
            hash: AHashMap::with_capacity(hash_hint),
            metatable: None,
        }
    }

    #[inline]
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn array_part(&self) -> &[Value] {
        &self.array
    }

    pub fn hash_part(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.hash.iter().map(|(k, v)| (k.to_value(), *v))
    }

    /// Raw get, no metamethods. Returns `None` for an absent key (which
    /// Lua code observes as `nil`, same as an explicit `nil` stored there).
    pub fn raw_get(&self, key: &Value) -> Option<Value> {
        let Some(tk) = TableKey::from_value(*key) else {
            return None;
        };
        if let Some(i) = tk.as_array_index() {
            if (i as usize) <= self.array.len() {
                let v = self.array[i as usize - 1];
                return if v.is_nil() { None } else { Some(v) };
            }
        }
        self.hash.get(&tk).copied()
    }

    pub fn raw_geti(&self, i: i64) -> Option<Value> {
        if i >= 1 && (i as usize) <= self.array.len() {
            let v = self.array[i as usize - 1];
            return if v.is_nil() { None } else { Some(v) };
        }
        self.hash.get(&TableKey::Number((i as f64).to_bits())).copied()
    }

    /// Raw set, no metamethods. Returns `true` if this inserted a *new* key
    /// (the caller uses that to decide whether a GC barrier is needed).
    pub fn raw_set(&mut self, key: &Value, value: Value) -> bool {
        let Some(tk) = TableKey::from_value(*key) else {
            return false;
        };
        if let Some(i) = tk.as_array_index() {
            return self.set_array_index(i, value);
        }
        if value.is_nil() {
            self.hash.remove(&tk);
            false
        } else {
            self.hash.insert(tk, value).is_none()
        }
    }

    pub fn raw_seti(&mut self, i: i64, value: Value) -> bool {
        if i >= 1 {
            return self.set_array_index(i, value);
        }
        let tk = TableKey::Number((i as f64).to_bits());
        if value.is_nil() {
            self.hash.remove(&tk);
            false
        } else {
            self.hash.insert(tk, value).is_none()
        }
    }

    fn set_array_index(&mut self, i: i64, value: Value) -> bool {
        let idx = i as usize;
        if idx <= self.array.len() {
            let was_nil = self.array[idx - 1].is_nil();
            self.array[idx - 1] = value;
            return was_nil && !value.is_nil();
        }
        if idx == self.array.len() + 1 && !value.is_nil() {
            self.array.push(value);
            self.migrate_from_hash();
            return true;
        }
        // Sparse integer key beyond the array's growth edge: hash part.
        let tk = TableKey::Number((i as f64).to_bits());
        if value.is_nil() {
            self.hash.remove(&tk);
            false
        } else {
            self.hash.insert(tk, value).is_none()
        }
    }

    /// After the array part grows, pull any now-contiguous keys out of the
    /// hash part (mirrors Lua's table rehash behavior on append).
    fn migrate_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            let key = TableKey::Number((next as f64).to_bits());
            match self.hash.remove(&key) {
                Some(v) if !v.is_nil() => self.array.push(v),
                Some(_) => break,
                None => break,
            }
        }
    }

    /// `#t`: a border in the array part (spec §3). For a table with holes
    /// this is any `n` where `t[n] ~= nil` and `t[n+1] == nil`; we use the
    /// array part's natural end when it isn't itself a hole, and fall back
    /// to scanning the hash part for a contiguous continuation otherwise.
    pub fn length(&self) -> i64 {
        if !self.array.is_empty() && !self.array[self.array.len() - 1].is_nil() {
            // Array end is non-nil: check whether the hash part continues it.
            let mut n = self.array.len() as i64;
            loop {
                let key = TableKey::Number(((n + 1) as f64).to_bits());
                match self.hash.get(&key) {
                    Some(v) if !v.is_nil() => n += 1,
                    _ => break,
                }
            }
            return n;
        }
        if self.array.is_empty() {
            return 0;
        }
        // Binary search for a border inside the array part.
        let (mut lo, mut hi) = (0usize, self.array.len());
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.array[mid - 1].is_nil() {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo as i64
    }

    pub fn is_weak_key(&self) -> bool {
        self.header.weak_key
    }

    pub fn is_weak_value(&self) -> bool {
        self.header.weak_value
    }
}
