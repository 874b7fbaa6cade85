//! Local / upvalue / global resolution (spec §4.3.2).

use super::errors::CompileError;
use super::Compiler;
use crate::value::{UpvalueDesc, Value};

pub enum NameRef {
    Local(u8),
    Upvalue(u8),
    /// Constant-pool index of the interned name, read via `GETGLOBAL`.
    Global(u16),
}

enum FoundAt {
    Local(u8),
    Upvalue(u8),
}

impl Compiler<'_> {
    pub fn resolve_name(&mut self, name: &str, line: u32) -> Result<NameRef, CompileError> {
        let top = self.funcs.len() - 1;
        match self.find_in(top, name, line)? {
            Some(FoundAt::Local(reg)) => Ok(NameRef::Local(reg)),
            Some(FoundAt::Upvalue(uv)) => Ok(NameRef::Upvalue(uv)),
            None => {
                let s = self.intern(name);
                let k = self.funcs[top].add_constant(Value::String(s), line, self.opts.max_constants)?;
                Ok(NameRef::Global(k))
            }
        }
    }

    /// Search function `idx` and, failing that, recursively its
    /// enclosing functions, threading an upvalue descriptor down through
    /// every intervening function when the name is found further out
    /// (spec §4.3.2 "add an upvalue to the current prototype").
    fn find_in(&mut self, idx: usize, name: &str, line: u32) -> Result<Option<FoundAt>, CompileError> {
        if let Some(reg) = self.funcs[idx].resolve_local(name) {
            return Ok(Some(FoundAt::Local(reg)));
        }
        if let Some(uv) = self.funcs[idx].upvalues.iter().position(|u| &*u.name == name) {
            return Ok(Some(FoundAt::Upvalue(uv as u8)));
        }
        if idx == 0 {
            return Ok(None);
        }
        let found_above = self.find_in(idx - 1, name, line)?;
        match found_above {
            Some(FoundAt::Local(reg)) => Ok(Some(FoundAt::Upvalue(self.add_upvalue(idx, name, true, reg, line)?))),
            Some(FoundAt::Upvalue(uv)) => Ok(Some(FoundAt::Upvalue(self.add_upvalue(idx, name, false, uv, line)?))),
            None => Ok(None),
        }
    }

    fn add_upvalue(&mut self, idx: usize, name: &str, is_local: bool, index: u8, line: u32) -> Result<u8, CompileError> {
        let fs = &mut self.funcs[idx];
        if fs.upvalues.len() as u32 >= self.opts.max_upvalues {
            return Err(CompileError::TooManyUpvalues { line });
        }
        fs.upvalues.push(UpvalueDesc { name: name.into(), is_local, index });
        Ok((fs.upvalues.len() - 1) as u8)
    }
}
