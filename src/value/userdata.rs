//! Opaque host data embeddable in Lua values, with optional `__gc`
//! finalization (spec §4.2 "Finalize").

use super::TableId;
use crate::gc::header::GcHeader;
use std::any::Any;

pub struct LuaUserdata {
    pub header: GcHeader,
    pub data: Box<dyn Any>,
    pub metatable: Option<TableId>,
    /// Whether this userdata's metatable carries `__gc`; decided once at
    /// creation so the collector doesn't need a metatable lookup per sweep.
    pub has_finalizer: bool,
}

impl LuaUserdata {
    pub fn new(data: Box<dyn Any>, has_finalizer: bool, header: GcHeader) -> Self {
        LuaUserdata {
            header,
            data,
            metatable: None,
            has_finalizer,
        }
    }
}
