//! Typed arena indices for every GC-managed object kind.
//!
//! Grounded in the teacher's `src/object_pool.rs` "no pointers — Vec may
//! relocate" design: a heap reference is a small `Copy` index into a
//! per-kind arena, not a raw pointer. Pointer equality becomes index
//! equality (spec §9, "Raw pointers threading the GC graph").

macro_rules! gc_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

gc_id!(StringId);
gc_id!(TableId);
gc_id!(FunctionId);
gc_id!(UpvalueId);
gc_id!(UserdataId);
gc_id!(ThreadId);

/// A type-erased reference to any one GC object, used by the collector's
/// gray work-list and sweep cursor where the concrete kind doesn't matter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcRef {
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Upvalue(UpvalueId),
    Thread(ThreadId),
    Userdata(UserdataId),
}
