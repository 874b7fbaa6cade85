//! Incremental tri-color mark-and-sweep collector (spec §4.2).
//!
//! Five-state machine: Pause → Propagate → SweepString → Sweep → Finalize
//! → Pause. `current_white` alternates each full cycle so an object still
//! wearing the *other* white at sweep time is provably unreachable.

pub mod allocator;
pub mod header;
pub mod string_interner;

use crate::config::GcParams;
use crate::value::{
    FunctionId, GcRef, TableId, ThreadId, UpvalueId, UpvalueState, UserdataId, Value,
};
use allocator::ObjectAllocator;
use header::{FinalizerState, GcColor, GcHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Pause,
    Propagate,
    SweepString,
    Sweep,
    Finalize,
}

impl GcState {
    /// Must the tri-color invariant hold in this state? False during the
    /// sweep phases and Finalize, where a black→white edge can briefly
    /// exist before the white object is reclaimed (spec §4.2 barriers:
    /// "During Pause/SweepString/Sweep/Finalize the barrier is a no-op").
    pub fn keep_invariant(self) -> bool {
        matches!(self, GcState::Propagate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepKind {
    Table,
    Closure,
    Upvalue,
    Thread,
    Userdata,
}

const SWEEP_KINDS: [SweepKind; 5] = [
    SweepKind::Table,
    SweepKind::Closure,
    SweepKind::Upvalue,
    SweepKind::Thread,
    SweepKind::Userdata,
];

#[derive(Debug, Clone, Copy, Default)]
struct SweepCursor {
    kind_idx: usize,
    obj_idx: u32,
}

pub struct GC {
    pub current_white: GcColor,
    pub state: GcState,
    pub total_bytes: isize,
    pub gc_debt: isize,
    pub threshold: isize,
    pub params: GcParams,
    pub allocator: ObjectAllocator,
    gray: Vec<GcRef>,
    weak_tables: Vec<TableId>,
    sweep_cursor: SweepCursor,
    string_sweep_idx: u32,
    to_be_finalized: Vec<UserdataId>,
    pub gc_emergency: bool,
    cycles_completed: u64,
}

fn other_white(c: GcColor) -> GcColor {
    match c {
        GcColor::White0 => GcColor::White1,
        GcColor::White1 => GcColor::White0,
        GcColor::Black => GcColor::Black,
    }
}

impl GC {
    pub fn new(params: GcParams) -> Self {
        GC {
            current_white: GcColor::White0,
            state: GcState::Pause,
            total_bytes: 0,
            gc_debt: 0,
            threshold: (params.stepsize as isize) * 64,
            params,
            allocator: ObjectAllocator::new(),
            gray: Vec::new(),
            weak_tables: Vec::new(),
            sweep_cursor: SweepCursor::default(),
            string_sweep_idx: 0,
            to_be_finalized: Vec::new(),
            gc_emergency: false,
            cycles_completed: 0,
        }
    }

    pub fn charge(&mut self, bytes: u32) {
        self.total_bytes += bytes as isize;
        self.gc_debt -= bytes as isize;
    }

    /// Called at every allocation site: run one incremental step first if
    /// debt has accumulated (spec §4.1 "first asks the GC whether a step
    /// is due").
    pub fn maybe_step(&mut self, roots: &[Value]) {
        if self.gc_debt <= 0 {
            self.step(roots);
        }
    }

    fn work_quantum(&self) -> u32 {
        ((self.params.stepmul as u64 * self.params.stepsize as u64) / 100).max(1) as u32
    }

    /// Advance the state machine by one quantum of work, or transition to
    /// the next state if the current state's work is exhausted.
    pub fn step(&mut self, roots: &[Value]) {
        let quantum = self.work_quantum();
        match self.state {
            GcState::Pause => self.enter_propagate(roots),
            GcState::Propagate => self.step_propagate(quantum),
            GcState::SweepString => self.step_sweep_string(quantum),
            GcState::Sweep => self.step_sweep(quantum),
            GcState::Finalize => self.step_finalize(quantum),
        }
        self.gc_debt = quantum as isize * 4;
    }

    /// Full stop-the-world collection: run every remaining phase to
    /// completion (spec §4.2 "escalate to a full GC").
    pub fn full_gc(&mut self, roots: &[Value]) {
        if self.state == GcState::Pause {
            self.enter_propagate(roots);
        }
        while self.state != GcState::Pause {
            match self.state {
                GcState::Propagate => self.drain_propagate(),
                GcState::SweepString => self.drain_sweep_string(),
                GcState::Sweep => self.drain_sweep(),
                GcState::Finalize => self.drain_finalize(),
                GcState::Pause => unreachable!(),
            }
        }
    }

    fn enter_propagate(&mut self, roots: &[Value]) {
        tracing::debug!(target: "lua_core::gc", "GC cycle start, total_bytes={}", self.total_bytes);
        self.gray.clear();
        self.weak_tables.clear();
        for r in roots {
            if let Some(gr) = r.as_gc_ref() {
                self.mark(gr);
            }
        }
        self.state = GcState::Propagate;
    }

    // ===== Propagate =====

    fn mark(&mut self, r: GcRef) {
        let h = *self.header(r);
        if h.gray {
            return;
        }
        if h.is_white() || h.fixed {
            let hm = self.header_mut(r);
            hm.gray = true;
            self.gray.push(r);
        }
    }

    fn step_propagate(&mut self, quantum: u32) {
        for _ in 0..quantum {
            let Some(r) = self.gray.pop() else {
                self.finish_propagate();
                return;
            };
            self.scan(r);
        }
    }

    fn drain_propagate(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.scan(r);
        }
        self.finish_propagate();
    }

    fn finish_propagate(&mut self) {
        self.atomic_clear_weak_tables();
        self.state = GcState::SweepString;
        self.string_sweep_idx = 0;
    }

    /// Mark one gray object's children, then recolor it black.
    fn scan(&mut self, r: GcRef) {
        match r {
            GcRef::String(_) => {}
            GcRef::Table(id) => self.scan_table(id),
            GcRef::Function(id) => self.scan_closure(id),
            GcRef::Upvalue(id) => self.scan_upvalue(id),
            GcRef::Thread(id) => self.scan_thread(id),
            GcRef::Userdata(id) => self.scan_userdata(id),
        }
        let h = self.header_mut(r);
        h.gray = false;
        h.color = GcColor::Black;
    }

    fn scan_table(&mut self, id: TableId) {
        let Some(t) = self.allocator.tables.get(id.0) else { return };
        let weak_key = t.is_weak_key();
        let weak_value = t.is_weak_value();
        if weak_key || weak_value {
            self.weak_tables.push(id);
        }
        let mut to_mark: Vec<GcRef> = Vec::new();
        if let Some(mt) = t.metatable {
            to_mark.push(GcRef::Table(mt));
        }
        for v in t.array_part() {
            if !weak_value {
                if let Some(gr) = v.as_gc_ref() {
                    to_mark.push(gr);
                }
            }
        }
        for (k, v) in t.hash_part() {
            if !weak_key {
                if let Some(gr) = k.as_gc_ref() {
                    to_mark.push(gr);
                }
            }
            if !weak_value {
                if let Some(gr) = v.as_gc_ref() {
                    to_mark.push(gr);
                }
            }
        }
        for gr in to_mark {
            self.mark(gr);
        }
    }

    fn scan_closure(&mut self, id: FunctionId) {
        let mut to_mark: Vec<GcRef> = Vec::new();
        if let Some(c) = self.allocator.closures.get(id.0) {
            for uv in &c.upvalues {
                to_mark.push(GcRef::Upvalue(*uv));
            }
            if let Some(proto) = c.proto() {
                for k in &proto.constants {
                    if let Some(gr) = k.as_gc_ref() {
                        to_mark.push(gr);
                    }
                }
            }
        }
        for gr in to_mark {
            self.mark(gr);
        }
    }

    fn scan_upvalue(&mut self, id: UpvalueId) {
        let child = self
            .allocator
            .upvalues
            .get(id.0)
            .and_then(|uv| match uv.state {
                UpvalueState::Closed(v) => v.as_gc_ref(),
                UpvalueState::Open { .. } => None,
            });
        if let Some(gr) = child {
            self.mark(gr);
        }
    }

    fn scan_thread(&mut self, id: ThreadId) {
        let mut to_mark: Vec<GcRef> = Vec::new();
        if let Some(th) = self.allocator.threads.get(id.0) {
            for v in &th.stack[..th.top.min(th.stack.len())] {
                if let Some(gr) = v.as_gc_ref() {
                    to_mark.push(gr);
                }
            }
            for ci in &th.call_infos {
                to_mark.push(GcRef::Function(ci.func));
            }
            for uv in &th.open_upvalues {
                to_mark.push(GcRef::Upvalue(*uv));
            }
        }
        for gr in to_mark {
            self.mark(gr);
        }
    }

    fn scan_userdata(&mut self, id: UserdataId) {
        let mt = self.allocator.userdata.get(id.0).and_then(|u| u.metatable);
        if let Some(mt) = mt {
            self.mark(GcRef::Table(mt));
        }
    }

    /// End-of-Propagate weak-table sweep (spec §4.2 "Weak tables"): clear
    /// slots whose weak key and/or weak value is still white.
    fn atomic_clear_weak_tables(&mut self) {
        let tables = std::mem::take(&mut self.weak_tables);
        for id in tables {
            let white_keys: Vec<Value> = {
                let Some(t) = self.allocator.tables.get(id.0) else { continue };
                let weak_key = t.is_weak_key();
                let weak_value = t.is_weak_value();
                let mut dead = Vec::new();
                for (k, v) in t.hash_part() {
                    let key_dead = weak_key && k.as_gc_ref().is_some_and(|g| self.header(g).is_white());
                    let val_dead = weak_value && v.as_gc_ref().is_some_and(|g| self.header(g).is_white());
                    if key_dead || val_dead {
                        dead.push(k);
                    }
                }
                dead
            };
            if let Some(t) = self.allocator.tables.get_mut(id.0) {
                for k in white_keys {
                    t.raw_set(&k, Value::Nil);
                }
            }
        }
    }

    // ===== SweepString =====

    fn step_sweep_string(&mut self, quantum: u32) {
        let cap = self.allocator.strings.capacity_len() as u32;
        let mut processed = 0;
        while processed < quantum {
            if self.string_sweep_idx >= cap {
                self.state = GcState::Sweep;
                self.sweep_cursor = SweepCursor::default();
                return;
            }
            self.sweep_one_string(self.string_sweep_idx);
            self.string_sweep_idx += 1;
            processed += 1;
        }
    }

    fn drain_sweep_string(&mut self) {
        let cap = self.allocator.strings.capacity_len() as u32;
        while self.string_sweep_idx < cap {
            self.sweep_one_string(self.string_sweep_idx);
            self.string_sweep_idx += 1;
        }
        self.state = GcState::Sweep;
        self.sweep_cursor = SweepCursor::default();
    }

    fn sweep_one_string(&mut self, idx: u32) {
        let other = other_white(self.current_white);
        let Some(s) = self.allocator.strings.get(idx) else { return };
        if s.header.is_dead(other) {
            let hash = s.hash;
            let bytes = s.as_str().to_string();
            self.allocator.interner.remove(hash, &bytes);
            self.allocator.strings.remove(idx);
        } else if !s.header.fixed {
            if let Some(s) = self.allocator.strings.get_mut(idx) {
                s.header.color = self.current_white;
            }
        }
    }

    // ===== Sweep =====

    fn step_sweep(&mut self, quantum: u32) {
        let mut processed = 0;
        while processed < quantum {
            if !self.sweep_advance_one() {
                self.state = GcState::Finalize;
                return;
            }
            processed += 1;
        }
    }

    fn drain_sweep(&mut self) {
        while self.sweep_advance_one() {}
        self.state = GcState::Finalize;
    }

    /// Returns false once every kind has been fully swept.
    fn sweep_advance_one(&mut self) -> bool {
        loop {
            if self.sweep_cursor.kind_idx >= SWEEP_KINDS.len() {
                return false;
            }
            let kind = SWEEP_KINDS[self.sweep_cursor.kind_idx];
            let cap = self.sweep_kind_cap(kind);
            if self.sweep_cursor.obj_idx >= cap {
                self.sweep_cursor.kind_idx += 1;
                self.sweep_cursor.obj_idx = 0;
                continue;
            }
            self.sweep_one(kind, self.sweep_cursor.obj_idx);
            self.sweep_cursor.obj_idx += 1;
            return true;
        }
    }

    fn sweep_kind_cap(&self, kind: SweepKind) -> u32 {
        match kind {
            SweepKind::Table => self.allocator.tables.capacity_len() as u32,
            SweepKind::Closure => self.allocator.closures.capacity_len() as u32,
            SweepKind::Upvalue => self.allocator.upvalues.capacity_len() as u32,
            SweepKind::Thread => self.allocator.threads.capacity_len() as u32,
            SweepKind::Userdata => self.allocator.userdata.capacity_len() as u32,
        }
    }

    fn sweep_one(&mut self, kind: SweepKind, idx: u32) {
        let other = other_white(self.current_white);
        match kind {
            SweepKind::Table => sweep_slot(&mut self.allocator.tables, idx, other, self.current_white, |t| &mut t.header),
            SweepKind::Closure => sweep_slot(&mut self.allocator.closures, idx, other, self.current_white, |c| &mut c.header),
            SweepKind::Upvalue => sweep_slot(&mut self.allocator.upvalues, idx, other, self.current_white, |u| &mut u.header),
            SweepKind::Thread => sweep_slot(&mut self.allocator.threads, idx, other, self.current_white, |t| &mut t.header),
            SweepKind::Userdata => {
                let should_finalize = self
                    .allocator
                    .userdata
                    .get(idx)
                    .map(|u| u.has_finalizer && u.header.is_dead(other) && u.header.finalizer == FinalizerState::None)
                    .unwrap_or(false);
                if should_finalize {
                    // Resurrect: repaint current white and queue instead of freeing.
                    if let Some(u) = self.allocator.userdata.get_mut(idx) {
                        u.header.color = self.current_white;
                        u.header.finalizer = FinalizerState::Pending;
                    }
                    self.to_be_finalized.push(UserdataId(idx));
                } else {
                    sweep_slot(&mut self.allocator.userdata, idx, other, self.current_white, |u| &mut u.header);
                }
            }
        }
    }

    // ===== Finalize =====

    fn step_finalize(&mut self, quantum: u32) {
        // Actual `__gc` invocation happens in the VM layer (it needs the
        // call protocol); the GC side just completes the cycle once the
        // VM has drained `take_pending_finalizers`.
        let _ = quantum;
        if self.to_be_finalized.is_empty() {
            self.complete_cycle();
        }
    }

    fn drain_finalize(&mut self) {
        // Without VM-driven finalizer execution there is nothing further
        // to do here; callers that need finalizers to run before a full
        // GC returns must drain `take_pending_finalizers` themselves first.
        self.complete_cycle();
    }

    fn complete_cycle(&mut self) {
        self.current_white = other_white(self.current_white);
        self.state = GcState::Pause;
        self.cycles_completed += 1;
        self.set_pause();
        tracing::debug!(target: "lua_core::gc", "GC cycle complete, total_bytes={}", self.total_bytes);
    }

    pub fn set_pause(&mut self) {
        self.threshold = (self.total_bytes * self.params.pause as isize / 100).max(self.params.stepsize as isize);
        self.gc_debt = self.threshold - self.total_bytes;
    }

    pub fn take_pending_finalizers(&mut self) -> Vec<UserdataId> {
        std::mem::take(&mut self.to_be_finalized)
    }

    pub fn finalizer_done(&mut self, id: UserdataId) {
        if let Some(u) = self.allocator.userdata.get_mut(id.0) {
            u.header.finalizer = FinalizerState::Done;
        }
    }

    // ===== Write barriers (spec §4.2 "Write barriers") =====

    /// Forward barrier: a parent of stable shape (closure, upvalue,
    /// prototype-owned data) acquired a reference to a white child during
    /// Propagate. Mark the child immediately so the parent can stay black.
    pub fn barrier_forward(&mut self, parent: GcRef, child: GcRef) {
        if !self.state.keep_invariant() {
            return;
        }
        if self.header(parent).is_black() && self.header(child).is_white() {
            self.mark(child);
        }
    }

    /// Backward barrier: tables churn too much to re-mark per-child, so
    /// instead repaint the table back to gray and re-enqueue it.
    pub fn barrier_back(&mut self, parent: TableId) {
        if !self.state.keep_invariant() {
            return;
        }
        let r = GcRef::Table(parent);
        if self.header(r).is_black() {
            let h = self.header_mut(r);
            h.gray = true;
            self.gray.push(r);
        }
    }

    // ===== Header access =====

    pub fn header(&self, r: GcRef) -> &GcHeader {
        match r {
            GcRef::String(id) => &self.allocator.strings.get(id.0).expect("dangling string ref").header,
            GcRef::Table(id) => &self.allocator.tables.get(id.0).expect("dangling table ref").header,
            GcRef::Function(id) => &self.allocator.closures.get(id.0).expect("dangling function ref").header,
            GcRef::Upvalue(id) => &self.allocator.upvalues.get(id.0).expect("dangling upvalue ref").header,
            GcRef::Thread(id) => &self.allocator.threads.get(id.0).expect("dangling thread ref").header,
            GcRef::Userdata(id) => &self.allocator.userdata.get(id.0).expect("dangling userdata ref").header,
        }
    }

    pub fn header_mut(&mut self, r: GcRef) -> &mut GcHeader {
        match r {
            GcRef::String(id) => &mut self.allocator.strings.get_mut(id.0).expect("dangling string ref").header,
            GcRef::Table(id) => &mut self.allocator.tables.get_mut(id.0).expect("dangling table ref").header,
            GcRef::Function(id) => &mut self.allocator.closures.get_mut(id.0).expect("dangling function ref").header,
            GcRef::Upvalue(id) => &mut self.allocator.upvalues.get_mut(id.0).expect("dangling upvalue ref").header,
            GcRef::Thread(id) => &mut self.allocator.threads.get_mut(id.0).expect("dangling thread ref").header,
            GcRef::Userdata(id) => &mut self.allocator.userdata.get_mut(id.0).expect("dangling userdata ref").header,
        }
    }

    pub fn is_white(&self, r: GcRef) -> bool {
        self.header(r).is_white()
    }

    pub fn is_black(&self, r: GcRef) -> bool {
        self.header(r).is_black()
    }
}

fn sweep_slot<T>(
    arena: &mut allocator::Arena<T>,
    idx: u32,
    other_white: GcColor,
    current_white: GcColor,
    header_of: impl Fn(&mut T) -> &mut GcHeader,
) {
    let Some(obj) = arena.get_mut(idx) else { return };
    let h = header_of(obj);
    if h.fixed {
        return;
    }
    if h.is_dead(other_white) {
        arena.remove(idx);
    } else {
        h.color = current_white;
    }
}
