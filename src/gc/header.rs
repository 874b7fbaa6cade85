//! GC object header embedded in every heap object (spec §3 "GC object header").

/// Tri-color marking state. Gray is not stored here: a gray object sits in
/// the collector's gray work-list instead (spec §3: "Gray objects...sit in
/// a per-collector gray work-list rather than being identified by a bit").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcColor {
    White0,
    White1,
    Black,
}

/// Finalizer lifecycle for userdata with a `__gc` metamethod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    None,
    Pending,
    Running,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct GcHeader {
    pub color: GcColor,
    /// True while this object sits in the collector's gray work-list.
    pub gray: bool,
    /// Never collected (main thread, a handful of interned strings).
    pub fixed: bool,
    /// Fixed *and* survives collector reinitialization.
    pub super_fixed: bool,
    /// Tables only: weak-key bit.
    pub weak_key: bool,
    /// Tables only: weak-value bit.
    pub weak_value: bool,
    pub finalizer: FinalizerState,
    /// Accounted size in bytes, charged against `GC::total_bytes`.
    pub size: u32,
}

impl GcHeader {
    pub fn new(current_white: GcColor, size: u32) -> Self {
        GcHeader {
            color: current_white,
            gray: false,
            fixed: false,
            super_fixed: false,
            weak_key: false,
            weak_value: false,
            finalizer: FinalizerState::None,
            size,
        }
    }

    #[inline]
    pub fn is_white(&self) -> bool {
        matches!(self.color, GcColor::White0 | GcColor::White1) && !self.gray
    }

    #[inline]
    pub fn is_black(&self) -> bool {
        matches!(self.color, GcColor::Black) && !self.gray
    }

    #[inline]
    pub fn is_gray(&self) -> bool {
        self.gray
    }

    #[inline]
    pub fn is_dead(&self, other_white: GcColor) -> bool {
        !self.gray && !self.fixed && colors_eq(self.color, other_white)
    }
}

#[inline]
fn colors_eq(a: GcColor, b: GcColor) -> bool {
    matches!(
        (a, b),
        (GcColor::White0, GcColor::White0)
            | (GcColor::White1, GcColor::White1)
            | (GcColor::Black, GcColor::Black)
    )
}
