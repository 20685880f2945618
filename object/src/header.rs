use std::{
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::Cell;

/// Alignment of every cell slot and of every payload behind a header.
pub const CELL_ALIGN: usize = 16;

/// GC / bookkeeping flags stored atomically in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct CellFlags(pub u8);

impl CellFlags {
    pub const NONE: Self = Self(0);
    /// Reached during the current collection cycle.
    pub const MARKED: Self = Self(1 << 0);
    /// Stack-local stand-in created for one call; never owned by the heap.
    pub const SYNTHESIZED: Self = Self(1 << 1);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[inline(always)]
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    #[inline(always)]
    pub const fn without(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }
}

/// The header in front of every cell payload.
///
/// ```text
/// bytes 0‥15:  payload pointer (data + vtable of `dyn Cell`)
/// byte  16:    flags (atomic): Marked, Synthesized
/// bytes 17‥31: padding up to the payload
/// ```
///
/// The payload always starts [`CellHeader::SIZE`] bytes after the header.
#[repr(C, align(16))]
pub struct CellHeader {
    object: NonNull<dyn Cell>,
    flags: AtomicU8,
}

const _: () = assert!(size_of::<CellHeader>() % CELL_ALIGN == 0);

impl CellHeader {
    pub const SIZE: usize = size_of::<CellHeader>();

    #[inline(always)]
    pub fn new(object: NonNull<dyn Cell>) -> Self {
        Self {
            object,
            flags: AtomicU8::new(CellFlags::NONE.0),
        }
    }

    /// Pointer to the payload this header describes.
    #[inline(always)]
    pub fn object_ptr(&self) -> NonNull<dyn Cell> {
        self.object
    }

    #[inline(always)]
    pub(crate) fn set_object_ptr(&mut self, object: NonNull<dyn Cell>) {
        self.object = object;
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> CellFlags {
        CellFlags(self.flags.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: CellFlags) -> bool {
        self.flags().contains(flag)
    }

    /// Sets `flag`, returning `true` if it was previously clear.
    #[inline(always)]
    pub fn add_flag(&self, flag: CellFlags) -> bool {
        let previous = CellFlags(self.flags.fetch_or(flag.0, Ordering::Relaxed));
        !previous.contains(flag)
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: CellFlags) {
        self.flags.fetch_and(!flag.0, Ordering::Relaxed);
    }
}

impl fmt::Debug for CellHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellHeader")
            .field("object", &self.object.as_ptr().cast::<u8>())
            .field("flags", &self.flags())
            .finish()
    }
}
