use std::{any::Any, fmt, marker::PhantomPinned, pin::Pin, ptr::NonNull};

use crate::{CellFlags, CellHeader, Value};

/// Receives every value a cell references directly.
pub trait Visitor {
    fn visit(&mut self, value: Value);
}

impl<F: FnMut(Value)> Visitor for F {
    #[inline]
    fn visit(&mut self, value: Value) {
        self(value)
    }
}

#[doc(hidden)]
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    #[inline(always)]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A heap-allocatable object.
///
/// `visit_children` is the only contract the collector relies on: it must
/// report every [`Value`] the object holds, and it must terminate.
/// Dropping a cell happens during sweep, so `Drop` impls must not
/// dereference other cells.
pub trait Cell: AsAny + 'static {
    fn visit_children(&self, visitor: &mut dyn Visitor);

    fn type_name(&self) -> &'static str;
}

/// Pointer to a [`CellHeader`], either in a heap block or in a
/// [`StackCell`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CellRef(NonNull<CellHeader>);

// SAFETY: cells are only touched by the thread that holds them, or by the
// collector while every mutator is parked.
unsafe impl Send for CellRef {}
// SAFETY: see above.
unsafe impl Sync for CellRef {}

impl CellRef {
    /// # Safety
    ///
    /// `header` must point to an initialized header whose payload outlives
    /// every use of the returned reference.
    #[inline(always)]
    pub const unsafe fn from_header(header: NonNull<CellHeader>) -> Self {
        Self(header)
    }

    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut CellHeader {
        self.0.as_ptr()
    }

    #[inline(always)]
    pub fn header(&self) -> &CellHeader {
        // SAFETY: a CellRef is only constructed for live headers.
        unsafe { self.0.as_ref() }
    }

    #[inline(always)]
    pub fn get(&self) -> &dyn Cell {
        // SAFETY: the payload lives as long as its header.
        unsafe { self.header().object_ptr().as_ref() }
    }

    #[inline]
    pub fn downcast<T: Cell>(&self) -> Option<&T> {
        self.get().as_any().downcast_ref::<T>()
    }

    #[inline]
    pub fn is<T: Cell>(&self) -> bool {
        self.get().as_any().is::<T>()
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.get().type_name()
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn is_marked(self) -> bool {
        self.header().has_flag(CellFlags::MARKED)
    }

    /// Sets the mark bit, returning `true` on the first visit.
    #[inline(always)]
    pub fn mark(self) -> bool {
        self.header().add_flag(CellFlags::MARKED)
    }

    #[inline(always)]
    pub fn unmark(self) {
        self.header().remove_flag(CellFlags::MARKED)
    }

    #[inline(always)]
    pub fn is_synthesized(self) -> bool {
        self.header().has_flag(CellFlags::SYNTHESIZED)
    }

    #[inline(always)]
    pub fn set_synthesized(self) {
        self.header().add_flag(CellFlags::SYNTHESIZED);
    }
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

/// A header-carrying slot that lives on the native stack.
///
/// Used for objects that must look like cells for the duration of a single
/// call without touching the heap. The slot must be pinned before a
/// [`CellRef`] to it can be taken, and no reference may outlive the slot.
#[repr(C)]
pub struct StackCell<T: Cell> {
    header: CellHeader,
    object: T,
    _pin: PhantomPinned,
}

impl<T: Cell> StackCell<T> {
    pub fn new(object: T) -> Self {
        Self {
            header: CellHeader::new(NonNull::<T>::dangling()),
            object,
            _pin: PhantomPinned,
        }
    }

    /// Links the header to the pinned payload and returns a reference to it.
    pub fn cell_ref(self: Pin<&mut Self>) -> CellRef {
        // SAFETY: nothing is moved out of the pinned slot.
        let this = unsafe { self.get_unchecked_mut() };
        let object: NonNull<dyn Cell> = NonNull::from(&mut this.object);
        this.header.set_object_ptr(object);
        // SAFETY: the header now points at a payload pinned next to it.
        unsafe { CellRef::from_header(NonNull::from(&mut this.header)) }
    }

    pub fn object(&self) -> &T {
        &self.object
    }
}
