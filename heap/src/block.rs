//! Fixed-size slabs of uniform cells.
//!
//! A block is `HEAP_BLOCK_SIZE` bytes aligned to its own size, so the block
//! owning any interior address is found by masking the low bits.
//!
//! ```text
//! [ HeapBlock header | cell 0 | cell 1 | ... | cell N-1 | slack ]
//! ```

use std::{
    alloc::{self, Layout},
    ptr::{self, NonNull},
};

use object::{CELL_ALIGN, CellRef};

pub const HEAP_BLOCK_SIZE: usize = 32 * 1024;
pub const MIN_CELL_SIZE: usize = 32;

const MAX_CELLS_PER_BLOCK: usize = HEAP_BLOCK_SIZE / MIN_CELL_SIZE;
const USED_WORDS: usize = MAX_CELLS_PER_BLOCK / u64::BITS as usize;

#[repr(C)]
#[derive(Debug)]
pub struct HeapBlock {
    cell_size: usize,
    total_count: usize,
    free_count: usize,
    /// First bitmap word that may contain a free cell.
    next_free_word: usize,
    used: [u64; USED_WORDS],
}

impl HeapBlock {
    pub const HEADER_SIZE: usize =
        (size_of::<HeapBlock>() + CELL_ALIGN - 1) & !(CELL_ALIGN - 1);

    #[inline(always)]
    fn layout() -> Layout {
        // SAFETY: the block size is a non-zero power of two.
        unsafe { Layout::from_size_align_unchecked(HEAP_BLOCK_SIZE, HEAP_BLOCK_SIZE) }
    }

    #[inline(always)]
    pub const fn cell_count_for(cell_size: usize) -> usize {
        (HEAP_BLOCK_SIZE - Self::HEADER_SIZE) / cell_size
    }

    /// Obtains a fresh block from the system allocator.
    ///
    /// Running out of memory here is fatal.
    pub fn create(cell_size: usize) -> NonNull<HeapBlock> {
        debug_assert!(cell_size >= MIN_CELL_SIZE);
        debug_assert!(cell_size.is_multiple_of(CELL_ALIGN));

        let layout = Self::layout();
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(block) = NonNull::new(raw.cast::<HeapBlock>()) else {
            log::error!("out of memory allocating a {cell_size}-byte cell block");
            alloc::handle_alloc_error(layout);
        };

        let total_count = Self::cell_count_for(cell_size);
        // SAFETY: freshly allocated, properly aligned for HeapBlock.
        unsafe {
            block.as_ptr().write(HeapBlock {
                cell_size,
                total_count,
                free_count: total_count,
                next_free_word: 0,
                used: [0; USED_WORDS],
            });
        }
        block
    }

    /// Drops every cell still in use and returns the memory to the system.
    ///
    /// # Safety
    ///
    /// `block` must come from [`HeapBlock::create`] and no reference into it
    /// may be used afterwards.
    pub unsafe fn destroy(block: NonNull<HeapBlock>) {
        unsafe {
            let this = &mut *block.as_ptr();
            for index in 0..this.total_count {
                if this.is_used(index) {
                    this.release(index);
                }
            }
            alloc::dealloc(block.as_ptr().cast::<u8>(), Self::layout());
        }
    }

    /// The block an arbitrary address would belong to, if it belongs to any.
    #[inline(always)]
    pub fn containing(addr: usize) -> *const HeapBlock {
        (addr & !(HEAP_BLOCK_SIZE - 1)) as *const HeapBlock
    }

    #[inline(always)]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline(always)]
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    #[inline(always)]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    #[inline(always)]
    pub fn has_free(&self) -> bool {
        self.free_count > 0
    }

    #[inline(always)]
    fn cells_start(&self) -> usize {
        self as *const Self as usize + Self::HEADER_SIZE
    }

    #[inline(always)]
    fn slot(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.total_count);
        let addr = self.cells_start() + index * self.cell_size;
        // SAFETY: slots lie inside the block, which is never null.
        unsafe { NonNull::new_unchecked(addr as *mut u8) }
    }

    #[inline(always)]
    fn cell_at(&self, index: usize) -> CellRef {
        // SAFETY: only called for used slots, which hold initialized headers.
        unsafe { CellRef::from_header(self.slot(index).cast()) }
    }

    #[inline(always)]
    pub fn is_used(&self, index: usize) -> bool {
        self.used[index / 64] & (1 << (index % 64)) != 0
    }

    /// Claims a free slot. The caller must initialize a cell in it.
    pub fn allocate_cell(&mut self) -> Option<NonNull<u8>> {
        let words = self.total_count.div_ceil(64);
        for word_index in self.next_free_word..words {
            let word = self.used[word_index];
            if word == u64::MAX {
                continue;
            }
            let index = word_index * 64 + (!word).trailing_zeros() as usize;
            if index >= self.total_count {
                break;
            }
            self.used[word_index] |= 1 << (index % 64);
            self.free_count -= 1;
            self.next_free_word = word_index;
            return Some(self.slot(index));
        }
        None
    }

    /// Resolves any address inside a used cell to that cell.
    pub fn cell_containing(&self, addr: usize) -> Option<CellRef> {
        let start = self.cells_start();
        if addr < start || addr >= start + self.total_count * self.cell_size {
            return None;
        }
        let index = (addr - start) / self.cell_size;
        self.is_used(index).then(|| self.cell_at(index))
    }

    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (0..self.total_count)
            .filter(|&index| self.is_used(index))
            .map(|index| self.cell_at(index))
    }

    pub fn unmark_all_cells(&self) {
        for cell in self.cells() {
            cell.unmark();
        }
    }

    /// Returns every unmarked cell to the free list, dropping its payload.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for index in 0..self.total_count {
            if self.is_used(index) && !self.cell_at(index).is_marked() {
                // SAFETY: the slot is used and unreachable.
                unsafe { self.release(index) };
                freed += 1;
            }
        }
        freed
    }

    /// # Safety
    ///
    /// `index` must name a used slot nothing will read again.
    unsafe fn release(&mut self, index: usize) {
        let cell = self.cell_at(index);
        // SAFETY: the payload was initialized at allocation.
        unsafe { ptr::drop_in_place(cell.header().object_ptr().as_ptr()) };
        self.used[index / 64] &= !(1 << (index % 64));
        self.free_count += 1;
        self.next_free_word = self.next_free_word.min(index / 64);
    }
}
