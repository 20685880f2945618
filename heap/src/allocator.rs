use std::{collections::HashSet, ptr::NonNull};

use object::CellRef;

use crate::block::HeapBlock;

/// Owning pointer to a block, hashed by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPtr(NonNull<HeapBlock>);

impl BlockPtr {
    #[inline(always)]
    pub fn as_ptr(self) -> *mut HeapBlock {
        self.0.as_ptr()
    }

    #[inline(always)]
    fn get(&self) -> &HeapBlock {
        // SAFETY: blocks live until their allocator is dropped.
        unsafe { self.0.as_ref() }
    }

    #[inline(always)]
    fn get_mut(&mut self) -> &mut HeapBlock {
        // SAFETY: the owning allocator is borrowed mutably.
        unsafe { self.0.as_mut() }
    }
}

/// All blocks of one size class.
///
/// Not synchronized; the heap serializes access per size class.
#[derive(Debug)]
pub struct Allocator {
    cell_size: usize,
    free_cells: usize,
    blocks: HashSet<BlockPtr, ahash::RandomState>,
    /// Blocks with at least one free cell; allocation takes from the back.
    free_blocks: Vec<BlockPtr>,
}

// SAFETY: the allocator exclusively owns its blocks.
unsafe impl Send for Allocator {}

#[inline(always)]
fn percent(free: usize, total: usize) -> u16 {
    if total == 0 {
        0
    } else {
        (free * 100 / total) as u16
    }
}

impl Allocator {
    pub fn new(cell_size: usize) -> Self {
        Self {
            cell_size,
            free_cells: 0,
            blocks: HashSet::default(),
            free_blocks: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline(always)]
    pub fn cell_count_per_block(&self) -> usize {
        HeapBlock::cell_count_for(self.cell_size)
    }

    #[inline(always)]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline(always)]
    pub fn total_cells(&self) -> usize {
        self.blocks.len() * self.cell_count_per_block()
    }

    #[inline(always)]
    pub fn free_cells(&self) -> usize {
        self.free_cells
    }

    pub fn free_cells_percentage(&self) -> u16 {
        percent(self.free_cells, self.total_cells())
    }

    /// Hands out an uninitialized slot, growing by one block when full.
    pub fn allocate(&mut self) -> NonNull<u8> {
        let mut block = match self.free_blocks.last() {
            Some(&block) => block,
            None => self.add_heap_block(),
        };
        let Some(slot) = block.get_mut().allocate_cell() else {
            unreachable!("free block list holds a full block");
        };
        self.free_cells -= 1;
        if !block.get().has_free() {
            self.free_blocks.pop();
        }
        slot
    }

    fn add_heap_block(&mut self) -> BlockPtr {
        let block = BlockPtr(HeapBlock::create(self.cell_size));
        self.blocks.insert(block);
        self.add_free_block(block);
        log::trace!(
            "allocator {}: added block {:p} ({} blocks)",
            self.cell_size,
            block.as_ptr(),
            self.blocks.len()
        );
        block
    }

    /// Makes an owned block's free cells available for allocation.
    pub fn add_free_block(&mut self, block: BlockPtr) {
        debug_assert!(self.blocks.contains(&block));
        self.free_cells += block.get().free_count();
        self.free_blocks.push(block);
    }

    #[inline(always)]
    pub fn is_my_block(&self, block: *const HeapBlock) -> bool {
        NonNull::new(block.cast_mut())
            .is_some_and(|block| self.blocks.contains(&BlockPtr(block)))
    }

    /// Resolves a candidate address to a live cell of this size class.
    pub fn cell_containing(&self, addr: usize) -> Option<CellRef> {
        let block = HeapBlock::containing(addr);
        if !self.is_my_block(block) {
            return None;
        }
        // SAFETY: ownership was just confirmed.
        unsafe { (*block).cell_containing(addr) }
    }

    pub fn blocks(&self) -> impl Iterator<Item = &HeapBlock> + '_ {
        self.blocks.iter().map(|block| {
            // SAFETY: blocks live as long as the allocator.
            unsafe { &*block.as_ptr() }
        })
    }

    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        self.blocks().flat_map(HeapBlock::cells)
    }

    pub fn unmark_all_cells_in_all_blocks(&self) {
        for block in self.blocks() {
            block.unmark_all_cells();
        }
    }

    pub fn add_multiple_blocks(&mut self, count: usize) {
        for _ in 0..count {
            self.add_heap_block();
        }
    }

    pub fn add_blocks_until_percent_free_reached(&mut self, percent_free: u16) {
        debug_assert!(percent_free < 100);
        while self.free_cells_percentage() < percent_free {
            self.add_heap_block();
        }
    }

    /// Reclaims unmarked cells and rebuilds the free lists from scratch.
    pub fn sweep(&mut self) -> usize {
        let blocks: Vec<BlockPtr> = self.blocks.iter().copied().collect();
        self.free_blocks.clear();
        self.free_cells = 0;

        let mut freed = 0;
        for mut block in blocks {
            freed += block.get_mut().sweep();
            if block.get().has_free() {
                self.add_free_block(block);
            }
        }
        freed
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        for block in self.blocks.drain() {
            // SAFETY: the allocator is going away with all of its cells.
            unsafe { HeapBlock::destroy(block.0) };
        }
    }
}
