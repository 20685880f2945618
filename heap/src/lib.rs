mod allocator;
mod barrier;
mod block;
mod heap;
mod stack;

pub use allocator::{Allocator, BlockPtr};
pub use barrier::SenseBarrier;
pub use block::{HEAP_BLOCK_SIZE, HeapBlock, MIN_CELL_SIZE};
pub use heap::*;
pub use stack::scan_native_stack;
