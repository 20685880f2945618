//! Mark-sweep collector over size-classed cell allocators.
//!
//! Collection is stop-the-world: the thread that requests a cycle becomes
//! its coordinator, every other registered thread parks at its next
//! safepoint after submitting its roots, and the coordinator runs the whole
//! cycle before releasing them.
//!
//! Roots are conservative. Each thread reports candidate words (its precise
//! roots plus every word of its native stack), and a candidate only counts
//! when some allocator owns the block it points into and the cell it points
//! at is in use.

use std::{
    any::type_name,
    collections::BTreeMap,
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use object::{CELL_ALIGN, Cell, CellHeader, CellRef, Value, Visitor};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    SenseBarrier,
    allocator::Allocator,
    block::{HeapBlock, MIN_CELL_SIZE},
    stack::scan_native_stack,
};

// ── Public API types ──────────────────────────────────────────────────

/// Consumers implement this to report a thread's precise roots.
///
/// Called on the reporting thread itself, at a safepoint.
pub trait RootProvider {
    fn visit_roots(&self, visitor: &mut dyn FnMut(Value));
}

/// Candidate root words submitted by one thread for one cycle.
#[derive(Debug, Default)]
pub struct RootSet {
    pub candidates: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub candidates: usize,
    /// Candidates that resolved to a heap cell.
    pub roots: usize,
    pub marked: usize,
    pub freed: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub cycles: u64,
    pub cells_freed: u64,
    pub last_cycle: CycleStats,
}

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Cell sizes served by one allocator each, strictly ascending.
    pub size_classes: Vec<usize>,
    /// Blocks added to an allocator the first time it is used.
    pub initial_blocks_per_allocator: usize,
    /// Allocation collects once an allocator's free percentage drops below this.
    pub min_percent_free_triggers_collection: u16,
    /// After collecting, an allocator grows until at least this much is free.
    pub min_percent_free_after_collection: u16,
    pub gc_enabled: bool,
    /// Sweep every cell before the process exits.
    pub collect_all_at_exit: bool,
    /// Treat every word of a thread's native stack as a candidate root.
    pub scan_native_stacks: bool,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            size_classes: vec![32, 48, 64, 96, 128, 192, 256, 512],
            initial_blocks_per_allocator: 4,
            min_percent_free_triggers_collection: 10,
            min_percent_free_after_collection: 20,
            gc_enabled: true,
            collect_all_at_exit: false,
            scan_native_stacks: true,
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.size_classes.is_empty() {
            return Err("at least one size class is required");
        }
        if !self.size_classes.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err("size classes must be strictly ascending");
        }
        for &size in &self.size_classes {
            if size < MIN_CELL_SIZE {
                return Err("size class is smaller than the minimum cell size");
            }
            if !size.is_multiple_of(CELL_ALIGN) {
                return Err("size class must be a multiple of the cell alignment");
            }
            if HeapBlock::cell_count_for(size) < 8 {
                return Err("size class leaves fewer than 8 cells per block");
            }
        }
        if self.min_percent_free_triggers_collection > 100 {
            return Err("trigger percentage must be at most 100");
        }
        if self.min_percent_free_after_collection >= 100 {
            return Err("target free percentage must be below 100");
        }
        if self.min_percent_free_after_collection < self.min_percent_free_triggers_collection {
            return Err("target free percentage must not be below the trigger");
        }
        Ok(())
    }
}

// ── GC status / state ─────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcStatus {
    None = 0,
    Requested = 1,
}

/// Packed `(status, epoch, participants, threads)` word driving the
/// rendezvous.
///
/// `participants` counts the threads of the current or last cycle that have
/// not yet left its final barrier. Registration and coordinator election
/// wait for it to drain, so a fresh cycle never shares a barrier phase with
/// the previous one.
#[derive(Debug)]
pub struct GcState(AtomicU64);

impl GcState {
    const STATUS_MASK: u64 = 0b1;
    const EPOCH_SHIFT: u32 = 1;
    const EPOCH_MASK: u64 = (1u64 << 15) - 1;
    const PARTICIPANTS_SHIFT: u32 = 16;
    const COUNT_MASK: u64 = (1u64 << 24) - 1;
    const THREADS_SHIFT: u32 = 40;

    #[inline(always)]
    fn pack(status: GcStatus, epoch: u32, participants: u32, threads: u32) -> u64 {
        debug_assert!((epoch as u64) <= Self::EPOCH_MASK);
        debug_assert!((participants as u64) <= Self::COUNT_MASK);
        debug_assert!((threads as u64) <= Self::COUNT_MASK);
        (status as u64)
            | ((epoch as u64) << Self::EPOCH_SHIFT)
            | ((participants as u64) << Self::PARTICIPANTS_SHIFT)
            | ((threads as u64) << Self::THREADS_SHIFT)
    }

    #[inline(always)]
    fn unpack(word: u64) -> (GcStatus, u32, u32, u32) {
        let status = if word & Self::STATUS_MASK == 0 {
            GcStatus::None
        } else {
            GcStatus::Requested
        };
        let epoch = ((word >> Self::EPOCH_SHIFT) & Self::EPOCH_MASK) as u32;
        let participants = ((word >> Self::PARTICIPANTS_SHIFT) & Self::COUNT_MASK) as u32;
        let threads = ((word >> Self::THREADS_SHIFT) & Self::COUNT_MASK) as u32;
        (status, epoch, participants, threads)
    }

    pub fn new() -> Self {
        Self(AtomicU64::new(Self::pack(GcStatus::None, 0, 0, 0)))
    }

    /// Returns `(status, epoch, threads, raw word)`.
    #[inline(always)]
    pub fn load(&self, ord: Ordering) -> (GcStatus, u32, u32, u64) {
        let word = self.0.load(ord);
        let (status, epoch, _participants, threads) = Self::unpack(word);
        (status, epoch, threads, word)
    }

    /// Threads that have not yet left the current or last cycle.
    #[inline(always)]
    pub fn participants(&self) -> u32 {
        Self::unpack(self.0.load(Ordering::Acquire)).2
    }

    #[inline(always)]
    pub fn is_requested(&self) -> bool {
        self.load(Ordering::Acquire).0 != GcStatus::None
    }

    /// The participant count of the active cycle, if one is requested.
    #[inline(always)]
    pub fn active_participants(&self) -> Option<u32> {
        match Self::unpack(self.0.load(Ordering::Acquire)) {
            (GcStatus::Requested, _, participants, _) => Some(participants),
            _ => None,
        }
    }

    /// Register a mutator thread. Waits out any active or draining cycle.
    pub fn register_thread(&self) {
        use Ordering::*;
        loop {
            let cur = self.0.load(Acquire);
            let (status, epoch, participants, threads) = Self::unpack(cur);
            if status != GcStatus::None || participants != 0 {
                std::thread::yield_now();
                continue;
            }
            let new_threads = threads
                .checked_add(1)
                .filter(|&n| (n as u64) <= Self::COUNT_MASK)
                .expect("thread count overflow");
            let next = Self::pack(status, epoch, participants, new_threads);
            if self.0.compare_exchange(cur, next, AcqRel, Acquire).is_ok() {
                return;
            }
        }
    }

    /// Deregister a mutator thread. Fails while a cycle is active.
    pub fn try_deregister_thread(&self) -> bool {
        use Ordering::*;
        loop {
            let cur = self.0.load(Acquire);
            let (status, epoch, participants, threads) = Self::unpack(cur);
            if status != GcStatus::None {
                return false;
            }
            let new_threads = threads.checked_sub(1).expect("thread count underflow");
            let next = Self::pack(status, epoch, participants, new_threads);
            if self.0.compare_exchange(cur, next, AcqRel, Acquire).is_ok() {
                return true;
            }
        }
    }

    /// Coordinator election. Returns `(is_coordinator, epoch, participants)`.
    ///
    /// Waits for the previous cycle's participants to drain before starting
    /// a new one.
    pub fn try_start_gc(&self) -> (bool, u32, u32) {
        use Ordering::*;
        loop {
            let cur = self.0.load(Acquire);
            let (status, epoch, participants, threads) = Self::unpack(cur);
            if status != GcStatus::None {
                return (false, epoch, participants);
            }
            if participants != 0 {
                std::thread::yield_now();
                continue;
            }
            let new_epoch = epoch.wrapping_add(1) & (Self::EPOCH_MASK as u32);
            let next = Self::pack(GcStatus::Requested, new_epoch, threads, threads);
            if self.0.compare_exchange(cur, next, AcqRel, Acquire).is_ok() {
                return (true, new_epoch, threads);
            }
        }
    }

    /// End the cycle (coordinator only). Participants still have to depart.
    pub fn finish_gc(&self) {
        use Ordering::*;
        loop {
            let cur = self.0.load(Acquire);
            let (status, epoch, participants, threads) = Self::unpack(cur);
            if status == GcStatus::None {
                return;
            }
            let next = Self::pack(GcStatus::None, epoch, participants, threads);
            if self.0.compare_exchange(cur, next, AcqRel, Acquire).is_ok() {
                return;
            }
        }
    }

    /// Leave the cycle after its final barrier.
    pub fn depart(&self) {
        use Ordering::*;
        loop {
            let cur = self.0.load(Acquire);
            let (status, epoch, participants, threads) = Self::unpack(cur);
            let left = participants.checked_sub(1).expect("participant count underflow");
            let next = Self::pack(status, epoch, left, threads);
            if self.0.compare_exchange(cur, next, AcqRel, Acquire).is_ok() {
                return;
            }
        }
    }
}

impl Default for GcState {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronization state for the stop-the-world rendezvous.
#[derive(Debug, Default)]
pub struct SyncState {
    pub state: GcState,
    pub barrier: SenseBarrier,
    /// Root sets submitted by parked threads.
    pub inputs: Mutex<Vec<RootSet>>,
}

// ── HeapInner ─────────────────────────────────────────────────────────

/// Core shared heap state.
#[derive(Debug)]
pub struct HeapInner {
    settings: HeapSettings,
    /// One allocator per size class, in `settings.size_classes` order.
    allocators: Box<[Mutex<Allocator>]>,
    gc_enabled: AtomicBool,
    collect_all_at_exit: AtomicBool,
    global_roots: Mutex<Vec<Value>>,
    stats: Mutex<GcStats>,
    pub sync: SyncState,
}

/// Writes `object` behind a fresh header at `slot`.
///
/// # Safety
///
/// `slot` must be an unused cell slot of at least
/// `CellHeader::SIZE + size_of::<T>()` bytes, aligned to [`CELL_ALIGN`].
pub(crate) unsafe fn init_cell<T: Cell>(slot: NonNull<u8>, object: T) -> CellRef {
    debug_assert!(align_of::<T>() <= CELL_ALIGN);
    unsafe {
        let payload = slot.as_ptr().add(CellHeader::SIZE).cast::<T>();
        payload.write(object);
        let header = slot.cast::<CellHeader>();
        header
            .as_ptr()
            .write(CellHeader::new(NonNull::new_unchecked(payload)));
        CellRef::from_header(header)
    }
}

impl HeapInner {
    pub fn new(settings: HeapSettings) -> Self {
        if let Err(reason) = settings.validate() {
            panic!("invalid heap settings: {reason}");
        }
        let allocators = settings
            .size_classes
            .iter()
            .map(|&size| Mutex::new(Allocator::new(size)))
            .collect();
        Self {
            gc_enabled: AtomicBool::new(settings.gc_enabled),
            collect_all_at_exit: AtomicBool::new(settings.collect_all_at_exit),
            settings,
            allocators,
            global_roots: Mutex::new(Vec::new()),
            stats: Mutex::new(GcStats::default()),
            sync: SyncState::default(),
        }
    }

    #[inline(always)]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    // ── Switches ──────────────────────────────────────────────────────

    pub fn gc_enable(&self) {
        self.gc_enabled.store(true, Ordering::Relaxed);
    }

    pub fn gc_disable(&self) {
        self.gc_enabled.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_gc_enabled(&self) -> bool {
        self.gc_enabled.load(Ordering::Relaxed)
    }

    pub fn set_collect_all_at_exit(&self, enabled: bool) {
        self.collect_all_at_exit.store(enabled, Ordering::Relaxed);
    }

    pub fn collect_all_at_exit(&self) -> bool {
        self.collect_all_at_exit.load(Ordering::Relaxed)
    }

    // ── Global roots ──────────────────────────────────────────────────

    pub fn add_global_root(&self, value: Value) {
        if value.is_ref() {
            self.global_roots.lock().push(value);
        }
    }

    /// Removes one registration of `value`.
    pub fn remove_global_root(&self, value: Value) -> bool {
        let mut roots = self.global_roots.lock();
        match roots.iter().position(|&root| root == value) {
            Some(index) => {
                roots.swap_remove(index);
                true
            }
            None => false,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn size_class_for(&self, size: usize) -> Option<usize> {
        self.settings.size_classes.iter().position(|&class| class >= size)
    }

    fn size_class_of<T: Cell>(&self) -> usize {
        assert!(
            align_of::<T>() <= CELL_ALIGN,
            "{} is over-aligned for a cell",
            type_name::<T>()
        );
        let size = CellHeader::SIZE + size_of::<T>();
        match self.size_class_for(size) {
            Some(class) => class,
            None => panic!(
                "{} needs {size} bytes, more than the largest size class",
                type_name::<T>()
            ),
        }
    }

    fn lock_all(&self) -> Vec<MutexGuard<'_, Allocator>> {
        self.allocators.iter().map(|allocator| allocator.lock()).collect()
    }

    /// The live heap cell containing `addr`, consulting every allocator.
    pub fn cell_for_address(&self, addr: usize) -> Option<CellRef> {
        self.allocators
            .iter()
            .find_map(|allocator| allocator.lock().cell_containing(addr))
    }

    #[inline]
    pub fn is_live(&self, cell: CellRef) -> bool {
        self.cell_for_address(cell.addr()) == Some(cell)
    }

    /// Resolves candidate words to the heap cells they denote.
    pub fn identify_roots(&self, candidates: &[usize]) -> Vec<CellRef> {
        let guards = self.lock_all();
        let allocators: Vec<&Allocator> = guards.iter().map(|guard| &**guard).collect();
        candidates
            .iter()
            .filter_map(|&word| find_cell(&allocators, word))
            .collect()
    }

    pub fn total_cells(&self) -> usize {
        self.allocators.iter().map(|a| a.lock().total_cells()).sum()
    }

    pub fn free_cells(&self) -> usize {
        self.allocators.iter().map(|a| a.lock().free_cells()).sum()
    }

    pub fn live_cells(&self) -> usize {
        self.total_cells() - self.free_cells()
    }

    /// Number of live cells per object type.
    pub fn live_cells_by_type(&self) -> BTreeMap<&'static str, usize> {
        let mut census = BTreeMap::new();
        for allocator in self.lock_all().iter() {
            for cell in allocator.cells() {
                *census.entry(cell.type_name()).or_insert(0) += 1;
            }
        }
        census
    }

    pub fn stats(&self) -> GcStats {
        *self.stats.lock()
    }

    // ── Allocation ────────────────────────────────────────────────────

    fn allocate_in<T: Cell>(&self, class: usize, object: T) -> CellRef {
        let slot = self.allocators[class].lock().allocate();
        // SAFETY: the slot was just claimed from an allocator sized for T.
        unsafe { init_cell(slot, object) }
    }

    /// Pre-warms an untouched allocator; otherwise reports whether it is
    /// short enough on free cells to collect.
    fn under_pressure(&self, class: usize) -> bool {
        if !self.is_gc_enabled() {
            return false;
        }
        let mut allocator = self.allocators[class].lock();
        if allocator.block_count() == 0 {
            allocator.add_multiple_blocks(self.settings.initial_blocks_per_allocator);
            return false;
        }
        allocator.free_cells_percentage() < self.settings.min_percent_free_triggers_collection
    }

    fn grow_after_collection(&self, class: usize) {
        self.allocators[class]
            .lock()
            .add_blocks_until_percent_free_reached(self.settings.min_percent_free_after_collection);
    }

    // ── Rendezvous ────────────────────────────────────────────────────

    /// Parks the calling thread for the active cycle, if any.
    ///
    /// Every registered thread arrives here once per cycle; the coordinator
    /// runs the cycle between the two barriers.
    pub fn rendezvous(&self, is_coordinator: bool, roots: RootSet) {
        let Some(participants) = self.sync.state.active_participants() else {
            return;
        };
        let participants = participants as usize;

        self.sync.inputs.lock().push(roots);

        // Barrier 1: every thread parked, every root set submitted
        self.sync.barrier.wait(participants);

        if is_coordinator {
            let inputs = mem::take(&mut *self.sync.inputs.lock());
            self.run_cycle(&inputs);
            self.sync.state.finish_gc();
        }

        // Barrier 2: cycle complete
        self.sync.barrier.wait(participants);
        self.sync.state.depart();
    }

    // ── Collection ────────────────────────────────────────────────────

    fn run_cycle(&self, inputs: &[RootSet]) -> CycleStats {
        let start = Instant::now();
        let mut guards = self.lock_all();

        // 1. unmark
        for allocator in guards.iter() {
            allocator.unmark_all_cells_in_all_blocks();
        }

        // 2. identify roots, 3. mark
        let allocators: Vec<&Allocator> = guards.iter().map(|guard| &**guard).collect();
        let mut marker = Marker::new(&allocators);
        let mut candidates = 0;
        for set in inputs {
            candidates += set.candidates.len();
            for &word in &set.candidates {
                marker.mark_candidate(word);
            }
        }
        for &root in self.global_roots.lock().iter() {
            if let Value::Ref(cell) = root {
                marker.mark_candidate(cell.addr());
            }
        }
        marker.drain();
        let (roots, marked) = (marker.roots, marker.marked);
        drop(allocators);

        // 4. sweep
        let freed = guards.iter_mut().map(|allocator| allocator.sweep()).sum();
        drop(guards);

        let cycle = CycleStats {
            candidates,
            roots,
            marked,
            freed,
            duration: start.elapsed(),
        };
        let mut stats = self.stats.lock();
        stats.cycles += 1;
        stats.cells_freed += freed as u64;
        stats.last_cycle = cycle;

        log::debug!(
            "gc cycle {}: {} candidates, {} roots, {} marked, {} freed in {:?}",
            stats.cycles,
            candidates,
            roots,
            marked,
            freed,
            cycle.duration
        );
        cycle
    }

    /// Sweeps every cell regardless of roots.
    ///
    /// # Safety
    ///
    /// No other thread may be running and no [`CellRef`] into this heap may
    /// be used afterwards.
    pub unsafe fn collect_all(&self) -> usize {
        let mut guards = self.lock_all();
        for allocator in guards.iter() {
            allocator.unmark_all_cells_in_all_blocks();
        }
        let freed = guards.iter_mut().map(|allocator| allocator.sweep()).sum();
        log::debug!("final sweep freed {freed} cells");
        freed
    }
}

// SAFETY: all shared state is behind locks or atomics; cells are only
// touched by the collector while every mutator is parked.
unsafe impl Send for HeapInner {}
// SAFETY: see above.
unsafe impl Sync for HeapInner {}

// ── Marking ───────────────────────────────────────────────────────────

fn find_cell(allocators: &[&Allocator], addr: usize) -> Option<CellRef> {
    allocators
        .iter()
        .find_map(|allocator| allocator.cell_containing(addr))
}

struct Marker<'a, 'h> {
    allocators: &'a [&'h Allocator],
    worklist: Vec<CellRef>,
    roots: usize,
    marked: usize,
}

impl<'a, 'h> Marker<'a, 'h> {
    fn new(allocators: &'a [&'h Allocator]) -> Self {
        Self {
            allocators,
            worklist: Vec::new(),
            roots: 0,
            marked: 0,
        }
    }

    fn mark_candidate(&mut self, word: usize) {
        if let Some(cell) = find_cell(self.allocators, word) {
            self.roots += 1;
            self.push(cell);
        }
    }

    #[inline(always)]
    fn push(&mut self, cell: CellRef) {
        if cell.mark() {
            self.marked += 1;
            self.worklist.push(cell);
        }
    }

    fn drain(&mut self) {
        while let Some(cell) = self.worklist.pop() {
            cell.get().visit_children(self);
        }
    }
}

impl Visitor for Marker<'_, '_> {
    fn visit(&mut self, value: Value) {
        let Value::Ref(cell) = value else {
            return;
        };
        // Stack-synthesized cells are not heap cells and are never marked.
        if find_cell(self.allocators, cell.addr()) == Some(cell) {
            self.push(cell);
        }
    }
}

// ── Heap handle ───────────────────────────────────────────────────────

/// Shared handle to a heap.
#[derive(Debug, Clone)]
pub struct Heap(Arc<HeapInner>);

impl Heap {
    #[must_use]
    pub fn new(settings: HeapSettings) -> Self {
        Self(Arc::new(HeapInner::new(settings)))
    }

    /// Registers the calling thread. `stack_bottom` bounds its native stack
    /// scan; `None` limits the thread to precise roots.
    #[must_use]
    pub fn mutator(&self, stack_bottom: Option<usize>) -> Mutator {
        Mutator::new(self.clone(), stack_bottom)
    }
}

impl Deref for Heap {
    type Target = HeapInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ── Mutator (per-thread handle) ───────────────────────────────────────

/// A thread's registration with the heap.
///
/// Bound to the thread that created it; the collector waits for every live
/// mutator at each cycle.
#[derive(Debug)]
pub struct Mutator {
    heap: Heap,
    stack_bottom: Option<usize>,
    _thread: PhantomData<*const ()>,
}

impl Mutator {
    #[must_use]
    pub fn new(heap: Heap, stack_bottom: Option<usize>) -> Self {
        heap.sync.state.register_thread();
        log::trace!("mutator registered on {:?}", std::thread::current().id());
        Self {
            heap,
            stack_bottom,
            _thread: PhantomData,
        }
    }

    #[inline(always)]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Allocates `object` in a cell of the smallest fitting size class.
    ///
    /// May park for, or run, a collection first. Values held by `object`
    /// are roots for that collection.
    pub fn allocate<T: Cell>(&self, object: T, roots: &dyn RootProvider) -> CellRef {
        let class = self.heap.size_class_of::<T>();
        self.safepoint_with(roots, Some(&object));
        if self.heap.under_pressure(class) {
            self.collect_with(roots, Some(&object));
            self.heap.grow_after_collection(class);
        }
        self.heap.allocate_in(class, object)
    }

    /// Parks for an in-flight cycle requested by another thread.
    #[inline]
    pub fn safepoint(&self, roots: &dyn RootProvider) {
        self.safepoint_with(roots, None);
    }

    #[inline(always)]
    fn safepoint_with(&self, roots: &dyn RootProvider, pending: Option<&dyn Cell>) {
        if self.heap.sync.state.is_requested() {
            let root_set = self.gather_roots(roots, pending);
            self.heap.rendezvous(false, root_set);
        }
    }

    /// Runs a full cycle now. Returns `false` when collection is disabled.
    pub fn collect(&self, roots: &dyn RootProvider) -> bool {
        self.collect_with(roots, None)
    }

    #[cold]
    fn collect_with(&self, roots: &dyn RootProvider, pending: Option<&dyn Cell>) -> bool {
        if !self.heap.is_gc_enabled() {
            return false;
        }
        let (is_coordinator, _epoch, _participants) = self.heap.sync.state.try_start_gc();
        let root_set = self.gather_roots(roots, pending);
        self.heap.rendezvous(is_coordinator, root_set);
        true
    }

    #[inline(never)]
    fn gather_roots(&self, roots: &dyn RootProvider, pending: Option<&dyn Cell>) -> RootSet {
        let mut candidates = Vec::new();
        let mut push = |value: Value| {
            if let Value::Ref(cell) = value {
                candidates.push(cell.addr());
            }
        };
        roots.visit_roots(&mut push);
        if let Some(object) = pending {
            object.visit_children(&mut push);
        }
        if self.heap.settings.scan_native_stacks {
            if let Some(bottom) = self.stack_bottom {
                scan_native_stack(bottom, &mut candidates);
            }
        }
        RootSet { candidates }
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        // Still counted as a participant: join any active cycle with no
        // roots until deregistration succeeds.
        while !self.heap.sync.state.try_deregister_thread() {
            self.heap.rendezvous(false, RootSet::default());
        }
        log::trace!("mutator deregistered on {:?}", std::thread::current().id());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// A cell with an id and outgoing edges.
    struct Node {
        id: i64,
        children: RefCell<Vec<Value>>,
    }

    impl Node {
        fn new(id: i64) -> Self {
            Self {
                id,
                children: RefCell::new(Vec::new()),
            }
        }
    }

    impl Cell for Node {
        fn visit_children(&self, visitor: &mut dyn Visitor) {
            for &child in self.children.borrow().iter() {
                visitor.visit(child);
            }
        }

        fn type_name(&self) -> &'static str {
            "Node"
        }
    }

    fn link(from: CellRef, to: CellRef) {
        let node = from.downcast::<Node>().expect("node");
        node.children.borrow_mut().push(Value::Ref(to));
    }

    fn id_of(cell: CellRef) -> i64 {
        cell.downcast::<Node>().expect("node").id
    }

    /// A simple root provider that holds a list of values.
    struct TestRoots {
        roots: Vec<Value>,
    }

    impl TestRoots {
        fn new() -> Self {
            Self { roots: Vec::new() }
        }

        fn push(&mut self, cell: CellRef) {
            self.roots.push(Value::Ref(cell));
        }
    }

    impl RootProvider for TestRoots {
        fn visit_roots(&self, visitor: &mut dyn FnMut(Value)) {
            for &root in &self.roots {
                visitor(root);
            }
        }
    }

    fn create_test_settings() -> HeapSettings {
        HeapSettings {
            initial_blocks_per_allocator: 1,
            scan_native_stacks: false,
            ..HeapSettings::default()
        }
    }

    fn nodes_per_block(heap: &Heap) -> usize {
        let class = heap
            .size_class_for(CellHeader::SIZE + size_of::<Node>())
            .expect("node fits a size class");
        HeapBlock::cell_count_for(heap.settings().size_classes[class])
    }

    fn create_test_env() -> (Heap, Mutator, TestRoots) {
        let heap = Heap::new(create_test_settings());
        let mutator = heap.mutator(None);
        (heap, mutator, TestRoots::new())
    }

    #[test]
    fn test_settings_validation() {
        assert!(HeapSettings::default().validate().is_ok());

        let unsorted = HeapSettings {
            size_classes: vec![64, 32],
            ..HeapSettings::default()
        };
        assert!(unsorted.validate().is_err());

        let misaligned = HeapSettings {
            size_classes: vec![40],
            ..HeapSettings::default()
        };
        assert!(misaligned.validate().is_err());

        let inverted = HeapSettings {
            min_percent_free_triggers_collection: 30,
            min_percent_free_after_collection: 20,
            ..HeapSettings::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_allocation_basic() {
        let (heap, mutator, roots) = create_test_env();
        let a = mutator.allocate(Node::new(1), &roots);
        let b = mutator.allocate(Node::new(2), &roots);

        assert_ne!(a, b);
        assert!(heap.is_live(a));
        assert!(heap.is_live(b));
        assert_eq!(id_of(a), 1);
        assert_eq!(id_of(b), 2);
        assert_eq!(a.addr() % CELL_ALIGN, 0);
        assert_eq!(heap.live_cells(), 2);
        assert_eq!(heap.live_cells_by_type().get("Node"), Some(&2));
    }

    #[test]
    fn test_unreachable_cycle_reclaimed() {
        let (heap, mutator, roots) = create_test_env();
        let a = mutator.allocate(Node::new(1), &roots);
        let b = mutator.allocate(Node::new(2), &roots);
        link(a, b);
        link(b, a);

        assert!(mutator.collect(&roots));

        assert!(!heap.is_live(a), "cycle member a must be reclaimed");
        assert!(!heap.is_live(b), "cycle member b must be reclaimed");
        assert_eq!(heap.stats().last_cycle.freed, 2);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_reachable_closure_survives_exactly() {
        let (heap, mutator, mut roots) = create_test_env();
        let root = mutator.allocate(Node::new(0), &roots);
        roots.push(root);

        let a = mutator.allocate(Node::new(1), &roots);
        let b = mutator.allocate(Node::new(2), &roots);
        let garbage = mutator.allocate(Node::new(3), &roots);
        let only_from_garbage = mutator.allocate(Node::new(4), &roots);
        link(root, a);
        link(a, b);
        link(b, root);
        b.downcast::<Node>().expect("node").children.borrow_mut().push(Value::SmallInt(7));
        link(garbage, only_from_garbage);
        link(garbage, b);

        mutator.collect(&roots);

        for cell in [root, a, b] {
            assert!(heap.is_live(cell), "reachable node {} was reclaimed", id_of(cell));
        }
        assert!(!heap.is_live(garbage));
        assert!(!heap.is_live(only_from_garbage));
        assert_eq!(heap.live_cells(), 3);
        assert_eq!(heap.stats().last_cycle.marked, 3);
        assert_eq!(heap.stats().last_cycle.roots, 1);
    }

    #[test]
    fn test_global_roots() {
        let (heap, mutator, roots) = create_test_env();
        let global = mutator.allocate(Node::new(1), &roots);
        let child = mutator.allocate(Node::new(2), &roots);
        link(global, child);
        heap.add_global_root(Value::Ref(global));

        mutator.collect(&roots);
        assert!(heap.is_live(global));
        assert!(heap.is_live(child));

        assert!(heap.remove_global_root(Value::Ref(global)));
        assert!(!heap.remove_global_root(Value::Ref(global)));
        mutator.collect(&roots);
        assert!(!heap.is_live(global));
        assert!(!heap.is_live(child));
    }

    #[test]
    fn test_identify_roots_is_conservative() {
        let (heap, mutator, roots) = create_test_env();
        let cell = mutator.allocate(Node::new(1), &roots);
        let freed = mutator.allocate(Node::new(2), &roots);
        let mut keep = TestRoots::new();
        keep.push(cell);
        mutator.collect(&keep);

        let local = 0u64;
        let words = [
            cell.addr(),
            cell.addr() + CellHeader::SIZE,
            &local as *const u64 as usize,
            freed.addr(),
            0,
            usize::MAX,
            0x1234_5678,
        ];
        assert_eq!(heap.identify_roots(&words), vec![cell, cell]);
    }

    #[inline(never)]
    fn allocate_held_in_frame(mutator: &Mutator, roots: &TestRoots) -> (CellRef, bool) {
        let held = std::hint::black_box(mutator.allocate(Node::new(42), roots));
        mutator.collect(roots);
        let live = mutator.heap().is_live(held);
        (std::hint::black_box(held), live)
    }

    #[inline(never)]
    fn with_scanned_mutator(heap: &Heap) -> (CellRef, bool) {
        let bottom = crate::stack_address!();
        let mutator = heap.mutator(Some(bottom));
        allocate_held_in_frame(&mutator, &TestRoots::new())
    }

    #[test]
    fn test_native_stack_words_are_roots() {
        let heap = Heap::new(HeapSettings {
            scan_native_stacks: true,
            ..create_test_settings()
        });
        let (_cell, live) = with_scanned_mutator(&heap);
        assert!(live, "a cell held only in a native frame must survive");
        assert_eq!(heap.stats().cycles, 1);
    }

    #[test]
    fn test_pressure_triggers_collection() {
        let (heap, mutator, mut roots) = create_test_env();
        let keep = mutator.allocate(Node::new(-1), &roots);
        roots.push(keep);

        let per_block = nodes_per_block(&heap);
        for id in 0..(per_block * 10) as i64 {
            mutator.allocate(Node::new(id), &roots);
        }

        let stats = heap.stats();
        assert!(stats.cycles > 0, "allocation pressure must trigger a cycle");
        assert!(stats.cells_freed > 0);
        assert!(heap.is_live(keep));
        assert_eq!(id_of(keep), -1);
        assert!(
            heap.total_cells() < per_block * 10,
            "collection should recycle cells instead of growing"
        );
    }

    #[test]
    fn test_pending_object_children_survive_triggered_collection() {
        let (heap, mutator, roots) = create_test_env();
        let per_block = nodes_per_block(&heap);
        let mut last = None;
        for id in 0..(per_block * 3) as i64 {
            let node = Node::new(id);
            if let Some(previous) = last {
                node.children.borrow_mut().push(Value::Ref(previous));
            }
            // Each node only survives through the node allocated after it.
            let cell = mutator.allocate(node, &roots);
            if let Some(previous) = last {
                assert!(heap.is_live(previous));
            }
            last = Some(cell);
        }
        assert!(heap.stats().cycles > 0);
    }

    #[test]
    fn test_disabled_gc_never_collects() {
        let (heap, mutator, roots) = create_test_env();
        heap.gc_disable();
        let per_block = nodes_per_block(&heap);
        let first = mutator.allocate(Node::new(0), &roots);
        for id in 0..(per_block * 3) as i64 {
            mutator.allocate(Node::new(id), &roots);
        }
        assert!(!mutator.collect(&roots));
        assert_eq!(heap.stats().cycles, 0);
        assert!(heap.is_live(first));

        heap.gc_enable();
        assert!(mutator.collect(&roots));
        assert!(!heap.is_live(first));
    }

    #[test]
    fn test_collect_all_sweeps_rooted_cells() {
        let (heap, mutator, mut roots) = create_test_env();
        let rooted = mutator.allocate(Node::new(1), &roots);
        roots.push(rooted);
        heap.add_global_root(Value::Ref(rooted));
        assert_eq!(unsafe { heap.collect_all() }, 1);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_parallel_mutators_rendezvous() {
        const THREADS: usize = 4;
        let heap = Heap::new(create_test_settings());

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let heap = heap.clone();
                std::thread::spawn(move || {
                    let mutator = heap.mutator(None);
                    let mut roots = TestRoots::new();
                    for i in 0..3000i64 {
                        let id = (t as i64) * 100_000 + i;
                        let cell = mutator.allocate(Node::new(id), &roots);
                        if i % 10 == 0 {
                            roots.push(cell);
                        }
                        if i % 1000 == 999 {
                            mutator.collect(&roots);
                        }
                    }
                    for (n, root) in roots.roots.iter().enumerate() {
                        let cell = root.as_cell().expect("rooted cell");
                        assert!(heap.is_live(cell));
                        assert_eq!(id_of(cell), (t as i64) * 100_000 + (n as i64) * 10);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(heap.stats().cycles > 0);
        let (status, _, threads, _) = heap.sync.state.load(Ordering::Acquire);
        assert_eq!(status, GcStatus::None);
        assert_eq!(threads, 0, "every mutator must deregister");
        assert_eq!(heap.sync.state.participants(), 0);
    }

    #[test]
    fn test_gc_state_counts_participants_until_departure() {
        let state = GcState::new();
        for _ in 0..3 {
            state.register_thread();
        }
        assert_eq!(state.active_participants(), None);

        let (is_coordinator, epoch, participants) = state.try_start_gc();
        assert!(is_coordinator);
        assert_eq!((epoch, participants), (1, 3));
        assert_eq!(state.active_participants(), Some(3));
        assert_eq!(state.try_start_gc(), (false, 1, 3));
        assert!(!state.try_deregister_thread());

        state.finish_gc();
        assert_eq!(state.active_participants(), None);
        assert_eq!(state.participants(), 3);
        for left in (0..3).rev() {
            state.depart();
            assert_eq!(state.participants(), left);
        }

        state.register_thread();
        let (status, epoch, threads, _) = state.load(Ordering::Acquire);
        assert_eq!((status, epoch, threads), (GcStatus::None, 1, 4));
        assert_eq!(state.try_start_gc(), (true, 2, 4));
    }

    #[test]
    fn test_registration_while_cycles_finish() {
        use std::sync::atomic::AtomicBool;

        const COLLECTORS: usize = 3;
        let heap = Heap::new(create_test_settings());
        let done = Arc::new(AtomicBool::new(false));

        let churn = {
            let heap = heap.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let roots = TestRoots::new();
                let mut rounds = 0usize;
                loop {
                    let mutator = heap.mutator(None);
                    mutator.allocate(Node::new(-1), &roots);
                    mutator.collect(&roots);
                    drop(mutator);
                    rounds += 1;
                    if done.load(Ordering::Acquire) {
                        return rounds;
                    }
                }
            })
        };

        let collectors: Vec<_> = (0..COLLECTORS)
            .map(|t| {
                let heap = heap.clone();
                std::thread::spawn(move || {
                    let mutator = heap.mutator(None);
                    let mut roots = TestRoots::new();
                    for i in 0..200i64 {
                        let id = (t as i64) * 1_000 + i;
                        let cell = mutator.allocate(Node::new(id), &roots);
                        if i % 4 == 0 {
                            roots.push(cell);
                        }
                        mutator.collect(&roots);
                    }
                    for (n, root) in roots.roots.iter().enumerate() {
                        let cell = root.as_cell().expect("rooted cell");
                        assert!(heap.is_live(cell));
                        assert_eq!(id_of(cell), (t as i64) * 1_000 + (n as i64) * 4);
                    }
                })
            })
            .collect();

        for handle in collectors {
            handle.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(churn.join().unwrap() > 0);

        assert!(heap.stats().cycles >= 200);
        let (status, _, threads, _) = heap.sync.state.load(Ordering::Acquire);
        assert_eq!(status, GcStatus::None);
        assert_eq!(threads, 0);
        assert_eq!(heap.sync.state.participants(), 0);
    }
}
