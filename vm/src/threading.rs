use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread::{self, JoinHandle},
    time::Duration,
};

use heap::{Heap, Mutator};
use object::{Cell, CellRef, Value};

use crate::{Env, Vm, arg_stack::ThreadRoots, signals};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A thread attached to a [`Vm`]: its heap registration plus the handles
/// every call on it needs.
///
/// Created by [`Vm::with_thread`] and bound to that thread.
#[derive(Debug)]
pub struct ThreadContext {
    vm: Vm,
    mutator: Mutator,
    token: u64,
}

impl ThreadContext {
    pub(crate) fn attach(vm: Vm, stack_bottom: Option<usize>) -> Self {
        let mutator = vm.heap().mutator(stack_bottom);
        let token = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        log::trace!("thread {token} attached");
        Self { vm, mutator, token }
    }

    #[inline(always)]
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    #[inline(always)]
    pub fn heap(&self) -> &Heap {
        self.mutator.heap()
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Environment for a top-level frame running `file`.
    pub fn top_env<'a>(&'a self, file: &'a str) -> Env<'a> {
        Env::top(self, file)
    }

    /// Allocates `object` on the shared heap. This is the thread's main
    /// safepoint.
    pub fn allocate<T: Cell>(&self, object: T) -> CellRef {
        if signals::poll_gc_request() {
            log::debug!("signal requested collection on thread {}", self.token);
            self.collect();
        }
        self.mutator.allocate(object, &ThreadRoots)
    }

    pub fn safepoint(&self) {
        self.mutator.safepoint(&ThreadRoots);
    }

    /// Runs a full collection now. `false` when collection is disabled.
    pub fn collect(&self) -> bool {
        self.mutator.collect(&ThreadRoots)
    }

    pub fn symbol(&self, name: &str) -> CellRef {
        self.vm.symbols().intern(self.heap(), &self.mutator, name)
    }

    pub fn nil(&self) -> Value {
        self.vm.special().nil
    }

    /// Waits for `handle` while still answering collection requests, so a
    /// worker that collects never waits on this thread.
    pub fn join<T>(&self, handle: JoinHandle<T>) -> thread::Result<T> {
        while !handle.is_finished() {
            self.safepoint();
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        handle.join()
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        log::trace!("thread {} detached", self.token);
    }
}
