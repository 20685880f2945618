pub mod arg_stack;
mod args;
mod env;
mod error;
mod method;
pub mod objects;
pub mod primitives;
pub mod signals;
pub mod special;
mod threading;

use std::{collections::HashMap, fmt, sync::Arc, thread::JoinHandle};

use heap::{Heap, HeapSettings};
use object::Value;
use parking_lot::Mutex;

pub use args::{Args, KeywordRestType};
pub use env::{Env, FrameId};
pub use error::{Error, VmResult};
pub use method::{Method, NativeFn};
pub use threading::ThreadContext;

use special::{SpecialObjects, SymbolTable};

/// Shared runtime state: the heap, the singletons, interned symbols and
/// global variables. Cheap to clone; every clone is the same VM.
#[derive(Clone)]
pub struct Vm(Arc<VmInner>);

struct VmInner {
    heap: Heap,
    special: SpecialObjects,
    symbols: SymbolTable,
    globals: Mutex<HashMap<String, Value>>,
}

impl Vm {
    pub fn new(settings: HeapSettings) -> Self {
        let heap = Heap::new(settings);
        let special = SpecialObjects::bootstrap(&heap);
        Self(Arc::new(VmInner {
            heap,
            special,
            symbols: SymbolTable::default(),
            globals: Mutex::new(HashMap::new()),
        }))
    }

    #[inline(always)]
    pub fn heap(&self) -> &Heap {
        &self.0.heap
    }

    #[inline(always)]
    pub fn special(&self) -> &SpecialObjects {
        &self.0.special
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.0.symbols
    }

    /// Binds a global variable. The value stays rooted until replaced.
    pub fn set_global(&self, name: &str, value: Value) {
        let mut globals = self.0.globals.lock();
        if let Some(old) = globals.insert(name.to_string(), value) {
            self.0.heap.remove_global_root(old);
        }
        self.0.heap.add_global_root(value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.0.globals.lock().get(name).copied()
    }

    /// Attaches the calling thread for the duration of `f`.
    ///
    /// The native stack below this frame is scanned for roots when the heap
    /// is configured to scan native stacks.
    #[inline(never)]
    pub fn with_thread<R>(&self, f: impl FnOnce(&ThreadContext) -> R) -> R {
        let bottom = heap::stack_address!();
        let scan = self.heap().settings().scan_native_stacks;
        let ctx = ThreadContext::attach(self.clone(), scan.then_some(bottom));
        let result = f(&ctx);
        drop(ctx);
        result
    }

    /// Starts an OS thread attached to this VM.
    pub fn spawn<R, F>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce(&ThreadContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let vm = self.clone();
        std::thread::spawn(move || vm.with_thread(f))
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("special", &self.0.special)
            .field("symbols", &self.0.symbols.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Runs `f` in a top-level frame of a fresh VM whose roots are exactly
    /// the argument stack and the global roots.
    pub fn with_test_env(f: impl FnOnce(&Env<'_>)) {
        let vm = Vm::new(HeapSettings {
            scan_native_stacks: false,
            ..HeapSettings::default()
        });
        vm.with_thread(|ctx| {
            let env = ctx.top_env("test");
            f(&env);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::StringObject;

    #[test]
    fn globals_stay_rooted_until_replaced() {
        let vm = Vm::new(HeapSettings {
            scan_native_stacks: false,
            ..HeapSettings::default()
        });
        vm.with_thread(|ctx| {
            let first = ctx.allocate(StringObject::new("first"));
            vm.set_global("$x", Value::Ref(first));
            assert!(ctx.collect());
            assert!(ctx.heap().is_live(first));

            let second = ctx.allocate(StringObject::new("second"));
            vm.set_global("$x", Value::Ref(second));
            assert!(ctx.collect());
            assert!(!ctx.heap().is_live(first));
            assert_eq!(vm.global("$x"), Some(Value::Ref(second)));
            assert_eq!(vm.global("$y"), None);
        });
    }
}
