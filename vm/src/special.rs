use std::collections::HashMap;

use heap::{Heap, Mutator};
use object::{Cell, CellRef, Value, Visitor};
use parking_lot::Mutex;

use crate::{arg_stack::ThreadRoots, objects::SymbolObject};

macro_rules! singleton {
    ($name:ident, $class:literal) => {
        #[derive(Debug)]
        pub struct $name;

        impl Cell for $name {
            fn visit_children(&self, _visitor: &mut dyn Visitor) {}

            fn type_name(&self) -> &'static str {
                $class
            }
        }
    };
}

singleton!(NilObject, "NilClass");
singleton!(TrueObject, "TrueClass");
singleton!(FalseObject, "FalseClass");

/// The nil, true and false singletons. Rooted for the life of the heap.
#[derive(Debug, Clone, Copy)]
pub struct SpecialObjects {
    pub nil: Value,
    pub true_value: Value,
    pub false_value: Value,
}

impl SpecialObjects {
    /// Allocates the singletons on behalf of the calling thread.
    pub fn bootstrap(heap: &Heap) -> Self {
        let mutator = heap.mutator(None);
        let rooted = |cell: CellRef| {
            let value = Value::Ref(cell);
            heap.add_global_root(value);
            value
        };
        let nil = rooted(mutator.allocate(NilObject, &ThreadRoots));
        let true_value = rooted(mutator.allocate(TrueObject, &ThreadRoots));
        let false_value = rooted(mutator.allocate(FalseObject, &ThreadRoots));
        log::trace!("special objects bootstrapped");
        Self {
            nil,
            true_value,
            false_value,
        }
    }

    /// Everything but nil and false is true.
    pub fn truthy(&self, value: Value) -> bool {
        value != self.nil && value != self.false_value
    }
}

/// Interned symbols by name.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Mutex<HashMap<Box<str>, CellRef>>,
}

impl SymbolTable {
    pub fn lookup(&self, name: &str) -> Option<CellRef> {
        self.symbols.lock().get(name).copied()
    }

    /// The symbol named `name`, allocated through `mutator` on first use.
    ///
    /// The table lock is never held across an allocation: the allocation may
    /// park for a collection that needs every other thread at a safepoint.
    pub fn intern(&self, heap: &Heap, mutator: &Mutator, name: &str) -> CellRef {
        if let Some(cell) = self.lookup(name) {
            return cell;
        }
        let fresh = mutator.allocate(SymbolObject::new(name), &ThreadRoots);
        let mut symbols = self.symbols.lock();
        if let Some(&cell) = symbols.get(name) {
            // Lost the race; the fresh cell is garbage.
            return cell;
        }
        heap.add_global_root(Value::Ref(fresh));
        symbols.insert(name.into(), fresh);
        fresh
    }

    pub fn len(&self) -> usize {
        self.symbols.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heap::HeapSettings;

    fn test_heap() -> Heap {
        Heap::new(HeapSettings {
            initial_blocks_per_allocator: 1,
            scan_native_stacks: false,
            ..HeapSettings::default()
        })
    }

    #[test]
    fn singletons_are_distinct_and_survive_collection() {
        let heap = test_heap();
        let special = SpecialObjects::bootstrap(&heap);
        assert_ne!(special.nil, special.true_value);
        assert_ne!(special.true_value, special.false_value);

        let mutator = heap.mutator(None);
        assert!(mutator.collect(&ThreadRoots));
        assert_eq!(heap.live_cells(), 3);
        assert!(!special.truthy(special.nil));
        assert!(!special.truthy(special.false_value));
        assert!(special.truthy(special.true_value));
        assert!(special.truthy(Value::SmallInt(0)));
    }

    #[test]
    fn intern_returns_the_same_cell() {
        let heap = test_heap();
        let table = SymbolTable::default();
        let mutator = heap.mutator(None);

        let a = table.intern(&heap, &mutator, "a");
        assert_eq!(table.intern(&heap, &mutator, "a"), a);
        assert_ne!(table.intern(&heap, &mutator, "b"), a);
        assert_eq!(table.len(), 2);

        assert!(mutator.collect(&ThreadRoots));
        assert!(heap.is_live(a));
        assert_eq!(a.downcast::<SymbolObject>().map(SymbolObject::name), Some("a"));
    }
}
