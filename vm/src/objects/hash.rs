use std::cell::RefCell;

use object::{Cell, Value, Visitor};

use crate::objects::SymbolObject;

/// An insertion-ordered hash keyed by value identity.
///
/// Keyword arguments travel as one of these, keyed by interned symbols.
#[derive(Debug, Default)]
pub struct HashObject {
    entries: RefCell<Vec<(Value, Value)>>,
}

impl HashObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(Value, Value)>) -> Self {
        let hash = Self::new();
        for (key, value) in entries {
            hash.insert(key, value);
        }
        hash
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn get(&self, key: Value) -> Option<Value> {
        self.entries
            .borrow()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, value)| value)
    }

    /// Looks up a symbol key by name.
    pub fn get_symbol(&self, name: &str) -> Option<Value> {
        self.entries
            .borrow()
            .iter()
            .find(|(key, _)| symbol_name_is(*key, name))
            .map(|&(_, value)| value)
    }

    pub fn insert(&self, key: Value, value: Value) {
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.borrow().iter().map(|&(key, _)| key).collect()
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries.borrow().clone()
    }
}

pub(crate) fn symbol_name_is(key: Value, name: &str) -> bool {
    let Some(cell) = key.as_cell() else {
        return false;
    };
    cell.downcast::<SymbolObject>()
        .is_some_and(|symbol| symbol.name() == name)
}

impl Cell for HashObject {
    fn visit_children(&self, visitor: &mut dyn Visitor) {
        for &(key, value) in self.entries.borrow().iter() {
            visitor.visit(key);
            visitor.visit(value);
        }
    }

    fn type_name(&self) -> &'static str {
        "Hash"
    }
}
