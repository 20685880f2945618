use object::{Cell, Visitor};

/// An interned name. Symbols are created through the VM's symbol table and
/// stay rooted for the life of the heap.
#[derive(Debug)]
pub struct SymbolObject {
    name: Box<str>,
}

impl SymbolObject {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Cell for SymbolObject {
    fn visit_children(&self, _visitor: &mut dyn Visitor) {}

    fn type_name(&self) -> &'static str {
        "Symbol"
    }
}
