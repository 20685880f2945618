use std::cell::RefCell;

use object::{Cell, CellRef, Value, Visitor};

/// Captured local variables of one lexical scope, linked to the enclosing one.
#[derive(Debug)]
pub struct ScopeObject {
    outer: Option<CellRef>,
    vars: RefCell<Vec<Value>>,
}

impl ScopeObject {
    pub fn new(outer: Option<CellRef>, vars: Vec<Value>) -> Self {
        Self {
            outer,
            vars: RefCell::new(vars),
        }
    }

    pub fn outer(&self) -> Option<CellRef> {
        self.outer
    }

    pub fn var(&self, index: usize) -> Option<Value> {
        self.vars.borrow().get(index).copied()
    }

    /// Stores `value`, growing the scope with `fill` as needed.
    pub fn set_var(&self, index: usize, value: Value, fill: Value) {
        let mut vars = self.vars.borrow_mut();
        if index >= vars.len() {
            vars.resize(index + 1, fill);
        }
        vars[index] = value;
    }
}

impl Cell for ScopeObject {
    fn visit_children(&self, visitor: &mut dyn Visitor) {
        if let Some(outer) = self.outer {
            visitor.visit(Value::Ref(outer));
        }
        for &var in self.vars.borrow().iter() {
            visitor.visit(var);
        }
    }

    fn type_name(&self) -> &'static str {
        "Scope"
    }
}
