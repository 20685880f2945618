use std::cell::RefCell;

use object::{Cell, Value, Visitor};

#[derive(Debug, Default)]
pub struct ArrayObject {
    items: RefCell<Vec<Value>>,
}

impl ArrayObject {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).copied()
    }

    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }
}

impl Cell for ArrayObject {
    fn visit_children(&self, visitor: &mut dyn Visitor) {
        for &item in self.items.borrow().iter() {
            visitor.visit(item);
        }
    }

    fn type_name(&self) -> &'static str {
        "Array"
    }
}
