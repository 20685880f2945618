use std::cell::RefCell;

use object::{Cell, Visitor};

#[derive(Debug, Default)]
pub struct StringObject {
    value: RefCell<String>,
}

impl StringObject {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: RefCell::new(value.into()),
        }
    }

    pub fn to_string_lossy(&self) -> String {
        self.value.borrow().clone()
    }

    pub fn push_str(&self, suffix: &str) {
        self.value.borrow_mut().push_str(suffix);
    }

    pub fn len(&self) -> usize {
        self.value.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.borrow().is_empty()
    }
}

impl Cell for StringObject {
    fn visit_children(&self, _visitor: &mut dyn Visitor) {}

    fn type_name(&self) -> &'static str {
        "String"
    }
}
