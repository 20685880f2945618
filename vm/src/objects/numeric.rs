use object::{Cell, Visitor};

/// A boxed integer: either a permanent heap object or a stack-synthesized
/// stand-in for an inline one.
#[derive(Debug, Clone, Copy)]
pub struct IntegerObject {
    value: i64,
}

impl IntegerObject {
    pub fn new(value: i64) -> Self {
        Self { value }
    }

    #[inline(always)]
    pub fn value(&self) -> i64 {
        self.value
    }
}

impl Cell for IntegerObject {
    fn visit_children(&self, _visitor: &mut dyn Visitor) {}

    fn type_name(&self) -> &'static str {
        "Integer"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FloatObject {
    value: f64,
}

impl FloatObject {
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    #[inline(always)]
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Cell for FloatObject {
    fn visit_children(&self, _visitor: &mut dyn Visitor) {}

    fn type_name(&self) -> &'static str {
        "Float"
    }
}
