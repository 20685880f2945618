//! Native method bodies for the built-in numeric types.

use object::{CellRef, Value};

use crate::{
    Env, Error, Method, NativeFn, VmResult,
    objects::{FloatObject, IntegerObject},
};

pub mod fixnum;
pub mod float;

#[derive(Clone, Copy)]
pub struct PrimitiveDesc {
    pub name: &'static str,
    /// The body never retains its receiver or arguments.
    pub optimized: bool,
    pub func: NativeFn,
}

impl PrimitiveDesc {
    pub const fn new(name: &'static str, optimized: bool, func: NativeFn) -> Self {
        Self {
            name,
            optimized,
            func,
        }
    }

    pub fn method(&self) -> Method {
        let selector = self.name.rsplit('#').next().unwrap_or(self.name);
        Method::new(selector, self.func).optimized(self.optimized)
    }
}

pub fn default_primitives() -> Vec<PrimitiveDesc> {
    vec![
        PrimitiveDesc::new("Integer#+", true, fixnum::integer_add),
        PrimitiveDesc::new("Integer#-", true, fixnum::integer_sub),
        PrimitiveDesc::new("Integer#*", true, fixnum::integer_mul),
        PrimitiveDesc::new("Integer#/", true, fixnum::integer_div),
        PrimitiveDesc::new("Integer#==", true, fixnum::integer_eq),
        PrimitiveDesc::new("Integer#<", true, fixnum::integer_lt),
        PrimitiveDesc::new("Float#+", true, float::float_add),
        PrimitiveDesc::new("Float#-", true, float::float_sub),
        PrimitiveDesc::new("Float#*", true, float::float_mul),
        PrimitiveDesc::new("Float#/", true, float::float_div),
        PrimitiveDesc::new("Float#<", true, float::float_lt),
    ]
}

pub fn find_primitive<'a>(prims: &'a [PrimitiveDesc], name: &str) -> Option<&'a PrimitiveDesc> {
    prims.iter().find(|p| p.name == name)
}

/// A numeric operand, whether inline, heap-boxed or synthesized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Integer(i64),
    Float(f64),
}

impl Numeric {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Integer(n) => n as f64,
            Self::Float(d) => d,
        }
    }
}

fn numeric_of(value: Value) -> Option<Numeric> {
    match value {
        Value::SmallInt(n) => Some(Numeric::Integer(n)),
        Value::Double(d) => Some(Numeric::Float(d)),
        Value::Ref(cell) => numeric_of_cell(cell),
    }
}

fn numeric_of_cell(cell: CellRef) -> Option<Numeric> {
    if let Some(integer) = cell.downcast::<IntegerObject>() {
        return Some(Numeric::Integer(integer.value()));
    }
    cell.downcast::<FloatObject>()
        .map(|float| Numeric::Float(float.value()))
}

fn class_of(value: Value) -> &'static str {
    match value {
        Value::SmallInt(_) => "Integer",
        Value::Double(_) => "Float",
        Value::Ref(cell) => cell.type_name(),
    }
}

/// An operand for arithmetic with a receiver of class `into`.
pub(crate) fn expect_numeric(value: Value, into: &str) -> VmResult<Numeric> {
    numeric_of(value).ok_or_else(|| {
        Error::type_error(format!("{} can't be coerced into {into}", class_of(value)))
    })
}

pub(crate) fn expect_integer(value: Value) -> VmResult<i64> {
    match numeric_of(value) {
        Some(Numeric::Integer(n)) => Ok(n),
        _ => Err(Error::type_error(format!(
            "wrong argument type {} (expected Integer)",
            class_of(value)
        ))),
    }
}

pub(crate) fn expect_float(value: Value) -> VmResult<f64> {
    match numeric_of(value) {
        Some(Numeric::Float(d)) => Ok(d),
        _ => Err(Error::type_error(format!(
            "wrong argument type {} (expected Float)",
            class_of(value)
        ))),
    }
}

pub(crate) fn comparison_failed(receiver: &str, other: Value) -> Error {
    Error::argument(format!(
        "comparison of {receiver} with {} failed",
        class_of(other)
    ))
}

pub(crate) fn bool_value(env: &Env<'_>, value: bool) -> Value {
    env.bool(value)
}
