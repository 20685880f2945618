//! Built-in object types. Each one is a [`Cell`](object::Cell) the
//! collector can trace.

mod array;
mod block;
mod hash;
mod numeric;
mod scope;
mod string;
mod symbol;

pub use array::ArrayObject;
pub use block::BlockObject;
pub use hash::HashObject;
pub(crate) use hash::symbol_name_is;
pub use numeric::{FloatObject, IntegerObject};
pub use scope::ScopeObject;
pub use string::StringObject;
pub use symbol::SymbolObject;

use object::{CellRef, Value};

use crate::{
    Method,
    special::{FalseObject, NilObject, TrueObject},
};

/// Renders a value the way the guest language prints it.
pub fn inspect(value: Value) -> String {
    match value {
        Value::SmallInt(n) => n.to_string(),
        Value::Double(d) => format_float(d),
        Value::Ref(cell) => inspect_cell(cell),
    }
}

pub(crate) fn format_float(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        let sign = if d > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if d.fract() == 0.0 && d.abs() < 1e16 {
        format!("{d:.1}")
    } else {
        d.to_string()
    }
}

fn inspect_cell(cell: CellRef) -> String {
    if cell.is::<NilObject>() {
        return "nil".to_string();
    }
    if cell.is::<TrueObject>() {
        return "true".to_string();
    }
    if cell.is::<FalseObject>() {
        return "false".to_string();
    }
    if let Some(integer) = cell.downcast::<IntegerObject>() {
        return integer.value().to_string();
    }
    if let Some(float) = cell.downcast::<FloatObject>() {
        return format_float(float.value());
    }
    if let Some(symbol) = cell.downcast::<SymbolObject>() {
        return format!(":{}", symbol.name());
    }
    if let Some(string) = cell.downcast::<StringObject>() {
        return format!("{:?}", string.to_string_lossy());
    }
    if let Some(array) = cell.downcast::<ArrayObject>() {
        let items: Vec<String> = array.to_vec().into_iter().map(inspect).collect();
        return format!("[{}]", items.join(", "));
    }
    if let Some(hash) = cell.downcast::<HashObject>() {
        let entries: Vec<String> = hash
            .entries()
            .into_iter()
            .map(|(key, value)| format!("{}=>{}", inspect(key), inspect(value)))
            .collect();
        return format!("{{{}}}", entries.join(", "));
    }
    if let Some(method) = cell.downcast::<Method>() {
        return format!("#<Method: {}>", method.name());
    }
    format!("#<{}>", cell.type_name())
}
