mod cell;
mod header;
mod value;

pub use cell::{Cell, CellRef, StackCell, Visitor};
pub use header::{CELL_ALIGN, CellFlags, CellHeader};
pub use value::{SMALL_INT_MAX, SMALL_INT_MIN, Value};
