use std::fmt;

use crate::CellRef;

/// Largest integer stored inline; wider results are boxed by the runtime.
pub const SMALL_INT_MAX: i64 = (1 << 62) - 1;
pub const SMALL_INT_MIN: i64 = -(1 << 62);

/// A runtime value.
///
/// Inline numerics carry no heap identity and are never traced; only
/// [`Value::Ref`] participates in collection.
#[derive(Clone, Copy)]
pub enum Value {
    Ref(CellRef),
    SmallInt(i64),
    Double(f64),
}

impl Value {
    /// Returns `None` when `n` does not fit the inline range.
    #[inline(always)]
    pub const fn small_int(n: i64) -> Option<Self> {
        if n >= SMALL_INT_MIN && n <= SMALL_INT_MAX {
            Some(Self::SmallInt(n))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        matches!(self, Self::Ref(_))
    }

    #[inline(always)]
    pub const fn is_small_int(self) -> bool {
        matches!(self, Self::SmallInt(_))
    }

    #[inline(always)]
    pub const fn is_double(self) -> bool {
        matches!(self, Self::Double(_))
    }

    #[inline(always)]
    pub const fn is_inline_numeric(self) -> bool {
        matches!(self, Self::SmallInt(_) | Self::Double(_))
    }

    #[inline(always)]
    pub const fn as_cell(self) -> Option<CellRef> {
        match self {
            Self::Ref(cell) => Some(cell),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn as_i64(self) -> Option<i64> {
        match self {
            Self::SmallInt(n) => Some(n),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn as_f64(self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(d),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Identity comparison: references by address, doubles by bit pattern.
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Self::Ref(a), Self::Ref(b)) => a == b,
            (Self::SmallInt(a), Self::SmallInt(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<CellRef> for Value {
    #[inline(always)]
    fn from(cell: CellRef) -> Self {
        Self::Ref(cell)
    }
}

impl From<i64> for Value {
    #[inline(always)]
    fn from(n: i64) -> Self {
        debug_assert!(
            (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&n),
            "small int overflow: {n}"
        );
        Self::SmallInt(n)
    }
}

impl From<f64> for Value {
    #[inline(always)]
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ref(cell) => write!(f, "Ref({cell:?})"),
            Self::SmallInt(n) => write!(f, "SmallInt({n})"),
            Self::Double(d) => write!(f, "Double({d})"),
        }
    }
}
