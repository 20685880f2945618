//! The per-thread argument stack.
//!
//! Every [`Args`](crate::Args) window is a suffix of this stack, so it is
//! the only precise root a thread needs to report.

use std::{cell::RefCell, ops::Range};

use heap::RootProvider;
use object::Value;

const INITIAL_CAPACITY: usize = 1024;

thread_local! {
    static ARG_STACK: RefCell<Vec<Value>> =
        RefCell::new(Vec::with_capacity(INITIAL_CAPACITY));
}

pub fn len() -> usize {
    ARG_STACK.with_borrow(Vec::len)
}

pub fn push(value: Value) {
    ARG_STACK.with_borrow_mut(|stack| stack.push(value));
}

/// Appends `values`, returning the index of the first one.
pub fn extend(values: &[Value]) -> usize {
    ARG_STACK.with_borrow_mut(|stack| {
        let start = stack.len();
        stack.extend_from_slice(values);
        start
    })
}

/// Appends a copy of `range`, returning the index of the first copy.
pub fn extend_from_within(range: Range<usize>) -> usize {
    ARG_STACK.with_borrow_mut(|stack| {
        let start = stack.len();
        stack.extend_from_within(range);
        start
    })
}

pub fn get(index: usize) -> Value {
    ARG_STACK.with_borrow(|stack| stack[index])
}

pub fn set(index: usize, value: Value) {
    ARG_STACK.with_borrow_mut(|stack| stack[index] = value);
}

pub fn to_vec(range: Range<usize>) -> Vec<Value> {
    ARG_STACK.with_borrow(|stack| stack[range].to_vec())
}

/// Runs `f` over a borrowed window. `f` must not touch the stack itself.
pub fn with_window<R>(range: Range<usize>, f: impl FnOnce(&[Value]) -> R) -> R {
    ARG_STACK.with_borrow(|stack| f(&stack[range]))
}

pub fn truncate(len: usize) {
    // The stack may already be gone while thread-locals are torn down.
    let _ = ARG_STACK.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        debug_assert!(
            len <= stack.len(),
            "argument frames released out of order ({len} > {})",
            stack.len()
        );
        stack.truncate(len);
    });
}

/// Reports the current thread's argument stack to the collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRoots;

impl RootProvider for ThreadRoots {
    fn visit_roots(&self, visitor: &mut dyn FnMut(Value)) {
        ARG_STACK.with_borrow(|stack| {
            for &value in stack {
                visitor(value);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_and_truncate() {
        let base = len();
        let start = extend(&[Value::SmallInt(1), Value::SmallInt(2)]);
        assert_eq!(start, base);
        push(Value::SmallInt(3));
        assert_eq!(get(base + 2), Value::SmallInt(3));

        let copy = extend_from_within(base..base + 2);
        assert_eq!(to_vec(copy..copy + 2), vec![Value::SmallInt(1), Value::SmallInt(2)]);
        let sum = with_window(base..base + 3, |window| {
            window.iter().filter_map(|value| value.as_i64()).sum::<i64>()
        });
        assert_eq!(sum, 6);

        truncate(base);
        assert_eq!(len(), base);
    }

    #[test]
    fn roots_cover_every_slot() {
        let base = len();
        extend(&[Value::SmallInt(7), Value::Double(0.5)]);
        let mut seen = Vec::new();
        ThreadRoots.visit_roots(&mut |value| seen.push(value));
        assert_eq!(&seen[base..], &[Value::SmallInt(7), Value::Double(0.5)]);
        truncate(base);
    }
}
