use std::{
    cell::Cell as Slot,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use object::{Cell, CellRef, Value};

use crate::{
    Args, Error, ThreadContext, VmResult,
    objects::{BlockObject, IntegerObject},
};

static NEXT_FRAME: AtomicU64 = AtomicU64::new(1);

/// Identity of one call frame, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl FrameId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FRAME.fetch_add(1, Ordering::Relaxed))
    }
}

/// A call environment. Lives on the native stack for exactly one call and
/// links to its caller's environment.
pub struct Env<'a> {
    thread: &'a ThreadContext,
    frame: FrameId,
    caller: Option<&'a Env<'a>>,
    /// Lexical parent scope captured by the running method or block.
    outer: Option<CellRef>,
    method_name: Option<&'a str>,
    file: &'a str,
    line: Slot<u32>,
    block: Option<CellRef>,
    /// Frame a `break` inside this block body unwinds to.
    break_target: Option<FrameId>,
}

impl<'a> Env<'a> {
    pub fn top(thread: &'a ThreadContext, file: &'a str) -> Self {
        Self {
            thread,
            frame: FrameId::next(),
            caller: None,
            outer: None,
            method_name: None,
            file,
            line: Slot::new(0),
            block: None,
            break_target: None,
        }
    }

    /// Environment for a call made from this one. The source location is
    /// inherited from the call site.
    pub fn child<'b>(
        &'b self,
        outer: Option<CellRef>,
        method_name: Option<&'b str>,
        block: Option<CellRef>,
    ) -> Env<'b> {
        Env {
            thread: self.thread,
            frame: FrameId::next(),
            caller: Some(self),
            outer,
            method_name,
            file: self.file,
            line: Slot::new(self.line.get()),
            block,
            break_target: None,
        }
    }

    pub(crate) fn with_break_target(mut self, target: Option<FrameId>) -> Self {
        self.break_target = target;
        self
    }

    #[inline(always)]
    pub fn thread(&self) -> &'a ThreadContext {
        self.thread
    }

    #[inline(always)]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn caller(&self) -> Option<&'a Env<'a>> {
        self.caller
    }

    pub fn outer(&self) -> Option<CellRef> {
        self.outer
    }

    pub fn method_name(&self) -> Option<&'a str> {
        self.method_name
    }

    pub fn file(&self) -> &'a str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line.get()
    }

    pub fn set_line(&self, line: u32) {
        self.line.set(line);
    }

    pub fn block(&self) -> Option<CellRef> {
        self.block
    }

    // ── Allocation and well-known values ───────────────────────────────

    #[inline]
    pub fn allocate<T: Cell>(&self, object: T) -> CellRef {
        self.thread.allocate(object)
    }

    pub fn nil(&self) -> Value {
        self.thread.vm().special().nil
    }

    pub fn true_value(&self) -> Value {
        self.thread.vm().special().true_value
    }

    pub fn false_value(&self) -> Value {
        self.thread.vm().special().false_value
    }

    pub fn bool(&self, value: bool) -> Value {
        if value {
            self.true_value()
        } else {
            self.false_value()
        }
    }

    pub fn symbol(&self, name: &str) -> Value {
        Value::Ref(self.thread.symbol(name))
    }

    /// Inline when it fits, boxed on the heap otherwise.
    pub fn integer(&self, n: i64) -> Value {
        match Value::small_int(n) {
            Some(value) => value,
            None => Value::Ref(self.allocate(IntegerObject::new(n))),
        }
    }

    // ── Blocks ─────────────────────────────────────────────────────────

    pub fn yield_block(&self, args: Args) -> VmResult<Value> {
        let Some(block) = self.block else {
            return Err(Error::LocalJump("no block given (yield)".to_string()));
        };
        let Some(body) = block.downcast::<BlockObject>() else {
            return Err(Error::type_error(format!(
                "wrong argument type {} (expected Proc)",
                block.type_name()
            )));
        };
        body.call(self, args, None)
    }

    /// The error a `break` with `value` raises from this block body.
    pub fn break_with(&self, value: Value) -> Error {
        match self.break_target {
            Some(frame) => Error::Break { frame, value },
            None => Error::LocalJump("break from proc-closure".to_string()),
        }
    }

    /// One line per frame, innermost first.
    pub fn backtrace(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = Some(self);
        while let Some(env) = current {
            let label = match (env.method_name, env.caller) {
                (Some(name), _) => name,
                (None, None) => "<main>",
                (None, Some(_)) => "block",
            };
            lines.push(format!("{}:{}:in '{}'", env.file, env.line.get(), label));
            current = env.caller;
        }
        lines
    }
}

impl fmt::Debug for Env<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("frame", &self.frame)
            .field("method", &self.method_name)
            .field("file", &self.file)
            .field("line", &self.line.get())
            .field("block", &self.block)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_test_env;
    use object::SMALL_INT_MAX;

    #[test]
    fn frames_link_to_their_callers() {
        with_test_env(|env| {
            env.set_line(3);
            let method = env.child(None, Some("each"), None);
            method.set_line(7);
            let block = method.child(None, None, None);
            assert_eq!(block.line(), 7);
            assert_ne!(block.frame(), method.frame());
            assert_eq!(block.caller().map(Env::frame), Some(method.frame()));
            assert_eq!(
                block.backtrace(),
                vec!["test:7:in 'block'", "test:7:in 'each'", "test:3:in '<main>'"]
            );
        });
    }

    #[test]
    fn integers_box_outside_inline_range() {
        with_test_env(|env| {
            assert_eq!(env.integer(5), Value::SmallInt(5));
            let boxed = env.integer(SMALL_INT_MAX + 1);
            let cell = boxed.as_cell().expect("boxed");
            assert_eq!(
                cell.downcast::<IntegerObject>().map(IntegerObject::value),
                Some(SMALL_INT_MAX + 1)
            );
            assert_eq!(env.bool(true), env.true_value());
            assert_eq!(env.bool(false), env.false_value());
            assert_eq!(env.symbol("x"), env.symbol("x"));
        });
    }
}
