use std::pin::pin;

use object::{Cell, CellRef, StackCell, Value, Visitor};

use crate::{
    Args, Env, Error, VmResult,
    objects::{BlockObject, FloatObject, IntegerObject},
    signals,
};

/// Native body of a method or block: environment, receiver, arguments and
/// the block passed to the call.
pub type NativeFn = fn(&Env<'_>, Value, Args, Option<CellRef>) -> VmResult<Value>;

/// A callable bound to a name.
///
/// An `optimized` method promises not to let its receiver or arguments
/// escape the call. Calls to it with one inline numeric argument box that
/// argument on the native stack instead of the heap.
pub struct Method {
    name: Box<str>,
    function: NativeFn,
    /// Captured lexical scope of a method defined inside a block.
    env: Option<CellRef>,
    /// Receiver that replaces whatever the caller passes.
    self_value: Option<Value>,
    optimized: bool,
}

impl Method {
    pub fn new(name: &str, function: NativeFn) -> Self {
        Self {
            name: name.into(),
            function,
            env: None,
            self_value: None,
            optimized: false,
        }
    }

    pub fn optimized(mut self, optimized: bool) -> Self {
        self.optimized = optimized;
        self
    }

    pub fn with_env(mut self, env: CellRef) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_self(mut self, self_value: Value) -> Self {
        self.self_value = Some(self_value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    pub fn call(
        &self,
        env: &Env<'_>,
        self_value: Value,
        args: Args,
        block: Option<CellRef>,
    ) -> VmResult<Value> {
        if signals::poll_interrupt() {
            log::debug!("interrupt delivered at call to {}", self.name);
            return Err(Error::Interrupt);
        }

        let frame = env.child(self.env, Some(&self.name), block);
        let _calling = CallingFrame::attach(block, env);
        let mut receiver = self.self_value.unwrap_or(self_value);

        let result = if self.optimized && args.size(true) == 1 {
            match args.get(0) {
                Value::SmallInt(n) => {
                    drop(args);
                    self.call_synthesized(&frame, receiver, IntegerObject::new(n), block)
                }
                Value::Double(d) => {
                    drop(args);
                    self.call_synthesized(&frame, receiver, FloatObject::new(d), block)
                }
                _ => (self.function)(&frame, receiver, args, block),
            }
        } else {
            if !self.optimized {
                if let Value::Ref(cell) = receiver {
                    if cell.is_synthesized() {
                        receiver = promote(env, cell);
                    }
                }
            }
            (self.function)(&frame, receiver, args, block)
        };

        match result {
            Err(Error::Break { frame: target, value }) if target == env.frame() => Ok(value),
            other => other,
        }
    }

    /// Calls the body with `object` pinned in this frame as its only
    /// argument. The body must not retain it.
    #[inline(never)]
    fn call_synthesized<T: Cell>(
        &self,
        frame: &Env<'_>,
        receiver: Value,
        object: T,
        block: Option<CellRef>,
    ) -> VmResult<Value> {
        let slot = pin!(StackCell::new(object));
        let cell = slot.cell_ref();
        cell.set_synthesized();
        let args = Args::new(&[Value::Ref(cell)], false);
        (self.function)(frame, receiver, args, block)
    }
}

/// Copies a synthesized numeric onto the heap.
fn promote(env: &Env<'_>, cell: CellRef) -> Value {
    if let Some(integer) = cell.downcast::<IntegerObject>() {
        return Value::Ref(env.allocate(IntegerObject::new(integer.value())));
    }
    if let Some(float) = cell.downcast::<FloatObject>() {
        return Value::Ref(env.allocate(FloatObject::new(float.value())));
    }
    Value::Ref(cell)
}

/// Gives a block its caller's frame for the length of one call. A block
/// that already has one keeps it.
struct CallingFrame {
    block: Option<CellRef>,
}

impl CallingFrame {
    fn attach(block: Option<CellRef>, caller: &Env<'_>) -> Self {
        let owned = block.filter(|cell| {
            cell.downcast::<BlockObject>()
                .is_some_and(|body| body.calling_frame().is_none())
        });
        if let Some(cell) = owned {
            if let Some(body) = cell.downcast::<BlockObject>() {
                body.set_calling_frame(Some(caller.frame()));
            }
        }
        Self { block: owned }
    }
}

impl Drop for CallingFrame {
    fn drop(&mut self) {
        if let Some(cell) = self.block {
            if let Some(body) = cell.downcast::<BlockObject>() {
                body.set_calling_frame(None);
            }
        }
    }
}

impl Cell for Method {
    fn visit_children(&self, visitor: &mut dyn Visitor) {
        if let Some(env) = self.env {
            visitor.visit(Value::Ref(env));
        }
        if let Some(self_value) = self.self_value {
            visitor.visit(self_value);
        }
    }

    fn type_name(&self) -> &'static str {
        "Method"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arg_stack, primitives, test_support::with_test_env};
    use std::cell::Cell as Slot;

    thread_local! {
        static LAST_ARG: Slot<usize> = const { Slot::new(0) };
    }

    fn integer_add() -> Method {
        Method::new("+", primitives::fixnum::integer_add).optimized(true)
    }

    fn record_arg(_env: &Env<'_>, _self: Value, args: Args, _: Option<CellRef>) -> VmResult<Value> {
        let arg = args.get(0);
        LAST_ARG.set(arg.as_cell().map_or(0, CellRef::addr));
        Ok(Value::SmallInt(arg.as_cell().map_or(0, |cell| cell.is_synthesized() as i64)))
    }

    fn receiver_state(_env: &Env<'_>, receiver: Value, _: Args, _: Option<CellRef>) -> VmResult<Value> {
        let cell = receiver.as_cell().expect("boxed receiver");
        Ok(Value::SmallInt(cell.is_synthesized() as i64))
    }

    #[test]
    fn fast_path_matches_boxed_call() {
        with_test_env(|env| {
            let add = integer_add();
            let fast = add
                .call(env, Value::SmallInt(40), Args::new(&[Value::SmallInt(2)], false), None)
                .unwrap();

            let boxed = Value::Ref(env.allocate(IntegerObject::new(2)));
            let slow = add
                .call(env, Value::SmallInt(40), Args::new(&[boxed], false), None)
                .unwrap();

            assert_eq!(fast, Value::SmallInt(42));
            assert_eq!(fast, slow);

            let float = Method::new("+", primitives::float::float_add).optimized(true);
            let sum = float
                .call(env, Value::Double(1.5), Args::new(&[Value::Double(0.25)], false), None)
                .unwrap();
            assert_eq!(sum, Value::Double(1.75));
        });
    }

    #[test]
    fn synthesized_argument_is_not_a_heap_cell() {
        with_test_env(|env| {
            let base = arg_stack::len();
            let probe = Method::new("probe", record_arg).optimized(true);
            let flagged = probe
                .call(env, env.nil(), Args::new(&[Value::SmallInt(7)], false), None)
                .unwrap();
            assert_eq!(flagged, Value::SmallInt(1));
            assert_eq!(arg_stack::len(), base);

            let heap = env.thread().heap();
            let addr = LAST_ARG.get();
            assert_ne!(addr, 0);
            assert!(env.thread().collect());
            assert!(heap.cell_for_address(addr).is_none());
            assert!(heap.identify_roots(&[addr]).is_empty());
        });
    }

    #[test]
    fn unoptimized_method_sees_heap_arguments() {
        with_test_env(|env| {
            let probe = Method::new("probe", record_arg);
            let boxed = Value::Ref(env.allocate(IntegerObject::new(7)));
            let flagged = probe
                .call(env, env.nil(), Args::new(&[boxed], false), None)
                .unwrap();
            assert_eq!(flagged, Value::SmallInt(0));
        });
    }

    #[test]
    fn synthesized_receiver_is_promoted() {
        with_test_env(|env| {
            let slot = pin!(StackCell::new(IntegerObject::new(3)));
            let cell = slot.cell_ref();
            cell.set_synthesized();

            let plain = Method::new("state", receiver_state);
            let seen = plain.call(env, Value::Ref(cell), Args::empty(), None).unwrap();
            assert_eq!(seen, Value::SmallInt(0));

            let optimized = Method::new("state", receiver_state).optimized(true);
            let seen = optimized.call(env, Value::Ref(cell), Args::empty(), None).unwrap();
            assert_eq!(seen, Value::SmallInt(1));
        });
    }

    #[test]
    fn forced_receiver_wins() {
        with_test_env(|env| {
            let add = integer_add().with_self(Value::SmallInt(100));
            let sum = add
                .call(env, Value::SmallInt(1), Args::new(&[Value::SmallInt(1)], false), None)
                .unwrap();
            assert_eq!(sum, Value::SmallInt(101));
        });
    }

    fn calls_block(env: &Env<'_>, _self: Value, _: Args, block: Option<CellRef>) -> VmResult<Value> {
        let cell = block.expect("block passed");
        let frame = cell
            .downcast::<BlockObject>()
            .and_then(BlockObject::calling_frame)
            .expect("calling frame attached");
        let caller = env.caller().expect("caller linked");
        assert_eq!(frame, caller.frame());
        env.yield_block(Args::empty())
    }

    fn breaks(env: &Env<'_>, _self: Value, _: Args, _: Option<CellRef>) -> VmResult<Value> {
        Err(env.break_with(Value::SmallInt(9)))
    }

    fn returns_frame(env: &Env<'_>, _self: Value, _: Args, block: Option<CellRef>) -> VmResult<Value> {
        let cell = block.expect("block passed");
        let body = cell.downcast::<BlockObject>().expect("block");
        Ok(Value::SmallInt(body.calling_frame().is_some() as i64))
    }

    #[test]
    fn calling_frame_is_attached_for_one_call() {
        with_test_env(|env| {
            let block = env.allocate(BlockObject::new(breaks, None, env.nil()));
            let method = Method::new("each", calls_block);

            let result = method.call(env, env.nil(), Args::empty(), Some(block)).unwrap();
            assert_eq!(result, Value::SmallInt(9));

            let body = block.downcast::<BlockObject>().unwrap();
            assert_eq!(body.calling_frame(), None);
        });
    }

    #[test]
    fn nested_call_keeps_outer_calling_frame() {
        with_test_env(|env| {
            let block = env.allocate(BlockObject::new(breaks, None, env.nil()));
            let body = block.downcast::<BlockObject>().unwrap();
            let outer = env.child(None, Some("outer"), Some(block));
            body.set_calling_frame(Some(env.frame()));

            let inner = Method::new("inner", returns_frame);
            let attached = inner.call(&outer, env.nil(), Args::empty(), Some(block)).unwrap();
            assert_eq!(attached, Value::SmallInt(1));
            assert_eq!(body.calling_frame(), Some(env.frame()));
        });
    }

    #[test]
    fn break_without_calling_frame_is_local_jump_error() {
        with_test_env(|env| {
            let block = env.allocate(BlockObject::new(breaks, None, env.nil()));
            let err = env
                .child(None, None, Some(block))
                .yield_block(Args::empty())
                .unwrap_err();
            assert_eq!(err.class_name(), "LocalJumpError");
        });
    }

    #[test]
    fn yield_without_block_fails() {
        with_test_env(|env| {
            let err = env.yield_block(Args::empty()).unwrap_err();
            assert_eq!(err.to_string(), "no block given (yield)");
        });
    }
}
