use std::cell::Cell as Slot;

use object::{Cell, CellRef, Value, Visitor};

use super::ArrayObject;
use crate::{Args, Env, FrameId, NativeFn, VmResult};

/// A closure: a native body, the scope it was defined in, and its `self`.
///
/// While a method that received the block is running, the block also knows
/// that method's calling frame, which is where `break` unwinds to.
pub struct BlockObject {
    function: NativeFn,
    scope: Option<CellRef>,
    self_value: Value,
    arity: Option<(usize, Option<usize>)>,
    calling_frame: Slot<Option<FrameId>>,
}

impl BlockObject {
    pub fn new(function: NativeFn, scope: Option<CellRef>, self_value: Value) -> Self {
        Self {
            function,
            scope,
            self_value,
            arity: None,
            calling_frame: Slot::new(None),
        }
    }

    /// Declares the parameter count. `max` of `None` takes any number.
    ///
    /// A block with a declared arity receives exactly its parameters: a lone
    /// array argument is spread when more than one is declared, extra
    /// arguments are dropped and missing ones are nil.
    pub fn with_arity(mut self, min: usize, max: Option<usize>) -> Self {
        self.arity = Some((min, max));
        self
    }

    pub fn min_args(&self) -> usize {
        self.arity.map_or(0, |(min, _)| min)
    }

    pub fn max_args(&self) -> Option<usize> {
        self.arity.and_then(|(_, max)| max)
    }

    pub fn scope(&self) -> Option<CellRef> {
        self.scope
    }

    pub fn calling_frame(&self) -> Option<FrameId> {
        self.calling_frame.get()
    }

    pub(crate) fn set_calling_frame(&self, frame: Option<FrameId>) {
        self.calling_frame.set(frame);
    }

    /// Runs the body in a fresh frame whose lexical parent is the block's scope.
    pub fn call(&self, env: &Env<'_>, args: Args, block: Option<CellRef>) -> VmResult<Value> {
        let frame = env
            .child(self.scope, None, block)
            .with_break_target(self.calling_frame.get());
        let Some((min, max)) = self.arity else {
            return (self.function)(&frame, self.self_value, args, block);
        };
        // `params` sits above `args` on the argument stack and is dropped
        // by the body first.
        let spread = args.to_array_for_block(env, min, max, true, true);
        let params = spread
            .downcast::<ArrayObject>()
            .map_or_else(Args::empty, |array| Args::from_array(array, false));
        (self.function)(&frame, self.self_value, params, block)
    }
}

impl Cell for BlockObject {
    fn visit_children(&self, visitor: &mut dyn Visitor) {
        if let Some(scope) = self.scope {
            visitor.visit(Value::Ref(scope));
        }
        visitor.visit(self.self_value);
    }

    fn type_name(&self) -> &'static str {
        "Proc"
    }
}
