use object::{CellRef, Value};

use crate::{
    Args, Env, Error, VmResult,
    primitives::{Numeric, bool_value, comparison_failed, expect_integer, expect_numeric},
};

fn value_from_i128(env: &Env<'_>, value: i128) -> VmResult<Value> {
    match i64::try_from(value) {
        Ok(n) => Ok(env.integer(n)),
        Err(_) => Err(Error::Range("integer overflow".to_string())),
    }
}

/// Receiver and single operand of a binary integer operation.
fn operands(receiver: Value, args: &Args) -> VmResult<(i64, Numeric)> {
    args.ensure_argc_is(1, false, &[])?;
    let lhs = expect_integer(receiver)?;
    let rhs = expect_numeric(args.get(0), "Integer")?;
    Ok((lhs, rhs))
}

pub fn integer_add(
    env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    match operands(receiver, &args)? {
        (a, Numeric::Integer(b)) => value_from_i128(env, a as i128 + b as i128),
        (a, Numeric::Float(b)) => Ok(Value::Double(a as f64 + b)),
    }
}

pub fn integer_sub(
    env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    match operands(receiver, &args)? {
        (a, Numeric::Integer(b)) => value_from_i128(env, a as i128 - b as i128),
        (a, Numeric::Float(b)) => Ok(Value::Double(a as f64 - b)),
    }
}

pub fn integer_mul(
    env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    match operands(receiver, &args)? {
        (a, Numeric::Integer(b)) => value_from_i128(env, a as i128 * b as i128),
        (a, Numeric::Float(b)) => Ok(Value::Double(a as f64 * b)),
    }
}

/// Floor division, rounding toward negative infinity.
pub fn integer_div(
    env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    match operands(receiver, &args)? {
        (_, Numeric::Integer(0)) => Err(Error::ZeroDivision),
        (a, Numeric::Integer(b)) => {
            let (a, b) = (a as i128, b as i128);
            let quotient = a / b;
            let floored = if a % b != 0 && (a < 0) != (b < 0) {
                quotient - 1
            } else {
                quotient
            };
            value_from_i128(env, floored)
        }
        (a, Numeric::Float(b)) => Ok(Value::Double(a as f64 / b)),
    }
}

pub fn integer_eq(
    env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    args.ensure_argc_is(1, false, &[])?;
    let lhs = expect_integer(receiver)?;
    let equal = match expect_numeric(args.get(0), "Integer") {
        Ok(Numeric::Integer(rhs)) => lhs == rhs,
        Ok(Numeric::Float(rhs)) => lhs as f64 == rhs,
        Err(_) => false,
    };
    Ok(bool_value(env, equal))
}

pub fn integer_lt(
    env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    args.ensure_argc_is(1, false, &[])?;
    let lhs = expect_integer(receiver)?;
    let other = args.get(0);
    let less = match expect_numeric(other, "Integer") {
        Ok(Numeric::Integer(rhs)) => lhs < rhs,
        Ok(Numeric::Float(rhs)) => (lhs as f64) < rhs,
        Err(_) => return Err(comparison_failed("Integer", other)),
    };
    Ok(bool_value(env, less))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{objects::{IntegerObject, StringObject, inspect}, test_support::with_test_env};
    use object::SMALL_INT_MAX;

    fn call(
        env: &Env<'_>,
        f: crate::NativeFn,
        receiver: Value,
        arg: Value,
    ) -> VmResult<Value> {
        f(env, receiver, Args::new(&[arg], false), None)
    }

    #[test]
    fn arithmetic() {
        with_test_env(|env| {
            let seven = Value::SmallInt(7);
            assert_eq!(call(env, integer_add, seven, Value::SmallInt(3)).unwrap(), Value::SmallInt(10));
            assert_eq!(call(env, integer_sub, seven, Value::SmallInt(10)).unwrap(), Value::SmallInt(-3));
            assert_eq!(call(env, integer_mul, seven, Value::SmallInt(6)).unwrap(), Value::SmallInt(42));
            assert_eq!(call(env, integer_add, seven, Value::Double(0.5)).unwrap(), Value::Double(7.5));
        });
    }

    #[test]
    fn results_outside_inline_range_are_boxed() {
        with_test_env(|env| {
            let sum = call(env, integer_add, Value::SmallInt(SMALL_INT_MAX), Value::SmallInt(1)).unwrap();
            let cell = sum.as_cell().expect("boxed integer");
            assert_eq!(
                cell.downcast::<IntegerObject>().map(IntegerObject::value),
                Some(SMALL_INT_MAX + 1)
            );
            assert_eq!(inspect(sum), (SMALL_INT_MAX + 1).to_string());
        });
    }

    #[test]
    fn overflow_is_a_range_error() {
        with_test_env(|env| {
            let max = Value::Ref(env.allocate(IntegerObject::new(i64::MAX)));
            let err = call(env, integer_add, max, Value::SmallInt(1)).unwrap_err();
            assert_eq!(err.class_name(), "RangeError");
            assert_eq!(err.to_string(), "integer overflow");
        });
    }

    #[test]
    fn division_floors() {
        with_test_env(|env| {
            assert_eq!(call(env, integer_div, Value::SmallInt(7), Value::SmallInt(2)).unwrap(), Value::SmallInt(3));
            assert_eq!(call(env, integer_div, Value::SmallInt(-7), Value::SmallInt(2)).unwrap(), Value::SmallInt(-4));
            assert_eq!(call(env, integer_div, Value::SmallInt(7), Value::SmallInt(-2)).unwrap(), Value::SmallInt(-4));
            assert_eq!(call(env, integer_div, Value::SmallInt(-6), Value::SmallInt(-2)).unwrap(), Value::SmallInt(3));
            let err = call(env, integer_div, Value::SmallInt(1), Value::SmallInt(0)).unwrap_err();
            assert!(matches!(err, Error::ZeroDivision));
            assert_eq!(err.class_name(), "ZeroDivisionError");
        });
    }

    #[test]
    fn comparisons() {
        with_test_env(|env| {
            let text = Value::Ref(env.allocate(StringObject::new("1")));
            assert_eq!(call(env, integer_eq, Value::SmallInt(1), Value::Double(1.0)).unwrap(), env.true_value());
            assert_eq!(call(env, integer_eq, Value::SmallInt(1), text).unwrap(), env.false_value());
            assert_eq!(call(env, integer_lt, Value::SmallInt(1), Value::SmallInt(2)).unwrap(), env.true_value());
            assert_eq!(
                call(env, integer_lt, Value::SmallInt(1), text).unwrap_err().to_string(),
                "comparison of Integer with String failed"
            );
        });
    }

    #[test]
    fn arity_is_checked() {
        with_test_env(|env| {
            let err = integer_add(env, Value::SmallInt(1), Args::empty(), None).unwrap_err();
            assert_eq!(err.to_string(), "wrong number of arguments (given 0, expected 1)");
        });
    }
}
