use object::{CellRef, Value};

use crate::{
    Args, Env, VmResult,
    primitives::{bool_value, comparison_failed, expect_float, expect_numeric},
};

fn operands(receiver: Value, args: &Args) -> VmResult<(f64, f64)> {
    args.ensure_argc_is(1, false, &[])?;
    let lhs = expect_float(receiver)?;
    let rhs = expect_numeric(args.get(0), "Float")?;
    Ok((lhs, rhs.as_f64()))
}

pub fn float_add(
    _env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    let (a, b) = operands(receiver, &args)?;
    Ok(Value::Double(a + b))
}

pub fn float_sub(
    _env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    let (a, b) = operands(receiver, &args)?;
    Ok(Value::Double(a - b))
}

pub fn float_mul(
    _env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    let (a, b) = operands(receiver, &args)?;
    Ok(Value::Double(a * b))
}

/// IEEE division: dividing by zero gives an infinity or NaN.
pub fn float_div(
    _env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    let (a, b) = operands(receiver, &args)?;
    Ok(Value::Double(a / b))
}

pub fn float_lt(
    env: &Env<'_>,
    receiver: Value,
    args: Args,
    _block: Option<CellRef>,
) -> VmResult<Value> {
    args.ensure_argc_is(1, false, &[])?;
    let lhs = expect_float(receiver)?;
    let other = args.get(0);
    let rhs = expect_numeric(other, "Float").map_err(|_| comparison_failed("Float", other))?;
    Ok(bool_value(env, lhs < rhs.as_f64()))
}
