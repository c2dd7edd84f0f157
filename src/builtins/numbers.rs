//! Arithmetic, bitwise, and comparison primops on numbers.
//!
//! Nix's `int` is a fixed-width 64-bit integer that traps on overflow
//! rather than promoting to a bignum, and arithmetic between an `int` and a
//! `float` operand produces a `float` — both mirrored here via Rust's
//! checked integer ops and an explicit mixed-type widen.

use crate::eval::Evaluator;
use crate::exception::{EvalError, EvalErrorKind, EvalResult};
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::Add => add(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Sub => arith(ev, args[0].clone(), args[1].clone(), pos, i64::checked_sub, |a, b| a - b),
        PrimOp::Mul => arith(ev, args[0].clone(), args[1].clone(), pos, i64::checked_mul, |a, b| a * b),
        PrimOp::Div => div(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::BitAnd => bitwise(ev, args[0].clone(), args[1].clone(), pos, |a, b| a & b),
        PrimOp::BitOr => bitwise(ev, args[0].clone(), args[1].clone(), pos, |a, b| a | b),
        PrimOp::BitXor => bitwise(ev, args[0].clone(), args[1].clone(), pos, |a, b| a ^ b),
        PrimOp::LessThan => less_than(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Ceil => round(ev, args[0].clone(), pos, f64::ceil),
        PrimOp::Floor => round(ev, args[0].clone(), pos, f64::floor),
        _ => unreachable!("numbers::call only handles its own PrimOp variants"),
    }
}

/// A number forced to WHNF, kept as either an `Int` or a `Float` so callers
/// can decide whether the whole operation stays integral or widens.
enum Number {
    Int(i64),
    Float(f64),
}

fn force_number(ev: &mut Evaluator, value: Value, pos: PosIdx) -> EvalResult<Number> {
    match ev.force(value)? {
        Value::Int(i) => Ok(Number::Int(i)),
        Value::Float(f) => Ok(Number::Float(f)),
        other => Err(EvalError::type_error(pos, "int or float", other.type_name())),
    }
}

/// Numeric addition shared by `builtins.add`/`__add` and the `+` operator's
/// numeric branch (`crate::eval::Evaluator::eval_add`) — the `+` operator
/// also handles strings and paths, which this function never sees.
pub(crate) fn add(ev: &mut Evaluator, a: Value, b: Value, pos: PosIdx) -> EvalResult<Value> {
    arith(ev, a, b, pos, i64::checked_add, |a, b| a + b)
}

fn arith(
    ev: &mut Evaluator,
    a: Value,
    b: Value,
    pos: PosIdx,
    checked_int: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    match (force_number(ev, a, pos)?, force_number(ev, b, pos)?) {
        (Number::Int(x), Number::Int(y)) => {
            checked_int(x, y).map(Value::Int).ok_or_else(|| EvalError::eval(EvalErrorKind::IntegerOverflow, pos))
        }
        (Number::Int(x), Number::Float(y)) => Ok(Value::Float(float_op(x as f64, y))),
        (Number::Float(x), Number::Int(y)) => Ok(Value::Float(float_op(x, y as f64))),
        (Number::Float(x), Number::Float(y)) => Ok(Value::Float(float_op(x, y))),
    }
}

fn div(ev: &mut Evaluator, a: Value, b: Value, pos: PosIdx) -> EvalResult<Value> {
    match (force_number(ev, a, pos)?, force_number(ev, b, pos)?) {
        (Number::Int(_), Number::Int(0)) => Err(EvalError::eval(EvalErrorKind::DivisionByZero, pos)),
        (Number::Int(x), Number::Int(y)) => {
            // Nix integer division truncates toward zero, same as Rust's `/`.
            x.checked_div(y).map(Value::Int).ok_or_else(|| EvalError::eval(EvalErrorKind::IntegerOverflow, pos))
        }
        (Number::Int(x), Number::Float(y)) => Ok(Value::Float(x as f64 / y)),
        (Number::Float(x), Number::Int(y)) => Ok(Value::Float(x / y as f64)),
        (Number::Float(x), Number::Float(y)) => Ok(Value::Float(x / y)),
    }
}

fn bitwise(ev: &mut Evaluator, a: Value, b: Value, pos: PosIdx, op: fn(i64, i64) -> i64) -> EvalResult<Value> {
    let x = ev.force_int(a, pos)?;
    let y = ev.force_int(b, pos)?;
    Ok(Value::Int(op(x, y)))
}

fn less_than(ev: &mut Evaluator, a: Value, b: Value, pos: PosIdx) -> EvalResult<Value> {
    let result = match (force_number(ev, a, pos)?, force_number(ev, b, pos)?) {
        (Number::Int(x), Number::Int(y)) => x < y,
        (Number::Int(x), Number::Float(y)) => (x as f64) < y,
        (Number::Float(x), Number::Int(y)) => x < y as f64,
        (Number::Float(x), Number::Float(y)) => x < y,
    };
    Ok(Value::Bool(result))
}

fn round(ev: &mut Evaluator, a: Value, pos: PosIdx, op: fn(f64) -> f64) -> EvalResult<Value> {
    match force_number(ev, a, pos)? {
        Number::Int(i) => Ok(Value::Int(i)),
        Number::Float(f) => {
            let rounded = op(f);
            if !rounded.is_finite() || rounded > i64::MAX as f64 || rounded < i64::MIN as f64 {
                return Err(EvalError::eval(EvalErrorKind::IntegerOverflow, pos));
            }
            Ok(Value::Int(rounded as i64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EvalSettings;
    use crate::source::MemorySourceResolver;
    use crate::store::NullStore;

    fn new_evaluator() -> Evaluator {
        Evaluator::new(EvalSettings::unrestricted(), NullStore, MemorySourceResolver::new())
    }

    #[test]
    fn add_keeps_ints_integral() {
        let mut ev = new_evaluator();
        let v = call(&mut ev, PrimOp::Add, vec![Value::Int(2), Value::Int(3)], PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(5)));
    }

    #[test]
    fn add_widens_to_float_when_mixed() {
        let mut ev = new_evaluator();
        let v = call(&mut ev, PrimOp::Add, vec![Value::Int(2), Value::Float(0.5)], PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Float(f) if (f - 2.5).abs() < f64::EPSILON));
    }

    #[test]
    fn div_by_zero_int_errors() {
        let mut ev = new_evaluator();
        let err = call(&mut ev, PrimOp::Div, vec![Value::Int(1), Value::Int(0)], PosIdx::NONE).unwrap_err();
        assert!(matches!(err, EvalError::Eval { kind: EvalErrorKind::DivisionByZero, .. }));
    }

    #[test]
    fn add_overflow_errors() {
        let mut ev = new_evaluator();
        let err = call(&mut ev, PrimOp::Add, vec![Value::Int(i64::MAX), Value::Int(1)], PosIdx::NONE).unwrap_err();
        assert!(matches!(err, EvalError::Eval { kind: EvalErrorKind::IntegerOverflow, .. }));
    }

    #[test]
    fn less_than_compares_mixed_numbers() {
        let mut ev = new_evaluator();
        let v = call(&mut ev, PrimOp::LessThan, vec![Value::Int(1), Value::Float(1.5)], PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn floor_truncates_toward_negative_infinity() {
        let mut ev = new_evaluator();
        let v = call(&mut ev, PrimOp::Floor, vec![Value::Float(-1.5)], PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(-2)));
    }
}
