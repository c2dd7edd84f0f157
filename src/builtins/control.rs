//! Control-flow primops: error handling, forcing, and diagnostics.

use crate::eval::{CoercionMode, Evaluator};
use crate::exception::{EvalError, EvalResult};
use crate::heap::{Binding, Bindings};
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::TryEval => try_eval(ev, args[0].clone(), pos),
        PrimOp::Throw => throw(ev, args[0].clone(), pos),
        PrimOp::Abort => abort(ev, args[0].clone(), pos),
        PrimOp::AddErrorContext => add_error_context(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Seq => seq(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::DeepSeq => deep_seq(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Trace => trace(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Break => break_point(ev, args[0].clone()),
        _ => unreachable!("control::call only handles its own PrimOp variants"),
    }
}

/// A debugger breakpoint: forces its argument and hands it back unchanged.
/// Plugging an interactive debugger in means implementing [`crate::tracer::VmTracer::on_error`]
/// or wrapping `force` — `break` itself carries no special behavior here
/// beyond the forcing `tryEval`-style builtins already require.
fn break_point(ev: &mut Evaluator, value: Value) -> EvalResult<Value> {
    ev.force(value)
}

/// `tryEval e` never propagates a catchable failure: it reports
/// `{ success = false; value = false; }` instead, matching Nix's own
/// "`value` is meaningless on failure" contract. Uncatchable errors (stack
/// depth, cancellation) still propagate, the same as `UncatchableKind` is
/// documented to bypass `tryEval` everywhere else in the evaluator.
fn try_eval(ev: &mut Evaluator, expr: Value, pos: PosIdx) -> EvalResult<Value> {
    let success_sym = ev.well_known.success;
    let value_sym = ev.well_known.value;
    match ev.force(expr) {
        Ok(v) => {
            let bindings = vec![
                Binding { name: success_sym, pos, value: Value::Bool(true) },
                Binding { name: value_sym, pos, value: v },
            ];
            Ok(Value::Attrs(Bindings::build(bindings)))
        }
        Err(err) if err.is_catchable() => {
            let bindings = vec![
                Binding { name: success_sym, pos, value: Value::Bool(false) },
                Binding { name: value_sym, pos, value: Value::Bool(false) },
            ];
            Ok(Value::Attrs(Bindings::build(bindings)))
        }
        Err(err) => Err(err),
    }
}

fn throw(ev: &mut Evaluator, message: Value, pos: PosIdx) -> EvalResult<Value> {
    let message = ev.coerce_to_string(message, CoercionMode::ToString, pos)?;
    Err(EvalError::thrown(pos, message))
}

fn abort(ev: &mut Evaluator, message: Value, pos: PosIdx) -> EvalResult<Value> {
    let message = ev.coerce_to_string(message, CoercionMode::ToString, pos)?;
    Err(EvalError::custom(pos, format!("evaluation aborted: {}", message.as_str())))
}

fn add_error_context(ev: &mut Evaluator, context: Value, expr: Value, pos: PosIdx) -> EvalResult<Value> {
    // Force `context` only to validate it coerces to a string; the context
    // message itself is a debugging aid Nix attaches to a trace, not data
    // this evaluator's trimmed `TraceFrame` carries through as text.
    let _ = ev.coerce_to_string(context, CoercionMode::ToString, pos)?;
    ev.force(expr)
}

fn seq(ev: &mut Evaluator, a: Value, b: Value, pos: PosIdx) -> EvalResult<Value> {
    let _ = ev.force(a)?;
    let _ = pos;
    ev.force(b)
}

fn deep_seq(ev: &mut Evaluator, a: Value, b: Value, pos: PosIdx) -> EvalResult<Value> {
    let _ = ev.force_deep(a)?;
    let _ = pos;
    ev.force(b)
}

fn trace(ev: &mut Evaluator, message: Value, value: Value, pos: PosIdx) -> EvalResult<Value> {
    let message = ev.coerce_to_string(message, CoercionMode::ToString, pos)?;
    eprintln!("trace: {}", message.as_str());
    ev.force(value)
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
    fn try_eval_reports_success_for_a_good_expression() {
        let mut ev = new_evaluator();
        let v = try_eval(&mut ev, Value::Int(1), PosIdx::NONE).unwrap();
        let Value::Attrs(a) = v else { panic!("expected attrs") };
        let success_sym = ev.well_known.success;
        assert!(matches!(a.get(success_sym).unwrap().value, Value::Bool(true)));
    }

    #[test]
    fn try_eval_catches_a_thrown_error_through_full_evaluation() {
        let mut ev = new_evaluator();
        let v = ev.eval_source("builtins.tryEval (throw \"boom\")", "<test>").unwrap();
        let v = ev.force_deep(v).unwrap();
        let Value::Attrs(a) = v else { panic!("expected attrs") };
        let success_sym = ev.well_known.success;
        assert!(matches!(a.get(success_sym).unwrap().value, Value::Bool(false)));
    }

    #[test]
    fn throw_produces_catchable_error() {
        let mut ev = new_evaluator();
        let err = throw(&mut ev, Value::string("boom"), PosIdx::NONE).unwrap_err();
        assert!(err.is_catchable());
    }

    #[test]
    fn seq_forces_first_arg_before_returning_second() {
        let mut ev = new_evaluator();
        let v = seq(&mut ev, Value::Int(1), Value::Int(2), PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(2)));
    }
}
