//! Type-introspection primops: `typeOf` and the `isX` family.
//!
//! Every one of these forces its single argument to WHNF and inspects the
//! resulting tag; none need to look any deeper than that.

use crate::eval::Evaluator;
use crate::exception::EvalResult;
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, mut args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    let arg = ev.force(args.remove(0))?;
    Ok(match op {
        PrimOp::TypeOf => Value::string(arg.type_name()),
        PrimOp::IsNull => Value::Bool(matches!(arg, Value::Null)),
        PrimOp::IsBool => Value::Bool(matches!(arg, Value::Bool(_))),
        PrimOp::IsInt => Value::Bool(matches!(arg, Value::Int(_))),
        PrimOp::IsFloat => Value::Bool(matches!(arg, Value::Float(_))),
        PrimOp::IsString => Value::Bool(matches!(arg, Value::String(_))),
        PrimOp::IsPath => Value::Bool(matches!(arg, Value::Path(_))),
        PrimOp::IsAttrs => Value::Bool(matches!(arg, Value::Attrs(_))),
        PrimOp::IsList => Value::Bool(matches!(arg, Value::List(_))),
        PrimOp::IsFunction => Value::Bool(matches!(arg, Value::Lambda(_) | Value::PrimOp(_))),
        _ => unreachable!("introspect::call only handles its own PrimOp variants"),
    })
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
    fn type_of_reports_int() {
        let mut ev = new_evaluator();
        let v = call(&mut ev, PrimOp::TypeOf, vec![Value::Int(1)], PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::String(s) if s.as_str() == "int"));
    }

    #[test]
    fn is_function_is_true_for_primops() {
        let mut ev = new_evaluator();
        let partial = Value::PrimOp(std::rc::Rc::new(crate::value::PrimOpApp { op: PrimOp::Head, args: vec![] }));
        let v = call(&mut ev, PrimOp::IsFunction, vec![partial], PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn is_null_false_for_zero() {
        let mut ev = new_evaluator();
        let v = call(&mut ev, PrimOp::IsNull, vec![Value::Int(0)], PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }
}
