//! `toJSON`/`fromJSON`/`toXML`/`fromTOML`: thin glue between the primop
//! dispatch and the format-conversion logic in `crate::json`, which needs
//! only a fully-forced value tree, not an `Evaluator`.

use crate::eval::Evaluator;
use crate::exception::{EvalError, EvalResult};
use crate::json;
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::ToJSON => to_json(ev, args[0].clone(), pos),
        PrimOp::FromJSON => from_json(ev, args[0].clone(), pos),
        PrimOp::ToXML => to_xml(ev, args[0].clone(), pos),
        PrimOp::FromTOML => from_toml(ev, args[0].clone(), pos),
        _ => unreachable!("structured::call only handles its own PrimOp variants"),
    }
}

fn to_json(ev: &mut Evaluator, value: Value, pos: PosIdx) -> EvalResult<Value> {
    let forced = ev.force_deep(value)?;
    let json = json::to_json(&forced, &ev.symbols, pos)?;
    let text = serde_json::to_string(&json)
        .map_err(|e| EvalError::custom(pos, format!("failed to serialize JSON: {e}")))?;
    Ok(Value::string(text))
}

fn from_json(ev: &mut Evaluator, value: Value, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.force_string(value, pos)?;
    let json: serde_json::Value = serde_json::from_str(s.as_str())
        .map_err(|e| EvalError::custom(pos, format!("invalid JSON: {e}")))?;
    Ok(json::from_json(&json, &mut ev.symbols))
}

fn to_xml(ev: &mut Evaluator, value: Value, pos: PosIdx) -> EvalResult<Value> {
    let forced = ev.force_deep(value)?;
    Ok(Value::string(json::to_xml(&forced, &ev.symbols)))
}

fn from_toml(ev: &mut Evaluator, value: Value, pos: PosIdx) -> EvalResult<Value> {
    let s = ev.force_string(value, pos)?;
    json::from_toml(s.as_str(), &mut ev.symbols, pos)
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
    fn to_json_renders_an_int() {
        let mut ev = new_evaluator();
        let v = to_json(&mut ev, Value::Int(42), PosIdx::NONE).unwrap();
        assert!(matches!(&v, Value::String(s) if s.as_str() == "42"));
    }

    #[test]
    fn from_json_round_trips_a_list() {
        let mut ev = new_evaluator();
        let v = from_json(&mut ev, Value::string("[1,2,3]"), PosIdx::NONE).unwrap();
        let Value::List(items) = v else { panic!("expected list") };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        let mut ev = new_evaluator();
        let err = from_json(&mut ev, Value::string("{not json"), PosIdx::NONE).unwrap_err();
        assert!(err.is_catchable());
    }
}
