//! `builtins.genericClosure`: breadth-first fixed-point iteration over
//! `operator`, deduplicating by each element's `key` attribute.

use crate::eval::Evaluator;
use crate::exception::{EvalError, EvalResult};
use crate::pos::PosIdx;
use crate::value::Value;

pub fn call(ev: &mut Evaluator, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    let attrs = ev.force_attrs(args[0].clone(), pos)?;
    let start_set_sym = ev.well_known.start_set;
    let operator_sym = ev.well_known.operator;
    let key_sym = ev.well_known.key;

    let start_set =
        attrs.get(start_set_sym).ok_or_else(|| EvalError::missing_attribute(pos, "startSet"))?.value.clone();
    let operator = attrs.get(operator_sym).ok_or_else(|| EvalError::missing_attribute(pos, "operator"))?.value.clone();

    let mut pending: Vec<Value> = ev.force_list(start_set, pos)?.iter().cloned().collect();
    let mut seen_keys: Vec<Value> = Vec::new();
    let mut result = Vec::new();

    while let Some(item) = pending.pop() {
        let item_attrs = ev.force_attrs(item.clone(), pos)?;
        let key = item_attrs.get(key_sym).ok_or_else(|| EvalError::missing_attribute(pos, "key"))?.value.clone();
        let key = ev.force(key)?;
        let mut already_seen = false;
        for seen in &seen_keys {
            if ev.values_equal(seen.clone(), key.clone(), pos)? {
                already_seen = true;
                break;
            }
        }
        if already_seen {
            continue;
        }
        seen_keys.push(key);
        result.push(Value::Attrs(item_attrs));
        let next = ev.call_function(operator.clone(), item, pos)?;
        let next_items = ev.force_list(next, pos)?;
        pending.extend(next_items.iter().cloned());
    }

    // `genericClosure` returns elements ordered by ascending key; Nix sorts
    // rather than preserving discovery order.
    sort_by_key(ev, &mut result, key_sym, pos)?;
    Ok(Value::list(result))
}

fn sort_by_key(ev: &mut Evaluator, items: &mut Vec<Value>, key_sym: crate::intern::Symbol, pos: PosIdx) -> EvalResult<()> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let attrs = ev.force_attrs(item.clone(), pos)?;
        let key = attrs.get(key_sym).expect("already validated above").value.clone();
        keyed.push((ev.force(key)?, item));
    }
    // Insertion sort: the number of elements in a closure is small in
    // practice and this avoids requiring `Ord` on arbitrary key values,
    // which Nix keys (usually ints or strings) don't uniformly provide
    // through this evaluator's `Value` type.
    let mut out: Vec<(Value, Value)> = Vec::with_capacity(keyed.len());
    'outer: for (key, item) in keyed {
        for i in 0..out.len() {
            if key_less_than(ev, &key, &out[i].0, pos)? {
                out.insert(i, (key, item));
                continue 'outer;
            }
        }
        out.push((key, item));
    }
    items.extend(out.into_iter().map(|(_, item)| item));
    Ok(())
}

fn key_less_than(ev: &mut Evaluator, a: &Value, b: &Value, pos: PosIdx) -> EvalResult<bool> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x < y),
        (Value::Float(x), Value::Float(y)) => Ok(x < y),
        (Value::Int(x), Value::Float(y)) => Ok((*x as f64) < *y),
        (Value::Float(x), Value::Int(y)) => Ok(*x < *y as f64),
        (Value::String(x), Value::String(y)) => Ok(x.as_str() < y.as_str()),
        _ => {
            let _ = ev;
            Err(EvalError::custom(pos, "genericClosure: keys must be ints, floats, or strings"))
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
    fn closure_walks_operator_to_fixed_point() {
        let mut ev = new_evaluator();
        let v = ev
            .eval_source(
                "builtins.genericClosure { startSet = [{key=1;}]; operator = x: if x.key < 3 then [{key = x.key+1;}] else []; }",
                "<test>",
            )
            .unwrap();
        let v = ev.force_deep(v).unwrap();
        let Value::List(items) = v else { panic!("expected list") };
        assert_eq!(items.len(), 3);
        let key_sym = ev.well_known.key;
        let mut keys = Vec::new();
        for item in items.iter() {
            let Value::Attrs(a) = item else { panic!("expected attrs") };
            let Value::Int(k) = a.get(key_sym).unwrap().value else { panic!("expected int key") };
            keys.push(k);
        }
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
