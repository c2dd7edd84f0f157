//! List primops.

use crate::eval::Evaluator;
use crate::exception::{EvalError, EvalErrorKind, EvalResult};
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::Head => head(ev, args[0].clone(), pos),
        PrimOp::Tail => tail(ev, args[0].clone(), pos),
        PrimOp::ElemAt => elem_at(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Length => length(ev, args[0].clone(), pos),
        PrimOp::Map => map(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Filter => filter(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Elem => elem(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::ConcatLists => concat_lists(ev, args[0].clone(), pos),
        PrimOp::ConcatMap => concat_map(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::FoldlPrime => foldl_prime(ev, args[0].clone(), args[1].clone(), args[2].clone(), pos),
        PrimOp::Any => any(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::All => all(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::GenList => gen_list(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Sort => sort(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::Partition => partition(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::GroupBy => group_by(ev, args[0].clone(), args[1].clone(), pos),
        _ => unreachable!("lists::call only handles its own PrimOp variants"),
    }
}

fn head(ev: &mut Evaluator, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    items.first().cloned().map(Ok).unwrap_or_else(|| {
        Err(EvalError::eval(EvalErrorKind::IndexOutOfBounds { index: 0, len: 0 }, pos))
    })
}

fn tail(ev: &mut Evaluator, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    if items.is_empty() {
        return Err(EvalError::custom(pos, "tail called on an empty list"));
    }
    Ok(Value::list(items[1..].to_vec()))
}

fn elem_at(ev: &mut Evaluator, list: Value, index: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let idx = ev.force_int(index, pos)?;
    if idx < 0 || idx as usize >= items.len() {
        return Err(EvalError::eval(EvalErrorKind::IndexOutOfBounds { index: idx, len: items.len() }, pos));
    }
    Ok(items[idx as usize].clone())
}

fn length(ev: &mut Evaluator, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    Ok(Value::Int(items.len() as i64))
}

fn map(ev: &mut Evaluator, f: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items.iter() {
        out.push(ev.call_function(f.clone(), item.clone(), pos)?);
    }
    Ok(Value::list(out))
}

fn filter(ev: &mut Evaluator, pred: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items.iter() {
        let keep = ev.call_function(pred.clone(), item.clone(), pos)?;
        if ev.force_bool(keep, pos)? {
            out.push(item.clone());
        }
    }
    Ok(Value::list(out))
}

fn elem(ev: &mut Evaluator, needle: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    for item in items.iter() {
        if ev.values_equal(needle.clone(), item.clone(), pos)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn concat_lists(ev: &mut Evaluator, lists: Value, pos: PosIdx) -> EvalResult<Value> {
    let outer = ev.force_list(lists, pos)?;
    let mut out = Vec::new();
    for list in outer.iter() {
        let inner = ev.force_list(list.clone(), pos)?;
        out.extend(inner.iter().cloned());
    }
    Ok(Value::list(out))
}

fn concat_map(ev: &mut Evaluator, f: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let mut out = Vec::new();
    for item in items.iter() {
        let mapped = ev.call_function(f.clone(), item.clone(), pos)?;
        let mapped_list = ev.force_list(mapped, pos)?;
        out.extend(mapped_list.iter().cloned());
    }
    Ok(Value::list(out))
}

/// Strict left fold: `op` is called on every element in order, and each
/// intermediate accumulator is forced before the next call — the "strict"
/// half of `foldl'`'s name, as opposed to a lazy `foldl` that would build an
/// unforced thunk chain.
fn foldl_prime(ev: &mut Evaluator, op: Value, init: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let mut acc = ev.force(init)?;
    for item in items.iter() {
        let partial = ev.call_function(op.clone(), acc, pos)?;
        let next = ev.call_function(partial, item.clone(), pos)?;
        acc = ev.force(next)?;
    }
    Ok(acc)
}

fn any(ev: &mut Evaluator, pred: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    for item in items.iter() {
        let result = ev.call_function(pred.clone(), item.clone(), pos)?;
        if ev.force_bool(result, pos)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn all(ev: &mut Evaluator, pred: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    for item in items.iter() {
        let result = ev.call_function(pred.clone(), item.clone(), pos)?;
        if !ev.force_bool(result, pos)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn gen_list(ev: &mut Evaluator, generator: Value, len: Value, pos: PosIdx) -> EvalResult<Value> {
    let n = ev.force_int(len, pos)?;
    if n < 0 {
        return Err(EvalError::custom(pos, "genList: cannot generate a list of negative length"));
    }
    let mut out = Vec::with_capacity(n as usize);
    for i in 0..n {
        out.push(ev.call_function(generator.clone(), Value::Int(i), pos)?);
    }
    Ok(Value::list(out))
}

/// Sorted with `cmp` used as a strict less-than comparator, matching real
/// Nix's `sort`: `cmp a b` must report whether `a` sorts before `b`. Uses an
/// insertion sort via repeated comparison rather than relying on `Ord`,
/// since `cmp` is arbitrary Nix code, not a total order Rust can see.
fn sort(ev: &mut Evaluator, cmp: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let mut out: Vec<Value> = items.iter().cloned().collect();
    // A custom merge sort so `cmp` (less-than only, not three-way) is
    // called exactly as a real comparator function would be, and the sort
    // is stable the way Nix's own is documented to be.
    merge_sort(ev, &mut out, cmp, pos)?;
    Ok(Value::list(out))
}

fn merge_sort(ev: &mut Evaluator, items: &mut [Value], cmp: Value, pos: PosIdx) -> EvalResult<()> {
    let len = items.len();
    if len <= 1 {
        return Ok(());
    }
    let mid = len / 2;
    merge_sort(ev, &mut items[..mid], cmp.clone(), pos)?;
    merge_sort(ev, &mut items[mid..], cmp.clone(), pos)?;
    let left: Vec<Value> = items[..mid].to_vec();
    let right: Vec<Value> = items[mid..].to_vec();
    let (mut i, mut j, mut k) = (0, 0, 0);
    while i < left.len() && j < right.len() {
        let less = ev.call_function(cmp.clone(), right[j].clone(), pos)?;
        let less = ev.call_function(less, left[i].clone(), pos)?;
        if ev.force_bool(less, pos)? {
            items[k] = right[j].clone();
            j += 1;
        } else {
            items[k] = left[i].clone();
            i += 1;
        }
        k += 1;
    }
    while i < left.len() {
        items[k] = left[i].clone();
        i += 1;
        k += 1;
    }
    while j < right.len() {
        items[k] = right[j].clone();
        j += 1;
        k += 1;
    }
    Ok(())
}

fn partition(ev: &mut Evaluator, pred: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let mut right = Vec::new();
    let mut wrong = Vec::new();
    for item in items.iter() {
        let result = ev.call_function(pred.clone(), item.clone(), pos)?;
        if ev.force_bool(result, pos)? {
            right.push(item.clone());
        } else {
            wrong.push(item.clone());
        }
    }
    let right_sym = ev.symbols.intern("right");
    let wrong_sym = ev.symbols.intern("wrong");
    let bindings = vec![
        crate::heap::Binding { name: right_sym, pos, value: Value::list(right) },
        crate::heap::Binding { name: wrong_sym, pos, value: Value::list(wrong) },
    ];
    Ok(Value::Attrs(crate::heap::Bindings::build(bindings)))
}

fn group_by(ev: &mut Evaluator, key_fn: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let mut groups: indexmap::IndexMap<String, Vec<Value>> = indexmap::IndexMap::new();
    for item in items.iter() {
        let key = ev.call_function(key_fn.clone(), item.clone(), pos)?;
        let key_str = ev.force_string(key, pos)?;
        groups.entry(key_str.as_str().to_string()).or_default().push(item.clone());
    }
    let bindings = groups
        .into_iter()
        .map(|(key, values)| crate::heap::Binding { name: ev.symbols.intern(&key), pos, value: Value::list(values) })
        .collect();
    Ok(Value::Attrs(crate::heap::Bindings::build(bindings)))
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
    fn head_returns_first_element() {
        let mut ev = new_evaluator();
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let v = head(&mut ev, list, PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(1)));
    }

    #[test]
    fn head_on_empty_list_errors() {
        let mut ev = new_evaluator();
        let err = head(&mut ev, Value::list(vec![]), PosIdx::NONE).unwrap_err();
        assert!(err.is_catchable());
    }

    #[test]
    fn elem_at_out_of_bounds_errors() {
        let mut ev = new_evaluator();
        let list = Value::list(vec![Value::Int(1)]);
        let err = elem_at(&mut ev, list, Value::Int(5), PosIdx::NONE).unwrap_err();
        assert!(matches!(
            err,
            EvalError::Eval { kind: EvalErrorKind::IndexOutOfBounds { .. }, .. }
        ));
    }

    #[test]
    fn length_counts_elements() {
        let mut ev = new_evaluator();
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let v = length(&mut ev, list, PosIdx::NONE).unwrap();
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn partition_splits_by_predicate() {
        let mut ev = new_evaluator();
        let is_pos = Value::PrimOp(std::rc::Rc::new(crate::value::PrimOpApp {
            op: PrimOp::LessThan,
            args: vec![Value::Int(0)],
        }));
        let list = Value::list(vec![Value::Int(-1), Value::Int(1), Value::Int(2)]);
        let v = partition(&mut ev, is_pos, list, PosIdx::NONE).unwrap();
        let Value::Attrs(a) = v else { panic!("expected attrs") };
        let right_sym = ev.symbols.intern("right");
        let Value::List(right) = &a.get(right_sym).unwrap().value else { panic!("expected list") };
        assert_eq!(right.len(), 2);
    }
}
