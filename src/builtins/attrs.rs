//! Attribute-set primops: introspecting, merging, and reshaping `Bindings`.

use crate::eval::Evaluator;
use crate::exception::{EvalError, EvalResult};
use crate::heap::{Binding, Bindings};
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::AttrNames => attr_names(ev, args[0].clone(), pos),
        PrimOp::AttrValues => attr_values(ev, args[0].clone(), pos),
        PrimOp::GetAttr => get_attr(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::HasAttr => has_attr(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::RemoveAttrs => remove_attrs(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::ListToAttrs => list_to_attrs(ev, args[0].clone(), pos),
        PrimOp::IntersectAttrs => intersect_attrs(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::CatAttrs => cat_attrs(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::FunctionArgs => function_args(ev, args[0].clone(), pos),
        PrimOp::MapAttrs => map_attrs(ev, args[0].clone(), args[1].clone(), pos),
        PrimOp::ZipAttrsWith => zip_attrs_with(ev, args[0].clone(), args[1].clone(), pos),
        _ => unreachable!("attrs::call only handles its own PrimOp variants"),
    }
}

/// Sorted lexicographically by name, matching the caller-visible attrset
/// ordering real Nix exposes (the internal `Bindings` order is by `Symbol`
/// id — interning order — which has no relation to spelling).
fn attr_names(ev: &mut Evaluator, set: Value, pos: PosIdx) -> EvalResult<Value> {
    let attrs = ev.force_attrs(set, pos)?;
    let mut names: Vec<&str> = attrs.iter().map(|b| ev.symbols.get(b.name)).collect();
    names.sort_unstable();
    Ok(Value::list(names.into_iter().map(Value::string).collect::<Vec<_>>()))
}

fn attr_values(ev: &mut Evaluator, set: Value, pos: PosIdx) -> EvalResult<Value> {
    let attrs = ev.force_attrs(set, pos)?;
    let mut pairs: Vec<(&str, Value)> = attrs.iter().map(|b| (ev.symbols.get(b.name), b.value.clone())).collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Ok(Value::list(pairs.into_iter().map(|(_, v)| v).collect::<Vec<_>>()))
}

fn get_attr(ev: &mut Evaluator, name: Value, set: Value, pos: PosIdx) -> EvalResult<Value> {
    let name = ev.force_string(name, pos)?;
    let attrs = ev.force_attrs(set, pos)?;
    let sym = ev.symbols.intern(name.as_str());
    match attrs.get(sym) {
        Some(binding) => ev.force(binding.value.clone()),
        None => Err(EvalError::missing_attribute(pos, name.as_str().to_string())),
    }
}

fn has_attr(ev: &mut Evaluator, name: Value, set: Value, pos: PosIdx) -> EvalResult<Value> {
    let name = ev.force_string(name, pos)?;
    let attrs = ev.force_attrs(set, pos)?;
    let sym = ev.symbols.intern(name.as_str());
    Ok(Value::Bool(attrs.get(sym).is_some()))
}

fn remove_attrs(ev: &mut Evaluator, set: Value, names: Value, pos: PosIdx) -> EvalResult<Value> {
    let attrs = ev.force_attrs(set, pos)?;
    let names_list = ev.force_list(names, pos)?;
    let mut drop = std::collections::HashSet::new();
    for item in names_list.iter() {
        let s = ev.force_string(item.clone(), pos)?;
        drop.insert(ev.symbols.intern(s.as_str()));
    }
    let kept: Vec<Binding> = attrs.iter().filter(|b| !drop.contains(&b.name)).cloned().collect();
    Ok(Value::Attrs(Bindings::build(kept)))
}

/// `[{name=...; value=...;} ...] -> {...}`. Real Nix keeps the *first*
/// occurrence of a duplicate name, the opposite of the "last writer wins"
/// rule [`Bindings::build`] applies for `//` and `rec`/`__overrides`, so
/// duplicates are filtered out by hand before handing the unique set to
/// `Bindings::build`.
fn list_to_attrs(ev: &mut Evaluator, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let items = ev.force_list(list, pos)?;
    let name_sym = ev.symbols.intern("name");
    let value_sym = ev.well_known.value;
    let mut bindings: Vec<Binding> = Vec::with_capacity(items.len());
    let mut seen = std::collections::HashSet::new();
    for item in items.iter() {
        let entry = ev.force_attrs(item.clone(), pos)?;
        let name_binding =
            entry.get(name_sym).ok_or_else(|| EvalError::missing_attribute(pos, "name"))?.value.clone();
        let name_str = ev.force_string(name_binding, pos)?;
        let sym = ev.symbols.intern(name_str.as_str());
        if !seen.insert(sym) {
            continue;
        }
        let value = entry.get(value_sym).ok_or_else(|| EvalError::missing_attribute(pos, "value"))?.value.clone();
        bindings.push(Binding { name: sym, pos, value });
    }
    Ok(Value::Attrs(Bindings::build(bindings)))
}

/// The attributes of `e2` that also exist (under any value) in `e1`.
fn intersect_attrs(ev: &mut Evaluator, e1: Value, e2: Value, pos: PosIdx) -> EvalResult<Value> {
    let a1 = ev.force_attrs(e1, pos)?;
    let a2 = ev.force_attrs(e2, pos)?;
    let kept: Vec<Binding> = a2.iter().filter(|b| a1.get(b.name).is_some()).cloned().collect();
    Ok(Value::Attrs(Bindings::build(kept)))
}

fn cat_attrs(ev: &mut Evaluator, attr_name: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let name = ev.force_string(attr_name, pos)?;
    let sym = ev.symbols.intern(name.as_str());
    let items = ev.force_list(list, pos)?;
    let mut out = Vec::new();
    for item in items.iter() {
        let set = ev.force_attrs(item.clone(), pos)?;
        if let Some(binding) = set.get(sym) {
            out.push(binding.value.clone());
        }
    }
    Ok(Value::list(out))
}

/// `{}` for anything but a `Simple`/`Attrs`-pattern lambda — including a
/// (possibly partially applied) primop, per the documented quirk every
/// replacement implementation is asked to preserve.
fn function_args(ev: &mut Evaluator, f: Value, pos: PosIdx) -> EvalResult<Value> {
    let forced = ev.force(f)?;
    match forced {
        Value::Lambda(lambda_value) => {
            let crate::expr::Expr::Lambda(lambda) = lambda_value.lambda.as_ref() else {
                unreachable!("Value::Lambda always wraps Expr::Lambda")
            };
            match &lambda.pattern {
                crate::expr::Pattern::Attrs { formals, .. } => {
                    let bindings: Vec<Binding> = formals
                        .iter()
                        .map(|formal| Binding { name: formal.name, pos, value: Value::Bool(formal.default.is_some()) })
                        .collect();
                    Ok(Value::Attrs(Bindings::build(bindings)))
                }
                crate::expr::Pattern::Simple { .. } => Ok(Value::Attrs(Bindings::empty())),
            }
        }
        Value::PrimOp(_) => Ok(Value::Attrs(Bindings::empty())),
        other => Err(EvalError::type_error(pos, "function", other.type_name())),
    }
}

fn map_attrs(ev: &mut Evaluator, f: Value, set: Value, pos: PosIdx) -> EvalResult<Value> {
    let attrs = ev.force_attrs(set, pos)?;
    let mut bindings = Vec::with_capacity(attrs.len());
    for binding in attrs.iter() {
        let name_str = ev.symbols.get(binding.name).to_string();
        let partial = ev.call_function(f.clone(), Value::string(name_str), pos)?;
        let value = ev.call_function(partial, binding.value.clone(), pos)?;
        bindings.push(Binding { name: binding.name, pos: binding.pos, value });
    }
    Ok(Value::Attrs(Bindings::build(bindings)))
}

/// Collects every name across `list`'s attrsets, then calls `f name values`
/// once per name with the list of values (in set order) that bound it.
fn zip_attrs_with(ev: &mut Evaluator, f: Value, list: Value, pos: PosIdx) -> EvalResult<Value> {
    let sets = ev.force_list(list, pos)?;
    let mut collected: indexmap::IndexMap<crate::intern::Symbol, Vec<Value>> = indexmap::IndexMap::new();
    for item in sets.iter() {
        let attrs = ev.force_attrs(item.clone(), pos)?;
        for binding in attrs.iter() {
            collected.entry(binding.name).or_default().push(binding.value.clone());
        }
    }
    let mut bindings = Vec::with_capacity(collected.len());
    for (name, values) in collected {
        let name_str = ev.symbols.get(name).to_string();
        let partial = ev.call_function(f.clone(), Value::string(name_str), pos)?;
        let value = ev.call_function(partial, Value::list(values), pos)?;
        bindings.push(Binding { name, pos, value });
    }
    Ok(Value::Attrs(Bindings::build(bindings)))
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

    fn set(ev: &mut Evaluator, pairs: &[(&str, Value)]) -> Value {
        let bindings = pairs
            .iter()
            .map(|(name, value)| Binding { name: ev.symbols.intern(name), pos: PosIdx::NONE, value: value.clone() })
            .collect();
        Value::Attrs(Bindings::build(bindings))
    }

    #[test]
    fn attr_names_sorted_alphabetically() {
        let mut ev = new_evaluator();
        let s = set(&mut ev, &[("b", Value::Int(1)), ("a", Value::Int(2))]);
        let v = attr_names(&mut ev, s, PosIdx::NONE).unwrap();
        let Value::List(l) = v else { panic!("expected list") };
        let names: Vec<&str> = l.iter().map(|v| if let Value::String(s) = v { s.as_str() } else { "" }).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn remove_attrs_drops_named_keys() {
        let mut ev = new_evaluator();
        let s = set(&mut ev, &[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let names = Value::list(vec![Value::string("a")]);
        let v = remove_attrs(&mut ev, s, names, PosIdx::NONE).unwrap();
        let Value::Attrs(a) = v else { panic!("expected attrs") };
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn list_to_attrs_keeps_first_duplicate() {
        let mut ev = new_evaluator();
        let name_sym = ev.symbols.intern("name");
        let value_sym = ev.well_known.value;
        let make = |ev: &mut Evaluator, n: &str, v: i64| {
            Value::Attrs(Bindings::build(vec![
                Binding { name: name_sym, pos: PosIdx::NONE, value: Value::string(n) },
                Binding { name: value_sym, pos: PosIdx::NONE, value: Value::Int(v) },
            ]))
        };
        let list = Value::list(vec![make(&mut ev, "a", 1), make(&mut ev, "a", 2)]);
        let v = list_to_attrs(&mut ev, list, PosIdx::NONE).unwrap();
        let Value::Attrs(a) = v else { panic!("expected attrs") };
        let a_sym = ev.symbols.intern("a");
        assert!(matches!(a.get(a_sym).unwrap().value, Value::Int(1)));
    }
}
