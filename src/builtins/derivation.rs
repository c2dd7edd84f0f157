//! `derivationStrict`, `derivation`, and `placeholder`.
//!
//! `derivationStrict` is already fully implemented as
//! [`Evaluator::derivation_strict`], which is the piece that actually needs
//! an `Evaluator` (forcing and string-coercing the input attrset, then
//! handing plain data to [`crate::derivation::build_derivation`]). This
//! file is the thin primop-dispatch layer over it, plus the two builtins
//! that don't need the evaluator at all.

use crate::eval::Evaluator;
use crate::exception::EvalResult;
use crate::heap::{Binding, Bindings};
use crate::pos::PosIdx;
use crate::value::Value;

use super::PrimOp;

pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    match op {
        PrimOp::DerivationStrict => ev.derivation_strict(args[0].clone(), pos),
        PrimOp::Placeholder => placeholder(ev, args[0].clone(), pos),
        PrimOp::Derivation => derivation(ev, args[0].clone(), pos),
        _ => unreachable!("derivation::call only handles its own PrimOp variants"),
    }
}

fn placeholder(ev: &mut Evaluator, output_name: Value, pos: PosIdx) -> EvalResult<Value> {
    let name = ev.force_string(output_name, pos)?;
    Ok(Value::string(crate::derivation::hash_placeholder(name.as_str())))
}

/// The public `derivation` function: runs `derivationStrict` on its
/// argument eagerly (a real Nix evaluator normally defers this behind
/// `outPath`'s own laziness, but this evaluator has no generic delayed
/// application value to build that thunk around — see `DESIGN.md`) and
/// returns the caller's attrset overlaid with the computed `drvPath`,
/// `outPath`, `type`, and a `__toString`-equivalent via `outPath` coercion.
fn derivation(ev: &mut Evaluator, attrs: Value, pos: PosIdx) -> EvalResult<Value> {
    let user_attrs = ev.force_attrs(attrs, pos)?;
    let computed = ev.derivation_strict(Value::Attrs(user_attrs.clone()), pos)?;
    let Value::Attrs(computed_attrs) = computed else {
        unreachable!("derivation_strict always returns an attrset")
    };
    let type_sym = ev.well_known.type_;
    let mut overlay = vec![Binding { name: type_sym, pos, value: Value::string("derivation") }];
    overlay.extend(computed_attrs.iter().cloned());
    let result = user_attrs.merge(&Bindings::build(overlay));
    Ok(Value::Attrs(result))
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
    fn placeholder_is_deterministic() {
        let mut ev = new_evaluator();
        let Value::String(a) = placeholder(&mut ev, Value::string("out"), PosIdx::NONE).unwrap() else {
            panic!("expected string")
        };
        let Value::String(b) = placeholder(&mut ev, Value::string("out"), PosIdx::NONE).unwrap() else {
            panic!("expected string")
        };
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn derivation_sets_type_and_out_path() {
        let mut ev = new_evaluator();
        let bindings = vec![
            Binding { name: ev.symbols.intern("name"), pos: PosIdx::NONE, value: Value::string("foo") },
            Binding { name: ev.symbols.intern("system"), pos: PosIdx::NONE, value: Value::string("x86_64-linux") },
            Binding { name: ev.symbols.intern("builder"), pos: PosIdx::NONE, value: Value::string("/bin/sh") },
        ];
        let attrs = Value::Attrs(Bindings::build(bindings));
        let v = derivation(&mut ev, attrs, PosIdx::NONE).unwrap();
        let Value::Attrs(a) = v else { panic!("expected attrs") };
        let type_sym = ev.well_known.type_;
        assert!(matches!(&a.get(type_sym).unwrap().value, Value::String(s) if s.as_str() == "derivation"));
        let out_path_sym = ev.well_known.out_path;
        assert!(a.get(out_path_sym).is_some());
    }
}
