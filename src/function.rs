//! Binding a lambda's formal arguments against a call argument.
//!
//! Repurposed from the teacher's `Function` (a compiled-bytecode function
//! descriptor with cell/closure bookkeeping that the expression-tree
//! evaluator here has no use for): this module keeps only the concern that
//! survives as a bytecode VM becomes a tree-walker — matching one call
//! argument against a lambda's [`Pattern`], which for an attrset pattern
//! means resolving defaults, checking for missing/unexpected attributes,
//! and (with `@alias`) binding the whole argument too.

use std::rc::Rc;

use crate::exception::{EvalError, EvalResult};
use crate::expr::{Formal, Pattern};
use crate::heap::Bindings;
use crate::namespace::Env;
use crate::pos::PosIdx;
use crate::value::{Thunk, Value};

/// Binds `arg` against `pattern` into `frame`.
///
/// `frame` must already be allocated with the slot count `resolve.rs`
/// assigned this lambda (formals in sorted order at displacements
/// `0..formals.len()`, the `@alias` binding, if any, at displacement
/// `formals.len()` — the convention `resolve.rs`'s lambda-frame sizing and
/// this function both follow).
///
/// For [`Pattern::Simple`], `arg` is stored directly at displacement 0,
/// unforced: simple-pattern lambdas never need to inspect their argument's
/// shape, so there is nothing here to force eagerly.
///
/// For [`Pattern::Attrs`], `arg` must already be forced to `Value::Attrs` by
/// the caller (reading which keys were passed requires at least WHNF, even
/// though the individual attribute values stay lazy).
pub fn bind_pattern(pattern: &Pattern, arg: Value, frame: &Rc<Env>, call_pos: PosIdx) -> EvalResult<()> {
    match pattern {
        Pattern::Simple { .. } => {
            frame.set(0, arg);
            Ok(())
        }
        Pattern::Attrs { formals, ellipsis, alias } => {
            let Value::Attrs(attrs) = &arg else {
                return Err(EvalError::type_error(call_pos, "set", arg.type_name()));
            };
            if !*ellipsis {
                reject_unexpected_attrs(attrs, formals, call_pos)?;
            }
            for (i, formal) in formals.iter().enumerate() {
                let value = match attrs.get(formal.name) {
                    Some(binding) => binding.value.clone(),
                    None => match &formal.default {
                        Some(default_expr) => {
                            Value::Thunk(Thunk::suspended(Rc::clone(default_expr), Rc::clone(frame)))
                        }
                        None => return Err(EvalError::missing_argument(call_pos, formal.name)),
                    },
                };
                frame.set(i as u16, value);
            }
            if alias.is_some() {
                frame.set(formals.len() as u16, Value::Attrs(Rc::clone(attrs)));
            }
            Ok(())
        }
    }
}

/// With no `...` in the pattern, every attribute the caller passed must be
/// named by some formal.
fn reject_unexpected_attrs(attrs: &Bindings, formals: &[Formal], call_pos: PosIdx) -> EvalResult<()> {
    for binding in attrs.iter() {
        if formals.binary_search_by_key(&binding.name, |f| f.name).is_err() {
            return Err(EvalError::unexpected_argument(call_pos, binding.name));
        }
    }
    Ok(())
}

/// Number of frame slots `pattern` needs: used by `resolve.rs` when sizing a
/// lambda's call frame (formals plus, for attrset patterns, one more for an
/// `@alias` if present).
pub fn pattern_slot_count(pattern: &Pattern) -> u16 {
    match pattern {
        Pattern::Simple { .. } => 1,
        Pattern::Attrs { formals, alias, .. } => formals.len() as u16 + u16::from(alias.is_some()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Binding as HeapBinding;
    use crate::intern::SymbolTable;

    #[test]
    fn simple_pattern_binds_whole_argument() {
        let root = Env::root();
        let frame = Env::child(Rc::clone(&root), 1, Value::Null);
        let mut symbols = SymbolTable::new();
        let name = symbols.intern("x");
        let pattern = Pattern::Simple { name, pos: PosIdx::NONE };
        bind_pattern(&pattern, Value::Int(42), &frame, PosIdx::NONE).unwrap();
        assert!(matches!(frame.get(0), Value::Int(42)));
    }

    #[test]
    fn attrs_pattern_rejects_unexpected_without_ellipsis() {
        let mut symbols = SymbolTable::new();
        let a = symbols.intern("a");
        let b = symbols.intern("b");
        let pattern = Pattern::Attrs {
            formals: vec![Formal { name: a, default: None, pos: PosIdx::NONE }],
            ellipsis: false,
            alias: None,
        };
        let attrs = Bindings::build(vec![HeapBinding { name: b, pos: PosIdx::NONE, value: Value::Int(1) }]);
        let root = Env::root();
        let frame = Env::child(Rc::clone(&root), 1, Value::Null);
        let err = bind_pattern(&pattern, Value::Attrs(attrs), &frame, PosIdx::NONE).unwrap_err();
        assert!(matches!(err, EvalError::Eval { .. }));
    }

    #[test]
    fn attrs_pattern_fills_default_as_lazy_thunk() {
        let mut symbols = SymbolTable::new();
        let a = symbols.intern("a");
        let pattern = Pattern::Attrs {
            formals: vec![Formal {
                name: a,
                default: Some(Rc::new(crate::expr::Expr::Int(7))),
                pos: PosIdx::NONE,
            }],
            ellipsis: false,
            alias: None,
        };
        let attrs = Bindings::build(vec![]);
        let root = Env::root();
        let frame = Env::child(Rc::clone(&root), 1, Value::Null);
        bind_pattern(&pattern, Value::Attrs(attrs), &frame, PosIdx::NONE).unwrap();
        assert!(matches!(frame.get(0), Value::Thunk(_)));
    }
}
