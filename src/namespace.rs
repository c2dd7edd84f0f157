//! Evaluation environments: the runtime scope chain `Env` and its
//! parse-time shadow `StaticEnv`.
//!
//! The evaluator never looks a variable up by name. The static resolver
//! (`resolve.rs`) walks the AST once after parsing and, for every
//! [`crate::expr::ExprVar`], records a `(level, displacement)` coordinate:
//! how many enclosing frames to walk outward (`level`), and which slot in
//! that frame to read (`displacement`). At eval time, reading a variable is
//! then `env.ancestor(level).values[displacement]` — a pointer-chase and an
//! index, never a string compare.
//!
//! This mirrors the teacher's flat `Namespaces` arena in *purpose* (turn
//! lexical scope into O(1) indexed access) but not in *shape*: the teacher's
//! language has no nested function scopes reaching into ancestors at
//! arbitrary depth the way `let`/lambdas/`with` do here, so one flat,
//! depth-one namespace per call was enough. Our environments form a proper
//! linked chain, one [`Env`] frame per `let`, per lambda call, and per
//! `with`, each holding an `Rc` to its parent so closures can keep a frame
//! alive after the expression that created it has returned.

use std::cell::RefCell;
use std::rc::Rc;

use crate::intern::Symbol;
use crate::value::Value;

/// One runtime scope frame.
///
/// Slots start out filled with a placeholder value for recursive
/// `let`/`rec` bindings whose thunks capture this very `Env` before all of
/// its slots have been assigned; `set` then overwrites them once the
/// corresponding binding's thunk has been built (the thunk itself, not the
/// placeholder, is what gets forced later — the placeholder is never read).
/// This is the same "allocate the frame, then backpatch it" two-step the
/// teacher's `new_namespace` / caller code uses for mutually recursive
/// bindings, adapted from an append-only `Vec<Value>` to fixed-size
/// `RefCell` backpatching because our frame sizes are known statically.
#[derive(Debug)]
pub struct Env {
    pub up: Option<Rc<Env>>,
    values: RefCell<Vec<Value>>,
    /// Set only for the frame introduced by `with e; ...`: the attribute set
    /// to search dynamically when a variable resolves to
    /// `VarResolution::FromWith` and this is the nearest enclosing `with`.
    pub with: Option<Value>,
}

impl Env {
    /// The outermost frame: the evaluator's global scope, holding nothing
    /// but existing so every other frame has a well-defined ancestor chain
    /// to terminate at.
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            up: None,
            values: RefCell::new(Vec::new()),
            with: None,
        })
    }

    /// A fresh frame of `size` slots (a lambda call frame, a `let`'s
    /// bindings, or an attrset's `inherit (expr)` hidden frame), all
    /// initially filled with `placeholder`.
    pub fn child(up: Rc<Self>, size: u16, placeholder: Value) -> Rc<Self> {
        Rc::new(Self {
            up: Some(up),
            values: RefCell::new(vec![placeholder; size as usize]),
            with: None,
        })
    }

    /// The frame introduced by a `with` expression: no slots of its own,
    /// just the attribute set to fall back to for unresolved variables.
    pub fn child_with(up: Rc<Self>, attrs: Value) -> Rc<Self> {
        Rc::new(Self {
            up: Some(up),
            values: RefCell::new(Vec::new()),
            with: Some(attrs),
        })
    }

    /// Walks `level` frames outward from `self`.
    ///
    /// # Panics
    /// Panics if `level` exceeds the actual chain depth, which would be a
    /// static-resolver bug (a `(level, displacement)` coordinate that
    /// doesn't correspond to any real enclosing frame).
    pub fn ancestor(self: &Rc<Self>, level: u16) -> Rc<Self> {
        let mut env = Rc::clone(self);
        for _ in 0..level {
            env = Rc::clone(env.up.as_ref().expect("static resolver produced an invalid level"));
        }
        env
    }

    /// Reads slot `displacement` in `self` directly (`level` already
    /// resolved to this frame by the caller via [`Env::ancestor`]).
    pub fn get(&self, displacement: u16) -> Value {
        self.values.borrow()[displacement as usize].clone()
    }

    /// Fills slot `displacement`, backpatching a frame created with a
    /// placeholder value.
    pub fn set(&self, displacement: u16, value: Value) {
        self.values.borrow_mut()[displacement as usize] = value;
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The static resolver's shadow of [`Env`]: one `StaticEnv` frame per scope
/// the resolver descends into, used only during resolution and discarded
/// once every `ExprVar` in the tree has had its `resolution` cell filled in.
///
/// Kept as a simple linked list built on the Rust call stack (the resolver
/// is itself a recursive AST walk) rather than as an arena, since static
/// environments never outlive the resolution pass.
pub struct StaticEnv<'a> {
    pub up: Option<&'a StaticEnv<'a>>,
    /// Symbols bound directly in this frame, in displacement order. `None`
    /// for the hidden "hole" slot introduced by an `inherit (expr)` clause's
    /// synthetic frame, which has size but no names.
    vars: Vec<Symbol>,
    /// Whether this frame is introduced by `with e; ...`: an unresolved
    /// lookup continuing past this frame should first be recorded as
    /// "reachable via a `with`" before continuing outward, even if an
    /// enclosing frame later resolves it statically.
    pub is_with: bool,
}

impl<'a> StaticEnv<'a> {
    pub fn root() -> Self {
        Self { up: None, vars: Vec::new(), is_with: false }
    }

    pub fn child(up: &'a StaticEnv<'a>, vars: Vec<Symbol>) -> Self {
        Self { up: Some(up), vars, is_with: false }
    }

    pub fn with(up: &'a StaticEnv<'a>) -> Self {
        Self { up: Some(up), vars: Vec::new(), is_with: true }
    }

    /// Displacement of `name` within this frame only (no ancestor search).
    pub fn local_displacement(&self, name: Symbol) -> Option<u16> {
        self.vars.iter().position(|&s| s == name).map(|i| i as u16)
    }

    pub fn len(&self) -> u16 {
        self.vars.len() as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_walks_expected_depth() {
        let root = Env::root();
        let f1 = Env::child(Rc::clone(&root), 1, Value::Null);
        let f2 = Env::child(Rc::clone(&f1), 1, Value::Null);
        f1.set(0, Value::Int(1));
        f2.set(0, Value::Int(2));
        assert!(matches!(f2.ancestor(0).get(0), Value::Int(2)));
        assert!(matches!(f2.ancestor(1).get(0), Value::Int(1)));
    }

    #[test]
    fn with_frame_has_no_slots() {
        let root = Env::root();
        let w = Env::child_with(root, Value::Null);
        assert!(w.is_empty());
        assert!(w.with.is_some());
    }

    #[test]
    fn static_env_finds_local_displacement() {
        let root = StaticEnv::root();
        let sym = Symbol::default();
        let frame = StaticEnv::child(&root, vec![sym]);
        assert_eq!(frame.local_displacement(sym), Some(0));
    }
}
