//! The runtime value representation.
//!
//! `Value` is a tagged union over every kind of Nix value plus one
//! evaluator-internal kind, the thunk, that never escapes to a builtin or a
//! host caller unforced. Heap-allocated kinds (strings, paths, attribute
//! sets, lists, lambdas, partially-applied builtins, thunks) are all stored
//! behind `Rc`, so `Value::clone()` is always O(1) — deliberately simpler
//! than the teacher's manually refcounted `HeapId` arena: a single-threaded,
//! non-generational evaluator gets exactly the same "freed when the last
//! reference drops" lifetime for free from `Rc`, with no `drop_with_heap`
//! bookkeeping to get right at every call site.
//!
//! `Clone` *is* derived here, unlike the teacher's `Value` (which disables it
//! on purpose to force callers through heap-aware drop helpers): there is no
//! heap to desynchronize from, so an ordinary derive is the correct,
//! idiomatic choice.

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use smallvec::SmallVec;

/// Backing storage for [`Value::List`]: inline up to two elements (covers
/// the common `[ x ]` / `[ x y ]` cases without a heap allocation for the
/// slice itself), spilling to the heap beyond that — the same split the
/// teacher's `smallvec` usage makes elsewhere for small inline collections.
pub type ListInner = SmallVec<[Value; 2]>;

use crate::builtins::PrimOp;
use crate::context::StringContext;
use crate::expr::Expr;
use crate::heap::Bindings;
use crate::intern::Symbol;
use crate::namespace::Env;

/// An interned-free Nix string: its text plus the store-path dependencies
/// (if any) threaded through whatever string operations produced it.
///
/// The overwhelmingly common case is an empty context, which costs nothing
/// extra here since [`StringContext`] itself is a zero-allocation empty
/// `Vec` in that case.
#[derive(Debug, Clone)]
pub struct NixString(Rc<NixStringInner>);

#[derive(Debug)]
struct NixStringInner {
    text: Box<str>,
    context: StringContext,
}

impl NixString {
    pub fn new(text: impl Into<Box<str>>, context: StringContext) -> Self {
        Self(Rc::new(NixStringInner { text: text.into(), context }))
    }

    pub fn plain(text: impl Into<Box<str>>) -> Self {
        Self::new(text, StringContext::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    pub fn context(&self) -> &StringContext {
        &self.0.context
    }

    pub fn has_context(&self) -> bool {
        !self.0.context.is_empty()
    }
}

impl PartialEq for NixString {
    /// String equality in Nix compares text only; two strings with the same
    /// text but different contexts are still `==`. Context never affects
    /// equality, only which store paths a derivation depends on.
    fn eq(&self, other: &Self) -> bool {
        self.0.text == other.0.text
    }
}
impl Eq for NixString {}

/// A filesystem path value (`./foo`, `~/foo`, the result of `toPath`, ...).
///
/// Stored pre-canonicalized (no `.`/`..` components, no trailing slash) by
/// whatever produced it — the parser for literals, `eval.rs` for computed
/// paths — so comparisons and `dirOf`/`baseNameOf` never need to
/// re-normalize.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonPath(Rc<Path>);

impl CanonPath {
    pub fn new(path: impl Into<Rc<Path>>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// A user-defined function: `pattern: body`, paired with the environment it
/// closed over.
#[derive(Debug, Clone)]
pub struct LambdaValue {
    pub env: Rc<Env>,
    /// Always an `Rc<Expr>` wrapping `Expr::Lambda` — kept as the whole
    /// `Expr` (rather than unwrapping to `ExprLambda` up front) so a
    /// `Value::Lambda` can cheaply hand back the same `Rc` the AST already
    /// uses for position/name lookups without an extra allocation.
    pub lambda: Rc<Expr>,
}

/// A builtin function, possibly partially applied.
///
/// `args` holds the arguments supplied so far, left to right; once
/// `args.len()` reaches the primop's arity, calling it again dispatches to
/// the implementation instead of accumulating another argument. Grounded in
/// the teacher's `Builtins` dispatch-enum-plus-per-file-submodule design,
/// adapted for partial application, which Python's builtins never need but
/// every curried Nix builtin (`map`, `foldl'`, `genericClosure`, ...) does.
#[derive(Debug, Clone)]
pub struct PrimOpApp {
    pub op: PrimOp,
    pub args: Vec<Value>,
}

/// A host-provided opaque value threaded through the evaluator without the
/// evaluator needing to know its concrete type — used for values a
/// `Store`/`SourceResolver` implementation wants to hand back to Nix code
/// (for instance, a derivation output handle produced by
/// `derivationStrict`). Grounded in the teacher's `StdlibObject`/`PyTrait`
/// split between evaluator-native and host-extensible value kinds.
pub trait ExternalValue: fmt::Debug {
    /// Name `builtins.typeOf` should report.
    fn type_name(&self) -> &'static str;

    /// String coercion for `toString`/string interpolation, if this value
    /// supports it. Returning `None` makes coercion fail the way it would
    /// for a lambda or an attrset without `__toString`.
    fn coerce_to_string(&self) -> Option<NixString> {
        None
    }
}

/// What a thunk currently holds.
///
/// The three-state machine here is the force/update/blackhole protocol: a
/// suspended thunk becomes a blackhole the instant forcing begins (so a
/// cycle reached through the thunk's own evaluation is caught, not looped
/// forever), and becomes `Evaluated` the instant forcing completes (so
/// later forces are O(1) instead of re-running the expression).
#[derive(Debug)]
pub enum ThunkRepr {
    /// Not yet evaluated: an expression and the environment to evaluate it
    /// in. `env` is `None` for thunks built ahead of any environment (rare;
    /// used for a handful of builtin-synthesized thunks).
    Suspended { expr: Rc<Expr>, env: Rc<Env> },
    /// Currently being forced. Forcing a blackholed thunk again means the
    /// expression's evaluation depends on its own result — `EvalError`, not
    /// a stack overflow.
    Blackhole,
    /// Forcing completed; this is the result, permanently.
    Evaluated(Value),
}

/// A lazily evaluated value: `expr` is not run until something forces this
/// thunk, and the result is cached for every subsequent force.
#[derive(Debug, Clone)]
pub struct Thunk(pub Rc<std::cell::RefCell<ThunkRepr>>);

impl Thunk {
    pub fn suspended(expr: Rc<Expr>, env: Rc<Env>) -> Self {
        Self(Rc::new(std::cell::RefCell::new(ThunkRepr::Suspended { expr, env })))
    }

    /// A thunk that is already evaluated — used when a value needs to be
    /// handed somewhere a `Thunk` is expected (an attrset slot, an
    /// environment slot) but has already been computed, e.g. a builtin's
    /// return value being stored back into a call frame.
    pub fn evaluated(value: Value) -> Self {
        Self(Rc::new(std::cell::RefCell::new(ThunkRepr::Evaluated(value))))
    }

    /// True once this thunk has a cached result, without forcing it.
    pub fn is_evaluated(&self) -> bool {
        matches!(&*self.0.borrow(), ThunkRepr::Evaluated(_))
    }
}

/// A Nix runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// Nix integers are fixed-width 64-bit and trap on overflow rather than
    /// promoting to bignum or wrapping — see `builtins::arith` for the
    /// checked-arithmetic implementation this representation requires.
    Int(i64),
    Float(f64),
    String(NixString),
    Path(CanonPath),
    Attrs(Rc<Bindings>),
    /// `Rc<ListInner>` so that cloning a list (passing it to a function,
    /// storing it in an attrset) is O(1), the same sharing `Attrs` gets from
    /// `Rc<Bindings>`, while `ListInner` itself is a `SmallVec<[Value; 2]>`
    /// so that short lists (the common case) need no separate heap slice at
    /// all beyond the single `Rc` allocation.
    List(Rc<ListInner>),
    Lambda(Rc<LambdaValue>),
    PrimOp(Rc<PrimOpApp>),
    External(Rc<dyn ExternalValue>),
    /// Not a first-class Nix value — never observable by a builtin or a
    /// host caller once `force` has run. Exists only as a `Value` so that
    /// environment slots and attrset bindings, which are typed as `Value`,
    /// can hold unevaluated entries before anything demands them.
    Thunk(Thunk),
}

impl Value {
    pub fn string(s: impl Into<Box<str>>) -> Self {
        Value::String(NixString::plain(s))
    }

    pub fn list(items: impl Into<ListInner>) -> Self {
        Value::List(Rc::new(items.into()))
    }

    pub fn is_thunk(&self) -> bool {
        matches!(self, Value::Thunk(_))
    }

    /// `builtins.typeOf`'s category name. Forcing is the caller's
    /// responsibility — calling this on a `Value::Thunk` is a bug, not a
    /// recoverable case, since every value reaching here should already have
    /// been forced.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Path(_) => "path",
            Value::Attrs(_) => "set",
            Value::List(_) => "list",
            Value::Lambda(_) | Value::PrimOp(_) => "lambda",
            Value::External(e) => e.type_name(),
            Value::Thunk(_) => unreachable!("type_name called on an unforced thunk"),
        }
    }
}

/// The name the static resolver records for a lambda the first time it sees
/// one bound directly by a `let`/attrset binding (`name = x: ...;`), shown
/// in stack traces. Separate from `Symbol` so call sites that don't care
/// about naming (most lambdas are anonymous in practice) don't need to
/// thread one through.
pub fn lambda_display_name(lambda: &Rc<Expr>) -> Option<Symbol> {
    match lambda.as_ref() {
        Expr::Lambda(l) => {
            let name = l.name.get();
            if name.is_absent() { None } else { Some(name) }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_equality_ignores_context() {
        let a = NixString::new("x", StringContext::single(crate::context::ContextElement::Opaque {
            store_path: "/nix/store/aaa".into(),
        }));
        let b = NixString::plain("x");
        assert_eq!(a, b);
    }

    #[test]
    fn list_clone_is_cheap_rc_share() {
        let l = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let l2 = l.clone();
        if let (Value::List(a), Value::List(b)) = (&l, &l2) {
            assert!(Rc::ptr_eq(a, b));
        } else {
            panic!("expected lists");
        }
    }
}
