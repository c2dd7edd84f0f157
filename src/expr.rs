//! The abstract syntax tree produced by the parser and consumed by the
//! static resolver and the evaluator.
//!
//! Node shapes are grounded directly in `lix`'s `nixexpr.hh`: arithmetic and
//! comparison operators (`+ - * / < > <= >=`) are not dedicated node kinds at
//! all — the parser desugars them into [`Expr::Call`] nodes invoking the
//! matching builtin (`__add`, `__lessThan`, ...) at parse time, exactly as
//! `lix`'s grammar does (unary `-e` desugars the same way, to `__sub 0 e`).
//! Only the operators that can't be expressed as a two-argument function
//! call without losing short-circuiting or attrset-merge semantics (`&&`,
//! `||`, `->`, `==`, `!=`, `//`, `++`, string concatenation, unary `!`) get
//! their own node kinds.
//!
//! Every node is reached through `Rc<Expr>` rather than `Box<Expr>`: thunks
//! capture a node alongside its environment and are freely cloned when a
//! value is shared, so sharing the AST itself (never mutated after parsing,
//! aside from the `Cell`s described below) avoids deep-cloning expressions on
//! every closure capture.

use std::cell::Cell;
use std::rc::Rc;

use crate::intern::Symbol;
use crate::pos::PosIdx;

/// Where a resolved variable lives, filled in by the static resolver after
/// parsing and read by the evaluator. Stored in a `Cell` on [`ExprVar`] so
/// the resolver can mutate the AST node in place instead of rebuilding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarResolution {
    /// Not yet resolved (the parser's initial state for every `ExprVar`).
    Unresolved,
    /// Found at a statically known `(level, displacement)` coordinate:
    /// `level` frames out from the use site, `displacement` slots into that
    /// frame's bindings.
    Static { level: u16, displacement: u16 },
    /// No static binding exists; at least one `with` expression lexically
    /// encloses the use site, so resolution falls back to a dynamic lookup in
    /// the nearest enclosing `with`'s attribute set at eval time.
    FromWith,
    /// Resolved to the lambda-call-frame variable introduced by an
    /// `inherit (expr)` between a `let`/formals list and its uses, a case
    /// `lix` models as a separate hidden frame scanned without falling back
    /// to `with`.
    InheritFrom { level: u16, displacement: u16 },
}

/// A variable reference: `foo`.
#[derive(Debug)]
pub struct ExprVar {
    pub name: Symbol,
    pub pos: PosIdx,
    pub resolution: Cell<VarResolution>,
}

/// `inherit (expr) a b c;` is desugared by the parser into one hidden
/// binding per name that evaluates `expr` once and selects `a`/`b`/`c` out of
/// it; `ExprInheritFrom` is the reference to that hidden per-`inherit`-clause
/// binding, keyed by its displacement in a synthetic frame the resolver
/// allocates for the enclosing `let`/attrset/formals list. Mirrors `lix`'s
/// `ExprInheritFrom`.
#[derive(Debug)]
pub struct ExprInheritFrom {
    pub displacement: u16,
    pub pos: PosIdx,
}

/// One element of an attribute-selection path: `a.b.${c}.d`.
#[derive(Debug)]
pub enum AttrPathSegment {
    Symbol(Symbol),
    /// A dynamic attribute name (`${expr}` or an interpolated string key).
    Dynamic(Rc<Expr>),
}

/// `e.a.b.c` or `e.a.b.c or default`.
#[derive(Debug)]
pub struct ExprSelect {
    pub expr: Rc<Expr>,
    pub path: Vec<AttrPathSegment>,
    pub default: Option<Rc<Expr>>,
    pub pos: PosIdx,
}

/// `e.a.b.c ? d` — tests whether the path exists without forcing its value.
#[derive(Debug)]
pub struct ExprOpHasAttr {
    pub expr: Rc<Expr>,
    pub path: Vec<AttrPathSegment>,
}

/// How one binding inside an attribute set was written, mirroring `lix`'s
/// `ExprAttrs::AttrDef::Kind`: a single tag rather than three parallel lists,
/// so binding order (which matters for duplicate-key diagnostics) is
/// preserved naturally.
#[derive(Debug)]
pub enum AttrDefKind {
    /// `name = expr;`
    Plain,
    /// `inherit name;` — equivalent to `name = name;` but resolved against
    /// the *enclosing* scope, not the attrset's own recursive scope.
    Inherited,
    /// `inherit (expr) name;` — resolved through the hidden
    /// [`ExprInheritFrom`] binding described above.
    InheritedFrom,
}

#[derive(Debug)]
pub struct AttrDef {
    pub kind: AttrDefKind,
    pub value: Rc<Expr>,
    pub pos: PosIdx,
    /// Whether this binding came from `rec { ... }` and may therefore see
    /// its attrset siblings. Plain `{ ... }` bindings set this `false`.
    pub recursive: bool,
}

/// One `${expr} = value;` binding, resolved at eval time rather than parse
/// time since the key isn't known statically.
#[derive(Debug)]
pub struct DynamicAttrDef {
    pub name_expr: Rc<Expr>,
    pub value_expr: Rc<Expr>,
    pub pos: PosIdx,
}

/// `{ ... }` or `rec { ... }`.
///
/// Static (`Symbol`-keyed) bindings and dynamic (`${...}`-keyed) bindings are
/// kept in separate vectors: only the former ever participate in static name
/// resolution or duplicate-key checks at parse time, matching `lix`'s split
/// between `ExprAttrs::attrs` and `ExprAttrs::dynamicAttrs`.
#[derive(Debug)]
pub struct ExprAttrs {
    pub attrs: Vec<(Symbol, AttrDef)>,
    pub dynamic_attrs: Vec<DynamicAttrDef>,
    pub recursive: bool,
    /// One entry per distinct `inherit (expr) ...;` clause in this attrset,
    /// built directly by the parser (the source expression for each clause
    /// is known as soon as it's parsed, so no resolver backpatching is
    /// needed here — only [`ExprAttrs::inherit_from_slots`], the *count*,
    /// needs filling in later, since it doubles as the hidden frame's
    /// size). Every name inherited from a given clause gets an
    /// [`AttrDef`] whose value is `Select(InheritFrom(slot), [name])`,
    /// where `slot` is this clause's index into this vector, offset by
    /// `attrs.len()` when `recursive` is set (the named slots occupy
    /// `0..attrs.len()` in that case) or `0` otherwise (a non-recursive
    /// attrset has no named slots to share the frame with).
    pub inherit_from_exprs: Vec<Rc<Expr>>,
    /// Equal to `inherit_from_exprs.len()`, duplicated here as a `Cell` so
    /// the resolver can fill it in during a single forward pass without
    /// needing to re-borrow `inherit_from_exprs` itself.
    pub inherit_from_slots: Cell<u16>,
    pub pos: PosIdx,
}

/// `[ a b c ]`.
#[derive(Debug)]
pub struct ExprList {
    pub elems: Vec<Rc<Expr>>,
}

/// One formal argument of an attrset-destructuring lambda pattern:
/// `{ a, b ? default }: ...`.
#[derive(Debug)]
pub struct Formal {
    pub name: Symbol,
    pub default: Option<Rc<Expr>>,
    pub pos: PosIdx,
}

/// A lambda's parameter list, mirroring `lix`'s `Pattern` variants.
#[derive(Debug)]
pub enum Pattern {
    /// `x: ...` — a single bound name.
    Simple { name: Symbol, pos: PosIdx },
    /// `{ a, b ? d, ... } @ args: ...` — attrset destructuring, with an
    /// optional `...` ellipsis (allow unlisted attrs) and an optional
    /// whole-argument alias.
    Attrs {
        /// Sorted by `Symbol` id so the resolver and the call-binder can
        /// binary-search for duplicates and for matching against the
        /// argument attrset.
        formals: Vec<Formal>,
        ellipsis: bool,
        /// `@name` binding the whole argument attrset, if present.
        alias: Option<Symbol>,
    },
}

/// `pattern: body`.
#[derive(Debug)]
pub struct ExprLambda {
    pub pattern: Pattern,
    pub body: Rc<Expr>,
    pub pos: PosIdx,
    /// Number of local slots the lambda's call frame needs (the formals plus
    /// any `let`/`inherit` bindings directly in the body that share its
    /// frame). Filled in by the static resolver once the whole lambda has
    /// been walked.
    pub frame_size: Cell<u16>,
    /// A name to show in stack traces and `lambda @ file:line:col`-style
    /// error messages — requires `name = fn;`-style bindings, so this is
    /// filled in opportunistically by the resolver and left `Symbol::ABSENT`
    /// otherwise.
    pub name: Cell<Symbol>,
}

/// `f a` — one application of `f` to one argument. Curried calls (`f a b`)
/// are parsed as nested single-argument applications, but the parser
/// collapses a run of them into one [`ExprCall`] with multiple `args`, the
/// same flattening `lix` performs so that `callFunction` can apply several
/// arguments to a multi-arg lambda chain without re-walking the AST per
/// argument.
#[derive(Debug)]
pub struct ExprCall {
    pub function: Rc<Expr>,
    pub args: Vec<Rc<Expr>>,
    pub pos: PosIdx,
}

/// `let a = 1; b = 2; in body` — always recursive (bindings can see each
/// other and the body), never has dynamic attrs, and has no `//`-merge
/// concerns, so it gets its own node instead of reusing [`ExprAttrs`]
/// wrapped in a selector.
#[derive(Debug)]
pub struct ExprLet {
    pub attrs: Vec<(Symbol, AttrDef)>,
    pub body: Rc<Expr>,
    /// One entry per distinct `inherit (expr) ...;` clause, same convention
    /// as [`ExprAttrs::inherit_from_exprs`]: slot `attrs.len() + i` in this
    /// `let`'s frame (a `let` is always recursive, so the named slots always
    /// occupy `0..attrs.len()`).
    pub inherit_from_exprs: Vec<Rc<Expr>>,
    pub inherit_from_slots: Cell<u16>,
    /// Frame size for this `let`'s own bindings, filled in by the resolver.
    pub frame_size: Cell<u16>,
}

/// `with e; body` — falls back to dynamic lookup for any variable in `body`
/// that isn't statically bound.
#[derive(Debug)]
pub struct ExprWith {
    pub attrs: Rc<Expr>,
    pub body: Rc<Expr>,
    pub pos: PosIdx,
    /// The static-env level distance from a `with`-shadowed [`ExprVar`] back
    /// to this `with` frame, used by the evaluator to find which of possibly
    /// several enclosing `with`s to search (nearest first). Filled in by the
    /// resolver.
    pub level: Cell<u16>,
}

/// `if cond then a else b`.
#[derive(Debug)]
pub struct ExprIf {
    pub cond: Rc<Expr>,
    pub then: Rc<Expr>,
    pub else_: Rc<Expr>,
}

/// `assert cond; body`.
#[derive(Debug)]
pub struct ExprAssert {
    pub cond: Rc<Expr>,
    pub body: Rc<Expr>,
    pub pos: PosIdx,
}

/// Binary operators kept as dedicated AST nodes because the same-named
/// builtin doesn't exist or wouldn't preserve short-circuiting/merge
/// semantics as a plain two-argument call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    And,
    Or,
    Impl,
    /// `//` — right-biased attrset merge.
    Update,
    /// `++` — list concatenation.
    ConcatLists,
    /// `+` — numeric addition if the left operand is a number, otherwise
    /// string/path concatenation with context union. Kept as a dedicated
    /// node (not a desugared call to a numeric-only builtin) because unlike
    /// `-`/`*`/`/`, `+` must also handle strings and paths.
    Add,
}

#[derive(Debug)]
pub struct ExprBinOp {
    pub op: BinOp,
    pub lhs: Rc<Expr>,
    pub rhs: Rc<Expr>,
    pub pos: PosIdx,
}

/// `!e` — the only unary operator that isn't desugared to a builtin call
/// (unary `-e` desugars to `__sub 0 e` at parse time, matching `lix`'s
/// grammar).
#[derive(Debug)]
pub struct ExprOpNot {
    pub expr: Rc<Expr>,
}

/// One piece of a string that may interpolate expressions: `"a${b}c"` or an
/// indented string `''a${b}c''`. Adjacent literal pieces are already merged
/// by the lexer, and indentation has already been stripped, so by the time
/// this node exists it is just literal/expression parts to concatenate.
#[derive(Debug)]
pub enum StringPart {
    Literal(Rc<str>),
    Interpolation(Rc<Expr>),
}

/// `"a${b}c"` or `''a${b}c''` with more than one part. A string literal with
/// no interpolation at all is represented directly as [`Expr::String`]
/// instead — there is no reason to pay the concatenation cost for it.
#[derive(Debug)]
pub struct ExprConcatStrings {
    pub parts: Vec<StringPart>,
    pub pos: PosIdx,
}

/// `__curPos` — a use of the zero-argument builtin that evaluates to the
/// attrset `{ file, line, column }` describing its own source position.
#[derive(Debug)]
pub struct ExprPos {
    pub pos: PosIdx,
}

/// A parsed expression. Every variant wraps its per-kind struct (rather than
/// inlining fields directly into the enum) so that node structs can be
/// referenced and constructed independently — useful in the parser, where
/// intermediate values of a single node kind are often built up before being
/// wrapped as an `Expr`.
#[derive(Debug)]
pub enum Expr {
    Int(i64),
    Float(f64),
    /// A string literal with no interpolation. Interpolated strings are
    /// [`Expr::ConcatStrings`] instead.
    String(Rc<str>),
    /// A path literal (`./foo`, `~/foo`, `<nixpath>`) resolved relative to
    /// the file it was written in. Stored pre-resolved to an absolute,
    /// `.`/`..`-free form by the parser, matching `lix`'s eager path
    /// canonicalization at parse time.
    Path(Rc<std::path::Path>),
    Null,
    Bool(bool),
    Var(ExprVar),
    InheritFrom(ExprInheritFrom),
    Select(ExprSelect),
    OpHasAttr(ExprOpHasAttr),
    Attrs(ExprAttrs),
    List(ExprList),
    Lambda(ExprLambda),
    Call(ExprCall),
    Let(ExprLet),
    With(ExprWith),
    If(ExprIf),
    Assert(ExprAssert),
    BinOp(ExprBinOp),
    OpNot(ExprOpNot),
    ConcatStrings(ExprConcatStrings),
    Pos(ExprPos),
}

impl Expr {
    /// The position most useful to report in an error raised while
    /// evaluating this node, where the node tracks one.
    pub fn pos(&self) -> PosIdx {
        match self {
            Expr::Var(e) => e.pos,
            Expr::InheritFrom(e) => e.pos,
            Expr::Select(e) => e.pos,
            Expr::Attrs(e) => e.pos,
            Expr::Lambda(e) => e.pos,
            Expr::Call(e) => e.pos,
            Expr::With(e) => e.pos,
            Expr::Assert(e) => e.pos,
            Expr::BinOp(e) => e.pos,
            Expr::ConcatStrings(e) => e.pos,
            Expr::Pos(e) => e.pos,
            _ => PosIdx::NONE,
        }
    }
}
