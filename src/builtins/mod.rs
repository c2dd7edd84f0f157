//! The fixed catalog of primitive operations bound in the base environment.
//!
//! One file per primop family, mirroring the teacher's one-file-per-builtin
//! `src/builtins/` layout; dispatch is a single `Copy` enum (`PrimOp`)
//! resolved through [`call`], the same shape as the teacher's
//! `BuiltinsFunctions` dispatch enum with `strum`-derived `Display`/`FromStr`
//! instead of a per-function trait object.
//!
//! `PrimOp` itself carries no state — arity and implementation are looked up
//! by value through [`arity`]/[`call`] — so [`crate::value::PrimOpApp`] can
//! store it `Copy` and cheaply clone a partially-applied chain.

mod attrs;
mod closure;
mod compare;
mod control;
mod derivation;
mod introspect;
mod io;
mod lists;
pub(crate) mod numbers;
mod strings;
mod structured;

use std::rc::Rc;

use strum::{Display, EnumString};

use crate::eval::Evaluator;
use crate::exception::EvalResult;
use crate::heap::{Binding, Bindings};
use crate::intern::{Symbol, SymbolTable};
use crate::pos::PosIdx;
use crate::settings::EvalSettings;
use crate::value::{PrimOpApp, Value};

/// A primitive operation, identified by a fieldless tag. `Copy` so that
/// [`PrimOpApp`] can clone a partial application without an `Rc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum PrimOp {
    TypeOf,
    IsNull,
    IsBool,
    IsInt,
    IsFloat,
    IsString,
    IsPath,
    IsAttrs,
    IsList,
    IsFunction,

    AttrNames,
    AttrValues,
    GetAttr,
    HasAttr,
    RemoveAttrs,
    ListToAttrs,
    IntersectAttrs,
    CatAttrs,
    FunctionArgs,
    MapAttrs,
    ZipAttrsWith,

    Head,
    Tail,
    ElemAt,
    Length,
    Map,
    Filter,
    Elem,
    ConcatLists,
    ConcatMap,
    #[strum(serialize = "foldl'")]
    FoldlPrime,
    Any,
    All,
    GenList,
    Sort,
    Partition,
    GroupBy,

    StringLength,
    Substring,
    ConcatStringsSep,
    ReplaceStrings,
    Split,
    Match,
    HashString,

    Add,
    Sub,
    Mul,
    Div,
    BitAnd,
    BitOr,
    BitXor,
    LessThan,
    Ceil,
    Floor,

    TryEval,
    Throw,
    Abort,
    AddErrorContext,
    Seq,
    DeepSeq,
    Trace,
    Break,

    ReadFile,
    ReadDir,
    PathExists,
    ReadFileType,
    FindFile,
    HashFile,
    ToFile,
    FilterSource,
    Path,

    DerivationStrict,
    Placeholder,
    Derivation,

    ToJSON,
    FromJSON,
    ToXML,
    FromTOML,

    GenericClosure,

    CompareVersions,
    SplitVersion,
    ParseDrvName,

    Import,
    ScopedImport,
    BaseNameOf,
    DirOf,
    ToStringOp,
}

/// Number of arguments `op` needs before [`call`] runs its implementation.
pub fn arity(op: PrimOp) -> usize {
    use PrimOp::*;
    match op {
        TypeOf | IsNull | IsBool | IsInt | IsFloat | IsString | IsPath | IsAttrs | IsList | IsFunction => 1,
        AttrNames | AttrValues | ListToAttrs | FunctionArgs => 1,
        GetAttr | HasAttr | RemoveAttrs | IntersectAttrs | CatAttrs | MapAttrs | ZipAttrsWith => 2,
        Head | Tail | Length | ConcatLists => 1,
        Map | Filter | Elem | ConcatMap | Any | All | GenList | Sort | Partition | GroupBy => 2,
        ElemAt => 2,
        FoldlPrime => 3,
        StringLength => 1,
        Substring => 3,
        ConcatStringsSep => 2,
        ReplaceStrings => 3,
        Split | Match | HashString => 2,
        Add | Sub | Mul | Div | BitAnd | BitOr | BitXor | LessThan => 2,
        Ceil | Floor => 1,
        TryEval | Throw | Abort | Break => 1,
        AddErrorContext | Seq | DeepSeq | Trace => 2,
        ReadFile | ReadDir | PathExists | ReadFileType | HashFile | Path => 1,
        FindFile | ToFile | FilterSource => 2,
        DerivationStrict | Placeholder | Derivation => 1,
        ToJSON | FromJSON | ToXML | FromTOML => 1,
        GenericClosure => 1,
        CompareVersions => 2,
        SplitVersion | ParseDrvName => 1,
        Import | BaseNameOf | DirOf | ToStringOp => 1,
        ScopedImport => 2,
    }
}

/// Runs `op` once enough arguments have been collected. Every primop forces
/// its own arguments as needed (via `ev.force_*`) so type errors carry the
/// call site's position.
pub fn call(ev: &mut Evaluator, op: PrimOp, args: Vec<Value>, pos: PosIdx) -> EvalResult<Value> {
    use PrimOp::*;
    match op {
        TypeOf | IsNull | IsBool | IsInt | IsFloat | IsString | IsPath | IsAttrs | IsList | IsFunction => {
            introspect::call(ev, op, args, pos)
        }
        AttrNames | AttrValues | GetAttr | HasAttr | RemoveAttrs | ListToAttrs | IntersectAttrs | CatAttrs
        | FunctionArgs | MapAttrs | ZipAttrsWith => attrs::call(ev, op, args, pos),
        Head | Tail | ElemAt | Length | Map | Filter | Elem | ConcatLists | ConcatMap | FoldlPrime | Any | All
        | GenList | Sort | Partition | GroupBy => lists::call(ev, op, args, pos),
        StringLength | Substring | ConcatStringsSep | ReplaceStrings | Split | Match | HashString => {
            strings::call(ev, op, args, pos)
        }
        Add | Sub | Mul | Div | BitAnd | BitOr | BitXor | LessThan | Ceil | Floor => numbers::call(ev, op, args, pos),
        TryEval | Throw | Abort | AddErrorContext | Seq | DeepSeq | Trace | Break => control::call(ev, op, args, pos),
        ReadFile | ReadDir | PathExists | ReadFileType | FindFile | HashFile | ToFile | FilterSource | Path
        | Import | ScopedImport | BaseNameOf | DirOf => io::call(ev, op, args, pos),
        ToStringOp => strings::to_string_builtin(ev, args, pos),
        DerivationStrict | Placeholder | Derivation => derivation::call(ev, op, args, pos),
        ToJSON | FromJSON | ToXML | FromTOML => structured::call(ev, op, args, pos),
        GenericClosure => closure::call(ev, args, pos),
        CompareVersions | SplitVersion | ParseDrvName => compare::call(ev, op, args, pos),
    }
}

/// The dotted name each primop is exposed under in the `builtins` attrset.
/// Separate from `PrimOp`'s `Display` (camelCase-by-default derive) only for
/// the handful of names `strum`'s default casing would get wrong relative to
/// Nix's actual spelling (`foldl'`'s trailing apostrophe is carried through
/// an explicit `#[strum(serialize = ...)]` above, so `to_string()` already
/// matches here).
fn catalog_name(op: PrimOp) -> String {
    op.to_string()
}

/// Every primop, for populating the `builtins` attrset.
const ALL_PRIMOPS: &[PrimOp] = {
    use PrimOp::*;
    &[
        TypeOf, IsNull, IsBool, IsInt, IsFloat, IsString, IsPath, IsAttrs, IsList, IsFunction, AttrNames,
        AttrValues, GetAttr, HasAttr, RemoveAttrs, ListToAttrs, IntersectAttrs, CatAttrs, FunctionArgs, MapAttrs,
        ZipAttrsWith, Head, Tail, ElemAt, Length, Map, Filter, Elem, ConcatLists, ConcatMap, FoldlPrime, Any, All,
        GenList, Sort, Partition, GroupBy, StringLength, Substring, ConcatStringsSep, ReplaceStrings, Split, Match,
        HashString, Add, Sub, Mul, Div, BitAnd, BitOr, BitXor, LessThan, Ceil, Floor, TryEval, Throw, Abort,
        AddErrorContext, Seq, DeepSeq, Trace, Break, ReadFile, ReadDir, PathExists, ReadFileType, FindFile,
        HashFile, ToFile, FilterSource, Path, DerivationStrict, Placeholder, ToJSON, FromJSON, ToXML, FromTOML,
        GenericClosure, CompareVersions, SplitVersion, ParseDrvName, ScopedImport, Import, BaseNameOf, DirOf,
        ToStringOp,
    ]
};

/// Names bound directly at the root static/runtime frame, alongside
/// `builtins` itself — the subset of primops (plus the operator-desugar
/// targets the parser emits and `<nixpath>`'s `__findFile`/`__nixPath`) that
/// are also reachable without the `builtins.` prefix, matching real Nix's
/// split between the full `builtins` set and its smaller set of global
/// aliases.
const GLOBAL_ALIASES: &[(&str, PrimOp)] = {
    use PrimOp::*;
    &[
        ("import", Import),
        ("map", Map),
        ("removeAttrs", RemoveAttrs),
        ("throw", Throw),
        ("abort", Abort),
        ("baseNameOf", BaseNameOf),
        ("dirOf", DirOf),
        ("toString", ToStringOp),
        ("derivation", Derivation),
        ("placeholder", Placeholder),
        ("scopedImport", ScopedImport),
        ("isNull", IsNull),
        ("__findFile", FindFile),
        ("__add", Add),
        ("__sub", Sub),
        ("__mul", Mul),
        ("__div", Div),
        ("__lessThan", LessThan),
    ]
};

fn primop_value(op: PrimOp) -> Value {
    Value::PrimOp(Rc::new(PrimOpApp { op, args: Vec::new() }))
}

/// Builds the `builtins` attrset value, containing every primop in
/// [`ALL_PRIMOPS`] under its catalog name.
fn builtins_attrset(symbols: &mut SymbolTable) -> Value {
    let mut bindings = Vec::with_capacity(ALL_PRIMOPS.len());
    for &op in ALL_PRIMOPS {
        let name = symbols.intern(&catalog_name(op));
        bindings.push(Binding { name, pos: PosIdx::NONE, value: primop_value(op) });
    }
    Value::Attrs(Bindings::build(bindings))
}

/// Names bound in the root static/runtime frame, in a fixed order shared by
/// [`root_values`]: `builtins` first, then each [`GLOBAL_ALIASES`] entry,
/// then `__nixPath`.
pub fn root_names(symbols: &mut SymbolTable) -> Vec<Symbol> {
    let mut names = Vec::with_capacity(GLOBAL_ALIASES.len() + 2);
    names.push(symbols.intern("builtins"));
    for (name, _) in GLOBAL_ALIASES {
        names.push(symbols.intern(name));
    }
    names.push(symbols.intern("__nixPath"));
    names
}

/// Values for the root frame, in the exact order [`root_names`] produces —
/// every name in [`root_names`] must already be interned by the time this
/// runs (it is, since `StaticResolver::new` calls `root_names` first).
pub fn root_values(symbols: &mut SymbolTable, settings: &EvalSettings) -> Vec<Value> {
    let mut values = Vec::with_capacity(GLOBAL_ALIASES.len() + 2);
    values.push(builtins_attrset(symbols));
    for (_, op) in GLOBAL_ALIASES {
        values.push(primop_value(*op));
    }
    values.push(nix_path_value(symbols, settings));
    values
}

/// `__nixPath`: a list of `{ path; prefix; }` attrsets built from
/// [`EvalSettings::allowed_paths`] — the same shape `<nixpath>` search-path
/// literals expect from `__findFile __nixPath "name"`.
fn nix_path_value(symbols: &mut SymbolTable, settings: &EvalSettings) -> Value {
    let path_sym = symbols.intern("path");
    let prefix_sym = symbols.intern("prefix");
    let mut entries = Vec::with_capacity(settings.allowed_paths.len());
    for allowed in &settings.allowed_paths {
        let path_str = allowed.path.display().to_string();
        let bindings = vec![
            Binding { name: path_sym, pos: PosIdx::NONE, value: Value::string(path_str) },
            Binding {
                name: prefix_sym,
                pos: PosIdx::NONE,
                value: Value::string(allowed.prefix.clone().unwrap_or_default()),
            },
        ];
        entries.push(Value::Attrs(Bindings::build(bindings)));
    }
    Value::list(entries)
}
