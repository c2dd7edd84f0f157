//! Static name resolution: the single forward pass over a freshly parsed
//! tree that turns every [`crate::expr::ExprVar`] into a `(level,
//! displacement)` coordinate (or a `with`-fallback marker, or a hard error),
//! and fills in the handful of other `Cell`s the evaluator's frame
//! construction depends on (`ExprAttrs::inherit_from_slots`,
//! `ExprWith::level`).
//!
//! A recursive walk carries a shadow scope chain
//! ([`crate::namespace::StaticEnv`]) that mirrors the runtime
//! [`crate::namespace::Env`] chain frame-for-frame, so that by the time
//! evaluation starts, every variable read is an index into an already-known
//! slot rather than a name lookup.
//!
//! The parser deliberately leaves two things for this pass to finish:
//! dotted-path attrset sugar (`a.b = 1; a.c = 2;`) produces two separate
//! top-level `a` entries that must be merged into one before slot
//! assignment, and every `ExprVar`/`ExprWith` starts out unresolved.

use std::rc::Rc;

use crate::expr::{
    AttrDef, AttrDefKind, AttrPathSegment, Expr, ExprAttrs, ExprLambda, ExprLet, ExprVar, ExprWith, Pattern,
    StringPart, VarResolution,
};
use crate::intern::{Symbol, SymbolTable};
use crate::namespace::StaticEnv;
use crate::pos::PosIdx;

/// An undefined variable with no enclosing `with` to fall back to — the only
/// way static resolution itself fails (everything else is either fixed up in
/// place or deferred to a dynamic `with` lookup at eval time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub name: String,
    pub pos: PosIdx,
}

impl ResolveError {
    pub fn pos(&self) -> PosIdx {
        self.pos
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "undefined variable '{}'", self.name)
    }
}

impl std::error::Error for ResolveError {}

/// Runs the resolution pass. Holds nothing but a `SymbolTable` reference
/// (needed to intern the global-alias names and to render an undefined
/// variable's name in [`ResolveError`]) — the actual scope chain
/// ([`StaticEnv`]) lives on the Rust call stack for the duration of
/// [`StaticResolver::resolve_root`], never stored on `self`.
pub struct StaticResolver<'s> {
    symbols: &'s mut SymbolTable,
}

impl<'s> StaticResolver<'s> {
    pub fn new(symbols: &'s mut SymbolTable) -> Self {
        Self { symbols }
    }

    /// Resolves `expr` against the base frame of global aliases
    /// (`builtins`, `import`, `map`, ..., `__nixPath`), the same frame
    /// [`crate::eval::Evaluator`]'s root `Env` is built from.
    ///
    /// # Errors
    /// Returns the first variable reference that has no static binding and
    /// no enclosing `with` to defer to.
    pub fn resolve_root(&mut self, mut expr: Rc<Expr>) -> Result<Rc<Expr>, ResolveError> {
        let base_names = crate::builtins::root_names(self.symbols);
        let root = StaticEnv::root();
        let base = StaticEnv::child(&root, base_names);
        self.resolve_expr(&mut expr, &base)?;
        Ok(expr)
    }

    fn resolve_expr(&mut self, rc: &mut Rc<Expr>, senv: &StaticEnv) -> Result<(), ResolveError> {
        let expr = Rc::get_mut(rc).expect("parser-built AST node is uniquely owned during resolution");
        match expr {
            Expr::Int(_)
            | Expr::Float(_)
            | Expr::String(_)
            | Expr::Path(_)
            | Expr::Null
            | Expr::Bool(_)
            | Expr::InheritFrom(_)
            | Expr::Pos(_) => Ok(()),
            Expr::Var(var) => self.resolve_var(var, senv, 0),
            Expr::Select(select) => {
                self.resolve_expr(&mut select.expr, senv)?;
                self.resolve_path(&mut select.path, senv)?;
                if let Some(default) = &mut select.default {
                    self.resolve_expr(default, senv)?;
                }
                Ok(())
            }
            Expr::OpHasAttr(has) => {
                self.resolve_expr(&mut has.expr, senv)?;
                self.resolve_path(&mut has.path, senv)
            }
            Expr::Attrs(attrs) => self.resolve_attrs(attrs, senv),
            Expr::List(list) => {
                for elem in &mut list.elems {
                    self.resolve_expr(elem, senv)?;
                }
                Ok(())
            }
            Expr::Lambda(lambda) => self.resolve_lambda(lambda, senv),
            Expr::Call(call) => {
                self.resolve_expr(&mut call.function, senv)?;
                for arg in &mut call.args {
                    self.resolve_expr(arg, senv)?;
                }
                Ok(())
            }
            Expr::Let(let_) => self.resolve_let(let_, senv),
            Expr::With(with) => self.resolve_with(with, senv),
            Expr::If(if_) => {
                self.resolve_expr(&mut if_.cond, senv)?;
                self.resolve_expr(&mut if_.then, senv)?;
                self.resolve_expr(&mut if_.else_, senv)
            }
            Expr::Assert(assert) => {
                self.resolve_expr(&mut assert.cond, senv)?;
                self.resolve_expr(&mut assert.body, senv)
            }
            Expr::BinOp(bin) => {
                self.resolve_expr(&mut bin.lhs, senv)?;
                self.resolve_expr(&mut bin.rhs, senv)
            }
            Expr::OpNot(not) => self.resolve_expr(&mut not.expr, senv),
            Expr::ConcatStrings(cs) => {
                for part in &mut cs.parts {
                    if let StringPart::Interpolation(e) = part {
                        self.resolve_expr(e, senv)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn resolve_path(&mut self, path: &mut [AttrPathSegment], senv: &StaticEnv) -> Result<(), ResolveError> {
        for segment in path {
            if let AttrPathSegment::Dynamic(expr) = segment {
                self.resolve_expr(expr, senv)?;
            }
        }
        Ok(())
    }

    /// Searches `senv` outward for `var.name`, recording whichever of
    /// `Static`/`FromWith` applies (or failing with [`ResolveError`] if
    /// neither does). `level_offset` accounts for a runtime frame that
    /// exists at eval time but that this particular lookup must search
    /// *past* — used only by `inherit name;` bindings (see
    /// [`StaticResolver::resolve_binding_value`]).
    fn resolve_var(&mut self, var: &ExprVar, senv: &StaticEnv, level_offset: u16) -> Result<(), ResolveError> {
        let mut cur = Some(senv);
        let mut level: u16 = 0;
        let mut crossed_with = false;
        while let Some(frame) = cur {
            if let Some(displacement) = frame.local_displacement(var.name) {
                var.resolution.set(VarResolution::Static { level: level + level_offset, displacement });
                return Ok(());
            }
            crossed_with |= frame.is_with;
            level += 1;
            cur = frame.up;
        }
        if crossed_with {
            var.resolution.set(VarResolution::FromWith);
            Ok(())
        } else {
            Err(ResolveError { name: self.symbols.get(var.name).to_string(), pos: var.pos })
        }
    }

    /// Resolves one attrset/let binding's value. `inherit name;`
    /// (`AttrDefKind::Inherited`) is a bare [`Expr::Var`] that must resolve
    /// against the scope *enclosing* the attrset/let (`outer`), not the new
    /// frame the attrset/let itself introduces (`frame`) — even though at
    /// eval time it's evaluated inside that frame, which is why
    /// `level_offset` (the extra hop through that frame) is threaded through
    /// to [`StaticResolver::resolve_var`] rather than just using `outer`
    /// directly. Every other binding kind resolves normally against `frame`.
    fn resolve_binding_value(
        &mut self,
        def: &mut AttrDef,
        frame: &StaticEnv,
        outer: &StaticEnv,
        level_offset: u16,
    ) -> Result<(), ResolveError> {
        match def.kind {
            AttrDefKind::Inherited => {
                let inner = Rc::get_mut(&mut def.value).expect("inherit binding is uniquely owned");
                let Expr::Var(var) = inner else {
                    unreachable!("`inherit name;` always desugars to a bare Var")
                };
                self.resolve_var(var, outer, level_offset)
            }
            AttrDefKind::Plain | AttrDefKind::InheritedFrom => self.resolve_expr(&mut def.value, frame),
        }
    }

    fn resolve_attrs(&mut self, attrs: &mut ExprAttrs, senv: &StaticEnv) -> Result<(), ResolveError> {
        let old_len = attrs.attrs.len();
        let taken = std::mem::take(&mut attrs.attrs);
        let mut merged = merge_binding_list(taken);
        if attrs.recursive {
            let delta = (old_len - merged.len()) as u16;
            rebase_inherit_from(&mut merged, delta);
        }
        attrs.attrs = merged;

        let named = if attrs.recursive { attrs.attrs.len() as u16 } else { 0 };
        let hidden = attrs.inherit_from_exprs.len() as u16;
        attrs.inherit_from_slots.set(hidden);

        if named + hidden == 0 {
            for (_, def) in &mut attrs.attrs {
                self.resolve_binding_value(def, senv, senv, 0)?;
            }
            return self.resolve_dynamic_attrs(attrs, senv);
        }

        let vars: Vec<Symbol> =
            if attrs.recursive { attrs.attrs.iter().map(|(s, _)| *s).collect() } else { Vec::new() };
        let frame = StaticEnv::child(senv, vars);
        for src in &mut attrs.inherit_from_exprs {
            self.resolve_expr(src, &frame)?;
        }
        for (_, def) in &mut attrs.attrs {
            self.resolve_binding_value(def, &frame, senv, 1)?;
        }
        self.resolve_dynamic_attrs(attrs, &frame)
    }

    fn resolve_dynamic_attrs(&mut self, attrs: &mut ExprAttrs, senv: &StaticEnv) -> Result<(), ResolveError> {
        for dyn_attr in &mut attrs.dynamic_attrs {
            self.resolve_expr(&mut dyn_attr.name_expr, senv)?;
            self.resolve_expr(&mut dyn_attr.value_expr, senv)?;
        }
        Ok(())
    }

    fn resolve_let(&mut self, let_: &mut ExprLet, senv: &StaticEnv) -> Result<(), ResolveError> {
        let old_len = let_.attrs.len();
        let taken = std::mem::take(&mut let_.attrs);
        let mut merged = merge_binding_list(taken);
        let delta = (old_len - merged.len()) as u16;
        rebase_inherit_from(&mut merged, delta);
        let_.attrs = merged;

        let named = let_.attrs.len() as u16;
        let hidden = let_.inherit_from_exprs.len() as u16;
        let_.inherit_from_slots.set(hidden);
        // The parser sized this frame from the pre-merge entry count;
        // dotted-path merging may have shrunk it since.
        let_.frame_size.set(named + hidden);

        let vars: Vec<Symbol> = let_.attrs.iter().map(|(s, _)| *s).collect();
        let frame = StaticEnv::child(senv, vars);
        for src in &mut let_.inherit_from_exprs {
            self.resolve_expr(src, &frame)?;
        }
        for (_, def) in &mut let_.attrs {
            self.resolve_binding_value(def, &frame, senv, 1)?;
        }
        self.resolve_expr(&mut let_.body, &frame)
    }

    fn resolve_lambda(&mut self, lambda: &mut ExprLambda, senv: &StaticEnv) -> Result<(), ResolveError> {
        let vars: Vec<Symbol> = match &lambda.pattern {
            Pattern::Simple { name, .. } => vec![*name],
            Pattern::Attrs { formals, alias, .. } => {
                let mut names: Vec<Symbol> = formals.iter().map(|f| f.name).collect();
                if let Some(alias) = alias {
                    names.push(*alias);
                }
                names
            }
        };
        let frame = StaticEnv::child(senv, vars);
        if let Pattern::Attrs { formals, .. } = &mut lambda.pattern {
            for formal in formals {
                if let Some(default) = &mut formal.default {
                    self.resolve_expr(default, &frame)?;
                }
            }
        }
        self.resolve_expr(&mut lambda.body, &frame)
    }

    fn resolve_with(&mut self, with: &mut ExprWith, senv: &StaticEnv) -> Result<(), ResolveError> {
        self.resolve_expr(&mut with.attrs, senv)?;
        let mut depth: u16 = 0;
        let mut cur = Some(senv);
        while let Some(frame) = cur {
            if frame.is_with {
                depth += 1;
            }
            cur = frame.up;
        }
        with.level.set(depth);
        let frame = StaticEnv::with(senv);
        self.resolve_expr(&mut with.body, &frame)
    }
}

/// Merges duplicate top-level names in a binding list, the resolver-side
/// half of dotted-path attrset sugar (`a.b = 1; a.c = 2;` parses as two
/// top-level `a` entries, each a single-key non-recursive `Expr::Attrs`;
/// this combines them into one `a = { b = 1; c = 2; };`). Preserves the
/// position of each name's first occurrence, since that position becomes
/// its runtime frame slot.
fn merge_binding_list(attrs: Vec<(Symbol, AttrDef)>) -> Vec<(Symbol, AttrDef)> {
    let mut out: Vec<(Symbol, AttrDef)> = Vec::with_capacity(attrs.len());
    for (name, def) in attrs {
        if let Some(existing) = out.iter_mut().find(|(n, _)| *n == name) {
            let old_value = std::mem::replace(&mut existing.1.value, Rc::new(Expr::Null));
            existing.1.value = merge_nested_attr_values(old_value, def.value);
        } else {
            out.push((name, def));
        }
    }
    out
}

/// Combines two values bound to the same name. If both are plain,
/// non-recursive, inherit-free attrsets (the shape dotted-path sugar always
/// produces), merges their bindings recursively. Otherwise this is a
/// genuine duplicate binding rather than dotted-path sugar; the later
/// definition wins, matching `Bindings::build`'s last-writer-wins rule for
/// runtime attrset merges.
fn merge_nested_attr_values(a: Rc<Expr>, b: Rc<Expr>) -> Rc<Expr> {
    match (Rc::try_unwrap(a), Rc::try_unwrap(b)) {
        (Ok(Expr::Attrs(mut ea)), Ok(Expr::Attrs(eb))) if is_dotted_sugar(&ea) && is_dotted_sugar(&eb) => {
            ea.attrs.extend(eb.attrs);
            ea.attrs = merge_binding_list(ea.attrs);
            Rc::new(Expr::Attrs(ea))
        }
        (Ok(_), Ok(later)) => Rc::new(later),
        (Err(_), Ok(later)) => Rc::new(later),
        (Ok(_), Err(rc_b)) => rc_b,
        (Err(_), Err(rc_b)) => rc_b,
    }
}

fn is_dotted_sugar(attrs: &ExprAttrs) -> bool {
    !attrs.recursive && attrs.dynamic_attrs.is_empty() && attrs.inherit_from_exprs.is_empty()
}

/// Shifts every `inherit (expr) name;` binding's hidden-frame displacement
/// down by `delta` slots, compensating for dotted-path merging having
/// shrunk the named-slot count the parser originally based that
/// displacement on (`finalize_entries` computed it as `named_count_at_parse_time
/// + clause_index`).
fn rebase_inherit_from(attrs: &mut [(Symbol, AttrDef)], delta: u16) {
    if delta == 0 {
        return;
    }
    for (_, def) in attrs.iter_mut() {
        if matches!(def.kind, AttrDefKind::InheritedFrom)
            && let Some(Expr::Select(select)) = Rc::get_mut(&mut def.value)
            && let Some(Expr::InheritFrom(inherit)) = Rc::get_mut(&mut select.expr)
        {
            inherit.displacement -= delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprBinOp;
    use crate::pos::PosIdx;
    use std::cell::Cell;

    fn resolver(symbols: &mut SymbolTable) -> StaticResolver<'_> {
        StaticResolver::new(symbols)
    }

    #[test]
    fn undefined_variable_with_no_with_is_an_error() {
        let mut symbols = SymbolTable::new();
        let name = symbols.intern("x");
        let var = ExprVar { name, pos: PosIdx::NONE, resolution: Cell::new(VarResolution::Unresolved) };
        let expr = Rc::new(Expr::Var(var));
        let err = resolver(&mut symbols).resolve_root(expr);
        assert!(err.is_err());
    }

    #[test]
    fn root_scope_name_resolves_statically() {
        let mut symbols = SymbolTable::new();
        let name = symbols.intern("import");
        let var = ExprVar { name, pos: PosIdx::NONE, resolution: Cell::new(VarResolution::Unresolved) };
        let expr = Rc::new(Expr::Var(var));
        let resolved = resolver(&mut symbols).resolve_root(expr).unwrap();
        let Expr::Var(var) = resolved.as_ref() else { panic!("expected Var") };
        assert!(matches!(var.resolution.get(), VarResolution::Static { .. }));
    }

    #[test]
    fn lambda_body_sees_its_own_formal() {
        let mut symbols = SymbolTable::new();
        let name = symbols.intern("x");
        let var = ExprVar { name, pos: PosIdx::NONE, resolution: Cell::new(VarResolution::Unresolved) };
        let body = Rc::new(Expr::Var(var));
        let lambda = Expr::Lambda(ExprLambda {
            pattern: Pattern::Simple { name, pos: PosIdx::NONE },
            body,
            pos: PosIdx::NONE,
            frame_size: Cell::new(1),
            name: Cell::new(Symbol::ABSENT),
        });
        let resolved = resolver(&mut symbols).resolve_root(Rc::new(lambda)).unwrap();
        let Expr::Lambda(lambda) = resolved.as_ref() else { panic!("expected Lambda") };
        let Expr::Var(var) = lambda.body.as_ref() else { panic!("expected Var") };
        assert_eq!(var.resolution.get(), VarResolution::Static { level: 0, displacement: 0 });
    }

    #[test]
    fn with_fallback_is_recorded_when_no_static_binding_exists() {
        let mut symbols = SymbolTable::new();
        let name = symbols.intern("undefinedHere");
        let var = ExprVar { name, pos: PosIdx::NONE, resolution: Cell::new(VarResolution::Unresolved) };
        let body = Rc::new(Expr::Var(var));
        let with_attrs = Rc::new(Expr::Attrs(ExprAttrs {
            attrs: vec![],
            dynamic_attrs: vec![],
            recursive: false,
            inherit_from_exprs: vec![],
            inherit_from_slots: Cell::new(0),
            pos: PosIdx::NONE,
        }));
        let with_expr = Expr::With(ExprWith { attrs: with_attrs, body, pos: PosIdx::NONE, level: Cell::new(0) });
        let resolved = resolver(&mut symbols).resolve_root(Rc::new(with_expr)).unwrap();
        let Expr::With(with) = resolved.as_ref() else { panic!("expected With") };
        let Expr::Var(var) = with.body.as_ref() else { panic!("expected Var") };
        assert_eq!(var.resolution.get(), VarResolution::FromWith);
    }

    #[test]
    fn duplicate_dotted_paths_merge_into_one_binding() {
        let mut symbols = SymbolTable::new();
        let a = symbols.intern("a");
        let b = symbols.intern("b");
        let c = symbols.intern("c");
        let nested = |key: Symbol, value: i64| AttrDef {
            kind: AttrDefKind::Plain,
            value: Rc::new(Expr::Attrs(ExprAttrs {
                attrs: vec![(
                    key,
                    AttrDef {
                        kind: AttrDefKind::Plain,
                        value: Rc::new(Expr::Int(value)),
                        pos: PosIdx::NONE,
                        recursive: false,
                    },
                )],
                dynamic_attrs: vec![],
                recursive: false,
                inherit_from_exprs: vec![],
                inherit_from_slots: Cell::new(0),
                pos: PosIdx::NONE,
            })),
            pos: PosIdx::NONE,
            recursive: false,
        };
        let outer = ExprAttrs {
            attrs: vec![(a, nested(b, 1)), (a, nested(c, 2))],
            dynamic_attrs: vec![],
            recursive: false,
            inherit_from_exprs: vec![],
            inherit_from_slots: Cell::new(0),
            pos: PosIdx::NONE,
        };
        let resolved = resolver(&mut symbols).resolve_root(Rc::new(Expr::Attrs(outer))).unwrap();
        let Expr::Attrs(outer) = resolved.as_ref() else { panic!("expected Attrs") };
        assert_eq!(outer.attrs.len(), 1);
        let Expr::Attrs(inner) = outer.attrs[0].1.value.as_ref() else { panic!("expected nested Attrs") };
        assert_eq!(inner.attrs.len(), 2);
    }

    #[test]
    fn and_expression_resolves_both_sides() {
        let mut symbols = SymbolTable::new();
        let lhs = Rc::new(Expr::Bool(true));
        let rhs = Rc::new(Expr::Bool(false));
        let bin = Expr::BinOp(ExprBinOp { op: crate::expr::BinOp::And, lhs, rhs, pos: PosIdx::NONE });
        assert!(resolver(&mut symbols).resolve_root(Rc::new(bin)).is_ok());
    }
}
