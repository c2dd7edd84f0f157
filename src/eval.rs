//! The evaluator: turns a resolved [`Expr`] tree plus an [`Env`] into a
//! [`Value`] in weak head normal form, and the handful of forcing/coercion
//! operations every builtin is built on top of.
//!
//! Grounded in the teacher's `run.rs`/`bytecode.rs` split — a small public
//! entry point (`Evaluator::eval_source`) wrapping a stateful engine that
//! owns the symbol table, position table, allocation counters, and the
//! pluggable `Store`/`SourceResolver`/`ResourceTracker`/`VmTracer`
//! collaborators — adapted from a bytecode `VM` to a recursive tree-walker,
//! since there is no compilation pass here: `eval` recurses directly over
//! `Expr`, introducing laziness only at the specific points Nix's semantics
//! require it (let/attrset/list/call-argument bindings), exactly where
//! `lix`'s `ExprLet::eval`/`ExprAttrs::eval`/etc. call `maybeThunk` instead
//! of evaluating eagerly.

use std::cell::Cell;
use std::rc::Rc;

use crate::builtins::{self, PrimOp};
use crate::context::{ContextElement, StringContext};
use crate::derivation;
use crate::exception::{EvalError, EvalErrorKind, EvalResult, UncatchableKind};
use crate::expr::{AttrPathSegment, BinOp, Expr, ExprAttrs, ExprCall, ExprLambda, ExprLet, ExprSelect, ExprWith, VarResolution};
use crate::function::bind_pattern;
use crate::heap::{Binding, Bindings, ValueArena};
use crate::intern::{Symbol, SymbolTable, WellKnownSymbols};
use crate::namespace::Env;
use crate::pos::{Pos, PosIdx, PosTable};
use crate::resource::{NoLimitTracker, ResourceTracker};
use crate::settings::EvalSettings;
use crate::source::SourceResolver;
use crate::store::Store;
use crate::tracer::{NoopTracer, VmTracer};
use crate::value::{CanonPath, LambdaValue, NixString, PrimOpApp, Thunk, ThunkRepr, Value};

/// How a string should be produced from a value that isn't already one —
/// the three coercion modes `lix`'s `coerceToString` distinguishes, ordered
/// from least to most permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionMode {
    /// `+` and string concatenation: only strings, paths, and attrsets
    /// carrying `__toString`/`outPath` coerce. Bools, `null`, ints, floats,
    /// and lists are rejected — `"a" + 1` is a type error, not `"a1"`.
    Strict,
    /// String interpolation (`"${x}"`): [`Self::Strict`] plus integers,
    /// gated behind [`crate::settings::ExperimentalFeatures::coerce_integers`]
    /// the same way `lix` guards integer interpolation behind an
    /// experimental flag rather than allowing it unconditionally.
    Interpolation,
    /// `builtins.toString`: [`Self::Interpolation`] plus floats, bools
    /// (`true`→`"1"`, `false`→`""`), `null`→`""`, and lists (coerced
    /// element-wise and space-joined).
    ToString,
    /// Copies a path argument into the store first, recording the result
    /// in the output string's context — used by `builtins.toFile`-style
    /// contexts where a path must become a store dependency rather than a
    /// literal filesystem path. Otherwise as permissive as [`Self::Strict`].
    CopyToStore,
}

/// The evaluator engine: owns every piece of state threaded through
/// `eval`/`force`, plus the host-supplied collaborators.
pub struct Evaluator {
    pub symbols: SymbolTable,
    pub well_known: WellKnownSymbols,
    pub positions: PosTable,
    pub arena: ValueArena,
    pub settings: EvalSettings,
    pub store: Box<dyn Store>,
    pub source: Box<dyn SourceResolver>,
    resource: Box<dyn ResourceTracker>,
    tracer: Box<dyn VmTracer>,
    call_depth: Cell<usize>,
    /// The root frame every parsed unit (top-level source or an imported
    /// file) resolves and evaluates against, built once from
    /// `builtins::root_names`/`root_values` and cached so `import` and the
    /// top-level program share identical `(level, displacement)` coordinates
    /// for every global alias.
    base_env: Option<Rc<Env>>,
    /// Files already evaluated by path, keyed by canonicalized path, so a
    /// diamond of `import`s only evaluates the shared file once.
    file_cache: std::collections::HashMap<std::path::PathBuf, Value>,
}

impl Evaluator {
    pub fn new(settings: EvalSettings, store: impl Store + 'static, source: impl SourceResolver + 'static) -> Self {
        let mut symbols = SymbolTable::new();
        let well_known = WellKnownSymbols::intern(&mut symbols);
        let max_depth = settings.max_call_depth;
        Self {
            symbols,
            well_known,
            positions: PosTable::new(),
            arena: ValueArena::new(),
            settings,
            store: Box::new(store),
            source: Box::new(source),
            resource: Box::new(NoLimitTracker::new(max_depth)),
            tracer: Box::new(NoopTracer),
            call_depth: Cell::new(0),
            base_env: None,
            file_cache: std::collections::HashMap::new(),
        }
    }

    /// Parses, statically resolves, and evaluates `src` in one call, the
    /// convenience entry point most embedders want. `origin_name` labels the
    /// source in error messages and `__curPos`/stack-trace positions (a
    /// filename, or a placeholder like `<input>` for code with no file of
    /// its own).
    ///
    /// # Errors
    /// Returns a lex, parse, resolve, or evaluation error — whichever stage
    /// fails first.
    pub fn eval_source(&mut self, src: &str, origin_name: &str) -> EvalResult<Value> {
        let base_dir = std::env::current_dir().unwrap_or_default();
        let expr = self.parse_and_resolve(src, origin_name, &base_dir)?;
        let env = self.root_env();
        self.eval(&expr, &env)
    }

    /// Tokenizes, parses, and statically resolves `src`, without evaluating
    /// it. `base_dir` anchors any relative path literal the source contains
    /// (`./foo.nix`), so an imported file resolves paths relative to its own
    /// directory rather than the process's current directory.
    fn parse_and_resolve(
        &mut self,
        src: &str,
        origin_name: &str,
        base_dir: &std::path::Path,
    ) -> EvalResult<Rc<Expr>> {
        let tokens = crate::lexer::tokenize(src)
            .map_err(|e| EvalError::Parse { message: e.to_string(), pos: PosIdx::NONE })?;
        let origin_idx =
            self.positions.add_origin(crate::pos::Origin::File(origin_name.into()), Rc::from(src));
        let expr = crate::parser::parse(&tokens, origin_idx, base_dir, &mut self.positions, &mut self.symbols)
            .map_err(|e| EvalError::Parse { message: e.message, pos: e.pos })?;
        let mut resolver = crate::resolve::StaticResolver::new(&mut self.symbols);
        resolver.resolve_root(expr).map_err(|e| EvalError::Parse { message: e.to_string(), pos: e.pos() })
    }

    /// The shared base frame every parsed unit evaluates against: `builtins`,
    /// the global aliases, and `__nixPath`, bound at fixed displacements
    /// matching the base `StaticEnv` frame `StaticResolver::new` builds from
    /// the same `builtins::root_names` list. Built once and cached, since
    /// `builtins::root_values` re-derives `__nixPath` from `self.settings`
    /// every call.
    fn root_env(&mut self) -> Rc<Env> {
        if let Some(env) = &self.base_env {
            return env.clone();
        }
        let names = builtins::root_names(&mut self.symbols);
        let values = builtins::root_values(&mut self.symbols, &self.settings);
        debug_assert_eq!(names.len(), values.len());
        let root = Env::root();
        let frame = Env::child(root, names.len() as u16, Value::Null);
        for (i, value) in values.into_iter().enumerate() {
            frame.set(i as u16, value);
        }
        self.base_env = Some(frame.clone());
        frame
    }

    /// Evaluates the file at `path` (`builtins.import`'s implementation),
    /// caching the result by canonicalized path so a diamond of imports of
    /// the same file evaluates it once.
    ///
    /// # Errors
    /// Returns an error if `path` is unreadable, disallowed under the
    /// current sandbox settings, or fails to parse/resolve/evaluate.
    pub fn eval_file(&mut self, path: &std::path::Path, pos: PosIdx) -> EvalResult<Value> {
        let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(cached) = self.file_cache.get(&canon) {
            return Ok(cached.clone());
        }
        let value = self.eval_file_uncached(&canon, None, pos)?;
        self.file_cache.insert(canon, value.clone());
        Ok(value)
    }

    /// `builtins.scopedImport`: like [`Evaluator::eval_file`], but the file
    /// evaluates with `extra` merged into its `with`-reachable scope rather
    /// than only the global aliases — and is never cached, since the result
    /// depends on `extra`, not just the path.
    pub fn eval_file_scoped(&mut self, path: &std::path::Path, extra: Value, pos: PosIdx) -> EvalResult<Value> {
        let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.eval_file_uncached(&canon, Some(extra), pos)
    }

    fn eval_file_uncached(&mut self, canon: &std::path::Path, extra: Option<Value>, pos: PosIdx) -> EvalResult<Value> {
        let checked = self
            .source
            .check_source_path(canon, &self.settings)
            .map_err(|e| EvalError::custom(pos, e.to_string()))?;
        let bytes = self.source.read_file(&checked).map_err(|e| EvalError::custom(pos, e.to_string()))?;
        let src = String::from_utf8(bytes)
            .map_err(|e| EvalError::custom(pos, format!("{} is not valid UTF-8: {e}", canon.display())))?;
        let base_dir = canon.parent().map(std::path::Path::to_path_buf).unwrap_or_default();
        let origin_name = canon.display().to_string();
        let expr = self.parse_and_resolve(&src, &origin_name, &base_dir)?;
        let env = match extra {
            Some(attrs) => Env::child_with(self.root_env(), attrs),
            None => self.root_env(),
        };
        self.eval(&expr, &env)
    }

    pub fn with_resource_tracker(mut self, tracker: Box<dyn ResourceTracker>) -> Self {
        self.resource = tracker;
        self
    }

    pub fn with_tracer(mut self, tracer: Box<dyn VmTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn resolve_pos(&mut self, pos: PosIdx) -> Option<Pos> {
        self.positions.resolve(pos)
    }

    fn enter_call(&self, pos: PosIdx) -> EvalResult<()> {
        let depth = self.call_depth.get() + 1;
        self.call_depth.set(depth);
        self.resource
            .poll_interrupt()
            .map_err(|_| EvalError::Uncatchable { kind: UncatchableKind::Interrupted, pos })?;
        self.resource
            .check_call_depth(depth)
            .map_err(|_| EvalError::Uncatchable { kind: UncatchableKind::CallDepthExceeded, pos })
    }

    fn leave_call(&self) {
        self.call_depth.set(self.call_depth.get().saturating_sub(1));
    }

    // ---- forcing --------------------------------------------------------

    /// Forces `value` to weak head normal form: if it is a thunk, evaluates
    /// its suspended expression (catching a thunk forced from inside its own
    /// evaluation as an error, not infinite recursion), looping since the
    /// result of forcing a thunk can itself be another thunk (e.g. `let a =
    /// b; in a` stores a thunk in `a`'s slot whose body is the variable
    /// reference `b`, which may resolve to yet another thunk).
    pub fn force(&mut self, mut value: Value) -> EvalResult<Value> {
        loop {
            let Value::Thunk(thunk) = value else { return Ok(value) };
            let repr = std::mem::replace(&mut *thunk.0.borrow_mut(), ThunkRepr::Blackhole);
            match repr {
                ThunkRepr::Evaluated(v) => {
                    *thunk.0.borrow_mut() = ThunkRepr::Evaluated(v.clone());
                    value = v;
                }
                ThunkRepr::Blackhole => {
                    return Err(EvalError::Uncatchable { kind: UncatchableKind::InfiniteRecursion, pos: PosIdx::NONE });
                }
                ThunkRepr::Suspended { expr, env } => {
                    self.tracer.on_force_enter(expr.pos(), None, self.call_depth.get());
                    let result = self.eval(&expr, &env);
                    self.tracer.on_force_leave(self.call_depth.get());
                    match result {
                        Ok(v) => {
                            *thunk.0.borrow_mut() = ThunkRepr::Evaluated(v.clone());
                            value = v;
                        }
                        Err(e) => {
                            // A failed force is retryable: `tryEval` and
                            // friends must be able to force the same thunk
                            // again later and get the same error, not a
                            // spurious infinite-recursion report from a
                            // blackhole the failed attempt never cleared.
                            *thunk.0.borrow_mut() = ThunkRepr::Suspended { expr, env };
                            self.tracer.on_error(&e);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Evaluates `expr` in `env` to weak head normal form.
    pub fn eval(&mut self, expr: &Rc<Expr>, env: &Rc<Env>) -> EvalResult<Value> {
        match expr.as_ref() {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::String(s) => Ok(Value::String(NixString::plain(s.as_ref()))),
            Expr::Path(p) => Ok(Value::Path(CanonPath::new(p.clone()))),
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Var(var) => self.eval_var(var, env, expr),
            Expr::InheritFrom(inherit) => Ok(env.get(inherit.displacement)),
            Expr::Select(select) => self.eval_select(select, env),
            Expr::OpHasAttr(has) => self.eval_has_attr(has, env),
            Expr::Attrs(attrs) => self.eval_attrs(attrs, env),
            Expr::List(list) => {
                let items: Vec<Value> = list.elems.iter().map(|e| self.thunk_of(e, env)).collect();
                self.arena.record_list();
                Ok(Value::list(items))
            }
            Expr::Lambda(lambda) => self.eval_lambda(lambda, env, expr),
            Expr::Call(call) => self.eval_call(call, env),
            Expr::Let(let_) => self.eval_let(let_, env),
            Expr::With(with) => self.eval_with(with, env),
            Expr::If(if_) => {
                let cond = self.eval(&if_.cond, env)?;
                if self.force_bool(cond, if_.cond.pos())? {
                    self.eval(&if_.then, env)
                } else {
                    self.eval(&if_.else_, env)
                }
            }
            Expr::Assert(assert) => {
                let cond = self.eval(&assert.cond, env)?;
                if !self.force_bool(cond, assert.pos)? {
                    return Err(EvalError::eval(EvalErrorKind::AssertionFailed, assert.pos));
                }
                self.eval(&assert.body, env)
            }
            Expr::BinOp(bin) => self.eval_binop(bin, env),
            Expr::OpNot(not) => {
                let v = self.eval(&not.expr, env)?;
                Ok(Value::Bool(!self.force_bool(v, expr.pos())?))
            }
            Expr::ConcatStrings(cs) => self.eval_concat_strings(cs, env),
            Expr::Pos(p) => Ok(self.current_pos_attrs(p.pos)),
        }
    }

    /// Builds the lazily-evaluated slot for a sub-expression: most AST
    /// positions (list elements, attrset values, call arguments,
    /// let-bindings) don't evaluate their child immediately — they wrap it
    /// in a thunk captured over `env` and let the first force drive
    /// evaluation.
    fn thunk_of(&mut self, expr: &Rc<Expr>, env: &Rc<Env>) -> Value {
        self.arena.record_thunk();
        Value::Thunk(Thunk::suspended(expr.clone(), env.clone()))
    }

    fn eval_var(&mut self, var: &crate::expr::ExprVar, env: &Rc<Env>, expr: &Rc<Expr>) -> EvalResult<Value> {
        match var.resolution.get() {
            VarResolution::Static { level, displacement } => {
                let frame = env.ancestor(level);
                Ok(frame.get(displacement))
            }
            VarResolution::InheritFrom { level, displacement } => {
                let frame = env.ancestor(level);
                Ok(frame.get(displacement))
            }
            VarResolution::FromWith => self.eval_from_with(var, env, expr),
            VarResolution::Unresolved => {
                Err(EvalError::undefined_variable(var.pos, var.name))
            }
        }
    }

    fn eval_from_with(&mut self, var: &crate::expr::ExprVar, env: &Rc<Env>, _expr: &Rc<Expr>) -> EvalResult<Value> {
        let mut cur = Some(env.clone());
        while let Some(frame) = cur {
            if let Some(with_value) = &frame.with {
                let attrs_val = self.force(with_value.clone())?;
                if let Value::Attrs(attrs) = &attrs_val {
                    if let Some(binding) = attrs.get(var.name) {
                        return Ok(binding.value.clone());
                    }
                }
            }
            cur = frame.up.clone();
        }
        Err(EvalError::undefined_variable(var.pos, var.name))
    }

    fn eval_select(&mut self, select: &ExprSelect, env: &Rc<Env>) -> EvalResult<Value> {
        let mut current = self.eval(&select.expr, env)?;
        let mut path_so_far: Vec<Symbol> = Vec::new();
        for segment in &select.path {
            let name = self.segment_symbol(segment, env)?;
            let forced = self.force(current);
            let forced = match forced {
                Ok(v) => v,
                Err(e) => {
                    if select.default.is_some() {
                        return self.eval(select.default.as_ref().unwrap(), env);
                    }
                    return Err(e);
                }
            };
            match &forced {
                Value::Attrs(attrs) => match attrs.get(name) {
                    Some(binding) => {
                        current = binding.value.clone();
                        path_so_far.push(name);
                    }
                    None => {
                        if let Some(default) = &select.default {
                            return self.eval(default, env);
                        }
                        return Err(EvalError::missing_attribute(select.pos, self.describe_path(&path_so_far, name)));
                    }
                },
                _ => {
                    if let Some(default) = &select.default {
                        return self.eval(default, env);
                    }
                    return Err(EvalError::type_error(select.pos, "set", forced.type_name()));
                }
            }
        }
        self.force(current)
    }

    fn describe_path(&self, prefix: &[Symbol], last: Symbol) -> String {
        let mut parts: Vec<&str> = prefix.iter().map(|s| self.symbols.get(*s)).collect();
        parts.push(self.symbols.get(last));
        parts.join(".")
    }

    fn segment_symbol(&mut self, segment: &AttrPathSegment, env: &Rc<Env>) -> EvalResult<Symbol> {
        match segment {
            AttrPathSegment::Symbol(s) => Ok(*s),
            AttrPathSegment::Dynamic(expr) => {
                let v = self.eval(expr, env)?;
                let s = self.force_string(v, expr.pos())?;
                Ok(self.symbols_mut_intern(s.as_str()))
            }
        }
    }

    fn symbols_mut_intern(&mut self, s: &str) -> Symbol {
        self.symbols.intern(s)
    }

    fn eval_has_attr(&mut self, has: &crate::expr::ExprOpHasAttr, env: &Rc<Env>) -> EvalResult<Value> {
        let mut current = self.eval(&has.expr, env)?;
        for segment in &has.path {
            let name = self.segment_symbol(segment, env)?;
            let forced = self.force(current)?;
            match &forced {
                Value::Attrs(attrs) => match attrs.get(name) {
                    Some(binding) => current = binding.value.clone(),
                    None => return Ok(Value::Bool(false)),
                },
                _ => return Ok(Value::Bool(false)),
            }
        }
        Ok(Value::Bool(true))
    }

    fn eval_attrs(&mut self, attrs: &ExprAttrs, env: &Rc<Env>) -> EvalResult<Value> {
        let named = if attrs.recursive { attrs.attrs.len() as u16 } else { 0 };
        let hidden = attrs.inherit_from_slots.get();
        let frame_env = if named + hidden > 0 { Some(Env::child(env.clone(), named + hidden, Value::Null)) } else { None };
        let binding_env = frame_env.as_ref().unwrap_or(env);

        for (i, src_expr) in attrs.inherit_from_exprs.iter().enumerate() {
            let slot = named + i as u16;
            let value = self.thunk_of(src_expr, binding_env);
            binding_env.set(slot, value);
        }

        let mut bindings = Vec::with_capacity(attrs.attrs.len());
        for (slot, (name, def)) in attrs.attrs.iter().enumerate() {
            let value = self.thunk_of(&def.value, binding_env);
            if attrs.recursive {
                binding_env.set(slot as u16, value.clone());
            }
            bindings.push(Binding { name: *name, pos: def.pos, value });
        }
        self.arena.record_attrs();
        let mut result = Bindings::build(bindings);

        // `__overrides` only has meaning inside `rec`: it is what lets the
        // env slots sibling bindings already captured be rewritten before
        // anything else (dynamic attrs in particular) sees the set.
        if attrs.recursive {
            if let Some(overrides_binding) = result.get(self.well_known.overrides) {
                let overrides_val = self.force(overrides_binding.value.clone())?;
                if let Value::Attrs(overrides_attrs) = overrides_val {
                    for ov in overrides_attrs.iter() {
                        if let Some(slot) = attrs.attrs.iter().position(|(n, _)| *n == ov.name) {
                            binding_env.set(slot as u16, ov.value.clone());
                        }
                    }
                    result = result.merge(&overrides_attrs);
                }
            }
        }

        if !attrs.dynamic_attrs.is_empty() {
            let mut extra = Vec::with_capacity(attrs.dynamic_attrs.len());
            for dyn_attr in &attrs.dynamic_attrs {
                let name_val = self.eval(&dyn_attr.name_expr, binding_env)?;
                let name_str = self.force_string(name_val, dyn_attr.pos)?;
                let name = self.symbols_mut_intern(name_str.as_str());
                let value = self.thunk_of(&dyn_attr.value_expr, binding_env);
                extra.push(Binding { name, pos: dyn_attr.pos, value });
            }
            let extra = Bindings::build(extra);
            result = result.merge(&extra);
        }

        Ok(Value::Attrs(result))
    }

    fn eval_lambda(&mut self, lambda: &ExprLambda, env: &Rc<Env>, expr: &Rc<Expr>) -> EvalResult<Value> {
        let _ = lambda;
        self.arena.record_lambda();
        Ok(Value::Lambda(Rc::new(LambdaValue { env: env.clone(), lambda: expr.clone() })))
    }

    fn eval_call(&mut self, call: &ExprCall, env: &Rc<Env>) -> EvalResult<Value> {
        let mut callee = self.eval(&call.function, env)?;
        for arg_expr in &call.args {
            let arg = self.thunk_of(arg_expr, env);
            callee = self.call_function(callee, arg, call.pos)?;
        }
        Ok(callee)
    }

    /// Applies `f` to one argument, handling both lambdas and (possibly
    /// partially-applied) builtins, plus the `__functor` attrset-as-function
    /// convention.
    pub fn call_function(&mut self, f: Value, arg: Value, pos: PosIdx) -> EvalResult<Value> {
        self.enter_call(pos)?;
        let result = self.call_function_inner(f, arg, pos);
        self.leave_call();
        result
    }

    fn call_function_inner(&mut self, f: Value, arg: Value, pos: PosIdx) -> EvalResult<Value> {
        let forced = self.force(f)?;
        match forced {
            Value::Lambda(lambda_value) => {
                let Expr::Lambda(lambda) = lambda_value.lambda.as_ref() else {
                    unreachable!("Value::Lambda always wraps Expr::Lambda")
                };
                let frame_size = lambda.frame_size.get();
                let frame = Env::child(lambda_value.env.clone(), frame_size, Value::Null);
                self.arena.record_env();
                let arg = match &lambda.pattern {
                    crate::expr::Pattern::Attrs { .. } => self.force(arg)?,
                    crate::expr::Pattern::Simple { .. } => arg,
                };
                bind_pattern(&lambda.pattern, arg, &frame, pos)?;
                self.eval(&lambda.body, &frame)
            }
            Value::PrimOp(app) => {
                let mut args = app.args.clone();
                args.push(arg);
                let arity = builtins::arity(app.op);
                if args.len() < arity {
                    Ok(Value::PrimOp(Rc::new(PrimOpApp { op: app.op, args })))
                } else {
                    builtins::call(self, app.op, args, pos)
                }
            }
            Value::Attrs(attrs) => {
                if let Some(functor) = attrs.get(self.well_known.functor) {
                    let functor_fn = self.call_function(functor.value.clone(), Value::Attrs(attrs), pos)?;
                    self.call_function(functor_fn, arg, pos)
                } else {
                    Err(EvalError::type_error(pos, "function", "set"))
                }
            }
            other => Err(EvalError::type_error(pos, "function", other.type_name())),
        }
    }

    fn eval_let(&mut self, let_: &ExprLet, env: &Rc<Env>) -> EvalResult<Value> {
        let frame_size = let_.frame_size.get();
        let frame = Env::child(env.clone(), frame_size, Value::Null);
        self.arena.record_env();
        let named = let_.attrs.len() as u16;
        for (i, src_expr) in let_.inherit_from_exprs.iter().enumerate() {
            let value = self.thunk_of(src_expr, &frame);
            frame.set(named + i as u16, value);
        }
        for (slot, (_, def)) in let_.attrs.iter().enumerate() {
            let value = self.thunk_of(&def.value, &frame);
            frame.set(u16::try_from(slot).expect("let frame fits in u16"), value);
        }
        self.eval(&let_.body, &frame)
    }

    fn eval_with(&mut self, with: &ExprWith, env: &Rc<Env>) -> EvalResult<Value> {
        let attrs_thunk = self.thunk_of(&with.attrs, env);
        let frame = Env::child_with(env.clone(), attrs_thunk);
        self.arena.record_env();
        self.eval(&with.body, &frame)
    }

    fn eval_binop(&mut self, bin: &crate::expr::ExprBinOp, env: &Rc<Env>) -> EvalResult<Value> {
        match bin.op {
            BinOp::And => {
                let lhs = self.eval(&bin.lhs, env)?;
                if !self.force_bool(lhs, bin.pos)? {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval(&bin.rhs, env)?;
                Ok(Value::Bool(self.force_bool(rhs, bin.pos)?))
            }
            BinOp::Or => {
                let lhs = self.eval(&bin.lhs, env)?;
                if self.force_bool(lhs, bin.pos)? {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval(&bin.rhs, env)?;
                Ok(Value::Bool(self.force_bool(rhs, bin.pos)?))
            }
            BinOp::Impl => {
                let lhs = self.eval(&bin.lhs, env)?;
                if !self.force_bool(lhs, bin.pos)? {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval(&bin.rhs, env)?;
                Ok(Value::Bool(self.force_bool(rhs, bin.pos)?))
            }
            BinOp::Eq | BinOp::NotEq => {
                let lhs = self.eval(&bin.lhs, env)?;
                let rhs = self.eval(&bin.rhs, env)?;
                let eq = self.values_equal(lhs, rhs, bin.pos)?;
                Ok(Value::Bool(if bin.op == BinOp::Eq { eq } else { !eq }))
            }
            BinOp::Update => {
                let lhs = self.eval(&bin.lhs, env)?;
                let rhs = self.eval(&bin.rhs, env)?;
                let lhs = self.force_attrs(lhs, bin.pos)?;
                let rhs = self.force_attrs(rhs, bin.pos)?;
                self.arena.record_attrs();
                Ok(Value::Attrs(lhs.merge(&rhs)))
            }
            BinOp::ConcatLists => {
                let lhs = self.eval(&bin.lhs, env)?;
                let rhs = self.eval(&bin.rhs, env)?;
                let lhs = self.force_list(lhs, bin.pos)?;
                let rhs = self.force_list(rhs, bin.pos)?;
                let mut out = Vec::with_capacity(lhs.len() + rhs.len());
                out.extend(lhs.iter().cloned());
                out.extend(rhs.iter().cloned());
                self.arena.record_list();
                Ok(Value::list(out))
            }
            BinOp::Add => {
                let lhs = self.eval(&bin.lhs, env)?;
                let rhs = self.eval(&bin.rhs, env)?;
                self.eval_add(lhs, rhs, bin.pos)
            }
        }
    }

    /// `+`: dispatches on the forced left operand the way `lix`'s
    /// `ExprConcatStrings::eval` does, rather than routing through the
    /// numeric-only `__add` builtin (`builtins.add` stays numeric-only for
    /// direct calls, but the `+` operator itself also has to concatenate
    /// strings and paths). A number on the left adds numerically; a path on
    /// the left stays a path, with the right side coerced to plain text and
    /// the joined result normalized lexically; anything else concatenates
    /// as strings, unioning context.
    fn eval_add(&mut self, lhs: Value, rhs: Value, pos: PosIdx) -> EvalResult<Value> {
        let lhs = self.force(lhs)?;
        match lhs {
            Value::Int(_) | Value::Float(_) => {
                let rhs = self.force(rhs)?;
                crate::builtins::numbers::add(self, lhs, rhs, pos)
            }
            Value::Path(p) => {
                let rhs_str = self.coerce_to_string(rhs, CoercionMode::Strict, pos)?;
                let joined = format!("{}{}", p.as_path().display(), rhs_str.as_str());
                let normalized = crate::parser::normalize_lexically(std::path::Path::new(&joined));
                Ok(Value::Path(CanonPath::new(normalized)))
            }
            other => {
                let lhs_str = self.coerce_to_string(other, CoercionMode::Strict, pos)?;
                let rhs_str = self.coerce_to_string(rhs, CoercionMode::Strict, pos)?;
                let mut text = String::with_capacity(lhs_str.as_str().len() + rhs_str.as_str().len());
                text.push_str(lhs_str.as_str());
                text.push_str(rhs_str.as_str());
                let context = lhs_str.context().union(rhs_str.context());
                Ok(Value::String(NixString::new(text, context)))
            }
        }
    }

    fn eval_concat_strings(&mut self, cs: &crate::expr::ExprConcatStrings, env: &Rc<Env>) -> EvalResult<Value> {
        use crate::expr::StringPart;
        let mut text = String::new();
        let mut context = StringContext::new();
        for part in &cs.parts {
            match part {
                StringPart::Literal(s) => text.push_str(s),
                StringPart::Interpolation(expr) => {
                    let v = self.eval(expr, env)?;
                    let coerced = self.coerce_to_string(v, CoercionMode::Interpolation, expr.pos())?;
                    text.push_str(coerced.as_str());
                    context = context.union(coerced.context());
                }
            }
        }
        Ok(Value::String(NixString::new(text, context)))
    }

    fn current_pos_attrs(&mut self, pos: PosIdx) -> Value {
        let resolved = self.positions.resolve(pos);
        let (file, line, column) = match resolved {
            Some(Pos { origin, line, column }) => (format!("{origin:?}"), i64::from(line), i64::from(column)),
            None => (String::new(), 0, 0),
        };
        let file_sym = self.symbols.intern("file");
        let line_sym = self.symbols.intern("line");
        let column_sym = self.symbols.intern("column");
        let bindings = vec![
            Binding { name: file_sym, pos: PosIdx::NONE, value: Value::string(file) },
            Binding { name: line_sym, pos: PosIdx::NONE, value: Value::Int(line) },
            Binding { name: column_sym, pos: PosIdx::NONE, value: Value::Int(column) },
        ];
        Value::Attrs(Bindings::build(bindings))
    }

    // ---- forced-type helpers ---------------------------------------------

    pub fn force_bool(&mut self, value: Value, pos: PosIdx) -> EvalResult<bool> {
        match self.force(value)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::type_error(pos, "bool", other.type_name())),
        }
    }

    pub fn force_int(&mut self, value: Value, pos: PosIdx) -> EvalResult<i64> {
        match self.force(value)? {
            Value::Int(i) => Ok(i),
            other => Err(EvalError::type_error(pos, "int", other.type_name())),
        }
    }

    pub fn force_float(&mut self, value: Value, pos: PosIdx) -> EvalResult<f64> {
        match self.force(value)? {
            Value::Int(i) => Ok(i as f64),
            Value::Float(f) => Ok(f),
            other => Err(EvalError::type_error(pos, "float", other.type_name())),
        }
    }

    pub fn force_string(&mut self, value: Value, pos: PosIdx) -> EvalResult<NixString> {
        match self.force(value)? {
            Value::String(s) => Ok(s),
            other => Err(EvalError::type_error(pos, "string", other.type_name())),
        }
    }

    pub fn force_attrs(&mut self, value: Value, pos: PosIdx) -> EvalResult<Rc<Bindings>> {
        match self.force(value)? {
            Value::Attrs(a) => Ok(a),
            other => Err(EvalError::type_error(pos, "set", other.type_name())),
        }
    }

    pub fn force_list(&mut self, value: Value, pos: PosIdx) -> EvalResult<Rc<crate::value::ListInner>> {
        match self.force(value)? {
            Value::List(l) => Ok(l),
            other => Err(EvalError::type_error(pos, "list", other.type_name())),
        }
    }

    /// Forces `value` and everything reachable from it (list elements,
    /// attrset values), used by `builtins.deepSeq`/`seq`'s deep variant and
    /// by `toJSON`/`toXML`, which cannot serialize an unforced thunk.
    pub fn force_deep(&mut self, value: Value) -> EvalResult<Value> {
        let forced = self.force(value)?;
        match forced {
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(self.force_deep(item.clone())?);
                }
                Ok(Value::list(out))
            }
            Value::Attrs(attrs) => {
                let mut out = Vec::with_capacity(attrs.len());
                for binding in attrs.iter() {
                    out.push(Binding {
                        name: binding.name,
                        pos: binding.pos,
                        value: self.force_deep(binding.value.clone())?,
                    });
                }
                Ok(Value::Attrs(Bindings::build(out)))
            }
            other => Ok(other),
        }
    }

    /// Coerces a forced-or-unforced value to a string per `mode`, the
    /// implementation behind string interpolation, `+`, and
    /// `builtins.toString`.
    pub fn coerce_to_string(&mut self, value: Value, mode: CoercionMode, pos: PosIdx) -> EvalResult<NixString> {
        let forced = self.force(value)?;
        match forced {
            Value::String(s) => Ok(s),
            Value::Path(p) => {
                let text = p.as_path().display().to_string();
                if mode == CoercionMode::CopyToStore {
                    let bytes = self
                        .source
                        .read_file(&self.source.check_source_path(p.as_path(), &self.settings).map_err(|e| {
                            EvalError::custom(pos, e.to_string())
                        })?)
                        .map_err(|e| EvalError::custom(pos, e.to_string()))?;
                    let store_path = self.store.compute_store_path(
                        p.as_path().file_name().and_then(|n| n.to_str()).unwrap_or("source"),
                        &bytes,
                        crate::store::FileIngestionMethod::Flat,
                    );
                    let mut ctx = StringContext::new();
                    ctx.insert(ContextElement::Opaque { store_path: store_path.clone() });
                    Ok(NixString::new(store_path, ctx))
                } else {
                    Ok(NixString::plain(text))
                }
            }
            Value::Int(i)
                if mode == CoercionMode::ToString
                    || (mode == CoercionMode::Interpolation && self.settings.experimental_features.coerce_integers) =>
            {
                Ok(NixString::plain(i.to_string()))
            }
            Value::Float(f) if mode == CoercionMode::ToString => {
                Ok(NixString::plain(ryu::Buffer::new().format(f).to_string()))
            }
            Value::Bool(b) if mode == CoercionMode::ToString => Ok(NixString::plain(if b { "1" } else { "" })),
            Value::Null if mode == CoercionMode::ToString => Ok(NixString::plain("")),
            Value::List(items) if mode == CoercionMode::ToString => {
                let mut parts = Vec::with_capacity(items.len());
                let mut context = StringContext::new();
                for item in items.iter() {
                    let s = self.coerce_to_string(item.clone(), mode, pos)?;
                    context = context.union(s.context());
                    parts.push(s.as_str().to_string());
                }
                Ok(NixString::new(parts.join(" "), context))
            }
            Value::Attrs(attrs) => {
                if let Some(out_path) = attrs.get(self.well_known.out_path) {
                    return self.coerce_to_string(out_path.value.clone(), mode, pos);
                }
                if let Some(to_string) = attrs.get(self.well_known.to_string) {
                    let result = self.call_function(to_string.value.clone(), Value::Attrs(attrs.clone()), pos)?;
                    return self.coerce_to_string(result, mode, pos);
                }
                Err(EvalError::type_error(pos, "string", "set"))
            }
            other => Err(EvalError::type_error(pos, "string", other.type_name())),
        }
    }

    /// Whether `attrs` carries a `type = "derivation"` marker, the gate for
    /// the `outPath`-only equality short-circuit below — plain attrsets
    /// that merely happen to share an `outPath` name still compare
    /// element-wise.
    fn is_derivation(&mut self, attrs: &Rc<Bindings>) -> EvalResult<bool> {
        let Some(binding) = attrs.get(self.well_known.type_) else {
            return Ok(false);
        };
        match self.force(binding.value.clone())? {
            Value::String(s) => Ok(s.as_str() == "derivation"),
            _ => Ok(false),
        }
    }

    /// Structural equality per Nix's rules: ints and floats compare equal
    /// across type if numerically equal, lists/attrsets compare
    /// element-wise (forcing as needed), functions are never equal to
    /// anything (including themselves, by pointer, which this evaluator
    /// does not attempt to track), and string equality ignores context.
    pub fn values_equal(&mut self, a: Value, b: Value, pos: PosIdx) -> EvalResult<bool> {
        let a = self.force(a)?;
        let b = self.force(b)?;
        match (&a, &b) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
            (Value::Int(x), Value::Int(y)) => Ok(x == y),
            (Value::Float(x), Value::Float(y)) => Ok(x == y),
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => Ok((*x as f64) == *y),
            (Value::String(x), Value::String(y)) => Ok(x == y),
            (Value::Path(x), Value::Path(y)) => Ok(x == y),
            (Value::List(x), Value::List(y)) => {
                if x.len() != y.len() {
                    return Ok(false);
                }
                for (xi, yi) in x.iter().zip(y.iter()) {
                    if !self.values_equal(xi.clone(), yi.clone(), pos)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Attrs(x), Value::Attrs(y)) => {
                if self.is_derivation(x)? && self.is_derivation(y)? {
                    let x_out = x.get(self.well_known.out_path).map(|b| b.value.clone());
                    let y_out = y.get(self.well_known.out_path).map(|b| b.value.clone());
                    return match (x_out, y_out) {
                        (Some(xo), Some(yo)) => self.values_equal(xo, yo, pos),
                        _ => Ok(false),
                    };
                }
                if x.len() != y.len() {
                    return Ok(false);
                }
                for binding in x.iter() {
                    match y.get(binding.name) {
                        Some(other) => {
                            if !self.values_equal(binding.value.clone(), other.value.clone(), pos)? {
                                return Ok(false);
                            }
                        }
                        None => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Value::Lambda(_) | Value::PrimOp(_), _) | (_, Value::Lambda(_) | Value::PrimOp(_)) => Ok(false),
            _ => Ok(false),
        }
    }

    /// Builds the attrset `derivationStrict` returns, gluing the pure
    /// derivation-construction logic in `derivation.rs` to forced,
    /// string-coerced input from the caller's attrset.
    pub fn derivation_strict(&mut self, attrs: Value, pos: PosIdx) -> EvalResult<Value> {
        let attrs = self.force_attrs(attrs, pos)?;
        let name_sym = self.symbols.intern("name");
        let system_sym = self.symbols.intern("system");
        let builder_sym = self.symbols.intern("builder");
        let args_sym = self.symbols.intern("args");
        let name = self.required_string_attr(&attrs, name_sym, pos)?;
        let system = self.required_string_attr(&attrs, system_sym, pos)?;
        let builder = self.required_string_attr(&attrs, builder_sym, pos)?;

        let args = match attrs.get(args_sym) {
            Some(binding) => {
                let list = self.force_list(binding.value.clone(), pos)?;
                let mut out = Vec::with_capacity(list.len());
                for item in list.iter() {
                    out.push(self.coerce_to_string(item.clone(), CoercionMode::ToString, pos)?.as_str().to_string());
                }
                out
            }
            None => Vec::new(),
        };

        let outputs_sym = self.well_known.outputs;
        let outputs = match attrs.get(outputs_sym) {
            Some(binding) => {
                let list = self.force_list(binding.value.clone(), pos)?;
                let mut out = Vec::with_capacity(list.len());
                for item in list.iter() {
                    out.push(self.force_string(item.clone(), pos)?.as_str().to_string());
                }
                out
            }
            None => vec!["out".to_string()],
        };

        let mut env = std::collections::BTreeMap::new();
        for binding in attrs.iter() {
            let key = self.symbols.get(binding.name).to_string();
            if matches!(key.as_str(), "args") {
                continue;
            }
            let value_str = self.coerce_to_string(binding.value.clone(), CoercionMode::ToString, pos)?;
            env.insert(key, value_str.as_str().to_string());
        }

        let output_hash_algo_sym = self.symbols.intern("outputHashAlgo");
        let output_hash_sym = self.symbols.intern("outputHash");
        let output_hash = match (attrs.get(output_hash_algo_sym), attrs.get(output_hash_sym)) {
            (Some(algo), Some(hash)) => Some((
                self.force_string(algo.value.clone(), pos)?.as_str().to_string(),
                self.force_string(hash.value.clone(), pos)?.as_str().to_string(),
            )),
            _ => None,
        };

        let input = derivation::DerivationInput {
            name: name.clone(),
            system,
            builder,
            args,
            env,
            outputs,
            input_drvs: std::collections::BTreeMap::new(),
            input_srcs: Vec::new(),
            output_hash,
        };

        let (_drv, output_paths, drv_path) = derivation::build_derivation(input, self.store.as_ref());

        let mut result = Vec::with_capacity(output_paths.len() + 2);
        let drv_path_sym = self.well_known.drv_path;
        result.push(Binding { name: drv_path_sym, pos, value: Value::string(drv_path) });
        let out_path_sym = self.well_known.out_path;
        if let Some(out_path) = output_paths.get("out") {
            result.push(Binding { name: out_path_sym, pos, value: Value::string(out_path.clone()) });
        }
        for (output_name, path) in &output_paths {
            let sym = self.symbols.intern(output_name);
            result.push(Binding { name: sym, pos, value: Value::string(path.clone()) });
        }
        Ok(Value::Attrs(Bindings::build(result)))
    }

    fn required_string_attr(&mut self, attrs: &Rc<Bindings>, name: Symbol, pos: PosIdx) -> EvalResult<String> {
        match attrs.get(name) {
            Some(binding) => Ok(self.coerce_to_string(binding.value.clone(), CoercionMode::ToString, pos)?.as_str().to_string()),
            None => Err(EvalError::missing_attribute(pos, self.symbols.get(name).to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AttrDefKind, ExprAttrs, ExprBinOp, ExprVar};
    use crate::pos::PosIdx;
    use crate::settings::EvalSettings;
    use crate::source::MemorySourceResolver;
    use crate::store::NullStore;
    use std::cell::Cell as StdCell;

    fn new_evaluator() -> Evaluator {
        Evaluator::new(EvalSettings::unrestricted(), NullStore, MemorySourceResolver::new())
    }

    #[test]
    fn evaluates_integer_literal() {
        let mut ev = new_evaluator();
        let env = Env::root();
        let expr = Rc::new(Expr::Int(42));
        let v = ev.eval(&expr, &env).unwrap();
        assert!(matches!(v, Value::Int(42)));
    }

    #[test]
    fn and_short_circuits_without_forcing_rhs() {
        let mut ev = new_evaluator();
        let env = Env::root();
        let lhs = Rc::new(Expr::Bool(false));
        // rhs would error if forced (wrong type), proving short-circuit.
        let rhs = Rc::new(Expr::Int(1));
        let bin = Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::And, lhs, rhs, pos: PosIdx::NONE }));
        let v = ev.eval(&bin, &env).unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }

    #[test]
    fn int_and_float_compare_equal() {
        let mut ev = new_evaluator();
        let eq = ev.values_equal(Value::Int(1), Value::Float(1.0), PosIdx::NONE).unwrap();
        assert!(eq);
    }

    #[test]
    fn attrset_literal_evaluates_lazily_until_forced() {
        let mut ev = new_evaluator();
        let env = Env::root();
        let sym = ev.symbols.intern("a");
        let attrs = ExprAttrs {
            attrs: vec![(
                sym,
                crate::expr::AttrDef { kind: AttrDefKind::Plain, value: Rc::new(Expr::Int(1)), pos: PosIdx::NONE, recursive: false },
            )],
            dynamic_attrs: Vec::new(),
            recursive: false,
            inherit_from_exprs: Vec::new(),
            inherit_from_slots: StdCell::new(0),
            pos: PosIdx::NONE,
        };
        let expr = Rc::new(Expr::Attrs(attrs));
        let v = ev.eval(&expr, &env).unwrap();
        let Value::Attrs(bindings) = v else { panic!("expected attrs") };
        assert_eq!(bindings.len(), 1);
        let field = bindings.get(sym).unwrap();
        assert!(field.value.is_thunk());
    }

    #[test]
    fn undefined_variable_is_an_eval_error() {
        let mut ev = new_evaluator();
        let env = Env::root();
        let name = ev.symbols.intern("x");
        let var = ExprVar { name, pos: PosIdx::NONE, resolution: StdCell::new(VarResolution::Unresolved) };
        let expr = Rc::new(Expr::Var(var));
        let err = ev.eval(&expr, &env).unwrap_err();
        assert!(err.is_catchable());
    }

    #[test]
    fn plus_concatenates_strings_with_empty_context() {
        let mut ev = new_evaluator();
        let env = Env::root();
        let lhs = Rc::new(Expr::String(Rc::from("b")));
        let rhs = Rc::new(Expr::String(Rc::from("c")));
        let bin = Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Add, lhs, rhs, pos: PosIdx::NONE }));
        let v = ev.eval(&bin, &env).unwrap();
        let Value::String(s) = v else { panic!("expected string") };
        assert_eq!(s.as_str(), "bc");
        assert!(s.context().is_empty());
    }

    #[test]
    fn plus_on_a_path_stays_a_path() {
        let mut ev = new_evaluator();
        let env = Env::root();
        let lhs = Rc::new(Expr::Path(Rc::from(std::path::Path::new("/a"))));
        let rhs = Rc::new(Expr::String(Rc::from("b")));
        let bin = Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Add, lhs, rhs, pos: PosIdx::NONE }));
        let v = ev.eval(&bin, &env).unwrap();
        let Value::Path(p) = v else { panic!("expected path") };
        assert_eq!(p.as_path(), std::path::Path::new("/ab"));
    }

    #[test]
    fn plus_rejects_non_numeric_non_string_operands() {
        let mut ev = new_evaluator();
        let env = Env::root();
        let lhs = Rc::new(Expr::String(Rc::from("a")));
        let rhs = Rc::new(Expr::Bool(true));
        let bin = Rc::new(Expr::BinOp(ExprBinOp { op: BinOp::Add, lhs, rhs, pos: PosIdx::NONE }));
        let err = ev.eval(&bin, &env).unwrap_err();
        assert!(err.is_catchable());
    }

    #[test]
    fn string_interpolation_rejects_a_bool() {
        let mut ev = new_evaluator();
        let err = ev.eval_source(r#""${true}""#, "<test>").unwrap_err();
        assert!(err.is_catchable());
    }

    #[test]
    fn string_interpolation_accepts_a_nested_concatenation() {
        let mut ev = new_evaluator();
        let v = ev.eval_source(r#""a${"b" + "c"}d""#, "<test>").unwrap();
        let Value::String(s) = v else { panic!("expected string") };
        assert_eq!(s.as_str(), "abcd");
        assert!(s.context().is_empty());
    }
}
