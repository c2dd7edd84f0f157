//! The evaluator's error taxonomy.
//!
//! `EvalError` distinguishes three tiers, mirroring the teacher's
//! `Internal`/`Exc`/`UncatchableExc` split in `RunError`:
//!
//! - [`EvalError::Parse`] — a syntax error, raised before evaluation starts
//!   and never seen by `builtins.tryEval`.
//! - [`EvalError::Eval`] — an ordinary evaluation failure (`throw`, a failed
//!   `assert`, a type error, an undefined variable, ...). Catchable by
//!   `builtins.tryEval`, exactly like the teacher's `Exc` tier is catchable
//!   by `try`/`except`.
//! - [`EvalError::Uncatchable`] — a resource-limit violation or a
//!   host-requested cancellation. Never caught by `tryEval`, for the same
//!   reason the teacher's `UncatchableExc` can't be caught by `except`:
//!   letting untrusted code swallow "you ran too long" defeats the limit.

use std::fmt;

use crate::intern::{Symbol, SymbolTable};
use crate::pos::{Pos, PosIdx};
use crate::value::NixString;

pub type EvalResult<T> = Result<T, EvalError>;

/// An ordinary (catchable) evaluation failure.
#[derive(Debug, Clone)]
pub enum EvalErrorKind {
    /// A value had the wrong type for the operation being performed.
    TypeError { expected: &'static str, got: &'static str },
    /// `throw "message"`.
    Thrown { message: NixString },
    /// `assert cond; ...` with `cond` false.
    AssertionFailed,
    /// A variable had no binding, static or dynamic (via `with`).
    UndefinedVariable { name: Symbol },
    /// A lambda's attrset pattern required `name` but the caller didn't
    /// supply it and it has no default.
    MissingArgument { name: Symbol },
    /// A lambda's attrset pattern has no `...` and the caller supplied an
    /// attribute the pattern doesn't name.
    UnexpectedArgument { name: Symbol },
    /// `set.a.b.c` (without `or`) where some prefix of the path is missing.
    MissingAttribute { path: String },
    /// `list[index]` (via `builtins.elemAt`) out of bounds.
    IndexOutOfBounds { index: i64, len: usize },
    DivisionByZero,
    /// Checked 64-bit arithmetic overflowed.
    IntegerOverflow,
    /// A path argument resolved outside every allowed search-path prefix
    /// under `restrictEval`, or otherwise failed to resolve.
    InvalidPath { path: String },
    /// A path access was denied by the configured `SourceResolver` sandbox.
    RestrictedPath { path: String },
    /// `__overrides`/derivation construction or another builtin rejected its
    /// arguments for a reason not covered by a more specific kind above.
    Custom { message: String },
}

impl EvalErrorKind {
    pub fn describe(&self, symbols: &SymbolTable) -> String {
        match self {
            Self::TypeError { expected, got } => {
                format!("expected a {expected} but got a {got}")
            }
            Self::Thrown { message } => message.as_str().to_string(),
            Self::AssertionFailed => "assertion failed".to_string(),
            Self::UndefinedVariable { name } => {
                format!("undefined variable '{}'", symbols.get(*name))
            }
            Self::MissingArgument { name } => {
                format!("function called without required argument '{}'", symbols.get(*name))
            }
            Self::UnexpectedArgument { name } => {
                format!("function called with unexpected argument '{}'", symbols.get(*name))
            }
            Self::MissingAttribute { path } => format!("attribute '{path}' missing"),
            Self::IndexOutOfBounds { index, len } => {
                format!("list index {index} out of bounds (length {len})")
            }
            Self::DivisionByZero => "division by zero".to_string(),
            Self::IntegerOverflow => "integer overflow".to_string(),
            Self::InvalidPath { path } => format!("path '{path}' does not exist"),
            Self::RestrictedPath { path } => {
                format!("access to path '{path}' is forbidden in restricted mode")
            }
            Self::Custom { message } => message.clone(),
        }
    }
}

/// A resource-limit violation or cancellation: never catchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncatchableKind {
    /// A thunk was forced while already being forced (`force(a)` inside the
    /// evaluation of `a` itself).
    InfiniteRecursion,
    /// `ResourceTracker::max_call_depth` exceeded.
    CallDepthExceeded,
    /// The host's `ResourceTracker` requested cancellation mid-evaluation.
    Interrupted,
}

impl fmt::Display for UncatchableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InfiniteRecursion => write!(f, "infinite recursion encountered"),
            Self::CallDepthExceeded => write!(f, "stack overflow (possible infinite recursion)"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// A stack trace entry, attached to an error on the way out through nested
/// `force`/`callFunction` frames the same way the teacher's `StackFrame`
/// list builds up through nested Python calls, but cheap to build: we only
/// record positions, not full frame snapshots, since a Nix evaluator has no
/// local-variable state worth showing per frame.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub pos: PosIdx,
    pub note: &'static str,
}

/// An error produced while evaluating a Nix expression.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// A lexer/parser failure, with the message already fully rendered
    /// (the parser has the source text and line/column info in hand at the
    /// point the error is raised, so there is no reason to defer
    /// formatting).
    Parse { message: String, pos: PosIdx },
    Eval {
        kind: EvalErrorKind,
        pos: PosIdx,
        trace: Vec<TraceFrame>,
    },
    Uncatchable { kind: UncatchableKind, pos: PosIdx },
}

impl EvalError {
    pub fn eval(kind: EvalErrorKind, pos: PosIdx) -> Self {
        Self::Eval { kind, pos, trace: Vec::new() }
    }

    pub fn type_error(pos: PosIdx, expected: &'static str, got: &'static str) -> Self {
        Self::eval(EvalErrorKind::TypeError { expected, got }, pos)
    }

    pub fn undefined_variable(pos: PosIdx, name: Symbol) -> Self {
        Self::eval(EvalErrorKind::UndefinedVariable { name }, pos)
    }

    pub fn missing_argument(pos: PosIdx, name: Symbol) -> Self {
        Self::eval(EvalErrorKind::MissingArgument { name }, pos)
    }

    pub fn unexpected_argument(pos: PosIdx, name: Symbol) -> Self {
        Self::eval(EvalErrorKind::UnexpectedArgument { name }, pos)
    }

    pub fn missing_attribute(pos: PosIdx, path: impl Into<String>) -> Self {
        Self::eval(EvalErrorKind::MissingAttribute { path: path.into() }, pos)
    }

    pub fn custom(pos: PosIdx, message: impl Into<String>) -> Self {
        Self::eval(EvalErrorKind::Custom { message: message.into() }, pos)
    }

    pub fn thrown(pos: PosIdx, message: NixString) -> Self {
        Self::eval(EvalErrorKind::Thrown { message }, pos)
    }

    /// Whether `builtins.tryEval` should catch this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Eval { .. })
    }

    /// Pushes one frame of context onto an `Eval` error's trace as it
    /// unwinds through `force`/`callFunction`. A no-op for `Parse` and
    /// `Uncatchable` errors, which don't carry a trace.
    pub fn with_frame(mut self, pos: PosIdx, note: &'static str) -> Self {
        if let Self::Eval { trace, .. } = &mut self {
            trace.push(TraceFrame { pos, note });
        }
        self
    }

    /// Renders a one-line, human-readable message. Full positions require a
    /// `PosTable` to resolve; callers that have one should prefer
    /// [`EvalError::render`].
    pub fn message(&self, symbols: &SymbolTable) -> String {
        match self {
            Self::Parse { message, .. } => message.clone(),
            Self::Eval { kind, .. } => kind.describe(symbols),
            Self::Uncatchable { kind, .. } => kind.to_string(),
        }
    }

    pub fn render(&self, symbols: &SymbolTable, pos: Option<Pos>) -> String {
        let msg = self.message(symbols);
        match pos {
            Some(pos) => format!("error: {msg}\n       at {pos}"),
            None => format!("error: {msg}"),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message, .. } => write!(f, "syntax error: {message}"),
            Self::Eval { kind, .. } => write!(f, "{kind:?}"),
            Self::Uncatchable { kind, .. } => write!(f, "{kind}"),
        }
    }
}

impl std::error::Error for EvalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_variable_message_includes_name() {
        let mut symbols = SymbolTable::new();
        let name = symbols.intern("foo");
        let err = EvalError::undefined_variable(PosIdx::NONE, name);
        assert!(err.message(&symbols).contains("foo"));
    }

    #[test]
    fn parse_errors_are_not_catchable() {
        let err = EvalError::Parse { message: "oops".into(), pos: PosIdx::NONE };
        assert!(!err.is_catchable());
    }

    #[test]
    fn uncatchable_errors_are_not_catchable() {
        let err = EvalError::Uncatchable { kind: UncatchableKind::Interrupted, pos: PosIdx::NONE };
        assert!(!err.is_catchable());
    }
}
