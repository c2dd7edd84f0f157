#![doc = include_str!("../README.md")]
#![expect(
    clippy::cast_possible_truncation,
    reason = "AST node counts and frame sizes are checked against u16 ranges before truncation"
)]
#![expect(
    clippy::cast_sign_loss,
    reason = "nixbase32 encoding and hashing intentionally reinterpret bytes"
)]
#![expect(
    clippy::cast_possible_wrap,
    reason = "store-path hashing reinterprets digest bytes, not counts"
)]
#![expect(
    clippy::too_many_lines,
    reason = "parser productions and the builtins dispatch table read better kept together"
)]
#![expect(
    clippy::unnecessary_wraps,
    reason = "primop and eval dispatch signatures are uniform EvalResult returns"
)]

mod builtins;
mod context;
mod derivation;
mod eval;
mod exception;
mod expr;
mod function;
mod heap;
mod intern;
mod json;
mod lexer;
mod namespace;
mod parser;
mod pos;
mod resolve;
mod resource;
mod settings;
mod source;
mod store;
mod tracer;
mod value;

pub use crate::context::{ContextElement, StringContext};
pub use crate::derivation::{DerivationInput, build_derivation, hash_placeholder};
pub use crate::eval::{CoercionMode, Evaluator};
pub use crate::exception::{EvalError, EvalErrorKind, EvalResult, TraceFrame, UncatchableKind};
pub use crate::expr::{Expr, VarResolution};
pub use crate::heap::{Binding, Bindings, HeapDiff, HeapStats};
pub use crate::intern::{Symbol, SymbolTable, WellKnownSymbols};
pub use crate::lexer::{LexError, Token, tokenize};
pub use crate::namespace::{Env, StaticEnv};
pub use crate::parser::{ParseError, parse};
pub use crate::pos::{Origin, Pos, PosIdx, PosTable};
pub use crate::resolve::{ResolveError, StaticResolver};
pub use crate::resource::{LimitedTracker, NoLimitTracker, ResourceError, ResourceTracker};
pub use crate::settings::{AllowedPath, EvalSettings, ExperimentalFeatures};
pub use crate::source::{
    CheckedPath, FileType, MAX_SYMLINK_FOLLOWS, MemorySourceResolver, RestrictedPathError,
    SourceResolver,
};
pub use crate::store::{
    Derivation, DerivationOutput, FileIngestionMethod, NullStore, PathInfo, Store, StorePath,
};
pub use crate::tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer};
pub use crate::value::{
    CanonPath, ExternalValue, LambdaValue, ListInner, NixString, PrimOpApp, Thunk, ThunkRepr,
    Value,
};
