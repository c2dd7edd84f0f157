//! Evaluation tracing: an optional hook the evaluator calls on every thunk
//! force and lambda call, used for debugging and for an interactive
//! debugger to intercept errors before they unwind.
//!
//! Trimmed from the teacher's `VmTracer` (whose hooks are opcode-granular —
//! `on_instruction`, `on_cell_load`, `on_make_function`, ...) to the handful
//! of events a tree-walking evaluator actually produces: entering/leaving a
//! thunk force, entering/leaving a lambda call, and an error about to
//! propagate out of `force`. `NoopTracer` and `StderrTracer` are kept as the
//! same pair the teacher ships, since a default-should-cost-nothing tracer
//! plus a human-readable one for debugging covers the overwhelming majority
//! of real uses.

use std::fmt;

use crate::exception::EvalError;
use crate::intern::{Symbol, SymbolTable};
use crate::pos::PosIdx;

/// Hooks called by the evaluator at trace points. All methods have no-op
/// default bodies so a tracer only needs to implement the events it cares
/// about.
pub trait VmTracer: fmt::Debug {
    /// A thunk is about to be forced. `name` is the binding name the thunk
    /// was stored under, if known (most thunks are anonymous — list
    /// elements, call arguments).
    fn on_force_enter(&mut self, _pos: PosIdx, _name: Option<Symbol>, _depth: usize) {}

    /// The force from the matching `on_force_enter` completed.
    fn on_force_leave(&mut self, _depth: usize) {}

    /// A lambda is about to be called.
    fn on_call_enter(&mut self, _pos: PosIdx, _name: Option<Symbol>, _depth: usize) {}

    fn on_call_leave(&mut self, _depth: usize) {}

    /// An error is about to propagate out of `force`/`callFunction`. Called
    /// before unwinding begins, so an interactive debugger implementing
    /// this can inspect evaluator state at the point of failure. Returning
    /// is always followed by the error propagating regardless of what this
    /// hook does — it cannot suppress the error, only observe it.
    fn on_error(&mut self, _err: &EvalError) {}
}

/// The default, zero-overhead tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Prints every trace event to stderr as it happens, indented by call
/// depth. Intended for interactively debugging a stuck or misbehaving
/// expression, not for production use.
#[derive(Debug, Clone, Default)]
pub struct StderrTracer {
    _private: (),
}

impl StderrTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmTracer for StderrTracer {
    fn on_force_enter(&mut self, pos: PosIdx, name: Option<Symbol>, depth: usize) {
        let indent = "  ".repeat(depth);
        match name {
            Some(_) => eprintln!("{indent}force @ {pos:?} (named)"),
            None => eprintln!("{indent}force @ {pos:?}"),
        }
    }

    fn on_call_enter(&mut self, pos: PosIdx, _name: Option<Symbol>, depth: usize) {
        let indent = "  ".repeat(depth);
        eprintln!("{indent}call @ {pos:?}");
    }

    fn on_error(&mut self, err: &EvalError) {
        eprintln!("error: {err}");
    }
}

/// Records every trace event in order, for tests that want to assert on
/// evaluation shape (how many forces happened, whether a particular call
/// site was ever reached) without parsing `StderrTracer`'s text output.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    ForceEnter { pos: PosIdx, depth: usize },
    ForceLeave { depth: usize },
    CallEnter { pos: PosIdx, depth: usize },
    CallLeave { depth: usize },
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_count(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, TraceEvent::ForceEnter { .. })).count()
    }
}

impl VmTracer for RecordingTracer {
    fn on_force_enter(&mut self, pos: PosIdx, _name: Option<Symbol>, depth: usize) {
        self.events.push(TraceEvent::ForceEnter { pos, depth });
    }

    fn on_force_leave(&mut self, depth: usize) {
        self.events.push(TraceEvent::ForceLeave { depth });
    }

    fn on_call_enter(&mut self, pos: PosIdx, _name: Option<Symbol>, depth: usize) {
        self.events.push(TraceEvent::CallEnter { pos, depth });
    }

    fn on_call_leave(&mut self, depth: usize) {
        self.events.push(TraceEvent::CallLeave { depth });
    }
}

/// Renders a symbol for a trace line, falling back to `<anon>` — a tiny
/// helper so tracers that want human-readable names don't each re-implement
/// the same `Option<Symbol>` dance.
pub fn symbol_or_anon(symbols: &SymbolTable, name: Option<Symbol>) -> &str {
    match name {
        Some(s) => symbols.get(s),
        None => "<anon>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_counts_forces() {
        let mut t = RecordingTracer::new();
        t.on_force_enter(PosIdx::NONE, None, 0);
        t.on_force_leave(0);
        t.on_force_enter(PosIdx::NONE, None, 1);
        assert_eq!(t.force_count(), 2);
    }

    #[test]
    fn noop_tracer_does_nothing_observable() {
        let mut t = NoopTracer;
        t.on_force_enter(PosIdx::NONE, None, 0);
        t.on_call_enter(PosIdx::NONE, None, 0);
    }
}
