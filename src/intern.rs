//! Identifier interning.
//!
//! `SymbolTable` stores each distinct identifier string exactly once and hands
//! back a small integer handle (`Symbol`). Every subsequent comparison between
//! two identifiers — in the parser, the static resolver, and attribute-set
//! lookups — is then an integer comparison rather than a string comparison.
//!
//! Interning is append-only for the lifetime of the table: symbols are never
//! removed, and a given string always maps to the same `Symbol` once created.

use std::collections::HashMap;

/// A small integer handle for an interned identifier.
///
/// `Symbol(0)` is reserved and never returned by [`SymbolTable::intern`]; it
/// is used by callers (e.g. `Binding::name` defaults, `Var` placeholders) to
/// mean "absent" without wrapping every field in `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Symbol(u32);

impl Symbol {
    /// The reserved "absent" symbol. No interned identifier ever has this id.
    pub const ABSENT: Symbol = Symbol(0);

    #[inline]
    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

/// Interns identifier strings, handing back [`Symbol`] handles.
///
/// Backed by a `Vec<Box<str>>` for O(1) id-to-string lookup and a
/// `HashMap<Box<str>, Symbol>` for string-to-id lookup during parsing. Both
/// own their own copy of the string; once interned, a string's storage never
/// moves, so `&str` slices handed out by [`SymbolTable::get`] are stable for
/// the table's lifetime (in practice, the evaluator's lifetime).
#[derive(Debug, Default)]
pub struct SymbolTable {
    strings: Vec<Box<str>>,
    by_name: HashMap<Box<str>, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        // Reserve index 0 for Symbol::ABSENT so real symbols start at 1,
        // matching the "symbol ids start at 1" convention used throughout.
        Self {
            strings: vec!["".into()],
            by_name: HashMap::new(),
        }
    }

    /// Interns `s`, returning its `Symbol`. Repeated calls with an
    /// equal string return the same `Symbol`.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.by_name.get(s) {
            return sym;
        }
        let id = u32::try_from(self.strings.len()).expect("symbol table overflow");
        let sym = Symbol(id);
        self.strings.push(s.into());
        self.by_name.insert(s.into(), sym);
        sym
    }

    /// Resolves a symbol back to its string. Panics on `Symbol::ABSENT` or a
    /// symbol from a different table — both indicate a caller bug.
    pub fn get(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Symbols for identifiers the evaluator itself needs to recognize by
/// meaning rather than by user-visible spelling: `__overrides`, `__functor`,
/// `__toString`, `outPath`, and a handful of others referenced from the
/// evaluator's hot paths (derivation equality short-circuit, `__overrides`
/// application, string-coercion via `__toString`). Interning these once at
/// construction avoids re-interning the same literal on every lookup.
#[derive(Debug, Clone, Copy)]
pub struct WellKnownSymbols {
    pub body: Symbol,
    pub overrides: Symbol,
    pub functor: Symbol,
    pub to_string: Symbol,
    pub out_path: Symbol,
    pub outputs: Symbol,
    pub type_: Symbol,
    pub drv_path: Symbol,
    pub key: Symbol,
    pub operator: Symbol,
    pub start_set: Symbol,
    pub success: Symbol,
    pub value: Symbol,
}

impl WellKnownSymbols {
    pub fn intern(table: &mut SymbolTable) -> Self {
        Self {
            body: table.intern("body"),
            overrides: table.intern("__overrides"),
            functor: table.intern("__functor"),
            to_string: table.intern("__toString"),
            out_path: table.intern("outPath"),
            outputs: table.intern("outputs"),
            type_: table.intern("type"),
            drv_path: table.intern("drvPath"),
            key: table.intern("key"),
            operator: table.intern("operator"),
            start_set: table.intern("startSet"),
            success: table.intern("success"),
            value: table.intern("value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_consistent_with_equality() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("bar");
        let c = table.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.get(a), "foo");
        assert_eq!(table.get(b), "bar");
    }

    #[test]
    fn absent_symbol_never_interned() {
        let mut table = SymbolTable::new();
        assert!(Symbol::ABSENT.is_absent());
        let a = table.intern("a");
        assert!(!a.is_absent());
    }
}
