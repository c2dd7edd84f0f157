//! String context: the set of store-path dependencies carried alongside a
//! string value.
//!
//! Whenever a string is built from (or incorporates) a derivation output or a
//! store path, that dependency is recorded in the string's context so that
//! later using the string inside a derivation automatically wires up the
//! build dependency. Context elements are kept in a sorted `Vec` rather than
//! a hash set: contexts are usually tiny (0-3 elements), sorted insertion
//! keeps two structurally-equal contexts byte-identical (invariant 3 in
//! `SPEC_FULL.md` §3), and it gives `//`/`+`-style unions a cheap merge over
//! two already-sorted slices instead of a generic set union.

use std::cmp::Ordering;

/// One tagged store-path dependency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextElement {
    /// A direct runtime dependency on a store path (e.g. a source file that
    /// was copied into the store).
    Opaque { store_path: String },
    /// A dependency on one specific output of a derivation.
    Built { drv_path: String, output: String },
    /// A dependency on a derivation's entire source+binary closure (used by
    /// `unsafeDiscardOutputDependency`-style constructs and `toFile`).
    DrvDeep { drv_path: String },
}

impl ContextElement {
    fn sort_key(&self) -> (&str, &str) {
        match self {
            Self::Opaque { store_path } => (store_path.as_str(), ""),
            Self::Built { drv_path, output } => (drv_path.as_str(), output.as_str()),
            Self::DrvDeep { drv_path } => (drv_path.as_str(), ""),
        }
    }
}

/// A sorted, deduplicated set of [`ContextElement`]s attached to a string
/// value.
///
/// Empty contexts are the overwhelmingly common case, so `StringContext`
/// stores `Vec::new()` (no allocation) when there is nothing to track.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct StringContext(Vec<ContextElement>);

impl StringContext {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single(elem: ContextElement) -> Self {
        Self(vec![elem])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextElement> {
        self.0.iter()
    }

    pub fn insert(&mut self, elem: ContextElement) {
        match self.0.binary_search(&elem) {
            Ok(_) => {}
            Err(idx) => self.0.insert(idx, elem),
        }
    }

    /// Merges `other` into a fresh context containing the union of both,
    /// preserving sortedness. Used by `+` on strings and by any builtin that
    /// combines several context-bearing strings (`concatStringsSep`, `map`
    /// over strings, …).
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = Vec::with_capacity(self.0.len() + other.0.len());
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].sort_key().cmp(&other.0[j].sort_key()) {
                Ordering::Less => {
                    out.push(self.0[i].clone());
                    i += 1;
                }
                Ordering::Greater => {
                    out.push(other.0[j].clone());
                    j += 1;
                }
                Ordering::Equal => {
                    out.push(self.0[i].clone());
                    i += 1;
                    j += 1;
                }
            }
        }
        out.extend_from_slice(&self.0[i..]);
        out.extend_from_slice(&other.0[j..]);
        Self(out)
    }

    /// Unions an arbitrary number of contexts in one pass; used when
    /// concatenating more than two context-bearing strings at once
    /// (`ConcatStrings` with many interpolated parts).
    #[must_use]
    pub fn union_all<'a>(contexts: impl IntoIterator<Item = &'a Self>) -> Self {
        contexts.into_iter().fold(Self::new(), |acc, c| acc.union(c))
    }
}

impl FromIterator<ContextElement> for StringContext {
    fn from_iter<T: IntoIterator<Item = ContextElement>>(iter: T) -> Self {
        let mut v: Vec<_> = iter.into_iter().collect();
        v.sort();
        v.dedup();
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque(s: &str) -> ContextElement {
        ContextElement::Opaque {
            store_path: s.to_string(),
        }
    }

    #[test]
    fn union_is_sorted_and_deduplicated() {
        let a = StringContext::from_iter([opaque("b"), opaque("a")]);
        let b = StringContext::from_iter([opaque("a"), opaque("c")]);
        let u = a.union(&b);
        let paths: Vec<_> = u
            .iter()
            .map(|e| match e {
                ContextElement::Opaque { store_path } => store_path.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(paths, vec!["a", "b", "c"]);
    }

    #[test]
    fn union_is_monotonic() {
        // context(op(x, y)) must be a superset of context(x) and context(y),
        // per the "string context monotonicity" testable property.
        let a = StringContext::single(opaque("x"));
        let b = StringContext::single(opaque("y"));
        let u = a.union(&b);
        assert!(u.len() >= a.len());
        assert!(u.len() >= b.len());
        assert!(u.iter().any(|e| *e == opaque("x")));
        assert!(u.iter().any(|e| *e == opaque("y")));
    }
}
