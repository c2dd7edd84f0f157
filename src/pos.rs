//! Source position tracking.
//!
//! `PosTable` interns *origins* (a file, stdin, an inline string passed by the
//! host, or a hidden/internal position used for synthesized AST nodes) plus a
//! byte offset into that origin, and hands back a small [`PosIdx`] handle.
//! Line/column numbers are not computed at parse time — most positions are
//! never shown to a user — they are computed lazily from the origin's source
//! text the first time [`PosTable::resolve`] is called for that origin, and
//! the resulting line-start table is cached per origin.

use std::{path::PathBuf, rc::Rc};

/// Where a piece of source text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(PathBuf),
    Stdin,
    /// An inline string passed directly by the host (e.g. `--expr`).
    String,
    /// A position with no useful source text, used for synthesized nodes
    /// (desugared `<nixpath>` literals, builtin-provided positions).
    Hidden,
}

struct OriginEntry {
    origin: Origin,
    text: Rc<str>,
    /// Byte offset of the start of each line, computed lazily on first
    /// `resolve` call and cached for the entry's lifetime.
    line_starts: Option<Vec<u32>>,
}

/// A small integer handle into a [`PosTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PosIdx(u32);

impl PosIdx {
    pub const NONE: PosIdx = PosIdx(u32::MAX);

    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

/// A resolved, human-readable position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    pub origin: Origin,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.origin {
            Origin::File(p) => write!(f, "{}:{}:{}", p.display(), self.line, self.column),
            Origin::Stdin => write!(f, "(stdin):{}:{}", self.line, self.column),
            Origin::String => write!(f, "(string):{}:{}", self.line, self.column),
            Origin::Hidden => write!(f, "<no-source>"),
        }
    }
}

struct Entry {
    origin_idx: u32,
    offset: u32,
}

/// Interns `(origin, byte_offset)` pairs and resolves them to `(file, line,
/// column)` on demand.
#[derive(Default)]
pub struct PosTable {
    origins: Vec<OriginEntry>,
    entries: Vec<Entry>,
}

impl PosTable {
    pub fn new() -> Self {
        Self {
            origins: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Registers a new origin (a loaded file or inline string) with its full
    /// source text, returning an id to pass to [`PosTable::add`].
    pub fn add_origin(&mut self, origin: Origin, text: Rc<str>) -> u32 {
        let id = u32::try_from(self.origins.len()).expect("too many origins");
        self.origins.push(OriginEntry {
            origin,
            text,
            line_starts: None,
        });
        id
    }

    /// Interns a `(origin, byte_offset)` pair.
    pub fn add(&mut self, origin_idx: u32, offset: u32) -> PosIdx {
        let id = u32::try_from(self.entries.len()).expect("too many positions");
        self.entries.push(Entry { origin_idx, offset });
        PosIdx(id)
    }

    /// Resolves a `PosIdx` to a human-readable `Pos`. Computes and caches the
    /// origin's line-start table on first access.
    pub fn resolve(&mut self, idx: PosIdx) -> Option<Pos> {
        if idx.is_none() {
            return None;
        }
        let entry = &self.entries[idx.0 as usize];
        let origin_idx = entry.offset_origin();
        let offset = entry.offset;
        let origin_entry = &mut self.origins[origin_idx as usize];
        if origin_entry.line_starts.is_none() {
            origin_entry.line_starts = Some(compute_line_starts(&origin_entry.text));
        }
        let line_starts = origin_entry.line_starts.as_ref().unwrap();
        let (line, column) = line_col_for_offset(line_starts, offset);
        Some(Pos {
            origin: origin_entry.origin.clone(),
            line,
            column,
        })
    }
}

impl Entry {
    fn offset_origin(&self) -> u32 {
        self.origin_idx
    }
}

fn compute_line_starts(text: &str) -> Vec<u32> {
    let mut starts = vec![0u32];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(u32::try_from(i + 1).unwrap_or(u32::MAX));
        }
    }
    starts
}

/// Binary-searches `line_starts` for the 1-based line/column containing
/// `offset`. Column is a 1-based byte offset within the line (sufficient for
/// error messages; not a full UTF-8 grapheme count).
fn line_col_for_offset(line_starts: &[u32], offset: u32) -> (u32, u32) {
    let line_idx = match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    };
    let line_start = line_starts[line_idx];
    (u32::try_from(line_idx + 1).unwrap_or(u32::MAX), offset - line_start + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_line_and_column() {
        let mut table = PosTable::new();
        let text: Rc<str> = Rc::from("a = 1;\nb = 2;\n");
        let origin = table.add_origin(Origin::String, text);
        let p0 = table.add(origin, 0);
        let p1 = table.add(origin, 7); // start of "b = 2;"
        let pos0 = table.resolve(p0).unwrap();
        let pos1 = table.resolve(p1).unwrap();
        assert_eq!((pos0.line, pos0.column), (1, 1));
        assert_eq!((pos1.line, pos1.column), (2, 1));
    }

    #[test]
    fn none_resolves_to_none() {
        let mut table = PosTable::new();
        assert!(table.resolve(PosIdx::NONE).is_none());
    }
}
