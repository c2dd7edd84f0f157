//! The `SourceResolver` collaborator: sandboxed filesystem access for
//! `import`, path literals, and the `builtins.read*`/`builtins.path*`
//! family.
//!
//! Kept separate from [`crate::store::Store`] because the two answer
//! different questions: `Store` is about the Nix store (derivations,
//! content addressing, build outputs); `SourceResolver` is about reading
//! the expression's own source tree (the directory a `.nix` file lives in,
//! `<nixpkgs>`-style search-path entries) under `restrictEval`/`pure-eval`
//! sandboxing.

use std::path::{Path, PathBuf};

use crate::settings::EvalSettings;

/// Maximum symlinks `check_source_path` will follow while resolving a path,
/// matching the floor `lix`'s own path resolution enforces (`lix` rejects
/// symlink chains longer than this as a loop rather than following them
/// indefinitely).
pub const MAX_SYMLINK_FOLLOWS: u32 = 1024;

/// A path that has passed sandbox checks and symlink-loop detection,
/// distinguished from a plain `PathBuf` so a builtin can't accidentally read
/// a path that skipped [`SourceResolver::check_source_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedPath(PathBuf);

impl CheckedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// Why a path access was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictedPathError {
    /// `path` falls outside every allowed prefix under
    /// `restrictEval`/`pure-eval`.
    NotAllowed { path: PathBuf },
    /// Following symlinks from `path` exceeded [`MAX_SYMLINK_FOLLOWS`].
    TooManySymlinks { path: PathBuf },
    /// The path doesn't exist or couldn't be read (permission error,
    /// dangling symlink, ...).
    NotFound { path: PathBuf, reason: String },
}

impl std::fmt::Display for RestrictedPathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAllowed { path } => write!(f, "access to path '{}' is forbidden", path.display()),
            Self::TooManySymlinks { path } => {
                write!(f, "too many levels of symbolic links resolving '{}'", path.display())
            }
            Self::NotFound { path, reason } => write!(f, "cannot read '{}': {reason}", path.display()),
        }
    }
}

impl std::error::Error for RestrictedPathError {}

/// One directory entry, as returned by [`SourceResolver::read_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    /// A device file, FIFO, or socket — valid entries `builtins.readDir`
    /// still has to report, but never traversable as a path.
    Other,
}

/// The evaluator's interface to its own source tree.
///
/// A host's real implementation reads an actual filesystem but applies
/// `EvalSettings`'s sandbox configuration; a test implementation can back
/// this with an in-memory map instead.
pub trait SourceResolver: std::fmt::Debug {
    /// Resolves and sandbox-checks `path`, following up to
    /// [`MAX_SYMLINK_FOLLOWS`] symlinks. Every other method on this trait
    /// takes a [`CheckedPath`] rather than a raw `Path` so the sandbox check
    /// can't be bypassed by a builtin calling `read_file` directly.
    fn check_source_path(&self, path: &Path, settings: &EvalSettings) -> Result<CheckedPath, RestrictedPathError>;

    fn read_file(&self, path: &CheckedPath) -> Result<Vec<u8>, RestrictedPathError>;

    fn read_dir(&self, path: &CheckedPath) -> Result<Vec<(String, FileType)>, RestrictedPathError>;

    /// `lstat`-equivalent: reports the entry's own type without following a
    /// final symlink, used by `builtins.readFileType` and path existence
    /// checks (`pathExists` must not error on a dangling symlink).
    fn lstat(&self, path: &Path) -> Option<FileType>;

    /// Searches `NIX_PATH`-style entries for `name` (the lookup behind
    /// `<nixpkgs>`-style angle-bracket path literals), returning the
    /// resolved path if found.
    fn find_search_path(&self, name: &str, settings: &EvalSettings) -> Option<PathBuf>;
}

/// An in-memory `SourceResolver` over a fixed set of files, for tests that
/// want deterministic `import`/`readFile` behavior without touching the
/// real filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceResolver {
    files: std::collections::BTreeMap<PathBuf, Vec<u8>>,
}

impl MemorySourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

impl SourceResolver for MemorySourceResolver {
    fn check_source_path(&self, path: &Path, settings: &EvalSettings) -> Result<CheckedPath, RestrictedPathError> {
        if !settings.path_is_allowed(path) {
            return Err(RestrictedPathError::NotAllowed { path: path.to_path_buf() });
        }
        if self.files.contains_key(path) {
            Ok(CheckedPath(path.to_path_buf()))
        } else {
            Err(RestrictedPathError::NotFound { path: path.to_path_buf(), reason: "no such file".into() })
        }
    }

    fn read_file(&self, path: &CheckedPath) -> Result<Vec<u8>, RestrictedPathError> {
        self.files.get(path.as_path()).cloned().ok_or_else(|| RestrictedPathError::NotFound {
            path: path.as_path().to_path_buf(),
            reason: "no such file".into(),
        })
    }

    fn read_dir(&self, path: &CheckedPath) -> Result<Vec<(String, FileType)>, RestrictedPathError> {
        let prefix = path.as_path();
        let mut entries = Vec::new();
        for key in self.files.keys() {
            if let Ok(rest) = key.strip_prefix(prefix) {
                if let Some(first) = rest.components().next() {
                    let name = first.as_os_str().to_string_lossy().into_owned();
                    if !entries.iter().any(|(n, _)| *n == name) {
                        entries.push((name, FileType::Regular));
                    }
                }
            }
        }
        Ok(entries)
    }

    fn lstat(&self, path: &Path) -> Option<FileType> {
        self.files.contains_key(path).then_some(FileType::Regular)
    }

    fn find_search_path(&self, _name: &str, _settings: &EvalSettings) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_resolver_reads_registered_file() {
        let resolver = MemorySourceResolver::new().with_file("/src/default.nix", "1");
        let settings = EvalSettings::unrestricted();
        let checked = resolver.check_source_path(Path::new("/src/default.nix"), &settings).unwrap();
        assert_eq!(resolver.read_file(&checked).unwrap(), b"1");
    }

    #[test]
    fn restrict_eval_blocks_unlisted_paths() {
        let resolver = MemorySourceResolver::new().with_file("/src/default.nix", "1");
        let mut settings = EvalSettings::unrestricted();
        settings.restrict_eval = true;
        let err = resolver.check_source_path(Path::new("/src/default.nix"), &settings).unwrap_err();
        assert!(matches!(err, RestrictedPathError::NotAllowed { .. }));
    }
}
