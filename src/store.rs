//! The `Store` collaborator: the evaluator's view of the Nix store.
//!
//! The evaluator never talks to a store directly — no filesystem access, no
//! daemon socket, no content hashing. Every operation that needs one (path
//! validity, content addressing, reading a derivation back, realising a
//! string's context before running `derivationStrict`) goes through this
//! trait, which a host implements however fits its deployment (a real
//! store, a daemon client, an in-memory fake for tests).
//!
//! Modeled as `Box<dyn Store>` on the evaluator rather than the generic
//! `VM<'a, T: ResourceTracker, ...>` parameterization the teacher uses for
//! its own host collaborators: this evaluator is a recursive tree-walker,
//! not a tight bytecode dispatch loop, so the monomorphization the teacher's
//! generics buy isn't worth the public-API complexity it costs here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::context::StringContext;

/// A store path's hash-and-name, without the store's root prefix —
/// e.g. `"a9c93n1mrbdcgmm19yq27zf9spmjvhgm-hello-2.12.1"`.
pub type StorePath = String;

/// A derivation as read back from the store: the parsed contents of a
/// `.drv` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    pub name: String,
    pub builder: String,
    pub system: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Output name -> (predicted store path, content-addressing method if
    /// this output is CA rather than input-addressed).
    pub outputs: BTreeMap<String, DerivationOutput>,
    pub input_drvs: BTreeMap<StorePath, Vec<String>>,
    pub input_srcs: Vec<StorePath>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationOutput {
    pub path: Option<StorePath>,
    pub hash_algo: Option<String>,
    pub hash: Option<String>,
}

/// Metadata about a path already in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub path: StorePath,
    pub references: Vec<StorePath>,
    pub nar_hash: String,
    pub nar_size: u64,
}

/// What kind of thing is being added to the store by
/// [`Store::add_to_store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileIngestionMethod {
    /// A single regular file.
    Flat,
    /// A directory tree, packed as a NAR.
    Recursive,
}

/// The evaluator's interface to a Nix store.
///
/// Every method is synchronous: the evaluator has no concurrency model of
/// its own (it's a single-threaded tree-walker), so there is nothing to
/// gain from an async trait here, and a blocking interface is what every
/// real store backend (filesystem, Unix-socket daemon) naturally provides
/// anyway.
pub trait Store: std::fmt::Debug {
    /// Whether `path` is a store path recognised as present and valid.
    fn is_valid_path(&self, path: &str) -> bool;

    /// Reads back a derivation previously written to the store.
    fn read_derivation(&self, drv_path: &str) -> Option<Derivation>;

    /// Metadata for a path already in the store.
    fn query_path_info(&self, path: &str) -> Option<PathInfo>;

    /// Computes (without necessarily creating) the store path that adding
    /// `name` with the given content would produce — used by
    /// `builtins.toFile`/`builtins.path`'s `outPath`-before-realisation
    /// contract and by content-addressed derivation output prediction.
    fn compute_store_path(&self, name: &str, content: &[u8], method: FileIngestionMethod) -> StorePath;

    /// Copies a local path into the store, returning its store path.
    fn add_to_store(&self, source: &Path, name: &str, method: FileIngestionMethod) -> Result<StorePath, String>;

    /// Resolves a store path to where it actually lives on disk (identity
    /// for a local store; a different root for e.g. a chroot store).
    fn to_real_path(&self, store_path: &str) -> PathBuf;

    /// Ensures every store-path dependency recorded in `context` actually
    /// exists in the store (building derivations referenced by output if
    /// necessary), returning an error naming the first one that couldn't be
    /// realised. Called before a context-bearing string crosses into a
    /// builtin that needs the referenced paths to exist on disk
    /// (`builtins.readFile` on a derivation output, `derivationStrict`'s own
    /// argument realisation).
    fn realise_context(&self, context: &StringContext) -> Result<(), String>;
}

/// A `Store` that answers "nothing exists, nothing can be added" to every
/// query — useful for evaluating expressions that never touch a derivation
/// or the store, and as the default for hosts that haven't wired up a real
/// one yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl Store for NullStore {
    fn is_valid_path(&self, _path: &str) -> bool {
        false
    }

    fn read_derivation(&self, _drv_path: &str) -> Option<Derivation> {
        None
    }

    fn query_path_info(&self, _path: &str) -> Option<PathInfo> {
        None
    }

    fn compute_store_path(&self, name: &str, content: &[u8], _method: FileIngestionMethod) -> StorePath {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        content.hash(&mut hasher);
        format!("{:016x}-{name}", hasher.finish())
    }

    fn add_to_store(&self, _source: &Path, _name: &str, _method: FileIngestionMethod) -> Result<StorePath, String> {
        Err("NullStore cannot add paths to the store".to_string())
    }

    fn to_real_path(&self, store_path: &str) -> PathBuf {
        PathBuf::from("/nix/store").join(store_path)
    }

    fn realise_context(&self, context: &StringContext) -> Result<(), String> {
        if context.is_empty() {
            Ok(())
        } else {
            Err("NullStore cannot realise any string context".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_store_has_nothing_valid() {
        let store = NullStore;
        assert!(!store.is_valid_path("/nix/store/xxx-foo"));
        assert!(store.read_derivation("/nix/store/xxx-foo.drv").is_none());
    }

    #[test]
    fn null_store_realises_empty_context() {
        let store = NullStore;
        assert!(store.realise_context(&StringContext::new()).is_ok());
    }
}
