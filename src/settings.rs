//! Evaluator-wide configuration: sandboxing flags, deprecation/experimental
//! feature gates, and resource defaults.
//!
//! Repurposed from the teacher's capability-based permission system:
//! `Capability`/`CapabilitySet` modeled "is this one named external
//! operation allowed", which doesn't fit an evaluator with no host callback
//! boundary to gate. What does carry over directly is the *shape* —
//! booleans/allow-lists checked at a small number of well-known points
//! (`import`, `builtins.fetchurl`, string-to-path coercion) rather than
//! threaded through every call — and the "deny by default, grant
//! explicitly" posture `CapabilitySet::none()` established.

use std::path::PathBuf;

/// One allowed filesystem prefix under `restrict_eval`/`pure_eval`. Paths
/// under any entry's `path` are readable; everything else is rejected by
/// `SourceResolver::check_source_path` (see `source.rs`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedPath {
    pub path: PathBuf,
    /// A `NIX_PATH`-style prefix name this entry also satisfies (e.g.
    /// `nixpkgs` for `<nixpkgs>`), if any.
    pub prefix: Option<String>,
}

/// Experimental-feature gates. Each mirrors a real `lix`/Nix experimental
/// feature flag; code paths behind a disabled flag raise
/// [`crate::exception::EvalErrorKind::Custom`] rather than silently
/// behaving as if the feature were absent, matching `lix`'s "you asked for
/// this explicitly or you get an error" policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExperimentalFeatures {
    /// `url-literals`: bare `http://...`-shaped tokens lex as path/URI
    /// literals instead of requiring `"..."`. Disabled by default in recent
    /// Nix; kept configurable since older expressions rely on it.
    pub url_literals: bool,
    /// `shadow-internal-symbols`: allow `let __sub = ...;` or similar to
    /// shadow a primop-desugar target name in user code.
    pub shadow_internal_symbols: bool,
    /// `coerce-integers`: allow `toString`-style coercion to accept
    /// integers in positions that otherwise require a string.
    pub coerce_integers: bool,
    pub ca_derivations: bool,
    pub dynamic_derivations: bool,
    pub impure_derivations: bool,
    pub flakes: bool,
}

/// Evaluator-wide settings, analogous to `lix`'s `EvalSettings`.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    /// Forbids any operation whose result could depend on ambient state
    /// outside the expression itself: reading environment variables,
    /// `builtins.currentTime`/`currentSystem`, unrestricted filesystem
    /// reads, and network access. The evaluator's core expression language
    /// itself is always pure; this flag only gates the I/O-touching
    /// builtins layered on top (`import`, `builtins.readFile`, ...).
    pub pure_eval: bool,
    /// Restricts filesystem reads (`import`, `builtins.readFile`,
    /// `builtins.readDir`, path literals) to [`EvalSettings::allowed_paths`].
    /// Weaker than `pure_eval`: still allows reads, just only from an
    /// allow-listed set of prefixes.
    pub restrict_eval: bool,
    pub allowed_paths: Vec<AllowedPath>,
    /// Whether `import` may read a derivation's build output
    /// (import-from-derivation); requires actually running a build, so
    /// hosts that can't or won't build derivations disable this.
    pub allow_import_from_derivation: bool,
    /// Hard ceiling on call-stack depth, independent of whatever
    /// [`crate::resource::ResourceTracker`] the evaluator is configured
    /// with — this is a Nix-language-level setting (`max-call-depth`) that
    /// the tracker enforces.
    pub max_call_depth: usize,
    /// Whether a `Store`/`SourceResolver` implementation backed by native
    /// (non-sandboxed) code is permitted — disabling this is how a host
    /// embeds the evaluator in a context where even the store/source
    /// collaborators must themselves be pure Rust with no FFI.
    pub enable_native_code: bool,
    pub experimental_features: ExperimentalFeatures,
}

impl EvalSettings {
    /// The most permissive configuration: no sandbox restrictions, a
    /// generous call-depth ceiling. Suitable for evaluating trusted
    /// expressions (tests, a REPL working in a throwaway directory).
    pub fn unrestricted() -> Self {
        Self {
            pure_eval: false,
            restrict_eval: false,
            allowed_paths: Vec::new(),
            allow_import_from_derivation: true,
            max_call_depth: crate::resource::NoLimitTracker::DEFAULT_MAX_CALL_DEPTH,
            enable_native_code: true,
            experimental_features: ExperimentalFeatures::default(),
        }
    }

    /// The strictest configuration: pure evaluation, no filesystem access
    /// beyond what's explicitly allow-listed, no native code, no
    /// import-from-derivation. Suitable for evaluating untrusted
    /// expressions.
    pub fn sandboxed() -> Self {
        Self {
            pure_eval: true,
            restrict_eval: true,
            allowed_paths: Vec::new(),
            allow_import_from_derivation: false,
            max_call_depth: crate::resource::NoLimitTracker::DEFAULT_MAX_CALL_DEPTH,
            enable_native_code: false,
            experimental_features: ExperimentalFeatures::default(),
        }
    }

    /// Whether `path` is reachable under the current sandboxing
    /// configuration, independent of whether it actually exists. Pure
    /// evaluation forbids all filesystem reads; restricted evaluation
    /// requires `path` to fall under one of `allowed_paths`.
    pub fn path_is_allowed(&self, path: &std::path::Path) -> bool {
        if self.pure_eval {
            return false;
        }
        if !self.restrict_eval {
            return true;
        }
        self.allowed_paths.iter().any(|allowed| path.starts_with(&allowed.path))
    }
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self::unrestricted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_eval_forbids_every_path() {
        let mut s = EvalSettings::unrestricted();
        s.pure_eval = true;
        assert!(!s.path_is_allowed(std::path::Path::new("/etc/passwd")));
    }

    #[test]
    fn restrict_eval_only_allows_listed_prefixes() {
        let mut s = EvalSettings::unrestricted();
        s.restrict_eval = true;
        s.allowed_paths.push(AllowedPath { path: "/srv/nix".into(), prefix: None });
        assert!(s.path_is_allowed(std::path::Path::new("/srv/nix/foo.nix")));
        assert!(!s.path_is_allowed(std::path::Path::new("/etc/passwd")));
    }

    #[test]
    fn unrestricted_allows_everything() {
        let s = EvalSettings::unrestricted();
        assert!(s.path_is_allowed(std::path::Path::new("/anywhere")));
    }
}
