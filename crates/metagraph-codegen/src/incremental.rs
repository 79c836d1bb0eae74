//! Incremental compilation with function-level dirty tracking.
//!
//! Tracks a hash of every emitted function block, builds the call graph
//! between blocks, and produces recompilation plans that reload only the
//! functions whose source changed and the functions that call them.
//!
//! # Architecture
//!
//! - [`IncrementalState`]: Persistent state tracking last-compiled hashes,
//!   the settings hash, and the cache directory for per-function sources.
//! - [`RecompilationPlan`]: The computed plan showing dirty, dependent,
//!   cached and removed functions.
//! - [`build_call_graph`]: Extracts caller->callee relationships from the
//!   references recorded during emission.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codegen::Emitted;
use crate::CompileOptions;

/// Bumped whenever the target-source format changes, so stale caches are
/// dropped wholesale.
const FORMAT_VERSION: u8 = 1;

const STATE_FILE: &str = "incremental.json";

/// Tracks compilation state for incremental builds.
///
/// Persists per-function hashes from the last successful compilation so
/// that subsequent compilations can detect which functions changed. Also
/// tracks the compilation settings hash to invalidate the entire cache
/// when settings that affect emitted code change.
#[derive(Debug, Serialize, Deserialize)]
pub struct IncrementalState {
    /// Per-function hash from last successful compilation, by label.
    last_compiled_hashes: HashMap<String, [u8; 32]>,
    /// Hash of the settings that shape emitted source.
    settings_hash: [u8; 32],
    /// Directory containing cached per-function sources, if any.
    cache_dir: Option<PathBuf>,
}

/// A recompilation plan computed from dirty analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecompilationPlan {
    /// Functions that changed directly (content hash differs, or new).
    pub dirty: Vec<String>,
    /// Functions dirty because a callee changed (transitive callers).
    pub dirty_dependents: Vec<String>,
    /// Functions whose loaded code can be reused.
    pub cached: Vec<String>,
    /// Functions compiled last time that no longer exist.
    pub removed: Vec<String>,
    /// Whether anything needs reloading or dropping.
    pub needs_recompilation: bool,
}

impl RecompilationPlan {
    /// Dirty and dependent functions together.
    pub fn to_reload(&self) -> impl Iterator<Item = &str> {
        self.dirty
            .iter()
            .chain(&self.dirty_dependents)
            .map(String::as_str)
    }
}

impl IncrementalState {
    /// Create a new empty incremental state with no previous hashes.
    ///
    /// The first compilation with this state will be a full rebuild.
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        IncrementalState {
            last_compiled_hashes: HashMap::new(),
            settings_hash: [0u8; 32],
            cache_dir,
        }
    }

    /// Load the state persisted in `cache_dir`, or start fresh.
    pub fn open(cache_dir: Option<PathBuf>) -> Self {
        let loaded = cache_dir
            .as_deref()
            .and_then(|dir| IncrementalState::load(&dir.join(STATE_FILE)));
        match loaded {
            Some(mut state) => {
                state.cache_dir = cache_dir;
                state
            }
            None => IncrementalState::new(cache_dir),
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Compute which functions need reloading based on hash changes.
    ///
    /// Phase 1: Compare current hashes against last_compiled_hashes to find
    ///   directly dirty functions (changed or new).
    /// Phase 2: Build reverse call graph. BFS from dirty functions through
    ///   callers to find transitive dependents.
    /// Phase 3: Everything else is cached; previous functions absent from
    ///   `current_hashes` are removed.
    pub fn compute_dirty(
        &self,
        current_hashes: &HashMap<String, [u8; 32]>,
        call_graph: &HashMap<String, Vec<String>>,
    ) -> RecompilationPlan {
        // Phase 1: Find directly dirty functions
        let mut directly_dirty: HashSet<&str> = HashSet::new();
        for (label, current_hash) in current_hashes {
            match self.last_compiled_hashes.get(label) {
                Some(prev_hash) if prev_hash == current_hash => {}
                _ => {
                    directly_dirty.insert(label.as_str());
                }
            }
        }

        // Phase 2: Build reverse call graph (callee -> callers)
        let mut reverse_graph: HashMap<&str, Vec<&str>> = HashMap::new();
        for (caller, callees) in call_graph {
            for callee in callees {
                reverse_graph
                    .entry(callee.as_str())
                    .or_default()
                    .push(caller.as_str());
            }
        }

        let mut dirty_dependents: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = directly_dirty.iter().copied().collect();
        while let Some(label) = queue.pop_front() {
            if let Some(callers) = reverse_graph.get(label) {
                for &caller in callers {
                    if current_hashes.contains_key(caller)
                        && !directly_dirty.contains(caller)
                        && dirty_dependents.insert(caller)
                    {
                        queue.push_back(caller);
                    }
                }
            }
        }

        // Phase 3: Everything else is cached
        let mut cached: Vec<String> = current_hashes
            .keys()
            .filter(|l| !directly_dirty.contains(l.as_str()) && !dirty_dependents.contains(l.as_str()))
            .cloned()
            .collect();
        let mut removed: Vec<String> = self
            .last_compiled_hashes
            .keys()
            .filter(|l| !current_hashes.contains_key(*l))
            .cloned()
            .collect();

        let needs_recompilation =
            !directly_dirty.is_empty() || !dirty_dependents.is_empty() || !removed.is_empty();

        // Sort for deterministic output
        let mut dirty: Vec<String> = directly_dirty.into_iter().map(String::from).collect();
        dirty.sort();
        let mut deps: Vec<String> = dirty_dependents.into_iter().map(String::from).collect();
        deps.sort();
        cached.sort();
        removed.sort();

        RecompilationPlan {
            dirty,
            dirty_dependents: deps,
            cached,
            removed,
            needs_recompilation,
        }
    }

    /// Update last_compiled_hashes after a successful compilation.
    pub fn update_hashes(&mut self, hashes: HashMap<String, [u8; 32]>) {
        self.last_compiled_hashes = hashes;
    }

    /// Path of the cached source of one function. Labels are hashed since
    /// they contain characters file systems dislike.
    pub fn cached_source_path(&self, label: &str) -> Option<PathBuf> {
        let name = blake3::hash(label.as_bytes()).to_hex();
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.mgs", name.as_str())))
    }

    /// Write a function's source into the cache. A no-op without a cache.
    pub fn write_source(&self, label: &str, text: &str) -> std::io::Result<()> {
        let (Some(dir), Some(path)) = (self.cache_dir.as_deref(), self.cached_source_path(label)) else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(text.as_bytes())?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// The cached source of a function, if present and matching `hash`.
    pub fn read_source(&self, label: &str, hash: &[u8; 32]) -> Option<String> {
        let text = std::fs::read_to_string(self.cached_source_path(label)?).ok()?;
        (blake3::hash(text.as_bytes()).as_bytes() == hash).then_some(text)
    }

    pub fn remove_source(&self, label: &str) -> std::io::Result<()> {
        match self.cached_source_path(label) {
            Some(path) if path.exists() => std::fs::remove_file(path),
            _ => Ok(()),
        }
    }

    /// Check if compilation settings changed (invalidates entire cache).
    pub fn is_settings_changed(&self, options: &CompileOptions) -> bool {
        let current = compute_settings_hash(options);
        self.settings_hash != current
    }

    /// Update the settings hash after a compilation with new settings.
    pub fn update_settings_hash(&mut self, options: &CompileOptions) {
        self.settings_hash = compute_settings_hash(options);
    }

    /// Returns a reference to last compiled hashes.
    pub fn last_compiled_hashes(&self) -> &HashMap<String, [u8; 32]> {
        &self.last_compiled_hashes
    }

    /// Persist into the cache directory, if there is one.
    pub fn persist(&self) -> std::io::Result<()> {
        match self.cache_dir.as_deref() {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                self.save(&dir.join(STATE_FILE))
            }
            None => Ok(()),
        }
    }

    /// Save incremental state to a JSON file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load incremental state from a JSON file.
    ///
    /// Returns `None` if the file doesn't exist or can't be parsed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }
}

/// Hash every emitted function block.
pub fn hash_functions(emitted: &Emitted) -> HashMap<String, [u8; 32]> {
    emitted
        .functions
        .iter()
        .map(|f| (f.block.label.clone(), *blake3::hash(f.text.as_bytes()).as_bytes()))
        .collect()
}

/// Build a call graph from emitted blocks: caller -> sorted callees.
pub fn build_call_graph(emitted: &Emitted) -> HashMap<String, Vec<String>> {
    emitted
        .functions
        .iter()
        .map(|f| (f.block.label.clone(), f.calls.iter().cloned().collect()))
        .collect()
}

/// Compute a hash of the settings that change emitted source.
pub fn compute_settings_hash(options: &CompileOptions) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[FORMAT_VERSION]);
    hasher.update(&[options.inline_if as u8]);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// a calls b, b calls c; d stands alone.
    fn call_chain() -> (HashMap<String, [u8; 32]>, HashMap<String, Vec<String>>) {
        let mut hashes = HashMap::new();
        let mut graph = HashMap::new();
        for (i, (name, callees)) in [("a", vec!["b"]), ("b", vec!["c"]), ("c", vec![]), ("d", vec![])]
            .into_iter()
            .enumerate()
        {
            hashes.insert(name.to_string(), [i as u8; 32]);
            graph.insert(name.to_string(), labels(&callees));
        }
        (hashes, graph)
    }

    #[test]
    fn first_compile_is_all_dirty() {
        let (hashes, graph) = call_chain();
        let state = IncrementalState::new(None);
        let plan = state.compute_dirty(&hashes, &graph);
        assert_eq!(plan.dirty, labels(&["a", "b", "c", "d"]));
        assert!(plan.dirty_dependents.is_empty());
        assert!(plan.needs_recompilation);
    }

    #[test]
    fn changed_leaf_dirties_transitive_callers() {
        let (hashes, graph) = call_chain();
        let mut state = IncrementalState::new(None);
        state.update_hashes(hashes.clone());

        let mut changed = hashes;
        changed.get_mut("c").unwrap()[0] ^= 0xFF;
        let plan = state.compute_dirty(&changed, &graph);

        assert_eq!(plan.dirty, labels(&["c"]));
        assert_eq!(plan.dirty_dependents, labels(&["a", "b"]));
        assert_eq!(plan.cached, labels(&["d"]));
        assert!(plan.removed.is_empty());
        assert_eq!(plan.to_reload().collect::<Vec<_>>(), ["c", "a", "b"]);
    }

    #[test]
    fn no_changes_means_everything_cached() {
        let (hashes, graph) = call_chain();
        let mut state = IncrementalState::new(None);
        state.update_hashes(hashes.clone());
        let plan = state.compute_dirty(&hashes, &graph);
        assert!(plan.dirty.is_empty());
        assert!(plan.dirty_dependents.is_empty());
        assert_eq!(plan.cached.len(), 4);
        assert!(!plan.needs_recompilation);
    }

    #[test]
    fn dropped_functions_are_removed() {
        let (hashes, graph) = call_chain();
        let mut state = IncrementalState::new(None);
        state.update_hashes(hashes.clone());
        let mut fewer = hashes;
        fewer.remove("d");
        let plan = state.compute_dirty(&fewer, &graph);
        assert_eq!(plan.removed, labels(&["d"]));
        assert!(plan.dirty.is_empty());
        assert!(plan.needs_recompilation);
    }

    #[test]
    fn settings_hash_tracks_inlining() {
        let inline = CompileOptions::default();
        let plain = CompileOptions {
            inline_if: false,
            ..Default::default()
        };
        let deeper = CompileOptions {
            max_call_depth: 4096,
            ..Default::default()
        };

        let mut state = IncrementalState::new(None);
        state.update_settings_hash(&inline);
        assert!(!state.is_settings_changed(&inline));
        assert!(!state.is_settings_changed(&deeper));
        assert!(state.is_settings_changed(&plain));
    }

    #[test]
    fn save_and_open_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut state = IncrementalState::new(Some(temp_dir.path().to_path_buf()));
        let (hashes, _) = call_chain();
        state.update_hashes(hashes);
        state.update_settings_hash(&CompileOptions::default());
        state.persist().unwrap();

        let loaded = IncrementalState::open(Some(temp_dir.path().to_path_buf()));
        assert_eq!(loaded.last_compiled_hashes().len(), 4);
        assert_eq!(loaded.last_compiled_hashes()["b"], [1u8; 32]);
        assert_eq!(loaded.settings_hash, state.settings_hash);
    }

    #[test]
    fn cached_sources_are_verified_by_hash() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = IncrementalState::new(Some(temp_dir.path().join("cache")));
        let text = "function \"test::f\"\n  code\n    push.empty\n    ret\nend\n";
        state.write_source("test::f", text).unwrap();

        let hash = *blake3::hash(text.as_bytes()).as_bytes();
        assert_eq!(state.read_source("test::f", &hash).as_deref(), Some(text));
        assert_eq!(state.read_source("test::f", &[0u8; 32]), None);
        assert_eq!(state.read_source("test::g", &hash), None);

        state.remove_source("test::f").unwrap();
        assert_eq!(state.read_source("test::f", &hash), None);
    }

    #[test]
    fn no_cache_dir_means_no_files() {
        let state = IncrementalState::new(None);
        assert!(state.cached_source_path("test::f").is_none());
        state.write_source("test::f", "ignored").unwrap();
        state.persist().unwrap();
    }
}
