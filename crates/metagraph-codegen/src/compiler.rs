//! The compiled backend: emit, load, reuse, run.
//!
//! [`CompiledBackend::recompile`] emits target source for the whole store,
//! diffs the per-function hashes against the last compilation, and reloads
//! only the dirty functions and their callers. Unchanged functions keep
//! the code already loaded, or, after a restart with a cache directory,
//! are loaded from their cached source.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use metagraph_core::InstanceStore;
use metagraph_exec::{ExecutionBackend, ExecutionContext, ExecutionError, NativeRegistry, Sequence};

use crate::codegen::{self, Emitted};
use crate::error::CodegenError;
use crate::incremental::{self, IncrementalState, RecompilationPlan};
use crate::loader::Program;
use crate::program::Block;
use crate::vm::Vm;
use crate::CompileOptions;

#[derive(Debug)]
pub struct CompiledBackend {
    natives: Arc<NativeRegistry>,
    options: CompileOptions,
    state: IncrementalState,
    program: Program,
    source: String,
}

impl CompiledBackend {
    /// An empty backend. Nothing is loaded until [`recompile`](Self::recompile).
    pub fn new(natives: Arc<NativeRegistry>, options: CompileOptions) -> Self {
        let state = IncrementalState::open(options.cache_dir.clone());
        CompiledBackend {
            natives,
            options,
            state,
            program: Program::new(),
            source: String::new(),
        }
    }

    /// Emit and load everything in `store`.
    pub fn compile(
        store: &InstanceStore,
        natives: Arc<NativeRegistry>,
        options: CompileOptions,
    ) -> Result<Self, CodegenError> {
        let mut backend = CompiledBackend::new(natives, options);
        backend.recompile(store)?;
        Ok(backend)
    }

    /// Bring the loaded program up to date with `store`.
    ///
    /// Fails with `MissingNative` if the graph declares a native the table
    /// does not implement; the previously loaded functions stay in place.
    pub fn recompile(&mut self, store: &InstanceStore) -> Result<RecompilationPlan, CodegenError> {
        self.natives.check_complete(store)?;
        let emitted = codegen::emit(store, &self.options)?;

        if self.state.is_settings_changed(&self.options) {
            debug!("compile settings changed, discarding cached code");
            self.state = IncrementalState::new(self.options.cache_dir.clone());
            self.state.update_settings_hash(&self.options);
            self.program = Program::new();
        }

        let hashes = incremental::hash_functions(&emitted);
        let call_graph = incremental::build_call_graph(&emitted);
        let plan = self.state.compute_dirty(&hashes, &call_graph);

        self.load(&emitted, &plan, &hashes)?;
        self.program.check_links()?;

        self.state.update_hashes(hashes);
        if let Err(e) = self.state.persist() {
            warn!(error = %e, "could not persist incremental state");
        }
        self.source = emitted.source();

        info!(
            dirty = plan.dirty.len(),
            dependents = plan.dirty_dependents.len(),
            cached = plan.cached.len(),
            removed = plan.removed.len(),
            "compiled"
        );
        Ok(plan)
    }

    fn load(
        &mut self,
        emitted: &Emitted,
        plan: &RecompilationPlan,
        hashes: &HashMap<String, [u8; 32]>,
    ) -> Result<(), CodegenError> {
        // Natives are cheap to bind and the table may have changed.
        for native in &emitted.natives {
            self.program.load_block(Block::Native(native.clone()), &self.natives)?;
        }

        let reload: HashSet<&str> = plan.to_reload().collect();
        for function in &emitted.functions {
            let label = function.block.label.as_str();
            if !reload.contains(label) && self.program.contains(label) {
                continue;
            }
            let cached = match hashes.get(label) {
                Some(hash) if !reload.contains(label) => self.state.read_source(label, hash),
                _ => None,
            };
            match cached {
                Some(text) => {
                    debug!(function = label, "loaded from cache");
                    self.program.load_source(&text, &self.natives)?;
                }
                None => {
                    self.program
                        .load_block(Block::Function(function.block.clone()), &self.natives)?;
                    self.state.write_source(label, &function.text)?;
                }
            }
        }

        let live: HashSet<&str> = emitted
            .natives
            .iter()
            .map(|n| n.label.as_str())
            .chain(emitted.functions.iter().map(|f| f.block.label.as_str()))
            .collect();
        let stale: Vec<String> = self
            .program
            .labels()
            .filter(|label| !live.contains(label))
            .map(String::from)
            .collect();
        for label in stale {
            self.program.remove(&label);
            self.state.remove_source(&label)?;
        }
        Ok(())
    }

    /// The whole program as last emitted.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }
}

impl ExecutionBackend for CompiledBackend {
    fn name(&self) -> &str {
        "compiled"
    }

    fn execute(
        &self,
        path: &str,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        debug!(function = path, backend = self.name(), "execute");
        Vm::new(&self.program, self.options.max_call_depth).execute(path, args, cx)
    }
}

#[cfg(test)]
mod tests {
    use metagraph_compiler::fragment::{self, call, function};
    use metagraph_compiler::{IncrementalCompiler, UnitSource};

    use super::*;

    fn unit(g_value: i64) -> UnitSource {
        UnitSource::new("c.pure")
            .element(function("test", "g", &[], "Integer", "1", vec![fragment::integer(g_value)]))
            .element(function("test", "f", &[], "Integer", "1", vec![call("g", vec![])]))
            .element(function("test", "h", &[], "Integer", "1", vec![fragment::integer(7)]))
    }

    fn natives() -> Arc<NativeRegistry> {
        Arc::new(NativeRegistry::standard().unwrap())
    }

    fn run(backend: &CompiledBackend, path: &str) -> Sequence {
        backend.execute(path, vec![], &mut ExecutionContext::new()).unwrap()
    }

    #[test]
    fn changed_callee_reloads_its_callers_only() {
        let mut c = IncrementalCompiler::new().unwrap();
        c.add_or_update(unit(1)).unwrap();
        let mut backend = CompiledBackend::compile(c.store(), natives(), CompileOptions::default()).unwrap();
        assert_eq!(run(&backend, "test::f"), Sequence::one(1i64));

        c.add_or_update(unit(2)).unwrap();
        let plan = backend.recompile(c.store()).unwrap();
        assert_eq!(plan.dirty, ["test::g"]);
        assert_eq!(plan.dirty_dependents, ["test::f"]);
        assert_eq!(plan.cached, ["test::h"]);
        assert_eq!(run(&backend, "test::f"), Sequence::one(2i64));
    }

    #[test]
    fn recompiling_an_unchanged_store_reuses_everything() {
        let mut c = IncrementalCompiler::new().unwrap();
        c.add_or_update(unit(1)).unwrap();
        let mut backend = CompiledBackend::compile(c.store(), natives(), CompileOptions::default()).unwrap();
        let before = backend.source().to_string();
        let plan = backend.recompile(c.store()).unwrap();
        assert!(!plan.needs_recompilation);
        assert_eq!(backend.source(), before);
    }

    #[test]
    fn missing_native_fails_compilation() {
        let mut c = IncrementalCompiler::new().unwrap();
        c.add_or_update(unit(1)).unwrap();
        let mut registry = NativeRegistry::standard().unwrap();
        registry.remove(metagraph_core::stdlib::PRINT);
        let err = CompiledBackend::compile(c.store(), Arc::new(registry), CompileOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("print"));
    }
}
