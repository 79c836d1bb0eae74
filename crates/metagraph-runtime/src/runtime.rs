//! The [`Runtime`] facade.
//!
//! Owns the incremental compiler behind a read-write lock. Deltas take the
//! repository lock and then the write side, so they are serialized with
//! each other and with execution. Executions take the read side and may
//! run concurrently.
//!
//! The compiled backend is not rebuilt when a delta commits. The next
//! compiled execution notices the compiler's generation moved and
//! recompiles incrementally before running.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use metagraph_codegen::CompiledBackend;
use metagraph_compiler::{
    Delta, DeltaReport, Extension, GraphSnapshot, IncrementalCompiler, UnitSource, Violation,
};
use metagraph_core::UnitId;
use metagraph_exec::{ExecutionBackend, ExecutionContext, Interpreter, NativeRegistry, Sequence};

use crate::concurrency::LockManager;
use crate::config::{BackendKind, RuntimeConfig};
use crate::error::RuntimeError;

struct CompiledSlot {
    backend: Option<CompiledBackend>,
    /// Compiler generation the backend was last brought up to date with.
    generation: u64,
}

pub struct Runtime {
    config: RuntimeConfig,
    locks: LockManager<String>,
    compiler: RwLock<IncrementalCompiler>,
    natives: Arc<NativeRegistry>,
    compiled: RwLock<CompiledSlot>,
}

impl Runtime {
    /// A runtime with the standard native table.
    ///
    /// Fails if two extensions claim the same classifier or handler.
    pub fn new(
        config: RuntimeConfig,
        extensions: Vec<Arc<dyn Extension>>,
    ) -> Result<Self, RuntimeError> {
        let natives = Arc::new(NativeRegistry::standard()?);
        Runtime::with_natives(config, extensions, natives)
    }

    pub fn with_natives(
        config: RuntimeConfig,
        extensions: Vec<Arc<dyn Extension>>,
        natives: Arc<NativeRegistry>,
    ) -> Result<Self, RuntimeError> {
        let compiler = IncrementalCompiler::with_extensions(extensions)?;
        info!(
            repository = %config.repository,
            backend = %config.backend,
            natives = natives.len(),
            "runtime ready"
        );
        Ok(Runtime {
            config,
            locks: LockManager::new(),
            compiler: RwLock::new(compiler),
            natives,
            compiled: RwLock::new(CompiledSlot {
                backend: None,
                generation: 0,
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn natives(&self) -> &Arc<NativeRegistry> {
        &self.natives
    }

    pub fn locks(&self) -> &LockManager<String> {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // Compilation
    // -----------------------------------------------------------------------

    /// Apply a delta atomically.
    pub fn compile(&self, delta: Delta) -> Result<DeltaReport, RuntimeError> {
        self.with_compiler_mut(|compiler| compiler.apply(delta))
    }

    pub fn add_or_update(&self, unit: UnitSource) -> Result<DeltaReport, RuntimeError> {
        self.with_compiler_mut(|compiler| compiler.add_or_update(unit))
    }

    pub fn remove(&self, unit: &UnitId) -> Result<DeltaReport, RuntimeError> {
        self.with_compiler_mut(|compiler| compiler.remove(unit))
    }

    pub fn integrity_check(&self) -> Result<Vec<Violation>, RuntimeError> {
        self.with_compiler_mut(|compiler| Ok(compiler.integrity_check()))
    }

    fn with_compiler_mut<T>(
        &self,
        f: impl FnOnce(&mut IncrementalCompiler) -> Result<T, metagraph_compiler::CompileError>,
    ) -> Result<T, RuntimeError> {
        let repository = self.locks.lock_for(self.config.repository.clone());
        let _repository = repository
            .lock()
            .map_err(|_| RuntimeError::Poisoned("repository"))?;
        let mut compiler = self.write_compiler()?;
        let before = compiler.generation();
        let result = f(&mut compiler);
        match &result {
            Ok(_) if compiler.generation() != before => {
                debug!(generation = compiler.generation(), "delta committed");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "delta failed"),
        }
        Ok(result?)
    }

    /// Run `f` against the compiler, excluding deltas for the duration.
    pub fn with_compiler<T>(&self, f: impl FnOnce(&IncrementalCompiler) -> T) -> Result<T, RuntimeError> {
        let compiler = self.read_compiler()?;
        Ok(f(&compiler))
    }

    pub fn snapshot(&self) -> Result<GraphSnapshot, RuntimeError> {
        self.with_compiler(IncrementalCompiler::snapshot)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run `path` on the configured default backend.
    pub fn run(
        &self,
        path: &str,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, RuntimeError> {
        self.execute(self.config.backend, path, args, cx)
    }

    pub fn execute(
        &self,
        backend: BackendKind,
        path: &str,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, RuntimeError> {
        let compiler = self.read_compiler()?;
        match backend {
            BackendKind::Interpreter => {
                let interpreter = Interpreter::new(
                    compiler.store(),
                    Arc::clone(&self.natives),
                    self.config.interpreter_config(),
                )?;
                Ok(interpreter.execute(path, args, cx)?)
            }
            BackendKind::Compiled => {
                self.refresh_compiled(&compiler)?;
                let slot = self
                    .compiled
                    .read()
                    .map_err(|_| RuntimeError::Poisoned("compiled backend"))?;
                match &slot.backend {
                    Some(compiled) => Ok(compiled.execute(path, args, cx)?),
                    None => Err(RuntimeError::Poisoned("compiled backend")),
                }
            }
        }
    }

    /// Bring the compiled backend up to date with `compiler`. The caller
    /// holds the compiler read lock, so the generation cannot move.
    fn refresh_compiled(&self, compiler: &IncrementalCompiler) -> Result<(), RuntimeError> {
        let generation = compiler.generation();
        {
            let slot = self
                .compiled
                .read()
                .map_err(|_| RuntimeError::Poisoned("compiled backend"))?;
            if slot.backend.is_some() && slot.generation == generation {
                return Ok(());
            }
        }

        let mut guard = self
            .compiled
            .write()
            .map_err(|_| RuntimeError::Poisoned("compiled backend"))?;
        let slot = &mut *guard;
        if slot.backend.is_some() && slot.generation == generation {
            return Ok(());
        }
        match slot.backend.as_mut() {
            Some(backend) => {
                let plan = backend.recompile(compiler.store())?;
                debug!(
                    generation,
                    reloaded = plan.dirty.len() + plan.dirty_dependents.len(),
                    "compiled backend refreshed"
                );
            }
            None => {
                let backend = CompiledBackend::compile(
                    compiler.store(),
                    Arc::clone(&self.natives),
                    self.config.compile_options(),
                )?;
                slot.backend = Some(backend);
            }
        }
        slot.generation = generation;
        Ok(())
    }

    fn read_compiler(&self) -> Result<RwLockReadGuard<'_, IncrementalCompiler>, RuntimeError> {
        self.compiler
            .read()
            .map_err(|_| RuntimeError::Poisoned("compiler"))
    }

    fn write_compiler(&self) -> Result<RwLockWriteGuard<'_, IncrementalCompiler>, RuntimeError> {
        self.compiler
            .write()
            .map_err(|_| RuntimeError::Poisoned("compiler"))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use metagraph_compiler::fragment::{self, call, function};

    use super::*;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default(), Vec::new()).unwrap()
    }

    fn constant(value: i64) -> UnitSource {
        UnitSource::new("k.pure").element(function(
            "test",
            "k",
            &[],
            "Integer",
            "1",
            vec![fragment::integer(value)],
        ))
    }

    #[test]
    fn compiled_backend_follows_committed_deltas() {
        let rt = runtime();
        rt.add_or_update(constant(1)).unwrap();
        let mut cx = ExecutionContext::new();
        let first = rt.execute(BackendKind::Compiled, "test::k", vec![], &mut cx).unwrap();
        assert_eq!(first, Sequence::one(1i64));

        rt.add_or_update(constant(2)).unwrap();
        let second = rt.execute(BackendKind::Compiled, "test::k", vec![], &mut cx).unwrap();
        assert_eq!(second, Sequence::one(2i64));
    }

    #[test]
    fn run_uses_the_configured_backend() {
        let config = RuntimeConfig {
            backend: BackendKind::Compiled,
            ..RuntimeConfig::default()
        };
        let rt = Runtime::new(config, Vec::new()).unwrap();
        rt.add_or_update(constant(3)).unwrap();
        let r = rt.run("test::k", vec![], &mut ExecutionContext::new()).unwrap();
        assert_eq!(r, Sequence::one(3i64));
        assert!(rt.compiled.read().unwrap().backend.is_some());
    }

    #[test]
    fn failed_delta_is_reported_and_changes_nothing() {
        let rt = runtime();
        rt.add_or_update(constant(1)).unwrap();
        let generation = rt.with_compiler(|c| c.generation()).unwrap();
        let err = rt
            .add_or_update(UnitSource::new("bad.pure").element(function(
                "test",
                "bad",
                &[],
                "Integer",
                "1",
                vec![call("noSuchFunction", vec![])],
            )))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Compile(_)));
        assert_eq!(rt.with_compiler(|c| c.generation()).unwrap(), generation);
    }
}
