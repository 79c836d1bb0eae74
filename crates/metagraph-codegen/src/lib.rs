//! Compiled execution backend.
//!
//! Graph functions are lowered to a small textual target source, one block
//! per function and per lambda, which a loader links into a [`Program`] and
//! a stack machine runs. Natives are never lowered: the source declares
//! them by signature and the loader binds each declaration to the shared
//! native table, so both backends run the same native code.
//!
//! # Modules
//!
//! - [`codegen`] -- Deterministic emission of target source from the graph
//! - [`program`] -- The target-source format: blocks, instructions, parsing
//! - [`loader`] -- Links parsed blocks into a [`Program`], binding natives
//! - [`runtime`] -- Support routines the machine's instructions call into
//! - [`vm`] -- The stack machine
//! - [`incremental`] -- Per-function hashing, dirty plans, the source cache
//! - [`compiler`] -- [`CompiledBackend`], the [`metagraph_exec::ExecutionBackend`]

pub mod codegen;
pub mod compiler;
pub mod error;
pub mod incremental;
pub mod loader;
pub mod program;
pub mod runtime;
pub mod vm;

pub use compiler::CompiledBackend;
pub use error::CodegenError;
pub use incremental::{IncrementalState, RecompilationPlan};
pub use loader::Program;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options controlling emission and execution of compiled code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Directory for emitted per-function sources and the incremental
    /// state. `None` keeps everything in memory.
    pub cache_dir: Option<PathBuf>,

    /// Lower `if` calls whose branches are literal zero-parameter lambdas
    /// to jumps instead of closure calls.
    pub inline_if: bool,

    /// Same limit as the interpreter's `max_call_depth`.
    pub max_call_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            cache_dir: None,
            inline_if: true,
            max_call_depth: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_compile_options() {
        let opts = CompileOptions::default();
        assert!(opts.cache_dir.is_none());
        assert!(opts.inline_if);
        assert_eq!(opts.max_call_depth, 256);
    }

    #[test]
    fn compile_options_serde_roundtrip() {
        let opts = CompileOptions {
            cache_dir: Some(PathBuf::from("/tmp/metagraph")),
            inline_if: false,
            max_call_depth: 32,
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: CompileOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let back: CompileOptions = serde_json::from_str(r#"{"inline_if": false}"#).unwrap();
        assert!(!back.inline_if);
        assert_eq!(back.max_call_depth, 256);
    }
}
