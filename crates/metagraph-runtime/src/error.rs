//! Runtime error type.
//!
//! [`RuntimeError`] wraps the error of every layer below the facade so
//! callers can use `?` across compilation and execution alike.

use metagraph_codegen::CodegenError;
use metagraph_compiler::CompileError;
use metagraph_core::CoreError;
use metagraph_exec::ExecutionError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// An environment variable or config file held an unusable value.
    #[error("invalid configuration for {key}: {message}")]
    Config { key: String, message: String },

    #[error("logging setup failed: {0}")]
    Logging(String),

    /// A thread panicked while holding one of the runtime's locks.
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl RuntimeError {
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        RuntimeError::Config {
            key: key.to_string(),
            message: message.into(),
        }
    }
}
