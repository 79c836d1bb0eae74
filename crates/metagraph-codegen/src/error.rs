//! Codegen error types covering emission, loading and cache failures.

use metagraph_exec::ExecutionError;

/// Errors that can occur while emitting, loading or caching target source.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// A target-source line the loader could not read.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Well-formed source that cannot be linked into a program, e.g. a
    /// call to a function label nothing defines.
    #[error("load error: {0}")]
    Load(String),

    /// Graph shapes the emitter cannot lower, and native binding failures.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Filesystem I/O error in the source cache.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("cache state error: {0}")]
    State(#[from] serde_json::Error),
}

impl CodegenError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        CodegenError::Parse {
            line,
            message: message.into(),
        }
    }
}
