//! Runtime facade over the metagraph compiler and its execution backends.
//!
//! A [`Runtime`] owns one [`IncrementalCompiler`](metagraph_compiler::IncrementalCompiler),
//! serializes deltas against it per repository, and executes functions on
//! either the interpreter or the compiled backend.
//!
//! # Modules
//!
//! - [`concurrency`] -- Keyed lock handles
//! - [`config`] -- [`RuntimeConfig`] and [`BackendKind`]
//! - [`logging`] -- Subscriber setup
//! - [`runtime`] -- The [`Runtime`] itself

pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use concurrency::{same_handle, LockHandle, LockManager};
pub use config::{BackendKind, RuntimeConfig};
pub use error::RuntimeError;
pub use logging::LogConfig;
pub use runtime::Runtime;
