//! Execution of compiled graphs.
//!
//! - [`backend`]: the [`ExecutionBackend`] contract shared with the compiled backend
//! - [`value`]: runtime [`Value`]s and [`Sequence`]s
//! - [`numeric`]: arithmetic both backends delegate to
//! - [`native`]: the signature-keyed native table and the standard library
//! - [`interpreter`]: the tree-walking [`Interpreter`]
//! - [`expr`]: how function bodies are read from the graph

pub mod backend;
pub mod coercion;
pub mod context;
pub mod error;
pub mod expr;
pub mod interpreter;
pub mod native;
pub mod numeric;
pub mod value;

pub use backend::{ExecutionBackend, FunctionCaller};
pub use context::ExecutionContext;
pub use error::{ExecutionError, ExecutionErrorKind};
pub use interpreter::{Interpreter, InterpreterConfig};
pub use native::{NativeFn, NativeRegistry};
pub use value::{Closure, FunctionTarget, Sequence, Value};
