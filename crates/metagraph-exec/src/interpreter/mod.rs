//! Tree-walking interpreter over the compiled instance graph.
//!
//! Executes function nodes directly, without generating any code, producing
//! the same results as the compiled backend for the same inputs.
//!
//! # Architecture
//!
//! - [`Interpreter`] borrows an [`InstanceStore`] and a shared
//!   [`NativeRegistry`], and implements [`ExecutionBackend`].
//! - `Evaluation` (in `eval`) walks one execution: `InstanceValue`,
//!   `VariableExpression` and `SimpleFunctionExpression` nodes, with one
//!   scope per function invocation.
//! - Natives are dispatched by signature. `if` receives its branches as
//!   closures and calls back only the chosen one; `letFunction` binds its
//!   name into the caller's scope.
//! - Errors collect the source location of every expression they leave.
//!
//! # Usage
//!
//! ```ignore
//! let natives = Arc::new(NativeRegistry::standard()?);
//! let interpreter = Interpreter::new(compiler.store(), natives, InterpreterConfig::default())?;
//! let mut cx = ExecutionContext::new();
//! let result = interpreter.execute("test::f", vec![], &mut cx)?;
//! ```

mod eval;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use metagraph_core::InstanceStore;

use crate::backend::ExecutionBackend;
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::expr;
use crate::native::NativeRegistry;
use crate::value::Sequence;

use eval::Evaluation;

/// Interpreter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Emit a `trace`-level event for every user function call.
    pub trace_calls: bool,
    /// Maximum nesting of user function calls. Default: 256.
    pub max_call_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            trace_calls: false,
            max_call_depth: 256,
        }
    }
}

pub struct Interpreter<'s> {
    store: &'s InstanceStore,
    natives: Arc<NativeRegistry>,
    config: InterpreterConfig,
}

impl<'s> Interpreter<'s> {
    /// Fails with `MissingNative` if any native in the graph is unimplemented.
    pub fn new(
        store: &'s InstanceStore,
        natives: Arc<NativeRegistry>,
        config: InterpreterConfig,
    ) -> Result<Self, ExecutionError> {
        natives.check_complete(store)?;
        Ok(Interpreter {
            store,
            natives,
            config,
        })
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }
}

impl ExecutionBackend for Interpreter<'_> {
    fn name(&self) -> &str {
        "interpreter"
    }

    fn execute(
        &self,
        path: &str,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        let function = expr::resolve_function(self.store, path)?;
        debug!(path, "interpreting");
        Evaluation::new(self).call_node(function, BTreeMap::new(), args, cx)
    }
}
