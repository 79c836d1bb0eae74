//! The contract every execution backend implements.

use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::value::{Sequence, Value};

/// Runs functions of a compiled graph.
///
/// The graph must not change while a backend borrowed from it is alive;
/// callers serialize deltas against executions.
pub trait ExecutionBackend {
    fn name(&self) -> &str;

    /// Call the function at `path` with one sequence per parameter.
    fn execute(
        &self,
        path: &str,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError>;
}

/// Lets natives such as `if` call back into whichever backend invoked them.
pub trait FunctionCaller {
    fn call_value(
        &mut self,
        function: &Value,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError>;
}
