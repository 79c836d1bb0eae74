//! Per-execution session state.
//!
//! Everything an execution needs beyond its arguments travels in an
//! [`ExecutionContext`] passed by the caller: who is executing, where
//! `print` output goes, and how many calls may still be made. Nothing is
//! kept in thread-local or global state, so two executions on different
//! threads never observe each other.

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, ExecutionErrorKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    caller: Option<String>,
    output: Vec<String>,
    max_calls: Option<u64>,
    calls: u64,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of whoever started the execution.
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// Cap the number of function calls (user and native) this execution may make.
    pub fn with_call_budget(mut self, max_calls: u64) -> Self {
        self.max_calls = Some(max_calls);
        self
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn print(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Count one call against the budget.
    pub fn charge_call(&mut self) -> Result<(), ExecutionError> {
        self.calls += 1;
        match self.max_calls {
            Some(limit) if self.calls > limit => Err(ExecutionErrorKind::CallBudget { limit }.into()),
            _ => Ok(()),
        }
    }
}
