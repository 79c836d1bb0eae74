//! Execution error types shared by every backend.
//!
//! An [`ExecutionError`] is a kind plus the stack of source locations the
//! error passed through on its way out. Backends push a location each time
//! the error leaves an expression that has one, so the innermost location
//! comes first.

use std::fmt::Write;

use thiserror::Error;

use metagraph_core::{CoreError, Multiplicity, NodeId, SourceInfo};

/// What went wrong, independent of where.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionErrorKind {
    #[error("integer overflow in {operation}")]
    IntegerOverflow { operation: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: String,
    },

    #[error("multiplicity violation for {what}: expected [{expected}], found {found} value(s)")]
    Multiplicity {
        what: String,
        expected: Multiplicity,
        found: usize,
    },

    #[error("{function} expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown function: '{path}'")]
    UnknownFunction { path: String },

    /// A `NativeFunction` node has no implementation registered for its signature.
    #[error("no native implementation for signature '{signature}'")]
    MissingNative { signature: String },

    #[error("native implementation for '{signature}' registered twice")]
    DuplicateNative { signature: String },

    #[error("unbound variable '{name}'")]
    UnboundVariable { name: String },

    #[error("call depth limit ({limit}) exceeded")]
    DepthLimit { limit: usize },

    #[error("call budget ({limit}) exhausted")]
    CallBudget { limit: u64 },

    /// The graph does not have the shape an expression of this kind needs.
    #[error("malformed expression {node}: {reason}")]
    Malformed { node: NodeId, reason: String },

    #[error("graph error: {message}")]
    Graph { message: String },
}

/// An execution failure with the source locations it propagated through.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}{}", stack_suffix(.stack))]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    /// Innermost location first.
    pub stack: Vec<SourceInfo>,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind) -> Self {
        ExecutionError {
            kind,
            stack: Vec::new(),
        }
    }

    /// Record that the error passed through `location`.
    pub fn at(mut self, location: Option<&SourceInfo>) -> Self {
        if let Some(location) = location {
            if self.stack.last() != Some(location) {
                self.stack.push(location.clone());
            }
        }
        self
    }

    pub fn type_mismatch(operation: &str, expected: &str, found: &str) -> Self {
        ExecutionErrorKind::TypeMismatch {
            operation: operation.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
        .into()
    }

    pub fn malformed(node: NodeId, reason: impl Into<String>) -> Self {
        ExecutionErrorKind::Malformed {
            node,
            reason: reason.into(),
        }
        .into()
    }
}

impl From<ExecutionErrorKind> for ExecutionError {
    fn from(kind: ExecutionErrorKind) -> Self {
        ExecutionError::new(kind)
    }
}

impl From<CoreError> for ExecutionError {
    fn from(err: CoreError) -> Self {
        ExecutionErrorKind::Graph {
            message: err.to_string(),
        }
        .into()
    }
}

fn stack_suffix(stack: &[SourceInfo]) -> String {
    let mut out = String::new();
    for location in stack {
        let _ = write!(out, "\n    at {location}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_is_rendered_innermost_first() {
        let inner = SourceInfo::at("a.pure", 3, 5);
        let outer = SourceInfo::at("a.pure", 1, 1);
        let err = ExecutionError::from(ExecutionErrorKind::DivisionByZero)
            .at(Some(&inner))
            .at(None)
            .at(Some(&outer));
        assert_eq!(err.stack, vec![inner.clone(), outer.clone()]);
        let text = err.to_string();
        assert!(text.starts_with("division by zero\n    at "));
        assert!(text.find(&inner.to_string()) < text.find(&outer.to_string()));
    }

    #[test]
    fn repeated_location_is_recorded_once() {
        let here = SourceInfo::at("a.pure", 2, 2);
        let err = ExecutionError::from(ExecutionErrorKind::DivisionByZero)
            .at(Some(&here))
            .at(Some(&here));
        assert_eq!(err.stack.len(), 1);
    }
}
