//! Core error types for metagraph-core.
//!
//! Uses `thiserror` for structured, matchable variants covering the failure
//! modes of the instance graph, the factory registry and the usage index.

use thiserror::Error;

use crate::id::NodeId;

/// Errors produced by the metagraph-core crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// No classifier node, or no factory reachable from it, for this path.
    #[error("unknown classifier: '{path}'")]
    UnknownClassifier { path: String },

    /// Two factory providers claimed the same classifier path or synthetic id.
    #[error("duplicate classifier factory for '{key}': claimed by '{first}' and '{second}'")]
    DuplicateClassifierFactory {
        key: String,
        first: String,
        second: String,
    },

    /// No factory declares this synthetic id.
    #[error("no factory for synthetic id {id}")]
    UnknownSyntheticId { id: u32 },

    /// A node id was not found in the store.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// Deletion refused because other nodes still reference the target.
    #[error("node {node} is still referenced by {} node(s)", users.len())]
    ReferencedNodeDeletion { node: NodeId, users: Vec<NodeId> },

    /// Platform nodes cannot be deleted.
    #[error("node {node} is persistent and cannot be deleted")]
    PersistentNodeDeletion { node: NodeId },

    /// A property value index was out of range.
    #[error("node {node} has no value at {property}[{offset}]")]
    NoSuchValue {
        node: NodeId,
        property: String,
        offset: usize,
    },

    /// A value at this position is not a stub.
    #[error("value at {node}.{property}[{offset}] is not a reference")]
    NotAReference {
        node: NodeId,
        property: String,
        offset: usize,
    },

    /// More values than a to-one access allows.
    #[error("property '{property}' of node {node} holds {count} values, expected at most one")]
    ToOneViolation {
        node: NodeId,
        property: String,
        count: usize,
    },

    /// Multiplicity text could not be parsed.
    #[error("invalid multiplicity: '{text}'")]
    InvalidMultiplicity { text: String },

    /// Transaction begin/commit/rollback used out of order.
    #[error("transaction error: {reason}")]
    Transaction { reason: String },

    /// A store-level invariant was violated.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
