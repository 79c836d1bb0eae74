//! Stable identifiers for graph nodes and compilation units.
//!
//! [`NodeId`] is a synthetic `u32` handed out by the store and never reused
//! within a process, so an evicted node can't be confused with a node created
//! later. [`UnitId`] names a source unit by its path.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Synthetic node identity assigned by the [`InstanceStore`](crate::store::InstanceStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Identity of a compilation unit (its source path).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(path: impl Into<String>) -> Self {
        UnitId(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(path: &str) -> Self {
        UnitId(path.to_string())
    }
}

impl From<String> for UnitId {
    fn from(path: String) -> Self {
        UnitId(path)
    }
}

// Bridge to petgraph indices for graph algorithms run over node subsets.

impl From<NodeIndex<u32>> for NodeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        NodeId(idx.index() as u32)
    }
}

impl From<NodeId> for NodeIndex<u32> {
    fn from(id: NodeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}
