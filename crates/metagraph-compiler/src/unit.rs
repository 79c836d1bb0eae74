//! Compilation units and their lifecycle.

use serde::{Deserialize, Serialize};

use metagraph_core::{NodeId, UnitId};

use crate::fragment::UnitSource;

/// Lifecycle of a unit. A state only moves forward during a delta;
/// `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitState {
    Unparsed,
    Parsed,
    Bound,
    Validated,
    Committed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub id: UnitId,
    pub imports: Vec<String>,
    /// Top-level elements in declaration order.
    pub top_level: Vec<NodeId>,
    /// blake3 hex digest of the unit's fragments.
    pub hash: String,
    pub state: UnitState,
}

impl CompiledUnit {
    pub fn parsed(source: &UnitSource, hash: String) -> Self {
        CompiledUnit {
            id: source.id.clone(),
            imports: source.imports.clone(),
            top_level: Vec::new(),
            hash,
            state: UnitState::Parsed,
        }
    }

    /// Move to `next` if it is later in the lifecycle; earlier states are ignored.
    pub fn advance(&mut self, next: UnitState) {
        if next > self.state && self.state != UnitState::Removed {
            self.state = next;
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == UnitState::Committed
    }
}

/// A set of unit changes applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub upserts: Vec<UnitSource>,
    pub removals: Vec<UnitId>,
}

impl Delta {
    pub fn new() -> Self {
        Delta::default()
    }

    pub fn upsert(mut self, unit: UnitSource) -> Self {
        self.upserts.push(unit);
        self
    }

    pub fn remove(mut self, unit: impl Into<UnitId>) -> Self {
        self.removals.push(unit.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// What a committed delta did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub added: Vec<UnitId>,
    pub updated: Vec<UnitId>,
    pub removed: Vec<UnitId>,
    /// Upserts whose content hash matched the committed unit.
    pub unchanged: Vec<UnitId>,
    /// Nodes outside the delta that were re-bound, by locator.
    pub dependents: Vec<String>,
    pub nodes_created: usize,
    pub nodes_evicted: usize,
}

impl DeltaReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}
