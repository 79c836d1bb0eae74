//! Reference-usage tracking.
//!
//! Every resolved reference from one node to another non-persistent node is
//! recorded here as a [`ReferenceUsage`] edge, indexed both by the used node
//! (to find everything that must be repaired when it goes away) and by the
//! owner (to drop edges the moment the owning value changes). The index is
//! derived state: the store rewrites an owner's edges for a property whenever
//! that property's values change, so offsets always match the live values.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::source::SourceInfo;

/// A directed edge: `owner.property[offset]` refers to `used`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceUsage {
    pub owner: NodeId,
    pub used: NodeId,
    pub property: String,
    pub offset: usize,
    pub source: Option<SourceInfo>,
}

type UsageKey = (NodeId, String, usize);

#[derive(Debug, Default, Clone)]
pub struct UsageIndex {
    by_used: HashMap<NodeId, IndexMap<UsageKey, ReferenceUsage>>,
    by_owner: HashMap<NodeId, HashMap<String, Vec<(usize, NodeId)>>>,
}

impl UsageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, usage: ReferenceUsage) {
        self.by_owner
            .entry(usage.owner)
            .or_default()
            .entry(usage.property.clone())
            .or_default()
            .push((usage.offset, usage.used));
        let key = (usage.owner, usage.property.clone(), usage.offset);
        self.by_used.entry(usage.used).or_default().insert(key, usage);
    }

    /// Drop every edge recorded for `owner.property`, returning them.
    pub fn remove_owner_property(&mut self, owner: NodeId, property: &str) -> Vec<ReferenceUsage> {
        let Some(props) = self.by_owner.get_mut(&owner) else {
            return Vec::new();
        };
        let Some(entries) = props.remove(property) else {
            return Vec::new();
        };
        if props.is_empty() {
            self.by_owner.remove(&owner);
        }

        let mut removed = Vec::with_capacity(entries.len());
        for (offset, used) in entries {
            if let Some(edges) = self.by_used.get_mut(&used) {
                if let Some(usage) = edges.swap_remove(&(owner, property.to_string(), offset)) {
                    removed.push(usage);
                }
                if edges.is_empty() {
                    self.by_used.remove(&used);
                }
            }
        }
        removed
    }

    /// Drop every edge owned by `owner`.
    pub fn remove_owner(&mut self, owner: NodeId) -> Vec<ReferenceUsage> {
        let properties: Vec<String> = self
            .by_owner
            .get(&owner)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        properties
            .iter()
            .flat_map(|p| self.remove_owner_property(owner, p))
            .collect()
    }

    /// Edges pointing at `used`, sorted by owner, property and offset.
    pub fn usages_of(&self, used: NodeId) -> Vec<ReferenceUsage> {
        let mut usages: Vec<ReferenceUsage> = self
            .by_used
            .get(&used)
            .map(|edges| edges.values().cloned().collect())
            .unwrap_or_default();
        usages.sort_by(|a, b| {
            (a.owner, &a.property, a.offset).cmp(&(b.owner, &b.property, b.offset))
        });
        usages
    }

    pub fn owners_of(&self, used: NodeId) -> BTreeSet<NodeId> {
        self.by_used
            .get(&used)
            .map(|edges| edges.values().map(|u| u.owner).collect())
            .unwrap_or_default()
    }

    pub fn is_used(&self, used: NodeId) -> bool {
        self.by_used.contains_key(&used)
    }

    /// Edges owned by `owner`, as `(property, offset, used)`.
    pub fn owned_by(&self, owner: NodeId) -> Vec<(String, usize, NodeId)> {
        let mut out: Vec<(String, usize, NodeId)> = self
            .by_owner
            .get(&owner)
            .map(|props| {
                props
                    .iter()
                    .flat_map(|(p, entries)| entries.iter().map(move |(o, u)| (p.clone(), *o, *u)))
                    .collect()
            })
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceUsage> {
        self.by_used.values().flat_map(|edges| edges.values())
    }

    pub fn len(&self) -> usize {
        self.by_used.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_used.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(owner: u32, used: u32, property: &str, offset: usize) -> ReferenceUsage {
        ReferenceUsage {
            owner: NodeId(owner),
            used: NodeId(used),
            property: property.to_string(),
            offset,
            source: None,
        }
    }

    #[test]
    fn add_and_query_both_directions() {
        let mut index = UsageIndex::new();
        index.add(usage(1, 10, "p", 0));
        index.add(usage(2, 10, "q", 1));
        index.add(usage(1, 11, "p", 1));

        assert_eq!(index.len(), 3);
        let owners: Vec<NodeId> = index.owners_of(NodeId(10)).into_iter().collect();
        assert_eq!(owners, vec![NodeId(1), NodeId(2)]);
        assert_eq!(
            index.owned_by(NodeId(1)),
            vec![("p".to_string(), 0, NodeId(10)), ("p".to_string(), 1, NodeId(11))]
        );
    }

    #[test]
    fn removing_owner_property_is_synchronous() {
        let mut index = UsageIndex::new();
        index.add(usage(1, 10, "p", 0));
        index.add(usage(1, 10, "r", 0));
        let removed = index.remove_owner_property(NodeId(1), "p");
        assert_eq!(removed.len(), 1);
        assert_eq!(index.usages_of(NodeId(10)), vec![usage(1, 10, "r", 0)]);

        index.remove_owner(NodeId(1));
        assert!(index.is_empty());
        assert!(!index.is_used(NodeId(10)));
    }

    #[test]
    fn usages_are_sorted() {
        let mut index = UsageIndex::new();
        index.add(usage(3, 10, "p", 0));
        index.add(usage(1, 10, "p", 2));
        index.add(usage(1, 10, "p", 1));
        let offsets: Vec<(u32, usize)> = index
            .usages_of(NodeId(10))
            .iter()
            .map(|u| (u.owner.0, u.offset))
            .collect();
        assert_eq!(offsets, vec![(1, 1), (1, 2), (3, 0)]);
    }
}
