//! The instance graph store.
//!
//! [`InstanceStore`] exclusively owns every [`Node`]. It assigns synthetic
//! identities, keeps a per-classifier index for bulk queries, and keeps the
//! [`UsageIndex`] exact by routing every property mutation through itself.
//!
//! # Transactions
//!
//! The store does not arbitrate concurrency; callers serialize deltas. What
//! it does provide is undo: between [`begin_transaction`] and [`commit`],
//! every mutation appends a reversible [`JournalEntry`], and [`rollback`]
//! replays the journal backwards. Derived indices (usages, classifier
//! instances) are recomputed from the restored values, so a rolled-back
//! delta leaves no trace except skipped ids.
//!
//! [`begin_transaction`]: InstanceStore::begin_transaction
//! [`commit`]: InstanceStore::commit
//! [`rollback`]: InstanceStore::rollback

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::CoreError;
use crate::factory::{FactoryRegistry, NodeFactory};
use crate::id::NodeId;
use crate::m3::{self, props, ClassifierPath};
use crate::node::{ClassifierRef, Node, NodeInit};
use crate::source::SourceInfo;
use crate::usage::{ReferenceUsage, UsageIndex};
use crate::value::{ImportStub, PropertyValue};

/// Intent declared by a deleting caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Fail with `ReferencedNodeDeletion` while other nodes refer to the target.
    #[default]
    Refuse,
    /// Unresolve every incoming reference, then delete.
    Force,
}

/// Classifier chain of a node, most specific first.
pub type Linearization = SmallVec<[NodeId; 8]>;

/// One reversible store mutation.
#[derive(Debug, Clone)]
enum JournalEntry {
    Created(NodeId),
    Deleted(Box<Node>),
    ValuesChanged {
        owner: NodeId,
        property: String,
        previous: Option<Vec<PropertyValue>>,
    },
    ClassifierChanged {
        node: NodeId,
        previous: Option<NodeId>,
    },
    ClassifierRegistered {
        path: ClassifierPath,
        previous: Option<NodeId>,
    },
}

pub struct InstanceStore {
    nodes: BTreeMap<NodeId, Node>,
    next_id: u32,
    factories: Arc<FactoryRegistry>,
    /// Classifier path -> classifier node.
    classifiers: HashMap<ClassifierPath, NodeId>,
    /// Classifier path -> nodes created with it.
    instances: HashMap<ClassifierPath, BTreeSet<NodeId>>,
    usages: UsageIndex,
    journal: Option<Vec<JournalEntry>>,
    root: Option<NodeId>,
}

impl InstanceStore {
    /// An empty store. Most callers want [`InstanceStore::bootstrapped`].
    pub fn new(factories: Arc<FactoryRegistry>) -> Self {
        InstanceStore {
            nodes: BTreeMap::new(),
            next_id: 0,
            factories,
            classifiers: HashMap::new(),
            instances: HashMap::new(),
            usages: UsageIndex::new(),
            journal: None,
            root: None,
        }
    }

    /// A store pre-populated with the platform metamodel and standard library.
    pub fn bootstrapped(factories: Arc<FactoryRegistry>) -> Result<Self, CoreError> {
        let mut store = InstanceStore::new(factories);
        crate::bootstrap::install(&mut store)?;
        Ok(store)
    }

    pub fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    /// The root package.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create a node of the classifier registered under `classifier_path`.
    ///
    /// The factory is looked up along the classifier's linearization, so a
    /// user class without a factory of its own inherits its nearest
    /// ancestor's (ultimately `Any`'s).
    pub fn create(
        &mut self,
        classifier_path: &str,
        name: Option<&str>,
        source: Option<SourceInfo>,
        persistent: bool,
    ) -> Result<NodeId, CoreError> {
        let classifier =
            self.classifier_node(classifier_path)
                .ok_or_else(|| CoreError::UnknownClassifier {
                    path: classifier_path.to_string(),
                })?;
        let factory = self
            .factory_along(classifier_path, classifier)
            .ok_or_else(|| CoreError::UnknownClassifier {
                path: classifier_path.to_string(),
            })?;
        let id = self.alloc_id();
        let node = factory.construct(NodeInit {
            id,
            name: name.map(str::to_string),
            classifier: ClassifierRef {
                path: ClassifierPath::from(classifier_path),
                resolved: Some(classifier),
            },
            source,
            persistent,
        });
        self.insert_node(node);
        Ok(id)
    }

    /// Create a node whose factory is selected by synthetic id.
    pub fn create_by_synthetic_id(
        &mut self,
        synthetic_id: u32,
        name: Option<&str>,
        source: Option<SourceInfo>,
        persistent: bool,
    ) -> Result<NodeId, CoreError> {
        let (path, factory) = self
            .factories
            .factory_for_synthetic_id(synthetic_id)
            .ok_or(CoreError::UnknownSyntheticId { id: synthetic_id })?;
        let classifier =
            self.classifier_node(path.as_str())
                .ok_or_else(|| CoreError::UnknownClassifier {
                    path: path.to_string(),
                })?;
        let id = self.alloc_id();
        let node = factory.construct(NodeInit {
            id,
            name: name.map(str::to_string),
            classifier: ClassifierRef {
                path,
                resolved: Some(classifier),
            },
            source,
            persistent,
        });
        self.insert_node(node);
        Ok(id)
    }

    /// Create a node contained in `owner.property`. Persistence follows the owner.
    pub fn create_child(
        &mut self,
        owner: NodeId,
        property: &str,
        classifier_path: &str,
        name: Option<&str>,
        source: Option<SourceInfo>,
    ) -> Result<NodeId, CoreError> {
        let persistent = self.node(owner)?.is_persistent();
        let child = self.create(classifier_path, name, source, persistent)?;
        if let Some(node) = self.nodes.get_mut(&child) {
            node.set_container(Some(owner));
        }
        self.add_value(owner, property, PropertyValue::Node(child))?;
        Ok(child)
    }

    /// Insert a node built outside a factory (bootstrap of `Class` itself).
    pub(crate) fn insert_raw(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.insert_node(node);
        id
    }

    pub(crate) fn alloc_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert_node(&mut self, node: Node) {
        let id = node.id();
        self.index_instance(&node);
        self.nodes.insert(id, node);
        self.reindex_classifier_usage(id);
        self.record(JournalEntry::Created(id));
    }

    fn factory_along(&self, path: &str, classifier: NodeId) -> Option<Arc<dyn NodeFactory>> {
        self.factories.factory_for(path).or_else(|| {
            self.linearization(classifier).iter().skip(1).find_map(|c| {
                self.classifier_path_of(*c)
                    .and_then(|p| self.factories.factory_for(p.as_str()))
            })
        })
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.nodes.get(&id).ok_or(CoreError::NodeNotFound { id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn usages(&self) -> &UsageIndex {
        &self.usages
    }

    /// The node plus every node it contains, transitively.
    pub fn containment_closure(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut closure = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !closure.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children());
            }
        }
        closure
    }

    /// Outermost container of a node.
    pub fn top_level_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        let mut guard = 0usize;
        while let Some(container) = self.nodes.get(&current).and_then(Node::container) {
            current = container;
            guard += 1;
            if guard > self.nodes.len() {
                break;
            }
        }
        current
    }

    // -----------------------------------------------------------------------
    // Classifiers
    // -----------------------------------------------------------------------

    pub fn classifier_node(&self, path: &str) -> Option<NodeId> {
        self.classifiers.get(path).copied()
    }

    /// Registered classifier paths, sorted.
    pub fn classifier_paths(&self) -> Vec<&ClassifierPath> {
        let mut paths: Vec<&ClassifierPath> = self.classifiers.keys().collect();
        paths.sort();
        paths
    }

    pub fn register_classifier(&mut self, path: &str, classifier: NodeId) -> Result<(), CoreError> {
        self.node(classifier)?;
        let key = ClassifierPath::from(path);
        let previous = self.classifiers.insert(key.clone(), classifier);
        self.record(JournalEntry::ClassifierRegistered { path: key, previous });
        Ok(())
    }

    pub fn unregister_classifier(&mut self, path: &str) {
        if let Some(previous) = self.classifiers.remove(path) {
            self.record(JournalEntry::ClassifierRegistered {
                path: ClassifierPath::from(path),
                previous: Some(previous),
            });
        }
    }

    /// Path under which a classifier node is registered, if any.
    pub fn classifier_path_of(&self, classifier: NodeId) -> Option<&ClassifierPath> {
        self.classifiers
            .iter()
            .find(|(_, c)| **c == classifier)
            .map(|(p, _)| p)
    }

    /// The classifier followed by its generalizations, breadth-first in
    /// declaration order, ending with `Any`.
    pub fn linearization(&self, classifier: NodeId) -> Linearization {
        let mut out = Linearization::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([classifier]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            if let Some(node) = self.nodes.get(&current) {
                queue.extend(
                    node.values(props::GENERALIZATIONS)
                        .iter()
                        .filter_map(PropertyValue::target),
                );
            }
        }
        if let Some(any) = self.classifier_node(m3::ANY) {
            if !seen.contains(&any) {
                out.push(any);
            }
        }
        out
    }

    /// Classifier paths of a node, most specific first. Falls back to the
    /// recorded path when the classifier is currently unbound.
    pub fn type_chain(&self, id: NodeId) -> Vec<String> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        match node.classifier_id() {
            Some(classifier) => self
                .linearization(classifier)
                .iter()
                .filter_map(|c| {
                    self.classifier_path_of(*c)
                        .map(|p| p.to_string())
                        .or_else(|| self.qualified_path(*c))
                })
                .collect(),
            None => vec![node.classifier_path().to_string(), m3::ANY.to_string()],
        }
    }

    pub fn is_instance_of(&self, id: NodeId, classifier_path: &str) -> bool {
        self.type_chain(id).iter().any(|p| p == classifier_path)
    }

    /// Whether classifier `sub` has `sup` in its linearization.
    pub fn is_subtype(&self, sub: NodeId, sup: NodeId) -> bool {
        self.linearization(sub).contains(&sup)
    }

    /// Instances of a classifier and of all its subtypes, ascending by id.
    pub fn all_of_classifier(&self, classifier_path: &str) -> Vec<NodeId> {
        let Some(target) = self.classifier_node(classifier_path) else {
            return Vec::new();
        };
        let mut out = BTreeSet::new();
        for (path, classifier) in &self.classifiers {
            if self.is_subtype(*classifier, target) {
                if let Some(ids) = self.instances.get(path) {
                    out.extend(ids.iter().copied());
                }
            }
        }
        out.into_iter().collect()
    }

    fn index_instance(&mut self, node: &Node) {
        self.instances
            .entry(node.classifier().path.clone())
            .or_default()
            .insert(node.id());
    }

    fn unindex_instance(&mut self, node: &Node) {
        if let Some(ids) = self.instances.get_mut(node.classifier_path()) {
            ids.remove(&node.id());
            if ids.is_empty() {
                self.instances.remove(node.classifier_path());
            }
        }
    }

    /// Bind a node's classifier to a classifier node.
    pub fn resolve_classifier(&mut self, id: NodeId, classifier: NodeId) -> Result<(), CoreError> {
        self.node(classifier)?;
        self.change_classifier(id, Some(classifier))
    }

    /// Detach a node from its classifier, keeping the path for rebinding.
    pub fn unresolve_classifier(&mut self, id: NodeId) -> Result<(), CoreError> {
        self.change_classifier(id, None)
    }

    fn change_classifier(&mut self, id: NodeId, resolved: Option<NodeId>) -> Result<(), CoreError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(CoreError::NodeNotFound { id })?;
        let previous = node.classifier_id();
        node.set_classifier(resolved);
        self.record(JournalEntry::ClassifierChanged { node: id, previous });
        self.reindex_classifier_usage(id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Property mutation
    // -----------------------------------------------------------------------

    /// Append a value, returning its offset.
    pub fn add_value(
        &mut self,
        owner: NodeId,
        property: &str,
        value: PropertyValue,
    ) -> Result<usize, CoreError> {
        self.check_target(&value)?;
        self.mutate(owner, property, |values| {
            values.push(value);
            Ok(values.len() - 1)
        })
    }

    /// Replace all values of a property.
    pub fn set_values(
        &mut self,
        owner: NodeId,
        property: &str,
        new_values: Vec<PropertyValue>,
    ) -> Result<(), CoreError> {
        for value in &new_values {
            self.check_target(value)?;
        }
        self.mutate(owner, property, |values| {
            *values = new_values;
            Ok(())
        })
    }

    pub fn remove_value(
        &mut self,
        owner: NodeId,
        property: &str,
        offset: usize,
    ) -> Result<PropertyValue, CoreError> {
        self.mutate(owner, property, |values| {
            if offset >= values.len() {
                return Err(CoreError::NoSuchValue {
                    node: owner,
                    property: property.to_string(),
                    offset,
                });
            }
            Ok(values.remove(offset))
        })
    }

    /// Remove a property entirely, returning its former values.
    pub fn clear_property(
        &mut self,
        owner: NodeId,
        property: &str,
    ) -> Result<Vec<PropertyValue>, CoreError> {
        let node = self
            .nodes
            .get_mut(&owner)
            .ok_or(CoreError::NodeNotFound { id: owner })?;
        let previous = node.values_snapshot(property);
        node.restore_values(property, None);
        self.record(JournalEntry::ValuesChanged {
            owner,
            property: property.to_string(),
            previous: previous.clone(),
        });
        self.reindex_usages(owner, property);
        Ok(previous.unwrap_or_default())
    }

    /// Attach a target to the stub at `owner.property[offset]`.
    pub fn resolve_stub(
        &mut self,
        owner: NodeId,
        property: &str,
        offset: usize,
        target: NodeId,
    ) -> Result<(), CoreError> {
        self.node(target)?;
        self.set_stub_target(owner, property, offset, Some(target))
    }

    /// Detach the stub at `owner.property[offset]`, keeping its path.
    pub fn unresolve_stub(
        &mut self,
        owner: NodeId,
        property: &str,
        offset: usize,
    ) -> Result<(), CoreError> {
        self.set_stub_target(owner, property, offset, None)
    }

    fn set_stub_target(
        &mut self,
        owner: NodeId,
        property: &str,
        offset: usize,
        target: Option<NodeId>,
    ) -> Result<(), CoreError> {
        self.mutate(owner, property, |values| match values.get_mut(offset) {
            Some(PropertyValue::Stub(stub)) => {
                stub.resolved = target;
                Ok(())
            }
            Some(_) => Err(CoreError::NotAReference {
                node: owner,
                property: property.to_string(),
                offset,
            }),
            None => Err(CoreError::NoSuchValue {
                node: owner,
                property: property.to_string(),
                offset,
            }),
        })
    }

    /// Apply `f` to a property's values, journaling the prior state and
    /// re-deriving the property's usage edges. On error nothing changes.
    fn mutate<R>(
        &mut self,
        owner: NodeId,
        property: &str,
        f: impl FnOnce(&mut Vec<PropertyValue>) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        let node = self
            .nodes
            .get_mut(&owner)
            .ok_or(CoreError::NodeNotFound { id: owner })?;
        let previous = node.values_snapshot(property);
        let mut working = previous.clone().unwrap_or_default();
        let result = f(&mut working)?;
        node.restore_values(property, Some(working));
        self.record(JournalEntry::ValuesChanged {
            owner,
            property: property.to_string(),
            previous,
        });
        self.reindex_usages(owner, property);
        Ok(result)
    }

    fn check_target(&self, value: &PropertyValue) -> Result<(), CoreError> {
        match value.target() {
            Some(target) if !self.nodes.contains_key(&target) => {
                Err(CoreError::NodeNotFound { id: target })
            }
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Usage derivation
    // -----------------------------------------------------------------------

    /// Edges are kept for every target except live persistent nodes, which
    /// are never evicted. A missing target counts as non-persistent so that
    /// rollback can restore edges before their targets reappear.
    fn tracks(&self, target: NodeId) -> bool {
        self.nodes.get(&target).map_or(true, |n| !n.is_persistent())
    }

    fn reindex_usages(&mut self, owner: NodeId, property: &str) {
        self.usages.remove_owner_property(owner, property);
        let Some(node) = self.nodes.get(&owner) else {
            return;
        };
        let fresh: Vec<ReferenceUsage> = node
            .values(property)
            .iter()
            .enumerate()
            .filter_map(|(offset, value)| match value {
                PropertyValue::Stub(ImportStub {
                    resolved: Some(target),
                    source,
                    ..
                }) if self.tracks(*target) => Some(ReferenceUsage {
                    owner,
                    used: *target,
                    property: property.to_string(),
                    offset,
                    source: source.clone(),
                }),
                _ => None,
            })
            .collect();
        for usage in fresh {
            self.usages.add(usage);
        }
    }

    fn reindex_classifier_usage(&mut self, id: NodeId) {
        self.usages.remove_owner_property(id, props::CLASSIFIER);
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if let Some(classifier) = node.classifier_id() {
            if classifier != id && self.tracks(classifier) {
                let usage = ReferenceUsage {
                    owner: id,
                    used: classifier,
                    property: props::CLASSIFIER.to_string(),
                    offset: 0,
                    source: node.source().cloned(),
                };
                self.usages.add(usage);
            }
        }
    }

    fn reindex_all_usages(&mut self, id: NodeId) {
        let properties: Vec<String> = match self.nodes.get(&id) {
            Some(node) => node.property_names().map(str::to_string).collect(),
            None => return,
        };
        for property in properties {
            self.reindex_usages(id, &property);
        }
        self.reindex_classifier_usage(id);
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete a node and everything it contains.
    pub fn delete(&mut self, id: NodeId, mode: DeleteMode) -> Result<(), CoreError> {
        self.node(id)?;
        let closure = self.containment_closure(id);
        self.delete_all(&closure, mode)
    }

    /// Delete a set of nodes (plus their contained descendants) at once.
    ///
    /// References between members of the set never block deletion; only
    /// references from outside do, and `mode` decides what happens to them.
    pub fn delete_all(&mut self, ids: &BTreeSet<NodeId>, mode: DeleteMode) -> Result<(), CoreError> {
        let mut doomed = BTreeSet::new();
        for id in ids {
            if !self.nodes.contains_key(id) {
                return Err(CoreError::NodeNotFound { id: *id });
            }
            doomed.extend(self.containment_closure(*id));
        }
        if let Some(node) = doomed.iter().find(|id| self.nodes[*id].is_persistent()) {
            return Err(CoreError::PersistentNodeDeletion { node: *node });
        }

        let mut external: Vec<ReferenceUsage> = Vec::new();
        for id in &doomed {
            external.extend(
                self.usages
                    .usages_of(*id)
                    .into_iter()
                    .filter(|u| !doomed.contains(&u.owner)),
            );
        }
        if !external.is_empty() {
            match mode {
                DeleteMode::Refuse => {
                    let users: BTreeSet<NodeId> = external.iter().map(|u| u.owner).collect();
                    return Err(CoreError::ReferencedNodeDeletion {
                        node: external[0].used,
                        users: users.into_iter().collect(),
                    });
                }
                DeleteMode::Force => {
                    for usage in &external {
                        if usage.property == props::CLASSIFIER {
                            self.unresolve_classifier(usage.owner)?;
                        } else {
                            self.unresolve_stub(usage.owner, &usage.property, usage.offset)?;
                        }
                    }
                }
            }
        }

        // Detach from containers that survive.
        for id in &doomed {
            let Some(container) = self.nodes.get(id).and_then(Node::container) else {
                continue;
            };
            if doomed.contains(&container) {
                continue;
            }
            let slot = self.nodes.get(&container).and_then(|c| {
                c.properties().find_map(|(p, values)| {
                    values
                        .iter()
                        .position(|v| *v == PropertyValue::Node(*id))
                        .map(|offset| (p.to_string(), offset))
                })
            });
            if let Some((property, offset)) = slot {
                self.remove_value(container, &property, offset)?;
            }
        }

        let registered: Vec<String> = self
            .classifiers
            .iter()
            .filter(|(_, c)| doomed.contains(c))
            .map(|(p, _)| p.to_string())
            .collect();
        for path in registered {
            self.unregister_classifier(&path);
        }

        for id in doomed {
            self.usages.remove_owner(id);
            if let Some(node) = self.nodes.remove(&id) {
                self.unindex_instance(&node);
                self.record(JournalEntry::Deleted(Box::new(node)));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Packages and paths
    // -----------------------------------------------------------------------

    /// Qualified path of a packaged element; `""` for the root package.
    pub fn qualified_path(&self, id: NodeId) -> Option<String> {
        if Some(id) == self.root {
            return Some(String::new());
        }
        let node = self.nodes.get(&id)?;
        let package = node.target(props::PACKAGE)?;
        let name = node.name()?;
        if package == id {
            return None;
        }
        let parent = self.qualified_path(package)?;
        Some(m3::join(&parent, name))
    }

    /// A human-readable locator for any node, used in diagnostics.
    pub fn describe(&self, id: NodeId) -> String {
        if let Some(path) = self.qualified_path(id) {
            return if path.is_empty() { m3::PATH_SEPARATOR.to_string() } else { path };
        }
        let Some(node) = self.nodes.get(&id) else {
            return format!("#{id}");
        };
        let kind = m3::simple_name(node.classifier_path());
        let top = self.top_level_of(id);
        match (top != id).then(|| self.qualified_path(top)).flatten() {
            Some(owner) => format!("{owner}/{kind}#{id}"),
            None => match node.name() {
                Some(name) => format!("{name}#{id}"),
                None => format!("{kind}#{id}"),
            },
        }
    }

    /// Direct child of `package` with the given simple name.
    pub fn child_named(&self, package: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .get(&package)?
            .values(props::CHILDREN)
            .iter()
            .filter_map(PropertyValue::target)
            .find(|c| self.nodes.get(c).and_then(Node::name) == Some(name))
    }

    /// Walk packages from the root to the element at `path`.
    pub fn find_element(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root?;
        if path.is_empty() || path == m3::PATH_SEPARATOR {
            return Some(current);
        }
        for segment in path.split(m3::PATH_SEPARATOR) {
            current = self.child_named(current, segment)?;
        }
        Some(current)
    }

    /// Find or create the package chain for `path`.
    pub fn ensure_package(&mut self, path: &str, persistent: bool) -> Result<NodeId, CoreError> {
        let mut current = self.root.ok_or_else(|| CoreError::GraphInconsistency {
            reason: "store has no root package".to_string(),
        })?;
        if path.is_empty() || path == m3::PATH_SEPARATOR {
            return Ok(current);
        }
        for segment in path.split(m3::PATH_SEPARATOR) {
            current = match self.child_named(current, segment) {
                Some(existing) => existing,
                None => {
                    let package = self.create(m3::PACKAGE, Some(segment), None, persistent)?;
                    self.attach_to_package(package, current)?;
                    package
                }
            };
        }
        Ok(current)
    }

    /// Make `element` a child of `package` (both directions).
    pub fn attach_to_package(&mut self, element: NodeId, package: NodeId) -> Result<(), CoreError> {
        let package_path = self.qualified_path(package).unwrap_or_default();
        let name = self.node(element)?.name().unwrap_or_default().to_string();
        self.set_values(
            element,
            props::PACKAGE,
            vec![PropertyValue::Stub(ImportStub::bound(package_path, package))],
        )?;
        self.add_value(
            package,
            props::CHILDREN,
            PropertyValue::Stub(ImportStub::bound(name, element)),
        )?;
        Ok(())
    }

    /// Undo [`attach_to_package`](Self::attach_to_package), returning the former package.
    pub fn detach_from_package(&mut self, element: NodeId) -> Result<Option<NodeId>, CoreError> {
        let Some(package) = self.node(element)?.target(props::PACKAGE) else {
            return Ok(None);
        };
        let offset = self.nodes.get(&package).and_then(|p| {
            p.values(props::CHILDREN)
                .iter()
                .position(|v| v.target() == Some(element))
        });
        if let Some(offset) = offset {
            self.remove_value(package, props::CHILDREN, offset)?;
        }
        self.clear_property(element, props::PACKAGE)?;
        Ok(Some(package))
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    pub fn begin_transaction(&mut self) -> Result<(), CoreError> {
        if self.journal.is_some() {
            return Err(CoreError::Transaction {
                reason: "a transaction is already open".to_string(),
            });
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    /// Keep every change made since `begin_transaction`. Returns the number
    /// of journaled mutations.
    pub fn commit(&mut self) -> Result<usize, CoreError> {
        self.journal
            .take()
            .map(|j| j.len())
            .ok_or_else(|| CoreError::Transaction {
                reason: "commit without an open transaction".to_string(),
            })
    }

    /// Undo every change made since `begin_transaction`.
    pub fn rollback(&mut self) -> Result<usize, CoreError> {
        let entries = self.journal.take().ok_or_else(|| CoreError::Transaction {
            reason: "rollback without an open transaction".to_string(),
        })?;
        let count = entries.len();
        for entry in entries.into_iter().rev() {
            self.undo(entry);
        }
        Ok(count)
    }

    fn record(&mut self, entry: JournalEntry) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(entry);
        }
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Created(id) => {
                self.usages.remove_owner(id);
                if let Some(node) = self.nodes.remove(&id) {
                    self.unindex_instance(&node);
                }
            }
            JournalEntry::Deleted(node) => {
                let id = node.id();
                self.index_instance(&node);
                self.nodes.insert(id, *node);
                self.reindex_all_usages(id);
            }
            JournalEntry::ValuesChanged {
                owner,
                property,
                previous,
            } => {
                if let Some(node) = self.nodes.get_mut(&owner) {
                    node.restore_values(&property, previous);
                }
                self.reindex_usages(owner, &property);
            }
            JournalEntry::ClassifierChanged { node, previous } => {
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.set_classifier(previous);
                }
                self.reindex_classifier_usage(node);
            }
            JournalEntry::ClassifierRegistered { path, previous } => match previous {
                Some(id) => {
                    self.classifiers.insert(path, id);
                }
                None => {
                    self.classifiers.remove(&path);
                }
            },
        }
    }

    // -----------------------------------------------------------------------
    // Consistency checking
    // -----------------------------------------------------------------------

    /// Derived indices that disagree with the node values.
    pub fn consistency_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for usage in self.usages.iter() {
            let Some(owner) = self.nodes.get(&usage.owner) else {
                violations.push(format!("usage owner {} missing", usage.owner));
                continue;
            };
            if !self.nodes.contains_key(&usage.used) {
                violations.push(format!("usage target {} missing", usage.used));
            }
            let actual = if usage.property == props::CLASSIFIER {
                owner.classifier_id()
            } else {
                owner.values(&usage.property).get(usage.offset).and_then(PropertyValue::target)
            };
            if actual != Some(usage.used) {
                violations.push(format!(
                    "stale usage {}.{}[{}]",
                    usage.owner, usage.property, usage.offset
                ));
            }
        }
        for (path, ids) in &self.instances {
            for id in ids {
                match self.nodes.get(id) {
                    None => violations.push(format!("indexed instance {id} missing")),
                    Some(node) if node.classifier_path() != path.as_str() => violations.push(
                        format!("instance {id} indexed under {path}, is {}", node.classifier_path()),
                    ),
                    Some(_) => {}
                }
            }
        }
        for (path, id) in &self.classifiers {
            if !self.nodes.contains_key(id) {
                violations.push(format!("classifier {path} points at missing {id}"));
            }
        }
        violations
    }

    /// Panic listing every consistency violation. Used by tests.
    pub fn assert_consistency(&self) {
        let violations = self.consistency_violations();
        assert!(violations.is_empty(), "inconsistent store: {violations:#?}");
    }
}

impl std::fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStore")
            .field("nodes", &self.nodes.len())
            .field("classifiers", &self.classifiers.len())
            .field("usages", &self.usages.len())
            .field("in_transaction", &self.journal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Literal;

    fn store() -> InstanceStore {
        let factories = Arc::new(FactoryRegistry::core().unwrap());
        InstanceStore::bootstrapped(factories).unwrap()
    }

    /// A user class `test::A` registered as a classifier.
    fn user_class(store: &mut InstanceStore, name: &str) -> NodeId {
        let package = store.ensure_package("test", false).unwrap();
        let class = store.create(m3::CLASS, Some(name), None, false).unwrap();
        store.attach_to_package(class, package).unwrap();
        let path = store.qualified_path(class).unwrap();
        store.register_classifier(&path, class).unwrap();
        class
    }

    #[test]
    fn create_with_unknown_classifier_fails() {
        let mut store = store();
        let err = store.create("test::Missing", None, None, false).unwrap_err();
        assert_eq!(
            err,
            CoreError::UnknownClassifier {
                path: "test::Missing".into()
            }
        );
    }

    #[test]
    fn user_class_inherits_generic_factory() {
        let mut store = store();
        user_class(&mut store, "A");
        let a = store.create("test::A", Some("a1"), None, false).unwrap();
        assert!(store.is_instance_of(a, "test::A"));
        assert!(store.is_instance_of(a, m3::ANY));
        assert_eq!(store.all_of_classifier("test::A"), vec![a]);
    }

    #[test]
    fn all_of_classifier_includes_subtypes() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let b = user_class(&mut store, "B");
        store
            .add_value(
                b,
                props::GENERALIZATIONS,
                PropertyValue::Stub(ImportStub::bound("test::A", a)),
            )
            .unwrap();
        let a1 = store.create("test::A", None, None, false).unwrap();
        let b1 = store.create("test::B", None, None, false).unwrap();
        assert_eq!(store.all_of_classifier("test::A"), vec![a1, b1]);
        assert_eq!(store.all_of_classifier("test::B"), vec![b1]);
    }

    #[test]
    fn create_by_synthetic_id_uses_declared_factory() {
        let mut store = store();
        let id = crate::bootstrap::synthetic_id_of(m3::INSTANCE_VALUE).unwrap();
        let node = store.create_by_synthetic_id(id, None, None, false).unwrap();
        assert_eq!(store.node(node).unwrap().classifier_path(), m3::INSTANCE_VALUE);
        assert!(store.node(node).unwrap().has_property(props::VALUES));
        assert!(matches!(
            store.create_by_synthetic_id(99_999, None, None, false),
            Err(CoreError::UnknownSyntheticId { id: 99_999 })
        ));
    }

    #[test]
    fn resolved_stub_records_usage_and_delete_refuses() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let owner = store.create(m3::PROPERTY, Some("p"), None, false).unwrap();
        store
            .add_value(
                owner,
                props::GENERIC_TYPE,
                PropertyValue::Stub(ImportStub::unresolved("test::A", None)),
            )
            .unwrap();
        assert!(store.usages().usages_of(a).iter().all(|u| u.owner != owner));

        store.resolve_stub(owner, props::GENERIC_TYPE, 0, a).unwrap();
        assert!(store.usages().owners_of(a).contains(&owner));

        let err = store.delete(a, DeleteMode::Refuse).unwrap_err();
        assert!(matches!(err, CoreError::ReferencedNodeDeletion { node, ref users } if node == a && users.contains(&owner)));
        assert!(store.contains(a));
        store.assert_consistency();
    }

    #[test]
    fn consistency_violations_name_the_broken_index() {
        let mut store = store();
        assert!(store.consistency_violations().is_empty());
        store.classifiers.insert(ClassifierPath::from("test::Ghost"), NodeId(u32::MAX));
        let violations = store.consistency_violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("test::Ghost"), "{violations:?}");
    }

    #[test]
    fn force_delete_unbinds_users() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let owner = store.create(m3::PROPERTY, Some("p"), None, false).unwrap();
        store
            .add_value(
                owner,
                props::GENERIC_TYPE,
                PropertyValue::Stub(ImportStub::bound("test::A", a)),
            )
            .unwrap();
        store.detach_from_package(a).unwrap();
        store.delete(a, DeleteMode::Force).unwrap();
        assert!(!store.contains(a));
        assert!(store.node(owner).unwrap().values(props::GENERIC_TYPE)[0].is_unresolved());
        assert!(store.classifier_node("test::A").is_none());
        store.assert_consistency();
    }

    #[test]
    fn deleting_a_set_ignores_internal_references() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let b = user_class(&mut store, "B");
        store
            .add_value(
                b,
                props::GENERALIZATIONS,
                PropertyValue::Stub(ImportStub::bound("test::A", a)),
            )
            .unwrap();
        store.detach_from_package(a).unwrap();
        store.detach_from_package(b).unwrap();
        let set: BTreeSet<NodeId> = [a, b].into_iter().collect();
        store.delete_all(&set, DeleteMode::Refuse).unwrap();
        assert!(!store.contains(a) && !store.contains(b));
        store.assert_consistency();
    }

    #[test]
    fn deleting_contained_child_detaches_it() {
        let mut store = store();
        let class = user_class(&mut store, "A");
        let prop = store
            .create_child(class, props::PROPERTIES, m3::PROPERTY, Some("name"), None)
            .unwrap();
        assert_eq!(store.node(prop).unwrap().container(), Some(class));
        store.delete(prop, DeleteMode::Refuse).unwrap();
        assert!(store.node(class).unwrap().values(props::PROPERTIES).is_empty());
    }

    #[test]
    fn persistent_nodes_cannot_be_deleted() {
        let mut store = store();
        let class = store.classifier_node(m3::CLASS).unwrap();
        assert!(matches!(
            store.delete(class, DeleteMode::Force),
            Err(CoreError::PersistentNodeDeletion { .. })
        ));
    }

    #[test]
    fn adding_dangling_value_is_rejected() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let err = store
            .add_value(a, props::GENERALIZATIONS, PropertyValue::Node(NodeId(1_000_000)))
            .unwrap_err();
        assert!(matches!(err, CoreError::NodeNotFound { .. }));
    }

    #[test]
    fn rollback_restores_nodes_values_and_indices() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let before_len = store.len();
        let before_usages = store.usages().len();

        store.begin_transaction().unwrap();
        let b = user_class(&mut store, "B");
        store
            .add_value(
                b,
                props::GENERALIZATIONS,
                PropertyValue::Stub(ImportStub::bound("test::A", a)),
            )
            .unwrap();
        store.detach_from_package(a).unwrap();
        store.delete(a, DeleteMode::Force).unwrap();
        assert!(store.rollback().unwrap() > 0);

        assert_eq!(store.len(), before_len);
        assert_eq!(store.usages().len(), before_usages);
        assert!(store.contains(a));
        assert!(!store.contains(b));
        assert_eq!(store.classifier_node("test::A"), Some(a));
        assert!(store.classifier_node("test::B").is_none());
        assert_eq!(store.find_element("test::A"), Some(a));
        store.assert_consistency();
    }

    #[test]
    fn commit_keeps_changes_and_closes_transaction() {
        let mut store = store();
        store.begin_transaction().unwrap();
        let a = user_class(&mut store, "A");
        assert!(store.commit().unwrap() > 0);
        assert!(!store.in_transaction());
        assert!(store.contains(a));
        assert!(store.rollback().is_err());
    }

    #[test]
    fn nested_transactions_are_rejected() {
        let mut store = store();
        store.begin_transaction().unwrap();
        assert!(store.begin_transaction().is_err());
    }

    #[test]
    fn paths_and_packages() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        assert_eq!(store.qualified_path(a).as_deref(), Some("test::A"));
        assert_eq!(store.find_element("test::A"), Some(a));
        assert_eq!(store.find_element(m3::INTEGER), store.classifier_node(m3::INTEGER));
        assert_eq!(store.describe(store.root().unwrap()), "::");

        let prop = store
            .create_child(a, props::PROPERTIES, m3::PROPERTY, Some("p"), None)
            .unwrap();
        assert_eq!(store.describe(prop), format!("test::A/Property#{prop}"));
        assert_eq!(store.top_level_of(prop), a);
    }

    #[test]
    fn remove_value_reindexes_offsets() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let b = user_class(&mut store, "B");
        let c = user_class(&mut store, "C");
        for target in [a, b] {
            store
                .add_value(
                    c,
                    props::GENERALIZATIONS,
                    PropertyValue::Stub(ImportStub::bound("x", target)),
                )
                .unwrap();
        }
        store.remove_value(c, props::GENERALIZATIONS, 0).unwrap();
        let usages = store.usages().usages_of(b);
        let gen = usages.iter().find(|u| u.owner == c).unwrap();
        assert_eq!(gen.offset, 0);
        assert!(store.usages().owners_of(a).iter().all(|o| *o != c));
        store.assert_consistency();
    }

    #[test]
    fn literal_values_do_not_create_usages() {
        let mut store = store();
        let a = user_class(&mut store, "A");
        let before = store.usages().len();
        store
            .add_value(a, "note", PropertyValue::Literal(Literal::Integer(3)))
            .unwrap();
        assert_eq!(store.usages().len(), before);
    }
}
