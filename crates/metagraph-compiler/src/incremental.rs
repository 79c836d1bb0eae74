//! The incremental compiler.
//!
//! [`IncrementalCompiler::apply`] takes a [`Delta`] of unit upserts and
//! removals and either commits all of it or none of it.
//!
//! # Delta pipeline
//!
//! 1. Upserts whose content hash matches the committed unit are dropped.
//! 2. **Unload** removed and replaced units: Unbind their nodes, detach them
//!    from their packages, Unbind every outside owner of a usage into them
//!    (those owners become *dependents*), then delete the evicted closure.
//!    Any usage left over is an unbind failure and blocks the delta.
//! 3. **Instantiate** the upserts. Classes from every unit are created first
//!    so instances anywhere in the delta have a classifier; references
//!    become unresolved stubs.
//! 4. **Bind** every new top-level node and every dependent.
//! 5. **Validate** the same set. Bind has finished for all units before
//!    Validate starts for any, so forward references across units resolve.
//! 6. Commit, or roll back the store, the context and the unit table.
//!
//! Dependents in other committed units are re-bound and re-validated in the
//! same delta. A dependent that no longer resolves fails the delta, so a
//! removal that would leave a dangling reference is refused.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use metagraph_core::factory::M3Factories;
use metagraph_core::m3::{self, props};
use metagraph_core::{
    CoreError, DeleteMode, FactoryProvider, FactoryRegistry, ImportStub, InstanceStore, NodeId,
    PropertyValue, SourceInfo, UnitId,
};

use crate::context::CompilationContext;
use crate::error::CompileError;
use crate::fragment::{ElementFragment, NodeFragment, UnitSource, ValueFragment};
use crate::handlers::CoreExtension;
use crate::integrity::{self, Violation};
use crate::matcher::{full_match, Extension, MatchState, MatcherRegistry, PassContext, PassKind};
use crate::passes;
use crate::resolve::{resolve_classifier, Scope};
use crate::snapshot::GraphSnapshot;
use crate::unit::{CompiledUnit, Delta, DeltaReport, UnitState};

pub struct IncrementalCompiler {
    store: InstanceStore,
    context: CompilationContext,
    matchers: MatcherRegistry,
    units: BTreeMap<UnitId, CompiledUnit>,
    /// Bumped by every committed, non-empty delta.
    generation: u64,
}

impl IncrementalCompiler {
    /// A compiler with only the core extension loaded.
    pub fn new() -> Result<Self, CompileError> {
        IncrementalCompiler::with_extensions(Vec::new())
    }

    /// Load `extensions` after the core one. Their factories and handlers
    /// are registered now; nothing can be registered later.
    pub fn with_extensions(extensions: Vec<Arc<dyn Extension>>) -> Result<Self, CompileError> {
        let mut all: Vec<Arc<dyn Extension>> = vec![Arc::new(CoreExtension)];
        all.extend(extensions);

        let mut providers: Vec<Box<dyn FactoryProvider>> = vec![Box::new(M3Factories)];
        for extension in &all {
            providers.extend(extension.factories());
        }
        let factories = Arc::new(FactoryRegistry::new(providers)?);
        let matchers = MatcherRegistry::new(&all)?;
        IncrementalCompiler::from_parts(factories, matchers)
    }

    pub fn from_parts(
        factories: Arc<FactoryRegistry>,
        matchers: MatcherRegistry,
    ) -> Result<Self, CompileError> {
        let store = InstanceStore::bootstrapped(factories)?;
        let mut context = CompilationContext::new();
        for function in store.all_of_classifier(m3::FUNCTION) {
            if let Some(name) = store.node(function)?.name() {
                context.register_function(name, function);
            }
        }
        debug!(
            nodes = store.len(),
            handlers = matchers.len(),
            "compiler bootstrapped"
        );
        Ok(IncrementalCompiler {
            store,
            context,
            matchers,
            units: BTreeMap::new(),
            generation: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    pub fn context(&self) -> &CompilationContext {
        &self.context
    }

    pub fn matchers(&self) -> &MatcherRegistry {
        &self.matchers
    }

    pub fn unit(&self, id: &UnitId) -> Option<&CompiledUnit> {
        self.units.get(id)
    }

    /// Committed units in id order.
    pub fn units(&self) -> impl Iterator<Item = &CompiledUnit> {
        self.units.values()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // -----------------------------------------------------------------------
    // Deltas
    // -----------------------------------------------------------------------

    pub fn add_or_update(&mut self, unit: UnitSource) -> Result<DeltaReport, CompileError> {
        self.apply(Delta::new().upsert(unit))
    }

    pub fn remove(&mut self, unit: &UnitId) -> Result<DeltaReport, CompileError> {
        self.apply(Delta::new().remove(unit.clone()))
    }

    /// Apply a delta atomically.
    pub fn apply(&mut self, delta: Delta) -> Result<DeltaReport, CompileError> {
        let mut report = DeltaReport::default();
        let mut seen = BTreeSet::new();
        for unit in &delta.removals {
            if !self.units.contains_key(unit) {
                return Err(CompileError::UnknownUnit { unit: unit.clone() });
            }
            seen.insert(unit.clone());
        }

        let mut upserts = Vec::new();
        for source in delta.upserts {
            if !seen.insert(source.id.clone()) {
                return Err(CompileError::compilation(
                    format!("unit '{}' appears more than once in one delta", source.id),
                    None,
                ));
            }
            let hash = source.content_hash()?;
            match self.units.get(&source.id) {
                Some(existing) if existing.hash == hash => report.unchanged.push(source.id),
                Some(_) => {
                    report.updated.push(source.id.clone());
                    upserts.push((source, hash));
                }
                None => {
                    report.added.push(source.id.clone());
                    upserts.push((source, hash));
                }
            }
        }
        report.removed = delta.removals.clone();

        if upserts.is_empty() && delta.removals.is_empty() {
            debug!(unchanged = report.unchanged.len(), "delta is a no-op");
            return Ok(report);
        }

        let units_before = self.units.clone();
        self.store.begin_transaction()?;
        self.context.begin();
        match self.run(&upserts, &delta.removals, &mut report) {
            Ok(()) => {
                let mutations = self.store.commit()?;
                self.context.commit();
                self.generation += 1;
                info!(
                    added = report.added.len(),
                    updated = report.updated.len(),
                    removed = report.removed.len(),
                    dependents = report.dependents.len(),
                    nodes_created = report.nodes_created,
                    nodes_evicted = report.nodes_evicted,
                    mutations,
                    generation = self.generation,
                    "delta committed"
                );
                Ok(report)
            }
            Err(error) => {
                let undone = self.store.rollback();
                self.context.rollback();
                self.units = units_before;
                match undone {
                    Ok(count) => warn!(%error, undone = count, "delta rolled back"),
                    Err(rollback) => warn!(%error, %rollback, "delta rollback failed"),
                }
                Err(error)
            }
        }
    }

    fn run(
        &mut self,
        upserts: &[(UnitSource, String)],
        removals: &[UnitId],
        report: &mut DeltaReport,
    ) -> Result<(), CompileError> {
        let mut unloading: Vec<UnitId> = removals.to_vec();
        unloading.extend(
            upserts
                .iter()
                .map(|(source, _)| source.id.clone())
                .filter(|id| self.units.contains_key(id)),
        );
        let dependents = if unloading.is_empty() {
            BTreeSet::new()
        } else {
            self.unload(&unloading, report)?
        };
        for unit in &unloading {
            if let Some(mut old) = self.units.remove(unit) {
                old.advance(UnitState::Removed);
            }
        }

        let before = self.store.len();
        let created = self.instantiate(upserts)?;
        report.nodes_created = self.store.len().saturating_sub(before);

        let mut targets = created;
        targets.extend(dependents.iter().copied().filter(|d| self.store.contains(*d)));
        report.dependents = dependents.iter().map(|d| self.store.describe(*d)).collect();

        self.bind(&targets)?;
        self.advance(upserts, UnitState::Bound);
        self.validate(&targets)?;
        self.advance(upserts, UnitState::Validated);
        self.advance(upserts, UnitState::Committed);
        Ok(())
    }

    fn advance(&mut self, upserts: &[(UnitSource, String)], state: UnitState) {
        for (source, _) in upserts {
            if let Some(unit) = self.units.get_mut(&source.id) {
                unit.advance(state);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Unload
    // -----------------------------------------------------------------------

    /// Evict the units' nodes. Returns the outside nodes that referred to them.
    fn unload(
        &mut self,
        units: &[UnitId],
        report: &mut DeltaReport,
    ) -> Result<BTreeSet<NodeId>, CompileError> {
        let top_level: Vec<NodeId> = units
            .iter()
            .filter_map(|u| self.units.get(u))
            .flat_map(|u| u.top_level.iter().copied())
            .collect();
        let mut evicted = BTreeSet::new();
        for node in &top_level {
            evicted.extend(self.store.containment_closure(*node));
        }

        let mut packages = BTreeSet::new();
        let mut state = MatchState::with_generic(PassKind::Unbind, passes::unbind_step)
            .within(top_level.iter().copied());
        let dependents: BTreeSet<NodeId> = {
            let mut cx = PassContext {
                store: &mut self.store,
                context: &mut self.context,
                matchers: &self.matchers,
                evicted: Some(&evicted),
            };
            for node in &top_level {
                full_match(*node, &mut cx, &mut state)?;
            }
            for node in &top_level {
                if let Some(package) = cx.store.detach_from_package(*node)? {
                    packages.insert(package);
                }
            }
            let owners: BTreeSet<NodeId> = evicted
                .iter()
                .flat_map(|e| cx.store.usages().owners_of(*e))
                .filter(|owner| !evicted.contains(owner))
                .collect();
            for owner in &owners {
                full_match(*owner, &mut cx, &mut state)?;
            }
            owners
        };
        debug!(
            evicted = evicted.len(),
            dependents = dependents.len(),
            "unbind pass complete"
        );

        self.context.unregister_all(&evicted);
        for unit in units {
            self.context.remove_imports(unit);
        }
        self.store
            .delete_all(&evicted, DeleteMode::Refuse)
            .map_err(|e| match e {
                CoreError::ReferencedNodeDeletion { users, .. } => CompileError::UnbindFailure {
                    unit: units.first().cloned().unwrap_or_else(|| UnitId::new("")),
                    users: users.iter().map(|u| self.store.describe(*u)).collect(),
                },
                other => other.into(),
            })?;
        report.nodes_evicted = evicted.len();

        for package in packages {
            self.drop_empty_packages(package)?;
        }
        Ok(dependents)
    }

    /// Delete `package` and its ancestors while they are empty and ours.
    fn drop_empty_packages(&mut self, package: NodeId) -> Result<(), CompileError> {
        let mut current = Some(package);
        while let Some(package) = current {
            let Some(node) = self.store.get(package) else {
                break;
            };
            if node.is_persistent() || !node.values(props::CHILDREN).is_empty() {
                break;
            }
            current = self.store.detach_from_package(package)?;
            self.store.delete(package, DeleteMode::Refuse)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Instantiate
    // -----------------------------------------------------------------------

    /// Create the nodes of every upsert. Returns the new top-level nodes in
    /// unit, then declaration, order.
    fn instantiate(&mut self, upserts: &[(UnitSource, String)]) -> Result<Vec<NodeId>, CompileError> {
        for (source, hash) in upserts {
            self.context.set_imports(&source.id, source.imports.clone());
            self.units
                .insert(source.id.clone(), CompiledUnit::parsed(source, hash.clone()));
        }

        // Classes first, across every unit.
        let mut placed: BTreeMap<(usize, usize), NodeId> = BTreeMap::new();
        for class_pass in [true, false] {
            for (u, (source, _)) in upserts.iter().enumerate() {
                for (e, element) in source.elements.iter().enumerate() {
                    if placed.contains_key(&(u, e)) {
                        continue;
                    }
                    let scope = Scope::new(element.package.clone(), Some(source.id.clone()));
                    let location = locate(&source.id, &element.node, None);
                    let classifier = match resolve_classifier(
                        &self.store,
                        &self.context,
                        &scope,
                        &element.node.classifier,
                        Some(&location),
                    ) {
                        Ok(classifier) => classifier,
                        // May be a class declared later in the delta.
                        Err(_) if class_pass => continue,
                        Err(e) => return Err(e),
                    };
                    if class_pass && classifier != m3::CLASS {
                        continue;
                    }
                    let id = self.create_element(element, &classifier, location)?;
                    placed.insert((u, e), id);
                }
            }
        }

        for ((u, e), id) in &placed {
            let (source, _) = &upserts[*u];
            let element = &source.elements[*e];
            let scope = Scope::new(element.package.clone(), Some(source.id.clone()));
            let location = locate(&source.id, &element.node, None);
            self.populate(&source.id, *id, &element.node, &scope, &location)?;
        }

        let mut created = Vec::with_capacity(placed.len());
        for ((u, _), id) in placed {
            let unit_id = &upserts[u].0.id;
            if let Some(unit) = self.units.get_mut(unit_id) {
                unit.top_level.push(id);
            }
            created.push(id);
        }
        Ok(created)
    }

    fn create_element(
        &mut self,
        element: &ElementFragment,
        classifier: &str,
        location: SourceInfo,
    ) -> Result<NodeId, CompileError> {
        let name = element.node.name.as_deref().ok_or_else(|| {
            CompileError::compilation("top-level element without a name", Some(location.clone()))
        })?;
        let package = self.store.ensure_package(&element.package, false)?;
        let id = self.store.create(classifier, Some(name), Some(location), false)?;
        self.store.attach_to_package(id, package)?;

        let path = m3::join(&element.package, name);
        if !self.context.register_element(&path, id) {
            debug!(%path, "name already registered");
        }
        if classifier == m3::CLASS && self.store.classifier_node(&path).is_none() {
            self.store.register_classifier(&path, id)?;
        }
        if self.store.is_instance_of(id, m3::FUNCTION) {
            self.context.register_function(name, id);
        }
        Ok(id)
    }

    /// Fill a node's properties from its fragment, creating contained children.
    fn populate(
        &mut self,
        unit: &UnitId,
        owner: NodeId,
        fragment: &NodeFragment,
        scope: &Scope,
        location: &SourceInfo,
    ) -> Result<(), CompileError> {
        for (property, values) in &fragment.properties {
            if values.is_empty() {
                self.store.set_values(owner, property, Vec::new())?;
            }
            for value in values {
                match value {
                    ValueFragment::Literal(literal) => {
                        self.store
                            .add_value(owner, property, PropertyValue::Literal(literal.clone()))?;
                    }
                    ValueFragment::Ref { path, span } => {
                        let at = span
                            .as_ref()
                            .map(|s| s.locate(unit))
                            .unwrap_or_else(|| location.clone());
                        self.store.add_value(
                            owner,
                            property,
                            PropertyValue::Stub(ImportStub::unresolved(path.clone(), Some(at))),
                        )?;
                    }
                    ValueFragment::Node(child) => {
                        let at = locate(unit, child, Some(location));
                        let classifier = resolve_classifier(
                            &self.store,
                            &self.context,
                            scope,
                            &child.classifier,
                            Some(&at),
                        )?;
                        let id = self.store.create_child(
                            owner,
                            property,
                            &classifier,
                            child.name.as_deref(),
                            Some(at.clone()),
                        )?;
                        self.populate(unit, id, child, scope, &at)?;
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Top-level elements of the pass targets.
    fn roots_of(&self, targets: &[NodeId]) -> Vec<NodeId> {
        targets.iter().map(|t| self.store.top_level_of(*t)).collect()
    }

    fn bind(&mut self, targets: &[NodeId]) -> Result<(), CompileError> {
        let mut state = MatchState::with_generic(PassKind::Bind, passes::bind_step)
            .within(self.roots_of(targets));
        let mut cx = PassContext {
            store: &mut self.store,
            context: &mut self.context,
            matchers: &self.matchers,
            evicted: None,
        };
        for node in targets {
            full_match(*node, &mut cx, &mut state)?;
        }
        debug!(nodes = state.done().len(), "bind pass complete");
        Ok(())
    }

    fn validate(&mut self, targets: &[NodeId]) -> Result<(), CompileError> {
        let mut state = MatchState::with_generic(PassKind::Validate, passes::validate_step)
            .within(self.roots_of(targets));
        let mut cx = PassContext {
            store: &mut self.store,
            context: &mut self.context,
            matchers: &self.matchers,
            evicted: None,
        };
        for node in targets {
            full_match(*node, &mut cx, &mut state)?;
        }
        debug!(
            nodes = state.done().len(),
            findings = state.diagnostics.len(),
            "validate pass complete"
        );
        match state.diagnostics.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whole-graph invariant scan. Reports every violation found.
    pub fn integrity_check(&self) -> Vec<Violation> {
        integrity::check(&self.store, &self.context, &self.units)
    }

    /// The element referenced at a position: the innermost node of the unit
    /// covering `(line, column)`, run through the Navigate pass.
    pub fn navigate(
        &mut self,
        unit: &UnitId,
        line: u32,
        column: u32,
    ) -> Result<Option<NodeId>, CompileError> {
        let compiled = self
            .units
            .get(unit)
            .ok_or_else(|| CompileError::UnknownUnit { unit: unit.clone() })?;

        let mut innermost: Option<(NodeId, SourceInfo)> = None;
        for top in &compiled.top_level {
            for node in self.store.containment_closure(*top) {
                let Some(source) = self.store.get(node).and_then(|n| n.source()) else {
                    continue;
                };
                if &source.unit != unit || !source.contains(line, column) {
                    continue;
                }
                let better = match &innermost {
                    None => true,
                    Some((best, span)) => {
                        (span.encloses(source) && span != source) || (span == source && node > *best)
                    }
                };
                if better {
                    innermost = Some((node, source.clone()));
                }
            }
        }
        let Some((node, _)) = innermost else {
            return Ok(None);
        };

        let mut state = MatchState::with_generic(PassKind::Navigate, passes::navigate_step);
        let mut cx = PassContext {
            store: &mut self.store,
            context: &mut self.context,
            matchers: &self.matchers,
            evicted: None,
        };
        self.matchers.dispatch(node, &mut cx, &mut state)?;
        Ok(state.found)
    }

    /// Strip derived properties from a unit's nodes. Returns the number of
    /// nodes visited.
    pub fn prune(&mut self, unit: &UnitId) -> Result<usize, CompileError> {
        let top_level = self
            .units
            .get(unit)
            .ok_or_else(|| CompileError::UnknownUnit { unit: unit.clone() })?
            .top_level
            .clone();
        let mut state = MatchState::new(PassKind::Prune).within(top_level.iter().copied());
        let mut cx = PassContext {
            store: &mut self.store,
            context: &mut self.context,
            matchers: &self.matchers,
            evicted: None,
        };
        for node in top_level {
            full_match(node, &mut cx, &mut state)?;
        }
        Ok(state.done().len())
    }

    /// An id-independent picture of every user node.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::capture(&self.store)
    }
}

impl std::fmt::Debug for IncrementalCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalCompiler")
            .field("store", &self.store)
            .field("units", &self.units.len())
            .field("generation", &self.generation)
            .finish()
    }
}

fn locate(unit: &UnitId, fragment: &NodeFragment, parent: Option<&SourceInfo>) -> SourceInfo {
    match (&fragment.span, parent) {
        (Some(span), _) => span.locate(unit),
        (None, Some(parent)) => parent.clone(),
        (None, None) => SourceInfo::at(unit.clone(), 1, 1),
    }
}

#[cfg(test)]
mod tests {
    use metagraph_core::Literal;

    use super::*;
    use crate::fragment::{self, call, class, function, property, Span};

    fn compiler() -> IncrementalCompiler {
        IncrementalCompiler::new().unwrap()
    }

    fn class_unit(id: &str, name: &str) -> UnitSource {
        UnitSource::new(id).element(class("test", name))
    }

    #[test]
    fn add_commits_and_registers_names() {
        let mut c = compiler();
        let report = c.add_or_update(class_unit("a", "A")).unwrap();
        assert_eq!(report.added, vec![UnitId::new("a")]);
        let a = c.context().lookup("test::A").unwrap();
        assert_eq!(c.store().classifier_node("test::A"), Some(a));
        assert!(c.unit(&UnitId::new("a")).unwrap().is_committed());
        assert_eq!(c.generation(), 1);
    }

    #[test]
    fn unchanged_upsert_is_a_noop() {
        let mut c = compiler();
        c.add_or_update(class_unit("a", "A")).unwrap();
        let report = c.add_or_update(class_unit("a", "A")).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.unchanged, vec![UnitId::new("a")]);
        assert_eq!(c.generation(), 1);
    }

    #[test]
    fn unresolved_reference_rolls_back() {
        let mut c = compiler();
        let before = c.snapshot();
        let len = c.store().len();
        let unit = UnitSource::new("a").element(
            class("test", "A")
                .node
                .with(props::PROPERTIES, property("b", "Missing", "1"))
                .into_element("test"),
        );
        let err = c.add_or_update(unit).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedReference { ref path, .. } if path == "Missing"));
        assert_eq!(c.store().len(), len);
        assert_eq!(c.snapshot(), before);
        assert!(c.unit(&UnitId::new("a")).is_none());
        assert!(c.context().lookup("test::A").is_none());
        c.store().assert_consistency();
    }

    #[test]
    fn forward_references_across_units_in_one_delta() {
        let mut c = compiler();
        let b = UnitSource::new("b").element(
            class("test", "B")
                .node
                .with(props::GENERALIZATIONS, ValueFragment::reference("A"))
                .into_element("test"),
        );
        let delta = Delta::new().upsert(b).upsert(class_unit("a", "A"));
        c.apply(delta).unwrap();
        let a = c.context().lookup("test::A").unwrap();
        let b = c.context().lookup("test::B").unwrap();
        assert!(c.store().is_subtype(b, a));
        assert!(c.integrity_check().is_empty());
    }

    #[test]
    fn removal_blocked_while_dependents_would_dangle() {
        let mut c = compiler();
        c.add_or_update(class_unit("a", "A")).unwrap();
        let b = UnitSource::new("b").element(
            class("test", "B")
                .node
                .with(props::GENERALIZATIONS, ValueFragment::reference("A"))
                .into_element("test"),
        );
        c.add_or_update(b).unwrap();
        let before = c.snapshot();

        let err = c.remove(&UnitId::new("a")).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedReference { ref path, .. } if path == "A"));
        assert_eq!(c.snapshot(), before);
        assert!(c.integrity_check().is_empty());
    }

    #[test]
    fn update_rebinds_dependents() {
        let mut c = compiler();
        c.add_or_update(class_unit("a", "A")).unwrap();
        let b = UnitSource::new("b").element(
            class("test", "B")
                .node
                .with(props::GENERALIZATIONS, ValueFragment::reference("A"))
                .into_element("test"),
        );
        c.add_or_update(b).unwrap();
        let old_a = c.context().lookup("test::A").unwrap();

        let a2 = UnitSource::new("a").element(
            class("test", "A")
                .node
                .with(props::PROPERTIES, property("size", "Integer", "1"))
                .into_element("test"),
        );
        let report = c.add_or_update(a2).unwrap();
        assert_eq!(report.updated, vec![UnitId::new("a")]);
        assert_eq!(report.dependents, vec!["test::B".to_string()]);

        let new_a = c.context().lookup("test::A").unwrap();
        assert_ne!(old_a, new_a);
        assert!(!c.store().contains(old_a));
        let b = c.context().lookup("test::B").unwrap();
        assert!(c.store().is_subtype(b, new_a));
        assert!(c.integrity_check().is_empty());
    }

    #[test]
    fn removing_everything_drops_user_packages() {
        let mut c = compiler();
        let before = c.snapshot();
        c.add_or_update(class_unit("a", "A")).unwrap();
        assert!(c.store().find_element("test").is_some());
        c.remove(&UnitId::new("a")).unwrap();
        assert!(c.store().find_element("test").is_none());
        assert_eq!(c.snapshot(), before);
    }

    #[test]
    fn duplicate_name_is_reported() {
        let mut c = compiler();
        c.add_or_update(class_unit("a", "X")).unwrap();
        let err = c.add_or_update(class_unit("b", "X")).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateName { ref path, .. } if path == "test::X"));
        assert!(c.unit(&UnitId::new("b")).is_none());
        assert!(c.integrity_check().is_empty());
    }

    #[test]
    fn unknown_unit_removal_fails() {
        let mut c = compiler();
        assert!(matches!(
            c.remove(&UnitId::new("nope")),
            Err(CompileError::UnknownUnit { .. })
        ));
    }

    #[test]
    fn functions_bind_callees_and_compute_signatures() {
        let mut c = compiler();
        let unit = UnitSource::new("f").element(function(
            "test",
            "neg",
            &[("b", "Boolean", "1")],
            "Boolean",
            "1",
            vec![call("not", vec![fragment::var("b")])],
        ));
        c.add_or_update(unit).unwrap();
        let f = c.context().lookup("test::neg").unwrap();
        let node = c.store().node(f).unwrap();
        assert_eq!(node.string(props::SIGNATURE), Some("neg_Boolean_1__Boolean_1_"));

        let body = node.target(props::EXPRESSION_SEQUENCE).unwrap();
        let callee = c.store().node(body).unwrap().target(props::FUNC).unwrap();
        assert_eq!(
            c.store().qualified_path(callee).as_deref(),
            Some("meta::pure::functions::boolean::not")
        );
    }

    #[test]
    fn arity_mismatch_is_unresolved() {
        let mut c = compiler();
        let unit = UnitSource::new("f").element(function(
            "test",
            "bad",
            &[],
            "Boolean",
            "1",
            vec![call("not", vec![fragment::boolean(true), fragment::boolean(false)])],
        ));
        assert!(matches!(
            c.add_or_update(unit),
            Err(CompileError::UnresolvedReference { ref path, .. }) if path == "not/2"
        ));
    }

    #[test]
    fn missing_return_type_fails_validation() {
        let mut c = compiler();
        let mut element = function("test", "f", &[], "Boolean", "1", vec![fragment::boolean(true)]);
        element.node.properties.shift_remove(props::RETURN_TYPE);
        let err = c.add_or_update(UnitSource::new("f").element(element)).unwrap_err();
        assert!(err.to_string().contains("no return type"), "{err}");
    }

    #[test]
    fn literal_conformance_is_checked() {
        let mut c = compiler();
        let person = class("test", "Person")
            .node
            .with(props::PROPERTIES, property("age", "Integer", "1"))
            .into_element("test");
        let bob = ElementFragment::new(
            "test",
            NodeFragment::named("Person", "bob").with("age", Literal::String("old".into())),
        );
        let err = c
            .add_or_update(UnitSource::new("p").element(person).element(bob))
            .unwrap_err();
        assert!(err.to_string().contains("is not a Integer"), "{err}");
    }

    #[test]
    fn instances_of_user_classes_in_the_same_unit() {
        let mut c = compiler();
        let bob = ElementFragment::new(
            "test",
            NodeFragment::named("Person", "bob").with("age", Literal::Integer(42)),
        );
        let person = class("test", "Person")
            .node
            .with(props::PROPERTIES, property("age", "Integer", "1"))
            .into_element("test");
        c.add_or_update(UnitSource::new("p").element(bob).element(person))
            .unwrap();
        let bob = c.context().lookup("test::bob").unwrap();
        assert!(c.store().is_instance_of(bob, "test::Person"));
    }

    #[test]
    fn generalization_cycles_are_rejected() {
        let mut c = compiler();
        let a = class("test", "A")
            .node
            .with(props::GENERALIZATIONS, ValueFragment::reference("B"))
            .into_element("test");
        let b = class("test", "B")
            .node
            .with(props::GENERALIZATIONS, ValueFragment::reference("A"))
            .into_element("test");
        let err = c.add_or_update(UnitSource::new("u").element(a).element(b)).unwrap_err();
        assert!(err.to_string().contains("its own generalization"), "{err}");
    }

    #[test]
    fn only_classes_on_a_generalization_cycle_are_blamed() {
        let mut c = compiler();
        let extends = |name: &str, parent: &str| {
            class("test", name)
                .node
                .with(props::GENERALIZATIONS, ValueFragment::reference(parent))
                .into_element("test")
        };
        let unit = UnitSource::new("u")
            .element(extends("C", "A"))
            .element(extends("A", "B"))
            .element(extends("B", "A"));
        let err = c.add_or_update(unit).unwrap_err().to_string();
        assert!(!err.contains("class test::C"), "{err}");
        assert!(
            err.contains("test::A -> test::B -> test::A") || err.contains("test::B -> test::A -> test::B"),
            "{err}"
        );
    }

    #[test]
    fn navigate_finds_the_called_function() {
        let mut c = compiler();
        let unit = UnitSource::new("f").element(function(
            "test",
            "neg",
            &[("b", "Boolean", "1")],
            "Boolean",
            "1",
            vec![call("not", vec![fragment::var("b").at(Span::new(2, 9, 2, 9))])
                .at(Span::new(2, 5, 2, 10))],
        ));
        c.add_or_update(unit).unwrap();
        let found = c.navigate(&UnitId::new("f"), 2, 6).unwrap().unwrap();
        assert_eq!(
            c.store().qualified_path(found).as_deref(),
            Some("meta::pure::functions::boolean::not")
        );
        assert_eq!(c.navigate(&UnitId::new("f"), 2, 9).unwrap(), None);
    }

    #[test]
    fn prune_strips_signatures() {
        let mut c = compiler();
        let unit = UnitSource::new("f").element(function(
            "test",
            "t",
            &[],
            "Boolean",
            "1",
            vec![fragment::boolean(true)],
        ));
        c.add_or_update(unit).unwrap();
        assert!(c.prune(&UnitId::new("f")).unwrap() >= 1);
        let f = c.context().lookup("test::t").unwrap();
        assert!(c.store().node(f).unwrap().values(props::SIGNATURE).is_empty());
    }
}
