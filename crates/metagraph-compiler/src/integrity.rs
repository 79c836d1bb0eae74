//! Whole-graph invariant scan.
//!
//! Unlike Validate, which looks at the nodes a delta touched, this walks the
//! entire store and the compilation context and reports every violation. It
//! never fails early and never mutates anything; an empty result means the
//! graph is consistent.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use metagraph_core::m3::{self, props};
use metagraph_core::{InstanceStore, NodeId, PropertyValue, UnitId};

use crate::context::CompilationContext;
use crate::unit::CompiledUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    DuplicateName,
    /// A usage edge whose owner or used node no longer exists.
    DanglingUsage,
    /// A usage edge that no longer matches the owner's value.
    StaleUsage,
    /// A resolved reference to a non-persistent node with no usage edge.
    MissingUsage,
    /// A value pointing at a node that does not exist.
    DanglingValue,
    UnresolvedStub,
    ContextMismatch,
    StaleUnit,
    GeneralizationCycle,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Locator of the offending node or name.
    pub path: String,
    pub detail: String,
}

impl Violation {
    fn new(kind: ViolationKind, path: impl Into<String>, detail: impl Into<String>) -> Self {
        Violation {
            kind,
            path: path.into(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} at {}: {}", self.kind, self.path, self.detail)
    }
}

/// Run every scan. Results are sorted by kind, then path.
pub fn check(
    store: &InstanceStore,
    context: &CompilationContext,
    units: &BTreeMap<UnitId, CompiledUnit>,
) -> Vec<Violation> {
    let mut out = Vec::new();
    duplicate_names(store, &mut out);
    usage_edges(store, &mut out);
    values(store, &mut out);
    context_entries(store, context, &mut out);
    unit_table(store, units, &mut out);
    generalization_cycles(store, &mut out);
    out.sort();
    out.dedup();
    out
}

fn duplicate_names(store: &InstanceStore, out: &mut Vec<Violation>) {
    for package in store.all_of_classifier(m3::PACKAGE) {
        let Some(node) = store.get(package) else {
            continue;
        };
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for child in node.values(props::CHILDREN).iter().filter_map(PropertyValue::target) {
            if let Some(name) = store.get(child).and_then(|c| c.name()) {
                *seen.entry(name).or_default() += 1;
            }
        }
        let parent = store.qualified_path(package).unwrap_or_default();
        for (name, count) in seen {
            if count > 1 {
                out.push(Violation::new(
                    ViolationKind::DuplicateName,
                    m3::join(&parent, name),
                    format!("{count} elements share the name"),
                ));
            }
        }
    }
}

fn usage_edges(store: &InstanceStore, out: &mut Vec<Violation>) {
    for usage in store.usages().iter() {
        let (Some(owner), true) = (store.get(usage.owner), store.contains(usage.used)) else {
            out.push(Violation::new(
                ViolationKind::DanglingUsage,
                format!("#{}", usage.owner),
                format!("{}[{}] -> #{}", usage.property, usage.offset, usage.used),
            ));
            continue;
        };
        let current = if usage.property == props::CLASSIFIER {
            owner.classifier_id()
        } else {
            owner
                .values(&usage.property)
                .get(usage.offset)
                .and_then(|v| v.as_stub())
                .and_then(|s| s.resolved)
        };
        if current != Some(usage.used) {
            out.push(Violation::new(
                ViolationKind::StaleUsage,
                store.describe(usage.owner),
                format!(
                    "{}[{}] recorded as {} but holds {:?}",
                    usage.property,
                    usage.offset,
                    store.describe(usage.used),
                    current
                ),
            ));
        }
    }
}

fn values(store: &InstanceStore, out: &mut Vec<Violation>) {
    let usages = store.usages();
    for node in store.iter() {
        let id = node.id();
        let recorded: BTreeSet<(String, usize, NodeId)> = usages.owned_by(id).into_iter().collect();

        if let Some(classifier) = node.classifier_id() {
            match store.get(classifier) {
                None => out.push(Violation::new(
                    ViolationKind::DanglingValue,
                    store.describe(id),
                    format!("classifier #{classifier} does not exist"),
                )),
                Some(c) if !c.is_persistent() && classifier != id => {
                    if !recorded.contains(&(props::CLASSIFIER.to_string(), 0, classifier)) {
                        out.push(Violation::new(
                            ViolationKind::MissingUsage,
                            store.describe(id),
                            "classifier".to_string(),
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        for (property, values) in node.properties() {
            for (offset, value) in values.iter().enumerate() {
                let target = match value {
                    PropertyValue::Node(child) => Some(*child),
                    PropertyValue::Stub(stub) => match stub.resolved {
                        Some(target) => Some(target),
                        None => {
                            if !node.is_persistent() {
                                out.push(Violation::new(
                                    ViolationKind::UnresolvedStub,
                                    store.describe(id),
                                    format!("{property}[{offset}] -> {}", stub.path),
                                ));
                            }
                            None
                        }
                    },
                    PropertyValue::Literal(_) => None,
                };
                let Some(target) = target else {
                    continue;
                };
                let Some(target_node) = store.get(target) else {
                    out.push(Violation::new(
                        ViolationKind::DanglingValue,
                        store.describe(id),
                        format!("{property}[{offset}] -> #{target}"),
                    ));
                    continue;
                };
                let is_reference = matches!(value, PropertyValue::Stub(_));
                if is_reference
                    && !target_node.is_persistent()
                    && !recorded.contains(&(property.to_string(), offset, target))
                {
                    out.push(Violation::new(
                        ViolationKind::MissingUsage,
                        store.describe(id),
                        format!("{property}[{offset}] -> {}", store.describe(target)),
                    ));
                }
            }
        }
    }
}

fn context_entries(store: &InstanceStore, context: &CompilationContext, out: &mut Vec<Violation>) {
    for (path, id) in context.elements() {
        match store.qualified_path(id) {
            Some(actual) if actual == path => {}
            actual => out.push(Violation::new(
                ViolationKind::ContextMismatch,
                path,
                format!("registered as #{id}, which is at {actual:?}"),
            )),
        }
    }
    for (name, functions) in context.functions() {
        for function in functions {
            let live = store
                .get(*function)
                .is_some_and(|f| f.name() == Some(name));
            if !live {
                out.push(Violation::new(
                    ViolationKind::ContextMismatch,
                    name,
                    format!("function #{function} is gone or renamed"),
                ));
            }
        }
    }
}

fn unit_table(
    store: &InstanceStore,
    units: &BTreeMap<UnitId, CompiledUnit>,
    out: &mut Vec<Violation>,
) {
    for unit in units.values() {
        if !unit.is_committed() {
            out.push(Violation::new(
                ViolationKind::StaleUnit,
                unit.id.as_str(),
                format!("left in state {:?}", unit.state),
            ));
        }
        for top in &unit.top_level {
            if !store.contains(*top) {
                out.push(Violation::new(
                    ViolationKind::StaleUnit,
                    unit.id.as_str(),
                    format!("top-level #{top} does not exist"),
                ));
            }
        }
    }
}

fn generalization_cycles(store: &InstanceStore, out: &mut Vec<Violation>) {
    let classes = store.all_of_classifier(m3::CLASS);
    let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
    let index: HashMap<NodeId, NodeIndex> =
        classes.iter().map(|c| (*c, graph.add_node(*c))).collect();
    for class in &classes {
        let Some(node) = store.get(*class) else {
            continue;
        };
        for parent in node
            .values(props::GENERALIZATIONS)
            .iter()
            .filter_map(PropertyValue::target)
        {
            if let (Some(from), Some(to)) = (index.get(class), index.get(&parent)) {
                graph.add_edge(*from, *to, ());
            }
        }
    }
    if !is_cyclic_directed(&graph) {
        return;
    }
    for component in tarjan_scc(&graph) {
        let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
        if component.len() < 2 && !self_loop {
            continue;
        }
        let mut members: Vec<String> = component.iter().map(|i| store.describe(graph[*i])).collect();
        members.sort();
        out.push(Violation::new(
            ViolationKind::GeneralizationCycle,
            members[0].clone(),
            members.join(" -> "),
        ));
    }
}
