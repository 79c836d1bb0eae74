//! Generic, graph-level steps run for every node a pass visits.
//!
//! Handlers add per-classifier behavior on top; these steps are what every
//! node gets regardless of its classifier.

use indexmap::IndexMap;

use metagraph_core::m3::props;
use metagraph_core::{InstanceStore, Multiplicity, NodeId, PropertyValue, SourceInfo};

use crate::error::CompileError;
use crate::matcher::{MatchState, PassContext};
use crate::resolve::{resolve_path, Scope};

/// Bind: attach the classifier, then every unresolved stub.
pub fn bind_step(
    node: NodeId,
    cx: &mut PassContext<'_>,
    _state: &mut MatchState,
) -> Result<(), CompileError> {
    let current = cx.store.node(node)?;
    if current.classifier_id().is_none() {
        let path = current.classifier_path().to_string();
        let location = current.source().cloned();
        let classifier = cx
            .store
            .classifier_node(&path)
            .ok_or(CompileError::UnresolvedReference { path, location })?;
        cx.store.resolve_classifier(node, classifier)?;
    }

    let pending = unresolved_stubs(cx.store, node)?;
    if pending.is_empty() {
        return Ok(());
    }
    let scope = Scope::of(cx.store, node);
    for stub in pending {
        let target = resolve_path(
            cx.store,
            cx.context,
            &scope,
            &stub.path,
            stub.location.as_ref(),
        )?;
        cx.store.resolve_stub(node, &stub.property, stub.offset, target)?;
    }
    Ok(())
}

/// Unbind: detach every reference from `node` into the evicted set.
pub fn unbind_step(
    node: NodeId,
    cx: &mut PassContext<'_>,
    _state: &mut MatchState,
) -> Result<(), CompileError> {
    let Some(evicted) = cx.evicted else {
        return Ok(());
    };
    if evicted.contains(&node) {
        return Ok(());
    }
    let current = cx.store.node(node)?;
    let classifier_evicted = current
        .classifier_id()
        .is_some_and(|c| evicted.contains(&c));
    let references: Vec<(String, usize)> = current
        .properties()
        .flat_map(|(property, values)| {
            values.iter().enumerate().filter_map(move |(offset, value)| match value {
                PropertyValue::Stub(stub) if stub.resolved.is_some_and(|t| evicted.contains(&t)) => {
                    Some((property.to_string(), offset))
                }
                _ => None,
            })
        })
        .collect();

    if classifier_evicted {
        cx.store.unresolve_classifier(node)?;
    }
    for (property, offset) in references {
        cx.store.unresolve_stub(node, &property, offset)?;
    }
    Ok(())
}

/// Validate: classifier bound, declared multiplicities, no undeclared
/// properties, literal conformance, no unresolved stubs, unique names.
/// Findings are collected, not returned.
pub fn validate_step(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<(), CompileError> {
    let store: &InstanceStore = cx.store;
    let current = store.node(node)?;
    let location = current.source().cloned();
    let what = store.describe(node);

    let Some(classifier) = current.classifier_id() else {
        state.diagnostics.push(CompileError::UnresolvedReference {
            path: current.classifier_path().to_string(),
            location,
        });
        return Ok(());
    };

    let declared = declared_properties(store, classifier)?;
    for (name, decl) in &declared {
        let values = current.values(name);
        if !decl.multiplicity.contains(values.len()) {
            state.diagnostics.push(CompileError::compilation(
                format!(
                    "property '{name}' of {what} has {} value(s), expected [{}]",
                    values.len(),
                    decl.multiplicity
                ),
                location.clone(),
            ));
        }
        for value in values {
            if let Some(literal) = value.as_literal() {
                if !literal.conforms_to(&decl.type_path) {
                    state.diagnostics.push(CompileError::compilation(
                        format!(
                            "value {literal} of property '{name}' of {what} is not a {}",
                            decl.type_path
                        ),
                        location.clone(),
                    ));
                }
            }
        }
    }

    for (name, values) in current.properties() {
        // Every top-level element sits in a package, whatever its classifier.
        if !declared.contains_key(name) && name != props::PACKAGE {
            state.diagnostics.push(CompileError::compilation(
                format!("{what} has undeclared property '{name}'"),
                location.clone(),
            ));
        }
        for value in values {
            if let PropertyValue::Stub(stub) = value {
                if stub.resolved.is_none() {
                    state.diagnostics.push(CompileError::UnresolvedReference {
                        path: stub.path.clone(),
                        location: stub.source.clone().or_else(|| location.clone()),
                    });
                }
            }
        }
    }

    if let (Some(package), Some(name)) = (current.target(props::PACKAGE), current.name()) {
        let same_name = store
            .node(package)?
            .values(props::CHILDREN)
            .iter()
            .filter_map(PropertyValue::target)
            .filter(|c| store.get(*c).and_then(|n| n.name()) == Some(name))
            .count();
        if same_name > 1 {
            state.diagnostics.push(CompileError::DuplicateName {
                path: store.qualified_path(node).unwrap_or_else(|| name.to_string()),
                location,
            });
        }
    }
    Ok(())
}

/// Navigate: the first element the node refers to.
pub fn navigate_step(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<(), CompileError> {
    if state.found.is_some() {
        return Ok(());
    }
    let current = cx.store.node(node)?;
    state.found = current
        .properties()
        .filter(|(p, _)| *p != props::PACKAGE && *p != props::CHILDREN)
        .flat_map(|(_, values)| values.iter())
        .find_map(|v| v.as_stub().and_then(|s| s.resolved));
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct PendingStub {
    property: String,
    offset: usize,
    path: String,
    location: Option<SourceInfo>,
}

fn unresolved_stubs(store: &InstanceStore, node: NodeId) -> Result<Vec<PendingStub>, CompileError> {
    let current = store.node(node)?;
    let mut pending = Vec::new();
    for (property, values) in current.properties() {
        for (offset, value) in values.iter().enumerate() {
            if let PropertyValue::Stub(stub) = value {
                if stub.resolved.is_none() {
                    pending.push(PendingStub {
                        property: property.to_string(),
                        offset,
                        path: stub.path.clone(),
                        location: stub.source.clone().or_else(|| current.source().cloned()),
                    });
                }
            }
        }
    }
    Ok(pending)
}

/// A property as declared by a classifier or one of its supertypes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredProperty {
    pub type_path: String,
    pub multiplicity: Multiplicity,
}

/// Properties declared along a classifier's linearization; the most
/// specific declaration of a name wins. Unparseable multiplicities are
/// skipped here and reported by the `Property` handler.
pub fn declared_properties(
    store: &InstanceStore,
    classifier: NodeId,
) -> Result<IndexMap<String, DeclaredProperty>, CompileError> {
    let mut declared = IndexMap::new();
    for class in store.linearization(classifier) {
        let Some(class_node) = store.get(class) else {
            continue;
        };
        for value in class_node.values(props::PROPERTIES) {
            let Some(property) = value.target().and_then(|p| store.get(p)) else {
                continue;
            };
            let Some(name) = property.name() else {
                continue;
            };
            let Some(multiplicity) = property
                .string(props::MULTIPLICITY)
                .and_then(|m| m.parse::<Multiplicity>().ok())
            else {
                continue;
            };
            let type_path = property
                .values(props::GENERIC_TYPE)
                .iter()
                .find_map(|v| match v {
                    PropertyValue::Stub(stub) => Some(
                        stub.resolved
                            .and_then(|t| store.qualified_path(t))
                            .unwrap_or_else(|| stub.path.clone()),
                    ),
                    _ => None,
                })
                .unwrap_or_else(|| metagraph_core::m3::ANY.to_string());
            declared.entry(name.to_string()).or_insert(DeclaredProperty {
                type_path,
                multiplicity,
            });
        }
    }
    Ok(declared)
}
