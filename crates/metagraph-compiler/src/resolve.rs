//! Name resolution.
//!
//! A path containing `::` must match an element exactly. A simple name is
//! looked up in the referring node's own package, then at root level, then
//! through each import of its unit. Two different import matches are an
//! error; the resolver never picks one silently.
//!
//! Call targets go through [`resolve_function`], which filters by arity and
//! adds the platform functions as an implicitly imported tier.

use std::collections::BTreeMap;

use metagraph_core::m3::{self, props};
use metagraph_core::{InstanceStore, NodeId, SourceInfo, UnitId};

use crate::context::CompilationContext;
use crate::error::CompileError;

/// Where a name is being resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope {
    /// Qualified path of the enclosing package, `""` for root.
    pub package: String,
    pub unit: Option<UnitId>,
}

impl Scope {
    pub fn new(package: impl Into<String>, unit: Option<UnitId>) -> Self {
        Scope {
            package: package.into(),
            unit,
        }
    }

    /// Scope of a node: the package of its top-level element and its unit.
    pub fn of(store: &InstanceStore, node: NodeId) -> Self {
        let top = store.top_level_of(node);
        let package = store
            .get(top)
            .and_then(|n| n.target(props::PACKAGE))
            .and_then(|p| store.qualified_path(p))
            .unwrap_or_default();
        let unit = store
            .get(node)
            .and_then(|n| n.source())
            .or_else(|| store.get(top).and_then(|n| n.source()))
            .map(|s| s.unit.clone());
        Scope { package, unit }
    }
}

/// An element registered in the context, or a platform element in the store.
pub fn lookup(store: &InstanceStore, context: &CompilationContext, path: &str) -> Option<NodeId> {
    context.lookup(path).or_else(|| store.find_element(path))
}

pub fn resolve_path(
    store: &InstanceStore,
    context: &CompilationContext,
    scope: &Scope,
    path: &str,
    location: Option<&SourceInfo>,
) -> Result<NodeId, CompileError> {
    let unresolved = || CompileError::UnresolvedReference {
        path: path.to_string(),
        location: location.cloned(),
    };

    if path.contains(m3::PATH_SEPARATOR) {
        return lookup(store, context, path).ok_or_else(unresolved);
    }

    if !scope.package.is_empty() {
        if let Some(found) = lookup(store, context, &m3::join(&scope.package, path)) {
            return Ok(found);
        }
    }
    if let Some(found) = lookup(store, context, path) {
        return Ok(found);
    }

    let imports = scope
        .unit
        .as_ref()
        .map(|u| context.imports_of(u))
        .unwrap_or(&[]);
    let mut matches: BTreeMap<NodeId, String> = BTreeMap::new();
    for import in imports {
        let candidate = m3::join(import, path);
        if let Some(found) = lookup(store, context, &candidate) {
            matches.entry(found).or_insert(candidate);
        }
    }
    match matches.len() {
        0 => Err(unresolved()),
        1 => Ok(*matches.keys().next().ok_or_else(unresolved)?),
        _ => {
            let mut candidates: Vec<String> = matches.into_values().collect();
            candidates.sort();
            Err(CompileError::AmbiguousReference {
                path: path.to_string(),
                candidates,
                location: location.cloned(),
            })
        }
    }
}

/// Resolve a call target by name and arity.
///
/// A qualified name must name a function in exactly that package. A simple
/// name is tried in tiers: the caller's own package, the platform functions,
/// root level, then the unit's imports. The first tier holding a function of
/// the right arity decides; two such functions in that tier are ambiguous.
pub fn resolve_function(
    store: &InstanceStore,
    context: &CompilationContext,
    scope: &Scope,
    name: &str,
    arity: usize,
    location: Option<&SourceInfo>,
) -> Result<NodeId, CompileError> {
    let unresolved = || CompileError::UnresolvedReference {
        path: format!("{name}/{arity}"),
        location: location.cloned(),
    };
    let qualifier = m3::package_of(name);
    let simple = m3::simple_name(name);
    let imports = scope
        .unit
        .as_ref()
        .map(|u| context.imports_of(u))
        .unwrap_or(&[]);

    let tier_of = |function: NodeId| -> Option<u8> {
        let node = store.get(function)?;
        if node.values(props::PARAMETERS).len() != arity {
            return None;
        }
        let package = node
            .target(props::PACKAGE)
            .and_then(|p| store.qualified_path(p))
            .unwrap_or_default();
        if let Some(qualifier) = qualifier {
            return (package == qualifier).then_some(0);
        }
        if package == scope.package {
            Some(0)
        } else if node.is_persistent() {
            Some(1)
        } else if package.is_empty() {
            Some(2)
        } else if imports.iter().any(|i| *i == package) {
            Some(3)
        } else {
            None
        }
    };

    let mut ranked: Vec<(u8, NodeId)> = context
        .functions_named(simple)
        .into_iter()
        .filter_map(|f| tier_of(f).map(|tier| (tier, f)))
        .collect();
    let Some(best) = ranked.iter().map(|(tier, _)| *tier).min() else {
        return Err(unresolved());
    };
    ranked.retain(|(tier, _)| *tier == best);
    match ranked.as_slice() {
        [(_, only)] => Ok(*only),
        many => {
            let mut candidates: Vec<String> =
                many.iter().map(|(_, f)| store.describe(*f)).collect();
            candidates.sort();
            Err(CompileError::AmbiguousReference {
                path: name.to_string(),
                candidates,
                location: location.cloned(),
            })
        }
    }
}

/// Resolve a classifier reference to the path it is registered under.
pub fn resolve_classifier(
    store: &InstanceStore,
    context: &CompilationContext,
    scope: &Scope,
    written: &str,
    location: Option<&SourceInfo>,
) -> Result<String, CompileError> {
    if store.classifier_node(written).is_some() {
        return Ok(written.to_string());
    }
    let node = resolve_path(store, context, scope, written, location)?;
    store
        .classifier_path_of(node)
        .map(|p| p.to_string())
        .ok_or_else(|| CompileError::compilation(
            format!("'{written}' is not a classifier"),
            location.cloned(),
        ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metagraph_core::FactoryRegistry;

    use super::*;

    fn fixture() -> (InstanceStore, CompilationContext, NodeId, NodeId) {
        let mut store =
            InstanceStore::bootstrapped(Arc::new(FactoryRegistry::core().unwrap())).unwrap();
        let mut context = CompilationContext::new();
        let mut element = |store: &mut InstanceStore, package: &str, name: &str| {
            let pkg = store.ensure_package(package, false).unwrap();
            let id = store.create(m3::CLASS, Some(name), None, false).unwrap();
            store.attach_to_package(id, pkg).unwrap();
            context.register_element(&m3::join(package, name), id);
            id
        };
        let a = element(&mut store, "left", "Shared");
        let b = element(&mut store, "right", "Shared");
        (store, context, a, b)
    }

    #[test]
    fn qualified_paths_match_exactly() {
        let (store, context, a, _) = fixture();
        let scope = Scope::default();
        assert_eq!(resolve_path(&store, &context, &scope, "left::Shared", None).unwrap(), a);
        assert!(matches!(
            resolve_path(&store, &context, &scope, "left::Missing", None),
            Err(CompileError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn own_package_wins_over_imports() {
        let (store, mut context, a, b) = fixture();
        let unit = UnitId::new("u");
        context.set_imports(&unit, vec!["left".into(), "right".into()]);
        let scope = Scope::new("right", Some(unit));
        assert_eq!(resolve_path(&store, &context, &scope, "Shared", None).unwrap(), b);
        assert_ne!(a, b);
    }

    #[test]
    fn two_import_matches_are_ambiguous() {
        let (store, mut context, _, _) = fixture();
        let unit = UnitId::new("u");
        context.set_imports(&unit, vec!["left".into(), "right".into()]);
        let scope = Scope::new("elsewhere", Some(unit));
        let err = resolve_path(&store, &context, &scope, "Shared", None).unwrap_err();
        match err {
            CompileError::AmbiguousReference { candidates, .. } => {
                assert_eq!(candidates, vec!["left::Shared", "right::Shared"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn root_level_primitives_resolve_by_simple_name() {
        let (store, context, _, _) = fixture();
        let scope = Scope::new("test", None);
        let integer = resolve_path(&store, &context, &scope, "Integer", None).unwrap();
        assert_eq!(store.classifier_node(m3::INTEGER), Some(integer));
        assert_eq!(
            resolve_classifier(&store, &context, &scope, "Integer", None).unwrap(),
            m3::INTEGER
        );
    }

    #[test]
    fn packages_are_not_classifiers() {
        let (store, context, _, _) = fixture();
        let scope = Scope::default();
        assert!(matches!(
            resolve_classifier(&store, &context, &scope, "left", None),
            Err(CompileError::Compilation { .. })
        ));
    }
}
