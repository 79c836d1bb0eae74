//! Classifier/factory registry.
//!
//! Factories are contributed by independently loaded providers, one per
//! extension, with no central list of classifiers. The registry keeps the
//! providers in registration order and answers lookups first-match. Two
//! providers claiming the same path (or the same synthetic id) is a load-time
//! error raised by [`FactoryRegistry::new`], never at first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bootstrap::{self, ClassDecl};
use crate::error::CoreError;
use crate::m3::{self, ClassifierPath};
use crate::node::{Node, NodeInit};

/// Builds the in-memory representation of a node for a classifier.
pub trait NodeFactory: Send + Sync {
    fn construct(&self, init: NodeInit) -> Node;
}

/// Factory for plain instances: no seeded properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericFactory;

impl NodeFactory for GenericFactory {
    fn construct(&self, init: NodeInit) -> Node {
        Node::new(init)
    }
}

/// Factory that seeds empty slots for a fixed property list.
#[derive(Debug, Clone)]
pub struct SlotFactory {
    slots: Vec<&'static str>,
}

impl SlotFactory {
    pub fn new(slots: Vec<&'static str>) -> Self {
        SlotFactory { slots }
    }
}

impl NodeFactory for SlotFactory {
    fn construct(&self, init: NodeInit) -> Node {
        Node::with_slots(init, &self.slots)
    }
}

/// One claim made by a provider.
#[derive(Clone)]
pub struct FactoryRegistration {
    pub path: ClassifierPath,
    pub synthetic_id: Option<u32>,
    pub factory: Arc<dyn NodeFactory>,
}

/// A source of factories, typically one per language extension.
pub trait FactoryProvider: Send + Sync {
    fn name(&self) -> &str;
    fn registrations(&self) -> Vec<FactoryRegistration>;
}

struct ProviderEntry {
    name: String,
    by_path: HashMap<ClassifierPath, Arc<dyn NodeFactory>>,
    by_id: HashMap<u32, (ClassifierPath, Arc<dyn NodeFactory>)>,
}

pub struct FactoryRegistry {
    providers: Vec<ProviderEntry>,
}

impl FactoryRegistry {
    /// Build the registry, rejecting any path or synthetic id claimed twice.
    pub fn new(providers: Vec<Box<dyn FactoryProvider>>) -> Result<Self, CoreError> {
        let mut claimed_paths: HashMap<ClassifierPath, String> = HashMap::new();
        let mut claimed_ids: HashMap<u32, String> = HashMap::new();
        let mut entries = Vec::with_capacity(providers.len());

        for provider in providers {
            let name = provider.name().to_string();
            let mut entry = ProviderEntry {
                name: name.clone(),
                by_path: HashMap::new(),
                by_id: HashMap::new(),
            };

            for reg in provider.registrations() {
                if let Some(first) = claimed_paths.get(&reg.path) {
                    return Err(CoreError::DuplicateClassifierFactory {
                        key: reg.path.to_string(),
                        first: first.clone(),
                        second: name,
                    });
                }
                if let Some(id) = reg.synthetic_id {
                    if let Some(first) = claimed_ids.get(&id) {
                        return Err(CoreError::DuplicateClassifierFactory {
                            key: format!("#{id}"),
                            first: first.clone(),
                            second: name,
                        });
                    }
                    claimed_ids.insert(id, name.clone());
                    entry.by_id.insert(id, (reg.path.clone(), reg.factory.clone()));
                }
                claimed_paths.insert(reg.path.clone(), name.clone());
                entry.by_path.insert(reg.path, reg.factory);
            }
            entries.push(entry);
        }

        Ok(FactoryRegistry { providers: entries })
    }

    /// Registry holding only the platform metamodel factories.
    pub fn core() -> Result<Self, CoreError> {
        FactoryRegistry::new(vec![Box::new(M3Factories)])
    }

    /// First provider (in registration order) supporting `path`.
    pub fn factory_for(&self, path: &str) -> Option<Arc<dyn NodeFactory>> {
        self.providers
            .iter()
            .find_map(|p| p.by_path.get(path).cloned())
    }

    /// Name of the provider that owns `path`.
    pub fn provider_of(&self, path: &str) -> Option<&str> {
        self.providers
            .iter()
            .find(|p| p.by_path.contains_key(path))
            .map(|p| p.name.as_str())
    }

    pub fn factory_for_synthetic_id(
        &self,
        id: u32,
    ) -> Option<(ClassifierPath, Arc<dyn NodeFactory>)> {
        self.providers.iter().find_map(|p| p.by_id.get(&id).cloned())
    }

    pub fn supports(&self, path: &str) -> bool {
        self.factory_for(path).is_some()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}

/// Factories for the platform metamodel, plus the generic `Any` factory that
/// user-defined classes inherit through their linearization.
#[derive(Debug, Default, Clone, Copy)]
pub struct M3Factories;

impl FactoryProvider for M3Factories {
    fn name(&self) -> &str {
        "m3"
    }

    fn registrations(&self) -> Vec<FactoryRegistration> {
        bootstrap::METAMODEL
            .iter()
            .map(|decl| {
                let factory: Arc<dyn NodeFactory> = if decl.path == m3::ANY {
                    Arc::new(GenericFactory)
                } else {
                    Arc::new(SlotFactory::new(inherited_slots(decl)))
                };
                FactoryRegistration {
                    path: ClassifierPath::from(decl.path),
                    synthetic_id: Some(decl.synthetic_id),
                    factory,
                }
            })
            .collect()
    }
}

/// Declared properties of a metamodel class and its ancestors, ancestors first.
fn inherited_slots(decl: &ClassDecl) -> Vec<&'static str> {
    let mut slots = Vec::new();
    for parent in decl.supertypes {
        if let Some(parent_decl) = bootstrap::METAMODEL.iter().find(|d| d.path == *parent) {
            for slot in inherited_slots(parent_decl) {
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
        }
    }
    for prop in decl.properties {
        if !slots.contains(&prop.name) {
            slots.push(prop.name);
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use crate::node::ClassifierRef;

    struct Claims(&'static str, Vec<(&'static str, Option<u32>)>);

    impl FactoryProvider for Claims {
        fn name(&self) -> &str {
            self.0
        }

        fn registrations(&self) -> Vec<FactoryRegistration> {
            self.1
                .iter()
                .map(|(path, id)| FactoryRegistration {
                    path: ClassifierPath::from(*path),
                    synthetic_id: *id,
                    factory: Arc::new(GenericFactory),
                })
                .collect()
        }
    }

    #[test]
    fn duplicate_path_is_rejected_eagerly() {
        let err = FactoryRegistry::new(vec![
            Box::new(Claims("diagram", vec![("meta::pure::diagram::Diagram", None)])),
            Box::new(Claims("mapping", vec![("meta::pure::diagram::Diagram", None)])),
        ])
        .unwrap_err();
        match err {
            CoreError::DuplicateClassifierFactory { key, first, second } => {
                assert_eq!(key, "meta::pure::diagram::Diagram");
                assert_eq!(first, "diagram");
                assert_eq!(second, "mapping");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_synthetic_id_is_rejected() {
        let err = FactoryRegistry::new(vec![
            Box::new(Claims("a", vec![("x::A", Some(900))])),
            Box::new(Claims("b", vec![("x::B", Some(900))])),
        ])
        .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateClassifierFactory { ref key, .. } if key == "#900"));
    }

    #[test]
    fn extension_cannot_reclaim_core_path() {
        let err = FactoryRegistry::new(vec![
            Box::new(M3Factories),
            Box::new(Claims("rogue", vec![(m3::CLASS, None)])),
        ])
        .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateClassifierFactory { .. }));
    }

    #[test]
    fn lookup_by_path_and_id() {
        let registry = FactoryRegistry::new(vec![
            Box::new(M3Factories),
            Box::new(Claims("ext", vec![("ext::Thing", Some(1000))])),
        ])
        .unwrap();
        assert!(registry.supports(m3::CLASS));
        assert!(registry.supports("ext::Thing"));
        assert!(!registry.supports("ext::Other"));
        assert_eq!(registry.provider_of("ext::Thing"), Some("ext"));
        let (path, _) = registry.factory_for_synthetic_id(1000).unwrap();
        assert_eq!(path.as_str(), "ext::Thing");
        assert_eq!(registry.provider_names(), vec!["m3", "ext"]);
    }

    #[test]
    fn metamodel_factories_seed_inherited_slots() {
        let registry = FactoryRegistry::core().unwrap();
        let factory = registry.factory_for(m3::CONCRETE_FUNCTION_DEFINITION).unwrap();
        let node = factory.construct(NodeInit {
            id: NodeId(1),
            name: Some("f".into()),
            classifier: ClassifierRef {
                path: ClassifierPath::from(m3::CONCRETE_FUNCTION_DEFINITION),
                resolved: None,
            },
            source: None,
            persistent: false,
        });
        // PackageableElement first, then Function, then the definition itself.
        let slots: Vec<&str> = node.property_names().collect();
        assert_eq!(slots.first(), Some(&m3::props::PACKAGE));
        assert!(slots.contains(&m3::props::PARAMETERS));
        assert!(slots.contains(&m3::props::EXPRESSION_SEQUENCE));
    }
}
