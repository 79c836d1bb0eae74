//! Id-independent graph snapshots.
//!
//! Node ids depend on the order deltas were applied in, so two stores holding
//! the same program compare unequal id by id. A [`GraphSnapshot`] keys every
//! user node by a locator instead: the qualified path for packaged elements,
//! `parent/property[index]` for contained nodes. Package membership is kept
//! as name sets, because the order children were attached in is history,
//! not content.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use metagraph_core::m3::{self, props};
use metagraph_core::{InstanceStore, Literal, NodeId, PropertyValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSnapshot {
    Node(String),
    Literal(Literal),
    Ref { path: String, target: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub classifier: String,
    pub name: Option<String>,
    pub properties: BTreeMap<String, Vec<ValueSnapshot>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Non-persistent nodes other than packages, by locator.
    pub nodes: BTreeMap<String, NodeSnapshot>,
    /// Every package's child names.
    pub packages: BTreeMap<String, BTreeSet<String>>,
    pub classifiers: BTreeSet<String>,
    /// `(owner, property, offset, used)` for every usage not owned by a package.
    pub usages: BTreeSet<(String, String, usize, String)>,
}

impl GraphSnapshot {
    pub fn capture(store: &InstanceStore) -> Self {
        let mut locators = Locators {
            store,
            cache: HashMap::new(),
        };
        let mut snapshot = GraphSnapshot::default();

        for node in store.iter() {
            let id = node.id();
            if store.is_instance_of(id, m3::PACKAGE) {
                let children = node
                    .values(props::CHILDREN)
                    .iter()
                    .filter_map(PropertyValue::target)
                    .filter_map(|c| store.get(c).and_then(|n| n.name()).map(str::to_string))
                    .collect();
                snapshot.packages.insert(locators.of(id), children);
                continue;
            }
            if node.is_persistent() {
                continue;
            }
            let properties = node
                .properties()
                .map(|(property, values)| {
                    let values = values
                        .iter()
                        .map(|v| match v {
                            PropertyValue::Node(child) => ValueSnapshot::Node(locators.of(*child)),
                            PropertyValue::Literal(literal) => ValueSnapshot::Literal(literal.clone()),
                            PropertyValue::Stub(stub) => ValueSnapshot::Ref {
                                path: stub.path.clone(),
                                target: stub.resolved.map(|t| locators.of(t)),
                            },
                        })
                        .collect();
                    (property.to_string(), values)
                })
                .collect();
            snapshot.nodes.insert(
                locators.of(id),
                NodeSnapshot {
                    classifier: node.classifier_path().to_string(),
                    name: node.name().map(str::to_string),
                    properties,
                },
            );
        }

        snapshot.classifiers = store
            .classifier_paths()
            .into_iter()
            .map(|p| p.to_string())
            .collect();

        for usage in store.usages().iter() {
            if usage.property == props::CHILDREN {
                continue;
            }
            snapshot.usages.insert((
                locators.of(usage.owner),
                usage.property.clone(),
                usage.offset,
                locators.of(usage.used),
            ));
        }
        snapshot
    }
}

struct Locators<'a> {
    store: &'a InstanceStore,
    cache: HashMap<NodeId, String>,
}

impl Locators<'_> {
    fn of(&mut self, id: NodeId) -> String {
        if let Some(hit) = self.cache.get(&id) {
            return hit.clone();
        }
        let locator = self.compute(id);
        self.cache.insert(id, locator.clone());
        locator
    }

    fn compute(&mut self, id: NodeId) -> String {
        let store = self.store;
        if let Some(path) = store.qualified_path(id) {
            return if path.is_empty() { m3::PATH_SEPARATOR.to_string() } else { path };
        }
        let container = store.get(id).and_then(|n| n.container());
        if let Some(parent) = container.and_then(|c| store.get(c)) {
            let slot = parent.properties().find_map(|(property, values)| {
                values
                    .iter()
                    .position(|v| matches!(v, PropertyValue::Node(child) if *child == id))
                    .map(|index| (property.to_string(), index))
            });
            if let Some((property, index)) = slot {
                let parent = parent.id();
                return format!("{}/{property}[{index}]", self.of(parent));
            }
        }
        store.describe(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metagraph_core::FactoryRegistry;

    use super::*;

    #[test]
    fn locators_do_not_depend_on_ids() {
        let build = |padding: usize| {
            let mut store =
                InstanceStore::bootstrapped(Arc::new(FactoryRegistry::core().unwrap())).unwrap();
            for _ in 0..padding {
                let scratch = store.create(m3::CLASS, Some("tmp"), None, false).unwrap();
                store.delete(scratch, metagraph_core::DeleteMode::Refuse).unwrap();
            }
            let package = store.ensure_package("test", false).unwrap();
            let class = store.create(m3::CLASS, Some("A"), None, false).unwrap();
            store.attach_to_package(class, package).unwrap();
            store
                .create_child(class, props::PROPERTIES, m3::PROPERTY, Some("size"), None)
                .unwrap();
            GraphSnapshot::capture(&store)
        };
        let a = build(0);
        let b = build(3);
        assert_eq!(a, b);
        assert!(a.nodes.contains_key("test::A/properties[0]"));
        assert_eq!(a.packages["test"], BTreeSet::from(["A".to_string()]));
    }
}
