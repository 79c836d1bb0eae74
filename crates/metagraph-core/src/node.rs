//! The single entity type of the instance graph.
//!
//! A [`Node`] is self-describing: its classifier is another node, and its
//! properties are an ordered map from name to an ordered sequence of values.
//! Mutation goes through the [`InstanceStore`](crate::store::InstanceStore)
//! so that the usage index never drifts from the property values; the
//! mutators here are crate-private for that reason.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::NodeId;
use crate::m3::ClassifierPath;
use crate::source::SourceInfo;
use crate::value::{Literal, PropertyValue};

/// A node's classifier: the path it was created with, plus the classifier
/// node once bound. Unbinding a classifier keeps the path so that Bind can
/// re-attach it after the classifier's unit is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRef {
    pub path: ClassifierPath,
    pub resolved: Option<NodeId>,
}

/// Everything a factory needs to construct a node.
#[derive(Debug, Clone)]
pub struct NodeInit {
    pub id: NodeId,
    pub name: Option<String>,
    pub classifier: ClassifierRef,
    pub source: Option<SourceInfo>,
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    name: Option<String>,
    classifier: ClassifierRef,
    properties: IndexMap<String, Vec<PropertyValue>>,
    source: Option<SourceInfo>,
    persistent: bool,
    container: Option<NodeId>,
}

impl Node {
    pub fn new(init: NodeInit) -> Self {
        Node {
            id: init.id,
            name: init.name,
            classifier: init.classifier,
            properties: IndexMap::new(),
            source: init.source,
            persistent: init.persistent,
            container: None,
        }
    }

    /// A node with empty slots pre-seeded for the given properties, so
    /// property order is stable regardless of which values arrive first.
    pub fn with_slots(init: NodeInit, slots: &[&str]) -> Self {
        let mut node = Node::new(init);
        for slot in slots {
            node.properties.insert((*slot).to_string(), Vec::new());
        }
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn classifier(&self) -> &ClassifierRef {
        &self.classifier
    }

    pub fn classifier_path(&self) -> &str {
        self.classifier.path.as_str()
    }

    pub fn classifier_id(&self) -> Option<NodeId> {
        self.classifier.resolved
    }

    pub fn source(&self) -> Option<&SourceInfo> {
        self.source.as_ref()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// The node owning this one through a containment property.
    pub fn container(&self) -> Option<NodeId> {
        self.container
    }

    /// All values of a property, empty if the property is absent.
    pub fn values(&self, property: &str) -> &[PropertyValue] {
        self.properties.get(property).map(Vec::as_slice).unwrap_or(&[])
    }

    /// To-one access: `Ok(None)` when empty, an error when over-full.
    pub fn value(&self, property: &str) -> Result<Option<&PropertyValue>, CoreError> {
        let values = self.values(property);
        match values.len() {
            0 => Ok(None),
            1 => Ok(values.first()),
            count => Err(CoreError::ToOneViolation {
                node: self.id,
                property: property.to_string(),
                count,
            }),
        }
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties.contains_key(property)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &[PropertyValue])> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// First string literal of a property.
    pub fn string(&self, property: &str) -> Option<&str> {
        self.values(property)
            .iter()
            .find_map(|v| v.as_literal().and_then(Literal::as_str))
    }

    /// First resolved target of a property.
    pub fn target(&self, property: &str) -> Option<NodeId> {
        self.values(property).iter().find_map(PropertyValue::target)
    }

    /// Contained children in property order.
    pub fn children(&self) -> Vec<NodeId> {
        self.properties
            .values()
            .flatten()
            .filter_map(|v| match v {
                PropertyValue::Node(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Crate-private mutation (the store keeps the usage index in sync)
    // -----------------------------------------------------------------------

    pub(crate) fn values_mut(&mut self, property: &str) -> &mut Vec<PropertyValue> {
        self.properties.entry(property.to_string()).or_default()
    }

    pub(crate) fn values_snapshot(&self, property: &str) -> Option<Vec<PropertyValue>> {
        self.properties.get(property).cloned()
    }

    pub(crate) fn restore_values(&mut self, property: &str, previous: Option<Vec<PropertyValue>>) {
        match previous {
            Some(values) => {
                self.properties.insert(property.to_string(), values);
            }
            None => {
                self.properties.shift_remove(property);
            }
        }
    }

    pub(crate) fn set_classifier(&mut self, resolved: Option<NodeId>) {
        self.classifier.resolved = resolved;
    }

    pub(crate) fn set_container(&mut self, container: Option<NodeId>) {
        self.container = container;
    }
}
