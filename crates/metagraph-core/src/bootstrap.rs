//! Platform bootstrap: the self-describing metamodel and the standard library.
//!
//! `Class` is classified by itself; every other metamodel class, the
//! primitive types, and the native functions are ordinary persistent nodes
//! built through the same store operations user code goes through.

use crate::error::CoreError;
use crate::id::NodeId;
use crate::m3::{self, props, ClassifierPath};
use crate::node::{ClassifierRef, NodeInit};
use crate::stdlib;
use crate::store::InstanceStore;
use crate::value::{ImportStub, PropertyValue};

#[derive(Debug, Clone, Copy)]
pub struct PropDecl {
    pub name: &'static str,
    pub type_path: &'static str,
    pub multiplicity: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassDecl {
    pub path: &'static str,
    pub supertypes: &'static [&'static str],
    pub properties: &'static [PropDecl],
    pub synthetic_id: u32,
}

const fn prop(name: &'static str, type_path: &'static str, multiplicity: &'static str) -> PropDecl {
    PropDecl {
        name,
        type_path,
        multiplicity,
    }
}

/// Metamodel classes in creation order. `Class` comes first.
pub const METAMODEL: &[ClassDecl] = &[
    ClassDecl {
        path: m3::CLASS,
        supertypes: &[m3::TYPE],
        properties: &[prop(props::PROPERTIES, m3::PROPERTY, "*")],
        synthetic_id: 1,
    },
    ClassDecl {
        path: m3::ANY,
        supertypes: &[],
        properties: &[],
        synthetic_id: 2,
    },
    ClassDecl {
        path: m3::NOTHING,
        supertypes: &[],
        properties: &[],
        synthetic_id: 3,
    },
    ClassDecl {
        path: m3::PACKAGEABLE_ELEMENT,
        supertypes: &[m3::ANY],
        properties: &[prop(props::PACKAGE, m3::PACKAGE, "0..1")],
        synthetic_id: 4,
    },
    ClassDecl {
        path: m3::PACKAGE,
        supertypes: &[m3::PACKAGEABLE_ELEMENT],
        properties: &[prop(props::CHILDREN, m3::PACKAGEABLE_ELEMENT, "*")],
        synthetic_id: 5,
    },
    ClassDecl {
        path: m3::TYPE,
        supertypes: &[m3::PACKAGEABLE_ELEMENT],
        properties: &[prop(props::GENERALIZATIONS, m3::TYPE, "*")],
        synthetic_id: 6,
    },
    ClassDecl {
        path: m3::PRIMITIVE_TYPE,
        supertypes: &[m3::TYPE],
        properties: &[],
        synthetic_id: 7,
    },
    ClassDecl {
        path: m3::PROPERTY,
        supertypes: &[m3::ANY],
        properties: &[
            prop(props::GENERIC_TYPE, m3::TYPE, "1"),
            prop(props::MULTIPLICITY, m3::STRING, "1"),
        ],
        synthetic_id: 8,
    },
    ClassDecl {
        path: m3::FUNCTION,
        supertypes: &[m3::PACKAGEABLE_ELEMENT],
        properties: &[
            prop(props::PARAMETERS, m3::VARIABLE_EXPRESSION, "*"),
            prop(props::RETURN_TYPE, m3::TYPE, "0..1"),
            prop(props::RETURN_MULTIPLICITY, m3::STRING, "0..1"),
        ],
        synthetic_id: 9,
    },
    ClassDecl {
        path: m3::CONCRETE_FUNCTION_DEFINITION,
        supertypes: &[m3::FUNCTION],
        properties: &[
            prop(props::EXPRESSION_SEQUENCE, m3::VALUE_SPECIFICATION, "1..*"),
            prop(props::SIGNATURE, m3::STRING, "0..1"),
        ],
        synthetic_id: 10,
    },
    ClassDecl {
        path: m3::NATIVE_FUNCTION,
        supertypes: &[m3::FUNCTION],
        properties: &[],
        synthetic_id: 11,
    },
    ClassDecl {
        path: m3::LAMBDA_FUNCTION,
        supertypes: &[m3::FUNCTION],
        properties: &[prop(props::EXPRESSION_SEQUENCE, m3::VALUE_SPECIFICATION, "1..*")],
        synthetic_id: 12,
    },
    ClassDecl {
        path: m3::VALUE_SPECIFICATION,
        supertypes: &[m3::ANY],
        properties: &[
            prop(props::GENERIC_TYPE, m3::TYPE, "0..1"),
            prop(props::MULTIPLICITY, m3::STRING, "0..1"),
        ],
        synthetic_id: 13,
    },
    ClassDecl {
        path: m3::INSTANCE_VALUE,
        supertypes: &[m3::VALUE_SPECIFICATION],
        properties: &[prop(props::VALUES, m3::ANY, "*")],
        synthetic_id: 14,
    },
    ClassDecl {
        path: m3::VARIABLE_EXPRESSION,
        supertypes: &[m3::VALUE_SPECIFICATION],
        properties: &[prop(props::NAME, m3::STRING, "1")],
        synthetic_id: 15,
    },
    ClassDecl {
        path: m3::SIMPLE_FUNCTION_EXPRESSION,
        supertypes: &[m3::VALUE_SPECIFICATION],
        properties: &[
            prop(props::FUNCTION_NAME, m3::STRING, "1"),
            prop(props::PARAMETERS_VALUES, m3::VALUE_SPECIFICATION, "*"),
            prop(props::FUNC, m3::FUNCTION, "0..1"),
        ],
        synthetic_id: 16,
    },
];

/// Primitive types (root level) and their supertypes.
pub const PRIMITIVES: &[(&str, &[&str])] = &[
    (m3::NUMBER, &[]),
    (m3::INTEGER, &[m3::NUMBER]),
    (m3::FLOAT, &[m3::NUMBER]),
    (m3::DECIMAL, &[m3::NUMBER]),
    (m3::BOOLEAN, &[]),
    (m3::STRING, &[]),
];

pub fn synthetic_id_of(path: &str) -> Option<u32> {
    METAMODEL
        .iter()
        .find(|d| d.path == path)
        .map(|d| d.synthetic_id)
}

/// Populate an empty store with the platform graph.
pub fn install(store: &mut InstanceStore) -> Result<(), CoreError> {
    // Class is its own classifier, so it can't go through `create`.
    let class_id = store.alloc_id();
    let factory = store
        .factories()
        .factory_for(m3::CLASS)
        .ok_or_else(|| CoreError::UnknownClassifier {
            path: m3::CLASS.to_string(),
        })?;
    let class_node = factory.construct(NodeInit {
        id: class_id,
        name: Some(m3::simple_name(m3::CLASS).to_string()),
        classifier: ClassifierRef {
            path: ClassifierPath::from(m3::CLASS),
            resolved: Some(class_id),
        },
        source: None,
        persistent: true,
    });
    store.insert_raw(class_node);
    store.register_classifier(m3::CLASS, class_id)?;

    let mut classes: Vec<(&str, NodeId)> = vec![(m3::CLASS, class_id)];
    for decl in METAMODEL.iter().skip(1) {
        let id = store.create(m3::CLASS, Some(m3::simple_name(decl.path)), None, true)?;
        store.register_classifier(decl.path, id)?;
        classes.push((decl.path, id));
    }

    let root = store.create(m3::PACKAGE, Some("Root"), None, true)?;
    store.set_root(root);

    for (path, _) in PRIMITIVES.iter().copied() {
        let id = store.create(m3::PRIMITIVE_TYPE, Some(path), None, true)?;
        store.register_classifier(path, id)?;
        classes.push((path, id));
    }

    // Packages first so every element gets a qualified path.
    for (path, id) in &classes {
        let package = store.ensure_package(m3::package_of(path).unwrap_or(""), true)?;
        store.attach_to_package(*id, package)?;
    }

    let supertypes = METAMODEL
        .iter()
        .map(|d| (d.path, d.supertypes))
        .chain(PRIMITIVES.iter().copied());
    for (path, supers) in supertypes {
        let id = classifier(store, path)?;
        for sup in supers {
            let target = classifier(store, sup)?;
            store.add_value(
                id,
                props::GENERALIZATIONS,
                PropertyValue::Stub(ImportStub::bound(*sup, target)),
            )?;
        }
    }

    for decl in METAMODEL {
        let owner = classifier(store, decl.path)?;
        for p in decl.properties {
            let property =
                store.create_child(owner, props::PROPERTIES, m3::PROPERTY, Some(p.name), None)?;
            let ty = classifier(store, p.type_path)?;
            store.add_value(
                property,
                props::GENERIC_TYPE,
                PropertyValue::Stub(ImportStub::bound(p.type_path, ty)),
            )?;
            store.add_value(property, props::MULTIPLICITY, PropertyValue::string(p.multiplicity))?;
        }
    }

    for native in stdlib::NATIVES {
        install_native(store, native)?;
    }
    Ok(())
}

fn install_native(store: &mut InstanceStore, decl: &stdlib::NativeDecl) -> Result<NodeId, CoreError> {
    let package = store.ensure_package(decl.package, true)?;
    let function = store.create(m3::NATIVE_FUNCTION, Some(decl.name), None, true)?;
    store.attach_to_package(function, package)?;

    for (name, type_path, multiplicity) in decl.params {
        let param =
            store.create_child(function, props::PARAMETERS, m3::VARIABLE_EXPRESSION, None, None)?;
        store.add_value(param, props::NAME, PropertyValue::string(*name))?;
        let ty = classifier(store, type_path)?;
        store.add_value(
            param,
            props::GENERIC_TYPE,
            PropertyValue::Stub(ImportStub::bound(*type_path, ty)),
        )?;
        store.add_value(param, props::MULTIPLICITY, PropertyValue::string(*multiplicity))?;
    }

    let ret = classifier(store, decl.return_type)?;
    store.add_value(
        function,
        props::RETURN_TYPE,
        PropertyValue::Stub(ImportStub::bound(decl.return_type, ret)),
    )?;
    store.add_value(
        function,
        props::RETURN_MULTIPLICITY,
        PropertyValue::string(decl.return_multiplicity),
    )?;
    Ok(function)
}

fn classifier(store: &InstanceStore, path: &str) -> Result<NodeId, CoreError> {
    store
        .classifier_node(path)
        .ok_or_else(|| CoreError::UnknownClassifier {
            path: path.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::factory::FactoryRegistry;
    use crate::signature::FunctionShape;

    fn store() -> InstanceStore {
        InstanceStore::bootstrapped(Arc::new(FactoryRegistry::core().unwrap())).unwrap()
    }

    #[test]
    fn class_is_self_classified() {
        let store = store();
        let class = store.classifier_node(m3::CLASS).unwrap();
        assert_eq!(store.node(class).unwrap().classifier_id(), Some(class));
        assert_eq!(store.qualified_path(class).as_deref(), Some(m3::CLASS));
    }

    #[test]
    fn every_platform_node_is_persistent_and_usage_free() {
        let store = store();
        assert!(store.iter().all(|n| n.is_persistent()));
        assert!(store.usages().is_empty());
        store.assert_consistency();
    }

    #[test]
    fn primitive_hierarchy() {
        let store = store();
        let integer = store.find_element(m3::INTEGER).unwrap();
        let number = store.classifier_node(m3::NUMBER).unwrap();
        assert!(store.is_subtype(integer, number));
        let chain = store.type_chain(integer);
        assert_eq!(chain.first().map(String::as_str), Some(m3::PRIMITIVE_TYPE));
    }

    #[test]
    fn metamodel_linearization_is_declaration_ordered() {
        let store = store();
        let cfd = store.classifier_node(m3::CONCRETE_FUNCTION_DEFINITION).unwrap();
        let paths: Vec<String> = store
            .linearization(cfd)
            .iter()
            .map(|c| store.qualified_path(*c).unwrap())
            .collect();
        assert_eq!(
            paths,
            vec![
                m3::CONCRETE_FUNCTION_DEFINITION,
                m3::FUNCTION,
                m3::PACKAGEABLE_ELEMENT,
                m3::ANY
            ]
        );
    }

    #[test]
    fn stdlib_signatures_match_declared_constants() {
        let store = store();
        let computed: BTreeSet<String> = store
            .all_of_classifier(m3::NATIVE_FUNCTION)
            .into_iter()
            .map(|f| FunctionShape::of(&store, f).unwrap().signature())
            .collect();
        let declared: BTreeSet<String> = stdlib::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(computed, declared);
    }

    #[test]
    fn natives_are_reachable_by_path() {
        let store = store();
        let not = store.find_element("meta::pure::functions::boolean::not").unwrap();
        let shape = FunctionShape::of(&store, not).unwrap();
        assert_eq!(shape.parameters.len(), 1);
        assert_eq!(shape.signature(), stdlib::NOT);
    }
}
