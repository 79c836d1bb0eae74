//! Well-known classifier paths and property names of the platform metamodel.
//!
//! Everything the core itself has to recognize lives here; extensions bring
//! their own paths and never need to touch this module.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between package segments in a qualified path.
pub const PATH_SEPARATOR: &str = "::";

/// A `::`-separated classifier path such as `meta::pure::metamodel::type::Class`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassifierPath(String);

impl ClassifierPath {
    pub fn new(path: impl Into<String>) -> Self {
        ClassifierPath(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn simple_name(&self) -> &str {
        simple_name(&self.0)
    }
}

impl fmt::Display for ClassifierPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClassifierPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClassifierPath {
    fn from(path: &str) -> Self {
        ClassifierPath(path.to_string())
    }
}

impl From<String> for ClassifierPath {
    fn from(path: String) -> Self {
        ClassifierPath(path)
    }
}

/// Last segment of a qualified path.
pub fn simple_name(path: &str) -> &str {
    path.rsplit(PATH_SEPARATOR).next().unwrap_or(path)
}

/// Package part of a qualified path, `None` for root-level names.
pub fn package_of(path: &str) -> Option<&str> {
    path.rfind(PATH_SEPARATOR).map(|i| &path[..i])
}

/// Join a package path and a simple name. The root package is the empty string.
pub fn join(package: &str, name: &str) -> String {
    if package.is_empty() || package == PATH_SEPARATOR {
        name.to_string()
    } else {
        format!("{package}{PATH_SEPARATOR}{name}")
    }
}

// Metamodel classifiers.

pub const ANY: &str = "meta::pure::metamodel::type::Any";
pub const NOTHING: &str = "meta::pure::metamodel::type::Nothing";
pub const TYPE: &str = "meta::pure::metamodel::type::Type";
pub const CLASS: &str = "meta::pure::metamodel::type::Class";
pub const PRIMITIVE_TYPE: &str = "meta::pure::metamodel::type::PrimitiveType";
pub const PACKAGEABLE_ELEMENT: &str = "meta::pure::metamodel::PackageableElement";
pub const PACKAGE: &str = "meta::pure::metamodel::Package";
pub const PROPERTY: &str = "meta::pure::metamodel::function::property::Property";
pub const FUNCTION: &str = "meta::pure::metamodel::function::Function";
pub const CONCRETE_FUNCTION_DEFINITION: &str =
    "meta::pure::metamodel::function::ConcreteFunctionDefinition";
pub const NATIVE_FUNCTION: &str = "meta::pure::metamodel::function::NativeFunction";
pub const LAMBDA_FUNCTION: &str = "meta::pure::metamodel::function::LambdaFunction";
pub const VALUE_SPECIFICATION: &str =
    "meta::pure::metamodel::valuespecification::ValueSpecification";
pub const INSTANCE_VALUE: &str = "meta::pure::metamodel::valuespecification::InstanceValue";
pub const VARIABLE_EXPRESSION: &str =
    "meta::pure::metamodel::valuespecification::VariableExpression";
pub const SIMPLE_FUNCTION_EXPRESSION: &str =
    "meta::pure::metamodel::valuespecification::SimpleFunctionExpression";

// Primitive types live at root level.

pub const BOOLEAN: &str = "Boolean";
pub const INTEGER: &str = "Integer";
pub const FLOAT: &str = "Float";
pub const DECIMAL: &str = "Decimal";
pub const NUMBER: &str = "Number";
pub const STRING: &str = "String";

/// Property names used by the metamodel.
pub mod props {
    pub const PACKAGE: &str = "package";
    pub const CHILDREN: &str = "children";
    pub const GENERALIZATIONS: &str = "generalizations";
    pub const PROPERTIES: &str = "properties";
    pub const GENERIC_TYPE: &str = "genericType";
    pub const MULTIPLICITY: &str = "multiplicity";
    pub const PARAMETERS: &str = "parameters";
    pub const RETURN_TYPE: &str = "returnType";
    pub const RETURN_MULTIPLICITY: &str = "returnMultiplicity";
    pub const EXPRESSION_SEQUENCE: &str = "expressionSequence";
    pub const SIGNATURE: &str = "signature";
    pub const VALUES: &str = "values";
    pub const NAME: &str = "name";
    pub const FUNCTION_NAME: &str = "functionName";
    pub const PARAMETERS_VALUES: &str = "parametersValues";
    pub const FUNC: &str = "func";
    /// Pseudo-property under which classifier usages are recorded.
    pub const CLASSIFIER: &str = "classifier";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(simple_name("meta::pure::metamodel::type::Class"), "Class");
        assert_eq!(simple_name("Integer"), "Integer");
        assert_eq!(package_of("test::model::A"), Some("test::model"));
        assert_eq!(package_of("Integer"), None);
        assert_eq!(join("test", "A"), "test::A");
        assert_eq!(join("", "Integer"), "Integer");
        assert_eq!(join("::", "Integer"), "Integer");
    }

    #[test]
    fn classifier_path_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(ClassifierPath::from(CLASS), 1);
        assert_eq!(map.get(CLASS), Some(&1));
        assert_eq!(ClassifierPath::from(CLASS).simple_name(), "Class");
    }
}
