//! The parser boundary.
//!
//! Grammar modules hand the compiler a [`UnitSource`]: imports plus an ordered
//! list of top-level [`ElementFragment`]s. Fragments are raw nodes whose
//! references are plain paths; the compiler turns those into unresolved
//! stubs for Bind. [`JsonUnitParser`] reads the same structure from JSON.
//!
//! The builder functions at the bottom produce the metamodel shapes
//! (classes, functions, expressions) most callers need.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use metagraph_core::m3::{self, props};
use metagraph_core::{BigDecimal, Literal, SourceInfo, UnitId};

use crate::error::CompileError;

/// Position inside a unit, without the unit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Span {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    pub fn locate(&self, unit: &UnitId) -> SourceInfo {
        SourceInfo::new(
            unit.clone(),
            self.start_line,
            self.start_column,
            self.end_line,
            self.end_column,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFragment {
    Literal(Literal),
    /// A reference by path, resolved during Bind.
    Ref {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        span: Option<Span>,
    },
    /// A contained node.
    Node(NodeFragment),
}

impl ValueFragment {
    pub fn reference(path: impl Into<String>) -> Self {
        ValueFragment::Ref {
            path: path.into(),
            span: None,
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        ValueFragment::Literal(Literal::String(s.into()))
    }
}

impl From<Literal> for ValueFragment {
    fn from(literal: Literal) -> Self {
        ValueFragment::Literal(literal)
    }
}

impl From<NodeFragment> for ValueFragment {
    fn from(node: NodeFragment) -> Self {
        ValueFragment::Node(node)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFragment {
    /// Classifier path, qualified or resolvable from the unit's scope.
    pub classifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, Vec<ValueFragment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl NodeFragment {
    pub fn new(classifier: impl Into<String>) -> Self {
        NodeFragment {
            classifier: classifier.into(),
            name: None,
            properties: IndexMap::new(),
            span: None,
        }
    }

    pub fn named(classifier: impl Into<String>, name: impl Into<String>) -> Self {
        NodeFragment {
            name: Some(name.into()),
            ..NodeFragment::new(classifier)
        }
    }

    /// Append a value to a property.
    pub fn with(mut self, property: &str, value: impl Into<ValueFragment>) -> Self {
        self.properties
            .entry(property.to_string())
            .or_default()
            .push(value.into());
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn into_element(self, package: impl Into<String>) -> ElementFragment {
        ElementFragment::new(package, self)
    }
}

/// A top-level element and the package it is declared in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementFragment {
    pub package: String,
    #[serde(flatten)]
    pub node: NodeFragment,
}

impl ElementFragment {
    pub fn new(package: impl Into<String>, node: NodeFragment) -> Self {
        ElementFragment {
            package: package.into(),
            node,
        }
    }

    pub fn qualified_name(&self) -> Option<String> {
        self.node.name.as_deref().map(|n| m3::join(&self.package, n))
    }
}

/// Everything a parser produces for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSource {
    pub id: UnitId,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub elements: Vec<ElementFragment>,
}

impl UnitSource {
    pub fn new(id: impl Into<UnitId>) -> Self {
        UnitSource {
            id: id.into(),
            imports: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn import(mut self, package: impl Into<String>) -> Self {
        self.imports.push(package.into());
        self
    }

    pub fn element(mut self, element: ElementFragment) -> Self {
        self.elements.push(element);
        self
    }

    /// blake3 over the canonical JSON encoding.
    pub fn content_hash(&self) -> Result<String, CompileError> {
        let bytes = serde_json::to_vec(self).map_err(|e| CompileError::Parse {
            unit: self.id.clone(),
            message: e.to_string(),
        })?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// Turns unit text into fragments.
pub trait UnitParser: Send + Sync {
    fn parse(&self, unit: &UnitId, text: &str) -> Result<UnitSource, CompileError>;
}

#[derive(Debug, Deserialize)]
struct JsonDocument {
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    elements: Vec<ElementFragment>,
}

/// Reads `{"imports": [...], "elements": [...]}` documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonUnitParser;

impl UnitParser for JsonUnitParser {
    fn parse(&self, unit: &UnitId, text: &str) -> Result<UnitSource, CompileError> {
        let document: JsonDocument =
            serde_json::from_str(text).map_err(|e| CompileError::Parse {
                unit: unit.clone(),
                message: e.to_string(),
            })?;
        Ok(UnitSource {
            id: unit.clone(),
            imports: document.imports,
            elements: document.elements,
        })
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn class(package: &str, name: &str) -> ElementFragment {
    ElementFragment::new(package, NodeFragment::named(m3::CLASS, name))
}

/// A `Property` child for a class.
pub fn property(name: &str, type_path: &str, multiplicity: &str) -> NodeFragment {
    NodeFragment::named(m3::PROPERTY, name)
        .with(props::GENERIC_TYPE, ValueFragment::reference(type_path))
        .with(props::MULTIPLICITY, ValueFragment::string(multiplicity))
}

/// A function parameter: `(name, type, multiplicity)`.
pub fn parameter(name: &str, type_path: &str, multiplicity: &str) -> NodeFragment {
    NodeFragment::new(m3::VARIABLE_EXPRESSION)
        .with(props::NAME, ValueFragment::string(name))
        .with(props::GENERIC_TYPE, ValueFragment::reference(type_path))
        .with(props::MULTIPLICITY, ValueFragment::string(multiplicity))
}

pub fn function(
    package: &str,
    name: &str,
    parameters: &[(&str, &str, &str)],
    return_type: &str,
    return_multiplicity: &str,
    body: Vec<NodeFragment>,
) -> ElementFragment {
    let mut node = NodeFragment::named(m3::CONCRETE_FUNCTION_DEFINITION, name);
    for (param, ty, mult) in parameters {
        node = node.with(props::PARAMETERS, parameter(param, ty, mult));
    }
    node = node
        .with(props::RETURN_TYPE, ValueFragment::reference(return_type))
        .with(props::RETURN_MULTIPLICITY, ValueFragment::string(return_multiplicity));
    for expression in body {
        node = node.with(props::EXPRESSION_SEQUENCE, expression);
    }
    ElementFragment::new(package, node)
}

/// `name(args...)`
pub fn call(function_name: &str, args: Vec<NodeFragment>) -> NodeFragment {
    let mut node = NodeFragment::new(m3::SIMPLE_FUNCTION_EXPRESSION)
        .with(props::FUNCTION_NAME, ValueFragment::string(function_name));
    for arg in args {
        node = node.with(props::PARAMETERS_VALUES, arg);
    }
    node
}

/// An `InstanceValue` holding literals.
pub fn literals(values: Vec<Literal>) -> NodeFragment {
    let mut node = NodeFragment::new(m3::INSTANCE_VALUE);
    if values.is_empty() {
        node.properties.insert(props::VALUES.to_string(), Vec::new());
    }
    for value in values {
        node = node.with(props::VALUES, value);
    }
    node
}

pub fn literal(value: Literal) -> NodeFragment {
    literals(vec![value])
}

pub fn integer(value: i64) -> NodeFragment {
    literal(Literal::Integer(value))
}

pub fn float(value: f64) -> NodeFragment {
    literal(Literal::Float(value))
}

pub fn decimal(value: BigDecimal) -> NodeFragment {
    literal(Literal::Decimal(value))
}

pub fn boolean(value: bool) -> NodeFragment {
    literal(Literal::Boolean(value))
}

pub fn string(value: &str) -> NodeFragment {
    literal(Literal::String(value.to_string()))
}

/// An `InstanceValue` whose values are the results of nested expressions.
pub fn collection(expressions: Vec<NodeFragment>) -> NodeFragment {
    let mut node = NodeFragment::new(m3::INSTANCE_VALUE);
    if expressions.is_empty() {
        node.properties.insert(props::VALUES.to_string(), Vec::new());
    }
    for expression in expressions {
        node = node.with(props::VALUES, expression);
    }
    node
}

pub fn var(name: &str) -> NodeFragment {
    NodeFragment::new(m3::VARIABLE_EXPRESSION).with(props::NAME, ValueFragment::string(name))
}

/// `{params | body}` wrapped in an `InstanceValue`, as passed to `if`.
pub fn lambda(parameters: &[(&str, &str, &str)], body: Vec<NodeFragment>) -> NodeFragment {
    let mut function = NodeFragment::new(m3::LAMBDA_FUNCTION);
    for (param, ty, mult) in parameters {
        function = function.with(props::PARAMETERS, parameter(param, ty, mult));
    }
    for expression in body {
        function = function.with(props::EXPRESSION_SEQUENCE, expression);
    }
    NodeFragment::new(m3::INSTANCE_VALUE).with(props::VALUES, function)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_parser_reads_elements_and_imports() {
        let text = r#"{
            "imports": ["meta::pure::functions::boolean"],
            "elements": [{
                "package": "test",
                "classifier": "meta::pure::metamodel::type::Class",
                "name": "A",
                "span": {"start_line": 1, "start_column": 1, "end_line": 3, "end_column": 1},
                "properties": {
                    "properties": [{"node": {
                        "classifier": "meta::pure::metamodel::function::property::Property",
                        "name": "size",
                        "properties": {
                            "genericType": [{"ref": {"path": "Integer"}}],
                            "multiplicity": [{"literal": {"String": "1"}}]
                        }
                    }}]
                }
            }]
        }"#;
        let unit = JsonUnitParser.parse(&UnitId::new("a.json"), text).unwrap();
        assert_eq!(unit.id, UnitId::new("a.json"));
        assert_eq!(unit.imports, vec!["meta::pure::functions::boolean"]);
        let expected = class("test", "A")
            .node
            .at(Span::new(1, 1, 3, 1))
            .with(props::PROPERTIES, property("size", "Integer", "1"));
        assert_eq!(unit.elements, vec![ElementFragment::new("test", expected)]);
        assert_eq!(unit.elements[0].qualified_name().as_deref(), Some("test::A"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = JsonUnitParser.parse(&UnitId::new("bad"), "{").unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
    }

    #[test]
    fn content_hash_tracks_content() {
        let a = UnitSource::new("u").element(class("test", "A"));
        let b = UnitSource::new("u").element(class("test", "B"));
        assert_eq!(a.content_hash().unwrap(), a.clone().content_hash().unwrap());
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }
}
