//! Property values held by graph nodes.
//!
//! A property value is one of three things:
//!
//! - [`PropertyValue::Node`]: containment. The child belongs to the owner and
//!   is evicted with it.
//! - [`PropertyValue::Literal`]: a primitive value.
//! - [`PropertyValue::Stub`]: a reference by path. Parsers produce unresolved
//!   stubs; the Bind pass attaches the target. Every resolved stub pointing at
//!   a non-persistent node has a matching entry in the usage index.

use std::fmt;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::m3;
use crate::source::SourceInfo;

/// Primitive literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal(BigDecimal),
    String(String),
}

impl Literal {
    /// Path of the primitive type this literal belongs to.
    pub fn type_path(&self) -> &'static str {
        match self {
            Literal::Boolean(_) => m3::BOOLEAN,
            Literal::Integer(_) => m3::INTEGER,
            Literal::Float(_) => m3::FLOAT,
            Literal::Decimal(_) => m3::DECIMAL,
            Literal::String(_) => m3::STRING,
        }
    }

    /// Whether this literal is acceptable where `type_path` is declared.
    pub fn conforms_to(&self, type_path: &str) -> bool {
        if type_path == m3::ANY || type_path == self.type_path() {
            return true;
        }
        type_path == m3::NUMBER
            && matches!(self, Literal::Integer(_) | Literal::Float(_) | Literal::Decimal(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Decimal(d) => write!(f, "{d}D"),
            Literal::String(s) => write!(f, "'{s}'"),
        }
    }
}

/// A by-path reference, resolved or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStub {
    /// Path text as written in the source.
    pub path: String,
    pub source: Option<SourceInfo>,
    pub resolved: Option<NodeId>,
}

impl ImportStub {
    pub fn unresolved(path: impl Into<String>, source: Option<SourceInfo>) -> Self {
        ImportStub {
            path: path.into(),
            source,
            resolved: None,
        }
    }

    pub fn bound(path: impl Into<String>, target: NodeId) -> Self {
        ImportStub {
            path: path.into(),
            source: None,
            resolved: Some(target),
        }
    }
}

/// One value of a node property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Node(NodeId),
    Literal(Literal),
    Stub(ImportStub),
}

impl PropertyValue {
    /// The node this value points at, contained or referenced.
    pub fn target(&self) -> Option<NodeId> {
        match self {
            PropertyValue::Node(id) => Some(*id),
            PropertyValue::Stub(stub) => stub.resolved,
            PropertyValue::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            PropertyValue::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn as_stub(&self) -> Option<&ImportStub> {
        match self {
            PropertyValue::Stub(stub) => Some(stub),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, PropertyValue::Stub(ImportStub { resolved: None, .. }))
    }

    pub fn string(s: impl Into<String>) -> Self {
        PropertyValue::Literal(Literal::String(s.into()))
    }
}

impl From<Literal> for PropertyValue {
    fn from(lit: Literal) -> Self {
        PropertyValue::Literal(lit)
    }
}
