//! Runtime values shared by every execution backend.
//!
//! Every expression evaluates to a [`Sequence`]: zero or more [`Value`]s.
//! Multiplicities are checked against sequence lengths, so there is no
//! separate "null" value; an absent value is an empty sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use smallvec::SmallVec;

use metagraph_core::{Literal, NodeId};

/// A single runtime value.
///
/// Equality is strict: `Integer(1)` and `Float(1.0)` are different values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal(BigDecimal),
    String(String),
    /// A function or lambda together with the variables it captured.
    Function(Arc<Closure>),
}

impl Value {
    pub fn from_literal(literal: &Literal) -> Value {
        match literal {
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Float(x) => Value::Float(*x),
            Literal::Decimal(d) => Value::Decimal(d.clone()),
            Literal::String(s) => Value::String(s.clone()),
        }
    }

    /// Primitive type name, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Decimal(_) => "Decimal",
            Value::String(_) => "String",
            Value::Function(_) => "Function",
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_) | Value::Decimal(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Decimal(d) => write!(f, "{d}D"),
            Value::String(s) => f.write_str(s),
            Value::Function(closure) => write!(f, "<{}>", closure.name),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Where a closure's code lives. Each backend only calls its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionTarget {
    /// A function or lambda node, run by the interpreter.
    Node(NodeId),
    /// An index into a loaded program.
    Compiled(usize),
}

#[derive(Debug, Clone)]
pub struct Closure {
    /// Locator of the function node; identical across backends.
    pub name: String,
    pub target: FunctionTarget,
    /// Captured free variables, by name.
    pub captures: BTreeMap<String, Sequence>,
}

/// Closures compare by what they denote, not by which backend built them.
impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.captures == other.captures
    }
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// An ordered run of values. Most sequences hold exactly one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence(SmallVec<[Value; 1]>);

impl Sequence {
    pub fn empty() -> Self {
        Sequence(SmallVec::new())
    }

    pub fn one(value: impl Into<Value>) -> Self {
        let mut values = SmallVec::new();
        values.push(value.into());
        Sequence(values)
    }

    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    pub fn extend(&mut self, other: Sequence) {
        self.0.extend(other.0);
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0.into_vec()
    }
}

impl Deref for Sequence {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Value> for Sequence {
    fn from(value: Value) -> Self {
        Sequence::one(value)
    }
}

impl From<Vec<Value>> for Sequence {
    fn from(values: Vec<Value>) -> Self {
        Sequence(SmallVec::from_vec(values))
    }
}

impl FromIterator<Value> for Sequence {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Sequence(iter.into_iter().collect())
    }
}

impl IntoIterator for Sequence {
    type Item = Value;
    type IntoIter = smallvec::IntoIter<[Value; 1]>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "{only}");
        }
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("]")
    }
}
