//! The self-describing instance graph.
//!
//! - [`store`]: the [`InstanceStore`] owning every node, with transactional undo
//! - [`factory`]: multi-provider classifier/factory registry
//! - [`usage`]: bidirectional reference-usage index
//! - [`bootstrap`]: the platform metamodel and standard-library declarations
//! - [`signature`]: function shapes and signature text shared by backends

pub mod bootstrap;
pub mod error;
pub mod factory;
pub mod id;
pub mod m3;
pub mod multiplicity;
pub mod node;
pub mod signature;
pub mod source;
pub mod stdlib;
pub mod store;
pub mod usage;
pub mod value;

// Re-export commonly used types
pub use error::CoreError;
pub use factory::{FactoryProvider, FactoryRegistration, FactoryRegistry, NodeFactory};
pub use id::{NodeId, UnitId};
pub use m3::ClassifierPath;
pub use multiplicity::Multiplicity;
pub use node::{ClassifierRef, Node, NodeInit};
pub use signature::{FunctionShape, ParameterShape};
pub use source::SourceInfo;
pub use store::{DeleteMode, InstanceStore};
pub use usage::{ReferenceUsage, UsageIndex};
pub use value::{ImportStub, Literal, PropertyValue};

/// Re-exported so downstream crates agree on one decimal type.
pub use bigdecimal::BigDecimal;
