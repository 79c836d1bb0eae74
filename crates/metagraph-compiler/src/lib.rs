//! Incremental compilation over the instance graph.
//!
//! - [`matcher`]: per-classifier pass handlers with supertype fallback
//! - [`passes`]: the generic Bind, Unbind, Validate and Navigate steps
//! - [`incremental`]: the [`IncrementalCompiler`] and its atomic deltas
//! - [`integrity`]: the whole-graph consistency scan
//! - [`fragment`]: the parser boundary

pub mod context;
pub mod error;
pub mod fragment;
pub mod handlers;
pub mod incremental;
pub mod integrity;
pub mod matcher;
pub mod passes;
pub mod resolve;
pub mod snapshot;
pub mod unit;

pub use context::CompilationContext;
pub use error::CompileError;
pub use fragment::{
    ElementFragment, JsonUnitParser, NodeFragment, Span, UnitParser, UnitSource, ValueFragment,
};
pub use handlers::{CoreExtension, FnHandler};
pub use incremental::IncrementalCompiler;
pub use integrity::{Violation, ViolationKind};
pub use matcher::{Extension, Flow, MatchHandler, MatchState, MatcherRegistry, PassContext, PassKind};
pub use snapshot::GraphSnapshot;
pub use unit::{CompiledUnit, Delta, DeltaReport, UnitState};
