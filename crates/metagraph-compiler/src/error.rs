//! Compile-time errors.
//!
//! Every variant that can be traced to user source carries a
//! [`SourceInfo`] so diagnostics point at the offending text.
//! [`CompileError::source_info`] exposes it uniformly.

use metagraph_core::{CoreError, SourceInfo, UnitId};
use thiserror::Error;

use crate::matcher::PassKind;

fn at(location: &Option<SourceInfo>) -> String {
    location
        .as_ref()
        .map(|s| format!(" at {s}"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Two children of one package share a simple name.
    #[error("duplicate name '{path}'{}", at(location))]
    DuplicateName {
        path: String,
        location: Option<SourceInfo>,
    },

    /// A reference whose path matches no element.
    #[error("unresolved reference '{path}'{}", at(location))]
    UnresolvedReference {
        path: String,
        location: Option<SourceInfo>,
    },

    /// A simple name matched through more than one import.
    #[error("ambiguous reference '{path}': candidates {}{}", candidates.join(", "), at(location))]
    AmbiguousReference {
        path: String,
        candidates: Vec<String>,
        location: Option<SourceInfo>,
    },

    /// Any other semantic failure found by Bind or Validate.
    #[error("compilation error: {message}{}", at(location))]
    Compilation {
        message: String,
        location: Option<SourceInfo>,
    },

    /// References into a removed unit that could not be repaired.
    #[error("cannot unbind unit '{unit}': {} node(s) still reference it", users.len())]
    UnbindFailure { unit: UnitId, users: Vec<String> },

    /// Two extensions registered a handler for the same classifier and pass.
    #[error("duplicate {pass:?} handler for '{classifier}'")]
    DuplicateHandler { classifier: String, pass: PassKind },

    /// A unit's text could not be turned into fragments.
    #[error("cannot parse unit '{unit}': {message}")]
    Parse { unit: UnitId, message: String },

    #[error("unknown unit '{unit}'")]
    UnknownUnit { unit: UnitId },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CompileError {
    /// Source location of the failure, when one is known.
    pub fn source_info(&self) -> Option<&SourceInfo> {
        match self {
            CompileError::DuplicateName { location, .. }
            | CompileError::UnresolvedReference { location, .. }
            | CompileError::AmbiguousReference { location, .. }
            | CompileError::Compilation { location, .. } => location.as_ref(),
            _ => None,
        }
    }

    pub fn compilation(message: impl Into<String>, location: Option<SourceInfo>) -> Self {
        CompileError::Compilation {
            message: message.into(),
            location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let err = CompileError::UnresolvedReference {
            path: "test::Missing".into(),
            location: Some(SourceInfo::new("a.pure", 3, 5, 3, 12)),
        };
        let text = err.to_string();
        assert!(text.contains("test::Missing"));
        assert!(text.contains("a.pure:3:5"));
        assert_eq!(err.source_info().map(|s| s.start_line), Some(3));
    }

    #[test]
    fn core_errors_convert() {
        let err: CompileError = CoreError::UnknownClassifier { path: "x".into() }.into();
        assert!(matches!(err, CompileError::Core(_)));
        assert!(err.source_info().is_none());
    }
}
