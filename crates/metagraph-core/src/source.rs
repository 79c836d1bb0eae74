//! Source locations attached to nodes, stubs and diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::UnitId;

/// A span inside a compilation unit. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceInfo {
    pub unit: UnitId,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl SourceInfo {
    pub fn new(
        unit: impl Into<UnitId>,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
    ) -> Self {
        SourceInfo {
            unit: unit.into(),
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// A single-point location.
    pub fn at(unit: impl Into<UnitId>, line: u32, column: u32) -> Self {
        SourceInfo::new(unit, line, column, line, column)
    }

    /// Whether `(line, column)` falls inside this span (inclusive).
    pub fn contains(&self, line: u32, column: u32) -> bool {
        let after_start =
            line > self.start_line || (line == self.start_line && column >= self.start_column);
        let before_end =
            line < self.end_line || (line == self.end_line && column <= self.end_column);
        after_start && before_end
    }

    /// Whether `other` lies entirely inside this span.
    pub fn encloses(&self, other: &SourceInfo) -> bool {
        self.unit == other.unit
            && self.contains(other.start_line, other.start_column)
            && self.contains(other.end_line, other.end_column)
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.unit, self.start_line, self.start_column, self.end_line, self.end_column
        )
    }
}
