//! Cardinality constraints on properties, parameters and return values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// `[lower..upper]`, with `upper == None` meaning unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Multiplicity {
    pub lower: u32,
    pub upper: Option<u32>,
}

impl Multiplicity {
    pub const PURE_ONE: Multiplicity = Multiplicity { lower: 1, upper: Some(1) };
    pub const ZERO_ONE: Multiplicity = Multiplicity { lower: 0, upper: Some(1) };
    pub const ZERO_MANY: Multiplicity = Multiplicity { lower: 0, upper: None };
    pub const ONE_MANY: Multiplicity = Multiplicity { lower: 1, upper: None };
    pub const PURE_ZERO: Multiplicity = Multiplicity { lower: 0, upper: Some(0) };

    pub fn contains(&self, count: usize) -> bool {
        let count = count as u64;
        count >= u64::from(self.lower) && self.upper.map_or(true, |u| count <= u64::from(u))
    }

    /// At most one value.
    pub fn is_to_one(&self) -> bool {
        matches!(self.upper, Some(u) if u <= 1)
    }

    /// Encoding used inside function signatures: `1`, `MANY`, `$0_1$`, `$1_MANY$`.
    pub fn signature_code(&self) -> String {
        match (self.lower, self.upper) {
            (0, None) => "MANY".to_string(),
            (l, Some(u)) if l == u => l.to_string(),
            (l, Some(u)) => format!("${l}_{u}$"),
            (l, None) => format!("${l}_MANY$"),
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (0, None) => f.write_str("*"),
            (l, Some(u)) if l == u => write!(f, "{l}"),
            (l, Some(u)) => write!(f, "{l}..{u}"),
            (l, None) => write!(f, "{l}..*"),
        }
    }
}

impl FromStr for Multiplicity {
    type Err = CoreError;

    /// Accepts `1`, `*`, `0..1`, `1..*` and friends, with or without brackets.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMultiplicity { text: text.to_string() };
        let body = text.trim().trim_start_matches('[').trim_end_matches(']').trim();
        let bound = |s: &str| -> Result<Option<u32>, CoreError> {
            match s.trim() {
                "*" => Ok(None),
                n => n.parse::<u32>().map(Some).map_err(|_| invalid()),
            }
        };
        match body.split_once("..") {
            None => match bound(body)? {
                None => Ok(Multiplicity::ZERO_MANY),
                Some(n) => Ok(Multiplicity { lower: n, upper: Some(n) }),
            },
            Some((lo, hi)) => {
                let lower = bound(lo)?.ok_or_else(invalid)?;
                let upper = bound(hi)?;
                if matches!(upper, Some(u) if u < lower) {
                    return Err(invalid());
                }
                Ok(Multiplicity { lower, upper })
            }
        }
    }
}
