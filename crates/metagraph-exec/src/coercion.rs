//! Multiplicity checks and single-value extraction.

use metagraph_core::Multiplicity;

use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::value::{Sequence, Value};

/// Fail unless the sequence length fits `multiplicity`.
pub fn check_multiplicity(
    values: &Sequence,
    multiplicity: &Multiplicity,
    what: &str,
) -> Result<(), ExecutionError> {
    if multiplicity.contains(values.len()) {
        return Ok(());
    }
    Err(ExecutionErrorKind::Multiplicity {
        what: what.to_string(),
        expected: *multiplicity,
        found: values.len(),
    }
    .into())
}

/// The only value of a `[1]` sequence.
pub fn one(values: Sequence, what: &str) -> Result<Value, ExecutionError> {
    check_multiplicity(&values, &Multiplicity::PURE_ONE, what)?;
    values
        .into_iter()
        .next()
        .ok_or_else(|| ExecutionError::type_mismatch(what, "a value", "nothing"))
}

pub fn boolean(values: Sequence, what: &str) -> Result<bool, ExecutionError> {
    match one(values, what)? {
        Value::Boolean(b) => Ok(b),
        other => Err(ExecutionError::type_mismatch(what, "Boolean", other.type_name())),
    }
}

pub fn integer(values: Sequence, what: &str) -> Result<i64, ExecutionError> {
    match one(values, what)? {
        Value::Integer(i) => Ok(i),
        other => Err(ExecutionError::type_mismatch(what, "Integer", other.type_name())),
    }
}

pub fn string(values: Sequence, what: &str) -> Result<String, ExecutionError> {
    match one(values, what)? {
        Value::String(s) => Ok(s),
        other => Err(ExecutionError::type_mismatch(what, "String", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_one_accepts_exactly_one() {
        assert_eq!(one(Sequence::one(3i64), "x").unwrap(), Value::Integer(3));
        let err = one(Sequence::empty(), "x").unwrap_err();
        assert!(matches!(
            err.kind,
            ExecutionErrorKind::Multiplicity { found: 0, .. }
        ));
        let two: Sequence = vec![Value::Integer(1), Value::Integer(2)].into();
        assert!(one(two, "x").is_err());
    }

    #[test]
    fn zero_one_rejects_two() {
        let two: Sequence = vec![Value::Boolean(true), Value::Boolean(false)].into();
        let err = check_multiplicity(&two, &Multiplicity::ZERO_ONE, "result").unwrap_err();
        assert_eq!(
            err.to_string(),
            "multiplicity violation for result: expected [0..1], found 2 value(s)"
        );
    }

    #[test]
    fn wrong_primitive_is_a_type_mismatch() {
        let err = boolean(Sequence::one("yes"), "test").unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::TypeMismatch { .. }));
    }
}
