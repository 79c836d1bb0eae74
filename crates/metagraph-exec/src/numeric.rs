//! Numeric semantics shared by both backends.
//!
//! Every binary operation promotes its operands to the wider of their two
//! tiers: Integer, then Float, then Decimal. Integer arithmetic is checked;
//! overflow is an error rather than a wrap. Both the interpreter's natives
//! and the compiled runtime-support library call into this module, which is
//! what makes their results identical.

use std::cmp::Ordering;

use bigdecimal::BigDecimal;

use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Integer,
    Float,
    Decimal,
}

fn tier(operation: &str, value: &Value) -> Result<Tier, ExecutionError> {
    match value {
        Value::Integer(_) => Ok(Tier::Integer),
        Value::Float(_) => Ok(Tier::Float),
        Value::Decimal(_) => Ok(Tier::Decimal),
        other => Err(ExecutionError::type_mismatch(
            operation,
            "Number",
            other.type_name(),
        )),
    }
}

/// Widen a number to `f64`. Decimals go through their canonical text.
pub fn to_f64(operation: &str, value: &Value) -> Result<f64, ExecutionError> {
    match value {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(x) => Ok(*x),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map_err(|_| ExecutionError::type_mismatch(operation, "Float", "Decimal")),
        other => Err(ExecutionError::type_mismatch(operation, "Number", other.type_name())),
    }
}

/// Widen a number to a decimal. Floats go through their shortest round-trip text.
pub fn to_decimal(operation: &str, value: &Value) -> Result<BigDecimal, ExecutionError> {
    match value {
        Value::Integer(i) => Ok(BigDecimal::from(*i)),
        Value::Float(x) => format!("{x:?}")
            .parse::<BigDecimal>()
            .map_err(|_| ExecutionError::type_mismatch(operation, "Decimal", "Float")),
        Value::Decimal(d) => Ok(d.clone()),
        other => Err(ExecutionError::type_mismatch(operation, "Number", other.type_name())),
    }
}

fn overflow(operation: &str) -> ExecutionError {
    ExecutionErrorKind::IntegerOverflow {
        operation: operation.to_string(),
    }
    .into()
}

fn binary(
    operation: &str,
    left: &Value,
    right: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
    decimal: fn(&BigDecimal, &BigDecimal) -> BigDecimal,
) -> Result<Value, ExecutionError> {
    let widest = tier(operation, left)?.max(tier(operation, right)?);
    match (widest, left, right) {
        (Tier::Integer, Value::Integer(a), Value::Integer(b)) => {
            int(*a, *b).map(Value::Integer).ok_or_else(|| overflow(operation))
        }
        (Tier::Decimal, _, _) => Ok(Value::Decimal(decimal(
            &to_decimal(operation, left)?,
            &to_decimal(operation, right)?,
        ))),
        _ => Ok(Value::Float(float(
            to_f64(operation, left)?,
            to_f64(operation, right)?,
        ))),
    }
}

pub fn add(left: &Value, right: &Value) -> Result<Value, ExecutionError> {
    binary("plus", left, right, i64::checked_add, |a, b| a + b, |a, b| a + b)
}

pub fn subtract(left: &Value, right: &Value) -> Result<Value, ExecutionError> {
    binary("minus", left, right, i64::checked_sub, |a, b| a - b, |a, b| a - b)
}

pub fn multiply(left: &Value, right: &Value) -> Result<Value, ExecutionError> {
    binary("times", left, right, i64::checked_mul, |a, b| a * b, |a, b| a * b)
}

pub fn negate(value: &Value) -> Result<Value, ExecutionError> {
    match value {
        Value::Integer(i) => i.checked_neg().map(Value::Integer).ok_or_else(|| overflow("minus")),
        Value::Float(x) => Ok(Value::Float(-x)),
        Value::Decimal(d) => Ok(Value::Decimal(-d.clone())),
        other => Err(ExecutionError::type_mismatch("minus", "Number", other.type_name())),
    }
}

// ---------------------------------------------------------------------------
// Sequence operations
// ---------------------------------------------------------------------------

/// Sum of a sequence, starting from `Integer(0)`.
pub fn plus(values: &[Value]) -> Result<Value, ExecutionError> {
    values
        .iter()
        .try_fold(Value::Integer(0), |acc, v| add(&acc, v))
}

/// Product of a sequence, starting from `Integer(1)`.
pub fn times(values: &[Value]) -> Result<Value, ExecutionError> {
    values
        .iter()
        .try_fold(Value::Integer(1), |acc, v| multiply(&acc, v))
}

/// `[]` is zero, `[x]` is `-x`, otherwise the first value minus the rest.
pub fn minus(values: &[Value]) -> Result<Value, ExecutionError> {
    match values {
        [] => Ok(Value::Integer(0)),
        [only] => negate(only),
        [first, rest @ ..] => {
            // Validate the head even though it seeds the fold.
            tier("minus", first)?;
            rest.iter().try_fold(first.clone(), |acc, v| subtract(&acc, v))
        }
    }
}

/// Always a Float, whatever the operand types.
pub fn divide(left: &Value, right: &Value) -> Result<Value, ExecutionError> {
    let numerator = to_f64("divide", left)?;
    let denominator = to_f64("divide", right)?;
    if denominator == 0.0 {
        return Err(ExecutionErrorKind::DivisionByZero.into());
    }
    Ok(Value::Float(numerator / denominator))
}

pub fn less_than(left: &Value, right: &Value) -> Result<bool, ExecutionError> {
    let widest = tier("lessThan", left)?.max(tier("lessThan", right)?);
    let ordering = match (widest, left, right) {
        (Tier::Integer, Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
        (Tier::Decimal, _, _) => {
            to_decimal("lessThan", left)?.partial_cmp(&to_decimal("lessThan", right)?)
        }
        _ => to_f64("lessThan", left)?.partial_cmp(&to_f64("lessThan", right)?),
    };
    Ok(ordering == Some(Ordering::Less))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn dec(s: &str) -> Value {
        Value::Decimal(BigDecimal::from_str(s).unwrap())
    }

    #[test]
    fn integers_stay_integers() {
        let values = [Value::Integer(2), Value::Integer(3), Value::Integer(4)];
        assert_eq!(plus(&values).unwrap(), Value::Integer(9));
        assert_eq!(times(&values).unwrap(), Value::Integer(24));
        assert_eq!(minus(&values).unwrap(), Value::Integer(-5));
    }

    #[test]
    fn identities_for_empty_sequences() {
        assert_eq!(plus(&[]).unwrap(), Value::Integer(0));
        assert_eq!(times(&[]).unwrap(), Value::Integer(1));
        assert_eq!(minus(&[]).unwrap(), Value::Integer(0));
    }

    #[test]
    fn minus_of_one_value_negates() {
        assert_eq!(minus(&[Value::Integer(7)]).unwrap(), Value::Integer(-7));
        assert_eq!(minus(&[Value::Float(1.5)]).unwrap(), Value::Float(-1.5));
        assert_eq!(minus(&[dec("2.5")]).unwrap(), dec("-2.5"));
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let err = times(&[Value::Integer(i64::MAX), Value::Integer(2)]).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::IntegerOverflow { .. }));
        let err = minus(&[Value::Integer(i64::MIN)]).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::IntegerOverflow { .. }));
    }

    #[test]
    fn mixed_operands_promote() {
        assert_eq!(
            plus(&[Value::Integer(1), Value::Float(0.5)]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(plus(&[Value::Float(0.5), dec("1.25")]).unwrap(), dec("1.75"));
        assert_eq!(times(&[Value::Integer(3), dec("0.5")]).unwrap(), dec("1.5"));
    }

    #[test]
    fn decimal_arithmetic_is_exact() {
        assert_eq!(plus(&[dec("0.1"), dec("0.2")]).unwrap(), dec("0.3"));
    }

    #[test]
    fn divide_returns_float_and_rejects_zero() {
        assert_eq!(
            divide(&Value::Integer(1), &Value::Integer(4)).unwrap(),
            Value::Float(0.25)
        );
        let err = divide(&Value::Integer(1), &dec("0")).unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::DivisionByZero);
    }

    #[test]
    fn less_than_compares_across_tiers() {
        assert!(less_than(&Value::Integer(1), &Value::Float(1.5)).unwrap());
        assert!(!less_than(&dec("2"), &Value::Integer(2)).unwrap());
        assert!(less_than(&Value::Float(-0.5), &dec("0")).unwrap());
    }

    #[test]
    fn non_numbers_are_rejected() {
        let err = plus(&[Value::Integer(1), Value::Boolean(true)]).unwrap_err();
        assert!(matches!(
            err.kind,
            ExecutionErrorKind::TypeMismatch { ref found, .. } if found == "Boolean"
        ));
        assert!(minus(&[Value::String("x".into()), Value::Integer(1)]).is_err());
    }
}
