//! Standard-library natives.

use metagraph_core::stdlib as sig;

use super::NativeFn;
use crate::backend::FunctionCaller;
use crate::coercion;
use crate::context::ExecutionContext;
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::numeric;
use crate::value::{Sequence, Value};

/// Every standard-library implementation, keyed by signature.
pub fn implementations() -> [(&'static str, NativeFn); 18] {
    [
        (sig::NOT, not),
        (sig::AND, and),
        (sig::OR, or),
        (sig::EQ, eq),
        (sig::PLUS, plus),
        (sig::MINUS, minus),
        (sig::TIMES, times),
        (sig::DIVIDE, divide),
        (sig::LESS_THAN, less_than),
        (sig::SIZE, size),
        (sig::IS_EMPTY, is_empty),
        (sig::FIRST, first),
        (sig::TO_ONE, to_one),
        (sig::JOIN_STRINGS, join_strings),
        (sig::TO_STRING, to_string),
        (sig::IF, if_),
        (sig::LET, let_function),
        (sig::PRINT, print),
    ]
}

fn take<const N: usize>(function: &str, args: Vec<Sequence>) -> Result<[Sequence; N], ExecutionError> {
    let found = args.len();
    args.try_into().map_err(|_| {
        ExecutionErrorKind::Arity {
            function: function.to_string(),
            expected: N,
            found,
        }
        .into()
    })
}

// ---------------------------------------------------------------------------
// boolean
// ---------------------------------------------------------------------------

fn not(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [value] = take("not", args)?;
    Ok(Sequence::one(!coercion::boolean(value, "not")?))
}

fn and(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [left, right] = take("and", args)?;
    let left = coercion::boolean(left, "and")?;
    let right = coercion::boolean(right, "and")?;
    Ok(Sequence::one(left && right))
}

fn or(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [left, right] = take("or", args)?;
    let left = coercion::boolean(left, "or")?;
    let right = coercion::boolean(right, "or")?;
    Ok(Sequence::one(left || right))
}

fn eq(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [left, right] = take("eq", args)?;
    Ok(Sequence::one(coercion::one(left, "eq")? == coercion::one(right, "eq")?))
}

// ---------------------------------------------------------------------------
// math
// ---------------------------------------------------------------------------

fn plus(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [values] = take("plus", args)?;
    numeric::plus(&values).map(Sequence::one)
}

fn minus(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [values] = take("minus", args)?;
    numeric::minus(&values).map(Sequence::one)
}

fn times(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [values] = take("times", args)?;
    numeric::times(&values).map(Sequence::one)
}

fn divide(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [left, right] = take("divide", args)?;
    numeric::divide(&coercion::one(left, "divide")?, &coercion::one(right, "divide")?)
        .map(Sequence::one)
}

fn less_than(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [left, right] = take("lessThan", args)?;
    numeric::less_than(&coercion::one(left, "lessThan")?, &coercion::one(right, "lessThan")?)
        .map(Sequence::one)
}

// ---------------------------------------------------------------------------
// collection, multiplicity
// ---------------------------------------------------------------------------

fn size(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [values] = take("size", args)?;
    let len = i64::try_from(values.len()).map_err(|_| ExecutionErrorKind::IntegerOverflow {
        operation: "size".into(),
    })?;
    Ok(Sequence::one(len))
}

fn is_empty(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [values] = take("isEmpty", args)?;
    Ok(Sequence::one(values.is_empty()))
}

fn first(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [values] = take("first", args)?;
    Ok(values.into_iter().next().map(Sequence::one).unwrap_or_default())
}

fn to_one(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [values] = take("toOne", args)?;
    coercion::one(values, "toOne").map(Sequence::one)
}

// ---------------------------------------------------------------------------
// string
// ---------------------------------------------------------------------------

fn join_strings(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [strings, separator] = take("joinStrings", args)?;
    let separator = coercion::string(separator, "joinStrings")?;
    let parts = strings
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(ExecutionError::type_mismatch("joinStrings", "String", other.type_name())),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Sequence::one(parts.join(&separator)))
}

fn to_string(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [value] = take("toString", args)?;
    Ok(Sequence::one(coercion::one(value, "toString")?.to_string()))
}

// ---------------------------------------------------------------------------
// lang, io
// ---------------------------------------------------------------------------

/// Only the chosen branch runs.
fn if_(caller: &mut dyn FunctionCaller, cx: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [test, then, otherwise] = take("if", args)?;
    let branch = if coercion::boolean(test, "if")? { then } else { otherwise };
    let branch = coercion::one(branch, "if")?;
    caller.call_value(&branch, Vec::new(), cx)
}

/// The backend binds the name; the native only yields the value.
fn let_function(_: &mut dyn FunctionCaller, _: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [_, value] = take("letFunction", args)?;
    Ok(value)
}

fn print(_: &mut dyn FunctionCaller, cx: &mut ExecutionContext, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
    let [value, depth] = take("print", args)?;
    coercion::integer(depth, "print")?;
    cx.print(value.to_string());
    Ok(Sequence::empty())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use bigdecimal::BigDecimal;

    use super::*;
    use crate::value::{Closure, FunctionTarget};

    /// Returns the closure's name instead of running it.
    struct Echo;

    impl FunctionCaller for Echo {
        fn call_value(
            &mut self,
            function: &Value,
            _: Vec<Sequence>,
            _: &mut ExecutionContext,
        ) -> Result<Sequence, ExecutionError> {
            match function {
                Value::Function(closure) => Ok(Sequence::one(closure.name.as_str())),
                other => Err(ExecutionError::type_mismatch("call", "Function", other.type_name())),
            }
        }
    }

    fn run(native: NativeFn, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
        native(&mut Echo, &mut ExecutionContext::new(), args)
    }

    fn closure(name: &str) -> Sequence {
        Sequence::one(Value::Function(Arc::new(Closure {
            name: name.into(),
            target: FunctionTarget::Compiled(0),
            captures: Default::default(),
        })))
    }

    #[test]
    fn not_negates() {
        assert_eq!(run(not, vec![Sequence::one(true)]).unwrap(), Sequence::one(false));
    }

    #[test]
    fn eq_is_strict() {
        let r = run(eq, vec![Sequence::one(1i64), Sequence::one(1.0)]).unwrap();
        assert_eq!(r, Sequence::one(false));
        let r = run(eq, vec![Sequence::one("a"), Sequence::one("a")]).unwrap();
        assert_eq!(r, Sequence::one(true));
    }

    #[test]
    fn times_over_decimals() {
        let values: Sequence = vec![
            Value::Decimal(BigDecimal::from_str("1.5").unwrap()),
            Value::Integer(2),
        ]
        .into();
        let r = run(times, vec![values]).unwrap();
        assert_eq!(r, Sequence::one(BigDecimal::from_str("3.0").unwrap()));
    }

    #[test]
    fn first_of_empty_is_empty() {
        assert_eq!(run(first, vec![Sequence::empty()]).unwrap(), Sequence::empty());
    }

    #[test]
    fn to_one_rejects_many() {
        let many: Sequence = vec![Value::Integer(1), Value::Integer(2)].into();
        assert!(run(to_one, vec![many]).is_err());
    }

    #[test]
    fn join_strings_requires_strings() {
        let parts: Sequence = vec![Value::from("a"), Value::from("b")].into();
        let r = run(join_strings, vec![parts, Sequence::one(", ")]).unwrap();
        assert_eq!(r, Sequence::one("a, b"));
        let mixed: Sequence = vec![Value::from("a"), Value::Integer(1)].into();
        assert!(run(join_strings, vec![mixed, Sequence::one(",")]).is_err());
    }

    #[test]
    fn if_calls_only_the_chosen_branch() {
        let r = run(if_, vec![Sequence::one(false), closure("yes"), closure("no")]).unwrap();
        assert_eq!(r, Sequence::one("no"));
    }

    #[test]
    fn print_writes_to_the_context() {
        let mut cx = ExecutionContext::new();
        let values: Sequence = vec![Value::Integer(1), Value::Float(2.0)].into();
        let r = print(&mut Echo, &mut cx, vec![values, Sequence::one(1i64)]).unwrap();
        assert!(r.is_empty());
        assert_eq!(cx.output(), ["[1, 2.0]".to_string()]);
    }

    #[test]
    fn wrong_argument_count_is_an_arity_error() {
        let err = run(not, vec![]).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::Arity { expected: 1, found: 0, .. }));
    }
}
