//! Runtime-support library for compiled code.
//!
//! The machine's instructions never touch values directly beyond moving
//! sequences around; argument and result checks, native binding, closure
//! construction and the `if` test all go through here, and from here into
//! the same `metagraph_exec` routines the interpreter uses. That keeps the
//! diagnostics of the two backends word for word the same.

use std::collections::BTreeMap;
use std::sync::Arc;

use metagraph_core::Multiplicity;
use metagraph_exec::coercion::{self, check_multiplicity};
use metagraph_exec::{
    Closure, ExecutionError, ExecutionErrorKind, FunctionTarget, NativeFn, NativeRegistry,
    Sequence, Value,
};

use crate::program::{NativeBlock, ParamDecl};

/// A native declaration bound to its implementation.
#[derive(Clone)]
pub struct NativeEntry {
    pub decl: NativeBlock,
    pub native: NativeFn,
}

impl std::fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEntry").field("decl", &self.decl).finish()
    }
}

/// Bind a declaration to the shared native table.
pub fn bind(natives: &NativeRegistry, decl: NativeBlock) -> Result<NativeEntry, ExecutionError> {
    let native = natives.lookup(&decl.signature)?;
    Ok(NativeEntry { decl, native })
}

/// Arity first, then each argument against its parameter.
pub fn check_arguments(label: &str, params: &[ParamDecl], args: &[Sequence]) -> Result<(), ExecutionError> {
    if args.len() != params.len() {
        return Err(ExecutionErrorKind::Arity {
            function: label.to_string(),
            expected: params.len(),
            found: args.len(),
        }
        .into());
    }
    for (param, arg) in params.iter().zip(args) {
        check_multiplicity(
            arg,
            &param.multiplicity,
            &format!("parameter '{}' of {label}", param.name),
        )?;
    }
    Ok(())
}

pub fn check_return(label: &str, returns: &Multiplicity, result: &Sequence) -> Result<(), ExecutionError> {
    check_multiplicity(result, returns, &format!("return value of {label}"))
}

pub fn concat(parts: Vec<Sequence>) -> Sequence {
    let mut out = Sequence::empty();
    for part in parts {
        out.extend(part);
    }
    out
}

/// The test of an inlined `if`, checked as the `if` native checks it.
pub fn branch_test(decl: &NativeBlock, test: Sequence) -> Result<bool, ExecutionError> {
    if let Some(param) = decl.params.first() {
        check_multiplicity(
            &test,
            &param.multiplicity,
            &format!("parameter '{}' of {}", param.name, decl.label),
        )?;
    }
    coercion::boolean(test, "if")
}

pub fn closure(label: &str, index: usize, names: &[String], values: Vec<Sequence>) -> Value {
    let captures: BTreeMap<String, Sequence> = names.iter().cloned().zip(values).collect();
    Value::Function(Arc::new(Closure {
        name: label.to_string(),
        target: FunctionTarget::Compiled(index),
        captures,
    }))
}

pub fn unbound(name: &str) -> ExecutionError {
    ExecutionErrorKind::UnboundVariable {
        name: name.to_string(),
    }
    .into()
}

/// Internal inconsistencies of loaded code.
pub fn corrupt(label: &str, reason: &str) -> ExecutionError {
    ExecutionErrorKind::Graph {
        message: format!("compiled code of {label}: {reason}"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use metagraph_core::stdlib;

    use super::*;

    fn if_decl() -> NativeBlock {
        NativeBlock {
            signature: stdlib::IF.into(),
            label: "meta::pure::functions::lang::if".into(),
            params: vec![
                ParamDecl {
                    name: "test".into(),
                    multiplicity: Multiplicity::PURE_ONE,
                },
                ParamDecl {
                    name: "then".into(),
                    multiplicity: Multiplicity::PURE_ONE,
                },
                ParamDecl {
                    name: "else".into(),
                    multiplicity: Multiplicity::PURE_ONE,
                },
            ],
            returns: Multiplicity::ZERO_MANY,
        }
    }

    #[test]
    fn binding_a_missing_native_fails() {
        let mut decl = if_decl();
        decl.signature = "nope_Any_1__Any_1_".into();
        let err = bind(&NativeRegistry::standard().unwrap(), decl).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::MissingNative { .. }));
    }

    #[test]
    fn arity_is_checked_before_multiplicity() {
        let params = if_decl().params;
        let err = check_arguments("f", &params, &[Sequence::empty()]).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::Arity { expected: 3, found: 1, .. }));

        let args = vec![Sequence::empty(), Sequence::one(1i64), Sequence::one(2i64)];
        let err = check_arguments("f", &params, &args).unwrap_err();
        assert_eq!(
            err.to_string(),
            "multiplicity violation for parameter 'test' of f: expected [1], found 0 value(s)"
        );
    }

    #[test]
    fn branch_test_names_the_if_parameter() {
        assert!(branch_test(&if_decl(), Sequence::one(true)).unwrap());
        let err = branch_test(&if_decl(), Sequence::empty()).unwrap_err();
        assert!(err.to_string().contains("parameter 'test' of meta::pure::functions::lang::if"));
        let err = branch_test(&if_decl(), Sequence::one(1i64)).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn concat_flattens_in_order() {
        let parts = vec![
            Sequence::one(1i64),
            Sequence::empty(),
            vec![Value::Integer(2), Value::Integer(3)].into(),
        ];
        let out = concat(parts);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], Value::Integer(3));
    }
}
