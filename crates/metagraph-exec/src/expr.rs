//! Reading expression graphs.
//!
//! Both backends see a function body through this module, so they agree on
//! what an expression is, which variables a lambda captures and what a
//! lambda is called.
//!
//! # Architecture
//!
//! Function bodies are `expressionSequence` lists of ValueSpecification
//! nodes. Three kinds execute:
//!
//! - `SimpleFunctionExpression`: a call, its callee bound in `func`
//! - `VariableExpression`: a parameter or `letFunction` name
//! - `InstanceValue`: literals, function references, lambdas and nested
//!   expressions, flattened into one sequence
//!
//! `letFunction` binds into the scope of the enclosing function for the
//! rest of its evaluation, in evaluation order: arguments left to right,
//! then the call.

use std::collections::BTreeSet;

use metagraph_core::m3::{self, props};
use metagraph_core::{stdlib, FunctionShape, InstanceStore, Literal, NodeId, PropertyValue};

use crate::error::{ExecutionError, ExecutionErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    Call,
    Variable,
    Instance,
}

/// One entry of an `InstanceValue`'s `values`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Item<'a> {
    Literal(&'a Literal),
    /// A lambda defined in place.
    Lambda(NodeId),
    /// A reference to a named function.
    Function(NodeId),
    /// A nested expression whose results are spliced in.
    Expression(NodeId),
}

pub fn kind_of(store: &InstanceStore, node: NodeId) -> Result<ExpressionKind, ExecutionError> {
    if store.is_instance_of(node, m3::SIMPLE_FUNCTION_EXPRESSION) {
        Ok(ExpressionKind::Call)
    } else if store.is_instance_of(node, m3::VARIABLE_EXPRESSION) {
        Ok(ExpressionKind::Variable)
    } else if store.is_instance_of(node, m3::INSTANCE_VALUE) {
        Ok(ExpressionKind::Instance)
    } else {
        Err(ExecutionError::malformed(
            node,
            format!("{} is not an executable expression", store.describe(node)),
        ))
    }
}

/// Look up a function by qualified path.
pub fn resolve_function(store: &InstanceStore, path: &str) -> Result<NodeId, ExecutionError> {
    store
        .find_element(path)
        .filter(|f| store.is_instance_of(*f, m3::FUNCTION))
        .ok_or_else(|| {
            ExecutionErrorKind::UnknownFunction {
                path: path.to_string(),
            }
            .into()
        })
}

pub fn is_native(store: &InstanceStore, function: NodeId) -> bool {
    store.is_instance_of(function, m3::NATIVE_FUNCTION)
}

pub fn signature_of(store: &InstanceStore, function: NodeId) -> Result<String, ExecutionError> {
    Ok(FunctionShape::of(store, function)?.signature())
}

pub fn body(store: &InstanceStore, function: NodeId) -> Result<Vec<NodeId>, ExecutionError> {
    Ok(store
        .node(function)?
        .values(props::EXPRESSION_SEQUENCE)
        .iter()
        .filter_map(PropertyValue::target)
        .collect())
}

pub fn variable_name(store: &InstanceStore, node: NodeId) -> Result<String, ExecutionError> {
    store
        .node(node)?
        .string(props::NAME)
        .map(str::to_string)
        .ok_or_else(|| ExecutionError::malformed(node, "variable without a name"))
}

pub fn callee(store: &InstanceStore, call: NodeId) -> Result<NodeId, ExecutionError> {
    let expression = store.node(call)?;
    expression.target(props::FUNC).ok_or_else(|| {
        ExecutionError::malformed(
            call,
            format!(
                "call to '{}' is not bound",
                expression.string(props::FUNCTION_NAME).unwrap_or_default()
            ),
        )
    })
}

pub fn arguments(store: &InstanceStore, call: NodeId) -> Result<Vec<NodeId>, ExecutionError> {
    let expression = store.node(call)?;
    expression
        .values(props::PARAMETERS_VALUES)
        .iter()
        .map(|v| {
            v.target()
                .ok_or_else(|| ExecutionError::malformed(call, "argument is not an expression"))
        })
        .collect()
}

pub fn instance_items(store: &InstanceStore, node: NodeId) -> Result<Vec<Item<'_>>, ExecutionError> {
    let mut items = Vec::new();
    for value in store.node(node)?.values(props::VALUES) {
        let item = match value {
            PropertyValue::Literal(literal) => Item::Literal(literal),
            PropertyValue::Node(child) if store.is_instance_of(*child, m3::FUNCTION) => {
                Item::Lambda(*child)
            }
            PropertyValue::Node(child) => Item::Expression(*child),
            PropertyValue::Stub(stub) => match stub.resolved {
                Some(target) if store.is_instance_of(target, m3::FUNCTION) => Item::Function(target),
                _ => {
                    return Err(ExecutionError::malformed(
                        node,
                        format!("'{}' is not a function", stub.path),
                    ))
                }
            },
        };
        items.push(item);
    }
    Ok(items)
}

/// Whether `call` invokes the `letFunction` native.
pub fn is_let(store: &InstanceStore, call: NodeId) -> Result<bool, ExecutionError> {
    let target = callee(store, call)?;
    Ok(is_native(store, target) && signature_of(store, target)? == stdlib::LET)
}

/// The literal name bound by a `letFunction` call.
pub fn let_name(store: &InstanceStore, call: NodeId) -> Result<String, ExecutionError> {
    let malformed = || ExecutionError::malformed(call, "letFunction needs a literal name");
    let first = *arguments(store, call)?.first().ok_or_else(malformed)?;
    match instance_items(store, first).map_err(|_| malformed())?.as_slice() {
        [Item::Literal(Literal::String(name))] => Ok(name.clone()),
        _ => Err(malformed()),
    }
}

fn parameter_names(store: &InstanceStore, function: NodeId) -> Result<Vec<String>, ExecutionError> {
    Ok(FunctionShape::of(store, function)?
        .parameters
        .into_iter()
        .map(|p| p.name)
        .collect())
}

// ---------------------------------------------------------------------------
// Captures
// ---------------------------------------------------------------------------

/// Names a lambda reads from its enclosing scope, sorted.
pub fn captures(store: &InstanceStore, lambda: NodeId) -> Result<Vec<String>, ExecutionError> {
    let mut free = BTreeSet::new();
    free_in_function(store, lambda, &BTreeSet::new(), &mut free)?;
    Ok(free.into_iter().collect())
}

fn free_in_function(
    store: &InstanceStore,
    function: NodeId,
    outer: &BTreeSet<String>,
    free: &mut BTreeSet<String>,
) -> Result<(), ExecutionError> {
    let mut bound = outer.clone();
    bound.extend(parameter_names(store, function)?);
    for expression in body(store, function)? {
        free_in_expression(store, expression, &mut bound, free)?;
    }
    Ok(())
}

fn free_in_expression(
    store: &InstanceStore,
    node: NodeId,
    bound: &mut BTreeSet<String>,
    free: &mut BTreeSet<String>,
) -> Result<(), ExecutionError> {
    match kind_of(store, node)? {
        ExpressionKind::Variable => {
            let name = variable_name(store, node)?;
            if !bound.contains(&name) {
                free.insert(name);
            }
        }
        ExpressionKind::Call => {
            for argument in arguments(store, node)? {
                free_in_expression(store, argument, bound, free)?;
            }
            if is_let(store, node)? {
                bound.insert(let_name(store, node)?);
            }
        }
        ExpressionKind::Instance => {
            for item in instance_items(store, node)? {
                match item {
                    Item::Lambda(f) => free_in_function(store, f, bound, free)?,
                    Item::Expression(e) => free_in_expression(store, e, bound, free)?,
                    Item::Literal(_) | Item::Function(_) => {}
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lambda labels
// ---------------------------------------------------------------------------

/// Lambdas under a function, in pre-order (a nested lambda follows its parent).
pub fn lambdas(store: &InstanceStore, function: NodeId) -> Result<Vec<NodeId>, ExecutionError> {
    let mut found = Vec::new();
    lambdas_in_function(store, function, &mut found)?;
    Ok(found)
}

fn lambdas_in_function(
    store: &InstanceStore,
    function: NodeId,
    found: &mut Vec<NodeId>,
) -> Result<(), ExecutionError> {
    for expression in body(store, function)? {
        lambdas_in_expression(store, expression, found)?;
    }
    Ok(())
}

fn lambdas_in_expression(
    store: &InstanceStore,
    node: NodeId,
    found: &mut Vec<NodeId>,
) -> Result<(), ExecutionError> {
    match kind_of(store, node)? {
        ExpressionKind::Variable => {}
        ExpressionKind::Call => {
            for argument in arguments(store, node)? {
                lambdas_in_expression(store, argument, found)?;
            }
        }
        ExpressionKind::Instance => {
            for item in instance_items(store, node)? {
                match item {
                    Item::Lambda(f) => {
                        found.push(f);
                        lambdas_in_function(store, f, found)?;
                    }
                    Item::Expression(e) => lambdas_in_expression(store, e, found)?,
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

/// Stable name of a function: its qualified path, or for a lambda the path
/// of the function it sits in plus its pre-order position.
pub fn label(store: &InstanceStore, function: NodeId) -> Result<String, ExecutionError> {
    if let Some(path) = store.qualified_path(function) {
        return Ok(path);
    }
    let top = store.top_level_of(function);
    let position = lambdas(store, top)?
        .iter()
        .position(|l| *l == function)
        .ok_or_else(|| ExecutionError::malformed(function, "function is not reachable"))?;
    Ok(lambda_label(&store.describe(top), position))
}

pub fn lambda_label(owner: &str, position: usize) -> String {
    format!("{owner}$lambda{position}")
}

#[cfg(test)]
mod tests {
    use metagraph_compiler::fragment::{self, call, function};
    use metagraph_compiler::{IncrementalCompiler, UnitSource};

    use super::*;

    fn compile(element: metagraph_compiler::ElementFragment) -> IncrementalCompiler {
        let mut c = IncrementalCompiler::new().unwrap();
        c.add_or_update(UnitSource::new("t.pure").element(element)).unwrap();
        c
    }

    #[test]
    fn lambda_captures_exclude_parameters_and_let_names() {
        let c = compile(function(
            "test",
            "f",
            &[("x", "Integer", "1"), ("flag", "Boolean", "1")],
            "Integer",
            "1",
            vec![call(
                "if",
                vec![
                    fragment::var("flag"),
                    fragment::lambda(
                        &[],
                        vec![
                            call("letFunction", vec![fragment::string("y"), fragment::integer(2)]),
                            call(
                                "plus",
                                vec![fragment::collection(vec![
                                    fragment::var("x"),
                                    fragment::var("y"),
                                ])],
                            ),
                        ],
                    ),
                    fragment::lambda(&[("z", "Integer", "1")], vec![fragment::var("z")]),
                ],
            )],
        ));
        let store = c.store();
        let f = resolve_function(store, "test::f").unwrap();
        let found = lambdas(store, f).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(captures(store, found[0]).unwrap(), vec!["x".to_string()]);
        assert!(captures(store, found[1]).unwrap().is_empty());
        assert_eq!(label(store, found[1]).unwrap(), "test::f$lambda1");
        assert_eq!(label(store, f).unwrap(), "test::f");
    }

    #[test]
    fn unknown_function_paths_are_reported() {
        let c = IncrementalCompiler::new().unwrap();
        let err = resolve_function(c.store(), "test::nope").unwrap_err();
        assert_eq!(
            err.kind,
            ExecutionErrorKind::UnknownFunction {
                path: "test::nope".into()
            }
        );
    }
}
