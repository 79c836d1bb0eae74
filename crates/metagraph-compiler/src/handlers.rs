//! Handlers for the platform metamodel, packaged as [`CoreExtension`].

use std::sync::Arc;

use metagraph_core::m3::{self, props};
use metagraph_core::{FunctionShape, ImportStub, Multiplicity, NodeId, PropertyValue};

use crate::error::CompileError;
use crate::matcher::{full_match, Extension, Flow, MatchHandler, MatchState, PassContext, PassKind};
use crate::resolve::{self, Scope};

type HandlerFn =
    fn(NodeId, &mut PassContext<'_>, &mut MatchState) -> Result<Flow, CompileError>;

/// A handler backed by a plain function.
pub struct FnHandler {
    classifier: &'static str,
    pass: PassKind,
    f: HandlerFn,
}

impl FnHandler {
    pub fn new(classifier: &'static str, pass: PassKind, f: HandlerFn) -> Arc<dyn MatchHandler> {
        Arc::new(FnHandler { classifier, pass, f })
    }
}

impl MatchHandler for FnHandler {
    fn classifier(&self) -> &str {
        self.classifier
    }

    fn pass(&self) -> PassKind {
        self.pass
    }

    fn invoke(
        &self,
        node: NodeId,
        cx: &mut PassContext<'_>,
        state: &mut MatchState,
    ) -> Result<Flow, CompileError> {
        (self.f)(node, cx, state)
    }
}

/// Behavior for classes, properties, functions and function expressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreExtension;

impl Extension for CoreExtension {
    fn name(&self) -> &str {
        "core"
    }

    fn handlers(&self) -> Vec<Arc<dyn MatchHandler>> {
        use PassKind::*;
        vec![
            FnHandler::new(m3::CLASS, Bind, class_bind),
            FnHandler::new(m3::CLASS, Unbind, class_unbind),
            FnHandler::new(m3::CLASS, Validate, class_validate),
            FnHandler::new(m3::PROPERTY, Validate, property_validate),
            FnHandler::new(m3::CONCRETE_FUNCTION_DEFINITION, Bind, function_bind),
            FnHandler::new(m3::CONCRETE_FUNCTION_DEFINITION, Unbind, function_unbind),
            FnHandler::new(m3::CONCRETE_FUNCTION_DEFINITION, Validate, function_validate),
            FnHandler::new(m3::CONCRETE_FUNCTION_DEFINITION, Prune, function_prune),
            FnHandler::new(m3::SIMPLE_FUNCTION_EXPRESSION, Bind, expression_bind),
            FnHandler::new(m3::SIMPLE_FUNCTION_EXPRESSION, Unbind, expression_unbind),
            FnHandler::new(m3::SIMPLE_FUNCTION_EXPRESSION, Validate, expression_validate),
            FnHandler::new(m3::SIMPLE_FUNCTION_EXPRESSION, Navigate, expression_navigate),
        ]
    }
}

// ---------------------------------------------------------------------------
// Class
// ---------------------------------------------------------------------------

fn class_bind(node: NodeId, cx: &mut PassContext<'_>, _: &mut MatchState) -> Result<Flow, CompileError> {
    if let Some(path) = cx.store.qualified_path(node) {
        if cx.store.classifier_node(&path).is_none() {
            cx.store.register_classifier(&path, node)?;
        }
    }
    Ok(Flow::Continue)
}

fn class_unbind(node: NodeId, cx: &mut PassContext<'_>, _: &mut MatchState) -> Result<Flow, CompileError> {
    if !cx.is_evicted(node) {
        return Ok(Flow::Continue);
    }
    if let Some(path) = cx.store.qualified_path(node) {
        if cx.store.classifier_node(&path) == Some(node) {
            cx.store.unregister_classifier(&path);
        }
    }
    Ok(Flow::Continue)
}

fn class_validate(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<Flow, CompileError> {
    // A class that only reaches a cycle is left to the classes on it.
    if let Some(cycle) = generalization_cycle(cx, node, node, &mut Vec::new()) {
        let chain: Vec<String> = cycle.iter().map(|c| cx.store.describe(*c)).collect();
        state.diagnostics.push(CompileError::compilation(
            format!(
                "class {} is its own generalization: {}",
                cx.store.describe(node),
                chain.join(" -> ")
            ),
            cx.store.node(node)?.source().cloned(),
        ));
    }
    Ok(Flow::Continue)
}

/// The generalization chain leading from `start` back to itself, found by a
/// depth-first walk that uses the context's in-flight set.
fn generalization_cycle(
    cx: &mut PassContext<'_>,
    start: NodeId,
    class: NodeId,
    path: &mut Vec<NodeId>,
) -> Option<Vec<NodeId>> {
    if class == start && !path.is_empty() {
        let mut cycle = path.clone();
        cycle.push(start);
        return Some(cycle);
    }
    if !cx.context.enter(class) {
        return None;
    }
    path.push(class);
    let supertypes: Vec<NodeId> = cx
        .store
        .get(class)
        .map(|n| {
            n.values(props::GENERALIZATIONS)
                .iter()
                .filter_map(PropertyValue::target)
                .collect()
        })
        .unwrap_or_default();
    let cycle = supertypes
        .into_iter()
        .find_map(|s| generalization_cycle(cx, start, s, path));
    path.pop();
    cx.context.leave(class);
    cycle
}

fn property_validate(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<Flow, CompileError> {
    let property = cx.store.node(node)?;
    if let Some(text) = property.string(props::MULTIPLICITY) {
        if text.parse::<Multiplicity>().is_err() {
            state.diagnostics.push(CompileError::compilation(
                format!("invalid multiplicity '{text}' on {}", cx.store.describe(node)),
                property.source().cloned(),
            ));
        }
    }
    Ok(Flow::Continue)
}

// ---------------------------------------------------------------------------
// ConcreteFunctionDefinition
// ---------------------------------------------------------------------------

fn function_bind(node: NodeId, cx: &mut PassContext<'_>, _: &mut MatchState) -> Result<Flow, CompileError> {
    let function = cx.store.node(node)?;
    if let Some(name) = function.name().map(str::to_string) {
        cx.context.register_function(&name, node);
    }
    let signature = FunctionShape::of(cx.store, node)?.signature();
    if cx.store.node(node)?.string(props::SIGNATURE) != Some(signature.as_str()) {
        cx.store
            .set_values(node, props::SIGNATURE, vec![PropertyValue::string(signature)])?;
    }
    Ok(Flow::Continue)
}

fn function_unbind(node: NodeId, cx: &mut PassContext<'_>, _: &mut MatchState) -> Result<Flow, CompileError> {
    if cx.is_evicted(node) {
        if let Some(name) = cx.store.node(node)?.name().map(str::to_string) {
            cx.context.unregister_function(&name, node);
        }
    }
    Ok(Flow::Continue)
}

fn function_validate(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<Flow, CompileError> {
    let function = cx.store.node(node)?;
    if function.values(props::RETURN_TYPE).is_empty() {
        state.diagnostics.push(CompileError::compilation(
            format!("function {} declares no return type", cx.store.describe(node)),
            function.source().cloned(),
        ));
    }
    Ok(Flow::Continue)
}

/// Strip the Bind-derived signature.
fn function_prune(node: NodeId, cx: &mut PassContext<'_>, _: &mut MatchState) -> Result<Flow, CompileError> {
    if !cx.store.node(node)?.values(props::SIGNATURE).is_empty() {
        cx.store.set_values(node, props::SIGNATURE, Vec::new())?;
    }
    Ok(Flow::SkipChildren)
}

// ---------------------------------------------------------------------------
// SimpleFunctionExpression
// ---------------------------------------------------------------------------

/// Resolve `func` by name and arity through the caller's scope, then bind
/// the callee first.
fn expression_bind(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<Flow, CompileError> {
    let expression = cx.store.node(node)?;
    if expression.target(props::FUNC).is_some() {
        return Ok(Flow::Continue);
    }
    let location = expression.source().cloned();
    let name = expression
        .string(props::FUNCTION_NAME)
        .ok_or_else(|| {
            CompileError::compilation("function expression without a function name", location.clone())
        })?
        .to_string();
    let arity = expression.values(props::PARAMETERS_VALUES).len();

    let scope = Scope::of(cx.store, node);
    let target =
        resolve::resolve_function(cx.store, cx.context, &scope, &name, arity, location.as_ref())?;

    let path = cx.store.qualified_path(target).unwrap_or(name);
    let mut stub = ImportStub::bound(path, target);
    stub.source = location;
    cx.store
        .set_values(node, props::FUNC, vec![PropertyValue::Stub(stub)])?;

    if !cx.store.node(target)?.is_persistent() {
        full_match(target, cx, state)?;
    }
    Ok(Flow::Continue)
}

/// A callee removed from under the expression is re-resolved by name, so
/// drop the stale stub rather than leave it for generic resolution.
fn expression_unbind(node: NodeId, cx: &mut PassContext<'_>, _: &mut MatchState) -> Result<Flow, CompileError> {
    if cx.is_evicted(node) {
        return Ok(Flow::Continue);
    }
    let stale = cx
        .store
        .node(node)?
        .values(props::FUNC)
        .iter()
        .any(PropertyValue::is_unresolved);
    if stale {
        cx.store.set_values(node, props::FUNC, Vec::new())?;
    }
    Ok(Flow::Continue)
}

fn expression_validate(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<Flow, CompileError> {
    let expression = cx.store.node(node)?;
    let Some(function) = expression.target(props::FUNC) else {
        state.diagnostics.push(CompileError::UnresolvedReference {
            path: expression.string(props::FUNCTION_NAME).unwrap_or_default().to_string(),
            location: expression.source().cloned(),
        });
        return Ok(Flow::Continue);
    };
    let expected = cx.store.node(function)?.values(props::PARAMETERS).len();
    let actual = expression.values(props::PARAMETERS_VALUES).len();
    if expected != actual {
        state.diagnostics.push(CompileError::compilation(
            format!(
                "{} expects {expected} argument(s), got {actual}",
                cx.store.describe(function)
            ),
            expression.source().cloned(),
        ));
    }
    Ok(Flow::Continue)
}

fn expression_navigate(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<Flow, CompileError> {
    if let Some(function) = cx.store.node(node)?.target(props::FUNC) {
        state.found = Some(function);
    }
    Ok(Flow::SkipChildren)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherRegistry;

    #[test]
    fn core_extension_registers_without_conflicts() {
        let ext: Arc<dyn Extension> = Arc::new(CoreExtension);
        let registry = MatcherRegistry::new(&[ext]).unwrap();
        assert_eq!(registry.len(), 12);
        assert_eq!(registry.owner_of(m3::CLASS, PassKind::Validate), Some("core"));
        assert_eq!(registry.owner_of(m3::CLASS, PassKind::Navigate), None);
    }

    #[test]
    fn registering_core_twice_is_rejected() {
        let ext: Arc<dyn Extension> = Arc::new(CoreExtension);
        assert!(matches!(
            MatcherRegistry::new(&[ext.clone(), ext]),
            Err(CompileError::DuplicateHandler { .. })
        ));
    }
}
