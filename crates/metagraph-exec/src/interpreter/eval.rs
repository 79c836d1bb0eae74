//! Expression evaluation for the interpreter.
//!
//! One [`Evaluation`] lives for one top-level `execute`. It owns the call
//! depth counter and a cache of function labels; everything else is either
//! borrowed from the [`Interpreter`] or carried by the caller's
//! [`ExecutionContext`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use metagraph_core::{FunctionShape, InstanceStore, NodeId};

use super::Interpreter;
use crate::backend::FunctionCaller;
use crate::coercion::check_multiplicity;
use crate::context::ExecutionContext;
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::expr::{self, ExpressionKind, Item};
use crate::value::{Closure, FunctionTarget, Sequence, Value};

/// Variables visible to one function invocation.
type Scope = BTreeMap<String, Sequence>;

pub(crate) struct Evaluation<'i, 's> {
    interpreter: &'i Interpreter<'s>,
    depth: usize,
    labels: HashMap<NodeId, String>,
}

impl<'i, 's> Evaluation<'i, 's> {
    pub(crate) fn new(interpreter: &'i Interpreter<'s>) -> Self {
        Evaluation {
            interpreter,
            depth: 0,
            labels: HashMap::new(),
        }
    }

    fn store(&self) -> &'s InstanceStore {
        self.interpreter.store
    }

    fn label(&mut self, function: NodeId) -> Result<String, ExecutionError> {
        if let Some(hit) = self.labels.get(&function) {
            return Ok(hit.clone());
        }
        let label = expr::label(self.store(), function)?;
        self.labels.insert(function, label.clone());
        Ok(label)
    }

    /// Invoke a function node: check arguments, dispatch natives by
    /// signature, evaluate user bodies in a fresh scope, check the result.
    pub(crate) fn call_node(
        &mut self,
        function: NodeId,
        captures: Scope,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        cx.charge_call()?;
        let store = self.store();
        let shape = FunctionShape::of(store, function)?;
        let label = self.label(function)?;

        if args.len() != shape.parameters.len() {
            return Err(ExecutionErrorKind::Arity {
                function: label,
                expected: shape.parameters.len(),
                found: args.len(),
            }
            .into());
        }
        for (param, arg) in shape.parameters.iter().zip(&args) {
            check_multiplicity(
                arg,
                &param.multiplicity,
                &format!("parameter '{}' of {label}", param.name),
            )?;
        }

        let result = if expr::is_native(store, function) {
            let signature = shape.signature();
            let native = self.interpreter.natives.lookup(&signature)?;
            debug!(%signature, "native call");
            native(self, cx, args)?
        } else {
            let limit = self.interpreter.config.max_call_depth;
            if self.depth >= limit {
                return Err(ExecutionErrorKind::DepthLimit { limit }.into());
            }
            if self.interpreter.config.trace_calls {
                trace!(function = %label, depth = self.depth, "call");
            }
            let mut scope = captures;
            for (param, arg) in shape.parameters.iter().zip(args) {
                scope.insert(param.name.clone(), arg);
            }
            self.depth += 1;
            let result = self.eval_body(function, &mut scope, cx);
            self.depth -= 1;
            result?
        };

        check_multiplicity(
            &result,
            &shape.return_multiplicity,
            &format!("return value of {label}"),
        )?;
        Ok(result)
    }

    /// The value of a body is the value of its last expression.
    fn eval_body(
        &mut self,
        function: NodeId,
        scope: &mut Scope,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        let mut last = Sequence::empty();
        for expression in expr::body(self.store(), function)? {
            last = self.eval(expression, scope, cx)?;
        }
        Ok(last)
    }

    fn eval(
        &mut self,
        node: NodeId,
        scope: &mut Scope,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        let store = self.store();
        let location = store.get(node).and_then(|n| n.source());
        let result = match expr::kind_of(store, node)? {
            ExpressionKind::Variable => {
                let name = expr::variable_name(store, node)?;
                scope
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| ExecutionError::from(ExecutionErrorKind::UnboundVariable { name }))
            }
            ExpressionKind::Call => self.apply(node, scope, cx),
            ExpressionKind::Instance => self.instance(node, scope, cx),
        };
        result.map_err(|e| e.at(location))
    }

    fn apply(
        &mut self,
        call: NodeId,
        scope: &mut Scope,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        let store = self.store();
        let target = expr::callee(store, call)?;
        let arguments = expr::arguments(store, call)?;

        if expr::is_let(store, call)? {
            let name = expr::let_name(store, call)?;
            let value = match arguments.get(1) {
                Some(value) => self.eval(*value, scope, cx)?,
                None => return Err(ExecutionError::malformed(call, "letFunction without a value")),
            };
            let bound = self.call_node(
                target,
                Scope::new(),
                vec![Sequence::one(name.as_str()), value],
                cx,
            )?;
            scope.insert(name, bound.clone());
            return Ok(bound);
        }

        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            args.push(self.eval(argument, scope, cx)?);
        }
        self.call_node(target, Scope::new(), args, cx)
    }

    fn instance(
        &mut self,
        node: NodeId,
        scope: &mut Scope,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        let store = self.store();
        let mut values = Sequence::empty();
        for item in expr::instance_items(store, node)? {
            match item {
                Item::Literal(literal) => values.push(Value::from_literal(literal)),
                Item::Lambda(lambda) => {
                    let mut captured = Scope::new();
                    for name in expr::captures(store, lambda)? {
                        let value = scope
                            .get(&name)
                            .cloned()
                            .ok_or_else(|| ExecutionErrorKind::UnboundVariable { name: name.clone() })?;
                        captured.insert(name, value);
                    }
                    values.push(self.closure(lambda, captured)?);
                }
                Item::Function(function) => values.push(self.closure(function, Scope::new())?),
                Item::Expression(expression) => values.extend(self.eval(expression, scope, cx)?),
            }
        }
        Ok(values)
    }

    fn closure(&mut self, function: NodeId, captures: Scope) -> Result<Value, ExecutionError> {
        Ok(Value::Function(Arc::new(Closure {
            name: self.label(function)?,
            target: FunctionTarget::Node(function),
            captures,
        })))
    }
}

impl FunctionCaller for Evaluation<'_, '_> {
    fn call_value(
        &mut self,
        function: &Value,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        match function {
            Value::Function(closure) => match closure.target {
                FunctionTarget::Node(node) => self.call_node(node, closure.captures.clone(), args, cx),
                FunctionTarget::Compiled(_) => Err(ExecutionError::type_mismatch(
                    "call",
                    "interpreted function",
                    "compiled function",
                )),
            },
            other => Err(ExecutionError::type_mismatch("call", "Function", other.type_name())),
        }
    }
}
