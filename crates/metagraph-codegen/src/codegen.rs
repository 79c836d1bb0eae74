//! Emission of target source from the graph.
//!
//! [`emit`] produces one block per native declaration, sorted by
//! signature, and one block per concrete function and per lambda, sorted
//! by label. Lambdas are lifted to their own blocks with their captured
//! variables as leading slots. Output depends only on the graph and the
//! options, so the same graph always emits byte-identical source.
//!
//! Lowering follows the interpreter's evaluation order exactly: arguments
//! left to right, then the call. `letFunction` still calls its native
//! (it is charged like any call) and then stores into a slot. An `if`
//! whose branches are literal zero-parameter lambdas becomes a test and
//! two jump-separated bodies bracketed by `enter`/`leave`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use metagraph_core::{m3, stdlib, FunctionShape, InstanceStore, Literal, NodeId, SourceInfo};
use metagraph_exec::expr::{self, ExpressionKind, Item};
use metagraph_exec::ExecutionError;

use crate::error::CodegenError;
use crate::program::{FunctionBlock, Instr, Line, NativeBlock, ParamDecl};
use crate::CompileOptions;

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// One emitted function block.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFunction {
    pub block: FunctionBlock,
    /// The block as target source.
    pub text: String,
    /// Labels of the non-native functions this block refers to.
    pub calls: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub natives: Vec<NativeBlock>,
    pub functions: Vec<EmittedFunction>,
}

impl Emitted {
    /// The whole program as one target source.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for native in &self.natives {
            out.push_str(&native.to_string());
            out.push('\n');
        }
        for function in &self.functions {
            out.push_str(&function.text);
            out.push('\n');
        }
        out
    }

    pub fn function(&self, label: &str) -> Option<&EmittedFunction> {
        self.functions.iter().find(|f| f.block.label == label)
    }
}

/// Emit every native declaration and every function in the store.
pub fn emit(store: &InstanceStore, options: &CompileOptions) -> Result<Emitted, CodegenError> {
    let mut natives = Vec::new();
    for function in store.all_of_classifier(m3::NATIVE_FUNCTION) {
        let shape = FunctionShape::of(store, function).map_err(ExecutionError::from)?;
        natives.push(NativeBlock {
            signature: shape.signature(),
            label: expr::label(store, function)?,
            params: params(&shape),
            returns: shape.return_multiplicity,
        });
    }
    natives.sort_by(|a, b| a.signature.cmp(&b.signature).then_with(|| a.label.cmp(&b.label)));

    let mut functions = Vec::new();
    for function in store.all_of_classifier(m3::CONCRETE_FUNCTION_DEFINITION) {
        functions.push(emit_function(store, options, function, Vec::new())?);
        for lambda in expr::lambdas(store, function)? {
            let captures = expr::captures(store, lambda)?;
            functions.push(emit_function(store, options, lambda, captures)?);
        }
    }
    functions.sort_by(|a, b| a.block.label.cmp(&b.block.label));

    debug!(
        natives = natives.len(),
        functions = functions.len(),
        "emitted target source"
    );
    Ok(Emitted { natives, functions })
}

fn params(shape: &FunctionShape) -> Vec<ParamDecl> {
    shape
        .parameters
        .iter()
        .map(|p| ParamDecl {
            name: p.name.clone(),
            multiplicity: p.multiplicity,
        })
        .collect()
}

/// Emit one function or lambda. `captures` become its leading slots.
pub fn emit_function(
    store: &InstanceStore,
    options: &CompileOptions,
    function: NodeId,
    captures: Vec<String>,
) -> Result<EmittedFunction, ExecutionError> {
    let label = expr::label(store, function)?;
    let shape = FunctionShape::of(store, function)?;

    let mut emitter = FunctionEmitter {
        store,
        options,
        code: Vec::new(),
        slots: Vec::new(),
        scopes: vec![BTreeMap::new()],
        calls: BTreeSet::new(),
    };
    for name in captures.iter().chain(shape.parameters.iter().map(|p| &p.name)) {
        emitter.allocate(name);
    }
    let fixed = emitter.slots.len();

    emitter.body(function)?;
    emitter.push(Instr::Ret, None);

    let block = FunctionBlock {
        label,
        captures,
        params: params(&shape),
        returns: shape.return_multiplicity,
        locals: emitter.slots.split_off(fixed),
        code: emitter.code,
    };
    Ok(EmittedFunction {
        text: block.to_string(),
        block,
        calls: emitter.calls,
    })
}

// ---------------------------------------------------------------------------
// Per-function lowering
// ---------------------------------------------------------------------------

struct FunctionEmitter<'s> {
    store: &'s InstanceStore,
    options: &'s CompileOptions,
    code: Vec<Line<String>>,
    /// Name of every slot allocated so far.
    slots: Vec<String>,
    /// Name to slot, innermost inlined body last.
    scopes: Vec<BTreeMap<String, usize>>,
    calls: BTreeSet<String>,
}

impl<'s> FunctionEmitter<'s> {
    fn push(&mut self, instr: Instr<String>, at: Option<SourceInfo>) {
        self.code.push(Line::new(instr, at));
    }

    fn location(&self, node: NodeId) -> Option<SourceInfo> {
        self.store.get(node).and_then(|n| n.source()).cloned()
    }

    /// A fresh slot for `name` in the innermost scope.
    fn allocate(&mut self, name: &str) -> usize {
        let slot = self.slots.len();
        self.slots.push(name.to_string());
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
        slot
    }

    /// Slot a variable reads. Names bound nowhere get a slot that is never
    /// written, so reading it fails at run time as the interpreter would.
    fn lookup(&mut self, name: &str) -> usize {
        if let Some(slot) = self.scopes.iter().rev().find_map(|s| s.get(name)) {
            return *slot;
        }
        let slot = self.slots.len();
        self.slots.push(name.to_string());
        if let Some(scope) = self.scopes.first_mut() {
            scope.insert(name.to_string(), slot);
        }
        slot
    }

    /// Slot a `letFunction` writes: rebinding in the same scope reuses it.
    fn bind(&mut self, name: &str) -> usize {
        match self.scopes.last().and_then(|s| s.get(name)) {
            Some(slot) => *slot,
            None => self.allocate(name),
        }
    }

    /// Leaves the value of the last expression, or an empty sequence.
    fn body(&mut self, function: NodeId) -> Result<(), ExecutionError> {
        let expressions = expr::body(self.store, function)?;
        if expressions.is_empty() {
            self.push(Instr::PushEmpty, None);
        }
        for (i, expression) in expressions.into_iter().enumerate() {
            if i > 0 {
                self.push(Instr::Pop, None);
            }
            self.expression(expression)?;
        }
        Ok(())
    }

    fn expression(&mut self, node: NodeId) -> Result<(), ExecutionError> {
        let at = self.location(node);
        match expr::kind_of(self.store, node)? {
            ExpressionKind::Variable => {
                let name = expr::variable_name(self.store, node)?;
                let slot = self.lookup(&name);
                self.push(Instr::Load(slot), at);
                Ok(())
            }
            ExpressionKind::Call => self.call(node, at),
            ExpressionKind::Instance => self.instance(node, at),
        }
    }

    fn call(&mut self, node: NodeId, at: Option<SourceInfo>) -> Result<(), ExecutionError> {
        let store = self.store;
        let target = expr::callee(store, node)?;
        let arguments = expr::arguments(store, node)?;

        if !expr::is_native(store, target) {
            let label = expr::label(store, target)?;
            for argument in &arguments {
                self.expression(*argument)?;
            }
            self.calls.insert(label.clone());
            self.push(
                Instr::Call {
                    function: label,
                    argc: arguments.len(),
                },
                at,
            );
            return Ok(());
        }

        let signature = expr::signature_of(store, target)?;
        if signature == stdlib::LET {
            let name = expr::let_name(store, node)?;
            let value = arguments
                .get(1)
                .copied()
                .ok_or_else(|| ExecutionError::malformed(node, "letFunction without a value"))?;
            self.push(Instr::PushString(name.clone()), None);
            self.expression(value)?;
            self.push(
                Instr::CallNative {
                    native: signature,
                    argc: 2,
                },
                at,
            );
            self.push(Instr::Dup, None);
            let slot = self.bind(&name);
            self.push(Instr::Store(slot), None);
            return Ok(());
        }

        if signature == stdlib::IF && self.options.inline_if {
            if let Some(branches) = self.inline_branches(&arguments)? {
                return self.inline_if(signature, arguments[0], branches, at);
            }
        }

        for argument in &arguments {
            self.expression(*argument)?;
        }
        self.push(
            Instr::CallNative {
                native: signature,
                argc: arguments.len(),
            },
            at,
        );
        Ok(())
    }

    /// The `(InstanceValue, lambda)` of both branches, when both are literal
    /// zero-parameter lambdas.
    fn inline_branches(&self, arguments: &[NodeId]) -> Result<Option<[(NodeId, NodeId); 2]>, ExecutionError> {
        let [_, then, otherwise] = arguments else {
            return Ok(None);
        };
        let mut branches = [(*then, *then), (*otherwise, *otherwise)];
        for (value, lambda) in branches.iter_mut() {
            if expr::kind_of(self.store, *value)? != ExpressionKind::Instance {
                return Ok(None);
            }
            let items = expr::instance_items(self.store, *value)?;
            let [Item::Lambda(l)] = items.as_slice() else {
                return Ok(None);
            };
            if !FunctionShape::of(self.store, *l)?.parameters.is_empty() {
                return Ok(None);
            }
            *lambda = *l;
        }
        Ok(Some(branches))
    }

    fn inline_if(
        &mut self,
        signature: String,
        test: NodeId,
        branches: [(NodeId, NodeId); 2],
        at: Option<SourceInfo>,
    ) -> Result<(), ExecutionError> {
        self.expression(test)?;
        // Both closures would be built before the test is looked at.
        for (value, lambda) in branches {
            let value_at = self.location(value);
            for name in expr::captures(self.store, lambda)? {
                let slot = self.lookup(&name);
                self.push(Instr::Check(slot), value_at.clone());
            }
        }

        let test_if = self.code.len();
        self.push(
            Instr::TestIf {
                native: signature,
                target: 0,
            },
            at.clone(),
        );
        self.inline_body(branches[0].1, &at)?;
        let jump = self.code.len();
        self.push(Instr::Jump(0), None);
        let otherwise = self.code.len();
        self.inline_body(branches[1].1, &at)?;
        let end = self.code.len();

        if let Instr::TestIf { target, .. } = &mut self.code[test_if].instr {
            *target = otherwise;
        }
        self.code[jump].instr = Instr::Jump(end);
        Ok(())
    }

    fn inline_body(&mut self, lambda: NodeId, at: &Option<SourceInfo>) -> Result<(), ExecutionError> {
        let label = expr::label(self.store, lambda)?;
        self.calls.insert(label.clone());
        self.push(Instr::Enter { lambda: label.clone() }, at.clone());
        self.scopes.push(BTreeMap::new());
        let result = self.body(lambda);
        self.scopes.pop();
        result?;
        self.push(Instr::Leave { lambda: label }, at.clone());
        Ok(())
    }

    fn instance(&mut self, node: NodeId, at: Option<SourceInfo>) -> Result<(), ExecutionError> {
        let store = self.store;
        let items = expr::instance_items(store, node)?;
        if items.is_empty() {
            self.push(Instr::PushEmpty, at);
            return Ok(());
        }
        let count = items.len();
        for item in items {
            match item {
                Item::Literal(literal) => self.push(literal_instr(literal), at.clone()),
                Item::Lambda(lambda) => {
                    let label = expr::label(store, lambda)?;
                    let captures = expr::captures(store, lambda)?;
                    for name in &captures {
                        let slot = self.lookup(name);
                        self.push(Instr::Load(slot), at.clone());
                    }
                    self.calls.insert(label.clone());
                    self.push(
                        Instr::Closure {
                            function: label,
                            captures: captures.len(),
                        },
                        at.clone(),
                    );
                }
                Item::Function(function) => {
                    let label = expr::label(store, function)?;
                    if !expr::is_native(store, function) {
                        self.calls.insert(label.clone());
                    }
                    self.push(
                        Instr::Closure {
                            function: label,
                            captures: 0,
                        },
                        at.clone(),
                    );
                }
                Item::Expression(expression) => self.expression(expression)?,
            }
        }
        if count > 1 {
            self.push(Instr::Concat(count), at);
        }
        Ok(())
    }
}

fn literal_instr(literal: &Literal) -> Instr<String> {
    match literal {
        Literal::Boolean(b) => Instr::PushBool(*b),
        Literal::Integer(i) => Instr::PushInt(*i),
        Literal::Float(x) => Instr::PushFloat(*x),
        Literal::Decimal(d) => Instr::PushDecimal(d.clone()),
        Literal::String(s) => Instr::PushString(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use metagraph_compiler::fragment::{self, call, function};
    use metagraph_compiler::{IncrementalCompiler, UnitSource};

    use super::*;

    fn compile(unit: UnitSource) -> IncrementalCompiler {
        let mut c = IncrementalCompiler::new().unwrap();
        c.add_or_update(unit).unwrap();
        c
    }

    fn choose() -> UnitSource {
        UnitSource::new("emit.pure").element(function(
            "test",
            "choose",
            &[("flag", "Boolean", "1")],
            "Integer",
            "1",
            vec![
                call("letFunction", vec![fragment::string("y"), fragment::integer(2)]),
                call(
                    "if",
                    vec![
                        fragment::var("flag"),
                        fragment::lambda(&[], vec![fragment::var("y")]),
                        fragment::lambda(&[], vec![fragment::integer(0)]),
                    ],
                ),
            ],
        ))
    }

    fn code(emitted: &Emitted, label: &str) -> Vec<Instr<String>> {
        emitted
            .function(label)
            .unwrap()
            .block
            .code
            .iter()
            .map(|l| l.instr.clone())
            .collect()
    }

    #[test]
    fn natives_are_declared_in_signature_order() {
        let c = compile(choose());
        let emitted = emit(c.store(), &CompileOptions::default()).unwrap();
        let signatures: Vec<&str> = emitted.natives.iter().map(|n| n.signature.as_str()).collect();
        let mut sorted = signatures.clone();
        sorted.sort();
        assert_eq!(signatures, sorted);
        assert_eq!(signatures.len(), stdlib::ALL.len());
    }

    #[test]
    fn lambdas_are_lifted_and_sorted() {
        let c = compile(choose());
        let emitted = emit(c.store(), &CompileOptions::default()).unwrap();
        let labels: Vec<&str> = emitted.functions.iter().map(|f| f.block.label.as_str()).collect();
        assert_eq!(
            labels,
            ["test::choose", "test::choose$lambda0", "test::choose$lambda1"]
        );
        let then = emitted.function("test::choose$lambda0").unwrap();
        assert_eq!(then.block.captures, ["y"]);
    }

    #[test]
    fn if_with_literal_branches_is_inlined() {
        let c = compile(choose());
        let emitted = emit(c.store(), &CompileOptions::default()).unwrap();
        let code = code(&emitted, "test::choose");
        // flag is slot 0, y is slot 1
        assert_eq!(
            code,
            vec![
                Instr::PushString("y".into()),
                Instr::PushInt(2),
                Instr::CallNative { native: stdlib::LET.into(), argc: 2 },
                Instr::Dup,
                Instr::Store(1),
                Instr::Pop,
                Instr::Load(0),
                Instr::Check(1),
                Instr::TestIf { native: stdlib::IF.into(), target: 13 },
                Instr::Enter { lambda: "test::choose$lambda0".into() },
                Instr::Load(1),
                Instr::Leave { lambda: "test::choose$lambda0".into() },
                Instr::Jump(16),
                Instr::Enter { lambda: "test::choose$lambda1".into() },
                Instr::PushInt(0),
                Instr::Leave { lambda: "test::choose$lambda1".into() },
                Instr::Ret,
            ]
        );
    }

    #[test]
    fn without_inlining_if_builds_closures() {
        let c = compile(choose());
        let options = CompileOptions {
            inline_if: false,
            ..CompileOptions::default()
        };
        let emitted = emit(c.store(), &options).unwrap();
        let code = code(&emitted, "test::choose");
        assert!(code.contains(&Instr::Closure {
            function: "test::choose$lambda0".into(),
            captures: 1,
        }));
        assert!(code.contains(&Instr::CallNative { native: stdlib::IF.into(), argc: 3 }));
    }

    #[test]
    fn emission_is_byte_identical() {
        let first = emit(compile(choose()).store(), &CompileOptions::default()).unwrap();
        let second = emit(compile(choose()).store(), &CompileOptions::default()).unwrap();
        assert_eq!(first.source(), second.source());
    }

    #[test]
    fn calls_record_user_functions_only() {
        let unit = UnitSource::new("emit.pure")
            .element(function("test", "g", &[], "Integer", "1", vec![fragment::integer(1)]))
            .element(function(
                "test",
                "f",
                &[],
                "Boolean",
                "1",
                vec![call("not", vec![call("eq", vec![call("g", vec![]), fragment::integer(1)])])],
            ));
        let c = compile(unit);
        let emitted = emit(c.store(), &CompileOptions::default()).unwrap();
        let f = emitted.function("test::f").unwrap();
        assert_eq!(f.calls.iter().collect::<Vec<_>>(), ["test::g"]);
    }
}
