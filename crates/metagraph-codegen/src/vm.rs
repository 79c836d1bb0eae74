//! The stack machine that runs a loaded [`Program`].
//!
//! Each invocation gets its own operand stack and local slots; calls
//! recurse on the host stack the way the interpreter's do, so both
//! backends hit `DepthLimit` at the same call. An inlined lambda body runs
//! in its caller's frame between `enter` and `leave`, which count towards
//! the depth and the call budget exactly like the call they replace.
//!
//! When an instruction fails, its location goes on the error's stack,
//! followed by the locations of any inlined bodies it sits in, innermost
//! first; the calling instruction then adds its own.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use metagraph_core::SourceInfo;
use metagraph_exec::{
    ExecutionContext, ExecutionError, ExecutionErrorKind, FunctionCaller, FunctionTarget, Sequence,
    Value,
};

use crate::loader::{Entry, Program};
use crate::program::{FunctionBlock, Instr, Line};
use crate::runtime;

pub struct Vm<'p> {
    program: &'p Program,
    max_call_depth: usize,
    depth: usize,
}

/// One activation of a compiled function.
struct Frame<'p> {
    function: &'p FunctionBlock<usize>,
    locals: Vec<Option<Sequence>>,
    stack: Vec<Sequence>,
    inline: Vec<Option<&'p SourceInfo>>,
    pc: usize,
}

impl<'p> Frame<'p> {
    fn pop(&mut self) -> Result<Sequence, ExecutionError> {
        self.stack
            .pop()
            .ok_or_else(|| runtime::corrupt(&self.function.label, "operand stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Sequence>, ExecutionError> {
        let Some(at) = self.stack.len().checked_sub(n) else {
            return Err(runtime::corrupt(&self.function.label, "operand stack underflow"));
        };
        Ok(self.stack.split_off(at))
    }

    fn local(&self, slot: usize) -> Result<&Sequence, ExecutionError> {
        match self.locals.get(slot) {
            Some(Some(value)) => Ok(value),
            _ => {
                let name = self.function.slot_names().nth(slot).unwrap_or("?");
                Err(runtime::unbound(name))
            }
        }
    }
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p Program, max_call_depth: usize) -> Self {
        Vm {
            program,
            max_call_depth,
            depth: 0,
        }
    }

    /// Run the function or native defined under `label`.
    pub fn execute(
        &mut self,
        label: &str,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        let index = self.program.index_of(label).ok_or_else(|| {
            ExecutionError::from(ExecutionErrorKind::UnknownFunction {
                path: label.to_string(),
            })
        })?;
        self.call(index, &BTreeMap::new(), args, cx)
    }

    fn call(
        &mut self,
        index: usize,
        captures: &BTreeMap<String, Sequence>,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        cx.charge_call()?;
        let program = self.program;
        let entry = program
            .entry(index)
            .ok_or_else(|| runtime::corrupt("program", &format!("slot {index} is empty")))?;

        match entry {
            Entry::Native(native) => {
                let decl = &native.decl;
                runtime::check_arguments(&decl.label, &decl.params, &args)?;
                debug!(signature = %decl.signature, "native call");
                let result = (native.native)(self, cx, args)?;
                runtime::check_return(&decl.label, &decl.returns, &result)?;
                Ok(result)
            }
            Entry::Function(function) => {
                runtime::check_arguments(&function.label, &function.params, &args)?;
                if self.depth >= self.max_call_depth {
                    return Err(ExecutionErrorKind::DepthLimit {
                        limit: self.max_call_depth,
                    }
                    .into());
                }
                trace!(function = %function.label, depth = self.depth, "call");
                let mut locals: Vec<Option<Sequence>> = Vec::with_capacity(function.slot_count());
                locals.extend(function.captures.iter().map(|name| captures.get(name).cloned()));
                locals.extend(args.into_iter().map(Some));
                locals.resize(function.slot_count(), None);

                let frame = Frame {
                    function,
                    locals,
                    stack: Vec::new(),
                    inline: Vec::new(),
                    pc: 0,
                };
                self.depth += 1;
                let result = self.run(frame, cx);
                self.depth -= 1;
                let result = result?;
                runtime::check_return(&function.label, &function.returns, &result)?;
                Ok(result)
            }
        }
    }

    fn run(&mut self, mut frame: Frame<'p>, cx: &mut ExecutionContext) -> Result<Sequence, ExecutionError> {
        loop {
            let function = frame.function;
            let Some(line) = function.code.get(frame.pc) else {
                return Err(runtime::corrupt(&function.label, "ran past the last instruction"));
            };
            frame.pc += 1;
            match self.step(&mut frame, line, cx) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(err) => {
                    self.depth -= frame.inline.len();
                    let mut err = err.at(line.at.as_ref());
                    for at in frame.inline.iter().rev() {
                        err = err.at(*at);
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Execute one instruction; `Some` is the frame's result.
    fn step(
        &mut self,
        frame: &mut Frame<'p>,
        line: &'p Line<usize>,
        cx: &mut ExecutionContext,
    ) -> Result<Option<Sequence>, ExecutionError> {
        match &line.instr {
            Instr::PushBool(b) => frame.stack.push(Sequence::one(*b)),
            Instr::PushInt(i) => frame.stack.push(Sequence::one(*i)),
            Instr::PushFloat(x) => frame.stack.push(Sequence::one(*x)),
            Instr::PushDecimal(d) => frame.stack.push(Sequence::one(d.clone())),
            Instr::PushString(s) => frame.stack.push(Sequence::one(s.as_str())),
            Instr::PushEmpty => frame.stack.push(Sequence::empty()),
            Instr::Concat(n) => {
                let parts = frame.pop_n(*n)?;
                frame.stack.push(runtime::concat(parts));
            }
            Instr::Load(slot) => {
                let value = frame.local(*slot)?.clone();
                frame.stack.push(value);
            }
            Instr::Check(slot) => {
                frame.local(*slot)?;
            }
            Instr::Store(slot) => {
                let value = frame.pop()?;
                if let Some(local) = frame.locals.get_mut(*slot) {
                    *local = Some(value);
                }
            }
            Instr::Dup => {
                let top = frame
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| runtime::corrupt(&frame.function.label, "operand stack underflow"))?;
                frame.stack.push(top);
            }
            Instr::Pop => {
                frame.pop()?;
            }
            Instr::Call { function: index, argc } | Instr::CallNative { native: index, argc } => {
                let args = frame.pop_n(*argc)?;
                let result = self.call(*index, &BTreeMap::new(), args, cx)?;
                frame.stack.push(result);
            }
            Instr::Closure { function: index, captures } => {
                let values = frame.pop_n(*captures)?;
                let value = match self.program.entry(*index) {
                    Some(Entry::Function(target)) => {
                        runtime::closure(&target.label, *index, &target.captures, values)
                    }
                    Some(Entry::Native(native)) => runtime::closure(&native.decl.label, *index, &[], values),
                    None => return Err(runtime::corrupt(&frame.function.label, "closure over an empty slot")),
                };
                frame.stack.push(Sequence::one(value));
            }
            Instr::TestIf { native, target } => {
                let test = frame.pop()?;
                cx.charge_call()?;
                let Some(Entry::Native(decl)) = self.program.entry(*native) else {
                    return Err(runtime::corrupt(&frame.function.label, "test.if without a native"));
                };
                if !runtime::branch_test(&decl.decl, test)? {
                    frame.pc = *target;
                }
            }
            Instr::Enter { lambda: _ } => {
                cx.charge_call()?;
                if self.depth >= self.max_call_depth {
                    return Err(ExecutionErrorKind::DepthLimit {
                        limit: self.max_call_depth,
                    }
                    .into());
                }
                frame.inline.push(line.at.as_ref());
                self.depth += 1;
            }
            Instr::Leave { lambda } => {
                frame.inline.pop();
                self.depth -= 1;
                let Some(Entry::Function(function)) = self.program.entry(*lambda) else {
                    return Err(runtime::corrupt(&frame.function.label, "leave without a lambda"));
                };
                let result = frame
                    .stack
                    .last()
                    .ok_or_else(|| runtime::corrupt(&frame.function.label, "operand stack underflow"))?;
                runtime::check_return(&function.label, &function.returns, result)?;
            }
            Instr::Jump(target) => frame.pc = *target,
            Instr::Ret => return frame.pop().map(Some),
        }
        Ok(None)
    }
}

impl FunctionCaller for Vm<'_> {
    fn call_value(
        &mut self,
        function: &Value,
        args: Vec<Sequence>,
        cx: &mut ExecutionContext,
    ) -> Result<Sequence, ExecutionError> {
        match function {
            Value::Function(closure) => match closure.target {
                FunctionTarget::Compiled(index) => self.call(index, &closure.captures, args, cx),
                FunctionTarget::Node(_) => Err(ExecutionError::type_mismatch(
                    "call",
                    "compiled function",
                    "interpreted function",
                )),
            },
            other => Err(ExecutionError::type_mismatch("call", "Function", other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use metagraph_core::stdlib;
    use metagraph_exec::NativeRegistry;

    use super::*;

    fn program(source: &str) -> Program {
        Program::load(source, &NativeRegistry::standard().unwrap()).unwrap()
    }

    fn run(program: &Program, label: &str, args: Vec<Sequence>) -> Result<Sequence, ExecutionError> {
        Vm::new(program, 16).execute(label, args, &mut ExecutionContext::new())
    }

    fn plus() -> String {
        format!(
            "native \"{}\" \"meta::pure::functions::math::plus\"\n  param \"values\" *\n  returns 1\nend\n",
            stdlib::PLUS
        )
    }

    #[test]
    fn arithmetic_on_the_stack() {
        let source = format!(
            "{}function \"test::inc\"\n  param \"x\" 1\n  returns 1\n  code\n    load 0\n    push.int 1\n    concat 2\n    call.native \"{}\" 1\n    ret\nend\n",
            plus(),
            stdlib::PLUS
        );
        let p = program(&source);
        let r = run(&p, "test::inc", vec![Sequence::one(41i64)]).unwrap();
        assert_eq!(r, Sequence::one(42i64));
    }

    #[test]
    fn arguments_and_results_are_checked() {
        let source = "function \"test::id\"\n  param \"x\" 1\n  returns 0..1\n  code\n    load 0\n    ret\nend\n";
        let p = program(source);
        let err = run(&p, "test::id", vec![]).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::Arity { .. }));
        let err = run(&p, "test::id", vec![Sequence::empty()]).unwrap_err();
        assert!(err.to_string().contains("parameter 'x' of test::id"));
    }

    #[test]
    fn unset_slots_are_unbound_variables() {
        let source = "function \"test::f\"\n  local \"y\"\n  code\n    load 0 at \"v.pure\" 3 1 3 2\n    ret\nend\n";
        let p = program(source);
        let err = run(&p, "test::f", vec![]).unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::UnboundVariable { name: "y".into() });
        assert_eq!(err.stack, vec![SourceInfo::new("v.pure", 3, 1, 3, 2)]);
    }

    #[test]
    fn recursion_hits_the_depth_limit() {
        let source = "function \"test::loop\"\n  code\n    call \"test::loop\" 0\n    ret\nend\n";
        let p = program(source);
        let err = run(&p, "test::loop", vec![]).unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::DepthLimit { limit: 16 });
    }

    #[test]
    fn unknown_labels() {
        let p = program("");
        let err = run(&p, "test::nope", vec![]).unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::UnknownFunction { .. }));
    }
}
