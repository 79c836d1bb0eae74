//! Links parsed target source into a runnable [`Program`].
//!
//! Every label gets a slot the first time it is defined or referenced, and
//! keeps it for the life of the program. Reloading a function replaces the
//! entry in its slot; removing one empties the slot. Code that was loaded
//! earlier therefore never needs re-resolving just because something it
//! does not call was added or removed.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use metagraph_exec::NativeRegistry;

use crate::error::CodegenError;
use crate::program::{self, Block, FunctionBlock, Instr, Line, RefKind};
use crate::runtime::{self, NativeEntry};

#[derive(Debug, Clone)]
pub enum Entry {
    Native(NativeEntry),
    Function(FunctionBlock<usize>),
}

impl Entry {
    pub fn label(&self) -> &str {
        match self {
            Entry::Native(native) => &native.decl.label,
            Entry::Function(function) => &function.label,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    entries: IndexMap<String, Option<Entry>>,
    natives: HashMap<String, usize>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and link a whole program. Natives are bound as their
    /// declarations are read, so a signature the table lacks fails here.
    pub fn load(source: &str, natives: &NativeRegistry) -> Result<Program, CodegenError> {
        let mut program = Program::new();
        for block in program::parse(source)? {
            program.load_block(block, natives)?;
        }
        program.check_links()?;
        Ok(program)
    }

    /// Parse one or more blocks into this program, replacing any entries
    /// with the same labels.
    pub fn load_source(&mut self, source: &str, natives: &NativeRegistry) -> Result<(), CodegenError> {
        for block in program::parse(source)? {
            self.load_block(block, natives)?;
        }
        Ok(())
    }

    pub fn load_block(&mut self, block: Block, natives: &NativeRegistry) -> Result<usize, CodegenError> {
        match block {
            Block::Native(decl) => {
                let signature = decl.signature.clone();
                let entry = runtime::bind(natives, decl)?;
                let index = self.slot(&entry.decl.label);
                self.natives.insert(signature, index);
                self.entries[index] = Some(Entry::Native(entry));
                Ok(index)
            }
            Block::Function(function) => {
                let linked = self.link(function)?;
                debug!(function = %linked.label, instructions = linked.code.len(), "loaded");
                let index = self.slot(&linked.label);
                self.entries[index] = Some(Entry::Function(linked));
                Ok(index)
            }
        }
    }

    fn slot(&mut self, label: &str) -> usize {
        match self.entries.get_index_of(label) {
            Some(index) => index,
            None => self.entries.insert_full(label.to_string(), None).0,
        }
    }

    fn link(&mut self, function: FunctionBlock) -> Result<FunctionBlock<usize>, CodegenError> {
        let len = function.code.len();
        let slots = function.slot_count();
        let label = function.label.clone();
        let mut code = Vec::with_capacity(len);
        for Line { instr, at } in function.code {
            match &instr {
                Instr::Load(slot) | Instr::Check(slot) | Instr::Store(slot) if *slot >= slots => {
                    return Err(CodegenError::Load(format!("{label}: slot {slot} out of range")));
                }
                Instr::Jump(target) | Instr::TestIf { target, .. } if *target >= len => {
                    return Err(CodegenError::Load(format!("{label}: jump target {target} out of range")));
                }
                _ => {}
            }
            let instr = instr.map_refs(|name, kind| match kind {
                RefKind::Function => Ok(self.slot(&name)),
                RefKind::Native => self.natives.get(&name).copied().ok_or_else(|| {
                    CodegenError::Load(format!("{label}: native '{name}' is not declared"))
                }),
            })?;
            code.push(Line::new(instr, at));
        }
        Ok(FunctionBlock {
            label: function.label,
            captures: function.captures,
            params: function.params,
            returns: function.returns,
            locals: function.locals,
            code,
        })
    }

    /// Empty the slot of a label that is no longer defined.
    pub fn remove(&mut self, label: &str) -> bool {
        match self.entries.get_mut(label) {
            Some(entry) => entry.take().is_some(),
            None => false,
        }
    }

    /// Fail if any loaded function refers to an empty slot.
    pub fn check_links(&self) -> Result<(), CodegenError> {
        for entry in self.entries.values().flatten() {
            let Entry::Function(function) = entry else {
                continue;
            };
            for line in &function.code {
                if let Some(&target) = line.instr.function_ref() {
                    if self.entry(target).is_none() {
                        let missing = self
                            .entries
                            .get_index(target)
                            .map(|(label, _)| label.as_str())
                            .unwrap_or("?");
                        return Err(CodegenError::Load(format!(
                            "{} refers to undefined function '{missing}'",
                            function.label
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get_index(index).and_then(|(_, entry)| entry.as_ref())
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        let index = self.entries.get_index_of(label)?;
        self.entry(index).map(|_| index)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    /// Labels of every loaded entry, in slot order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_some())
            .map(|(label, _)| label.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use metagraph_core::stdlib;
    use metagraph_exec::ExecutionErrorKind;

    use super::*;

    const NOT: &str = r#"
native "not_Boolean_1__Boolean_1_" "meta::pure::functions::boolean::not"
  param "value" 1
  returns 1
end
"#;

    fn natives() -> NativeRegistry {
        NativeRegistry::standard().unwrap()
    }

    #[test]
    fn loads_and_links() {
        let source = format!(
            "{NOT}\nfunction \"test::f\"\n  returns 1\n  code\n    call \"test::g\" 0\n    call.native \"{}\" 1\n    ret\nend\nfunction \"test::g\"\n  returns 1\n  code\n    push.bool true\n    ret\nend\n",
            stdlib::NOT
        );
        let program = Program::load(&source, &natives()).unwrap();
        assert_eq!(program.len(), 3);
        assert!(program.contains("test::f"));
        assert!(program.contains("meta::pure::functions::boolean::not"));
    }

    #[test]
    fn missing_native_fails_at_load() {
        let mut registry = natives();
        registry.remove(stdlib::NOT);
        let err = Program::load(NOT, &registry).unwrap_err();
        match err {
            CodegenError::Execution(e) => {
                assert!(matches!(e.kind, ExecutionErrorKind::MissingNative { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dangling_call_is_a_link_error() {
        let source = "function \"test::f\"\n  code\n    call \"test::missing\" 0\n    ret\nend\n";
        let err = Program::load(source, &natives()).unwrap_err();
        assert!(matches!(err, CodegenError::Load(ref m) if m.contains("test::missing")));
    }

    #[test]
    fn undeclared_native_is_rejected() {
        let source = "function \"test::f\"\n  code\n    call.native \"nope\" 0\n    ret\nend\n";
        assert!(matches!(
            Program::load(source, &natives()),
            Err(CodegenError::Load(_))
        ));
    }

    #[test]
    fn out_of_range_slots_and_jumps_are_rejected() {
        let source = "function \"test::f\"\n  code\n    load 0\n    ret\nend\n";
        assert!(Program::load(source, &natives()).is_err());
        let source = "function \"test::f\"\n  code\n    jump 7\n    ret\nend\n";
        assert!(Program::load(source, &natives()).is_err());
    }

    #[test]
    fn slots_survive_removal_and_reload() {
        let f = "function \"test::f\"\n  code\n    push.empty\n    ret\nend\n";
        let mut program = Program::new();
        program.load_source(f, &natives()).unwrap();
        let index = program.index_of("test::f").unwrap();
        assert!(program.remove("test::f"));
        assert!(program.index_of("test::f").is_none());
        program.load_source(f, &natives()).unwrap();
        assert_eq!(program.index_of("test::f"), Some(index));
    }
}
