//! Native function table, keyed by signature.
//!
//! A `NativeFunction` node in the graph carries only a declaration; the code
//! behind it is looked up here by the node's signature text. Both backends
//! share one table, so a native behaves the same whichever backend calls it.

pub mod stdlib;

use std::collections::BTreeMap;

use metagraph_core::m3;
use metagraph_core::{FunctionShape, InstanceStore};

use crate::backend::FunctionCaller;
use crate::context::ExecutionContext;
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::value::Sequence;

/// A native implementation. Arguments arrive one sequence per declared
/// parameter, already checked against the declared multiplicities.
pub type NativeFn = fn(
    &mut dyn FunctionCaller,
    &mut ExecutionContext,
    Vec<Sequence>,
) -> Result<Sequence, ExecutionError>;

#[derive(Clone, Default)]
pub struct NativeRegistry {
    natives: BTreeMap<String, NativeFn>,
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.natives.keys()).finish()
    }
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard library.
    pub fn standard() -> Result<Self, ExecutionError> {
        let mut registry = NativeRegistry::new();
        for (signature, native) in stdlib::implementations() {
            registry.register(signature, native)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, signature: &str, native: NativeFn) -> Result<(), ExecutionError> {
        if self.natives.contains_key(signature) {
            return Err(ExecutionErrorKind::DuplicateNative {
                signature: signature.to_string(),
            }
            .into());
        }
        self.natives.insert(signature.to_string(), native);
        Ok(())
    }

    pub fn get(&self, signature: &str) -> Option<NativeFn> {
        self.natives.get(signature).copied()
    }

    pub fn lookup(&self, signature: &str) -> Result<NativeFn, ExecutionError> {
        self.get(signature).ok_or_else(|| {
            ExecutionErrorKind::MissingNative {
                signature: signature.to_string(),
            }
            .into()
        })
    }

    pub fn remove(&mut self, signature: &str) -> Option<NativeFn> {
        self.natives.remove(signature)
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.natives.keys().map(String::as_str)
    }

    /// Fail with `MissingNative` for the first `NativeFunction` node, in
    /// signature order, that has no implementation.
    pub fn check_complete(&self, store: &InstanceStore) -> Result<(), ExecutionError> {
        let mut declared = Vec::new();
        for function in store.all_of_classifier(m3::NATIVE_FUNCTION) {
            declared.push(FunctionShape::of(store, function)?.signature());
        }
        declared.sort();
        match declared.into_iter().find(|s| !self.natives.contains_key(s)) {
            Some(signature) => Err(ExecutionErrorKind::MissingNative { signature }.into()),
            None => Ok(()),
        }
    }
}
