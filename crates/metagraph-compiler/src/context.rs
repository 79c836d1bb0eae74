//! Compilation context: the symbol indices of a compiler session.
//!
//! The context never owns nodes; it maps names to [`NodeId`]s in the store.
//! It is mutated only while a delta is open, and journals every mutation so
//! that a failed delta can restore it together with the store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use metagraph_core::{NodeId, UnitId};

use crate::matcher::PassKind;

#[derive(Debug, Clone)]
enum ContextEntry {
    Element {
        path: String,
        previous: Option<NodeId>,
    },
    Functions {
        name: String,
        previous: Option<BTreeSet<NodeId>>,
    },
    Imports {
        unit: UnitId,
        previous: Option<Vec<String>>,
    },
    Counter {
        pass: PassKind,
        previous: u64,
    },
}

#[derive(Debug, Default)]
pub struct CompilationContext {
    /// Qualified name -> element. The first registration of a name wins.
    elements: BTreeMap<String, NodeId>,
    /// Function simple name -> every function with that name.
    functions: BTreeMap<String, BTreeSet<NodeId>>,
    imports: HashMap<UnitId, Vec<String>>,
    counters: HashMap<PassKind, u64>,
    /// Classifiers on the current generalization walk.
    in_flight: HashSet<NodeId>,
    journal: Option<Vec<ContextEntry>>,
}

impl CompilationContext {
    pub fn new() -> Self {
        CompilationContext::default()
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.elements.get(path).copied()
    }

    /// Functions with the given simple name, ascending by id.
    pub fn functions_named(&self, name: &str) -> Vec<NodeId> {
        self.functions
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn imports_of(&self, unit: &UnitId) -> &[String] {
        self.imports.get(unit).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pass_count(&self, pass: PassKind) -> u64 {
        self.counters.get(&pass).copied().unwrap_or(0)
    }

    /// Registered elements in path order.
    pub fn elements(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.elements.iter().map(|(p, id)| (p.as_str(), *id))
    }

    pub fn functions(&self) -> impl Iterator<Item = (&str, &BTreeSet<NodeId>)> {
        self.functions.iter().map(|(n, set)| (n.as_str(), set))
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Register an element under its qualified name. Returns `false` when the
    /// name already belongs to another element; the clash is left in the
    /// graph for Validate to report.
    pub fn register_element(&mut self, path: &str, element: NodeId) -> bool {
        match self.elements.get(path) {
            Some(existing) => *existing == element,
            None => {
                self.elements.insert(path.to_string(), element);
                self.record(ContextEntry::Element {
                    path: path.to_string(),
                    previous: None,
                });
                true
            }
        }
    }

    /// Remove `path` if it is registered to `element`.
    pub fn unregister_element(&mut self, path: &str, element: NodeId) {
        if self.elements.get(path) == Some(&element) {
            self.elements.remove(path);
            self.record(ContextEntry::Element {
                path: path.to_string(),
                previous: Some(element),
            });
        }
    }

    /// Drop every name registered to any of `nodes`.
    pub fn unregister_all(&mut self, nodes: &BTreeSet<NodeId>) {
        let paths: Vec<(String, NodeId)> = self
            .elements
            .iter()
            .filter(|(_, id)| nodes.contains(id))
            .map(|(p, id)| (p.clone(), *id))
            .collect();
        for (path, id) in paths {
            self.unregister_element(&path, id);
        }
        let names: Vec<String> = self
            .functions
            .iter()
            .filter(|(_, set)| set.iter().any(|f| nodes.contains(f)))
            .map(|(n, _)| n.clone())
            .collect();
        for name in names {
            let doomed: Vec<NodeId> = self
                .functions_named(&name)
                .into_iter()
                .filter(|f| nodes.contains(f))
                .collect();
            for function in doomed {
                self.unregister_function(&name, function);
            }
        }
    }

    pub fn register_function(&mut self, name: &str, function: NodeId) {
        let previous = self.functions.get(name).cloned();
        if previous.as_ref().is_some_and(|set| set.contains(&function)) {
            return;
        }
        self.functions
            .entry(name.to_string())
            .or_default()
            .insert(function);
        self.record(ContextEntry::Functions {
            name: name.to_string(),
            previous,
        });
    }

    pub fn unregister_function(&mut self, name: &str, function: NodeId) {
        let Some(set) = self.functions.get_mut(name) else {
            return;
        };
        let previous = set.clone();
        if !set.remove(&function) {
            return;
        }
        if set.is_empty() {
            self.functions.remove(name);
        }
        self.record(ContextEntry::Functions {
            name: name.to_string(),
            previous: Some(previous),
        });
    }

    pub fn set_imports(&mut self, unit: &UnitId, imports: Vec<String>) {
        let previous = self.imports.insert(unit.clone(), imports);
        self.record(ContextEntry::Imports {
            unit: unit.clone(),
            previous,
        });
    }

    pub fn remove_imports(&mut self, unit: &UnitId) {
        if let Some(previous) = self.imports.remove(unit) {
            self.record(ContextEntry::Imports {
                unit: unit.clone(),
                previous: Some(previous),
            });
        }
    }

    pub fn count_pass(&mut self, pass: PassKind) {
        let counter = self.counters.entry(pass).or_insert(0);
        let previous = *counter;
        *counter += 1;
        self.record(ContextEntry::Counter { pass, previous });
    }

    /// Mark a classifier as being on the current generalization walk.
    /// Returns `false` if it already was, i.e. the walk found a cycle.
    pub fn enter(&mut self, classifier: NodeId) -> bool {
        self.in_flight.insert(classifier)
    }

    pub fn leave(&mut self, classifier: NodeId) {
        self.in_flight.remove(&classifier);
    }

    // -----------------------------------------------------------------------
    // Journal
    // -----------------------------------------------------------------------

    pub fn begin(&mut self) {
        self.journal = Some(Vec::new());
    }

    pub fn commit(&mut self) {
        self.journal = None;
        self.in_flight.clear();
    }

    /// Undo every mutation since [`begin`](Self::begin).
    pub fn rollback(&mut self) {
        self.in_flight.clear();
        let Some(entries) = self.journal.take() else {
            return;
        };
        for entry in entries.into_iter().rev() {
            match entry {
                ContextEntry::Element { path, previous } => match previous {
                    Some(id) => {
                        self.elements.insert(path, id);
                    }
                    None => {
                        self.elements.remove(&path);
                    }
                },
                ContextEntry::Functions { name, previous } => match previous {
                    Some(set) => {
                        self.functions.insert(name, set);
                    }
                    None => {
                        self.functions.remove(&name);
                    }
                },
                ContextEntry::Imports { unit, previous } => match previous {
                    Some(imports) => {
                        self.imports.insert(unit, imports);
                    }
                    None => {
                        self.imports.remove(&unit);
                    }
                },
                ContextEntry::Counter { pass, previous } => {
                    self.counters.insert(pass, previous);
                }
            }
        }
    }

    fn record(&mut self, entry: ContextEntry) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(entry);
        }
    }
}
