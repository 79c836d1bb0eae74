//! Matcher/walker dispatch.
//!
//! Per-classifier compiler behavior lives in [`MatchHandler`]s contributed by
//! [`Extension`]s, keyed by `(classifier path, pass)`. Dispatch walks the
//! node's classifier linearization and runs the first handler it finds, so a
//! handler registered for a supertype covers every subtype that has none of
//! its own. A node with no matching handler gets only the pass's generic
//! step.
//!
//! # Architecture
//!
//! - [`MatcherRegistry`] is built once from the extensions and is immutable
//!   afterwards; duplicate keys are rejected at construction.
//! - [`PassContext`] bundles the mutable compiler state a handler may touch.
//! - [`MatchState`] is pass-local: the visited map driving the
//!   `NotVisited -> InProgress -> Done` machine, the generic step, and the
//!   Navigate result slot. Re-entering a node that is in progress or done is
//!   a silent no-op, which makes every pass safe on cyclic graphs.
//! - [`full_match`] follows containment and resolved references alike.
//!   References are followed only to user nodes whose top-level element is
//!   one of the pass's roots, so a pass never re-walks committed units.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use metagraph_core::m3::props;
use metagraph_core::{ClassifierPath, FactoryProvider, InstanceStore, NodeId};

use crate::context::CompilationContext;
use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PassKind {
    Bind,
    Unbind,
    Validate,
    Navigate,
    Prune,
}

/// What the walker does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    SkipChildren,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisitState {
    #[default]
    NotVisited,
    InProgress,
    Done,
}

/// Graph-level behavior a pass applies to every node before its handler.
pub type GenericStep =
    fn(NodeId, &mut PassContext<'_>, &mut MatchState) -> Result<(), CompileError>;

/// Per-classifier behavior for one pass.
pub trait MatchHandler: Send + Sync {
    fn classifier(&self) -> &str;
    fn pass(&self) -> PassKind;
    fn invoke(
        &self,
        node: NodeId,
        cx: &mut PassContext<'_>,
        state: &mut MatchState,
    ) -> Result<Flow, CompileError>;
}

/// A language extension: factories for its classifiers plus handlers.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn factories(&self) -> Vec<Box<dyn FactoryProvider>> {
        Vec::new()
    }

    fn handlers(&self) -> Vec<Arc<dyn MatchHandler>>;
}

/// Mutable compiler state visible to handlers during a pass.
pub struct PassContext<'a> {
    pub store: &'a mut InstanceStore,
    pub context: &'a mut CompilationContext,
    pub matchers: &'a MatcherRegistry,
    /// Nodes being evicted by the current delta, during Unbind.
    pub evicted: Option<&'a BTreeSet<NodeId>>,
}

impl PassContext<'_> {
    pub fn is_evicted(&self, node: NodeId) -> bool {
        self.evicted.is_some_and(|e| e.contains(&node))
    }
}

pub struct MatchState {
    pass: PassKind,
    visited: HashMap<NodeId, VisitState>,
    generic: Option<GenericStep>,
    /// Top-level elements references may lead into; `None` follows any user node.
    roots: Option<BTreeSet<NodeId>>,
    /// Element produced by the Navigate pass.
    pub found: Option<NodeId>,
    /// Findings collected by passes that report everything (Validate).
    pub diagnostics: Vec<CompileError>,
}

impl MatchState {
    pub fn new(pass: PassKind) -> Self {
        MatchState {
            pass,
            visited: HashMap::new(),
            generic: None,
            roots: None,
            found: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_generic(pass: PassKind, step: GenericStep) -> Self {
        MatchState {
            generic: Some(step),
            ..MatchState::new(pass)
        }
    }

    /// Restrict reference-following to nodes under `roots`.
    pub fn within(mut self, roots: impl IntoIterator<Item = NodeId>) -> Self {
        self.roots = Some(roots.into_iter().collect());
        self
    }

    pub fn pass(&self) -> PassKind {
        self.pass
    }

    fn may_follow(&self, store: &InstanceStore, target: NodeId) -> bool {
        self.visit_state(target) == VisitState::NotVisited
            && store.get(target).is_some_and(|n| !n.is_persistent())
            && self
                .roots
                .as_ref()
                .map_or(true, |roots| roots.contains(&store.top_level_of(target)))
    }

    pub fn visit_state(&self, node: NodeId) -> VisitState {
        self.visited.get(&node).copied().unwrap_or_default()
    }

    /// Nodes that finished this pass, ascending.
    pub fn done(&self) -> Vec<NodeId> {
        let mut done: Vec<NodeId> = self
            .visited
            .iter()
            .filter(|(_, s)| **s == VisitState::Done)
            .map(|(id, _)| *id)
            .collect();
        done.sort();
        done
    }
}

type HandlerKey = (ClassifierPath, PassKind);

pub struct MatcherRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn MatchHandler>>,
    /// Extension that contributed each handler, for diagnostics.
    owners: HashMap<HandlerKey, String>,
}

impl MatcherRegistry {
    /// Collect handlers from every extension, rejecting duplicate keys.
    pub fn new(extensions: &[Arc<dyn Extension>]) -> Result<Self, CompileError> {
        let mut handlers = HashMap::new();
        let mut owners = HashMap::new();
        for extension in extensions {
            for handler in extension.handlers() {
                let key = (ClassifierPath::from(handler.classifier()), handler.pass());
                if handlers.contains_key(&key) {
                    return Err(CompileError::DuplicateHandler {
                        classifier: handler.classifier().to_string(),
                        pass: handler.pass(),
                    });
                }
                owners.insert(key.clone(), extension.name().to_string());
                handlers.insert(key, handler);
            }
        }
        Ok(MatcherRegistry { handlers, owners })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn owner_of(&self, classifier: &str, pass: PassKind) -> Option<&str> {
        self.owners
            .get(&(ClassifierPath::from(classifier), pass))
            .map(String::as_str)
    }

    /// Most specific handler along the node's classifier chain.
    pub fn handler_for(
        &self,
        store: &InstanceStore,
        node: NodeId,
        pass: PassKind,
    ) -> Option<&dyn MatchHandler> {
        store.type_chain(node).into_iter().find_map(|path| {
            self.handlers
                .get(&(ClassifierPath::from(path), pass))
                .map(|h| h.as_ref())
        })
    }

    /// Run the generic step and the handler for one node, without walking.
    pub fn dispatch(
        &self,
        node: NodeId,
        cx: &mut PassContext<'_>,
        state: &mut MatchState,
    ) -> Result<Flow, CompileError> {
        if let Some(step) = state.generic {
            step(node, cx, state)?;
        }
        match self.handler_for(cx.store, node, state.pass) {
            Some(handler) => handler.invoke(node, cx, state),
            None => Ok(Flow::Continue),
        }
    }
}

impl std::fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .handlers
            .keys()
            .map(|(path, pass)| format!("{pass:?}:{path}"))
            .collect();
        keys.sort();
        f.debug_struct("MatcherRegistry").field("handlers", &keys).finish()
    }
}

/// Dispatch to `node` and then, unless the handler says otherwise, to every
/// contained child in property order and to every resolved reference the
/// state allows.
pub fn full_match(
    node: NodeId,
    cx: &mut PassContext<'_>,
    state: &mut MatchState,
) -> Result<(), CompileError> {
    if state.visit_state(node) != VisitState::NotVisited || !cx.store.contains(node) {
        return Ok(());
    }
    state.visited.insert(node, VisitState::InProgress);

    let matchers = cx.matchers;
    let flow = matchers.dispatch(node, cx, state)?;
    if flow == Flow::Continue {
        let children = cx.store.node(node)?.children();
        for child in children {
            full_match(child, cx, state)?;
        }
        for target in references(cx.store, node) {
            if state.may_follow(cx.store, target) {
                full_match(target, cx, state)?;
            }
        }
    }

    state.visited.insert(node, VisitState::Done);
    cx.context.count_pass(state.pass);
    Ok(())
}

/// Resolved stub targets of `node`, package links excluded.
fn references(store: &InstanceStore, node: NodeId) -> Vec<NodeId> {
    store
        .get(node)
        .map(|n| {
            n.properties()
                .filter(|(p, _)| *p != props::PACKAGE && *p != props::CHILDREN)
                .flat_map(|(_, values)| values.iter())
                .filter_map(|v| v.as_stub().and_then(|s| s.resolved))
                .collect()
        })
        .unwrap_or_default()
}
