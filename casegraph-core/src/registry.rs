//! Edge registries.
//!
//! A [`TransitionTable`] maps `(current state, requested state)` to a single
//! edge and drives the state-driven engine. A [`SignalTable`] maps
//! `(current state, response format)` to an ordered list of edges and drives
//! the message-driven engine. Both are assembled once by a builder and are
//! read-only afterwards.

use crate::case::{display_state, State, STATE_ATTRIBUTE};
use crate::context::{AccessorScope, Accessors, AttributeContext, Predicates};
use crate::edge::EdgeInfo;
use crate::error::CoreError;
use crate::guard::Guard;
use casegraph_protocol::ResponseFormat;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Key of the state-driven registry.
pub type TransitionKey = (Option<State>, State);

/// Key of the message-driven registry.
pub type SignalKey = (Option<State>, ResponseFormat);

/// Immutable `(current, requested) -> edge` registry.
#[derive(Debug)]
pub struct TransitionTable {
    case_type: String,
    edges: HashMap<TransitionKey, Arc<EdgeInfo>>,
    predicates: Arc<Predicates>,
    accessors: Accessors,
    needed: Vec<String>,
}

impl TransitionTable {
    pub fn builder(case_type: impl Into<String>) -> TransitionTableBuilder {
        TransitionTableBuilder {
            case_type: case_type.into(),
            edges: Vec::new(),
            predicates: Predicates::new(),
            accessors: Accessors::state_driven(),
        }
    }

    pub fn case_type(&self) -> &str {
        &self.case_type
    }

    pub fn get(&self, from: Option<&State>, to: &State) -> Option<&Arc<EdgeInfo>> {
        self.edges.get(&(from.cloned(), to.clone()))
    }

    /// Union of every edge's `need`, plus `state`, sorted.
    pub fn needed_attributes(&self) -> &[String] {
        &self.needed
    }

    pub fn predicates(&self) -> &Arc<Predicates> {
        &self.predicates
    }

    pub fn accessors(&self) -> &Accessors {
        &self.accessors
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TransitionKey> {
        self.edges.keys()
    }
}

/// Builder for [`TransitionTable`].
pub struct TransitionTableBuilder {
    case_type: String,
    edges: Vec<(TransitionKey, EdgeInfo)>,
    predicates: Predicates,
    accessors: Accessors,
}

impl TransitionTableBuilder {
    /// Adds the edge for `from -> to`. `None` is the absent state of a new case.
    pub fn edge(mut self, from: Option<&str>, to: &str, edge: EdgeInfo) -> Self {
        self.edges.push(((from.map(State::from), State::from(to)), edge));
        self
    }

    pub fn predicate<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(&AttributeContext) -> Result<bool, CoreError> + Send + Sync + 'static,
    {
        self.predicates.register(name, predicate);
        self
    }

    pub fn accessor<F>(mut self, name: &str, accessor: F) -> Self
    where
        F: Fn(&AccessorScope<'_>) -> Result<Option<String>, CoreError> + Send + Sync + 'static,
    {
        self.accessors.register(name, accessor);
        self
    }

    /// Exposes a fetched attribute as an accessor of the same name.
    pub fn attribute_accessor(mut self, name: &str) -> Self {
        self.accessors.register_attribute(name);
        self
    }

    pub fn build(self) -> Result<TransitionTable, CoreError> {
        let needed = needed_union(self.edges.iter().map(|(_, e)| e));

        let mut edges = HashMap::with_capacity(self.edges.len());
        for ((from, to), edge) in self.edges {
            let key = format!("{} -> {}", display_state(from.as_ref()), to);
            if edge.target().is_some() {
                return Err(CoreError::MalformedEdgeDefinition {
                    reason: format!("{}: state-driven edges take their destination from the key", key),
                });
            }
            check_guard_names(&key, edge.guard(), &self.predicates, &needed)?;
            if edges.insert((from, to), Arc::new(edge)).is_some() {
                return Err(CoreError::DuplicateEdge { key });
            }
        }

        Ok(TransitionTable {
            case_type: self.case_type,
            edges,
            predicates: Arc::new(self.predicates),
            accessors: self.accessors,
            needed,
        })
    }
}

/// Immutable `(current, format) -> [edge]` registry. Order within a key is
/// declaration order and decides guard priority.
#[derive(Debug)]
pub struct SignalTable {
    case_type: String,
    edges: HashMap<SignalKey, Vec<Arc<EdgeInfo>>>,
    predicates: Arc<Predicates>,
    accessors: Accessors,
    needed: Vec<String>,
}

impl SignalTable {
    pub fn builder(case_type: impl Into<String>) -> SignalTableBuilder {
        SignalTableBuilder {
            case_type: case_type.into(),
            edges: Vec::new(),
            predicates: Predicates::new(),
            accessors: Accessors::message_driven(),
        }
    }

    pub fn case_type(&self) -> &str {
        &self.case_type
    }

    pub fn get(&self, from: Option<&State>, format: ResponseFormat) -> Option<&[Arc<EdgeInfo>]> {
        self.edges
            .get(&(from.cloned(), format))
            .map(|edges| edges.as_slice())
    }

    /// Union of every edge's `need`, plus `state`, sorted.
    pub fn needed_attributes(&self) -> &[String] {
        &self.needed
    }

    pub fn predicates(&self) -> &Arc<Predicates> {
        &self.predicates
    }

    pub fn accessors(&self) -> &Accessors {
        &self.accessors
    }

    pub fn len(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Builder for [`SignalTable`].
pub struct SignalTableBuilder {
    case_type: String,
    edges: Vec<(SignalKey, Arc<EdgeInfo>)>,
    predicates: Predicates,
    accessors: Accessors,
}

impl SignalTableBuilder {
    /// Appends an edge for `(from, format)`. Earlier edges win.
    pub fn edge(self, from: Option<&str>, format: ResponseFormat, edge: EdgeInfo) -> Self {
        self.edges_for(from, &[format], edge)
    }

    /// Appends the same edge under several formats.
    pub fn edges_for(
        mut self,
        from: Option<&str>,
        formats: &[ResponseFormat],
        edge: EdgeInfo,
    ) -> Self {
        let edge = Arc::new(edge);
        for format in formats {
            self.edges
                .push(((from.map(State::from), *format), Arc::clone(&edge)));
        }
        self
    }

    pub fn predicate<F>(mut self, name: &str, predicate: F) -> Self
    where
        F: Fn(&AttributeContext) -> Result<bool, CoreError> + Send + Sync + 'static,
    {
        self.predicates.register(name, predicate);
        self
    }

    pub fn accessor<F>(mut self, name: &str, accessor: F) -> Self
    where
        F: Fn(&AccessorScope<'_>) -> Result<Option<String>, CoreError> + Send + Sync + 'static,
    {
        self.accessors.register(name, accessor);
        self
    }

    /// Exposes a fetched attribute as an accessor of the same name.
    pub fn attribute_accessor(mut self, name: &str) -> Self {
        self.accessors.register_attribute(name);
        self
    }

    pub fn build(self) -> Result<SignalTable, CoreError> {
        let needed = needed_union(self.edges.iter().map(|(_, e)| e.as_ref()));

        let mut edges: HashMap<SignalKey, Vec<Arc<EdgeInfo>>> = HashMap::new();
        for ((from, format), edge) in self.edges {
            let key = format!("{} on {}", display_state(from.as_ref()), format.signal());
            if edge.target().is_none() {
                return Err(CoreError::MalformedEdgeDefinition {
                    reason: format!("{}: message-driven edge has no destination state", key),
                });
            }
            check_guard_names(&key, edge.guard(), &self.predicates, &needed)?;

            let list = edges.entry((from, format)).or_default();
            if list.iter().any(|e| Arc::ptr_eq(e, &edge)) {
                return Err(CoreError::DuplicateEdge { key });
            }
            list.push(edge);
        }

        Ok(SignalTable {
            case_type: self.case_type,
            edges,
            predicates: Arc::new(self.predicates),
            accessors: self.accessors,
            needed,
        })
    }
}

fn needed_union<'a>(edges: impl Iterator<Item = &'a EdgeInfo>) -> Vec<String> {
    let mut names: BTreeSet<String> = edges.flat_map(|e| e.need().iter().cloned()).collect();
    names.insert(STATE_ATTRIBUTE.to_string());
    names.into_iter().collect()
}

/// Every name an expression guard reads must be a predicate or a fetched
/// attribute, otherwise it would silently evaluate as absent.
fn check_guard_names(
    key: &str,
    guard: Option<&Guard>,
    predicates: &Predicates,
    needed: &[String],
) -> Result<(), CoreError> {
    let Some(Guard::Expr(expr)) = guard else {
        return Ok(());
    };
    for name in expr.names() {
        if !predicates.contains(name) && !needed.iter().any(|n| n == name) {
            return Err(CoreError::MalformedEdgeDefinition {
                reason: format!(
                    "{}: guard reads '{}' which is neither a predicate nor a needed attribute",
                    key, name
                ),
            });
        }
    }
    Ok(())
}
