//! Edge descriptions.
//!
//! An [`EdgeInfo`] describes one graph edge: an optional guard, the
//! attributes it needs fetched, the attribute assignments it commits, an
//! optional typed failure and an optional post-commit callback.
//!
//! Edges are normally composed in code with [`EdgeInfo::builder`]. They can
//! also be declared as JSON options:
//!
//! ```json
//! {
//!   "need": ["planned_sending_date", "rejecting_date"],
//!   "guard": "!rejected",
//!   "set": {
//!     "case_status": "Формирование пакета документов",
//!     "planned_finish_date": "planned_sending_date",
//!     "pending_register_sending_date": null
//!   },
//!   "skip": []
//! }
//! ```

use crate::case::{Attributes, Case, State};
use crate::error::{CoreError, GuardFailure};
use crate::guard::Guard;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// How an assigned attribute value is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDescriptor {
    /// Always null.
    Null,
    /// Accessor or parameter name, falling back to the literal text.
    Text(String),
    /// Accessor or parameter name; the attribute is left out of the commit
    /// when neither resolves.
    Reference(String),
}

impl ValueDescriptor {
    pub fn text(s: impl Into<String>) -> Self {
        ValueDescriptor::Text(s.into())
    }

    pub fn reference(s: impl Into<String>) -> Self {
        ValueDescriptor::Reference(s.into())
    }

    /// Name looked up among accessors and parameters, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            ValueDescriptor::Null => None,
            ValueDescriptor::Text(s) | ValueDescriptor::Reference(s) => Some(s),
        }
    }

    pub fn is_skip_tagged(&self) -> bool {
        matches!(self, ValueDescriptor::Reference(_))
    }
}

/// Callback invoked after a successful commit with the case and the
/// snapshot fetched before the commit.
pub trait AfterCommit: Send + Sync {
    fn call(&self, case: &Case, attributes: &Attributes) -> Result<(), CoreError>;
}

impl<F> AfterCommit for F
where
    F: Fn(&Case, &Attributes) -> Result<(), CoreError> + Send + Sync,
{
    fn call(&self, case: &Case, attributes: &Attributes) -> Result<(), CoreError> {
        self(case, attributes)
    }
}

/// Immutable description of one graph edge.
#[derive(Clone)]
pub struct EdgeInfo {
    guard: Option<Guard>,
    need: Vec<String>,
    set: BTreeMap<String, ValueDescriptor>,
    on_guard_fail: Option<GuardFailure>,
    after: Option<Arc<dyn AfterCommit>>,
    target: Option<State>,
}

impl EdgeInfo {
    pub fn builder() -> EdgeBuilder {
        EdgeBuilder::default()
    }

    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    /// Attributes this edge reads.
    pub fn need(&self) -> &[String] {
        &self.need
    }

    /// Attribute assignments, ordered by attribute name.
    pub fn set(&self) -> &BTreeMap<String, ValueDescriptor> {
        &self.set
    }

    pub fn on_guard_fail(&self) -> Option<GuardFailure> {
        self.on_guard_fail
    }

    pub fn after(&self) -> Option<&Arc<dyn AfterCommit>> {
        self.after.as_ref()
    }

    /// Destination state of a message-driven edge.
    pub fn target(&self) -> Option<&State> {
        self.target.as_ref()
    }
}

impl fmt::Debug for EdgeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeInfo")
            .field("guard", &self.guard)
            .field("need", &self.need)
            .field("set", &self.set)
            .field("on_guard_fail", &self.on_guard_fail)
            .field("after", &self.after.as_ref().map(|_| ".."))
            .field("target", &self.target)
            .finish()
    }
}

/// Builder for [`EdgeInfo`].
#[derive(Default)]
pub struct EdgeBuilder {
    guard: Option<Guard>,
    need: Vec<String>,
    set: Vec<(String, ValueDescriptor)>,
    on_guard_fail: Option<GuardFailure>,
    after: Option<Arc<dyn AfterCommit>>,
    target: Option<State>,
}

impl EdgeBuilder {
    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn need<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.need.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: ValueDescriptor) -> Self {
        self.set.push((name.into(), value));
        self
    }

    /// Assigns a literal (or accessor/parameter) value.
    pub fn set_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, ValueDescriptor::Text(value.into()))
    }

    /// Assigns a skip-tagged reference.
    pub fn set_reference(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, ValueDescriptor::Reference(value.into()))
    }

    pub fn set_null(self, name: impl Into<String>) -> Self {
        self.set(name, ValueDescriptor::Null)
    }

    pub fn set_all<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, ValueDescriptor)>,
    {
        self.set.extend(entries);
        self
    }

    pub fn on_guard_fail(mut self, failure: GuardFailure) -> Self {
        self.on_guard_fail = Some(failure);
        self
    }

    pub fn after<A: AfterCommit + 'static>(mut self, hook: A) -> Self {
        self.after = Some(Arc::new(hook));
        self
    }

    pub fn after_arc(mut self, hook: Arc<dyn AfterCommit>) -> Self {
        self.after = Some(hook);
        self
    }

    /// Destination state, for message-driven edges.
    pub fn to(mut self, state: impl Into<State>) -> Self {
        self.target = Some(state.into());
        self
    }

    /// Validates and freezes the edge.
    pub fn build(self) -> Result<EdgeInfo, CoreError> {
        if let Some(name) = self.need.iter().find(|n| n.trim().is_empty()) {
            return Err(malformed(format!("need contains a blank name: {:?}", name)));
        }

        let mut set = BTreeMap::new();
        for (name, value) in self.set {
            if name.trim().is_empty() {
                return Err(malformed("set contains a blank attribute name"));
            }
            if name == crate::case::STATE_ATTRIBUTE {
                return Err(malformed("set cannot assign the state attribute"));
            }
            if set.insert(name.clone(), value).is_some() {
                return Err(malformed(format!("attribute '{}' assigned twice", name)));
            }
        }

        if matches!(&self.target, Some(s) if s.as_str().trim().is_empty()) {
            return Err(malformed("destination state is blank"));
        }

        let need: Vec<String> = self
            .need
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(EdgeInfo {
            guard: self.guard,
            need,
            set,
            on_guard_fail: self.on_guard_fail,
            after: self.after,
            target: self.target,
        })
    }
}

fn malformed(reason: impl Into<String>) -> CoreError {
    CoreError::MalformedEdgeDefinition {
        reason: reason.into(),
    }
}

/// Skip-tagged references named like the attributes they assign, so each
/// attribute takes the same-named parameter when supplied.
pub fn from_params_with_the_same_names<I, S>(names: I) -> Vec<(String, ValueDescriptor)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(|name| {
            let name = name.into();
            (name.clone(), ValueDescriptor::Reference(name))
        })
        .collect()
}

/// Null assignments for every named attribute.
pub fn blank<I, S>(names: I) -> Vec<(String, ValueDescriptor)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(|name| (name.into(), ValueDescriptor::Null))
        .collect()
}

/// Edge options declared as JSON.
pub struct EdgeOptions;

impl EdgeOptions {
    /// Validates the options shape and returns a builder seeded from it.
    ///
    /// `set` must be an object whose values are null or strings; `need` a
    /// string or an array of strings; `skip` an array naming skip-tagged
    /// keys of `set`; `guard` and `state` strings. Other keys are ignored.
    pub fn from_json(options: &Value) -> Result<EdgeBuilder, CoreError> {
        let obj = options
            .as_object()
            .ok_or_else(|| malformed("edge options must be an object"))?;

        let mut builder = EdgeInfo::builder();

        if let Some(need) = obj.get("need") {
            builder = builder.need(string_or_list(need, "need")?);
        }

        let skip = match obj.get("skip") {
            Some(v) => string_list(v, "skip")?,
            None => Vec::new(),
        };

        match obj.get("set") {
            None | Some(Value::Null) => {}
            Some(Value::Object(set)) => {
                for name in &skip {
                    if !set.contains_key(name) {
                        return Err(malformed(format!(
                            "skip names '{}' which is not assigned in set",
                            name
                        )));
                    }
                }
                for (name, value) in set {
                    let descriptor = match value {
                        Value::Null => ValueDescriptor::Null,
                        Value::String(s) if skip.contains(name) => {
                            ValueDescriptor::Reference(s.clone())
                        }
                        Value::String(s) => ValueDescriptor::Text(s.clone()),
                        other => {
                            return Err(malformed(format!(
                                "set.{} must be null or a string, got {}",
                                name, other
                            )))
                        }
                    };
                    builder = builder.set(name.clone(), descriptor);
                }
            }
            Some(other) => {
                return Err(malformed(format!("set must be an object, got {}", other)));
            }
        }

        match obj.get("guard") {
            None | Some(Value::Null) => {}
            Some(Value::String(expr)) => builder = builder.guard(Guard::parse(expr)?),
            Some(other) => return Err(malformed(format!("guard must be a string, got {}", other))),
        }

        match obj.get("state") {
            None | Some(Value::Null) => {}
            Some(Value::String(state)) => builder = builder.to(state.as_str()),
            Some(other) => return Err(malformed(format!("state must be a string, got {}", other))),
        }

        Ok(builder)
    }
}

fn string_or_list(value: &Value, field: &str) -> Result<Vec<String>, CoreError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        other => string_list(other, field),
    }
}

fn string_list(value: &Value, field: &str) -> Result<Vec<String>, CoreError> {
    let items = value.as_array().ok_or_else(|| {
        malformed(format!("{} must be a string or an array of strings", field))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed(format!("{} items must be strings, got {}", field, item)))
        })
        .collect()
}
