//! Attribute context, derived predicates and computed value accessors.

use crate::case::{Attributes, Case, Params};
use crate::clock::{parse_date, TIMESTAMP_FORMAT};
use crate::error::CoreError;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named boolean derived from an attribute context.
pub type Predicate = Arc<dyn Fn(&AttributeContext) -> Result<bool, CoreError> + Send + Sync>;

/// Named computed value used when resolving edge assignments.
pub type Accessor =
    Arc<dyn Fn(&AccessorScope<'_>) -> Result<Option<String>, CoreError> + Send + Sync>;

/// Derived predicates a business table exposes to its guards.
#[derive(Clone, Default)]
pub struct Predicates {
    inner: HashMap<String, Predicate>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a predicate, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&AttributeContext) -> Result<bool, CoreError> + Send + Sync + 'static,
    {
        self.inner.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Predicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.inner.keys().collect();
        names.sort();
        f.debug_struct("Predicates").field("names", &names).finish()
    }
}

/// Read-only view over a fetched attribute snapshot.
///
/// Rebuilt for every engine invocation; never mutates the snapshot.
#[derive(Debug, Clone)]
pub struct AttributeContext {
    case_id: String,
    attributes: Attributes,
    today: NaiveDate,
    predicates: Arc<Predicates>,
}

impl AttributeContext {
    pub fn new(
        case_id: impl Into<String>,
        attributes: Attributes,
        today: NaiveDate,
        predicates: Arc<Predicates>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            attributes,
            today,
            predicates,
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Attribute value; `None` when absent or null.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }

    /// True when the attribute is present, non-null and non-empty.
    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Attribute parsed as a date.
    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        self.get(name).and_then(parse_date)
    }

    pub fn has_predicate(&self, name: &str) -> bool {
        self.predicates.contains(name)
    }

    /// Evaluates a registered predicate. `None` when no such predicate exists.
    pub fn predicate(&self, name: &str) -> Option<Result<bool, CoreError>> {
        self.predicates.get(name).map(|p| p(self))
    }

    /// Evaluates a bare name: the predicate if one is registered, otherwise
    /// presence of the attribute.
    pub fn truthy(&self, name: &str) -> Result<bool, CoreError> {
        match self.predicate(name) {
            Some(result) => result,
            None => Ok(self.is_present(name)),
        }
    }
}

/// Everything an accessor may read while a `set` mapping is resolved.
#[derive(Debug, Clone, Copy)]
pub struct AccessorScope<'a> {
    pub case: &'a Case,
    /// Snapshot fetched before the guard ran.
    pub attributes: &'a Attributes,
    /// Caller parameters; empty for message-driven transitions.
    pub params: &'a Params,
    pub now: NaiveDateTime,
}

impl AccessorScope<'_> {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_deref())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_deref())
    }
}

/// Computed value accessors by name.
#[derive(Clone, Default)]
pub struct Accessors {
    inner: HashMap<String, Accessor>,
}

impl Accessors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accessors available to the state-driven engine: `now`, `person_id`
    /// and `case_id`.
    pub fn state_driven() -> Self {
        let mut accessors = Self::message_driven();
        accessors.register("person_id", |scope| {
            Ok(scope
                .param("operator_id")
                .or_else(|| scope.param("exporter_id"))
                .map(str::to_string))
        });
        accessors.register("case_id", |scope| Ok(Some(scope.case.id.clone())));
        accessors
    }

    /// Accessors available to the message-driven engine: `now`.
    pub fn message_driven() -> Self {
        let mut accessors = Self::new();
        accessors.register("now", |scope| {
            Ok(Some(scope.now.format(TIMESTAMP_FORMAT).to_string()))
        });
        accessors
    }

    pub fn register<F>(&mut self, name: impl Into<String>, accessor: F) -> &mut Self
    where
        F: Fn(&AccessorScope<'_>) -> Result<Option<String>, CoreError> + Send + Sync + 'static,
    {
        self.inner.insert(name.into(), Arc::new(accessor));
        self
    }

    /// Registers an accessor returning the fetched value of an attribute.
    pub fn register_attribute(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        let attribute = name.clone();
        self.register(name, move |scope| {
            Ok(scope.attribute(&attribute).map(str::to_string))
        })
    }

    pub fn get(&self, name: &str) -> Option<&Accessor> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }
}

impl fmt::Debug for Accessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.inner.keys().collect();
        names.sort();
        f.debug_struct("Accessors").field("names", &names).finish()
    }
}
