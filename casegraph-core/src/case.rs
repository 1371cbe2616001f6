//! Case handles, states and attribute snapshots.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute snapshot of a case: name to value, where `None` is null.
pub type Attributes = BTreeMap<String, Option<String>>;

/// Explicit transition parameters supplied by the caller.
pub type Params = BTreeMap<String, Option<String>>;

/// Name of the reserved attribute that drives graph lookups.
pub const STATE_ATTRIBUTE: &str = "state";

/// A case state label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub String);

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Renders an optional state for messages, `nil` when absent.
pub fn display_state(state: Option<&State>) -> String {
    state.map(|s| s.0.clone()).unwrap_or_else(|| "nil".to_string())
}

/// Handle to a case record owned by the host system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    /// Record identifier.
    pub id: String,
    /// Type tag selecting which edge table applies.
    #[serde(rename = "type")]
    pub case_type: String,
}

impl Case {
    pub fn new(id: impl Into<String>, case_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            case_type: case_type.into(),
        }
    }

    /// Checks that the handle refers to a record.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidCase {
                reason: "case identifier is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Fails unless the case carries the expected type tag.
    pub fn check_type(&self, expected: &str) -> Result<(), CoreError> {
        if self.case_type != expected {
            return Err(CoreError::InvalidCaseType {
                case_id: self.id.clone(),
                expected: expected.to_string(),
                actual: self.case_type.clone(),
            });
        }
        Ok(())
    }
}

/// Converts caller supplied JSON parameters into a flat parameter map.
///
/// `null` means "no parameters". Strings are taken as-is, nulls stay null and
/// any other value is kept as its JSON text.
pub fn params_from_json(value: &Value) -> Result<Params, CoreError> {
    match value {
        Value::Null => Ok(Params::new()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_attribute(v)))
            .collect()),
        other => Err(CoreError::InvalidParams {
            kind: json_kind(other).to_string(),
        }),
    }
}

/// Converts a JSON value into an attribute value.
pub fn json_to_attribute(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads the `state` attribute of a snapshot.
pub fn current_state(attributes: &Attributes) -> Option<State> {
    attributes
        .get(STATE_ATTRIBUTE)
        .and_then(|v| v.as_deref())
        .map(State::from)
}
