//! Case identity and the opaque case document.
//!
//! The engine never interprets business fields. It only needs to know that a
//! payload is a JSON object whose top-level keys are "sections" (e.g.
//! `vehicle`, `damage_centers`), so it can diff, store and fan out changes
//! per section.

mod diff;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub use diff::{changed_sections, SectionDiff};

/// Structural validation failures, raised before anything reaches the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no case key resolvable; refusing to create an anonymous case")]
    MissingCaseKey,
    #[error("document must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("section name must not be empty")]
    EmptySectionName,
    #[error("document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("document is not valid JSON: {0}")]
    Json(String),
}

/// Natural key of a case (the vehicle plate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    /// Build a case key. Surrounding whitespace is trimmed; an empty key is refused.
    pub fn new(key: impl AsRef<str>) -> Result<Self, ValidationError> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(ValidationError::MissingCaseKey);
        }
        Ok(CaseId(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for CaseId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        CaseId::new(value)
    }
}

/// The user or session a mutation is attributed to. Audit only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        ActorId::new(value)
    }
}

/// Identity of one editing session (one tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random session id.
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A case document: a JSON object keyed by section name.
///
/// Equality is structural, which is what the auto-save diff check relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(Map::new())
    }

    /// Accept any JSON value that is an object.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => {
                if map.keys().any(|k| k.is_empty()) {
                    return Err(ValidationError::EmptySectionName);
                }
                Ok(Document(map))
            }
            other => Err(ValidationError::NotAnObject(json_kind(&other))),
        }
    }

    pub fn from_json_str(source: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(source).map_err(|e| ValidationError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Replace one section, returning the previous value.
    pub fn set_section(
        &mut self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::EmptySectionName);
        }
        Ok(self.0.insert(name, value))
    }

    pub fn remove_section(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.to_json_string())
    }

    /// Serialized size in bytes.
    pub fn byte_len(&self) -> usize {
        self.to_json_string().len()
    }

    /// Check the commit-time limits. Returns the serialized size.
    pub fn validate(&self, max_bytes: usize) -> Result<usize, ValidationError> {
        if self.0.keys().any(|k| k.is_empty()) {
            return Err(ValidationError::EmptySectionName);
        }
        let size = self.byte_len();
        if size > max_bytes {
            return Err(ValidationError::TooLarge {
                size,
                limit: max_bytes,
            });
        }
        Ok(size)
    }
}

impl TryFrom<Value> for Document {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Document::from_value(value)
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
