//! Schemaless records.

use crate::{Error, RecordId, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record is a JSON object. Its `id` field, when present, identifies it
/// within its collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Name of the identifying field.
    pub const ID_FIELD: &'static str = "id";

    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Converts a JSON value into a record. Fails unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::NotAnObject(type_name(&other).to_string())),
        }
    }

    /// Parses a record from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Returns the record's identifier. Numeric ids are rendered as text.
    #[must_use]
    pub fn id(&self) -> Option<RecordId> {
        match self.0.get(Self::ID_FIELD)? {
            Value::String(s) => Some(RecordId::new(s.clone())),
            Value::Number(n) => Some(RecordId::new(n.to_string())),
            _ => None,
        }
    }

    /// Sets the identifying field.
    pub fn set_id(&mut self, id: &RecordId) {
        self.0
            .insert(Self::ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
    }

    /// Builder-style variant of [`Record::set_id`].
    #[must_use]
    pub fn with_id(mut self, id: &RecordId) -> Self {
        self.set_id(id);
        self
    }

    /// Returns a copy without the identifying field.
    #[must_use]
    pub fn without_id(&self) -> Self {
        let mut map = self.0.clone();
        map.remove(Self::ID_FIELD);
        Self(map)
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style variant of [`Record::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Shallow merge: every field of `partial` overwrites the same field here.
    pub fn merge(&mut self, partial: &Record) {
        for (key, value) in &partial.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying JSON map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serializes to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
