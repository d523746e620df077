//! Row representation
//!
//! A `Row` is the untyped shape every table shares: a generated identifier
//! plus an open set of named fields. Typed records convert to and from rows
//! at the access-layer boundary, validating required fields once.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{RemoteError, RemoteResult};

/// Name of the identifier field in every table
pub const ID_FIELD: &str = "id";

/// Store-generated row identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        RowId(id.into())
    }

    /// Identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId(id.to_string())
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        RowId(id)
    }
}

// Serial primary keys arrive as JSON numbers.
impl<'de> Deserialize<'de> for RowId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Integer(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => RowId(text),
            RawId::Integer(n) => RowId(n.to_string()),
        })
    }
}

/// One record of a remote table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Row identifier
    pub id: RowId,

    /// Every other column
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Row {
    /// Create a row with the given id and fields.
    ///
    /// An `id` entry inside `fields` is dropped; the identifier lives in `id`.
    pub fn new(id: impl Into<RowId>, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        Row {
            id: id.into(),
            fields,
        }
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == ID_FIELD {
            return None;
        }
        self.fields.get(field)
    }

    /// Get a field as text
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get a field as a number
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Set a field, returning the row
    pub fn with_field(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        if field != ID_FIELD {
            self.fields.insert(field.to_string(), value.into());
        }
    }

    /// Overwrite the fields present in `partial`, leaving the rest untouched
    pub fn merge(&mut self, partial: &Map<String, Value>) {
        for (key, value) in partial {
            if key != ID_FIELD {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Keep only the named fields (the id always survives)
    pub fn project(&self, fields: &[String]) -> Row {
        if fields.is_empty() || fields.iter().any(|f| f == "*") {
            return self.clone();
        }
        let fields = self
            .fields
            .iter()
            .filter(|(key, _)| fields.iter().any(|f| f == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Row {
            id: self.id.clone(),
            fields,
        }
    }

    /// Render a field for text comparisons (search, filters)
    pub fn field_text(&self, field: &str) -> Option<String> {
        if field == ID_FIELD {
            return Some(self.id.to_string());
        }
        match self.fields.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Decode into a typed record, validating it
    pub fn decode<R: Record>(&self) -> RemoteResult<R> {
        R::from_row(self)
    }
}

/// A typed view of a row.
///
/// Implementors get serde-based conversion for free and only need to say
/// where their id lives and which fields are required.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Row identifier
    fn id(&self) -> &RowId;

    /// Check required fields and value ranges
    fn validate(&self) -> RemoteResult<()> {
        Ok(())
    }

    /// Decode and validate a row
    fn from_row(row: &Row) -> RemoteResult<Self> {
        let value = serde_json::to_value(row)?;
        let record: Self = serde_json::from_value(value)
            .map_err(|e| RemoteError::Validation(format!("row {}: {}", row.id, e)))?;
        record.validate()?;
        Ok(record)
    }

    /// Encode back into a row
    fn to_row(&self) -> RemoteResult<Row> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// A record bound to a fixed table
pub trait TableRecord: Record {
    /// Remote table name
    const TABLE: &'static str;
}

impl Record for Row {
    fn id(&self) -> &RowId {
        &self.id
    }

    fn from_row(row: &Row) -> RemoteResult<Self> {
        Ok(row.clone())
    }

    fn to_row(&self) -> RemoteResult<Row> {
        Ok(self.clone())
    }
}

/// Fail with a validation error when a required text field is blank
pub fn require_non_empty(field: &str, value: &str) -> RemoteResult<()> {
    if value.trim().is_empty() {
        return Err(RemoteError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Serialize a value into a field map, for create/update payloads
pub fn to_fields<T: Serialize>(value: &T) -> RemoteResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::Validation(format!(
            "expected an object payload, got {}",
            other
        ))),
    }
}
