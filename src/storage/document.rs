use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DbError, DbResult};

/// System attributes owned by the storage engine.
pub const KEY_FIELD: &str = "_key";
pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";

/// `Sun, 06 Nov 1994 08:49:37 GMT`
pub const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A single document attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(Document),
    /// Only produced by [`Document::coerce_dates`]; serialized as RFC 3339.
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.clone().into()
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Object(doc) => doc.into_json(),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => items.serialize(serializer),
            Value::Object(doc) => doc.serialize(serializer),
            Value::DateTime(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// An insertion-ordered JSON-like document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Build a document from a JSON value, which must be an object.
    pub fn from_json(value: serde_json::Value) -> DbResult<Self> {
        match Value::from(value) {
            Value::Object(doc) => Ok(doc),
            other => Err(DbError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                other.to_json()
            ))),
        }
    }

    pub fn into_json(self) -> serde_json::Value {
        serde_json::Value::Object(self.0.into_iter().map(|(k, v)| (k, v.into())).collect())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn key(&self) -> Option<&str> {
        self.get(KEY_FIELD).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn rev(&self) -> Option<&str> {
        self.get(REV_FIELD).and_then(Value::as_str)
    }

    /// Keep only `fields` plus the system attributes.
    pub fn project(&self, fields: &[String]) -> Document {
        self.0
            .iter()
            .filter(|(k, _)| {
                matches!(k.as_str(), KEY_FIELD | ID_FIELD | REV_FIELD) || fields.contains(k)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace every string attribute that parses as a date with a
    /// [`Value::DateTime`]. Descends into nested documents, including
    /// documents held in arrays. Strings that do not parse are left as-is.
    ///
    /// Returns the number of attributes converted.
    pub fn coerce_dates(&mut self, formats: &DateFormats) -> usize {
        let mut converted = 0;
        for value in self.0.values_mut() {
            converted += coerce_value(value, formats);
        }
        converted
    }
}

fn coerce_value(value: &mut Value, formats: &DateFormats) -> usize {
    match value {
        Value::String(s) => match formats.parse(s) {
            Some(dt) => {
                *value = Value::DateTime(dt);
                1
            }
            None => 0,
        },
        Value::Object(doc) => doc.coerce_dates(formats),
        Value::Array(items) => items
            .iter_mut()
            .map(|item| match item {
                Value::Object(doc) => doc.coerce_dates(formats),
                _ => 0,
            })
            .sum(),
        _ => 0,
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Date/time formats recognised by the date coercion pass
#[derive(Debug, Clone)]
pub struct DateFormats {
    patterns: Vec<String>,
    rfc3339: bool,
}

impl Default for DateFormats {
    fn default() -> Self {
        Self {
            patterns: vec![RFC1123_FORMAT.to_string()],
            rfc3339: true,
        }
    }
}

impl DateFormats {
    /// Only the given `chrono` strftime patterns (interpreted as UTC).
    pub fn with_patterns(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            rfc3339: false,
        }
    }

    pub fn parse(&self, s: &str) -> Option<DateTime<Utc>> {
        if self.rfc3339 {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
        }
        self.patterns
            .iter()
            .find_map(|p| NaiveDateTime::parse_from_str(s, p).ok())
            .map(|naive| naive.and_utc())
    }
}

/// Identity of a stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_rev")]
    pub rev: String,
}

/// Outcome of an update or replace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionResult {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(rename = "_oldRev")]
    pub old_rev: String,
}

/// Per-document outcome of an insert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InsertResult {
    Created(DocumentMeta),
    Rejected { index: usize, error: String },
}

impl InsertResult {
    pub fn meta(&self) -> Option<&DocumentMeta> {
        match self {
            InsertResult::Created(meta) => Some(meta),
            InsertResult::Rejected { .. } => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, InsertResult::Created(_))
    }
}
