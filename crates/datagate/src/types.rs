use crate::error::{DataError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical field holding a record's identifier on every engine
pub const ID_FIELD: &str = "id";
/// Generated creation timestamp
pub const CREATED_AT: &str = "createdAt";
/// Generated last-modification timestamp
pub const UPDATED_AT: &str = "updatedAt";

/// Engine-neutral value stored in a [`Record`]
///
/// Nested collections are always structured (`Record` / `List`), never the
/// serialized text a relational JSON column hands back.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Record(Record),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short type label used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Record(_) => "record",
            Value::List(_) => "list",
        }
    }

    /// Convert to JSON; timestamps become RFC 3339 strings
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Record(r) => r.to_json(),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Total order used when sorting in-process (memory backend, follow-up expansion)
    ///
    /// Nulls sort first, then booleans, numbers, strings, timestamps and
    /// structured values. Numbers compare numerically across Int/Float.
    pub fn compare(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::String(_) => 3,
                Value::Timestamp(_) => 4,
                Value::Record(_) => 5,
                Value::List(_) => 6,
            }
        }

        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.len().cmp(&b.len()),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Record(Record(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
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

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Identifier> for Value {
    fn from(id: Identifier) -> Self {
        match id {
            Identifier::Int(i) => Value::Int(i),
            Identifier::Token(t) => Value::String(t),
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// One segment of a dotted path into a nested value (`items.0.quantity`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Split a dotted path; all-digit segments address list positions
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    if path.is_empty() {
        return Err(DataError::validation("path must not be empty"));
    }
    path.split('.')
        .map(|seg| {
            if seg.is_empty() {
                Err(DataError::validation(format!("invalid path '{}'", path)))
            } else if seg.bytes().all(|b| b.is_ascii_digit()) {
                seg.parse::<usize>()
                    .map(PathSegment::Index)
                    .map_err(|_| DataError::validation(format!("invalid index in '{}'", path)))
            } else {
                Ok(PathSegment::Key(seg.to_string()))
            }
        })
        .collect()
}

/// A single data item: field name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.0.get_mut(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Identifier under the canonical `id` field
    pub fn id(&self) -> Option<Identifier> {
        self.get(ID_FIELD).and_then(Identifier::from_value)
    }

    /// Shallow merge: every field of `patch` overwrites the stored one
    pub fn merge(&mut self, patch: Record) {
        for (k, v) in patch.0 {
            self.0.insert(k, v);
        }
    }

    /// Resolve a dotted path without fanning out over lists
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path).ok()?;
        let (first, rest) = segments.split_first()?;
        let PathSegment::Key(key) = first else {
            return None;
        };
        let mut current = self.get(key)?;
        for seg in rest {
            current = match (seg, current) {
                (PathSegment::Key(k), Value::Record(r)) => r.get(k)?,
                (PathSegment::Index(i), Value::List(items)) => items.get(*i)?,
                (PathSegment::Index(i), Value::Record(r)) => r.get(&i.to_string())?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replace the value at `path`, creating missing object keys along the way
    pub fn set_path(&mut self, path: &[PathSegment], value: Value) -> Result<()> {
        let (first, rest) = path
            .split_first()
            .ok_or_else(|| DataError::validation("path must not be empty"))?;
        let PathSegment::Key(key) = first else {
            return Err(DataError::validation("path must start with a field name"));
        };
        if rest.is_empty() {
            self.0.insert(key.clone(), value);
            return Ok(());
        }
        let slot = self.0.entry(key.clone()).or_insert(Value::Null);
        set_in_value(slot, rest, value)
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

fn set_in_value(slot: &mut Value, path: &[PathSegment], value: Value) -> Result<()> {
    let Some((seg, rest)) = path.split_first() else {
        *slot = value;
        return Ok(());
    };
    if slot.is_null() {
        *slot = Value::Record(Record::new());
    }
    match (seg, slot) {
        (PathSegment::Index(i), Value::List(items)) => {
            let len = items.len();
            let item = items.get_mut(*i).ok_or_else(|| {
                DataError::validation(format!("index {} out of bounds (len {})", i, len))
            })?;
            set_in_value(item, rest, value)
        }
        (seg, Value::Record(r)) => {
            let child = r.0.entry(seg.to_string()).or_insert(Value::Null);
            set_in_value(child, rest, value)
        }
        (seg, other) => Err(DataError::validation(format!(
            "cannot descend into {} at segment '{}'",
            other.type_name(),
            seg
        ))),
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Record(iter.into_iter().collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl TryFrom<serde_json::Value> for Record {
    type Error = DataError;

    fn try_from(v: serde_json::Value) -> Result<Self> {
        match Value::from(v) {
            Value::Record(r) => Ok(r),
            other => Err(DataError::validation(format!(
                "expected an object, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Engine-assigned primary key
///
/// Relational engines and the memory backend assign integers; MongoDB
/// assigns ObjectIds which surface as opaque hex tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Token(String),
}

impl Identifier {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Identifier::Int(*i)),
            Value::Float(_) => value.as_i64().map(Identifier::Int),
            Value::String(s) => Some(Identifier::Token(s.clone())),
            _ => None,
        }
    }

    /// Integer view; numeric tokens parse as well
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Identifier::Int(i) => Some(*i),
            Identifier::Token(t) => t.parse().ok(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.clone())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(i) => write!(f, "{}", i),
            Identifier::Token(t) => write!(f, "{}", t),
        }
    }
}

impl FromStr for Identifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(i) => Identifier::Int(i),
            Err(_) => Identifier::Token(s.to_string()),
        })
    }
}

impl From<i64> for Identifier {
    fn from(i: i64) -> Self {
        Identifier::Int(i)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::Token(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier::Token(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order() -> Record {
        Record::try_from(json!({
            "userId": 1,
            "total": 12.5,
            "items": [
                {"productName": "Latte", "quantity": 2, "options": {"sugar": true}},
                {"productName": "Muffin", "quantity": 1, "discount": 0.1}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_json_conversion_keeps_structure() {
        let r = order();
        let items = r.get("items").and_then(Value::as_list).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            r.get_path("items.1.discount"),
            Some(&Value::Float(0.1))
        );
        assert_eq!(r.get_path("items.0.options.sugar"), Some(&Value::Bool(true)));
        assert_eq!(r.to_json()["items"][0]["quantity"], json!(2));
    }

    #[test]
    fn test_numeric_equality_across_int_and_float() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Float(3.5));
        assert_ne!(Value::String("3".into()), Value::Int(3));
    }

    #[test]
    fn test_set_path_updates_nested_list_item() {
        let mut r = order();
        r.set_path(&parse_path("items.0.quantity").unwrap(), Value::Int(999))
            .unwrap();
        assert_eq!(r.get_path("items.0.quantity"), Some(&Value::Int(999)));
        assert_eq!(r.get_path("items.1.quantity"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_set_path_out_of_bounds_is_validation_error() {
        let mut r = order();
        let err = r
            .set_path(&parse_path("items.5.quantity").unwrap(), Value::Int(1))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_parse_path_rejects_empty_segments() {
        assert!(parse_path("items..name").is_err());
        assert_eq!(
            parse_path("items.0").unwrap(),
            vec![PathSegment::Key("items".into()), PathSegment::Index(0)]
        );
    }

    #[test]
    fn test_identifier_parsing() {
        assert_eq!("42".parse::<Identifier>().unwrap(), Identifier::Int(42));
        assert_eq!(
            "65f0c0ffee".parse::<Identifier>().unwrap(),
            Identifier::Token("65f0c0ffee".into())
        );
        assert_eq!(Identifier::Token("7".into()).as_i64(), Some(7));
    }

    #[test]
    fn test_record_rejects_non_object_json() {
        assert!(Record::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn test_compare_orders_mixed_numbers() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Null.compare(&Value::Int(0)), Ordering::Less);
    }

    #[test]
    fn test_timestamp_serializes_as_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            Value::Timestamp(ts).to_json(),
            json!("2024-03-01T10:00:00.000Z")
        );
    }
}
