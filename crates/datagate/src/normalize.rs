//! Canonical record shape for whatever an engine hands back
//!
//! Relational rows arrive as `(column, value)` pairs with JSON columns possibly
//! still text and booleans possibly `0/1`; documents arrive with native
//! structure but loosely typed scalars. Both leave here as a [`Record`] keyed
//! by field name with typed values.

use crate::error::{DataError, Result};
use crate::query::ExpandPlan;
use crate::schema::{CollectionSchema, FieldType};
use crate::sql::EXPAND_PREFIX;
use crate::types::{Record, Value};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Parse RFC 3339, or a zone-less `YYYY-MM-DD HH:MM:SS[.fff]` taken as UTC
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Coerce a stored value to the declared field type
pub fn coerce(field: &str, field_type: FieldType, value: Value) -> Result<Value> {
    let bad = |v: &Value| {
        DataError::SerializationError(format!(
            "field '{}' holds {} where {} was expected",
            field,
            v.type_name(),
            field_type
        ))
    };

    match (field_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (FieldType::Boolean, Value::Int(i)) => Ok(Value::Bool(i != 0)),
        (FieldType::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(bad(&Value::String(s))),
        },
        (FieldType::Json, Value::String(s)) => serde_json::from_str::<serde_json::Value>(&s)
            .map(Value::from)
            .map_err(|e| {
                DataError::SerializationError(format!(
                    "malformed JSON stored in field '{}': {}",
                    field, e
                ))
            }),
        (FieldType::Json, v) => Ok(v),
        (FieldType::Timestamp, Value::Timestamp(ts)) => Ok(Value::Timestamp(ts)),
        (FieldType::Timestamp, Value::String(s)) => parse_timestamp(&s)
            .map(Value::Timestamp)
            .ok_or_else(|| bad(&Value::String(s))),
        (FieldType::Timestamp, Value::Int(ms)) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Value::Timestamp)
            .ok_or_else(|| bad(&Value::Int(ms))),
        (FieldType::Integer, Value::Int(i)) => Ok(Value::Int(i)),
        (FieldType::Integer, v @ Value::Float(_)) => v.as_i64().map(Value::Int).ok_or_else(|| bad(&v)),
        (FieldType::Integer, Value::String(s)) => {
            s.parse().map(Value::Int).map_err(|_| bad(&Value::String(s)))
        }
        (FieldType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (FieldType::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (FieldType::Float, Value::String(s)) => {
            s.parse().map(Value::Float).map_err(|_| bad(&Value::String(s)))
        }
        // document engines hand references back as opaque tokens
        (FieldType::Reference, v @ (Value::Int(_) | Value::String(_))) => Ok(v),
        (FieldType::Reference, v @ Value::Float(_)) => {
            v.as_i64().map(Value::Int).ok_or_else(|| bad(&v))
        }
        (FieldType::String, v @ Value::String(_)) => Ok(v),
        (FieldType::String, Value::Timestamp(ts)) => Ok(Value::String(ts.to_rfc3339())),
        (_, v) => Err(bad(&v)),
    }
}

/// Build a record from relational columns; `__x__` columns become the nested
/// expanded record (or null when the join found nothing)
pub fn from_columns(
    schema: &CollectionSchema,
    columns: Vec<(String, Value)>,
    expand: Option<&ExpandPlan>,
) -> Result<Record> {
    let mut record = Record::new();
    let mut joined = Vec::new();

    for (column, value) in columns {
        if let Some(inner) = column.strip_prefix(EXPAND_PREFIX) {
            joined.push((inner.to_string(), value));
            continue;
        }
        let field = schema.field_for_column(&column).unwrap_or(column);
        let value = match schema.field_type_of(&field) {
            Some(field_type) => coerce(&field, field_type, value)?,
            None => value,
        };
        record.insert(field, value);
    }

    if let Some(plan) = expand {
        let nested = from_columns(&plan.target, joined, None)?;
        let value = match nested.get(crate::types::ID_FIELD) {
            Some(v) if !v.is_null() => Value::Record(nested),
            _ => Value::Null,
        };
        record.insert(plan.relation.name.clone(), value);
    }
    Ok(record)
}

/// Coerce the declared fields of an already field-keyed record
pub fn normalize_record(schema: &CollectionSchema, record: Record) -> Result<Record> {
    record
        .into_iter()
        .map(|(field, value)| {
            let value = match schema.field_def(&field) {
                Some(def) => coerce(&field, def.field_type, value)?,
                None if schema.is_generated(&field) && field != crate::types::ID_FIELD => {
                    coerce(&field, FieldType::Timestamp, value)?
                }
                None => value,
            };
            Ok((field, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ExpandPlan;
    use crate::schema::{FieldDef, Relation};

    fn users() -> CollectionSchema {
        CollectionSchema::new("users")
            .field(FieldDef::string("email"))
            .field(FieldDef::boolean("isActive"))
            .field(FieldDef::json("settings"))
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(coerce("f", FieldType::Boolean, Value::Int(1)).unwrap(), Value::Bool(true));
        assert_eq!(coerce("f", FieldType::Boolean, Value::Int(0)).unwrap(), Value::Bool(false));
        assert_eq!(
            coerce("f", FieldType::Boolean, Value::from("false")).unwrap(),
            Value::Bool(false)
        );
        assert!(coerce("f", FieldType::Boolean, Value::from("maybe")).is_err());
    }

    #[test]
    fn test_json_text_becomes_structure() {
        let v = coerce(
            "items",
            FieldType::Json,
            Value::from(r#"[{"productName":"Latte","discount":0.1}]"#),
        )
        .unwrap();
        let items = v.as_list().unwrap();
        assert_eq!(
            items[0].as_record().unwrap().get("discount"),
            Some(&Value::Float(0.1))
        );
    }

    #[test]
    fn test_malformed_json_is_typed_error() {
        let err = coerce("items", FieldType::Json, Value::from("[{\"a\":")).unwrap_err();
        assert!(matches!(err, DataError::SerializationError(_)));
    }

    #[test]
    fn test_timestamp_parsing() {
        let ts = coerce("createdAt", FieldType::Timestamp, Value::from("2024-05-01 12:30:00.250"))
            .unwrap();
        assert_eq!(
            ts.as_timestamp().unwrap().to_rfc3339(),
            "2024-05-01T12:30:00.250+00:00"
        );
        assert!(parse_timestamp("2024-05-01T12:30:00+02:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_from_columns_maps_names_and_types() {
        let schema = users();
        let record = from_columns(
            &schema,
            vec![
                ("id".into(), Value::Int(3)),
                ("email".into(), Value::from("a@b.c")),
                ("is_active".into(), Value::Int(1)),
                ("settings".into(), Value::from(r#"{"theme":"dark"}"#)),
                ("created_at".into(), Value::from("2024-01-01T00:00:00Z")),
            ],
            None,
        )
        .unwrap();
        assert_eq!(record.get("isActive"), Some(&Value::Bool(true)));
        assert_eq!(record.get_path("settings.theme"), Some(&Value::from("dark")));
        assert!(record.get("createdAt").unwrap().as_timestamp().is_some());
        assert!(!record.contains_key("is_active"));
    }

    #[test]
    fn test_from_columns_nests_expansion() {
        let orders = CollectionSchema::new("orders").field(FieldDef::reference("userId", "users"));
        let plan = ExpandPlan {
            relation: Relation::new("user", "userId", "users"),
            target: users(),
        };

        let hit = from_columns(
            &orders,
            vec![
                ("id".into(), Value::Int(1)),
                ("user_id".into(), Value::Int(3)),
                ("__x__id".into(), Value::Int(3)),
                ("__x__email".into(), Value::from("a@b.c")),
            ],
            Some(&plan),
        )
        .unwrap();
        assert_eq!(hit.get_path("user.email"), Some(&Value::from("a@b.c")));
        assert_eq!(hit.get("userId"), Some(&Value::Int(3)));

        let miss = from_columns(
            &orders,
            vec![
                ("id".into(), Value::Int(2)),
                ("user_id".into(), Value::Int(99)),
                ("__x__id".into(), Value::Null),
                ("__x__email".into(), Value::Null),
            ],
            Some(&plan),
        )
        .unwrap();
        assert_eq!(miss.get("user"), Some(&Value::Null));
    }

    #[test]
    fn test_normalize_record_keeps_unknown_fields() {
        let schema = users();
        let record = Record::new()
            .with("isActive", "true")
            .with("nickname", "bo")
            .with("updatedAt", "2024-01-01T00:00:00Z");
        let out = normalize_record(&schema, record).unwrap();
        assert_eq!(out.get("isActive"), Some(&Value::Bool(true)));
        assert_eq!(out.get("nickname"), Some(&Value::from("bo")));
        assert!(out.get("updatedAt").unwrap().as_timestamp().is_some());
    }
}
