use crate::error::{DataError, Result};
use crate::normalize::parse_timestamp;
use crate::schema::{CollectionSchema, FieldDef, FieldType};
use crate::types::{Record, Value, ID_FIELD};

/// Check a record for `create`, returning it with timestamp strings parsed
///
/// `strict` rejects fields the schema does not declare; it is only set for
/// engines with a fixed schema.
pub fn validate_new(schema: &CollectionSchema, record: Record, strict: bool) -> Result<Record> {
    for def in schema.fields.iter().filter(|f| f.required) {
        match record.get(&def.name) {
            None | Some(Value::Null) => {
                return Err(DataError::validation(format!(
                    "{}: missing required field '{}'",
                    schema.name, def.name
                )))
            }
            Some(_) => {}
        }
    }
    check_fields(schema, record, strict)
}

/// Check a partial record for `update`
pub fn validate_patch(schema: &CollectionSchema, patch: Record, strict: bool) -> Result<Record> {
    for def in schema.fields.iter().filter(|f| f.required) {
        if matches!(patch.get(&def.name), Some(Value::Null)) {
            return Err(DataError::validation(format!(
                "{}: required field '{}' cannot be null",
                schema.name, def.name
            )));
        }
    }
    check_fields(schema, patch, strict)
}

/// Check the root field of a nested JSON write
pub fn validate_path_target(schema: &CollectionSchema, field: &str, strict: bool) -> Result<()> {
    if schema.is_generated(field) {
        return Err(DataError::validation(format!(
            "'{}' is maintained by the engine",
            field
        )));
    }
    match schema.field_def(field) {
        Some(def) if def.field_type == FieldType::Json => Ok(()),
        Some(def) => Err(DataError::validation(format!(
            "field '{}' is {}, not json",
            field, def.field_type
        ))),
        None if !strict => Ok(()),
        None => Err(DataError::validation(format!(
            "{}: unknown field '{}'",
            schema.name, field
        ))),
    }
}

fn check_fields(schema: &CollectionSchema, record: Record, strict: bool) -> Result<Record> {
    record
        .into_iter()
        .map(|(field, value)| {
            if field == ID_FIELD {
                return Err(DataError::validation("id is assigned by the engine"));
            }
            if schema.is_generated(&field) {
                return Err(DataError::validation(format!(
                    "'{}' is maintained by the engine",
                    field
                )));
            }
            let value = match schema.field_def(&field) {
                Some(def) => check_type(def, value)?,
                None if strict => {
                    return Err(DataError::validation(format!(
                        "{}: unknown field '{}'",
                        schema.name, field
                    )))
                }
                None => value,
            };
            Ok((field, value))
        })
        .collect()
}

fn check_type(def: &FieldDef, value: Value) -> Result<Value> {
    let wrong = |v: &Value| {
        DataError::validation(format!(
            "field '{}' expects {}, got {}",
            def.name,
            def.field_type,
            v.type_name()
        ))
    };

    match (def.field_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldType::String, v @ Value::String(_)) => Ok(v),
        (FieldType::Integer, v @ Value::Int(_)) => Ok(v),
        (FieldType::Integer, v @ Value::Float(_)) => {
            v.as_i64().map(Value::Int).ok_or_else(|| wrong(&v))
        }
        (FieldType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (FieldType::Float, v @ Value::Float(_)) => Ok(v),
        (FieldType::Boolean, v @ Value::Bool(_)) => Ok(v),
        (FieldType::Timestamp, v @ Value::Timestamp(_)) => Ok(v),
        (FieldType::Timestamp, Value::String(s)) => parse_timestamp(&s)
            .map(Value::Timestamp)
            .ok_or_else(|| wrong(&Value::String(s))),
        (FieldType::Json, v @ (Value::Record(_) | Value::List(_))) => Ok(v),
        (FieldType::Reference, v @ (Value::Int(_) | Value::String(_))) => Ok(v),
        (_, v) => Err(wrong(&v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> CollectionSchema {
        CollectionSchema::new("orders")
            .field(FieldDef::reference("userId", "users").required())
            .field(FieldDef::json("items").required())
            .field(FieldDef::float("total"))
            .field(FieldDef::timestamp("shippedAt"))
    }

    fn order() -> Record {
        Record::new()
            .with("userId", 1)
            .with("items", Value::List(vec![]))
            .with("total", 3)
    }

    #[test]
    fn test_missing_required_field() {
        let mut r = order();
        r.remove("userId");
        let err = validate_new(&orders(), r, true).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("userId"));
    }

    #[test]
    fn test_integer_widens_to_float() {
        let r = validate_new(&orders(), order(), true).unwrap();
        assert_eq!(r.get("total"), Some(&Value::Float(3.0)));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let r = order().with("items", "not a list");
        assert!(validate_new(&orders(), r, true).unwrap_err().is_validation());
    }

    #[test]
    fn test_timestamp_string_is_parsed() {
        let r = order().with("shippedAt", "2024-02-03T04:05:06Z");
        let r = validate_new(&orders(), r, true).unwrap();
        assert!(r.get("shippedAt").unwrap().as_timestamp().is_some());
    }

    #[test]
    fn test_unknown_fields_depend_on_strictness() {
        let r = order().with("giftWrap", true);
        assert!(validate_new(&orders(), r.clone(), true).is_err());
        let loose = validate_new(&orders(), r, false).unwrap();
        assert_eq!(loose.get("giftWrap"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_generated_fields_are_rejected() {
        assert!(validate_new(&orders(), order().with("id", 9), false).is_err());
        assert!(validate_patch(&orders(), Record::new().with("createdAt", "x"), false).is_err());
    }

    #[test]
    fn test_patch_may_omit_required_but_not_null_them() {
        let schema = orders();
        assert!(validate_patch(&schema, Record::new().with("total", 1.5), true).is_ok());
        assert!(validate_patch(&schema, Record::new().with("userId", Value::Null), true).is_err());
    }

    #[test]
    fn test_path_target_must_be_json() {
        let schema = orders();
        assert!(validate_path_target(&schema, "items", true).is_ok());
        assert!(validate_path_target(&schema, "total", true).is_err());
        assert!(validate_path_target(&schema, "notes", true).is_err());
        assert!(validate_path_target(&CollectionSchema::permissive("x"), "anything", false).is_ok());
    }
}
