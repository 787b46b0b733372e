use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{TimeZone, Utc};
use datagate::normalize::normalize_record;
use datagate::query::ExpandPlan;
use datagate::{CollectionSchema, Identifier, Record, Result, Value, ID_FIELD};

pub(crate) const MONGO_ID: &str = "_id";

pub(crate) fn to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::Timestamp(ts) => Bson::DateTime(bson::DateTime::from_millis(ts.timestamp_millis())),
        Value::Record(r) => Bson::Document(to_document(r)),
        Value::List(items) => Bson::Array(items.iter().map(to_bson).collect()),
    }
}

pub(crate) fn from_bson(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::Int(i.into()),
        Bson::Int64(i) => Value::Int(i),
        Bson::Double(f) => Value::Float(f),
        Bson::String(s) | Bson::Symbol(s) => Value::String(s),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Utc
            .timestamp_millis_opt(dt.timestamp_millis())
            .single()
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
        Bson::Document(doc) => Value::Record(
            doc.into_iter()
                .map(|(k, v)| (k, from_bson(v)))
                .collect(),
        ),
        Bson::Array(items) => Value::List(items.into_iter().map(from_bson).collect()),
        other => Value::String(other.to_string()),
    }
}

/// Document for a record; the canonical `id` never reaches storage
pub(crate) fn to_document(record: &Record) -> Document {
    record
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .map(|(k, v)| (k.clone(), to_bson(v)))
        .collect()
}

/// Record for a stored document: `_id` surfaces as the `id` token and the
/// expanded relation, if any, is normalized against its own schema
pub(crate) fn from_document(
    schema: &CollectionSchema,
    doc: Document,
    expand: Option<&ExpandPlan>,
) -> Result<Record> {
    let mut record = Record::new();
    let mut nested = None;
    for (key, value) in doc {
        if key == MONGO_ID {
            record.insert(ID_FIELD, from_bson(value));
        } else if expand.is_some_and(|plan| plan.relation.name == key) {
            nested = Some(value);
        } else {
            record.insert(key, from_bson(value));
        }
    }
    let mut record = normalize_record(schema, record)?;

    if let Some(plan) = expand {
        let related = match nested {
            Some(Bson::Document(doc)) => Value::Record(from_document(&plan.target, doc, None)?),
            _ => Value::Null,
        };
        record.insert(plan.relation.name.clone(), related);
    }
    Ok(record)
}

/// `_id` selector; identifiers that cannot be ObjectIds match nothing
pub(crate) fn id_filter(id: &Identifier) -> Option<Document> {
    match id {
        Identifier::Token(token) => ObjectId::parse_str(token)
            .ok()
            .map(|oid| bson::doc! { "_id": oid }),
        Identifier::Int(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datagate::{FieldDef, Relation};

    #[test]
    fn test_nested_values_survive_both_ways() {
        let record = Record::new()
            .with("id", "ignored")
            .with(
                "items",
                Value::List(vec![Value::Record(
                    Record::new().with("productName", "Latte").with("quantity", 2),
                )]),
            )
            .with("total", 4.5);
        let doc = to_document(&record);
        assert!(!doc.contains_key("id"));

        let back = from_document(&CollectionSchema::permissive("orders"), doc, None).unwrap();
        assert_eq!(back.get_path("items.0.productName"), Some(&Value::from("Latte")));
        assert_eq!(back.get_path("items.0.quantity"), Some(&Value::Int(2)));
        assert_eq!(back.get("total"), Some(&Value::Float(4.5)));
    }

    #[test]
    fn test_object_id_becomes_token() {
        let oid = ObjectId::new();
        let doc = bson::doc! { "_id": oid, "name": "x" };
        let record = from_document(&CollectionSchema::permissive("users"), doc, None).unwrap();
        assert_eq!(record.id(), Some(Identifier::Token(oid.to_hex())));
        assert!(id_filter(&Identifier::Token(oid.to_hex())).is_some());
        assert!(id_filter(&Identifier::Token("not-an-oid".into())).is_none());
        assert!(id_filter(&Identifier::Int(3)).is_none());
    }

    #[test]
    fn test_timestamps_keep_millisecond_precision() {
        let ts = Utc.timestamp_millis_opt(1_714_566_600_250).unwrap();
        assert_eq!(from_bson(to_bson(&Value::Timestamp(ts))), Value::Timestamp(ts));
    }

    #[test]
    fn test_expanded_relation_is_nested_or_null() {
        let orders = CollectionSchema::new("orders").field(FieldDef::reference("userId", "users"));
        let plan = ExpandPlan {
            relation: Relation::new("user", "userId", "users"),
            target: CollectionSchema::new("users").field(FieldDef::boolean("isActive")),
        };
        let oid = ObjectId::new();
        let hit = bson::doc! {
            "_id": ObjectId::new(),
            "userId": oid.to_hex(),
            "user": { "_id": oid, "isActive": true },
        };
        let record = from_document(&orders, hit, Some(&plan)).unwrap();
        assert_eq!(record.get_path("user.isActive"), Some(&Value::Bool(true)));
        assert_eq!(record.get_path("user.id"), Some(&Value::from(oid.to_hex())));

        let miss = bson::doc! { "_id": ObjectId::new(), "userId": "gone", "user": Bson::Null };
        let record = from_document(&orders, miss, Some(&plan)).unwrap();
        assert_eq!(record.get("user"), Some(&Value::Null));
    }
}
