//! Shared catalog and sample records.
//!
//! The catalog models a small shop: categories, users, and orders whose
//! line items live in a JSON field.

use datagate::{
    Catalog, CollectionSchema, DataGate, FieldDef, GateOptions, Identifier, MemoryStore, Record,
    Relation, Value,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Catalog used by every conformance scenario.
pub fn shop_catalog() -> Catalog {
    Catalog::new()
        .with(
            CollectionSchema::new("categories")
                .field(FieldDef::string("name").required())
                .field(FieldDef::string("description")),
        )
        .with(
            CollectionSchema::new("users")
                .field(FieldDef::string("email").required())
                .field(FieldDef::string("name"))
                .field(FieldDef::boolean("isActive"))
                .field(FieldDef::json("settings"))
                .searchable(["name", "email"]),
        )
        .with(
            CollectionSchema::new("orders")
                .field(FieldDef::reference("userId", "users").required())
                .field(FieldDef::reference("categoryId", "categories"))
                .field(FieldDef::string("status"))
                .field(FieldDef::string("notes"))
                .field(FieldDef::float("total"))
                .field(FieldDef::json("items"))
                .searchable(["status", "notes"])
                .relation(Relation::new("buyer", "userId", "users")),
        )
}

/// A value no other scenario run will produce.
pub fn unique(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{:x}-{}",
        prefix,
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// New user record.
pub fn user(email: &str, name: &str) -> Record {
    Record::new()
        .with("email", email)
        .with("name", name)
        .with("isActive", true)
        .with(
            "settings",
            Value::from(json!({"theme": "dark", "notifications": {"email": true, "sms": false}})),
        )
}

/// Line items with nested modifiers, the shape the JSON field has to preserve.
pub fn latte_items() -> Value {
    Value::from(json!([
        {
            "productName": "Latte",
            "quantity": 2,
            "unitPrice": 4.5,
            "modifiers": [{"name": "Oat Milk", "price": 0.6}]
        },
        {
            "productName": "Croissant",
            "quantity": 1,
            "unitPrice": 3.25,
            "modifiers": []
        }
    ]))
}

/// New order record owned by `user_id`.
pub fn order(user_id: &Identifier, total: f64) -> Record {
    Record::new()
        .with("userId", user_id.to_value())
        .with("status", "pending")
        .with("total", total)
        .with("items", latte_items())
}

/// Facade over a fresh in-memory store with the shop catalog.
pub fn memory_gate() -> DataGate {
    DataGate::new(
        Arc::new(MemoryStore::new()),
        shop_catalog(),
        GateOptions::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shop_catalog_is_valid() {
        let catalog = shop_catalog();
        catalog.validate().unwrap();
        let order = catalog.in_dependency_order().unwrap();
        let names: Vec<&str> = order.iter().map(|s| s.name.as_str()).collect();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("users") < pos("orders"));
        assert!(pos("categories") < pos("orders"));
    }

    #[test]
    fn test_unique_values_differ() {
        assert_ne!(unique("x"), unique("x"));
    }
}
