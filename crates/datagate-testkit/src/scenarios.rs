//! Behavioural checks every backend must pass.
//!
//! Each scenario takes a facade whose catalog is [`shop_catalog`] and that
//! has already been initialized. Scenarios only touch records they create,
//! so they can share one database and run in any order.
//!
//! [`shop_catalog`]: crate::fixtures::shop_catalog

use crate::fixtures::{order, unique, user};
use anyhow::{anyhow, ensure, Context, Result};
use datagate::{DataGate, FilterMap, Identifier, QueryDescriptor, Record, SortOrder, Value};
use serde_json::json;
use tracing::info;

fn id_of(record: &Record) -> Result<Identifier> {
    record.id().ok_or_else(|| anyhow!("record has no id: {:?}", record))
}

async fn new_user(gate: &DataGate) -> Result<Record> {
    let tag = unique("user");
    gate.create("users", user(&format!("{}@example.com", tag), &tag))
        .await
        .context("create user")
}

/// Supplied fields read back unchanged, nested structure included.
pub async fn round_trip(gate: &DataGate) -> Result<()> {
    let created = new_user(gate).await?;
    let id = id_of(&created)?;
    let found = gate
        .find_by_id("users", &id)
        .await?
        .ok_or_else(|| anyhow!("user {} not found after create", id))?;

    for field in ["email", "name", "isActive"] {
        ensure!(
            found.get(field) == created.get(field),
            "field {} changed: {:?} vs {:?}",
            field,
            found.get(field),
            created.get(field)
        );
    }
    ensure!(found.get_path("settings.theme") == Some(&Value::from("dark")));
    ensure!(found.get_path("settings.notifications.sms") == Some(&Value::Bool(false)));
    ensure!(found.get("isActive") == Some(&Value::Bool(true)));
    ensure!(
        found.get("createdAt").and_then(Value::as_timestamp).is_some(),
        "createdAt is not a timestamp"
    );
    Ok(())
}

/// Lists of objects inside a JSON field keep order, types and nesting.
pub async fn nested_preservation(gate: &DataGate) -> Result<()> {
    let owner = new_user(gate).await?;
    let created = gate.create("orders", order(&id_of(&owner)?, 12.5)).await?;
    let found = gate
        .find_by_id("orders", &id_of(&created)?)
        .await?
        .ok_or_else(|| anyhow!("order not found"))?;

    ensure!(found.get_path("items.0.productName") == Some(&Value::from("Latte")));
    ensure!(found.get_path("items.0.quantity") == Some(&Value::Int(2)));
    ensure!(found.get_path("items.0.unitPrice") == Some(&Value::Float(4.5)));
    ensure!(found.get_path("items.0.modifiers.0.name") == Some(&Value::from("Oat Milk")));
    ensure!(found.get_path("items.1.productName") == Some(&Value::from("Croissant")));
    ensure!(found.get("total") == Some(&Value::Float(12.5)));
    Ok(())
}

/// Text equality is exact unless the facade was configured otherwise.
pub async fn case_sensitive_match(gate: &DataGate) -> Result<()> {
    let name = unique("Alice");
    gate.create("users", user(&format!("{}@example.com", name), &name))
        .await?;

    let exact = gate
        .find_one("users", &Record::new().with("name", name.as_str()))
        .await?;
    ensure!(exact.is_some(), "exact match not found");

    let folded = gate
        .find_one("users", &Record::new().with("name", name.to_lowercase()))
        .await?;
    ensure!(folded.is_none(), "lower-cased name matched under exact policy");

    let raised = gate
        .find_one("users", &Record::new().with("name", name.to_uppercase()))
        .await?;
    ensure!(raised.is_none(), "upper-cased name matched under exact policy");
    Ok(())
}

/// Windows are stable, sorted, and report the unwindowed total.
pub async fn pagination(gate: &DataGate) -> Result<()> {
    let batch = unique("batch");
    for i in 0..12 {
        gate.create(
            "categories",
            Record::new()
                .with("name", format!("cat-{:02}", i))
                .with("description", batch.as_str()),
        )
        .await?;
    }

    let page = gate
        .find_all_advanced(
            "categories",
            &QueryDescriptor::new()
                .eq("description", batch.as_str())
                .sort_by("name", SortOrder::Desc)
                .page(3)
                .limit(5),
        )
        .await?;
    ensure!(page.pagination.total == Some(12), "total {:?}", page.pagination.total);
    ensure!(page.pagination.page == 3 && page.pagination.limit == 5);
    let names: Vec<&str> = page
        .data
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str))
        .collect();
    ensure!(names == ["cat-01", "cat-00"], "page 3 was {:?}", names);

    let past_end = gate
        .find_all_advanced(
            "categories",
            &QueryDescriptor::new()
                .eq("description", batch.as_str())
                .page(9)
                .limit(5),
        )
        .await?;
    ensure!(past_end.data.is_empty());
    ensure!(past_end.pagination.total == Some(12));
    Ok(())
}

/// Free-text search is case-insensitive substring matching over searchable fields.
pub async fn search(gate: &DataGate) -> Result<()> {
    let owner = new_user(gate).await?;
    let owner_id = id_of(&owner)?;
    gate.create(
        "orders",
        order(&owner_id, 4.0).with("notes", "Deliver with PRIORITY please"),
    )
    .await?;
    gate.create("orders", order(&owner_id, 5.0).with("notes", "no rush"))
        .await?;

    let page = gate
        .find_all_advanced(
            "orders",
            &QueryDescriptor::new()
                .eq("userId", owner_id.to_value())
                .search("priority"),
        )
        .await?;
    ensure!(page.pagination.total == Some(1), "search matched {:?}", page.pagination.total);
    ensure!(page.data[0].get("total") == Some(&Value::Float(4.0)));
    Ok(())
}

/// Deleting twice succeeds and leaves nothing behind.
pub async fn idempotent_delete(gate: &DataGate) -> Result<()> {
    let created = new_user(gate).await?;
    let id = id_of(&created)?;
    ensure!(gate.delete("users", &id).await?, "first delete found nothing");
    ensure!(!gate.delete("users", &id).await?, "second delete reported a deletion");
    ensure!(gate.find_by_id("users", &id).await?.is_none());
    Ok(())
}

/// Every successful bulk item is readable; failures are reported per item
/// in input order.
pub async fn bulk_consistency(gate: &DataGate) -> Result<()> {
    let tag = unique("bulk");
    let records = vec![
        user(&format!("{}-0@example.com", tag), &tag),
        user(&format!("{}-1@example.com", tag), &tag),
        Record::new().with("name", tag.as_str()),
        user(&format!("{}-3@example.com", tag), &tag),
    ];
    let results = gate.insert_many("users", records).await?;
    ensure!(results.len() == 4);
    match &results[2] {
        Err(e) if e.is_validation() => {}
        other => return Err(anyhow!("record without email gave {:?}", other)),
    }

    for (i, result) in results.iter().enumerate().filter(|(i, _)| *i != 2) {
        let inserted = result.as_ref().map_err(|e| anyhow!("item {}: {}", i, e))?;
        let expected = format!("{}-{}@example.com", tag, i);
        ensure!(inserted.get("email") == Some(&Value::from(expected.as_str())));
        ensure!(
            gate.find_by_id("users", &id_of(inserted)?).await?.is_some(),
            "item {} not readable",
            i
        );
    }

    let stored = gate
        .count("users", &QueryDescriptor::new().eq("name", tag.as_str()).filter)
        .await?;
    ensure!(stored == 3, "stored {} of 3", stored);
    Ok(())
}

/// Expanding a relation nests the referenced record under the relation name.
pub async fn expansion(gate: &DataGate) -> Result<()> {
    let owner = new_user(gate).await?;
    let owner_id = id_of(&owner)?;
    gate.create("orders", order(&owner_id, 9.0)).await?;

    for relation in ["user", "buyer"] {
        let page = gate
            .find_all_advanced(
                "orders",
                &QueryDescriptor::new()
                    .eq("userId", owner_id.to_value())
                    .expand(relation),
            )
            .await?;
        ensure!(page.data.len() == 1);
        let nested = page.data[0]
            .get(relation)
            .and_then(Value::as_record)
            .ok_or_else(|| anyhow!("'{}' not expanded: {:?}", relation, page.data[0]))?;
        ensure!(nested.get("email") == owner.get("email"));
        ensure!(nested.id() == Some(owner_id.clone()));
    }
    Ok(())
}

/// Schemaless stores keep a reference to a missing record and expand it to null.
///
/// Relational engines enforce the reference, so this is not part of [`run_all`].
pub async fn dangling_reference_accepted(gate: &DataGate) -> Result<()> {
    let gone = new_user(gate).await?;
    let gone_id = id_of(&gone)?;
    ensure!(gate.delete("users", &gone_id).await?, "user was not deleted");

    let created = gate.create("orders", order(&gone_id, 2.0)).await?;
    ensure!(
        created.get("userId") == Some(&gone_id.to_value()),
        "reference not stored: {:?}",
        created
    );

    let page = gate
        .find_all_advanced(
            "orders",
            &QueryDescriptor::new()
                .eq("userId", gone_id.to_value())
                .expand("user"),
        )
        .await?;
    ensure!(page.data.len() == 1, "matched {}", page.data.len());
    ensure!(page.data[0].get("userId") == Some(&gone_id.to_value()));
    ensure!(
        page.data[0].get("user") == Some(&Value::Null),
        "dangling reference expanded to {:?}",
        page.data[0].get("user")
    );
    Ok(())
}

/// A nested write replaces one value and leaves its siblings alone.
pub async fn nested_update(gate: &DataGate) -> Result<()> {
    let owner = new_user(gate).await?;
    let created = gate.create("orders", order(&id_of(&owner)?, 9.0)).await?;
    let id = id_of(&created)?;

    let updated = gate.set_path("orders", &id, "items.0.quantity", 5).await?;
    ensure!(updated.get_path("items.0.quantity") == Some(&Value::Int(5)));

    let found = gate
        .find_by_id("orders", &id)
        .await?
        .ok_or_else(|| anyhow!("order vanished"))?;
    ensure!(found.get_path("items.0.quantity") == Some(&Value::Int(5)));
    ensure!(found.get_path("items.0.modifiers.0.name") == Some(&Value::from("Oat Milk")));
    ensure!(found.get_path("items.1.quantity") == Some(&Value::Int(1)));

    let created_at = found.get("createdAt").and_then(Value::as_timestamp);
    let updated_at = found.get("updatedAt").and_then(Value::as_timestamp);
    ensure!(created_at.is_some() && updated_at >= created_at);

    let missing = gate
        .set_path("orders", &Identifier::Int(i64::MAX), "items.0.quantity", 1)
        .await;
    ensure!(matches!(missing, Err(ref e) if e.is_not_found()), "{:?}", missing);
    Ok(())
}

/// Partial updates merge and unknown ids are reported as not found.
pub async fn update(gate: &DataGate) -> Result<()> {
    let created = new_user(gate).await?;
    let id = id_of(&created)?;
    let updated = gate
        .update("users", &id, Record::new().with("isActive", false))
        .await?;
    ensure!(updated.get("isActive") == Some(&Value::Bool(false)));
    ensure!(updated.get("email") == created.get("email"));

    let missing = gate
        .update(
            "users",
            &Identifier::Int(i64::MAX),
            Record::new().with("name", "ghost"),
        )
        .await;
    ensure!(matches!(missing, Err(ref e) if e.is_not_found()), "{:?}", missing);
    Ok(())
}

/// Count and sum run over the matching records only.
pub async fn aggregates(gate: &DataGate) -> Result<()> {
    let owner = new_user(gate).await?;
    let owner_id = id_of(&owner)?;
    for total in [1.5, 2.5, 3.0] {
        gate.create("orders", order(&owner_id, total)).await?;
    }
    let mut filter = FilterMap::new();
    filter.insert("userId".to_string(), owner_id.to_value().into());

    ensure!(gate.count("orders", &filter).await? == 3);
    let sum = gate.sum("orders", "total", &filter).await?;
    ensure!((sum - 7.0).abs() < 1e-9, "sum was {}", sum);

    let mut none = FilterMap::new();
    none.insert("status".to_string(), Value::from(unique("nobody")).into());
    ensure!(gate.sum("orders", "total", &none).await? == 0.0);
    Ok(())
}

/// Filters on values nested in JSON fields.
pub async fn nested_filter(gate: &DataGate) -> Result<()> {
    let owner = new_user(gate).await?;
    let owner_id = id_of(&owner)?;
    let marker = unique("Mocha");
    let special = Value::from(json!([{"productName": marker, "quantity": 1}]));
    gate.create("orders", order(&owner_id, 6.0).with("items", special))
        .await?;
    gate.create("orders", order(&owner_id, 7.0)).await?;

    let page = gate
        .find_all_advanced(
            "orders",
            &QueryDescriptor::new().eq("items.productName", marker.as_str()),
        )
        .await?;
    ensure!(page.pagination.total == Some(1), "matched {:?}", page.pagination.total);
    ensure!(page.data[0].get("total") == Some(&Value::Float(6.0)));
    Ok(())
}

/// Run every scenario in sequence, stopping at the first failure.
pub async fn run_all(gate: &DataGate) -> Result<()> {
    macro_rules! run {
        ($($scenario:ident),* $(,)?) => {
            $(
                $scenario(gate)
                    .await
                    .with_context(|| format!("scenario {}", stringify!($scenario)))?;
                info!("scenario {} passed on {}", stringify!($scenario), gate.store().source_type());
            )*
        };
    }
    run!(
        round_trip,
        nested_preservation,
        case_sensitive_match,
        pagination,
        search,
        idempotent_delete,
        bulk_consistency,
        expansion,
        nested_update,
        update,
        aggregates,
        nested_filter,
    );
    Ok(())
}
