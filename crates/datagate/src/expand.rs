use crate::error::{DataError, Result};
use crate::query::ExpandPlan;
use crate::schema::{Catalog, CollectionSchema};
use crate::traits::Store;
use crate::types::{Identifier, Record, Value};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::debug;

/// Resolve an `expand` directive against the base collection
///
/// Targets missing from the catalog are only acceptable on schemaless
/// engines (`allow_undeclared`), which get a permissive target schema.
pub fn plan(
    catalog: &Catalog,
    schema: &CollectionSchema,
    name: &str,
    allow_undeclared: bool,
) -> Result<ExpandPlan> {
    let relation = schema.resolve_relation(name).ok_or_else(|| {
        DataError::invalid_query(format!(
            "collection '{}' has no relation named '{}'",
            schema.name, name
        ))
    })?;
    let target = match catalog.get(&relation.target) {
        Some(target) => target.clone(),
        None if allow_undeclared => CollectionSchema::permissive(&relation.target),
        None => {
            return Err(DataError::invalid_configuration(format!(
                "relation '{}' targets undeclared collection '{}'",
                name, relation.target
            )))
        }
    };
    Ok(ExpandPlan { relation, target })
}

/// Emulate a join: fetch each distinct referenced record once and nest it
/// under the relation name (null when the reference dangles)
pub async fn follow_up(
    store: &dyn Store,
    plan: &ExpandPlan,
    records: &mut [Record],
    concurrency: usize,
) -> Result<()> {
    let mut ids: Vec<Identifier> = records
        .iter()
        .filter_map(|r| r.get(&plan.relation.local_field))
        .filter_map(Identifier::from_value)
        .collect();
    ids.sort();
    ids.dedup();

    debug!(
        "Expanding '{}' with {} follow-up lookups on {}",
        plan.relation.name,
        ids.len(),
        plan.target.name
    );

    let fetched: HashMap<Identifier, Option<Record>> = stream::iter(ids)
        .map(|id| async move {
            let found = store.get(&plan.target, &id).await?;
            Ok::<_, DataError>((id, found))
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    for record in records.iter_mut() {
        let related = record
            .get(&plan.relation.local_field)
            .and_then(Identifier::from_value)
            .and_then(|id| fetched.get(&id).cloned().flatten())
            .map(Value::Record)
            .unwrap_or(Value::Null);
        record.insert(plan.relation.name.clone(), related);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, Relation};

    fn catalog() -> Catalog {
        Catalog::new()
            .with(CollectionSchema::new("users").field(FieldDef::string("email")))
            .with(
                CollectionSchema::new("orders")
                    .field(FieldDef::reference("userId", "users"))
                    .relation(Relation::new("buyer", "userId", "users")),
            )
    }

    #[test]
    fn test_plan_by_declared_name_and_convention() {
        let c = catalog();
        let orders = c.get("orders").unwrap();
        assert_eq!(plan(&c, orders, "buyer", false).unwrap().target.name, "users");
        assert_eq!(
            plan(&c, orders, "user", false).unwrap().relation.local_field,
            "userId"
        );
        assert!(plan(&c, orders, "store", false).is_err());
    }

    #[test]
    fn test_plan_for_undeclared_target() {
        let c = Catalog::new();
        let orders = CollectionSchema::permissive("orders");
        assert!(plan(&c, &orders, "user", true).unwrap().target.is_permissive());
        assert!(plan(&c, &orders, "user", false).is_err());
    }
}
