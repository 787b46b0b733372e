//! Embedded backend keeping every collection in process memory
//!
//! Behaves like a schemaless engine without constraints or native joins, so
//! expansion always goes through follow-up lookups. Useful for tests and for
//! running the CLI without a database.

use crate::config::TextMatch;
use crate::error::{DataError, Result};
use crate::query::{Filter, QueryPlan};
use crate::registry::{ConnectionConfig, EngineKind, StoreFactory};
use crate::schema::{Catalog, CollectionSchema};
use crate::traits::{Capability, DataSource, ItemAccess, Queryable, Store};
use crate::types::{parse_path, Identifier, PathSegment, Record, Value, ID_FIELD};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Collection {
    next_id: i64,
    rows: BTreeMap<i64, Record>,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held in `collection`
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.rows.len())
            .unwrap_or(0)
    }

    fn matching<'a>(
        rows: impl Iterator<Item = &'a Record>,
        plan: &'a QueryPlan,
    ) -> impl Iterator<Item = &'a Record> {
        rows.filter(move |record| matches_plan(record, plan))
    }
}

#[async_trait]
impl DataSource for MemoryStore {
    fn source_type(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Document, Capability::TextSearch]
    }

    async fn init(&self, catalog: &Catalog) -> Result<()> {
        let mut collections = self.collections.write().await;
        for schema in catalog.iter() {
            collections.entry(schema.name.clone()).or_default();
        }
        debug!("Initialized {} in-memory collections", collections.len());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing in-memory store");
        Ok(())
    }
}

#[async_trait]
impl ItemAccess for MemoryStore {
    async fn insert(&self, schema: &CollectionSchema, mut record: Record) -> Result<Record> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(schema.name.clone()).or_default();
        collection.next_id += 1;
        let id = collection.next_id;
        record.insert(ID_FIELD, id);
        collection.rows.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, schema: &CollectionSchema, id: &Identifier) -> Result<Option<Record>> {
        let Some(id) = id.as_i64() else {
            return Ok(None);
        };
        Ok(self
            .collections
            .read()
            .await
            .get(&schema.name)
            .and_then(|c| c.rows.get(&id).cloned()))
    }

    async fn update(
        &self,
        schema: &CollectionSchema,
        id: &Identifier,
        patch: Record,
    ) -> Result<Option<Record>> {
        let Some(id) = id.as_i64() else {
            return Ok(None);
        };
        let mut collections = self.collections.write().await;
        let Some(row) = collections
            .get_mut(&schema.name)
            .and_then(|c| c.rows.get_mut(&id))
        else {
            return Ok(None);
        };
        row.merge(patch);
        Ok(Some(row.clone()))
    }

    async fn set_path(
        &self,
        schema: &CollectionSchema,
        id: &Identifier,
        field: &str,
        path: &[PathSegment],
        value: Value,
        touch: Record,
    ) -> Result<Option<Record>> {
        let Some(id) = id.as_i64() else {
            return Ok(None);
        };
        let mut collections = self.collections.write().await;
        let Some(row) = collections
            .get_mut(&schema.name)
            .and_then(|c| c.rows.get_mut(&id))
        else {
            return Ok(None);
        };

        // apply to a copy so a failed write leaves the row untouched
        let mut updated = row.clone();
        let mut full = vec![PathSegment::Key(field.to_string())];
        full.extend_from_slice(path);
        updated.set_path(&full, value)?;
        updated.merge(touch);
        *row = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, schema: &CollectionSchema, id: &Identifier) -> Result<bool> {
        let Some(id) = id.as_i64() else {
            return Ok(false);
        };
        Ok(self
            .collections
            .write()
            .await
            .get_mut(&schema.name)
            .map(|c| c.rows.remove(&id).is_some())
            .unwrap_or(false))
    }
}

#[async_trait]
impl Queryable for MemoryStore {
    async fn query(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<Vec<Record>> {
        if plan.expand.is_some() {
            return Err(DataError::operation_not_supported(
                "in-memory store has no native join",
            ));
        }
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&schema.name) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<&Record> = Self::matching(collection.rows.values(), plan).collect();
        if let Some(sort) = &plan.sort {
            rows.sort_by(|a, b| {
                let primary = sort_key(a, &sort.field).compare(sort_key(b, &sort.field));
                let primary = match sort.order {
                    crate::query::SortOrder::Asc => primary,
                    crate::query::SortOrder::Desc => primary.reverse(),
                };
                primary.then_with(|| sort_key(a, ID_FIELD).compare(sort_key(b, ID_FIELD)))
            });
        }

        let limit = plan.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(plan.offset as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<u64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&schema.name)
            .map(|c| Self::matching(c.rows.values(), plan).count() as u64)
            .unwrap_or(0))
    }

    async fn sum(&self, schema: &CollectionSchema, field: &str, plan: &QueryPlan) -> Result<f64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&schema.name)
            .map(|c| {
                Self::matching(c.rows.values(), plan)
                    .filter_map(|r| r.get_path(field).and_then(Value::as_f64))
                    .sum()
            })
            .unwrap_or(0.0))
    }
}

static NULL: Value = Value::Null;

fn sort_key<'a>(record: &'a Record, field: &str) -> &'a Value {
    record.get_path(field).unwrap_or(&NULL)
}

/// Every value reachable at `path`, fanning out over lists the way
/// document engines match array elements
fn values_at<'a>(value: &'a Value, path: &[PathSegment], out: &mut Vec<&'a Value>) {
    let Some((seg, rest)) = path.split_first() else {
        out.push(value);
        return;
    };
    match (seg, value) {
        (PathSegment::Index(i), Value::List(items)) => {
            if let Some(item) = items.get(*i) {
                values_at(item, rest, out);
            }
        }
        (PathSegment::Key(_), Value::List(items)) => {
            for item in items {
                values_at(item, path, out);
            }
        }
        (seg, Value::Record(r)) => {
            if let Some(child) = r.get(&seg.to_string()) {
                values_at(child, rest, out);
            }
        }
        _ => {}
    }
}

fn field_values<'a>(record: &'a Record, key: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    if let Ok(path) = parse_path(key) {
        if let Some((PathSegment::Key(root), rest)) = path.split_first() {
            if let Some(value) = record.get(root) {
                values_at(value, rest, &mut out);
            }
        }
    }
    out
}

fn eq_value(candidate: &Value, wanted: &Value, text_match: TextMatch) -> bool {
    match (candidate, wanted) {
        (Value::List(items), w) if !matches!(w, Value::List(_)) => {
            items.iter().any(|item| eq_value(item, w, text_match))
        }
        (Value::String(a), Value::String(b)) if text_match == TextMatch::CaseInsensitive => {
            a.to_lowercase() == b.to_lowercase()
        }
        (c, w) => c == w,
    }
}

fn contains_text(candidate: &Value, needle: &str) -> bool {
    match candidate {
        Value::Null => false,
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::List(items) => items.iter().any(|v| contains_text(v, needle)),
        Value::Record(r) => r.iter().any(|(_, v)| contains_text(v, needle)),
        other => other.to_json().to_string().to_lowercase().contains(needle),
    }
}

fn filter_matches(record: &Record, key: &str, filter: &Filter, text_match: TextMatch) -> bool {
    if key == ID_FIELD {
        let id = record.id().and_then(|id| id.as_i64());
        let wanted = |v: &Value| Identifier::from_value(v).and_then(|i| i.as_i64());
        return match filter {
            Filter::Eq(v) => id.is_some() && id == wanted(v),
            Filter::In(vs) => id.is_some() && vs.iter().any(|v| id == wanted(v)),
            Filter::Contains(t) => id
                .map(|i| i.to_string().contains(t.as_str()))
                .unwrap_or(false),
        };
    }

    let values = field_values(record, key);
    match filter {
        Filter::Eq(Value::Null) => values.is_empty() || values.iter().any(|v| v.is_null()),
        Filter::Eq(wanted) => values.iter().any(|v| eq_value(v, wanted, text_match)),
        Filter::Contains(text) => {
            let needle = text.to_lowercase();
            values.iter().any(|v| contains_text(v, &needle))
        }
        Filter::In(wanted) => wanted
            .iter()
            .any(|w| values.iter().any(|v| eq_value(v, w, text_match))),
    }
}

fn matches_plan(record: &Record, plan: &QueryPlan) -> bool {
    let filtered = plan
        .filter
        .iter()
        .all(|(key, filter)| filter_matches(record, key, filter, plan.text_match));
    if !filtered {
        return false;
    }
    match &plan.search {
        Some(search) => {
            let needle = search.term.to_lowercase();
            search.fields.iter().any(|field| {
                field_values(record, field)
                    .iter()
                    .any(|v| contains_text(v, &needle))
            })
        }
        None => true,
    }
}

/// Factory for [`MemoryStore`]; every connect yields an empty, independent store
pub struct MemoryFactory;

#[async_trait]
impl StoreFactory for MemoryFactory {
    fn engine(&self) -> EngineKind {
        EngineKind::Memory
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn Store>> {
        Ok(Arc::new(MemoryStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterMap, Search, Sort, SortOrder};
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::permissive("orders")
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (status, total, item) in [
            ("pending", 12.0, "Latte"),
            ("shipped", 5.5, "Espresso"),
            ("pending", 7.25, "Green Tea"),
        ] {
            let record = Record::try_from(json!({
                "status": status,
                "total": total,
                "items": [{"productName": item, "quantity": 1}]
            }))
            .unwrap();
            store.insert(&schema(), record).await.unwrap();
        }
        store
    }

    fn plan_with(key: &str, filter: Filter) -> QueryPlan {
        let mut f = FilterMap::new();
        f.insert(key.to_string(), filter);
        QueryPlan::matching(f, TextMatch::Exact)
    }

    #[tokio::test]
    async fn test_ids_are_sequential_per_collection() {
        let store = seeded().await;
        let other = CollectionSchema::permissive("users");
        let user = store.insert(&other, Record::new()).await.unwrap();
        assert_eq!(user.id(), Some(Identifier::Int(1)));
        assert_eq!(store.len("orders").await, 3);
    }

    #[tokio::test]
    async fn test_nested_path_filter_fans_out_over_lists() {
        let store = seeded().await;
        let found = store
            .query(&schema(), &plan_with("items.productName", Filter::Eq("Latte".into())))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let tea = store
            .count(&schema(), &plan_with("items.productName", Filter::Contains("tea".into())))
            .await
            .unwrap();
        assert_eq!(tea, 1);
    }

    #[tokio::test]
    async fn test_exact_match_is_case_sensitive_unless_configured() {
        let store = seeded().await;
        let mut plan = plan_with("status", Filter::Eq("PENDING".into()));
        assert_eq!(store.count(&schema(), &plan).await.unwrap(), 0);
        plan.text_match = TextMatch::CaseInsensitive;
        assert_eq!(store.count(&schema(), &plan).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sort_window_and_sum() {
        let store = seeded().await;
        let mut plan = QueryPlan::matching(FilterMap::new(), TextMatch::Exact);
        plan.sort = Some(Sort {
            field: "total".into(),
            order: SortOrder::Desc,
        });
        plan.offset = 1;
        plan.limit = Some(5);
        let rows = store.query(&schema(), &plan).await.unwrap();
        let totals: Vec<f64> = rows
            .iter()
            .map(|r| r.get("total").and_then(Value::as_f64).unwrap())
            .collect();
        assert_eq!(totals, vec![7.25, 5.5]);

        let pending = plan_with("status", Filter::Eq("pending".into()));
        assert_eq!(store.sum(&schema(), "total", &pending).await.unwrap(), 19.25);
    }

    #[tokio::test]
    async fn test_search_across_fields() {
        let store = seeded().await;
        let mut plan = QueryPlan::matching(FilterMap::new(), TextMatch::Exact);
        plan.search = Some(Search {
            term: "ESPRESSO".into(),
            fields: vec!["status".into(), "items".into()],
        });
        assert_eq!(store.count(&schema(), &plan).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_path_failure_leaves_row_untouched() {
        let store = seeded().await;
        let id = Identifier::Int(1);
        let err = store
            .set_path(
                &schema(),
                &id,
                "items",
                &parse_path("4.quantity").unwrap(),
                Value::Int(9),
                Record::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
        let row = store.get(&schema(), &id).await.unwrap().unwrap();
        assert_eq!(row.get_path("items.0.quantity"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_id_filter_accepts_numeric_tokens() {
        let store = seeded().await;
        let plan = plan_with(ID_FIELD, Filter::Eq(Value::from("2")));
        assert_eq!(store.count(&schema(), &plan).await.unwrap(), 1);
    }
}
