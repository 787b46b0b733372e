use crate::config::{ExpandStrategy, GateOptions};
use crate::error::{DataError, Result};
use crate::expand;
use crate::query::{
    filters_from_record, FilterMap, Page, Pagination, QueryDescriptor, QueryPlan, Search, Sort,
};
use crate::registry::{ConnectionConfig, Registry};
use crate::schema::{Catalog, CollectionSchema, FieldType};
use crate::traits::{Capability, Store};
use crate::types::{parse_path, Identifier, PathSegment, Record, Value, CREATED_AT, UPDATED_AT};
use crate::validate;
use chrono::{DateTime, TimeZone, Utc};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info};

/// Millisecond precision survives every engine's timestamp type
fn now() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

/// Engine-neutral CRUD facade
///
/// Callers address collections by name and get canonical [`Record`]s back no
/// matter which backend is behind `store`. Holds no per-operation state;
/// clones share the same backend.
#[derive(Clone)]
pub struct DataGate {
    store: Arc<dyn Store>,
    catalog: Arc<Catalog>,
    options: GateOptions,
}

impl DataGate {
    pub fn new(store: Arc<dyn Store>, catalog: Catalog, options: GateOptions) -> Self {
        Self {
            store,
            catalog: Arc::new(catalog),
            options,
        }
    }

    /// Validate the catalog and connect the backend selected by `config.engine`
    pub async fn connect(
        registry: &Registry,
        config: &ConnectionConfig,
        catalog: Catalog,
        options: GateOptions,
    ) -> Result<Self> {
        catalog.validate()?;
        let store = registry.connect(config).await?;
        info!(
            "Connected {} backend at {}",
            store.source_type(),
            config.connection_string()
        );
        Ok(Self::new(store, catalog, options))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Concrete backend, for engine-specific calls outside the facade
    pub fn backend<T: Store>(&self) -> Option<&T> {
        self.store.as_ref().downcast_ref::<T>()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn options(&self) -> &GateOptions {
        &self.options
    }

    fn relational(&self) -> bool {
        self.store.supports(Capability::Sql)
    }

    /// Unknown fields are rejected only where the engine has a fixed schema
    fn strict(&self, schema: &CollectionSchema) -> bool {
        schema.strict && self.relational()
    }

    fn schema_for(&self, collection: &str) -> Result<Cow<'_, CollectionSchema>> {
        match self.catalog.get(collection) {
            Some(schema) => Ok(Cow::Borrowed(schema)),
            None if !self.relational() => Ok(Cow::Owned(CollectionSchema::permissive(collection))),
            None => Err(DataError::invalid_configuration(format!(
                "collection '{}' is not declared in the catalog",
                collection
            ))),
        }
    }

    /// Create storage for every declared collection
    pub async fn init(&self) -> Result<()> {
        self.store.init(&self.catalog).await?;
        info!(
            "Initialized {} collections on {}",
            self.catalog.collections.len(),
            self.store.source_type()
        );
        Ok(())
    }

    /// Insert one record; the returned record carries the engine-assigned id
    /// and the generated timestamps
    pub async fn create(&self, collection: &str, record: Record) -> Result<Record> {
        let schema = self.schema_for(collection)?;
        let mut record = validate::validate_new(&schema, record, self.strict(&schema))?;
        if schema.timestamps {
            let now = now();
            record.insert(CREATED_AT, now);
            record.insert(UPDATED_AT, now);
        }
        debug!("Creating record in {}", collection);
        self.store.insert(&schema, record).await
    }

    /// Insert many records; one result per input, in input order
    ///
    /// Invalid records fail individually without reaching the engine. The
    /// outer error is reserved for problems with the collection itself.
    pub async fn insert_many(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Result<Record>>> {
        let schema = self.schema_for(collection)?;
        let strict = self.strict(&schema);
        let stamp = now();

        let mut results: Vec<Option<Result<Record>>> = Vec::with_capacity(records.len());
        let mut slots = Vec::with_capacity(records.len());
        let mut valid = Vec::with_capacity(records.len());
        for (i, record) in records.into_iter().enumerate() {
            match validate::validate_new(&schema, record, strict) {
                Ok(mut record) => {
                    if schema.timestamps {
                        record.insert(CREATED_AT, stamp);
                        record.insert(UPDATED_AT, stamp);
                    }
                    slots.push(i);
                    valid.push(record);
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let submitted = valid.len();
        let inserted = if valid.is_empty() {
            Vec::new()
        } else {
            self.store
                .insert_many(&schema, valid, self.options.bulk_concurrency)
                .await
        };
        for (slot, outcome) in slots.into_iter().zip(inserted) {
            results[slot] = Some(outcome);
        }

        let results: Vec<Result<Record>> = results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(DataError::Internal("no result for bulk item".to_string())))
            })
            .collect();
        debug!(
            "Bulk insert into {}: {} submitted, {} stored",
            collection,
            submitted,
            results.iter().filter(|r| r.is_ok()).count()
        );
        Ok(results)
    }

    /// `None` when no record has this id
    pub async fn find_by_id(&self, collection: &str, id: &Identifier) -> Result<Option<Record>> {
        let schema = self.schema_for(collection)?;
        self.store.get(&schema, id).await
    }

    /// First record whose fields equal every field of `predicate`
    ///
    /// Text equality follows [`GateOptions::text_match`]; it is exact and
    /// case-sensitive unless configured otherwise.
    pub async fn find_one(&self, collection: &str, predicate: &Record) -> Result<Option<Record>> {
        let schema = self.schema_for(collection)?;
        let plan = QueryPlan::matching(filters_from_record(predicate), self.options.text_match)
            .with_limit(1);
        Ok(self.store.query(&schema, &plan).await?.into_iter().next())
    }

    /// Every record of a small collection, fully materialized
    pub async fn find_all(&self, collection: &str) -> Result<Vec<Record>> {
        let schema = self.schema_for(collection)?;
        let plan = QueryPlan::matching(FilterMap::new(), self.options.text_match);
        self.store.query(&schema, &plan).await
    }

    /// Filtered, searched, sorted and paginated read with optional expansion
    pub async fn find_all_advanced(
        &self,
        collection: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<Page> {
        let schema = self.schema_for(collection)?;
        let page = descriptor.page.unwrap_or(1);
        let limit = descriptor.limit.unwrap_or(self.options.default_limit);
        if page == 0 {
            return Err(DataError::validation("page must be at least 1"));
        }
        if limit == 0 || limit > self.options.max_limit {
            return Err(DataError::validation(format!(
                "limit must be between 1 and {}",
                self.options.max_limit
            )));
        }
        // engines take signed offsets
        let offset = (page - 1)
            .checked_mul(limit)
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| DataError::validation("page is out of range"))?;

        let search = match descriptor.q.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => Some(Search {
                term: term.to_string(),
                fields: self.search_fields(&schema)?,
            }),
            _ => None,
        };
        let expansion = match &descriptor.expand {
            Some(name) => Some(expand::plan(
                &self.catalog,
                &schema,
                name,
                !self.relational(),
            )?),
            None => None,
        };
        let native = expansion.is_some()
            && self.options.expand_strategy == ExpandStrategy::Auto
            && self.store.supports(Capability::NativeJoin);

        let mut plan = QueryPlan::matching(descriptor.filter.clone(), self.options.text_match);
        plan.search = search;
        plan.sort = descriptor.sort.as_ref().map(|field| Sort {
            field: field.clone(),
            order: descriptor.order,
        });
        plan.offset = offset;
        plan.limit = Some(limit);
        if native {
            plan.expand = expansion.clone();
        }

        let total = self.store.count(&schema, &plan).await?;
        let mut data = self.store.query(&schema, &plan).await?;
        if let (Some(expansion), false) = (&expansion, native) {
            expand::follow_up(
                self.store.as_ref(),
                expansion,
                &mut data,
                self.options.bulk_concurrency,
            )
            .await?;
        }

        debug!(
            "Query on {} returned {} of {} (page {}, limit {})",
            collection,
            data.len(),
            total,
            page,
            limit
        );
        Ok(Page {
            data,
            pagination: Pagination {
                page,
                limit,
                total: Some(total),
            },
        })
    }

    fn search_fields(&self, schema: &CollectionSchema) -> Result<Vec<String>> {
        let fields = schema.search_fields();
        if schema.is_permissive() {
            return Ok(fields);
        }
        let usable: Vec<String> = fields
            .into_iter()
            .filter(|f| schema.json_root(f).is_some() || schema.column_for(f).is_ok())
            .collect();
        if usable.is_empty() {
            return Err(DataError::invalid_query(format!(
                "collection '{}' has no searchable fields",
                schema.name
            )));
        }
        Ok(usable)
    }

    /// Merge `patch` into the stored record and return the result
    pub async fn update(&self, collection: &str, id: &Identifier, patch: Record) -> Result<Record> {
        let schema = self.schema_for(collection)?;
        let mut patch = validate::validate_patch(&schema, patch, self.strict(&schema))?;
        if schema.timestamps {
            patch.insert(UPDATED_AT, now());
        }
        debug!("Updating {}/{}", collection, id);
        self.store
            .update(&schema, id, patch)
            .await?
            .ok_or_else(|| DataError::not_found(format!("{}/{}", collection, id)))
    }

    /// Replace one value nested in a JSON field, e.g. `items.0.quantity`
    pub async fn set_path(
        &self,
        collection: &str,
        id: &Identifier,
        path: &str,
        value: impl Into<Value>,
    ) -> Result<Record> {
        let schema = self.schema_for(collection)?;
        let segments = parse_path(path)?;
        let (field, rest) = match segments.split_first() {
            Some((PathSegment::Key(field), rest)) if !rest.is_empty() => (field.clone(), rest),
            _ => {
                return Err(DataError::validation(format!(
                    "'{}' must name a field and a nested path",
                    path
                )))
            }
        };
        validate::validate_path_target(&schema, &field, self.strict(&schema))?;

        let mut touch = Record::new();
        if schema.timestamps {
            touch.insert(UPDATED_AT, now());
        }
        debug!("Setting {} on {}/{}", path, collection, id);
        self.store
            .set_path(&schema, id, &field, rest, value.into(), touch)
            .await?
            .ok_or_else(|| DataError::not_found(format!("{}/{}", collection, id)))
    }

    /// Remove a record; `false` when it was already gone
    pub async fn delete(&self, collection: &str, id: &Identifier) -> Result<bool> {
        let schema = self.schema_for(collection)?;
        let deleted = self.store.delete(&schema, id).await?;
        debug!("Delete {}/{}: {}", collection, id, deleted);
        Ok(deleted)
    }

    /// Server-side count of matching records
    pub async fn count(&self, collection: &str, filter: &FilterMap) -> Result<u64> {
        let schema = self.schema_for(collection)?;
        let plan = QueryPlan::matching(filter.clone(), self.options.text_match);
        self.store.count(&schema, &plan).await
    }

    /// Server-side sum of a numeric field over matching records
    pub async fn sum(&self, collection: &str, field: &str, filter: &FilterMap) -> Result<f64> {
        let schema = self.schema_for(collection)?;
        if let Some(def) = schema.field_def(field) {
            if !matches!(def.field_type, FieldType::Integer | FieldType::Float) {
                return Err(DataError::invalid_query(format!(
                    "cannot sum non-numeric field '{}'",
                    field
                )));
            }
        }
        let plan = QueryPlan::matching(filter.clone(), self.options.text_match);
        self.store.sum(&schema, field, &plan).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    /// Release the backend's connections; safe to call more than once
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::schema::FieldDef;

    fn gate() -> DataGate {
        let catalog = Catalog::new().with(
            CollectionSchema::new("users")
                .field(FieldDef::string("email").required())
                .field(FieldDef::string("name")),
        );
        DataGate::new(Arc::new(MemoryStore::new()), catalog, GateOptions::default())
    }

    #[tokio::test]
    async fn test_create_stamps_timestamps() {
        let gate = gate();
        let user = gate
            .create("users", Record::new().with("email", "a@b.c"))
            .await
            .unwrap();
        assert!(user.id().is_some());
        assert_eq!(user.get(CREATED_AT), user.get(UPDATED_AT));
        assert!(user.get(CREATED_AT).unwrap().as_timestamp().is_some());
    }

    #[tokio::test]
    async fn test_validation_happens_before_the_store() {
        let gate = gate();
        let err = gate.create("users", Record::new().with("name", "x")).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(gate.backend::<MemoryStore>().unwrap().len("users").await, 0);
    }

    #[tokio::test]
    async fn test_schemaless_engine_accepts_undeclared_collections() {
        let gate = gate();
        let tag = gate
            .create("tags", Record::new().with("label", "hot"))
            .await
            .unwrap();
        assert_eq!(tag.get("label"), Some(&Value::from("hot")));
    }

    #[tokio::test]
    async fn test_page_and_limit_bounds() {
        let gate = gate();
        let zero = QueryDescriptor::new().page(0);
        assert!(gate.find_all_advanced("users", &zero).await.unwrap_err().is_validation());
        let huge = QueryDescriptor::new().limit(5000);
        assert!(gate.find_all_advanced("users", &huge).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_offset_beyond_signed_range_is_rejected() {
        let gate = gate();
        let far = QueryDescriptor::new().page((1 << 60) + 1).limit(8);
        let err = gate.find_all_advanced("users", &far).await.unwrap_err();
        assert!(err.is_validation(), "{:?}", err);

        let last_signed = QueryDescriptor::new().page((1 << 59) + 1).limit(8);
        let page = gate.find_all_advanced("users", &last_signed).await.unwrap();
        assert!(page.data.is_empty());
    }

    #[tokio::test]
    async fn test_search_without_usable_fields_is_invalid_everywhere() {
        let catalog = Catalog::new().with(
            CollectionSchema::new("counters")
                .field(FieldDef::integer("value"))
                .searchable(["missing"]),
        );
        let gate = DataGate::new(Arc::new(MemoryStore::new()), catalog, GateOptions::default());
        let err = gate
            .find_all_advanced("counters", &QueryDescriptor::new().search("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidQuery(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_set_path_requires_nested_path() {
        let gate = gate();
        let err = gate
            .set_path("users", &Identifier::Int(1), "email", "x")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let gate = gate();
        let err = gate
            .update("users", &Identifier::Int(42), Record::new().with("name", "x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
