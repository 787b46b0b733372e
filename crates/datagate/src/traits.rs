use crate::error::Result;
use crate::query::QueryPlan;
use crate::schema::{Catalog, CollectionSchema};
use crate::types::{Identifier, PathSegment, Record, Value};
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capabilities a backend may advertise
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Capability {
    /// SQL-based queries (Postgres, MySQL)
    Sql,
    /// Document-based (MongoDB)
    Document,
    /// Nested values stored in JSON-typed columns
    JsonColumns,
    /// Declared foreign keys are enforced on write
    ForeignKeys,
    /// Relations can be expanded in the same round trip (JOIN, `$lookup`)
    NativeJoin,
    /// Pattern search inside nested values
    TextSearch,
    /// Rows can be inserted in one batched statement
    BatchInsert,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Sql => write!(f, "sql"),
            Capability::Document => write!(f, "document"),
            Capability::JsonColumns => write!(f, "json-columns"),
            Capability::ForeignKeys => write!(f, "foreign-keys"),
            Capability::NativeJoin => write!(f, "native-join"),
            Capability::TextSearch => write!(f, "text-search"),
            Capability::BatchInsert => write!(f, "batch-insert"),
        }
    }
}

/// Core trait that every backend implements: identity, capabilities and lifecycle
#[async_trait]
pub trait DataSource: Send + Sync + Downcast {
    /// Get the type name of this backend
    fn source_type(&self) -> &'static str;

    /// Get all capabilities supported by this backend
    fn capabilities(&self) -> Vec<Capability>;

    /// Check if a specific capability is supported
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Create storage for every catalog collection if it does not exist yet
    async fn init(&self, catalog: &Catalog) -> Result<()>;

    /// Cheap liveness round trip
    async fn ping(&self) -> Result<()>;

    /// Release pooled connections; calling it again is a no-op
    async fn close(&self) -> Result<()>;
}

impl_downcast!(DataSource);

/// Single-record access by identifier
///
/// Returned records are already normalized: canonical field names, nested
/// values structured, booleans and timestamps typed.
#[async_trait]
pub trait ItemAccess: DataSource {
    /// Store a validated record; the engine assigns the identifier
    async fn insert(&self, schema: &CollectionSchema, record: Record) -> Result<Record>;

    /// Store many records, one result per input in input order
    ///
    /// The default issues independent inserts with at most `concurrency`
    /// in flight, so some may fail while others succeed.
    async fn insert_many(
        &self,
        schema: &CollectionSchema,
        records: Vec<Record>,
        concurrency: usize,
    ) -> Vec<Result<Record>> {
        insert_each(self, schema, records, concurrency).await
    }

    async fn get(&self, schema: &CollectionSchema, id: &Identifier) -> Result<Option<Record>>;

    /// Merge `patch` into the stored record; `None` when the id is unknown
    async fn update(
        &self,
        schema: &CollectionSchema,
        id: &Identifier,
        patch: Record,
    ) -> Result<Option<Record>>;

    /// Replace one nested value inside the JSON field `field` and apply the
    /// top-level `touch` fields in the same write
    async fn set_path(
        &self,
        schema: &CollectionSchema,
        id: &Identifier,
        field: &str,
        path: &[PathSegment],
        value: Value,
        touch: Record,
    ) -> Result<Option<Record>>;

    /// Remove a record; `false` when nothing matched
    async fn delete(&self, schema: &CollectionSchema, id: &Identifier) -> Result<bool>;
}

/// Filtered, sorted and windowed reads plus server-side aggregates
#[async_trait]
pub trait Queryable: DataSource {
    /// Execute a plan; when the plan carries an expansion the backend must
    /// resolve it natively (only called if it advertises `NativeJoin`)
    async fn query(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<Vec<Record>>;

    /// Count records matching the plan's filter and search, ignoring the window
    async fn count(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<u64>;

    /// Sum of a numeric field over the matching records; 0 when none match
    async fn sum(&self, schema: &CollectionSchema, field: &str, plan: &QueryPlan) -> Result<f64>;
}

/// A complete backend
pub trait Store: ItemAccess + Queryable {}

impl<T: ItemAccess + Queryable> Store for T {}

impl_downcast!(Store);

/// Concurrent per-record inserts preserving input order
pub async fn insert_each<S>(
    store: &S,
    schema: &CollectionSchema,
    records: Vec<Record>,
    concurrency: usize,
) -> Vec<Result<Record>>
where
    S: ItemAccess + ?Sized,
{
    stream::iter(records)
        .map(|record| store.insert(schema, record))
        .buffered(concurrency.max(1))
        .collect()
        .await
}
