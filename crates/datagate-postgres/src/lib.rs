//! PostgreSQL backend for datagate
//!
//! JSON fields live in JSONB columns, references become enforced foreign
//! keys, and relation expansion is a LEFT JOIN in the same statement.

mod decode;

use async_trait::async_trait;
use datagate::normalize::from_columns;
use datagate::query::ExpandPlan;
use datagate::sql::{id_bind, SqlBuilder, SqlDialect, SqlStatement};
use datagate::{
    Capability, Catalog, CollectionSchema, ConnectionConfig, DataError, DataSource, EngineKind,
    Identifier, ItemAccess, PathSegment, QueryPlan, Queryable, Record, Result, Store,
    StoreFactory, Value,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DIALECT: SqlDialect = SqlDialect::Postgres;

/// Translate a driver error into the engine-neutral taxonomy
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> DataError {
    match e {
        sqlx::Error::Database(db) => match db.kind() {
            sqlx::error::ErrorKind::UniqueViolation
            | sqlx::error::ErrorKind::ForeignKeyViolation
            | sqlx::error::ErrorKind::NotNullViolation
            | sqlx::error::ErrorKind::CheckViolation => DataError::Constraint(db.message().to_string()),
            _ => DataError::QueryFailed(format!(
                "PostgreSQL error {}: {}",
                db.code().unwrap_or_default(),
                db.message()
            )),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => DataError::ConnectionFailed(format!("PostgreSQL: {}", e)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DataError::SerializationError(format!("PostgreSQL: {}", e))
        }
        other => DataError::QueryFailed(format!("PostgreSQL: {}", other)),
    }
}

/// PostgreSQL data source backed by an sqlx connection pool
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        debug!("Connecting to PostgreSQL: {}", config.connection_string());
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url())
            .await
            .map_err(|e| {
                DataError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
            })?;
        info!("Connected to PostgreSQL at {}", config.connection_string());
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all(&self, stmt: &SqlStatement) -> Result<Vec<PgRow>> {
        debug!("PostgreSQL: {}", stmt.sql);
        let mut query = sqlx::query(&stmt.sql);
        for b in &stmt.binds {
            query = decode::bind(query, b);
        }
        query.fetch_all(&self.pool).await.map_err(map_sqlx_error)
    }

    async fn fetch_optional(&self, stmt: &SqlStatement) -> Result<Option<PgRow>> {
        debug!("PostgreSQL: {}", stmt.sql);
        let mut query = sqlx::query(&stmt.sql);
        for b in &stmt.binds {
            query = decode::bind(query, b);
        }
        query.fetch_optional(&self.pool).await.map_err(map_sqlx_error)
    }

    async fn execute(&self, stmt: &SqlStatement) -> Result<PgQueryResult> {
        debug!("PostgreSQL: {}", stmt.sql);
        let mut query = sqlx::query(&stmt.sql);
        for b in &stmt.binds {
            query = decode::bind(query, b);
        }
        query.execute(&self.pool).await.map_err(map_sqlx_error)
    }

    fn record(
        schema: &CollectionSchema,
        row: &PgRow,
        expand: Option<&ExpandPlan>,
    ) -> Result<Record> {
        from_columns(schema, decode::columns(row)?, expand)
    }

    async fn fetch_record(
        &self,
        schema: &CollectionSchema,
        stmt: &SqlStatement,
    ) -> Result<Option<Record>> {
        self.fetch_optional(stmt)
            .await?
            .map(|row| Self::record(schema, &row, None))
            .transpose()
    }
}

#[async_trait]
impl DataSource for PostgresStore {
    fn source_type(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Sql,
            Capability::JsonColumns,
            Capability::ForeignKeys,
            Capability::NativeJoin,
            Capability::TextSearch,
            Capability::BatchInsert,
        ]
    }

    async fn init(&self, catalog: &Catalog) -> Result<()> {
        for schema in catalog.in_dependency_order()? {
            for ddl in SqlBuilder::new(DIALECT, schema).create_table() {
                debug!("PostgreSQL DDL: {}", ddl);
                sqlx::query(&ddl)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.pool.is_closed() {
            debug!("Closing PostgreSQL pool");
            self.pool.close().await;
        }
        Ok(())
    }
}

#[async_trait]
impl ItemAccess for PostgresStore {
    async fn insert(&self, schema: &CollectionSchema, record: Record) -> Result<Record> {
        let stmt = SqlBuilder::new(DIALECT, schema).insert(&record)?;
        self.fetch_record(schema, &stmt).await?.ok_or_else(|| {
            DataError::Internal(format!("INSERT into {} returned no row", schema.name))
        })
    }

    /// One multi-row statement; if it fails, retry row by row so only the
    /// offending records fail
    async fn insert_many(
        &self,
        schema: &CollectionSchema,
        records: Vec<Record>,
        concurrency: usize,
    ) -> Vec<Result<Record>> {
        if records.len() < 2 {
            return datagate::traits::insert_each(self, schema, records, concurrency).await;
        }
        let batch = match SqlBuilder::new(DIALECT, schema).insert_batch(&records) {
            Ok(stmt) => self.fetch_all(&stmt).await,
            Err(e) => Err(e),
        };
        let mut rows = match batch {
            Ok(rows) if rows.len() == records.len() => rows,
            Ok(rows) => {
                warn!(
                    "Batch insert into {} returned {} rows for {} records",
                    schema.name,
                    rows.len(),
                    records.len()
                );
                return records
                    .iter()
                    .map(|_| {
                        Err(DataError::Internal(
                            "batch insert row count mismatch".to_string(),
                        ))
                    })
                    .collect();
            }
            Err(e) => {
                warn!(
                    "Batch insert into {} failed ({}), retrying per record",
                    schema.name, e
                );
                return datagate::traits::insert_each(self, schema, records, concurrency).await;
            }
        };

        // ids are assigned in VALUES order; RETURNING order is not guaranteed
        rows.sort_by_key(|row| row.try_get::<i64, _>("id").ok());
        rows.iter()
            .map(|row| Self::record(schema, row, None))
            .collect()
    }

    async fn get(&self, schema: &CollectionSchema, id: &Identifier) -> Result<Option<Record>> {
        let Some(id) = id_bind(id) else {
            return Ok(None);
        };
        let stmt = SqlBuilder::new(DIALECT, schema).select_by_id(id);
        self.fetch_record(schema, &stmt).await
    }

    async fn update(
        &self,
        schema: &CollectionSchema,
        id: &Identifier,
        patch: Record,
    ) -> Result<Option<Record>> {
        let Some(key) = id_bind(id) else {
            return Ok(None);
        };
        match SqlBuilder::new(DIALECT, schema).update(key, &patch)? {
            Some(stmt) => self.fetch_record(schema, &stmt).await,
            None => self.get(schema, id).await,
        }
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
        let Some(key) = id_bind(id) else {
            return Ok(None);
        };
        let stmt = SqlBuilder::new(DIALECT, schema).set_path(key, field, path, &value, &touch)?;
        self.fetch_record(schema, &stmt).await
    }

    async fn delete(&self, schema: &CollectionSchema, id: &Identifier) -> Result<bool> {
        let Some(key) = id_bind(id) else {
            return Ok(false);
        };
        let stmt = SqlBuilder::new(DIALECT, schema).delete(key);
        Ok(self.execute(&stmt).await?.rows_affected() > 0)
    }
}

#[async_trait]
impl Queryable for PostgresStore {
    async fn query(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<Vec<Record>> {
        let stmt = SqlBuilder::new(DIALECT, schema).select(plan)?;
        self.fetch_all(&stmt)
            .await?
            .iter()
            .map(|row| Self::record(schema, row, plan.expand.as_ref()))
            .collect()
    }

    async fn count(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<u64> {
        let stmt = SqlBuilder::new(DIALECT, schema).count(plan)?;
        let rows = self.fetch_all(&stmt).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get("count").map_err(map_sqlx_error)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn sum(&self, schema: &CollectionSchema, field: &str, plan: &QueryPlan) -> Result<f64> {
        let stmt = SqlBuilder::new(DIALECT, schema).sum(field, plan)?;
        match self.fetch_optional(&stmt).await? {
            Some(row) => row.try_get::<f64, _>("total").map_err(map_sqlx_error),
            None => Ok(0.0),
        }
    }
}

/// Registers PostgreSQL under [`EngineKind::Postgres`]
pub struct PostgresFactory;

#[async_trait]
impl StoreFactory for PostgresFactory {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Store>> {
        Ok(Arc::new(PostgresStore::connect(config).await?))
    }
}
