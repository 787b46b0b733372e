//! MySQL backend for datagate
//!
//! MySQL has no `RETURNING`, so writes are followed by a read of the affected
//! row. JSON fields use the native JSON column type and textual equality is
//! forced to a binary collation to stay case-sensitive.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use datagate::normalize::from_columns;
use datagate::sql::{id_bind, Bind, SqlBuilder, SqlDialect, SqlStatement};
use datagate::{
    Capability, Catalog, CollectionSchema, ConnectionConfig, DataError, DataSource, EngineKind,
    FieldType, Identifier, ItemAccess, PathSegment, QueryPlan, Queryable, Record, Result, Store,
    StoreFactory, Value,
};
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlQueryResult, MySqlRow};
use sqlx::query::Query;
use sqlx::types::JsonValue;
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DIALECT: SqlDialect = SqlDialect::MySql;

// server error codes sqlx does not classify
const ER_ROW_IS_REFERENCED_2: &str = "1451";
const ER_NO_REFERENCED_ROW_2: &str = "1452";
const ER_DUP_ENTRY: &str = "1062";

fn map_sqlx_error(e: sqlx::Error) -> DataError {
    match e {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => {
                    DataError::Constraint(db.message().to_string())
                }
                _ if matches!(
                    code.as_str(),
                    ER_ROW_IS_REFERENCED_2 | ER_NO_REFERENCED_ROW_2 | ER_DUP_ENTRY
                ) =>
                {
                    DataError::Constraint(db.message().to_string())
                }
                _ => DataError::QueryFailed(format!("MySQL error {}: {}", code, db.message())),
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => DataError::ConnectionFailed(format!("MySQL: {}", e)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DataError::SerializationError(format!("MySQL: {}", e))
        }
        other => DataError::QueryFailed(format!("MySQL: {}", other)),
    }
}

type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

/// JSON travels as text and timestamps as zone-less UTC for DATETIME columns
fn bind<'q>(query: MySqlQuery<'q>, bind: &'q Bind) -> MySqlQuery<'q> {
    match bind {
        Bind::Null(field_type) => match field_type {
            FieldType::Integer | FieldType::Reference => query.bind(None::<i64>),
            FieldType::Float => query.bind(None::<f64>),
            FieldType::Boolean => query.bind(None::<bool>),
            FieldType::Timestamp => query.bind(None::<NaiveDateTime>),
            FieldType::Json | FieldType::String => query.bind(None::<String>),
        },
        Bind::Bool(b) => query.bind(*b),
        Bind::Int(i) => query.bind(*i),
        Bind::Float(f) => query.bind(*f),
        Bind::Text(s) => query.bind(s.as_str()),
        Bind::Timestamp(ts) => query.bind(ts.naive_utc()),
        Bind::Json(v) => query.bind(v.to_string()),
    }
}

fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> Result<Option<T>>
where
    T: Decode<'r, MySql> + Type<MySql>,
{
    row.try_get::<Option<T>, _>(idx).map_err(map_sqlx_error)
}

fn columns(row: &MySqlRow) -> Result<Vec<(String, Value)>> {
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            let type_name = column.type_info().name();
            let value = match type_name {
                "BOOLEAN" => get::<bool>(row, idx)?.map(Value::Bool),
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                    get::<i64>(row, idx)?.map(Value::Int)
                }
                t if t.ends_with("UNSIGNED") => get::<u64>(row, idx)?
                    .map(|v| i64::try_from(v).map(Value::Int).unwrap_or(Value::Float(v as f64))),
                "FLOAT" => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
                "DOUBLE" => get::<f64>(row, idx)?.map(Value::Float),
                "DATETIME" => get::<NaiveDateTime>(row, idx)?
                    .map(|naive| Value::Timestamp(Utc.from_utc_datetime(&naive))),
                "TIMESTAMP" => get::<DateTime<Utc>>(row, idx)?.map(Value::Timestamp),
                "JSON" => get::<JsonValue>(row, idx)?.map(Value::from),
                "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                    get::<Vec<u8>>(row, idx)?
                        .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
                }
                _ => get::<String>(row, idx)?.map(Value::String),
            };
            Ok((column.name().to_string(), value.unwrap_or_default()))
        })
        .collect()
}

/// MySQL data source backed by an sqlx connection pool
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        debug!("Connecting to MySQL: {}", config.connection_string());
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url())
            .await
            .map_err(|e| DataError::ConnectionFailed(format!("MySQL connection failed: {}", e)))?;
        info!("Connected to MySQL at {}", config.connection_string());
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    fn prepare(stmt: &SqlStatement) -> MySqlQuery<'_> {
        debug!("MySQL: {}", stmt.sql);
        stmt.binds
            .iter()
            .fold(sqlx::query(&stmt.sql), |query, b| bind(query, b))
    }

    async fn fetch_all(&self, stmt: &SqlStatement) -> Result<Vec<MySqlRow>> {
        Self::prepare(stmt)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn execute(&self, stmt: &SqlStatement) -> Result<MySqlQueryResult> {
        Self::prepare(stmt)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl DataSource for MySqlStore {
    fn source_type(&self) -> &'static str {
        "mysql"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Sql,
            Capability::JsonColumns,
            Capability::ForeignKeys,
            Capability::NativeJoin,
            Capability::TextSearch,
        ]
    }

    async fn init(&self, catalog: &Catalog) -> Result<()> {
        for schema in catalog.in_dependency_order()? {
            for ddl in SqlBuilder::new(DIALECT, schema).create_table() {
                debug!("MySQL DDL: {}", ddl);
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
            debug!("Closing MySQL pool");
            self.pool.close().await;
        }
        Ok(())
    }
}

#[async_trait]
impl ItemAccess for MySqlStore {
    async fn insert(&self, schema: &CollectionSchema, record: Record) -> Result<Record> {
        let stmt = SqlBuilder::new(DIALECT, schema).insert(&record)?;
        let id = self.execute(&stmt).await?.last_insert_id();
        let id = Identifier::Int(i64::try_from(id).map_err(|_| {
            DataError::Internal(format!("insert id {} out of range", id))
        })?);
        self.get(schema, &id).await?.ok_or_else(|| {
            DataError::Internal(format!("row {} in {} vanished after insert", id, schema.name))
        })
    }

    async fn get(&self, schema: &CollectionSchema, id: &Identifier) -> Result<Option<Record>> {
        let Some(key) = id_bind(id) else {
            return Ok(None);
        };
        let stmt = SqlBuilder::new(DIALECT, schema).select_by_id(key);
        match self.fetch_all(&stmt).await?.first() {
            Some(row) => Ok(Some(from_columns(schema, columns(row)?, None)?)),
            None => Ok(None),
        }
    }

    // affected-row counts skip unchanged rows, so existence is settled by the re-read
    async fn update(
        &self,
        schema: &CollectionSchema,
        id: &Identifier,
        patch: Record,
    ) -> Result<Option<Record>> {
        let Some(key) = id_bind(id) else {
            return Ok(None);
        };
        if let Some(stmt) = SqlBuilder::new(DIALECT, schema).update(key, &patch)? {
            self.execute(&stmt).await?;
        }
        self.get(schema, id).await
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
        self.execute(&stmt).await?;
        self.get(schema, id).await
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
impl Queryable for MySqlStore {
    async fn query(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<Vec<Record>> {
        let stmt = SqlBuilder::new(DIALECT, schema).select(plan)?;
        self.fetch_all(&stmt)
            .await?
            .iter()
            .map(|row| from_columns(schema, columns(row)?, plan.expand.as_ref()))
            .collect()
    }

    async fn count(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<u64> {
        let stmt = SqlBuilder::new(DIALECT, schema).count(plan)?;
        let count: i64 = match self.fetch_all(&stmt).await?.first() {
            Some(row) => row.try_get("count").map_err(map_sqlx_error)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn sum(&self, schema: &CollectionSchema, field: &str, plan: &QueryPlan) -> Result<f64> {
        let stmt = SqlBuilder::new(DIALECT, schema).sum(field, plan)?;
        match self.fetch_all(&stmt).await?.first() {
            Some(row) => row.try_get::<f64, _>("total").map_err(map_sqlx_error),
            None => Ok(0.0),
        }
    }
}

/// Registers MySQL under [`EngineKind::MySql`]
pub struct MySqlFactory;

#[async_trait]
impl StoreFactory for MySqlFactory {
    fn engine(&self) -> EngineKind {
        EngineKind::MySql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Store>> {
        Ok(Arc::new(MySqlStore::connect(config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connection_failures() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_connection());
        assert!(map_sqlx_error(sqlx::Error::PoolClosed).is_connection());
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            DataError::QueryFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_no_batch_insert_capability() {
        if let Ok(pool) = MySqlPoolOptions::new().connect_lazy("mysql://localhost/unused") {
            let store = MySqlStore::from_pool(pool);
            assert!(store.supports(Capability::Sql));
            assert!(store.supports(Capability::NativeJoin));
            assert!(!store.supports(Capability::BatchInsert));
        }
    }
}
