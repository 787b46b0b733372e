//! MongoDB backend for datagate
//!
//! Records are stored as documents as-is; `_id` ObjectIds surface as opaque
//! `id` tokens. Undeclared collections and fields are accepted. Relation
//! expansion uses a `$lookup` stage.
//!
//! ## Example
//!
//! ```rust,no_run
//! use datagate::{ConnectionConfig, EngineKind};
//! use datagate_mongodb::MongoStore;
//!
//! # async fn example() -> datagate::Result<()> {
//! let config = ConnectionConfig::new(EngineKind::MongoDb)
//!     .with_host("localhost")
//!     .with_database("shop");
//! let store = MongoStore::connect(&config).await?;
//! # Ok(())
//! # }
//! ```

mod convert;
mod filter;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use convert::{from_document, id_filter, to_bson, to_document};
use datagate::{
    Capability, Catalog, CollectionSchema, ConnectionConfig, DataError, DataSource, EngineKind,
    Identifier, ItemAccess, PathSegment, QueryPlan, Queryable, Record, Result, Store,
    StoreFactory, Value,
};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_DATABASE: &str = "datagate";
const DUPLICATE_KEY: i32 = 11000;

fn map_mongo_error(e: mongodb::error::Error) -> DataError {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY => {
            DataError::Constraint(we.message.clone())
        }
        ErrorKind::Command(ce) if ce.code == DUPLICATE_KEY => {
            DataError::Constraint(ce.message.clone())
        }
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. } => {
            DataError::ConnectionFailed(format!("MongoDB: {}", e))
        }
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            DataError::SerializationError(format!("MongoDB: {}", e))
        }
        _ => DataError::QueryFailed(format!("MongoDB: {}", e)),
    }
}

/// MongoDB data source implementation
pub struct MongoStore {
    client: Client,
    database: Database,
    closed: AtomicBool,
}

impl MongoStore {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        debug!("Creating MongoDB source for {}", config.connection_string());

        let mut options = ClientOptions::parse(config.url()).await.map_err(|e| {
            error!("Failed to parse MongoDB URL: {}", e);
            DataError::ConnectionFailed(format!("Failed to parse MongoDB URL: {}", e))
        })?;
        options.max_pool_size = Some(config.max_connections);
        options.server_selection_timeout = Some(Duration::from_secs(10));
        let database_name = config
            .database
            .clone()
            .or_else(|| options.default_database.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let client = Client::with_options(options).map_err(|e| {
            error!("Failed to create MongoDB client: {}", e);
            DataError::ConnectionFailed(format!("Failed to create MongoDB client: {}", e))
        })?;
        let store = Self {
            database: client.database(&database_name),
            client,
            closed: AtomicBool::new(false),
        };
        store.ping().await?;
        info!("Connected to MongoDB database {}", database_name);
        Ok(store)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, schema: &CollectionSchema) -> Result<Collection<Document>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataError::ConnectionFailed(
                "MongoDB client has been closed".to_string(),
            ));
        }
        Ok(self.database.collection(&schema.name))
    }

    async fn collect(
        schema: &CollectionSchema,
        cursor: mongodb::Cursor<Document>,
        plan: &QueryPlan,
    ) -> Result<Vec<Record>> {
        let docs: Vec<Document> = cursor.try_collect().await.map_err(map_mongo_error)?;
        docs.into_iter()
            .map(|doc| from_document(schema, doc, plan.expand.as_ref()))
            .collect()
    }
}

#[async_trait]
impl DataSource for MongoStore {
    fn source_type(&self) -> &'static str {
        "mongodb"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Document,
            Capability::NativeJoin,
            Capability::TextSearch,
        ]
    }

    async fn init(&self, catalog: &Catalog) -> Result<()> {
        let existing = self
            .database
            .list_collection_names()
            .await
            .map_err(map_mongo_error)?;
        for schema in catalog.iter() {
            if !existing.contains(&schema.name) {
                debug!("Creating MongoDB collection {}", schema.name);
                self.database
                    .create_collection(&schema.name)
                    .await
                    .map_err(map_mongo_error)?;
            }
            let collection = self.collection(schema)?;
            let nested_search = schema
                .searchable
                .iter()
                .filter(|path| path.contains('.'))
                .map(String::as_str);
            let keys = schema
                .references()
                .map(|(field, _)| field.name.as_str())
                .chain(nested_search);
            for key in keys {
                let index = IndexModel::builder().keys(doc! { key: 1 }).build();
                collection
                    .create_index(index)
                    .await
                    .map_err(map_mongo_error)?;
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataError::ConnectionFailed(
                "MongoDB client has been closed".to_string(),
            ));
        }
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_mongo_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Shutting down MongoDB client");
            self.client.clone().shutdown().await;
        }
        Ok(())
    }
}

#[async_trait]
impl ItemAccess for MongoStore {
    async fn insert(&self, schema: &CollectionSchema, record: Record) -> Result<Record> {
        let mut doc = to_document(&record);
        let result = self
            .collection(schema)?
            .insert_one(doc.clone())
            .await
            .map_err(map_mongo_error)?;
        doc.insert(convert::MONGO_ID, result.inserted_id);
        from_document(schema, doc, None)
    }

    async fn get(&self, schema: &CollectionSchema, id: &Identifier) -> Result<Option<Record>> {
        let Some(filter) = id_filter(id) else {
            return Ok(None);
        };
        self.collection(schema)?
            .find_one(filter)
            .await
            .map_err(map_mongo_error)?
            .map(|doc| from_document(schema, doc, None))
            .transpose()
    }

    async fn update(
        &self,
        schema: &CollectionSchema,
        id: &Identifier,
        patch: Record,
    ) -> Result<Option<Record>> {
        if patch.is_empty() {
            return self.get(schema, id).await;
        }
        let Some(filter) = id_filter(id) else {
            return Ok(None);
        };
        self.collection(schema)?
            .find_one_and_update(filter, doc! { "$set": to_document(&patch) })
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_mongo_error)?
            .map(|doc| from_document(schema, doc, None))
            .transpose()
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
        let Some(filter) = id_filter(id) else {
            return Ok(None);
        };
        let mut dotted = field.to_string();
        for seg in path {
            dotted.push('.');
            dotted.push_str(&seg.to_string());
        }
        let mut set = to_document(&touch);
        set.insert(dotted, to_bson(&value));

        self.collection(schema)?
            .find_one_and_update(filter, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_mongo_error)?
            .map(|doc| from_document(schema, doc, None))
            .transpose()
    }

    async fn delete(&self, schema: &CollectionSchema, id: &Identifier) -> Result<bool> {
        let Some(filter) = id_filter(id) else {
            return Ok(false);
        };
        let result = self
            .collection(schema)?
            .delete_one(filter)
            .await
            .map_err(map_mongo_error)?;
        Ok(result.deleted_count > 0)
    }
}

#[async_trait]
impl Queryable for MongoStore {
    async fn query(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<Vec<Record>> {
        let collection = self.collection(schema)?;
        let cursor = if plan.expand.is_some() {
            collection
                .aggregate(filter::pipeline(plan)?)
                .await
                .map_err(map_mongo_error)?
        } else {
            filter::signed(plan.offset, "page")?;
            let mut find = collection
                .find(filter::filter_document(plan))
                .sort(filter::sort_document(plan))
                .skip(plan.offset);
            if let Some(limit) = plan.limit {
                find = find.limit(filter::signed(limit, "limit")?);
            }
            find.await.map_err(map_mongo_error)?
        };
        Self::collect(schema, cursor, plan).await
    }

    async fn count(&self, schema: &CollectionSchema, plan: &QueryPlan) -> Result<u64> {
        self.collection(schema)?
            .count_documents(filter::filter_document(plan))
            .await
            .map_err(map_mongo_error)
    }

    async fn sum(&self, schema: &CollectionSchema, field: &str, plan: &QueryPlan) -> Result<f64> {
        let pipeline = vec![
            doc! { "$match": filter::filter_document(plan) },
            doc! { "$group": { "_id": Bson::Null, "total": { "$sum": format!("${}", field) } } },
        ];
        let mut cursor = self
            .collection(schema)?
            .aggregate(pipeline)
            .await
            .map_err(map_mongo_error)?;
        let Some(row) = cursor.try_next().await.map_err(map_mongo_error)? else {
            return Ok(0.0);
        };
        Ok(match row.get("total") {
            Some(Bson::Double(f)) => *f,
            Some(Bson::Int32(i)) => f64::from(*i),
            Some(Bson::Int64(i)) => *i as f64,
            _ => 0.0,
        })
    }
}

/// Registers MongoDB under [`EngineKind::MongoDb`]
pub struct MongoFactory;

#[async_trait]
impl StoreFactory for MongoFactory {
    fn engine(&self) -> EngineKind {
        EngineKind::MongoDb
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Store>> {
        Ok(Arc::new(MongoStore::connect(config).await?))
    }
}
