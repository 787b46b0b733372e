//! # datagate
//!
//! One data-access surface over engines with very different storage models:
//! - PostgreSQL (relational, JSONB columns, enforced foreign keys)
//! - MySQL (relational, JSON columns)
//! - MongoDB (documents)
//! - an in-process memory store
//!
//! ## Architecture
//!
//! - **DataGate**: the facade callers use. Validates input, stamps
//!   timestamps, paginates, and picks an expansion strategy.
//! - **Store**: what each backend implements (`ItemAccess` + `Queryable`),
//!   always speaking canonical [`Record`]s.
//! - **Catalog**: declared collections, fields, and relations. Relational
//!   engines need it to create tables; document engines accept anything.
//! - **sql**: dialect-aware statement builder shared by the relational
//!   backends.
//! - **Registry**: maps an [`EngineKind`] to a factory that connects a store.
//!
//! ## Example
//!
//! ```rust
//! use datagate::{Catalog, CollectionSchema, DataGate, FieldDef, GateOptions, MemoryStore, Record};
//! use std::sync::Arc;
//!
//! # async fn example() -> datagate::Result<()> {
//! let catalog = Catalog::new().with(
//!     CollectionSchema::new("users").field(FieldDef::string("email").required()),
//! );
//! let gate = DataGate::new(Arc::new(MemoryStore::new()), catalog, GateOptions::default());
//!
//! let user = gate.create("users", Record::new().with("email", "ada@example.com")).await?;
//! let id = user.id().expect("engine assigns an id");
//! assert!(gate.find_by_id("users", &id).await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod expand;
pub mod gate;
pub mod memory;
pub mod normalize;
pub mod query;
pub mod registry;
pub mod schema;
pub mod sql;
pub mod traits;
pub mod types;
pub mod validate;

pub use config::{ExpandStrategy, GateOptions, TextMatch};
pub use error::{DataError, Result};
pub use gate::DataGate;
pub use memory::{MemoryFactory, MemoryStore};
pub use query::{
    ExpandPlan, Filter, FilterMap, Page, Pagination, QueryDescriptor, QueryPlan, Search, Sort,
    SortOrder,
};
pub use registry::{ConnectionConfig, EngineKind, Registry, StoreFactory};
pub use schema::{Catalog, CollectionSchema, FieldDef, FieldType, Relation};
pub use traits::{Capability, DataSource, ItemAccess, Queryable, Store};
pub use types::{Identifier, PathSegment, Record, Value, CREATED_AT, ID_FIELD, UPDATED_AT};
