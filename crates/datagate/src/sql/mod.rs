//! Dialect-parameterised SQL translation shared by the relational backends
//!
//! Statements are always parameterised: values travel as [`Bind`]s and only
//! schema-declared identifiers are interpolated (quoted) into the text.

mod builder;
mod dialect;

pub use builder::{id_bind, SqlBuilder, EXPAND_PREFIX};
pub use dialect::SqlDialect;

use crate::schema::FieldType;
use chrono::{DateTime, Utc};

/// A typed statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    /// NULL carrying the column type so strictly typed engines accept it
    Null(FieldType),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

/// Statement text plus its parameters in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub binds: Vec<Bind>,
}
