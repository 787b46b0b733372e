pub mod admin;
pub mod aggregate;
pub mod read;
pub mod write;

pub use admin::{InitCommand, PingCommand};
pub use aggregate::{CountCommand, SumCommand};
pub use read::{FindCommand, GetCommand, QueryCommand};
pub use write::{CreateCommand, DeleteCommand, SetCommand, UpdateCommand};

use anyhow::Context;
use clap::Args;
use datagate::{
    Catalog, ConnectionConfig, DataGate, EngineKind, ExpandStrategy, FilterMap, GateOptions,
    Identifier, Record, Registry, TextMatch,
};
use datagate_mongodb::MongoFactory;
use datagate_mysql::MySqlFactory;
use datagate_postgres::PostgresFactory;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Connection flags shared by every subcommand
#[derive(Args, Debug)]
pub struct GateArgs {
    /// Engine: postgres, mysql, mongodb or memory
    #[arg(long, env = "DATAGATE_ENGINE", default_value = "postgres", global = true)]
    pub engine: EngineKind,

    /// Connection URL for the engine
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub url: Option<String>,

    /// Catalog file (.json, .yaml or .yml) declaring the collections
    #[arg(long, env = "DATAGATE_CATALOG", global = true)]
    pub catalog: Option<PathBuf>,

    /// Maximum pooled connections
    #[arg(long, default_value_t = 5, global = true)]
    pub max_connections: u32,

    /// Fold case when comparing text for equality
    #[arg(long, global = true)]
    pub case_insensitive: bool,

    /// Resolve expansions with follow-up lookups instead of native joins
    #[arg(long, global = true)]
    pub follow_up_expansion: bool,
}

impl GateArgs {
    pub fn options(&self) -> GateOptions {
        let mut options = GateOptions::default();
        if self.case_insensitive {
            options = options.with_text_match(TextMatch::CaseInsensitive);
        }
        if self.follow_up_expansion {
            options = options.with_expand_strategy(ExpandStrategy::FollowUp);
        }
        options
    }

    pub fn config(&self) -> ConnectionConfig {
        let config =
            ConnectionConfig::new(self.engine).with_max_connections(self.max_connections);
        match &self.url {
            Some(url) => config.with_url(url.clone()),
            None => config,
        }
    }

    pub async fn connect(&self) -> anyhow::Result<DataGate> {
        let catalog = match &self.catalog {
            Some(path) => Catalog::from_path(path)
                .with_context(|| format!("Failed to load catalog from {}", path.display()))?,
            None => Catalog::new(),
        };
        debug!("Loaded catalog with {} collections", catalog.iter().count());

        let registry = Registry::with_memory();
        registry.register(Arc::new(PostgresFactory)).await;
        registry.register(Arc::new(MySqlFactory)).await;
        registry.register(Arc::new(MongoFactory)).await;

        let gate = DataGate::connect(&registry, &self.config(), catalog, self.options()).await?;
        Ok(gate)
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Numeric ids address relational rows; anything else is an opaque token
pub fn parse_identifier(raw: &str) -> Result<Identifier, std::convert::Infallible> {
    raw.parse()
}

pub fn parse_record(raw: &str) -> anyhow::Result<Record> {
    let json: serde_json::Value =
        serde_json::from_str(raw).context("Record must be a JSON object")?;
    Ok(Record::try_from(json)?)
}

pub fn parse_filter(raw: Option<&str>) -> anyhow::Result<FilterMap> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("Filter must be a JSON object"),
        None => Ok(FilterMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datagate::{Filter, Value};

    #[test]
    fn test_parse_filter_accepts_operators() {
        let filter = parse_filter(Some(
            r#"{"status":"pending","notes":{"$contains":"oat"},"id":{"$in":[1,2]}}"#,
        ))
        .unwrap();
        assert_eq!(filter["status"], Filter::Eq(Value::from("pending")));
        assert_eq!(filter["notes"], Filter::Contains("oat".into()));
        assert_eq!(filter["id"], Filter::In(vec![Value::Int(1), Value::Int(2)]));
        assert!(parse_filter(None).unwrap().is_empty());
    }

    #[test]
    fn test_numeric_ids_parse_as_integers() {
        assert_eq!(parse_identifier("42").unwrap(), Identifier::Int(42));
        assert_eq!(
            parse_identifier("65f1c0ffee").unwrap(),
            Identifier::Token("65f1c0ffee".into())
        );
    }

    #[test]
    fn test_parse_record_rejects_non_objects() {
        let record = parse_record(r#"{"name":"Alice","age":30}"#).unwrap();
        assert_eq!(record.get("age"), Some(&Value::Int(30)));
        assert!(parse_record("[1,2]").is_err());
        assert!(parse_record("not json").is_err());
    }

    #[test]
    fn test_url_overrides_host_parts() {
        let args = GateArgs {
            engine: EngineKind::Postgres,
            url: Some("postgres://u:p@db:5432/shop".into()),
            catalog: None,
            max_connections: 3,
            case_insensitive: true,
            follow_up_expansion: false,
        };
        let config = args.config();
        assert_eq!(config.url(), "postgres://u:p@db:5432/shop");
        assert_eq!(config.max_connections, 3);
        assert_eq!(args.options().text_match, TextMatch::CaseInsensitive);
        assert_eq!(args.options().expand_strategy, ExpandStrategy::Auto);
    }

    #[tokio::test]
    async fn test_memory_engine_connects_with_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"collections":[{"name":"users","fields":[{"name":"email","type":"string"}]}]}"#,
        )
        .unwrap();
        let args = GateArgs {
            engine: EngineKind::Memory,
            url: None,
            catalog: Some(path),
            max_connections: 1,
            case_insensitive: false,
            follow_up_expansion: false,
        };
        let gate = args.connect().await.unwrap();
        assert!(gate.catalog().get("users").is_some());
    }
}
