//! Disposable database containers for backend integration tests.
//!
//! Each helper starts one container and returns the [`ConnectionConfig`]
//! pointing at it. Tests using these need a reachable Docker daemon.

use anyhow::{anyhow, Result};
use datagate::{Catalog, ConnectionConfig, DataGate, EngineKind, GateOptions, Registry};
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};
use tracing::{debug, warn};

const DB_NAME: &str = "datagate_test";
const USERNAME: &str = "test_user";
const PASSWORD: &str = "test_password";

/// A running container plus how to reach it; dropping it stops the container
pub struct TestEngine {
    pub config: ConnectionConfig,
    #[allow(dead_code)]
    container: ContainerAsync<GenericImage>,
}

pub async fn start_postgres() -> Result<TestEngine> {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_env_var("POSTGRES_DB", DB_NAME)
        .with_env_var("POSTGRES_USER", USERNAME)
        .with_env_var("POSTGRES_PASSWORD", PASSWORD)
        .start()
        .await?;
    let port = container.get_host_port_ipv4(5432).await?;
    Ok(TestEngine {
        config: ConnectionConfig::new(EngineKind::Postgres)
            .with_host("localhost")
            .with_port(port)
            .with_username(USERNAME)
            .with_password(PASSWORD)
            .with_database(DB_NAME),
        container,
    })
}

pub async fn start_mysql() -> Result<TestEngine> {
    let container = GenericImage::new("mysql", "8.0")
        .with_env_var("MYSQL_DATABASE", DB_NAME)
        .with_env_var("MYSQL_USER", USERNAME)
        .with_env_var("MYSQL_PASSWORD", PASSWORD)
        .with_env_var("MYSQL_ROOT_PASSWORD", PASSWORD)
        .start()
        .await?;
    let port = container.get_host_port_ipv4(3306).await?;
    Ok(TestEngine {
        config: ConnectionConfig::new(EngineKind::MySql)
            .with_host("localhost")
            .with_port(port)
            .with_username(USERNAME)
            .with_password(PASSWORD)
            .with_database(DB_NAME),
        container,
    })
}

pub async fn start_mongodb() -> Result<TestEngine> {
    let container = GenericImage::new("mongo", "7.0").start().await?;
    let port = container.get_host_port_ipv4(27017).await?;
    Ok(TestEngine {
        config: ConnectionConfig::new(EngineKind::MongoDb)
            .with_host("localhost")
            .with_port(port)
            .with_database(DB_NAME),
        container,
    })
}

/// Connect and initialize, retrying while the server is still starting
pub async fn connect_with_retry(
    registry: &Registry,
    config: &ConnectionConfig,
    catalog: Catalog,
    options: GateOptions,
    max_retries: u32,
) -> Result<DataGate> {
    let mut last_error = None;
    for attempt in 1..=max_retries {
        match DataGate::connect(registry, config, catalog.clone(), options.clone()).await {
            Ok(gate) => match gate.ping().await {
                Ok(()) => {
                    gate.init().await?;
                    debug!("{} ready after {} attempt(s)", config.engine, attempt);
                    return Ok(gate);
                }
                Err(e) => last_error = Some(e),
            },
            Err(e) => last_error = Some(e),
        }
        warn!(
            "{} not ready (attempt {}/{}), retrying",
            config.engine, attempt, max_retries
        );
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    Err(anyhow!(
        "failed to connect to {} after {} attempts: {:?}",
        config.engine,
        max_retries,
        last_error
    ))
}
