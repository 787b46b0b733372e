use datagate::{DataGate, GateOptions, Identifier, Record, Registry, Value};
use datagate_mysql::MySqlFactory;
use datagate_testkit::prelude::*;
use std::sync::Arc;

async fn connect(engine: &TestEngine) -> anyhow::Result<DataGate> {
    let registry = Registry::new();
    registry.register(Arc::new(MySqlFactory)).await;
    // MySQL takes noticeably longer than PostgreSQL to accept connections
    connect_with_retry(&registry, &engine.config, shop_catalog(), GateOptions::default(), 45).await
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_mysql_passes_all_scenarios() -> anyhow::Result<()> {
    let engine = start_mysql().await?;
    let gate = connect(&engine).await?;
    run_all(&gate).await?;
    gate.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_booleans_and_json_come_back_typed() -> anyhow::Result<()> {
    let engine = start_mysql().await?;
    let gate = connect(&engine).await?;
    let created = gate.create("users", user("typed@example.com", "t")).await?;
    let found = gate
        .find_by_id("users", &created.id().unwrap())
        .await?
        .unwrap();
    // TINYINT(1) and JSON text must not leak through
    assert_eq!(found.get("isActive"), Some(&Value::Bool(true)));
    assert_eq!(
        found.get_path("settings.notifications.email"),
        Some(&Value::Bool(true))
    );
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_update_with_unchanged_values_still_returns_record() -> anyhow::Result<()> {
    let engine = start_mysql().await?;
    let gate = connect(&engine).await?;
    let created = gate.create("users", user("same@example.com", "same")).await?;
    let id = created.id().unwrap();
    let updated = gate
        .update("users", &id, Record::new().with("name", "same"))
        .await?;
    assert_eq!(updated.get("name"), Some(&Value::from("same")));

    let err = gate
        .create("orders", order(&Identifier::Int(987_654), 1.0))
        .await
        .unwrap_err();
    assert!(err.is_constraint(), "{:?}", err);
    Ok(())
}
