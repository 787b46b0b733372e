use datagate::{DataError, GateOptions, Record, Registry, Value};
use datagate_postgres::PostgresFactory;
use datagate_testkit::prelude::*;
use std::sync::Arc;

async fn connect(engine: &TestEngine) -> anyhow::Result<datagate::DataGate> {
    let registry = Registry::new();
    registry.register(Arc::new(PostgresFactory)).await;
    connect_with_retry(&registry, &engine.config, shop_catalog(), GateOptions::default(), 20).await
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_postgres_passes_all_scenarios() -> anyhow::Result<()> {
    let engine = start_postgres().await?;
    let gate = connect(&engine).await?;
    run_all(&gate).await?;
    gate.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_foreign_key_violation_is_constraint_error() -> anyhow::Result<()> {
    let engine = start_postgres().await?;
    let gate = connect(&engine).await?;

    let err = gate
        .create("orders", order(&datagate::Identifier::Int(987_654), 1.0))
        .await
        .unwrap_err();
    assert!(err.is_constraint(), "{:?}", err);

    // a referenced user cannot be deleted while orders point at it
    let owner = gate.create("users", user("fk@example.com", "fk")).await?;
    let owner_id = owner.id().unwrap();
    gate.create("orders", order(&owner_id, 1.0)).await?;
    let err = gate.delete("users", &owner_id).await.unwrap_err();
    assert!(matches!(err, DataError::Constraint(_)));
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_batch_with_one_bad_reference_falls_back_per_record() -> anyhow::Result<()> {
    let engine = start_postgres().await?;
    let gate = connect(&engine).await?;
    let owner = gate.create("users", user("batch@example.com", "b")).await?;
    let owner_id = owner.id().unwrap();

    let results = gate
        .insert_many(
            "orders",
            vec![
                order(&owner_id, 1.0),
                order(&datagate::Identifier::Int(987_654), 2.0),
                order(&owner_id, 3.0),
            ],
        )
        .await?;
    assert!(results[0].is_ok());
    assert!(results[1].as_ref().unwrap_err().is_constraint());
    assert_eq!(
        results[2].as_ref().unwrap().get("total"),
        Some(&Value::Float(3.0))
    );
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_operations_after_close_are_connection_errors() -> anyhow::Result<()> {
    let engine = start_postgres().await?;
    let gate = connect(&engine).await?;
    gate.close().await?;
    gate.close().await?;
    let err = gate
        .find_one("users", &Record::new().with("name", "x"))
        .await
        .unwrap_err();
    assert!(err.is_connection(), "{:?}", err);
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_batch_results_follow_input_order() -> anyhow::Result<()> {
    let engine = start_postgres().await?;
    let gate = connect(&engine).await?;
    let owner = gate.create("users", user("order@example.com", "o")).await?;
    let owner_id = owner.id().unwrap();

    let totals = [5.0, 1.0, 4.0, 2.0, 3.0];
    let results = gate
        .insert_many(
            "orders",
            totals.iter().map(|t| order(&owner_id, *t)).collect(),
        )
        .await?;
    let mut last_id = 0;
    for (result, total) in results.iter().zip(totals) {
        let stored = result.as_ref().unwrap();
        assert_eq!(stored.get("total"), Some(&Value::Float(total)));
        let id = stored.id().and_then(|id| id.as_i64()).unwrap();
        assert!(id > last_id);
        last_id = id;
    }
    Ok(())
}
