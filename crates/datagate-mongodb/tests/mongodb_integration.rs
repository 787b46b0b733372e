use datagate::{ExpandStrategy, GateOptions, Identifier, QueryDescriptor, Record, Registry, Value};
use datagate_mongodb::MongoFactory;
use datagate_testkit::prelude::*;
use std::sync::Arc;

async fn connect(engine: &TestEngine, options: GateOptions) -> anyhow::Result<datagate::DataGate> {
    let registry = Registry::new();
    registry.register(Arc::new(MongoFactory)).await;
    connect_with_retry(&registry, &engine.config, shop_catalog(), options, 20).await
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_mongodb_passes_all_scenarios() -> anyhow::Result<()> {
    let engine = start_mongodb().await?;
    let gate = connect(&engine, GateOptions::default()).await?;
    run_all(&gate).await?;
    gate.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_follow_up_expansion_matches_lookup() -> anyhow::Result<()> {
    let engine = start_mongodb().await?;
    let options = GateOptions {
        expand_strategy: ExpandStrategy::FollowUp,
        ..GateOptions::default()
    };
    let gate = connect(&engine, options).await?;
    expansion(&gate).await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_dangling_reference_is_stored_and_expands_to_null() -> anyhow::Result<()> {
    let engine = start_mongodb().await?;
    let gate = connect(&engine, GateOptions::default()).await?;
    dangling_reference_accepted(&gate).await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_undeclared_collection_is_accepted() -> anyhow::Result<()> {
    let engine = start_mongodb().await?;
    let gate = connect(&engine, GateOptions::default()).await?;

    let event = gate
        .create(
            "events",
            Record::new()
                .with("kind", "signup")
                .with("payload", Value::Record(Record::new().with("plan", "pro"))),
        )
        .await?;
    let id = event.id().unwrap();
    assert!(matches!(id, Identifier::Token(_)));

    let found = gate.find_by_id("events", &id).await?.unwrap();
    assert_eq!(found.get_path("payload.plan"), Some(&Value::from("pro")));

    let page = gate
        .find_all_advanced("events", &QueryDescriptor::new().eq("payload.plan", "pro"))
        .await?;
    assert_eq!(page.pagination.total, Some(1));
    assert_eq!(page.data[0].get("kind"), Some(&Value::from("signup")));
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_malformed_identifier_matches_nothing() -> anyhow::Result<()> {
    let engine = start_mongodb().await?;
    let gate = connect(&engine, GateOptions::default()).await?;
    let missing = Identifier::Token("not-an-object-id".into());
    assert!(gate.find_by_id("users", &missing).await?.is_none());
    assert!(!gate.delete("users", &missing).await?);
    assert!(gate
        .update("users", &missing, Record::new().with("name", "x"))
        .await
        .unwrap_err()
        .is_not_found());
    Ok(())
}

#[tokio::test]
#[ignore] // Requires Docker to be running
async fn test_operations_after_close_are_connection_errors() -> anyhow::Result<()> {
    let engine = start_mongodb().await?;
    let gate = connect(&engine, GateOptions::default()).await?;
    gate.close().await?;
    gate.close().await?;
    let err = gate.find_all("users").await.unwrap_err();
    assert!(err.is_connection(), "{:?}", err);
    Ok(())
}
