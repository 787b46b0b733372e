use datagate::{DataGate, ExpandStrategy, GateOptions, MemoryStore, Record, TextMatch, Value};
use datagate_testkit::prelude::*;
use std::sync::Arc;

async fn gate() -> DataGate {
    let gate = memory_gate();
    gate.init().await.unwrap();
    gate
}

#[tokio::test]
async fn test_memory_backend_passes_all_scenarios() {
    run_all(&gate().await).await.unwrap();
}

#[tokio::test]
async fn test_case_insensitive_policy() {
    let gate = DataGate::new(
        Arc::new(MemoryStore::new()),
        shop_catalog(),
        GateOptions::default().with_text_match(TextMatch::CaseInsensitive),
    );
    gate.create("users", user("ALICE@example.com", "Alice"))
        .await
        .unwrap();
    let found = gate
        .find_one("users", &Record::new().with("name", "alice"))
        .await
        .unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn test_dangling_reference_expands_to_null() {
    let gate = DataGate::new(
        Arc::new(MemoryStore::new()),
        shop_catalog(),
        GateOptions::default().with_expand_strategy(ExpandStrategy::FollowUp),
    );
    let owner = gate
        .create("users", user("a@example.com", "a"))
        .await
        .unwrap();
    let owner_id = owner.id().unwrap();
    gate.create("orders", order(&owner_id, 1.0)).await.unwrap();
    gate.delete("users", &owner_id).await.unwrap();

    let page = gate
        .find_all_advanced(
            "orders",
            &datagate::QueryDescriptor::new().expand("user"),
        )
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].get("user"), Some(&Value::Null));
}

#[tokio::test]
async fn test_memory_accepts_dangling_reference() {
    dangling_reference_accepted(&gate().await).await.unwrap();
}

#[tokio::test]
async fn test_unknown_relation_is_invalid_query() {
    let gate = gate().await;
    let err = gate
        .find_all_advanced("orders", &datagate::QueryDescriptor::new().expand("store"))
        .await
        .unwrap_err();
    assert!(matches!(err, datagate::DataError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_set_path_on_non_json_field_is_rejected() {
    let gate = gate().await;
    let owner = gate
        .create("users", user("b@example.com", "b"))
        .await
        .unwrap();
    let err = gate
        .set_path("users", &owner.id().unwrap(), "email.domain", "x")
        .await
        .unwrap_err();
    assert!(err.is_validation());
}
