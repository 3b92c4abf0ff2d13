mod common;

use common::{LEASE_MS, START_MILLIS};
use harbor_lease::LeaseManager;
use harbor_sql::{Criterion, Operator, StoreError};
use harbor_store::{Asset, ContractDefinition, EntityStore, PolicyDefinition};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn create_and_find_round_trip() {
    let fx = common::fixture().await;
    let assets = &fx.stores.assets;
    let asset = Asset::new("asset-1", START_MILLIS)
        .with_property("name", "weather")
        .with_property("version", 3)
        .with_data_address("type", "HttpData");

    assets.create(&asset).await.expect("create");
    let found = assets.find_by_id("asset-1").await.expect("find").expect("asset");
    assert_eq!(found, asset);
    assert!(assets.find_by_id("missing").await.expect("find").is_none());
}

#[tokio::test]
async fn policy_and_contract_definitions_round_trip() {
    let fx = common::fixture().await;
    let policy = PolicyDefinition::new(
        "policy-1",
        json!({
            "permissions": [{ "action": "use", "constraints": [] }],
            "target": { "assetId": "asset-1" },
            "priority": 2
        }),
        START_MILLIS,
    );
    fx.stores.policy_definitions.create(&policy).await.expect("create");
    let found = fx
        .stores
        .policy_definitions
        .find_by_id("policy-1")
        .await
        .expect("find")
        .expect("policy");
    assert_eq!(found, policy);
    let by_target = [Criterion::eq("policy.target.assetId", "asset-1")];
    assert_eq!(fx.stores.policy_definitions.count(&by_target).await.expect("count"), 1);

    let definition = ContractDefinition::new("cd-1", "policy-1", "policy-2", START_MILLIS + 1)
        .with_selector(Criterion::eq("properties.category", "even"))
        .with_selector(Criterion::new("id", Operator::In, vec!["asset-1", "asset-2"]));
    fx.stores.contract_definitions.create(&definition).await.expect("create");
    let found = fx
        .stores
        .contract_definitions
        .find_by_id("cd-1")
        .await
        .expect("find")
        .expect("definition");
    assert_eq!(found, definition);
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let fx = common::fixture().await;
    let policies = &fx.stores.policy_definitions;
    let policy = PolicyDefinition::new("policy-1", json!({"permissions": []}), START_MILLIS);
    policies.create(&policy).await.expect("create");

    match policies.create(&policy).await {
        Err(StoreError::DuplicateId(id)) => assert_eq!(id, "policy-1"),
        other => panic!("expected duplicate id, got {other:?}"),
    }
}

#[tokio::test]
async fn leased_update_lifecycle() {
    let fx = common::fixture().await;
    let assets = &fx.stores.assets;
    let asset = Asset::new("asset-1", START_MILLIS).with_property("name", "v1");
    assets.create(&asset).await.expect("create");

    assets
        .leases()
        .acquire_lease("asset-1", "node-a")
        .await
        .expect("node-a lease");

    let by_b = asset.clone().with_property("name", "from-b");
    let err = assets.update(&by_b, "node-b").await.expect_err("not leased by b");
    assert!(err.is_lease_conflict());
    assert!(err.to_string().contains("node-a"));

    assets
        .leases()
        .release_lease("asset-1", "node-a")
        .await
        .expect("release");
    assets
        .leases()
        .acquire_lease("asset-1", "node-b")
        .await
        .expect("node-b lease");
    assets.update(&by_b, "node-b").await.expect("update");

    let stored = assets.find_by_id("asset-1").await.expect("find").expect("asset");
    assert_eq!(stored.property("name"), Some(&json!("from-b")));
    // A successful update releases the lease.
    assert!(assets.leases().find_lease("asset-1").await.expect("find").is_none());
}

#[tokio::test]
async fn mutations_without_a_lease_conflict() {
    let fx = common::fixture().await;
    let assets = &fx.stores.assets;
    let asset = Asset::new("asset-1", START_MILLIS);
    assets.create(&asset).await.expect("create");

    assert!(assets.update(&asset, "node-a").await.unwrap_err().is_lease_conflict());
    assert!(assets.delete("asset-1", "node-a").await.unwrap_err().is_lease_conflict());

    // Also for entities that were never stored.
    let ghost = Asset::new("ghost", START_MILLIS);
    assert!(assets.update(&ghost, "node-a").await.unwrap_err().is_lease_conflict());
    assert!(assets.find_by_id("asset-1").await.expect("find").is_some());
}

#[tokio::test]
async fn expired_lease_does_not_authorize_writes() {
    let fx = common::fixture().await;
    let assets = &fx.stores.assets;
    let asset = Asset::new("asset-1", START_MILLIS);
    assets.create(&asset).await.expect("create");
    assets
        .leases()
        .acquire_lease("asset-1", "node-a")
        .await
        .expect("lease");

    fx.clock.advance(Duration::from_millis(LEASE_MS as u64 + 1));
    let err = assets.update(&asset, "node-a").await.expect_err("expired");
    assert!(err.is_lease_conflict());
}

#[tokio::test]
async fn missing_entity_rolls_back_the_consumed_lease() {
    let fx = common::fixture().await;
    let assets = &fx.stores.assets;
    assets
        .leases()
        .acquire_lease("ghost", "node-a")
        .await
        .expect("lease");

    let err = assets
        .update(&Asset::new("ghost", START_MILLIS), "node-a")
        .await
        .expect_err("not stored");
    assert!(err.is_not_found());
    let err = assets.delete("ghost", "node-a").await.expect_err("not stored");
    assert!(err.is_not_found());

    let lease = assets.leases().find_lease("ghost").await.expect("find").expect("restored");
    assert_eq!(lease.leased_by, "node-a");
}

#[tokio::test]
async fn leased_delete_removes_entity_and_lease() {
    let fx = common::fixture().await;
    let definitions = &fx.stores.contract_definitions;
    let definition = ContractDefinition::new("cd-1", "access-1", "contract-1", START_MILLIS);
    definitions.create(&definition).await.expect("create");
    definitions
        .leases()
        .acquire_lease("cd-1", "node-a")
        .await
        .expect("lease");

    definitions.delete("cd-1", "node-a").await.expect("delete");
    assert!(definitions.find_by_id("cd-1").await.expect("find").is_none());
    assert!(definitions.leases().find_lease("cd-1").await.expect("find").is_none());
}

#[tokio::test]
async fn leases_are_scoped_per_entity_type() {
    let fx = common::fixture().await;
    let stores = &fx.stores;
    stores
        .assets
        .create(&Asset::new("shared", START_MILLIS))
        .await
        .expect("asset");
    stores
        .policy_definitions
        .create(&PolicyDefinition::new("shared", json!({}), START_MILLIS))
        .await
        .expect("policy");

    stores
        .assets
        .leases()
        .acquire_lease("shared", "node-a")
        .await
        .expect("asset lease");
    let err = stores
        .policy_definitions
        .delete("shared", "node-a")
        .await
        .expect_err("policy not leased");
    assert!(err.is_lease_conflict());
}

#[tokio::test]
async fn aggregate_reports_backend_and_health() {
    let fx = common::fixture().await;
    assert_eq!(fx.stores.backend_name(), "sqlite");
    assert_eq!(fx.stores.holder_id(), "node-test");
    fx.stores.health_check().await.expect("healthy");
    // Schema creation is idempotent.
    fx.stores.ensure_schema().await.expect("ensure schema twice");
}
