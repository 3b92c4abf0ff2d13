mod common;

use common::{LEASE_MS, START_MILLIS};
use harbor_lease::LeaseManager;
use std::time::Duration;

#[tokio::test]
async fn acquire_records_holder_and_expiry() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");

    let token = leases.acquire_lease("asset-1", "node-a").await.expect("acquire");
    assert_eq!(token.leased_by, "node-a");
    assert_eq!(token.leased_at, START_MILLIS);
    assert_eq!(token.expires_at(), START_MILLIS + LEASE_MS as i64);

    let found = leases.find_lease("asset-1").await.expect("find").expect("lease");
    assert_eq!(found, token);
    assert!(leases.find_lease("asset-2").await.expect("find").is_none());
}

#[tokio::test]
async fn other_holder_conflicts_until_expiry() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");
    leases.acquire_lease("asset-1", "node-a").await.expect("acquire");

    let err = leases
        .acquire_lease("asset-1", "node-b")
        .await
        .expect_err("held by node-a");
    assert!(err.is_lease_conflict());
    assert!(err.to_string().contains("node-a"));

    // Still active exactly at the expiry instant.
    fx.clock.advance(Duration::from_millis(LEASE_MS));
    assert!(leases.acquire_lease("asset-1", "node-b").await.is_err());

    fx.clock.advance(Duration::from_millis(1));
    assert!(leases.find_lease("asset-1").await.expect("find").is_none());
    let token = leases.acquire_lease("asset-1", "node-b").await.expect("expired lease");
    assert_eq!(token.leased_by, "node-b");
}

#[tokio::test]
async fn same_holder_renews() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");
    leases.acquire_lease("asset-1", "node-a").await.expect("acquire");

    fx.clock.advance(Duration::from_millis(600));
    let renewed = leases.acquire_lease("asset-1", "node-a").await.expect("renew");
    assert_eq!(renewed.leased_at, START_MILLIS + 600);

    // Past the original expiry but inside the renewed one.
    fx.clock.advance(Duration::from_millis(600));
    assert!(leases.acquire_lease("asset-1", "node-b").await.is_err());
}

#[tokio::test]
async fn explicit_duration_overrides_default() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");
    leases
        .acquire_lease_for("asset-1", "node-a", Duration::from_secs(30))
        .await
        .expect("acquire");

    fx.clock.advance(Duration::from_secs(10));
    assert!(leases.acquire_lease("asset-1", "node-b").await.is_err());
    fx.clock.advance(Duration::from_secs(21));
    assert!(leases.acquire_lease("asset-1", "node-b").await.is_ok());
}

#[tokio::test]
async fn release_requires_an_active_lease_of_the_caller() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");
    leases.acquire_lease("asset-1", "node-a").await.expect("acquire");

    let err = leases
        .release_lease("asset-1", "node-b")
        .await
        .expect_err("not the holder");
    assert!(err.is_lease_conflict());

    leases.release_lease("asset-1", "node-a").await.expect("release");
    assert!(leases.find_lease("asset-1").await.expect("find").is_none());
    assert!(leases.release_lease("asset-1", "node-a").await.is_err());

    leases.acquire_lease("asset-1", "node-b").await.expect("free again");
}

#[tokio::test]
async fn releasing_an_expired_lease_conflicts() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");
    leases.acquire_lease("asset-1", "node-a").await.expect("acquire");
    fx.clock.advance(Duration::from_millis(LEASE_MS + 1));

    let err = leases
        .release_lease("asset-1", "node-a")
        .await
        .expect_err("expired");
    assert!(err.is_lease_conflict());
}

#[tokio::test]
async fn break_lease_ignores_holder() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");
    leases.acquire_lease("asset-1", "node-a").await.expect("acquire");

    assert!(leases.break_lease("asset-1").await.expect("break"));
    assert!(!leases.break_lease("asset-1").await.expect("break again"));
    leases.acquire_lease("asset-1", "node-b").await.expect("free");
}

#[tokio::test]
async fn leases_are_scoped_by_resource_kind() {
    let fx = common::fixture().await;
    let assets = fx.manager("asset");
    let policies = fx.manager("policy-definition");

    assets.acquire_lease("shared-id", "node-a").await.expect("asset lease");
    policies
        .acquire_lease("shared-id", "node-b")
        .await
        .expect("policy lease");
    let held = assets.find_lease("shared-id").await.expect("find").expect("lease");
    assert_eq!(held.leased_by, "node-a");
    assert_eq!(held.resource_kind, assets.resource_kind());
}

#[tokio::test]
async fn oversized_durations_saturate_instead_of_expiring() {
    let fx = common::fixture().await;
    let leases = fx.manager("asset");

    let token = leases
        .acquire_lease_for("asset-1", "node-a", Duration::from_secs(u64::MAX / 1000))
        .await
        .expect("acquire");
    assert!(token.duration_ms > 0);
    assert_eq!(token.expires_at(), i64::MAX);

    let held = leases.find_lease("asset-1").await.expect("find").expect("lease");
    assert_eq!(held, token);
    let err = leases
        .acquire_lease("asset-1", "node-b")
        .await
        .expect_err("held by node-a");
    assert!(err.is_lease_conflict());

    fx.clock.advance(Duration::from_secs(365 * 24 * 3600));
    assert!(leases.acquire_lease("asset-1", "node-b").await.is_err());
    leases.release_lease("asset-1", "node-a").await.expect("release");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquisition_has_one_winner() {
    let fx = common::fixture().await;
    let leases = fx.manager("transfer-process");

    let attempts = (0..8).map(|n| {
        let leases = leases.clone();
        tokio::spawn(async move {
            leases
                .acquire_lease("tp-1", &format!("node-{n}"))
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let mut winners = Vec::new();
    for result in results {
        match result.expect("task") {
            Ok(token) => winners.push(token.leased_by),
            Err(err) => assert!(err.is_lease_conflict(), "unexpected error: {err}"),
        }
    }
    assert_eq!(winners.len(), 1);
    let held = leases.find_lease("tp-1").await.expect("find").expect("lease");
    assert_eq!(held.leased_by, winners[0]);
}
