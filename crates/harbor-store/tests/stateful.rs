mod common;

use common::{LEASE_MS, START_MILLIS};
use harbor_lease::LeaseManager;
use harbor_sql::Criterion;
use harbor_store::{
    ContractAgreement, ContractNegotiation, ContractNegotiationState, EntityStore,
    NegotiationType, TransferProcessState,
};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn next_not_leased_claims_oldest_unleased_first() {
    let fx = common::fixture().await;
    let transfers = &fx.stores.transfer_processes;
    for (id, timestamp) in [("tp-a", 30), ("tp-b", 10), ("tp-c", 20), ("tp-d", 40)] {
        transfers
            .create(&common::transfer(id, "asset-1", START_MILLIS + timestamp))
            .await
            .expect("create");
    }
    transfers
        .leases()
        .acquire_lease("tp-b", "node-other")
        .await
        .expect("lease tp-b");

    let claimed = transfers
        .next_not_leased("node-a", 2, &[])
        .await
        .expect("claim");
    let ids: Vec<&str> = claimed.iter().map(|tp| tp.id.as_str()).collect();
    assert_eq!(ids, vec!["tp-c", "tp-a"]);
    for id in ids {
        let lease = transfers.leases().find_lease(id).await.expect("find").expect("lease");
        assert_eq!(lease.leased_by, "node-a");
    }

    // Only tp-d is left for another node.
    let rest = transfers
        .next_not_leased("node-b", 10, &[])
        .await
        .expect("claim");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, "tp-d");
    assert!(
        transfers
            .next_not_leased("node-b", 10, &[])
            .await
            .expect("claim")
            .is_empty()
    );

    // Expired leases make entities claimable again.
    fx.clock.advance(Duration::from_millis(LEASE_MS as u64 + 1));
    assert_eq!(
        transfers
            .next_not_leased("node-c", 10, &[])
            .await
            .expect("claim")
            .len(),
        4
    );
}

#[tokio::test]
async fn next_not_leased_honours_the_filter() {
    let fx = common::fixture().await;
    let transfers = &fx.stores.transfer_processes;
    let mut provisioning = common::transfer("tp-1", "asset-1", START_MILLIS);
    provisioning.transition_to(TransferProcessState::Provisioning, START_MILLIS + 1);
    transfers.create(&provisioning).await.expect("create");
    transfers
        .create(&common::transfer("tp-2", "asset-1", START_MILLIS))
        .await
        .expect("create");

    let filter = [Criterion::eq("state", TransferProcessState::Initial.code())];
    let claimed = transfers
        .next_not_leased("node-a", 5, &filter)
        .await
        .expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, "tp-2");
    assert!(transfers.next_not_leased("node-a", 0, &[]).await.expect("claim").is_empty());
}

#[tokio::test]
async fn candidates_advanced_elsewhere_before_the_claim_are_skipped() {
    let fx = common::fixture().await;
    let transfers = &fx.stores.transfer_processes;
    for id in ["tp-1", "tp-2", "tp-3"] {
        transfers
            .create(&common::transfer(id, "asset-1", START_MILLIS))
            .await
            .expect("create");
    }
    let filter = [Criterion::eq("state", TransferProcessState::Initial.code())];
    let candidates = transfers
        .unleased_candidates(5, &filter)
        .await
        .expect("candidates");
    assert_eq!(candidates.len(), 3);
    assert!(transfers.leases().find_lease("tp-1").await.expect("find").is_none());

    // Another node moves tp-1 on and releases its lease; tp-3 disappears.
    transfers.leases().acquire_lease("tp-1", "node-b").await.expect("lease");
    let mut advanced = candidates[0].clone();
    advanced.transition_to(TransferProcessState::Provisioning, START_MILLIS + 5);
    transfers.update(&advanced, "node-b").await.expect("update");
    transfers.leases().acquire_lease("tp-3", "node-b").await.expect("lease");
    transfers.delete("tp-3", "node-b").await.expect("delete");

    let claimed = transfers
        .claim("node-a", candidates, &filter)
        .await
        .expect("claim");
    let ids: Vec<&str> = claimed.iter().map(|tp| tp.id.as_str()).collect();
    assert_eq!(ids, vec!["tp-2"]);
    assert_eq!(claimed[0].state, TransferProcessState::Initial);
    for id in ["tp-1", "tp-3"] {
        assert!(transfers.leases().find_lease(id).await.expect("find").is_none());
    }
    let stored = transfers.find_by_id("tp-1").await.expect("find").expect("stored");
    assert_eq!(stored.state, TransferProcessState::Provisioning);
}

#[tokio::test]
async fn claimed_entity_can_be_advanced_by_its_holder() {
    let fx = common::fixture().await;
    let transfers = &fx.stores.transfer_processes;
    transfers
        .create(&common::transfer("tp-1", "asset-1", START_MILLIS))
        .await
        .expect("create");

    let mut claimed = transfers
        .next_not_leased("node-a", 1, &[])
        .await
        .expect("claim")
        .remove(0);
    claimed.transition_to(TransferProcessState::Provisioning, START_MILLIS + 100);
    transfers.update(&claimed, "node-a").await.expect("update");

    let stored = transfers.find_by_id("tp-1").await.expect("find").expect("stored");
    assert_eq!(stored.state, TransferProcessState::Provisioning);
    assert_eq!(stored.state_timestamp, START_MILLIS + 100);
    assert_eq!(stored.data_request, claimed.data_request);
}

#[tokio::test]
async fn transfer_lookup_by_data_request_id() {
    let fx = common::fixture().await;
    let transfers = &fx.stores.transfer_processes;
    transfers
        .create(&common::transfer("tp-1", "asset-1", START_MILLIS))
        .await
        .expect("create");

    let found = transfers
        .find_for_correlation_id("dr-tp-1")
        .await
        .expect("lookup")
        .expect("transfer");
    assert_eq!(found.id, "tp-1");
    assert!(transfers.find_for_correlation_id("dr-x").await.expect("lookup").is_none());
}

#[tokio::test]
async fn negotiation_round_trip_and_lookups() {
    let fx = common::fixture().await;
    let negotiations = &fx.stores.contract_negotiations;
    let mut negotiation = ContractNegotiation::new(
        "cn-1",
        NegotiationType::Provider,
        "consumer-1",
        "http://consumer",
        START_MILLIS,
    )
    .with_correlation_id("remote-cn-1");
    negotiations.create(&negotiation).await.expect("create");

    let found = negotiations
        .find_for_correlation_id("remote-cn-1")
        .await
        .expect("lookup")
        .expect("negotiation");
    assert_eq!(found, negotiation);
    assert!(negotiations.find_contract_agreement("ag-1").await.expect("find").is_none());

    negotiations
        .leases()
        .acquire_lease("cn-1", "node-a")
        .await
        .expect("lease");
    negotiation.set_agreement(ContractAgreement {
        id: "ag-1".to_string(),
        provider_id: "provider-1".to_string(),
        consumer_id: "consumer-1".to_string(),
        asset_id: "asset-1".to_string(),
        policy: json!({"permissions": [{"action": "USE"}]}),
        contract_signing_date: START_MILLIS + 10,
    });
    negotiation.transition_to(ContractNegotiationState::Confirmed, START_MILLIS + 10);
    negotiations.update(&negotiation, "node-a").await.expect("update");

    let agreement = negotiations
        .find_contract_agreement("ag-1")
        .await
        .expect("find")
        .expect("agreement");
    assert_eq!(agreement.asset_id, "asset-1");
    let stored = negotiations.find_by_id("cn-1").await.expect("find").expect("stored");
    assert_eq!(stored.state, ContractNegotiationState::Confirmed);
    assert_eq!(stored.correlation_id.as_deref(), Some("remote-cn-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_an_entity() {
    let fx = common::fixture().await;
    let transfers = fx.stores.transfer_processes.clone();
    for n in 0..6 {
        transfers
            .create(&common::transfer(&format!("tp-{n}"), "asset-1", START_MILLIS + n))
            .await
            .expect("create");
    }

    let claimers = (0..3).map(|n| {
        let transfers = transfers.clone();
        tokio::spawn(async move {
            transfers
                .next_not_leased(&format!("node-{n}"), 6, &[])
                .await
                .expect("claim")
        })
    });
    let mut claimed: Vec<String> = futures::future::join_all(claimers)
        .await
        .into_iter()
        .flat_map(|result| result.expect("task"))
        .map(|tp| tp.id)
        .collect();
    claimed.sort();
    let before = claimed.len();
    claimed.dedup();
    assert_eq!(before, claimed.len());
    assert_eq!(claimed.len(), 6);
}
