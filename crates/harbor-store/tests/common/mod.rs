use harbor_sql::{DatabaseConfig, ManualClock, SharedClock, StoreSettings};
use harbor_store::{ControlPlaneStores, DataRequest, TransferProcess, TransferType};
use std::sync::Arc;
use tempfile::TempDir;

pub const START_MILLIS: i64 = 1_700_000_000_000;
pub const LEASE_MS: i64 = 1_000;

pub struct StoreFixture {
    pub stores: ControlPlaneStores,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

// Small pages so query streams cross page boundaries.
pub async fn fixture() -> StoreFixture {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("stores.db").display());
    let mut settings = StoreSettings::new(DatabaseConfig::new(url));
    settings.lease.holder_id = "node-test".to_string();
    settings.lease.duration_ms = LEASE_MS;
    settings.query_page_size = 2;

    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let shared: SharedClock = clock.clone();
    let stores = ControlPlaneStores::connect_with_clock(&settings, shared)
        .await
        .expect("connect stores");
    StoreFixture {
        stores,
        clock,
        _dir: dir,
    }
}

pub fn transfer(id: &str, asset_id: &str, state_timestamp: i64) -> TransferProcess {
    let request = DataRequest::new(format!("dr-{id}"), asset_id, "contract-1");
    TransferProcess::new(id, TransferType::Consumer, request, state_timestamp)
}
