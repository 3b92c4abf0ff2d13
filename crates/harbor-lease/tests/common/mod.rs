use harbor_lease::SqlLeaseManager;
use harbor_sql::{DatabaseConfig, ManualClock, SharedClock, SqlTransactionProvider};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const START_MILLIS: i64 = 1_700_000_000_000;
pub const LEASE_MS: u64 = 1_000;

pub struct LeaseFixture {
    pub provider: SqlTransactionProvider,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl LeaseFixture {
    pub fn manager(&self, kind: &str) -> SqlLeaseManager {
        let clock: SharedClock = self.clock.clone();
        SqlLeaseManager::new(
            kind,
            self.provider.clone(),
            clock,
            Duration::from_millis(LEASE_MS),
        )
    }
}

pub async fn fixture() -> LeaseFixture {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("lease.db").display());
    let provider = SqlTransactionProvider::connect(&DatabaseConfig::new(url))
        .await
        .expect("connect sqlite");
    provider
        .execute_ddl(&[harbor_lease::LEASE_TABLE_DDL])
        .await
        .expect("lease table");
    LeaseFixture {
        provider,
        clock: Arc::new(ManualClock::new(START_MILLIS)),
        _dir: dir,
    }
}
