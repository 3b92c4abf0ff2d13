use harbor_sql::{DatabaseConfig, SqlTransactionProvider};
use tempfile::TempDir;

// Keeps the temporary directory alive for as long as the provider is used.
pub struct TestDb {
    pub provider: SqlTransactionProvider,
    _dir: TempDir,
}

pub async fn sqlite_provider() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("harbor.db").display());
    let provider = SqlTransactionProvider::connect(&DatabaseConfig::new(url))
        .await
        .expect("connect sqlite");
    TestDb {
        provider,
        _dir: dir,
    }
}
