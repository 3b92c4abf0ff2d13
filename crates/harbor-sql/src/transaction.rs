//! Scoped connections and transactions over the shared SQL backend.
//!
//! # Key invariants
//! - [`SqlTransactionProvider::with_transaction`] commits only when the unit of
//!   work returns `Ok`; an `Err` rolls back before the error is returned.
//! - A transaction dropped before commit (panic, cancelled future) is rolled
//!   back by `sqlx` when the connection returns to the pool.
//!
//! # Concurrency model
//! - The provider is cheap to clone; `sqlx::AnyPool` manages concurrency.
//! - No application-level locking: callers coordinate through the database.
use crate::config::DatabaseConfig;
use crate::dialect::Dialect;
use crate::error::{StoreError, StoreResult};
use anyhow::anyhow;
use futures::future::BoxFuture;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{AnyConnection, AnyPool};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SqlTransactionProvider {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlTransactionProvider {
    /// Open a pool for a `postgres://` or `sqlite:` URL.
    ///
    /// # Errors
    /// - Unsupported URL scheme, connect timeout, or pool setup failure.
    ///
    /// # Security notes
    /// - `config.url` may contain credentials; it is never logged.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(&config.url)?;
        let options = AnyConnectOptions::from_str(&config.url)?;
        let connect = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect_with(options);
        let pool = tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), connect)
            .await
            .map_err(|_| {
                StoreError::Unexpected(anyhow!(
                    "timed out connecting to {} after {}ms",
                    dialect.backend_name(),
                    config.connect_timeout_ms
                ))
            })??;
        tracing::info!(
            backend = dialect.backend_name(),
            max_connections = config.max_connections,
            "sql transaction provider connected"
        );
        Ok(Self { pool, dialect })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run `work` inside one transaction.
    ///
    /// The closure receives the transaction's connection and returns a boxed
    /// future borrowing it; captured state must be owned.
    ///
    /// ```rust,no_run
    /// use harbor_sql::{SqlTransactionProvider, StoreResult};
    ///
    /// async fn touch(provider: &SqlTransactionProvider) -> StoreResult<u64> {
    ///     provider
    ///         .with_transaction(|conn| {
    ///             Box::pin(async move {
    ///                 let done = sqlx::query("DELETE FROM harbor_lease WHERE leased_at < 0")
    ///                     .execute(&mut *conn)
    ///                     .await?;
    ///                 Ok(done.rows_affected())
    ///             })
    ///         })
    ///         .await
    /// }
    /// ```
    pub async fn with_transaction<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, StoreResult<T>> + Send,
    {
        let mut tx = self.pool.begin().await?;
        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Apply DDL statements one by one, each in autocommit mode.
    pub async fn execute_ddl(&self, statements: &[&str]) -> StoreResult<()> {
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
