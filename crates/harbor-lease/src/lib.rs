//! Time-bounded exclusive leases recorded in the shared `harbor_lease` table.
//!
//! # Purpose
//! A lease entitles one holder to mutate one entity. Independent processes
//! sharing the database coordinate only through this table.
//!
//! # Key invariants
//! - At most one active lease per `(resource_kind, entity_id)`.
//! - A lease is active while `leased_at + lease_duration >= now`; an expired
//!   row is treated as absent and is overwritten by the next acquisition.
//! - `now` comes from the injected [`Clock`](harbor_sql::Clock) and is bound as
//!   a parameter, never read from the database server.
//!
//! # Concurrency model
//! - Acquisition is one conditional upsert, so two concurrent acquirers cannot
//!   both succeed: the database serialises the row write and the loser's
//!   `WHERE` guard fails.
//! - No in-memory lease state; every call reads or writes the table.
use async_trait::async_trait;
use harbor_sql::{
    SharedClock, SqlParam, SqlStatement, SqlTransactionProvider, StoreError, StoreResult,
    duration_millis,
};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};
use std::time::Duration;

pub const LEASE_TABLE: &str = "harbor_lease";

pub const LEASE_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS harbor_lease (\
    resource_kind TEXT NOT NULL, \
    entity_id TEXT NOT NULL, \
    leased_by TEXT NOT NULL, \
    leased_at BIGINT NOT NULL, \
    lease_duration BIGINT NOT NULL, \
    PRIMARY KEY (resource_kind, entity_id))";

const ACQUIRE_SQL: &str = "INSERT INTO harbor_lease \
    (resource_kind, entity_id, leased_by, leased_at, lease_duration) \
    VALUES ($1, $2, $3, $4, $5) \
    ON CONFLICT (resource_kind, entity_id) DO UPDATE SET \
    leased_by = excluded.leased_by, \
    leased_at = excluded.leased_at, \
    lease_duration = excluded.lease_duration \
    WHERE harbor_lease.leased_by = excluded.leased_by \
    OR harbor_lease.leased_at + harbor_lease.lease_duration < excluded.leased_at";

const CONSUME_SQL: &str = "DELETE FROM harbor_lease \
    WHERE resource_kind = $1 AND entity_id = $2 AND leased_by = $3 \
    AND leased_at + lease_duration >= $4";

const DESCRIBE_SQL: &str = "SELECT resource_kind, entity_id, leased_by, leased_at, lease_duration \
    FROM harbor_lease \
    WHERE resource_kind = $1 AND entity_id = $2 AND leased_at + lease_duration >= $3";

const BREAK_SQL: &str = "DELETE FROM harbor_lease WHERE resource_kind = $1 AND entity_id = $2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub resource_kind: String,
    pub entity_id: String,
    pub leased_by: String,
    // Epoch milliseconds.
    pub leased_at: i64,
    pub duration_ms: i64,
}

/// Proof of a successful acquisition, handed back to the caller.
pub type LeaseToken = Lease;

impl Lease {
    pub fn expires_at(&self) -> i64 {
        self.leased_at.saturating_add(self.duration_ms)
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at() < now_millis
    }

    fn from_row(row: &AnyRow) -> StoreResult<Self> {
        Ok(Self {
            resource_kind: row.try_get("resource_kind")?,
            entity_id: row.try_get("entity_id")?,
            leased_by: row.try_get("leased_by")?,
            leased_at: row.try_get("leased_at")?,
            duration_ms: row.try_get("lease_duration")?,
        })
    }
}

#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Claim `entity_id` for `holder_id`, renewing the lease if the holder already has it.
    async fn acquire_lease(&self, entity_id: &str, holder_id: &str) -> StoreResult<LeaseToken>;
    /// Give up an active lease held by `holder_id`.
    async fn release_lease(&self, entity_id: &str, holder_id: &str) -> StoreResult<()>;
    async fn find_lease(&self, entity_id: &str) -> StoreResult<Option<Lease>>;
    /// Remove any lease on `entity_id` regardless of holder or expiry.
    async fn break_lease(&self, entity_id: &str) -> StoreResult<bool>;
}

/// Lease manager for one resource kind (entity type).
#[derive(Debug, Clone)]
pub struct SqlLeaseManager {
    resource_kind: String,
    provider: SqlTransactionProvider,
    clock: SharedClock,
    duration_ms: i64,
}

impl SqlLeaseManager {
    pub fn new(
        resource_kind: impl Into<String>,
        provider: SqlTransactionProvider,
        clock: SharedClock,
        duration: Duration,
    ) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            provider,
            clock,
            duration_ms: duration_millis(duration),
        }
    }

    pub fn resource_kind(&self) -> &str {
        &self.resource_kind
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        self.provider.execute_ddl(&[LEASE_TABLE_DDL]).await
    }

    pub async fn acquire_lease_for(
        &self,
        entity_id: &str,
        holder_id: &str,
        duration: Duration,
    ) -> StoreResult<LeaseToken> {
        let mut conn = self.provider.pool().acquire().await?;
        self.acquire_in(&mut conn, entity_id, holder_id, duration_millis(duration))
            .await
    }

    /// Conditional upsert on the caller's connection. `duration_ms` is clamped so
    /// the expiry instant fits in a BIGINT.
    ///
    /// # Errors
    /// - [`StoreError::LeaseConflict`] when another holder has an active lease.
    pub async fn acquire_in(
        &self,
        conn: &mut AnyConnection,
        entity_id: &str,
        holder_id: &str,
        duration_ms: i64,
    ) -> StoreResult<LeaseToken> {
        let now = self.clock.now_millis();
        let duration_ms = duration_ms.clamp(0, i64::MAX.saturating_sub(now).max(0));
        let done = sqlx::query(ACQUIRE_SQL)
            .bind(self.resource_kind.as_str())
            .bind(entity_id)
            .bind(holder_id)
            .bind(now)
            .bind(duration_ms)
            .execute(&mut *conn)
            .await?;
        if done.rows_affected() == 0 {
            let current = self.describe_in(conn, entity_id).await?;
            return Err(self.conflict(entity_id, current));
        }
        metrics::counter!("harbor_lease_acquired_total", "kind" => self.resource_kind.clone())
            .increment(1);
        tracing::debug!(
            kind = %self.resource_kind,
            entity_id,
            holder_id,
            duration_ms,
            "lease acquired"
        );
        Ok(Lease {
            resource_kind: self.resource_kind.clone(),
            entity_id: entity_id.to_string(),
            leased_by: holder_id.to_string(),
            leased_at: now,
            duration_ms,
        })
    }

    /// Delete the caller's active lease; the first statement of every guarded mutation.
    ///
    /// # Errors
    /// - [`StoreError::LeaseConflict`] when `holder_id` holds no active lease.
    pub async fn consume_in(
        &self,
        conn: &mut AnyConnection,
        entity_id: &str,
        holder_id: &str,
    ) -> StoreResult<()> {
        let done = sqlx::query(CONSUME_SQL)
            .bind(self.resource_kind.as_str())
            .bind(entity_id)
            .bind(holder_id)
            .bind(self.clock.now_millis())
            .execute(&mut *conn)
            .await?;
        if done.rows_affected() == 0 {
            let current = self.describe_in(conn, entity_id).await?;
            return Err(self.conflict(entity_id, current));
        }
        Ok(())
    }

    pub async fn describe_in(
        &self,
        conn: &mut AnyConnection,
        entity_id: &str,
    ) -> StoreResult<Option<Lease>> {
        let row = sqlx::query(DESCRIBE_SQL)
            .bind(self.resource_kind.as_str())
            .bind(entity_id)
            .bind(self.clock.now_millis())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Lease::from_row).transpose()
    }

    /// `NOT EXISTS` condition matching rows of an entity table with no active lease.
    ///
    /// `id_expr` is the qualified id column of the outer query, e.g. `harbor_asset.id`.
    pub fn unleased_condition(&self, id_expr: &str, stmt: &mut SqlStatement) -> String {
        let kind = stmt.push_param(SqlParam::Text(self.resource_kind.clone()));
        let now = stmt.push_param(SqlParam::Int(self.clock.now_millis()));
        format!(
            "NOT EXISTS (SELECT 1 FROM {LEASE_TABLE} l WHERE l.resource_kind = {kind} \
             AND l.entity_id = {id_expr} AND l.leased_at + l.lease_duration >= {now})"
        )
    }

    fn conflict(&self, entity_id: &str, current: Option<Lease>) -> StoreError {
        metrics::counter!("harbor_lease_conflicts_total", "kind" => self.resource_kind.clone())
            .increment(1);
        let leased_by = current.map(|lease| lease.leased_by);
        tracing::debug!(
            kind = %self.resource_kind,
            entity_id,
            leased_by = leased_by.as_deref().unwrap_or("-"),
            "lease conflict"
        );
        StoreError::lease_conflict(entity_id, leased_by)
    }
}

#[async_trait]
impl LeaseManager for SqlLeaseManager {
    async fn acquire_lease(&self, entity_id: &str, holder_id: &str) -> StoreResult<LeaseToken> {
        let mut conn = self.provider.pool().acquire().await?;
        self.acquire_in(&mut conn, entity_id, holder_id, self.duration_ms)
            .await
    }

    async fn release_lease(&self, entity_id: &str, holder_id: &str) -> StoreResult<()> {
        let mut conn = self.provider.pool().acquire().await?;
        self.consume_in(&mut conn, entity_id, holder_id).await?;
        tracing::debug!(kind = %self.resource_kind, entity_id, holder_id, "lease released");
        Ok(())
    }

    async fn find_lease(&self, entity_id: &str) -> StoreResult<Option<Lease>> {
        let mut conn = self.provider.pool().acquire().await?;
        self.describe_in(&mut conn, entity_id).await
    }

    async fn break_lease(&self, entity_id: &str) -> StoreResult<bool> {
        let done = sqlx::query(BREAK_SQL)
            .bind(self.resource_kind.as_str())
            .bind(entity_id)
            .execute(self.provider.pool())
            .await?;
        let broken = done.rows_affected() > 0;
        if broken {
            tracing::info!(kind = %self.resource_kind, entity_id, "lease broken");
        }
        Ok(broken)
    }
}
