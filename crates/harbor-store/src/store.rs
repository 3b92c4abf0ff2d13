//! Generic SQL entity store guarded by leases.
//!
//! # Purpose
//! One implementation serves every entity type; per-type behavior comes from
//! the [`Entity`] schema and row mapping.
//!
//! # Key invariants
//! - `update` and `delete` run in one transaction whose first statement
//!   consumes the caller's active lease. Without one the result is
//!   `LeaseConflict`, whether or not the entity exists.
//! - A failed write rolls back, which restores the consumed lease.
//! - Successful `update` and `delete` release the caller's lease.
//!
//! # Concurrency model
//! - Consuming the lease row takes the row lock (Postgres) or the write lock
//!   (SQLite) before the entity row is touched, so a concurrent acquisition
//!   cannot slip between the check and the write.
use crate::entity::{Entity, StatefulEntity};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use harbor_lease::{LeaseManager, SqlLeaseManager};
use harbor_sql::query::{filter_conditions, push_where, select_statement};
use harbor_sql::{
    Criterion, Dialect, QuerySpec, SqlParam, SqlStatement, SqlTransactionProvider, StoreError,
    StoreResult, is_unique_violation,
};
use sqlx::{AnyPool, Row};
use std::marker::PhantomData;

#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    /// # Errors
    /// - [`StoreError::DuplicateId`] when an entity with the same id exists.
    async fn create(&self, entity: &E) -> StoreResult<()>;
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<E>>;
    /// Persist `entity`, consuming `holder_id`'s lease on it.
    ///
    /// # Errors
    /// - [`StoreError::LeaseConflict`] without an active lease of `holder_id`.
    /// - [`StoreError::NotFound`] when leased but never created.
    async fn update(&self, entity: &E, holder_id: &str) -> StoreResult<()>;
    async fn delete(&self, id: &str, holder_id: &str) -> StoreResult<()>;
    /// Lazy, finite stream of matches. Each call starts a fresh query.
    ///
    /// # Errors
    /// - [`StoreError::InvalidQuery`] when the query cannot be translated.
    fn query(&self, spec: QuerySpec) -> StoreResult<BoxStream<'static, StoreResult<E>>>;
    async fn query_all(&self, spec: QuerySpec) -> StoreResult<Vec<E>>;
    async fn count(&self, filter: &[Criterion]) -> StoreResult<u64>;
}

#[derive(Debug, Clone)]
pub struct SqlEntityStore<E> {
    provider: SqlTransactionProvider,
    leases: SqlLeaseManager,
    page_size: u32,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqlEntityStore<E> {
    pub fn new(provider: SqlTransactionProvider, leases: SqlLeaseManager, page_size: u32) -> Self {
        Self {
            provider,
            leases,
            page_size: page_size.max(1),
            _entity: PhantomData,
        }
    }

    /// Lease manager scoped to this entity type.
    pub fn leases(&self) -> &SqlLeaseManager {
        &self.leases
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        self.provider.execute_ddl(E::SCHEMA.ddl).await
    }

    /// Entity `id`, provided it matches every criterion of `filter`.
    pub async fn find_matching(&self, id: &str, filter: &[Criterion]) -> StoreResult<Option<E>> {
        let by_id = Criterion::eq(E::SCHEMA.mapping.id_property(), id);
        let spec = QuerySpec {
            filter: filter.iter().cloned().chain([by_id]).collect(),
            ..QuerySpec::new()
        }
        .with_limit(1);
        Ok(self.query_all(spec).await?.into_iter().next())
    }

    /// First match of `criterion`, if any.
    pub async fn find_first(&self, criterion: Criterion) -> StoreResult<Option<E>> {
        let spec = QuerySpec::new().with_filter(criterion).with_limit(1);
        Ok(self.query_all(spec).await?.into_iter().next())
    }

    fn record_mutation(op: &'static str) {
        metrics::counter!(
            "harbor_store_mutations_total",
            "kind" => E::SCHEMA.kind,
            "op" => op
        )
        .increment(1);
    }

    async fn guarded_write(
        &self,
        op: &'static str,
        entity_id: String,
        holder_id: &str,
        statement: SqlStatement,
    ) -> StoreResult<()> {
        let leases = self.leases.clone();
        let holder = holder_id.to_string();
        let id = entity_id.clone();
        self.provider
            .with_transaction(move |conn| {
                Box::pin(async move {
                    leases.consume_in(conn, &id, &holder).await?;
                    let done = statement.query().execute(&mut *conn).await?;
                    if done.rows_affected() == 0 {
                        return Err(StoreError::NotFound(id));
                    }
                    Ok(())
                })
            })
            .await?;
        Self::record_mutation(op);
        tracing::debug!(
            kind = E::SCHEMA.kind,
            entity_id = %entity_id,
            holder_id,
            op,
            "entity written"
        );
        Ok(())
    }
}

impl<E: StatefulEntity> SqlEntityStore<E> {
    /// Lease up to `max` entities matching `filter` that nobody holds, oldest
    /// state change first. Entities claimed concurrently by others are skipped.
    pub async fn next_not_leased(
        &self,
        holder_id: &str,
        max: u32,
        filter: &[Criterion],
    ) -> StoreResult<Vec<E>> {
        let candidates = self.unleased_candidates(max, filter).await?;
        self.claim(holder_id, candidates, filter).await
    }

    /// Up to `max` entities matching `filter` without an active lease, oldest
    /// state change first. Nothing is leased.
    pub async fn unleased_candidates(
        &self,
        max: u32,
        filter: &[Criterion],
    ) -> StoreResult<Vec<E>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mapping = &E::SCHEMA.mapping;
        let mut stmt = SqlStatement::new();
        let mut conditions =
            filter_conditions(mapping, filter, self.provider.dialect(), &mut stmt)?;
        let id_expr = format!("{}.{}", mapping.table, mapping.id_column);
        conditions.push(self.leases.unleased_condition(&id_expr, &mut stmt));
        let limit = stmt.push_param(SqlParam::Int(i64::from(max)));
        let mut sql = format!("SELECT {} FROM {}", mapping.column_list(), mapping.table);
        push_where(&mut sql, &conditions);
        sql.push_str(&format!(
            " ORDER BY {} ASC, {} ASC LIMIT {limit}",
            E::STATE_TIMESTAMP_COLUMN,
            mapping.id_column
        ));
        stmt.push_sql(&sql);

        let rows = stmt.query().fetch_all(self.provider.pool()).await?;
        rows.iter().map(E::from_row).collect()
    }

    /// Lease each candidate for `holder_id` and return the current rows that
    /// still match `filter`. Candidates leased by others, deleted, or changed so
    /// they no longer match are skipped and hold no lease afterwards.
    pub async fn claim(
        &self,
        holder_id: &str,
        candidates: Vec<E>,
        filter: &[Criterion],
    ) -> StoreResult<Vec<E>> {
        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let id = candidate.id();
            match self.leases.acquire_lease(id, holder_id).await {
                Ok(_) => {}
                Err(err) if err.is_lease_conflict() => continue,
                Err(err) => return Err(err),
            }
            // The selected row may be stale; re-read it under the lease.
            match self.find_matching(id, filter).await? {
                Some(current) => claimed.push(current),
                None => {
                    self.leases.release_lease(id, holder_id).await?;
                    tracing::debug!(
                        kind = E::SCHEMA.kind,
                        entity_id = id,
                        holder_id,
                        "candidate changed before claim"
                    );
                }
            }
        }
        tracing::debug!(
            kind = E::SCHEMA.kind,
            holder_id,
            claimed = claimed.len(),
            "claimed entities not leased"
        );
        Ok(claimed)
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for SqlEntityStore<E> {
    async fn create(&self, entity: &E) -> StoreResult<()> {
        let statement = SqlStatement::with_params(E::SCHEMA.insert_sql(), entity.to_params()?);
        match statement.query().execute(self.provider.pool()).await {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::DuplicateId(entity.id().to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        Self::record_mutation("create");
        tracing::debug!(kind = E::SCHEMA.kind, entity_id = entity.id(), "entity created");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<E>> {
        let sql = E::SCHEMA.select_by_id_sql();
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.provider.pool())
            .await?;
        row.as_ref().map(E::from_row).transpose()
    }

    async fn update(&self, entity: &E, holder_id: &str) -> StoreResult<()> {
        let statement = SqlStatement::with_params(E::SCHEMA.update_sql(), entity.to_params()?);
        self.guarded_write("update", entity.id().to_string(), holder_id, statement)
            .await
    }

    async fn delete(&self, id: &str, holder_id: &str) -> StoreResult<()> {
        let statement = SqlStatement::with_params(
            E::SCHEMA.delete_sql(),
            vec![SqlParam::Text(id.to_string())],
        );
        self.guarded_write("delete", id.to_string(), holder_id, statement)
            .await
    }

    fn query(&self, spec: QuerySpec) -> StoreResult<BoxStream<'static, StoreResult<E>>> {
        let dialect = self.provider.dialect();
        // Translate once up front so bad specs fail before the stream is polled.
        select_statement(&E::SCHEMA.mapping, &spec, dialect)?;
        let pool = self.provider.pool().clone();
        let page_size = self.page_size;

        let pages = stream::try_unfold(Some(spec), move |next| {
            fetch_page::<E>(pool.clone(), dialect, next, page_size)
        });

        Ok(pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<E, StoreError>)))
            .try_flatten()
            .boxed())
    }

    async fn query_all(&self, spec: QuerySpec) -> StoreResult<Vec<E>> {
        self.query(spec)?.try_collect().await
    }

    async fn count(&self, filter: &[Criterion]) -> StoreResult<u64> {
        let statement =
            harbor_sql::query::count_statement(&E::SCHEMA.mapping, filter, self.provider.dialect())?;
        let row = statement.query().fetch_one(self.provider.pool()).await?;
        let total: i64 = row.try_get(0)?;
        Ok(total.max(0) as u64)
    }
}

// One page of a query stream plus the query for the remainder, if any.
async fn fetch_page<E: Entity>(
    pool: AnyPool,
    dialect: Dialect,
    next: Option<QuerySpec>,
    page_size: u32,
) -> StoreResult<Option<(Vec<E>, Option<QuerySpec>)>> {
    let Some(spec) = next else {
        return Ok(None);
    };
    if spec.limit == 0 {
        return Ok(None);
    }
    let page_limit = spec.limit.min(page_size);
    let page_spec = QuerySpec {
        limit: page_limit,
        ..spec.clone()
    };
    let statement = select_statement(&E::SCHEMA.mapping, &page_spec, dialect)?;
    let rows = statement.query().fetch_all(&pool).await?;
    let page = rows
        .iter()
        .map(E::from_row)
        .collect::<StoreResult<Vec<_>>>()?;
    let fetched = page.len() as u32;
    let rest = (fetched == page_limit && spec.limit > fetched).then(|| QuerySpec {
        offset: spec.offset + fetched,
        limit: spec.limit - fetched,
        ..spec
    });
    Ok(Some((page, rest)))
}
