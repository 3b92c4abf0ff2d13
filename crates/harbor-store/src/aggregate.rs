//! One handle wiring every control-plane store to a shared pool and clock.
use crate::entity::Entity;
use crate::model::{
    Asset, ContractDefinition, ContractNegotiation, PolicyDefinition, TransferProcess,
};
use crate::store::SqlEntityStore;
use harbor_lease::{LEASE_TABLE_DDL, SqlLeaseManager};
use harbor_sql::{SharedClock, SqlTransactionProvider, StoreResult, StoreSettings, SystemClock};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ControlPlaneStores {
    pub assets: SqlEntityStore<Asset>,
    pub contract_definitions: SqlEntityStore<ContractDefinition>,
    pub contract_negotiations: SqlEntityStore<ContractNegotiation>,
    pub policy_definitions: SqlEntityStore<PolicyDefinition>,
    pub transfer_processes: SqlEntityStore<TransferProcess>,
    provider: SqlTransactionProvider,
    holder_id: String,
}

impl ControlPlaneStores {
    pub async fn connect(settings: &StoreSettings) -> StoreResult<Self> {
        Self::connect_with_clock(settings, Arc::new(SystemClock)).await
    }

    /// Connect and, when `settings.create_schema` is set, create missing tables.
    pub async fn connect_with_clock(
        settings: &StoreSettings,
        clock: SharedClock,
    ) -> StoreResult<Self> {
        let provider = SqlTransactionProvider::connect(&settings.database).await?;
        let stores = Self::from_provider(provider, clock, settings);
        if settings.create_schema {
            stores.ensure_schema().await?;
        }
        tracing::info!(
            backend = stores.backend_name(),
            holder_id = %stores.holder_id,
            "control plane stores ready"
        );
        Ok(stores)
    }

    pub fn from_provider(
        provider: SqlTransactionProvider,
        clock: SharedClock,
        settings: &StoreSettings,
    ) -> Self {
        Self {
            assets: typed_store(&provider, &clock, settings),
            contract_definitions: typed_store(&provider, &clock, settings),
            contract_negotiations: typed_store(&provider, &clock, settings),
            policy_definitions: typed_store(&provider, &clock, settings),
            transfer_processes: typed_store(&provider, &clock, settings),
            provider,
            holder_id: settings.lease.holder_id.clone(),
        }
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        self.provider.execute_ddl(&[LEASE_TABLE_DDL]).await?;
        self.assets.ensure_schema().await?;
        self.contract_definitions.ensure_schema().await?;
        self.contract_negotiations.ensure_schema().await?;
        self.policy_definitions.ensure_schema().await?;
        self.transfer_processes.ensure_schema().await
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        self.provider.health_check().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.provider.dialect().backend_name()
    }

    /// Lease holder identity configured for this process.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }
}

fn typed_store<E: Entity>(
    provider: &SqlTransactionProvider,
    clock: &SharedClock,
    settings: &StoreSettings,
) -> SqlEntityStore<E> {
    let leases = SqlLeaseManager::new(
        E::SCHEMA.kind,
        provider.clone(),
        clock.clone(),
        Duration::from_millis(settings.lease.duration_ms.max(1) as u64),
    );
    SqlEntityStore::new(provider.clone(), leases, settings.query_page_size)
}
