//! SQL-backed control-plane stores with optimistic leasing.
//!
//! # Purpose
//! Persists assets, policy definitions, contract definitions, contract
//! negotiations and transfer processes in relational tables. Mutating a stored
//! entity requires an active lease from its [`SqlLeaseManager`], so processes
//! sharing one database never interleave writes on the same entity.
//!
//! ```rust,no_run
//! use harbor_lease::LeaseManager;
//! use harbor_sql::{DatabaseConfig, StoreSettings};
//! use harbor_store::{Asset, ControlPlaneStores, EntityStore};
//!
//! # async fn run() -> harbor_sql::StoreResult<()> {
//! let settings = StoreSettings::new(DatabaseConfig::new("sqlite://harbor.db?mode=rwc"));
//! let stores = ControlPlaneStores::connect(&settings).await?;
//! let asset = Asset::new("asset-1", 0).with_property("name", "weather data");
//! stores.assets.create(&asset).await?;
//! stores.assets.leases().acquire_lease("asset-1", stores.holder_id()).await?;
//! stores
//!     .assets
//!     .update(&asset.with_property("name", "hourly weather"), stores.holder_id())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`SqlLeaseManager`]: harbor_lease::SqlLeaseManager
pub mod aggregate;
pub mod entity;
pub mod model;
pub mod observability;
pub mod store;

pub use aggregate::ControlPlaneStores;
pub use entity::{Entity, EntitySchema, StatefulEntity};
pub use model::{
    Asset, ContractAgreement, ContractDefinition, ContractNegotiation, ContractNegotiationState,
    DataRequest, NegotiationType, PolicyDefinition, TransferProcess, TransferProcessState,
    TransferType,
};
pub use store::{EntityStore, SqlEntityStore};
