//! Entity types persisted by the control-plane stores.
pub mod asset;
pub mod contract_definition;
pub mod negotiation;
pub mod policy_definition;
pub mod transfer;

pub use asset::Asset;
pub use contract_definition::ContractDefinition;
pub use negotiation::{
    ContractAgreement, ContractNegotiation, ContractNegotiationState, NegotiationType,
};
pub use policy_definition::PolicyDefinition;
pub use transfer::{DataRequest, TransferProcess, TransferProcessState, TransferType};

use harbor_sql::{StoreError, StoreResult};
use sqlx::Row;
use sqlx::any::AnyRow;

// Re-entering the same state counts retries; any other transition resets to 1.
pub(crate) fn next_state_count(current: i64, next: i64, count: i64) -> i64 {
    if current == next { count + 1 } else { 1 }
}

pub(crate) fn decode_state<S>(row: &AnyRow, from_code: fn(i64) -> Option<S>) -> StoreResult<S> {
    let code: i64 = row.try_get("state")?;
    from_code(code)
        .ok_or_else(|| StoreError::from(anyhow::anyhow!("unknown state code {code}")))
}
