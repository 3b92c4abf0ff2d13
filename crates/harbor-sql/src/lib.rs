//! Shared SQL plumbing for the harbor control-plane stores.
//!
//! Owns the connection pool, transactions, dialect differences, query
//! translation and the error type every store returns.
pub mod clock;
pub mod config;
pub mod dialect;
pub mod error;
pub mod query;
pub mod transaction;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, duration_millis};
pub use config::{DatabaseConfig, LeaseConfig, StoreSettings};
pub use dialect::Dialect;
pub use error::{StoreError, StoreResult, is_unique_violation};
pub use query::{
    Column, ColumnKind, Criterion, CriterionValue, Operator, QuerySpec, SortOrder, SqlParam,
    SqlStatement, TableMapping,
};
pub use transaction::SqlTransactionProvider;
