//! Transfer processes moving asset data between connectors.
use super::{decode_state, next_state_count};
use crate::entity::{Entity, EntitySchema, StatefulEntity, json_column, to_json};
use crate::store::SqlEntityStore;
use harbor_sql::{Column, Criterion, SqlParam, StoreError, StoreResult, TableMapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::any::AnyRow;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferType {
    Consumer,
    Provider,
}

impl TransferType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferType::Consumer => "CONSUMER",
            TransferType::Provider => "PROVIDER",
        }
    }
}

impl FromStr for TransferType {
    type Err = StoreError;

    fn from_str(value: &str) -> StoreResult<Self> {
        match value {
            "CONSUMER" => Ok(TransferType::Consumer),
            "PROVIDER" => Ok(TransferType::Provider),
            other => Err(anyhow::anyhow!("unknown transfer type '{other}'").into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferProcessState {
    Initial,
    Provisioning,
    Provisioned,
    Requesting,
    Requested,
    InProgress,
    Streaming,
    Completed,
    Deprovisioning,
    Deprovisioned,
    Ended,
    Cancelled,
    Error,
}

impl TransferProcessState {
    pub const ALL: [TransferProcessState; 13] = [
        TransferProcessState::Initial,
        TransferProcessState::Provisioning,
        TransferProcessState::Provisioned,
        TransferProcessState::Requesting,
        TransferProcessState::Requested,
        TransferProcessState::InProgress,
        TransferProcessState::Streaming,
        TransferProcessState::Completed,
        TransferProcessState::Deprovisioning,
        TransferProcessState::Deprovisioned,
        TransferProcessState::Ended,
        TransferProcessState::Cancelled,
        TransferProcessState::Error,
    ];

    pub fn code(self) -> i64 {
        match self {
            TransferProcessState::Initial => 100,
            TransferProcessState::Provisioning => 200,
            TransferProcessState::Provisioned => 300,
            TransferProcessState::Requesting => 400,
            TransferProcessState::Requested => 500,
            TransferProcessState::InProgress => 600,
            TransferProcessState::Streaming => 700,
            TransferProcessState::Completed => 800,
            TransferProcessState::Deprovisioning => 900,
            TransferProcessState::Deprovisioned => 1000,
            TransferProcessState::Ended => 1100,
            TransferProcessState::Cancelled => 1200,
            TransferProcessState::Error => -1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.code() == code)
    }
}

/// What the consumer asked for; `id` correlates both sides of the transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub id: String,
    pub connector_address: String,
    pub protocol: String,
    pub connector_id: String,
    pub asset_id: String,
    pub contract_id: String,
    #[serde(default)]
    pub data_destination: BTreeMap<String, Value>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl DataRequest {
    pub fn new(
        id: impl Into<String>,
        asset_id: impl Into<String>,
        contract_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            connector_address: String::new(),
            protocol: "ids-multipart".to_string(),
            connector_id: String::new(),
            asset_id: asset_id.into(),
            contract_id: contract_id.into(),
            data_destination: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }
}

const COLUMNS: &[Column] = &[
    Column::text("id", "id"),
    Column::text("type", "transfer_type"),
    Column::integer("state", "state"),
    Column::integer("stateCount", "state_count"),
    Column::integer("stateTimestamp", "state_timestamp"),
    Column::text("errorDetail", "error_detail"),
    Column::json("dataRequest", "data_request"),
    Column::text("dataRequest.id", "data_request_id"),
    Column::text("dataRequest.assetId", "asset_id"),
    Column::text("dataRequest.contractId", "contract_id"),
    Column::integer("createdAt", "created_at"),
];

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS harbor_transfer_process (\
     id TEXT PRIMARY KEY, \
     transfer_type TEXT NOT NULL, \
     state BIGINT NOT NULL, \
     state_count BIGINT NOT NULL, \
     state_timestamp BIGINT NOT NULL, \
     error_detail TEXT, \
     data_request TEXT NOT NULL, \
     data_request_id TEXT NOT NULL, \
     asset_id TEXT NOT NULL, \
     contract_id TEXT NOT NULL, \
     created_at BIGINT NOT NULL)",
    "CREATE INDEX IF NOT EXISTS harbor_transfer_process_state \
     ON harbor_transfer_process (state, state_timestamp)",
    "CREATE INDEX IF NOT EXISTS harbor_transfer_process_data_request \
     ON harbor_transfer_process (data_request_id)",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProcess {
    pub id: String,
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
    pub state: TransferProcessState,
    pub state_count: i64,
    pub state_timestamp: i64,
    pub error_detail: Option<String>,
    pub data_request: DataRequest,
    pub created_at: i64,
}

impl TransferProcess {
    pub fn new(
        id: impl Into<String>,
        transfer_type: TransferType,
        data_request: DataRequest,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            transfer_type,
            state: TransferProcessState::Initial,
            state_count: 1,
            state_timestamp: now_millis,
            error_detail: None,
            data_request,
            created_at: now_millis,
        }
    }

    pub fn transition_to(&mut self, state: TransferProcessState, now_millis: i64) {
        self.state_count = next_state_count(self.state.code(), state.code(), self.state_count);
        self.state = state;
        self.state_timestamp = now_millis;
    }

    pub fn transition_error(&mut self, detail: impl Into<String>, now_millis: i64) {
        self.error_detail = Some(detail.into());
        self.transition_to(TransferProcessState::Error, now_millis);
    }
}

impl Entity for TransferProcess {
    const SCHEMA: EntitySchema = EntitySchema {
        kind: "transfer-process",
        mapping: TableMapping {
            table: "harbor_transfer_process",
            id_column: "id",
            columns: COLUMNS,
            json_members: None,
        },
        ddl: DDL,
    };

    fn id(&self) -> &str {
        &self.id
    }

    fn to_params(&self) -> StoreResult<Vec<SqlParam>> {
        Ok(vec![
            SqlParam::Text(self.id.clone()),
            SqlParam::Text(self.transfer_type.as_str().to_string()),
            SqlParam::Int(self.state.code()),
            SqlParam::Int(self.state_count),
            SqlParam::Int(self.state_timestamp),
            SqlParam::NullableText(self.error_detail.clone()),
            SqlParam::Text(to_json(&self.data_request)?),
            SqlParam::Text(self.data_request.id.clone()),
            SqlParam::Text(self.data_request.asset_id.clone()),
            SqlParam::Text(self.data_request.contract_id.clone()),
            SqlParam::Int(self.created_at),
        ])
    }

    fn from_row(row: &AnyRow) -> StoreResult<Self> {
        let transfer_type: String = row.try_get("transfer_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            transfer_type: transfer_type.parse()?,
            state: decode_state(row, TransferProcessState::from_code)?,
            state_count: row.try_get("state_count")?,
            state_timestamp: row.try_get("state_timestamp")?,
            error_detail: row.try_get("error_detail")?,
            data_request: json_column(row, "data_request")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl StatefulEntity for TransferProcess {
    const STATE_TIMESTAMP_COLUMN: &'static str = "state_timestamp";
}

impl SqlEntityStore<TransferProcess> {
    /// Transfer process created for the data request `correlation_id`.
    pub async fn find_for_correlation_id(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Option<TransferProcess>> {
        self.find_first(Criterion::eq("dataRequest.id", correlation_id))
            .await
    }
}
