//! Contract negotiations between this connector and a counter-party.
use super::{decode_state, next_state_count};
use crate::entity::{Entity, EntitySchema, StatefulEntity, optional_json_column, to_json};
use crate::store::SqlEntityStore;
use harbor_sql::{Column, Criterion, SqlParam, StoreError, StoreResult, TableMapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::any::AnyRow;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationType {
    Consumer,
    Provider,
}

impl NegotiationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationType::Consumer => "CONSUMER",
            NegotiationType::Provider => "PROVIDER",
        }
    }
}

impl FromStr for NegotiationType {
    type Err = StoreError;

    fn from_str(value: &str) -> StoreResult<Self> {
        match value {
            "CONSUMER" => Ok(NegotiationType::Consumer),
            "PROVIDER" => Ok(NegotiationType::Provider),
            other => Err(anyhow::anyhow!("unknown negotiation type '{other}'").into()),
        }
    }
}

/// Negotiation states, persisted as their integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractNegotiationState {
    Requesting,
    Requested,
    ProviderOffering,
    ProviderOffered,
    ConsumerOffering,
    ConsumerOffered,
    ConsumerApproving,
    ConsumerApproved,
    Declining,
    Declined,
    Confirming,
    Confirmed,
    Error,
}

impl ContractNegotiationState {
    pub const ALL: [ContractNegotiationState; 13] = [
        ContractNegotiationState::Requesting,
        ContractNegotiationState::Requested,
        ContractNegotiationState::ProviderOffering,
        ContractNegotiationState::ProviderOffered,
        ContractNegotiationState::ConsumerOffering,
        ContractNegotiationState::ConsumerOffered,
        ContractNegotiationState::ConsumerApproving,
        ContractNegotiationState::ConsumerApproved,
        ContractNegotiationState::Declining,
        ContractNegotiationState::Declined,
        ContractNegotiationState::Confirming,
        ContractNegotiationState::Confirmed,
        ContractNegotiationState::Error,
    ];

    pub fn code(self) -> i64 {
        match self {
            ContractNegotiationState::Requesting => 100,
            ContractNegotiationState::Requested => 200,
            ContractNegotiationState::ProviderOffering => 300,
            ContractNegotiationState::ProviderOffered => 400,
            ContractNegotiationState::ConsumerOffering => 500,
            ContractNegotiationState::ConsumerOffered => 600,
            ContractNegotiationState::ConsumerApproving => 700,
            ContractNegotiationState::ConsumerApproved => 800,
            ContractNegotiationState::Declining => 900,
            ContractNegotiationState::Declined => 1000,
            ContractNegotiationState::Confirming => 1100,
            ContractNegotiationState::Confirmed => 1200,
            ContractNegotiationState::Error => -1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.code() == code)
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            ContractNegotiationState::Confirmed
                | ContractNegotiationState::Declined
                | ContractNegotiationState::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAgreement {
    pub id: String,
    pub provider_id: String,
    pub consumer_id: String,
    pub asset_id: String,
    pub policy: Value,
    pub contract_signing_date: i64,
}

const COLUMNS: &[Column] = &[
    Column::text("id", "id"),
    Column::text("correlationId", "correlation_id"),
    Column::text("counterPartyId", "counter_party_id"),
    Column::text("counterPartyAddress", "counter_party_address"),
    Column::text("protocol", "protocol"),
    Column::text("type", "negotiation_type"),
    Column::integer("state", "state"),
    Column::integer("stateCount", "state_count"),
    Column::integer("stateTimestamp", "state_timestamp"),
    Column::text("errorDetail", "error_detail"),
    Column::json("contractAgreement", "contract_agreement"),
    Column::text("contractAgreement.id", "agreement_id"),
    Column::text("contractAgreement.assetId", "agreement_asset_id"),
    Column::integer("createdAt", "created_at"),
];

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS harbor_contract_negotiation (\
     id TEXT PRIMARY KEY, \
     correlation_id TEXT, \
     counter_party_id TEXT NOT NULL, \
     counter_party_address TEXT NOT NULL, \
     protocol TEXT NOT NULL, \
     negotiation_type TEXT NOT NULL, \
     state BIGINT NOT NULL, \
     state_count BIGINT NOT NULL, \
     state_timestamp BIGINT NOT NULL, \
     error_detail TEXT, \
     contract_agreement TEXT, \
     agreement_id TEXT, \
     agreement_asset_id TEXT, \
     created_at BIGINT NOT NULL)",
    "CREATE INDEX IF NOT EXISTS harbor_contract_negotiation_state \
     ON harbor_contract_negotiation (state, state_timestamp)",
    "CREATE INDEX IF NOT EXISTS harbor_contract_negotiation_correlation \
     ON harbor_contract_negotiation (correlation_id)",
    "CREATE INDEX IF NOT EXISTS harbor_contract_negotiation_agreement \
     ON harbor_contract_negotiation (agreement_id)",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractNegotiation {
    pub id: String,
    // Id of the same negotiation on the counter-party side.
    pub correlation_id: Option<String>,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    #[serde(rename = "type")]
    pub negotiation_type: NegotiationType,
    pub state: ContractNegotiationState,
    pub state_count: i64,
    pub state_timestamp: i64,
    pub error_detail: Option<String>,
    pub contract_agreement: Option<ContractAgreement>,
    pub created_at: i64,
}

impl ContractNegotiation {
    pub fn new(
        id: impl Into<String>,
        negotiation_type: NegotiationType,
        counter_party_id: impl Into<String>,
        counter_party_address: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            correlation_id: None,
            counter_party_id: counter_party_id.into(),
            counter_party_address: counter_party_address.into(),
            protocol: "ids-multipart".to_string(),
            negotiation_type,
            state: ContractNegotiationState::Requesting,
            state_count: 1,
            state_timestamp: now_millis,
            error_detail: None,
            contract_agreement: None,
            created_at: now_millis,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Move to `state`; re-entering the current state bumps `state_count`.
    pub fn transition_to(&mut self, state: ContractNegotiationState, now_millis: i64) {
        self.state_count = next_state_count(self.state.code(), state.code(), self.state_count);
        self.state = state;
        self.state_timestamp = now_millis;
    }

    pub fn transition_error(&mut self, detail: impl Into<String>, now_millis: i64) {
        self.error_detail = Some(detail.into());
        self.transition_to(ContractNegotiationState::Error, now_millis);
    }

    pub fn set_agreement(&mut self, agreement: ContractAgreement) {
        self.contract_agreement = Some(agreement);
    }
}

impl Entity for ContractNegotiation {
    const SCHEMA: EntitySchema = EntitySchema {
        kind: "contract-negotiation",
        mapping: TableMapping {
            table: "harbor_contract_negotiation",
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
        let agreement = self.contract_agreement.as_ref();
        Ok(vec![
            SqlParam::Text(self.id.clone()),
            SqlParam::NullableText(self.correlation_id.clone()),
            SqlParam::Text(self.counter_party_id.clone()),
            SqlParam::Text(self.counter_party_address.clone()),
            SqlParam::Text(self.protocol.clone()),
            SqlParam::Text(self.negotiation_type.as_str().to_string()),
            SqlParam::Int(self.state.code()),
            SqlParam::Int(self.state_count),
            SqlParam::Int(self.state_timestamp),
            SqlParam::NullableText(self.error_detail.clone()),
            SqlParam::NullableText(agreement.map(to_json).transpose()?),
            SqlParam::NullableText(agreement.map(|agreement| agreement.id.clone())),
            SqlParam::NullableText(agreement.map(|agreement| agreement.asset_id.clone())),
            SqlParam::Int(self.created_at),
        ])
    }

    fn from_row(row: &AnyRow) -> StoreResult<Self> {
        let negotiation_type: String = row.try_get("negotiation_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            correlation_id: row.try_get("correlation_id")?,
            counter_party_id: row.try_get("counter_party_id")?,
            counter_party_address: row.try_get("counter_party_address")?,
            protocol: row.try_get("protocol")?,
            negotiation_type: negotiation_type.parse()?,
            state: decode_state(row, ContractNegotiationState::from_code)?,
            state_count: row.try_get("state_count")?,
            state_timestamp: row.try_get("state_timestamp")?,
            error_detail: row.try_get("error_detail")?,
            contract_agreement: optional_json_column(row, "contract_agreement")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl StatefulEntity for ContractNegotiation {
    const STATE_TIMESTAMP_COLUMN: &'static str = "state_timestamp";
}

impl SqlEntityStore<ContractNegotiation> {
    pub async fn find_for_correlation_id(
        &self,
        correlation_id: &str,
    ) -> StoreResult<Option<ContractNegotiation>> {
        self.find_first(Criterion::eq("correlationId", correlation_id))
            .await
    }

    pub async fn find_contract_agreement(
        &self,
        agreement_id: &str,
    ) -> StoreResult<Option<ContractAgreement>> {
        let negotiation = self
            .find_first(Criterion::eq("contractAgreement.id", agreement_id))
            .await?;
        Ok(negotiation.and_then(|negotiation| negotiation.contract_agreement))
    }
}
