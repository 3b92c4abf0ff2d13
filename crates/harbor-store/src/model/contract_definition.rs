use crate::entity::{Entity, EntitySchema, json_column, to_json};
use harbor_sql::{Column, Criterion, SqlParam, StoreResult, TableMapping};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::any::AnyRow;

const COLUMNS: &[Column] = &[
    Column::text("id", "id"),
    Column::text("accessPolicyId", "access_policy_id"),
    Column::text("contractPolicyId", "contract_policy_id"),
    Column::json("assetSelector", "asset_selector"),
    Column::integer("createdAt", "created_at"),
];

const DDL: &[&str] = &["CREATE TABLE IF NOT EXISTS harbor_contract_definition (\
    id TEXT PRIMARY KEY, \
    access_policy_id TEXT NOT NULL, \
    contract_policy_id TEXT NOT NULL, \
    asset_selector TEXT NOT NULL, \
    created_at BIGINT NOT NULL)"];

/// Offers the assets matched by `asset_selector` under two policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDefinition {
    pub id: String,
    pub access_policy_id: String,
    pub contract_policy_id: String,
    pub asset_selector: Vec<Criterion>,
    pub created_at: i64,
}

impl ContractDefinition {
    pub fn new(
        id: impl Into<String>,
        access_policy_id: impl Into<String>,
        contract_policy_id: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            access_policy_id: access_policy_id.into(),
            contract_policy_id: contract_policy_id.into(),
            asset_selector: Vec::new(),
            created_at,
        }
    }

    pub fn with_selector(mut self, criterion: Criterion) -> Self {
        self.asset_selector.push(criterion);
        self
    }
}

impl Entity for ContractDefinition {
    const SCHEMA: EntitySchema = EntitySchema {
        kind: "contract-definition",
        mapping: TableMapping {
            table: "harbor_contract_definition",
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
            SqlParam::Text(self.access_policy_id.clone()),
            SqlParam::Text(self.contract_policy_id.clone()),
            SqlParam::Text(to_json(&self.asset_selector)?),
            SqlParam::Int(self.created_at),
        ])
    }

    fn from_row(row: &AnyRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            access_policy_id: row.try_get("access_policy_id")?,
            contract_policy_id: row.try_get("contract_policy_id")?,
            asset_selector: json_column(row, "asset_selector")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
