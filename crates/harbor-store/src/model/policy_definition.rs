use crate::entity::{Entity, EntitySchema, json_column, to_json};
use harbor_sql::{Column, SqlParam, StoreResult, TableMapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::any::AnyRow;

const COLUMNS: &[Column] = &[
    Column::text("id", "id"),
    Column::json("policy", "policy"),
    Column::integer("createdAt", "created_at"),
];

const DDL: &[&str] = &["CREATE TABLE IF NOT EXISTS harbor_policy_definition (\
    id TEXT PRIMARY KEY, \
    policy TEXT NOT NULL, \
    created_at BIGINT NOT NULL)"];

/// A named usage policy, referenced by contract definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefinition {
    pub id: String,
    // Opaque policy document; members are queryable as `policy.<key>[.<key>..]`.
    pub policy: Value,
    pub created_at: i64,
}

impl PolicyDefinition {
    pub fn new(id: impl Into<String>, policy: Value, created_at: i64) -> Self {
        Self {
            id: id.into(),
            policy,
            created_at,
        }
    }
}

impl Entity for PolicyDefinition {
    const SCHEMA: EntitySchema = EntitySchema {
        kind: "policy-definition",
        mapping: TableMapping {
            table: "harbor_policy_definition",
            id_column: "id",
            columns: COLUMNS,
            json_members: Some("policy"),
        },
        ddl: DDL,
    };

    fn id(&self) -> &str {
        &self.id
    }

    fn to_params(&self) -> StoreResult<Vec<SqlParam>> {
        Ok(vec![
            SqlParam::Text(self.id.clone()),
            SqlParam::Text(to_json(&self.policy)?),
            SqlParam::Int(self.created_at),
        ])
    }

    fn from_row(row: &AnyRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            policy: json_column(row, "policy")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
