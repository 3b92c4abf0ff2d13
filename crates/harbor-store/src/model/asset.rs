//! Assets: the data offered to counter-parties.
use crate::entity::{Entity, EntitySchema, json_column, to_json};
use harbor_sql::{Column, SqlParam, StoreResult, TableMapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::any::AnyRow;
use std::collections::BTreeMap;

const COLUMNS: &[Column] = &[
    Column::text("id", "id"),
    Column::json("properties", "properties"),
    Column::json("dataAddress", "data_address"),
    Column::integer("createdAt", "created_at"),
];

const DDL: &[&str] = &["CREATE TABLE IF NOT EXISTS harbor_asset (\
    id TEXT PRIMARY KEY, \
    properties TEXT NOT NULL, \
    data_address TEXT NOT NULL, \
    created_at BIGINT NOT NULL)"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    // Queryable as `properties.<key>`.
    pub properties: BTreeMap<String, Value>,
    pub data_address: BTreeMap<String, Value>,
    pub created_at: i64,
}

impl Asset {
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
            data_address: BTreeMap::new(),
            created_at,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_data_address(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data_address.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl Entity for Asset {
    const SCHEMA: EntitySchema = EntitySchema {
        kind: "asset",
        mapping: TableMapping {
            table: "harbor_asset",
            id_column: "id",
            columns: COLUMNS,
            json_members: Some("properties"),
        },
        ddl: DDL,
    };

    fn id(&self) -> &str {
        &self.id
    }

    fn to_params(&self) -> StoreResult<Vec<SqlParam>> {
        Ok(vec![
            SqlParam::Text(self.id.clone()),
            SqlParam::Text(to_json(&self.properties)?),
            SqlParam::Text(to_json(&self.data_address)?),
            SqlParam::Int(self.created_at),
        ])
    }

    fn from_row(row: &AnyRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            properties: json_column(row, "properties")?,
            data_address: json_column(row, "data_address")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
