//! Static description of how an entity type maps onto its table.
use harbor_sql::{SqlParam, StoreError, StoreResult, TableMapping};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::any::AnyRow;

#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    // Lease resource kind; also used as a metrics label.
    pub kind: &'static str,
    pub mapping: TableMapping,
    pub ddl: &'static [&'static str],
}

impl EntitySchema {
    pub fn table(&self) -> &'static str {
        self.mapping.table
    }

    pub fn insert_sql(&self) -> String {
        let placeholders = (1..=self.mapping.columns.len())
            .map(|n| format!("${n}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.mapping.table,
            self.mapping.column_list()
        )
    }

    /// `UPDATE` binding the same parameters, in the same order, as [`EntitySchema::insert_sql`].
    pub fn update_sql(&self) -> String {
        let mut assignments = Vec::new();
        let mut id_placeholder = String::new();
        for (index, column) in self.mapping.columns.iter().enumerate() {
            if column.name == self.mapping.id_column {
                id_placeholder = format!("${}", index + 1);
            } else {
                assignments.push(format!("{} = ${}", column.name, index + 1));
            }
        }
        format!(
            "UPDATE {} SET {} WHERE {} = {id_placeholder}",
            self.mapping.table,
            assignments.join(", "),
            self.mapping.id_column
        )
    }

    pub fn select_by_id_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = $1",
            self.mapping.column_list(),
            self.mapping.table,
            self.mapping.id_column
        )
    }

    pub fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = $1",
            self.mapping.table, self.mapping.id_column
        )
    }
}

/// A persisted domain object with an opaque string id.
pub trait Entity: Clone + std::fmt::Debug + Send + Sync + 'static {
    const SCHEMA: EntitySchema;

    fn id(&self) -> &str;

    /// Column values in the order of `SCHEMA.mapping.columns`.
    fn to_params(&self) -> StoreResult<Vec<SqlParam>>;

    fn from_row(row: &AnyRow) -> StoreResult<Self>;
}

/// Entities driven by a state machine; claimable with `next_not_leased`.
pub trait StatefulEntity: Entity {
    const STATE_TIMESTAMP_COLUMN: &'static str;
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value).map_err(anyhow::Error::from)?)
}

pub(crate) fn json_column<T: DeserializeOwned>(row: &AnyRow, column: &str) -> StoreResult<T> {
    let raw: String = row.try_get(column)?;
    let value = serde_json::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("decode {column}: {err}"))?;
    Ok(value)
}

pub(crate) fn optional_json_column<T: DeserializeOwned>(
    row: &AnyRow,
    column: &str,
) -> StoreResult<Option<T>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|err| StoreError::from(anyhow::anyhow!("decode {column}: {err}")))
    })
    .transpose()
}
