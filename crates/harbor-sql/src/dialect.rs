//! Backend-specific SQL fragments.
//!
//! Statements are written in the subset shared by Postgres and SQLite: `$n`
//! placeholders, `INSERT .. ON CONFLICT .. DO UPDATE .. WHERE`, `LIMIT .. OFFSET`.
//! Only JSON extraction differs and lives here.
use crate::error::{StoreError, StoreResult};
use crate::query::{SqlParam, SqlStatement};
use anyhow::anyhow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Pick the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(StoreError::Unexpected(anyhow!(
                "unsupported database scheme '{other}'"
            ))),
        }
    }

    pub fn backend_name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Text form of the JSON member at `segments` inside `column`, registering
    /// the path on `stmt`. Numbers compare as their text form on both backends.
    pub fn json_text(self, column: &str, segments: &[&str], stmt: &mut SqlStatement) -> String {
        match self {
            Dialect::Postgres => {
                let mut expr = format!("{column}::json");
                for (index, segment) in segments.iter().enumerate() {
                    let key = stmt.push_param(SqlParam::Text(segment.to_string()));
                    let op = if index + 1 == segments.len() { "->>" } else { "->" };
                    expr.push_str(&format!(" {op} {key}"));
                }
                format!("({expr})")
            }
            Dialect::Sqlite => {
                let path = segments
                    .iter()
                    .map(|segment| format!(".\"{segment}\""))
                    .collect::<String>();
                let path = stmt.push_param(SqlParam::Text(format!("${path}")));
                format!("CAST(json_extract({column}, {path}) AS TEXT)")
            }
        }
    }
}
