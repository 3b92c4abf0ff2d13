//! Query specifications and their translation to parameterised SQL.
//!
//! # Purpose
//! Callers describe what they want with a [`QuerySpec`] (filter criteria,
//! sorting, paging) in terms of entity *properties*; each entity type maps its
//! properties onto columns with a [`TableMapping`]. Translation fails with
//! [`StoreError::InvalidQuery`] rather than silently ignoring unknown input.
//!
//! # Security notes
//! - Values and JSON paths are always bound as parameters.
//! - Only column names declared in a static [`TableMapping`] reach the SQL text.
use crate::dialect::Dialect;
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_QUERY_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "like", alias = "LIKE")]
    Like,
    #[serde(rename = "in", alias = "IN")]
    In,
}

impl Operator {
    fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
        }
    }
}

impl FromStr for Operator {
    type Err = StoreError;

    fn from_str(input: &str) -> StoreResult<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::NotEq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "like" => Ok(Operator::Like),
            "in" => Ok(Operator::In),
            other => Err(StoreError::invalid_query(format!(
                "unsupported operator '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "like",
            Operator::In => "in",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionValue {
    Int(i64),
    Text(String),
    List(Vec<CriterionValue>),
}

impl From<&str> for CriterionValue {
    fn from(value: &str) -> Self {
        CriterionValue::Text(value.to_string())
    }
}

impl From<String> for CriterionValue {
    fn from(value: String) -> Self {
        CriterionValue::Text(value)
    }
}

impl From<i64> for CriterionValue {
    fn from(value: i64) -> Self {
        CriterionValue::Int(value)
    }
}

impl From<i32> for CriterionValue {
    fn from(value: i32) -> Self {
        CriterionValue::Int(value as i64)
    }
}

impl<T: Into<CriterionValue>> From<Vec<T>> for CriterionValue {
    fn from(values: Vec<T>) -> Self {
        CriterionValue::List(values.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub operand_left: String,
    pub operator: Operator,
    pub operand_right: CriterionValue,
}

impl Criterion {
    pub fn new(
        operand_left: impl Into<String>,
        operator: Operator,
        operand_right: impl Into<CriterionValue>,
    ) -> Self {
        Self {
            operand_left: operand_left.into(),
            operator,
            operand_right: operand_right.into(),
        }
    }

    pub fn eq(operand_left: impl Into<String>, operand_right: impl Into<CriterionValue>) -> Self {
        Self::new(operand_left, Operator::Eq, operand_right)
    }

    /// Build a criterion from its textual operator, e.g. `"like"`.
    pub fn parse(
        operand_left: impl Into<String>,
        operator: &str,
        operand_right: impl Into<CriterionValue>,
    ) -> StoreResult<Self> {
        Ok(Self::new(operand_left, operator.parse()?, operand_right))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySpec {
    pub filter: Vec<Criterion>,
    pub sort_field: Option<String>,
    pub sort_order: SortOrder,
    pub offset: u32,
    pub limit: u32,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            filter: Vec::new(),
            sort_field: None,
            sort_order: SortOrder::Asc,
            offset: 0,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, criterion: Criterion) -> Self {
        self.filter.push(criterion);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.sort_order = order;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    // Serialized JSON text; reachable only through a JSON property path.
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub property: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn text(property: &'static str, name: &'static str) -> Self {
        Self {
            name,
            property,
            kind: ColumnKind::Text,
        }
    }

    pub const fn integer(property: &'static str, name: &'static str) -> Self {
        Self {
            name,
            property,
            kind: ColumnKind::Integer,
        }
    }

    pub const fn json(property: &'static str, name: &'static str) -> Self {
        Self {
            name,
            property,
            kind: ColumnKind::Json,
        }
    }
}

/// Property-to-column mapping of one entity table.
#[derive(Debug, Clone, Copy)]
pub struct TableMapping {
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [Column],
    /// JSON column whose members are queryable as `<property>.<key>`.
    pub json_members: Option<&'static str>,
}

impl TableMapping {
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| column.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Property naming the id column.
    pub fn id_property(&self) -> &'static str {
        self.columns
            .iter()
            .find(|column| column.name == self.id_column)
            .map_or(self.id_column, |column| column.property)
    }

    fn column_for(&self, property: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.property == property)
    }

    /// JSON column and key path for `<property>.<key>[.<key>..]`. Empty keys and
    /// keys containing `"` are not addressable.
    fn json_member<'a>(&self, property: &'a str) -> Option<(&Column, Vec<&'a str>)> {
        let column = self.column_for(self.json_members?)?;
        let path = property.strip_prefix(column.property)?.strip_prefix('.')?;
        let segments = path.split('.').collect::<Vec<_>>();
        segments
            .iter()
            .all(|segment| !segment.is_empty() && !segment.contains('"'))
            .then_some((column, segments))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    NullableText(Option<String>),
    Int(i64),
    NullableInt(Option<i64>),
}

impl SqlParam {
    pub fn bind<'q>(
        self,
        query: Query<'q, Any, AnyArguments<'q>>,
    ) -> Query<'q, Any, AnyArguments<'q>> {
        match self {
            SqlParam::Text(value) => query.bind(value),
            SqlParam::NullableText(value) => query.bind(value),
            SqlParam::Int(value) => query.bind(value),
            SqlParam::NullableInt(value) => query.bind(value),
        }
    }
}

/// SQL text plus its positional (`$n`) parameters.
#[derive(Debug, Clone, Default)]
pub struct SqlStatement {
    sql: String,
    params: Vec<SqlParam>,
}

impl SqlStatement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn push_sql(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    /// Register a parameter and return its placeholder.
    pub fn push_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn query(&self) -> Query<'_, Any, AnyArguments<'_>> {
        self.params
            .iter()
            .cloned()
            .fold(sqlx::query(&self.sql), |query, param| param.bind(query))
    }
}

/// Translate filter criteria into SQL conditions, registering their values on `stmt`.
pub fn filter_conditions(
    mapping: &TableMapping,
    filter: &[Criterion],
    dialect: Dialect,
    stmt: &mut SqlStatement,
) -> StoreResult<Vec<String>> {
    filter
        .iter()
        .map(|criterion| condition(mapping, criterion, dialect, stmt))
        .collect()
}

fn condition(
    mapping: &TableMapping,
    criterion: &Criterion,
    dialect: Dialect,
    stmt: &mut SqlStatement,
) -> StoreResult<String> {
    let property = criterion.operand_left.as_str();
    let (expr, kind) = match mapping.column_for(property) {
        Some(column) if column.kind != ColumnKind::Json => (column.name.to_string(), column.kind),
        _ => match mapping.json_member(property) {
            Some((column, segments)) => {
                (dialect.json_text(column.name, &segments, stmt), ColumnKind::Text)
            }
            None => return Err(translation_failed(mapping, property)),
        },
    };

    match criterion.operator {
        Operator::In => {
            let values = match &criterion.operand_right {
                CriterionValue::List(values) => values.clone(),
                scalar => vec![scalar.clone()],
            };
            if values.is_empty() {
                return Ok("1 = 0".to_string());
            }
            let placeholders = values
                .iter()
                .map(|value| -> StoreResult<String> {
                    Ok(stmt.push_param(coerce(mapping, property, kind, value)?))
                })
                .collect::<StoreResult<Vec<_>>>()?;
            Ok(format!("{expr} IN ({})", placeholders.join(", ")))
        }
        Operator::Like if kind != ColumnKind::Text => Err(StoreError::invalid_query(format!(
            "translation failed: 'like' is not supported on '{property}'"
        ))),
        operator => {
            let param = coerce(mapping, property, kind, &criterion.operand_right)?;
            let placeholder = stmt.push_param(param);
            Ok(format!("{expr} {} {placeholder}", operator.sql()))
        }
    }
}

fn coerce(
    mapping: &TableMapping,
    property: &str,
    kind: ColumnKind,
    value: &CriterionValue,
) -> StoreResult<SqlParam> {
    match (kind, value) {
        (ColumnKind::Integer, CriterionValue::Int(value)) => Ok(SqlParam::Int(*value)),
        (ColumnKind::Integer, CriterionValue::Text(value)) => value
            .parse::<i64>()
            .map(SqlParam::Int)
            .map_err(|_| {
                StoreError::invalid_query(format!(
                    "translation failed: '{property}' on {} expects an integer, got '{value}'",
                    mapping.table
                ))
            }),
        (_, CriterionValue::Text(value)) => Ok(SqlParam::Text(value.clone())),
        (_, CriterionValue::Int(value)) => Ok(SqlParam::Text(value.to_string())),
        (_, CriterionValue::List(_)) => Err(StoreError::invalid_query(format!(
            "translation failed: list operand is only valid with 'in' for '{property}'"
        ))),
    }
}

fn translation_failed(mapping: &TableMapping, property: &str) -> StoreError {
    StoreError::invalid_query(format!(
        "translation failed: unknown property '{property}' on {}",
        mapping.table
    ))
}

/// `ORDER BY` clause; the id column breaks ties so paging is deterministic.
pub fn order_by(mapping: &TableMapping, spec: &QuerySpec) -> StoreResult<String> {
    let Some(field) = spec.sort_field.as_deref() else {
        return Ok(format!(" ORDER BY {} ASC", mapping.id_column));
    };
    let column = mapping
        .column_for(field)
        .filter(|column| column.kind != ColumnKind::Json)
        .ok_or_else(|| translation_failed(mapping, field))?;
    let direction = match spec.sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    if column.name == mapping.id_column {
        return Ok(format!(" ORDER BY {} {direction}", column.name));
    }
    Ok(format!(
        " ORDER BY {} {direction}, {} ASC",
        column.name, mapping.id_column
    ))
}

/// Full `SELECT` for a query spec, honouring its filter, sort, offset and limit.
pub fn select_statement(
    mapping: &TableMapping,
    spec: &QuerySpec,
    dialect: Dialect,
) -> StoreResult<SqlStatement> {
    let mut stmt = SqlStatement::new();
    let conditions = filter_conditions(mapping, &spec.filter, dialect, &mut stmt)?;
    let order = order_by(mapping, spec)?;
    let mut sql = format!("SELECT {} FROM {}", mapping.column_list(), mapping.table);
    push_where(&mut sql, &conditions);
    sql.push_str(&order);
    let limit = stmt.push_param(SqlParam::Int(spec.limit as i64));
    let offset = stmt.push_param(SqlParam::Int(spec.offset as i64));
    sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    stmt.push_sql(&sql);
    Ok(stmt)
}

pub fn count_statement(
    mapping: &TableMapping,
    filter: &[Criterion],
    dialect: Dialect,
) -> StoreResult<SqlStatement> {
    let mut stmt = SqlStatement::new();
    let conditions = filter_conditions(mapping, filter, dialect, &mut stmt)?;
    let mut sql = format!("SELECT COUNT(*) FROM {}", mapping.table);
    push_where(&mut sql, &conditions);
    stmt.push_sql(&sql);
    Ok(stmt)
}

pub fn push_where(sql: &mut String, conditions: &[String]) {
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
}
