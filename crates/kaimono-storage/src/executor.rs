use crate::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};

/// A positionally bound SQL value, used both for binding parameters and for
/// reading result columns back out.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One result row as an ordered list of named values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    columns: Vec<(String, SqlValue)>,
}

impl SqlRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.columns.push((name.to_string(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(SqlValue::as_text)
            .map(str::to_string)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(SqlValue::as_integer)
    }

    /// Required text column; missing or non-text is a data error.
    pub fn require_text(&self, name: &str) -> Result<String, StorageError> {
        self.text(name)
            .ok_or_else(|| StorageError::Data(format!("missing text column `{name}`")))
    }

    pub fn require_integer(&self, name: &str) -> Result<i64, StorageError> {
        self.integer(name)
            .ok_or_else(|| StorageError::Data(format!("missing integer column `{name}`")))
    }
}

/// The read-query seam: `sql` uses `?` positional placeholders and `params`
/// is supplied in placeholder order. Implementations add no retry or
/// fallback; errors propagate to the caller unchanged.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError>;
}

/// Production executor over the shared sqlite pool.
#[derive(Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, StorageError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(Option::<String>::None),
                SqlValue::Integer(value) => query.bind(*value),
                SqlValue::Real(value) => query.bind(*value),
                SqlValue::Text(value) => query.bind(value.clone()),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_sql_row).collect()
    }
}

fn row_to_sql_row(row: &SqliteRow) -> Result<SqlRow, StorageError> {
    let mut columns = Vec::with_capacity(row.len());
    for column in row.columns() {
        let ordinal = column.ordinal();
        let raw = row.try_get_raw(ordinal)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get(ordinal)?),
                "REAL" => SqlValue::Real(row.try_get(ordinal)?),
                _ => SqlValue::Text(row.try_get(ordinal)?),
            }
        };
        columns.push((column.name().to_string(), value));
    }
    Ok(SqlRow { columns })
}
