//! Conflict-tolerant bulk writes.
//!
//! Every write goes through [`bulk_insert`], which validates the row shapes
//! up front, chunks rows below SQLite's bind-parameter limit and bounds each
//! statement with a timeout.

use sqlx::query_builder::Separated;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default SQLITE_MAX_VARIABLE_NUMBER of older SQLite builds.
const MAX_BIND_PARAMS: usize = 999;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("{what} timed out after {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error("Row {row} for {table} has {got} values, expected {expected}")]
    LengthMismatch {
        table: String,
        row: usize,
        got: usize,
        expected: usize,
    },
}

impl DbError {
    /// A malformed write will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DbError::LengthMismatch { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OnConflict<'a> {
    DoNothing,
    /// `ON CONFLICT (<target>) DO UPDATE SET <set>`; `set` may end with a
    /// `WHERE` filter.
    DoUpdate { target: &'a [&'a str], set: &'a str },
}

impl OnConflict<'_> {
    fn clause(&self) -> String {
        match self {
            OnConflict::DoNothing => " ON CONFLICT DO NOTHING".to_string(),
            OnConflict::DoUpdate { target, set } => {
                format!(" ON CONFLICT ({}) DO UPDATE SET {}", target.join(", "), set)
            }
        }
    }
}

fn push_value<'qb, 'args: 'qb>(sep: &mut Separated<'qb, 'args, Sqlite, &'static str>, value: SqlValue) {
    match value {
        SqlValue::Text(v) => {
            sep.push_bind(v);
        }
        SqlValue::Int(v) => {
            sep.push_bind(v);
        }
        SqlValue::Bool(v) => {
            sep.push_bind(v);
        }
        SqlValue::Null => {
            sep.push_bind(Option::<String>::None);
        }
    }
}

/// Runs `fut`, turning an elapsed `limit` into [`DbError::Timeout`].
pub async fn with_timeout<T, F>(what: &str, limit: Duration, fut: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(DbError::Timeout {
            what: what.to_string(),
            timeout: limit,
        }),
    }
}

/// Inserts `rows` into `table`, returning the number of rows written.
/// Rows whose length differs from `columns` reject the whole call before
/// anything is executed.
pub async fn bulk_insert(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[&str],
    rows: Vec<Vec<SqlValue>>,
    on_conflict: OnConflict<'_>,
    timeout: Duration,
) -> Result<u64, DbError> {
    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(DbError::LengthMismatch {
                table: table.to_string(),
                row: index,
                got: row.len(),
                expected: columns.len(),
            });
        }
    }
    if rows.is_empty() || columns.is_empty() {
        return Ok(0);
    }

    let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
    let conflict = on_conflict.clause();
    let mut written = 0;

    for chunk in rows.chunks(rows_per_statement) {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO {} ({}) ",
            table,
            columns.join(", ")
        ));
        query.push_values(chunk, |mut sep, row| {
            for value in row {
                push_value(&mut sep, value.clone());
            }
        });
        query.push(&conflict);

        let result = with_timeout(table, timeout, query.build().execute(&mut *conn)).await?;
        written += result.rows_affected();
    }

    Ok(written)
}
