use std::fmt::{self, Write as _};

use helios_core::{split_statements, StatementKind};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use thiserror::Error;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum StatementError {
    #[error("{0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Rejected(String),
}

/// One decoded SQLite cell.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(usize),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Blob(len) => write!(f, "<{len} bytes>"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryOutput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Renders the rows as a markdown table, the format the reasoning agents read.
    pub fn to_markdown(&self) -> String {
        if self.rows.is_empty() {
            return "Query returned no rows.".to_string();
        }

        let mut out = String::new();
        let header = self.columns.iter().map(|c| escape_cell(c)).collect::<Vec<_>>();
        let _ = writeln!(out, "| {} |", header.join(" | "));
        let _ = writeln!(out, "|{}", " --- |".repeat(self.columns.len()));
        for row in &self.rows {
            let cells = row.iter().map(|cell| escape_cell(&cell.to_string())).collect::<Vec<_>>();
            let _ = writeln!(out, "| {} |", cells.join(" | "));
        }
        out.truncate(out.trim_end().len());
        out
    }
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// Runs raw statements issued by the data-access tools.
///
/// Each call acquires its own pooled connection; nothing spans calls.
#[derive(Clone)]
pub struct StatementExecutor {
    pool: DbPool,
}

impl StatementExecutor {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Executes a read-only statement. Anything that could mutate is rejected before it
    /// reaches the database.
    pub async fn read(&self, sql: &str) -> Result<QueryOutput, StatementError> {
        let statement = single_statement(sql)?;
        let kind = StatementKind::classify(&statement);
        if !kind.is_read_only() {
            return Err(StatementError::Rejected(format!(
                "only read-only statements are allowed here, got a {kind} statement"
            )));
        }

        let rows = sqlx::query(&statement).fetch_all(&self.pool).await?;
        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            event_name = "system.db.statement.read",
            rows = rows.len(),
            "read statement executed"
        );
        Ok(QueryOutput { columns, rows })
    }

    /// Executes a mutating statement and returns the affected row count.
    pub async fn write(&self, sql: &str) -> Result<u64, StatementError> {
        let statement = single_statement(sql)?;
        let result = sqlx::query(&statement).execute(&self.pool).await?;
        tracing::debug!(
            event_name = "system.db.statement.write",
            rows_affected = result.rows_affected(),
            "write statement executed"
        );
        Ok(result.rows_affected())
    }
}

/// SQLite runs every statement in a query string, so only the one that was
/// classified may be sent.
fn single_statement(sql: &str) -> Result<String, StatementError> {
    let mut statements = split_statements(sql);
    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(StatementError::Rejected("the statement is empty".to_string())),
        count => Err(StatementError::Rejected(format!(
            "exactly one statement per call is allowed, got {count}"
        ))),
    }
}

fn decode_row(row: &SqliteRow) -> Result<Vec<CellValue>, sqlx::Error> {
    (0..row.columns().len()).map(|index| decode_cell(row, index)).collect()
}

fn decode_cell(row: &SqliteRow, index: usize) -> Result<CellValue, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(CellValue::Null);
    }
    // The storage class of the value, not the declared column type.
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let cell = match type_name.as_str() {
        "INTEGER" | "INT8" | "BIGINT" | "BOOLEAN" => {
            CellValue::Integer(row.try_get_unchecked::<i64, _>(index)?)
        }
        "REAL" | "NUMERIC" => CellValue::Real(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => CellValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?.len()),
        _ => CellValue::Text(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(cell)
}
