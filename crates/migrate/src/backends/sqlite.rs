//! SQLite Backend Implementation
//!
//! File-backed SQLite databases are used for local runs and for the test
//! suite. `sqlite::memory:` URLs are accepted but every connection would see
//! a fresh, empty database, so tracking does not survive between operations.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row, Sqlite, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{MigrationError, MigrationResult};

/// Opens one SQLite connection per operation
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
}

impl SqliteConnector {
    /// Create a connector from a `sqlite:` URL, creating the file if missing
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MigrationError::Database(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);
        Ok(Self { options })
    }

    /// Create a connector for a database file
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self { options }
    }
}

#[async_trait]
impl DatabaseConnector for SqliteConnector {
    async fn connect(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        let conn = SqliteConnection::connect_with(&self.options)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to open SQLite database: {}", e)))?;

        Ok(Box::new(SqliteDatabaseConnection { conn }))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }
}

/// SQLite connection implementation
pub struct SqliteDatabaseConnection {
    conn: SqliteConnection,
}

#[async_trait]
impl DatabaseConnection for SqliteDatabaseConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn execute_raw(&mut self, sql: &str) -> MigrationResult<u64> {
        let result = sqlx::Executor::execute(&mut self.conn, sql).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<DatabaseRow>> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter().map(sqlite_row_to_database_row).collect()
    }

    async fn close(self: Box<Self>) -> MigrationResult<()> {
        let this = *self;
        this.conn.close().await?;
        Ok(())
    }
}

/// Bind a DatabaseValue to a sqlx query; timestamps are stored as RFC 3339 text
fn bind_database_value<'a>(
    query: Query<'a, Sqlite, SqliteArguments<'a>>,
    value: &DatabaseValue,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(DatabaseValue::datetime_text(dt)),
    }
}

fn sqlite_row_to_database_row(row: &SqliteRow) -> MigrationResult<DatabaseRow> {
    let mut columns = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        columns.push((
            column.name().to_string(),
            sqlite_value_to_database_value(row, index)?,
        ));
    }
    Ok(DatabaseRow::new(columns))
}

/// Convert a SQLite value to DatabaseValue using its runtime storage class
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> MigrationResult<DatabaseValue> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(DatabaseValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "INTEGER" => DatabaseValue::Int64(row.try_get(index)?),
        "REAL" => DatabaseValue::Float64(row.try_get(index)?),
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index)?),
        _ => DatabaseValue::String(row.try_get::<String, _>(index).map_err(|e| {
            MigrationError::Database(format!(
                "Failed to get value as string for type '{}': {}",
                type_name, e
            ))
        })?),
    };

    Ok(value)
}
