//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL-specific implementation of the
//! connection traits using sqlx as the underlying database driver.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Postgres, Row, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{MigrationError, MigrationResult};

/// Opens one PostgreSQL connection per operation
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    options: PgConnectOptions,
}

impl PostgresConnector {
    /// Create a connector from a `postgres://` URL
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| MigrationError::Database(format!("Invalid PostgreSQL URL: {}", e)))?;
        Ok(Self { options })
    }

    pub fn with_options(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        let conn = PgConnection::connect_with(&self.options).await.map_err(|e| {
            MigrationError::Database(format!("Failed to connect to PostgreSQL: {}", e))
        })?;

        Ok(Box::new(PostgresConnection { conn }))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    conn: PgConnection,
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
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
        rows.iter().map(postgres_row_to_database_row).collect()
    }

    async fn close(self: Box<Self>) -> MigrationResult<()> {
        let this = *self;
        this.conn.close().await?;
        Ok(())
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: Query<'a, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> Query<'a, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
    }
}

fn postgres_row_to_database_row(row: &PgRow) -> MigrationResult<DatabaseRow> {
    let mut columns = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        columns.push((
            column.name().to_string(),
            postgres_value_to_database_value(row, index)?,
        ));
    }
    Ok(DatabaseRow::new(columns))
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> MigrationResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int64(row.try_get::<i16, _>(index)? as i64),
        "INT4" => DatabaseValue::Int64(row.try_get::<i32, _>(index)? as i64),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get::<DateTime<Utc>, _>(index)?),
        "TIMESTAMP" => DatabaseValue::DateTime(row.try_get::<NaiveDateTime, _>(index)?.and_utc()),
        // Fallback: try to get as string
        _ => DatabaseValue::String(row.try_get::<String, _>(index).map_err(|e| {
            MigrationError::Database(format!(
                "Failed to get value as string for type '{}': {}",
                type_name, e
            ))
        })?),
    };

    Ok(value)
}
