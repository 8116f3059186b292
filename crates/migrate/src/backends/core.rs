//! Core Database Backend Traits
//!
//! Abstracts the relational store behind a connection factory so executors
//! and trackers receive their connections explicitly. Every operation opens
//! its own connection and closes it on the way out.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use crate::error::{MigrationError, MigrationResult};

/// Connection factory injected into executors and trackers
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Open a new connection
    async fn connect(&self) -> MigrationResult<Box<dyn DatabaseConnection>>;

    /// Get the SQL dialect used by this backend
    fn dialect(&self) -> SqlDialect;
}

/// Abstract database connection trait
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute a parameterized query and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a statement verbatim, without preparing it
    async fn execute_raw(&mut self, sql: &str) -> MigrationResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<DatabaseRow>>;

    /// Begin a transaction
    async fn begin(&mut self) -> MigrationResult<()> {
        self.execute_raw("BEGIN").await.map(|_| ())
    }

    /// Commit the open transaction
    async fn commit(&mut self) -> MigrationResult<()> {
        self.execute_raw("COMMIT").await.map(|_| ())
    }

    /// Roll back the open transaction
    async fn rollback(&mut self) -> MigrationResult<()> {
        self.execute_raw("ROLLBACK").await.map(|_| ())
    }

    /// Close the connection
    async fn close(self: Box<Self>) -> MigrationResult<()>;
}

/// Close a connection, keeping the result of the work done on it
pub async fn release<T>(
    conn: Box<dyn DatabaseConnection>,
    result: MigrationResult<T>,
) -> MigrationResult<T> {
    if let Err(e) = conn.close().await {
        warn!("Failed to close database connection: {}", e);
    }
    result
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Timestamps come back natively from Postgres and as text from SQLite
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            DatabaseValue::DateTime(dt) => Some(*dt),
            DatabaseValue::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            _ => None,
        }
    }

    /// Text encoding used by backends without a native timestamp type
    pub fn datetime_text(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A fetched row, detached from the driver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<(String, DatabaseValue)>) -> Self {
        Self { columns }
    }

    /// Get a column value by name
    pub fn get(&self, name: &str) -> MigrationResult<&DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
            .ok_or_else(|| MigrationError::Database(format!("Column '{}' not found", name)))
    }

    pub fn get_string(&self, name: &str) -> MigrationResult<String> {
        self.get(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_error(name, "text"))
    }

    pub fn get_optional_string(&self, name: &str) -> MigrationResult<Option<String>> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| type_error(name, "text"))
    }

    pub fn get_i64(&self, name: &str) -> MigrationResult<i64> {
        self.get(name)?
            .as_i64()
            .ok_or_else(|| type_error(name, "integer"))
    }

    pub fn get_datetime(&self, name: &str) -> MigrationResult<DateTime<Utc>> {
        self.get(name)?
            .as_datetime()
            .ok_or_else(|| type_error(name, "timestamp"))
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }
}

fn type_error(column: &str, expected: &str) -> MigrationError {
    MigrationError::Database(format!("Column '{}' is not a valid {}", column, expected))
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Comma separated placeholders for `count` parameters
    pub fn placeholders(&self, count: usize) -> String {
        (0..count)
            .map(|index| self.parameter_placeholder(index))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Column type used for timestamps
    pub fn timestamp_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "TIMESTAMPTZ",
            SqlDialect::SQLite => "TEXT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::PostgreSQL.placeholders(3), "$1, $2, $3");
        assert_eq!(SqlDialect::SQLite.placeholders(2), "?, ?");
    }

    #[test]
    fn test_datetime_text_round_trip() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let text = DatabaseValue::datetime_text(&dt);
        assert_eq!(text, "2024-05-01T12:30:00.000000Z");
        assert_eq!(DatabaseValue::String(text).as_datetime(), Some(dt));
    }

    #[test]
    fn test_row_accessors() {
        let row = DatabaseRow::new(vec![
            ("version".to_string(), DatabaseValue::from("V1")),
            ("execution_time_ms".to_string(), DatabaseValue::from(42i64)),
            ("error".to_string(), DatabaseValue::Null),
        ]);

        assert_eq!(row.get_string("version").unwrap(), "V1");
        assert_eq!(row.get_i64("execution_time_ms").unwrap(), 42);
        assert_eq!(row.get_optional_string("error").unwrap(), None);
        assert!(row.get("missing").is_err());
        assert!(row.get_i64("version").is_err());
        assert_eq!(row.column_names(), vec!["version", "execution_time_ms", "error"]);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(DatabaseValue::from(None::<String>), DatabaseValue::Null);
        assert_eq!(
            DatabaseValue::from(Some("x".to_string())),
            DatabaseValue::String("x".to_string())
        );
    }
}
