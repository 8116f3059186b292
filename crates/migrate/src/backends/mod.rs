//! Database Backend Abstractions
//!
//! Relational connection factories for the backends the engine can migrate.

pub mod core;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::core::*;
pub use self::postgres::PostgresConnector;
pub use self::sqlite::SqliteConnector;

use crate::error::{MigrationError, MigrationResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(MigrationError::Database(format!(
                "Unable to detect database backend from URL: {}",
                url
            )))
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Build the connection factory matching a database URL
pub fn connector_from_url(url: &str) -> MigrationResult<Arc<dyn DatabaseConnector>> {
    match DatabaseBackendType::from_url(url)? {
        DatabaseBackendType::PostgreSQL => Ok(Arc::new(PostgresConnector::from_url(url)?)),
        DatabaseBackendType::SQLite => Ok(Arc::new(SqliteConnector::from_url(url)?)),
    }
}
