//! # taskflow-migrate: Dual-backend migration engine
//!
//! Parses versioned migration files (`V<n>__<name>.sql` / `.js`), runs them
//! against a relational database or a document store, and tracks the last
//! known state of every version.
//!
//! - Relational bodies are split into statements and run in one transaction.
//! - Document bodies are a restricted script of whitelisted operations,
//!   applied in order without a transaction.
//!
//! [`Migrator`] is the entry point; it routes each call to the parser,
//! executor and tracker of the requested target type.

pub mod backends;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod migrations;
pub mod orchestrator;
pub mod sql;
pub mod tracker;

// Re-export core traits and types
pub use backends::{DatabaseConnection, DatabaseConnector, SqlDialect};
pub use config::{ConfigError, Environment, MigratorConfig};
pub use document::{DocumentDatabase, DocumentStore, DocumentStoreError, MemoryDocumentStore};
pub use error::{MigrationError, MigrationResult};
pub use executor::{DocumentExecutor, MigrationExecutor, SqlExecutor};
pub use migrations::{
    CreateMigration, Migration, MigrationParser, MigrationRecord, MigrationStatus, TargetType,
    ValidationErrors, ValidationReport, ValidationRule,
};
pub use orchestrator::Migrator;
pub use tracker::{DocumentVersionTracker, SqlVersionTracker, VersionTracker};
