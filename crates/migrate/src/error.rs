//! Error types for the migration engine
//!
//! Every fallible operation in the crate returns [`MigrationResult`]. Driver
//! errors are folded into the infrastructure variants so callers only ever
//! match on one enum.

use thiserror::Error;

use crate::config::ConfigError;
use crate::document::DocumentStoreError;
use crate::migrations::{TargetType, ValidationErrors};

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Filename does not carry a `V<n>__` version prefix
    #[error("Invalid migration filename format: '{filename}' (expected V<n>__<name>.<ext>)")]
    InvalidFilenameFormat { filename: String },

    /// Version supplied by a caller is not of the form `V<n>`
    #[error("Invalid migration version '{version}' (expected V<n>)")]
    InvalidVersion { version: String },

    /// Static validation found one or more problems
    #[error("Migration {version} failed validation: {errors}")]
    ParseValidationFailed {
        version: String,
        errors: ValidationErrors,
    },

    /// The tracker already holds a record for this version
    #[error("Migration {version} has already been recorded for target '{target_type}'")]
    DuplicateVersion {
        version: String,
        target_type: TargetType,
    },

    /// The body to execute is blank
    #[error("Migration {version} has no content to execute")]
    EmptyContent { version: String },

    /// Rollback requested for a migration without a rollback section
    #[error("Migration {version} has no rollback content")]
    NoRollbackContent { version: String },

    /// A relational statement failed; the transaction was rolled back
    #[error("Migration {version} failed at statement {statement_index}: {message}")]
    StatementExecutionFailed {
        version: String,
        statement_index: usize,
        message: String,
    },

    /// A document-store operation failed; earlier operations stay applied
    #[error(
        "Migration {version} failed at operation {failed_at} of {total}: {message} \
         ({applied} operation(s) were applied and have NOT been reverted)"
    )]
    ScriptExecutionFailed {
        version: String,
        applied: usize,
        failed_at: usize,
        total: usize,
        message: String,
    },

    /// A migration file with this version prefix already exists
    #[error("Migration {version} already exists for target '{target_type}': {path}")]
    AlreadyExists {
        version: String,
        target_type: TargetType,
        path: String,
    },

    /// No migration file with this version prefix exists
    #[error("Migration {version} not found for target '{target_type}'")]
    NotFound {
        version: String,
        target_type: TargetType,
    },

    /// Executed migrations are immutable
    #[error("Migration {version} has already been executed for target '{target_type}' and cannot be deleted")]
    CannotDelete {
        version: String,
        target_type: TargetType,
    },

    /// Relational driver or tracking-table error
    #[error("Database error: {0}")]
    Database(String),

    /// Document store error
    #[error("Document store error: {0}")]
    DocumentStore(#[from] DocumentStoreError),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A built-in pattern failed to compile
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl MigrationError {
    /// Stable machine-readable code, used by the CLI and by API consumers
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::InvalidFilenameFormat { .. } => "INVALID_FILENAME_FORMAT",
            MigrationError::InvalidVersion { .. } => "INVALID_VERSION",
            MigrationError::ParseValidationFailed { .. } => "PARSE_VALIDATION_FAILED",
            MigrationError::DuplicateVersion { .. } => "DUPLICATE_VERSION",
            MigrationError::EmptyContent { .. } => "EMPTY_CONTENT",
            MigrationError::NoRollbackContent { .. } => "NO_ROLLBACK_CONTENT",
            MigrationError::StatementExecutionFailed { .. } => "STATEMENT_EXECUTION_FAILED",
            MigrationError::ScriptExecutionFailed { .. } => "SCRIPT_EXECUTION_FAILED",
            MigrationError::AlreadyExists { .. } => "ALREADY_EXISTS",
            MigrationError::NotFound { .. } => "NOT_FOUND",
            MigrationError::CannotDelete { .. } => "CANNOT_DELETE",
            MigrationError::Database(_) => "DATABASE",
            MigrationError::DocumentStore(_) => "DOCUMENT_STORE",
            MigrationError::Io(_) => "IO",
            MigrationError::Serialization(_) => "SERIALIZATION",
            MigrationError::Configuration(_) => "CONFIGURATION",
            MigrationError::Pattern(_) => "PATTERN",
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}
