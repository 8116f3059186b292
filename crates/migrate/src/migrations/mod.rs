//! Migration System
//!
//! Migration types, file parsing and static validation.

pub mod definitions;
pub mod parser;
pub mod validation;

pub use definitions::{
    normalize_version, slugify_name, version_number, CreateMigration, Migration,
    MigrationRecord, MigrationStatus, TargetType,
};
pub use parser::{parser_for, DocumentMigrationParser, MigrationParser, SqlMigrationParser};
pub use validation::{ValidationErrors, ValidationIssue, ValidationReport, ValidationRule};
