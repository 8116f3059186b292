//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration engine: the
//! transient [`Migration`] parsed from a file, the persisted
//! [`MigrationRecord`], and the enums that classify them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MigrationError, MigrationResult};

/// Which data store a migration applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    /// Relational database (SQL files)
    #[serde(rename = "sql")]
    Sql,
    /// Document store (script files)
    #[serde(rename = "nosql")]
    NoSql,
}

impl TargetType {
    /// Identifier used in records, directories and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Sql => "sql",
            TargetType::NoSql => "nosql",
        }
    }

    /// Subdirectory of the migrations root holding this target's files
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }

    /// File extension of migration files for this target
    pub fn extension(&self) -> &'static str {
        match self {
            TargetType::Sql => "sql",
            TargetType::NoSql => "js",
        }
    }

    /// Sentinel line separating forward and rollback content
    pub fn rollback_sentinel(&self) -> &'static str {
        match self {
            TargetType::Sql => "-- ROLLBACK",
            TargetType::NoSql => "// ROLLBACK",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql" | "relational" | "postgres" | "postgresql" => Ok(TargetType::Sql),
            "nosql" | "document" | "mongo" | "mongodb" => Ok(TargetType::NoSql),
            _ => Err(format!("Unsupported migration target: {}", s)),
        }
    }
}

/// Lifecycle state of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Parsed but never executed
    Pending,
    /// Last execution succeeded
    Completed,
    /// Last execution or rollback failed
    Failed,
    /// Last rollback succeeded
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MigrationStatus::Pending),
            "completed" => Ok(MigrationStatus::Completed),
            "failed" => Ok(MigrationStatus::Failed),
            "rolled_back" => Ok(MigrationStatus::RolledBack),
            _ => Err(format!("Unknown migration status: {}", s)),
        }
    }
}

/// Represents a migration parsed from a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    /// Version identifier (`V<n>`)
    pub version: String,
    /// Human-readable name derived from the filename
    pub name: String,
    /// Data store this migration applies to
    pub target_type: TargetType,
    /// Forward content
    pub body: String,
    /// Content after the rollback sentinel, if any
    pub rollback_body: Option<String>,
    pub status: MigrationStatus,
    /// When the last execute or rollback attempt finished
    pub executed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the last attempt
    pub execution_time_ms: Option<i64>,
    /// Last failure message; only set while `status` is `Failed`
    pub error: Option<String>,
    /// File the migration was parsed from
    pub filename: String,
}

impl Migration {
    /// Numeric part of the version, used for ordering
    pub fn version_number(&self) -> Option<u64> {
        version_number(&self.version)
    }

    /// Whether a rollback section is available
    pub fn has_rollback(&self) -> bool {
        self.rollback_body.is_some()
    }

    pub(crate) fn mark_completed(&mut self, status: MigrationStatus, elapsed_ms: i64) {
        self.status = status;
        self.executed_at = Some(Utc::now());
        self.execution_time_ms = Some(elapsed_ms);
        self.error = None;
    }

    pub(crate) fn mark_failed(&mut self, error: &MigrationError, elapsed_ms: i64) {
        self.status = MigrationStatus::Failed;
        self.executed_at = Some(Utc::now());
        self.execution_time_ms = Some(elapsed_ms);
        self.error = Some(error.to_string());
    }

    /// Overlay the last known state from a tracker record
    pub fn apply_record(&mut self, record: &MigrationRecord) {
        self.status = record.status;
        self.executed_at = Some(record.executed_at);
        self.execution_time_ms = Some(record.execution_time_ms);
        self.error = record.error.clone();
    }
}

/// Durable record of a migration's last known state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub version: String,
    pub name: String,
    pub target_type: TargetType,
    pub status: MigrationStatus,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub error: Option<String>,
}

impl MigrationRecord {
    /// Build the record the tracker persists for a migration attempt
    pub fn from_migration(migration: &Migration, execution_time_ms: i64) -> Self {
        Self {
            version: migration.version.clone(),
            name: migration.name.clone(),
            target_type: migration.target_type,
            status: migration.status,
            executed_at: migration.executed_at.unwrap_or_else(Utc::now),
            execution_time_ms,
            error: migration.error.clone(),
        }
    }
}

/// Request to create a new migration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMigration {
    /// `V<n>` or a bare number
    pub version: String,
    pub name: String,
    pub target_type: TargetType,
    /// Full file content, rollback sentinel included if wanted
    pub content: String,
}

/// Normalize a caller-supplied version (`3`, `v3`, `V03`) to `V3`
pub fn normalize_version(input: &str) -> MigrationResult<String> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix('V')
        .or_else(|| trimmed.strip_prefix('v'))
        .unwrap_or(trimmed);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(MigrationError::InvalidVersion {
            version: input.to_string(),
        });
    }

    let digits = digits.trim_start_matches('0');
    Ok(format!("V{}", if digits.is_empty() { "0" } else { digits }))
}

/// Numeric part of a `V<n>` version
pub fn version_number(version: &str) -> Option<u64> {
    version.strip_prefix('V')?.parse().ok()
}

/// Turn a human name into the slug used in filenames
pub fn slugify_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_type_round_trip() {
        assert_eq!("sql".parse::<TargetType>().unwrap(), TargetType::Sql);
        assert_eq!("NoSQL".parse::<TargetType>().unwrap(), TargetType::NoSql);
        assert_eq!("document".parse::<TargetType>().unwrap(), TargetType::NoSql);
        assert!("graph".parse::<TargetType>().is_err());
        assert_eq!(serde_json::to_string(&TargetType::NoSql).unwrap(), "\"nosql\"");
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(MigrationStatus::RolledBack.as_str(), "rolled_back");
        assert_eq!(
            "rolled_back".parse::<MigrationStatus>().unwrap(),
            MigrationStatus::RolledBack
        );
        assert_eq!(
            serde_json::to_string(&MigrationStatus::RolledBack).unwrap(),
            "\"rolled_back\""
        );
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("3").unwrap(), "V3");
        assert_eq!(normalize_version("v12").unwrap(), "V12");
        assert_eq!(normalize_version(" V7 ").unwrap(), "V7");
        assert!(normalize_version("V").is_err());
        assert!(normalize_version("V1a").is_err());
        assert!(normalize_version("version1").is_err());
    }

    #[test]
    fn test_normalize_version_strips_leading_zeros() {
        assert_eq!(normalize_version("01").unwrap(), "V1");
        assert_eq!(normalize_version("V007").unwrap(), "V7");
        assert_eq!(normalize_version("000").unwrap(), "V0");
        assert_eq!(normalize_version("v10").unwrap(), "V10");
    }

    #[test]
    fn test_slugify_name() {
        assert_eq!(slugify_name("create users table"), "create_users_table");
        assert_eq!(slugify_name("  add-index  "), "add-index");
        assert_eq!(slugify_name("../etc/passwd"), "etcpasswd");
    }

    #[test]
    fn test_version_number() {
        assert_eq!(version_number("V12"), Some(12));
        assert_eq!(version_number("12"), None);
    }
}
