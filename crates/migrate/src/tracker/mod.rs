//! Version tracking
//!
//! Trackers persist the last known state of every migration version, one
//! record per `(version, target_type)`. They answer which versions have been
//! recorded and which completed version is the current one.

pub mod document;
pub mod sql;

use async_trait::async_trait;

use crate::error::MigrationResult;
use crate::migrations::{Migration, MigrationRecord, TargetType};

pub use document::DocumentVersionTracker;
pub use sql::SqlVersionTracker;

/// Default relational tracking table
pub const DEFAULT_TABLE: &str = "migration_records";

/// Default document tracking collection
pub const DEFAULT_COLLECTION: &str = "migration_records";

/// Durable store of migration records
#[async_trait]
pub trait VersionTracker: Send + Sync {
    /// Create the backing table or collection and its unique constraint
    ///
    /// Every other operation initializes on first use, so calling this is
    /// only needed to surface connectivity problems early.
    async fn initialize(&self) -> MigrationResult<()>;

    /// Version of the most recently executed completed migration
    async fn current_version(&self, target_type: TargetType) -> MigrationResult<Option<String>>;

    /// Insert or update the record for the migration's version
    async fn record_migration(
        &self,
        migration: &Migration,
        execution_time_ms: i64,
    ) -> MigrationResult<()>;

    /// All records of a target type, most recent first
    async fn history(&self, target_type: TargetType) -> MigrationResult<Vec<MigrationRecord>>;

    /// Whether any record exists for the version, whatever its status
    async fn has_version(&self, version: &str, target_type: TargetType) -> MigrationResult<bool>;
}
