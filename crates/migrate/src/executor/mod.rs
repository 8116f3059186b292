//! Migration execution
//!
//! Executors run a parsed migration against its data store and record every
//! attempt, successful or not, through the version tracker. Failures are
//! recorded first and then returned to the caller.

pub mod document;
pub mod sql;

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{MigrationError, MigrationResult};
use crate::migrations::{Migration, MigrationStatus, TargetType};
use crate::tracker::VersionTracker;

pub use document::DocumentExecutor;
pub use sql::SqlExecutor;

/// Runs migrations of one target type
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    fn target_type(&self) -> TargetType;

    /// Pre-execution gate: the version must be unrecorded and the body non-blank
    async fn validate(&self, migration: &Migration) -> MigrationResult<()>;

    /// Run the forward body; on success the status becomes `completed`
    async fn execute(&self, migration: &mut Migration) -> MigrationResult<()>;

    /// Run the rollback body; on success the status becomes `rolled_back`
    async fn rollback(&self, migration: &mut Migration) -> MigrationResult<()>;
}

/// Checks shared by every executor's pre-execution gate
pub(crate) async fn check_executable(
    tracker: &dyn VersionTracker,
    migration: &Migration,
) -> MigrationResult<()> {
    if tracker
        .has_version(&migration.version, migration.target_type)
        .await?
    {
        return Err(MigrationError::DuplicateVersion {
            version: migration.version.clone(),
            target_type: migration.target_type,
        });
    }

    if migration.body.trim().is_empty() {
        return Err(MigrationError::EmptyContent {
            version: migration.version.clone(),
        });
    }

    Ok(())
}

/// Rollback body of a migration, if it has a non-blank one
pub(crate) fn rollback_body(migration: &Migration) -> MigrationResult<String> {
    migration
        .rollback_body
        .as_ref()
        .filter(|body| !body.trim().is_empty())
        .cloned()
        .ok_or_else(|| MigrationError::NoRollbackContent {
            version: migration.version.clone(),
        })
}

/// Time `work`, update the migration and record the outcome
///
/// `work` resolves to the number of statements or operations applied. A
/// tracker failure after a failed run is logged and the run's error returned.
pub(crate) async fn run_recorded<F>(
    tracker: &dyn VersionTracker,
    migration: &mut Migration,
    success: MigrationStatus,
    work: F,
) -> MigrationResult<()>
where
    F: Future<Output = MigrationResult<usize>> + Send,
{
    let action = if success == MigrationStatus::RolledBack {
        "rollback"
    } else {
        "migration"
    };
    info!(
        "Running {} {} {} ({})",
        migration.target_type, action, migration.version, migration.name
    );

    let started = Instant::now();
    let outcome = work.await;
    let elapsed_ms = started.elapsed().as_millis() as i64;

    match outcome {
        Ok(applied) => {
            migration.mark_completed(success, elapsed_ms);
            tracker.record_migration(migration, elapsed_ms).await?;
            info!(
                "Finished {} {} {}: {} step(s) in {}ms",
                migration.target_type, action, migration.version, applied, elapsed_ms
            );
            Ok(())
        }
        Err(err) => {
            migration.mark_failed(&err, elapsed_ms);
            if let Err(record_err) = tracker.record_migration(migration, elapsed_ms).await {
                error!(
                    "Failed to record failure of {} {}: {}",
                    action, migration.version, record_err
                );
            }
            error!(
                "{} {} {} failed after {}ms: {}",
                migration.target_type, action, migration.version, elapsed_ms, err
            );
            Err(err)
        }
    }
}
