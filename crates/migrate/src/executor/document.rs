//! Document-store executor
//!
//! Bodies are parsed into a [`DocumentScript`] and applied operation by
//! operation. There is no transaction: when an operation fails, the ones
//! before it stay applied. The error and the log both say how many.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{check_executable, rollback_body, run_recorded, MigrationExecutor};
use crate::document::{DocumentScript, DocumentStore};
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::{
    Migration, MigrationStatus, TargetType, ValidationErrors, ValidationIssue, ValidationRule,
};
use crate::tracker::VersionTracker;

/// Executes `.js` document migrations
pub struct DocumentExecutor {
    store: Arc<dyn DocumentStore>,
    database: String,
    tracker: Arc<dyn VersionTracker>,
}

impl DocumentExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        database: impl Into<String>,
        tracker: Arc<dyn VersionTracker>,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            tracker,
        }
    }

    async fn apply(&self, version: &str, body: &str) -> MigrationResult<usize> {
        let script = parse_script(version, body)?;
        let db = self.store.database(&self.database).await?;

        match script.apply(db.as_ref()).await {
            Ok(report) => Ok(report.applied),
            Err(failure) => {
                if failure.applied > 0 {
                    warn!(
                        "Migration {} stopped at operation {} of {}; {} earlier operation(s) \
                         remain applied in database '{}' and must be reverted manually",
                        version, failure.failed_at, failure.total, failure.applied, self.database
                    );
                }
                Err(MigrationError::ScriptExecutionFailed {
                    version: version.to_string(),
                    applied: failure.applied,
                    failed_at: failure.failed_at,
                    total: failure.total,
                    message: format!("line {}: {}", failure.line, failure.error),
                })
            }
        }
    }
}

fn parse_script(version: &str, body: &str) -> MigrationResult<DocumentScript> {
    DocumentScript::parse(body).map_err(|errors| MigrationError::ParseValidationFailed {
        version: version.to_string(),
        errors: ValidationErrors(
            errors
                .iter()
                .map(|e| ValidationIssue::new(ValidationRule::SyntaxError, e.to_string()))
                .collect(),
        ),
    })
}

#[async_trait]
impl MigrationExecutor for DocumentExecutor {
    fn target_type(&self) -> TargetType {
        TargetType::NoSql
    }

    async fn validate(&self, migration: &Migration) -> MigrationResult<()> {
        check_executable(self.tracker.as_ref(), migration).await?;
        parse_script(&migration.version, &migration.body).map(|_| ())
    }

    async fn execute(&self, migration: &mut Migration) -> MigrationResult<()> {
        let version = migration.version.clone();
        let body = migration.body.clone();
        run_recorded(
            self.tracker.as_ref(),
            migration,
            MigrationStatus::Completed,
            self.apply(&version, &body),
        )
        .await
    }

    async fn rollback(&self, migration: &mut Migration) -> MigrationResult<()> {
        let body = rollback_body(migration)?;
        let version = migration.version.clone();
        run_recorded(
            self.tracker.as_ref(),
            migration,
            MigrationStatus::RolledBack,
            self.apply(&version, &body),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, MemoryDocumentStore};
    use crate::migrations::{DocumentMigrationParser, MigrationParser};
    use crate::tracker::DocumentVersionTracker;

    struct Fixture {
        store: Arc<dyn DocumentStore>,
        tracker: Arc<dyn VersionTracker>,
        executor: DocumentExecutor,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let tracker: Arc<dyn VersionTracker> =
            Arc::new(DocumentVersionTracker::new(store.clone(), "app"));
        let executor = DocumentExecutor::new(store.clone(), "app", tracker.clone());
        Fixture {
            store,
            tracker,
            executor,
        }
    }

    fn parse(filename: &str, content: &str) -> Migration {
        DocumentMigrationParser::new()
            .unwrap()
            .parse(filename, content)
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_rollback() {
        let f = fixture();
        let mut migration = parse(
            "V1__users.js",
            "db.createCollection(\"users\")\ndb.users.insertOne({\"name\": \"ada\"})\n// ROLLBACK\ndb.users.drop()",
        );

        f.executor.validate(&migration).await.unwrap();
        f.executor.execute(&mut migration).await.unwrap();
        assert_eq!(migration.status, MigrationStatus::Completed);

        let db = f.store.database("app").await.unwrap();
        assert_eq!(db.find("users", &Document::new()).await.unwrap().len(), 1);
        assert!(f.tracker.has_version("V1", TargetType::NoSql).await.unwrap());

        f.executor.rollback(&mut migration).await.unwrap();
        assert_eq!(migration.status, MigrationStatus::RolledBack);
        assert!(!db
            .list_collections()
            .await
            .unwrap()
            .contains(&"users".to_string()));
    }

    #[tokio::test]
    async fn test_validate_rejects_unparseable_body() {
        let f = fixture();
        let migration = parse("V1__bad.js", "db.users.find({}).forEach(printjson)");
        let err = f.executor.validate(&migration).await.unwrap_err();
        assert!(matches!(err, MigrationError::ParseValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_and_recorded() {
        let f = fixture();
        let mut migration = parse(
            "V2__seed.js",
            r#"db.users.createIndex({"email": 1}, {"unique": true})
db.users.insertOne({"email": "a@example.com"})
db.users.insertOne({"email": "a@example.com"})
db.users.insertOne({"email": "b@example.com"})"#,
        );

        let err = f.executor.execute(&mut migration).await.unwrap_err();
        match &err {
            MigrationError::ScriptExecutionFailed {
                applied,
                failed_at,
                total,
                message,
                ..
            } => {
                assert_eq!(*applied, 2);
                assert_eq!(*failed_at, 3);
                assert_eq!(*total, 4);
                assert!(message.starts_with("line 3:"));
            }
            other => panic!("unexpected error {:?}", other),
        }

        // earlier operations are not reverted
        let db = f.store.database("app").await.unwrap();
        assert_eq!(db.find("users", &Document::new()).await.unwrap().len(), 1);

        let history = f.tracker.history(TargetType::NoSql).await.unwrap();
        assert_eq!(history[0].status, MigrationStatus::Failed);
        assert!(history[0]
            .error
            .as_deref()
            .unwrap()
            .contains("NOT been reverted"));
    }
}
