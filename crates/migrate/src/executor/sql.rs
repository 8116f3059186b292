//! Relational executor
//!
//! The statements of a body run in order inside one transaction on a fresh
//! connection. A failing statement rolls back every statement before it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{check_executable, rollback_body, run_recorded, MigrationExecutor};
use crate::backends::{release, DatabaseConnection, DatabaseConnector};
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::{Migration, MigrationStatus, TargetType};
use crate::sql::{split_statements, SqlStatement};
use crate::tracker::VersionTracker;

/// Executes `.sql` migrations
pub struct SqlExecutor {
    connector: Arc<dyn DatabaseConnector>,
    tracker: Arc<dyn VersionTracker>,
}

impl SqlExecutor {
    pub fn new(connector: Arc<dyn DatabaseConnector>, tracker: Arc<dyn VersionTracker>) -> Self {
        Self { connector, tracker }
    }

    async fn apply(&self, version: &str, body: &str) -> MigrationResult<usize> {
        let statements = split_statements(body);
        debug!(
            "Migration {} split into {} statement(s)",
            version,
            statements.len()
        );

        let mut conn = self.connector.connect().await?;
        let result = run_in_transaction(conn.as_mut(), version, &statements).await;
        release(conn, result).await
    }
}

async fn run_in_transaction(
    conn: &mut dyn DatabaseConnection,
    version: &str,
    statements: &[SqlStatement],
) -> MigrationResult<usize> {
    conn.begin().await?;

    for (index, statement) in statements.iter().enumerate() {
        debug!(
            "Migration {} statement {} (line {})",
            version,
            index + 1,
            statement.line
        );

        if let Err(err) = conn.execute_raw(&statement.text).await {
            abort(conn, version).await;
            let message = match err {
                MigrationError::Database(message) => message,
                other => other.to_string(),
            };
            return Err(MigrationError::StatementExecutionFailed {
                version: version.to_string(),
                statement_index: index + 1,
                message,
            });
        }
    }

    if let Err(err) = conn.commit().await {
        abort(conn, version).await;
        return Err(err);
    }

    Ok(statements.len())
}

async fn abort(conn: &mut dyn DatabaseConnection, version: &str) {
    if let Err(err) = conn.rollback().await {
        warn!(
            "Failed to roll back transaction of migration {}: {}",
            version, err
        );
    }
}

#[async_trait]
impl MigrationExecutor for SqlExecutor {
    fn target_type(&self) -> TargetType {
        TargetType::Sql
    }

    async fn validate(&self, migration: &Migration) -> MigrationResult<()> {
        check_executable(self.tracker.as_ref(), migration).await
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
    use crate::backends::{DatabaseRow, DatabaseValue, SqliteConnector};
    use crate::migrations::{MigrationParser, SqlMigrationParser};
    use crate::tracker::SqlVersionTracker;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        connector: Arc<dyn DatabaseConnector>,
        tracker: Arc<dyn VersionTracker>,
        executor: SqlExecutor,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let connector: Arc<dyn DatabaseConnector> =
            Arc::new(SqliteConnector::from_path(dir.path().join("app.db")));
        let tracker: Arc<dyn VersionTracker> = Arc::new(SqlVersionTracker::new(connector.clone()));
        let executor = SqlExecutor::new(connector.clone(), tracker.clone());
        Fixture {
            _dir: dir,
            connector,
            tracker,
            executor,
        }
    }

    fn parse(filename: &str, content: &str) -> Migration {
        SqlMigrationParser::new()
            .unwrap()
            .parse(filename, content)
            .unwrap()
    }

    async fn table_exists(connector: &Arc<dyn DatabaseConnector>, table: &str) -> bool {
        let mut conn = connector.connect().await.unwrap();
        let rows = conn
            .fetch_all(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[DatabaseValue::from(table)],
            )
            .await
            .unwrap();
        conn.close().await.unwrap();
        !rows.is_empty()
    }

    async fn dump(connector: &Arc<dyn DatabaseConnector>) -> Vec<Vec<DatabaseRow>> {
        let mut conn = connector.connect().await.unwrap();
        let mut tables = Vec::new();
        for query in [
            "SELECT type, name, tbl_name FROM sqlite_master ORDER BY name",
            "SELECT id, name, note FROM accounts ORDER BY id",
            "SELECT account_id, message FROM audit ORDER BY rowid",
        ] {
            tables.push(conn.fetch_all(query, &[]).await.unwrap());
        }
        conn.close().await.unwrap();
        tables
    }

    #[tokio::test]
    async fn test_split_execution_matches_whole_body() {
        let body = "-- accounts; audit trail\n\
            CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT NOT NULL, note TEXT);\n\
            CREATE TABLE audit (account_id INTEGER, message TEXT);\n\
            /* fires per insert; keeps a copy */\n\
            CREATE TRIGGER accounts_audit AFTER INSERT ON accounts\n\
            BEGIN\n\
              INSERT INTO audit VALUES (NEW.id, 'created; ' || NEW.name);\n\
            END;\n\
            INSERT INTO accounts (name, note) VALUES ('O''Brien; Ltd', 'semi;colon -- not a comment');\n\
            INSERT INTO accounts (name, note) VALUES ('plain', '/* not; a comment */');\n\
            UPDATE accounts SET note = note || ';' WHERE name = 'plain'; -- trailing; comment\n";

        let statements = split_statements(body);
        assert_eq!(statements.len(), 6);

        let split_dir = TempDir::new().unwrap();
        let split: Arc<dyn DatabaseConnector> =
            Arc::new(SqliteConnector::from_path(split_dir.path().join("split.db")));
        let mut conn = split.connect().await.unwrap();
        for statement in &statements {
            conn.execute_raw(&statement.text).await.unwrap();
        }
        conn.close().await.unwrap();

        let whole_dir = TempDir::new().unwrap();
        let whole: Arc<dyn DatabaseConnector> =
            Arc::new(SqliteConnector::from_path(whole_dir.path().join("whole.db")));
        let mut conn = whole.connect().await.unwrap();
        conn.execute_raw(body).await.unwrap();
        conn.close().await.unwrap();

        let split_tables = dump(&split).await;
        assert_eq!(split_tables[0].len(), 3);
        assert_eq!(split_tables[1].len(), 2);
        assert_eq!(split_tables[2].len(), 2);
        assert_eq!(
            split_tables[1][0].get_string("name").unwrap(),
            "O'Brien; Ltd"
        );
        assert_eq!(split_tables, dump(&whole).await);
    }

    #[tokio::test]
    async fn test_execute_and_rollback() {
        let f = fixture();
        let mut migration = parse(
            "V1__init.sql",
            "CREATE TABLE foo (id INT);\nINSERT INTO foo VALUES (1);\n-- ROLLBACK\nDROP TABLE IF EXISTS foo;",
        );

        f.executor.validate(&migration).await.unwrap();
        f.executor.execute(&mut migration).await.unwrap();

        assert_eq!(migration.status, MigrationStatus::Completed);
        assert!(migration.executed_at.is_some());
        assert!(migration.execution_time_ms.is_some());
        assert!(table_exists(&f.connector, "foo").await);
        assert_eq!(
            f.tracker.current_version(TargetType::Sql).await.unwrap(),
            Some("V1".to_string())
        );

        f.executor.rollback(&mut migration).await.unwrap();
        assert_eq!(migration.status, MigrationStatus::RolledBack);
        assert!(!table_exists(&f.connector, "foo").await);
        assert_eq!(f.tracker.current_version(TargetType::Sql).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_validate_rejects_recorded_version_and_blank_body() {
        let f = fixture();
        let mut migration = parse("V1__init.sql", "CREATE TABLE foo (id INT);");
        f.executor.execute(&mut migration).await.unwrap();

        let err = f.executor.validate(&migration).await.unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion { .. }));

        let blank = parse("V2__blank.sql", "   \n");
        let err = f.executor.validate(&blank).await.unwrap_err();
        assert!(matches!(err, MigrationError::EmptyContent { .. }));
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_everything() {
        let f = fixture();
        let mut migration = parse(
            "V1__broken.sql",
            "CREATE TABLE foo (id INT);\nINSERT INTO foo VALUES (1);\nINSERT INTO missing_table VALUES (2);",
        );

        let err = f.executor.execute(&mut migration).await.unwrap_err();
        match &err {
            MigrationError::StatementExecutionFailed {
                version,
                statement_index,
                message,
            } => {
                assert_eq!(version, "V1");
                assert_eq!(*statement_index, 3);
                assert!(message.contains("missing_table"));
            }
            other => panic!("unexpected error {:?}", other),
        }

        assert_eq!(migration.status, MigrationStatus::Failed);
        assert!(migration.error.is_some());
        assert!(!table_exists(&f.connector, "foo").await);

        // the failure is recorded and blocks re-execution
        assert!(f.tracker.has_version("V1", TargetType::Sql).await.unwrap());
        let history = f.tracker.history(TargetType::Sql).await.unwrap();
        assert_eq!(history[0].status, MigrationStatus::Failed);
    }

    #[tokio::test]
    async fn test_rollback_requires_rollback_body() {
        let f = fixture();
        let mut migration = parse("V1__init.sql", "CREATE TABLE foo (id INT);");
        let err = f.executor.rollback(&mut migration).await.unwrap_err();
        assert!(matches!(err, MigrationError::NoRollbackContent { .. }));
        assert_eq!(migration.status, MigrationStatus::Pending);
    }
}
