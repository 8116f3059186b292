//! Relational version tracker
//!
//! Records live in a table keyed by `(version, target_type)`; writes are
//! upserts so the table holds the last known state of each version.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{VersionTracker, DEFAULT_TABLE};
use crate::backends::{release, DatabaseConnection, DatabaseConnector, DatabaseRow, DatabaseValue};
use crate::config::{is_identifier, ConfigError};
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::{Migration, MigrationRecord, MigrationStatus, TargetType};

/// Tracks migration records in a relational table
pub struct SqlVersionTracker {
    connector: Arc<dyn DatabaseConnector>,
    table: String,
    initialized: OnceCell<()>,
}

impl SqlVersionTracker {
    /// Tracker using the default `migration_records` table
    pub fn new(connector: Arc<dyn DatabaseConnector>) -> Self {
        Self {
            connector,
            table: DEFAULT_TABLE.to_string(),
            initialized: OnceCell::new(),
        }
    }

    /// Tracker using a custom table name
    pub fn with_table(
        connector: Arc<dyn DatabaseConnector>,
        table: impl Into<String>,
    ) -> MigrationResult<Self> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(
                ConfigError::invalid_value("migrations_table", table, "an SQL identifier").into(),
            );
        }
        Ok(Self {
            connector,
            table,
            initialized: OnceCell::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version VARCHAR(64) NOT NULL,\n    \
                name VARCHAR(255) NOT NULL,\n    \
                target_type VARCHAR(16) NOT NULL,\n    \
                status VARCHAR(16) NOT NULL,\n    \
                executed_at {} NOT NULL,\n    \
                execution_time_ms BIGINT NOT NULL,\n    \
                error TEXT,\n    \
                PRIMARY KEY (version, target_type)\n\
            )",
            self.table,
            self.connector.dialect().timestamp_type()
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, name, target_type, status, executed_at, execution_time_ms, error) \
             VALUES ({}) \
             ON CONFLICT (version, target_type) DO UPDATE SET \
             name = EXCLUDED.name, status = EXCLUDED.status, executed_at = EXCLUDED.executed_at, \
             execution_time_ms = EXCLUDED.execution_time_ms, error = EXCLUDED.error",
            self.table,
            self.connector.dialect().placeholders(7)
        )
    }

    fn select_sql(&self, condition: &str) -> String {
        format!(
            "SELECT version, name, target_type, status, executed_at, execution_time_ms, error \
             FROM {} WHERE {} ORDER BY executed_at DESC",
            self.table, condition
        )
    }

    async fn ensure_initialized(&self) -> MigrationResult<()> {
        self.initialized
            .get_or_try_init(|| async {
                let mut conn = self.connector.connect().await?;
                let result = conn.execute_raw(&self.create_table_sql()).await;
                release(conn, result).await?;
                info!("Migration tracking table '{}' is ready", self.table);
                Ok::<(), MigrationError>(())
            })
            .await
            .map(|_| ())
    }

    async fn fetch_records(
        &self,
        condition: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<MigrationRecord>> {
        self.ensure_initialized().await?;

        let sql = self.select_sql(condition);
        let mut conn = self.connector.connect().await?;
        let result = conn.fetch_all(&sql, params).await;
        let rows = release(conn, result).await?;

        rows.iter().map(row_to_record).collect()
    }

    fn placeholder(&self, index: usize) -> String {
        self.connector.dialect().parameter_placeholder(index)
    }
}

fn row_to_record(row: &DatabaseRow) -> MigrationResult<MigrationRecord> {
    let target_type = row.get_string("target_type")?;
    let status = row.get_string("status")?;

    Ok(MigrationRecord {
        version: row.get_string("version")?,
        name: row.get_string("name")?,
        target_type: TargetType::from_str(&target_type).map_err(MigrationError::Database)?,
        status: MigrationStatus::from_str(&status).map_err(MigrationError::Database)?,
        executed_at: row.get_datetime("executed_at")?,
        execution_time_ms: row.get_i64("execution_time_ms")?,
        error: row.get_optional_string("error")?,
    })
}

async fn upsert(
    conn: &mut dyn DatabaseConnection,
    sql: &str,
    record: &MigrationRecord,
) -> MigrationResult<u64> {
    let params = [
        DatabaseValue::from(record.version.as_str()),
        DatabaseValue::from(record.name.as_str()),
        DatabaseValue::from(record.target_type.as_str()),
        DatabaseValue::from(record.status.as_str()),
        DatabaseValue::from(record.executed_at),
        DatabaseValue::from(record.execution_time_ms),
        DatabaseValue::from(record.error.clone()),
    ];
    conn.execute(sql, &params).await
}

#[async_trait]
impl VersionTracker for SqlVersionTracker {
    async fn initialize(&self) -> MigrationResult<()> {
        self.ensure_initialized().await
    }

    async fn current_version(&self, target_type: TargetType) -> MigrationResult<Option<String>> {
        let condition = format!(
            "target_type = {} AND status = {}",
            self.placeholder(0),
            self.placeholder(1)
        );
        let records = self
            .fetch_records(
                &condition,
                &[
                    target_type.as_str().into(),
                    MigrationStatus::Completed.as_str().into(),
                ],
            )
            .await?;

        Ok(records.into_iter().next().map(|record| record.version))
    }

    async fn record_migration(
        &self,
        migration: &Migration,
        execution_time_ms: i64,
    ) -> MigrationResult<()> {
        self.ensure_initialized().await?;

        let record = MigrationRecord::from_migration(migration, execution_time_ms);
        let sql = self.upsert_sql();

        let mut conn = self.connector.connect().await?;
        let result = upsert(conn.as_mut(), &sql, &record).await;
        release(conn, result).await?;

        debug!(
            "Recorded {} migration {} as {}",
            record.target_type, record.version, record.status
        );
        Ok(())
    }

    async fn history(&self, target_type: TargetType) -> MigrationResult<Vec<MigrationRecord>> {
        let condition = format!("target_type = {}", self.placeholder(0));
        self.fetch_records(&condition, &[target_type.as_str().into()])
            .await
    }

    async fn has_version(&self, version: &str, target_type: TargetType) -> MigrationResult<bool> {
        let condition = format!(
            "version = {} AND target_type = {}",
            self.placeholder(0),
            self.placeholder(1)
        );
        let records = self
            .fetch_records(&condition, &[version.into(), target_type.as_str().into()])
            .await?;
        Ok(!records.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteConnector;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> SqlVersionTracker {
        let connector = SqliteConnector::from_path(dir.path().join("tracker.db"));
        SqlVersionTracker::new(Arc::new(connector))
    }

    fn migration(version: &str, status: MigrationStatus) -> Migration {
        Migration {
            version: version.to_string(),
            name: format!("migration_{}", version),
            target_type: TargetType::Sql,
            body: "CREATE TABLE t (id INT);".to_string(),
            rollback_body: None,
            status,
            executed_at: Some(Utc::now()),
            execution_time_ms: Some(5),
            error: None,
            filename: format!("{}__migration.sql", version),
        }
    }

    #[tokio::test]
    async fn test_record_and_has_version() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        tracker.initialize().await.unwrap();
        // initialization is idempotent
        tracker.initialize().await.unwrap();

        assert!(!tracker.has_version("V1", TargetType::Sql).await.unwrap());

        tracker
            .record_migration(&migration("V1", MigrationStatus::Completed), 12)
            .await
            .unwrap();

        assert!(tracker.has_version("V1", TargetType::Sql).await.unwrap());
        assert!(!tracker.has_version("V1", TargetType::NoSql).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_is_an_upsert() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);

        let mut m = migration("V1", MigrationStatus::Completed);
        tracker.record_migration(&m, 10).await.unwrap();

        m.status = MigrationStatus::Failed;
        m.error = Some("boom".to_string());
        m.executed_at = Some(Utc::now() + Duration::seconds(1));
        tracker.record_migration(&m, 20).await.unwrap();

        let history = tracker.history(TargetType::Sql).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MigrationStatus::Failed);
        assert_eq!(history[0].execution_time_ms, 20);
        assert_eq!(history[0].error.as_deref(), Some("boom"));
        assert!(tracker.has_version("V1", TargetType::Sql).await.unwrap());
    }

    #[tokio::test]
    async fn test_current_version_is_latest_completed() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let now = Utc::now();

        assert_eq!(tracker.current_version(TargetType::Sql).await.unwrap(), None);

        let mut v1 = migration("V1", MigrationStatus::Completed);
        v1.executed_at = Some(now - Duration::seconds(30));
        let mut v2 = migration("V2", MigrationStatus::Completed);
        v2.executed_at = Some(now - Duration::seconds(20));
        let mut v3 = migration("V3", MigrationStatus::Failed);
        v3.executed_at = Some(now - Duration::seconds(10));

        for m in [&v1, &v2, &v3] {
            tracker.record_migration(m, 1).await.unwrap();
        }

        assert_eq!(
            tracker.current_version(TargetType::Sql).await.unwrap(),
            Some("V2".to_string())
        );

        let versions: Vec<String> = tracker
            .history(TargetType::Sql)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec!["V3", "V2", "V1"]);
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let connector = Arc::new(SqliteConnector::from_path("unused.db"));
        assert!(SqlVersionTracker::with_table(connector.clone(), "records; DROP").is_err());
        let tracker = SqlVersionTracker::with_table(connector, "schema_history").unwrap();
        assert_eq!(tracker.table(), "schema_history");
    }
}
