//! Migration Orchestrator
//!
//! Resolves migration files by version prefix under
//! `<migrations_dir>/<sql|nosql>/` and routes each operation to the parser,
//! executor and tracker of the file's target type.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::backends::{connector_from_url, DatabaseConnector};
use crate::config::{ConfigError, MigratorConfig};
use crate::document::{store_from_url, DocumentStore};
use crate::error::{MigrationError, MigrationResult};
use crate::executor::{DocumentExecutor, MigrationExecutor, SqlExecutor};
use crate::migrations::{
    normalize_version, parser_for, slugify_name, CreateMigration, Migration, MigrationParser,
    MigrationRecord, MigrationStatus, TargetType, ValidationErrors, ValidationIssue,
    ValidationRule,
};
use crate::tracker::{DocumentVersionTracker, SqlVersionTracker, VersionTracker};

/// Executor and tracker serving one target type
struct Backend {
    executor: Box<dyn MigrationExecutor>,
    tracker: Arc<dyn VersionTracker>,
}

/// Entry point for every migration operation
pub struct Migrator {
    migrations_dir: PathBuf,
    sql_parser: Box<dyn MigrationParser>,
    document_parser: Box<dyn MigrationParser>,
    sql: Option<Backend>,
    document: Option<Backend>,
}

impl Migrator {
    /// Migrator without any data store attached
    pub fn new(migrations_dir: impl Into<PathBuf>) -> MigrationResult<Self> {
        Ok(Self {
            migrations_dir: migrations_dir.into(),
            sql_parser: parser_for(TargetType::Sql)?,
            document_parser: parser_for(TargetType::NoSql)?,
            sql: None,
            document: None,
        })
    }

    /// Build from configuration and initialize the trackers
    ///
    /// The relational target is only attached when a database URL is set.
    /// Tracker initialization failures are logged, not returned.
    pub async fn from_config(config: &MigratorConfig) -> MigrationResult<Self> {
        config.validate()?;

        let mut migrator = Self::new(config.migrations_dir())?;

        if let Some(url) = &config.database_url {
            let connector = connector_from_url(url)?;
            migrator = migrator.with_relational(connector, &config.migrations_table)?;
        }

        let store = store_from_url(&config.document_url)?;
        migrator = migrator.with_document_store(
            store,
            &config.document_database,
            &config.migrations_collection,
        );

        migrator.initialize_trackers().await;
        Ok(migrator)
    }

    /// Attach a relational database
    pub fn with_relational(
        self,
        connector: Arc<dyn DatabaseConnector>,
        table: &str,
    ) -> MigrationResult<Self> {
        let tracker: Arc<dyn VersionTracker> =
            Arc::new(SqlVersionTracker::with_table(connector.clone(), table)?);
        let executor = Box::new(SqlExecutor::new(connector, tracker.clone()));
        Ok(self.with_backend(TargetType::Sql, executor, tracker))
    }

    /// Attach a document store
    pub fn with_document_store(
        self,
        store: Arc<dyn DocumentStore>,
        database: &str,
        collection: &str,
    ) -> Self {
        let tracker: Arc<dyn VersionTracker> = Arc::new(DocumentVersionTracker::with_collection(
            store.clone(),
            database,
            collection,
        ));
        let executor = Box::new(DocumentExecutor::new(store, database, tracker.clone()));
        self.with_backend(TargetType::NoSql, executor, tracker)
    }

    /// Attach a custom executor and tracker for a target type
    pub fn with_backend(
        mut self,
        target_type: TargetType,
        executor: Box<dyn MigrationExecutor>,
        tracker: Arc<dyn VersionTracker>,
    ) -> Self {
        let backend = Some(Backend { executor, tracker });
        match target_type {
            TargetType::Sql => self.sql = backend,
            TargetType::NoSql => self.document = backend,
        }
        self
    }

    /// Initialize every attached tracker, logging failures
    pub async fn initialize_trackers(&self) {
        let backends = [(TargetType::Sql, &self.sql), (TargetType::NoSql, &self.document)];
        for (target_type, backend) in backends {
            let Some(backend) = backend else { continue };
            if let Err(e) = backend.tracker.initialize().await {
                warn!(
                    "Failed to initialize {} migration tracker: {}; retrying on first use",
                    target_type, e
                );
            }
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Directory holding the files of a target type
    pub fn target_dir(&self, target_type: TargetType) -> PathBuf {
        self.migrations_dir.join(target_type.dir_name())
    }

    /// Whether a data store is attached for the target type
    pub fn is_configured(&self, target_type: TargetType) -> bool {
        self.backend(target_type).is_ok()
    }

    fn parser(&self, target_type: TargetType) -> &dyn MigrationParser {
        match target_type {
            TargetType::Sql => self.sql_parser.as_ref(),
            TargetType::NoSql => self.document_parser.as_ref(),
        }
    }

    fn backend(&self, target_type: TargetType) -> MigrationResult<&Backend> {
        let backend = match target_type {
            TargetType::Sql => self.sql.as_ref(),
            TargetType::NoSql => self.document.as_ref(),
        };
        backend.ok_or_else(|| {
            let hint = match target_type {
                TargetType::Sql => "set DATABASE_URL to run relational migrations",
                TargetType::NoSql => "set DOCUMENT_STORE_URL to run document migrations",
            };
            ConfigError::missing_required(format!("{} data store", target_type), hint).into()
        })
    }

    /// Path of the migration file for a version, if one exists
    async fn find_file(
        &self,
        version: &str,
        target_type: TargetType,
    ) -> MigrationResult<Option<PathBuf>> {
        let prefix = format!("{}__", version);
        let files = self.migration_files(target_type).await?;
        Ok(files.into_iter().find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix))
        }))
    }

    /// Files with the target's extension, sorted by name
    async fn migration_files(&self, target_type: TargetType) -> MigrationResult<Vec<PathBuf>> {
        let dir = self.target_dir(target_type);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches_extension = path
                .extension()
                .is_some_and(|ext| ext == target_type.extension());
            if matches_extension && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Filename and content of the migration file for a version
    async fn locate(
        &self,
        version: &str,
        target_type: TargetType,
    ) -> MigrationResult<(String, String)> {
        let path = self
            .find_file(version, target_type)
            .await?
            .ok_or_else(|| MigrationError::NotFound {
                version: version.to_string(),
                target_type,
            })?;

        let filename = file_name(&path);
        let content = tokio::fs::read_to_string(&path).await?;
        Ok((filename, content))
    }

    /// Write a new migration file and return it parsed
    pub async fn create_migration(&self, request: CreateMigration) -> MigrationResult<Migration> {
        let target_type = request.target_type;
        let version = normalize_version(&request.version)?;
        let name = slugify_name(&request.name);

        if name.is_empty() {
            return Err(MigrationError::ParseValidationFailed {
                version,
                errors: ValidationErrors(vec![ValidationIssue::new(
                    ValidationRule::EmptyName,
                    "migration name is empty",
                )]),
            });
        }

        if let Some(existing) = self.find_file(&version, target_type).await? {
            return Err(MigrationError::AlreadyExists {
                version,
                target_type,
                path: existing.display().to_string(),
            });
        }

        let dir = self.target_dir(target_type);
        tokio::fs::create_dir_all(&dir).await?;

        let filename = format!("{}__{}.{}", version, name, target_type.extension());
        let path = dir.join(&filename);

        let mut content = request.content;
        if !content.ends_with('\n') {
            content.push('\n');
        }

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(MigrationError::AlreadyExists {
                    version,
                    target_type,
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        info!("Created {} migration {}", target_type, path.display());
        self.parser(target_type).parse(&filename, &content)
    }

    /// Parse, validate and execute a migration
    pub async fn execute_migration(
        &self,
        version: &str,
        target_type: TargetType,
    ) -> MigrationResult<Migration> {
        let version = normalize_version(version)?;
        let backend = self.backend(target_type)?;
        let (filename, content) = self.locate(&version, target_type).await?;

        let mut migration = self
            .parser(target_type)
            .parse_and_validate(&filename, &content)?;

        backend.executor.validate(&migration).await?;
        backend.executor.execute(&mut migration).await?;
        Ok(migration)
    }

    /// Run the rollback section of a migration
    pub async fn rollback_migration(
        &self,
        version: &str,
        target_type: TargetType,
    ) -> MigrationResult<Migration> {
        let version = normalize_version(version)?;
        let backend = self.backend(target_type)?;
        let (filename, content) = self.locate(&version, target_type).await?;

        let mut migration = self.parser(target_type).parse(&filename, &content)?;
        backend.executor.rollback(&mut migration).await?;
        Ok(migration)
    }

    /// Tracker records, most recent first
    pub async fn history(&self, target_type: TargetType) -> MigrationResult<Vec<MigrationRecord>> {
        self.backend(target_type)?
            .tracker
            .history(target_type)
            .await
    }

    /// Latest completed version
    pub async fn current_version(
        &self,
        target_type: TargetType,
    ) -> MigrationResult<Option<String>> {
        self.backend(target_type)?
            .tracker
            .current_version(target_type)
            .await
    }

    /// Delete a migration file that has never been recorded
    pub async fn delete_migration(
        &self,
        version: &str,
        target_type: TargetType,
    ) -> MigrationResult<()> {
        let version = normalize_version(version)?;
        let backend = self.backend(target_type)?;

        if backend.tracker.has_version(&version, target_type).await? {
            return Err(MigrationError::CannotDelete {
                version,
                target_type,
            });
        }

        let path = self
            .find_file(&version, target_type)
            .await?
            .ok_or_else(|| MigrationError::NotFound {
                version: version.clone(),
                target_type,
            })?;

        tokio::fs::remove_file(&path).await?;
        info!("Deleted {} migration {}", target_type, path.display());
        Ok(())
    }

    /// Every migration file in version order, with its tracked state
    pub async fn list_migrations(
        &self,
        target_type: TargetType,
    ) -> MigrationResult<Vec<Migration>> {
        let backend = self.backend(target_type)?;
        let parser = self.parser(target_type);

        let records: HashMap<String, MigrationRecord> = backend
            .tracker
            .history(target_type)
            .await?
            .into_iter()
            .map(|record| (record.version.clone(), record))
            .collect();

        let mut migrations = Vec::new();
        for path in self.migration_files(target_type).await? {
            let filename = file_name(&path);
            let content = tokio::fs::read_to_string(&path).await?;

            let mut migration = match parser.parse(&filename, &content) {
                Ok(migration) => migration,
                Err(MigrationError::InvalidFilenameFormat { .. }) => {
                    debug!("Skipping {}: not a migration file", path.display());
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(record) = records.get(&migration.version) {
                migration.apply_record(record);
            }
            migrations.push(migration);
        }

        migrations.sort_by_key(|m| m.version_number().unwrap_or(u64::MAX));
        Ok(migrations)
    }

    /// Execute every untracked migration in version order
    ///
    /// Stops at the first failure; migrations executed before it stay applied.
    pub async fn migrate_pending(
        &self,
        target_type: TargetType,
    ) -> MigrationResult<Vec<Migration>> {
        let pending: Vec<String> = self
            .list_migrations(target_type)
            .await?
            .into_iter()
            .filter(|m| m.status == MigrationStatus::Pending)
            .map(|m| m.version)
            .collect();

        if pending.is_empty() {
            info!("No pending {} migrations", target_type);
            return Ok(Vec::new());
        }

        info!("Running {} pending {} migration(s)", pending.len(), target_type);

        let mut executed = Vec::with_capacity(pending.len());
        for version in pending {
            executed.push(self.execute_migration(&version, target_type).await?);
        }
        Ok(executed)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
