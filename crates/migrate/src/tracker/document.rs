//! Document-store version tracker
//!
//! Records are documents with camelCase fields in a collection guarded by a
//! compound unique index on `(version, targetType)`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{VersionTracker, DEFAULT_COLLECTION};
use crate::document::{Document, DocumentDatabase, DocumentStore, IndexOptions, Scope};
use crate::error::{MigrationError, MigrationResult};
use crate::migrations::{Migration, MigrationRecord, MigrationStatus, TargetType};

/// Name of the unique index created on the tracking collection
pub const UNIQUE_INDEX: &str = "version_targetType_unique";

/// Tracks migration records in a document collection
pub struct DocumentVersionTracker {
    store: Arc<dyn DocumentStore>,
    database: String,
    collection: String,
    handle: OnceCell<Arc<dyn DocumentDatabase>>,
}

impl DocumentVersionTracker {
    pub fn new(store: Arc<dyn DocumentStore>, database: impl Into<String>) -> Self {
        Self::with_collection(store, database, DEFAULT_COLLECTION)
    }

    pub fn with_collection(
        store: Arc<dyn DocumentStore>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            database: database.into(),
            collection: collection.into(),
            handle: OnceCell::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Database handle, creating the collection and index on first use
    async fn db(&self) -> MigrationResult<&Arc<dyn DocumentDatabase>> {
        self.handle
            .get_or_try_init(|| async {
                let db = self.store.database(&self.database).await?;

                let collections = db.list_collections().await?;
                if !collections.iter().any(|c| c == &self.collection) {
                    db.create_collection(&self.collection).await?;
                }

                let keys = as_document(json!({"version": 1, "targetType": 1}));
                let options = IndexOptions {
                    name: Some(UNIQUE_INDEX.to_string()),
                    unique: true,
                };
                db.create_index(&self.collection, &keys, &options).await?;

                info!(
                    "Migration tracking collection '{}.{}' is ready",
                    self.database, self.collection
                );
                Ok::<_, MigrationError>(db)
            })
            .await
    }

    async fn find_records(&self, filter: Value) -> MigrationResult<Vec<MigrationRecord>> {
        let db = self.db().await?;
        let documents = db.find(&self.collection, &as_document(filter)).await?;

        let mut records = documents
            .into_iter()
            .map(|doc| serde_json::from_value::<MigrationRecord>(Value::Object(doc)))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        Ok(records)
    }
}

fn as_document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[async_trait]
impl VersionTracker for DocumentVersionTracker {
    async fn initialize(&self) -> MigrationResult<()> {
        self.db().await.map(|_| ())
    }

    async fn current_version(&self, target_type: TargetType) -> MigrationResult<Option<String>> {
        let records = self
            .find_records(json!({
                "targetType": target_type.as_str(),
                "status": MigrationStatus::Completed.as_str(),
            }))
            .await?;
        Ok(records.into_iter().next().map(|record| record.version))
    }

    async fn record_migration(
        &self,
        migration: &Migration,
        execution_time_ms: i64,
    ) -> MigrationResult<()> {
        let db = self.db().await?;
        let record = MigrationRecord::from_migration(migration, execution_time_ms);

        let filter = as_document(json!({
            "version": record.version,
            "targetType": record.target_type.as_str(),
        }));
        let update = as_document(json!({ "$set": serde_json::to_value(&record)? }));

        db.update(&self.collection, &filter, &update, Scope::One, true)
            .await?;

        debug!(
            "Recorded {} migration {} as {}",
            record.target_type, record.version, record.status
        );
        Ok(())
    }

    async fn history(&self, target_type: TargetType) -> MigrationResult<Vec<MigrationRecord>> {
        self.find_records(json!({ "targetType": target_type.as_str() }))
            .await
    }

    async fn has_version(&self, version: &str, target_type: TargetType) -> MigrationResult<bool> {
        let records = self
            .find_records(json!({
                "version": version,
                "targetType": target_type.as_str(),
            }))
            .await?;
        Ok(!records.is_empty())
    }
}
