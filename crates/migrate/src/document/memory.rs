//! Built-in document engine
//!
//! Databases live in process memory. When created with
//! [`MemoryDocumentStore::persistent`] each database is also written to
//! `<dir>/<database>.json` after every mutation and reloaded on first use.
//! Every operation is applied to a working copy and only committed when it
//! succeeds, so a failing operation leaves the database untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::query::{apply_update, matches, upsert_seed, validate_update};
use super::{
    Document, DocumentDatabase, DocumentResult, DocumentStore, DocumentStoreError, IndexOptions,
    Scope, UpdateOutcome,
};

const ID_FIELD: &str = "_id";
const ID_INDEX: &str = "_id_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexSpec {
    name: String,
    keys: Vec<(String, i64)>,
    unique: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    fn check_unique(&self, collection: &str) -> DocumentResult<()> {
        let mut seen_ids = HashSet::new();
        for doc in &self.documents {
            let id = doc.get(ID_FIELD).cloned().unwrap_or(Value::Null).to_string();
            if !seen_ids.insert(id.clone()) {
                return Err(DocumentStoreError::DuplicateKey {
                    collection: collection.to_string(),
                    index: ID_INDEX.to_string(),
                    key: id,
                });
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let mut seen = HashSet::new();
            for doc in &self.documents {
                let key: Vec<Value> = index
                    .keys
                    .iter()
                    .map(|(path, _)| super::query::lookup(doc, path).cloned().unwrap_or(Value::Null))
                    .collect();
                let key = Value::Array(key).to_string();
                if !seen.insert(key.clone()) {
                    return Err(DocumentStoreError::DuplicateKey {
                        collection: collection.to_string(),
                        index: index.name.clone(),
                        key,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DatabaseState {
    collections: BTreeMap<String, CollectionState>,
}

impl DatabaseState {
    fn collection_mut(&mut self, name: &str) -> DocumentResult<&mut CollectionState> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(name.to_string()))
    }
}

/// Document store keeping its databases in memory
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    snapshot_dir: Option<PathBuf>,
}

impl MemoryDocumentStore {
    /// Process-local store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store persisting each database as a JSON snapshot under `dir`
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            databases: Mutex::new(HashMap::new()),
            snapshot_dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn database(&self, name: &str) -> DocumentResult<Arc<dyn DocumentDatabase>> {
        if name.is_empty() || name.contains(['/', '\\', '.', ' ']) {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "invalid database name '{}'",
                name
            )));
        }

        let mut databases = self.databases.lock().await;
        if let Some(db) = databases.get(name) {
            return Ok(db.clone());
        }

        let snapshot_path = self
            .snapshot_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", name)));
        let state = match &snapshot_path {
            Some(path) => load_snapshot(path).await?,
            None => DatabaseState::default(),
        };

        let db = Arc::new(MemoryDatabase {
            name: name.to_string(),
            state: Mutex::new(state),
            snapshot_path,
        });
        databases.insert(name.to_string(), db.clone());
        Ok(db)
    }
}

async fn load_snapshot(path: &Path) -> DocumentResult<DatabaseState> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            DocumentStoreError::Persistence(format!("corrupt snapshot {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DatabaseState::default()),
        Err(e) => Err(DocumentStoreError::Persistence(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// One database of a [`MemoryDocumentStore`]
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    state: Mutex<DatabaseState>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryDatabase {
    /// Apply `change` to a copy of the state and commit it on success
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut DatabaseState) -> DocumentResult<T> + Send,
    ) -> DocumentResult<T> {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let output = change(&mut draft)?;

        if let Some(path) = &self.snapshot_path {
            persist(path, &draft).await?;
        }
        *state = draft;
        Ok(output)
    }
}

async fn persist(path: &Path, state: &DatabaseState) -> DocumentResult<()> {
    let persistence = |e: std::io::Error| {
        DocumentStoreError::Persistence(format!("failed to write {}: {}", path.display(), e))
    };

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(persistence)?;
    }
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| DocumentStoreError::Persistence(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await.map_err(persistence)?;
    tokio::fs::rename(&tmp, path).await.map_err(persistence)?;
    Ok(())
}

fn index_name(keys: &[(String, i64)]) -> String {
    keys.iter()
        .map(|(path, direction)| format!("{}_{}", path, direction))
        .collect::<Vec<_>>()
        .join("_")
}

fn index_keys(keys: &Document) -> DocumentResult<Vec<(String, i64)>> {
    if keys.is_empty() {
        return Err(DocumentStoreError::InvalidDocument(
            "index keys must not be empty".to_string(),
        ));
    }
    keys.iter()
        .map(|(path, direction)| match direction.as_i64() {
            Some(d @ (1 | -1)) => Ok((path.clone(), d)),
            _ => Err(DocumentStoreError::InvalidDocument(format!(
                "index direction for '{}' must be 1 or -1",
                path
            ))),
        })
        .collect()
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_collections(&self) -> DocumentResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.collections.keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str) -> DocumentResult<()> {
        if name.is_empty() || name.starts_with('$') {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "invalid collection name '{}'",
                name
            )));
        }
        self.mutate(|state| {
            if state.collections.contains_key(name) {
                return Err(DocumentStoreError::CollectionExists(name.to_string()));
            }
            state
                .collections
                .insert(name.to_string(), CollectionState::default());
            Ok(())
        })
        .await?;
        debug!("Created collection {}.{}", self.name, name);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentResult<bool> {
        self.mutate(|state| Ok(state.collections.remove(name).is_some()))
            .await
    }

    async fn rename_collection(&self, from: &str, to: &str) -> DocumentResult<()> {
        self.mutate(|state| {
            if state.collections.contains_key(to) {
                return Err(DocumentStoreError::CollectionExists(to.to_string()));
            }
            let collection = state
                .collections
                .remove(from)
                .ok_or_else(|| DocumentStoreError::CollectionNotFound(from.to_string()))?;
            state.collections.insert(to.to_string(), collection);
            Ok(())
        })
        .await
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: &Document,
        options: &IndexOptions,
    ) -> DocumentResult<String> {
        let keys = index_keys(keys)?;
        let spec = IndexSpec {
            name: options.name.clone().unwrap_or_else(|| index_name(&keys)),
            keys,
            unique: options.unique,
        };

        self.mutate(|state| {
            let target = state.collections.entry(collection.to_string()).or_default();
            if let Some(existing) = target.indexes.iter().find(|i| i.name == spec.name) {
                if *existing == spec {
                    return Ok(spec.name.clone());
                }
                return Err(DocumentStoreError::IndexConflict {
                    collection: collection.to_string(),
                    name: spec.name.clone(),
                });
            }
            target.indexes.push(spec.clone());
            target.check_unique(collection)?;
            Ok(spec.name.clone())
        })
        .await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentResult<()> {
        self.mutate(|state| {
            let target = state.collection_mut(collection)?;
            let before = target.indexes.len();
            target.indexes.retain(|index| index.name != name);
            if target.indexes.len() == before {
                return Err(DocumentStoreError::IndexNotFound {
                    collection: collection.to_string(),
                    name: name.to_string(),
                });
            }
            Ok(())
        })
        .await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentResult<u64> {
        let count = documents.len() as u64;
        self.mutate(move |state| {
            let target = state.collections.entry(collection.to_string()).or_default();
            for mut doc in documents {
                if !doc.contains_key(ID_FIELD) {
                    doc.insert(
                        ID_FIELD.to_string(),
                        Value::String(uuid::Uuid::new_v4().to_string()),
                    );
                }
                target.documents.push(doc);
            }
            target.check_unique(collection)?;
            Ok(count)
        })
        .await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        scope: Scope,
        upsert: bool,
    ) -> DocumentResult<UpdateOutcome> {
        validate_update(update)?;

        self.mutate(|state| {
            let mut outcome = UpdateOutcome::default();

            if let Some(target) = state.collections.get_mut(collection) {
                for doc in target.documents.iter_mut() {
                    if !matches(doc, filter)? {
                        continue;
                    }
                    outcome.matched += 1;
                    if apply_update(doc, update)? {
                        outcome.modified += 1;
                    }
                    if scope == Scope::One {
                        break;
                    }
                }
                target.check_unique(collection)?;
            }

            if outcome.matched == 0 && upsert {
                let mut doc = upsert_seed(filter)?;
                apply_update(&mut doc, update)?;
                if !doc.contains_key(ID_FIELD) {
                    doc.insert(
                        ID_FIELD.to_string(),
                        Value::String(uuid::Uuid::new_v4().to_string()),
                    );
                }
                let target = state.collections.entry(collection.to_string()).or_default();
                target.documents.push(doc);
                target.check_unique(collection)?;
                outcome.upserted = true;
            }

            Ok(outcome)
        })
        .await
    }

    async fn delete(
        &self,
        collection: &str,
        filter: &Document,
        scope: Scope,
    ) -> DocumentResult<u64> {
        self.mutate(|state| {
            let Some(target) = state.collections.get_mut(collection) else {
                return Ok(0);
            };

            let mut kept = Vec::with_capacity(target.documents.len());
            let mut deleted = 0u64;
            for doc in target.documents.drain(..) {
                let limit_reached = scope == Scope::One && deleted == 1;
                if !limit_reached && matches(&doc, filter)? {
                    deleted += 1;
                } else {
                    kept.push(doc);
                }
            }
            target.documents = kept;
            Ok(deleted)
        })
        .await
    }

    async fn find(&self, collection: &str, filter: &Document) -> DocumentResult<Vec<Document>> {
        let state = self.state.lock().await;
        let Some(target) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for doc in &target.documents {
            if matches(doc, filter)? {
                found.push(doc.clone());
            }
        }
        Ok(found)
    }

    async fn drop_database(&self) -> DocumentResult<()> {
        self.mutate(|state| {
            state.collections.clear();
            Ok(())
        })
        .await
    }
}
