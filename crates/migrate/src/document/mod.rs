//! Document store abstractions
//!
//! Document migrations never run arbitrary code. Their bodies are parsed into
//! a [`DocumentScript`] of whitelisted operations which is applied through the
//! [`DocumentDatabase`] trait. [`MemoryDocumentStore`] is the built-in engine;
//! other drivers plug in by implementing the two traits below.

pub mod memory;
pub mod query;
pub mod script;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryDocumentStore;
pub use script::{
    ApplyReport, DocumentOperation, DocumentScript, ScriptFailure, ScriptStatement,
    ScriptSyntaxError,
};

/// A JSON document
pub type Document = Map<String, Value>;

/// Error types for document store operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DocumentStoreError {
    #[error("Collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Index '{name}' does not exist on collection '{collection}'")]
    IndexNotFound { collection: String, name: String },

    #[error("Index '{name}' already exists on collection '{collection}' with different options")]
    IndexConflict { collection: String, name: String },

    #[error("Duplicate key in collection '{collection}' for index '{index}': {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Unsupported document store URL: {0}")]
    UnsupportedUrl(String),
}

pub type DocumentResult<T> = Result<T, DocumentStoreError>;

/// Index creation options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

/// How many documents an update or delete may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    One,
    Many,
}

/// Result of an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

/// Connection factory for a document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Obtain a handle to a named database
    async fn database(&self, name: &str) -> DocumentResult<Arc<dyn DocumentDatabase>>;
}

/// Handle to one database of a document store
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    fn name(&self) -> &str;

    async fn list_collections(&self) -> DocumentResult<Vec<String>>;

    async fn create_collection(&self, name: &str) -> DocumentResult<()>;

    /// Returns false when the collection did not exist
    async fn drop_collection(&self, name: &str) -> DocumentResult<bool>;

    async fn rename_collection(&self, from: &str, to: &str) -> DocumentResult<()>;

    /// Returns the index name
    async fn create_index(
        &self,
        collection: &str,
        keys: &Document,
        options: &IndexOptions,
    ) -> DocumentResult<String>;

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentResult<()>;

    /// Returns the number of inserted documents
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentResult<u64>;

    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        scope: Scope,
        upsert: bool,
    ) -> DocumentResult<UpdateOutcome>;

    /// Returns the number of deleted documents
    async fn delete(&self, collection: &str, filter: &Document, scope: Scope)
        -> DocumentResult<u64>;

    async fn find(&self, collection: &str, filter: &Document) -> DocumentResult<Vec<Document>>;

    async fn drop_database(&self) -> DocumentResult<()>;
}

/// Build the document store matching a URL (`memory://` or `file:///dir`)
pub fn store_from_url(url: &str) -> DocumentResult<Arc<dyn DocumentStore>> {
    let parsed =
        url::Url::parse(url).map_err(|e| DocumentStoreError::UnsupportedUrl(format!("{}: {}", url, e)))?;

    match parsed.scheme() {
        "memory" => Ok(Arc::new(MemoryDocumentStore::new())),
        "file" => {
            let dir = parsed
                .to_file_path()
                .map_err(|_| DocumentStoreError::UnsupportedUrl(url.to_string()))?;
            Ok(Arc::new(MemoryDocumentStore::persistent(dir)))
        }
        _ => Err(DocumentStoreError::UnsupportedUrl(url.to_string())),
    }
}
