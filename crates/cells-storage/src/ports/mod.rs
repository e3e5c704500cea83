//! Storage ports.
//!
//! The backend is an opaque async map from string key to a serializable
//! value. Schema validation happens above it, in the collection.

use async_trait::async_trait;
use cells_core::CellError;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage file: {0}")]
    Corrupt(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StorageError> for CellError {
    fn from(err: StorageError) -> Self {
        CellError::Storage(err.to_string())
    }
}

/// Async key-value storage abstraction.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}
