//! File-backed store: one JSON object per file, rewritten atomically on
//! every mutation (write to a temp file, then rename over the original).

use crate::ports::{KeyValueStore, StorageError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStore {
    /// A store persisted at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(StorageError::Corrupt(format!(
                    "{} does not hold a JSON object",
                    self.path.display()
                ))),
                Err(e) => Err(StorageError::Corrupt(e.to_string())),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, entries: &Map<String, Value>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = entries.len(), "Store persisted");
        Ok(())
    }

    /// Run `f` against a copy of the loaded entries. A change is persisted
    /// first and only then becomes visible; a failed persist leaves the
    /// cached entries untouched.
    async fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut Map<String, Value>) -> (R, bool),
    ) -> Result<R, StorageError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let Some(entries) = guard.as_mut() else {
            return Err(StorageError::Unavailable("entries not loaded".into()));
        };
        let mut staged = entries.clone();
        let (result, dirty) = f(&mut staged);
        if dirty {
            self.persist(&staged).await?;
            *entries = staged;
        }
        Ok(result)
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.with_entries(|entries| (entries.get(key).cloned(), false))
            .await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value);
            ((), true)
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_entries(|entries| {
            let removed = entries.remove(key).is_some();
            ((), removed)
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.with_entries(|entries| (entries.keys().cloned().collect(), false))
            .await
    }
}
