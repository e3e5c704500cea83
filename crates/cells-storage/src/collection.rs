//! # Cell Collection
//!
//! Binds named, schema-validated cells to a key-value backend.
//!
//! ## Flow
//!
//! ```text
//!   read()  ──► store.get(name) ──► Some(raw) ──► validate ──► commit ──► value
//!                              └──► None ──► make_default() ──► encode ──► store.set ──► commit
//!
//!   write(v) ──► encode + validate ──► store.set(name) ──► commit ──► notify iterators
//! ```
//!
//! Each name maps to exactly one cell instance per collection, so every
//! writer and every iterator for a name share one notification group.

use crate::ports::KeyValueStore;
use async_trait::async_trait;
use cells_core::{
    structural_change, validate, CellError, CellResult, CellStream, CellValue, ChangePredicate,
    Readable, Schema, Writable,
};
use cells_telemetry::metrics::{CELL_WRITES, DEFAULTS_MATERIALIZED, VALIDATION_FAILURES};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

type MakeDefault<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Keyed factory of storage-backed cells.
pub struct CellCollection {
    store: Arc<dyn KeyValueStore>,
    cells: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl CellCollection {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// The cell bound to `name`, created on first request.
    ///
    /// Later calls for the same name return the same instance; their schema
    /// and default are ignored. Asking for a name with a different value type
    /// fails with [`CellError::TypeMismatch`].
    pub fn cell<T, S, F>(
        &self,
        name: &str,
        schema: S,
        make_default: F,
    ) -> CellResult<Arc<CollectionCell<T>>>
    where
        T: CellValue + PartialEq,
        S: Schema<T> + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.cell_with_predicate(name, schema, make_default, structural_change())
    }

    /// Like [`CellCollection::cell`], with a custom change predicate.
    pub fn cell_with_predicate<T, S, F>(
        &self,
        name: &str,
        schema: S,
        make_default: F,
        changed: ChangePredicate<T>,
    ) -> CellResult<Arc<CollectionCell<T>>>
    where
        T: CellValue,
        S: Schema<T> + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let mut cells = self.cells.lock();
        if let Some(existing) = cells.get(name) {
            return existing
                .clone()
                .downcast::<CollectionCell<T>>()
                .map_err(|_| CellError::TypeMismatch {
                    cell: name.to_string(),
                });
        }

        let cell = Arc::new(CollectionCell::new(
            name.to_string(),
            self.store.clone(),
            Arc::new(schema),
            Arc::new(make_default),
            changed,
        ));
        cells.insert(name.to_string(), cell.clone());
        debug!(cell = name, "Collection cell created");
        Ok(cell)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

struct Entry<T: CellValue> {
    key: String,
    store: Arc<dyn KeyValueStore>,
    schema: Arc<dyn Schema<T>>,
    make_default: MakeDefault<T>,
    changed: ChangePredicate<T>,
    committed: watch::Sender<Option<T>>,
    // Serializes default materialization against writes.
    write_lock: AsyncMutex<()>,
}

impl<T: CellValue> Entry<T> {
    async fn read(&self) -> CellResult<T> {
        match self.store.get(&self.key).await? {
            Some(raw) => {
                let value = self.decode(&raw)?;
                self.seed(value.clone());
                Ok(value)
            }
            None => self.materialize_default().await,
        }
    }

    async fn materialize_default(&self) -> CellResult<T> {
        let _guard = self.write_lock.lock().await;

        // Another reader or a writer may have filled the slot meanwhile.
        if let Some(raw) = self.store.get(&self.key).await? {
            let value = self.decode(&raw)?;
            self.commit(value.clone());
            return Ok(value);
        }

        let value = (self.make_default)();
        let raw = self.encode(&value)?;
        self.store.set(&self.key, raw).await?;
        DEFAULTS_MATERIALIZED.with_label_values(&[self.key.as_str()]).inc();
        debug!(cell = %self.key, "Default materialized");
        self.commit(value.clone());
        Ok(value)
    }

    async fn write(&self, value: T) -> CellResult<()> {
        let raw = self.encode(&value)?;
        // Re-validate the stored form so a value that encodes but cannot be
        // read back never reaches the backend.
        self.decode(&raw)?;

        let _guard = self.write_lock.lock().await;
        self.store.set(&self.key, raw).await?;
        CELL_WRITES.with_label_values(&[self.key.as_str()]).inc();
        self.commit(value);
        Ok(())
    }

    fn decode(&self, raw: &serde_json::Value) -> CellResult<T> {
        validate(raw, self.schema.as_ref()).map_err(|e| {
            VALIDATION_FAILURES.with_label_values(&[self.key.as_str(), "read"]).inc();
            warn!(cell = %self.key, error = %e, "Stored value failed validation");
            CellError::validation(self.key.clone(), e)
        })
    }

    fn encode(&self, value: &T) -> CellResult<serde_json::Value> {
        self.schema.encode(value).map_err(|e| {
            VALIDATION_FAILURES.with_label_values(&[self.key.as_str(), "write"]).inc();
            warn!(cell = %self.key, error = %e, "Rejected write");
            CellError::validation(self.key.clone(), e)
        })
    }

    /// Record a value read from the backend unless one is already committed.
    /// Writes commit under the write lock, so a late reader must not
    /// overwrite them with what it fetched earlier.
    fn seed(&self, value: T) {
        self.committed.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(value);
            true
        });
    }

    fn commit(&self, value: T) {
        let changed = &self.changed;
        self.committed.send_if_modified(|current| {
            let is_change = current
                .as_ref()
                .map_or(true, |previous| changed(previous, &value));
            *current = Some(value);
            is_change
        });
    }
}

/// A writable cell persisted under one collection key.
pub struct CollectionCell<T: CellValue> {
    entry: Arc<Entry<T>>,
}

impl<T: CellValue> CollectionCell<T> {
    fn new(
        key: String,
        store: Arc<dyn KeyValueStore>,
        schema: Arc<dyn Schema<T>>,
        make_default: MakeDefault<T>,
        changed: ChangePredicate<T>,
    ) -> Self {
        let (committed, _) = watch::channel(None);
        Self {
            entry: Arc::new(Entry {
                key,
                store,
                schema,
                make_default,
                changed,
                committed,
                write_lock: AsyncMutex::new(()),
            }),
        }
    }

    /// Storage key this cell is bound to.
    pub fn key(&self) -> &str {
        &self.entry.key
    }
}

#[async_trait]
impl<T: CellValue> Readable<T> for CollectionCell<T> {
    fn name(&self) -> &str {
        &self.entry.key
    }

    async fn read(&self) -> CellResult<T> {
        self.entry.read().await
    }

    fn changes(&self) -> CellStream<T> {
        let entry = self.entry.clone();
        let rx = entry.committed.subscribe();

        stream::unfold((entry, rx, true), |(entry, mut rx, first)| async move {
            if first {
                let item = match entry.read().await {
                    // The read committed its value; anything newer won the race.
                    Ok(value) => Ok(rx.borrow_and_update().clone().unwrap_or(value)),
                    Err(e) => Err(e),
                };
                return Some((item, (entry, rx, false)));
            }

            loop {
                // The entry owns the sender, so this only fails if it is gone.
                rx.changed().await.ok()?;
                let next = rx.borrow_and_update().clone();
                if let Some(value) = next {
                    return Some((Ok(value), (entry, rx, false)));
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl<T: CellValue> Writable<T> for CollectionCell<T> {
    async fn write(&self, value: T) -> CellResult<()> {
        self.entry.write(value).await
    }
}
