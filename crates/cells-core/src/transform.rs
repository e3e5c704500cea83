//! # Transform Cells
//!
//! A bidirectional lens onto one addressable part of a writable parent.
//! The parent stays the single source of truth: a read projects the part
//! out of the parent's current value, a write merges the new part into the
//! parent's current value and writes the whole thing back.

use crate::cell::{
    project_changes, structural_change, CellStream, CellValue, ChangePredicate, Projector,
    Readable, Writable,
};
use crate::error::{CellError, CellResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// A value with addressable parts.
pub trait Keyed: Sized {
    type Key: Clone + Display + Send + Sync + 'static;
    type Value: CellValue;

    /// The part stored under `key`, if present.
    fn get_key(&self, key: &Self::Key) -> Option<Self::Value>;

    /// A copy of `self` with `key` set to `value`; every other part unchanged.
    fn with_key(&self, key: &Self::Key, value: Self::Value) -> CellResult<Self>;
}

impl<K, V> Keyed for BTreeMap<K, V>
where
    K: Ord + Clone + Display + Send + Sync + 'static,
    V: CellValue,
{
    type Key = K;
    type Value = V;

    fn get_key(&self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }

    fn with_key(&self, key: &K, value: V) -> CellResult<Self> {
        let mut next = self.clone();
        next.insert(key.clone(), value);
        Ok(next)
    }
}

impl<K, V> Keyed for HashMap<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: CellValue,
{
    type Key = K;
    type Value = V;

    fn get_key(&self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }

    fn with_key(&self, key: &K, value: V) -> CellResult<Self> {
        let mut next = self.clone();
        next.insert(key.clone(), value);
        Ok(next)
    }
}

impl Keyed for Value {
    type Key = String;
    type Value = Value;

    fn get_key(&self, key: &String) -> Option<Value> {
        self.as_object().and_then(|object| object.get(key)).cloned()
    }

    fn with_key(&self, key: &String, value: Value) -> CellResult<Self> {
        let mut next = self.clone();
        match next.as_object_mut() {
            Some(object) => {
                object.insert(key.clone(), value);
                Ok(next)
            }
            None => Err(CellError::projection(
                key.clone(),
                "parent value is not a JSON object",
            )),
        }
    }
}

type Merge<P, S> = Arc<dyn Fn(&P, S) -> CellResult<P> + Send + Sync>;

/// A lens over a writable parent cell.
pub struct TransformCell<P: CellValue, S: CellValue> {
    name: String,
    parent: Arc<dyn Writable<P>>,
    get: Projector<P, S>,
    merge: Merge<P, S>,
    changed: ChangePredicate<S>,
}

impl<P: CellValue, S: CellValue + PartialEq> TransformCell<P, S> {
    /// A lens from arbitrary get/merge functions.
    pub fn new<G, M>(name: impl Into<String>, parent: Arc<dyn Writable<P>>, get: G, merge: M) -> Self
    where
        G: Fn(&P) -> CellResult<S> + Send + Sync + 'static,
        M: Fn(&P, S) -> CellResult<P> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parent,
            get: Arc::new(get),
            merge: Arc::new(merge),
            changed: structural_change(),
        }
    }
}

impl<P, S> TransformCell<P, S>
where
    P: CellValue + Keyed<Value = S>,
    S: CellValue + PartialEq,
{
    /// Lens onto `key`, which must be present whenever the lens is read.
    pub fn sub(parent: Arc<dyn Writable<P>>, key: P::Key) -> Self {
        let name = format!("{}.{}", parent.name(), key);
        let cell = name.clone();
        let read_key = key.clone();
        Self::new(
            name,
            parent,
            move |value: &P| {
                value
                    .get_key(&read_key)
                    .ok_or_else(|| CellError::MissingKey {
                        cell: cell.clone(),
                        key: read_key.to_string(),
                    })
            },
            move |value: &P, part: S| value.with_key(&key, part),
        )
    }

    /// Lens onto `key`, reading `default` while the key is absent.
    pub fn sub_with_default(parent: Arc<dyn Writable<P>>, key: P::Key, default: S) -> Self {
        let name = format!("{}.{}", parent.name(), key);
        let read_key = key.clone();
        Self::new(
            name,
            parent,
            move |value: &P| Ok(value.get_key(&read_key).unwrap_or_else(|| default.clone())),
            move |value: &P, part: S| value.with_key(&key, part),
        )
    }
}

impl<P: CellValue, S: CellValue> TransformCell<P, S> {
    pub fn with_predicate(mut self, changed: ChangePredicate<S>) -> Self {
        self.changed = changed;
        self
    }

    pub fn parent(&self) -> &Arc<dyn Writable<P>> {
        &self.parent
    }
}

#[async_trait]
impl<P: CellValue, S: CellValue> Readable<S> for TransformCell<P, S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> CellResult<S> {
        let parent = self.parent.read().await?;
        (self.get)(&parent)
    }

    fn changes(&self) -> CellStream<S> {
        project_changes(self.parent.changes(), self.get.clone(), self.changed.clone())
    }
}

#[async_trait]
impl<P: CellValue, S: CellValue> Writable<S> for TransformCell<P, S> {
    async fn write(&self, value: S) -> CellResult<()> {
        let current = self.parent.read().await?;
        let next = (self.merge)(&current, value)?;
        debug!(cell = %self.name, parent = %self.parent.name(), "Lens write");
        self.parent.write(next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use futures::StreamExt;
    use serde_json::json;

    fn parent(value: Value) -> Arc<Cell<Value>> {
        Arc::new(Cell::new("prefs", value))
    }

    #[tokio::test]
    async fn test_lens_round_trip() {
        let prefs = parent(json!({"k": 1, "other": "x"}));
        let lens = TransformCell::sub(prefs.clone() as Arc<dyn Writable<Value>>, "k".to_string());

        lens.write(json!(9)).await.unwrap();

        assert_eq!(prefs.read().await.unwrap(), json!({"k": 9, "other": "x"}));
        assert_eq!(lens.read().await.unwrap(), json!(9));
    }

    #[tokio::test]
    async fn test_sub_missing_key_fails_read() {
        let prefs = parent(json!({"other": "x"}));
        let lens = TransformCell::sub(prefs as Arc<dyn Writable<Value>>, "k".to_string());

        let err = lens.read().await.unwrap_err();
        assert!(matches!(err, CellError::MissingKey { ref cell, .. } if cell == "prefs.k"));
    }

    #[tokio::test]
    async fn test_sub_with_default() {
        let prefs = parent(json!({"other": "x"}));
        let lens = TransformCell::sub_with_default(
            prefs.clone() as Arc<dyn Writable<Value>>,
            "theme".to_string(),
            json!("dark"),
        );

        assert_eq!(lens.read().await.unwrap(), json!("dark"));
        assert_eq!(prefs.get(), json!({"other": "x"}), "reading must not materialize");

        lens.write(json!("light")).await.unwrap();
        assert_eq!(prefs.get(), json!({"other": "x", "theme": "light"}));
    }

    #[tokio::test]
    async fn test_lens_changes_ignore_other_keys() {
        let prefs = parent(json!({"k": 1, "other": "x"}));
        let lens = TransformCell::sub(prefs.clone() as Arc<dyn Writable<Value>>, "k".to_string());
        let mut changes = lens.changes();
        assert_eq!(changes.next().await.unwrap().unwrap(), json!(1));

        prefs.set(json!({"k": 1, "other": "y"}));
        prefs.set(json!({"k": 2, "other": "y"}));
        assert_eq!(changes.next().await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_btreemap_lens_over_lens() {
        let mut accounts = BTreeMap::new();
        accounts.insert("main".to_string(), BTreeMap::from([("balance".to_string(), 5u64)]));
        let root = Arc::new(Cell::new("accounts", accounts));

        let main: Arc<dyn Writable<BTreeMap<String, u64>>> = Arc::new(TransformCell::sub(
            root.clone() as Arc<dyn Writable<BTreeMap<String, BTreeMap<String, u64>>>>,
            "main".to_string(),
        ));
        let balance = TransformCell::sub(main, "balance".to_string());

        balance.write(42).await.unwrap();
        assert_eq!(root.get()["main"]["balance"], 42);
        assert_eq!(balance.name(), "accounts.main.balance");
    }

    #[tokio::test]
    async fn test_write_into_non_object_fails() {
        let scalar = parent(json!(3));
        let lens = TransformCell::sub(scalar as Arc<dyn Writable<Value>>, "k".to_string());

        assert!(matches!(
            lens.write(json!(1)).await,
            Err(CellError::Projection { .. })
        ));
    }
}
