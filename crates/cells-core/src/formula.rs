//! # Formula Cells
//!
//! Read-only cells derived from named dependencies by a pure projection.
//!
//! ```text
//!   a ──┐
//!       ├──► StreamMap ──► latest snapshot ──► projection ──► predicate ──► out
//!   b ──┘
//! ```
//!
//! Dependency updates that are already waiting when a recompute starts are
//! folded into the same snapshot, so a burst of changes costs one
//! projection, not one per change.
//!
//! Dependencies are keyed by name; a name given twice keeps the last cell.
//! Dependencies of different types are combined through [`AnyValue`], see
//! [`FormulaCell::combine`] and [`erase`].

use crate::cell::{
    structural_change, CellStream, CellValue, ChangePredicate, Readable,
};
use crate::error::{CellError, CellResult};
use crate::transform::Keyed;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;
use tokio_stream::StreamMap;
use tracing::{trace, warn};

/// Latest values of a formula's dependencies, by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Inputs<D> {
    cell: Arc<str>,
    values: BTreeMap<String, D>,
}

impl<D> Inputs<D> {
    fn new(cell: Arc<str>) -> Self {
        Self {
            cell,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&D> {
        self.values.get(name)
    }

    /// The named dependency's value, or a projection error if `name` is not
    /// a dependency of this formula.
    pub fn value(&self, name: &str) -> CellResult<&D> {
        self.values.get(name).ok_or_else(|| {
            CellError::projection(
                self.cell.as_ref(),
                format!("'{name}' is not a dependency"),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &D)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Panics if `name` was not declared as a dependency. Every declared
/// dependency is present whenever a projection runs; use
/// [`Inputs::value`] where the name is not fixed at construction.
impl<D> Index<&str> for Inputs<D> {
    type Output = D;

    fn index(&self, name: &str) -> &D {
        match self.values.get(name) {
            Some(value) => value,
            None => panic!("'{name}' is not a dependency of this formula"),
        }
    }
}

impl Inputs<AnyValue> {
    /// The named dependency's value as a `V`.
    pub fn typed<V: 'static>(&self, name: &str) -> CellResult<&V> {
        self.value(name)?.downcast_ref().ok_or_else(|| {
            CellError::projection(
                self.cell.as_ref(),
                format!("dependency '{name}' is not a {}", type_name::<V>()),
            )
        })
    }
}

/// A dependency value with its type erased.
#[derive(Clone)]
pub struct AnyValue(Arc<dyn Any + Send + Sync>);

impl AnyValue {
    pub fn new<V: CellValue>(value: V) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<V: 'static>(&self) -> Option<&V> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AnyValue(..)")
    }
}

/// View a typed cell as a source of [`AnyValue`]s, so it can sit next to
/// dependencies of other types.
pub fn erase<V: CellValue>(cell: Arc<dyn Readable<V>>) -> Arc<dyn Readable<AnyValue>> {
    Arc::new(Erased { inner: cell })
}

struct Erased<V> {
    inner: Arc<dyn Readable<V>>,
}

#[async_trait]
impl<V: CellValue> Readable<AnyValue> for Erased<V> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn read(&self) -> CellResult<AnyValue> {
        self.inner.read().await.map(AnyValue::new)
    }

    fn changes(&self) -> CellStream<AnyValue> {
        self.inner
            .changes()
            .map(|item| item.map(AnyValue::new))
            .boxed()
    }
}

type Projection<D, T> = Arc<dyn Fn(&Inputs<D>) -> CellResult<T> + Send + Sync>;
type Dependencies<D> = BTreeMap<String, Arc<dyn Readable<D>>>;

/// A cell whose value is a pure function of other cells.
pub struct FormulaCell<D: CellValue, T: CellValue> {
    name: Arc<str>,
    dependencies: Arc<Dependencies<D>>,
    projection: Projection<D, T>,
    changed: ChangePredicate<T>,
}

impl<D: CellValue, T: CellValue + PartialEq> FormulaCell<D, T> {
    /// Derive a cell from named dependencies.
    pub fn new<N, F>(
        name: impl Into<String>,
        dependencies: impl IntoIterator<Item = (N, Arc<dyn Readable<D>>)>,
        projection: F,
    ) -> Self
    where
        N: Into<String>,
        F: Fn(&Inputs<D>) -> T + Send + Sync + 'static,
    {
        Self::try_new(name, dependencies, move |inputs: &Inputs<D>| Ok(projection(inputs)))
    }

    /// Derive a cell whose projection may fail.
    pub fn try_new<N, F>(
        name: impl Into<String>,
        dependencies: impl IntoIterator<Item = (N, Arc<dyn Readable<D>>)>,
        projection: F,
    ) -> Self
    where
        N: Into<String>,
        F: Fn(&Inputs<D>) -> CellResult<T> + Send + Sync + 'static,
    {
        let name: String = name.into();
        let mut named = Dependencies::new();
        for (dependency, cell) in dependencies {
            let dependency = dependency.into();
            if named.insert(dependency.clone(), cell).is_some() {
                warn!(
                    cell = %name,
                    dependency = %dependency,
                    "Duplicate dependency name, keeping the last"
                );
            }
        }
        Self {
            name: name.into(),
            dependencies: Arc::new(named),
            projection: Arc::new(projection),
            changed: structural_change(),
        }
    }

    /// Project a single dependency.
    pub fn map<F>(name: impl Into<String>, source: Arc<dyn Readable<D>>, f: F) -> Self
    where
        F: Fn(&D) -> T + Send + Sync + 'static,
    {
        Self::try_new(name, [("source", source)], move |inputs: &Inputs<D>| {
            Ok(f(&inputs["source"]))
        })
    }
}

impl<T: CellValue + PartialEq> FormulaCell<AnyValue, T> {
    /// Derive a cell from two dependencies of different types.
    pub fn combine<A, B, F>(
        name: impl Into<String>,
        a: Arc<dyn Readable<A>>,
        b: Arc<dyn Readable<B>>,
        projection: F,
    ) -> Self
    where
        A: CellValue,
        B: CellValue,
        F: Fn(&A, &B) -> T + Send + Sync + 'static,
    {
        Self::try_new(name, [("a", erase(a)), ("b", erase(b))], move |inputs| {
            Ok(projection(inputs.typed("a")?, inputs.typed("b")?))
        })
    }
}

impl<D, T> FormulaCell<D, T>
where
    D: CellValue + Keyed<Value = T>,
    T: CellValue + PartialEq,
{
    /// Read-only view of one field of `source`.
    ///
    /// Fails on read if the field is absent. Use a transform cell for
    /// writable field access.
    pub fn sub(source: Arc<dyn Readable<D>>, key: D::Key) -> Self {
        let name = format!("{}.{}", source.name(), key);
        let cell = name.clone();
        Self::try_new(name, [("source", source)], move |inputs: &Inputs<D>| {
            inputs["source"]
                .get_key(&key)
                .ok_or_else(|| CellError::MissingKey {
                    cell: cell.clone(),
                    key: key.to_string(),
                })
        })
    }
}

impl<D: CellValue, T: CellValue> FormulaCell<D, T> {
    /// Replace the change predicate, e.g. to ignore small numeric deltas.
    pub fn with_predicate(mut self, changed: ChangePredicate<T>) -> Self {
        self.changed = changed;
        self
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }
}

impl<D: CellValue, T: CellValue> fmt::Debug for FormulaCell<D, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormulaCell")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

#[async_trait]
impl<D: CellValue, T: CellValue> Readable<T> for FormulaCell<D, T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> CellResult<T> {
        let mut inputs = Inputs::new(self.name.clone());
        for (name, cell) in self.dependencies.iter() {
            inputs.values.insert(name.clone(), cell.read().await?);
        }
        (self.projection)(&inputs)
    }

    fn changes(&self) -> CellStream<T> {
        // Nothing can change: one value, then pending like an idle cell.
        if self.dependencies.is_empty() {
            let value = (self.projection)(&Inputs::new(self.name.clone()));
            return stream::once(async move { value })
                .chain(stream::pending())
                .boxed();
        }

        let mut merged = StreamMap::new();
        for (name, cell) in self.dependencies.iter() {
            merged.insert(name.clone(), cell.changes());
        }

        let state = Recompute {
            name: self.name.clone(),
            merged,
            expected: self.dependencies.len(),
            inputs: Inputs::new(self.name.clone()),
            projection: self.projection.clone(),
            changed: self.changed.clone(),
            last: None,
        };

        stream::unfold(state, |mut state| async move {
            let item = state.next_value().await?;
            Some((item, state))
        })
        .boxed()
    }
}

struct Recompute<D, T> {
    name: Arc<str>,
    merged: StreamMap<String, CellStream<D>>,
    expected: usize,
    inputs: Inputs<D>,
    projection: Projection<D, T>,
    changed: ChangePredicate<T>,
    last: Option<T>,
}

impl<D: CellValue, T: CellValue> Recompute<D, T> {
    async fn next_value(&mut self) -> Option<CellResult<T>> {
        loop {
            let (name, item) = self.merged.next().await?;
            if let Err(e) = self.absorb(name, item) {
                return Some(Err(e));
            }

            // Fold in updates that are already waiting.
            while let Some(Some((name, item))) = self.merged.next().now_or_never() {
                if let Err(e) = self.absorb(name, item) {
                    return Some(Err(e));
                }
            }

            if self.inputs.len() < self.expected {
                continue;
            }

            let value = match (self.projection)(&self.inputs) {
                Ok(value) => value,
                Err(e) => return Some(Err(e)),
            };
            let is_change = self
                .last
                .as_ref()
                .map_or(true, |last| (self.changed)(last, &value));
            trace!(cell = %self.name, is_change, "Formula recomputed");
            if is_change {
                self.last = Some(value.clone());
                return Some(Ok(value));
            }
        }
    }

    fn absorb(&mut self, name: String, item: CellResult<D>) -> CellResult<()> {
        self.inputs.values.insert(name, item?);
        Ok(())
    }
}
