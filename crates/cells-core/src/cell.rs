//! # Cell Contract
//!
//! The read/iterate/write capability set every cell variant implements, and
//! [`Cell`], the in-memory writable cell the other variants build on.
//!
//! ## Iteration
//!
//! ```text
//!   changes() ──► current value ──► next distinct value ──► ... ──► (end)
//! ```
//!
//! A fresh iteration first yields the value current when it started, then
//! each committed change. At most one value is pending per iterator: writes
//! that land while the consumer is busy collapse into the most recent one.

use crate::error::CellResult;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::trace;

/// Values a cell can hold.
pub trait CellValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CellValue for T {}

/// A lazy, potentially infinite sequence of cell values.
pub type CellStream<T> = BoxStream<'static, CellResult<T>>;

/// Returns true when `next` counts as a change from `previous`.
pub type ChangePredicate<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Projection from a parent value into a derived value.
pub type Projector<P, S> = Arc<dyn Fn(&P) -> CellResult<S> + Send + Sync>;

/// The default change predicate: structural inequality.
#[must_use]
pub fn structural_change<T: PartialEq + 'static>() -> ChangePredicate<T> {
    Arc::new(|previous: &T, next: &T| previous != next)
}

/// Read side of the cell contract.
#[async_trait]
pub trait Readable<T: CellValue>: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// The latest committed value.
    async fn read(&self) -> CellResult<T>;

    /// Start a new iteration over the cell's values.
    fn changes(&self) -> CellStream<T>;
}

/// Write side of the cell contract.
#[async_trait]
pub trait Writable<T: CellValue>: Readable<T> {
    /// Replace the current value, notifying iterators if it changed.
    async fn write(&self, value: T) -> CellResult<()>;
}

/// An in-memory writable cell.
///
/// Backed by a `tokio::sync::watch` channel, which holds exactly one value
/// and wakes every receiver on change.
pub struct Cell<T: CellValue> {
    name: String,
    sender: watch::Sender<T>,
    changed: ChangePredicate<T>,
    version: AtomicU64,
}

impl<T: CellValue + PartialEq> Cell<T> {
    /// Create a cell using structural equality as its change predicate.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self::with_predicate(name, initial, structural_change())
    }
}

impl<T: CellValue> Cell<T> {
    /// Create a cell with a custom change predicate.
    pub fn with_predicate(name: impl Into<String>, initial: T, changed: ChangePredicate<T>) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            name: name.into(),
            sender,
            changed,
            version: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Commit a value. Returns true if iterators were notified.
    ///
    /// The value is always stored, even when the predicate reports no change,
    /// so a read never returns anything older than the last write.
    pub fn set(&self, value: T) -> bool {
        let changed = &self.changed;
        let notified = self.sender.send_if_modified(|current| {
            let is_change = changed(current, &value);
            *current = value;
            is_change
        });
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(cell = %self.name, version, notified, "Cell written");
        notified
    }

    /// Number of writes committed so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Number of live iterations.
    pub fn iterator_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl<T: CellValue> Readable<T> for Cell<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> CellResult<T> {
        Ok(self.get())
    }

    fn changes(&self) -> CellStream<T> {
        WatchStream::new(self.sender.subscribe()).map(Ok).boxed()
    }
}

#[async_trait]
impl<T: CellValue> Writable<T> for Cell<T> {
    async fn write(&self, value: T) -> CellResult<()> {
        self.set(value);
        Ok(())
    }
}

struct Projected<P, S> {
    source: CellStream<P>,
    project: Projector<P, S>,
    changed: ChangePredicate<S>,
    last: Option<S>,
}

/// Map a parent's iteration through `project`, dropping values the
/// predicate does not consider a change from the last one emitted.
pub fn project_changes<P, S>(
    source: CellStream<P>,
    project: Projector<P, S>,
    changed: ChangePredicate<S>,
) -> CellStream<S>
where
    P: CellValue,
    S: CellValue,
{
    let state = Projected {
        source,
        project,
        changed,
        last: None,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let item = state.source.next().await?;
            let value = match item.and_then(|parent| (state.project)(&parent)) {
                Ok(value) => value,
                Err(e) => return Some((Err(e), state)),
            };
            let is_change = state
                .last
                .as_ref()
                .map_or(true, |last| (state.changed)(last, &value));
            if is_change {
                state.last = Some(value.clone());
                return Some((Ok(value), state));
            }
        }
    })
    .boxed()
}
