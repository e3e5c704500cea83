//! # Cells Core - Reactive State Propagation
//!
//! Values that change over time, derived from each other, lensed into
//! sub-parts, and iterated with bounded, cancellable waits.
//!
//! ## Components
//!
//! ```text
//!   ┌──────────────┐      ┌───────────────┐      ┌───────────────┐
//!   │   Cell<T>    │ ───► │  FormulaCell  │ ───► │   Stoppable   │
//!   │ (writable)   │      │  (read-only)  │      │ (cancellable) │
//!   └──────┬───────┘      └───────────────┘      └───────────────┘
//!          │
//!          ▼
//!   ┌───────────────┐
//!   │ TransformCell │  lens: read a part, write merges into the parent
//!   └───────────────┘
//! ```
//!
//! ## Rules
//!
//! - A `read()` always returns the latest committed value.
//! - Iteration starts with the current value, then yields each distinct
//!   change. Changes that land while a consumer is busy coalesce into the
//!   latest one; cells model current state, not an event log.
//! - Dependencies are fixed `Arc` handles supplied at construction, so the
//!   dependency graph is acyclic by construction.
//! - Cancellation is always a [`StopHandle::stop`]; timeouts are timers that
//!   call it.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod cell;
pub mod error;
pub mod formula;
pub mod schema;
pub mod stoppable;
pub mod transform;

// Re-export main types
pub use cell::{
    project_changes, structural_change, Cell, CellStream, CellValue, ChangePredicate, Projector,
    Readable, Writable,
};
pub use error::{CellError, CellResult, ValidationError};
pub use formula::{erase, AnyValue, FormulaCell, Inputs};
pub use schema::{validate, JsonSchema, Schema};
pub use stoppable::{StopHandle, Step, Stoppable};
pub use transform::{Keyed, TransformCell};
