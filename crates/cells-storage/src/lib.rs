//! # cells-storage
//!
//! Persistent, schema-validated cells.
//!
//! ## Layout
//!
//! - `ports`: the async key-value backend the collection is written against
//! - `adapters`: in-memory and JSON-file backends
//! - `collection`: the keyed factory producing one writable cell per name
//!
//! Validation happens in the collection, never in the backend: a backend
//! stores whatever JSON it is given.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod collection;
pub mod ports;

pub use adapters::{InMemoryStore, JsonFileStore};
pub use collection::{CellCollection, CollectionCell};
pub use ports::{KeyValueStore, StorageError};
