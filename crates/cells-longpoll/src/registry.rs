//! Named cells the controller may serve.
//!
//! The set is fixed once the registry is handed to a controller: callers
//! build it up front, then share it behind an `Arc`.

use crate::error::LongPollError;
use crate::protocol::{Access, Visibility};
use cells_core::{
    structural_change, CellError, CellValue, ChangePredicate, FormulaCell, Inputs, Readable,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A cell exposed over long-poll, with its access rule and comparison.
#[derive(Clone)]
pub struct RegisteredCell {
    pub cell: Arc<dyn Readable<Value>>,
    pub visibility: Visibility,
    pub differs: ChangePredicate<Value>,
}

impl RegisteredCell {
    pub fn visible_to(&self, access: Access) -> bool {
        self.visibility.allows(access)
    }
}

impl fmt::Debug for RegisteredCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCell")
            .field("cell", &self.cell.name())
            .field("visibility", &self.visibility)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct CellRegistry {
    cells: BTreeMap<String, RegisteredCell>,
}

impl CellRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a JSON-valued cell under `name`, compared structurally.
    pub fn register_json(
        &mut self,
        name: impl Into<String>,
        cell: Arc<dyn Readable<Value>>,
        visibility: Visibility,
    ) -> &mut Self {
        self.register_with_comparison(name, cell, visibility, structural_change())
    }

    /// Expose a JSON-valued cell with its own notion of "different".
    pub fn register_with_comparison(
        &mut self,
        name: impl Into<String>,
        cell: Arc<dyn Readable<Value>>,
        visibility: Visibility,
        differs: ChangePredicate<Value>,
    ) -> &mut Self {
        let name = name.into();
        debug!(cell = %name, ?visibility, "Registered long-poll cell");
        self.cells.insert(
            name,
            RegisteredCell {
                cell,
                visibility,
                differs,
            },
        );
        self
    }

    /// Expose a typed cell; values cross the wire as their serde encoding.
    pub fn register<T>(
        &mut self,
        name: impl Into<String>,
        cell: Arc<dyn Readable<T>>,
        visibility: Visibility,
    ) -> &mut Self
    where
        T: CellValue + Serialize,
    {
        let name = name.into();
        let encoded = name.clone();
        let json = FormulaCell::try_new(
            name.clone(),
            [("source", cell)],
            move |inputs: &Inputs<T>| {
                serde_json::to_value(&inputs["source"])
                    .map_err(|e| CellError::projection(encoded.clone(), e.to_string()))
            },
        );
        self.register_json(name, Arc::new(json), visibility)
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredCell, LongPollError> {
        self.cells.get(name).ok_or_else(|| LongPollError::UnknownCell {
            cell: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
