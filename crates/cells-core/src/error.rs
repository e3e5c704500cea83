//! # Cell Errors
//!
//! Error taxonomy shared by every cell variant.
//!
//! Deadline expiry is deliberately absent: a long-poll wait that runs out of
//! time resolves with a retry outcome, not with an error.

use thiserror::Error;

/// Result alias used throughout the cell contract.
pub type CellResult<T> = Result<T, CellError>;

/// A value failed schema validation at a boundary crossing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The raw value does not have the shape the schema describes.
    #[error("value does not match schema '{schema}': {reason}")]
    Shape { schema: String, reason: String },

    /// The value decoded, but a named refinement rejected it.
    #[error("value rejected by check '{check}' of schema '{schema}'")]
    Check { schema: String, check: String },

    /// The value could not be encoded into its stored representation.
    #[error("value could not be encoded for schema '{schema}': {reason}")]
    Encode { schema: String, reason: String },
}

/// Errors surfaced by cell reads, writes and iterations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellError {
    /// A stored or incoming value failed validation.
    #[error("validation failed for cell '{cell}': {source}")]
    Validation {
        cell: String,
        #[source]
        source: ValidationError,
    },

    /// A lens read a key that is absent from its parent.
    #[error("key '{key}' is missing from cell '{cell}'")]
    MissingKey { cell: String, key: String },

    /// A projection or merge could not be computed.
    #[error("projection failed for cell '{cell}': {reason}")]
    Projection { cell: String, reason: String },

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The caller is not allowed to observe this cell.
    #[error("not allowed to observe cell '{cell}'")]
    Permission { cell: String },

    /// The request/response channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A name was reused with a different value type.
    #[error("cell '{cell}' already exists with a different value type")]
    TypeMismatch { cell: String },
}

impl CellError {
    /// Attach a cell name to a validation failure.
    pub fn validation(cell: impl Into<String>, source: ValidationError) -> Self {
        Self::Validation {
            cell: cell.into(),
            source,
        }
    }

    /// A projection failure for the named cell.
    pub fn projection(cell: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Projection {
            cell: cell.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors caused by a rejected value rather than a
    /// failing backend or channel.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    #[must_use]
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::Permission { .. })
    }
}
