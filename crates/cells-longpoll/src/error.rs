//! Long-poll error types.

use cells_core::CellError;
use thiserror::Error;

/// Errors resolving a long-poll wait.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LongPollError {
    /// The requester may not observe this cell.
    #[error("requester is not allowed to observe cell '{cell}'")]
    Permission { cell: String },

    /// No cell is registered under this name.
    #[error("no cell named '{cell}' is registered")]
    UnknownCell { cell: String },

    /// The cell's iteration finished although cells never end.
    #[error("iteration of cell '{cell}' ended unexpectedly")]
    UnexpectedEnd { cell: String },

    /// The requester already has the maximum number of open waits.
    #[error("requester '{requester}' has {limit} waits outstanding")]
    TooManyPending { requester: String, limit: usize },

    /// The controller no longer accepts waits.
    #[error("long-poll controller is shut down")]
    ShutDown,

    /// Reading or iterating the cell failed.
    #[error(transparent)]
    Cell(#[from] CellError),
}

impl LongPollError {
    /// Errors that repeating the same request cannot clear.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Permission { .. } | Self::UnknownCell { .. } | Self::ShutDown
        )
    }
}

impl From<LongPollError> for CellError {
    fn from(err: LongPollError) -> Self {
        match err {
            LongPollError::Cell(inner) => inner,
            LongPollError::Permission { cell } => CellError::Permission { cell },
            other => CellError::Transport(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid max wait: {0}")]
    InvalidMaxWait(String),

    #[error("Invalid pending limit: {0}")]
    InvalidPendingLimit(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}
