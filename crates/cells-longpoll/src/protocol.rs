//! Wire types for the long-poll protocol.
//!
//! ```text
//! request:  { "longPollingId": "...", "cellName": "...", "differentMaybe": { "value": ... } }
//! response: "please-retry" | "cancelled" | { "value": ... }
//! cancel:   { "longPollingId": "..." }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable per-connection identity supplied by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequesterId(String);

impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a requester is allowed to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Access {
    /// Untrusted callers, e.g. pages embedding the client.
    Public,
    /// Trusted callers, e.g. the owning application's own views.
    Privileged,
}

/// Declared visibility of a registered cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    Privileged,
}

impl Visibility {
    pub fn allows(self, access: Access) -> bool {
        matches!(
            (self, access),
            (Visibility::Public, _) | (Visibility::Privileged, Access::Privileged)
        )
    }
}

/// Identity and access level of a caller, as established by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: RequesterId,
    pub access: Access,
}

impl Requester {
    pub fn new(id: impl Into<String>, access: Access) -> Self {
        Self {
            id: RequesterId::new(id),
            access,
        }
    }
}

/// Baseline the client already holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Different {
    pub value: Value,
}

/// Request to wait for a cell's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongPollRequest {
    pub long_polling_id: String,
    pub cell_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub different_maybe: Option<Different>,
}

impl LongPollRequest {
    pub fn new(long_polling_id: impl Into<String>, cell_name: impl Into<String>) -> Self {
        Self {
            long_polling_id: long_polling_id.into(),
            cell_name: cell_name.into(),
            different_maybe: None,
        }
    }

    /// Only resolve once the cell differs from `value`.
    pub fn different_from(mut self, value: Value) -> Self {
        self.different_maybe = Some(Different { value });
        self
    }
}

/// Request to cancel an outstanding wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub long_polling_id: String,
}

/// Outcome of a long-poll wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResponse", from = "WireResponse")]
pub enum LongPollResponse {
    /// No qualifying change before the deadline; re-issue.
    PleaseRetry,
    /// The wait was cancelled; end the sequence.
    Cancelled,
    /// A qualifying value.
    Value(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Signal {
    PleaseRetry,
    Cancelled,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Signal(Signal),
    Value { value: Value },
}

impl From<LongPollResponse> for WireResponse {
    fn from(response: LongPollResponse) -> Self {
        match response {
            LongPollResponse::PleaseRetry => WireResponse::Signal(Signal::PleaseRetry),
            LongPollResponse::Cancelled => WireResponse::Signal(Signal::Cancelled),
            LongPollResponse::Value(value) => WireResponse::Value { value },
        }
    }
}

impl From<WireResponse> for LongPollResponse {
    fn from(wire: WireResponse) -> Self {
        match wire {
            WireResponse::Signal(Signal::PleaseRetry) => LongPollResponse::PleaseRetry,
            WireResponse::Signal(Signal::Cancelled) => LongPollResponse::Cancelled,
            WireResponse::Value { value } => LongPollResponse::Value(value),
        }
    }
}
