//! # cells-longpoll
//!
//! Keeps a cell synchronized across a request/response boundary.
//!
//! ```text
//!   client                                   server
//!   ┌──────────────────┐  LongPollRequest   ┌──────────────────────┐
//!   │ LongPollingCell  │ ─────────────────► │ LongPollController   │
//!   │  (baseline)      │ ◄───────────────── │  registry → cell     │
//!   └──────────────────┘  LongPollResponse  │  Stoppable + timer   │
//!                                           └──────────────────────┘
//! ```
//!
//! A wait resolves with the cell's value as soon as it differs from the
//! client's baseline, with `please-retry` once `max_wait` elapses, or with
//! `cancelled` when the client cancels it. Cells are served only to
//! requesters their visibility allows.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod registry;

pub use client::{LocalTransport, LongPollTransport, LongPollingCell};
pub use config::LongPollConfig;
pub use controller::{LongPollController, LongPollStats};
pub use error::{ConfigError, LongPollError};
pub use protocol::{
    Access, CancelRequest, Different, LongPollRequest, LongPollResponse, Requester, RequesterId,
    Visibility,
};
pub use registry::{CellRegistry, RegisteredCell};
