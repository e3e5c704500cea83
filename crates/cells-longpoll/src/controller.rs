//! Server side of the long-poll protocol.
//!
//! Each wait gets a cancellation handle keyed by (requester, poll id). The
//! handle is inserted before the wait starts and removed when the wait
//! resolves by any path, including the wait's future being dropped.
//!
//! Flow:
//! 1. Resolve the cell and check visibility (fail closed)
//! 2. Register the handle, replacing a live wait with the same key
//! 3. Arm a timer that stops the handle after `max_wait`
//! 4. Iterate the cell until a value differs from the client's baseline
//! 5. Map the outcome: value, `please-retry` (timer) or `cancelled`

use crate::config::LongPollConfig;
use crate::error::LongPollError;
use crate::protocol::{CancelRequest, LongPollRequest, LongPollResponse, Requester, RequesterId};
use crate::registry::{CellRegistry, RegisteredCell};
use cells_core::{StopHandle, Step, Stoppable};
use cells_telemetry::metrics::{LONG_POLL_PENDING, LONG_POLL_WAITS, LONG_POLL_WAIT_DURATION};
use cells_telemetry::HistogramTimer;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PollKey {
    requester: RequesterId,
    poll_id: String,
}

/// A wait in progress
struct PendingPoll {
    /// Distinguishes this wait from a later one reusing the key
    ticket: u64,
    /// Cell name (for logging)
    cell: String,
    stop: StopHandle,
    cancelled: Arc<AtomicBool>,
}

impl PendingPoll {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.stop.stop();
    }
}

/// Outcome counters for a controller
#[derive(Debug, Default)]
pub struct LongPollStats {
    /// Waits resolved with a value
    pub resolved: AtomicU64,
    /// Waits that hit the deadline
    pub retried: AtomicU64,
    /// Waits cancelled by the client, a disconnect or a replacement
    pub cancelled: AtomicU64,
    /// Requests refused before waiting
    pub rejected: AtomicU64,
}

/// Removes the wait's handle on every exit path.
struct WaitGuard<'a> {
    controller: &'a LongPollController,
    key: PollKey,
    ticket: u64,
    timer: JoinHandle<()>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.timer.abort();
        let ticket = self.ticket;
        if self
            .controller
            .pending
            .remove_if(&self.key, |_, poll| poll.ticket == ticket)
            .is_some()
        {
            LONG_POLL_PENDING.dec();
            self.controller.release(&self.key.requester);
        }
    }
}

pub struct LongPollController {
    registry: Arc<CellRegistry>,
    config: LongPollConfig,
    pending: DashMap<PollKey, PendingPoll>,
    /// Open waits per requester; updated together with `pending`
    open: DashMap<RequesterId, usize>,
    next_ticket: AtomicU64,
    stats: LongPollStats,
    shut_down: AtomicBool,
}

impl LongPollController {
    pub fn new(registry: Arc<CellRegistry>, config: LongPollConfig) -> Self {
        Self {
            registry,
            config,
            pending: DashMap::new(),
            open: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            stats: LongPollStats::default(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &CellRegistry {
        &self.registry
    }

    pub fn config(&self) -> &LongPollConfig {
        &self.config
    }

    /// Wait until the named cell holds a value different from the request's
    /// baseline, the deadline passes, or the wait is cancelled.
    pub async fn long_poll(
        &self,
        requester: &Requester,
        request: LongPollRequest,
    ) -> Result<LongPollResponse, LongPollError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(LongPollError::ShutDown);
        }

        let entry = match self.registry.resolve(&request.cell_name) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    cell = %request.cell_name,
                    requester = %requester.id,
                    "Long-poll rejected: unknown cell"
                );
                self.reject();
                return Err(e);
            }
        };
        if !entry.visible_to(requester.access) {
            warn!(
                cell = %request.cell_name,
                requester = %requester.id,
                access = ?requester.access,
                "Long-poll rejected: cell not visible to requester"
            );
            self.reject();
            return Err(LongPollError::Permission {
                cell: request.cell_name,
            });
        }

        let key = PollKey {
            requester: requester.id.clone(),
            poll_id: request.long_polling_id.clone(),
        };
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let stop = StopHandle::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let poll = PendingPoll {
            ticket,
            cell: request.cell_name.clone(),
            stop: stop.clone(),
            cancelled: cancelled.clone(),
        };
        match self.admit(&key, poll) {
            Ok(Some(previous)) => {
                debug!(
                    requester = %key.requester,
                    poll_id = %key.poll_id,
                    cell = %previous.cell,
                    "Poll id reused, cancelling previous wait"
                );
                previous.cancel();
            }
            Ok(None) => {}
            Err(e) => {
                self.reject();
                return Err(e);
            }
        }

        let _guard = WaitGuard {
            controller: self,
            key,
            ticket,
            timer: stop.stop_after(self.config.max_wait()),
        };
        if self.shut_down.load(Ordering::Acquire) {
            cancelled.store(true, Ordering::Release);
            stop.stop();
        }

        let _timer = HistogramTimer::new(&LONG_POLL_WAIT_DURATION);
        debug!(
            cell = %request.cell_name,
            requester = %requester.id,
            poll_id = %request.long_polling_id,
            has_baseline = request.different_maybe.is_some(),
            "Long-poll wait started"
        );

        let baseline = request.different_maybe.map(|different| different.value);
        let response = match self.wait(entry, stop, baseline.as_ref()).await? {
            Some(value) => LongPollResponse::Value(value),
            None if cancelled.load(Ordering::Acquire) => LongPollResponse::Cancelled,
            None => LongPollResponse::PleaseRetry,
        };

        self.record(&response);
        debug!(
            cell = %request.cell_name,
            poll_id = %request.long_polling_id,
            outcome = outcome_label(&response),
            "Long-poll wait resolved"
        );
        Ok(response)
    }

    async fn wait(
        &self,
        entry: &RegisteredCell,
        stop: StopHandle,
        baseline: Option<&Value>,
    ) -> Result<Option<Value>, LongPollError> {
        let mut iteration = Stoppable::with_handle(entry.cell.clone(), stop);
        loop {
            match iteration.next().await? {
                Step::Value(value) => {
                    if baseline.map_or(true, |baseline| (entry.differs)(baseline, &value)) {
                        return Ok(Some(value));
                    }
                }
                Step::Stopped => return Ok(None),
                Step::Ended => {
                    let cell = entry.cell.name().to_string();
                    error!(cell = %cell, "Cell iteration ended during a long-poll wait");
                    return Err(LongPollError::UnexpectedEnd { cell });
                }
            }
        }
    }

    /// Cancel the requester's wait with this poll id.
    ///
    /// Returns false if no such wait is open; that is not an error.
    pub fn cancel(&self, requester: &RequesterId, request: &CancelRequest) -> bool {
        let key = PollKey {
            requester: requester.clone(),
            poll_id: request.long_polling_id.clone(),
        };
        match self.pending.get(&key) {
            Some(poll) => {
                debug!(
                    requester = %requester,
                    poll_id = %request.long_polling_id,
                    cell = %poll.cell,
                    "Cancelling long-poll wait"
                );
                poll.cancel();
                true
            }
            None => {
                debug!(
                    requester = %requester,
                    poll_id = %request.long_polling_id,
                    "Cancel for unknown poll id ignored"
                );
                false
            }
        }
    }

    /// Cancel every wait owned by `requester`, e.g. when its connection
    /// closes. Returns the number of waits cancelled.
    pub fn disconnect(&self, requester: &RequesterId) -> usize {
        let mut cancelled = 0;
        for poll in self
            .pending
            .iter()
            .filter(|entry| entry.key().requester == *requester)
        {
            poll.value().cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            debug!(requester = %requester, cancelled, "Requester disconnected");
        }
        cancelled
    }

    /// Cancel all waits and refuse new ones.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        for poll in self.pending.iter() {
            poll.value().cancel();
        }
        debug!(cancelled = self.pending.len(), "Long-poll controller shut down");
    }

    /// Number of open waits.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &LongPollStats {
        &self.stats
    }

    /// Insert `poll` unless the requester is at its limit, returning the
    /// wait it replaces. The limit check and the insert both happen under
    /// the requester's counter lock.
    fn admit(
        &self,
        key: &PollKey,
        poll: PendingPoll,
    ) -> Result<Option<PendingPoll>, LongPollError> {
        let limit = self.config.max_pending_per_requester;
        let mut open = self.open.entry(key.requester.clone()).or_insert(0);
        // A reused key replaces its wait rather than adding one.
        if *open >= limit && !self.pending.contains_key(key) {
            warn!(requester = %key.requester, limit, "Long-poll rejected: too many waits");
            return Err(LongPollError::TooManyPending {
                requester: key.requester.to_string(),
                limit,
            });
        }
        let previous = self.pending.insert(key.clone(), poll);
        if previous.is_none() {
            *open += 1;
            LONG_POLL_PENDING.inc();
        }
        Ok(previous)
    }

    fn release(&self, requester: &RequesterId) {
        if let Some(mut open) = self.open.get_mut(requester) {
            *open = open.saturating_sub(1);
        }
        self.open.remove_if(requester, |_, open| *open == 0);
    }

    fn reject(&self) {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        LONG_POLL_WAITS.with_label_values(&["rejected"]).inc();
    }

    fn record(&self, response: &LongPollResponse) {
        let counter = match response {
            LongPollResponse::Value(_) => &self.stats.resolved,
            LongPollResponse::PleaseRetry => &self.stats.retried,
            LongPollResponse::Cancelled => &self.stats.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        LONG_POLL_WAITS
            .with_label_values(&[outcome_label(response)])
            .inc();
    }
}

impl Drop for LongPollController {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.shutdown();
        }
    }
}

fn outcome_label(response: &LongPollResponse) -> &'static str {
    match response {
        LongPollResponse::Value(_) => "value",
        LongPollResponse::PleaseRetry => "retry",
        LongPollResponse::Cancelled => "cancelled",
    }
}
