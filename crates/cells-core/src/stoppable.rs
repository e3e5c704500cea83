//! # Stoppable Iteration
//!
//! Wraps a readable cell's iteration with out-of-band cancellation. The
//! source never learns it was stopped: the wrapper drops its stream and every
//! pending or future step resolves with [`Step::Stopped`].
//!
//! Timeouts are expressed the same way: a timer task holding a
//! [`StopHandle`] calls [`StopHandle::stop`].

use crate::cell::{CellStream, CellValue, Readable};
use crate::error::CellResult;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Outcome of one iteration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The next value of the source.
    Value(T),
    /// The iteration was stopped. Terminal.
    Stopped,
    /// The source ended on its own. Terminal.
    Ended,
}

impl<T> Step<T> {
    /// True for `Stopped` and `Ended`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Value(_))
    }

    /// The carried value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Stopped | Self::Ended => None,
        }
    }
}

/// Cloneable, idempotent stop signal.
#[derive(Clone, Debug)]
pub struct StopHandle {
    state: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Request a stop. Returns true only for the call that flipped the flag.
    pub fn stop(&self) -> bool {
        self.state.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Spawn a timer that stops this handle after `after`.
    ///
    /// The timer exits early if the handle is stopped by someone else.
    pub fn stop_after(&self, after: Duration) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = handle.stopped() => {}
                () = tokio::time::sleep(after) => {
                    if handle.stop() {
                        debug!(after_ms = after.as_millis() as u64, "Stop timer fired");
                    }
                }
            }
        })
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

enum Terminal {
    Stopped,
    Ended,
}

/// A readable source's iteration plus a stop switch.
pub struct Stoppable<T: CellValue> {
    source: Arc<dyn Readable<T>>,
    stream: Option<CellStream<T>>,
    handle: StopHandle,
    terminal: Option<Terminal>,
}

impl<T: CellValue> Stoppable<T> {
    pub fn new(source: Arc<dyn Readable<T>>) -> Self {
        Self::with_handle(source, StopHandle::new())
    }

    /// Wrap `source`, sharing an existing stop signal.
    pub fn with_handle(source: Arc<dyn Readable<T>>, handle: StopHandle) -> Self {
        Self {
            source,
            stream: None,
            handle,
            terminal: None,
        }
    }

    /// A handle that stops this iteration from anywhere.
    pub fn handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }

    /// Read the source's current value unless stopped first.
    pub async fn read(&self) -> CellResult<Step<T>> {
        if self.handle.is_stopped() {
            return Ok(Step::Stopped);
        }
        tokio::select! {
            biased;
            () = self.handle.stopped() => Ok(Step::Stopped),
            value = self.source.read() => value.map(Step::Value),
        }
    }

    /// Wait for the next value, a stop, or the end of the source.
    ///
    /// A stop that is already pending wins over a value that is ready at the
    /// same time. Once a terminal step is returned it is returned forever.
    pub async fn next(&mut self) -> CellResult<Step<T>> {
        if let Some(terminal) = &self.terminal {
            return Ok(match terminal {
                Terminal::Stopped => Step::Stopped,
                Terminal::Ended => Step::Ended,
            });
        }
        if self.handle.is_stopped() {
            return Ok(self.finish(Terminal::Stopped));
        }

        let handle = self.handle.clone();
        let item = {
            let source = &self.source;
            let stream = self.stream.get_or_insert_with(|| source.changes());
            tokio::select! {
                biased;
                () = handle.stopped() => None,
                item = stream.next() => Some(item),
            }
        };

        match item {
            None => Ok(self.finish(Terminal::Stopped)),
            Some(Some(Ok(value))) => Ok(Step::Value(value)),
            Some(Some(Err(e))) => Err(e),
            Some(None) => Ok(self.finish(Terminal::Ended)),
        }
    }

    /// Adapt into a plain stream that ends on stop or end of source.
    pub fn into_stream(self) -> CellStream<T> {
        stream::unfold(self, |mut stoppable| async move {
            match stoppable.next().await {
                Ok(Step::Value(value)) => Some((Ok(value), stoppable)),
                Ok(Step::Stopped | Step::Ended) => None,
                Err(e) => Some((Err(e), stoppable)),
            }
        })
        .boxed()
    }

    fn finish(&mut self, terminal: Terminal) -> Step<T> {
        // Dropping the stream releases whatever the source holds for it.
        self.stream = None;
        let (step, stopped) = match terminal {
            Terminal::Stopped => (Step::Stopped, true),
            Terminal::Ended => (Step::Ended, false),
        };
        self.terminal = Some(terminal);
        debug!(cell = %self.source.name(), stopped, "Stoppable finished");
        step
    }
}
