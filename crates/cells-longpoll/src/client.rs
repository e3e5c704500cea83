//! Client side of the long-poll protocol.
//!
//! [`LongPollingCell`] mirrors a cell served by a [`LongPollController`]:
//! each iteration keeps exactly one wait open, re-issuing it with the last
//! value it saw as the baseline.

use crate::controller::LongPollController;
use crate::error::LongPollError;
use crate::protocol::{CancelRequest, LongPollRequest, LongPollResponse, Requester};
use async_trait::async_trait;
use cells_core::{
    validate, CellError, CellResult, CellStream, CellValue, JsonSchema, Readable, Schema,
    Stoppable,
};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Request/response channel to a controller.
#[async_trait]
pub trait LongPollTransport: Send + Sync {
    async fn long_poll(&self, request: LongPollRequest) -> Result<LongPollResponse, LongPollError>;

    async fn cancel(&self, request: CancelRequest) -> Result<(), LongPollError>;
}

/// In-process transport with a fixed requester identity.
pub struct LocalTransport {
    controller: Arc<LongPollController>,
    requester: Requester,
}

impl LocalTransport {
    pub fn new(controller: Arc<LongPollController>, requester: Requester) -> Self {
        Self {
            controller,
            requester,
        }
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }
}

#[async_trait]
impl LongPollTransport for LocalTransport {
    async fn long_poll(&self, request: LongPollRequest) -> Result<LongPollResponse, LongPollError> {
        self.controller.long_poll(&self.requester, request).await
    }

    async fn cancel(&self, request: CancelRequest) -> Result<(), LongPollError> {
        self.controller.cancel(&self.requester.id, &request);
        Ok(())
    }
}

/// Sends a cancel for its poll id unless disarmed.
struct InFlight {
    transport: Option<Arc<dyn LongPollTransport>>,
    poll_id: String,
}

impl InFlight {
    fn new(transport: Arc<dyn LongPollTransport>, poll_id: String) -> Self {
        Self {
            transport: Some(transport),
            poll_id,
        }
    }

    fn disarm(mut self) {
        self.transport = None;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        let request = CancelRequest {
            long_polling_id: std::mem::take(&mut self.poll_id),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = transport.cancel(request).await {
                        debug!(error = %e, "Cancel after dropped iteration failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    poll_id = %request.long_polling_id,
                    "Iteration dropped outside a runtime, wait left to expire"
                );
            }
        }
    }
}

/// A read-only cell whose value lives on the other side of a transport.
pub struct LongPollingCell<T> {
    name: String,
    transport: Arc<dyn LongPollTransport>,
    schema: Arc<dyn Schema<T>>,
}

impl<T> LongPollingCell<T>
where
    T: CellValue + Serialize + DeserializeOwned,
{
    /// Mirror the remote cell `name`, decoding values with serde.
    pub fn new(name: impl Into<String>, transport: Arc<dyn LongPollTransport>) -> Self {
        let name = name.into();
        let schema: Arc<dyn Schema<T>> = Arc::new(JsonSchema::<T>::new(name.clone()));
        Self::with_schema(name, transport, schema)
    }
}

impl<T: CellValue> LongPollingCell<T> {
    /// Mirror the remote cell `name`, validating values with `schema`.
    pub fn with_schema(
        name: impl Into<String>,
        transport: Arc<dyn LongPollTransport>,
        schema: Arc<dyn Schema<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            schema,
        }
    }

    /// Iterate behind a stop switch.
    pub fn stoppable(self: &Arc<Self>) -> Stoppable<T> {
        Stoppable::new(self.clone())
    }

    fn decode(&self, raw: &Value) -> CellResult<T> {
        validate(raw, self.schema.as_ref()).map_err(|e| CellError::validation(&self.name, e))
    }
}

#[async_trait]
impl<T: CellValue> Readable<T> for LongPollingCell<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> CellResult<T> {
        let request = LongPollRequest::new(Uuid::new_v4().to_string(), self.name.clone());
        loop {
            match self.transport.long_poll(request.clone()).await? {
                LongPollResponse::Value(raw) => return self.decode(&raw),
                LongPollResponse::PleaseRetry => continue,
                LongPollResponse::Cancelled => {
                    return Err(CellError::Transport(format!(
                        "read of cell '{}' was cancelled",
                        self.name
                    )))
                }
            }
        }
    }

    fn changes(&self) -> CellStream<T> {
        let state = ClientLoop {
            name: self.name.clone(),
            transport: self.transport.clone(),
            schema: self.schema.clone(),
            poll_id: Uuid::new_v4().to_string(),
            baseline: None,
            ended: false,
        };

        stream::unfold(state, |mut state| async move {
            let item = state.next_value().await?;
            Some((item, state))
        })
        .boxed()
    }
}

struct ClientLoop<T> {
    name: String,
    transport: Arc<dyn LongPollTransport>,
    schema: Arc<dyn Schema<T>>,
    poll_id: String,
    baseline: Option<Value>,
    ended: bool,
}

impl<T: CellValue> ClientLoop<T> {
    async fn next_value(&mut self) -> Option<CellResult<T>> {
        if self.ended {
            return None;
        }
        loop {
            let mut request = LongPollRequest::new(self.poll_id.clone(), self.name.clone());
            if let Some(baseline) = &self.baseline {
                request = request.different_from(baseline.clone());
            }

            let in_flight = InFlight::new(self.transport.clone(), self.poll_id.clone());
            let response = self.transport.long_poll(request).await;
            in_flight.disarm();

            match response {
                Ok(LongPollResponse::Value(raw)) => {
                    let decoded = validate(&raw, self.schema.as_ref())
                        .map_err(|e| CellError::validation(&self.name, e));
                    // An invalid value still becomes the baseline, or the
                    // server would hand it straight back.
                    self.baseline = Some(raw);
                    return Some(decoded);
                }
                Ok(LongPollResponse::PleaseRetry) => {
                    debug!(cell = %self.name, poll_id = %self.poll_id, "Long-poll retry");
                }
                Ok(LongPollResponse::Cancelled) => {
                    debug!(cell = %self.name, poll_id = %self.poll_id, "Long-poll cancelled");
                    return None;
                }
                Err(e) => {
                    warn!(cell = %self.name, error = %e, "Long-poll request failed");
                    // Yield the error once, then end.
                    self.ended = e.is_terminal();
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
