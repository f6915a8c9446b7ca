//! Outbound control request correlation.
//!
//! Each [`Correlator::send`] registers a oneshot responder under a fresh
//! request id, writes the envelope, and waits for whichever comes first:
//! the matching `control_response`, session shutdown, or the deadline. The
//! pending entry is removed by a guard on every exit path, including the
//! caller dropping the future.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::control::{request_envelope, ControlRequest, ControlResponse};
use crate::protocol::encode_line;
use crate::transport::Transport;
use crate::{AppError, Result};

type Responder = oneshot::Sender<Result<Map<String, Value>>>;

/// An outstanding outbound request.
#[derive(Debug)]
struct PendingRequest {
    responder: Responder,
    created_at: Instant,
}

/// Per-session table of outstanding control requests.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    counter: AtomicU64,
    pending: Mutex<HashMap<String, PendingRequest>>,
    late_responses: AtomicU64,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .field("late_responses", &self.late_responses())
            .finish_non_exhaustive()
    }
}

/// Removes the pending entry when the waiting future ends, however it ends.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.table().remove(self.request_id);
    }
}

impl Correlator {
    /// Correlator writing through `transport`; `cancel` is the session token.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, cancel: CancellationToken) -> Self {
        Self {
            transport,
            counter: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            late_responses: AtomicU64::new(0),
            cancel,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next request id: `req_{counter}_{8 hex chars}`.
    #[must_use]
    pub fn next_request_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let suffix = Uuid::new_v4().simple().to_string();
        format!("req_{n}_{}", &suffix[..8])
    }

    /// Send `request` and wait up to `timeout` for its response.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionClosed` if the session closes first.
    /// - `AppError::Timeout` if no response arrives in time.
    /// - `AppError::ControlRejected` if the agent answers with an error.
    /// - Transport errors from writing the request.
    pub async fn send(&self, request: ControlRequest, timeout: Duration) -> Result<Map<String, Value>> {
        if self.cancel.is_cancelled() {
            return Err(AppError::SessionClosed);
        }

        let request_id = self.next_request_id();
        let subtype = request.subtype();
        let (responder, response) = oneshot::channel();
        self.table().insert(
            request_id.clone(),
            PendingRequest {
                responder,
                created_at: Instant::now(),
            },
        );
        let _guard = PendingGuard {
            correlator: self,
            request_id: &request_id,
        };

        let line = encode_line(&request_envelope(&request_id, &request))?;
        debug!(request_id, subtype, "sending control request");
        self.transport.write(&line).await?;

        tokio::select! {
            biased;

            outcome = response => outcome.unwrap_or(Err(AppError::SessionClosed)),
            () = self.cancel.cancelled() => Err(AppError::SessionClosed),
            () = tokio::time::sleep(timeout) => {
                warn!(request_id, subtype, ?timeout, "control request timed out");
                Err(AppError::Timeout(format!(
                    "control request {subtype} ({request_id}) got no response within {timeout:?}"
                )))
            }
        }
    }

    /// Deliver a response to its waiter.
    ///
    /// Returns `false` for an unknown or already-settled id; such responses
    /// are logged and counted, never fatal.
    pub fn resolve(&self, response: ControlResponse) -> bool {
        let entry = self.table().remove(response.request_id());
        match entry {
            Some(pending) => {
                debug!(
                    request_id = response.request_id(),
                    elapsed_ms = u64::try_from(pending.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "control response received"
                );
                // The waiter may have gone away in between; nothing to do then.
                let _ = pending.responder.send(response.into_result());
                true
            }
            None => {
                self.late_responses.fetch_add(1, Ordering::SeqCst);
                warn!(
                    request_id = response.request_id(),
                    "dropping control response with no pending request"
                );
                false
            }
        }
    }

    /// Fail every outstanding request with `SessionClosed`.
    ///
    /// Returns how many requests were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingRequest> = self.table().drain().map(|(_, pending)| pending).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.responder.send(Err(AppError::SessionClosed));
        }
        if count > 0 {
            debug!(count, "failed pending control requests on close");
        }
        count
    }

    /// Outstanding requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Responses that arrived with no pending request.
    #[must_use]
    pub fn late_responses(&self) -> u64 {
        self.late_responses.load(Ordering::SeqCst)
    }
}
