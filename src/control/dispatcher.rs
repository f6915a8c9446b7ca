//! Inbound control request dispatch.
//!
//! Every `control_request` from the agent is handled on its own task,
//! bounded by a semaphore, so slow callbacks never stall the reader. Host
//! callbacks run in a further child task: a panic surfaces as a
//! [`tokio::task::JoinError`] and is answered like any other failure.
//!
//! While the session is open, exactly one `control_response` is written per
//! request that carries a `request_id`. Once the session token is cancelled,
//! handler tasks stop and their callback tasks are aborted; nothing more is
//! written.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::callback::CallbackFuture;
use crate::hooks::{HookInput, HookOutput, HookRegistry};
use crate::permission::{CanUseTool, PermissionUpdate, ToolPermissionContext};
use crate::protocol::control::{error_envelope, split_inbound, success_envelope, InboundRequest};
use crate::protocol::encode_line;
use crate::transport::Transport;
use crate::{AppError, Result};

/// Handler for `mcp_message` requests addressed to in-process MCP servers.
pub trait McpHandler: Send + Sync {
    /// Handle one JSON-RPC message for `server_name` and return the reply.
    fn handle(&self, server_name: String, message: Value) -> CallbackFuture<Value>;
}

/// Routes inbound control requests to host callbacks.
pub struct InboundDispatcher {
    transport: Arc<dyn Transport>,
    hooks: Arc<HookRegistry>,
    can_use_tool: Option<CanUseTool>,
    mcp: Option<Arc<dyn McpHandler>>,
    limiter: Arc<Semaphore>,
    callback_timeout: Option<Duration>,
    cancel: CancellationToken,
}

/// Aborts a callback task when the handler waiting on it goes away.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl std::fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDispatcher")
            .field("hooks", &self.hooks.len())
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("mcp", &self.mcp.is_some())
            .field("available_permits", &self.limiter.available_permits())
            .field("callback_timeout", &self.callback_timeout)
            .finish_non_exhaustive()
    }
}

impl InboundDispatcher {
    /// Dispatcher answering through `transport`; `cancel` is the session
    /// token.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        hooks: Arc<HookRegistry>,
        can_use_tool: Option<CanUseTool>,
        mcp: Option<Arc<dyn McpHandler>>,
        max_concurrency: usize,
        callback_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            hooks,
            can_use_tool,
            mcp,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            callback_timeout,
            cancel,
        }
    }

    /// Handle the body of an inbound `control_request` on a new task.
    ///
    /// The task ends early, without answering, when the session closes.
    pub fn dispatch(self: &Arc<Self>, body: Value) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let handled = async {
                let Ok(_permit) = Arc::clone(&this.limiter).acquire_owned().await else {
                    return;
                };
                this.handle(body).await;
            };
            tokio::select! {
                biased;

                () = this.cancel.cancelled() => {
                    debug!("dispatcher: session closed, dropping inbound request");
                }
                () = handled => {}
            }
        })
    }

    /// Handle one inbound request and write its response.
    pub async fn handle(&self, body: Value) {
        let (request_id, request) = match split_inbound(body) {
            Ok(split) => split,
            Err(err) => {
                warn!(error = %err, "unanswerable inbound control request");
                return;
            }
        };

        let subtype = request.as_ref().map_or("unknown", InboundRequest::subtype);
        debug!(request_id, subtype, "handling inbound control request");

        let outcome = match request {
            Ok(request) => self.answer(request).await,
            Err(err) => Err(err),
        };

        let envelope = match outcome {
            Ok(payload) => success_envelope(&request_id, payload),
            Err(err) => {
                warn!(request_id, subtype, error = %err, "inbound control request failed");
                error_envelope(&request_id, &err.to_string())
            }
        };

        let written = match encode_line(&envelope) {
            Ok(line) => self.transport.write(&line).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(request_id, error = %err, "failed to write control response");
        }
    }

    async fn answer(&self, request: InboundRequest) -> Result<Map<String, Value>> {
        match request {
            InboundRequest::CanUseTool {
                tool_name,
                input,
                permission_suggestions,
                blocked_path,
            } => {
                let callback = self.can_use_tool.clone().ok_or_else(|| {
                    AppError::Config(
                        "can_use_tool requested but no permission callback is registered".into(),
                    )
                })?;
                let context = ToolPermissionContext {
                    suggestions: decode_suggestions(permission_suggestions),
                    blocked_path,
                };
                let original = input.clone();
                let decision = self
                    .guard(move || callback(tool_name, original, context))
                    .await?;
                decision.to_response(&input)
            }

            InboundRequest::HookCallback {
                callback_id,
                input,
                tool_use_id,
            } => {
                let hook = self.hooks.get(&callback_id).ok_or_else(|| {
                    AppError::Callback(format!("no hook callback registered for id {callback_id}"))
                })?;
                let input: HookInput = serde_json::from_value(input)
                    .map_err(|err| AppError::Protocol(format!("malformed hook input: {err}")))?;
                if !hook.applies_to(&input) {
                    debug!(callback_id, "hook matcher does not apply, passing through");
                    return HookOutput::default().to_response();
                }
                let callback = hook.callback;
                let output = self.guard(move || callback(input, tool_use_id)).await?;
                output.to_response()
            }

            InboundRequest::McpMessage {
                server_name,
                message,
            } => {
                let handler = self.mcp.clone().ok_or_else(|| {
                    AppError::Callback(format!("no MCP handler for server {server_name}"))
                })?;
                let reply = self
                    .guard(move || handler.handle(server_name, message))
                    .await?;
                let mut payload = Map::new();
                payload.insert("mcp_response".into(), reply);
                Ok(payload)
            }
        }
    }

    /// Invoke a callback on its own task, applying the callback deadline and
    /// turning panics into errors.
    async fn guard<T, F>(&self, invoke: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> CallbackFuture<T> + Send + 'static,
    {
        let task = tokio::spawn(async move { invoke().await });
        let _abort = AbortOnDrop(task.abort_handle());

        let joined = match self.callback_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(AppError::Timeout(format!(
                        "callback did not finish within {limit:?}"
                    )));
                }
            },
            None => task.await,
        };

        joined.map_err(|err| {
            if err.is_panic() {
                AppError::Callback("callback panicked".into())
            } else {
                AppError::Callback("callback was cancelled".into())
            }
        })?
    }
}

/// Decode suggested permission updates, skipping shapes this crate does not
/// model.
fn decode_suggestions(raw: Option<Vec<Value>>) -> Vec<PermissionUpdate> {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(update) => Some(update),
            Err(err) => {
                debug!(%err, "ignoring unrecognised permission suggestion");
                None
            }
        })
        .collect()
}
