//! Session wiring.
//!
//! A [`Session`] owns one connected transport and the protocol machinery
//! around it: the hook registry, the correlator, the inbound dispatcher and
//! the router task. The caller receives data-plane messages and errors
//! through [`SessionChannels`].
//!
//! Lifecycle:
//! 1. `connect` starts the transport and the router.
//! 2. When hooks are registered, an `initialize` request announces them.
//! 3. Prompts and control requests are written while the session is open.
//! 4. `close` (idempotent) fails pending requests, stops inbound handlers,
//!    clears the hooks and stops the process. Dropping the session cancels its tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{Correlator, InboundDispatcher};
use crate::hooks::HookRegistry;
use crate::options::SessionOptions;
use crate::permission::PermissionMode;
use crate::protocol::control::ControlRequest;
use crate::protocol::encode_line;
use crate::protocol::message::{user_prompt, Message};
use crate::router::{Router, SessionIdCell};
use crate::transport::Transport;
use crate::{AppError, Result};

/// Session id used in prompts before the agent announces its own.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Caller-facing receivers of a session.
#[derive(Debug)]
pub struct SessionChannels {
    /// Data-plane messages in arrival order.
    pub messages: mpsc::UnboundedReceiver<Message>,
    /// Protocol, transport and process errors.
    pub errors: mpsc::UnboundedReceiver<AppError>,
    messages_open: bool,
    errors_open: bool,
}

impl SessionChannels {
    fn new(
        messages: mpsc::UnboundedReceiver<Message>,
        errors: mpsc::UnboundedReceiver<AppError>,
    ) -> Self {
        Self {
            messages,
            errors,
            messages_open: true,
            errors_open: true,
        }
    }

    /// Next message or error; `None` once both channels are closed.
    ///
    /// Pending messages are preferred over pending errors.
    pub async fn next(&mut self) -> Option<Result<Message>> {
        while self.messages_open || self.errors_open {
            tokio::select! {
                biased;

                message = self.messages.recv(), if self.messages_open => match message {
                    Some(message) => return Some(Ok(message)),
                    None => self.messages_open = false,
                },

                err = self.errors.recv(), if self.errors_open => match err {
                    Some(err) => return Some(Err(err)),
                    None => self.errors_open = false,
                },
            }
        }
        None
    }
}

/// A connected agent session.
pub struct Session {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    hooks: Arc<HookRegistry>,
    session_id: SessionIdCell,
    cancel: CancellationToken,
    control_timeout: Duration,
    closed: AtomicBool,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("correlator", &self.correlator)
            .field("hooks", &self.hooks.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect `transport` and start routing.
    ///
    /// # Errors
    ///
    /// Returns transport errors from connecting, and any error of the
    /// `initialize` exchange when hooks are registered. The transport is
    /// closed again on failure.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Result<(Self, SessionChannels)> {
        options.config.validate()?;
        transport.connect().await?;

        let frames = match transport.read_messages() {
            Ok(frames) => frames,
            Err(err) => {
                let _ = transport.close().await;
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let hooks = Arc::new(HookRegistry::build(&options.hooks));
        let correlator = Arc::new(Correlator::new(Arc::clone(&transport), cancel.clone()));
        let dispatcher = Arc::new(InboundDispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&hooks),
            options.can_use_tool.clone(),
            options.mcp_handler.clone(),
            options.config.max_inbound_concurrency,
            options.config.callback_timeout(),
            cancel.clone(),
        ));

        let (message_tx, messages) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let session_id = SessionIdCell::default();

        let router = Router {
            correlator: Arc::clone(&correlator),
            dispatcher,
            messages: message_tx,
            errors: error_tx,
            session_id: session_id.clone(),
        };
        let router_task = tokio::spawn(router.run(frames, cancel.clone()));

        let session = Self {
            transport,
            correlator,
            hooks,
            session_id,
            cancel,
            control_timeout: options.config.control_timeout(),
            closed: AtomicBool::new(false),
            router: Mutex::new(Some(router_task)),
        };

        if let Err(err) = session.initialize().await {
            warn!(error = %err, "initialize failed, closing session");
            let _ = session.close().await;
            return Err(err);
        }

        info!(hooks = session.hooks.len(), "session connected");
        Ok((session, SessionChannels::new(messages, errors)))
    }

    async fn initialize(&self) -> Result<()> {
        let Some(hooks) = self.hooks.announcement().cloned() else {
            return Ok(());
        };
        let reply = self
            .correlator
            .send(ControlRequest::Initialize { hooks: Some(hooks) }, self.control_timeout)
            .await?;
        debug!(keys = reply.len(), "initialize acknowledged");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::SessionClosed);
        }
        Ok(())
    }

    /// Send a text prompt as a `user` message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionClosed` after close, or a transport error.
    pub async fn send_prompt(&self, prompt: &str) -> Result<()> {
        let session_id = self
            .session_id
            .get()
            .unwrap_or_else(|| DEFAULT_SESSION_ID.to_owned());
        self.send_json(&user_prompt(prompt, &session_id)).await
    }

    /// Write an arbitrary JSON message, e.g. a `user` message with image
    /// blocks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionClosed` after close, or a transport error.
    pub async fn send_json(&self, message: &Value) -> Result<()> {
        self.ensure_open()?;
        let line = encode_line(message)?;
        self.transport.write(&line).await
    }

    /// Send a control request with the session's default deadline.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send`].
    pub async fn control(&self, request: ControlRequest) -> Result<Map<String, Value>> {
        self.control_with_timeout(request, self.control_timeout).await
    }

    /// Send a control request with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send`].
    pub async fn control_with_timeout(
        &self,
        request: ControlRequest,
        timeout: Duration,
    ) -> Result<Map<String, Value>> {
        self.ensure_open()?;
        self.correlator.send(request, timeout).await
    }

    /// Interrupt the current turn.
    ///
    /// # Errors
    ///
    /// See [`Session::control`].
    pub async fn interrupt(&self) -> Result<()> {
        self.control(ControlRequest::Interrupt).await.map(drop)
    }

    /// Change the permission mode.
    ///
    /// # Errors
    ///
    /// See [`Session::control`].
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.control(ControlRequest::SetPermissionMode { mode })
            .await
            .map(drop)
    }

    /// Change the model; `None` restores the default.
    ///
    /// # Errors
    ///
    /// See [`Session::control`].
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.control(ControlRequest::SetModel {
            model: model.map(str::to_owned),
        })
        .await
        .map(drop)
    }

    /// Models the agent can switch to.
    ///
    /// # Errors
    ///
    /// See [`Session::control`].
    pub async fn supported_models(&self) -> Result<Map<String, Value>> {
        self.control(ControlRequest::SupportedModels).await
    }

    /// Slash commands the agent offers.
    ///
    /// # Errors
    ///
    /// See [`Session::control`].
    pub async fn supported_commands(&self) -> Result<Map<String, Value>> {
        self.control(ControlRequest::SupportedCommands).await
    }

    /// Connection status of the agent's MCP servers.
    ///
    /// # Errors
    ///
    /// See [`Session::control`].
    pub async fn mcp_server_status(&self) -> Result<Map<String, Value>> {
        self.control(ControlRequest::McpServerStatus).await
    }

    /// Close the agent's stdin; the agent finishes and exits.
    ///
    /// # Errors
    ///
    /// Returns a transport error if stdin cannot be closed.
    pub async fn end_input(&self) -> Result<()> {
        self.transport.end_input().await
    }

    /// Tear the session down. Only the first call does any work.
    ///
    /// # Errors
    ///
    /// Returns a transport error from stopping the process.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let failed = self.correlator.fail_all();
        self.hooks.clear();
        let closed = self.transport.close().await;

        let router = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(router) = router {
            if let Err(err) = router.await {
                debug!(%err, "router task ended abnormally");
            }
        }

        info!(failed_pending = failed, "session closed");
        closed
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the transport is writable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.is_closed() && self.transport.is_ready()
    }

    /// Agent session id, once announced.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.get()
    }

    /// Outstanding control requests.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Control responses that arrived with no pending request.
    #[must_use]
    pub fn late_responses(&self) -> u64 {
        self.correlator.late_responses()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
