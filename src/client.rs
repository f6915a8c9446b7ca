//! Persistent, multi-turn client.
//!
//! A [`Client`] connects once and keeps the agent's stdin open, so prompts
//! and control requests can be interleaved for the lifetime of the process.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::mode::InputMode;
use crate::options::SessionOptions;
use crate::permission::PermissionMode;
use crate::protocol::message::Message;
use crate::session::{Session, SessionChannels};
use crate::transport::subprocess::SubprocessTransport;
use crate::transport::Transport;
use crate::{AppError, Result};

/// Interactive session with a persistent agent process.
#[derive(Debug)]
pub struct Client {
    options: SessionOptions,
    connection: Option<(Session, SessionChannels)>,
}

impl Client {
    /// Client for `options`, not yet connected.
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            connection: None,
        }
    }

    /// Spawn the agent and connect.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when already connected, otherwise
    /// see [`Session::connect`].
    pub async fn connect(&mut self) -> Result<()> {
        let transport = Arc::new(SubprocessTransport::from_options(
            &self.options,
            InputMode::Persistent,
        ));
        self.connect_with_transport(transport).await
    }

    /// Connect over a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub async fn connect_with_transport(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        if self.connection.is_some() {
            return Err(AppError::InvalidState("client already connected".into()));
        }
        let connection = Session::connect(transport, self.options.clone()).await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// The connected session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotConnected` before `connect`.
    pub fn session(&self) -> Result<&Session> {
        self.connection
            .as_ref()
            .map(|(session, _)| session)
            .ok_or(AppError::NotConnected)
    }

    /// Send a prompt for a new turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotConnected` or a transport error.
    pub async fn send_message(&self, prompt: &str) -> Result<()> {
        self.session()?.send_prompt(prompt).await
    }

    /// Next message or error from the agent; `None` once it is gone.
    pub async fn receive_message(&mut self) -> Option<Result<Message>> {
        let (_, channels) = self.connection.as_mut()?;
        channels.next().await
    }

    /// Messages of the current turn, up to and including its `result`.
    ///
    /// Errors that do not end the session are logged and skipped.
    ///
    /// # Errors
    ///
    /// - `AppError::NotConnected` before `connect`.
    /// - The first fatal error, e.g. a process exit.
    /// - If the stream ends before a `result`, the last error seen (e.g. a
    ///   framing error), or `AppError::SessionClosed` when there was none.
    pub async fn receive_response(&mut self) -> Result<Vec<Message>> {
        let (_, channels) = self.connection.as_mut().ok_or(AppError::NotConnected)?;
        let mut turn = Vec::new();
        let mut last_error = None;
        while let Some(item) = channels.next().await {
            match item {
                Ok(message) => {
                    let done = message.is_result();
                    turn.push(message);
                    if done {
                        return Ok(turn);
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(error = %err, "error while waiting for the turn's result");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(AppError::SessionClosed))
    }

    /// Interrupt the current turn.
    ///
    /// # Errors
    ///
    /// See [`Session::interrupt`].
    pub async fn interrupt(&self) -> Result<()> {
        self.session()?.interrupt().await
    }

    /// Change the permission mode.
    ///
    /// # Errors
    ///
    /// See [`Session::set_permission_mode`].
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.session()?.set_permission_mode(mode).await
    }

    /// Change the model.
    ///
    /// # Errors
    ///
    /// See [`Session::set_model`].
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.session()?.set_model(model).await
    }

    /// Models the agent can switch to.
    ///
    /// # Errors
    ///
    /// See [`Session::supported_models`].
    pub async fn supported_models(&self) -> Result<Map<String, Value>> {
        self.session()?.supported_models().await
    }

    /// Slash commands the agent offers.
    ///
    /// # Errors
    ///
    /// See [`Session::supported_commands`].
    pub async fn supported_commands(&self) -> Result<Map<String, Value>> {
        self.session()?.supported_commands().await
    }

    /// Connection status of the agent's MCP servers.
    ///
    /// # Errors
    ///
    /// See [`Session::mcp_server_status`].
    pub async fn mcp_server_status(&self) -> Result<Map<String, Value>> {
        self.session()?.mcp_server_status().await
    }

    /// Close stdin so the agent exits after the current turn.
    ///
    /// # Errors
    ///
    /// See [`Session::end_input`].
    pub async fn end_input(&self) -> Result<()> {
        self.session()?.end_input().await
    }

    /// Disconnect and stop the agent. A no-op when not connected.
    ///
    /// # Errors
    ///
    /// See [`Session::close`].
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.connection.take() {
            Some((session, _)) => session.close().await,
            None => {
                debug!("disconnect without connection");
                Ok(())
            }
        }
    }
}
