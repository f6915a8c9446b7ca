//! One-shot queries.
//!
//! [`query`] sends a single prompt and streams the agent's messages until
//! the process exits. Without host callbacks the transport runs in
//! [`InputMode::OneShot`] and stdin closes right after the prompt. With
//! callbacks stdin must stay open for control responses, so the session
//! runs persistent and stdin is closed once the turn's `result` arrives.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::mode::InputMode;
use crate::options::SessionOptions;
use crate::protocol::message::{Message, ResultMessage};
use crate::session::{Session, SessionChannels};
use crate::transport::subprocess::SubprocessTransport;
use crate::transport::Transport;
use crate::{AppError, Result};

/// Everything a finished query produced.
#[derive(Debug, Default)]
pub struct QueryOutcome {
    /// Messages in arrival order.
    pub messages: Vec<Message>,
    /// Errors in arrival order.
    pub errors: Vec<AppError>,
}

impl QueryOutcome {
    /// The final `result` message, if any.
    #[must_use]
    pub fn result(&self) -> Option<&ResultMessage> {
        self.messages.iter().rev().find_map(|message| match message {
            Message::Result(result) => Some(result),
            _ => None,
        })
    }
}

/// Stream of a running query.
#[derive(Debug)]
pub struct QueryStream {
    session: Session,
    channels: SessionChannels,
    end_input_on_result: bool,
}

impl QueryStream {
    /// Next message or error; `None` when the agent is done.
    pub async fn next(&mut self) -> Option<Result<Message>> {
        let item = self.channels.next().await?;
        if self.end_input_on_result {
            if let Ok(message) = &item {
                if message.is_result() {
                    self.end_input_on_result = false;
                    if let Err(err) = self.session.end_input().await {
                        warn!(error = %err, "failed to close agent stdin after result");
                    }
                }
            }
        }
        Some(item)
    }

    /// The underlying session, for control requests mid-stream.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drain the stream and close the session.
    pub async fn collect(mut self) -> QueryOutcome {
        let mut outcome = QueryOutcome::default();
        while let Some(item) = self.next().await {
            match item {
                Ok(message) => outcome.messages.push(message),
                Err(err) => outcome.errors.push(err),
            }
        }
        if let Err(err) = self.session.close().await {
            debug!(error = %err, "close after query failed");
        }
        outcome
    }

    /// Stop early and close the session.
    ///
    /// # Errors
    ///
    /// Returns a transport error from stopping the process.
    pub async fn close(self) -> Result<()> {
        self.session.close().await
    }
}

/// Run `prompt` against a freshly spawned agent.
///
/// # Errors
///
/// Returns `CliNotFound`/`Connection` when the agent cannot be started, or
/// a transport error when the prompt cannot be written.
pub async fn query(prompt: &str, options: SessionOptions) -> Result<QueryStream> {
    let mode = if options.has_callbacks() {
        InputMode::Persistent
    } else {
        InputMode::OneShot
    };
    let transport = Arc::new(SubprocessTransport::from_options(&options, mode));
    query_with_transport(prompt, options, transport, mode).await
}

/// Run `prompt` over an existing, unconnected transport.
///
/// `mode` must match the transport: with [`InputMode::Persistent`] stdin
/// is closed after the first `result`.
///
/// # Errors
///
/// See [`query`].
pub async fn query_with_transport(
    prompt: &str,
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    mode: InputMode,
) -> Result<QueryStream> {
    let (session, channels) = Session::connect(transport, options).await?;
    if let Err(err) = session.send_prompt(prompt).await {
        let _ = session.close().await;
        return Err(err);
    }
    Ok(QueryStream {
        session,
        channels,
        end_input_on_result: mode == InputMode::Persistent,
    })
}
