//! Frame router.
//!
//! The single consumer of the transport's frames. Control responses go to
//! the [`Correlator`], inbound control requests to the
//! [`InboundDispatcher`] (without waiting for them), and everything else is
//! decoded into a [`Message`] and forwarded to the caller in arrival order.
//!
//! | `type`             | Destination                              |
//! |--------------------|------------------------------------------|
//! | `control_response` | [`Correlator::resolve`]                  |
//! | `control_request`  | [`InboundDispatcher::dispatch`]          |
//! | *(any other)*      | caller message channel, or error channel |
//!
//! When the transport's channels close or the session is cancelled, every
//! pending control request is failed and the caller channels are dropped.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{Correlator, InboundDispatcher};
use crate::protocol::control::ControlResponse;
use crate::protocol::message::{parse_message, Message};
use crate::transport::codec::Frame;
use crate::transport::FrameChannels;
use crate::AppError;

/// Agent session id learned from `system/init`, shared with the session.
#[derive(Debug, Clone, Default)]
pub struct SessionIdCell(Arc<RwLock<Option<String>>>);

impl SessionIdCell {
    /// Current id, if announced.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, id: &str) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(id.to_owned());
    }
}

/// Destinations of routed frames.
#[derive(Debug)]
pub struct Router {
    /// Resolves `control_response` frames.
    pub correlator: Arc<Correlator>,
    /// Handles `control_request` frames.
    pub dispatcher: Arc<InboundDispatcher>,
    /// Caller message channel.
    pub messages: mpsc::UnboundedSender<Message>,
    /// Caller error channel.
    pub errors: mpsc::UnboundedSender<AppError>,
    /// Agent session id.
    pub session_id: SessionIdCell,
}

impl Router {
    /// Route until both transport channels close or `cancel` fires.
    pub async fn run(self, channels: FrameChannels, cancel: CancellationToken) {
        let FrameChannels {
            mut frames,
            errors: mut transport_errors,
        } = channels;
        let mut frames_open = true;
        let mut errors_open = true;

        while frames_open || errors_open {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("router: cancellation received, stopping");
                    break;
                }

                frame = frames.recv(), if frames_open => match frame {
                    Some(frame) => self.route(frame),
                    None => frames_open = false,
                },

                err = transport_errors.recv(), if errors_open => match err {
                    Some(err) => self.report(err),
                    None => errors_open = false,
                },
            }
        }

        let failed = self.correlator.fail_all();
        info!(failed_pending = failed, "router stopped");
    }

    /// Route one frame.
    pub fn route(&self, frame: Frame) {
        match frame.message_type.as_str() {
            "control_response" => match ControlResponse::from_frame_body(frame.body) {
                Ok(response) => {
                    self.correlator.resolve(response);
                }
                Err(err) => self.report(err),
            },
            "control_request" => {
                self.dispatcher.dispatch(frame.body);
            }
            "control_cancel_request" => {
                debug!("router: ignoring control_cancel_request");
            }
            _ => match parse_message(frame) {
                Ok(message) => {
                    if let Some(id) = message.init_session_id() {
                        self.session_id.set(id);
                    }
                    if self.messages.send(message).is_err() {
                        debug!("router: message receiver dropped");
                    }
                }
                Err(err) => self.report(err),
            },
        }
    }

    fn report(&self, err: AppError) {
        if err.is_fatal() {
            warn!(error = %err, "router: fatal transport error");
        } else {
            debug!(error = %err, "router: forwarding error");
        }
        let _ = self.errors.send(err);
    }
}
