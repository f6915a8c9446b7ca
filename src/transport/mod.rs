//! Byte transport to the agent process.
//!
//! [`Transport`] is the seam between the protocol engine and the process:
//! [`subprocess::SubprocessTransport`] is the production implementation,
//! tests substitute in-memory pipes.

pub mod codec;
pub mod command;
pub mod discovery;
pub mod reader;
pub mod stderr;
pub mod subprocess;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::transport::codec::Frame;
use crate::{AppError, Result};

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Receivers filled by the transport's read task.
///
/// Both channels close when the task ends; a fatal error is always sent
/// before that happens.
#[derive(Debug)]
pub struct FrameChannels {
    /// Typed JSON objects in arrival order.
    pub frames: mpsc::UnboundedReceiver<Frame>,
    /// Decode, I/O and process-exit errors.
    pub errors: mpsc::UnboundedReceiver<AppError>,
}

/// Bidirectional line transport to an agent.
///
/// All methods take `&self`; implementations serialize writes internally so
/// concurrent tasks can share one transport behind an `Arc`.
pub trait Transport: Send + Sync {
    /// Start the agent. Fails with `CliNotFound` or `Connection`.
    fn connect(&self) -> TransportFuture<'_, ()>;

    /// Write `data` (one or more complete lines) to the agent's stdin.
    fn write<'a>(&'a self, data: &'a str) -> TransportFuture<'a, ()>;

    /// Start reading the agent's stdout. Callable once per connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when not connected or already reading.
    fn read_messages(&self) -> Result<FrameChannels>;

    /// Close the agent's stdin, signalling end of input.
    fn end_input(&self) -> TransportFuture<'_, ()>;

    /// Stop the agent and release every resource. Idempotent.
    fn close(&self) -> TransportFuture<'_, ()>;

    /// Whether the transport is connected and writable.
    fn is_ready(&self) -> bool;
}
