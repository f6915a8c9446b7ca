//! Stdout reader task.
//!
//! Drives a [`FramedRead`] over the agent's stdout with [`JsonFrameCodec`]
//! and forwards decoded frames to the router. Any framing problem (bad
//! syntax, a value without `type`, an oversized buffer, an I/O failure) is
//! sent to the error channel and ends the task; nothing after it is read.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::codec::{Decoded, Frame, JsonFrameCodec};
use crate::AppError;

/// How a reader task finished.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReadEnd {
    /// The stream reached end of file.
    Eof,
    /// The cancellation token fired.
    Cancelled,
    /// A fatal error was reported on the error channel.
    Failed,
    /// The frame receiver was dropped.
    Detached,
}

/// Read frames from `stdout` until EOF, cancellation or a fatal error.
pub async fn run_reader<R>(
    stdout: R,
    max_buffer_size: usize,
    frame_tx: mpsc::UnboundedSender<Frame>,
    error_tx: mpsc::UnboundedSender<AppError>,
    cancel: CancellationToken,
) -> ReadEnd
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, JsonFrameCodec::new(max_buffer_size));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("reader: cancellation received, stopping");
                return ReadEnd::Cancelled;
            }

            item = framed.next() => match item {
                None => {
                    debug!("reader: EOF detected");
                    return ReadEnd::Eof;
                }
                Some(Ok(Decoded::Frame(frame))) => {
                    if frame_tx.send(frame).is_err() {
                        debug!("reader: frame receiver dropped, stopping");
                        return ReadEnd::Detached;
                    }
                }
                Some(Ok(Decoded::Malformed(err))) => {
                    warn!(error = %err, "reader: framing error, stopping");
                    let _ = error_tx.send(err);
                    return ReadEnd::Failed;
                }
                Some(Err(err)) => {
                    warn!(error = %err, "reader: fatal stream error, stopping");
                    let _ = error_tx.send(err);
                    return ReadEnd::Failed;
                }
            },
        }
    }
}
