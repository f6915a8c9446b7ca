//! Stderr drain.
//!
//! The agent's stderr is read continuously by its own task so a chatty
//! process can never block on a full pipe while stdout is being consumed.
//! Lines go to the optional host callback and into a bounded tail that is
//! attached to process-exit errors.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Longest stderr line kept in the tail.
const MAX_TAIL_LINE_BYTES: usize = 4096;

/// Host callback receiving each stderr line.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Bounded ring of the most recent stderr lines.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    finished: CancellationToken,
}

impl StderrTail {
    /// Keep at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            finished: CancellationToken::new(),
        }
    }

    /// Wait up to `limit` for the drain task to reach end of stream.
    pub async fn wait_finished(&self, limit: Duration) {
        let _ = tokio::time::timeout(limit, self.finished.cancelled()).await;
    }

    /// Record a line, evicting the oldest when full.
    pub fn push(&self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut kept = line.to_owned();
        if kept.len() > MAX_TAIL_LINE_BYTES {
            let mut cut = MAX_TAIL_LINE_BYTES;
            while !kept.is_char_boundary(cut) {
                cut -= 1;
            }
            kept.truncate(cut);
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(kept);
    }

    /// Tail joined with newlines.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Spawn the drain task for `stderr`.
pub fn spawn_stderr_drain<R>(
    stderr: R,
    tail: StderrTail,
    callback: Option<StderrCallback>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let _finished = tail.finished.clone().drop_guard();
        let mut reader = BufReader::new(stderr);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            tokio::select! {
                () = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut raw) => match read {
                    Ok(0) => break,
                    Ok(_) => {
                        // Agents may print arbitrary bytes; keep reading past them.
                        let decoded = String::from_utf8_lossy(&raw);
                        let line = decoded.trim_end_matches(&['\n', '\r'][..]);
                        trace!(line, "agent stderr");
                        tail.push(line);
                        if let Some(callback) = &callback {
                            callback(line);
                        }
                    }
                    Err(err) => {
                        debug!(%err, "stderr drain stopped on read error");
                        break;
                    }
                },
            }
        }
    })
}
