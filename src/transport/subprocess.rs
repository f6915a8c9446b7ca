//! Subprocess transport.
//!
//! Spawns the agent with piped stdio and `kill_on_drop(true)`:
//! - stdout is decoded by the reader task ([`run_reader`]);
//! - stderr is drained by its own task into a bounded tail;
//! - stdin is guarded by an async mutex so only one writer runs at a time.
//!
//! In [`InputMode::OneShot`] stdin is closed right after the first
//! successful write. When stdout reaches EOF the reader task waits for the
//! process and reports a non-zero exit as [`AppError::Process`] with the
//! stderr tail attached.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::mode::InputMode;
use crate::options::SessionOptions;
use crate::transport::command::build_command;
use crate::transport::discovery::find_cli;
use crate::transport::reader::{run_reader, ReadEnd};
use crate::transport::stderr::{spawn_stderr_drain, StderrCallback, StderrTail};
use crate::transport::{FrameChannels, Transport, TransportFuture};
use crate::{AppError, Result};

/// How long a process-exit report waits for the last stderr lines.
const STDERR_SETTLE: Duration = Duration::from_millis(200);

/// Transport backed by a spawned agent process.
pub struct SubprocessTransport {
    config: RelayConfig,
    mode: InputMode,
    permission_prompt_stdio: bool,
    stderr_callback: Option<StderrCallback>,
    stderr_tail: StderrTail,
    stdin: AsyncMutex<Option<ChildStdin>>,
    stdout: Mutex<Option<ChildStdout>>,
    child: Arc<AsyncMutex<Option<Child>>>,
    ready: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SubprocessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessTransport")
            .field("mode", &self.mode)
            .field("ready", &self.ready.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SubprocessTransport {
    /// Transport for `config`, not yet started.
    #[must_use]
    pub fn new(config: RelayConfig, mode: InputMode) -> Self {
        let stderr_tail = StderrTail::new(config.stderr_tail_lines);
        Self {
            config,
            mode,
            permission_prompt_stdio: false,
            stderr_callback: None,
            stderr_tail,
            stdin: AsyncMutex::new(None),
            stdout: Mutex::new(None),
            child: Arc::new(AsyncMutex::new(None)),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Transport configured from session options.
    ///
    /// A permission callback switches permission prompts to stdio.
    #[must_use]
    pub fn from_options(options: &SessionOptions, mode: InputMode) -> Self {
        let mut transport = Self::new(options.config.clone(), mode);
        transport.permission_prompt_stdio = options.can_use_tool.is_some();
        transport.stderr_callback.clone_from(&options.stderr);
        transport
    }

    /// Input mode of this transport.
    #[must_use]
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Most recent stderr lines.
    #[must_use]
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }

    async fn do_connect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState("transport already closed".into()));
        }
        if self.ready.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState("transport already connected".into()));
        }

        let cli: PathBuf = find_cli(self.config.cli_path.as_deref())?;
        if let Some(cwd) = &self.config.cwd {
            if !cwd.is_dir() {
                return Err(AppError::Connection(format!(
                    "working directory does not exist: {}",
                    cwd.display()
                )));
            }
        }

        let mut child = build_command(&cli, &self.config, self.permission_prompt_stdio)
            .spawn()
            .map_err(|err| {
                AppError::Connection(format!("failed to spawn {}: {err}", cli.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Connection("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Connection("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Connection("failed to capture agent stderr".into()))?;

        let drain = spawn_stderr_drain(
            stderr,
            self.stderr_tail.clone(),
            self.stderr_callback.clone(),
            self.cancel.child_token(),
        );
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(drain);

        info!(
            pid = child.id(),
            cli = %cli.display(),
            mode = ?self.mode,
            "agent process started"
        );

        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().unwrap_or_else(PoisonError::into_inner) = Some(stdout);
        *self.child.lock().await = Some(child);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn do_write(&self, data: &str) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(AppError::Transport("transport is not ready for writing".into()));
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AppError::Transport("agent stdin is closed".into()))?;

        let written = async {
            stdin.write_all(data.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(err) = written {
            self.ready.store(false, Ordering::SeqCst);
            return Err(AppError::Transport(format!(
                "write to agent stdin failed: {err}"
            )));
        }

        if self.mode == InputMode::OneShot {
            if let Some(mut stdin) = guard.take() {
                let _ = stdin.shutdown().await;
                debug!("one-shot input written, stdin closed");
            }
        }
        Ok(())
    }

    async fn do_end_input(&self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            stdin
                .shutdown()
                .await
                .map_err(|err| AppError::Transport(format!("failed to close stdin: {err}")))?;
            debug!("agent stdin closed");
        }
        Ok(())
    }

    async fn do_close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ready.store(false, Ordering::SeqCst);

        // A writer blocked on a full pipe holds the lock; the kill below
        // unblocks it and the handle is dropped with the transport.
        if let Ok(mut guard) = self.stdin.try_lock() {
            if let Some(mut stdin) = guard.take() {
                let _ = stdin.shutdown().await;
            }
        }

        self.cancel.cancel();

        if let Some(mut child) = self.child.lock().await.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!(?status, "agent already exited"),
                _ => {
                    if let Err(err) = child.kill().await {
                        debug!(%err, "agent kill failed");
                    }
                }
            }
        }

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        info!("agent transport closed");
        Ok(())
    }

    fn start_reader(&self) -> Result<FrameChannels> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState("transport is not connected".into()));
        }
        let stdout = self
            .stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AppError::InvalidState("agent stdout is already being read".into()))?;

        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let child = Arc::clone(&self.child);
        let tail = self.stderr_tail.clone();
        let cancel = self.cancel.child_token();
        let max_buffer_size = self.config.max_buffer_size;

        let reader = tokio::spawn(async move {
            let end = run_reader(stdout, max_buffer_size, frame_tx, error_tx.clone(), cancel.clone())
                .await;
            if end == ReadEnd::Eof {
                if let Some(err) = await_exit(&child, &tail, &cancel).await {
                    let _ = error_tx.send(err);
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reader);

        Ok(FrameChannels { frames, errors })
    }
}

/// Wait for the process after stdout EOF and turn a failure status into an
/// error.
async fn await_exit(
    child: &AsyncMutex<Option<Child>>,
    tail: &StderrTail,
    cancel: &CancellationToken,
) -> Option<AppError> {
    let mut guard = tokio::select! {
        () = cancel.cancelled() => return None,
        guard = child.lock() => guard,
    };
    let process = guard.as_mut()?;

    let status = tokio::select! {
        () = cancel.cancelled() => return None,
        status = process.wait() => status,
    };

    match status {
        Ok(status) if status.success() => {
            debug!("agent exited cleanly");
            None
        }
        Ok(status) => {
            tail.wait_finished(STDERR_SETTLE).await;
            let exit_code = status.code();
            warn!(?exit_code, "agent exited with failure status");
            Some(AppError::Process {
                exit_code,
                stderr: tail.snapshot(),
            })
        }
        Err(err) => Some(AppError::Transport(format!(
            "failed to wait for agent process: {err}"
        ))),
    }
}

impl Transport for SubprocessTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(self.do_connect())
    }

    fn write<'a>(&'a self, data: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(self.do_write(data))
    }

    fn read_messages(&self) -> Result<FrameChannels> {
        self.start_reader()
    }

    fn end_input(&self) -> TransportFuture<'_, ()> {
        Box::pin(self.do_end_input())
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(self.do_close())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
