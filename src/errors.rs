//! Error types shared across the crate.

use thiserror::Error;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse category of an [`AppError`].
///
/// Hosts branch on the category; the variant carries the detail.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Misuse of the client API or a closed session.
    Client,
    /// Pipe, spawn or I/O failure talking to the agent process.
    Transport,
    /// Malformed, oversized or unexpected wire data.
    Protocol,
    /// The agent process is missing or exited abnormally.
    Process,
    /// A tool use was refused.
    Permission,
    /// A host-supplied callback failed.
    Callback,
    /// Invalid configuration.
    Config,
    /// A bounded wait expired.
    Timeout,
}

/// Error enumeration covering every failure mode of a relay session.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    #[error("config: {0}")]
    Config(String),
    /// The agent executable could not be located.
    #[error("cli not found: {0}")]
    CliNotFound(String),
    /// Spawning the process or capturing its pipes failed.
    #[error("connection: {0}")]
    Connection(String),
    /// Writing to or reading from an established transport failed.
    #[error("transport: {0}")]
    Transport(String),
    /// Raw I/O failure.
    #[error("io: {0}")]
    Io(String),
    /// Wire data violated the line protocol.
    #[error("protocol: {0}")]
    Protocol(String),
    /// The JSON reassembly buffer grew past its limit.
    #[error("buffer exceeded: {size} bytes accumulated, limit is {limit}")]
    BufferExceeded {
        /// Bytes held when the limit was crossed.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// JSON (de)serialization failure.
    #[error("json: {0}")]
    Json(String),
    /// The agent answered a control request with an error response.
    #[error("control request rejected: {0}")]
    ControlRejected(String),
    /// The agent process exited with a failure status.
    #[error("process exited (code {exit_code:?}): {stderr}")]
    Process {
        /// Exit code, absent when terminated by a signal.
        exit_code: Option<i32>,
        /// Captured tail of the process's stderr.
        stderr: String,
    },
    /// A tool use was refused.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// A hook, permission or MCP callback failed.
    #[error("callback: {0}")]
    Callback(String),
    /// A bounded wait expired.
    #[error("timeout: {0}")]
    Timeout(String),
    /// An operation needed a connected session.
    #[error("not connected")]
    NotConnected,
    /// An operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The session was closed while the operation was in flight.
    #[error("session closed")]
    SessionClosed,
}

impl AppError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::CliNotFound(_) | Self::Process { .. } => ErrorKind::Process,
            Self::Connection(_) | Self::Transport(_) | Self::Io(_) => ErrorKind::Transport,
            Self::Protocol(_)
            | Self::BufferExceeded { .. }
            | Self::Json(_)
            | Self::ControlRejected(_) => ErrorKind::Protocol,
            Self::PermissionDenied(_) => ErrorKind::Permission,
            Self::Callback(_) => ErrorKind::Callback,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NotConnected | Self::InvalidState(_) | Self::SessionClosed => ErrorKind::Client,
        }
    }

    /// Whether this error ends the session it occurred in.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Transport(_)
                | Self::Io(_)
                | Self::BufferExceeded { .. }
                | Self::Process { .. }
                | Self::CliNotFound(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
