//! Relay configuration parsing and validation.
//!
//! [`RelayConfig`] holds everything about a session that can be written down
//! in a TOML file: where the agent CLI lives, the flags it is launched with,
//! and the limits the protocol engine enforces. Host callbacks are not
//! serializable and live in [`crate::options::SessionOptions`] instead.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::permission::PermissionMode;
use crate::{AppError, Result};

/// Default JSON reassembly limit: 1 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1_048_576;

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_control_timeout_seconds() -> u64 {
    60
}

fn default_max_inbound_concurrency() -> usize {
    16
}

fn default_stderr_tail_lines() -> usize {
    100
}

/// Session configuration parsed from `relay.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RelayConfig {
    /// Explicit path to the agent executable; discovered when absent.
    #[serde(default)]
    pub cli_path: Option<PathBuf>,
    /// Working directory for the agent process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Model identifier passed as `--model`.
    #[serde(default)]
    pub model: Option<String>,
    /// Turn limit passed as `--max-turns`.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Replacement system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Text appended to the default system prompt.
    #[serde(default)]
    pub append_system_prompt: Option<String>,
    /// Tools the agent may use without asking.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tools the agent must never use.
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    /// Initial permission mode.
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    /// Continue the most recent conversation.
    #[serde(default, rename = "continue")]
    pub continue_conversation: bool,
    /// Session id to resume.
    #[serde(default)]
    pub resume: Option<String>,
    /// Fork instead of appending when resuming.
    #[serde(default)]
    pub fork_session: bool,
    /// Settings file path or inline JSON.
    #[serde(default)]
    pub settings: Option<String>,
    /// Additional directories the agent may access.
    #[serde(default)]
    pub add_dirs: Vec<PathBuf>,
    /// MCP server configuration file path or inline JSON.
    #[serde(default)]
    pub mcp_config: Option<String>,
    /// Ask the agent for partial `stream_event` messages.
    #[serde(default)]
    pub include_partial_messages: bool,
    /// Arbitrary `--flag [value]` pairs appended to the command line.
    #[serde(default)]
    pub extra_args: BTreeMap<String, Option<String>>,
    /// Environment overrides for the agent process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Upper bound for the JSON reassembly buffer, in bytes.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Deadline for outbound control requests.
    #[serde(default = "default_control_timeout_seconds")]
    pub control_timeout_seconds: u64,
    /// Deadline for host callbacks; 0 means no deadline.
    #[serde(default)]
    pub callback_timeout_seconds: u64,
    /// Inbound control requests handled at the same time.
    #[serde(default = "default_max_inbound_concurrency")]
    pub max_inbound_concurrency: usize,
    /// Stderr lines kept for process error reports.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cli_path: None,
            cwd: None,
            model: None,
            max_turns: None,
            system_prompt: None,
            append_system_prompt: None,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            permission_mode: None,
            continue_conversation: false,
            resume: None,
            fork_session: false,
            settings: None,
            add_dirs: Vec::new(),
            mcp_config: None,
            include_partial_messages: false,
            extra_args: BTreeMap::new(),
            env: BTreeMap::new(),
            max_buffer_size: default_max_buffer_size(),
            control_timeout_seconds: default_control_timeout_seconds(),
            callback_timeout_seconds: 0,
            max_inbound_concurrency: default_max_inbound_concurrency(),
            stderr_tail_lines: default_stderr_tail_lines(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or is invalid.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Deadline applied to each outbound control request.
    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_seconds)
    }

    /// Deadline applied to each host callback, if any.
    #[must_use]
    pub fn callback_timeout(&self) -> Option<Duration> {
        (self.callback_timeout_seconds > 0).then(|| Duration::from_secs(self.callback_timeout_seconds))
    }

    /// Check the limits and paths for consistency.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_size == 0 {
            return Err(AppError::Config(
                "max_buffer_size must be greater than zero".into(),
            ));
        }

        if self.max_inbound_concurrency == 0 {
            return Err(AppError::Config(
                "max_inbound_concurrency must be greater than zero".into(),
            ));
        }

        if self.control_timeout_seconds == 0 {
            return Err(AppError::Config(
                "control_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.max_turns == Some(0) {
            return Err(AppError::Config("max_turns must be at least 1".into()));
        }

        if self.continue_conversation && self.resume.is_some() {
            return Err(AppError::Config(
                "continue and resume are mutually exclusive".into(),
            ));
        }

        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                return Err(AppError::Config(format!(
                    "cwd is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }
}
