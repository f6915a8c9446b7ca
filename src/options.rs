//! Session options: configuration plus host callbacks.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::control::McpHandler;
use crate::hooks::{HookEvent, HookMatcher};
use crate::permission::CanUseTool;
use crate::transport::stderr::StderrCallback;

/// Everything needed to open a session.
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Serializable configuration.
    pub config: RelayConfig,
    /// Hook matchers by event, in registration order.
    pub hooks: BTreeMap<HookEvent, Vec<HookMatcher>>,
    /// Permission callback for `can_use_tool`.
    pub can_use_tool: Option<CanUseTool>,
    /// Receives every stderr line of the agent.
    pub stderr: Option<StderrCallback>,
    /// Handles `mcp_message` requests.
    pub mcp_handler: Option<Arc<dyn McpHandler>>,
}

impl Debug for SessionOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("mcp_handler", &self.mcp_handler.is_some())
            .finish()
    }
}

impl SessionOptions {
    /// Options around `config` with no callbacks.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Register a hook matcher for `event`.
    #[must_use]
    pub fn hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.hooks.entry(event).or_default().push(matcher);
        self
    }

    /// Install the permission callback.
    #[must_use]
    pub fn can_use_tool(mut self, callback: CanUseTool) -> Self {
        self.can_use_tool = Some(callback);
        self
    }

    /// Install the stderr callback.
    #[must_use]
    pub fn stderr(mut self, callback: StderrCallback) -> Self {
        self.stderr = Some(callback);
        self
    }

    /// Install the MCP message handler.
    #[must_use]
    pub fn mcp_handler(mut self, handler: Arc<dyn McpHandler>) -> Self {
        self.mcp_handler = Some(handler);
        self
    }

    /// Whether the agent may call back into the host during a turn.
    #[must_use]
    pub fn has_callbacks(&self) -> bool {
        self.can_use_tool.is_some()
            || self.mcp_handler.is_some()
            || self.hooks.values().flatten().any(|matcher| !matcher.hooks.is_empty())
    }
}
