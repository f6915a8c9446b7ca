//! Permission gate for tool use.
//!
//! When a permission callback is installed, the agent is launched with
//! `--permission-prompt-tool stdio` and asks the host about every tool use
//! with an inbound `can_use_tool` control request. The callback answers with
//! a [`PermissionDecision`], which [`PermissionDecision::to_response`] turns
//! into the wire payload.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::callback::CallbackFuture;
use crate::Result;

// ── Modes and updates ─────────────────────────────────────────────────────────

/// Permission mode of the agent session.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask for every sensitive tool use.
    #[default]
    Default,
    /// Accept file edits without asking.
    #[value(name = "acceptEdits", alias = "accept-edits")]
    AcceptEdits,
    /// Plan only; no tool execution.
    Plan,
    /// Never ask.
    #[value(name = "bypassPermissions", alias = "bypass-permissions")]
    BypassPermissions,
}

impl PermissionMode {
    /// Wire and command-line spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a permission update is persisted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionUpdateDestination {
    /// User-level settings file.
    UserSettings,
    /// Project settings file.
    ProjectSettings,
    /// Local, uncommitted settings file.
    LocalSettings,
    /// Current session only.
    Session,
}

/// Behavior attached to a permission rule.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionBehavior {
    /// Allow matching tool uses.
    Allow,
    /// Deny matching tool uses.
    Deny,
    /// Ask for matching tool uses.
    Ask,
}

/// A single permission rule.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
    /// Tool the rule applies to.
    pub tool_name: String,
    /// Optional rule body, e.g. a command prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_content: Option<String>,
}

/// Change to the permission configuration, suggested by the agent or
/// returned by the host alongside an allow decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionUpdate {
    /// Add rules.
    #[serde(rename_all = "camelCase")]
    AddRules {
        /// Rules to add.
        #[serde(default)]
        rules: Vec<PermissionRule>,
        /// Behavior of the added rules.
        behavior: PermissionBehavior,
        /// Where to persist.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Replace all rules with the given behavior.
    #[serde(rename_all = "camelCase")]
    ReplaceRules {
        /// Replacement rules.
        #[serde(default)]
        rules: Vec<PermissionRule>,
        /// Behavior of the rules.
        behavior: PermissionBehavior,
        /// Where to persist.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Remove rules.
    #[serde(rename_all = "camelCase")]
    RemoveRules {
        /// Rules to remove.
        #[serde(default)]
        rules: Vec<PermissionRule>,
        /// Behavior of the rules.
        behavior: PermissionBehavior,
        /// Where to persist.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Switch permission mode.
    #[serde(rename_all = "camelCase")]
    SetMode {
        /// New mode.
        mode: PermissionMode,
        /// Where to persist.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Grant access to more directories.
    #[serde(rename_all = "camelCase")]
    AddDirectories {
        /// Directories to add.
        #[serde(default)]
        directories: Vec<PathBuf>,
        /// Where to persist.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Revoke access to directories.
    #[serde(rename_all = "camelCase")]
    RemoveDirectories {
        /// Directories to remove.
        #[serde(default)]
        directories: Vec<PathBuf>,
        /// Where to persist.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
}

// ── Decisions ─────────────────────────────────────────────────────────────────

/// Extra information accompanying a `can_use_tool` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolPermissionContext {
    /// Updates the agent suggests applying if the host allows the call.
    pub suggestions: Vec<PermissionUpdate>,
    /// Path outside the permitted directories that triggered the request.
    pub blocked_path: Option<String>,
}

/// Host answer to a `can_use_tool` request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    /// Let the tool run, optionally with rewritten input.
    Allow {
        /// Replacement tool input; the original input is echoed when absent.
        updated_input: Option<Value>,
        /// Permission changes to apply alongside the call.
        updated_permissions: Option<Vec<PermissionUpdate>>,
    },
    /// Refuse the tool use.
    Deny {
        /// Reason shown to the agent.
        message: String,
        /// Stop the whole turn, not just this tool call.
        interrupt: bool,
    },
}

impl PermissionDecision {
    /// Allow with the original input.
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Deny without interrupting the turn.
    #[must_use]
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    /// Wire payload for the control response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Json` if the permission updates fail to serialize.
    pub fn to_response(&self, original_input: &Value) -> Result<Map<String, Value>> {
        let mut payload = Map::new();
        match self {
            Self::Allow {
                updated_input,
                updated_permissions,
            } => {
                payload.insert("behavior".into(), json!("allow"));
                payload.insert(
                    "updatedInput".into(),
                    updated_input.clone().unwrap_or_else(|| original_input.clone()),
                );
                if let Some(updates) = updated_permissions {
                    payload.insert("updatedPermissions".into(), serde_json::to_value(updates)?);
                }
            }
            Self::Deny { message, interrupt } => {
                payload.insert("behavior".into(), json!("deny"));
                payload.insert("message".into(), json!(message));
                if *interrupt {
                    payload.insert("interrupt".into(), json!(true));
                }
            }
        }
        Ok(payload)
    }
}

/// Permission callback: `(tool_name, input, context) → decision`.
pub type CanUseTool = Arc<
    dyn Fn(String, Value, ToolPermissionContext) -> CallbackFuture<PermissionDecision>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`CanUseTool`] callback.
pub fn can_use_tool<F, Fut>(f: F) -> CanUseTool
where
    F: Fn(String, Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PermissionDecision>> + Send + 'static,
{
    Arc::new(move |tool_name, input, context| Box::pin(f(tool_name, input, context)))
}
