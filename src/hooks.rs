//! Hook callback registry.
//!
//! Hooks are registered per [`HookEvent`] behind an optional tool-name
//! matcher. When the session connects, every callback receives a stable id
//! and the matcher table is announced to the agent in the `initialize`
//! control request. The agent then calls back with `hook_callback` requests
//! naming one id at a time, in registration order.
//!
//! Ids are derived from the registration position
//! (`hook_{event}_{matcher index}_{callback index}`), so the same setup
//! always produces the same table.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::callback::CallbackFuture;
use crate::{AppError, Result};

/// Matcher value that selects every tool.
pub const MATCH_ALL: &str = "*";

// ── Events and payloads ───────────────────────────────────────────────────────

/// Lifecycle point at which a hook fires.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// Before a tool runs.
    PreToolUse,
    /// After a tool ran.
    PostToolUse,
    /// When the user submits a prompt.
    UserPromptSubmit,
    /// When the agent stops.
    Stop,
    /// When a subagent stops.
    SubagentStop,
    /// Before the conversation is compacted.
    PreCompact,
    /// When a session starts or resumes.
    SessionStart,
    /// When a session ends.
    SessionEnd,
    /// When the agent shows a notification.
    Notification,
}

impl HookEvent {
    /// Wire spelling of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::Notification => "Notification",
        }
    }
}

/// Fields shared by every hook input.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HookBase {
    /// Agent session id.
    #[serde(default)]
    pub session_id: String,
    /// Transcript file of the session.
    #[serde(default)]
    pub transcript_path: String,
    /// Agent working directory.
    #[serde(default)]
    pub cwd: String,
    /// Permission mode in effect.
    #[serde(default)]
    pub permission_mode: Option<String>,
}

/// Typed hook input, discriminated by `hook_event_name`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    /// Input for [`HookEvent::PreToolUse`].
    PreToolUse {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// Tool about to run.
        tool_name: String,
        /// Its input.
        #[serde(default)]
        tool_input: Value,
    },
    /// Input for [`HookEvent::PostToolUse`].
    PostToolUse {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// Tool that ran.
        tool_name: String,
        /// Its input.
        #[serde(default)]
        tool_input: Value,
        /// Its output.
        #[serde(default)]
        tool_response: Value,
    },
    /// Input for [`HookEvent::UserPromptSubmit`].
    UserPromptSubmit {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// Submitted prompt.
        prompt: String,
    },
    /// Input for [`HookEvent::Stop`].
    Stop {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// Whether a stop hook is already continuing the agent.
        #[serde(default)]
        stop_hook_active: bool,
    },
    /// Input for [`HookEvent::SubagentStop`].
    SubagentStop {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// Whether a stop hook is already continuing the agent.
        #[serde(default)]
        stop_hook_active: bool,
    },
    /// Input for [`HookEvent::PreCompact`].
    PreCompact {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// `manual` or `auto`.
        trigger: String,
        /// Extra compaction instructions.
        #[serde(default)]
        custom_instructions: Option<String>,
    },
    /// Input for [`HookEvent::SessionStart`].
    SessionStart {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// `startup`, `resume`, `clear` or `compact`.
        source: String,
    },
    /// Input for [`HookEvent::SessionEnd`].
    SessionEnd {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// Why the session ended, e.g. `clear` or `logout`.
        #[serde(default)]
        reason: String,
    },
    /// Input for [`HookEvent::Notification`].
    Notification {
        /// Shared fields.
        #[serde(flatten)]
        base: HookBase,
        /// Notification text.
        message: String,
        /// Optional title.
        #[serde(default)]
        title: Option<String>,
    },
}

impl HookInput {
    /// Event this input belongs to.
    #[must_use]
    pub fn event(&self) -> HookEvent {
        match self {
            Self::PreToolUse { .. } => HookEvent::PreToolUse,
            Self::PostToolUse { .. } => HookEvent::PostToolUse,
            Self::UserPromptSubmit { .. } => HookEvent::UserPromptSubmit,
            Self::Stop { .. } => HookEvent::Stop,
            Self::SubagentStop { .. } => HookEvent::SubagentStop,
            Self::PreCompact { .. } => HookEvent::PreCompact,
            Self::SessionStart { .. } => HookEvent::SessionStart,
            Self::SessionEnd { .. } => HookEvent::SessionEnd,
            Self::Notification { .. } => HookEvent::Notification,
        }
    }

    /// Triggering tool, for tool events.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::PreToolUse { tool_name, .. } | Self::PostToolUse { tool_name, .. } => {
                Some(tool_name)
            }
            _ => None,
        }
    }
}

/// Block decision returned by a hook.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    /// Block the pending action.
    Block,
}

/// Hook result sent back to the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// Whether the agent should keep going.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<bool>,
    /// Hide the hook's output from the transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    /// Message shown when `continue` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Block decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,
    /// Message injected for the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// Reason fed back to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Event-specific fields, e.g. `permissionDecision` for `PreToolUse`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<Value>,
}

impl HookOutput {
    /// Output that blocks the action with a reason.
    #[must_use]
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(HookDecision::Block),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Wire payload for the control response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Json` if the output fails to serialize.
    pub fn to_response(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::Json("hook output is not an object".into())),
        }
    }
}

// ── Callbacks and matchers ────────────────────────────────────────────────────

/// Hook callback: `(input, tool_use_id) → output`.
pub type HookCallback =
    Arc<dyn Fn(HookInput, Option<String>) -> CallbackFuture<HookOutput> + Send + Sync>;

/// Wrap an async closure as a [`HookCallback`].
pub fn hook_callback<F, Fut>(f: F) -> HookCallback
where
    F: Fn(HookInput, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutput>> + Send + 'static,
{
    Arc::new(move |input, tool_use_id| Box::pin(f(input, tool_use_id)))
}

/// Group of callbacks sharing one tool-name matcher.
#[derive(Clone, Default)]
pub struct HookMatcher {
    /// Tool name to match; `None` or `"*"` match every tool.
    pub matcher: Option<String>,
    /// Callbacks, run in order.
    pub hooks: Vec<HookCallback>,
}

impl Debug for HookMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl HookMatcher {
    /// Matcher for a single tool name, or `"*"`.
    #[must_use]
    pub fn new(matcher: impl Into<String>) -> Self {
        Self {
            matcher: Some(matcher.into()),
            hooks: Vec::new(),
        }
    }

    /// Matcher that applies to every tool.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Append a callback.
    #[must_use]
    pub fn hook(mut self, callback: HookCallback) -> Self {
        self.hooks.push(callback);
        self
    }

    /// Whether this matcher applies to `tool_name`.
    ///
    /// Non-tool events carry no tool name and only match catch-all matchers.
    #[must_use]
    pub fn matches(&self, tool_name: Option<&str>) -> bool {
        matcher_applies(self.matcher.as_deref(), tool_name)
    }
}

fn matcher_applies(matcher: Option<&str>, tool_name: Option<&str>) -> bool {
    match matcher {
        None | Some(MATCH_ALL) => true,
        Some(expected) => tool_name == Some(expected),
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// A callback resolved by id.
#[derive(Clone)]
pub struct RegisteredHook {
    /// Event the callback was registered for.
    pub event: HookEvent,
    /// Matcher it was registered under.
    pub matcher: Option<String>,
    /// The callback itself.
    pub callback: HookCallback,
}

impl RegisteredHook {
    /// Whether the registration matcher applies to `input`.
    #[must_use]
    pub fn applies_to(&self, input: &HookInput) -> bool {
        matcher_applies(self.matcher.as_deref(), input.tool_name())
    }
}

impl Debug for RegisteredHook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHook")
            .field("event", &self.event)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Per-session table from callback id to callback.
#[derive(Debug, Default)]
pub struct HookRegistry {
    entries: RwLock<HashMap<String, RegisteredHook>>,
    announcement: Option<Value>,
}

impl HookRegistry {
    /// Assign ids to every callback in `hooks` and build the `initialize`
    /// announcement.
    #[must_use]
    pub fn build(hooks: &BTreeMap<HookEvent, Vec<HookMatcher>>) -> Self {
        let mut entries = HashMap::new();
        let mut announcement = Map::new();

        for (event, matchers) in hooks {
            let mut announced = Vec::with_capacity(matchers.len());
            for (matcher_idx, matcher) in matchers.iter().enumerate() {
                let mut ids = Vec::with_capacity(matcher.hooks.len());
                for (hook_idx, callback) in matcher.hooks.iter().enumerate() {
                    let id = format!("hook_{}_{matcher_idx}_{hook_idx}", event.as_str());
                    entries.insert(
                        id.clone(),
                        RegisteredHook {
                            event: *event,
                            matcher: matcher.matcher.clone(),
                            callback: Arc::clone(callback),
                        },
                    );
                    ids.push(Value::String(id));
                }
                let mut entry = Map::new();
                entry.insert(
                    "matcher".into(),
                    matcher.matcher.clone().map_or(Value::Null, Value::String),
                );
                entry.insert("hookCallbackIds".into(), Value::Array(ids));
                announced.push(Value::Object(entry));
            }
            if !announced.is_empty() {
                announcement.insert(event.as_str().to_owned(), Value::Array(announced));
            }
        }

        Self {
            announcement: (!entries.is_empty()).then_some(Value::Object(announcement)),
            entries: RwLock::new(entries),
        }
    }

    /// `hooks` payload of the `initialize` request, or `None` when no
    /// callback is registered.
    #[must_use]
    pub fn announcement(&self) -> Option<&Value> {
        self.announcement.as_ref()
    }

    /// Resolve a callback id.
    #[must_use]
    pub fn get(&self, callback_id: &str) -> Option<RegisteredHook> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(callback_id)
            .cloned()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no callback is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every callback; later lookups fail.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
