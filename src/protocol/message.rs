//! Data-plane messages emitted by the agent.
//!
//! Every line on the agent's stdout is a JSON object with a `type`
//! discriminator. The control-plane types (`control_request`,
//! `control_response`) are consumed by the router; everything else is one
//! of the [`Message`] variants below and is forwarded to the caller in
//! arrival order.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::transport::codec::Frame;
use crate::{AppError, Result};

/// Discriminators of data-plane messages.
pub const MESSAGE_TYPES: &[&str] = &["user", "assistant", "system", "result", "stream_event"];

// ── Content ───────────────────────────────────────────────────────────────────

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Extended thinking.
    Thinking {
        /// Thinking text.
        thinking: String,
        /// Verification signature.
        #[serde(default)]
        signature: String,
    },
    /// Tool invocation requested by the model.
    ToolUse {
        /// Tool use id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        #[serde(default)]
        input: Value,
    },
    /// Result of a tool invocation.
    ToolResult {
        /// Tool use this result answers.
        tool_use_id: String,
        /// Result payload, string or blocks.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        /// Whether the tool failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Any block type this crate does not model.
    #[serde(other)]
    Unknown,
}

/// User content: a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Bare string.
    Text(String),
    /// Content blocks.
    Blocks(Vec<ContentBlock>),
}

/// Body of a `user` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBody {
    /// Always `user`.
    #[serde(default = "default_user_role")]
    pub role: String,
    /// Content.
    pub content: UserContent,
}

fn default_user_role() -> String {
    "user".into()
}

/// Body of an `assistant` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantBody {
    /// Model that produced the message.
    #[serde(default)]
    pub model: String,
    /// Content blocks.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Final message of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// `success`, `error_max_turns`, `error_during_execution`, ...
    pub subtype: String,
    /// Wall-clock duration of the turn.
    #[serde(default)]
    pub duration_ms: u64,
    /// Time spent in API calls.
    #[serde(default)]
    pub duration_api_ms: u64,
    /// Whether the turn failed.
    #[serde(default)]
    pub is_error: bool,
    /// Turns used.
    #[serde(default)]
    pub num_turns: u32,
    /// Agent session id.
    #[serde(default)]
    pub session_id: String,
    /// Cost in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// Final text result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Data-plane message, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// User turn, including tool results echoed back by the agent.
    User {
        /// User content.
        message: UserBody,
        /// Parent tool use for subagent traffic.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Agent session id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Model output.
    Assistant {
        /// Assistant content.
        message: AssistantBody,
        /// Parent tool use for subagent traffic.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Agent session id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// System notice, e.g. `init`.
    System {
        /// Notice kind.
        subtype: String,
        /// Remaining fields.
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    /// End of a turn.
    Result(ResultMessage),
    /// Partial streaming event.
    StreamEvent {
        /// Event id.
        #[serde(default)]
        uuid: String,
        /// Agent session id.
        #[serde(default)]
        session_id: String,
        /// Raw event.
        event: Value,
        /// Parent tool use for subagent traffic.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
}

impl Message {
    /// Whether this message ends a turn.
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Session id announced by a `system/init` message.
    #[must_use]
    pub fn init_session_id(&self) -> Option<&str> {
        match self {
            Self::System { subtype, data } if subtype == "init" => {
                data.get("session_id").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Concatenated text blocks of an assistant message.
    #[must_use]
    pub fn assistant_text(&self) -> Option<String> {
        let Self::Assistant { message, .. } = self else {
            return None;
        };
        let text: Vec<&str> = message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        Some(text.join(""))
    }
}

/// Decode a data-plane frame into a typed [`Message`].
///
/// # Errors
///
/// - `AppError::Protocol("unknown message type: …")` for an unmodelled
///   discriminator.
/// - `AppError::Protocol("malformed … message: …")` when the body does not
///   match the variant.
pub fn parse_message(frame: Frame) -> Result<Message> {
    if !MESSAGE_TYPES.contains(&frame.message_type.as_str()) {
        return Err(AppError::Protocol(format!(
            "unknown message type: {}",
            frame.message_type
        )));
    }
    serde_json::from_value(frame.body).map_err(|err| {
        AppError::Protocol(format!("malformed {} message: {err}", frame.message_type))
    })
}

/// Outgoing `user` message carrying a text prompt.
#[must_use]
pub fn user_prompt(text: &str, session_id: &str) -> Value {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{"type": "text", "text": text}],
        },
        "parent_tool_use_id": null,
        "session_id": session_id,
    })
}
