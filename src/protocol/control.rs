//! Control-plane envelopes.
//!
//! | Direction     | Envelope                                   |
//! |---------------|--------------------------------------------|
//! | host → agent  | `control_request` with a [`ControlRequest`]  |
//! | agent → host  | `control_response` with a [`ControlResponse`] |
//! | agent → host  | `control_request` with an [`InboundRequest`] |
//! | host → agent  | `control_response` answering the above     |
//!
//! Both directions correlate purely by `request_id`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::permission::PermissionMode;
use crate::{AppError, Result};

// ── Outbound requests ─────────────────────────────────────────────────────────

/// Request sent from the host to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Stop the current turn.
    Interrupt,
    /// Switch permission mode.
    SetPermissionMode {
        /// New mode.
        mode: PermissionMode,
    },
    /// Switch model; `None` restores the default.
    SetModel {
        /// Model id.
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// List models the agent can use.
    SupportedModels,
    /// List slash commands the agent offers.
    SupportedCommands,
    /// Report MCP server connection status.
    McpServerStatus,
    /// Announce hook callbacks.
    Initialize {
        /// Matcher table keyed by hook event.
        #[serde(skip_serializing_if = "Option::is_none")]
        hooks: Option<Value>,
    },
}

impl ControlRequest {
    /// Wire subtype of the request.
    #[must_use]
    pub fn subtype(&self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::SetPermissionMode { .. } => "set_permission_mode",
            Self::SetModel { .. } => "set_model",
            Self::SupportedModels => "supported_models",
            Self::SupportedCommands => "supported_commands",
            Self::McpServerStatus => "mcp_server_status",
            Self::Initialize { .. } => "initialize",
        }
    }
}

/// `control_request` envelope for an outbound request.
#[must_use]
pub fn request_envelope(request_id: &str, request: &ControlRequest) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Agent answer to an outbound request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Request succeeded.
    Success {
        /// Correlation id.
        request_id: String,
        /// Response payload.
        #[serde(default)]
        response: Option<Value>,
    },
    /// Request failed.
    Error {
        /// Correlation id.
        request_id: String,
        /// Failure description.
        #[serde(default)]
        error: String,
    },
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    response: ControlResponse,
}

impl ControlResponse {
    /// Decode the body of a `control_response` frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when the envelope is malformed.
    pub fn from_frame_body(body: Value) -> Result<Self> {
        serde_json::from_value::<ResponseEnvelope>(body)
            .map(|envelope| envelope.response)
            .map_err(|err| AppError::Protocol(format!("malformed control_response: {err}")))
    }

    /// Correlation id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }

    /// Payload on success, `AppError::ControlRejected` on error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ControlRejected` for error responses and
    /// `AppError::Protocol` for a non-object success payload.
    pub fn into_result(self) -> Result<Map<String, Value>> {
        match self {
            Self::Success { response, .. } => match response {
                None | Some(Value::Null) => Ok(Map::new()),
                Some(Value::Object(map)) => Ok(map),
                Some(other) => Err(AppError::Protocol(format!(
                    "control response payload is not an object: {other}"
                ))),
            },
            Self::Error { error, .. } => Err(AppError::ControlRejected(error)),
        }
    }
}

/// Successful `control_response` envelope answering an inbound request.
#[must_use]
pub fn success_envelope(request_id: &str, payload: Map<String, Value>) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": payload,
        },
    })
}

/// Error `control_response` envelope answering an inbound request.
#[must_use]
pub fn error_envelope(request_id: &str, error: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": error,
        },
    })
}

// ── Inbound requests ──────────────────────────────────────────────────────────

/// Request sent from the agent to the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum InboundRequest {
    /// Ask whether a tool may run.
    CanUseTool {
        /// Tool name.
        tool_name: String,
        /// Tool input.
        #[serde(default)]
        input: Value,
        /// Raw permission updates the agent suggests.
        #[serde(default)]
        permission_suggestions: Option<Vec<Value>>,
        /// Path that triggered the request.
        #[serde(default)]
        blocked_path: Option<String>,
    },
    /// Run one hook callback.
    HookCallback {
        /// Registered callback id.
        callback_id: String,
        /// Raw hook input.
        #[serde(default)]
        input: Value,
        /// Tool use the hook relates to.
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    /// JSON-RPC message for an in-process MCP server.
    McpMessage {
        /// Target server.
        server_name: String,
        /// JSON-RPC payload.
        message: Value,
    },
}

impl InboundRequest {
    /// Wire subtype of the request.
    #[must_use]
    pub fn subtype(&self) -> &'static str {
        match self {
            Self::CanUseTool { .. } => "can_use_tool",
            Self::HookCallback { .. } => "hook_callback",
            Self::McpMessage { .. } => "mcp_message",
        }
    }
}

/// Split the body of an inbound `control_request` frame.
///
/// The request id is extracted on its own first so that an unparseable
/// request can still be answered with an error response.
///
/// # Errors
///
/// Returns `AppError::Protocol` when `request_id` is missing. A malformed
/// `request` is reported through the inner result.
pub fn split_inbound(mut body: Value) -> Result<(String, Result<InboundRequest>)> {
    let request_id = body
        .get("request_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Protocol("control_request without request_id".into()))?;

    let request = body
        .get_mut("request")
        .map(Value::take)
        .ok_or_else(|| AppError::Protocol("control_request without request".into()))
        .and_then(|raw| {
            serde_json::from_value::<InboundRequest>(raw)
                .map_err(|err| AppError::Protocol(format!("unsupported control_request: {err}")))
        });

    Ok((request_id, request))
}
